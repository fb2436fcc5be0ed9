use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Access tokens shared by the gateway clients of one process, keyed by provider.
///
/// A token is handed out only while it has more than `refresh_margin` left, so
/// callers never send one that expires mid-request.
#[derive(Debug, Clone)]
pub struct TokenCache {
    tokens: Arc<RwLock<HashMap<String, CachedToken>>>,
    refresh_margin: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Duration::minutes(5))
    }
}

impl TokenCache {
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
            refresh_margin,
        }
    }

    pub async fn get(&self, provider: &str) -> Option<String> {
        self.get_at(provider, Utc::now()).await
    }

    pub async fn get_at(&self, provider: &str, now: DateTime<Utc>) -> Option<String> {
        let tokens = self.tokens.read().await;
        tokens
            .get(provider)
            .filter(|cached| cached.expires_at > now + self.refresh_margin)
            .map(|cached| cached.token.clone())
    }

    pub async fn put(&self, provider: &str, token: String, ttl: Duration) {
        self.put_at(provider, token, ttl, Utc::now()).await
    }

    pub async fn put_at(&self, provider: &str, token: String, ttl: Duration, now: DateTime<Utc>) {
        let mut tokens = self.tokens.write().await;
        tokens.insert(
            provider.to_string(),
            CachedToken {
                token,
                expires_at: now + ttl,
            },
        );
    }

    pub async fn invalidate(&self, provider: &str) {
        if self.tokens.write().await.remove(provider).is_some() {
            log::debug!("Dropped cached {} token", provider);
        }
    }
}

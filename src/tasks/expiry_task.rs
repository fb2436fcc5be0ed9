use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::BillingResult;
use crate::services::subscription::{ExpirySweep, SubscriptionService};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the expiry sweep every `every`, starting immediately.
pub fn spawn_expiry_task(subscriptions: SubscriptionService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            // A failed sweep is retried on the next tick.
            if let Err(e) = process_expired_subscriptions(&subscriptions, Utc::now()).await {
                log::error!("Subscription expiry sweep failed: {}", e);
            }
        }
    })
}

pub async fn process_expired_subscriptions(
    subscriptions: &SubscriptionService,
    now: DateTime<Utc>,
) -> BillingResult<ExpirySweep> {
    log::debug!("Checking for lapsed subscriptions at {}", now);
    subscriptions.expire_lapsed(now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::user::{CreateUserRequest, User};
    use crate::services::store::{BillingStore, InMemoryStore};
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweep_downgrades_lapsed_user() {
        let store = Arc::new(InMemoryStore::new());
        let subscriptions = SubscriptionService::new(store.clone(), &AppConfig::default());
        let now = Utc::now();

        let mut user = User::new(CreateUserRequest {
            email: "lapsed@example.com".to_string(),
            username: "lapsed".to_string(),
            first_name: "Lapsed".to_string(),
            last_name: "User".to_string(),
            phone: None,
            institution: None,
            department: None,
            student_id: None,
        });
        user.grant_premium(now - ChronoDuration::days(1), now - ChronoDuration::days(31));
        store.create_user(&user).await.unwrap();

        let sweep = process_expired_subscriptions(&subscriptions, now).await.unwrap();
        assert_eq!(sweep.users_downgraded, 1);

        let stored = store.get_user(user.id).await.unwrap().unwrap();
        assert!(!stored.is_premium);
    }
}

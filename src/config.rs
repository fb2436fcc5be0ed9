use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub frontend_url: String,
    pub gateways: GatewaysConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaysConfig {
    pub http_timeout_secs: u64,
    pub token_refresh_margin_secs: i64,
    pub bkash: BkashConfig,
    pub nagad: NagadConfig,
    pub rocket: RocketConfig,
    pub aamarpay: AamarPayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BkashConfig {
    pub base_url: String,
    pub app_key: String,
    pub app_secret: String,
    pub username: String,
    pub password: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NagadConfig {
    pub base_url: String,
    pub merchant_id: String,
    /// Nagad's RSA public key, PEM or bare base64 DER.
    pub public_key: String,
    pub private_key: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocketConfig {
    pub base_url: String,
    pub merchant_id: String,
    pub api_key: String,
    pub secret_key: String,
    pub success_url: String,
    pub cancel_url: String,
    pub fail_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AamarPayConfig {
    pub base_url: String,
    pub store_id: String,
    pub signature_key: String,
    pub success_url: String,
    pub fail_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub free_post_limit: u32,
    pub expiry_sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let frontend_url = env_or("FRONTEND_URL", "https://study-sync-teal.vercel.app");
        let frontend = frontend_url.trim_end_matches('/').to_string();

        Ok(Config {
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "mem://"),
                namespace: env_or("DATABASE_NAMESPACE", "studysync"),
                database: env_or("DATABASE_NAME", "billing"),
                username: env::var("DATABASE_USER").ok(),
                password: env::var("DATABASE_PASS").ok(),
            },

            server: ServerConfig {
                host: env_or("HOST", "0.0.0.0"),
                port: env_parse("PORT", 8080),
            },

            gateways: GatewaysConfig {
                http_timeout_secs: env_parse("GATEWAY_HTTP_TIMEOUT_SECS", 30),
                token_refresh_margin_secs: env_parse("GATEWAY_TOKEN_REFRESH_MARGIN_SECS", 300),
                bkash: BkashConfig {
                    base_url: env_or("BKASH_BASE_URL", "https://tokenized.sandbox.bka.sh/v1.2.0-beta"),
                    app_key: env_or("BKASH_APP_KEY", ""),
                    app_secret: env_or("BKASH_APP_SECRET", ""),
                    username: env_or("BKASH_USERNAME", ""),
                    password: env_or("BKASH_PASSWORD", ""),
                    callback_url: format!("{}/payment/callback/bkash/", frontend),
                },
                nagad: NagadConfig {
                    base_url: env_or(
                        "NAGAD_BASE_URL",
                        "https://sandbox.mynagad.com:10080/remote-payment-gateway-1.0/api/dfs",
                    ),
                    merchant_id: env_or("NAGAD_MERCHANT_ID", ""),
                    public_key: env_or("NAGAD_PUBLIC_KEY", ""),
                    private_key: env_or("NAGAD_PRIVATE_KEY", ""),
                    callback_url: format!("{}/payment/callback/nagad/", frontend),
                },
                rocket: RocketConfig {
                    base_url: env_or("ROCKET_BASE_URL", "https://sandbox.rocket.com.bd/api/v1"),
                    merchant_id: env_or("ROCKET_MERCHANT_ID", ""),
                    api_key: env_or("ROCKET_API_KEY", ""),
                    secret_key: env_or("ROCKET_SECRET_KEY", ""),
                    success_url: format!("{}/payment/callback/rocket/success/", frontend),
                    cancel_url: format!("{}/payment/callback/rocket/cancel/", frontend),
                    fail_url: format!("{}/payment/callback/rocket/fail/", frontend),
                },
                aamarpay: AamarPayConfig {
                    base_url: env_or("AAMARPAY_BASE_URL", "https://sandbox.aamarpay.com"),
                    store_id: env_or("AAMARPAY_STORE_ID", "aamarpaytest"),
                    signature_key: env_or("AAMARPAY_SIGNATURE_KEY", ""),
                    success_url: format!("{}/payment/callback/aamarpay/success/", frontend),
                    fail_url: format!("{}/payment/callback/aamarpay/fail/", frontend),
                    cancel_url: format!("{}/payment/callback/aamarpay/cancel/", frontend),
                },
            },

            app: AppConfig {
                free_post_limit: env_parse("FREE_POST_LIMIT", 5),
                expiry_sweep_interval_secs: env_parse("EXPIRY_SWEEP_INTERVAL_SECS", 3600),
            },

            frontend_url: frontend,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            free_post_limit: 5,
            expiry_sweep_interval_secs: 3600,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        env::set_var("STUDYSYNC_TEST_GARBAGE_PORT", "not-a-number");
        assert_eq!(env_parse("STUDYSYNC_TEST_GARBAGE_PORT", 8080u16), 8080);

        env::set_var("STUDYSYNC_TEST_PORT", " 9090 ");
        assert_eq!(env_parse("STUDYSYNC_TEST_PORT", 8080u16), 9090);
    }

    #[test]
    fn test_app_config_defaults() {
        let app = AppConfig::default();
        assert_eq!(app.free_post_limit, 5);
        assert_eq!(app.expiry_sweep_interval_secs, 3600);
    }
}

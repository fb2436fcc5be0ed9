use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use surrealdb::{
    engine::any::{self, Any},
    opt::auth::Root,
    Surreal,
};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::{
    payment::{MobileBankingTransaction, Payment, PaymentLog, SavedPaymentMethod},
    subscription::{
        PostUsage, SubscriptionActivation, SubscriptionPlan, SubscriptionStatus, UserSubscription,
    },
    user::User,
};
use crate::services::store::{BillingStore, StoreResult};

const USERS: &str = "users";
const PLANS: &str = "plans";
const SUBSCRIPTIONS: &str = "subscriptions";
const PAYMENTS: &str = "payments";
const MOBILE_TRANSACTIONS: &str = "mobile_transactions";
const PAYMENT_LOGS: &str = "payment_logs";
const ACTIVATIONS: &str = "activations";
const SAVED_METHODS: &str = "saved_payment_methods";
const POST_USAGE: &str = "post_usage";

/// Every record stores the document as JSON text next to a few indexed columns,
/// so decimals and timestamps come back exactly as they went in.
#[derive(Debug, Serialize, Deserialize)]
struct Row {
    key: String,
    owner: Option<String>,
    lookup: Option<String>,
    flag: bool,
    rank: i64,
    data: String,
}

#[derive(Default)]
struct Columns {
    owner: Option<String>,
    lookup: Option<String>,
    flag: bool,
    rank: i64,
}

/// SurrealDB adapter for `BillingStore`.
#[derive(Clone)]
pub struct DatabaseService {
    db: Surreal<Any>,
}

impl DatabaseService {
    /// Connects to `mem://`, `file://`, `ws://` or `http://` endpoints.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let db = any::connect(config.url.as_str()).await?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await?;
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await?;

        let service = Self { db };
        service.initialize_schema().await?;

        log::info!("Connected to SurrealDB at {}", config.url);
        Ok(service)
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        let mut statements = String::new();
        for table in [
            USERS,
            PLANS,
            SUBSCRIPTIONS,
            PAYMENTS,
            MOBILE_TRANSACTIONS,
            PAYMENT_LOGS,
            ACTIVATIONS,
            SAVED_METHODS,
            POST_USAGE,
        ] {
            // Account emails are unique; anonymized ones included.
            let unique = if table == USERS { " UNIQUE" } else { "" };
            statements.push_str(&format!(
                "DEFINE TABLE {table} SCHEMALESS;
                 DEFINE INDEX {table}_owner ON {table} FIELDS owner;
                 DEFINE INDEX {table}_lookup ON {table} FIELDS lookup{unique};\n"
            ));
        }

        self.db.query(statements).await?.check()?;

        log::info!("Database schema initialized");
        Ok(())
    }

    fn row<T: Serialize>(key: String, columns: Columns, value: &T) -> StoreResult<Row> {
        Ok(Row {
            key,
            owner: columns.owner,
            lookup: columns.lookup,
            flag: columns.flag,
            rank: columns.rank,
            data: serde_json::to_string(value)?,
        })
    }

    async fn put<T: Serialize>(&self, table: &'static str, key: String, columns: Columns, value: &T) -> StoreResult<()> {
        let row = Self::row(key.clone(), columns, value)?;
        self.db
            .query("UPDATE type::thing($tb, $key) CONTENT $row")
            .bind(("tb", table))
            .bind(("key", key))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn insert<T: Serialize>(&self, table: &'static str, key: String, columns: Columns, value: &T) -> StoreResult<()> {
        let row = Self::row(key.clone(), columns, value)?;
        let result = self
            .db
            .query("CREATE type::thing($tb, $key) CONTENT $row")
            .bind(("tb", table))
            .bind(("key", key.clone()))
            .bind(("row", row))
            .await
            .and_then(|response| response.check());

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate(&err) => Err(StoreError::Duplicate { table, key }),
            Err(err) => Err(err.into()),
        }
    }

    async fn get<T: DeserializeOwned>(&self, table: &'static str, key: String) -> StoreResult<Option<T>> {
        let mut response = self
            .db
            .query("SELECT VALUE data FROM type::thing($tb, $key)")
            .bind(("tb", table))
            .bind(("key", key))
            .await?;
        let data: Option<String> = response.take(0)?;
        data.map(|text| serde_json::from_str(&text).map_err(StoreError::from))
            .transpose()
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &'static str,
        condition: &str,
        params: Vec<(&'static str, Value)>,
    ) -> StoreResult<Vec<T>> {
        let mut query = self
            .db
            .query(format!("SELECT VALUE data FROM type::table($tb) WHERE {}", condition))
            .bind(("tb", table));
        for param in params {
            query = query.bind(param);
        }

        let rows: Vec<String> = query.await?.take(0)?;
        rows.iter()
            .map(|text| serde_json::from_str(text).map_err(StoreError::from))
            .collect()
    }
}

/// Record-id clashes say "already exists"; unique index clashes say "already contains".
fn is_duplicate(err: &surrealdb::Error) -> bool {
    let message = err.to_string();
    message.contains("already exists") || message.contains("already contains")
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[async_trait]
impl BillingStore for DatabaseService {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        self.insert(USERS, user.id.to_string(), user_columns(user), user).await
    }

    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        self.get(USERS, user_id.to_string()).await
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let mut users: Vec<User> = self
            .select(USERS, "lookup = $email", vec![("email", json!(email.to_lowercase()))])
            .await?;
        Ok(users.pop())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        self.put(USERS, user.id.to_string(), user_columns(user), user).await
    }

    async fn premium_users_expired_by(&self, now: DateTime<Utc>) -> StoreResult<Vec<User>> {
        self.select(USERS, "flag = true AND rank <= $now", vec![("now", json!(millis(now)))])
            .await
    }

    async fn save_plan(&self, plan: &SubscriptionPlan) -> StoreResult<()> {
        let columns = Columns {
            lookup: Some(plan.name.clone()),
            flag: plan.is_active,
            ..Columns::default()
        };
        self.put(PLANS, plan.id.to_string(), columns, plan).await
    }

    async fn get_plan(&self, plan_id: Uuid) -> StoreResult<Option<SubscriptionPlan>> {
        self.get(PLANS, plan_id.to_string()).await
    }

    async fn find_plan_by_name(&self, name: &str) -> StoreResult<Option<SubscriptionPlan>> {
        let mut plans: Vec<SubscriptionPlan> = self
            .select(PLANS, "lookup = $name", vec![("name", json!(name))])
            .await?;
        Ok(plans.pop())
    }

    async fn active_plans(&self) -> StoreResult<Vec<SubscriptionPlan>> {
        let mut plans: Vec<SubscriptionPlan> = self.select(PLANS, "flag = true", Vec::new()).await?;
        plans.sort_by(|a, b| a.price.cmp(&b.price));
        Ok(plans)
    }

    async fn get_user_subscription(&self, user_id: Uuid) -> StoreResult<Option<UserSubscription>> {
        self.get(SUBSCRIPTIONS, user_id.to_string()).await
    }

    async fn save_user_subscription(&self, subscription: &UserSubscription) -> StoreResult<()> {
        let columns = Columns {
            owner: Some(subscription.user_id.to_string()),
            flag: subscription.status == SubscriptionStatus::Active,
            rank: millis(subscription.expires_at),
            ..Columns::default()
        };
        self.put(SUBSCRIPTIONS, subscription.user_id.to_string(), columns, subscription)
            .await
    }

    async fn active_subscriptions_expired_by(&self, now: DateTime<Utc>) -> StoreResult<Vec<UserSubscription>> {
        self.select(SUBSCRIPTIONS, "flag = true AND rank <= $now", vec![("now", json!(millis(now)))])
            .await
    }

    async fn create_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.insert(PAYMENTS, payment.id.to_string(), payment_columns(payment), payment)
            .await
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        self.get(PAYMENTS, payment_id.to_string()).await
    }

    async fn get_payment_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<Payment>> {
        let mut payments: Vec<Payment> = self
            .select(PAYMENTS, "lookup = $txid", vec![("txid", json!(transaction_id))])
            .await?;
        Ok(payments.pop())
    }

    async fn update_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.put(PAYMENTS, payment.id.to_string(), payment_columns(payment), payment)
            .await
    }

    async fn payments_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .select(PAYMENTS, "owner = $owner", vec![("owner", json!(user_id.to_string()))])
            .await?;
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn save_mobile_transaction(&self, transaction: &MobileBankingTransaction) -> StoreResult<()> {
        let columns = Columns {
            lookup: Some(transaction.provider_transaction_id.clone()),
            ..Columns::default()
        };
        self.put(MOBILE_TRANSACTIONS, transaction.payment_id.to_string(), columns, transaction)
            .await
    }

    async fn get_mobile_transaction(&self, payment_id: Uuid) -> StoreResult<Option<MobileBankingTransaction>> {
        self.get(MOBILE_TRANSACTIONS, payment_id.to_string()).await
    }

    async fn append_payment_log(&self, log: &PaymentLog) -> StoreResult<()> {
        let columns = Columns {
            owner: Some(log.payment_id.to_string()),
            rank: millis(log.created_at),
            ..Columns::default()
        };
        self.insert(PAYMENT_LOGS, log.id.to_string(), columns, log).await
    }

    async fn payment_logs(&self, payment_id: Uuid) -> StoreResult<Vec<PaymentLog>> {
        let mut logs: Vec<PaymentLog> = self
            .select(PAYMENT_LOGS, "owner = $owner", vec![("owner", json!(payment_id.to_string()))])
            .await?;
        logs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(logs)
    }

    async fn insert_activation(&self, activation: &SubscriptionActivation) -> StoreResult<()> {
        let columns = Columns {
            owner: Some(activation.user_id.to_string()),
            rank: millis(activation.activated_at),
            ..Columns::default()
        };
        self.insert(ACTIVATIONS, activation.payment_id.to_string(), columns, activation)
            .await
    }

    async fn get_activation(&self, payment_id: Uuid) -> StoreResult<Option<SubscriptionActivation>> {
        self.get(ACTIVATIONS, payment_id.to_string()).await
    }

    async fn update_activation(&self, activation: &SubscriptionActivation) -> StoreResult<()> {
        let columns = Columns {
            owner: Some(activation.user_id.to_string()),
            flag: activation.reversed_at.is_some(),
            rank: millis(activation.activated_at),
            ..Columns::default()
        };
        self.put(ACTIVATIONS, activation.payment_id.to_string(), columns, activation)
            .await
    }

    async fn save_payment_method(&self, method: &SavedPaymentMethod) -> StoreResult<()> {
        let columns = Columns {
            owner: Some(method.user_id.to_string()),
            flag: method.is_active,
            rank: millis(method.created_at),
            ..Columns::default()
        };
        self.put(SAVED_METHODS, method.id.to_string(), columns, method).await
    }

    async fn payment_methods_for_user(&self, user_id: Uuid) -> StoreResult<Vec<SavedPaymentMethod>> {
        let mut methods: Vec<SavedPaymentMethod> = self
            .select(SAVED_METHODS, "owner = $owner", vec![("owner", json!(user_id.to_string()))])
            .await?;
        methods.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(methods)
    }

    async fn record_post(&self, usage: &PostUsage) -> StoreResult<()> {
        let columns = Columns {
            owner: Some(usage.user_id.to_string()),
            rank: millis(usage.created_at),
            ..Columns::default()
        };
        self.insert(POST_USAGE, usage.id.to_string(), columns, usage).await
    }

    async fn count_posts_since(&self, user_id: Uuid, since: DateTime<Utc>) -> StoreResult<u32> {
        let posts: Vec<PostUsage> = self
            .select(
                POST_USAGE,
                "owner = $owner AND rank >= $since",
                vec![
                    ("owner", json!(user_id.to_string())),
                    ("since", json!(millis(since))),
                ],
            )
            .await?;
        Ok(posts.len() as u32)
    }
}

fn user_columns(user: &User) -> Columns {
    Columns {
        lookup: Some(user.email.to_lowercase()),
        flag: user.is_premium,
        rank: user.premium_expires_at.map_or(i64::MAX, millis),
        ..Columns::default()
    }
}

fn payment_columns(payment: &Payment) -> Columns {
    Columns {
        owner: Some(payment.user_id.to_string()),
        lookup: payment.transaction_id.clone(),
        rank: millis(payment.created_at),
        ..Columns::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::CreateUserRequest;
    use chrono::Duration;

    async fn memory_db() -> DatabaseService {
        DatabaseService::connect(&DatabaseConfig {
            url: "mem://".to_string(),
            namespace: "test".to_string(),
            database: "billing".to_string(),
            username: None,
            password: None,
        })
        .await
        .unwrap()
    }

    fn user(email: &str) -> User {
        User::new(CreateUserRequest {
            username: "karim".to_string(),
            email: email.to_string(),
            first_name: "Karim".to_string(),
            last_name: "Hossain".to_string(),
            phone: None,
            institution: None,
            department: None,
            student_id: None,
        })
    }

    #[tokio::test]
    async fn test_user_round_trip_and_email_lookup() {
        let db = memory_db().await;
        let user = user("karim@example.com");
        db.create_user(&user).await.unwrap();

        let by_id = db.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "karim@example.com");

        let by_email = db.get_user_by_email("KARIM@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert!(db.get_user(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_email_is_unique_across_users() {
        let db = memory_db().await;
        db.create_user(&user("karim@example.com")).await.unwrap();

        let err = db.create_user(&user("karim@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { table: "users", .. }));

        db.create_user(&user("karima@example.com")).await.unwrap();
    }

    #[tokio::test]
    async fn test_saved_methods_by_owner() {
        use crate::models::{common::PaymentMethod, payment::SavePaymentMethodRequest};

        let db = memory_db().await;
        let owner = Uuid::new_v4();
        let now = Utc::now();
        for (offset, name) in [(0, "bKash"), (1, "Nagad")] {
            let method = SavedPaymentMethod::new(
                owner,
                PaymentMethod::Bkash,
                SavePaymentMethodRequest {
                    method_type: "bkash".to_string(),
                    display_name: name.to_string(),
                    phone_number: Some("01712345678".to_string()),
                    account_number: None,
                    is_default: false,
                },
                now + Duration::seconds(offset),
            );
            db.save_payment_method(&method).await.unwrap();
        }

        let methods = db.payment_methods_for_user(owner).await.unwrap();
        let names: Vec<&str> = methods.iter().map(|m| m.display_name.as_str()).collect();
        assert_eq!(names, vec!["bKash", "Nagad"]);
        assert!(db.payment_methods_for_user(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activation_insert_is_unique() {
        let db = memory_db().await;
        let now = Utc::now();
        let activation = SubscriptionActivation {
            payment_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            previous_expiry: None,
            new_expiry: now + Duration::days(30),
            granted_seconds: Duration::days(30).num_seconds(),
            activated_at: now,
            reversed_at: None,
        };

        db.insert_activation(&activation).await.unwrap();
        let err = db.insert_activation(&activation).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { table: "activations", .. }));

        let stored = db.get_activation(activation.payment_id).await.unwrap().unwrap();
        assert_eq!(stored, activation);
    }

    #[tokio::test]
    async fn test_expired_premium_users_query() {
        let db = memory_db().await;
        let now = Utc::now();

        let mut lapsed = user("lapsed@example.com");
        lapsed.grant_premium(now - Duration::hours(1), now);
        let mut current = user("current@example.com");
        current.grant_premium(now + Duration::days(3), now);
        db.create_user(&lapsed).await.unwrap();
        db.create_user(&current).await.unwrap();

        let expired = db.premium_users_expired_by(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, lapsed.id);
    }
}

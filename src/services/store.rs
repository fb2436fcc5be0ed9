use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    payment::{MobileBankingTransaction, Payment, PaymentLog, SavedPaymentMethod},
    subscription::{PostUsage, SubscriptionActivation, SubscriptionPlan, UserSubscription},
    user::User,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence port for everything billing touches.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn create_user(&self, user: &User) -> StoreResult<()>;
    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;
    async fn premium_users_expired_by(&self, now: DateTime<Utc>) -> StoreResult<Vec<User>>;

    async fn save_plan(&self, plan: &SubscriptionPlan) -> StoreResult<()>;
    async fn get_plan(&self, plan_id: Uuid) -> StoreResult<Option<SubscriptionPlan>>;
    async fn find_plan_by_name(&self, name: &str) -> StoreResult<Option<SubscriptionPlan>>;
    /// Active plans, cheapest first.
    async fn active_plans(&self) -> StoreResult<Vec<SubscriptionPlan>>;

    async fn get_user_subscription(&self, user_id: Uuid) -> StoreResult<Option<UserSubscription>>;
    async fn save_user_subscription(&self, subscription: &UserSubscription) -> StoreResult<()>;
    async fn active_subscriptions_expired_by(&self, now: DateTime<Utc>) -> StoreResult<Vec<UserSubscription>>;

    async fn create_payment(&self, payment: &Payment) -> StoreResult<()>;
    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>>;
    async fn get_payment_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<Payment>>;
    async fn update_payment(&self, payment: &Payment) -> StoreResult<()>;
    /// Newest first.
    async fn payments_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Payment>>;

    async fn save_mobile_transaction(&self, transaction: &MobileBankingTransaction) -> StoreResult<()>;
    async fn get_mobile_transaction(&self, payment_id: Uuid) -> StoreResult<Option<MobileBankingTransaction>>;

    async fn append_payment_log(&self, log: &PaymentLog) -> StoreResult<()>;
    /// Oldest first.
    async fn payment_logs(&self, payment_id: Uuid) -> StoreResult<Vec<PaymentLog>>;

    /// Fails with `StoreError::Duplicate` when the payment was already activated.
    async fn insert_activation(&self, activation: &SubscriptionActivation) -> StoreResult<()>;
    async fn get_activation(&self, payment_id: Uuid) -> StoreResult<Option<SubscriptionActivation>>;
    async fn update_activation(&self, activation: &SubscriptionActivation) -> StoreResult<()>;

    async fn save_payment_method(&self, method: &SavedPaymentMethod) -> StoreResult<()>;
    /// Oldest first, inactive rows included.
    async fn payment_methods_for_user(&self, user_id: Uuid) -> StoreResult<Vec<SavedPaymentMethod>>;

    async fn record_post(&self, usage: &PostUsage) -> StoreResult<()>;
    async fn count_posts_since(&self, user_id: Uuid, since: DateTime<Utc>) -> StoreResult<u32>;
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    plans: HashMap<Uuid, SubscriptionPlan>,
    subscriptions: HashMap<Uuid, UserSubscription>,
    payments: HashMap<Uuid, Payment>,
    mobile_transactions: HashMap<Uuid, MobileBankingTransaction>,
    payment_logs: Vec<PaymentLog>,
    activations: HashMap<Uuid, SubscriptionActivation>,
    saved_methods: HashMap<Uuid, SavedPaymentMethod>,
    post_usage: Vec<PostUsage>,
}

/// Process-local store behind one lock. Used by tests.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate {
                table: "users",
                key: user.id.to_string(),
            });
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.to_lowercase();
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|user| user.email == email).cloned())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        self.tables.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn premium_users_expired_by(&self, now: DateTime<Utc>) -> StoreResult<Vec<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .filter(|user| user.is_premium && user.premium_expires_at.map_or(false, |at| at <= now))
            .cloned()
            .collect())
    }

    async fn save_plan(&self, plan: &SubscriptionPlan) -> StoreResult<()> {
        self.tables.write().await.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, plan_id: Uuid) -> StoreResult<Option<SubscriptionPlan>> {
        Ok(self.tables.read().await.plans.get(&plan_id).cloned())
    }

    async fn find_plan_by_name(&self, name: &str) -> StoreResult<Option<SubscriptionPlan>> {
        let tables = self.tables.read().await;
        Ok(tables.plans.values().find(|plan| plan.name == name).cloned())
    }

    async fn active_plans(&self) -> StoreResult<Vec<SubscriptionPlan>> {
        let tables = self.tables.read().await;
        let mut plans: Vec<SubscriptionPlan> =
            tables.plans.values().filter(|plan| plan.is_active).cloned().collect();
        plans.sort_by(|a, b| a.price.cmp(&b.price));
        Ok(plans)
    }

    async fn get_user_subscription(&self, user_id: Uuid) -> StoreResult<Option<UserSubscription>> {
        Ok(self.tables.read().await.subscriptions.get(&user_id).cloned())
    }

    async fn save_user_subscription(&self, subscription: &UserSubscription) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .subscriptions
            .insert(subscription.user_id, subscription.clone());
        Ok(())
    }

    async fn active_subscriptions_expired_by(&self, now: DateTime<Utc>) -> StoreResult<Vec<UserSubscription>> {
        use crate::models::subscription::SubscriptionStatus;

        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .filter(|sub| sub.status == SubscriptionStatus::Active && sub.expires_at <= now)
            .cloned()
            .collect())
    }

    async fn create_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.payments.contains_key(&payment.id) {
            return Err(StoreError::Duplicate {
                table: "payments",
                key: payment.id.to_string(),
            });
        }
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.tables.read().await.payments.get(&payment_id).cloned())
    }

    async fn get_payment_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|payment| payment.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn update_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.tables.write().await.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn payments_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|payment| payment.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn save_mobile_transaction(&self, transaction: &MobileBankingTransaction) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .mobile_transactions
            .insert(transaction.payment_id, transaction.clone());
        Ok(())
    }

    async fn get_mobile_transaction(&self, payment_id: Uuid) -> StoreResult<Option<MobileBankingTransaction>> {
        Ok(self.tables.read().await.mobile_transactions.get(&payment_id).cloned())
    }

    async fn append_payment_log(&self, log: &PaymentLog) -> StoreResult<()> {
        self.tables.write().await.payment_logs.push(log.clone());
        Ok(())
    }

    async fn payment_logs(&self, payment_id: Uuid) -> StoreResult<Vec<PaymentLog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payment_logs
            .iter()
            .filter(|log| log.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn insert_activation(&self, activation: &SubscriptionActivation) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.activations.contains_key(&activation.payment_id) {
            return Err(StoreError::Duplicate {
                table: "activations",
                key: activation.payment_id.to_string(),
            });
        }
        tables.activations.insert(activation.payment_id, activation.clone());
        Ok(())
    }

    async fn get_activation(&self, payment_id: Uuid) -> StoreResult<Option<SubscriptionActivation>> {
        Ok(self.tables.read().await.activations.get(&payment_id).cloned())
    }

    async fn update_activation(&self, activation: &SubscriptionActivation) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .activations
            .insert(activation.payment_id, activation.clone());
        Ok(())
    }

    async fn save_payment_method(&self, method: &SavedPaymentMethod) -> StoreResult<()> {
        self.tables.write().await.saved_methods.insert(method.id, method.clone());
        Ok(())
    }

    async fn payment_methods_for_user(&self, user_id: Uuid) -> StoreResult<Vec<SavedPaymentMethod>> {
        let tables = self.tables.read().await;
        let mut methods: Vec<SavedPaymentMethod> = tables
            .saved_methods
            .values()
            .filter(|method| method.user_id == user_id)
            .cloned()
            .collect();
        methods.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(methods)
    }

    async fn record_post(&self, usage: &PostUsage) -> StoreResult<()> {
        self.tables.write().await.post_usage.push(usage.clone());
        Ok(())
    }

    async fn count_posts_since(&self, user_id: Uuid, since: DateTime<Utc>) -> StoreResult<u32> {
        let tables = self.tables.read().await;
        Ok(tables
            .post_usage
            .iter()
            .filter(|usage| usage.user_id == user_id && usage.created_at >= since)
            .count() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::subscription::SubscriptionPlan;
    use chrono::Duration;

    #[tokio::test]
    async fn test_activation_is_unique_per_payment() {
        let store = InMemoryStore::new();
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

        store.insert_activation(&activation).await.unwrap();
        let err = store.insert_activation(&activation).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { table: "activations", .. }));
    }

    #[tokio::test]
    async fn test_active_plans_sorted_by_price() {
        let store = InMemoryStore::new();
        let monthly = SubscriptionPlan::premium_monthly();
        let annual = SubscriptionPlan::premium_annual();
        let mut retired = SubscriptionPlan::premium_monthly();
        retired.name = "Legacy".to_string();
        retired.is_active = false;

        store.save_plan(&annual).await.unwrap();
        store.save_plan(&monthly).await.unwrap();
        store.save_plan(&retired).await.unwrap();

        let plans = store.active_plans().await.unwrap();
        let names: Vec<&str> = plans.iter().map(|plan| plan.name.as_str()).collect();
        assert_eq!(names, vec!["Premium Monthly", "Premium Annual"]);
    }

    #[tokio::test]
    async fn test_post_counting_window() {
        let store = InMemoryStore::new();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        for days_ago in [1, 2, 40] {
            store
                .record_post(&PostUsage {
                    id: Uuid::new_v4(),
                    user_id,
                    created_at: now - Duration::days(days_ago),
                })
                .await
                .unwrap();
        }

        let count = store.count_posts_since(user_id, now - Duration::days(30)).await.unwrap();
        assert_eq!(count, 2);
    }
}

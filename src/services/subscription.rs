use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{BillingError, BillingResult, StoreError};
use crate::models::{
    payment::Payment,
    subscription::{
        next_expiry, EntitlementStatus, FeatureComparison, PlanFeatures, PostQuota, PostUsage,
        SubscriptionActivation, SubscriptionPlan, SubscriptionStatus, SubscriptionTier, UserSubscription,
    },
    user::User,
};
use crate::services::{locks::KeyedLocks, store::BillingStore};

/// Counts from one run of [`SubscriptionService::expire_lapsed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirySweep {
    pub subscriptions_expired: usize,
    pub users_downgraded: usize,
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn BillingStore>,
    free_post_limit: u32,
    user_locks: KeyedLocks,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn BillingStore>, app: &AppConfig) -> Self {
        Self {
            store,
            free_post_limit: app.free_post_limit,
            user_locks: KeyedLocks::new(),
        }
    }

    /// Serializes entitlement changes for one user within this process.
    async fn lock_user(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        self.user_locks.lock(user_id).await
    }

    async fn load_user(&self, user_id: Uuid) -> BillingResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("user", user_id.to_string()))
    }

    /// Creates the standard plans that are missing and returns the default one.
    pub async fn ensure_default_plans(&self) -> BillingResult<SubscriptionPlan> {
        for plan in [SubscriptionPlan::premium_monthly(), SubscriptionPlan::premium_annual()] {
            if self.store.find_plan_by_name(&plan.name).await?.is_none() {
                log::info!("Seeding subscription plan {}", plan.name);
                self.store.save_plan(&plan).await?;
            }
        }
        self.default_plan().await
    }

    pub async fn default_plan(&self) -> BillingResult<SubscriptionPlan> {
        if let Some(plan) = self
            .store
            .find_plan_by_name(SubscriptionPlan::DEFAULT_PREMIUM)
            .await?
        {
            return Ok(plan);
        }

        let plan = SubscriptionPlan::premium_monthly();
        self.store.save_plan(&plan).await?;
        log::info!("Created default plan {}", plan.name);
        Ok(plan)
    }

    pub async fn list_plans(&self) -> BillingResult<Vec<SubscriptionPlan>> {
        Ok(self.store.active_plans().await?)
    }

    /// Active plan by id.
    pub async fn plan(&self, plan_id: Uuid) -> BillingResult<SubscriptionPlan> {
        match self.store.get_plan(plan_id).await? {
            Some(plan) if plan.is_active => Ok(plan),
            _ => Err(BillingError::NotFound("plan", plan_id.to_string())),
        }
    }

    pub async fn entitlements(&self, user_id: Uuid, now: DateTime<Utc>) -> BillingResult<EntitlementStatus> {
        let user = self.load_user(user_id).await?;
        let posts = self
            .store
            .count_posts_since(user_id, month_start(now))
            .await?;

        if !user.is_premium_active(now) {
            let quota = PostQuota::Monthly(self.free_post_limit);
            return Ok(EntitlementStatus {
                user_id,
                subscription_type: SubscriptionTier::Free,
                is_premium: false,
                has_ads: true,
                can_use_mentorship: false,
                post_limit: quota,
                current_month_posts: posts,
                can_create_post: quota.allows(posts),
                plan_name: None,
                premium_expires_at: None,
                days_remaining: None,
            });
        }

        let plan = match self.store.get_user_subscription(user_id).await? {
            Some(subscription) => self.store.get_plan(subscription.plan_id).await?,
            None => None,
        };
        let plan = match plan {
            Some(plan) => plan,
            None => self.default_plan().await?,
        };

        let quota = plan
            .max_posts_per_month
            .map_or(PostQuota::Unlimited, PostQuota::Monthly);

        Ok(EntitlementStatus {
            user_id,
            subscription_type: SubscriptionTier::Premium,
            is_premium: true,
            has_ads: plan.has_ads,
            can_use_mentorship: plan.can_use_mentorship,
            post_limit: quota,
            current_month_posts: posts,
            can_create_post: quota.allows(posts),
            plan_name: Some(plan.name),
            premium_expires_at: user.premium_expires_at,
            days_remaining: user
                .premium_expires_at
                .map(|expiry| (expiry - now).num_days().max(0)),
        })
    }

    pub async fn feature_comparison(&self, user_id: Uuid, now: DateTime<Utc>) -> BillingResult<FeatureComparison> {
        let user = self.load_user(user_id).await?;
        let plans = self.list_plans().await?;

        let mut current_plan = None;
        if user.is_premium_active(now) {
            if let Some(subscription) = self.store.get_user_subscription(user_id).await? {
                if subscription.status == SubscriptionStatus::Active {
                    current_plan = self
                        .store
                        .get_plan(subscription.plan_id)
                        .await?
                        .map(|plan| plan.name);
                }
            }
        }

        Ok(FeatureComparison {
            plans: plans.iter().map(PlanFeatures::from).collect(),
            current_plan,
            user_current_plan: user.subscription_type,
        })
    }

    /// Grants what `payment` bought. Safe to call more than once per payment:
    /// later calls return the stored activation and change nothing.
    pub async fn activate(&self, payment: &Payment, now: DateTime<Utc>) -> BillingResult<SubscriptionActivation> {
        if let Some(existing) = self.store.get_activation(payment.id).await? {
            log::info!("Payment {} already activated, skipping", payment.id);
            return Ok(existing);
        }

        let _guard = self.lock_user(payment.user_id).await;

        if let Some(existing) = self.store.get_activation(payment.id).await? {
            return Ok(existing);
        }

        let plan = match payment.plan_id {
            Some(plan_id) => self
                .store
                .get_plan(plan_id)
                .await?
                .ok_or_else(|| BillingError::NotFound("plan", plan_id.to_string()))?,
            None => self.default_plan().await?,
        };
        let mut user = self.load_user(payment.user_id).await?;
        let existing = self.store.get_user_subscription(user.id).await?;

        let current_expiry = existing
            .as_ref()
            .filter(|subscription| subscription.status == SubscriptionStatus::Active)
            .map(|subscription| subscription.expires_at)
            .into_iter()
            .chain(user.premium_expires_at.filter(|_| user.is_premium))
            .max();

        let period = plan.period(payment.months);
        let expires_at = next_expiry(now, current_expiry, period);

        let subscription = match existing {
            Some(mut subscription) => {
                subscription.renew(plan.id, expires_at, now);
                subscription
            }
            None => UserSubscription::new(user.id, plan.id, now, expires_at),
        };

        let activation = SubscriptionActivation {
            payment_id: payment.id,
            user_id: user.id,
            subscription_id: subscription.id,
            plan_id: plan.id,
            previous_expiry: current_expiry,
            new_expiry: expires_at,
            granted_seconds: period.num_seconds(),
            activated_at: now,
            reversed_at: None,
        };

        // Claim the payment before touching anything; a racing process loses here.
        match self.store.insert_activation(&activation).await {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => {
                return self
                    .store
                    .get_activation(payment.id)
                    .await?
                    .ok_or_else(|| BillingError::Conflict(format!("activation for {} vanished", payment.id)));
            }
            Err(err) => return Err(err.into()),
        }

        self.store.save_user_subscription(&subscription).await?;
        user.grant_premium(expires_at, now);
        self.store.update_user(&user).await?;

        log::info!(
            "Activated {} for user {} until {} (payment {})",
            plan.name,
            user.id,
            expires_at,
            payment.id
        );
        Ok(activation)
    }

    /// Takes back the time a refunded payment granted. Returns `None` when the
    /// payment never activated anything.
    pub async fn revoke_for_refund(
        &self,
        payment_id: Uuid,
        now: DateTime<Utc>,
    ) -> BillingResult<Option<SubscriptionActivation>> {
        let Some(activation) = self.store.get_activation(payment_id).await? else {
            return Ok(None);
        };

        let _guard = self.lock_user(activation.user_id).await;

        let Some(mut activation) = self.store.get_activation(payment_id).await? else {
            return Ok(None);
        };
        if activation.reversed_at.is_some() {
            log::info!("Activation for payment {} already reversed", payment_id);
            return Ok(Some(activation));
        }

        let mut user = self.load_user(activation.user_id).await?;
        let granted = activation.granted();

        let mut new_expiry = user.premium_expires_at.map(|expiry| expiry - granted);
        if let Some(mut subscription) = self.store.get_user_subscription(activation.user_id).await? {
            let reduced = subscription.expires_at - granted;
            subscription.expires_at = reduced;
            if reduced <= now {
                subscription.cancel(now);
            } else {
                subscription.updated_at = now;
            }
            self.store.save_user_subscription(&subscription).await?;
            new_expiry = Some(reduced);
        }

        match new_expiry {
            Some(expiry) if expiry > now => user.grant_premium(expiry, now),
            _ => {
                user.premium_expires_at = new_expiry;
                user.revoke_premium(now);
            }
        }
        self.store.update_user(&user).await?;

        activation.reversed_at = Some(now);
        self.store.update_activation(&activation).await?;

        log::info!(
            "Reversed {}s of premium for user {} after refund of payment {}",
            activation.granted_seconds,
            user.id,
            payment_id
        );
        Ok(Some(activation))
    }

    /// Stops renewal. Access already paid for runs until expiry.
    pub async fn cancel(&self, user_id: Uuid, now: DateTime<Utc>) -> BillingResult<UserSubscription> {
        let _guard = self.lock_user(user_id).await;

        let mut subscription = self
            .store
            .get_user_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("subscription", user_id.to_string()))?;

        subscription.cancel(now);
        self.store.save_user_subscription(&subscription).await?;

        log::info!("Cancelled subscription {} for user {}", subscription.id, user_id);
        Ok(subscription)
    }

    /// Ends everything for an account that is going away.
    pub async fn terminate(&self, user: &mut User, now: DateTime<Utc>) -> BillingResult<()> {
        let _guard = self.lock_user(user.id).await;

        if let Some(mut subscription) = self.store.get_user_subscription(user.id).await? {
            if subscription.status != SubscriptionStatus::Cancelled {
                subscription.cancel(now);
                self.store.save_user_subscription(&subscription).await?;
            }
        }
        user.revoke_premium(now);
        user.premium_expires_at = None;
        Ok(())
    }

    pub async fn record_post(&self, user_id: Uuid, now: DateTime<Utc>) -> BillingResult<EntitlementStatus> {
        let _guard = self.lock_user(user_id).await;

        let status = self.entitlements(user_id, now).await?;
        if !status.can_create_post {
            let limit = match status.post_limit {
                PostQuota::Monthly(limit) => limit,
                PostQuota::Unlimited => u32::MAX,
            };
            return Err(BillingError::QuotaExceeded { limit });
        }

        self.store
            .record_post(&PostUsage {
                id: Uuid::new_v4(),
                user_id,
                created_at: now,
            })
            .await?;

        self.entitlements(user_id, now).await
    }

    /// Marks lapsed subscriptions expired and drops premium from users past expiry.
    /// Each candidate is re-read under its user's lock, so a renewal that lands
    /// between the scan and the write is left alone.
    pub async fn expire_lapsed(&self, now: DateTime<Utc>) -> BillingResult<ExpirySweep> {
        let mut sweep = ExpirySweep::default();

        for candidate in self.store.active_subscriptions_expired_by(now).await? {
            let _guard = self.lock_user(candidate.user_id).await;
            let Some(mut subscription) = self.store.get_user_subscription(candidate.user_id).await? else {
                continue;
            };
            if subscription.status != SubscriptionStatus::Active || subscription.expires_at > now {
                continue;
            }
            subscription.expire(now);
            self.store.save_user_subscription(&subscription).await?;
            sweep.subscriptions_expired += 1;
        }

        for candidate in self.store.premium_users_expired_by(now).await? {
            let _guard = self.lock_user(candidate.id).await;
            let Some(mut user) = self.store.get_user(candidate.id).await? else {
                continue;
            };
            if !user.is_premium || user.premium_expires_at.map_or(true, |expiry| expiry > now) {
                continue;
            }
            user.revoke_premium(now);
            self.store.update_user(&user).await?;
            sweep.users_downgraded += 1;
        }

        if sweep != ExpirySweep::default() {
            log::info!(
                "Expired {} subscriptions, downgraded {} users",
                sweep.subscriptions_expired,
                sweep.users_downgraded
            );
        }
        Ok(sweep)
    }
}

/// Midnight UTC on the first of `now`'s month.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|first| first.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(now)
}

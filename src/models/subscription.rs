use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub currency: String,
    pub duration_days: i64,
    /// `None` is unlimited.
    pub max_posts_per_month: Option<u32>,
    pub can_use_mentorship: bool,
    pub has_ads: bool,
    pub features: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionPlan {
    pub const DEFAULT_PREMIUM: &'static str = "Premium Monthly";

    pub fn premium_monthly() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: Self::DEFAULT_PREMIUM.to_string(),
            description: Some("Premium subscription with all features".to_string()),
            price: Decimal::new(299_00, 2),
            currency: "BDT".to_string(),
            duration_days: 30,
            max_posts_per_month: None,
            can_use_mentorship: true,
            has_ads: false,
            features: serde_json::json!({
                "priority_support": true,
                "advanced_search": true,
            }),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn premium_annual() -> Self {
        Self {
            name: "Premium Annual".to_string(),
            description: Some("Twelve months of premium at a discount".to_string()),
            price: Decimal::new(2999_00, 2),
            duration_days: 365,
            ..Self::premium_monthly()
        }
    }

    pub fn period(&self, months: u32) -> Duration {
        Duration::days(self.duration_days * i64::from(months.max(1)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserSubscription {
    pub fn new(user_id: Uuid, plan_id: Uuid, started_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id,
            status: SubscriptionStatus::Active,
            started_at,
            expires_at,
            auto_renew: true,
            created_at: started_at,
            updated_at: started_at,
        }
    }

    pub fn renew(&mut self, plan_id: Uuid, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        if self.status != SubscriptionStatus::Active {
            self.started_at = now;
        }
        self.plan_id = plan_id;
        self.expires_at = expires_at;
        self.status = SubscriptionStatus::Active;
        self.updated_at = now;
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = SubscriptionStatus::Cancelled;
        self.auto_renew = false;
        self.updated_at = now;
    }

    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = SubscriptionStatus::Expired;
        self.updated_at = now;
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.expires_at > now
    }
}

/// New expiry after buying `period`: time already paid for is never lost.
pub fn next_expiry(now: DateTime<Utc>, current_expiry: Option<DateTime<Utc>>, period: Duration) -> DateTime<Utc> {
    let base = match current_expiry {
        Some(expiry) if expiry > now => expiry,
        _ => now,
    };
    base + period
}

/// What one completed payment granted. Keyed by payment id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionActivation {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub plan_id: Uuid,
    pub previous_expiry: Option<DateTime<Utc>>,
    pub new_expiry: DateTime<Utc>,
    pub granted_seconds: i64,
    pub activated_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
}

impl SubscriptionActivation {
    pub fn granted(&self) -> Duration {
        Duration::seconds(self.granted_seconds)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "limit")]
pub enum PostQuota {
    Unlimited,
    Monthly(u32),
}

impl PostQuota {
    pub fn allows(&self, used: u32) -> bool {
        match self {
            PostQuota::Unlimited => true,
            PostQuota::Monthly(limit) => used < *limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostUsage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntitlementStatus {
    pub user_id: Uuid,
    pub subscription_type: SubscriptionTier,
    pub is_premium: bool,
    pub has_ads: bool,
    pub can_use_mentorship: bool,
    pub post_limit: PostQuota,
    pub current_month_posts: u32,
    pub can_create_post: bool,
    pub plan_name: Option<String>,
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PlanSummary {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub duration_days: i64,
    pub max_posts_per_month: PostQuota,
    pub can_use_mentorship: bool,
    pub has_ads: bool,
    pub features: serde_json::Value,
}

impl From<&SubscriptionPlan> for PlanSummary {
    fn from(plan: &SubscriptionPlan) -> Self {
        Self {
            id: plan.id,
            name: plan.name.clone(),
            price: plan.price,
            currency: plan.currency.clone(),
            duration_days: plan.duration_days,
            max_posts_per_month: plan
                .max_posts_per_month
                .map_or(PostQuota::Unlimited, PostQuota::Monthly),
            can_use_mentorship: plan.can_use_mentorship,
            has_ads: plan.has_ads,
            features: plan.features.clone(),
        }
    }
}

/// Feature flags for one plan, in the shape the pricing page compares.
#[derive(Debug, Serialize)]
pub struct FeatureSet {
    pub max_posts_per_month: PostQuota,
    pub can_use_mentorship: bool,
    pub has_ads: bool,
    pub group_study: bool,
    pub messaging: bool,
    pub priority_support: bool,
    pub advanced_search: bool,
    pub custom_features: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct PlanFeatures {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub duration_days: i64,
    pub features: FeatureSet,
}

impl From<&SubscriptionPlan> for PlanFeatures {
    fn from(plan: &SubscriptionPlan) -> Self {
        let flag = |name: &str| plan.features.get(name).and_then(|value| value.as_bool()).unwrap_or(false);
        Self {
            id: plan.id,
            name: plan.name.clone(),
            price: plan.price,
            currency: plan.currency.clone(),
            duration_days: plan.duration_days,
            features: FeatureSet {
                max_posts_per_month: plan
                    .max_posts_per_month
                    .map_or(PostQuota::Unlimited, PostQuota::Monthly),
                can_use_mentorship: plan.can_use_mentorship,
                has_ads: plan.has_ads,
                // Every tier gets these.
                group_study: true,
                messaging: true,
                priority_support: flag("priority_support"),
                advanced_search: flag("advanced_search"),
                custom_features: plan.features.clone(),
            },
        }
    }
}

/// Active plans side by side, plus where the user stands.
#[derive(Debug, Serialize)]
pub struct FeatureComparison {
    pub plans: Vec<PlanFeatures>,
    /// Name of the plan behind the user's active subscription, if any.
    pub current_plan: Option<String>,
    pub user_current_plan: SubscriptionTier,
}

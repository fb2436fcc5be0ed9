use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::payment::validate_bd_phone;
use crate::models::subscription::SubscriptionTier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub institution: Option<String>,
    pub department: Option<String>,
    pub student_id: Option<String>,
    pub profile_picture: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_staff: bool,
    pub is_premium: bool,
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub subscription_type: SubscriptionTier,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 150, message = "Username must be between 3 and 150 characters"))]
    pub username: String,

    #[validate(email(message = "Invalid email format"), custom = "validate_email_domain")]
    pub email: String,

    #[validate(length(max = 150))]
    pub first_name: String,

    #[validate(length(max = 150))]
    pub last_name: String,

    #[validate(custom = "validate_bd_phone")]
    pub phone: Option<String>,

    pub institution: Option<String>,
    pub department: Option<String>,
    pub student_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub is_active: bool,
    pub is_premium: bool,
    pub subscription_type: SubscriptionTier,
    pub premium_expires_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name(),
            is_active: user.is_active,
            is_premium: user.is_premium,
            subscription_type: user.subscription_type,
            premium_expires_at: user.premium_expires_at,
        }
    }
}

impl User {
    pub fn new(request: CreateUserRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: request.username,
            email: request.email.to_lowercase(),
            first_name: request.first_name,
            last_name: request.last_name,
            phone: request.phone,
            bio: None,
            location: None,
            institution: request.institution,
            department: request.department,
            student_id: request.student_id,
            profile_picture: None,
            date_of_birth: None,
            gender: None,
            is_active: true,
            is_verified: false,
            is_staff: false,
            is_premium: false,
            premium_expires_at: None,
            subscription_type: SubscriptionTier::Free,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    pub fn is_premium_active(&self, now: DateTime<Utc>) -> bool {
        self.is_premium && self.premium_expires_at.map_or(true, |expiry| expiry > now)
    }

    pub fn grant_premium(&mut self, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.is_premium = true;
        self.subscription_type = SubscriptionTier::Premium;
        self.premium_expires_at = Some(expires_at);
        self.updated_at = now;
    }

    pub fn revoke_premium(&mut self, now: DateTime<Utc>) {
        self.is_premium = false;
        self.subscription_type = SubscriptionTier::Free;
        self.updated_at = now;
    }

    /// Soft delete. The row keeps its id so payments and subscriptions still
    /// point at it; everything identifying is replaced or cleared.
    pub fn anonymize(&mut self, now: DateTime<Utc>) {
        let stamp = now.format("%Y%m%d_%H%M%S");
        let tag = format!("deleted_{}_{}", self.id.simple(), stamp);

        self.is_active = false;
        self.is_verified = false;
        self.is_staff = false;

        self.email = format!("{}@deleted.local", tag);
        self.username = tag;

        self.bio = None;
        self.phone = None;
        self.location = None;
        self.profile_picture = None;
        self.student_id = None;
        self.date_of_birth = None;
        self.gender = None;
        self.institution = None;
        self.department = None;

        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

fn validate_email_domain(email: &str) -> Result<(), ValidationError> {
    let forbidden_domains = ["tempmail.com", "10minutemail.com", "deleted.local"];

    if let Some(domain) = email.split('@').nth(1) {
        if forbidden_domains.contains(&domain.to_lowercase().as_str()) {
            return Err(ValidationError::new("forbidden_email_domain"));
        }
    }

    Ok(())
}

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::OnceLock;
use regex::Regex;
use validator::{Validate, ValidationError};

use crate::error::BillingError;
use crate::models::common::PaymentMethod;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Statuses only move forward; staying put is always allowed.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;

        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Processing | Completed | Failed | Cancelled)
                | (Processing, Completed | Failed | Cancelled)
                | (Completed, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub months: u32,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub merchant_reference: Option<String>,
    pub gateway_response: serde_json::Value,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        user_id: Uuid,
        plan_id: Option<Uuid>,
        payment_method: PaymentMethod,
        amount: Decimal,
        currency: String,
        months: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            subscription_id: None,
            plan_id,
            months: months.max(1),
            amount,
            currency,
            payment_method,
            status: PaymentStatus::Pending,
            transaction_id: None,
            merchant_reference: None,
            gateway_response: serde_json::Value::Object(Default::default()),
            failure_reason: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(
        &mut self,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> Result<(), BillingError> {
        if !self.status.can_transition_to(status) {
            return Err(BillingError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }

        let now = Utc::now();
        self.status = status;
        if failure_reason.is_some() {
            self.failure_reason = failure_reason;
        }
        if status == PaymentStatus::Completed && self.paid_at.is_none() {
            self.paid_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Shallow-merges a gateway payload into the stored response.
    pub fn merge_gateway_response(&mut self, response: &serde_json::Value) {
        match (&mut self.gateway_response, response) {
            (serde_json::Value::Object(stored), serde_json::Value::Object(incoming)) => {
                for (key, value) in incoming {
                    stored.insert(key.clone(), value.clone());
                }
            }
            (stored, incoming) => *stored = incoming.clone(),
        }
        self.updated_at = Utc::now();
    }

    pub fn set_gateway_ids(&mut self, transaction_id: String, merchant_reference: Option<String>) {
        self.transaction_id = Some(transaction_id);
        self.merchant_reference = merchant_reference;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLog {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PaymentLog {
    pub fn new(payment: &Payment, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            status: payment.status,
            message: message.into(),
            details,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileBankingTransaction {
    pub payment_id: Uuid,
    pub provider_transaction_id: String,
    pub provider_reference: Option<String>,
    pub provider_fee: Option<Decimal>,
    pub verification_status: VerificationStatus,
    pub verified_at: Option<DateTime<Utc>>,
}

impl MobileBankingTransaction {
    pub fn pending(payment_id: Uuid, provider_transaction_id: String) -> Self {
        Self {
            payment_id,
            provider_transaction_id,
            provider_reference: None,
            provider_fee: None,
            verification_status: VerificationStatus::Pending,
            verified_at: None,
        }
    }

    pub fn mark_verified(&mut self, provider_reference: Option<String>) {
        if provider_reference.is_some() {
            self.provider_reference = provider_reference;
        }
        self.verification_status = VerificationStatus::Verified;
        self.verified_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self) {
        self.verification_status = VerificationStatus::Failed;
    }
}

/// A wallet or account a user keeps on file. At most one per user is the default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedPaymentMethod {
    pub id: Uuid,
    pub user_id: Uuid,
    pub method_type: PaymentMethod,
    pub display_name: String,
    pub phone_number: Option<String>,
    pub account_number: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavedPaymentMethod {
    pub fn new(
        user_id: Uuid,
        method_type: PaymentMethod,
        request: SavePaymentMethodRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            method_type,
            display_name: request.display_name.trim().to_string(),
            phone_number: request.phone_number,
            account_number: request.account_number,
            is_default: request.is_default,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Drops the account details; the row stays for history.
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.is_default = false;
        self.phone_number = None;
        self.account_number = None;
        self.updated_at = now;
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SavePaymentMethodRequest {
    #[validate(length(min = 1, message = "method_type is required"))]
    pub method_type: String,

    #[validate(length(min = 1, max = 100, message = "display_name must be between 1 and 100 characters"))]
    pub display_name: String,

    #[validate(custom = "validate_bd_phone")]
    pub phone_number: Option<String>,

    #[validate(length(max = 50))]
    pub account_number: Option<String>,

    #[serde(default)]
    pub is_default: bool,
}

fn phone_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(?:\+?88)?01[3-9]\d{8}$").ok())
        .as_ref()
}

/// Bangladeshi mobile number, with or without the 88 country prefix.
pub fn validate_bd_phone(phone: &str) -> Result<(), ValidationError> {
    if phone_pattern().map_or(false, |pattern| pattern.is_match(phone.trim())) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_phone_number"))
    }
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("amount_must_be_positive"))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    pub user_id: Uuid,
    pub plan_id: Uuid,

    #[validate(length(min = 1, message = "payment_method is required"))]
    pub payment_method: String,

    #[validate(range(min = 1, max = 24, message = "months must be between 1 and 24"))]
    pub months: Option<u32>,

    #[validate(custom = "validate_bd_phone")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub payment_method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_id: Option<String>,
    pub checkout_url: Option<String>,
    pub manual_payment: bool,
    pub payment_instructions: Option<PaymentInstructions>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentInstructions {
    pub method: String,
    pub amount: String,
    pub account_details: Option<BankAccountDetails>,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BankAccountDetails {
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
    pub routing_number: String,
}

impl PaymentInstructions {
    pub fn for_method(method: PaymentMethod, amount: Decimal, currency: &str) -> Option<Self> {
        let amount = format!("{:.2} {}", amount, currency);
        match method {
            PaymentMethod::BankTransfer => Some(Self {
                method: method.display_name().to_string(),
                steps: vec![
                    format!("Transfer exactly {} to the above account", amount),
                    "Use your email address as the transfer reference".to_string(),
                    "Take a screenshot of the successful transfer".to_string(),
                    "Submit the transaction reference number in the verification form".to_string(),
                ],
                amount,
                account_details: Some(BankAccountDetails {
                    bank_name: "Dutch-Bangla Bank".to_string(),
                    account_number: "1234567890".to_string(),
                    account_name: "StudySync Limited".to_string(),
                    routing_number: "090261234".to_string(),
                }),
            }),
            PaymentMethod::Card => Some(Self {
                method: method.display_name().to_string(),
                steps: vec![
                    format!("Pay {} at any StudySync card terminal or partner desk", amount),
                    "Keep the card slip".to_string(),
                    "Submit the slip reference number in the verification form".to_string(),
                ],
                amount,
                account_details: None,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub payment_id: Uuid,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutePaymentRequest {
    pub payment_id: Uuid,
    /// OTP or other confirmation code, where the provider asks for one.
    pub confirmation: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundPaymentRequest {
    pub payment_id: Uuid,
    #[validate(custom = "validate_positive_amount")]
    pub amount: Option<Decimal>,
    #[validate(length(max = 255))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManualPaymentRequest {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub transaction_reference: Option<String>,
    pub payment_date: Option<String>,
    pub payment_method: Option<String>,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentCallbackQuery {
    #[serde(alias = "paymentID", alias = "payment_ref_id", alias = "mer_txnid")]
    pub transaction_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub subscription_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl From<&Payment> for PaymentStatusResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            status: payment.status,
            amount: payment.amount,
            currency: payment.currency.clone(),
            payment_method: payment.payment_method,
            transaction_id: payment.transaction_id.clone(),
            subscription_id: payment.subscription_id,
            created_at: payment.created_at,
            paid_at: payment.paid_at,
            failure_reason: payment.failure_reason.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentDetailResponse {
    #[serde(flatten)]
    pub payment: PaymentStatusResponse,
    pub logs: Vec<PaymentLog>,
}

#[derive(Debug, Serialize)]
pub struct RefundPaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub refund_id: String,
    pub refund_status: PaymentStatus,
    pub amount: Decimal,
    /// Whether premium time bought with this payment was taken back.
    pub entitlement_reversed: bool,
}

#[derive(Debug, Serialize)]
pub struct PaymentMethodInfo {
    pub id: PaymentMethod,
    pub name: &'static str,
    pub mobile_banking: bool,
    pub enabled: bool,
}

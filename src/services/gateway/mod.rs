use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::models::{common::PaymentMethod, payment::PaymentStatus};

pub mod aamarpay;
pub mod bkash;
pub mod factory;
pub mod nagad;
pub mod rocket;
pub mod token_cache;

pub use factory::GatewayFactory;
pub use token_cache::TokenCache;

/// Who is paying. Providers pick the fields they need.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PayerInfo {
    pub user_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiatedPayment {
    /// The id the provider knows the payment by (paymentID, payment_ref_id, ...).
    pub transaction_id: String,
    /// Our own invoice/order number as sent to the provider.
    pub merchant_reference: Option<String>,
    pub redirect_url: Option<String>,
    pub raw_response: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedPayment {
    pub status: PaymentStatus,
    pub amount: Option<Decimal>,
    pub provider_reference: Option<String>,
    pub raw_response: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundResult {
    pub refund_id: String,
    pub status: PaymentStatus,
    pub raw_response: Value,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn initiate(
        &self,
        amount: Decimal,
        currency: &str,
        payer: &PayerInfo,
    ) -> Result<InitiatedPayment, GatewayError>;

    /// Finalises a payment the payer has approved. Providers that settle on
    /// their hosted page only need to report status, so this defaults to `verify`.
    async fn execute(
        &self,
        transaction_id: &str,
        confirmation: Option<String>,
    ) -> Result<VerifiedPayment, GatewayError> {
        let _ = confirmation;
        self.verify(transaction_id).await
    }

    async fn verify(&self, transaction_id: &str) -> Result<VerifiedPayment, GatewayError>;

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<RefundResult, GatewayError>;
}

/// `STUDYSYNC_` followed by 12 uppercase hex digits.
pub fn generate_transaction_id() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("STUDYSYNC_{}", &hex[..12])
}

/// Vendors send amounts as JSON strings or numbers.
pub(crate) fn amount_field(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(raw) => Decimal::from_str(raw.trim()).ok(),
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        _ => None,
    }
}

pub(crate) fn string_field(value: &Value, key: &str) -> Option<String> {
    match &value[key] {
        Value::String(raw) if !raw.is_empty() => Some(raw.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Reads a response body as JSON, turning non-2xx statuses into `GatewayError::Http`.
pub(crate) async fn read_json(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<Value, GatewayError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| GatewayError::transport(provider, err))?;

    if !status.is_success() {
        return Err(GatewayError::Http {
            provider,
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body)
        .map_err(|err| GatewayError::malformed(provider, format!("invalid JSON: {}", err)))
}

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::BTreeMap;

use super::{
    amount_field, generate_transaction_id, read_json, string_field, InitiatedPayment, PayerInfo,
    PaymentGateway, RefundResult, VerifiedPayment,
};
use crate::config::RocketConfig;
use crate::error::GatewayError;
use crate::models::{common::PaymentMethod, payment::PaymentStatus};

type HmacSha256 = Hmac<Sha256>;
type SignedPayload = BTreeMap<String, Value>;

const PROVIDER: &str = "rocket";

/// Dutch-Bangla Bank Rocket merchant API. Payers confirm with an OTP.
#[derive(Clone)]
pub struct RocketGateway {
    client: Client,
    config: RocketConfig,
}

impl RocketGateway {
    pub fn new(client: Client, config: RocketConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Accept", "application/json")
    }

    /// Adds `merchant_id`, `timestamp` and the signature over everything else.
    fn signed(&self, fields: Vec<(&str, Value)>) -> Result<SignedPayload, GatewayError> {
        let mut payload: SignedPayload = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        payload.insert("merchant_id".to_string(), json!(self.config.merchant_id));
        payload.insert("timestamp".to_string(), json!(Utc::now().timestamp()));

        let signature = sign(&self.config.secret_key, &payload)?;
        payload.insert("signature".to_string(), json!(signature));
        Ok(payload)
    }

    async fn post(&self, path: &str, payload: &SignedPayload) -> Result<Value, GatewayError> {
        let response = self
            .authorize(self.client.post(self.url(path)))
            .json(payload)
            .send()
            .await
            .map_err(|err| GatewayError::transport(PROVIDER, err))?;
        ensure_success(read_json(PROVIDER, response).await?)
    }
}

/// HMAC-SHA256 (hex) over the payload serialized with keys in sorted order.
pub(crate) fn sign(secret_key: &str, payload: &SignedPayload) -> Result<String, GatewayError> {
    let message = serde_json::to_string(payload).map_err(|err| GatewayError::Signing {
        provider: PROVIDER,
        message: err.to_string(),
    })?;
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|err| GatewayError::Signing {
        provider: PROVIDER,
        message: err.to_string(),
    })?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn ensure_success(body: Value) -> Result<Value, GatewayError> {
    if body["status"].as_str() == Some("success") {
        return Ok(body);
    }
    let message = body["message"].as_str().unwrap_or("unknown error").to_string();
    Err(GatewayError::rejected(PROVIDER, message))
}

pub(crate) fn map_status(payment_status: &str) -> PaymentStatus {
    match payment_status.to_ascii_lowercase().as_str() {
        "completed" | "success" | "successful" => PaymentStatus::Completed,
        "processing" => PaymentStatus::Processing,
        "cancelled" | "canceled" => PaymentStatus::Cancelled,
        "failed" | "expired" | "rejected" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

fn verified_from(body: Value) -> VerifiedPayment {
    VerifiedPayment {
        status: map_status(body["payment_status"].as_str().unwrap_or_default()),
        amount: amount_field(&body["amount"]),
        provider_reference: string_field(&body, "reference_id"),
        raw_response: body,
    }
}

#[async_trait]
impl PaymentGateway for RocketGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Rocket
    }

    async fn initiate(
        &self,
        amount: Decimal,
        currency: &str,
        payer: &PayerInfo,
    ) -> Result<InitiatedPayment, GatewayError> {
        let order_id = generate_transaction_id();
        let payload = self.signed(vec![
            ("order_id", json!(order_id)),
            ("amount", json!(format!("{:.2}", amount))),
            ("currency", json!(currency)),
            (
                "description",
                json!(payer.description.clone().unwrap_or_else(|| "StudySync Payment".to_string())),
            ),
            ("customer_name", json!(payer.name)),
            ("customer_email", json!(payer.email)),
            ("customer_phone", json!(payer.phone.clone().unwrap_or_default())),
            ("success_url", json!(self.config.success_url)),
            ("cancel_url", json!(self.config.cancel_url)),
            ("fail_url", json!(self.config.fail_url)),
        ])?;

        log::info!("Initiating Rocket payment {} for {} {}", order_id, amount, currency);

        let body = self.post("/payment/initiate", &payload).await?;
        let transaction_id = string_field(&body, "transaction_id")
            .ok_or_else(|| GatewayError::malformed(PROVIDER, "initiate response without transaction_id"))?;

        Ok(InitiatedPayment {
            transaction_id,
            merchant_reference: Some(order_id),
            redirect_url: string_field(&body, "payment_url"),
            raw_response: body,
        })
    }

    async fn execute(
        &self,
        transaction_id: &str,
        confirmation: Option<String>,
    ) -> Result<VerifiedPayment, GatewayError> {
        let Some(otp_code) = confirmation else {
            return self.verify(transaction_id).await;
        };

        let payload = self.signed(vec![
            ("transaction_id", json!(transaction_id)),
            ("otp_code", json!(otp_code)),
        ])?;

        log::info!("Confirming Rocket payment {}", transaction_id);
        Ok(verified_from(self.post("/payment/confirm", &payload).await?))
    }

    async fn verify(&self, transaction_id: &str) -> Result<VerifiedPayment, GatewayError> {
        let query = self.signed(Vec::new())?;
        let query: Vec<(String, String)> = query
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(text) => (key, text),
                other => (key, other.to_string()),
            })
            .collect();

        let response = self
            .authorize(self.client.get(self.url(&format!("/payment/status/{}", transaction_id))))
            .query(&query)
            .send()
            .await
            .map_err(|err| GatewayError::transport(PROVIDER, err))?;

        Ok(verified_from(ensure_success(read_json(PROVIDER, response).await?)?))
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<RefundResult, GatewayError> {
        let payload = self.signed(vec![
            ("transaction_id", json!(transaction_id)),
            ("refund_amount", json!(format!("{:.2}", amount))),
            ("refund_reason", json!(reason)),
        ])?;

        log::info!("Refunding Rocket payment {} ({})", transaction_id, amount);

        let body = self.post("/payment/refund", &payload).await?;
        let refund_id = string_field(&body, "refund_transaction_id")
            .ok_or_else(|| GatewayError::malformed(PROVIDER, "refund response without refund_transaction_id"))?;
        let status = match body["refund_status"].as_str().map(str::to_ascii_lowercase).as_deref() {
            Some("completed") | Some("success") | None => PaymentStatus::Refunded,
            Some(_) => PaymentStatus::Pending,
        };

        Ok(RefundResult {
            refund_id,
            status,
            raw_response: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_ignores_insertion_order() {
        let mut forward = SignedPayload::new();
        forward.insert("amount".to_string(), json!("299.00"));
        forward.insert("order_id".to_string(), json!("STUDYSYNC_ABC"));
        forward.insert("timestamp".to_string(), json!(1_700_000_000));

        let mut backward = SignedPayload::new();
        backward.insert("timestamp".to_string(), json!(1_700_000_000));
        backward.insert("order_id".to_string(), json!("STUDYSYNC_ABC"));
        backward.insert("amount".to_string(), json!("299.00"));

        let first = sign("secret", &forward).unwrap();
        assert_eq!(first, sign("secret", &backward).unwrap());
        assert_ne!(first, sign("other-secret", &forward).unwrap());
    }

    #[test]
    fn test_signed_payload_carries_merchant_fields() {
        let gateway = RocketGateway::new(
            Client::new(),
            RocketConfig {
                base_url: "http://localhost".to_string(),
                merchant_id: "M-1".to_string(),
                api_key: "key".to_string(),
                secret_key: "secret".to_string(),
                success_url: String::new(),
                cancel_url: String::new(),
                fail_url: String::new(),
            },
        );

        let payload = gateway.signed(vec![("otp_code", json!("123456"))]).unwrap();
        assert_eq!(payload["merchant_id"], json!("M-1"));
        assert!(payload["timestamp"].is_i64());

        let mut unsigned = payload.clone();
        let signature = unsigned.remove("signature").unwrap();
        assert_eq!(signature, json!(sign("secret", &unsigned).unwrap()));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("completed"), PaymentStatus::Completed);
        assert_eq!(map_status("PENDING"), PaymentStatus::Pending);
        assert_eq!(map_status("failed"), PaymentStatus::Failed);
    }
}

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::{Client, RequestBuilder};
use rsa::{pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, Pkcs1v15Encrypt, RsaPublicKey};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;

use super::{
    amount_field, generate_transaction_id, read_json, string_field, InitiatedPayment, PayerInfo,
    PaymentGateway, RefundResult, VerifiedPayment,
};
use crate::config::NagadConfig;
use crate::error::GatewayError;
use crate::models::{common::PaymentMethod, payment::PaymentStatus};

type HmacSha256 = Hmac<Sha256>;

const PROVIDER: &str = "nagad";
const API_VERSION: &str = "v-0.2.0";
const CURRENCY_CODE_BDT: &str = "050";
const DHAKA_OFFSET_SECS: i64 = 6 * 3600;

#[derive(Clone)]
pub struct NagadGateway {
    client: Client,
    config: NagadConfig,
}

impl NagadGateway {
    pub fn new(client: Client, config: NagadConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Accept", "application/json")
            .header("X-KM-Api-Version", API_VERSION)
            .header("X-KM-IP-V4", "127.0.0.1")
            .header("X-KM-Client-Type", "PC_WEB")
    }

    fn public_key(&self) -> Result<RsaPublicKey, GatewayError> {
        parse_public_key(&self.config.public_key)
    }

    /// Encrypts and signs `sensitive`, returning `(sensitiveData, signature)`.
    fn seal(&self, sensitive: &Value) -> Result<(String, String), GatewayError> {
        let plain = serde_json::to_string(sensitive)
            .map_err(|err| signing_error(err.to_string()))?;

        let key = self.public_key()?;
        let encrypted = key
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, plain.as_bytes())
            .map_err(|err| signing_error(err.to_string()))?;

        let signature = sign(&self.config.private_key, &plain)?;
        Ok((STANDARD.encode(encrypted), signature))
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<Value, GatewayError> {
        let response = self
            .with_headers(self.client.post(self.url(path)))
            .json(payload)
            .send()
            .await
            .map_err(|err| GatewayError::transport(PROVIDER, err))?;
        read_json(PROVIDER, response).await
    }

    async fn initialize(&self, order_id: &str, account: &str) -> Result<(String, String, Value), GatewayError> {
        let datetime = dhaka_timestamp();
        let challenge = challenge();
        let sensitive = json!({
            "merchantId": self.config.merchant_id,
            "datetime": datetime,
            "orderId": order_id,
            "challenge": challenge,
        });
        let (sensitive_data, signature) = self.seal(&sensitive)?;

        let payload = json!({
            "accountNumber": account,
            "dateTime": datetime,
            "sensitiveData": sensitive_data,
            "signature": signature,
        });
        let path = format!("/check-out/initialize/{}/{}", self.config.merchant_id, order_id);
        let body = ensure_success(self.post(&path, &payload).await?)?;

        let payment_ref_id = string_field(&body, "paymentReferenceId")
            .ok_or_else(|| GatewayError::malformed(PROVIDER, "initialize response without paymentReferenceId"))?;
        // Nagad echoes a challenge of its own; fall back to ours if it does not.
        let challenge = string_field(&body, "challenge").unwrap_or(challenge);
        Ok((payment_ref_id, challenge, body))
    }
}

fn signing_error(message: String) -> GatewayError {
    GatewayError::Signing {
        provider: PROVIDER,
        message,
    }
}

/// Accepts SPKI or PKCS#1 PEM, or a bare base64 SPKI body as Nagad hands it out.
pub(crate) fn parse_public_key(raw: &str) -> Result<RsaPublicKey, GatewayError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(signing_error("public key is not configured".to_string()));
    }

    if raw.starts_with("-----BEGIN RSA PUBLIC KEY") {
        return RsaPublicKey::from_pkcs1_pem(raw).map_err(|err| signing_error(err.to_string()));
    }
    if raw.starts_with("-----BEGIN") {
        return RsaPublicKey::from_public_key_pem(raw).map_err(|err| signing_error(err.to_string()));
    }

    let compact: String = raw.split_whitespace().collect();
    let der = STANDARD
        .decode(compact)
        .map_err(|err| signing_error(format!("public key is not base64: {}", err)))?;
    RsaPublicKey::from_public_key_der(&der).map_err(|err| signing_error(err.to_string()))
}

/// HMAC-SHA256 over the plain sensitive data, keyed by the merchant private key text.
pub(crate) fn sign(private_key: &str, data: &str) -> Result<String, GatewayError> {
    if private_key.trim().is_empty() {
        return Err(signing_error("private key is not configured".to_string()));
    }
    let mut mac = HmacSha256::new_from_slice(private_key.as_bytes())
        .map_err(|err| signing_error(err.to_string()))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn challenge() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect()
}

/// Nagad expects Asia/Dhaka wall-clock time (UTC+6, no DST).
fn dhaka_timestamp() -> String {
    let local = Utc::now().naive_utc() + Duration::seconds(DHAKA_OFFSET_SECS);
    local.format("%Y%m%d%H%M%S").to_string()
}

fn ensure_success(body: Value) -> Result<Value, GatewayError> {
    match body["status"].as_str() {
        Some(status) if status.eq_ignore_ascii_case("success") => Ok(body),
        _ => {
            let message = body["message"]
                .as_str()
                .or_else(|| body["reason"].as_str())
                .unwrap_or("unknown error")
                .to_string();
            Err(GatewayError::rejected(PROVIDER, message))
        }
    }
}

pub(crate) fn map_status(status: &str) -> PaymentStatus {
    match status.to_ascii_lowercase().as_str() {
        "success" => PaymentStatus::Completed,
        "inprogress" | "in_progress" => PaymentStatus::Processing,
        "aborted" | "cancelled" => PaymentStatus::Cancelled,
        "failed" | "invalidrequest" | "fraud" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

#[async_trait]
impl PaymentGateway for NagadGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Nagad
    }

    async fn initiate(
        &self,
        amount: Decimal,
        _currency: &str,
        payer: &PayerInfo,
    ) -> Result<InitiatedPayment, GatewayError> {
        let order_id = generate_transaction_id();
        let account = payer.phone.clone().unwrap_or_default();

        log::info!("Initializing Nagad checkout {} for {} BDT", order_id, amount);

        let (payment_ref_id, challenge, init_body) = self.initialize(&order_id, &account).await?;

        let sensitive = json!({
            "merchantId": self.config.merchant_id,
            "orderId": order_id,
            "amount": format!("{:.2}", amount),
            "currencyCode": CURRENCY_CODE_BDT,
            "challenge": challenge,
        });
        let (sensitive_data, signature) = self.seal(&sensitive)?;
        let payload = json!({
            "paymentReferenceId": payment_ref_id,
            "sensitiveData": sensitive_data,
            "signature": signature,
            "merchantCallbackURL": self.config.callback_url,
        });

        let path = format!("/check-out/complete/{}", payment_ref_id);
        let body = ensure_success(self.post(&path, &payload).await?)?;

        Ok(InitiatedPayment {
            transaction_id: payment_ref_id,
            merchant_reference: Some(order_id),
            redirect_url: string_field(&body, "callBackUrl"),
            raw_response: json!({ "initialize": init_body, "complete": body }),
        })
    }

    async fn verify(&self, transaction_id: &str) -> Result<VerifiedPayment, GatewayError> {
        let response = self
            .with_headers(self.client.get(self.url(&format!("/verify/payment/{}", transaction_id))))
            .send()
            .await
            .map_err(|err| GatewayError::transport(PROVIDER, err))?;
        let body = read_json(PROVIDER, response).await?;

        let status = body["status"]
            .as_str()
            .ok_or_else(|| GatewayError::malformed(PROVIDER, "verify response without status"))?;

        Ok(VerifiedPayment {
            status: map_status(status),
            amount: amount_field(&body["amount"]),
            provider_reference: string_field(&body, "issuerPaymentRefNo"),
            raw_response: body,
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<RefundResult, GatewayError> {
        // No refund endpoint: the reference is tracked here and settled with Nagad directly.
        let refund_id = format!("REF_{}", dhaka_timestamp());
        log::warn!(
            "Nagad has no refund API; recorded {} for {} ({} BDT) to settle out of band",
            refund_id,
            transaction_id,
            amount
        );

        Ok(RefundResult {
            raw_response: json!({
                "originalPaymentReferenceId": transaction_id,
                "refundAmount": format!("{:.2}", amount),
                "refundReferenceId": refund_id,
                "reason": reason,
                "status": "Refund Initiated",
            }),
            refund_id,
            status: PaymentStatus::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_is_forty_alphanumerics() {
        let value = challenge();
        assert_eq!(value.len(), 40);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let first = sign("merchant-private-key", r#"{"orderId":"A1"}"#).unwrap();
        let second = sign("merchant-private-key", r#"{"orderId":"A1"}"#).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_ne!(first, sign("another-key", r#"{"orderId":"A1"}"#).unwrap());
        assert!(sign("", "data").is_err());
    }

    #[test]
    fn test_missing_public_key_is_a_signing_error() {
        let err = parse_public_key("   ").unwrap_err();
        assert!(matches!(err, GatewayError::Signing { provider: "nagad", .. }));
        assert!(parse_public_key("not base64 at all!").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("Success"), PaymentStatus::Completed);
        assert_eq!(map_status("Aborted"), PaymentStatus::Cancelled);
        assert_eq!(map_status("Failed"), PaymentStatus::Failed);
        assert_eq!(map_status("Ready"), PaymentStatus::Pending);
    }

    #[test]
    fn test_dhaka_timestamp_shape() {
        let stamp = dhaka_timestamp();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    }
}

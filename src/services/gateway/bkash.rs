use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Duration;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use super::{
    amount_field, generate_transaction_id, read_json, string_field, InitiatedPayment, PayerInfo,
    PaymentGateway, RefundResult, TokenCache, VerifiedPayment,
};
use crate::config::BkashConfig;
use crate::error::GatewayError;
use crate::models::{common::PaymentMethod, payment::PaymentStatus};

const PROVIDER: &str = "bkash";
const SUCCESS_CODE: &str = "0000";
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// bKash tokenized checkout.
#[derive(Clone)]
pub struct BkashGateway {
    client: Client,
    config: BkashConfig,
    tokens: TokenCache,
}

impl BkashGateway {
    pub fn new(client: Client, config: BkashConfig, tokens: TokenCache) -> Self {
        Self {
            client,
            config,
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Returns the cached id token or grants a new one.
    pub async fn access_token(&self) -> Result<String, GatewayError> {
        if let Some(token) = self.tokens.get(PROVIDER).await {
            return Ok(token);
        }

        log::info!("Requesting new bKash id token");

        let credentials = STANDARD.encode(format!("{}:{}", self.config.username, self.config.password));
        let response = self
            .client
            .post(self.url("/tokenized/checkout/token/grant"))
            .header("Authorization", format!("Basic {}", credentials))
            .header("X-APP-Key", &self.config.app_key)
            .header("Accept", "application/json")
            .json(&json!({
                "app_key": self.config.app_key,
                "app_secret": self.config.app_secret,
            }))
            .send()
            .await
            .map_err(|err| GatewayError::transport(PROVIDER, err))?;

        let body = ensure_success(read_json(PROVIDER, response).await?)?;
        let token = string_field(&body, "id_token")
            .ok_or_else(|| GatewayError::malformed(PROVIDER, "token grant without id_token"))?;
        let expires_in = body["expires_in"]
            .as_i64()
            .or_else(|| body["expires_in"].as_str().and_then(|raw| raw.parse().ok()))
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        self.tokens
            .put(PROVIDER, token.clone(), Duration::seconds(expires_in))
            .await;

        log::info!("Obtained bKash id token valid for {}s", expires_in);
        Ok(token)
    }

    async fn call(&self, path: &str, payload: &Value) -> Result<Value, GatewayError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.url(path))
            .header("Authorization", token)
            .header("X-APP-Key", &self.config.app_key)
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|err| GatewayError::transport(PROVIDER, err))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(PROVIDER).await;
        }

        read_json(PROVIDER, response).await
    }
}

fn ensure_success(body: Value) -> Result<Value, GatewayError> {
    match body["statusCode"].as_str() {
        Some(SUCCESS_CODE) => Ok(body),
        _ => {
            let message = body["statusMessage"]
                .as_str()
                .or_else(|| body["errorMessage"].as_str())
                .unwrap_or("unknown error")
                .to_string();
            Err(GatewayError::rejected(PROVIDER, message))
        }
    }
}

pub(crate) fn map_status(transaction_status: &str) -> PaymentStatus {
    match transaction_status.to_ascii_lowercase().as_str() {
        "completed" => PaymentStatus::Completed,
        "authorized" => PaymentStatus::Processing,
        "cancelled" => PaymentStatus::Cancelled,
        "failed" | "expired" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

fn verified_from(body: Value) -> VerifiedPayment {
    VerifiedPayment {
        status: map_status(body["transactionStatus"].as_str().unwrap_or_default()),
        amount: amount_field(&body["amount"]),
        provider_reference: string_field(&body, "trxID"),
        raw_response: body,
    }
}

#[async_trait]
impl PaymentGateway for BkashGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Bkash
    }

    async fn initiate(
        &self,
        amount: Decimal,
        currency: &str,
        payer: &PayerInfo,
    ) -> Result<InitiatedPayment, GatewayError> {
        let invoice = generate_transaction_id();
        let payload = json!({
            "mode": "0011",
            "payerReference": payer.phone.clone().unwrap_or_default(),
            "callbackURL": self.config.callback_url,
            "amount": format!("{:.2}", amount),
            "currency": currency,
            "intent": "sale",
            "merchantInvoiceNumber": invoice,
        });

        log::info!("Creating bKash payment {} for {} {}", invoice, amount, currency);

        let body = ensure_success(self.call("/tokenized/checkout/create", &payload).await?)?;
        let payment_id = string_field(&body, "paymentID")
            .ok_or_else(|| GatewayError::malformed(PROVIDER, "create response without paymentID"))?;

        Ok(InitiatedPayment {
            transaction_id: payment_id,
            merchant_reference: Some(invoice),
            redirect_url: string_field(&body, "bkashURL"),
            raw_response: body,
        })
    }

    async fn execute(
        &self,
        transaction_id: &str,
        _confirmation: Option<String>,
    ) -> Result<VerifiedPayment, GatewayError> {
        log::info!("Executing bKash payment {}", transaction_id);

        let body = self
            .call("/tokenized/checkout/execute", &json!({ "paymentID": transaction_id }))
            .await?;
        Ok(verified_from(ensure_success(body)?))
    }

    async fn verify(&self, transaction_id: &str) -> Result<VerifiedPayment, GatewayError> {
        let body = self
            .call("/tokenized/checkout/payment/status", &json!({ "paymentID": transaction_id }))
            .await?;
        Ok(verified_from(ensure_success(body)?))
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<RefundResult, GatewayError> {
        // The refund API wants the trxID issued at execution as well.
        let status = self.verify(transaction_id).await?;
        let trx_id = status
            .provider_reference
            .ok_or_else(|| GatewayError::rejected(PROVIDER, "payment has no trxID to refund"))?;

        let payload = json!({
            "paymentID": transaction_id,
            "trxID": trx_id,
            "amount": format!("{:.2}", amount),
            "sku": "studysync-premium",
            "reason": reason,
        });

        log::info!("Refunding bKash payment {} ({})", transaction_id, amount);

        let body = ensure_success(self.call("/tokenized/checkout/payment/refund", &payload).await?)?;
        let refund_id = string_field(&body, "refundTrxID")
            .ok_or_else(|| GatewayError::malformed(PROVIDER, "refund response without refundTrxID"))?;
        let status = match body["transactionStatus"].as_str() {
            Some("Completed") | None => PaymentStatus::Refunded,
            Some(_) => PaymentStatus::Pending,
        };

        Ok(RefundResult {
            refund_id,
            status,
            raw_response: body,
        })
    }
}

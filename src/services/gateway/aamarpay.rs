use async_trait::async_trait;
use md5::{Digest, Md5};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{
    amount_field, generate_transaction_id, read_json, string_field, InitiatedPayment, PayerInfo,
    PaymentGateway, RefundResult, VerifiedPayment,
};
use crate::config::AamarPayConfig;
use crate::error::GatewayError;
use crate::models::{common::PaymentMethod, payment::PaymentStatus};

const PROVIDER: &str = "aamarpay";

/// AamarPay hosted checkout. Payments settle on AamarPay's page, so `execute`
/// is the default status check.
#[derive(Clone)]
pub struct AamarPayGateway {
    client: Client,
    config: AamarPayConfig,
}

impl AamarPayGateway {
    pub fn new(client: Client, config: AamarPayConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn signed(&self, mut form: BTreeMap<&'static str, String>) -> BTreeMap<&'static str, String> {
        let signature = signature(&form, &self.config.signature_key);
        form.insert("signature", signature);
        form
    }

    async fn post_form(&self, path: &str, form: &BTreeMap<&'static str, String>) -> Result<Value, GatewayError> {
        let response = self
            .client
            .post(self.url(path))
            .form(form)
            .send()
            .await
            .map_err(|err| GatewayError::transport(PROVIDER, err))?;
        read_json(PROVIDER, response).await
    }
}

/// MD5 (hex) of `k1=v1&k2=v2...&key=<signature_key>` with keys in sorted order.
pub(crate) fn signature(form: &BTreeMap<&'static str, String>, signature_key: &str) -> String {
    let query = form
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(format!("{}&key={}", query, signature_key).as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn map_status(pay_status: &str) -> PaymentStatus {
    match pay_status {
        "Successful" => PaymentStatus::Completed,
        "Failed" => PaymentStatus::Failed,
        "Cancelled" => PaymentStatus::Cancelled,
        _ => PaymentStatus::Pending,
    }
}

#[async_trait]
impl PaymentGateway for AamarPayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::AamarPay
    }

    async fn initiate(
        &self,
        amount: Decimal,
        currency: &str,
        payer: &PayerInfo,
    ) -> Result<InitiatedPayment, GatewayError> {
        let tran_id = generate_transaction_id();
        let or = |value: &Option<String>, fallback: &str| value.clone().unwrap_or_else(|| fallback.to_string());

        let form = self.signed(BTreeMap::from([
            ("store_id", self.config.store_id.clone()),
            ("tran_id", tran_id.clone()),
            ("success_url", self.config.success_url.clone()),
            ("fail_url", self.config.fail_url.clone()),
            ("cancel_url", self.config.cancel_url.clone()),
            ("amount", format!("{:.2}", amount)),
            ("currency", currency.to_string()),
            ("desc", or(&payer.description, "StudySync Premium Subscription")),
            (
                "cus_name",
                if payer.name.is_empty() { "StudySync User".to_string() } else { payer.name.clone() },
            ),
            ("cus_email", payer.email.clone()),
            ("cus_add1", or(&payer.address, "Dhaka, Bangladesh")),
            ("cus_add2", String::new()),
            ("cus_city", or(&payer.city, "Dhaka")),
            ("cus_state", "Dhaka".to_string()),
            ("cus_postcode", "1000".to_string()),
            ("cus_country", "Bangladesh".to_string()),
            ("cus_phone", payer.phone.clone().unwrap_or_default()),
            ("type", "json".to_string()),
        ]));

        log::info!("Creating AamarPay checkout {} for {} {}", tran_id, amount, currency);

        let body = self.post_form("/jsonpost.php", &form).await?;
        let accepted = match &body["result"] {
            Value::Bool(flag) => *flag,
            Value::String(flag) => flag == "true",
            _ => false,
        };
        if !accepted {
            let reason = body["reason"].as_str().unwrap_or("unknown error").to_string();
            return Err(GatewayError::rejected(PROVIDER, reason));
        }

        let payment_url = string_field(&body, "payment_url")
            .ok_or_else(|| GatewayError::malformed(PROVIDER, "accepted checkout without payment_url"))?;

        Ok(InitiatedPayment {
            transaction_id: tran_id.clone(),
            merchant_reference: Some(tran_id),
            redirect_url: Some(payment_url),
            raw_response: body,
        })
    }

    async fn verify(&self, transaction_id: &str) -> Result<VerifiedPayment, GatewayError> {
        let form = self.signed(BTreeMap::from([
            ("store_id", self.config.store_id.clone()),
            ("tran_id", transaction_id.to_string()),
        ]));

        let body = self.post_form("/api/v1/trxcheck/request.php", &form).await?;
        let pay_status = body["pay_status"]
            .as_str()
            .ok_or_else(|| GatewayError::malformed(PROVIDER, "status response without pay_status"))?;

        Ok(VerifiedPayment {
            status: map_status(pay_status),
            amount: amount_field(&body["amount"]),
            provider_reference: string_field(&body, "mer_txnid"),
            raw_response: body,
        })
    }

    async fn refund(
        &self,
        _transaction_id: &str,
        _amount: Decimal,
        _reason: &str,
    ) -> Result<RefundResult, GatewayError> {
        Err(GatewayError::Unsupported {
            provider: PROVIDER,
            operation: "refunds",
        })
    }
}

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::{EncodePublicKey, LineEnding},
    Pkcs1v15Encrypt, RsaPrivateKey,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use studysync_billing::config::{AamarPayConfig, BkashConfig, NagadConfig, RocketConfig};
use studysync_billing::error::GatewayError;
use studysync_billing::models::payment::PaymentStatus;
use studysync_billing::services::gateway::{
    aamarpay::AamarPayGateway, bkash::BkashGateway, nagad::NagadGateway, rocket::RocketGateway, PayerInfo,
    PaymentGateway, TokenCache,
};

const ROCKET_SECRET: &str = "rocket-secret";
const NAGAD_GATEWAY_KEY: &str = include_str!("fixtures/nagad_gateway_key.pem");

/// Starts `app` on an ephemeral port and returns its base URL.
macro_rules! stub_server {
    ($factory:expr) => {{
        let server = HttpServer::new($factory)
            .workers(1)
            .bind(("127.0.0.1", 0))
            .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        format!("http://{}", addr)
    }};
}

fn payer() -> PayerInfo {
    PayerInfo {
        name: "Rahim Uddin".to_string(),
        email: "rahim@example.com".to_string(),
        phone: Some("01712345678".to_string()),
        description: Some("StudySync Premium Monthly".to_string()),
        ..PayerInfo::default()
    }
}

// bKash

struct BkashStub {
    grants: AtomicUsize,
}

async fn bkash_grant(req: HttpRequest, stub: web::Data<BkashStub>) -> HttpResponse {
    let grant = stub.grants.fetch_add(1, Ordering::SeqCst) + 1;
    let basic = req
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if basic != format!("Basic {}", STANDARD.encode("merchant:secret")) {
        return HttpResponse::Ok().json(json!({ "statusCode": "2001", "statusMessage": "Invalid credentials" }));
    }
    HttpResponse::Ok().json(json!({
        "statusCode": "0000",
        "id_token": format!("token-{}", grant),
        "expires_in": 3600,
    }))
}

fn bkash_token_ok(req: &HttpRequest) -> bool {
    req.headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .map_or(false, |token| token.starts_with("token-"))
}

async fn bkash_create(req: HttpRequest, body: web::Json<Value>) -> HttpResponse {
    if !bkash_token_ok(&req) {
        return HttpResponse::Unauthorized().json(json!({ "message": "Unauthorized" }));
    }
    HttpResponse::Ok().json(json!({
        "statusCode": "0000",
        "paymentID": "TR0011",
        "bkashURL": "https://sandbox.bka.sh/pay/TR0011",
        "amount": body["amount"],
        "merchantInvoiceNumber": body["merchantInvoiceNumber"],
    }))
}

async fn bkash_execute(req: HttpRequest, body: web::Json<Value>) -> HttpResponse {
    if !bkash_token_ok(&req) {
        return HttpResponse::Unauthorized().json(json!({ "message": "Unauthorized" }));
    }
    HttpResponse::Ok().json(json!({
        "statusCode": "0000",
        "paymentID": body["paymentID"],
        "trxID": "BKX991",
        "transactionStatus": "Completed",
        "amount": "299.00",
    }))
}

async fn bkash_status_expired_token() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({ "message": "The incoming token has expired" }))
}

fn bkash_gateway(base_url: String) -> BkashGateway {
    BkashGateway::new(
        reqwest::Client::new(),
        BkashConfig {
            base_url,
            app_key: "app-key".to_string(),
            app_secret: "app-secret".to_string(),
            username: "merchant".to_string(),
            password: "secret".to_string(),
            callback_url: "https://app.example.com/payment/callback/bkash/".to_string(),
        },
        TokenCache::default(),
    )
}

#[actix_web::test]
async fn test_bkash_reuses_token_across_calls() {
    let stub = web::Data::new(BkashStub {
        grants: AtomicUsize::new(0),
    });
    let shared = stub.clone();
    let base_url = stub_server!(move || {
        App::new()
            .app_data(shared.clone())
            .route("/tokenized/checkout/token/grant", web::post().to(bkash_grant))
            .route("/tokenized/checkout/create", web::post().to(bkash_create))
            .route("/tokenized/checkout/execute", web::post().to(bkash_execute))
    });
    let gateway = bkash_gateway(base_url);

    let initiated = gateway
        .initiate(Decimal::new(299_00, 2), "BDT", &payer())
        .await
        .unwrap();
    assert_eq!(initiated.transaction_id, "TR0011");
    assert_eq!(initiated.redirect_url.as_deref(), Some("https://sandbox.bka.sh/pay/TR0011"));
    let invoice = initiated.merchant_reference.unwrap();
    assert!(invoice.starts_with("STUDYSYNC_"));
    assert_eq!(initiated.raw_response["merchantInvoiceNumber"], json!(invoice));
    assert_eq!(initiated.raw_response["amount"], json!("299.00"));

    let executed = gateway.execute("TR0011", None).await.unwrap();
    assert_eq!(executed.status, PaymentStatus::Completed);
    assert_eq!(executed.amount, Some(Decimal::new(299_00, 2)));
    assert_eq!(executed.provider_reference.as_deref(), Some("BKX991"));

    assert_eq!(stub.grants.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn test_bkash_unauthorized_forces_new_token() {
    let stub = web::Data::new(BkashStub {
        grants: AtomicUsize::new(0),
    });
    let shared = stub.clone();
    let base_url = stub_server!(move || {
        App::new()
            .app_data(shared.clone())
            .route("/tokenized/checkout/token/grant", web::post().to(bkash_grant))
            .route("/tokenized/checkout/execute", web::post().to(bkash_execute))
            .route("/tokenized/checkout/payment/status", web::post().to(bkash_status_expired_token))
    });
    let gateway = bkash_gateway(base_url);

    let err = gateway.verify("TR0011").await.unwrap_err();
    assert!(matches!(err, GatewayError::Http { status: 401, .. }));
    assert!(!err.is_retryable());

    gateway.execute("TR0011", None).await.unwrap();
    assert_eq!(stub.grants.load(Ordering::SeqCst), 2);
}

#[actix_web::test]
async fn test_bkash_bad_credentials_are_rejected() {
    let stub = web::Data::new(BkashStub {
        grants: AtomicUsize::new(0),
    });
    let base_url = stub_server!(move || {
        App::new()
            .app_data(stub.clone())
            .route("/tokenized/checkout/token/grant", web::post().to(bkash_grant))
    });

    let gateway = BkashGateway::new(
        reqwest::Client::new(),
        BkashConfig {
            base_url,
            app_key: "app-key".to_string(),
            app_secret: "app-secret".to_string(),
            username: "merchant".to_string(),
            password: "wrong".to_string(),
            callback_url: "https://app.example.com/payment/callback/bkash/".to_string(),
        },
        TokenCache::default(),
    );

    let err = gateway.access_token().await.unwrap_err();
    assert_eq!(err.to_string(), "bkash rejected the request: Invalid credentials");
}

// Rocket

fn rocket_signature_valid(body: &BTreeMap<String, Value>) -> bool {
    let mut unsigned = body.clone();
    let Some(Value::String(signature)) = unsigned.remove("signature") else {
        return false;
    };
    let message = serde_json::to_string(&unsigned).unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(ROCKET_SECRET.as_bytes()).unwrap();
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes()) == signature
}

fn rocket_bearer_ok(req: &HttpRequest) -> bool {
    req.headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        == Some("Bearer rocket-api-key")
}

async fn rocket_initiate(req: HttpRequest, body: web::Json<BTreeMap<String, Value>>) -> HttpResponse {
    if !rocket_bearer_ok(&req) || !rocket_signature_valid(&body) {
        return HttpResponse::Ok().json(json!({ "status": "error", "message": "Invalid signature" }));
    }
    HttpResponse::Ok().json(json!({
        "status": "success",
        "transaction_id": "RKT-1",
        "payment_url": "https://sandbox.rocket.com.bd/pay/RKT-1",
        "order_id": body["order_id"],
    }))
}

async fn rocket_confirm(body: web::Json<BTreeMap<String, Value>>) -> HttpResponse {
    if !rocket_signature_valid(&body) {
        return HttpResponse::Ok().json(json!({ "status": "error", "message": "Invalid signature" }));
    }
    if body.get("otp_code") != Some(&json!("123456")) {
        return HttpResponse::Ok().json(json!({ "status": "error", "message": "Wrong OTP" }));
    }
    HttpResponse::Ok().json(json!({
        "status": "success",
        "payment_status": "completed",
        "amount": "299.00",
        "reference_id": "RREF-9",
    }))
}

async fn rocket_status(req: HttpRequest, query: web::Query<HashMap<String, String>>) -> HttpResponse {
    if !rocket_bearer_ok(&req) || !query.contains_key("signature") {
        return HttpResponse::Ok().json(json!({ "status": "error", "message": "Unsigned request" }));
    }
    HttpResponse::Ok().json(json!({
        "status": "success",
        "payment_status": "processing",
        "merchant_id": query.get("merchant_id"),
    }))
}

#[actix_web::test]
async fn test_rocket_signed_initiate_and_otp_confirmation() {
    let base_url = stub_server!(|| {
        App::new()
            .route("/payment/initiate", web::post().to(rocket_initiate))
            .route("/payment/confirm", web::post().to(rocket_confirm))
            .route("/payment/status/{transaction_id}", web::get().to(rocket_status))
    });
    let gateway = RocketGateway::new(
        reqwest::Client::new(),
        RocketConfig {
            base_url,
            merchant_id: "RKT-MERCHANT".to_string(),
            api_key: "rocket-api-key".to_string(),
            secret_key: ROCKET_SECRET.to_string(),
            success_url: "https://app.example.com/payment/callback/rocket/success/".to_string(),
            cancel_url: "https://app.example.com/payment/callback/rocket/cancel/".to_string(),
            fail_url: "https://app.example.com/payment/callback/rocket/fail/".to_string(),
        },
    );

    let initiated = gateway
        .initiate(Decimal::new(299_00, 2), "BDT", &payer())
        .await
        .unwrap();
    assert_eq!(initiated.transaction_id, "RKT-1");
    assert_eq!(
        initiated.raw_response["order_id"],
        json!(initiated.merchant_reference.clone().unwrap())
    );

    let err = gateway
        .execute("RKT-1", Some("000000".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "rocket rejected the request: Wrong OTP");

    let confirmed = gateway
        .execute("RKT-1", Some("123456".to_string()))
        .await
        .unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Completed);
    assert_eq!(confirmed.provider_reference.as_deref(), Some("RREF-9"));

    // Without an OTP execute only reports status.
    let status = gateway.execute("RKT-1", None).await.unwrap();
    assert_eq!(status.status, PaymentStatus::Processing);
    assert_eq!(status.raw_response["merchant_id"], json!("RKT-MERCHANT"));
}

// AamarPay

async fn aamarpay_checkout(form: web::Form<HashMap<String, String>>) -> HttpResponse {
    if form.get("store_id").map(String::as_str) == Some("closed-store") {
        return HttpResponse::Ok().json(json!({ "result": "false", "reason": "Store is inactive" }));
    }
    let signed = form.get("signature").map_or(false, |signature| signature.len() == 32);
    if !signed || form.get("type").map(String::as_str) != Some("json") {
        return HttpResponse::BadRequest().json(json!({ "result": "false", "reason": "Bad request" }));
    }
    HttpResponse::Ok().json(json!({
        "result": "true",
        "payment_url": format!("https://sandbox.aamarpay.com/paynow.php?track={}", form["tran_id"]),
    }))
}

async fn aamarpay_trxcheck(form: web::Form<HashMap<String, String>>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "pay_status": "Successful",
        "amount": "299.00",
        "mer_txnid": form.get("tran_id"),
    }))
}

fn aamarpay_gateway(base_url: String, store_id: &str) -> AamarPayGateway {
    AamarPayGateway::new(
        reqwest::Client::new(),
        AamarPayConfig {
            base_url,
            store_id: store_id.to_string(),
            signature_key: "aamarpay-key".to_string(),
            success_url: "https://app.example.com/payment/callback/aamarpay/success/".to_string(),
            fail_url: "https://app.example.com/payment/callback/aamarpay/fail/".to_string(),
            cancel_url: "https://app.example.com/payment/callback/aamarpay/cancel/".to_string(),
        },
    )
}

#[actix_web::test]
async fn test_aamarpay_checkout_and_status() {
    let base_url = stub_server!(|| {
        App::new()
            .route("/jsonpost.php", web::post().to(aamarpay_checkout))
            .route("/api/v1/trxcheck/request.php", web::post().to(aamarpay_trxcheck))
    });

    let gateway = aamarpay_gateway(base_url.clone(), "aamarpaytest");
    let initiated = gateway
        .initiate(Decimal::new(299_00, 2), "BDT", &payer())
        .await
        .unwrap();
    assert_eq!(initiated.merchant_reference.as_deref(), Some(initiated.transaction_id.as_str()));
    assert!(initiated
        .redirect_url
        .unwrap()
        .ends_with(&initiated.transaction_id));

    let verified = gateway.verify(&initiated.transaction_id).await.unwrap();
    assert_eq!(verified.status, PaymentStatus::Completed);
    assert_eq!(verified.provider_reference, Some(initiated.transaction_id));

    let closed = aamarpay_gateway(base_url, "closed-store");
    let err = closed
        .initiate(Decimal::new(299_00, 2), "BDT", &payer())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "aamarpay rejected the request: Store is inactive");
}

// Nagad

async fn nagad_initialize(
    path: web::Path<(String, String)>,
    body: web::Json<Value>,
    key: web::Data<RsaPrivateKey>,
) -> HttpResponse {
    let (merchant_id, order_id) = path.into_inner();
    let sealed = STANDARD
        .decode(body["sensitiveData"].as_str().unwrap_or_default())
        .unwrap_or_default();
    let Ok(plain) = key.decrypt(Pkcs1v15Encrypt, &sealed) else {
        return HttpResponse::Ok().json(json!({ "status": "Failed", "message": "Cannot decrypt" }));
    };
    let sensitive: Value = serde_json::from_slice(&plain).unwrap_or_default();
    if sensitive["merchantId"] != json!(merchant_id) || sensitive["orderId"] != json!(order_id) {
        return HttpResponse::Ok().json(json!({ "status": "Failed", "message": "Mismatch" }));
    }
    HttpResponse::Ok().json(json!({
        "status": "Success",
        "paymentReferenceId": "NGD-REF-1",
        "challenge": "nagad-challenge",
    }))
}

async fn nagad_complete(
    path: web::Path<String>,
    body: web::Json<Value>,
    key: web::Data<RsaPrivateKey>,
) -> HttpResponse {
    let sealed = STANDARD
        .decode(body["sensitiveData"].as_str().unwrap_or_default())
        .unwrap_or_default();
    let sensitive: Value = key
        .decrypt(Pkcs1v15Encrypt, &sealed)
        .ok()
        .and_then(|plain| serde_json::from_slice(&plain).ok())
        .unwrap_or_default();
    if sensitive["challenge"] != json!("nagad-challenge") || sensitive["currencyCode"] != json!("050") {
        return HttpResponse::Ok().json(json!({ "status": "Failed", "message": "Bad challenge" }));
    }
    HttpResponse::Ok().json(json!({
        "status": "Success",
        "callBackUrl": format!("https://sandbox.mynagad.com/check-out/{}", path.into_inner()),
    }))
}

async fn nagad_verify(path: web::Path<String>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "Success",
        "paymentRefId": path.into_inner(),
        "amount": "299.00",
        "issuerPaymentRefNo": "NGD-ISSUER-7",
    }))
}

#[actix_web::test]
async fn test_nagad_encrypts_for_the_gateway_key() {
    let key = RsaPrivateKey::from_pkcs1_pem(NAGAD_GATEWAY_KEY).unwrap();
    let public_pem = key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap();
    let key = web::Data::new(key);

    let shared = key.clone();
    let base_url = stub_server!(move || {
        App::new()
            .app_data(shared.clone())
            .route(
                "/check-out/initialize/{merchant_id}/{order_id}",
                web::post().to(nagad_initialize),
            )
            .route("/check-out/complete/{payment_ref_id}", web::post().to(nagad_complete))
            .route("/verify/payment/{payment_ref_id}", web::get().to(nagad_verify))
    });

    let gateway = NagadGateway::new(
        reqwest::Client::new(),
        NagadConfig {
            base_url,
            merchant_id: "683002007104225".to_string(),
            public_key: public_pem,
            private_key: "merchant-private-key".to_string(),
            callback_url: "https://app.example.com/payment/callback/nagad/".to_string(),
        },
    );

    let initiated = gateway
        .initiate(Decimal::new(299_00, 2), "BDT", &payer())
        .await
        .unwrap();
    assert_eq!(initiated.transaction_id, "NGD-REF-1");
    assert_eq!(
        initiated.redirect_url.as_deref(),
        Some("https://sandbox.mynagad.com/check-out/NGD-REF-1")
    );

    let verified = gateway.verify("NGD-REF-1").await.unwrap();
    assert_eq!(verified.status, PaymentStatus::Completed);
    assert_eq!(verified.provider_reference.as_deref(), Some("NGD-ISSUER-7"));

    let refund = gateway
        .refund("NGD-REF-1", Decimal::new(299_00, 2), "Customer Request")
        .await
        .unwrap();
    assert!(refund.refund_id.starts_with("REF_"));
    assert_eq!(refund.status, PaymentStatus::Pending);
}

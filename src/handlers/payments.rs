use actix_web::web::{Data, Json, Path, Query};
use actix_web::{get, post, HttpResponse, Result};
use uuid::Uuid;

use super::error_response;
use crate::models::{
    common::{ApiResponse, PaginationQuery},
    payment::{
        ExecutePaymentRequest, InitiatePaymentRequest, ManualPaymentRequest, PaymentCallbackQuery,
        PaymentStatus, RefundPaymentRequest, VerifyPaymentRequest,
    },
};
use crate::services::payment::PaymentService;

#[get("/methods")]
pub async fn list_payment_methods(payments: Data<PaymentService>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(ApiResponse::success(payments.payment_methods())))
}

#[post("/initiate")]
pub async fn initiate_payment(
    payments: Data<PaymentService>,
    payload: Json<InitiatePaymentRequest>,
) -> Result<HttpResponse> {
    match payments.initiate(payload.into_inner()).await {
        Ok(response) => Ok(HttpResponse::Created().json(ApiResponse::success(response))),
        Err(err) => Ok(error_response(err)),
    }
}

#[post("/execute")]
pub async fn execute_payment(
    payments: Data<PaymentService>,
    payload: Json<ExecutePaymentRequest>,
) -> Result<HttpResponse> {
    match payments.execute(payload.into_inner()).await {
        Ok(status) => Ok(HttpResponse::Ok().json(ApiResponse::success(status))),
        Err(err) => Ok(error_response(err)),
    }
}

#[post("/verify")]
pub async fn verify_payment(
    payments: Data<PaymentService>,
    payload: Json<VerifyPaymentRequest>,
) -> Result<HttpResponse> {
    match payments.verify(payload.into_inner()).await {
        Ok(status) => Ok(HttpResponse::Ok().json(ApiResponse::success(status))),
        Err(err) => Ok(error_response(err)),
    }
}

#[post("/refund")]
pub async fn refund_payment(
    payments: Data<PaymentService>,
    payload: Json<RefundPaymentRequest>,
) -> Result<HttpResponse> {
    match payments.refund(payload.into_inner()).await {
        Ok(refund) => Ok(HttpResponse::Ok().json(ApiResponse::success(refund))),
        Err(err) => Ok(error_response(err)),
    }
}

#[post("/manual")]
pub async fn submit_manual_payment(
    payments: Data<PaymentService>,
    payload: Json<ManualPaymentRequest>,
) -> Result<HttpResponse> {
    match payments.submit_manual(payload.into_inner()).await {
        Ok(verification) => {
            let message = verification.message.clone();
            Ok(HttpResponse::Accepted().json(ApiResponse::success_with_message(verification, message)))
        }
        Err(err) => Ok(error_response(err)),
    }
}

#[get("/history/{user_id}")]
pub async fn payment_history(
    payments: Data<PaymentService>,
    path: Path<Uuid>,
    query: Query<PaginationQuery>,
) -> Result<HttpResponse> {
    match payments.history(path.into_inner(), &query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(err) => Ok(error_response(err)),
    }
}

/// Gateway return URL. Always answers with a redirect to the frontend result page.
#[get("/callback/{method}")]
pub async fn payment_callback(
    payments: Data<PaymentService>,
    path: Path<String>,
    query: Query<PaymentCallbackQuery>,
) -> Result<HttpResponse> {
    let method = path.into_inner();
    let location = match payments.handle_callback(&method, query.into_inner()).await {
        Ok(outcome) => outcome.redirect_url,
        Err(err) => {
            log::warn!("{} callback could not be applied: {}", method, err);
            payments.result_url(PaymentStatus::Failed, None)
        }
    };

    Ok(HttpResponse::Found()
        .append_header(("Location", location))
        .finish())
}

#[get("/{payment_id}")]
pub async fn get_payment(payments: Data<PaymentService>, path: Path<Uuid>) -> Result<HttpResponse> {
    match payments.detail(path.into_inner()).await {
        Ok(detail) => Ok(HttpResponse::Ok().json(ApiResponse::success(detail))),
        Err(err) => Ok(error_response(err)),
    }
}

use actix_web::{error::InternalError, http::StatusCode, web, HttpResponse};

use crate::error::{BillingError, GatewayError, StoreError};
use crate::models::common::ApiResponse;

pub mod health;
pub mod payments;
pub mod subscriptions;
pub mod users;

/// Registers every route under `/api/v1`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/users")
                    .service(users::register_user)
                    .service(users::get_user)
                    .service(users::delete_user)
                    .service(users::list_saved_methods)
                    .service(users::save_payment_method),
            )
            .service(
                web::scope("/subscriptions")
                    .service(subscriptions::list_plans)
                    .service(subscriptions::get_subscription_status)
                    .service(subscriptions::get_feature_comparison)
                    .service(subscriptions::cancel_subscription)
                    .service(subscriptions::record_post),
            )
            .service(
                web::scope("/payments")
                    .service(payments::list_payment_methods)
                    .service(payments::initiate_payment)
                    .service(payments::execute_payment)
                    .service(payments::verify_payment)
                    .service(payments::refund_payment)
                    .service(payments::submit_manual_payment)
                    .service(payments::payment_history)
                    .service(payments::payment_callback)
                    // Catch-all id route goes last.
                    .service(payments::get_payment),
            ),
    );
}

/// Malformed JSON bodies get the usual error envelope instead of plain text.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(ApiResponse::<()>::error(err.to_string()));
        InternalError::from_response(err, response).into()
    })
}

pub fn status_for(err: &BillingError) -> StatusCode {
    match err {
        BillingError::Validation(_) => StatusCode::BAD_REQUEST,
        BillingError::NotFound(..) => StatusCode::NOT_FOUND,
        BillingError::Conflict(_) | BillingError::InvalidTransition { .. } => StatusCode::CONFLICT,
        BillingError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
        BillingError::Gateway(gateway) if gateway.is_retryable() => StatusCode::BAD_GATEWAY,
        BillingError::Gateway(gateway) => match gateway {
            // A vendor 4xx is a refusal, same as an explicit rejection.
            GatewayError::UnsupportedMethod(_)
            | GatewayError::Rejected { .. }
            | GatewayError::Unsupported { .. }
            | GatewayError::Http { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Transport { .. } | GatewayError::Malformed { .. } | GatewayError::Signing { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
        BillingError::Store(StoreError::Duplicate { .. }) => StatusCode::CONFLICT,
        BillingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: BillingError) -> HttpResponse {
    let status = status_for(&err);
    if status.is_server_error() {
        log::error!("Request failed: {}", err);
    } else {
        log::debug!("Request rejected: {}", err);
    }
    HttpResponse::build(status).json(ApiResponse::<()>::error(err.to_string()))
}

use actix_web::web::{Data, Path};
use actix_web::{get, post, HttpResponse, Result};
use chrono::Utc;
use uuid::Uuid;

use super::error_response;
use crate::models::{common::ApiResponse, subscription::PlanSummary};
use crate::services::subscription::SubscriptionService;

#[get("/plans")]
pub async fn list_plans(subscriptions: Data<SubscriptionService>) -> Result<HttpResponse> {
    match subscriptions.list_plans().await {
        Ok(plans) => {
            let plans: Vec<PlanSummary> = plans.iter().map(PlanSummary::from).collect();
            Ok(HttpResponse::Ok().json(ApiResponse::success(plans)))
        }
        Err(err) => Ok(error_response(err)),
    }
}

#[get("/{user_id}/status")]
pub async fn get_subscription_status(
    subscriptions: Data<SubscriptionService>,
    path: Path<Uuid>,
) -> Result<HttpResponse> {
    match subscriptions.entitlements(path.into_inner(), Utc::now()).await {
        Ok(status) => Ok(HttpResponse::Ok().json(ApiResponse::success(status))),
        Err(err) => Ok(error_response(err)),
    }
}

/// Active plans side by side with the user's current one.
#[get("/{user_id}/features")]
pub async fn get_feature_comparison(
    subscriptions: Data<SubscriptionService>,
    path: Path<Uuid>,
) -> Result<HttpResponse> {
    match subscriptions.feature_comparison(path.into_inner(), Utc::now()).await {
        Ok(comparison) => Ok(HttpResponse::Ok().json(ApiResponse::success(comparison))),
        Err(err) => Ok(error_response(err)),
    }
}

#[post("/{user_id}/cancel")]
pub async fn cancel_subscription(
    subscriptions: Data<SubscriptionService>,
    path: Path<Uuid>,
) -> Result<HttpResponse> {
    match subscriptions.cancel(path.into_inner(), Utc::now()).await {
        Ok(subscription) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            subscription,
            "Subscription cancelled; premium stays active until it expires".to_string(),
        ))),
        Err(err) => Ok(error_response(err)),
    }
}

/// Counts a new post against the user's monthly quota.
#[post("/{user_id}/posts")]
pub async fn record_post(
    subscriptions: Data<SubscriptionService>,
    path: Path<Uuid>,
) -> Result<HttpResponse> {
    match subscriptions.record_post(path.into_inner(), Utc::now()).await {
        Ok(status) => Ok(HttpResponse::Created().json(ApiResponse::success(status))),
        Err(err) => Ok(error_response(err)),
    }
}

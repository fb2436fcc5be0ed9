use actix_web::web::{Data, Json, Path};
use actix_web::{delete, get, post, HttpResponse, Result};
use chrono::Utc;
use uuid::Uuid;

use super::error_response;
use crate::models::{
    common::ApiResponse,
    payment::SavePaymentMethodRequest,
    user::{CreateUserRequest, UserResponse},
};
use crate::services::account::AccountService;

#[post("/register")]
pub async fn register_user(
    accounts: Data<AccountService>,
    payload: Json<CreateUserRequest>,
) -> Result<HttpResponse> {
    match accounts.register(payload.into_inner()).await {
        Ok(user) => Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
            UserResponse::from(&user),
            "User registered".to_string(),
        ))),
        Err(err) => Ok(error_response(err)),
    }
}

#[get("/{user_id}")]
pub async fn get_user(accounts: Data<AccountService>, path: Path<Uuid>) -> Result<HttpResponse> {
    match accounts.get(path.into_inner()).await {
        Ok(user) => Ok(HttpResponse::Ok().json(ApiResponse::success(UserResponse::from(&user)))),
        Err(err) => Ok(error_response(err)),
    }
}

#[delete("/{user_id}")]
pub async fn delete_user(accounts: Data<AccountService>, path: Path<Uuid>) -> Result<HttpResponse> {
    match accounts.delete_account(path.into_inner(), Utc::now()).await {
        Ok(user) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            UserResponse::from(&user),
            "Account deleted".to_string(),
        ))),
        Err(err) => Ok(error_response(err)),
    }
}

#[get("/{user_id}/payment-methods")]
pub async fn list_saved_methods(accounts: Data<AccountService>, path: Path<Uuid>) -> Result<HttpResponse> {
    match accounts.saved_payment_methods(path.into_inner()).await {
        Ok(methods) => Ok(HttpResponse::Ok().json(ApiResponse::success(methods))),
        Err(err) => Ok(error_response(err)),
    }
}

#[post("/{user_id}/payment-methods")]
pub async fn save_payment_method(
    accounts: Data<AccountService>,
    path: Path<Uuid>,
    payload: Json<SavePaymentMethodRequest>,
) -> Result<HttpResponse> {
    match accounts
        .save_payment_method(path.into_inner(), payload.into_inner(), Utc::now())
        .await
    {
        Ok(method) => Ok(HttpResponse::Created().json(ApiResponse::success(method))),
        Err(err) => Ok(error_response(err)),
    }
}

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{BillingError, BillingResult, StoreError};
use crate::models::{
    common::PaymentMethod,
    payment::{SavePaymentMethodRequest, SavedPaymentMethod},
    user::{CreateUserRequest, User},
};
use crate::services::{locks::KeyedLocks, store::BillingStore, subscription::SubscriptionService};

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn BillingStore>,
    subscriptions: SubscriptionService,
    method_locks: KeyedLocks,
}

impl AccountService {
    pub fn new(store: Arc<dyn BillingStore>, subscriptions: SubscriptionService) -> Self {
        Self {
            store,
            subscriptions,
            method_locks: KeyedLocks::new(),
        }
    }

    pub async fn register(&self, request: CreateUserRequest) -> BillingResult<User> {
        request.validate()?;

        if self.store.get_user_by_email(&request.email).await?.is_some() {
            return Err(BillingError::Conflict(format!(
                "User with email {} already exists",
                request.email.to_lowercase()
            )));
        }

        let user = User::new(request);
        match self.store.create_user(&user).await {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => {
                return Err(BillingError::Conflict("User already exists".to_string()))
            }
            Err(err) => return Err(err.into()),
        }

        log::info!("Registered user {} ({})", user.id, user.username);
        Ok(user)
    }

    pub async fn get(&self, user_id: Uuid) -> BillingResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("user", user_id.to_string()))
    }

    /// Soft delete. The row stays so payments and subscriptions keep their owner,
    /// but nothing left on it identifies the person.
    pub async fn delete_account(&self, user_id: Uuid, now: DateTime<Utc>) -> BillingResult<User> {
        let mut user = self.get(user_id).await?;
        if user.is_deleted() {
            log::debug!("User {} already deleted", user_id);
            return Ok(user);
        }

        self.subscriptions.terminate(&mut user, now).await?;
        user.anonymize(now);
        self.store.update_user(&user).await?;

        let _guard = self.method_locks.lock(user_id).await;
        for mut method in self.store.payment_methods_for_user(user_id).await? {
            if method.is_active {
                method.deactivate(now);
                self.store.save_payment_method(&method).await?;
            }
        }

        log::info!("Soft-deleted user {}", user_id);
        Ok(user)
    }

    /// Active saved methods, oldest first.
    pub async fn saved_payment_methods(&self, user_id: Uuid) -> BillingResult<Vec<SavedPaymentMethod>> {
        self.get(user_id).await?;
        let methods = self.store.payment_methods_for_user(user_id).await?;
        Ok(methods.into_iter().filter(|method| method.is_active).collect())
    }

    /// Saving a new default clears the flag on the user's other methods.
    pub async fn save_payment_method(
        &self,
        user_id: Uuid,
        request: SavePaymentMethodRequest,
        now: DateTime<Utc>,
    ) -> BillingResult<SavedPaymentMethod> {
        request.validate()?;
        let method_type: PaymentMethod = request.method_type.parse()?;
        if method_type == PaymentMethod::AamarPay {
            return Err(BillingError::Validation(
                "AamarPay checkout cannot be saved as a payment method".to_string(),
            ));
        }
        if method_type.is_mobile_banking() && request.phone_number.is_none() {
            return Err(BillingError::Validation(format!(
                "{} needs a phone number",
                method_type.display_name()
            )));
        }

        let _guard = self.method_locks.lock(user_id).await;
        let user = self.get(user_id).await?;
        if user.is_deleted() || !user.is_active {
            return Err(BillingError::Validation("Account is not active".to_string()));
        }

        if request.is_default {
            for mut other in self.store.payment_methods_for_user(user_id).await? {
                if other.is_default {
                    other.is_default = false;
                    other.updated_at = now;
                    self.store.save_payment_method(&other).await?;
                }
            }
        }

        let method = SavedPaymentMethod::new(user_id, method_type, request, now);
        self.store.save_payment_method(&method).await?;

        log::info!("Saved {} method {} for user {}", method_type, method.id, user_id);
        Ok(method)
    }
}

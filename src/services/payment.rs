use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    common::{PaginatedResponse, PaginationQuery, PaymentMethod},
    payment::{
        ExecutePaymentRequest, InitiatePaymentRequest, InitiatePaymentResponse, ManualPaymentRequest,
        MobileBankingTransaction, Payment, PaymentCallbackQuery, PaymentDetailResponse, PaymentInstructions,
        PaymentLog, PaymentMethodInfo, PaymentStatus, PaymentStatusResponse, RefundPaymentRequest,
        RefundPaymentResponse, VerifyPaymentRequest,
    },
    user::User,
};
use crate::services::{
    gateway::{GatewayFactory, PayerInfo, VerifiedPayment},
    locks::KeyedLocks,
    manual::{ManualPaymentSubmission, ManualPaymentVerifier, ManualVerification},
    store::BillingStore,
    subscription::SubscriptionService,
};

/// Where the payer lands after a gateway redirect.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    pub payment_id: Option<Uuid>,
    pub status: PaymentStatus,
    pub redirect_url: String,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn BillingStore>,
    gateways: GatewayFactory,
    subscriptions: SubscriptionService,
    verifier: ManualPaymentVerifier,
    frontend_url: String,
    payment_locks: KeyedLocks,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateways: GatewayFactory,
        subscriptions: SubscriptionService,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateways,
            subscriptions,
            verifier: ManualPaymentVerifier,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
            payment_locks: KeyedLocks::new(),
        }
    }

    pub fn payment_methods(&self) -> Vec<PaymentMethodInfo> {
        PaymentMethod::ALL
            .into_iter()
            .map(|method| PaymentMethodInfo {
                id: method,
                name: method.display_name(),
                mobile_banking: method.is_mobile_banking(),
                enabled: !method.is_gateway_backed() || self.gateways.supports(method),
            })
            .collect()
    }

    async fn load(&self, payment_id: Uuid) -> BillingResult<Payment> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("payment", payment_id.to_string()))
    }

    async fn log(&self, payment: &Payment, message: impl Into<String>, details: serde_json::Value) -> BillingResult<()> {
        self.store
            .append_payment_log(&PaymentLog::new(payment, message, details))
            .await?;
        Ok(())
    }

    pub async fn initiate(&self, request: InitiatePaymentRequest) -> BillingResult<InitiatePaymentResponse> {
        request.validate()?;
        let method: PaymentMethod = request.payment_method.parse()?;

        let user = self
            .store
            .get_user(request.user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("user", request.user_id.to_string()))?;
        if user.is_deleted() || !user.is_active {
            return Err(BillingError::Validation("Account is not active".to_string()));
        }

        let plan = self.subscriptions.plan(request.plan_id).await?;
        let months = request.months.unwrap_or(1);
        let amount = plan.price * Decimal::from(months);

        let mut payment = Payment::new(
            user.id,
            Some(plan.id),
            method,
            amount,
            plan.currency.clone(),
            months,
        );
        self.store.create_payment(&payment).await?;
        self.log(
            &payment,
            "Payment initiated",
            json!({ "plan": plan.name, "months": months, "method": method }),
        )
        .await?;

        log::info!(
            "Payment {} initiated: {} {} via {} for user {}",
            payment.id,
            amount,
            payment.currency,
            method,
            user.id
        );

        if !method.is_gateway_backed() {
            return Ok(InitiatePaymentResponse {
                payment_id: payment.id,
                payment_method: method,
                amount,
                currency: payment.currency.clone(),
                transaction_id: None,
                checkout_url: None,
                manual_payment: true,
                payment_instructions: PaymentInstructions::for_method(method, amount, &payment.currency),
            });
        }

        let payer = payer_info(&user, request.phone_number, &plan.name);
        let outcome = match self.gateways.gateway_for(method) {
            Ok(gateway) => gateway.initiate(amount, &payment.currency, &payer).await,
            Err(err) => Err(err),
        };

        let initiated = match outcome {
            Ok(initiated) => initiated,
            Err(err) => {
                log::error!("Gateway initiation failed for payment {}: {}", payment.id, err);
                payment.transition(PaymentStatus::Failed, Some(err.to_string()))?;
                self.store.update_payment(&payment).await?;
                self.log(&payment, "Gateway initiation failed", json!({ "error": err.to_string() }))
                    .await?;
                return Err(err.into());
            }
        };

        payment.set_gateway_ids(initiated.transaction_id.clone(), initiated.merchant_reference.clone());
        payment.merge_gateway_response(&initiated.raw_response);
        self.store.update_payment(&payment).await?;

        if method.is_mobile_banking() {
            self.store
                .save_mobile_transaction(&MobileBankingTransaction::pending(
                    payment.id,
                    initiated.transaction_id.clone(),
                ))
                .await?;
        }
        self.log(
            &payment,
            "Redirecting payer to gateway",
            json!({ "transaction_id": initiated.transaction_id, "checkout_url": initiated.redirect_url }),
        )
        .await?;

        Ok(InitiatePaymentResponse {
            payment_id: payment.id,
            payment_method: method,
            amount,
            currency: payment.currency,
            transaction_id: Some(initiated.transaction_id),
            checkout_url: initiated.redirect_url,
            manual_payment: false,
            payment_instructions: None,
        })
    }

    pub async fn verify(&self, request: VerifyPaymentRequest) -> BillingResult<PaymentStatusResponse> {
        self.settle(request.payment_id, request.transaction_id, None, false).await
    }

    pub async fn execute(&self, request: ExecutePaymentRequest) -> BillingResult<PaymentStatusResponse> {
        self.settle(request.payment_id, None, request.confirmation, true).await
    }

    /// Asks the gateway where a payment stands and applies the answer. Holds the
    /// payment's lock from the read to the last write.
    async fn settle(
        &self,
        payment_id: Uuid,
        transaction_id: Option<String>,
        confirmation: Option<String>,
        execute: bool,
    ) -> BillingResult<PaymentStatusResponse> {
        let _guard = self.payment_locks.lock(payment_id).await;
        let payment = self.load(payment_id).await?;

        if payment.status == PaymentStatus::Completed || payment.status.is_terminal() {
            return Ok(PaymentStatusResponse::from(&payment));
        }
        if !payment.payment_method.is_gateway_backed() {
            return Err(BillingError::Validation(
                "Manual payments are confirmed after review".to_string(),
            ));
        }

        let transaction_id = transaction_id
            .or_else(|| payment.transaction_id.clone())
            .ok_or_else(|| BillingError::Validation("Payment has no gateway transaction".to_string()))?;
        let gateway = self.gateways.gateway_for(payment.payment_method)?;

        let verified = if execute {
            gateway.execute(&transaction_id, confirmation).await
        } else {
            gateway.verify(&transaction_id).await
        };
        let verified = verified.map_err(|err| {
            log::warn!("Gateway check failed for payment {}: {}", payment.id, err);
            err
        })?;

        let payment = self.apply(payment, verified).await?;
        Ok(PaymentStatusResponse::from(&payment))
    }

    async fn apply(&self, mut payment: Payment, verified: VerifiedPayment) -> BillingResult<Payment> {
        if verified.status == PaymentStatus::Completed {
            return self.complete(payment, verified).await;
        }

        payment.merge_gateway_response(&verified.raw_response);
        if verified.status != payment.status && payment.status.can_transition_to(verified.status) {
            payment.transition(verified.status, None)?;
            if matches!(verified.status, PaymentStatus::Failed | PaymentStatus::Cancelled) {
                self.mark_mobile_transaction(&payment, None, false).await?;
            }
            self.store.update_payment(&payment).await?;
            self.log(
                &payment,
                format!("Gateway reported {}", verified.status),
                verified.raw_response,
            )
            .await?;
            log::info!("Payment {} is now {}", payment.id, payment.status);
        } else {
            self.store.update_payment(&payment).await?;
        }
        Ok(payment)
    }

    async fn complete(&self, mut payment: Payment, verified: VerifiedPayment) -> BillingResult<Payment> {
        payment.merge_gateway_response(&verified.raw_response);

        if let Some(reported) = verified.amount {
            if reported < payment.amount {
                let reason = format!(
                    "Amount mismatch: expected {} {}, gateway reported {}",
                    payment.amount, payment.currency, reported
                );
                log::warn!("Payment {}: {}", payment.id, reason);
                payment.transition(PaymentStatus::Failed, Some(reason.clone()))?;
                self.store.update_payment(&payment).await?;
                self.mark_mobile_transaction(&payment, None, false).await?;
                self.log(&payment, reason, verified.raw_response).await?;
                return Ok(payment);
            }
        }

        // Completion is recorded only after activation; a retry reuses the stored activation.
        let activation = self.subscriptions.activate(&payment, Utc::now()).await?;

        payment.transition(PaymentStatus::Completed, None)?;
        payment.subscription_id = Some(activation.subscription_id);
        self.store.update_payment(&payment).await?;
        self.mark_mobile_transaction(&payment, verified.provider_reference.clone(), true)
            .await?;

        self.log(
            &payment,
            "Payment completed",
            json!({
                "provider_reference": verified.provider_reference,
                "premium_expires_at": activation.new_expiry,
            }),
        )
        .await?;
        log::info!("Payment {} completed for user {}", payment.id, payment.user_id);
        Ok(payment)
    }

    async fn mark_mobile_transaction(
        &self,
        payment: &Payment,
        provider_reference: Option<String>,
        verified: bool,
    ) -> BillingResult<()> {
        if let Some(mut transaction) = self.store.get_mobile_transaction(payment.id).await? {
            if verified {
                transaction.mark_verified(provider_reference);
            } else {
                transaction.mark_failed();
            }
            self.store.save_mobile_transaction(&transaction).await?;
        }
        Ok(())
    }

    pub async fn refund(&self, request: RefundPaymentRequest) -> BillingResult<RefundPaymentResponse> {
        request.validate()?;
        let _guard = self.payment_locks.lock(request.payment_id).await;
        let mut payment = self.load(request.payment_id).await?;

        if payment.status != PaymentStatus::Completed {
            return Err(BillingError::InvalidTransition {
                from: payment.status,
                to: PaymentStatus::Refunded,
            });
        }
        if !payment.payment_method.is_gateway_backed() {
            return Err(BillingError::Validation(
                "Manual payments are refunded by staff".to_string(),
            ));
        }

        let amount = request.amount.unwrap_or(payment.amount);
        if amount > payment.amount {
            return Err(BillingError::Validation(format!(
                "Refund amount {} exceeds payment amount {}",
                amount, payment.amount
            )));
        }
        let transaction_id = payment
            .transaction_id
            .clone()
            .ok_or_else(|| BillingError::Validation("Payment has no gateway transaction".to_string()))?;
        let reason = request
            .reason
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or_else(|| "Customer Request".to_string());

        let gateway = self.gateways.gateway_for(payment.payment_method)?;
        let refund = gateway.refund(&transaction_id, amount, &reason).await?;

        payment.transition(PaymentStatus::Refunded, None)?;
        payment.merge_gateway_response(&json!({ "refund": refund.raw_response }));
        self.store.update_payment(&payment).await?;
        self.log(
            &payment,
            "Payment refunded",
            json!({ "refund_id": refund.refund_id, "amount": amount, "reason": reason }),
        )
        .await?;

        let reversed = self
            .subscriptions
            .revoke_for_refund(payment.id, Utc::now())
            .await?
            .is_some();

        log::info!(
            "Refunded {} {} on payment {} (refund {})",
            amount,
            payment.currency,
            payment.id,
            refund.refund_id
        );

        Ok(RefundPaymentResponse {
            payment_id: payment.id,
            status: payment.status,
            refund_id: refund.refund_id,
            refund_status: refund.status,
            amount,
            entitlement_reversed: reversed,
        })
    }

    pub async fn submit_manual(&self, request: ManualPaymentRequest) -> BillingResult<ManualVerification> {
        let _guard = self.payment_locks.lock(request.payment_id).await;
        let mut payment = self.load(request.payment_id).await?;
        if payment.user_id != request.user_id {
            return Err(BillingError::NotFound("payment", request.payment_id.to_string()));
        }
        if payment.status != PaymentStatus::Pending {
            return Err(BillingError::Conflict(format!(
                "Payment is {}, only pending payments accept proof",
                payment.status
            )));
        }

        let submission = ManualPaymentSubmission {
            transaction_ref: request.transaction_reference,
            amount: request.amount.or(Some(payment.amount)),
            payment_method: request
                .payment_method
                .or_else(|| Some(payment.payment_method.to_string())),
            payment_date: request.payment_date,
        };
        let verification = self.verifier.verify(&submission)?;

        payment.transaction_id = submission.transaction_ref.clone();
        payment.merchant_reference = Some(verification.verification_id.clone());
        payment.merge_gateway_response(&json!({
            "manual_submission": submission,
            "verification_id": verification.verification_id,
        }));
        self.store.update_payment(&payment).await?;
        self.log(
            &payment,
            "Manual payment submitted for verification",
            json!({ "verification_id": verification.verification_id }),
        )
        .await?;

        log::info!(
            "Manual proof {} received for payment {}",
            verification.verification_id,
            payment.id
        );
        Ok(verification)
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        pagination: &PaginationQuery,
    ) -> BillingResult<PaginatedResponse<PaymentStatusResponse>> {
        let payments = self.store.payments_by_user(user_id).await?;
        let rows = payments.iter().map(PaymentStatusResponse::from).collect();
        Ok(PaginatedResponse::from_items(rows, pagination))
    }

    pub async fn detail(&self, payment_id: Uuid) -> BillingResult<PaymentDetailResponse> {
        let payment = self.load(payment_id).await?;
        let logs = self.store.payment_logs(payment_id).await?;
        Ok(PaymentDetailResponse {
            payment: PaymentStatusResponse::from(&payment),
            logs,
        })
    }

    /// Handles the payer coming back from a gateway page.
    pub async fn handle_callback(&self, method: &str, query: PaymentCallbackQuery) -> BillingResult<CallbackOutcome> {
        let method: PaymentMethod = method.parse()?;
        let transaction_id = query
            .transaction_id
            .ok_or_else(|| BillingError::Validation("Callback without transaction id".to_string()))?;

        let payment_id = self
            .store
            .get_payment_by_transaction(&transaction_id)
            .await?
            .filter(|payment| payment.payment_method == method)
            .map(|payment| payment.id)
            .ok_or_else(|| BillingError::NotFound("payment", transaction_id.clone()))?;

        let outcome = query.status.unwrap_or_default().to_ascii_lowercase();
        let abandoned = match outcome.as_str() {
            "cancel" | "cancelled" | "canceled" => Some(PaymentStatus::Cancelled),
            "fail" | "failed" | "failure" => Some(PaymentStatus::Failed),
            _ => None,
        };

        let status = match abandoned {
            Some(status) => {
                let _guard = self.payment_locks.lock(payment_id).await;
                let mut payment = self.load(payment_id).await?;
                if payment.status.can_transition_to(status) && payment.status != status {
                    payment.transition(status, Some(format!("Payer returned with {}", outcome)))?;
                    self.store.update_payment(&payment).await?;
                    self.mark_mobile_transaction(&payment, None, false).await?;
                    self.log(&payment, format!("Gateway callback: {}", outcome), json!({}))
                        .await?;
                }
                payment.status
            }
            None => {
                self.settle(payment_id, Some(transaction_id), None, true)
                    .await?
                    .status
            }
        };

        Ok(CallbackOutcome {
            payment_id: Some(payment_id),
            status,
            redirect_url: self.result_url(status, Some(payment_id)),
        })
    }

    pub fn result_url(&self, status: PaymentStatus, payment_id: Option<Uuid>) -> String {
        match payment_id {
            Some(id) => format!("{}/payment/result?status={}&payment_id={}", self.frontend_url, status, id),
            None => format!("{}/payment/result?status={}", self.frontend_url, status),
        }
    }
}

fn payer_info(user: &User, phone: Option<String>, plan_name: &str) -> PayerInfo {
    let name = user.full_name();
    PayerInfo {
        user_id: Some(user.id),
        name: if name.is_empty() { user.username.clone() } else { name },
        email: user.email.clone(),
        phone: phone.or_else(|| user.phone.clone()),
        address: user.location.clone(),
        city: None,
        description: Some(format!("StudySync {}", plan_name)),
    }
}

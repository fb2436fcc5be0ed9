use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BillingError;

pub const PENDING_VERIFICATION: &str = "pending_verification";
pub const SUBMITTED_MESSAGE: &str =
    "Manual payment submitted for verification. You will be notified within 24 hours.";

/// Proof of an off-platform payment, as entered by the payer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualPaymentSubmission {
    pub transaction_ref: Option<String>,
    pub amount: Option<Decimal>,
    pub payment_method: Option<String>,
    pub payment_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualVerification {
    pub status: String,
    pub message: String,
    pub verification_id: String,
}

/// Checks that a manual submission is complete and queues it for review.
/// The review itself happens elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualPaymentVerifier;

impl ManualPaymentVerifier {
    pub fn verify(&self, submission: &ManualPaymentSubmission) -> Result<ManualVerification, BillingError> {
        let present = |value: Option<&str>| value.map_or(false, |text| !text.trim().is_empty());

        let checks = [
            ("transaction_ref", present(submission.transaction_ref.as_deref())),
            ("amount", submission.amount.map_or(false, |amount| !amount.is_zero())),
            ("payment_method", present(submission.payment_method.as_deref())),
            ("payment_date", present(submission.payment_date.as_deref())),
        ];

        if let Some((field, _)) = checks.iter().find(|(_, ok)| !ok) {
            return Err(BillingError::Validation(format!("Missing required field: {}", field)));
        }

        let hex = Uuid::new_v4().simple().to_string().to_uppercase();
        Ok(ManualVerification {
            status: PENDING_VERIFICATION.to_string(),
            message: SUBMITTED_MESSAGE.to_string(),
            verification_id: format!("MANUAL_{}", &hex[..8]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> ManualPaymentSubmission {
        ManualPaymentSubmission {
            transaction_ref: Some("DBBL-889911".to_string()),
            amount: Some(Decimal::new(29900, 2)),
            payment_method: Some("bank_transfer".to_string()),
            payment_date: Some("2024-05-01".to_string()),
        }
    }

    #[test]
    fn test_complete_submission_is_queued() {
        let verification = ManualPaymentVerifier.verify(&complete()).unwrap();
        assert_eq!(verification.status, "pending_verification");
        assert_eq!(verification.message, SUBMITTED_MESSAGE);
        assert!(verification.verification_id.starts_with("MANUAL_"));
        assert_eq!(verification.verification_id.len(), "MANUAL_".len() + 8);
    }

    #[test]
    fn test_first_missing_field_is_reported() {
        let mut submission = complete();
        submission.payment_method = Some("  ".to_string());
        submission.payment_date = None;

        let err = ManualPaymentVerifier.verify(&submission).unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: payment_method");

        let err = ManualPaymentVerifier
            .verify(&ManualPaymentSubmission::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: transaction_ref");
    }

    #[test]
    fn test_zero_amount_counts_as_missing() {
        let mut submission = complete();
        submission.amount = Some(Decimal::ZERO);

        let err = ManualPaymentVerifier.verify(&submission).unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: amount");
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Bkash,
    Nagad,
    Rocket,
    #[serde(rename = "aamarpay")]
    AamarPay,
    BankTransfer,
    Card,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 6] = [
        PaymentMethod::Bkash,
        PaymentMethod::Nagad,
        PaymentMethod::Rocket,
        PaymentMethod::AamarPay,
        PaymentMethod::BankTransfer,
        PaymentMethod::Card,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Bkash => "bkash",
            PaymentMethod::Nagad => "nagad",
            PaymentMethod::Rocket => "rocket",
            PaymentMethod::AamarPay => "aamarpay",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PaymentMethod::Bkash => "bKash",
            PaymentMethod::Nagad => "Nagad",
            PaymentMethod::Rocket => "Rocket",
            PaymentMethod::AamarPay => "AamarPay",
            PaymentMethod::BankTransfer => "Bank Transfer",
            PaymentMethod::Card => "Credit/Debit Card",
        }
    }

    /// Methods settled through a vendor API rather than operator review.
    pub fn is_gateway_backed(&self) -> bool {
        !matches!(self, PaymentMethod::BankTransfer | PaymentMethod::Card)
    }

    pub fn is_mobile_banking(&self) -> bool {
        matches!(
            self,
            PaymentMethod::Bkash | PaymentMethod::Nagad | PaymentMethod::Rocket
        )
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        PaymentMethod::ALL
            .into_iter()
            .find(|method| method.as_str() == normalized)
            .ok_or_else(|| GatewayError::UnsupportedMethod(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl Default for PaginationQuery {
    fn default() -> Self {
        Self {
            page: Some(1),
            limit: Some(20),
        }
    }
}

impl PaginationQuery {
    /// Page is 1-based; limit is clamped to 1..=100.
    pub fn resolve(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        (page, limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: u32,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn from_items(items: Vec<T>, pagination: &PaginationQuery) -> Self {
        let (page, limit) = pagination.resolve();
        let total = items.len() as u32;
        let offset = usize::try_from(u64::from(page - 1) * u64::from(limit)).unwrap_or(usize::MAX);
        let data = items
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();

        Self {
            data,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_method_parsing_is_case_insensitive() {
        assert_eq!("bKash".parse::<PaymentMethod>().unwrap(), PaymentMethod::Bkash);
        assert_eq!("AAMARPAY".parse::<PaymentMethod>().unwrap(), PaymentMethod::AamarPay);
        assert_eq!(
            " bank_transfer ".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::BankTransfer
        );
        assert!("paypal".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn test_payment_method_serde_matches_codes() {
        for method in PaymentMethod::ALL {
            let encoded = serde_json::to_string(&method).unwrap();
            assert_eq!(encoded, format!("\"{}\"", method.as_str()));
        }
    }

    #[test]
    fn test_pagination_slices_pages() {
        let items: Vec<u32> = (1..=45).collect();
        let query = PaginationQuery {
            page: Some(3),
            limit: Some(20),
        };

        let page = PaginatedResponse::from_items(items, &query);
        assert_eq!(page.data, vec![41, 42, 43, 44, 45]);
        assert_eq!(page.total, 45);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn test_pagination_far_past_the_end_is_empty() {
        let items: Vec<u32> = (1..=5).collect();
        let query = PaginationQuery {
            page: Some(u32::MAX),
            limit: Some(100),
        };

        let page = PaginatedResponse::from_items(items, &query);
        assert!(page.data.is_empty());
        assert_eq!(page.page, u32::MAX);
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 1);
    }
}

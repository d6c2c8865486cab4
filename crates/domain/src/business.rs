//! Businesses, their categories and stored payment methods.

use chrono::{DateTime, Utc};
use common::{BusinessId, CategoryId, CreditCardId};
use serde::{Deserialize, Serialize};

/// A business listed on the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    pub id: BusinessId,
    pub name: String,
    /// Enrolled in the paid host program.
    pub is_host_program_member: bool,
}

impl Business {
    pub fn new(id: BusinessId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_host_program_member: false,
        }
    }
}

/// A service category a business can be associated with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub archived: bool,
}

impl Category {
    pub fn new(id: CategoryId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            archived: false,
        }
    }

    /// Returns the same category marked as archived.
    pub fn archived(mut self) -> Self {
        self.archived = true;
        self
    }

    /// Only non-archived categories take part in pricing.
    pub fn is_active(&self) -> bool {
        !self.archived
    }
}

/// Raw card details entered by an operator.
///
/// Never persisted; the gateway tokenizes them and only the token is kept.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub number: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
    pub holder: String,
    #[serde(default)]
    pub cvn: Option<String>,
}

impl CardDetails {
    /// Returns the last four digits of the card number.
    pub fn last_four(&self) -> String {
        let digits: Vec<char> = self.number.chars().filter(char::is_ascii_digit).collect();
        let start = digits.len().saturating_sub(4);
        digits[start..].iter().collect()
    }
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &format_args!("****{}", self.last_four()))
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

/// A card the gateway has tokenized, ready to be stored on file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedCard {
    pub token: String,
    pub last_four: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
    pub holder: String,
}

/// A card stored on file for a business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCard {
    pub id: CreditCardId,
    pub business_id: BusinessId,
    pub token: String,
    pub last_four: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
    pub holder: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(number: &str) -> CardDetails {
        CardDetails {
            number: number.to_string(),
            expiry_month: 12,
            expiry_year: 2030,
            holder: "Jo Citizen".to_string(),
            cvn: Some("123".to_string()),
        }
    }

    #[test]
    fn test_last_four_ignores_separators() {
        assert_eq!(card("4444 3333 2222 1111").last_four(), "1111");
        assert_eq!(card("42").last_four(), "42");
    }

    #[test]
    fn test_debug_masks_card_number() {
        let debug = format!("{:?}", card("4444333322221111"));
        assert!(debug.contains("****1111"));
        assert!(!debug.contains("4444333322221111"));
        assert!(!debug.contains("123"));
    }

    #[test]
    fn test_category_activity() {
        let category = Category::new(CategoryId::new(1), "Plumbing");
        assert!(category.is_active());
        assert!(!category.archived().is_active());
    }

    #[test]
    fn test_new_business_is_not_host_program_member() {
        let business = Business::new(BusinessId::new(1), "Fake Hairdresser");
        assert!(!business.is_host_program_member);
    }
}

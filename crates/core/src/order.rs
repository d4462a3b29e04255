use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Walmart,
    Amazon,
    Costco,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Walmart, Provider::Amazon, Provider::Costco];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Walmart => "walmart",
            Provider::Amazon => "amazon",
            Provider::Costco => "costco",
        }
    }

    /// Lowercase fragments identifying this provider's charges in a bank
    /// merchant name.
    pub fn merchant_keywords(self) -> &'static [&'static str] {
        match self {
            Provider::Walmart => &["walmart", "wal-mart", "wm supercenter"],
            Provider::Amazon => &["amazon", "amzn"],
            Provider::Costco => &["costco"],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Walmart => write!(f, "Walmart"),
            Provider::Amazon => write!(f, "Amazon"),
            Provider::Costco => write!(f, "Costco"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Unknown provider: '{0}'")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "walmart" => Ok(Provider::Walmart),
            "amazon" => Ok(Provider::Amazon),
            "costco" => Ok(Provider::Costco),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    /// Line price: unit price times quantity as billed.
    pub price: Money,
    /// Fractional for goods sold by weight.
    pub quantity: Decimal,
    pub unit_price: Money,
}

impl OrderItem {
    pub fn new(name: &str, price: Money, quantity: u32) -> Self {
        let unit_price = if quantity > 1 {
            Money::from_decimal(price.as_decimal() / Decimal::from(quantity))
        } else {
            price
        };
        OrderItem {
            name: name.to_string(),
            price,
            quantity: Decimal::from(quantity),
            unit_price,
        }
    }

    pub fn is_single(&self) -> bool {
        self.quantity == Decimal::ONE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card { last4: String },
    GiftCard,
    Other(String),
}

impl PaymentMethod {
    /// A card payment with four recorded digits is the only kind that
    /// posts to the bank ledger.
    pub fn is_bank_card(&self) -> bool {
        match self {
            PaymentMethod::Card { last4 } => {
                last4.len() == 4 && last4.chars().all(|c| c.is_ascii_digit())
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Charge,
    Refund,
}

/// One entry in a provider's payment history for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub amount: Money,
    pub method: PaymentMethod,
    pub kind: PaymentKind,
}

/// Positive card charges in ledger order. Gift cards and tenders without
/// card digits never reach the bank and are dropped.
pub fn final_charges(payments: &[PaymentEntry]) -> Vec<Money> {
    payments
        .iter()
        .filter(|p| p.kind == PaymentKind::Charge)
        .filter(|p| p.amount.is_positive())
        .filter(|p| p.method.is_bank_card())
        .map(|p| p.amount)
        .collect()
}

/// How an order reached the bank, fixed when the provider adapter builds
/// the order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderKind {
    #[default]
    Simple,
    MultiDelivery { charges: Vec<Money> },
}

impl OrderKind {
    pub fn from_payments(payments: &[PaymentEntry]) -> Self {
        let charges = final_charges(payments);
        if charges.len() > 1 {
            OrderKind::MultiDelivery { charges }
        } else {
            OrderKind::Simple
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub provider: Provider,
    pub date: NaiveDate,
    pub total: Money,
    pub subtotal: Money,
    pub tax: Money,
    #[serde(default)]
    pub tip: Money,
    #[serde(default)]
    pub fees: Money,
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub kind: OrderKind,
}

impl Order {
    pub fn final_charges(&self) -> Option<&[Money]> {
        match &self.kind {
            OrderKind::MultiDelivery { charges } => Some(charges),
            OrderKind::Simple => None,
        }
    }

    pub fn is_multi_delivery(&self) -> bool {
        self.final_charges().is_some_and(|c| c.len() > 1)
    }
}

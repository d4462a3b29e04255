use std::future::Future;

use cartledger_core::{Category, OrderItem};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),
    #[error("Classifier returned unknown category '{0}'")]
    UnknownCategory(String),
    #[error("No category for item '{0}'")]
    Unclassified(String),
    #[error("Invalid classification rules: {0}")]
    InvalidRules(String),
}

/// Category per order item, parallel to the order's item list.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryAssignments {
    categories: Vec<Category>,
}

impl CategoryAssignments {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn for_item(&self, index: usize) -> Option<&Category> {
        self.categories.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }
}

/// Assigns each order item to one of the ledger's categories.
pub trait ItemClassifier: Send + Sync {
    fn categorize_items(
        &self,
        items: &[OrderItem],
        available: &[Category],
    ) -> impl Future<Output = Result<CategoryAssignments, ClassifierError>> + Send;
}

impl<T: ItemClassifier> ItemClassifier for &T {
    async fn categorize_items(
        &self,
        items: &[OrderItem],
        available: &[Category],
    ) -> Result<CategoryAssignments, ClassifierError> {
        (**self).categorize_items(items, available).await
    }
}

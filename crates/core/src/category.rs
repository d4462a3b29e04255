use serde::{Deserialize, Serialize};
use std::fmt;

/// A spending category as known to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

impl Category {
    pub fn new(id: &str, name: &str) -> Self {
        Category {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Looks a category up by id, falling back to a case-insensitive name match.
pub fn find_category<'a>(categories: &'a [Category], key: &str) -> Option<&'a Category> {
    categories
        .iter()
        .find(|c| c.id == key)
        .or_else(|| categories.iter().find(|c| c.name.eq_ignore_ascii_case(key)))
}

pub const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("groceries", "Groceries"),
    ("household", "Household"),
    ("electronics", "Electronics"),
    ("clothing", "Clothing"),
    ("health", "Health & Pharmacy"),
    ("personal-care", "Personal Care"),
    ("pets", "Pets"),
    ("baby", "Baby"),
    ("home-improvement", "Home Improvement"),
    ("entertainment", "Entertainment"),
    ("office", "Office Supplies"),
    ("shopping", "Shopping"),
];

pub fn default_categories() -> Vec<Category> {
    DEFAULT_CATEGORIES
        .iter()
        .map(|(id, name)| Category::new(id, name))
        .collect()
}

//! Category splits for a matched transaction.
//!
//! Each category's share is its items' subtotal plus the same proportion of
//! the order tax, rounded half away from zero to the cent. Whatever rounding
//! leaves over goes entirely to the largest split (first category wins a
//! tie), so the splits always add up to the transaction amount.

use cartledger_core::{Category, Money, Order, OrderItem, Split, Transaction};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::classify::CategoryAssignments;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SplitError {
    #[error("Order has no items")]
    NoItems,
    #[error("Category assignments cover {assignments} items, order has {items}")]
    AssignmentMismatch { items: usize, assignments: usize },
    #[error("Order spans {0} categories, expected exactly one")]
    NotSingleCategory(usize),
}

#[derive(Debug, Clone)]
pub struct CategoryGroup<'a> {
    pub category: &'a Category,
    pub items: Vec<&'a OrderItem>,
}

impl CategoryGroup<'_> {
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(|i| i.price).sum()
    }

    /// Header line with the category name, then one line per item.
    pub fn note(&self) -> String {
        let mut note = format!("{}:", self.category.name);
        for item in &self.items {
            note.push('\n');
            note.push_str(&item_line(item));
        }
        note
    }
}

fn item_line(item: &OrderItem) -> String {
    if item.is_single() {
        format!("- {} {}", item.name, item.price)
    } else {
        format!("- {} (x{}) {}", item.name, item.quantity.normalize(), item.price)
    }
}

/// Items grouped by category in order of first appearance.
#[derive(Debug, Clone)]
pub struct CategoryGroups<'a> {
    groups: Vec<CategoryGroup<'a>>,
}

impl<'a> CategoryGroups<'a> {
    pub fn build(order: &'a Order, assignments: &'a CategoryAssignments) -> Result<Self, SplitError> {
        if order.items.is_empty() {
            return Err(SplitError::NoItems);
        }
        if assignments.len() != order.items.len() {
            return Err(SplitError::AssignmentMismatch {
                items: order.items.len(),
                assignments: assignments.len(),
            });
        }

        let mut groups: Vec<CategoryGroup<'a>> = Vec::new();
        for (item, category) in order.items.iter().zip(assignments.iter()) {
            match groups.iter_mut().find(|g| g.category.id == category.id) {
                Some(group) => group.items.push(item),
                None => groups.push(CategoryGroup {
                    category,
                    items: vec![item],
                }),
            }
        }
        Ok(Self { groups })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.groups.len() == 1
    }

    pub fn groups(&self) -> &[CategoryGroup<'a>] {
        &self.groups
    }
}

/// What gets written onto a transaction whose items share one category.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleCategory {
    pub category_id: String,
    pub category_name: String,
    pub notes: String,
}

pub fn tax_rate(order: &Order) -> Decimal {
    if order.subtotal.is_zero() {
        Decimal::ZERO
    } else {
        order.tax.as_decimal() / order.subtotal.as_decimal()
    }
}

/// Splits for a multi-category order, or `None` when every item shares
/// one category (the caller then sets the category directly).
pub fn create_splits(
    order: &Order,
    transaction: &Transaction,
    assignments: &CategoryAssignments,
) -> Result<Option<Vec<Split>>, SplitError> {
    let groups = CategoryGroups::build(order, assignments)?;
    Ok(splits_for_groups(order, transaction, &groups))
}

pub fn splits_for_groups(
    order: &Order,
    transaction: &Transaction,
    groups: &CategoryGroups<'_>,
) -> Option<Vec<Split>> {
    if groups.len() < 2 {
        return None;
    }

    let rate = tax_rate(order);
    let outgoing = transaction.amount.is_negative();

    let mut splits: Vec<Split> = groups
        .groups()
        .iter()
        .map(|group| {
            let subtotal = group.subtotal().as_decimal();
            let share = Money::from_decimal(subtotal + subtotal * rate);
            Split {
                category_id: group.category.id.clone(),
                category_name: group.category.name.clone(),
                amount: if outgoing { -share } else { share },
                notes: group.note(),
            }
        })
        .collect();

    let allocated: Money = splits.iter().map(|s| s.amount).sum();
    let diff = transaction.amount.round() - allocated;
    if !diff.is_zero() {
        let largest = largest_split(&splits);
        tracing::debug!(
            order_id = %order.id,
            %diff,
            category = %splits[largest].category_name,
            "rounding correction"
        );
        splits[largest].amount += diff;
    }

    Some(splits)
}

/// Index of the split with the largest magnitude; earliest on ties.
fn largest_split(splits: &[Split]) -> usize {
    let mut best = 0;
    for (i, split) in splits.iter().enumerate().skip(1) {
        if split.amount.abs() > splits[best].amount.abs() {
            best = i;
        }
    }
    best
}

/// Category and note for an order whose items all share one category.
pub fn single_category_info(
    order: &Order,
    assignments: &CategoryAssignments,
) -> Result<SingleCategory, SplitError> {
    let groups = CategoryGroups::build(order, assignments)?;
    single_category_for_groups(&groups)
}

pub fn single_category_for_groups(groups: &CategoryGroups<'_>) -> Result<SingleCategory, SplitError> {
    match groups.groups() {
        [group] => Ok(SingleCategory {
            category_id: group.category.id.clone(),
            category_name: group.category.name.clone(),
            notes: group.note(),
        }),
        many => Err(SplitError::NotSingleCategory(many.len())),
    }
}

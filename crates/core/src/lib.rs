pub mod category;
pub mod money;
pub mod order;
pub mod period;
pub mod transaction;

pub use category::{default_categories, find_category, Category, DEFAULT_CATEGORIES};
pub use money::Money;
pub use order::{
    final_charges, Order, OrderItem, OrderKind, PaymentEntry, PaymentKind, PaymentMethod,
    Provider, UnknownProvider,
};
pub use period::DateRange;
pub use transaction::{Split, Transaction, TransactionUpdate};

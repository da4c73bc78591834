//! Shared primitive IDs and counters.

/// Catalog item identifier, as issued by the product table.
pub type ProductId = u64;
/// Number of units on a cart line.
pub type Quantity = u32;
/// Monotonic removal counter used to tag the undo slot.
pub type Generation = u64;

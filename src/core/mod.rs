//! In-memory authoritative cart store and discount table.

/// Static discount codes and the active-discount record.
pub mod discounts;
/// Cart state machine.
pub mod store;

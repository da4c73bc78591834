//! Runtime event stream payloads.

use crate::op::{CartOp, Slice};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartEvent {
    /// The store applied a change.
    Applied(CartOp),
    /// A slice was written to (or deleted from) the boundary.
    Persisted {
        /// Slice written.
        slice: Slice,
    },
    /// A slice could not be written; in-memory state is unaffected.
    PersistFailed {
        /// Slice that failed.
        slice: Slice,
        /// Rendered error.
        reason: String,
    },
}

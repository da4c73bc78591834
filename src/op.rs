//! Cart change records and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::types::{ProductId, Quantity};

/// Version number for serialized [`SliceEnvelope`] payloads.
pub const SLICE_FORMAT_VERSION: u16 = 1;

/// Independently persisted piece of cart state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slice {
    /// The ordered cart line collection.
    Lines,
    /// The favorites set.
    Favorites,
    /// The active discount code, if any.
    Discount,
}

impl Slice {
    /// All slices in load order.
    pub const ALL: [Slice; 3] = [Slice::Lines, Slice::Favorites, Slice::Discount];

    /// Storage key for this slice.
    pub fn key(self) -> &'static str {
        match self {
            Slice::Lines => "cartstore.cart",
            Slice::Favorites => "cartstore.favorites",
            Slice::Discount => "cartstore.discount",
        }
    }
}

/// Change applied to a [`crate::core::store::CartStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartOp {
    /// Units were added, creating the line if needed.
    Added {
        /// Item id.
        id: ProductId,
        /// Line quantity after the add.
        quantity: Quantity,
    },
    /// A line's quantity was set to a new value.
    QuantitySet {
        /// Item id.
        id: ProductId,
        /// New line quantity.
        quantity: Quantity,
    },
    /// A line was removed and parked in the undo slot.
    Removed {
        /// Item id.
        id: ProductId,
    },
    /// The parked line was put back.
    RemovalUndone {
        /// Item id.
        id: ProductId,
    },
    /// The parked line expired without being restored.
    RemovalExpired {
        /// Item id.
        id: ProductId,
    },
    /// All lines were dropped.
    Cleared,
    /// An item id joined the favorites set.
    FavoriteAdded {
        /// Item id.
        id: ProductId,
    },
    /// An item id left the favorites set.
    FavoriteRemoved {
        /// Item id.
        id: ProductId,
    },
    /// A discount code became active.
    DiscountApplied {
        /// Normalized code.
        code: String,
    },
    /// The active discount was cleared.
    DiscountRemoved,
    /// The cart panel was opened or closed.
    VisibilityChanged {
        /// New visibility.
        open: bool,
    },
}

impl CartOp {
    /// Persisted slice touched by this change, if any.
    pub fn slice(&self) -> Option<Slice> {
        match self {
            CartOp::Added { .. }
            | CartOp::QuantitySet { .. }
            | CartOp::Removed { .. }
            | CartOp::RemovalUndone { .. }
            | CartOp::Cleared => Some(Slice::Lines),
            CartOp::FavoriteAdded { .. } | CartOp::FavoriteRemoved { .. } => Some(Slice::Favorites),
            CartOp::DiscountApplied { .. } | CartOp::DiscountRemoved => Some(Slice::Discount),
            CartOp::RemovalExpired { .. } | CartOp::VisibilityChanged { .. } => None,
        }
    }
}

/// Versioned wrapper for stable on-disk slice decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceEnvelope<T> {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped slice value.
    pub value: T,
}

impl<T> SliceEnvelope<T> {
    /// Constructs an envelope using [`SLICE_FORMAT_VERSION`].
    pub fn new(value: T) -> Self {
        Self {
            format_version: SLICE_FORMAT_VERSION,
            value,
        }
    }
}

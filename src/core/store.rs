use hashbrown::HashSet;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    core::discounts::{self, DiscountState},
    item::{CartLine, CatalogItem},
    op::CartOp,
    types::{Generation, ProductId, Quantity},
};

/// Rejected store input. A rejected call leaves the store untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An add asked for zero units.
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    /// The item failed [`CatalogItem::validate`].
    #[error("item {id} is malformed: {reason}")]
    InvalidItem {
        /// Offending item id.
        id: ProductId,
        /// Which check failed.
        reason: &'static str,
    },
    /// The line quantity would not fit in a [`Quantity`].
    #[error("quantity for item {0} would overflow")]
    QuantityOverflow(ProductId),
}

/// Persisted sub-states of a [`CartStore`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartSnapshot {
    /// Cart lines in insertion order.
    pub lines: Vec<CartLine>,
    /// Favorite item ids.
    pub favorites: HashSet<ProductId>,
    /// Active discount, if any.
    pub discount: Option<DiscountState>,
}

/// Derived money figures for the current cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    /// Sum of line quantities.
    pub count: u64,
    /// Sum of line totals.
    pub subtotal: Decimal,
    /// Amount taken off the subtotal, rounded to cents.
    pub discount_amount: Decimal,
    /// `subtotal - discount_amount`.
    pub final_total: Decimal,
}

/// Lines handed to order creation, taken as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSnapshot {
    /// Lines at checkout time.
    pub lines: Vec<CartLine>,
    /// Discount applied to the order.
    pub discount: Option<DiscountState>,
    /// Totals computed from `lines` and `discount`.
    pub totals: CartTotals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RemovedLine {
    line: CartLine,
    generation: Generation,
}

/// Authoritative cart state for one session.
///
/// Every mutation records a [`CartOp`]; callers drain them with
/// [`CartStore::drain_pending_ops`] to drive persistence and events.
#[derive(Debug, Default)]
pub struct CartStore {
    lines: Vec<CartLine>,
    favorites: HashSet<ProductId>,
    discount: Option<DiscountState>,
    recently_removed: Option<RemovedLine>,
    removal_generation: Generation,
    is_open: bool,
    pending_ops: Vec<CartOp>,
}

impl CartStore {
    /// Creates an empty, closed cart.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted state, merging duplicate ids and
    /// dropping empty lines.
    pub fn from_snapshot(snapshot: CartSnapshot) -> Self {
        let mut store = Self {
            favorites: snapshot.favorites,
            discount: snapshot.discount,
            ..Self::default()
        };

        for line in snapshot.lines {
            if line.quantity == 0 {
                continue;
            }
            match store.line_mut(line.id()) {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(line.quantity);
                }
                None => store.lines.push(line),
            }
        }

        store
    }

    /// Copies out the persisted sub-states.
    pub fn export_snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            lines: self.lines.clone(),
            favorites: self.favorites.clone(),
            discount: self.discount.clone(),
        }
    }

    /// Adds `quantity` units of `item`, merging into an existing line.
    ///
    /// Opens the cart panel if it was closed. Returns the line's new quantity.
    pub fn add_to_cart(&mut self, item: CatalogItem, quantity: Quantity) -> Result<Quantity, StoreError> {
        if quantity == 0 {
            return Err(StoreError::ZeroQuantity);
        }
        item.validate()?;

        let id = item.id;
        let new_quantity = match self.line_mut(id) {
            Some(line) => {
                line.quantity = line
                    .quantity
                    .checked_add(quantity)
                    .ok_or(StoreError::QuantityOverflow(id))?;
                line.quantity
            }
            None => {
                self.lines.push(CartLine { item, quantity });
                quantity
            }
        };

        self.pending_ops.push(CartOp::Added {
            id,
            quantity: new_quantity,
        });
        if !self.is_open {
            self.set_cart_open(true);
        }
        Ok(new_quantity)
    }

    /// Adds a single unit; see [`CartStore::add_to_cart`].
    pub fn add_one(&mut self, item: CatalogItem) -> Result<Quantity, StoreError> {
        self.add_to_cart(item, 1)
    }

    /// Removes the line for `id` and parks it in the undo slot.
    pub fn remove_from_cart(&mut self, id: ProductId) -> Option<CartLine> {
        let pos = self.lines.iter().position(|line| line.id() == id)?;
        let line = self.lines.remove(pos);

        self.removal_generation += 1;
        self.recently_removed = Some(RemovedLine {
            line: line.clone(),
            generation: self.removal_generation,
        });
        self.pending_ops.push(CartOp::Removed { id });
        Some(line)
    }

    /// Sets an absolute quantity; zero removes the line.
    pub fn update_quantity(&mut self, id: ProductId, quantity: Quantity) -> bool {
        if quantity == 0 {
            return self.remove_from_cart(id).is_some();
        }

        let Some(line) = self.line_mut(id) else {
            return false;
        };
        line.quantity = quantity;
        self.pending_ops.push(CartOp::QuantitySet { id, quantity });
        true
    }

    /// Drops every line and the parked line.
    pub fn clear_cart(&mut self) {
        self.lines.clear();
        self.recently_removed = None;
        self.pending_ops.push(CartOp::Cleared);
    }

    /// Restores the most recently removed line, if still parked.
    ///
    /// If the id was re-added meanwhile, the parked units merge into that
    /// line. A merge that would overflow [`Quantity`] is refused and the line
    /// stays parked.
    pub fn undo_remove(&mut self) -> Option<ProductId> {
        let parked = &self.recently_removed.as_ref()?.line;
        let id = parked.id();
        let merged = match self.line(id) {
            Some(existing) => match existing.quantity.checked_add(parked.quantity) {
                Some(quantity) => Some(quantity),
                None => {
                    warn!(id, "undo would overflow line quantity, keeping line parked");
                    return None;
                }
            },
            None => None,
        };

        let RemovedLine { line, .. } = self.recently_removed.take()?;
        match (merged, self.line_mut(id)) {
            (Some(quantity), Some(existing)) => existing.quantity = quantity,
            _ => self.lines.push(line),
        }

        self.pending_ops.push(CartOp::RemovalUndone { id });
        Some(id)
    }

    /// Drops the parked line if `generation` is still the latest removal.
    pub fn expire_recently_removed(&mut self, generation: Generation) -> Option<CartLine> {
        if self.recently_removed.as_ref()?.generation != generation {
            return None;
        }
        let RemovedLine { line, .. } = self.recently_removed.take()?;
        self.pending_ops.push(CartOp::RemovalExpired { id: line.id() });
        Some(line)
    }

    /// Flips visibility and returns the new state.
    pub fn toggle_cart(&mut self) -> bool {
        self.set_cart_open(!self.is_open);
        self.is_open
    }

    /// Sets visibility; a no-op when unchanged.
    pub fn set_cart_open(&mut self, open: bool) {
        if self.is_open == open {
            return;
        }
        self.is_open = open;
        self.pending_ops.push(CartOp::VisibilityChanged { open });
    }

    /// Whether the cart panel is open.
    pub fn is_cart_open(&self) -> bool {
        self.is_open
    }

    /// Returns false if `id` was already a favorite.
    pub fn add_to_favorites(&mut self, id: ProductId) -> bool {
        if !self.favorites.insert(id) {
            return false;
        }
        self.pending_ops.push(CartOp::FavoriteAdded { id });
        true
    }

    /// Returns false if `id` was not a favorite.
    pub fn remove_from_favorites(&mut self, id: ProductId) -> bool {
        if !self.favorites.remove(&id) {
            return false;
        }
        self.pending_ops.push(CartOp::FavoriteRemoved { id });
        true
    }

    /// Whether `id` is in the favorites set.
    pub fn is_favorite(&self, id: ProductId) -> bool {
        self.favorites.contains(&id)
    }

    /// Units of `id` in the cart, 0 when absent.
    pub fn item_quantity(&self, id: ProductId) -> Quantity {
        self.line(id).map_or(0, |line| line.quantity)
    }

    /// Whether a line for `id` exists.
    pub fn is_in_cart(&self, id: ProductId) -> bool {
        self.line(id).is_some()
    }

    /// Activates `code` if it is in the discount table.
    ///
    /// A miss leaves any active discount in place.
    pub fn apply_discount(&mut self, code: &str) -> bool {
        let Some(discount) = discounts::lookup(code) else {
            debug!(code, "discount code not recognised");
            return false;
        };
        self.pending_ops.push(CartOp::DiscountApplied {
            code: discount.code.clone(),
        });
        self.discount = Some(discount);
        true
    }

    /// Clears the active discount.
    pub fn remove_discount(&mut self) {
        self.discount = None;
        self.pending_ops.push(CartOp::DiscountRemoved);
    }

    /// Total units across all lines.
    pub fn cart_count(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }

    /// Sum of price times quantity, unrounded.
    pub fn cart_total(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Subtotal times the active rate, rounded to cents.
    pub fn discount_amount(&self) -> Decimal {
        let Some(discount) = &self.discount else {
            return Decimal::ZERO;
        };
        (self.cart_total() * discount.amount)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Subtotal minus the discount amount.
    pub fn final_total(&self) -> Decimal {
        self.cart_total() - self.discount_amount()
    }

    /// All derived figures at once.
    pub fn totals(&self) -> CartTotals {
        let subtotal = self.cart_total();
        let discount_amount = self.discount_amount();
        CartTotals {
            count: self.cart_count(),
            subtotal,
            discount_amount,
            final_total: subtotal - discount_amount,
        }
    }

    /// Lines plus totals for order creation; `None` when the cart is empty.
    ///
    /// Stock is not checked here.
    pub fn checkout_snapshot(&self) -> Option<CheckoutSnapshot> {
        if self.lines.is_empty() {
            return None;
        }
        Some(CheckoutSnapshot {
            lines: self.lines.clone(),
            discount: self.discount.clone(),
            totals: self.totals(),
        })
    }

    /// Lines in insertion order.
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Line for `id`, if present.
    pub fn line(&self, id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.id() == id)
    }

    /// Favorite ids.
    pub fn favorites(&self) -> &HashSet<ProductId> {
        &self.favorites
    }

    /// Active discount, if any.
    pub fn discount(&self) -> Option<&DiscountState> {
        self.discount.as_ref()
    }

    /// Line currently parked for undo.
    pub fn recently_removed(&self) -> Option<&CartLine> {
        self.recently_removed.as_ref().map(|removed| &removed.line)
    }

    /// Generation of the parked line, if there is one.
    pub fn parked_generation(&self) -> Option<Generation> {
        self.recently_removed.as_ref().map(|removed| removed.generation)
    }

    /// Counter bumped by every removal.
    pub fn removal_generation(&self) -> Generation {
        self.removal_generation
    }

    /// Takes the changes recorded since the last drain.
    pub fn drain_pending_ops(&mut self) -> Vec<CartOp> {
        std::mem::take(&mut self.pending_ops)
    }

    fn line_mut(&mut self, id: ProductId) -> Option<&mut CartLine> {
        self.lines.iter_mut().find(|line| line.id() == id)
    }
}

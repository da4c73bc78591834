//! Catalog item snapshot and cart line types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    core::store::StoreError,
    types::{ProductId, Quantity},
};

/// Purchasable product as copied into the cart at add time.
///
/// Only `id`, `name` and `price` are required; the rest mirror the catalog
/// row and are carried along for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Catalog identifier.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Unit price.
    pub price: Decimal,
    /// Image reference (URL or storage path).
    #[serde(default)]
    pub image: Option<String>,
    /// URL slug.
    #[serde(default)]
    pub slug: Option<String>,
    /// Growing region or farm.
    #[serde(default)]
    pub origin: Option<String>,
    /// Roast level label.
    #[serde(default)]
    pub roast: Option<String>,
    /// Package weight label, e.g. `250g`.
    #[serde(default)]
    pub weight: Option<String>,
    /// Stock count at the time the item was read.
    #[serde(default)]
    pub stock: Option<u32>,
}

impl CatalogItem {
    /// Builds an item carrying only the required fields.
    pub fn new(id: ProductId, name: impl Into<String>, price: Decimal) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            image: None,
            slug: None,
            origin: None,
            roast: None,
            weight: None,
            stock: None,
        }
    }

    /// Checks the fields the cart relies on.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidItem`] for a blank name or a negative price.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidItem {
                id: self.id,
                reason: "name is empty",
            });
        }
        if self.price < Decimal::ZERO {
            return Err(StoreError::InvalidItem {
                id: self.id,
                reason: "price is negative",
            });
        }
        Ok(())
    }
}

/// One product-and-quantity entry in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Item snapshot taken when the line was created.
    pub item: CatalogItem,
    /// Units on this line, always at least 1.
    pub quantity: Quantity,
}

impl CartLine {
    /// Item identifier of this line.
    pub fn id(&self) -> ProductId {
        self.item.id
    }

    /// Unit price times quantity.
    pub fn line_total(&self) -> Decimal {
        self.item.price * Decimal::from(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_blank_name_and_negative_price() {
        let blank = CatalogItem::new(1, "  ", Decimal::new(100, 2));
        assert!(matches!(
            blank.validate(),
            Err(StoreError::InvalidItem { id: 1, .. })
        ));

        let negative = CatalogItem::new(2, "Sencha", Decimal::new(-1, 2));
        assert!(matches!(
            negative.validate(),
            Err(StoreError::InvalidItem { id: 2, .. })
        ));

        let free = CatalogItem::new(3, "Sample", Decimal::ZERO);
        assert!(free.validate().is_ok());
    }

    #[test]
    fn line_total_multiplies_price_by_quantity() {
        let line = CartLine {
            item: CatalogItem::new(1, "Gyokuro", Decimal::new(1899, 2)),
            quantity: 3,
        };
        assert_eq!(line.line_total(), Decimal::new(5697, 2));
    }

    #[test]
    fn optional_fields_default_when_missing_from_json() {
        let item: CatalogItem =
            serde_json::from_str(r#"{"id":9,"name":"Hojicha","price":"12.50"}"#)
                .expect("decode");
        assert_eq!(item, CatalogItem::new(9, "Hojicha", Decimal::new(1250, 2)));
    }
}

//! Cart domain payload.

use serde::{Deserialize, Serialize};

use crate::collection::{CollectionSnapshot, SyncedCollection};
use crate::item::Payload;

/// One line of the shopping cart: a product variant and how many of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: u64,
    pub sku_id: u64,
    pub quantity: u32,
}

impl Payload for CartLine {
    /// Same product variant, regardless of quantity.
    fn same_entity(&self, other: &Self) -> bool {
        self.product_id == other.product_id && self.sku_id == other.sku_id
    }

    fn label(&self) -> String {
        format!("product {} sku {}", self.product_id, self.sku_id)
    }
}

/// A synchronized shopping cart.
pub type CartCollection = SyncedCollection<CartLine>;

impl CollectionSnapshot<CartLine> {
    /// Total units across all lines (the badge count), as opposed to
    /// `total` which counts lines.
    #[must_use]
    pub fn unit_count(&self) -> u64 {
        self.items
            .iter()
            .map(|item| u64::from(item.payload.quantity))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{CollectionItem, ItemId, SyncState};

    #[test]
    fn test_same_entity_ignores_quantity() {
        let a = CartLine { product_id: 1, sku_id: 10, quantity: 2 };
        let b = CartLine { product_id: 1, sku_id: 10, quantity: 7 };
        let c = CartLine { product_id: 1, sku_id: 11, quantity: 2 };
        assert!(a.same_entity(&b));
        assert!(!a.same_entity(&c));
    }

    #[test]
    fn test_unit_count_sums_quantities() {
        let snapshot = CollectionSnapshot {
            items: vec![
                CollectionItem::new(
                    ItemId::Remote(1),
                    CartLine { product_id: 1, sku_id: 10, quantity: 2 },
                    SyncState::Synced,
                ),
                CollectionItem::new(
                    ItemId::Remote(2),
                    CartLine { product_id: 2, sku_id: 20, quantity: 3 },
                    SyncState::Synced,
                ),
            ],
            total: 2,
            ..CollectionSnapshot::default()
        };
        assert_eq!(snapshot.unit_count(), 5);
        assert_eq!(snapshot.total, 2);
    }
}

//! Favorites domain payload.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::{SyncError, SyncedCollection};
use crate::item::Payload;

/// One favorited product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    pub product_id: u64,
}

impl Payload for FavoriteEntry {
    fn same_entity(&self, other: &Self) -> bool {
        self.product_id == other.product_id
    }

    fn label(&self) -> String {
        format!("product {}", self.product_id)
    }
}

/// A synchronized favorites list.
pub type FavoriteCollection = SyncedCollection<FavoriteEntry>;

impl SyncedCollection<FavoriteEntry> {
    #[must_use]
    pub fn is_favorited(&self, product_id: u64) -> bool {
        self.items()
            .iter()
            .any(|item| item.payload.product_id == product_id)
    }

    /// Flip the favorite state of a product. Returns the new state (`true`
    /// if the product is now favorited). Routed through `add`/`remove`, so
    /// it inherits the full offline policy.
    pub async fn toggle(&self, product_id: u64) -> Result<bool, SyncError> {
        let existing = self
            .items()
            .iter()
            .find(|item| item.payload.product_id == product_id)
            .map(|item| item.id);
        match existing {
            Some(id) => {
                debug!(product_id, "Unfavoriting");
                self.remove(id).await?;
                Ok(false)
            }
            None => {
                debug!(product_id, "Favoriting");
                self.add(FavoriteEntry { product_id }).await?;
                Ok(true)
            }
        }
    }
}

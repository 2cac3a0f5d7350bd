use serde::Serialize;

use scratchboard_shared::CatalogItem;

/// Where a catalog change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    /// A mutation made through this store.
    Local,
    /// An envelope delivered by the sync bus.
    Remote,
}

/// Payload handed to catalog listeners after every applied change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogChange {
    pub items: Vec<CatalogItem>,
    pub origin: ChangeOrigin,
}

use thiserror::Error;

/// Reasons a catalog item is rejected before it reaches storage or the bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Catalog item id must not be blank")]
    BlankId,

    #[error("Catalog item {id} has a blank title")]
    BlankTitle { id: String },

    #[error("Catalog item {id} has no media reference")]
    MissingMedia { id: String },
}

use scratchboard_shared::ValidationError;

/// Rejections surfaced by [`CatalogStore`](crate::CatalogStore) mutations.
///
/// Storage and transport failures are absorbed inside the store and bus;
/// only invalid input reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid catalog item: {0}")]
    Invalid(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

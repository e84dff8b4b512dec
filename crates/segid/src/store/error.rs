/// Errors raised by the bundled [`IdStore`](crate::IdStore) implementations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A tag was configured with a step of zero, which would lease empty
    /// ranges forever.
    #[error("tag `{tag}` has an invalid step of {step}")]
    InvalidStep { tag: String, step: u64 },

    /// Bumping the tag's max ID would overflow `u64`.
    #[error("max id of tag `{tag}` would overflow")]
    Overflow { tag: String },

    /// Reading or writing the backing file failed.
    #[cfg_attr(docsrs, doc(cfg(feature = "json-store")))]
    #[cfg(feature = "json-store")]
    #[error("id store file: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not a valid tag table.
    #[cfg_attr(docsrs, doc(cfg(feature = "json-store")))]
    #[cfg(feature = "json-store")]
    #[error("id store format: {0}")]
    Format(#[from] serde_json::Error),
}

use core::time::Duration;

/// A result type defaulting to the crate-wide [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// A type-erased error raised by an [`IdStore`] implementation.
///
/// Store errors are kept as the `source` of a domain error so callers can
/// inspect the chain without depending on the store's concrete type.
///
/// [`IdStore`]: crate::IdStore
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// All error variants that `segid` can emit.
///
/// Raw store failures never surface as a top-level error. They are wrapped in
/// [`Error::StoreUnavailable`] or [`Error::TagScan`] and kept as the `source`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The tag is neither registered nor known to the ID store.
    ///
    /// This is a configuration error: retrying will not help until the tag is
    /// created in the store.
    #[error("unknown business tag `{tag}`")]
    UnknownTag {
        /// The requested tag.
        tag: String,
    },

    /// The ID store failed while a range was required synchronously (first
    /// use of a tag, lazy registration, or a diagnostic read).
    ///
    /// The tag stays uninitialized, so a later call retries the fetch.
    #[error("id store unavailable for tag `{tag}`: {source}")]
    StoreUnavailable {
        /// The tag being served.
        tag: String,
        /// The store's own error.
        #[source]
        source: BoxError,
    },

    /// The ID store failed while listing its tags.
    #[error("failed to list tags from the id store: {source}")]
    TagScan {
        /// The store's own error.
        #[source]
        source: BoxError,
    },

    /// The active segment is exhausted and the standby segment did not become
    /// ready within the configured exhaustion timeout.
    #[error("both segments of tag `{tag}` are exhausted, standby not ready after {waited:?}")]
    SegmentsNotReady {
        /// The tag being served.
        tag: String,
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// A [`GeneratorConfig`](crate::GeneratorConfig) or executor setting was
    /// rejected.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Which setting was rejected and why.
        reason: String,
    },

    /// The prefetch executor could not be started or reached.
    #[error("prefetch executor error: {reason}")]
    Executor {
        /// A description of the failure.
        reason: String,
    },

    /// A thread panicked while holding a buffer lock.
    ///
    /// When the `parking-lot` feature is enabled, locks do **not** poison, so
    /// this variant is not available.
    #[cfg_attr(docsrs, doc(cfg(not(feature = "parking-lot"))))]
    #[cfg(not(feature = "parking-lot"))]
    #[error("buffer lock poisoned")]
    LockPoisoned,
}

impl Error {
    /// Returns `true` for failures that may succeed when retried later
    /// (store outages and exhaustion without a ready standby).
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::TagScan { .. } | Self::SegmentsNotReady { .. }
        )
    }

    pub(crate) fn unknown_tag(tag: &str) -> Self {
        Self::UnknownTag {
            tag: tag.to_owned(),
        }
    }

    pub(crate) fn store<E>(tag: &str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::StoreUnavailable {
            tag: tag.to_owned(),
            source: source.into(),
        }
    }

    pub(crate) fn tag_scan<E>(source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::TagScan {
            source: source.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

// Convert all poisoned lock errors to a simplified `LockPoisoned`
#[cfg(not(feature = "parking-lot"))]
impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}

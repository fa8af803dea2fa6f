/// Lifecycle of a [`super::DataFeed`].
///
/// States are ordered; an operation requires the feed to have reached a
/// minimum state and panics otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeedState {
    /// Constructed, `init` not called yet.
    Uninitialized,
    /// Configuration and parser bound.
    Initialized,
    /// Input files assigned.
    FileListSet,
    /// Packer checked out, batches can be pulled.
    Started,
    /// The current pass is exhausted.
    EndOfEpoch,
}

impl FeedState {
    /// Panics unless `self` has reached `required`.
    #[track_caller]
    pub(crate) fn require(self, required: Self, op: &str) {
        assert!(
            self >= required,
            "DataFeed::{op} called in state {self:?}, requires {required:?}"
        );
    }

    /// True once `start` succeeded and until `finish`.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Started | Self::EndOfEpoch)
    }
}

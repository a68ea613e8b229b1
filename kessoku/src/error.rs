use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by generated injector functions.
///
/// Provider failures are wrapped with the provider's name so the caller can
/// tell which constructor failed without unwinding the whole dependency
/// graph in their head.
#[derive(Debug, Error)]
pub enum InjectError {
    /// A provider function returned an error.
    #[error("provider `{name}` failed: {source}")]
    Provider {
        name: &'static str,
        #[source]
        source: BoxError,
    },

    /// The injection was canceled before the value became available, either
    /// through the caller's cancellation token or because a sibling provider
    /// failed first.
    #[error("injection canceled")]
    Canceled,

    /// An auxiliary provider task panicked or was aborted.
    #[error("provider task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl InjectError {
    /// Wraps a provider error together with the provider's name.
    pub fn provider(name: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Provider {
            name,
            source: source.into(),
        }
    }
}

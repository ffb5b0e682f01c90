//! Culvert error types.

use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The core culvert error type. This type is used in all public culvert
/// apis as well as internally in some modules.
///
/// This type is required to implement `Clone` so that a single error can
/// be fanned out to multiple subscribers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CvtError {
    /// Invalid or unusable configuration. Fatal at startup.
    #[error("invalid config: {0}")]
    Config(Arc<str>),

    /// A malformed record in one of the descriptor feeds. The record is
    /// dropped and the ingestion cycle continues.
    #[error("parse error: {0}")]
    Parse(Arc<str>),

    /// The network-status feed carried too few running relays. The whole
    /// ingestion cycle is aborted without touching the rings.
    #[error("not enough running relays: {running} of {total}")]
    NotEnoughRunning {
        /// Relays carrying the Running flag.
        running: usize,
        /// Total relays seen in the feed.
        total: usize,
    },

    /// Generic culvert internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },
}

impl CvtError {
    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// Construct a configuration error.
    pub fn config<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Config(ctx.to_string().into_boxed_str().into())
    }

    /// Construct a parse error.
    pub fn parse<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Parse(ctx.to_string().into_boxed_str().into())
    }
}

/// The core culvert result type.
pub type CvtResult<T> = Result<T, CvtError>;

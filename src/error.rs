use thiserror::Error;

/// Every failure mode the graph loader and executor can produce.
///
/// Mirrors the kind/policy table of the engine's error handling design: load-time
/// failures are either fatal-and-abort (`IncompatibleVersion`, `UnknownLayerType`,
/// `BadModel`) or logged-and-skip (`BadParam`), while extraction-time failures
/// (`ShapeError`, `BackendError`, `NotFound`) are fatal only for the current
/// `extract` call.
#[derive(Error, Debug)]
pub enum Error {
    #[error("param magic mismatch: expected 7767517, model is too old or corrupt")]
    IncompatibleVersion,

    #[error("layer type {0:?} is not registered as a built-in or custom layer")]
    UnknownLayerType(LayerTypeId),

    #[error("malformed parameter record: {0}")]
    BadParam(String),

    #[error("malformed weight data: {0}")]
    BadModel(String),

    #[error("shape mismatch: {0}")]
    ShapeError(String),

    #[error("backend error: {0}")]
    BackendError(String),

    #[error("blob or layer not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A layer type identifier as it appeared in the model file: either a name
/// (textual formats) or a raw integer index (binary formats), possibly with
/// [`crate::layer::CUSTOM_BIT`] set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerTypeId {
    Name(String),
    Index(u32),
}

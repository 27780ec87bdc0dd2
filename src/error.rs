use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong between loading the extension and printing
/// what the msos engine answered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShimError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to initialize COM: HRESULT 0x{0:08x}")]
    ComInit(u32),

    #[error("failed to load {}: {reason}", path.display())]
    LibraryLoad { path: PathBuf, reason: String },

    #[error("entry point {symbol} not found in {}: {reason}", path.display())]
    EntryPoint {
        path: PathBuf,
        symbol: String,
        reason: String,
    },

    #[error("{symbol} did not return an msos object")]
    NullObject { symbol: String },

    #[error("msos Echo failed: {0}")]
    Echo(String),
}

pub type Result<T> = std::result::Result<T, ShimError>;

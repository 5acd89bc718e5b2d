use crate::error::Error;

/// Result alias used throughout colscan.
pub type Result<T> = std::result::Result<T, Error>;

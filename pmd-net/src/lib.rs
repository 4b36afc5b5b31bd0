pub mod api;
pub mod dataplane;

/// A boxed error type for pmd-net operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A Result type using BoxError.
pub type Result<T> = std::result::Result<T, BoxError>;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the library.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The bar data is too short. A run needs one decision bar plus one settlement bar.
    #[error("Not enough bars for backtest: at least 2 required (got: {0})")]
    NotEnoughBars(usize),

    /// A bar failed validation while being built.
    #[error("Invalid bar: {0}")]
    InvalidBar(String),

    /// A run configuration value is out of range.
    #[error("Invalid run config: {0}")]
    InvalidConfig(String),

    /// The timeframe string could not be parsed (e.g. `5m`, `1h`, `1d`).
    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),

    /// A parameter override does not exist in the strategy schema.
    #[error("Unknown parameter: {0}")]
    UnknownParam(String),

    /// A parameter name appears twice in a schema.
    #[error("Duplicate parameter in schema: {0}")]
    DuplicateParam(String),

    /// A parameter value has the wrong kind or is out of range.
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParam {
        /// Parameter name.
        name: String,
        /// Why the value was refused.
        reason: String,
    },

    /// The indicator name is not in the registry.
    #[error("Unknown indicator: {0}")]
    UnknownIndicator(String),

    /// An indicator was called with the wrong number of inputs or arguments.
    #[error("Indicator {name}: expected {expected} {what}, got {got}")]
    IndicatorArgs {
        /// Indicator name.
        name: &'static str,
        /// `inputs` or `args`.
        what: &'static str,
        /// Expected count.
        expected: usize,
        /// Received count.
        got: usize,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

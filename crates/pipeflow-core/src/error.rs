use thiserror::Error;

/// Canonical result for every pipeflow crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected synchronously, before any evaluation starts.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("column '{column}' not found")]
    ColumnNotFound { column: String },

    #[error("column index {index} is out of range (record has {len} columns)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("cannot convert column '{column}' value {found} to {target}")]
    TypeConversion {
        column: String,
        target: &'static str,
        found: String,
    },

    #[error("sequence contains no elements")]
    EmptySequence,

    // Readers and other collaborators map their own failures into this
    // variant when they surface mid-stream.
    #[error("source error: {0}")]
    Source(String),

    #[error("remote fetch failed: {0}")]
    Remote(String),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    /// Render a panic payload caught from user code or a worker thread.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Error::Worker(msg)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Source(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_render_as_worker_errors() {
        let err = Error::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "worker failed: boom");

        let err = Error::from_panic(Box::new(String::from("bad row")));
        assert!(matches!(err, Error::Worker(ref m) if m == "bad row"));

        let err = Error::from_panic(Box::new(42u8));
        assert!(matches!(err, Error::Worker(_)));
    }
}

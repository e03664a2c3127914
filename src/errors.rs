use thiserror::Error;

/// Failure taxonomy shared by both pipelines.
///
/// Everything except `TruncatedRead` is fatal: the pipelines close their
/// writers best-effort and propagate. `TruncatedRead` routes the record to
/// "unassigned" and increments a counter instead.
#[derive(Debug, Error)]
pub enum DemarkError {
    #[error("invalid read layout '{layout}': {reason}")]
    InvalidLayout { layout: String, reason: String },

    #[error("invalid barcode table:\n{0}")]
    InvalidBarcodeTable(String),

    #[error("parallel input streams desynchronised: {0}")]
    StreamMisaligned(String),

    #[error("read shorter than its layout requires ({have} < {need} bases)")]
    TruncatedRead { have: usize, need: usize },

    #[error("UMI slot length mismatch: observed {observed} bases, expected words of length {expected}")]
    UmiSlotLengthMismatch { observed: usize, expected: usize },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DemarkError {
    /// Shorthand for layout-grammar failures.
    pub fn layout(layout: &str, reason: impl Into<String>) -> Self {
        DemarkError::InvalidLayout {
            layout: layout.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DemarkError>;

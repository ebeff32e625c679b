use std::fmt;

/// Fatal pipeline failures. Per-row coercion problems never surface here; they
/// become `None` fields on the enriched row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    EmptySnapshot,
    NoRecognizedColumns { columns: Vec<String> },
    InvalidPageSize(usize),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::EmptySnapshot => write!(f, "No data for this date."),
            PipelineError::NoRecognizedColumns { columns } => write!(
                f,
                "snapshot has no recognizable columns (found: {})",
                columns.join(", ")
            ),
            PipelineError::InvalidPageSize(size) => {
                write!(f, "page size must be at least 1 (got {size})")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

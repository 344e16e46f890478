use thiserror::Error;

// Everything that can go wrong between reading the CSV and scoring customers.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Labels contain a single class ({0}); a binary classifier needs both")]
    DegenerateLabels(usize),

    #[error("Classifier error: {0}")]
    Classifier(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

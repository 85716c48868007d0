use thiserror::Error;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error("Classifier Error - {0}")]
    Classifier(#[from] tsort_core::Error),

    #[error("IO Error - {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode Error - {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Cli Error - {0}")]
    Cli(String),

    #[error("Task Error - {0}")]
    Task(String),
}

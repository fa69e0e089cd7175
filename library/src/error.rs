use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Graph error: {0}")]
    Graph(String),
    #[error("Invalid program: {0}")]
    InvalidProgram(String),
    #[error("Missing state memory for block '{0}'")]
    MissingState(String),
    #[error("Function not found: {0}")]
    FunctionNotFound(String),
    #[error("Lowering error: {0}")]
    Lowering(String),
    #[error("Evaluation error: {0}")]
    Evaluation(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl LibraryError {
    pub fn graph(msg: impl Into<String>) -> Self {
        LibraryError::Graph(msg.into())
    }

    pub fn lowering(msg: impl Into<String>) -> Self {
        LibraryError::Lowering(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        LibraryError::Evaluation(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        LibraryError::InvalidArgument(msg.into())
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Materialize error: {0}")]
    Materialize(String),

    #[error("Join key error: {0}")]
    JoinKey(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Capability timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ReconError {
    /// Machine-readable kind reported in `ReconResponse.error.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconError::Configuration(_) => "configuration",
            ReconError::Load(_) | ReconError::Polars(_) => "load",
            ReconError::Materialize(_) => "materialize",
            ReconError::JoinKey(_) => "join_key",
            ReconError::Llm(_) | ReconError::Timeout(_) => "capability",
            ReconError::Execution(_) => "execution",
            ReconError::Store(_) => "store",
            ReconError::Io(_) | ReconError::Json(_) | ReconError::Http(_) => "internal",
        }
    }

    /// Fatal errors abort the run; everything else degrades to a status.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ReconError::Llm(_) | ReconError::Timeout(_) | ReconError::Execution(_)
        )
    }
}

impl From<polars::error::PolarsError> for ReconError {
    fn from(err: polars::error::PolarsError) -> Self {
        ReconError::Polars(err.to_string())
    }
}

impl From<reqwest::Error> for ReconError {
    fn from(err: reqwest::Error) -> Self {
        ReconError::Http(err.to_string())
    }
}

impl From<rusqlite::Error> for ReconError {
    fn from(err: rusqlite::Error) -> Self {
        ReconError::Store(err.to_string())
    }
}

impl From<sqlx::Error> for ReconError {
    fn from(err: sqlx::Error) -> Self {
        ReconError::Load(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(ReconError::Configuration("x".into()).kind(), "configuration");
        assert_eq!(ReconError::JoinKey("x".into()).kind(), "join_key");
        assert_eq!(ReconError::Timeout(5).kind(), "capability");
    }

    #[test]
    fn test_fatality() {
        assert!(ReconError::Load("missing file".into()).is_fatal());
        assert!(!ReconError::Execution("boom".into()).is_fatal());
        assert!(!ReconError::Llm("bad json".into()).is_fatal());
    }
}

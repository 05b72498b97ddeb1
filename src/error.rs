use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /* mapped errors */
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SetLogger(#[from] log::SetLoggerError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    /* baldur errors */
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Service error: {0}")]
    ServiceError(String),
}

impl ApiError {
    pub fn service_error(msg: impl Into<String>) -> Self {
        Self::ServiceError(msg.into())
    }

    pub fn group_not_found(id: impl Into<String>) -> Self {
        Self::GroupNotFound(id.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("could not check out a database connection: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("database task did not finish: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not encrypt session")]
    Encrypt,
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("token exchange failed: {0}")]
    TokenExchange(reqwest::Error),
    #[error("failed to fetch user info: {0}")]
    UserInfoTransport(reqwest::Error),
    #[error("userinfo responded with status {0}")]
    UserInfoStatus(u16),
    #[error("decode userinfo failed: {0}")]
    UserInfoDecode(reqwest::Error),
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
}

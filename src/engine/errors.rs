use crate::engine::config::NetConfigError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Cannot start I/O thread: {0}")]
    IoThreadSpawn(#[from] std::io::Error),

    #[error("I/O thread is not running")]
    IoThreadGone,

    #[error("Invalid configuration: {0}")]
    Config(#[from] NetConfigError),

    #[error("Cookie store error: {0}")]
    CookieStore(String),

    #[error("Cannot build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Zone already exists")]
    ZoneAlreadyExists,
}

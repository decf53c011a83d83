#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("OIDC {operation} failed (status {status:?}): {detail}")]
    Oidc {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[cfg(feature = "keycloak")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token error: {0}")]
    Token(String),
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Client error: {0}")]
    Client(String),
}

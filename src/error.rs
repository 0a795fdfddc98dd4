use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Everything that can end a credential-acquisition run.
///
/// None of these are retried by the login state machine; the binary decides
/// how to present them.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Account is locked out. Contact your Okta administrator.")]
    AccountLocked,

    #[error("MFA enrollment is required. Sign in to Okta in a browser and enroll a factor first.")]
    MfaEnrollmentRequired,

    #[error("Unknown login status: {0}")]
    UnknownLoginStatus(String),

    #[error("Okta error {code}: {summary}")]
    LoginError { code: String, summary: String },

    #[error("MFA request was denied")]
    MfaDenied,

    #[error("MFA request timed out")]
    MfaTimeout,

    #[error("Timed out waiting for a security key signature")]
    FidoDeviceTimeout,

    #[error("Security key error: {0}")]
    FidoDeviceError(String),

    #[error("No security key found")]
    NoFidoDeviceFound,

    #[error("Unable to parse SAML assertion: {0}")]
    ParseError(String),

    #[error("Unknown AWS partition for SAML consumer URL: {0}")]
    UnknownPartition(String),

    #[error("STS AssumeRoleWithSAML failed ({code}): {message}")]
    ExchangeError { code: String, message: String },

    #[error("Cancelled by user")]
    UserCancelled,

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Unexpected response from identity provider: {0}")]
    Protocol(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    pub fn protocol(message: impl Into<String>) -> Self {
        AuthError::Protocol(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        AuthError::ParseError(message.into())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Protocol(format!("invalid JSON: {}", e))
    }
}

impl From<std::io::Error> for AuthError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::Interrupted {
            AuthError::UserCancelled
        } else {
            AuthError::Prompt(e.to_string())
        }
    }
}

impl From<dialoguer::Error> for AuthError {
    fn from(e: dialoguer::Error) -> Self {
        #[allow(unreachable_patterns)]
        match e {
            dialoguer::Error::IO(io) => io.into(),
            other => AuthError::Prompt(other.to_string()),
        }
    }
}

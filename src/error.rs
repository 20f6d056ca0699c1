use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BulkError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Graph API error: {0}")]
    GraphApiError(String),

    /// HTTP 429 or an equivalent throttling response
    #[error("Request throttled by the service{}", retry_after_suffix(.retry_after))]
    Throttled { retry_after: Option<Duration> },

    #[error("Still throttled after {attempts} attempts: {target}")]
    ThrottleExhausted { target: String, attempts: u32 },

    #[error("Could not establish a directory session: {0}")]
    ConnectionFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Input contains no items to process")]
    EmptyInput,

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Interactive prompt error: {0}")]
    DialoguerError(#[from] dialoguer::Error),

    #[error("Token not found. Please run 'entra-bulk login' first")]
    TokenNotFound,

    #[error("Tenant '{0}' not found")]
    TenantNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BulkError {
    /// True for rate-limit signals that the retrying invoker should absorb
    pub fn is_throttled(&self) -> bool {
        matches!(self, BulkError::Throttled { .. })
    }

    /// Server-supplied Retry-After, when the error carries one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BulkError::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, BulkError>;

pub use BulkError as Error;

/// Parse Graph API error response and provide helpful context
pub fn enhance_graph_error(error_response: &str) -> String {
    if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(error_response) {
        if let Some(error_obj) = error_json.get("error") {
            let code = error_obj
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("Unknown");
            let message = error_obj
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("No message");

            let hint = match code {
                "Unauthorized" | "InvalidAuthenticationToken" => {
                    " (hint: the access token may have expired, run 'entra-bulk login' again)"
                }
                "Forbidden" | "Authorization_RequestDenied" | "InsufficientPrivileges" => {
                    " (hint: check the app registration has User.ReadWrite.All, GroupMember.ReadWrite.All and Policy.ReadWrite.AuthenticationMethod with admin consent)"
                }
                "Request_ResourceNotFound" | "NotFound" => {
                    " (hint: the user or group does not exist, check the identifier)"
                }
                "Request_BadRequest" | "BadRequest" => {
                    if message.contains("already exist") {
                        " (hint: the object is already a member)"
                    } else if message.contains("password") {
                        " (hint: the password does not meet the tenant's complexity policy)"
                    } else {
                        ""
                    }
                }
                _ => "",
            };

            return format!("{}: {}{}", code, message, hint);
        }
    }

    error_response.to_string()
}

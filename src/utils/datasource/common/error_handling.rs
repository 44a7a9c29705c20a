use thiserror::Error;

/// Failure reported by a connector. The variant decides how the tester,
/// introspector and sync engine react to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// Credentials rejected or revoked. Fatal for a sync run.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("timeout")]
    Timeout,

    /// DNS, refused connection, TLS negotiation, dropped socket.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered but could not serve the request right now (5xx, 429).
    #[error("server error: {0}")]
    Protocol(String),

    /// The server answered and rejected the request itself (unknown table, bad query, 4xx).
    #[error("request failed: {0}")]
    Query(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ConnectorError {
    /// Aborts a sync run immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectorError::Auth(_) | ConnectorError::Config(_))
    }

    /// Worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Timeout | ConnectorError::Network(_) | ConnectorError::Protocol(_)
        )
    }

    /// The remote end answered before the failure, so a latency is meaningful.
    pub fn implies_round_trip(&self) -> bool {
        matches!(
            self,
            ConnectorError::Auth(_) | ConnectorError::Protocol(_) | ConnectorError::Query(_)
        )
    }

    /// Classify an HTTP error status from REST, GraphQL, S3 or Google APIs.
    pub fn from_http_status(status: u16, detail: &str) -> Self {
        let detail = truncate(detail.trim(), 300);
        let message = if detail.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, detail)
        };

        match status {
            401 | 403 => ConnectorError::Auth(message),
            408 | 429 | 500..=599 => ConnectorError::Protocol(message),
            _ => ConnectorError::Query(message),
        }
    }
}

impl From<sqlx::Error> for ConnectorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                classify_sqlstate(db_err.code().as_deref(), db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut => ConnectorError::Timeout,
            sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => ConnectorError::Timeout,
            sqlx::Error::Io(io) => ConnectorError::Network(io.to_string()),
            sqlx::Error::Tls(e) => ConnectorError::Network(format!("TLS: {}", e)),
            sqlx::Error::Configuration(e) => ConnectorError::Config(e.to_string()),
            sqlx::Error::Protocol(message) => ConnectorError::Protocol(message),
            other => {
                let message = other.to_string();
                if looks_like_auth_failure(&message) {
                    ConnectorError::Auth(message)
                } else {
                    ConnectorError::Query(message)
                }
            }
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ConnectorError::Timeout;
        }
        if let Some(status) = err.status() {
            return ConnectorError::from_http_status(status.as_u16(), "");
        }
        if err.is_decode() {
            return ConnectorError::Query(format!("unexpected response body: {}", err));
        }
        if err.is_builder() {
            return ConnectorError::Config(err.to_string());
        }
        ConnectorError::Network(err.to_string())
    }
}

/// Map a server-reported SQLSTATE onto the connector taxonomy.
fn classify_sqlstate(code: Option<&str>, message: String) -> ConnectorError {
    match code {
        // invalid_authorization_specification / invalid_password (PostgreSQL),
        // ER_ACCESS_DENIED_ERROR maps to SQLSTATE 28000 on MySQL.
        Some("28000") | Some("28P01") => ConnectorError::Auth(message),
        // too_many_connections, admin_shutdown and friends
        Some("53300") | Some("57P01") | Some("57P03") | Some("08004") => ConnectorError::Protocol(message),
        Some(code) if code.starts_with("08") => ConnectorError::Network(message),
        _ if looks_like_auth_failure(&message) => ConnectorError::Auth(message),
        _ => ConnectorError::Query(message),
    }
}

fn looks_like_auth_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("password authentication failed")
        || lower.contains("access denied")
        || lower.contains("authentication failed")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}

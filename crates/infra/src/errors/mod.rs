//! Conversions from external infrastructure errors into domain errors.

use relay_domain::RelayError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub RelayError);

impl From<InfraError> for RelayError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<RelayError> for InfraError {
    fn from(value: RelayError) -> Self {
        InfraError(value)
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → RelayError */
/* -------------------------------------------------------------------------- */

impl From<reqwest::Error> for InfraError {
    fn from(err: reqwest::Error) -> Self {
        let relay = if err.is_timeout() {
            RelayError::Network(format!("request timed out: {err}"))
        } else if err.is_connect() {
            RelayError::Network(format!("connection error: {err}"))
        } else if err.is_decode() {
            RelayError::InvalidInput(format!("failed to decode response body: {err}"))
        } else if err.is_builder() {
            RelayError::InvalidInput(format!("invalid request: {err}"))
        } else {
            RelayError::Network(err.to_string())
        };
        InfraError(relay)
    }
}

/* -------------------------------------------------------------------------- */
/* rusqlite / r2d2 → RelayError */
/* -------------------------------------------------------------------------- */

impl From<rusqlite::Error> for InfraError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::Error as RE;

        let relay = match err {
            RE::QueryReturnedNoRows => RelayError::NotFound("no rows returned by query".into()),
            RE::SqliteFailure(code, maybe_message) => RelayError::Database(format!(
                "sqlite failure {:?} (code {}): {}",
                code.code,
                code.extended_code,
                maybe_message.unwrap_or_default()
            )),
            RE::FromSqlConversionFailure(_, _, cause) => {
                RelayError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                RelayError::Database(format!("invalid column type: {ty}"))
            }
            other => RelayError::Database(other.to_string()),
        };
        InfraError(relay)
    }
}

impl From<r2d2::Error> for InfraError {
    fn from(err: r2d2::Error) -> Self {
        InfraError(RelayError::Database(format!("connection pool error: {err}")))
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json → RelayError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(err: serde_json::Error) -> Self {
        InfraError(RelayError::InvalidInput(format!("JSON error: {err}")))
    }
}

/* -------------------------------------------------------------------------- */
/* lettre → RelayError */
/* -------------------------------------------------------------------------- */

impl From<lettre::transport::smtp::Error> for InfraError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        let relay = if err.is_permanent() {
            RelayError::InvalidInput(format!("SMTP rejected message: {err}"))
        } else {
            RelayError::Network(format!("SMTP transport error: {err}"))
        };
        InfraError(relay)
    }
}

impl From<lettre::error::Error> for InfraError {
    fn from(err: lettre::error::Error) -> Self {
        InfraError(RelayError::InvalidInput(format!("failed to build message: {err}")))
    }
}

impl From<lettre::address::AddressError> for InfraError {
    fn from(err: lettre::address::AddressError) -> Self {
        InfraError(RelayError::InvalidInput(format!("invalid email address: {err}")))
    }
}

/* -------------------------------------------------------------------------- */
/* imap / native-tls → RelayError */
/* -------------------------------------------------------------------------- */

impl From<imap::Error> for InfraError {
    fn from(err: imap::Error) -> Self {
        use imap::Error as IE;

        let relay = match err {
            IE::Io(io) => RelayError::Network(format!("IMAP I/O error: {io}")),
            IE::ConnectionLost => RelayError::Network("IMAP connection lost".into()),
            IE::No(response) => RelayError::Auth(format!("IMAP command refused: {response}")),
            IE::Bad(response) => RelayError::InvalidInput(format!("IMAP bad command: {response}")),
            other => RelayError::Network(other.to_string()),
        };
        InfraError(relay)
    }
}

impl From<native_tls::Error> for InfraError {
    fn from(err: native_tls::Error) -> Self {
        InfraError(RelayError::Network(format!("TLS error: {err}")))
    }
}

/* -------------------------------------------------------------------------- */
/* chrono / tokio → RelayError */
/* -------------------------------------------------------------------------- */

impl From<chrono::ParseError> for InfraError {
    fn from(err: chrono::ParseError) -> Self {
        InfraError(RelayError::InvalidInput(format!("timestamp parse error: {err}")))
    }
}

impl From<tokio::task::JoinError> for InfraError {
    fn from(err: tokio::task::JoinError) -> Self {
        InfraError(RelayError::Internal(format!("blocking task failed: {err}")))
    }
}

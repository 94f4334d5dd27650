use std::fmt::{self, Display};

use potion::{Error, HtmlError};
use warp::reject::Rejection;

pub struct QueryError {
    info: String,
}

impl QueryError {
    pub fn new(info: String) -> Self {
        Self { info }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::Configuration(e) => Self::new(format!("{e}")),
            sqlx::Error::Database(e) => Self::new(format!("{e}")),
            sqlx::Error::Io(e) => Self::new(format!("{e}")),
            sqlx::Error::Tls(e) => Self::new(format!("{e}")),
            sqlx::Error::Protocol(e) => Self::new(format!("{e}")),
            sqlx::Error::RowNotFound => Self::new(format!("RowNotFound")),
            sqlx::Error::TypeNotFound { type_name } => {
                Self::new(format!("Type not found: {type_name}"))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => {
                Self::new(format!("Column index out of bounds {index} ({len})"))
            }
            sqlx::Error::ColumnNotFound(e) => Self::new(format!("{e}")),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::new(format!("Column decode {index} ({source})"))
            }
            sqlx::Error::Decode(e) => Self::new(format!("{e}")),
            sqlx::Error::AnyDriverError(e) => Self::new(format!("{e}")),
            sqlx::Error::PoolTimedOut => Self::new(format!("Pool timed out")),
            sqlx::Error::PoolClosed => Self::new(format!("Pool closed")),
            sqlx::Error::WorkerCrashed => Self::new(format!("Worker crashed")),
            sqlx::Error::Migrate(e) => Self::new(format!("{e}")),
            _ => Self::new(format!("Unknown error")),
        }
    }
}

impl Into<Error> for QueryError {
    fn into(self) -> Error {
        log::error!("Query failed: {}", self.info);
        Error {
            code: 500,
            info: Some(self.info),
            redirect: None,
        }
    }
}

#[derive(Debug)]
pub struct TypeError {
    info: String,
}

impl TypeError {
    pub fn new(info: &str) -> Self {
        Self {
            info: info.to_string(),
        }
    }
}

impl Into<potion::Error> for TypeError {
    fn into(self) -> potion::Error {
        HtmlError::InvalidRequest.new(&self.info)
    }
}

impl Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.info)
    }
}

impl std::error::Error for TypeError {}
impl Into<Rejection> for TypeError {
    fn into(self) -> Rejection {
        HtmlError::InvalidRequest.new(&self.info).into()
    }
}

/// Rule violations raised by the recipe and membership layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    Validation { field: &'static str, message: String },
    AlreadyExists(String),
    SelfReference(String),
    NotFound(String),
    Permission(String),
}

impl DomainError {
    pub fn validation(field: &'static str, message: &str) -> Self {
        Self::Validation {
            field,
            message: message.to_string(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::NotFound(message.to_string())
    }

    pub fn status(&self) -> u16 {
        match self {
            DomainError::Validation { .. } => 400,
            DomainError::AlreadyExists(_) => 400,
            DomainError::SelfReference(_) => 400,
            DomainError::NotFound(_) => 404,
            DomainError::Permission(_) => 403,
        }
    }
}

impl Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::Validation { field, message } => write!(f, "{field}: {message}"),
            DomainError::AlreadyExists(message)
            | DomainError::SelfReference(message)
            | DomainError::NotFound(message)
            | DomainError::Permission(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for DomainError {}

impl From<DomainError> for Error {
    fn from(value: DomainError) -> Self {
        Error {
            code: value.status().into(),
            info: Some(value.to_string()),
            redirect: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(DomainError::validation("tags", "duplicate entries").status(), 400);
        assert_eq!(DomainError::AlreadyExists(String::new()).status(), 400);
        assert_eq!(DomainError::SelfReference(String::new()).status(), 400);
        assert_eq!(DomainError::not_found("no such membership").status(), 404);
        assert_eq!(DomainError::Permission(String::new()).status(), 403);
    }

    #[test]
    fn validation_message_names_the_field() {
        let error = DomainError::validation("ingredients", "duplicate entries");
        assert_eq!(error.to_string(), "ingredients: duplicate entries");
    }
}

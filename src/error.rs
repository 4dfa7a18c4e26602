use std::sync::Arc;

use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to initialize cache store (connection is not provided)")]
    NoConnectionSource,

    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed access to metadata for detect database dialect")]
    DialectResolution(#[source] Box<StoreError>),

    /// Permanent initialization failure. Every caller waiting on the initialization gets a handle to the same cause.
    #[error("Cache store was not properly initialized")]
    Initialization(#[source] Arc<StoreError>),

    #[error("Failed to find mapping description for key: {key} in cache: {cache}")]
    MappingNotFound { key: String, cache: String },

    #[error("Invalid mapping for type '{type_name}': {reason}")]
    InvalidMapping { type_name: String, reason: String },

    #[error("Failed to extract field '{field}' from object of type '{type_name}': {reason}")]
    FieldExtraction {
        type_name: String,
        field:     String,
        reason:    String,
    },

    #[error("Failed to build object of type '{type_name}' from result row: {reason}")]
    RowMapping { type_name: String, reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection is already closed")]
    ConnectionClosed,

    #[error("Expected even number of arguments, but found: {0}")]
    InvalidArguments(usize),

    #[error("Load worker failed: {0}")]
    Task(String),

    #[error("{context}")]
    Load {
        context: String,
        #[source]
        source:  Box<StoreError>,
    },

    #[error("{context}")]
    Write {
        context: String,
        #[source]
        source:  Box<StoreError>,
    },

    #[error("{context}")]
    Delete {
        context: String,
        #[source]
        source:  Box<StoreError>,
    },

    #[error("Failed to end transaction [xid={xid}, commit={commit}]")]
    TxEnd {
        xid:    String,
        commit: bool,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn load<S: ToString>(context: S, source: StoreError) -> Self {
        Self::Load {
            context: context.to_string(),
            source:  Box::new(source),
        }
    }

    pub fn write<S: ToString>(context: S, source: StoreError) -> Self {
        Self::Write {
            context: context.to_string(),
            source:  Box::new(source),
        }
    }

    pub fn delete<S: ToString>(context: S, source: StoreError) -> Self {
        Self::Delete {
            context: context.to_string(),
            source:  Box::new(source),
        }
    }

    /// Walk down the chain of context wrappers to the error that actually caused the failure.
    pub fn root_cause(&self) -> &StoreError {
        match self {
            Self::Load { source, .. }
            | Self::Write { source, .. }
            | Self::Delete { source, .. }
            | Self::TxEnd { source, .. }
            | Self::DialectResolution(source) => source.root_cause(),
            Self::Initialization(source) => source.root_cause(),
            _ => self,
        }
    }
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

impl From<garde::Report> for StoreError {
    fn from(report: garde::Report) -> Self {
        Self::InvalidConfig(report.to_string())
    }
}

//! Error types for the gateway.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Blast error: {0}")]
    Blast(#[from] BlastError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outbound channel (transport/provider) errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Provider rejected send ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Conversation flow errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Flow {id} not found")]
    NotFound { id: Uuid },

    #[error("Flow {id} does not belong to this owner")]
    Forbidden { id: Uuid },

    #[error("No active flow for owner {owner_id}")]
    NoActiveFlow { owner_id: Uuid },

    #[error("Unsupported inbound message type: {kind}")]
    UnsupportedMessageType { kind: String },

    #[error("Node {node_id} has an unsupported content variant: {reason}")]
    UnsupportedNodeVariant { node_id: String, reason: String },

    #[error("Invalid flow definition: {0}")]
    Validation(String),
}

/// Message quota errors.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Owner {owner_id} has no active package")]
    NoActivePackage { owner_id: Uuid },

    #[error("Message quota exhausted for owner {owner_id}")]
    Exhausted { owner_id: Uuid },
}

/// Blast campaign errors.
#[derive(Debug, thiserror::Error)]
pub enum BlastError {
    #[error("Blast {id} not found")]
    NotFound { id: Uuid },

    #[error("Blast {id} does not belong to this owner")]
    Forbidden { id: Uuid },

    #[error("Blast {id} cannot be {action} while {status}")]
    InvalidState {
        id: Uuid,
        status: String,
        action: &'static str,
    },

    #[error("Blast {id} is scheduled for {scheduled_at}, not due yet")]
    NotYetDue {
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    },

    #[error("Invalid blast definition: {0}")]
    Validation(String),

    #[error("No channel account configured for owner {owner_id}")]
    NoChannelAccount { owner_id: Uuid },
}

/// Template errors.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template {id} not found")]
    NotFound { id: Uuid },

    #[error("Template {id} does not belong to this owner")]
    Forbidden { id: Uuid },

    #[error("Template {id} is {status}, only approved templates can be sent")]
    NotApproved { id: Uuid, status: String },

    #[error("Template {id} has not been submitted to the provider")]
    NotSubmitted { id: Uuid },
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;

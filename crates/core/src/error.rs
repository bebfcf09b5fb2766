//! Centralized error types for the force-rotation workspace.

use thiserror::Error;

/// Top-level error enum. Variants map to subsystems.
///
/// None of these are fatal to the host: every caller that receives one logs
/// it and degrades instead of crashing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RotationError {
    /// The configuration source could not be read. The previous allow-list
    /// stays in effect.
    #[error("Configuration fetch failed: {0}")]
    Fetch(String),

    /// Subscribing to (or unsubscribing from) a notification source failed.
    #[error("Registration failed: {0}")]
    Registration(String),

    /// The overlay carrier rejected a create, update, or remove.
    #[error("Overlay carrier error: {0}")]
    Carrier(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A refresh finished after the service started stopping; its result was discarded.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type RotationResult<T> = Result<T, RotationError>;

use thiserror::Error;

use crate::constraints::ConstraintViolation;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// No usable performance feature exists for the player, even after peer imputation.
    #[error("insufficient data to score player {player_id}: {reason}")]
    InsufficientData { player_id: u32, reason: String },

    /// The input squad breaks a roster rule before any search starts.
    #[error("invalid squad: {0}")]
    InvalidSquad(ConstraintViolation),

    #[error("player {0} is not in the snapshot")]
    UnknownPlayer(u32),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid weight profile: {0}")]
    InvalidWeights(String),

    #[error("invalid gameweek range: {0}")]
    InvalidRange(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn insufficient_data(player_id: u32, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            player_id,
            reason: reason.into(),
        }
    }

    pub fn invalid_weights(msg: impl Into<String>) -> Self {
        Self::InvalidWeights(msg.into())
    }
}

use data_loader::UserId;
use thiserror::Error;

/// Failures of the scoring models
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Not enough signal to train on (empty matrix, empty vocabulary)
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A score was requested before a successful fit
    #[error("{model} model is not ready")]
    NotReady { model: &'static str },

    /// The user has no row in this generation's mapping
    #[error("User {user_id} is unknown to the collaborative model")]
    UnknownUser { user_id: UserId },

    /// Factorization diverged or produced non-finite values
    #[error("Factorization failed: {0}")]
    Factorization(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;

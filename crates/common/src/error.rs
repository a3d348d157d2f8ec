use thiserror::Error;

use crate::FundingCategory;

#[derive(Debug, Error)]
pub enum Error {
    #[error("API secret is not valid base64")]
    InvalidCredentialFormat,

    #[error("Exchange rejected the API credentials: {message}")]
    AuthenticationRejected { message: String },

    #[error("No payment method of type '{category}' is linked (available: {available:?})")]
    FundingSourceNotFound {
        category: FundingCategory,
        available: Vec<String>,
    },

    #[error("Insufficient funds in the fiat wallet: {message}")]
    InsufficientFunds { message: String },

    #[error("Order reply carried no order id: {response}")]
    OrderPlacementFailed { response: String },

    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

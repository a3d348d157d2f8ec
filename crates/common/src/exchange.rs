use async_trait::async_trait;

use crate::{
    DepositRequest, DepositResult, Error, OrderRequest, OrderSnapshot, PaymentMethod, PlacedOrder,
    Result,
};

/// Abstraction over the exchange's private API.
///
/// `CoinbaseClient` implements this for live use.
/// `PaperClient` implements this for simulation.
///
/// Transport failures come back as `Err`. Anything the exchange itself
/// answered, including refusals, comes back as a [`Reply`].
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// List the payment methods linked to the account.
    async fn payment_methods(&self) -> Result<Reply<Vec<PaymentMethod>>>;

    /// Move fiat from a payment method into the trading wallet.
    async fn deposit(&self, request: &DepositRequest) -> Result<Reply<DepositResult>>;

    /// Submit a market order.
    async fn place_market_order(&self, order: &OrderRequest) -> Result<Reply<PlacedOrder>>;

    /// Fetch the current state of an order.
    async fn order(&self, order_id: &str) -> Result<Reply<OrderSnapshot>>;
}

/// Outcome of a call the exchange answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Accepted(T),
    Rejected(Rejection),
}

impl<T> Reply<T> {
    /// Unwrap an accepted reply, turning a rejection into its typed error.
    pub fn into_result(self) -> Result<T> {
        match self {
            Reply::Accepted(value) => Ok(value),
            Reply::Rejected(rejection) => Err(rejection.into_error()),
        }
    }
}

/// A refusal reported by the exchange, with its original message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    InvalidCredentials,
    InsufficientFunds,
    Other,
}

/// Messages Coinbase Pro sends when it refuses the request signature.
const CREDENTIAL_MESSAGES: [&str; 3] = ["invalid api key", "invalid passphrase", "invalid signature"];
const INSUFFICIENT_FUNDS_MESSAGE: &str = "insufficient funds";

impl Rejection {
    /// Classify an exchange error message. Matching is exact apart from case
    /// and surrounding whitespace.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let normalized = message.trim().to_lowercase();
        let kind = if CREDENTIAL_MESSAGES.contains(&normalized.as_str()) {
            RejectionKind::InvalidCredentials
        } else if normalized == INSUFFICIENT_FUNDS_MESSAGE {
            RejectionKind::InsufficientFunds
        } else {
            RejectionKind::Other
        };
        Self { kind, message }
    }

    pub fn into_error(self) -> Error {
        match self.kind {
            RejectionKind::InvalidCredentials => Error::AuthenticationRejected {
                message: self.message,
            },
            RejectionKind::InsufficientFunds => Error::InsufficientFunds {
                message: self.message,
            },
            RejectionKind::Other => Error::Exchange(self.message),
        }
    }
}

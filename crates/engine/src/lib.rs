pub mod coinbase;
pub mod deposit;
pub mod executor;
pub mod settlement;

pub use coinbase::CoinbaseClient;
pub use deposit::Depositor;
pub use executor::OrderExecutor;
pub use settlement::{SettlementPolicy, Sleeper, TokioSleeper};

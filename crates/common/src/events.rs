use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::FundingCategory;

/// Severity of a workflow event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventLevel {
    Debug,
    Info,
}

/// Structured narration emitted by the deposit and buy workflows.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    PaymentMethodsListed {
        count: usize,
    },
    FundingSourceMatched {
        id: String,
        name: String,
        remaining_limit: Option<f64>,
    },
    /// More than one payment method shares the category; the first was used.
    FundingSourceAmbiguous {
        category: FundingCategory,
        skipped: usize,
    },
    Deposited {
        amount: f64,
        currency: String,
        source_name: String,
        payout_at: Option<DateTime<Utc>>,
    },
    OrderPlaced {
        order_id: String,
        product_id: String,
        funds: f64,
    },
    SettlementPending {
        order_id: String,
        attempt: u32,
        wait: Duration,
    },
    OrderFilled {
        product_id: String,
        funds: f64,
        fiat_currency: String,
        base_currency: String,
        filled_size: f64,
        fill_fees: f64,
        settled: bool,
    },
}

impl WorkflowEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            WorkflowEvent::Deposited { .. } | WorkflowEvent::OrderFilled { .. } => EventLevel::Info,
            _ => EventLevel::Debug,
        }
    }
}

/// Receiver for workflow events. The workflows never configure output
/// themselves; whoever drives them decides where events go.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: WorkflowEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: WorkflowEvent) {
        match event {
            WorkflowEvent::PaymentMethodsListed { count } => {
                debug!(count, "Fetched payment methods");
            }
            WorkflowEvent::FundingSourceMatched {
                id,
                name,
                remaining_limit,
            } => {
                debug!(%id, %name, ?remaining_limit, "Payment method selected");
            }
            WorkflowEvent::FundingSourceAmbiguous { category, skipped } => {
                debug!(%category, skipped, "Several payment methods share this type, using the first");
            }
            WorkflowEvent::Deposited {
                amount,
                currency,
                source_name,
                payout_at,
            } => {
                info!(amount, %currency, source = %source_name, "Deposited {amount} {currency} to Coinbase Pro from {source_name}");
                match payout_at {
                    Some(at) => info!(payout_at = %at, "Deposit will be available at {at}"),
                    None => info!("Exchange did not report when the deposit becomes available"),
                }
            }
            WorkflowEvent::OrderPlaced {
                order_id,
                product_id,
                funds,
            } => {
                debug!(%order_id, %product_id, funds, "Market buy accepted");
            }
            WorkflowEvent::SettlementPending {
                order_id,
                attempt,
                wait,
            } => {
                debug!(%order_id, attempt, ?wait, "Order not settled yet, waiting");
            }
            WorkflowEvent::OrderFilled {
                product_id,
                funds,
                fiat_currency,
                base_currency,
                filled_size,
                fill_fees,
                settled,
            } => {
                info!(%product_id, settled, "Bought {funds} {fiat_currency} of {base_currency}, resulting in {filled_size} {base_currency}");
                info!(%product_id, fill_fees, "Fees: {fill_fees} {fiat_currency}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_info_and_progress_is_debug() {
        let deposited = WorkflowEvent::Deposited {
            amount: 100.0,
            currency: "USD".into(),
            source_name: "Checking".into(),
            payout_at: None,
        };
        let pending = WorkflowEvent::SettlementPending {
            order_id: "o1".into(),
            attempt: 1,
            wait: Duration::from_secs(30),
        };

        assert_eq!(deposited.level(), EventLevel::Info);
        assert_eq!(pending.level(), EventLevel::Debug);
        assert_eq!(
            WorkflowEvent::PaymentMethodsListed { count: 2 }.level(),
            EventLevel::Debug
        );
    }
}

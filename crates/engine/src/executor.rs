use std::sync::Arc;

use tracing::{error, warn};

use common::{
    Error, EventSink, ExchangeClient, OrderRequest, OrderSnapshot, RejectionKind, Reply, Result,
    TradingPair, WorkflowEvent,
};

use crate::settlement::{SettlementPolicy, Sleeper, TokioSleeper};

/// Places a market buy sized in fiat and reads back how it filled.
///
/// The returned snapshot may still be unsettled if the exchange did not
/// finish matching within the [`SettlementPolicy`]; callers that need a
/// guarantee must check `settled` themselves.
pub struct OrderExecutor {
    client: Arc<dyn ExchangeClient>,
    sink: Arc<dyn EventSink>,
    sleeper: Arc<dyn Sleeper>,
    policy: SettlementPolicy,
}

impl OrderExecutor {
    pub fn new(client: Arc<dyn ExchangeClient>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            client,
            sink,
            sleeper: Arc::new(TokioSleeper),
            policy: SettlementPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SettlementPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Buy `amount` of `fiat_currency` worth of `pair`.
    pub async fn buy(
        &self,
        pair: &TradingPair,
        amount: f64,
        fiat_currency: &str,
    ) -> Result<OrderSnapshot> {
        let product_id = pair.product_id();
        let request = OrderRequest::market_buy(&product_id, amount);

        let placed = match self.client.place_market_order(&request).await? {
            Reply::Accepted(placed) => placed,
            // Any refusal other than credentials or balance leaves no order to track.
            Reply::Rejected(rejection) => {
                let err = match rejection.kind {
                    RejectionKind::Other => Error::OrderPlacementFailed {
                        response: rejection.message,
                    },
                    _ => rejection.into_error(),
                };
                error!(product = %product_id, error = %err, "Order refused");
                return Err(err);
            }
        };

        let Some(order_id) = placed.id.clone() else {
            let response = serde_json::to_string(&placed)?;
            error!(product = %product_id, %response, "Order reply had no id");
            return Err(Error::OrderPlacementFailed { response });
        };
        self.sink.emit(WorkflowEvent::OrderPlaced {
            order_id: order_id.clone(),
            product_id: product_id.clone(),
            funds: amount,
        });

        let snapshot = self.await_settlement(&order_id).await?;
        if !snapshot.settled {
            warn!(%order_id, status = ?snapshot.status, "Order still unsettled, reporting last snapshot");
        }

        self.sink.emit(WorkflowEvent::OrderFilled {
            product_id,
            funds: amount,
            fiat_currency: fiat_currency.to_string(),
            base_currency: pair.base.clone(),
            filled_size: snapshot.filled_size,
            fill_fees: snapshot.fill_fees,
            settled: snapshot.settled,
        });

        Ok(snapshot)
    }

    async fn await_settlement(&self, order_id: &str) -> Result<OrderSnapshot> {
        self.sleeper.sleep(self.policy.initial_wait).await;
        let mut snapshot = self.fetch(order_id).await?;

        let mut attempt = 0;
        while !snapshot.settled && attempt < self.policy.max_refetches {
            attempt += 1;
            let wait = self.policy.retry_delay(attempt);
            self.sink.emit(WorkflowEvent::SettlementPending {
                order_id: order_id.to_string(),
                attempt,
                wait,
            });
            self.sleeper.sleep(wait).await;
            snapshot = self.fetch(order_id).await?;
        }

        Ok(snapshot)
    }

    async fn fetch(&self, order_id: &str) -> Result<OrderSnapshot> {
        self.client.order(order_id).await?.into_result()
    }
}

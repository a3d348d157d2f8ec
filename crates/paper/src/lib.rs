use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    DepositRequest, DepositResult, ExchangeClient, FundingCategory, Money, OrderRequest,
    OrderSnapshot, PaymentLimit, PaymentLimits, PaymentMethod, PlacedOrder, Rejection, Reply,
    Result,
};

/// Coinbase Pro taker fee for the lowest volume tier.
const TAKER_FEE_RATE: f64 = 0.005;
/// Status fetches that report an order as unsettled before it settles.
const UNSETTLED_FETCHES: u32 = 1;

pub const PAPER_BANK_ID: &str = "paper-ach";

/// Simulated exchange for dry runs.
///
/// Holds one linked bank account and an in-memory wallet. Market buys fill
/// at the latest known price with configurable slippage and the taker fee,
/// and settle one status fetch after placement. Nothing is sent to Coinbase.
pub struct PaperClient {
    fiat_currency: String,
    /// Wallet balances keyed by currency.
    balances: Arc<RwLock<HashMap<String, f64>>>,
    /// Latest known price per product, updated via `update_price`.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    orders: Arc<RwLock<HashMap<String, PaperOrder>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

struct PaperOrder {
    snapshot: OrderSnapshot,
    fetches: u32,
}

impl PaperClient {
    pub fn new(fiat_currency: impl Into<String>, initial_balance: f64, slippage_bps: f64) -> Self {
        let fiat_currency = fiat_currency.into();
        info!(
            balance = initial_balance,
            currency = %fiat_currency,
            slippage_bps = slippage_bps,
            "PaperClient initialized"
        );
        let balances = HashMap::from([(fiat_currency.clone(), initial_balance)]);
        Self {
            fiat_currency,
            balances: Arc::new(RwLock::new(balances)),
            prices: Arc::new(RwLock::new(HashMap::new())),
            orders: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
        }
    }

    /// Update the latest price for a product such as `BTC-USD`.
    pub async fn update_price(&self, product_id: &str, price: f64) {
        self.prices
            .write()
            .await
            .insert(product_id.to_string(), price);
    }

    pub async fn balance(&self, currency: &str) -> f64 {
        self.balances
            .read()
            .await
            .get(currency)
            .copied()
            .unwrap_or(0.0)
    }

    fn bank_account(&self) -> PaymentMethod {
        PaymentMethod {
            id: PAPER_BANK_ID.to_string(),
            category: FundingCategory::AchBankAccount,
            name: "Paper Bank ****0000".to_string(),
            currency: Some(self.fiat_currency.clone()),
            limits: Some(PaymentLimits {
                deposit: vec![PaymentLimit {
                    period_in_days: Some(7),
                    total: None,
                    remaining: Some(Money {
                        amount: 25_000.0,
                        currency: self.fiat_currency.clone(),
                    }),
                }],
            }),
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn payment_methods(&self) -> Result<Reply<Vec<PaymentMethod>>> {
        Ok(Reply::Accepted(vec![self.bank_account()]))
    }

    async fn deposit(&self, request: &DepositRequest) -> Result<Reply<DepositResult>> {
        if request.payment_method_id != PAPER_BANK_ID {
            return Ok(Reply::Rejected(Rejection::from_message(
                "payment method not found",
            )));
        }

        *self
            .balances
            .write()
            .await
            .entry(request.currency.clone())
            .or_insert(0.0) += request.amount;
        debug!(amount = request.amount, currency = %request.currency, "Paper deposit credited");

        Ok(Reply::Accepted(DepositResult {
            id: uuid::Uuid::new_v4().to_string(),
            amount: request.amount,
            currency: request.currency.clone(),
            payout_at: Some(Utc::now()),
            ..DepositResult::default()
        }))
    }

    async fn place_market_order(&self, order: &OrderRequest) -> Result<Reply<PlacedOrder>> {
        let Some((base, quote)) = order.product_id.split_once('-') else {
            return Ok(Reply::Rejected(Rejection::from_message(format!(
                "Invalid product_id {}",
                order.product_id
            ))));
        };
        let Some(mid_price) = self.prices.read().await.get(&order.product_id).copied() else {
            return Ok(Reply::Rejected(Rejection::from_message(format!(
                "PaperClient has no price for '{}'",
                order.product_id
            ))));
        };

        let mut balances = self.balances.write().await;
        let available = balances.get(quote).copied().unwrap_or(0.0);
        if order.funds > available {
            return Ok(Reply::Rejected(Rejection::from_message("Insufficient funds")));
        }

        // Buys pay more
        let fill_price = mid_price * (1.0 + self.slippage_bps / 10_000.0);
        let fill_fees = order.funds * TAKER_FEE_RATE;
        let executed_value = order.funds - fill_fees;
        let filled_size = executed_value / fill_price;

        *balances.entry(quote.to_string()).or_insert(0.0) -= order.funds;
        *balances.entry(base.to_string()).or_insert(0.0) += filled_size;
        drop(balances);

        let id = uuid::Uuid::new_v4().to_string();
        debug!(
            product = %order.product_id,
            mid = mid_price,
            fill = fill_price,
            size = filled_size,
            "Paper fill simulated"
        );

        self.orders.write().await.insert(
            id.clone(),
            PaperOrder {
                snapshot: OrderSnapshot {
                    id: id.clone(),
                    product_id: Some(order.product_id.clone()),
                    status: Some("done".to_string()),
                    settled: true,
                    filled_size,
                    fill_fees,
                    executed_value,
                    ..OrderSnapshot::default()
                },
                fetches: 0,
            },
        );

        let mut extra = serde_json::Map::new();
        extra.insert("product_id".into(), json!(order.product_id));
        extra.insert("side".into(), json!(order.side));
        extra.insert("status".into(), json!("pending"));
        Ok(Reply::Accepted(PlacedOrder {
            id: Some(id),
            extra,
        }))
    }

    async fn order(&self, order_id: &str) -> Result<Reply<OrderSnapshot>> {
        let mut orders = self.orders.write().await;
        let Some(order) = orders.get_mut(order_id) else {
            return Ok(Reply::Rejected(Rejection::from_message("NotFound")));
        };

        order.fetches += 1;
        if order.fetches <= UNSETTLED_FETCHES {
            return Ok(Reply::Accepted(OrderSnapshot {
                id: order.snapshot.id.clone(),
                product_id: order.snapshot.product_id.clone(),
                status: Some("pending".to_string()),
                ..OrderSnapshot::default()
            }));
        }
        Ok(Reply::Accepted(order.snapshot.clone()))
    }
}

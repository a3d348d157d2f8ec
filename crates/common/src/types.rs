use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a linked payment method, as reported in the `type` field of
/// Coinbase's `/payment-methods` listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingCategory {
    AchBankAccount,
    FiatAccount,
    BankWire,
    SepaBankAccount,
    /// Anything this tool cannot deposit from (cards, PayPal, ...). Never
    /// matches a requested category.
    #[default]
    #[serde(other)]
    Unsupported,
}

impl FundingCategory {
    /// Categories accepted on the command line.
    pub const SELECTABLE: [FundingCategory; 4] = [
        FundingCategory::AchBankAccount,
        FundingCategory::FiatAccount,
        FundingCategory::BankWire,
        FundingCategory::SepaBankAccount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FundingCategory::AchBankAccount => "ach_bank_account",
            FundingCategory::FiatAccount => "fiat_account",
            FundingCategory::BankWire => "bank_wire",
            FundingCategory::SepaBankAccount => "sepa_bank_account",
            FundingCategory::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for FundingCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FundingCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::SELECTABLE
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let choices: Vec<&str> = Self::SELECTABLE.iter().map(|c| c.as_str()).collect();
                format!("unknown funding method '{s}', expected one of: {}", choices.join(", "))
            })
    }
}

/// A funding source registered on the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    #[serde(rename = "type", default)]
    pub category: FundingCategory,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub limits: Option<PaymentLimits>,
}

impl PaymentMethod {
    /// Remaining amount of the first deposit limit window, if the exchange
    /// reported one.
    pub fn remaining_deposit_limit(&self) -> Option<f64> {
        self.limits
            .as_ref()
            .and_then(|l| l.deposit.first())
            .and_then(|d| d.remaining.as_ref())
            .map(|m| m.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PaymentLimits {
    #[serde(default)]
    pub deposit: Vec<PaymentLimit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLimit {
    #[serde(default)]
    pub period_in_days: Option<u32>,
    #[serde(default)]
    pub total: Option<Money>,
    #[serde(default)]
    pub remaining: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    #[serde(with = "amount")]
    pub amount: f64,
    pub currency: String,
}

/// Transfer from a payment method into the fiat wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositRequest {
    #[serde(with = "amount")]
    pub amount: f64,
    pub currency: String,
    pub payment_method_id: String,
}

/// Confirmation returned by the exchange for an initiated deposit. Fields
/// not modelled here are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DepositResult {
    pub id: String,
    #[serde(default, with = "amount")]
    pub amount: f64,
    #[serde(default)]
    pub currency: String,
    /// When the deposited funds become available for trading.
    #[serde(default)]
    pub payout_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
}

/// A market order sized in quote-currency funds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub product_id: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(with = "amount")]
    pub funds: f64,
}

impl OrderRequest {
    pub fn market_buy(product_id: impl Into<String>, funds: f64) -> Self {
        Self {
            product_id: product_id.into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            funds,
        }
    }
}

/// Immediate reply to an order placement. The exchange may accept the call
/// and still omit the identifier, so `id` stays optional here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlacedOrder {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Point-in-time view of an order, as returned by `GET /orders/{id}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderSnapshot {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub settled: bool,
    /// Base currency received.
    #[serde(default, with = "amount")]
    pub filled_size: f64,
    /// Fees charged, in quote currency.
    #[serde(default, with = "amount")]
    pub fill_fees: f64,
    #[serde(default, with = "amount")]
    pub executed_value: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A `BASE-QUOTE` product identifier such as `BTC-USD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn product_id(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

impl std::fmt::Display for TradingPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('-')
            .ok_or_else(|| format!("pair '{s}' must look like BASE-QUOTE, e.g. BTC-USD"))?;
        if base.is_empty() || quote.is_empty() || quote.contains('-') {
            return Err(format!("pair '{s}' must look like BASE-QUOTE, e.g. BTC-USD"));
        }
        Ok(Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        })
    }
}

/// Whether the tool talks to the real exchange or simulates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Coinbase encodes amounts as decimal strings; accept bare numbers too.
pub mod amount {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_method_parses_coinbase_listing() {
        let body = r#"{
            "id": "bc6d7162-d984-5ffa-963c-a493b1c1370b",
            "type": "ach_bank_account",
            "name": "Bank of America - eBan... ********7134",
            "currency": "USD",
            "primary_buy": true,
            "allow_deposit": true,
            "limits": {
                "deposit": [{
                    "period_in_days": 7,
                    "total": { "amount": "10000.00", "currency": "USD" },
                    "remaining": { "amount": "9765.00", "currency": "USD" }
                }]
            }
        }"#;
        let method: PaymentMethod = serde_json::from_str(body).unwrap();
        assert_eq!(method.category, FundingCategory::AchBankAccount);
        assert_eq!(method.remaining_deposit_limit(), Some(9765.0));
    }

    #[test]
    fn listing_tolerates_sparse_records() {
        let body = r#"[
            { "id": "c1", "type": "credit_card", "limits": { "deposit": [{ "period_in_days": 1 }] } },
            { "id": "x1" },
            { "id": "m1", "type": "ach_bank_account", "name": "Checking" }
        ]"#;
        let methods: Vec<PaymentMethod> = serde_json::from_str(body).unwrap();
        assert_eq!(methods.len(), 3);
        assert_eq!(methods[0].name, "");
        assert_eq!(methods[0].remaining_deposit_limit(), None);
        assert_eq!(methods[1].category, FundingCategory::Unsupported);
        assert_eq!(methods[2].category, FundingCategory::AchBankAccount);
    }

    #[test]
    fn deposit_result_keeps_unmodelled_fields() {
        let body = r#"{
            "id": "d1",
            "amount": "10.00",
            "currency": "USD",
            "payout_at": "2016-08-20T00:31:09Z",
            "fee": "0.00",
            "status": "created"
        }"#;
        let result: DepositResult = serde_json::from_str(body).unwrap();
        assert_eq!(result.amount, 10.0);
        assert_eq!(result.extra["fee"], "0.00");
        assert_eq!(result.extra["status"], "created");

        let back = serde_json::to_value(&result).unwrap();
        assert_eq!(back["fee"], "0.00");
        assert_eq!(back["status"], "created");
    }

    #[test]
    fn order_snapshot_keeps_unmodelled_fields() {
        let body = r#"{"id": "o1", "settled": true, "done_reason": "filled", "side": "buy"}"#;
        let snap: OrderSnapshot = serde_json::from_str(body).unwrap();
        assert!(snap.settled);
        assert_eq!(snap.extra["done_reason"], "filled");
        assert_eq!(snap.extra["side"], "buy");
    }

    #[test]
    fn unknown_payment_type_is_unsupported() {
        let body = r#"{"id": "c1", "type": "credit_card", "name": "Visa"}"#;
        let method: PaymentMethod = serde_json::from_str(body).unwrap();
        assert_eq!(method.category, FundingCategory::Unsupported);
        assert_eq!(method.remaining_deposit_limit(), None);
    }

    #[test]
    fn funding_category_from_str_rejects_unsupported() {
        assert_eq!(
            "ach_bank_account".parse::<FundingCategory>().unwrap(),
            FundingCategory::AchBankAccount
        );
        assert!("unsupported".parse::<FundingCategory>().is_err());
        assert!("credit_card".parse::<FundingCategory>().is_err());
    }

    #[test]
    fn market_buy_serializes_funds_as_string() {
        let order = OrderRequest::market_buy("BTC-USD", 100.0);
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["type"], "market");
        assert_eq!(json["side"], "buy");
        assert_eq!(json["product_id"], "BTC-USD");
        assert_eq!(json["funds"], "100");
    }

    #[test]
    fn unsettled_snapshot_defaults_fill_fields() {
        let snap: OrderSnapshot = serde_json::from_str(r#"{"settled": false}"#).unwrap();
        assert!(!snap.settled);
        assert_eq!(snap.filled_size, 0.0);
        assert_eq!(snap.fill_fees, 0.0);
    }

    #[test]
    fn placed_order_without_id_keeps_other_fields() {
        let placed: PlacedOrder = serde_json::from_str(r#"{"status": "pending"}"#).unwrap();
        assert!(placed.id.is_none());
        assert_eq!(placed.extra["status"], "pending");
    }

    #[test]
    fn trading_pair_parses_and_normalizes_case() {
        let pair: TradingPair = "btc-usd".parse().unwrap();
        assert_eq!(pair.base, "BTC");
        assert_eq!(pair.quote, "USD");
        assert_eq!(pair.product_id(), "BTC-USD");
        assert!("BTCUSD".parse::<TradingPair>().is_err());
        assert!("-USD".parse::<TradingPair>().is_err());
    }
}

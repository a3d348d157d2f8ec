use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use common::{
    Config, EventSink, ExchangeClient, FundingCategory, TracingSink, TradingMode, TradingPair,
};
use engine::{CoinbaseClient, Depositor, OrderExecutor, SettlementPolicy};
use paper::PaperClient;

/// Deposit fiat into Coinbase Pro, or market-buy a pair with the wallet
/// balance, without paying recurring-buy fees.
#[derive(Parser, Debug)]
#[command(
    name = "autobuy",
    about = "autobuy --amount 100 --buy --cryptocurrency BTC-USD",
    group(ArgGroup::new("action").required(true).args(["deposit", "buy"]))
)]
struct Args {
    /// Amount to deposit or buy (in fiat).
    #[arg(long, value_parser = parse_amount)]
    amount: f64,

    /// Fiat currency to use.
    #[arg(long, alias = "fiat_currency", default_value = "USD")]
    fiat_currency: String,

    /// Pair to buy, e.g. BTC-USD (fiat pairs only).
    #[arg(long)]
    cryptocurrency: Option<TradingPair>,

    /// Payment method type to deposit from (ach_bank_account, fiat_account,
    /// bank_wire, sepa_bank_account).
    #[arg(long, alias = "funding_method")]
    funding_method: Option<FundingCategory>,

    /// Deposit the amount into the Coinbase Pro wallet.
    #[arg(long, requires = "funding_method")]
    deposit: bool,

    /// Buy the amount worth of the pair.
    #[arg(long, requires = "cryptocurrency")]
    buy: bool,

    /// Log debug output to stdout instead of the log file.
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, PartialEq)]
enum Action {
    Deposit(FundingCategory),
    Buy(TradingPair),
}

impl Args {
    fn fiat(&self) -> String {
        self.fiat_currency.to_uppercase()
    }

    fn action(&self) -> anyhow::Result<Action> {
        match (self.deposit, self.buy) {
            (true, false) => match self.funding_method {
                Some(category) => Ok(Action::Deposit(category)),
                None => bail!("--deposit requires --funding-method"),
            },
            (false, true) => {
                let Some(pair) = self.cryptocurrency.clone() else {
                    bail!("--buy requires --cryptocurrency");
                };
                if pair.quote != self.fiat() {
                    bail!(
                        "{pair} is not a {} pair; only fiat pairs quoted in --fiat-currency are supported",
                        self.fiat()
                    );
                }
                Ok(Action::Buy(pair))
            }
            _ => bail!("select exactly one of --deposit or --buy"),
        }
    }
}

fn parse_amount(raw: &str) -> Result<f64, String> {
    let amount: f64 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(format!("amount must be positive, got {raw}"));
    }
    Ok(amount)
}

/// Debug runs log to stdout; everything else appends to the log file.
fn init_logging(debug: bool, log_file: &str) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if debug {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    }

    let path = Path::new(log_file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("LOG_FILE '{log_file}' has no file name"))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

async fn build_client(
    cfg: &Config,
    action: &Action,
    fiat: &str,
) -> anyhow::Result<Arc<dyn ExchangeClient>> {
    match cfg.trading_mode {
        TradingMode::Live => {
            info!(url = %cfg.api_url, "Live mode, using CoinbaseClient");
            let client = CoinbaseClient::authenticate_with_url(
                &cfg.api_key,
                &cfg.api_secret,
                &cfg.api_passphrase,
                cfg.api_url.as_str(),
            )
            .context("authenticating with Coinbase Pro")?;
            Ok(Arc::new(client))
        }
        TradingMode::Paper => {
            info!(
                balance = cfg.paper_balance,
                price = cfg.paper_price,
                "Paper mode, using PaperClient"
            );
            let client = PaperClient::new(fiat, cfg.paper_balance, cfg.paper_slippage_bps);
            if let Action::Buy(pair) = action {
                client.update_price(&pair.product_id(), cfg.paper_price).await;
            }
            Ok(Arc::new(client))
        }
    }
}

async fn run(args: &Args, cfg: &Config, action: Action) -> anyhow::Result<()> {
    let fiat = args.fiat();
    let client = build_client(cfg, &action, &fiat).await?;
    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);

    match action {
        Action::Deposit(category) => {
            let result = Depositor::new(client, sink)
                .deposit(category, args.amount, &fiat)
                .await?;
            info!(deposit_id = %result.id, "Deposit initiated");
        }
        Action::Buy(pair) => {
            let policy = SettlementPolicy {
                initial_wait: cfg.settle_initial_wait,
                retry_wait: cfg.settle_retry_wait,
                max_refetches: cfg.settle_max_refetches,
                ..SettlementPolicy::default()
            };
            let snapshot = OrderExecutor::new(client, sink)
                .with_policy(policy)
                .buy(&pair, args.amount, &fiat)
                .await?;
            if !snapshot.settled {
                warn!(order_id = %snapshot.id, "Order had not settled when polling stopped; check it on Coinbase Pro");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let action = args.action()?;

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("loading configuration")?;

    // ── Logging ───────────────────────────────────────────────────────────────
    let _guard = init_logging(args.debug, &cfg.log_file)?;
    info!(mode = %cfg.trading_mode, ?action, amount = args.amount, "autobuy starting");

    let outcome = run(&args, &cfg, action).await;
    if let Err(e) = &outcome {
        error!(error = %e, "Run failed");
    }
    outcome
}

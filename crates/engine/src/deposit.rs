use std::sync::Arc;

use tracing::error;

use common::{
    DepositRequest, DepositResult, Error, EventSink, ExchangeClient, FundingCategory, Result,
    WorkflowEvent,
};

/// Moves fiat from a linked payment method into the Coinbase Pro wallet.
pub struct Depositor {
    client: Arc<dyn ExchangeClient>,
    sink: Arc<dyn EventSink>,
}

impl Depositor {
    pub fn new(client: Arc<dyn ExchangeClient>, sink: Arc<dyn EventSink>) -> Self {
        Self { client, sink }
    }

    /// Deposit `amount` of `fiat_currency` from the first payment method of
    /// type `category`. Nothing is submitted unless such a method exists;
    /// `FundingCategory::Unsupported` never matches.
    pub async fn deposit(
        &self,
        category: FundingCategory,
        amount: f64,
        fiat_currency: &str,
    ) -> Result<DepositResult> {
        let methods = self
            .client
            .payment_methods()
            .await?
            .into_result()
            .inspect_err(|e| error!(error = %e, "Could not list payment methods"))?;
        self.sink.emit(WorkflowEvent::PaymentMethodsListed {
            count: methods.len(),
        });

        let mut candidates = methods
            .iter()
            .filter(|m| category != FundingCategory::Unsupported && m.category == category);
        let Some(method) = candidates.next() else {
            return Err(Error::FundingSourceNotFound {
                category,
                available: methods.iter().map(|m| m.category.to_string()).collect(),
            });
        };

        let skipped = candidates.count();
        if skipped > 0 {
            self.sink
                .emit(WorkflowEvent::FundingSourceAmbiguous { category, skipped });
        }
        self.sink.emit(WorkflowEvent::FundingSourceMatched {
            id: method.id.clone(),
            name: method.name.clone(),
            remaining_limit: method.remaining_deposit_limit(),
        });

        let request = DepositRequest {
            amount,
            currency: fiat_currency.to_string(),
            payment_method_id: method.id.clone(),
        };
        let result = self
            .client
            .deposit(&request)
            .await?
            .into_result()
            .inspect_err(|e| error!(error = %e, source = %method.name, "Deposit refused"))?;

        self.sink.emit(WorkflowEvent::Deposited {
            amount,
            currency: request.currency,
            source_name: method.name.clone(),
            payout_at: result.payout_at,
        });

        Ok(result)
    }
}

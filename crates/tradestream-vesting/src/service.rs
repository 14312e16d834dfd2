//! Stream facade used by the request layer. Reads the wall clock and checks
//! that withdrawals come from the schedule's own recipient.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tradestream_types::{RecipientId, Result, TradestreamError, UserId};

use crate::engine::{NewStream, StreamSummary, VestingEngine, Withdrawal};

pub struct StreamService {
    engine: Arc<VestingEngine>,
}

impl StreamService {
    #[must_use]
    pub fn new(engine: Arc<VestingEngine>) -> Self {
        Self { engine }
    }

    pub async fn create_stream(&self, request: NewStream) -> Result<StreamSummary> {
        self.engine.create_stream(request, Utc::now()).await
    }

    /// # Errors
    /// `NotRecipient` if `caller` does not own the schedule, otherwise as
    /// [`VestingEngine::withdraw`].
    pub async fn withdraw_from_stream(
        &self,
        caller: UserId,
        recipient_id: RecipientId,
        amount: Option<Decimal>,
    ) -> Result<Withdrawal> {
        let recipient = self.engine.get_recipient(recipient_id).await?;
        if recipient.recipient_user_id != caller {
            tracing::warn!(recipient = %recipient_id, %caller, "Withdrawal by non-recipient refused");
            return Err(TradestreamError::NotRecipient(recipient_id));
        }
        self.engine.withdraw(recipient_id, amount, Utc::now()).await
    }

    pub async fn list_streams_by_employer(&self, employer_id: UserId) -> Result<Vec<StreamSummary>> {
        self.engine.streams_by_employer(employer_id, Utc::now()).await
    }

    pub async fn list_streams_by_recipient(&self, user_id: UserId) -> Result<Vec<StreamSummary>> {
        self.engine.streams_by_recipient(user_id, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use tradestream_ledger::BalanceLedger;
    use tradestream_store::{AccountRepository, MemoryStore};
    use tradestream_types::{Account, BalanceKey, LedgerConfig, RecipientSpec, VestingConfig};

    use super::*;

    #[tokio::test]
    async fn only_recipient_may_withdraw() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(BalanceLedger::new(
            store.clone(),
            store.clone(),
            &LedgerConfig::default(),
        ));
        let engine = Arc::new(VestingEngine::new(
            store.clone(),
            store.clone(),
            ledger.clone(),
            VestingConfig::default(),
        ));
        let service = StreamService::new(engine);

        let employer = UserId::new();
        ledger
            .deposit(&BalanceKey::new(employer, "BCH", false), Decimal::new(10, 0))
            .await
            .unwrap();
        let worker = Account::new("addr:worker");
        store.insert_account(&worker).await.unwrap();

        let summary = service
            .create_stream(NewStream {
                employer_id: employer,
                name: "grant".into(),
                token_symbol: "BCH".into(),
                recipients: vec![RecipientSpec::new("addr:worker", Decimal::new(10, 0), 60)],
                is_demo: false,
            })
            .await
            .unwrap();
        let rid = summary.recipients[0].recipient.id;

        let err = service
            .withdraw_from_stream(employer, rid, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TradestreamError::NotRecipient(id) if id == rid));
        assert!(service.withdraw_from_stream(worker.id, rid, None).await.is_ok());

        assert_eq!(service.list_streams_by_employer(employer).await.unwrap().len(), 1);
        let mine = service.list_streams_by_recipient(worker.id).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].recipients.len(), 1);
    }
}

//! Vesting engine: stream creation and recipient withdrawals.
//!
//! Creation locks the employer's full allocation before anything is
//! persisted. A withdrawal claims accrued time on the recipient row with a
//! version compare-and-swap, then pays out of the employer's locked balance.
//! Two concurrent withdrawals on one schedule can therefore never pay the
//! same accrual twice.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tradestream_ledger::{BalanceLedger, CreditOutcome};
use tradestream_store::{AccountRepository, StreamRepository};
use tradestream_types::{
    BalanceKey, RecipientId, RecipientSpec, Result, SettlementId, Stream, StreamId,
    StreamRecipient, StreamStatus, TradestreamError, UserId, VestingConfig,
};

use crate::accrual::{self, Accrual};

/// Request to open a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStream {
    pub employer_id: UserId,
    pub name: String,
    pub token_symbol: String,
    pub recipients: Vec<RecipientSpec>,
    pub is_demo: bool,
}

/// A recipient schedule with what it could claim at query time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientSummary {
    pub recipient: StreamRecipient,
    pub claimable: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub stream: Stream,
    pub recipients: Vec<RecipientSummary>,
}

/// Result of a withdrawal. `withdrawn == 0` means nothing had accrued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub recipient_id: RecipientId,
    pub stream_id: StreamId,
    pub withdrawn: Decimal,
    pub last_claim_time: DateTime<Utc>,
    pub remaining_allocation: Decimal,
}

impl Withdrawal {
    fn nothing(recipient: &StreamRecipient, stream: &Stream) -> Self {
        Self {
            recipient_id: recipient.id,
            stream_id: stream.id,
            withdrawn: Decimal::ZERO,
            last_claim_time: recipient.last_claim_time,
            remaining_allocation: stream.remaining_allocation,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.withdrawn.is_zero()
    }
}

pub struct VestingEngine {
    streams: Arc<dyn StreamRepository>,
    accounts: Arc<dyn AccountRepository>,
    ledger: Arc<BalanceLedger>,
    config: VestingConfig,
}

impl VestingEngine {
    #[must_use]
    pub fn new(
        streams: Arc<dyn StreamRepository>,
        accounts: Arc<dyn AccountRepository>,
        ledger: Arc<BalanceLedger>,
        config: VestingConfig,
    ) -> Self {
        Self {
            streams,
            accounts,
            ledger,
            config,
        }
    }

    // =================================================================
    // Creation
    // =================================================================

    /// Lock `Σ amount` from the employer and persist the stream with one
    /// schedule per recipient, all starting at `now`.
    ///
    /// # Errors
    /// - `InvalidStream` for an empty, oversized or malformed request
    /// - `AccountNotFound` for an address with no account
    /// - `InsufficientFunds` if the employer cannot cover the total
    /// - `PersistenceFailure` if the stream cannot be stored (lock released)
    pub async fn create_stream(&self, request: NewStream, now: DateTime<Utc>) -> Result<StreamSummary> {
        self.validate(&request)?;

        let stream_id = StreamId::new();
        let mut recipients = Vec::with_capacity(request.recipients.len());
        for spec in &request.recipients {
            let account = self
                .accounts
                .account_by_address(&spec.address)
                .await?
                .ok_or_else(|| TradestreamError::AccountNotFound(spec.address.clone()))?;
            let end_time = i64::try_from(spec.duration_seconds)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|span| now.checked_add_signed(span))
                .ok_or_else(|| TradestreamError::InvalidStream {
                    reason: format!("duration {}s out of range", spec.duration_seconds),
                })?;
            recipients.push(StreamRecipient {
                id: RecipientId::new(),
                stream_id,
                recipient_address: spec.address.clone(),
                recipient_user_id: account.id,
                allocation: spec.amount,
                start_time: now,
                end_time,
                rate_per_second: accrual::rate_per_second(spec.amount, spec.duration_seconds)?,
                withdrawn_amount: Decimal::ZERO,
                last_claim_time: now,
                version: 0,
            });
        }

        let total = request
            .recipients
            .iter()
            .try_fold(Decimal::ZERO, |sum, r| sum.checked_add(r.amount))
            .ok_or_else(|| TradestreamError::InvalidStream {
                reason: "total allocation overflows".into(),
            })?;
        let employer = BalanceKey::new(request.employer_id, request.token_symbol.clone(), request.is_demo);
        self.ledger.lock_funds(&employer, total).await?;

        let stream = Stream {
            id: stream_id,
            employer_id: request.employer_id,
            name: request.name,
            token_symbol: request.token_symbol,
            total_allocation: total,
            remaining_allocation: total,
            status: StreamStatus::Active,
            is_demo: request.is_demo,
            created_at: now,
        };
        if let Err(err) = self.streams.insert_stream(&stream, &recipients).await {
            tracing::warn!(stream = %stream.id, error = %err, "Stream insert failed, releasing lock");
            if let Err(unlock_err) = self.ledger.unlock_funds(&employer, total).await {
                tracing::error!(
                    stream = %stream.id,
                    key = %employer,
                    amount = %total,
                    error = %unlock_err,
                    "Compensating unlock failed: funds remain locked"
                );
            }
            return Err(err);
        }

        tracing::info!(
            stream = %stream.id,
            employer = %stream.employer_id,
            token = %stream.token_symbol,
            total = %total,
            recipients = recipients.len(),
            "Stream created"
        );
        Ok(StreamSummary {
            stream,
            recipients: recipients
                .into_iter()
                .map(|recipient| RecipientSummary {
                    recipient,
                    claimable: Decimal::ZERO,
                })
                .collect(),
        })
    }

    fn validate(&self, request: &NewStream) -> Result<()> {
        let invalid = |reason: String| -> Result<()> { Err(TradestreamError::InvalidStream { reason }) };
        if request.token_symbol.trim().is_empty() {
            return invalid("token symbol is empty".into());
        }
        if request.recipients.is_empty() {
            return invalid("stream has no recipients".into());
        }
        if request.recipients.len() > self.config.max_recipients {
            return invalid(format!(
                "{} recipients exceeds limit of {}",
                request.recipients.len(),
                self.config.max_recipients
            ));
        }
        for spec in &request.recipients {
            if spec.amount <= Decimal::ZERO {
                return invalid(format!("amount for {} must be positive", spec.address));
            }
            if spec.duration_seconds == 0 {
                return invalid(format!("duration for {} must be > 0", spec.address));
            }
            if spec.duration_seconds > self.config.max_duration_secs {
                return invalid(format!(
                    "duration {}s for {} exceeds limit of {}s",
                    spec.duration_seconds, spec.address, self.config.max_duration_secs
                ));
            }
        }
        Ok(())
    }

    // =================================================================
    // Withdrawal
    // =================================================================

    /// Withdraw accrued funds for one schedule at `now`.
    ///
    /// With `amount = None` everything claimable is withdrawn. Nothing
    /// accrued yet is a successful empty [`Withdrawal`], not an error.
    ///
    /// # Errors
    /// - `StreamRecipientNotFound` / `StreamNotFound`
    /// - `InvalidAmount` for a non-positive requested amount
    /// - `ClaimExceedsAvailable` if `amount` is more than is claimable
    /// - `PersistenceFailure` if the claim keeps conflicting or the payout fails
    pub async fn withdraw(
        &self,
        recipient_id: RecipientId,
        amount: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<Withdrawal> {
        if let Some(requested) = amount {
            if requested <= Decimal::ZERO {
                return Err(TradestreamError::InvalidAmount {
                    reason: format!("withdrawal amount must be positive, got {requested}"),
                });
            }
        }

        for attempt in 1..=self.config.claim_retries.max(1) {
            let recipient = self
                .streams
                .get_recipient(recipient_id)
                .await?
                .ok_or(TradestreamError::StreamRecipientNotFound(recipient_id))?;
            let stream = self
                .streams
                .get_stream(recipient.stream_id)
                .await?
                .ok_or(TradestreamError::StreamNotFound(recipient.stream_id))?;

            let accrual = accrual::accrue(&recipient, now);
            if accrual.elapsed <= Decimal::ZERO {
                return Ok(Withdrawal::nothing(&recipient, &stream));
            }
            let claim = match amount {
                Some(requested) if requested > accrual.claimable => {
                    return Err(TradestreamError::ClaimExceedsAvailable {
                        requested,
                        claimable: accrual.claimable,
                    });
                }
                Some(requested) => requested,
                None => accrual.claimable,
            };
            if claim <= Decimal::ZERO {
                return Ok(Withdrawal::nothing(&recipient, &stream));
            }

            let mut claimed = recipient.clone();
            claimed.withdrawn_amount += claim;
            claimed.last_claim_time = accrual::advance_claim_time(&recipient, &accrual, claim)?;
            if !self
                .streams
                .update_recipient_claim(&claimed, recipient.version)
                .await?
            {
                tracing::debug!(recipient = %recipient_id, attempt, "Claim version conflict, retrying");
                continue;
            }

            return self.pay_out(&recipient, &claimed, &stream, &accrual, claim).await;
        }

        tracing::warn!(recipient = %recipient_id, "Withdrawal abandoned after repeated claim conflicts");
        Err(TradestreamError::PersistenceFailure(format!(
            "claim on {recipient_id}: gave up after {} version conflicts",
            self.config.claim_retries
        )))
    }

    async fn pay_out(
        &self,
        before: &StreamRecipient,
        claimed: &StreamRecipient,
        stream: &Stream,
        accrual: &Accrual,
        claim: Decimal,
    ) -> Result<Withdrawal> {
        let from = BalanceKey::new(stream.employer_id, stream.token_symbol.clone(), stream.is_demo);
        let to = BalanceKey::new(claimed.recipient_user_id, stream.token_symbol.clone(), stream.is_demo);
        let settlement = SettlementId::for_withdrawal(claimed.id, before.version + 1);

        match self
            .ledger
            .transfer_locked_to_available(&from, &to, claim, settlement)
            .await
        {
            Ok(CreditOutcome::Deferred) => {
                tracing::warn!(recipient = %claimed.id, %settlement, "Withdrawal credit deferred to journal");
            }
            Ok(_) => {}
            Err(err @ TradestreamError::SettlementIncomplete { .. }) => return Err(err),
            Err(err) => {
                self.release_claim(before, claimed).await;
                return Err(err);
            }
        }

        let remaining_allocation = match self
            .streams
            .adjust_remaining_allocation(stream.id, -claim)
            .await
        {
            Ok(updated) => {
                if updated.status == StreamStatus::Completed {
                    tracing::info!(stream = %stream.id, "Stream fully withdrawn");
                }
                updated.remaining_allocation
            }
            Err(err) => {
                tracing::warn!(stream = %stream.id, error = %err, "Remaining allocation not updated");
                (stream.remaining_allocation - claim).max(Decimal::ZERO)
            }
        };

        tracing::info!(
            recipient = %claimed.id,
            stream = %stream.id,
            user = %claimed.recipient_user_id,
            amount = %claim,
            accrued = %accrual.accrued,
            withdrawn_total = %claimed.withdrawn_amount,
            "Withdrawal paid"
        );
        Ok(Withdrawal {
            recipient_id: claimed.id,
            stream_id: stream.id,
            withdrawn: claim,
            last_claim_time: claimed.last_claim_time,
            remaining_allocation,
        })
    }

    /// Put the recipient row back to its pre-claim state after a failed payout.
    async fn release_claim(&self, before: &StreamRecipient, claimed: &StreamRecipient) {
        match self
            .streams
            .update_recipient_claim(before, before.version + 1)
            .await
        {
            Ok(true) => tracing::warn!(recipient = %before.id, "Withdrawal claim reverted"),
            Ok(false) => tracing::error!(
                recipient = %before.id,
                withdrawn = %claimed.withdrawn_amount,
                "Claim revert lost a version race"
            ),
            Err(err) => tracing::error!(
                recipient = %before.id,
                error = %err,
                "Claim revert failed: accrual recorded without payout"
            ),
        }
    }

    // =================================================================
    // Queries
    // =================================================================

    /// Streams funded by `employer_id`, with every recipient's claimable amount at `now`.
    pub async fn streams_by_employer(
        &self,
        employer_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<StreamSummary>> {
        let streams = self.streams.streams_for_employer(employer_id).await?;
        let mut summaries = Vec::with_capacity(streams.len());
        for stream in streams {
            let recipients = self.streams.recipients_for_stream(stream.id).await?;
            summaries.push(summarize(stream, recipients, now));
        }
        Ok(summaries)
    }

    /// Streams paying `user_id`, restricted to that user's own schedules.
    pub async fn streams_by_recipient(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<StreamSummary>> {
        let mut schedules = self.streams.recipients_for_user(user_id).await?;
        schedules.sort_by_key(|r| (r.stream_id, r.id));

        let mut summaries: Vec<StreamSummary> = Vec::new();
        for recipient in schedules {
            if let Some(last) = summaries.last_mut() {
                if last.stream.id == recipient.stream_id {
                    last.recipients.push(summarize_recipient(recipient, now));
                    continue;
                }
            }
            let stream = self
                .streams
                .get_stream(recipient.stream_id)
                .await?
                .ok_or(TradestreamError::StreamNotFound(recipient.stream_id))?;
            summaries.push(summarize(stream, vec![recipient], now));
        }
        Ok(summaries)
    }

    pub async fn get_recipient(&self, recipient_id: RecipientId) -> Result<StreamRecipient> {
        self.streams
            .get_recipient(recipient_id)
            .await?
            .ok_or(TradestreamError::StreamRecipientNotFound(recipient_id))
    }
}

fn summarize_recipient(recipient: StreamRecipient, now: DateTime<Utc>) -> RecipientSummary {
    let claimable = accrual::accrue(&recipient, now).claimable;
    RecipientSummary {
        recipient,
        claimable,
    }
}

fn summarize(stream: Stream, recipients: Vec<StreamRecipient>, now: DateTime<Utc>) -> StreamSummary {
    StreamSummary {
        stream,
        recipients: recipients
            .into_iter()
            .map(|r| summarize_recipient(r, now))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use tradestream_store::MemoryStore;
    use tradestream_types::{Account, LedgerConfig};

    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    struct Harness {
        store: Arc<MemoryStore>,
        ledger: Arc<BalanceLedger>,
        engine: VestingEngine,
    }

    fn harness() -> Harness {
        harness_with(VestingConfig::default())
    }

    fn harness_with(config: VestingConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(BalanceLedger::new(
            store.clone(),
            store.clone(),
            &LedgerConfig::default(),
        ));
        let engine = VestingEngine::new(
            store.clone(),
            store.clone(),
            ledger.clone(),
            config,
        );
        Harness {
            store,
            ledger,
            engine,
        }
    }

    async fn account(h: &Harness, address: &str) -> UserId {
        let account = Account::new(address);
        h.store.insert_account(&account).await.unwrap();
        account.id
    }

    fn request(employer: UserId, specs: Vec<RecipientSpec>) -> NewStream {
        NewStream {
            employer_id: employer,
            name: "payroll".into(),
            token_symbol: "BCH".into(),
            recipients: specs,
            is_demo: false,
        }
    }

    #[tokio::test]
    async fn create_locks_total_allocation() {
        let h = harness();
        let employer = UserId::new();
        let key = BalanceKey::new(employer, "BCH", false);
        h.ledger.deposit(&key, dec(500)).await.unwrap();
        account(&h, "addr:a").await;
        account(&h, "addr:b").await;

        let summary = h
            .engine
            .create_stream(
                request(
                    employer,
                    vec![
                        RecipientSpec::new("addr:a", dec(100), 100),
                        RecipientSpec::new("addr:b", dec(200), 400),
                    ],
                ),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(summary.stream.total_allocation, dec(300));
        assert_eq!(summary.stream.remaining_allocation, dec(300));
        assert_eq!(summary.recipients[1].recipient.rate_per_second, Decimal::new(5, 1));
        let bal = h.ledger.get_balance(&key).await.unwrap();
        assert_eq!(bal.locked, dec(300));
        assert_eq!(bal.available, dec(200));
    }

    #[tokio::test]
    async fn zero_duration_rejected_before_locking() {
        let h = harness();
        let employer = UserId::new();
        let key = BalanceKey::new(employer, "BCH", false);
        h.ledger.deposit(&key, dec(100)).await.unwrap();
        account(&h, "addr:a").await;

        let err = h
            .engine
            .create_stream(request(employer, vec![RecipientSpec::new("addr:a", dec(10), 0)]), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TradestreamError::InvalidStream { .. }));
        assert_eq!(h.ledger.get_balance(&key).await.unwrap().locked, Decimal::ZERO);
    }

    #[tokio::test]
    async fn unrepresentable_end_time_rejected() {
        let h = harness_with(VestingConfig {
            max_duration_secs: u64::MAX,
            ..VestingConfig::default()
        });
        let employer = UserId::new();
        let key = BalanceKey::new(employer, "BCH", false);
        h.ledger.deposit(&key, dec(100)).await.unwrap();
        account(&h, "addr:a").await;

        let err = h
            .engine
            .create_stream(
                request(employer, vec![RecipientSpec::new("addr:a", dec(10), 100_000_000_000_000_000)]),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TradestreamError::InvalidStream { .. }));
        assert_eq!(h.ledger.get_balance(&key).await.unwrap().locked, Decimal::ZERO);
    }

    #[tokio::test]
    async fn unknown_address_rejected() {
        let h = harness();
        let employer = UserId::new();
        h.ledger
            .deposit(&BalanceKey::new(employer, "BCH", false), dec(100))
            .await
            .unwrap();
        let err = h
            .engine
            .create_stream(request(employer, vec![RecipientSpec::new("addr:nobody", dec(10), 10)]), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TradestreamError::AccountNotFound(addr) if addr == "addr:nobody"));
    }

    #[tokio::test]
    async fn insufficient_employer_funds_creates_nothing() {
        let h = harness();
        let employer = UserId::new();
        h.ledger
            .deposit(&BalanceKey::new(employer, "BCH", false), dec(50))
            .await
            .unwrap();
        account(&h, "addr:a").await;

        let err = h
            .engine
            .create_stream(request(employer, vec![RecipientSpec::new("addr:a", dec(100), 100)]), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TradestreamError::InsufficientFunds { .. }));
        assert!(h.engine.streams_by_employer(employer, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_insert_releases_lock() {
        let h = harness();
        let employer = UserId::new();
        let key = BalanceKey::new(employer, "BCH", false);
        h.ledger.deposit(&key, dec(100)).await.unwrap();
        account(&h, "addr:a").await;

        h.store.fail_stream_inserts(1);
        let err = h
            .engine
            .create_stream(request(employer, vec![RecipientSpec::new("addr:a", dec(100), 100)]), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TradestreamError::PersistenceFailure(_)));
        let bal = h.ledger.get_balance(&key).await.unwrap();
        assert_eq!(bal.available, dec(100));
        assert_eq!(bal.locked, Decimal::ZERO);
    }

    #[tokio::test]
    async fn too_many_recipients_rejected() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(BalanceLedger::new(store.clone(), store.clone(), &LedgerConfig::default()));
        let engine = VestingEngine::new(
            store.clone(),
            store,
            ledger,
            VestingConfig {
                max_recipients: 1,
                ..VestingConfig::default()
            },
        );
        let specs = vec![
            RecipientSpec::new("addr:a", dec(1), 10),
            RecipientSpec::new("addr:b", dec(1), 10),
        ];
        let err = engine
            .create_stream(request(UserId::new(), specs), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TradestreamError::InvalidStream { .. }));
    }

    #[tokio::test]
    async fn failed_payout_reverts_claim() {
        let h = harness();
        let employer = UserId::new();
        let key = BalanceKey::new(employer, "BCH", false);
        h.ledger.deposit(&key, dec(100)).await.unwrap();
        account(&h, "addr:a").await;
        let start = Utc::now();
        let summary = h
            .engine
            .create_stream(request(employer, vec![RecipientSpec::new("addr:a", dec(100), 100)]), start)
            .await
            .unwrap();
        let rid = summary.recipients[0].recipient.id;

        h.store.fail_balance_writes_for(&key, 1);
        let at = start + Duration::seconds(30);
        assert!(h.engine.withdraw(rid, None, at).await.is_err());

        let row = h.engine.get_recipient(rid).await.unwrap();
        assert_eq!(row.withdrawn_amount, Decimal::ZERO);
        assert_eq!(row.last_claim_time, start);
        assert_eq!(h.ledger.get_balance(&key).await.unwrap().locked, dec(100));

        let w = h.engine.withdraw(rid, None, at).await.unwrap();
        assert_eq!(w.withdrawn, dec(30));
    }

    #[tokio::test]
    async fn failed_claim_update_moves_no_funds() {
        let h = harness();
        let employer = UserId::new();
        let key = BalanceKey::new(employer, "BCH", false);
        h.ledger.deposit(&key, dec(100)).await.unwrap();
        account(&h, "addr:a").await;
        let start = Utc::now();
        let summary = h
            .engine
            .create_stream(request(employer, vec![RecipientSpec::new("addr:a", dec(100), 100)]), start)
            .await
            .unwrap();

        h.store.fail_claim_updates(1);
        let err = h
            .engine
            .withdraw(summary.recipients[0].recipient.id, None, start + Duration::seconds(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TradestreamError::PersistenceFailure(_)));
        assert_eq!(h.ledger.get_balance(&key).await.unwrap().locked, dec(100));
    }

    #[tokio::test]
    async fn non_positive_request_rejected() {
        let h = harness();
        let err = h
            .engine
            .withdraw(RecipientId::new(), Some(Decimal::ZERO), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TradestreamError::InvalidAmount { .. }));
    }

    #[tokio::test]
    async fn unknown_recipient_not_found() {
        let h = harness();
        let err = h
            .engine
            .withdraw(RecipientId::new(), None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TradestreamError::StreamRecipientNotFound(_)));
    }
}

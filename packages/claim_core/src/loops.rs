//! The three input loops: detection, card events and telemetry.
//!
//! Each loop is sequential and stops when its cancellation token fires or its
//! source goes away for good. Failures are caught here and turned into sink
//! notifications; nothing in this module panics on a collaborator error.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actor::ClaimHandle;
use crate::claim::{GrantResolution, GrantTicket};
use crate::collaborators::{
    CardReader, Classifier, GrantRequest, IdentityLookup, Ledger, TelemetrySource,
};
use crate::error::AdapterError;
use crate::metrics::KioskMetrics;
use crate::sink::{PresentationSink, Severity};
use crate::telemetry::{FillState, SignificantChangeFilter, TelemetryRecord};

/// Pause after a transient reader or feed error before reading again.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Percent at or above which a full container counts toward the full counter.
pub const DEFAULT_FULL_THRESHOLD: u8 = 90;

/// Reports the first failure of a run to the sink and stays quiet until the
/// next success.
#[derive(Default)]
struct FailureLatch {
    tripped: bool,
}

impl FailureLatch {
    fn trip(&mut self) -> bool {
        !std::mem::replace(&mut self.tripped, true)
    }

    fn reset(&mut self) {
        self.tripped = false;
    }
}

async fn backoff(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(ERROR_BACKOFF) => true,
    }
}

/// Polls the classifier on a fixed interval and feeds the claim actor.
pub struct DetectionLoop {
    pub classifier: Arc<dyn Classifier>,
    pub claims: ClaimHandle,
    pub sink: Arc<dyn PresentationSink>,
    pub metrics: Arc<KioskMetrics>,
    pub poll_interval: Duration,
}

impl DetectionLoop {
    pub async fn run(self, cancel: CancellationToken) {
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut latch = FailureLatch::default();

        debug!("Detection loop started (every {:?})", self.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = poll.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.classifier.detect() => result,
            };

            match result {
                Ok(Some(detection)) => {
                    latch.reset();
                    if self.claims.classified(detection).await.is_err() {
                        break;
                    }
                }
                Ok(None) => latch.reset(),
                Err(e) => {
                    self.metrics.classifier_error();
                    if latch.trip() {
                        warn!("Classifier failed: {}", e);
                        self.sink
                            .on_status(&format!("Camera error: {}", e), Severity::Warning);
                    } else {
                        debug!("Classifier still failing: {}", e);
                    }
                }
            }
        }
        debug!("Detection loop stopped");
    }
}

/// Identity lookup and ledger grant, each bounded by the request timeout.
#[derive(Clone)]
pub struct GrantServices {
    pub identity: Arc<dyn IdentityLookup>,
    pub ledger: Arc<dyn Ledger>,
    pub request_timeout: Duration,
}

impl GrantServices {
    /// Redeem a ticket for the holder of `card_id`. Never fails: every
    /// outcome is a [`GrantResolution`] for the claim actor.
    pub async fn redeem(&self, card_id: &str, ticket: &GrantTicket) -> GrantResolution {
        let lookup = tokio::time::timeout(self.request_timeout, self.identity.lookup(card_id));
        let account = match lookup.await {
            Ok(Ok(Some(account))) => account,
            Ok(Ok(None)) => return GrantResolution::UnknownCard,
            Ok(Err(e)) => {
                warn!(card = %card_id, "Identity lookup failed: {}", e);
                return GrantResolution::LookupFailed(e.to_string());
            }
            Err(_) => {
                warn!(card = %card_id, "Identity lookup timed out");
                return GrantResolution::LookupFailed(AdapterError::Timeout.to_string());
            }
        };

        let request = GrantRequest {
            claim_id: ticket.claim_id,
            account_id: account.account_id.clone(),
            material: ticket.material,
            points: ticket.points,
        };
        let grant = tokio::time::timeout(self.request_timeout, self.ledger.grant_points(&request));
        match grant.await {
            Ok(Ok(receipt)) => GrantResolution::Granted { account, receipt },
            Ok(Err(e)) => {
                warn!(claim = %ticket.claim_id, account = %account.account_id, "Ledger grant failed: {}", e);
                GrantResolution::LedgerFailed(e.to_string())
            }
            Err(_) => {
                warn!(claim = %ticket.claim_id, account = %account.account_id, "Ledger grant timed out");
                GrantResolution::LedgerFailed(AdapterError::Timeout.to_string())
            }
        }
    }
}

/// Waits on the card reader and redeems pending claims.
///
/// Redemptions run as separate tasks so the reader keeps being served while
/// a grant is in flight; the claim actor answers those swipes as busy.
pub struct CardLoop {
    pub reader: Box<dyn CardReader>,
    pub claims: ClaimHandle,
    pub services: GrantServices,
    pub sink: Arc<dyn PresentationSink>,
}

impl CardLoop {
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut inflight = JoinSet::new();
        let mut latch = FailureLatch::default();

        debug!("Card loop started");
        loop {
            while inflight.try_join_next().is_some() {}

            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.reader.next_card() => next,
            };

            match next {
                Ok(Some(card_id)) => {
                    latch.reset();
                    info!(card = %card_id, "Card presented");
                    let ticket = match self.claims.card_presented().await {
                        Ok(ticket) => ticket,
                        Err(_) => break,
                    };
                    if let Some(ticket) = ticket {
                        let claims = self.claims.clone();
                        let services = self.services.clone();
                        inflight.spawn(async move {
                            let resolution = services.redeem(&card_id, &ticket).await;
                            let _ = claims.grant_resolved(ticket.claim_id, resolution).await;
                        });
                    }
                }
                Ok(None) => {
                    warn!("Card reader closed, card input disabled");
                    self.sink
                        .on_status("Card reader disconnected", Severity::Error);
                    break;
                }
                Err(e) if e.is_transient() => {
                    if latch.trip() {
                        warn!("Card reader error: {}", e);
                        self.sink
                            .on_status(&format!("Card reader error: {}", e), Severity::Warning);
                    }
                    if !backoff(&cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Card reader failed, card input disabled: {}", e);
                    self.sink
                        .on_status(&format!("Card reader failed: {}", e), Severity::Error);
                    break;
                }
            }
        }

        // Grants already started finish on their own request timeouts
        while inflight.join_next().await.is_some() {}
        debug!("Card loop stopped");
    }
}

/// Forwards significant container telemetry to the ledger.
pub struct TelemetryLoop {
    pub source: Box<dyn TelemetrySource>,
    pub ledger: Arc<dyn Ledger>,
    pub sink: Arc<dyn PresentationSink>,
    pub metrics: Arc<KioskMetrics>,
    pub filter: SignificantChangeFilter,
    pub request_timeout: Duration,
    pub full_threshold: u8,
}

impl TelemetryLoop {
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut latch = FailureLatch::default();

        debug!("Telemetry loop started");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.source.next_record() => next,
            };

            match next {
                Ok(Some(record)) => {
                    self.handle_record(&record, &mut latch).await;
                    self.sink
                        .on_container(record.target, record.percent, record.state);
                }
                Ok(None) => {
                    info!("Telemetry feed closed");
                    break;
                }
                Err(AdapterError::Malformed(reason)) | Err(AdapterError::Rejected(reason)) => {
                    self.metrics.telemetry_dropped();
                    debug!("Dropped telemetry message: {}", reason);
                }
                Err(e) => {
                    warn!("Telemetry feed error: {}", e);
                    if !backoff(&cancel).await {
                        break;
                    }
                }
            }
        }
        debug!("Telemetry loop stopped");
    }

    async fn handle_record(&mut self, record: &TelemetryRecord, latch: &mut FailureLatch) {
        if !self
            .filter
            .is_significant(record.target, record.percent, record.state)
        {
            self.metrics.telemetry_suppressed();
            debug!(
                container = %record.target,
                percent = record.percent,
                state = %record.state,
                "No significant change, skipping ledger write"
            );
            return;
        }

        let write = tokio::time::timeout(self.request_timeout, self.ledger.update_telemetry(record));
        let result = match write.await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout),
        };

        match result {
            Ok(()) => {
                latch.reset();
                self.metrics.telemetry_written();
                self.filter
                    .record(record.target, record.percent, record.state);
                if record.state == FillState::Full && record.percent >= self.full_threshold {
                    self.metrics.container_full(record.target);
                    info!(container = %record.target, percent = record.percent, "Container full");
                }
            }
            Err(e) => {
                self.metrics.telemetry_error();
                if latch.trip() {
                    warn!(container = %record.target, "Telemetry write failed: {}", e);
                    self.sink.on_status(
                        &format!("Error updating container: {}", e),
                        Severity::Warning,
                    );
                } else {
                    debug!(container = %record.target, "Telemetry write still failing: {}", e);
                }
            }
        }
    }
}

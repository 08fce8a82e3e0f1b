//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::collaborators::{
    Account, ArtifactRef, ArtifactStore, CardReader, Classifier, CuePlayer, Detection,
    GrantReceipt, GrantRequest, IdentityLookup, Ledger, TelemetrySource,
};
use crate::error::AdapterError;
use crate::material::Material;
use crate::sink::{PresentationSink, Severity, SinkEvent};
use crate::telemetry::{ContainerId, FillState, TelemetryRecord};

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, Severity)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Status { message, severity } => Some((message, severity)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl PresentationSink for RecordingSink {
    fn on_status(&self, message: &str, severity: Severity) {
        self.push(SinkEvent::Status {
            message: message.to_string(),
            severity,
        });
    }

    fn on_pending_claim(&self, claim: Option<(Material, u32)>) {
        self.push(SinkEvent::PendingClaim {
            material: claim.map(|(m, _)| m),
            points: claim.map(|(_, p)| p),
        });
    }

    fn on_claim_granted(&self, name: &str, new_total: u64) {
        self.push(SinkEvent::ClaimGranted {
            name: name.to_string(),
            new_total,
        });
    }

    fn on_container(&self, container: ContainerId, percent: u8, state: FillState) {
        self.push(SinkEvent::Container {
            container,
            percent,
            state,
        });
    }
}

#[derive(Default)]
pub struct MemoryArtifactStore {
    released: Mutex<Vec<ArtifactRef>>,
}

impl MemoryArtifactStore {
    pub fn released(&self) -> Vec<ArtifactRef> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn release(&self, artifact: ArtifactRef) -> Result<(), AdapterError> {
        self.released.lock().unwrap().push(artifact);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCue {
    played: Mutex<Vec<Material>>,
}

impl RecordingCue {
    pub fn played(&self) -> Vec<Material> {
        self.played.lock().unwrap().clone()
    }
}

impl CuePlayer for RecordingCue {
    fn play(&self, material: Material) {
        self.played.lock().unwrap().push(material);
    }
}

/// Returns queued results in order, then `Ok(None)` forever.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Result<Option<Detection>, AdapterError>>>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Result<Option<Detection>, AdapterError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn detect(&self) -> Result<Option<Detection>, AdapterError> {
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }
}

#[derive(Default)]
pub struct FakeIdentity {
    cards: HashMap<String, Account>,
}

impl FakeIdentity {
    pub fn with_card(card_id: &str, account_id: &str, display_name: &str) -> Self {
        let mut cards = HashMap::new();
        cards.insert(
            card_id.to_string(),
            Account {
                account_id: account_id.to_string(),
                display_name: display_name.to_string(),
            },
        );
        Self { cards }
    }
}

#[async_trait]
impl IdentityLookup for FakeIdentity {
    async fn lookup(&self, card_id: &str) -> Result<Option<Account>, AdapterError> {
        Ok(self.cards.get(card_id).cloned())
    }
}

#[derive(Default)]
pub struct FakeLedger {
    balances: Mutex<HashMap<String, u64>>,
    grants: Mutex<Vec<GrantRequest>>,
    grant_calls: AtomicUsize,
    grant_failures: AtomicUsize,
    telemetry: Mutex<Vec<TelemetryRecord>>,
    telemetry_failures: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeLedger {
    pub fn with_balance(account_id: &str, balance: u64) -> Self {
        let ledger = Self::default();
        ledger
            .balances
            .lock()
            .unwrap()
            .insert(account_id.to_string(), balance);
        ledger
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `n` grant calls.
    pub fn fail_grants(&self, n: usize) {
        self.grant_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` telemetry writes.
    pub fn fail_telemetry(&self, n: usize) {
        self.telemetry_failures.store(n, Ordering::SeqCst);
    }

    pub fn grant_calls(&self) -> usize {
        self.grant_calls.load(Ordering::SeqCst)
    }

    pub fn grants(&self) -> Vec<GrantRequest> {
        self.grants.lock().unwrap().clone()
    }

    pub fn balance(&self, account_id: &str) -> Option<u64> {
        self.balances.lock().unwrap().get(account_id).copied()
    }

    pub fn telemetry_writes(&self) -> Vec<TelemetryRecord> {
        self.telemetry.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn grant_points(&self, request: &GrantRequest) -> Result<GrantReceipt, AdapterError> {
        self.grant_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.grant_failures) {
            return Err(AdapterError::Unavailable("ledger offline".into()));
        }

        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(request.account_id.clone()).or_insert(0);
        *balance += u64::from(request.points);
        let new_total = *balance;
        drop(balances);

        self.grants.lock().unwrap().push(request.clone());
        Ok(GrantReceipt {
            points_granted: request.points,
            new_total,
        })
    }

    async fn update_telemetry(&self, record: &TelemetryRecord) -> Result<(), AdapterError> {
        if Self::take_failure(&self.telemetry_failures) {
            return Err(AdapterError::Unavailable("ledger offline".into()));
        }
        self.telemetry.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Card reader fed from a channel. Dropping the sender closes the reader.
pub struct ChannelCardReader {
    rx: mpsc::Receiver<Result<String, AdapterError>>,
}

impl ChannelCardReader {
    pub fn new() -> (Self, mpsc::Sender<Result<String, AdapterError>>) {
        let (tx, rx) = mpsc::channel(16);
        (Self { rx }, tx)
    }
}

#[async_trait]
impl CardReader for ChannelCardReader {
    async fn next_card(&mut self) -> Result<Option<String>, AdapterError> {
        match self.rx.recv().await {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }
}

/// Telemetry feed fed from a channel. Dropping the sender closes the feed.
pub struct ChannelTelemetrySource {
    rx: mpsc::Receiver<Result<TelemetryRecord, AdapterError>>,
}

impl ChannelTelemetrySource {
    pub fn new() -> (Self, mpsc::Sender<Result<TelemetryRecord, AdapterError>>) {
        let (tx, rx) = mpsc::channel(16);
        (Self { rx }, tx)
    }
}

#[async_trait]
impl TelemetrySource for ChannelTelemetrySource {
    async fn next_record(&mut self) -> Result<Option<TelemetryRecord>, AdapterError> {
        match self.rx.recv().await {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }
}

//! Builds the adapters from configuration and runs the kiosk until Ctrl+C.

use anyhow::{Context, Result};
use claim_core::collaborators::{CardReader, Classifier, IdentityLookup, Ledger, TelemetrySource};
use claim_core::metrics::KioskMetrics;
use claim_core::sink::ChannelSink;
use claim_core::supervisor::{Collaborators, Component, Kiosk};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifacts::FileArtifactStore;
use crate::card_reader::open_card_reader;
use crate::classifier::CommandClassifier;
use crate::config::{FileConfig, KioskDirs};
use crate::cue::build_cue_player;
use crate::ledger::HttpLedger;
use crate::presenter::run_presenter;
use crate::telemetry_feed::spawn_telemetry_listener;

/// Capture plus inference can be slow on kiosk hardware
const CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(30);

const SINK_CAPACITY: usize = 256;

/// Input sources and remote services built from the config. Missing entries
/// are reported as disabled by the supervisor, with the init error when a
/// configured source failed to start.
struct Adapters {
    classifier: Option<Arc<dyn Classifier>>,
    card_reader: Option<Box<dyn CardReader>>,
    identity: Option<Arc<dyn IdentityLookup>>,
    ledger: Option<Arc<dyn Ledger>>,
    telemetry: Option<Box<dyn TelemetrySource>>,
    listener: Option<JoinHandle<()>>,
    init_failures: Vec<(Component, String)>,
}

/// A source that fails to start is disabled for the process lifetime. The
/// others keep running.
async fn build_adapters(
    config: &FileConfig,
    store: &Arc<FileArtifactStore>,
    cancel: &CancellationToken,
) -> Adapters {
    let request_timeout = Duration::from_secs(config.ledger.request_timeout_secs);
    let mut init_failures = Vec::new();
    let mut failed = |component: Component, reason: String| {
        warn!("{} failed to start: {}", component, reason);
        init_failures.push((component, reason));
    };

    let classifier: Option<Arc<dyn Classifier>> = match &config.detection.classifier_command {
        Some(argv) => match CommandClassifier::new(
            argv,
            store.clone(),
            config.detection.min_confidence,
            CLASSIFIER_TIMEOUT,
        ) {
            Ok(classifier) => Some(Arc::new(classifier)),
            Err(e) => {
                failed(Component::Camera, format!("{:#}", e));
                None
            }
        },
        None => None,
    };

    let card_reader = match &config.card_reader.device {
        Some(device) => match open_card_reader(device).await {
            Ok(reader) => Some(reader),
            Err(e) => {
                failed(Component::CardReader, format!("{:#}", e));
                None
            }
        },
        None => None,
    };

    let (identity, ledger): (Option<Arc<dyn IdentityLookup>>, Option<Arc<dyn Ledger>>) =
        match &config.ledger.base_url {
            Some(base_url) => match HttpLedger::new(
                base_url,
                config.ledger.auth_token.clone(),
                request_timeout,
            )
            .context("Failed to build ledger client")
            {
                Ok(http) => {
                    info!("Ledger at {}", base_url);
                    let http = Arc::new(http);
                    (
                        Some(http.clone() as Arc<dyn IdentityLookup>),
                        Some(http as Arc<dyn Ledger>),
                    )
                }
                Err(e) => {
                    // Both ledger-backed sources go down with it
                    let reason = format!("{:#}", e);
                    if card_reader.is_some() {
                        failed(Component::CardReader, reason.clone());
                    }
                    if config.telemetry.listen.is_some() {
                        failed(Component::Telemetry, reason);
                    }
                    (None, None)
                }
            },
            None => (None, None),
        };

    let (telemetry, listener) = match config.telemetry.listen {
        Some(addr) => match spawn_telemetry_listener(addr, cancel.clone()).await {
            Ok((feed, _, task)) => (Some(Box::new(feed) as Box<dyn TelemetrySource>), Some(task)),
            Err(e) => {
                failed(Component::Telemetry, format!("{:#}", e));
                (None, None)
            }
        },
        None => (None, None),
    };

    Adapters {
        classifier,
        card_reader,
        identity,
        ledger,
        telemetry,
        listener,
        init_failures,
    }
}

pub async fn run(config: FileConfig, dirs: KioskDirs) -> Result<()> {
    let metrics = Arc::new(KioskMetrics::new());
    let cancel = CancellationToken::new();

    let store = Arc::new(FileArtifactStore::new(&dirs.captures_dir));
    let max_age = Duration::from_secs(config.detection.capture_max_age_secs);
    match store.sweep(Some(max_age)).await {
        Ok(n) if n > 0 => info!("Removed {} stale captures", n),
        Ok(_) => {}
        Err(e) => warn!("Failed to sweep captures: {}", e),
    }

    let adapters = build_adapters(&config, &store, &cancel).await;

    let (sink, events) = ChannelSink::new(SINK_CAPACITY, metrics.clone());
    let json_out = config.presentation.json_events.then(tokio::io::stdout);
    let presenter = tokio::spawn(run_presenter(events, json_out));

    let kiosk = Kiosk::start(
        config.kiosk_settings(),
        Collaborators {
            init_failures: adapters.init_failures,
            classifier: adapters.classifier,
            card_reader: adapters.card_reader,
            identity: adapters.identity,
            ledger: adapters.ledger,
            telemetry: adapters.telemetry,
            artifacts: store.clone(),
            sink: Arc::new(sink),
            cue: build_cue_player(&config.audio),
        },
        metrics.clone(),
        cancel.clone(),
    );

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal, cleaning up...");

    kiosk.shutdown().await;
    if let Some(listener) = adapters.listener {
        if let Err(e) = listener.await {
            warn!("Telemetry listener ended abnormally: {}", e);
        }
    }
    if let Err(e) = presenter.await {
        warn!("Presenter ended abnormally: {}", e);
    }

    match store.sweep(None).await {
        Ok(n) => info!("Removed {} captures", n),
        Err(e) => warn!("Failed to sweep captures: {}", e),
    }

    match serde_json::to_string(&metrics.snapshot()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Kiosk stopped"),
        Err(e) => warn!("Failed to encode metrics: {}", e),
    }
    Ok(())
}

use anyhow::{Context, Result};
use claim_core::claim::ClaimSettings;
use claim_core::supervisor::KioskSettings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / kiosk.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   kiosk.toml:      [claim]
//                    timeout_secs = 15
//
//   env var:         KIOSK_CLAIM__TIMEOUT_SECS=15   (double underscore = nesting)
//
//   (single underscore stays within field names: KIOSK_LEDGER__BASE_URL)

pub const CONFIG_FILE_NAME: &str = "kiosk.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub detection: DetectionFileConfig,
    #[serde(default)]
    pub claim: ClaimFileConfig,
    #[serde(default)]
    pub ledger: LedgerFileConfig,
    #[serde(default)]
    pub card_reader: CardReaderFileConfig,
    #[serde(default)]
    pub telemetry: TelemetryFileConfig,
    #[serde(default)]
    pub audio: AudioFileConfig,
    #[serde(default)]
    pub presentation: PresentationFileConfig,
}

/// Camera and classification tunables (lives under `[detection]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionFileConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
    #[serde(default = "default_empty_timeout_secs")]
    pub empty_timeout_secs: u64,
    #[serde(default = "default_cue_cooldown_secs")]
    pub cue_cooldown_secs: u64,
    /// Program (and arguments) that captures and classifies one frame.
    /// Detection is disabled when unset.
    #[serde(default)]
    pub classifier_command: Option<Vec<String>>,
    /// Where captured frames are kept until released. Defaults to
    /// `<config-dir>/captures`.
    #[serde(default)]
    pub captures_dir: Option<PathBuf>,
    #[serde(default = "default_capture_max_age_secs")]
    pub capture_max_age_secs: u64,
}

impl Default for DetectionFileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            debounce_secs: default_debounce_secs(),
            min_confidence: default_min_confidence(),
            empty_timeout_secs: default_empty_timeout_secs(),
            cue_cooldown_secs: default_cue_cooldown_secs(),
            classifier_command: None,
            captures_dir: None,
            capture_max_age_secs: default_capture_max_age_secs(),
        }
    }
}

/// Claim window tunables (lives under `[claim]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimFileConfig {
    #[serde(default = "default_claim_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for ClaimFileConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_claim_timeout_secs(),
            tick_ms: default_tick_ms(),
        }
    }
}

/// Remote ledger (lives under `[ledger]`). Card redemption and telemetry
/// forwarding are disabled without a `base_url`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerFileConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LedgerFileConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Card reader (lives under `[card_reader]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CardReaderFileConfig {
    /// Line-oriented device or FIFO that yields one card id per line;
    /// `-` reads standard input.
    #[serde(default)]
    pub device: Option<String>,
}

/// Fill-level telemetry (lives under `[telemetry]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryFileConfig {
    /// Address for the JSON-lines telemetry listener
    #[serde(default)]
    pub listen: Option<SocketAddr>,
    #[serde(default = "default_significant_delta")]
    pub significant_delta: u8,
    #[serde(default = "default_full_threshold")]
    pub full_threshold: u8,
}

impl Default for TelemetryFileConfig {
    fn default() -> Self {
        Self {
            listen: None,
            significant_delta: default_significant_delta(),
            full_threshold: default_full_threshold(),
        }
    }
}

/// Audio cues (lives under `[audio]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AudioFileConfig {
    /// Player program; the sound file is appended as the last argument.
    /// Falls back to the first of `aplay`/`paplay`/`afplay` on PATH.
    #[serde(default)]
    pub player: Option<Vec<String>>,
    #[serde(default)]
    pub plastic_sound: Option<PathBuf>,
    #[serde(default)]
    pub aluminum_sound: Option<PathBuf>,
}

/// Display output (lives under `[presentation]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PresentationFileConfig {
    /// Mirror every sink event as a JSON line on stdout
    #[serde(default)]
    pub json_events: bool,
}

fn default_poll_interval_ms() -> u64 {
    100
}
fn default_debounce_secs() -> u64 {
    3
}
fn default_min_confidence() -> u8 {
    95
}
fn default_empty_timeout_secs() -> u64 {
    5
}
fn default_cue_cooldown_secs() -> u64 {
    6
}
fn default_capture_max_age_secs() -> u64 {
    3600
}
fn default_claim_timeout_secs() -> u64 {
    10
}
fn default_tick_ms() -> u64 {
    100
}
fn default_request_timeout_secs() -> u64 {
    5
}
fn default_significant_delta() -> u8 {
    5
}
fn default_full_threshold() -> u8 {
    90
}

impl FileConfig {
    /// Runtime settings for the claim core.
    pub fn kiosk_settings(&self) -> KioskSettings {
        KioskSettings {
            claim: ClaimSettings {
                claim_timeout: Duration::from_secs(self.claim.timeout_secs),
                debounce_window: Duration::from_secs(self.detection.debounce_secs),
                min_confidence: self.detection.min_confidence,
                empty_timeout: Duration::from_secs(self.detection.empty_timeout_secs),
                cue_cooldown: Duration::from_secs(self.detection.cue_cooldown_secs),
            },
            // A zero interval would make tokio panic
            tick: Duration::from_millis(self.claim.tick_ms.max(1)),
            poll_interval: Duration::from_millis(self.detection.poll_interval_ms.max(1)),
            request_timeout: Duration::from_secs(self.ledger.request_timeout_secs),
            significant_delta: self.telemetry.significant_delta,
            full_threshold: self.telemetry.full_threshold,
        }
    }
}

/// Build a figment that layers: defaults → kiosk.toml → KIOSK_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `KIOSK_CLAIM__TIMEOUT_SECS=15`  →  `claim.timeout_secs = 15`
///   `KIOSK_LEDGER__BASE_URL=...`    →  `ledger.base_url = "..."`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed("KIOSK_").split("__"))
}

// =============================================================================
// Directory layout (not tunable via figment, derived from --config-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct KioskDirs {
    pub config_dir: PathBuf,
    pub captures_dir: PathBuf,
}

impl KioskDirs {
    pub fn new(custom_dir: Option<PathBuf>, captures_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .context("Could not find a config directory")?
                .join("kiosk"),
        };

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

        let captures_dir = captures_dir.unwrap_or_else(|| config_dir.join("captures"));
        std::fs::create_dir_all(&captures_dir)
            .with_context(|| format!("Failed to create captures directory: {:?}", captures_dir))?;

        info!("Config directory: {}", config_dir.display());

        Ok(Self {
            config_dir,
            captures_dir,
        })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }
}

//! Fill-level telemetry from the container sensors.
//!
//! Sensors connect over TCP and send one JSON object per line:
//!
//! ```text
//! {"target":"contePlastico","state":"Medio","percent":45,"distance_cm":12.5,"deviceId":"esp32-a","ts":1700000000}
//! ```
//!
//! Lines are validated here; invalid ones reach the telemetry loop as
//! `AdapterError::Malformed` and are dropped there.

use anyhow::Context;
use async_trait::async_trait;
use claim_core::collaborators::TelemetrySource;
use claim_core::error::AdapterError;
use claim_core::telemetry::{ContainerId, FillState, TelemetryRecord};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FEED_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unknown target `{0}`")]
    UnknownTarget(String),

    #[error("unknown state `{0}`")]
    UnknownState(String),

    #[error("percent must be an integer in 0..=100, got {0}")]
    InvalidPercent(Value),

    #[error("`{0}` must be numeric, got {1}")]
    InvalidNumber(&'static str, Value),
}

impl From<PayloadError> for AdapterError {
    fn from(err: PayloadError) -> Self {
        AdapterError::Malformed(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    target: Option<String>,
    #[serde(alias = "estado")]
    state: Option<String>,
    #[serde(alias = "porcentaje")]
    percent: Option<Value>,
    #[serde(default)]
    distance_cm: Option<Value>,
    #[serde(rename = "deviceId", default)]
    device_id: Option<String>,
    #[serde(default)]
    ts: Option<Value>,
}

/// Firmware sends numbers either bare or quoted.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Integers may also arrive as integral floats (`45.0`).
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if let Value::String(s) = value {
        if let Ok(n) = s.trim().parse::<i64>() {
            return Some(n);
        }
    }
    as_number(value)
        .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
        .map(|f| f as i64)
}

/// Validate one sensor message.
pub fn parse_payload(line: &str) -> Result<TelemetryRecord, PayloadError> {
    let raw: RawPayload = serde_json::from_str(line)?;

    let target = raw.target.ok_or(PayloadError::MissingField("target"))?;
    let target = ContainerId::from_wire(&target).ok_or(PayloadError::UnknownTarget(target))?;

    let state = raw.state.ok_or(PayloadError::MissingField("state"))?;
    let state = FillState::from_wire(&state).ok_or(PayloadError::UnknownState(state))?;

    let percent = raw.percent.ok_or(PayloadError::MissingField("percent"))?;
    let percent = as_integer(&percent)
        .filter(|p| (0..=100).contains(p))
        .ok_or_else(|| PayloadError::InvalidPercent(percent.clone()))? as u8;

    let distance_cm = match raw.distance_cm {
        Some(v) => as_number(&v).ok_or(PayloadError::InvalidNumber("distance_cm", v))?,
        None => 0.0,
    };
    let ts = match raw.ts {
        Some(v) => as_integer(&v).ok_or(PayloadError::InvalidNumber("ts", v))?,
        None => 0,
    };

    Ok(TelemetryRecord {
        target,
        percent,
        state,
        distance_cm,
        device_id: raw.device_id.unwrap_or_else(|| "unknown".to_string()),
        ts,
    })
}

/// Receiving end of the listener. Yields `Ok(None)` once the listener has
/// stopped and every connection is closed.
pub struct TelemetryFeed {
    rx: mpsc::Receiver<Result<TelemetryRecord, AdapterError>>,
}

#[async_trait]
impl TelemetrySource for TelemetryFeed {
    async fn next_record(&mut self) -> Result<Option<TelemetryRecord>, AdapterError> {
        match self.rx.recv().await {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }
}

/// Bind the JSON-lines listener and start accepting sensor connections.
pub async fn spawn_telemetry_listener(
    addr: SocketAddr,
    cancel: CancellationToken,
) -> anyhow::Result<(TelemetryFeed, SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind telemetry listener on {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!("Telemetry listener on {}", local_addr);

    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    let task = tokio::spawn(accept_loop(listener, tx, cancel));
    Ok((TelemetryFeed { rx }, local_addr, task))
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Result<TelemetryRecord, AdapterError>>,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Sensor connected");
                    connections.spawn(read_connection(stream, peer, tx.clone(), cancel.clone()));
                }
                Err(e) => warn!("Failed to accept sensor connection: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(tx);
    while connections.join_next().await.is_some() {}
    debug!("Telemetry listener stopped");
}

async fn read_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<Result<TelemetryRecord, AdapterError>>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                let message = parse_payload(&line).map_err(AdapterError::from);
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%peer, "Sensor connection error: {}", e);
                break;
            }
        }
    }
    debug!(%peer, "Sensor disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_parse_full_payload() {
        let record = parse_payload(
            r#"{"target":"contePlastico","state":"Medio","percent":45,"distance_cm":12.5,"deviceId":"esp32-a","ts":1700000000}"#,
        )
        .unwrap();
        assert_eq!(
            record,
            TelemetryRecord {
                target: ContainerId::Plastic,
                percent: 45,
                state: FillState::Half,
                distance_cm: 12.5,
                device_id: "esp32-a".into(),
                ts: 1_700_000_000,
            }
        );
    }

    #[test]
    fn test_parse_defaults_and_aliases() {
        let record =
            parse_payload(r#"{"target":"conteAluminio","estado":"Full","porcentaje":100}"#).unwrap();
        assert_eq!(record.state, FillState::Full);
        assert_eq!(record.percent, 100);
        assert_eq!(record.distance_cm, 0.0);
        assert_eq!(record.device_id, "unknown");
        assert_eq!(record.ts, 0);
    }

    #[test]
    fn test_parse_rejects_invalid_payloads() {
        assert!(matches!(parse_payload("{oops"), Err(PayloadError::Json(_))));
        assert!(matches!(
            parse_payload(r#"{"state":"Medio","percent":4}"#),
            Err(PayloadError::MissingField("target"))
        ));
        assert!(matches!(
            parse_payload(r#"{"target":"conteVidrio","state":"Medio","percent":4}"#),
            Err(PayloadError::UnknownTarget(_))
        ));
        assert!(matches!(
            parse_payload(r#"{"target":"contePlastico","state":"Overflowing","percent":4}"#),
            Err(PayloadError::UnknownState(_))
        ));
        for percent in ["101", "-1", "45.5", "\"45.5\"", "\"lots\"", "true"] {
            let line = format!(
                r#"{{"target":"contePlastico","state":"Medio","percent":{}}}"#,
                percent
            );
            assert!(
                matches!(parse_payload(&line), Err(PayloadError::InvalidPercent(_))),
                "percent {} should be rejected",
                percent
            );
        }
    }

    #[test]
    fn test_parse_coerces_quoted_and_float_numbers() {
        let record = parse_payload(
            r#"{"target":"contePlastico","state":"Medio","percent":"45","distance_cm":"12.5","ts":"1700000000"}"#,
        )
        .unwrap();
        assert_eq!(record.percent, 45);
        assert_eq!(record.distance_cm, 12.5);
        assert_eq!(record.ts, 1_700_000_000);

        let record = parse_payload(
            r#"{"target":"contePlastico","state":"Medio","percent":45.0,"distance_cm":12,"ts":1700000000.0}"#,
        )
        .unwrap();
        assert_eq!(record.percent, 45);
        assert_eq!(record.distance_cm, 12.0);
        assert_eq!(record.ts, 1_700_000_000);

        assert!(matches!(
            parse_payload(r#"{"target":"contePlastico","state":"Medio","percent":4,"distance_cm":"far"}"#),
            Err(PayloadError::InvalidNumber("distance_cm", _))
        ));
        assert!(matches!(
            parse_payload(r#"{"target":"contePlastico","state":"Medio","percent":4,"ts":12.5}"#),
            Err(PayloadError::InvalidNumber("ts", _))
        ));
    }

    #[test]
    fn test_payload_errors_are_malformed() {
        let err: AdapterError = PayloadError::MissingField("state").into();
        assert!(matches!(err, AdapterError::Malformed(ref m) if m.contains("state")));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_listener_forwards_lines() {
        let cancel = CancellationToken::new();
        let (mut feed, addr, task) =
            spawn_telemetry_listener("127.0.0.1:0".parse().unwrap(), cancel.clone())
                .await
                .unwrap();

        let mut sensor = TcpStream::connect(addr).await.unwrap();
        sensor
            .write_all(
                b"{\"target\":\"contePlastico\",\"state\":\"Vacio\",\"percent\":3}\n\nnot json\n",
            )
            .await
            .unwrap();

        let record = feed.next_record().await.unwrap().unwrap();
        assert_eq!(record.target, ContainerId::Plastic);
        assert_eq!(record.state, FillState::Empty);
        assert!(matches!(
            feed.next_record().await,
            Err(AdapterError::Malformed(_))
        ));

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(feed.next_record().await.unwrap(), None);
    }
}

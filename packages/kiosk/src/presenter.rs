//! Drains the sink channel: every event becomes a log line and, when
//! enabled, a JSON line for an external display process.

use claim_core::sink::{Severity, SinkEvent};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

fn log_event(event: &SinkEvent) {
    match event {
        SinkEvent::Status { message, severity } => match severity {
            Severity::Info | Severity::Success => info!(target: "kiosk::display", "{}", message),
            Severity::Warning => warn!(target: "kiosk::display", "{}", message),
            Severity::Error => error!(target: "kiosk::display", "{}", message),
        },
        SinkEvent::PendingClaim {
            material: Some(material),
            points: Some(points),
        } => info!(target: "kiosk::display", %material, points, "Pending claim"),
        SinkEvent::PendingClaim { .. } => info!(target: "kiosk::display", "Pending claim cleared"),
        SinkEvent::ClaimGranted { name, new_total } => {
            info!(target: "kiosk::display", %name, new_total, "Claim granted")
        }
        SinkEvent::Container {
            container,
            percent,
            state,
        } => debug!(target: "kiosk::display", %container, percent, %state, "Container level"),
    }
}

/// Consume events until every sink clone is dropped.
pub async fn run_presenter<W>(mut events: mpsc::Receiver<SinkEvent>, mut json_out: Option<W>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        log_event(&event);

        let Some(out) = json_out.as_mut() else {
            continue;
        };
        let mut line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode display event: {}", e);
                continue;
            }
        };
        line.push(b'\n');
        let written = async {
            out.write_all(&line).await?;
            out.flush().await
        };
        if let Err(e) = written.await {
            warn!("Display output closed, JSON events disabled: {}", e);
            json_out = None;
        }
    }
    debug!("Presenter stopped");
}

//! Classifier that shells out to an external capture-and-classify program.
//!
//! The program receives the capture path as its last argument, writes the
//! frame there, and prints one JSON object on stdout:
//!
//! ```text
//! {"label": "aluminio", "confidence": 0.97}
//! {"label": null}
//! ```

use anyhow::{Context, bail};
use async_trait::async_trait;
use claim_core::collaborators::{ArtifactRef, ArtifactStore, Classifier, Detection};
use claim_core::error::AdapterError;
use claim_core::material::{Label, confidence_percent};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::artifacts::FileArtifactStore;

#[derive(Debug, Deserialize)]
struct ClassifierOutput {
    #[serde(default)]
    label: Option<String>,
    /// Model score in 0.0..=1.0
    #[serde(default)]
    confidence: f64,
}

pub struct CommandClassifier {
    program: PathBuf,
    args: Vec<String>,
    store: Arc<FileArtifactStore>,
    min_confidence: u8,
    timeout: Duration,
}

impl CommandClassifier {
    pub fn new(
        argv: &[String],
        store: Arc<FileArtifactStore>,
        min_confidence: u8,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("classifier_command is empty");
        };
        let program = which::which(program)
            .with_context(|| format!("Classifier program not found: {}", program))?;
        Ok(Self {
            program,
            args: args.to_vec(),
            store,
            min_confidence,
            timeout,
        })
    }

    async fn run(&self, capture: &std::path::Path) -> Result<ClassifierOutput, AdapterError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(capture)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| AdapterError::Timeout)?
            .map_err(|e| AdapterError::Unavailable(format!("failed to run classifier: {}", e)))?;

        if !output.status.success() {
            return Err(AdapterError::Unavailable(format!(
                "classifier exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| AdapterError::Malformed(format!("classifier output: {}", e)))
    }

    async fn discard(&self, artifact: ArtifactRef) {
        if let Err(e) = self.store.release(artifact).await {
            warn!("Failed to release dropped frame: {}", e);
        }
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    async fn detect(&self) -> Result<Option<Detection>, AdapterError> {
        let (artifact, path) = self.store.allocate();

        let output = match self.run(&path).await {
            Ok(output) => output,
            Err(e) => {
                self.discard(artifact).await;
                return Err(e);
            }
        };

        let Some(class_name) = output.label else {
            self.discard(artifact).await;
            return Ok(None);
        };
        let Some(label) = Label::from_class_name(&class_name) else {
            debug!(class = %class_name, "Dropping out-of-vocabulary class");
            self.discard(artifact).await;
            return Ok(None);
        };
        let confidence = confidence_percent(output.confidence);
        if confidence < self.min_confidence {
            self.discard(artifact).await;
            return Ok(None);
        }

        let artifact = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            Some(artifact)
        } else {
            None
        };
        Ok(Some(Detection {
            label,
            confidence,
            artifact,
        }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use claim_core::material::Material;

    fn classifier(script: &str, dir: &std::path::Path) -> CommandClassifier {
        let argv: Vec<String> = ["sh", "-c", script, "classify"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        CommandClassifier::new(
            &argv,
            Arc::new(FileArtifactStore::new(dir)),
            95,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn captures(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_confident_detection_keeps_capture() {
        let tmp = tempfile::tempdir().unwrap();
        let c = classifier(
            r#"printf jpeg > "$1"; echo '{"label":"aluminio","confidence":0.97}'"#,
            tmp.path(),
        );

        let detection = c.detect().await.unwrap().unwrap();
        assert_eq!(detection.label, Label::Material(Material::Aluminum));
        assert_eq!(detection.confidence, 97);
        let artifact = detection.artifact.unwrap();
        assert!(tmp.path().join(artifact.as_str()).exists());
    }

    #[tokio::test]
    async fn test_low_confidence_frame_is_dropped_and_released() {
        let tmp = tempfile::tempdir().unwrap();
        let c = classifier(
            r#"printf jpeg > "$1"; echo '{"label":"plastico","confidence":0.90}'"#,
            tmp.path(),
        );

        assert_eq!(c.detect().await.unwrap(), None);
        assert_eq!(captures(tmp.path()), 0);
    }

    #[tokio::test]
    async fn test_unknown_class_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let c = classifier(
            r#"printf jpeg > "$1"; echo '{"label":"glass","confidence":0.99}'"#,
            tmp.path(),
        );

        assert_eq!(c.detect().await.unwrap(), None);
        assert_eq!(captures(tmp.path()), 0);
    }

    #[tokio::test]
    async fn test_no_label_means_nothing_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let c = classifier(r#"echo '{"label":null}'"#, tmp.path());
        assert_eq!(c.detect().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_label_without_capture() {
        let tmp = tempfile::tempdir().unwrap();
        let c = classifier(r#"echo '{"label":"vacio","confidence":1.0}'"#, tmp.path());
        let detection = c.detect().await.unwrap().unwrap();
        assert_eq!(detection.label, Label::Empty);
        assert_eq!(detection.artifact, None);
    }

    #[tokio::test]
    async fn test_failures_map_to_adapter_errors() {
        let tmp = tempfile::tempdir().unwrap();

        let c = classifier(r#"printf jpeg > "$1"; echo 'camera busy' >&2; exit 3"#, tmp.path());
        let err = c.detect().await.unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(ref m) if m.contains("camera busy")));
        assert_eq!(captures(tmp.path()), 0);

        let c = classifier("echo not-json", tmp.path());
        assert!(matches!(
            c.detect().await.unwrap_err(),
            AdapterError::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_hung_classifier_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let argv: Vec<String> = ["sh", "-c", "sleep 5", "classify"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let c = CommandClassifier::new(
            &argv,
            Arc::new(FileArtifactStore::new(tmp.path())),
            95,
            Duration::from_millis(100),
        )
        .unwrap();
        assert!(matches!(c.detect().await.unwrap_err(), AdapterError::Timeout));
    }

    #[test]
    fn test_missing_program_is_a_startup_error() {
        let argv = vec!["definitely-not-a-classifier-xyz".to_string()];
        let result = CommandClassifier::new(
            &argv,
            Arc::new(FileArtifactStore::new("/tmp")),
            95,
            Duration::from_secs(1),
        );
        assert!(result.is_err());
        assert!(CommandClassifier::new(&[], Arc::new(FileArtifactStore::new("/tmp")), 95, Duration::from_secs(1)).is_err());
    }
}

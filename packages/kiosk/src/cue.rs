use claim_core::collaborators::CuePlayer;
use claim_core::material::Material;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AudioFileConfig;

const FALLBACK_PLAYERS: &[&str] = &["aplay", "paplay", "afplay"];

/// Plays cue sounds through an external player. Each cue is fire-and-forget.
pub struct CommandCuePlayer {
    program: PathBuf,
    args: Vec<String>,
    plastic_sound: Option<PathBuf>,
    aluminum_sound: Option<PathBuf>,
}

impl CommandCuePlayer {
    fn sound_for(&self, material: Material) -> Option<&PathBuf> {
        match material {
            Material::Plastic => self.plastic_sound.as_ref(),
            Material::Aluminum => self.aluminum_sound.as_ref(),
        }
    }
}

impl CuePlayer for CommandCuePlayer {
    fn play(&self, material: Material) {
        let Some(sound) = self.sound_for(material) else {
            debug!(?material, "No cue sound configured");
            return;
        };

        let spawned = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(sound)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                tokio::spawn(async move {
                    if let Err(e) = child.wait().await {
                        debug!("Cue player did not exit cleanly: {}", e);
                    }
                });
            }
            Err(e) => warn!("Failed to play cue for {}: {}", material, e),
        }
    }
}

/// Used when no audio is configured; cues only show up in the debug log.
pub struct LogCuePlayer;

impl CuePlayer for LogCuePlayer {
    fn play(&self, material: Material) {
        debug!(?material, "Cue");
    }
}

fn resolve_player(config: &AudioFileConfig) -> Option<(PathBuf, Vec<String>)> {
    match &config.player {
        Some(argv) => {
            let (program, args) = argv.split_first()?;
            match which::which(program) {
                Ok(path) => Some((path, args.to_vec())),
                Err(e) => {
                    warn!("Audio player {} not found: {}", program, e);
                    None
                }
            }
        }
        None => FALLBACK_PLAYERS
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(|path| (path, Vec::new())),
    }
}

/// Pick a cue player from the `[audio]` section.
pub fn build_cue_player(config: &AudioFileConfig) -> Arc<dyn CuePlayer> {
    if config.plastic_sound.is_none() && config.aluminum_sound.is_none() {
        return Arc::new(LogCuePlayer);
    }
    match resolve_player(config) {
        Some((program, args)) => {
            debug!(player = %program.display(), "Audio cues enabled");
            Arc::new(CommandCuePlayer {
                program,
                args,
                plastic_sound: config.plastic_sound.clone(),
                aluminum_sound: config.aluminum_sound.clone(),
            })
        }
        None => {
            warn!("No audio player available, cues disabled");
            Arc::new(LogCuePlayer)
        }
    }
}

//! Audio cue throttling.

use std::time::Duration;
use tokio::time::Instant;

use crate::material::Material;

pub const DEFAULT_CUE_COOLDOWN: Duration = Duration::from_secs(6);

/// Plays a material cue when the material changed since the last cue, or the
/// same material has been quiet for at least the cooldown.
pub struct CueThrottle {
    last: Option<(Material, Instant)>,
    cooldown: Duration,
}

impl Default for CueThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_CUE_COOLDOWN)
    }
}

impl CueThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last: None,
            cooldown,
        }
    }

    pub fn should_cue(&mut self, material: Material, now: Instant) -> bool {
        let play = match self.last {
            Some((last, at)) if last == material => {
                now.saturating_duration_since(at) >= self.cooldown
            }
            _ => true,
        };
        if play {
            self.last = Some((material, now));
        }
        play
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_material_waits_for_cooldown() {
        let mut throttle = CueThrottle::default();
        let t0 = Instant::now();
        assert!(throttle.should_cue(Material::Plastic, t0));
        assert!(!throttle.should_cue(Material::Plastic, t0 + Duration::from_secs(5)));
        assert!(throttle.should_cue(Material::Plastic, t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_material_change_cues_immediately() {
        let mut throttle = CueThrottle::default();
        let t0 = Instant::now();
        assert!(throttle.should_cue(Material::Plastic, t0));
        assert!(throttle.should_cue(Material::Aluminum, t0 + Duration::from_millis(10)));
        assert!(throttle.should_cue(Material::Plastic, t0 + Duration::from_millis(20)));
    }
}

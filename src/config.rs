use log::warn;

/// Process-wide debug options. Read from the environment exactly once, at
/// instance creation, and captured into the instance so a run's behavior
/// doesn't change under its feet when the environment does.
#[derive(Copy, Clone, Debug)]
pub struct RuntimeConfig {
    /// Log per-frame pacing timestamps at info level.
    pub frame_timing_spew: bool,
    /// Inter-eye distance used when a device doesn't report its own.
    pub default_ipd_meters: f32,
    /// Ask the native compositor to synchronize submissions with timeline
    /// semaphores even when it would not pick them on its own.
    pub force_timeline_semaphores: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame_timing_spew: false,
            default_ipd_meters: 0.063,
            force_timeline_semaphores: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            frame_timing_spew: env_bool("CORTEXR_FRAME_TIMING", defaults.frame_timing_spew),
            default_ipd_meters: env_f32("CORTEXR_IPD_METERS", defaults.default_ipd_meters),
            force_timeline_semaphores: env_bool(
                "CORTEXR_TIMELINE_SEMAPHORES",
                defaults.force_timeline_semaphores,
            ),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => match v.as_str() {
            "1" | "true" | "on" => true,
            "0" | "false" | "off" => false,
            other => {
                warn!("Ignoring unparseable {name}={other:?}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_f32(name: &str, default: f32) -> f32 {
    match std::env::var(name) {
        Ok(v) => match v.parse::<f32>() {
            Ok(f) if f.is_finite() && f > 0.0 => f,
            _ => {
                warn!("Ignoring unparseable {name}={v:?}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let config = RuntimeConfig::default();
        assert!(!config.frame_timing_spew);
        assert!(config.default_ipd_meters > 0.0);
    }
}

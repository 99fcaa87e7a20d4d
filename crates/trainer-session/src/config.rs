//! Session configuration from defaults and environment variables.

use std::env;
use std::time::Duration;

/// Controller tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay before an automated opponent reply, counted from the moment
    /// the board animation settled.
    pub opponent_delay: Duration,

    /// Whether the user may enter Edit mode.
    pub allow_edit: bool,

    /// Seed for the opponent-move RNG. None = OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            opponent_delay: Duration::from_millis(350),
            allow_edit: true,
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = env::var("OPPONENT_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            cfg.opponent_delay = Duration::from_millis(ms);
        }
        if let Ok(v) = env::var("ALLOW_EDIT") {
            cfg.allow_edit = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Some(seed) = env::var("TRAINER_RNG_SEED")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            cfg.rng_seed = Some(seed);
        }
        cfg
    }
}

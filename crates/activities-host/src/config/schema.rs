use std::time::Duration;

use serde::Deserialize;
use activities_core::error::{ActivityError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivitiesConfig {
    pub version: u32,

    /// Advertise `MessageChannel` support in the `connect` command. Replaces
    /// user-agent sniffing: set it where window messaging is unreliable.
    #[serde(default)]
    pub accepts_channel: bool,

    /// How long a popup host waits for `start` before degrading to redirect.
    #[serde(default = "default_popup_connect_timeout_ms")]
    pub popup_connect_timeout_ms: u64,

    /// Delay between `resized()` and the re-measurement it triggers.
    #[serde(default = "default_resize_debounce_ms")]
    pub resize_debounce_ms: u64,
}

impl Default for ActivitiesConfig {
    fn default() -> Self {
        Self {
            version: 1,
            accepts_channel: false,
            popup_connect_timeout_ms: default_popup_connect_timeout_ms(),
            resize_debounce_ms: default_resize_debounce_ms(),
        }
    }
}

impl ActivitiesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ActivityError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        if !(100..=60000).contains(&self.popup_connect_timeout_ms) {
            return Err(ActivityError::Config(
                "popup_connect_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        if self.resize_debounce_ms > 1000 {
            return Err(ActivityError::Config(
                "resize_debounce_ms must be at most 1000".into(),
            ));
        }
        Ok(())
    }

    pub fn popup_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.popup_connect_timeout_ms)
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}

fn default_popup_connect_timeout_ms() -> u64 {
    5000
}
fn default_resize_debounce_ms() -> u64 {
    50
}

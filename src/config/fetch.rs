use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_FETCH_CYCLE_SECS;
use crate::Error;
use crate::Result;

/// Pacing of the background property poll.
///
/// The cycle starts at `initial_cycle_secs` and follows the observed scrape
/// interval within `[min_cycle_secs, max_cycle_secs]`; differences up to
/// `margin_secs` are tolerated without adjustment.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_initial_cycle_secs")]
    pub initial_cycle_secs: u64,

    #[serde(default = "default_min_cycle_secs")]
    pub min_cycle_secs: u64,

    #[serde(default = "default_max_cycle_secs")]
    pub max_cycle_secs: u64,

    #[serde(default = "default_margin_secs")]
    pub margin_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            initial_cycle_secs: default_initial_cycle_secs(),
            min_cycle_secs: default_min_cycle_secs(),
            max_cycle_secs: default_max_cycle_secs(),
            margin_secs: default_margin_secs(),
        }
    }
}

impl FetchConfig {
    pub fn initial_cycle(&self) -> Duration {
        Duration::from_secs(self.initial_cycle_secs)
    }

    pub fn min_cycle(&self) -> Duration {
        Duration::from_secs(self.min_cycle_secs)
    }

    pub fn max_cycle(&self) -> Duration {
        Duration::from_secs(self.max_cycle_secs)
    }

    pub fn margin(&self) -> Duration {
        Duration::from_secs(self.margin_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_cycle_secs == 0 {
            return Err(Error::InvalidConfig("fetch.min_cycle_secs must be > 0".into()));
        }
        if self.min_cycle_secs > self.max_cycle_secs {
            return Err(Error::InvalidConfig(format!(
                "fetch.min_cycle_secs {} exceeds fetch.max_cycle_secs {}",
                self.min_cycle_secs, self.max_cycle_secs
            )));
        }
        if !(self.min_cycle_secs..=self.max_cycle_secs).contains(&self.initial_cycle_secs) {
            return Err(Error::InvalidConfig(format!(
                "fetch.initial_cycle_secs {} outside [{}, {}]",
                self.initial_cycle_secs, self.min_cycle_secs, self.max_cycle_secs
            )));
        }
        Ok(())
    }
}

fn default_initial_cycle_secs() -> u64 {
    DEFAULT_FETCH_CYCLE_SECS
}
fn default_min_cycle_secs() -> u64 {
    5
}
fn default_max_cycle_secs() -> u64 {
    300
}
fn default_margin_secs() -> u64 {
    2
}

use std::time::Duration;

use crate::FetchConfig;

/// Cycle duration that follows the observed scrape interval.
///
/// After each cycle the duration moves halfway toward the scrape interval
/// when the two differ by more than the margin, and always stays within
/// `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePacer {
    current: Duration,
    min: Duration,
    max: Duration,
    margin: Duration,
}

impl CyclePacer {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            current: config.initial_cycle().max(config.min_cycle()).min(config.max_cycle()),
            min: config.min_cycle(),
            max: config.max_cycle(),
            margin: config.margin(),
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Applies one observation. Without a scrape interval (fewer than two
    /// scrapes so far) the cycle is left alone.
    pub fn adjust(
        &mut self,
        scrape_interval: Option<Duration>,
    ) -> Duration {
        let Some(observed) = scrape_interval else {
            return self.current;
        };

        let next = if observed > self.current + self.margin {
            self.current + (observed - self.current) / 2
        } else if observed + self.margin < self.current {
            self.current - (self.current - observed) / 2
        } else {
            self.current
        };
        self.current = next.max(self.min).min(self.max);
        self.current
    }
}

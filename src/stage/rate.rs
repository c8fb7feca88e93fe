//! Timed stages

use std::time::Duration;

use super::Stage;
use crate::event::ValueEvent;

/// Re-emits the latest event every period, whatever the upstream cadence
///
/// The first event goes out at once; the node's ticker then repeats the
/// latest one, with a fresh timestamp if the event carries one.
#[derive(Debug)]
pub struct Rate {
    period: Duration,
    latest: Option<ValueEvent>,
}

impl Rate {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            latest: None,
        }
    }
}

impl Stage for Rate {
    fn name(&self) -> &'static str {
        "rate"
    }

    fn process(&mut self, event: ValueEvent) -> Option<ValueEvent> {
        let first = self.latest.is_none();
        self.latest = Some(event.clone());
        first.then_some(event)
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.period)
    }

    fn on_tick(&mut self) -> Option<ValueEvent> {
        let mut event = self.latest.clone()?;
        if event.timestamp().is_some() {
            event.refresh_timestamp();
        }
        Some(event)
    }
}

/// Emits at most once per period, latest value wins
///
/// Events arriving between ticks are coalesced and the newest is flushed on
/// the next tick, restamped like [`Rate`] does. A tick with nothing pending
/// arms the stage so the next event passes straight through.
#[derive(Debug)]
pub struct RateLimit {
    period: Duration,
    pending: Option<ValueEvent>,
    armed: bool,
}

impl RateLimit {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            pending: None,
            armed: false,
        }
    }
}

impl Stage for RateLimit {
    fn name(&self) -> &'static str {
        "ratelimit"
    }

    fn process(&mut self, event: ValueEvent) -> Option<ValueEvent> {
        if self.armed {
            self.armed = false;
            return Some(event);
        }
        self.pending = Some(event);
        None
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.period)
    }

    fn on_tick(&mut self) -> Option<ValueEvent> {
        match self.pending.take() {
            Some(mut event) => {
                if event.timestamp().is_some() {
                    event.refresh_timestamp();
                }
                Some(event)
            }
            None => {
                self.armed = true;
                None
            }
        }
    }
}

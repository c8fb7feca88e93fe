//! Simulated driver
//!
//! Synthetic waveforms for demos and soak tests. Each connection runs its
//! own generator task on the multi-threaded side of the runtime and feeds
//! the broker through a [`DriverPublisher`], the same way a real client
//! library callback would.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};

use super::driver::{Driver, DriverConnection};
use super::publisher::DriverPublisher;
use crate::event::{
    format_number, number_to_json, ValueEvent, CHAR_VALUE, NAME, PRECISION, UNITS, VALUE,
};

/// Shape of a simulated source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    /// Increments by one every update
    Counter,
}

impl Waveform {
    /// Waveform served under a source name
    pub fn from_source(source: &str) -> Option<Self> {
        match source.to_ascii_lowercase().as_str() {
            "sine" => Some(Waveform::Sine),
            "square" => Some(Waveform::Square),
            "sawtooth" | "ramp" => Some(Waveform::Sawtooth),
            "counter" => Some(Waveform::Counter),
            _ => None,
        }
    }

    /// Unit-amplitude sample at `phase` (cycles), or the counter value at `step`
    pub fn sample(&self, phase: f64, step: u64) -> f64 {
        let frac = phase.fract();
        match self {
            Waveform::Sine => (frac * std::f64::consts::TAU).sin(),
            Waveform::Square => {
                if frac < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * frac - 1.0,
            Waveform::Counter => step as f64,
        }
    }
}

/// Driver serving synthetic waveforms
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    update_interval: Duration,
    cycle: Duration,
    amplitude: f64,
    offset: f64,
    precision: u32,
    units: String,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(100),
            cycle: Duration::from_secs(10),
            amplitude: 1.0,
            offset: 0.0,
            precision: 3,
            units: String::new(),
        }
    }
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how often a new sample is published
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the waveform period
    pub fn cycle(mut self, cycle: Duration) -> Self {
        self.cycle = cycle.max(Duration::from_millis(1));
        self
    }

    pub fn amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Event for update number `step` of `waveform`
    pub fn event(&self, source: &str, waveform: Waveform, step: u64) -> ValueEvent {
        let elapsed = self.update_interval.as_secs_f64() * step as f64;
        let phase = elapsed / self.cycle.as_secs_f64();
        let v = match waveform {
            Waveform::Counter => waveform.sample(phase, step),
            _ => self.offset + self.amplitude * waveform.sample(phase, step),
        };

        let mut event = ValueEvent::new()
            .with(NAME, source)
            .with(PRECISION, self.precision)
            .with(CHAR_VALUE, format_number(v, Some(self.precision)));
        event.set(VALUE, number_to_json(v));
        if !self.units.is_empty() {
            event.set(UNITS, self.units.as_str());
        }
        event.refresh_timestamp();
        event
    }

    async fn generate(self, publisher: DriverPublisher, waveform: Waveform) {
        let mut interval = time::interval(self.update_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        publisher.connected();
        let mut step = 0u64;
        loop {
            tokio::select! {
                _ = publisher.closed() => break,
                _ = interval.tick() => {
                    if !publisher.value(self.event(publisher.name(), waveform, step)) {
                        break;
                    }
                    step = step.wrapping_add(1);
                }
            }
        }
        tracing::debug!(source = %publisher.name(), updates = step, "Simulated source stopped");
    }
}

impl Driver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn connect(&self, source: &str) -> DriverConnection {
        let (publisher, connection) = DriverConnection::channel(source);
        match Waveform::from_source(source) {
            Some(waveform) => {
                tracing::debug!(source = %source, waveform = ?waveform, "Starting simulated source");
                tokio::spawn(self.clone().generate(publisher, waveform));
            }
            None => {
                publisher.failed(format!("unknown simulated source '{}'", source));
            }
        }
        connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DriverEvent;

    #[test]
    fn test_waveform_names() {
        assert_eq!(Waveform::from_source("SINE"), Some(Waveform::Sine));
        assert_eq!(Waveform::from_source("ramp"), Some(Waveform::Sawtooth));
        assert_eq!(Waveform::from_source("noise"), None);
    }

    #[test]
    fn test_samples() {
        assert!(Waveform::Sine.sample(0.0, 0).abs() < 1e-12);
        assert!((Waveform::Sine.sample(0.25, 0) - 1.0).abs() < 1e-12);
        assert_eq!(Waveform::Square.sample(0.75, 0), -1.0);
        assert_eq!(Waveform::Sawtooth.sample(0.5, 0), 0.0);
        assert_eq!(Waveform::Counter.sample(0.9, 42), 42.0);
    }

    #[test]
    fn test_event_shape() {
        let driver = SimulatedDriver::new()
            .update_interval(Duration::from_secs(1))
            .cycle(Duration::from_secs(4))
            .amplitude(10.0)
            .offset(5.0)
            .precision(1)
            .units("mA");

        let event = driver.event("sine", Waveform::Sine, 1);
        assert_eq!(event.numeric_value().unwrap(), 15.0);
        assert_eq!(event.char_value(), Some("15.0"));
        assert_eq!(event.name(), Some("sine"));
        assert_eq!(event.get(UNITS), Some(&serde_json::json!("mA")));
        assert!(event.timestamp().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generates_until_closed() {
        let driver = SimulatedDriver::new().update_interval(Duration::from_millis(10));
        let mut connection = driver.connect("counter");

        assert_eq!(connection.next().await, Some(DriverEvent::Connected));
        for expected in 0..3 {
            match connection.next().await {
                Some(DriverEvent::Value(event)) => {
                    assert_eq!(event.numeric_value().unwrap(), expected as f64)
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_source_fails() {
        let mut connection = SimulatedDriver::new().connect("noise");
        assert!(matches!(connection.next().await, Some(DriverEvent::Failed(_))));
    }
}

//! Notification channels

use serde_json::Value;

use crate::event::ValueEvent;

/// Delivers notification messages to destinations
///
/// Implementations own their transport (mail relay, SMS gateway, ...). Sends
/// are fire-and-forget: a channel that does I/O should spawn it and log its
/// own failures.
pub trait NotificationChannel {
    /// Name the channel is configured under
    fn name(&self) -> &str;

    fn send(&self, url: &str, message: &str, destination: &str);
}

/// Channel that writes notifications to the log
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new("log")
    }
}

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, url: &str, message: &str, destination: &str) {
        tracing::info!(
            channel = %self.name,
            url = %url,
            destination = %destination,
            message = %message,
            "Notification"
        );
    }
}

/// Message text for an update of `url`
///
/// `"<name>: <reading>"`, where the name is the event's `name` field (else
/// the URL) and the reading is `char_value`, else `value`, else `(UNKNOWN)`.
pub fn format_message(url: &str, event: &ValueEvent) -> String {
    let name = event.name().unwrap_or(url);
    let reading = match (event.char_value(), event.value()) {
        (Some(text), _) => text.to_string(),
        (None, Some(Value::String(text))) => text.clone(),
        (None, Some(value)) => value.to_string(),
        (None, None) => "(UNKNOWN)".to_string(),
    };
    format!("{}: {}", name, reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CHAR_VALUE, NAME, VALUE};

    #[test]
    fn test_message_prefers_char_value() {
        let event = ValueEvent::new()
            .with(NAME, "Ring Current")
            .with(VALUE, 250.123)
            .with(CHAR_VALUE, "250.1");
        assert_eq!(format_message("epics:pv", &event), "Ring Current: 250.1");
    }

    #[test]
    fn test_message_falls_back_to_value_and_url() {
        let event = ValueEvent::new().with(VALUE, 3);
        assert_eq!(format_message("epics:pv", &event), "epics:pv: 3");

        let event = ValueEvent::new().with(VALUE, "OPEN");
        assert_eq!(format_message("epics:valve", &event), "epics:valve: OPEN");
    }

    #[test]
    fn test_message_unknown() {
        let event = ValueEvent::new().with(NAME, "pv");
        assert_eq!(format_message("epics:pv", &event), "pv: (UNKNOWN)");
    }
}

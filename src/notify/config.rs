//! Notifier configuration file
//!
//! INI-style: one section per request URL, one option per notifier (keyed by
//! its channel name) listing destinations, each with an optional expiry in
//! parentheses.
//!
//! ```text
//! [epics:ring:current?threshold=10]
//! mail = ops@example.org, night@example.org (2026-12-31 06:00)
//! sms  = +15550100 (12/31/2026)
//! ```
//!
//! A date without a time expires at the end of that day (UTC). A
//! [`ConfigWatcher`] polls the file's modification time and reconciles every
//! notifier whenever it changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::notifier::{Destinations, Expiry, Notifier};
use crate::error::{Error, Result};

// Two-digit years go first: `%Y` would also accept them
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%y", "%m/%d/%Y"];
const TIME_FORMATS: &[&str] = &["%H:%M", "%I:%M%p", "%I:%M %p"];

/// Parse an expiry stamp
///
/// Accepts RFC 3339, or one of the date formats optionally followed by a
/// time. A bare date means the end of that day.
pub fn parse_expiry(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }

    for date_fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, date_fmt) {
            let end = date.and_hms_opt(23, 59, 59)?;
            return Some(end.and_utc());
        }
        for time_fmt in TIME_FORMATS {
            let fmt = format!("{} {}", date_fmt, time_fmt);
            if let Ok(at) = NaiveDateTime::parse_from_str(text, &fmt) {
                return Some(at.and_utc());
            }
        }
    }
    None
}

/// Parsed configuration: channel name → URL → destinations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifierConfig {
    channels: BTreeMap<String, BTreeMap<String, Destinations>>,
}

/// What a reconcile pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Destinations registered or re-registered
    pub registered: usize,
    /// Destinations removed
    pub unregistered: usize,
    /// Registrations the broker refused
    pub failed: usize,
}

impl NotifierConfig {
    /// Parse configuration text
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut section: Option<String> = None;
        let mut option: Option<(String, String)> = None;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Indented lines continue the previous value
            if raw.starts_with(char::is_whitespace) {
                if let Some((_, value)) = option.as_mut() {
                    value.push(' ');
                    value.push_str(trimmed);
                    continue;
                }
            }

            if let Some((name, value)) = option.take() {
                config.add_option(section.as_deref(), &name, &value);
            }

            if let Some(header) = trimmed.strip_prefix('[') {
                let name = header.strip_suffix(']').ok_or_else(|| {
                    Error::Config(format!("line {}: unterminated section header", line_no))
                })?;
                section = Some(name.trim().to_string());
                continue;
            }

            if section.is_none() {
                return Err(Error::Config(format!(
                    "line {}: option outside of a section",
                    line_no
                )));
            }

            let split = trimmed.find(['=', ':']).ok_or_else(|| {
                Error::Config(format!("line {}: expected 'name = value'", line_no))
            })?;
            let name = trimmed[..split].trim().to_ascii_lowercase();
            let value = trimmed[split + 1..].trim().to_string();
            option = Some((name, value));
        }

        if let Some((name, value)) = option.take() {
            config.add_option(section.as_deref(), &name, &value);
        }

        Ok(config)
    }

    fn add_option(&mut self, section: Option<&str>, channel: &str, value: &str) {
        let Some(url) = section.filter(|s| !s.is_empty()) else {
            return;
        };
        if channel.is_empty() {
            return;
        }

        let destinations = self
            .channels
            .entry(channel.to_string())
            .or_default()
            .entry(url.to_string())
            .or_default();

        for item in value.split(',') {
            let (destination, expiry) = match item.split_once('(') {
                Some((destination, rest)) => {
                    let stamp = rest.trim().trim_end_matches(')');
                    match parse_expiry(stamp) {
                        Some(at) => (destination.trim(), Some(at)),
                        None => {
                            tracing::warn!(
                                url = %url,
                                destination = %destination.trim(),
                                expiry = %stamp,
                                "Unreadable expiry, destination skipped"
                            );
                            continue;
                        }
                    }
                }
                None => (item.trim(), None),
            };
            if destination.is_empty() {
                continue;
            }
            destinations.insert(destination.to_string(), expiry);
        }
    }

    /// URLs and destinations configured for `channel`
    pub fn channel(&self, channel: &str) -> Option<&BTreeMap<String, Destinations>> {
        self.channels.get(channel)
    }

    /// Configured channel names
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Make `notifier` match this configuration
    ///
    /// Every configured destination is (re-)registered so expiry changes
    /// apply; registered destinations missing from the configuration are
    /// removed.
    pub fn apply(&self, notifier: &Notifier) -> ReconcileSummary {
        let empty = BTreeMap::new();
        let configured = self.channel(notifier.name()).unwrap_or(&empty);
        let registered = notifier.registered();
        let mut summary = ReconcileSummary::default();

        for (url, destinations) in configured {
            for (destination, expiry) in destinations {
                match notifier.register(url, destination, *expiry) {
                    Ok(()) => summary.registered += 1,
                    Err(_) => summary.failed += 1,
                }
            }
        }

        for (url, destinations) in &registered {
            let keep = configured.get(url);
            for destination in destinations.keys() {
                if !keep.is_some_and(|k| k.contains_key(destination))
                    && notifier.unregister(url, destination)
                {
                    summary.unregistered += 1;
                }
            }
        }

        tracing::debug!(
            channel = %notifier.name(),
            registered = summary.registered,
            unregistered = summary.unregistered,
            failed = summary.failed,
            "Notifier reconciled"
        );
        summary
    }
}

impl FromStr for NotifierConfig {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        Self::parse(text)
    }
}

/// Reloads a configuration file into a set of notifiers when it changes
pub struct ConfigWatcher {
    path: PathBuf,
    notifiers: Vec<Notifier>,
    interval: Duration,
    loaded: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            notifiers: Vec::new(),
            interval: Duration::from_secs(10),
            loaded: None,
        }
    }

    /// Set how often the file is checked
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn add_notifier(&mut self, notifier: Notifier) {
        self.notifiers.push(notifier);
    }

    /// Stop managing the notifier named `name`; its registrations stay
    pub fn remove_notifier(&mut self, name: &str) -> bool {
        let before = self.notifiers.len();
        self.notifiers.retain(|n| n.name() != name);
        self.notifiers.len() != before
    }

    /// Reload the file if it changed since the last load
    ///
    /// Returns whether the notifiers were reconciled.
    pub async fn load(&mut self) -> Result<bool> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if !metadata.is_file() {
            return Err(Error::Config(format!(
                "{} is not a regular file",
                self.path.display()
            )));
        }

        let modified = metadata.modified()?;
        if self.loaded == Some(modified) {
            tracing::trace!(path = %self.path.display(), "Configuration unchanged");
            return Ok(false);
        }

        let text = tokio::fs::read_to_string(&self.path).await?;
        let config = NotifierConfig::parse(&text)?;
        tracing::info!(path = %self.path.display(), "Configuration changed, updating notifiers");

        for notifier in &self.notifiers {
            config.apply(notifier);
        }
        self.loaded = Some(modified);
        Ok(true)
    }

    /// Poll the file on the configured interval
    ///
    /// Must be called from within a `LocalSet`.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::task::spawn_local(async move {
            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.load().await {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Configuration not loaded"
                    );
                }
            }
        })
    }
}

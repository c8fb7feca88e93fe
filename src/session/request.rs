//! Front-end requests
//!
//! One request per line: an action word, whitespace, then the subscription
//! URL. The action is case-insensitive; the URL is passed through untouched.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// What the client wants done with a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stream updates until unsubscribed
    Subscribe,
    /// Send one value, then detach
    Get,
    /// Stop streaming
    Unsubscribe,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Subscribe => "SUB",
            Action::Get => "GET",
            Action::Unsubscribe => "UNSUB",
        }
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUB" => Ok(Action::Subscribe),
            "GET" => Ok(Action::Get),
            "UNSUB" => Ok(Action::Unsubscribe),
            _ => Err(Error::Protocol(format!("unknown action '{}'", s))),
        }
    }
}

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub action: Action,
    pub url: String,
}

impl Request {
    pub fn new(action: Action, url: impl Into<String>) -> Self {
        Self {
            action,
            url: url.into(),
        }
    }

    /// Parse `ACTION url`; surrounding whitespace and a trailing `\r` are ignored
    pub fn parse(line: &str) -> Result<Self, Error> {
        let line = line.trim();
        let (action, url) = match line.split_once(char::is_whitespace) {
            Some((action, url)) => (action, url.trim()),
            None => (line, ""),
        };

        if action.is_empty() {
            return Err(Error::Protocol("empty request".into()));
        }
        let action = action.parse()?;
        if url.is_empty() {
            return Err(Error::Protocol("missing URL".into()));
        }
        if url.contains(char::is_whitespace) {
            return Err(Error::Protocol(format!("URL contains whitespace: '{}'", url)));
        }

        Ok(Self::new(action, url))
    }
}

impl FromStr for Request {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action.as_str(), self.url)
    }
}

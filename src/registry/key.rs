//! Subscription planning
//!
//! Turns a request URL into the ordered list of nodes it needs, each with
//! its canonical key. Planning is pure: nothing is registered until the whole
//! request has been validated.

use std::fmt;

use super::error::ValidationError;
use super::params::{self, EXCLUSIVE, PARAMETERS};
use crate::stage::StageSpec;
use crate::url::{codec, KeyCase, ParamMap, Url};

/// One stage of a planned chain
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStage {
    /// Canonical key: bare key plus every parameter applied so far
    pub key: String,
    /// Parameter that produced the stage
    pub param: &'static str,
    pub spec: StageSpec,
}

/// Validated, canonical form of a subscribe request
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPlan {
    /// Lower-cased scheme
    pub scheme: String,
    /// Decoded path with surrounding `/` removed
    pub path: String,
    /// Key of the driver-fed node
    pub base_key: String,
    /// Stages in stacking order
    pub stages: Vec<PlannedStage>,
}

impl SubscriptionPlan {
    /// Parse and validate a request URL
    pub fn parse(request: &str) -> Result<Self, ValidationError> {
        Self::from_url(Url::parse(request)?)
    }

    /// Validate an already-parsed request URL
    pub fn from_url(mut url: Url) -> Result<Self, ValidationError> {
        let path = url.decoded_path()?.trim_matches('/').to_string();
        if path.is_empty() {
            return Err(ValidationError::EmptyPath);
        }

        url.merge_params();
        url.normalize(true, KeyCase::Lower);
        let query = url.query();

        if let Some(unknown) = query.keys().find(|k| params::rule(k).is_none()) {
            return Err(ValidationError::UnsupportedParameter(unknown.to_string()));
        }

        for (a, b) in EXCLUSIVE {
            if query.contains_key(a) && query.contains_key(b) {
                return Err(ValidationError::MutuallyExclusive(
                    a.to_string(),
                    b.to_string(),
                ));
            }
        }

        let mut specs = Vec::new();
        for rule in PARAMETERS {
            if let Some(raw) = query.get(rule.name) {
                let spec = (rule.parse)(raw)
                    .map_err(|reason| ValidationError::invalid(rule.name, raw, reason))?;
                specs.push((rule.name, spec));
            }
        }

        let base_key = if url.scheme.is_empty() {
            codec::encode_key_path(&path)
        } else {
            format!("{}:{}", url.scheme, codec::encode_key_path(&path))
        };

        let mut applied = ParamMap::new();
        let stages = specs
            .into_iter()
            .map(|(param, spec)| {
                applied.insert(param, params::render(&spec));
                PlannedStage {
                    key: format!("{}?{}", base_key, applied),
                    param,
                    spec,
                }
            })
            .collect();

        Ok(Self {
            scheme: url.scheme,
            path,
            base_key,
            stages,
        })
    }

    /// Key of the node the caller's sink attaches to
    pub fn key(&self) -> &str {
        self.stages
            .last()
            .map(|s| s.key.as_str())
            .unwrap_or(&self.base_key)
    }

    /// Every key in the chain, innermost first
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.base_key.as_str()).chain(self.stages.iter().map(|s| s.key.as_str()))
    }

    /// Whether the request has no stages
    pub fn is_bare(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

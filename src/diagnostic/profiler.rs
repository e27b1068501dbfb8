use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

/// A timed region of a task's execution with free-form tags.
///
/// A disabled span ignores every call, which keeps call sites free of
/// "is profiling on" checks.
#[derive(Debug, Clone)]
pub struct Span {
    name: String,
    enabled: bool,
    start: Option<Instant>,
    duration: Option<Duration>,
    tags: BTreeMap<String, String>,
    children: Vec<Span>,
}

impl Span {
    pub(crate) fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
            start: None,
            duration: None,
            tags: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// A started span, as used for child regions.
    pub(crate) fn started(name: impl Into<String>, enabled: bool) -> Self {
        let mut span = Self::new(name, enabled);
        span.start();
        span
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Starts the clock. Only the first call has an effect.
    pub fn start(&mut self) {
        if self.enabled && self.start.is_none() {
            self.start = Some(Instant::now());
        }
    }

    /// Stops the clock. Only the first call after `start` has an effect.
    pub fn stop(&mut self) {
        if let (Some(start), None) = (self.start, self.duration) {
            self.duration = Some(start.elapsed());
        }
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.start
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if self.enabled {
            self.tags.insert(key.into(), value.into());
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn add_child(&mut self, child: Span) {
        if self.enabled {
            self.children.push(child);
        }
    }

    pub fn children(&self) -> &[Span] {
        &self.children
    }

    /// Serializable snapshot, with start times relative to `origin`.
    pub fn to_model(&self, origin: Instant) -> ProfileModel {
        ProfileModel {
            name: self.name.clone(),
            start_micros: self
                .start
                .map(|start| start.saturating_duration_since(origin).as_micros() as u64),
            duration_micros: self.duration.map(|d| d.as_micros() as u64),
            data: self.tags.clone(),
            children: self
                .children
                .iter()
                .map(|child| child.to_model(origin))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileModel {
    pub name: String,
    pub start_micros: Option<u64>,
    pub duration_micros: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProfileModel>,
}

impl ProfileModel {
    pub fn child(&self, name: &str) -> Option<&ProfileModel> {
        self.children.iter().find(|child| child.name == name)
    }
}

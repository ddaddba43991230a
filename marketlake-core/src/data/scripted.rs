//! In-memory adapter that replays scripted responses. Used by tests and dry runs.

use super::provider::{FetchError, FetchWindow, Selector, SourceAdapter};
use crate::timeframe::Timeframe;
use polars::prelude::DataFrame;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

type Response = Result<DataFrame, FetchError>;

/// Responses are keyed by [`Selector::label`]. Each fetch pops the next
/// response for its label; the final one repeats. Unscripted labels fail
/// permanently.
pub struct ScriptedSource {
    name: String,
    feed: Option<String>,
    native: Option<Timeframe>,
    script: Mutex<HashMap<String, VecDeque<Response>>>,
    calls: Mutex<Vec<(String, FetchWindow)>>,
}

impl ScriptedSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            feed: None,
            native: None,
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = Some(feed.into());
        self
    }

    pub fn with_native_timeframe(mut self, native: Timeframe) -> Self {
        self.native = Some(native);
        self
    }

    /// Queue a response for the unit with this label.
    pub fn respond(self, label: impl Into<String>, response: Response) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.entry(label.into()).or_default().push_back(response);
        }
        self
    }

    /// Labels and windows fetched so far, in call order.
    pub fn calls(&self) -> Vec<(String, FetchWindow)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, label: &str) -> usize {
        self.calls().iter().filter(|(l, _)| l == label).count()
    }
}

impl SourceAdapter for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, selector: &Selector, window: &FetchWindow) -> Result<DataFrame, FetchError> {
        let label = selector.label();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((label.clone(), *window));
        }
        let mut script = self
            .script
            .lock()
            .map_err(|_| FetchError::Permanent("scripted source poisoned".into()))?;
        let queue = script
            .get_mut(&label)
            .ok_or_else(|| FetchError::Permanent(format!("no scripted response for {label}")))?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.unwrap_or_else(|| Err(FetchError::Permanent(format!("no scripted response for {label}"))))
    }

    fn feed(&self) -> Option<&str> {
        self.feed.as_deref()
    }

    fn native_timeframe(&self, requested: Timeframe) -> Timeframe {
        self.native.unwrap_or(requested)
    }
}

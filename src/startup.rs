//! Startup-step instrumentation. The engine reports `expression.parse` and
//! `expression.compile` steps through an [`ApplicationStartup`]; the default
//! [`NoopStartup`] records nothing and never touches the heap.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type Tag<'a> = (&'a str, &'a str);

pub trait StartupStep {
    fn name(&self) -> &str;
    fn id(&self) -> u64;
    fn parent_id(&self) -> Option<u64>;
    fn tag(&mut self, key: &str, value: &str);
    /// Tag whose value is only computed when the step records tags.
    fn tag_with(&mut self, key: &str, value: &dyn Fn() -> String);
    fn tags(&self) -> Box<dyn Iterator<Item = Tag<'_>> + '_>;
    fn end(self: Box<Self>);
}

pub trait ApplicationStartup: Send + Sync {
    fn start(&self, name: &'static str) -> Box<dyn StartupStep>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStartup;

/// Zero-sized, so boxing it does not allocate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStep;

impl ApplicationStartup for NoopStartup {
    fn start(&self, _name: &'static str) -> Box<dyn StartupStep> {
        Box::new(NoopStep)
    }
}

impl StartupStep for NoopStep {
    fn name(&self) -> &str {
        "default"
    }

    fn id(&self) -> u64 {
        0
    }

    fn parent_id(&self) -> Option<u64> {
        None
    }

    fn tag(&mut self, _key: &str, _value: &str) {}

    fn tag_with(&mut self, _key: &str, _value: &dyn Fn() -> String) {}

    fn tags(&self) -> Box<dyn Iterator<Item = Tag<'_>> + '_> {
        Box::new(std::iter::empty())
    }

    fn end(self: Box<Self>) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStep {
    pub id: u64,
    pub name: &'static str,
    pub tags: Vec<(String, String)>,
    pub duration: Duration,
}

/// Keeps every ended step in memory, in end order.
#[derive(Debug, Clone, Default)]
pub struct RecordingStartup {
    next_id: Arc<AtomicU64>,
    steps: Arc<Mutex<Vec<RecordedStep>>>,
}

impl RecordingStartup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> Vec<RecordedStep> {
        self.steps.lock().clone()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.lock().iter().map(|s| s.name).collect()
    }
}

impl ApplicationStartup for RecordingStartup {
    fn start(&self, name: &'static str) -> Box<dyn StartupStep> {
        Box::new(RecordingStep {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            name,
            tags: Vec::new(),
            started: Instant::now(),
            sink: Arc::clone(&self.steps),
        })
    }
}

struct RecordingStep {
    id: u64,
    name: &'static str,
    tags: Vec<(String, String)>,
    started: Instant,
    sink: Arc<Mutex<Vec<RecordedStep>>>,
}

impl StartupStep for RecordingStep {
    fn name(&self) -> &str {
        self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn parent_id(&self) -> Option<u64> {
        None
    }

    fn tag(&mut self, key: &str, value: &str) {
        self.tags.push((key.to_string(), value.to_string()));
    }

    fn tag_with(&mut self, key: &str, value: &dyn Fn() -> String) {
        self.tags.push((key.to_string(), value()));
    }

    fn tags(&self) -> Box<dyn Iterator<Item = Tag<'_>> + '_> {
        Box::new(self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    fn end(self: Box<Self>) {
        let step = RecordedStep {
            id: self.id,
            name: self.name,
            duration: self.started.elapsed(),
            tags: self.tags,
        };
        self.sink.lock().push(step);
    }
}

//! Append-only log of what the converter did.
//!
//! Every phase of a conversion records events: graph construction, removed edges, wave
//! boundaries, processed methods and committed feedback. Workers record concurrently; the
//! log is read after the conversion for diagnostics and tests.
//!
//! ```rust,ignore
//! events
//!     .record(EventKind::MethodProcessed)
//!     .method(method)
//!     .wave(3)
//!     .message("primary");
//! ```

use std::fmt;

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::program::MethodId;

/// The kind of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// A call graph was built; `count` is its number of nodes.
    CallGraphBuilt,
    /// Cycle elimination removed a call edge from `method`.
    CallEdgeRemoved,
    /// Cycle elimination removed a field-read edge from reader `method`.
    FieldReadEdgeRemoved,
    /// A wave started; `count` is its size.
    WaveStarted,
    /// A wave finished; `count` is its size.
    WaveCompleted,
    /// Methods were scheduled into the running wave; `count` is how many.
    WaveExtended,
    /// A method went through IR construction and all code optimizations.
    MethodProcessed,
    /// Buffered optimization info was committed; `count` is the number of methods.
    FeedbackCommitted,
    /// Methods were selected for post-processing; `count` is how many.
    PostProcessingScheduled,
    /// Dead code was removed from a method; `count` is the number of blocks and
    /// definitions removed.
    DeadCodeRemoved,
    /// A method was handed to the finalizer.
    MethodFinalized,
}

/// One entry of the [`EventLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The method concerned, if any.
    pub method: Option<MethodId>,
    /// The wave during which it happened, if any.
    pub wave: Option<usize>,
    /// A kind-specific quantity.
    pub count: usize,
    /// Free-form detail.
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(method) = self.method {
            write!(f, " {method}")?;
        }
        if let Some(wave) = self.wave {
            write!(f, " wave={wave}")?;
        }
        if self.count > 0 {
            write!(f, " count={}", self.count)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Thread-safe, append-only event log.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts recording an event. The event is appended when the builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            event: Some(Event {
                kind,
                method: None,
                wave: None,
                count: 0,
                message: String::new(),
            }),
        }
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates events in the order they were appended.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, event)| event)
    }

    /// Iterates the events of one kind.
    pub fn of_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> {
        self.iter().filter(move |event| event.kind == kind)
    }

    /// Number of events of one kind.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Returns `true` if at least one event of the kind was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.of_kind(kind).next().is_some()
    }

    /// Discards all events.
    pub fn clear(&mut self) {
        self.events = boxcar::Vec::new();
    }

    /// One line per event kind that occurred, with its number of occurrences.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for kind in EventKind::iter() {
            let count = self.count(kind);
            if count > 0 {
                lines.push(format!("{kind}: {count}"));
            }
        }
        lines.join("\n")
    }
}

/// Fluent builder for one event, appended to its log on drop.
///
/// Setters return the builder so a chain may end on any of them; the event is recorded
/// when the last value goes out of scope.
#[derive(Debug)]
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    event: Option<Event>,
}

impl EventBuilder<'_> {
    /// Sets the method concerned.
    pub fn method(mut self, method: MethodId) -> Self {
        if let Some(event) = &mut self.event {
            event.method = Some(method);
        }
        self
    }

    /// Sets the wave number.
    pub fn wave(mut self, wave: usize) -> Self {
        if let Some(event) = &mut self.event {
            event.wave = Some(wave);
        }
        self
    }

    /// Sets the kind-specific quantity.
    pub fn count(mut self, count: usize) -> Self {
        if let Some(event) = &mut self.event {
            event.count = count;
        }
        self
    }

    /// Sets the detail message and records the event.
    pub fn message(mut self, message: impl Into<String>) {
        if let Some(event) = &mut self.event {
            event.message = message.into();
        }
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.log.events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_records_on_drop() {
        let log = EventLog::new();
        log.record(EventKind::WaveStarted).wave(0).count(3);
        log.record(EventKind::MethodProcessed)
            .method(MethodId::new(7))
            .wave(0)
            .message("primary");

        assert_eq!(log.len(), 2);
        assert!(log.has(EventKind::MethodProcessed));
        assert!(!log.has(EventKind::CallEdgeRemoved));

        let processed: Vec<String> = log
            .of_kind(EventKind::MethodProcessed)
            .map(ToString::to_string)
            .collect();
        assert_eq!(processed, vec!["method_processed m7 wave=0: primary"]);
        assert_eq!(log.summary(), "wave_started: 1\nmethod_processed: 1");
    }

    #[test]
    fn test_chain_ending_on_setter_is_recorded() {
        let log = EventLog::new();
        log.record(EventKind::CallEdgeRemoved).method(MethodId::new(2));
        log.record(EventKind::WaveExtended).wave(1).count(4);

        assert_eq!(log.len(), 2);
        let extended: Vec<&Event> = log.of_kind(EventKind::WaveExtended).collect();
        assert_eq!(extended.len(), 1);
        assert_eq!(extended[0].count, 4);
        assert_eq!(extended[0].wave, Some(1));
    }

    #[test]
    fn test_concurrent_recording() {
        use rayon::prelude::*;

        let log = EventLog::new();
        (0..64).into_par_iter().for_each(|index| {
            log.record(EventKind::MethodProcessed)
                .method(MethodId::new(index));
        });
        assert_eq!(log.count(EventKind::MethodProcessed), 64);
    }
}

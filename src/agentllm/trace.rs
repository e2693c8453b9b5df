//! In-memory tracing: trees of timed spans with pluggable exporters.
//!
//! A [`Tracer`] owns active traces keyed by id.  Spans form a tree through
//! parent ids, carry attributes and point-in-time events, and are idempotent
//! on end: once a span or trace is ended, further mutation is silently
//! dropped.  Ending a trace hands it to every configured exporter in order;
//! exporter failures are logged and never break the run being traced.
//!
//! # Example
//!
//! ```rust
//! use agentllm::trace::{ConsoleExporter, Tracer};
//! use std::sync::Arc;
//!
//! let tracer = Tracer::new().with_exporter(Arc::new(ConsoleExporter));
//! let trace_id = tracer.start_trace("agent-run", None);
//! let span_id = tracer.start_span(&trace_id, "model-call", None, None);
//! tracer.end_span(&trace_id, &span_id, "ok");
//! tracer.end_trace(&trace_id);
//! ```

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Span and trace lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Running,
    Ok,
    Error,
}

impl SpanStatus {
    fn parse(label: &str) -> Self {
        match label {
            "ok" => SpanStatus::Ok,
            "error" => SpanStatus::Error,
            _ => SpanStatus::Running,
        }
    }
}

/// A point-in-time annotation inside a span.
#[derive(Debug, Clone, Serialize)]
pub struct SpanEvent {
    pub timestamp: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, Value>>,
}

/// A named, timed interval. Parent links form the tree.
#[derive(Debug, Clone, Serialize)]
pub struct Span {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    pub start_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
    pub status: SpanStatus,
    pub attributes: HashMap<String, Value>,
    pub events: Vec<SpanEvent>,
}

/// A tree of spans rooted at one operation.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub id: String,
    pub name: String,
    pub start_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
    pub spans: Vec<Span>,
    pub attributes: HashMap<String, Value>,
    pub status: SpanStatus,
}

/// Receives completed traces.
pub trait TraceExporter: Send + Sync {
    fn name(&self) -> &str;
    fn export(&self, trace: &Trace) -> crate::agentllm::error::Result<()>;
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Factory and registry for traces.
#[derive(Default)]
pub struct Tracer {
    traces: Mutex<HashMap<String, Trace>>,
    exporters: Vec<Arc<dyn TraceExporter>>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn TraceExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    /// Begin a trace; returns its id.
    pub fn start_trace(&self, name: &str, attributes: Option<HashMap<String, Value>>) -> String {
        let id = Uuid::new_v4().to_string();
        let trace = Trace {
            id: id.clone(),
            name: name.to_string(),
            start_ms: now_ms(),
            end_ms: None,
            spans: Vec::new(),
            attributes: attributes.unwrap_or_default(),
            status: SpanStatus::Running,
        };
        self.traces.lock().unwrap().insert(id.clone(), trace);
        id
    }

    /// Begin a span inside a trace; returns the span id, or an empty string
    /// when the trace is unknown or already ended.
    pub fn start_span(
        &self,
        trace_id: &str,
        name: &str,
        parent_id: Option<&str>,
        attributes: Option<HashMap<String, Value>>,
    ) -> String {
        let mut traces = self.traces.lock().unwrap();
        let trace = match traces.get_mut(trace_id) {
            Some(trace) if trace.end_ms.is_none() => trace,
            _ => return String::new(),
        };
        let id = Uuid::new_v4().to_string();
        trace.spans.push(Span {
            id: id.clone(),
            parent_id: parent_id.map(|p| p.to_string()),
            name: name.to_string(),
            start_ms: now_ms(),
            end_ms: None,
            status: SpanStatus::Running,
            attributes: attributes.unwrap_or_default(),
            events: Vec::new(),
        });
        id
    }

    /// Annotate a running span. Dropped silently if the span has ended.
    pub fn add_event(
        &self,
        trace_id: &str,
        span_id: &str,
        name: &str,
        attributes: Option<HashMap<String, Value>>,
    ) {
        let mut traces = self.traces.lock().unwrap();
        if let Some(trace) = traces.get_mut(trace_id) {
            if let Some(span) = trace.spans.iter_mut().find(|s| s.id == span_id) {
                if span.end_ms.is_none() {
                    span.events.push(SpanEvent {
                        timestamp: now_ms(),
                        name: name.to_string(),
                        attributes,
                    });
                }
            }
        }
    }

    /// End a span with `"ok"` or `"error"`. Idempotent.
    pub fn end_span(&self, trace_id: &str, span_id: &str, status: &str) {
        let mut traces = self.traces.lock().unwrap();
        if let Some(trace) = traces.get_mut(trace_id) {
            if let Some(span) = trace.spans.iter_mut().find(|s| s.id == span_id) {
                if span.end_ms.is_none() {
                    span.end_ms = Some(now_ms());
                    span.status = SpanStatus::parse(status);
                }
            }
        }
    }

    /// End a trace, close any still-running spans, and run the exporters.
    /// Idempotent: a second call is a no-op.
    pub fn end_trace(&self, trace_id: &str) {
        let trace = {
            let mut traces = self.traces.lock().unwrap();
            match traces.remove(trace_id) {
                Some(mut trace) if trace.end_ms.is_none() => {
                    let end = now_ms();
                    trace.end_ms = Some(end);
                    trace.status = SpanStatus::Ok;
                    for span in &mut trace.spans {
                        if span.end_ms.is_none() {
                            span.end_ms = Some(end);
                            span.status = SpanStatus::Ok;
                        }
                    }
                    trace
                }
                _ => return,
            }
        };

        for exporter in &self.exporters {
            if let Err(error) = exporter.export(&trace) {
                log::warn!("trace exporter {} failed: {}", exporter.name(), error);
            }
        }
    }

    /// Snapshot of a still-active trace.
    pub fn active_trace(&self, trace_id: &str) -> Option<Trace> {
        self.traces.lock().unwrap().get(trace_id).cloned()
    }
}

/// Prints a trace as an indented tree with timings and status icons.
pub struct ConsoleExporter;

impl ConsoleExporter {
    fn icon(status: SpanStatus) -> &'static str {
        match status {
            SpanStatus::Error => "✗",
            _ => "✓",
        }
    }

    fn render_span(trace: &Trace, span: &Span, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let duration = span
            .end_ms
            .map(|end| end - span.start_ms)
            .unwrap_or_default();
        out.push_str(&format!(
            "{}{} {} [{}ms]\n",
            indent,
            Self::icon(span.status),
            span.name,
            duration
        ));
        for (key, value) in &span.attributes {
            out.push_str(&format!("{}    {} = {}\n", indent, key, value));
        }
        for event in &span.events {
            out.push_str(&format!("{}    @ {}\n", indent, event.name));
        }
        for child in trace.spans.iter().filter(|s| s.parent_id.as_deref() == Some(&span.id)) {
            Self::render_span(trace, child, depth + 1, out);
        }
    }

    /// Render without printing. Shared by `export` and tests.
    pub fn render(trace: &Trace) -> String {
        let duration = trace
            .end_ms
            .map(|end| end - trace.start_ms)
            .unwrap_or_default();
        let mut out = format!(
            "{} {} [{}ms]\n",
            Self::icon(trace.status),
            trace.name,
            duration
        );
        for span in trace.spans.iter().filter(|s| s.parent_id.is_none()) {
            Self::render_span(trace, span, 1, &mut out);
        }
        out
    }
}

impl TraceExporter for ConsoleExporter {
    fn name(&self) -> &str {
        "console"
    }

    fn export(&self, trace: &Trace) -> crate::agentllm::error::Result<()> {
        print!("{}", Self::render(trace));
        Ok(())
    }
}

/// Prints the whole trace as JSON.
pub struct JsonExporter {
    pub indent: usize,
}

impl Default for JsonExporter {
    fn default() -> Self {
        Self { indent: 2 }
    }
}

impl TraceExporter for JsonExporter {
    fn name(&self) -> &str {
        "json"
    }

    fn export(&self, trace: &Trace) -> crate::agentllm::error::Result<()> {
        let rendered = if self.indent == 0 {
            serde_json::to_string(trace)?
        } else {
            serde_json::to_string_pretty(trace)?
        };
        println!("{}", rendered);
        Ok(())
    }
}

type TraceCallback = Box<dyn Fn(&Trace) + Send + Sync>;

/// Hands each completed trace to a user function.
pub struct CallbackExporter {
    callback: TraceCallback,
}

impl CallbackExporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Trace) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl TraceExporter for CallbackExporter {
    fn name(&self) -> &str {
        "callback"
    }

    fn export(&self, trace: &Trace) -> crate::agentllm::error::Result<()> {
        (self.callback)(trace);
        Ok(())
    }
}

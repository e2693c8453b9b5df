//! Lazy async event streams and their combinators.
//!
//! Every streaming model response is normalized into an [`EventStream`]: a
//! single-pass, pull-based sequence of [`StreamEvent`]s.  The wrapper offers
//! per-event combinators (`map`, `filter`, `tap`) and terminal collectors,
//! while the free functions in this module provide the heavier machinery:
//! bounded backpressure, predicate buffering, text rewriting, and N-way
//! merging.
//!
//! # Streaming quick start
//!
//! ```rust,no_run
//! use agentllm::clients::{create_model, ModelConfig};
//! use agentllm::model::{GenerateOptions, Message, RequestOptions};
//! use agentllm::stream::StreamEvent;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = create_model("openai:gpt-4o-mini", ModelConfig::default())?;
//!     let mut stream = model
//!         .stream(
//!             &[Message::user("Explain Rust lifetimes in a sentence.")],
//!             &GenerateOptions::default(),
//!             &RequestOptions::default(),
//!         )
//!         .await?;
//!
//!     while let Some(event) = stream.next_event().await {
//!         if let StreamEvent::TextDelta { text } = event? {
//!             print!("{}", text);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::model::{ToolCallDelta, Usage};
use futures_util::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One normalized event in a streaming model response.
///
/// Streams are finite and not restartable; every well-formed stream ends with
/// exactly one [`StreamEvent::Done`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental piece of assistant text.
    TextDelta { text: String },
    /// A partial tool call. At minimum carries the call id.
    ToolCallDelta { tool_call: ToolCallDelta },
    /// Token accounting, usually emitted once near the end.
    Usage { usage: Usage },
    /// Terminal marker.
    Done,
}

/// Boxed stream type produced by provider adapters.
pub type BoxEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// A single-pass async sequence of [`StreamEvent`]s.
pub struct EventStream {
    inner: BoxEventStream,
}

impl EventStream {
    /// Wrap an async producer.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<StreamEvent>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A stream over a fixed set of events.
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        Self::new(futures_util::stream::iter(events.into_iter().map(Ok)))
    }

    /// A stream that ends immediately.
    pub fn empty() -> Self {
        Self::new(futures_util::stream::empty())
    }

    /// Pull the next event.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        self.inner.next().await
    }

    /// Transform every event.
    pub fn map<F>(self, mut f: F) -> Self
    where
        F: FnMut(StreamEvent) -> StreamEvent + Send + 'static,
    {
        Self::new(self.inner.map(move |item| item.map(&mut f)))
    }

    /// Keep only events matching the predicate. Errors always pass through.
    pub fn filter<F>(self, f: F) -> Self
    where
        F: Fn(&StreamEvent) -> bool + Send + Sync + 'static,
    {
        Self::new(self.inner.filter(move |item| {
            let keep = match item {
                Ok(event) => f(event),
                Err(_) => true,
            };
            futures_util::future::ready(keep)
        }))
    }

    /// Observe every event without changing it.
    pub fn tap<F>(self, f: F) -> Self
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        Self::new(self.inner.map(move |item| {
            if let Ok(event) = &item {
                f(event);
            }
            item
        }))
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Result<Vec<StreamEvent>> {
        let mut events = Vec::new();
        while let Some(item) = self.inner.next().await {
            events.push(item?);
        }
        Ok(events)
    }

    /// Drain the stream and concatenate the text deltas.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(item) = self.inner.next().await {
            if let StreamEvent::TextDelta { text: delta } = item? {
                text.push_str(&delta);
            }
        }
        Ok(text)
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventStream")
    }
}

/// Bound a stream with a fixed-size channel.
///
/// The upstream producer runs in its own task and suspends whenever
/// `high_water_mark` events are waiting; it resumes as the consumer drains.
/// Errors propagate to the consumer, after which the producer stops.
pub fn backpressure(stream: EventStream, high_water_mark: usize) -> EventStream {
    let capacity = high_water_mark.max(1);
    let (tx, rx) = mpsc::channel::<Result<StreamEvent>>(capacity);

    tokio::spawn(async move {
        let mut upstream = stream;
        while let Some(item) = upstream.next_event().await {
            let failed = item.is_err();
            if tx.send(item).await.is_err() {
                // Consumer dropped the stream.
                break;
            }
            if failed {
                break;
            }
        }
    });

    EventStream::new(ReceiverStream::new(rx))
}

/// Hold events back until the first one matching `predicate`, then flush the
/// buffer in order and pass everything after through immediately.
///
/// If the source ends without a match, the buffer is still flushed in order.
pub fn buffer_until<F>(stream: EventStream, predicate: F) -> EventStream
where
    F: Fn(&StreamEvent) -> bool + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<StreamEvent>>(16);

    tokio::spawn(async move {
        let mut upstream = stream;
        let mut buffer: Vec<Result<StreamEvent>> = Vec::new();
        let mut flushed = false;

        while let Some(item) = upstream.next_event().await {
            if flushed {
                if tx.send(item).await.is_err() {
                    return;
                }
                continue;
            }

            let matched = matches!(&item, Ok(event) if predicate(event));
            let failed = item.is_err();
            buffer.push(item);

            if matched || failed {
                for buffered in buffer.drain(..) {
                    if tx.send(buffered).await.is_err() {
                        return;
                    }
                }
                if failed {
                    return;
                }
                flushed = true;
            }
        }

        // Source ended without a match.
        for buffered in buffer.drain(..) {
            if tx.send(buffered).await.is_err() {
                return;
            }
        }
    });

    EventStream::new(ReceiverStream::new(rx))
}

/// Rewrite only the text deltas; every other event passes through untouched.
pub fn text_transform<F>(stream: EventStream, f: F) -> EventStream
where
    F: Fn(String) -> String + Send + 'static,
{
    stream.map(move |event| match event {
        StreamEvent::TextDelta { text } => StreamEvent::TextDelta { text: f(text) },
        other => other,
    })
}

/// Interleave several streams by arrival order.
///
/// The merged stream completes when every source has completed.  The first
/// error from any source terminates the merge; remaining sources are dropped.
/// An empty input list produces an empty stream.
pub fn merge(streams: Vec<EventStream>) -> EventStream {
    if streams.is_empty() {
        return EventStream::empty();
    }

    let (tx, rx) = mpsc::channel::<Result<StreamEvent>>(16);

    for stream in streams {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut upstream = stream;
            while let Some(item) = upstream.next_event().await {
                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    // The merge was terminated (error elsewhere or consumer
                    // dropped); stop pulling from this source.
                    break;
                }
                if failed {
                    break;
                }
            }
        });
    }
    drop(tx);

    // Terminate after the first error so later arrivals are discarded.
    let mut errored = false;
    EventStream::new(
        ReceiverStream::new(rx).take_while(move |item| {
            let keep = !errored;
            if item.is_err() {
                errored = true;
            }
            futures_util::future::ready(keep)
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str) -> StreamEvent {
        StreamEvent::TextDelta {
            text: t.to_string(),
        }
    }

    #[tokio::test]
    async fn test_from_events_and_collect() {
        let stream = EventStream::from_events(vec![text("a"), text("b"), StreamEvent::Done]);
        let events = stream.collect().await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], StreamEvent::Done);
    }

    #[tokio::test]
    async fn test_collect_text_ignores_non_text() {
        let stream = EventStream::from_events(vec![
            text("Hello "),
            StreamEvent::Usage {
                usage: Usage::new(1, 2),
            },
            text("world"),
            StreamEvent::Done,
        ]);
        assert_eq!(stream.collect_text().await.unwrap(), "Hello world");
    }

    #[tokio::test]
    async fn test_map_filter_tap() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();

        let stream = EventStream::from_events(vec![text("a"), text("b"), StreamEvent::Done])
            .map(|event| match event {
                StreamEvent::TextDelta { text } => StreamEvent::TextDelta {
                    text: text.to_uppercase(),
                },
                other => other,
            })
            .filter(|event| !matches!(event, StreamEvent::Done))
            .tap(move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            });

        let events = stream.collect().await.unwrap();
        assert_eq!(events, vec![text("A"), text("B")]);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_backpressure_preserves_order() {
        let events: Vec<StreamEvent> = (0..20).map(|i| text(&i.to_string())).collect();
        let stream = backpressure(EventStream::from_events(events.clone()), 2);
        let collected = stream.collect().await.unwrap();
        assert_eq!(collected, events);
    }

    #[tokio::test]
    async fn test_backpressure_propagates_errors() {
        let inner = futures_util::stream::iter(vec![
            Ok(text("a")),
            Err(AgentError::stream("boom")),
        ]);
        let mut stream = backpressure(EventStream::new(inner), 4);
        assert!(stream.next_event().await.unwrap().is_ok());
        assert!(stream.next_event().await.unwrap().is_err());
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_buffer_until_flushes_on_match() {
        let stream = EventStream::from_events(vec![
            text("a"),
            text("b"),
            text("flush"),
            text("c"),
            StreamEvent::Done,
        ]);
        let buffered = buffer_until(stream, |event| {
            matches!(event, StreamEvent::TextDelta { text } if text == "flush")
        });
        let events = buffered.collect().await.unwrap();
        assert_eq!(
            events,
            vec![text("a"), text("b"), text("flush"), text("c"), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_buffer_until_flushes_on_end_without_match() {
        let stream = EventStream::from_events(vec![text("a"), text("b")]);
        let buffered = buffer_until(stream, |_| false);
        let events = buffered.collect().await.unwrap();
        assert_eq!(events, vec![text("a"), text("b")]);
    }

    #[tokio::test]
    async fn test_text_transform_leaves_other_events() {
        let stream = EventStream::from_events(vec![
            text("hello"),
            StreamEvent::Done,
        ]);
        let transformed = text_transform(stream, |t| t.to_uppercase());
        let events = transformed.collect().await.unwrap();
        assert_eq!(events, vec![text("HELLO"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn test_merge_empty_list() {
        let events = merge(Vec::new()).collect().await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_merge_completes_when_all_complete() {
        let a = EventStream::from_events(vec![text("a1"), text("a2")]);
        let b = EventStream::from_events(vec![text("b1")]);
        let events = merge(vec![a, b]).collect().await.unwrap();
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_merge_aborts_on_first_error() {
        let failing = EventStream::new(futures_util::stream::iter(vec![Err(
            AgentError::stream("boom"),
        )]));
        let ok = EventStream::from_events(vec![text("x")]);
        let mut merged = merge(vec![failing, ok]);

        let mut saw_error = false;
        while let Some(item) = merged.next_event().await {
            if item.is_err() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
        // The stream must be terminated after the error.
        assert!(merged.next_event().await.is_none());
    }
}

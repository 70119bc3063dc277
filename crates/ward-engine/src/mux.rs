use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use ward_core::events::{EventSource, OutboundEvent, StreamEvent};
use ward_core::tools::{ProgressSink, ToolError};

/// Text of the terminal error when a turn dies without finishing.
pub const GENERIC_ERROR: &str = "Oops, an error occurred!";

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The receiver is gone.
    #[error("outbound stream closed")]
    Closed,
    #[error("done is emitted by the multiplexer only")]
    Reserved,
}

/// Fan-in of one turn's event sources into a single bounded channel.
///
/// Every source gets its own [`SourceHandle`] with an independent sequence
/// counter. Emission suspends while the channel is full, so nothing is ever
/// dropped for a slow receiver.
pub struct Multiplexer {
    tx: mpsc::Sender<OutboundEvent>,
    turn: SourceHandle,
}

impl Multiplexer {
    /// Dropping the returned stream cancels `cancel`.
    pub fn channel(capacity: usize, cancel: CancellationToken) -> (Self, TurnStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let turn = SourceHandle::new(tx.clone(), EventSource::Turn);
        let stream = TurnStream {
            inner: ReceiverStream::new(rx),
            state: StreamState::Open,
            next_turn_seq: 0,
            _cancel_on_drop: cancel.drop_guard(),
        };
        (Self { tx, turn }, stream)
    }

    pub fn source(&self, source: EventSource) -> SourceHandle {
        SourceHandle::new(self.tx.clone(), source)
    }

    /// Emit a turn-level error, used when the turn itself fails.
    pub async fn turn_error(&self, message: impl Into<String>) -> Result<(), MuxError> {
        self.turn
            .emit(StreamEvent::Error {
                message: message.into(),
            })
            .await
    }

    /// Emit `done`. Consuming `self` makes this happen at most once; the
    /// caller must have joined or cancelled every other source first.
    pub async fn finish(self) -> Result<(), MuxError> {
        self.turn.send(StreamEvent::Done).await
    }
}

/// Emission handle for one event source.
#[derive(Clone)]
pub struct SourceHandle {
    inner: Arc<SourceInner>,
}

struct SourceInner {
    tx: mpsc::Sender<OutboundEvent>,
    source: EventSource,
    // Held across the send so seq order equals channel order.
    seq: tokio::sync::Mutex<u64>,
}

impl SourceHandle {
    fn new(tx: mpsc::Sender<OutboundEvent>, source: EventSource) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                tx,
                source,
                seq: tokio::sync::Mutex::new(0),
            }),
        }
    }

    pub fn source(&self) -> &EventSource {
        &self.inner.source
    }

    pub async fn emit(&self, event: StreamEvent) -> Result<(), MuxError> {
        if event.is_done() {
            return Err(MuxError::Reserved);
        }
        self.send(event).await
    }

    async fn send(&self, event: StreamEvent) -> Result<(), MuxError> {
        let mut seq = self.inner.seq.lock().await;
        let outbound = OutboundEvent {
            source: self.inner.source.clone(),
            seq: *seq,
            event,
        };
        self.inner
            .tx
            .send(outbound)
            .await
            .map_err(|_| MuxError::Closed)?;
        *seq += 1;
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for SourceHandle {
    async fn emit(&self, payload: serde_json::Value) -> Result<(), ToolError> {
        SourceHandle::emit(self, StreamEvent::Data { payload })
            .await
            .map_err(|_| ToolError::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    /// Senders vanished without `done`; the error was yielded, `done` is next.
    Abandoned,
    Done,
}

pin_project! {
    /// Receiver side of a turn.
    ///
    /// Ends with exactly one `done`. If every sender goes away without
    /// one, a turn-level error and `done` are synthesized. Nothing is
    /// yielded after `done`.
    pub struct TurnStream {
        #[pin]
        inner: ReceiverStream<OutboundEvent>,
        state: StreamState,
        next_turn_seq: u64,
        _cancel_on_drop: DropGuard,
    }
}

impl TurnStream {
    fn synthesized(seq: &mut u64, event: StreamEvent) -> OutboundEvent {
        let out = OutboundEvent {
            source: EventSource::Turn,
            seq: *seq,
            event,
        };
        *seq += 1;
        out
    }
}

impl Stream for TurnStream {
    type Item = OutboundEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        match *this.state {
            StreamState::Done => return Poll::Ready(None),
            StreamState::Abandoned => {
                *this.state = StreamState::Done;
                return Poll::Ready(Some(Self::synthesized(this.next_turn_seq, StreamEvent::Done)));
            }
            StreamState::Open => {}
        }

        match ready!(this.inner.as_mut().poll_next(cx)) {
            Some(event) => {
                if event.source == EventSource::Turn {
                    *this.next_turn_seq = event.seq + 1;
                }
                if event.event.is_done() {
                    *this.state = StreamState::Done;
                    // Late senders now fail fast instead of filling the buffer.
                    this.inner.get_mut().close();
                }
                Poll::Ready(Some(event))
            }
            None => {
                *this.state = StreamState::Abandoned;
                Poll::Ready(Some(Self::synthesized(
                    this.next_turn_seq,
                    StreamEvent::Error {
                        message: GENERIC_ERROR.into(),
                    },
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use futures::StreamExt;
    use serde_json::json;
    use ward_core::ids::ToolCallId;

    fn text(s: &str) -> StreamEvent {
        StreamEvent::TextDelta { delta: s.into() }
    }

    fn tool(id: &str) -> EventSource {
        EventSource::Tool {
            tool_call_id: ToolCallId::from_raw(id),
        }
    }

    #[tokio::test]
    async fn done_is_last_and_unique() {
        let (mux, stream) = Multiplexer::channel(8, CancellationToken::new());
        let model = mux.source(EventSource::Model);
        model.emit(text("a ")).await.unwrap();
        model.emit(text("b")).await.unwrap();
        drop(model);
        mux.finish().await.unwrap();

        let events: Vec<OutboundEvent> = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].seq, 0);
        assert_eq!(events[1].seq, 1);
        assert_eq!(events[2].event, StreamEvent::Done);
        assert_eq!(events[2].source, EventSource::Turn);
    }

    #[tokio::test]
    async fn sources_cannot_emit_done() {
        let (mux, _stream) = Multiplexer::channel(8, CancellationToken::new());
        let model = mux.source(EventSource::Model);
        assert!(matches!(model.emit(StreamEvent::Done).await, Err(MuxError::Reserved)));
    }

    #[tokio::test]
    async fn late_events_after_done_are_not_observed() {
        let (mux, mut stream) = Multiplexer::channel(8, CancellationToken::new());
        let straggler = mux.source(tool("call_1"));
        mux.finish().await.unwrap();

        assert!(stream.next().await.unwrap().event.is_done());
        assert!(matches!(straggler.emit(text("late")).await, Err(MuxError::Closed)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn abandoned_stream_synthesizes_error_and_done() {
        let (mux, stream) = Multiplexer::channel(8, CancellationToken::new());
        mux.turn_error("deadline").await.unwrap();
        let model = mux.source(EventSource::Model);
        model.emit(text("partial")).await.unwrap();
        drop(model);
        drop(mux);

        let events: Vec<OutboundEvent> = stream.collect().await;
        let kinds: Vec<&str> = events.iter().map(|e| e.event.kind()).collect();
        assert_eq!(kinds, vec!["error", "text-delta", "error", "done"]);
        // Turn-level seq continues after the last real turn event.
        assert_eq!(events[2].seq, 1);
        assert_eq!(events[3].seq, 2);
        assert_eq!(events[2].event, StreamEvent::Error { message: GENERIC_ERROR.into() });
    }

    #[tokio::test]
    async fn dropping_stream_cancels_turn() {
        let cancel = CancellationToken::new();
        let (mux, stream) = Multiplexer::channel(8, cancel.clone());
        drop(stream);
        assert!(cancel.is_cancelled());
        assert!(matches!(
            mux.source(EventSource::Model).emit(text("x")).await,
            Err(MuxError::Closed)
        ));
    }

    #[tokio::test]
    async fn full_channel_suspends_instead_of_dropping() {
        let (mux, mut stream) = Multiplexer::channel(1, CancellationToken::new());
        let model = mux.source(EventSource::Model);
        model.emit(text("1")).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), model.emit(text("2"))).await;
        assert!(blocked.is_err(), "second emit must wait for capacity");

        assert_eq!(stream.next().await.unwrap().event, text("1"));
        model.emit(text("2")).await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(second.event, text("2"));
        assert_eq!(second.seq, 1);
    }

    #[tokio::test]
    async fn concurrent_sources_keep_per_source_order() {
        let (mux, stream) = Multiplexer::channel(2, CancellationToken::new());
        let sources = vec![EventSource::Model, tool("call_a"), tool("call_b")];

        let mut set = tokio::task::JoinSet::new();
        for source in sources.clone() {
            let handle = mux.source(source);
            set.spawn(async move {
                for i in 0..50u64 {
                    handle
                        .emit(StreamEvent::Data { payload: json!(i) })
                        .await
                        .unwrap();
                    if i % 7 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            });
        }

        let consumer = tokio::spawn(async move {
            let mut stream = stream;
            let mut seen = Vec::new();
            while let Some(ev) = stream.next().await {
                seen.push(ev);
                tokio::task::yield_now().await;
            }
            seen
        });

        while set.join_next().await.is_some() {}
        mux.finish().await.unwrap();
        let seen = consumer.await.unwrap();

        assert_eq!(seen.len(), 151);
        assert!(seen.last().unwrap().event.is_done());
        let mut per_source: HashMap<EventSource, Vec<u64>> = HashMap::new();
        for ev in &seen[..150] {
            let StreamEvent::Data { payload } = &ev.event else {
                panic!("unexpected event {ev:?}");
            };
            assert_eq!(payload.as_u64(), Some(ev.seq));
            per_source.entry(ev.source.clone()).or_default().push(ev.seq);
        }
        for source in sources {
            assert_eq!(per_source[&source], (0..50).collect::<Vec<u64>>());
        }
    }

    #[tokio::test]
    async fn progress_sink_emits_data() {
        let (mux, mut stream) = Multiplexer::channel(4, CancellationToken::new());
        let handle = mux.source(tool("call_1"));
        let sink: Arc<dyn ProgressSink> = Arc::new(handle);
        sink.emit(json!({"kind": "title", "content": "Care plan"})).await.unwrap();

        let ev = stream.next().await.unwrap();
        assert_eq!(ev.source, tool("call_1"));
        assert!(matches!(ev.event, StreamEvent::Data { ref payload } if payload["kind"] == "title"));
    }
}

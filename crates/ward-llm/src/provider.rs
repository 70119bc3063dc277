use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use ward_core::context::LlmContext;
use ward_core::errors::GatewayError;
use ward_core::provider::{LlmProvider, ModelStream, StreamOptions};
use ward_core::stream::ModelEvent;

use crate::converter;
use crate::sse::{self, SseParser};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub idle_timeout: Duration,
}

impl ProviderConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            idle_timeout: SSE_IDLE_TIMEOUT,
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("build http client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    #[instrument(skip(self, context, options), fields(model = %options.model))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<ModelStream, GatewayError> {
        let body = converter::build_request_body(context, options);

        let resp = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        debug!("model stream opened");
        Ok(Box::pin(SseStream::with_idle_timeout(
            resp.bytes_stream(),
            self.config.idle_timeout,
        )))
    }
}

/// Wraps a byte stream from reqwest and yields model events.
///
/// Emits an error if no data arrives within the idle timeout. Ends after
/// the first terminal event.
///
/// Bytes are buffered raw and only complete events are decoded, so a code
/// point split across network chunks survives intact.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    buffer: Vec<u8>,
    pending: VecDeque<ModelEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    finished: bool,
}

impl SseStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            finished: false,
        }
    }

    /// Append a network chunk. Carriage returns are dropped byte-wise, which
    /// also handles a CRLF pair split across chunks.
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
    }

    fn drain_complete_events(&mut self) {
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let chunk: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            self.parse_chunk(&chunk);
        }
    }

    fn parse_chunk(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        for (event_type, data) in sse::parse_sse_lines(&text) {
            self.pending.extend(self.parser.parse_event(&event_type, &data));
        }
    }

    fn next_pending(&mut self) -> Option<ModelEvent> {
        let event = self.pending.pop_front()?;
        if event.is_terminal() {
            self.finished = true;
            self.pending.clear();
        }
        Some(event)
    }

    fn fail(&mut self, error: GatewayError) -> Poll<Option<ModelEvent>> {
        self.finished = true;
        Poll::Ready(Some(ModelEvent::Error { error }))
    }
}

impl Stream for SseStream {
    type Item = ModelEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if let Some(event) = self.next_pending() {
            return Poll::Ready(Some(event));
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    self.push_bytes(&bytes);
                    self.drain_complete_events();

                    if let Some(event) = self.next_pending() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return self.fail(GatewayError::StreamInterrupted(e.to_string()));
                }
                Poll::Ready(None) => {
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        self.parse_chunk(&remaining);
                        if let Some(event) = self.next_pending() {
                            return Poll::Ready(Some(event));
                        }
                    }
                    // Closed without message_stop.
                    return self.fail(GatewayError::StreamInterrupted(
                        "stream ended before message_stop".into(),
                    ));
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        let secs = self.idle_duration.as_secs();
                        return self.fail(GatewayError::StreamInterrupted(format!(
                            "idle timeout after {secs}s"
                        )));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

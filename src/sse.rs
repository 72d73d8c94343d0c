//! SSE splitter.
//!
//! A pass-through transformer over a byte stream of Server-Sent Events: every
//! chunk is forwarded downstream unmodified while complete `data:` lines are
//! scanned for the first `{model, usage}` the provider reports. The metering
//! callback fires exactly once, when the upstream stream ends.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

use crate::providers::types::Usage;
use crate::providers::ProviderAdapter;

/// Invoked once at stream end with the latched `(model, usage)` pair; either
/// side may be `None` when the stream never carried it.
pub type MeterCallback = Box<dyn FnOnce(Option<String>, Option<Usage>) + Send>;

pin_project! {
    pub struct SseSplitter<S> {
        #[pin]
        inner: S,
        adapter: Arc<dyn ProviderAdapter>,
        // Partial line carried across chunk boundaries.
        buffer: String,
        model: Option<String>,
        usage: Option<Usage>,
        on_end: Option<MeterCallback>,
    }
}

impl<S> SseSplitter<S> {
    pub fn new(inner: S, adapter: Arc<dyn ProviderAdapter>, on_end: MeterCallback) -> Self {
        Self {
            inner,
            adapter,
            buffer: String::new(),
            model: None,
            usage: None,
            on_end: Some(on_end),
        }
    }
}

impl<S, E> Stream for SseSplitter<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                scan_chunk(
                    this.buffer,
                    this.adapter.as_ref(),
                    this.model,
                    this.usage,
                    &chunk,
                );
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                if let Some(on_end) = this.on_end.take() {
                    on_end(this.model.take(), this.usage.take());
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Append a chunk to the line buffer and scan every completed line, latching
/// the first model and first usage seen. Unparseable frames are skipped.
fn scan_chunk(
    buffer: &mut String,
    adapter: &dyn ProviderAdapter,
    model: &mut Option<String>,
    usage: &mut Option<Usage>,
    chunk: &Bytes,
) {
    buffer.push_str(&String::from_utf8_lossy(chunk));

    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim_end_matches(['\n', '\r']);

        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
            continue;
        };

        let frame = adapter.parse(&event);
        if model.is_none() {
            *model = frame.model;
        }
        if usage.is_none() {
            *usage = frame.usage;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::providers::openai::OpenAiAdapter;
    use crate::providers::pricing::PricingTable;
    use futures::StreamExt;
    use std::convert::Infallible;
    use std::sync::Mutex;

    type Latched = Arc<Mutex<Option<(Option<String>, Option<Usage>)>>>;

    fn adapter() -> Arc<dyn ProviderAdapter> {
        Arc::new(OpenAiAdapter::new(
            &Config::with_secret("s"),
            Arc::new(PricingTable::openai()),
        ))
    }

    fn capture() -> (Latched, MeterCallback) {
        let slot: Latched = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        let callback: MeterCallback = Box::new(move |model, usage| {
            *sink.lock().unwrap() = Some((model, usage));
        });
        (slot, callback)
    }

    async fn run(chunks: Vec<&'static str>) -> (Vec<Bytes>, Latched) {
        let (slot, callback) = capture();
        let stream = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, Infallible>(Bytes::from_static(c.as_bytes()))),
        );
        let splitter = SseSplitter::new(stream, adapter(), callback);
        let out: Vec<Bytes> = splitter.map(|r| r.unwrap()).collect().await;
        (out, slot)
    }

    #[tokio::test]
    async fn test_chunks_forwarded_byte_identical() {
        let chunks = vec![
            "data: {\"model\":\"gpt-4.1-nano\"}\n\n",
            "data: [DONE]\n\n",
        ];
        let (out, _) = run(chunks.clone()).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Bytes::from_static(chunks[0].as_bytes()));
        assert_eq!(out[1], Bytes::from_static(chunks[1].as_bytes()));
    }

    #[tokio::test]
    async fn test_latches_model_and_usage_from_different_frames() {
        let (_, slot) = run(vec![
            "data: {\"model\":\"gpt-4.1-nano\",\"choices\":[{}]}\n\n",
            "data: {\"model\":\"gpt-4.1-nano\",\"usage\":{\"prompt_tokens\":500,\"completion_tokens\":200}}\n\n",
        ])
        .await;
        let (model, usage) = slot.lock().unwrap().take().unwrap();
        assert_eq!(model.as_deref(), Some("gpt-4.1-nano"));
        let usage = usage.unwrap();
        assert_eq!(usage.prompt_tokens, 500);
        assert_eq!(usage.completion_tokens, 200);
    }

    #[tokio::test]
    async fn test_first_usage_wins() {
        let (_, slot) = run(vec![
            "data: {\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1}}\n\n",
            "data: {\"usage\":{\"prompt_tokens\":99,\"completion_tokens\":99}}\n\n",
        ])
        .await;
        let (_, usage) = slot.lock().unwrap().take().unwrap();
        assert_eq!(usage.unwrap().prompt_tokens, 1);
    }

    #[tokio::test]
    async fn test_frame_split_across_chunks() {
        let (_, slot) = run(vec![
            "data: {\"model\":\"gpt-4",
            ".1-nano\",\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5}}\n\n",
        ])
        .await;
        let (model, usage) = slot.lock().unwrap().take().unwrap();
        assert_eq!(model.as_deref(), Some("gpt-4.1-nano"));
        assert_eq!(usage.unwrap().prompt_tokens, 10);
    }

    #[tokio::test]
    async fn test_unparseable_frames_skipped_silently() {
        let (_, slot) = run(vec![
            "data: [DONE]\n\n",
            "data: not json\n\n",
            ": comment line\n\n",
            "data: {\"model\":\"gpt-4.1-nano\"}\n\n",
        ])
        .await;
        let (model, usage) = slot.lock().unwrap().take().unwrap();
        assert_eq!(model.as_deref(), Some("gpt-4.1-nano"));
        assert!(usage.is_none());
    }

    #[tokio::test]
    async fn test_callback_fires_once_with_nothing_latched() {
        let (_, slot) = run(vec!["data: [DONE]\n\n"]).await;
        let (model, usage) = slot.lock().unwrap().take().unwrap();
        assert!(model.is_none());
        assert!(usage.is_none());
    }
}

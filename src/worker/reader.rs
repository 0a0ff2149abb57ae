//! Worker stream reader task.
//!
//! Reads raw byte chunks from one of the worker's output streams and
//! forwards them, tagged with the stream and the worker generation, to the
//! supervisor's event channel. Framing and decoding happen in the
//! supervisor, which owns the per-stream [`LineFramer`]s; this task only
//! moves bytes, so chunk order on the channel equals read order.
//!
//! [`LineFramer`]: crate::worker::framer::LineFramer

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::message::StreamKind;
use crate::worker::supervisor::StreamEvent;

/// Stream reader task: forwards chunks until EOF, error or cancellation.
///
/// Sends [`StreamEvent::Data`] per chunk, then exactly one of
/// [`StreamEvent::Closed`] (clean EOF) or [`StreamEvent::Failed`] (read
/// error). Cancellation and a closed event channel stop the task silently.
pub async fn run_stream_reader<R>(
    generation: u64,
    stream: StreamKind,
    reader: R,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut chunks = ReaderStream::new(reader);

    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, stream = stream.as_str(), "stream reader cancelled");
                return;
            }

            item = chunks.next() => item,
        };

        let event = match item {
            Some(Ok(chunk)) => StreamEvent::Data {
                generation,
                stream,
                chunk,
            },
            Some(Err(err)) => StreamEvent::Failed {
                generation,
                stream,
                reason: format!("read failed: {err}"),
            },
            None => StreamEvent::Closed { generation, stream },
        };
        let last = !matches!(event, StreamEvent::Data { .. });

        if event_tx.send(event).await.is_err() {
            debug!(generation, stream = stream.as_str(), "event channel closed, stopping reader");
            return;
        }
        if last {
            return;
        }
    }
}

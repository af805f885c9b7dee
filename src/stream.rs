//! Stream bridging.
//!
//! Carries items from one stream into another across a task boundary: a
//! spawned task reads the input, maps each item and forwards it to a channel
//! whose receiving half is returned as a stream. The output ends when the
//! input ends, when the mapper returns `None`, or when the output is dropped.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Items buffered between the bridge task and the output stream.
pub const BRIDGE_BUFFER: usize = 64;

/// Spawn a bridge task from `input` to the returned stream.
///
/// `map` converts each input item; returning `None` terminates the output
/// (used to end the stream on an upstream error).
pub fn bridge<S, F, T>(input: S, mut map: F) -> ReceiverStream<T>
where
    S: Stream + Send + 'static,
    S::Item: Send,
    F: FnMut(S::Item) -> Option<T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(BRIDGE_BUFFER);

    tokio::spawn(async move {
        let mut input = std::pin::pin!(input);
        loop {
            let item = tokio::select! {
                item = input.next() => item,
                _ = tx.closed() => {
                    debug!("Bridge output dropped, stopping");
                    break;
                }
            };

            let Some(item) = item else {
                debug!("Bridge input ended");
                break;
            };

            let Some(out) = map(item) else {
                debug!("Bridge input signalled end");
                break;
            };

            if tx.send(out).await.is_err() {
                debug!("Bridge output dropped, stopping");
                break;
            }
        }
    });

    ReceiverStream::new(rx)
}

//! Framed Codec (spec.md §4.1): length-prefixed `Content-Length` framing over
//! any duplex byte stream.
//!
//! Grounded on the teacher's integration test harness
//! (`tests/support/client/mod.rs`), which already frames LSP traffic with
//! `tokio_util::codec::Framed<T, LspCodec>` — promoted here from a
//! test-only dependency to the core framing mechanism, since the dispatcher
//! itself is now asynchronous end-to-end rather than a blocking stdin reader.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use lsp_codec::LspCodec;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::FramingError;

/// The framed transport for one connection direction: decodes/encodes
/// `Content-Length`-prefixed JSON values.
pub type FramedTransport<T> = Framed<T, LspCodec>;

/// Wraps a duplex stream in the Content-Length framing codec.
pub fn frame<T>(transport: T) -> FramedTransport<T>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(transport, LspCodec::default())
}

/// The read half of a framed transport, yielding one parsed JSON value per
/// frame. A malformed frame (missing header, bad UTF-8, invalid JSON) surfaces
/// as `Err` here; per spec.md §4.1 this must not terminate the stream, so
/// callers (the Message Emitter) log it and keep polling rather than treating
/// it as the end of the stream.
pub type FramedReader<T> = SplitStream<FramedTransport<T>>;

/// The write half of a framed transport. A single owner serializes all writes
/// so that two concurrent emissions never interleave bytes on the wire
/// (spec.md §4.1, §5).
pub type FramedWriter<T> = SplitSink<FramedTransport<T>, Value>;

/// Splits a framed transport into independent read/write halves.
pub fn split<T>(transport: FramedTransport<T>) -> (FramedWriter<T>, FramedReader<T>)
where
    T: AsyncRead + AsyncWrite,
{
    let (sink, stream) = transport.split();
    (sink, stream)
}

/// Writes a single JSON value as one atomic frame. Because `FramedWriter` is
/// owned by exactly one task (the connection's writer), calls to this never
/// interleave with each other.
pub async fn write_frame<T>(writer: &mut FramedWriter<T>, value: Value) -> Result<(), FramingError>
where
    T: AsyncWrite + Unpin,
{
    writer.send(value).await.map_err(FramingError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_frame_through_the_codec() {
        let (client, server) = duplex(4096);

        let mut client = frame(client);
        let server = frame(server);
        let (_write, mut read) = split(server);

        client.send(json!({"jsonrpc": "2.0", "method": "ping", "params": {}})).await.unwrap();

        let received = read.next().await.unwrap().unwrap();
        assert_eq!(received, json!({"jsonrpc": "2.0", "method": "ping", "params": {}}));
    }
}

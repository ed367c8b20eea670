//! Ingestion connection handler.
//!
//! Reads one bounded payload, allocates an id, stores the paste and
//! answers with a single line. Every failure is confined to the connection
//! it happened on.

use super::reply::Reply;
use crate::ids::{AllocError, IdAllocator};
use crate::store::PasteStore;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Everything a connection needs to turn bytes into a stored paste
#[derive(Clone)]
pub struct IngestContext {
    pub store: PasteStore,
    pub allocator: Arc<dyn IdAllocator>,
    pub max_size: usize,
    pub read_to_eof: bool,
    pub read_timeout: Option<Duration>,
    /// Without `read_to_eof`, keep collecting segments until the peer has
    /// been quiet this long; `None` means a single read
    pub read_settle: Option<Duration>,
    /// `http://host:port`, without a trailing slash
    pub base_url: String,
}

/// Handle a single ingestion connection.
///
/// Errors are only returned for failures while writing the reply; read
/// problems degrade to an empty paste.
pub async fn handle_connection<S>(mut stream: S, ctx: &IngestContext) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = read_payload(&mut stream, ctx).await;
    let reply = ingest(&payload, ctx).await;

    stream.write_all(&reply.to_bytes()).await?;
    stream.shutdown().await
}

/// Read the payload, treating any read error or timeout as empty input
async fn read_payload<S>(stream: &mut S, ctx: &IngestContext) -> BytesMut
where
    S: AsyncRead + Unpin,
{
    // One byte past the limit is enough to detect oversize input
    let limit = ctx.max_size.saturating_add(1);
    let read = read_bounded(stream, limit, ctx.read_to_eof, ctx.read_settle);

    let result = match ctx.read_timeout {
        Some(deadline) => match tokio::time::timeout(deadline, read).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
        },
        None => read.await,
    };

    match result {
        Ok(buffer) => buffer,
        Err(e) => {
            debug!(error = %e, "Read failed, treating as empty paste");
            BytesMut::new()
        }
    }
}

/// Read at most `limit` bytes.
///
/// The first read always waits. After that, `to_eof` keeps reading until the
/// peer closes; otherwise reading goes on only while new data shows up
/// within the settle window, so clients that never half-close still get a
/// reply.
async fn read_bounded<S>(
    stream: &mut S,
    limit: usize,
    to_eof: bool,
    settle: Option<Duration>,
) -> io::Result<BytesMut>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(limit);
    let mut reader = stream.take(limit as u64);

    let mut n = reader.read_buf(&mut buffer).await?;
    while n > 0 {
        n = match (to_eof, settle) {
            (true, _) => reader.read_buf(&mut buffer).await?,
            (false, Some(window)) => {
                match tokio::time::timeout(window, reader.read_buf(&mut buffer)).await {
                    Ok(read) => read?,
                    Err(_) => break,
                }
            }
            (false, None) => break,
        };
    }

    Ok(buffer)
}

/// Turn a payload into a stored paste and the reply describing the outcome
pub async fn ingest(payload: &[u8], ctx: &IngestContext) -> Reply {
    if payload.len() > ctx.max_size {
        debug!(max_size = ctx.max_size, "Rejected oversize paste");
        return Reply::TooLarge {
            max_size: ctx.max_size,
        };
    }

    let content = String::from_utf8_lossy(payload);

    // Counter allocation does blocking, fsynced file I/O
    let allocator = Arc::clone(&ctx.allocator);
    let id = match tokio::task::spawn_blocking(move || allocator.next_id()).await {
        Ok(Ok(id)) => id,
        Ok(Err(e @ AllocError::Exhausted { .. })) => {
            warn!(error = %e, "Bin is full");
            return Reply::BinFull;
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Identifier allocation failed");
            return Reply::BinFull;
        }
        Err(e) => {
            warn!(error = %e, "Identifier allocation task failed");
            return Reply::BinFull;
        }
    };

    if let Err(e) = ctx.store.put(&id, &content).await {
        warn!(%id, error = %e, "Failed to store paste");
        return Reply::ServerError;
    }

    info!(%id, bytes = content.len(), "Paste stored");
    Reply::Stored(format!("{}/{}", ctx.base_url, id))
}

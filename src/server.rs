//! Listener setup and the two long-running server tasks.
//!
//! The ingestion listener accepts and fully handles one connection at a
//! time. The HTTP retrieval server runs as a separate task and may serve
//! requests concurrently.

use crate::config::Config;
use crate::ids;
use crate::protocols::http::{router, AppState};
use crate::protocols::ingest::{handle_connection, IngestContext};
use crate::store::{PasteStore, StoreError};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Listen backlog for the HTTP socket
const HTTP_BACKLOG: i32 = 128;

/// Fatal server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to resolve '{host}:{port}': {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("ingestion listener failed: {0}")]
    Accept(#[source] io::Error),

    #[error("HTTP server failed: {0}")]
    Http(#[source] io::Error),

    #[error("HTTP server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Server instance with both listeners bound
pub struct Server {
    ingest_listener: TcpListener,
    http_listener: TcpListener,
    ctx: IngestContext,
}

impl Server {
    /// Open the store, build the allocator and bind both listeners
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let store = PasteStore::open(&config.paste_dir)?;
        let allocator = ids::from_config(config);

        let ingest_addr = resolve(&config.host, config.port).await?;
        let http_addr = resolve(&config.host, config.http_port).await?;

        let ingest_listener = bind_listener(ingest_addr, config.backlog)?;
        let http_listener = bind_listener(http_addr, HTTP_BACKLOG)?;

        // Port 0 binds resolve to a real port, which is what clients need
        let http_port = http_listener.local_addr()?.port();
        let ctx = IngestContext {
            store,
            allocator,
            max_size: config.max_size,
            read_to_eof: config.read_to_eof,
            read_timeout: config.read_timeout,
            read_settle: config.read_settle,
            base_url: format!("http://{}:{}", config.public_host, http_port),
        };

        Ok(Server {
            ingest_listener,
            http_listener,
            ctx,
        })
    }

    pub fn ingest_addr(&self) -> io::Result<SocketAddr> {
        self.ingest_listener.local_addr()
    }

    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.http_listener.local_addr()
    }

    /// Run both listeners until one of them fails
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            ingest_listener,
            http_listener,
            ctx,
        } = self;

        info!(paste_dir = %ctx.store.root().display(), "Serving pastes");

        let app = router(AppState {
            store: ctx.store.clone(),
        });
        let mut http = tokio::spawn(async move { axum::serve(http_listener, app).await });

        let result = tokio::select! {
            res = accept_loop(ingest_listener, ctx) => res.map_err(ServerError::Accept),
            res = &mut http => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ServerError::Http(e)),
                Err(e) => Err(ServerError::Task(e)),
            },
        };

        http.abort();
        result
    }
}

/// Accept and handle ingestion connections one at a time
async fn accept_loop(listener: TcpListener, ctx: IngestContext) -> io::Result<()> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) if is_connection_error(&e) => {
                debug!(error = %e, "Connection dropped before accept");
                continue;
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                return Err(e);
            }
        };

        debug!(peer = %addr, "New connection");
        if let Err(e) = handle_connection(stream, &ctx).await {
            debug!(peer = %addr, error = %e, "Connection error");
        }
    }
}

/// Accept errors that concern a single connection, not the listener
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let resolve_error = |source: io::Error| ServerError::Resolve {
        host: host.to_string(),
        port,
        source,
    };

    tokio::net::lookup_host((host, port))
        .await
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| resolve_error(io::Error::new(io::ErrorKind::NotFound, "no addresses")))
}

/// Bind a listener with `SO_REUSEADDR` and an explicit backlog
fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, ServerError> {
    let bind = || -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        TcpListener::from_std(socket.into())
    };

    bind().map_err(|source| ServerError::Bind { addr, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdPolicy;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config(dir: &Path) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            http_port: 0,
            public_host: "127.0.0.1".to_string(),
            backlog: 5,
            read_to_eof: false,
            read_timeout: None,
            read_settle: Some(Duration::from_millis(100)),
            paste_dir: dir.join("pastes"),
            max_size: 1024 * 1024,
            id_policy: IdPolicy::Counter,
            id_capacity: 65536,
            counter_file: dir.join("count.txt"),
            random_id_length: 4,
            log_level: "info".to_string(),
        }
    }

    async fn start(config: Config) -> (SocketAddr, SocketAddr) {
        let server = Server::bind(&config).await.unwrap();
        let ingest = server.ingest_addr().unwrap();
        let http = server.http_addr().unwrap();
        tokio::spawn(server.run());
        (ingest, http)
    }

    async fn submit(addr: SocketAddr, payload: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();

        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    /// Minimal HTTP/1.1 GET returning (status line, lowercased head, body)
    async fn http_get(addr: SocketAddr, path: &str) -> (String, String, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        let (head, body) = raw.split_once("\r\n\r\n").unwrap();
        let status = head.lines().next().unwrap().to_string();
        (status, head.to_lowercase(), body.to_string())
    }

    #[test]
    fn test_is_connection_error() {
        assert!(is_connection_error(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(!is_connection_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }

    #[tokio::test]
    async fn test_bind_reports_actual_http_port_in_urls() {
        let dir = TempDir::new().unwrap();
        let server = Server::bind(&test_config(dir.path())).await.unwrap();
        let http_port = server.http_addr().unwrap().port();

        assert_ne!(http_port, 0);
        assert_eq!(server.ctx.base_url, format!("http://127.0.0.1:{http_port}"));
        assert!(dir.path().join("pastes").is_dir());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let dir = TempDir::new().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = test_config(dir.path());
        config.port = taken.local_addr().unwrap().port();

        let result = Server::bind(&config).await;

        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_hello_world_round_trip() {
        let dir = TempDir::new().unwrap();
        let (ingest, http) = start(test_config(dir.path())).await;

        let reply = submit(ingest, b"hello world").await;
        assert_eq!(reply, format!("http://127.0.0.1:{}/0000\n", http.port()));

        let (status, head, body) = http_get(http, "/0000").await;
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert!(head.contains("content-type: text/plain; charset=utf-8"));
        assert!(head.contains("content-length: 11"));
        assert_eq!(body, "hello world");
    }

    #[tokio::test]
    async fn test_round_trip_is_lossy_utf8() {
        let dir = TempDir::new().unwrap();
        let (ingest, http) = start(test_config(dir.path())).await;

        let reply = submit(ingest, b"bad \xff byte").await;
        let path = reply.trim_end().rsplit('/').next().unwrap().to_string();

        let (_, _, body) = http_get(http, &format!("/{path}")).await;
        assert_eq!(body, "bad \u{FFFD} byte");
    }

    #[tokio::test]
    async fn test_ids_advance_across_connections() {
        let dir = TempDir::new().unwrap();
        let (ingest, http) = start(test_config(dir.path())).await;

        for expected in ["0000", "0001", "0002"] {
            let reply = submit(ingest, expected.as_bytes()).await;
            assert!(reply.ends_with(&format!("/{expected}\n")), "{reply}");
        }

        let (_, _, body) = http_get(http, "/0001").await;
        assert_eq!(body, "0001");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("count.txt")).unwrap(),
            "3"
        );
    }

    #[tokio::test]
    async fn test_empty_connection_stores_empty_paste() {
        let dir = TempDir::new().unwrap();
        let (ingest, http) = start(test_config(dir.path())).await;

        let reply = submit(ingest, b"").await;
        assert!(reply.ends_with("/0000\n"), "{reply}");

        let (status, head, body) = http_get(http, "/0000").await;
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert!(head.contains("content-length: 0"));
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn test_oversize_paste_is_not_stored() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.max_size = 16;
        let (ingest, http) = start(config).await;

        let reply = submit(ingest, &[b'a'; 17]).await;
        assert_eq!(reply, "Error: Paste too large (max 16 bytes)\n");
        assert_eq!(std::fs::read_dir(dir.path().join("pastes")).unwrap().count(), 0);

        let (status, _, body) = http_get(http, "/0000").await;
        assert_eq!(status, "HTTP/1.1 404 Not Found");
        assert_eq!(body, "Paste not found");
    }

    #[tokio::test]
    async fn test_one_mebibyte_plus_one_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (ingest, _http) = start(test_config(dir.path())).await;

        let reply = submit(ingest, &vec![b'a'; 1024 * 1024 + 1]).await;

        assert_eq!(reply, "Error: Paste too large (max 1MB)\n");
        assert_eq!(std::fs::read_dir(dir.path().join("pastes")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_one_mebibyte_plus_one_is_rejected_reading_to_eof() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.read_to_eof = true;
        let (ingest, _http) = start(config).await;

        let reply = submit(ingest, &vec![b'a'; 1024 * 1024 + 1]).await;

        assert_eq!(reply, "Error: Paste too large (max 1MB)\n");
        assert_eq!(std::fs::read_dir(dir.path().join("pastes")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_full_size_paste_is_stored_whole() {
        let dir = TempDir::new().unwrap();
        let (ingest, _http) = start(test_config(dir.path())).await;

        let reply = submit(ingest, &vec![b'a'; 1024 * 1024]).await;

        assert!(reply.ends_with("/0000\n"), "{reply}");
        assert_eq!(
            std::fs::metadata(dir.path().join("pastes").join("0000"))
                .unwrap()
                .len(),
            1024 * 1024
        );
    }

    #[tokio::test]
    async fn test_full_bin() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.id_capacity = 1;
        let (ingest, _http) = start(config).await;

        assert!(submit(ingest, b"first").await.ends_with("/0000\n"));
        assert_eq!(submit(ingest, b"second").await, "Error: Bin is full\n");
        assert_eq!(submit(ingest, b"third").await, "Error: Bin is full\n");
        assert_eq!(std::fs::read_dir(dir.path().join("pastes")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_paste_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (_ingest, http) = start(test_config(dir.path())).await;

        let (status, head, body) = http_get(http, "/9999").await;
        assert_eq!(status, "HTTP/1.1 404 Not Found");
        assert!(head.contains("content-type: text/plain"));
        assert_eq!(body, "Paste not found");
    }

    #[tokio::test]
    async fn test_http_is_served_while_ingestion_is_stalled() {
        let dir = TempDir::new().unwrap();
        let (ingest, http) = start(test_config(dir.path())).await;

        // A silent client blocks the ingestion loop indefinitely
        let _stalled = TcpStream::connect(ingest).await.unwrap();

        let (status, _, _) = http_get(http, "/9999").await;
        assert_eq!(status, "HTTP/1.1 404 Not Found");
    }

    #[tokio::test]
    async fn test_random_policy_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.id_policy = IdPolicy::Random;
        let (ingest, http) = start(config).await;

        let reply = submit(ingest, b"dice").await;
        let id = reply.trim_end().rsplit('/').next().unwrap().to_string();
        assert_eq!(id.len(), 4);
        assert!(id.bytes().all(|b| b.is_ascii_digit()));
        assert!(!dir.path().join("count.txt").exists());

        let (_, _, body) = http_get(http, &format!("/{id}")).await;
        assert_eq!(body, "dice");
    }
}

//! The accept loop and the control-stream protocol.

use std::fs::File;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU8;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use qft_pool::ByteBufferPool;
use qft_protocol::{ChunkMeta, FileMeta, TRANSFER_REQUEST_MAX_LENGTH, TransferRequest, ZERO_DIGEST, chunk_span};
use qft_transport::{INITIAL_STREAM_RECEIVE_WINDOW, SetupError, close_with, tls};
use quinn::{Connection, Endpoint, RecvStream, SendStream};
use tokio::task::{self, JoinSet};
use tracing::{debug, info, warn};

use crate::error::HandlerError;

/// Listener configuration.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Address to bind the UDP listener on.
    pub host: String,
    /// UDP port; 0 lets the OS pick.
    pub port: u16,
    /// PEM certificate chain. Self-signed material is generated when either
    /// this or `key` is absent.
    pub cert: Option<PathBuf>,
    /// PEM private key matching `cert`.
    pub key: Option<PathBuf>,
    /// Organization name stamped into generated certificates.
    pub org: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 1234,
            cert: None,
            key: None,
            org: "qft".to_owned(),
        }
    }
}

/// A bound file server.
#[derive(Debug)]
pub struct FileServer {
    endpoint: Endpoint,
}

impl FileServer {
    /// Binds the UDP listener and prepares TLS material, generating a
    /// self-signed certificate when none was supplied.
    pub fn bind(options: &ServerOptions) -> Result<Self, SetupError> {
        let material = match (&options.cert, &options.key) {
            (Some(cert), Some(key)) => tls::load_material(cert, key)?,
            _ => tls::self_signed(
                &options.org,
                &["localhost".to_owned(), options.host.clone()],
            )?,
        };

        let ip: IpAddr = options
            .host
            .parse()
            .map_err(|err| SetupError::Io(io::Error::new(io::ErrorKind::InvalidInput, err)))?;
        let endpoint = qft_transport::server_endpoint(SocketAddr::new(ip, options.port), material)?;
        let addr = endpoint.local_addr()?;
        info!(%addr, "listening");
        Ok(Self { endpoint })
    }

    /// The bound listener address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Accepts connections until the endpoint is closed. Per-connection
    /// failures are logged; the loop keeps serving.
    pub async fn serve(&self) {
        while let Some(incoming) = self.endpoint.accept().await {
            tokio::spawn(async move {
                let connection = match incoming.accept() {
                    Ok(connecting) => match connecting.await {
                        Ok(connection) => connection,
                        Err(err) => {
                            warn!("handshake failed: {err}");
                            return;
                        }
                    },
                    Err(err) => {
                        warn!("connection rejected: {err}");
                        return;
                    }
                };

                debug!(remote = %connection.remote_address(), "connection accepted");
                handle_connection(connection).await;
            });
        }
    }
}

/// Accepts control streams for one connection until the peer goes away.
/// QUIC multiplexes, so each control stream is handled independently.
async fn handle_connection(connection: Connection) {
    loop {
        match connection.accept_bi().await {
            Ok((send, recv)) => {
                let connection = connection.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_control_stream(&connection, send, recv).await {
                        close_with(&connection, err.close_code(), &err.to_string());
                        warn!("control stream failed: {err}");
                    }
                });
            }
            Err(err) => {
                debug!("connection ended: {err}");
                return;
            }
        }
    }
}

async fn handle_control_stream(
    connection: &Connection,
    mut send: SendStream,
    mut recv: RecvStream,
) -> Result<(), HandlerError> {
    // The client sends the whole request as one frame; a single read is the
    // protocol contract.
    let mut buf = vec![0u8; TRANSFER_REQUEST_MAX_LENGTH];
    let n = recv
        .read(&mut buf)
        .await
        .map_err(HandlerError::transport)?
        .ok_or_else(|| HandlerError::Transport("control stream closed before a request".into()))?;
    let request = TransferRequest::decode(&buf[..n])?;
    info!(
        path = %request.path,
        streams = request.streams,
        check_md5 = request.check_md5,
        "transfer requested"
    );

    let src = PathBuf::from(&request.path);
    let file_size = source_size(&src).await?;
    let md5 = if request.check_md5 {
        sidecar_digest(&src).await?
    } else {
        ZERO_DIGEST
    };

    let meta = FileMeta { file_size, md5 };
    send.write_all(&meta.encode())
        .await
        .map_err(HandlerError::transport)?;

    let streams = NonZeroU8::new(request.streams)
        .ok_or(HandlerError::Payload(qft_protocol::WireError::StreamCount(0)))?;
    let pool = Arc::new(ByteBufferPool::new(
        INITIAL_STREAM_RECEIVE_WINDOW as usize,
        usize::from(streams.get()),
    ));
    let src = Arc::new(src);

    let mut senders = JoinSet::new();
    for index in 0..streams.get() {
        let connection = connection.clone();
        let src = Arc::clone(&src);
        let pool = Arc::clone(&pool);
        let span = chunk_span(file_size, streams, index);
        senders.spawn(async move {
            let result = send_chunk(&connection, &src, &pool, span).await;
            if let Err(err) = &result {
                // First failure closes the connection so sibling senders
                // error out of their stream writes promptly.
                close_with(&connection, err.close_code(), &err.to_string());
            }
            result
        });
    }

    let mut first_error: Option<HandlerError> = None;
    while let Some(joined) = senders.join_next().await {
        let result = joined.map_err(HandlerError::join).and_then(|result| result);
        if let Err(err) = result {
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    send.finish().map_err(HandlerError::transport)?;
    debug!(file_size, "transfer served");
    Ok(())
}

async fn source_size(src: &Path) -> Result<u64, HandlerError> {
    let path = src.to_path_buf();
    task::spawn_blocking(move || {
        let file = File::open(&path)?;
        file.metadata().map(|meta| meta.len())
    })
    .await
    .map_err(HandlerError::join)?
    .map_err(|err| HandlerError::local_io("opening the source", err))
}

async fn sidecar_digest(src: &Path) -> Result<[u8; 16], HandlerError> {
    let mut sidecar = src.as_os_str().to_owned();
    sidecar.push(".md5");
    let sidecar = PathBuf::from(sidecar);
    Ok(task::spawn_blocking(move || qft_checksums::read_sidecar(&sidecar))
        .await
        .map_err(HandlerError::join)??)
}

/// Streams one chunk: 16-byte header, then exactly `span.chunk_size` body
/// bytes read positionally from an independent open of the source.
async fn send_chunk(
    connection: &Connection,
    src: &Path,
    pool: &ByteBufferPool,
    span: ChunkMeta,
) -> Result<(), HandlerError> {
    let mut stream = connection
        .open_uni()
        .await
        .map_err(|err| HandlerError::Connection(err.to_string()))?;
    stream
        .write_all(&span.encode())
        .await
        .map_err(HandlerError::transport)?;
    debug!(
        offset = span.start_offset,
        size = span.chunk_size,
        "data stream opened"
    );

    let path = src.to_path_buf();
    let file = task::spawn_blocking(move || File::open(&path))
        .await
        .map_err(HandlerError::join)?
        .map_err(|err| HandlerError::local_io("opening the source", err))?;
    let file = Arc::new(file);

    let capacity = pool.buffer_capacity().max(1);
    let mut buf = pool.acquire();
    buf.resize(capacity, 0);

    let mut sent = 0u64;
    while sent < span.chunk_size {
        let remaining = span.chunk_size - sent;
        let want = if remaining < capacity as u64 {
            remaining as usize
        } else {
            capacity
        };

        let offset = span.start_offset + sent;
        let handle = Arc::clone(&file);
        let (n, returned) = task::spawn_blocking(move || -> io::Result<(usize, Vec<u8>)> {
            let n = handle.read_at(&mut buf[..want], offset)?;
            Ok((n, buf))
        })
        .await
        .map_err(HandlerError::join)?
        .map_err(|err| HandlerError::local_io("reading the source", err))?;
        buf = returned;

        if n == 0 {
            return Err(HandlerError::local_io(
                "reading the source",
                io::Error::new(io::ErrorKind::UnexpectedEof, "source shrank mid-transfer"),
            ));
        }

        stream
            .write_all(&buf[..n])
            .await
            .map_err(HandlerError::transport)?;
        sent += n as u64;
    }

    pool.release(buf);
    stream.finish().map_err(HandlerError::transport)?;
    Ok(())
}

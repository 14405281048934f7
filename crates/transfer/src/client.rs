//! The transfer orchestrator.

use std::fs::File;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use qft_pool::{ByteBufferPool, WriteChunk, WriteChunkPool};
use qft_protocol::{CloseCode, FILE_META_LENGTH, FileMeta, MAX_STREAMS, TransferRequest};
use qft_transport::{ClientTrust, close_with};
use quinn::Connection;
use tokio::sync::{Mutex, OnceCell, mpsc, watch};
use tokio::task::{self, JoinSet};
use tracing::{debug, info};

use crate::error::TransferError;
use crate::mapped::{self, MappedDest};
use crate::progress;
use crate::worker::{self, WorkerContext, WriteBackend};
use crate::{DEFAULT_WRITERS, WRITE_SIZE};

/// How received bytes reach the destination file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Positional writes through per-worker opens. The default.
    #[default]
    Direct,
    /// Copies into a memory-mapped view through a pool of writer tasks.
    Mapped,
}

/// Everything a [`Client`] needs to know before dialing.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Server host name or address; also the TLS server name.
    pub host: String,
    /// Server UDP port.
    pub port: u16,
    /// Local UDP port to bind; 0 lets the OS pick.
    pub local_port: u16,
    /// Data-stream parallelism, `1..=100`.
    pub streams: u8,
    /// Verify the received file against the source digest.
    pub check_md5: bool,
    /// Server certificate trust policy.
    pub trust: ClientTrust,
    /// Write path selection.
    pub mode: WriteMode,
    /// Copy tasks for [`WriteMode::Mapped`].
    pub writers: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 1234,
            local_port: 1235,
            streams: 1,
            check_md5: false,
            trust: ClientTrust::Insecure,
            mode: WriteMode::Direct,
            writers: DEFAULT_WRITERS,
        }
    }
}

/// A configured transfer client.
#[derive(Debug)]
pub struct Client {
    options: ClientOptions,
}

impl Client {
    /// Validates `options`. Fails with a configuration error before any
    /// socket work when the stream count is out of range.
    pub fn new(options: ClientOptions) -> Result<Self, TransferError> {
        if options.streams == 0 || options.streams > MAX_STREAMS {
            return Err(TransferError::Config(format!(
                "streams must be within 1..={MAX_STREAMS}, got {}",
                options.streams
            )));
        }
        Ok(Self { options })
    }

    /// Transfers `<src_dir>/<filename>` from the server into
    /// `<dst_dir>/<filename>` and returns the destination path.
    pub async fn transfer(
        &self,
        src_dir: &Path,
        filename: &str,
        dst_dir: &Path,
    ) -> Result<PathBuf, TransferError> {
        if filename.is_empty() {
            return Err(TransferError::Config("filename is empty".to_owned()));
        }

        let started = Instant::now();
        let src_path = src_dir.join(filename);
        let dst_path = dst_dir.join(filename);
        let wire_path = src_path
            .to_str()
            .ok_or_else(|| TransferError::Config("source path is not valid UTF-8".to_owned()))?
            .to_owned();

        // Created (or truncated to zero) upfront; the final size arrives
        // with the file meta.
        File::create(&dst_path)
            .map_err(|err| TransferError::local_io("creating the destination", err))?;

        let remote = self.resolve().await?;
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.options.local_port);
        let endpoint = qft_transport::client_endpoint(bind, &self.options.trust)?;
        let connection = qft_transport::connect(&endpoint, remote, &self.options.host).await?;
        info!(%remote, streams = self.options.streams, "connection established");

        let result = self.run(&connection, &wire_path, &dst_path).await;
        match &result {
            Ok(()) => close_with(&connection, CloseCode::NoError, "transfer complete"),
            Err(err) => close_with(
                &connection,
                err.close_code().unwrap_or(CloseCode::Internal),
                &err.to_string(),
            ),
        }
        endpoint.wait_idle().await;
        result?;

        info!(elapsed = ?started.elapsed(), path = %dst_path.display(), "transfer finished");
        Ok(dst_path)
    }

    async fn resolve(&self) -> Result<SocketAddr, TransferError> {
        let mut addrs = tokio::net::lookup_host((self.options.host.as_str(), self.options.port))
            .await
            .map_err(|err| TransferError::local_io("resolving the server address", err))?;
        addrs.find(|addr| addr.is_ipv4()).ok_or_else(|| {
            TransferError::Config(format!("no IPv4 address for {}", self.options.host))
        })
    }

    async fn run(
        &self,
        connection: &Connection,
        wire_path: &str,
        dst_path: &Path,
    ) -> Result<(), TransferError> {
        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|err| TransferError::Connection(err.to_string()))?;

        let request = TransferRequest {
            streams: self.options.streams,
            check_md5: self.options.check_md5,
            path: wire_path.to_owned(),
        }
        .encode()?;
        send.write_all(&request)
            .await
            .map_err(TransferError::transport)?;
        send.finish().map_err(TransferError::transport)?;

        let mut meta_buf = [0u8; FILE_META_LENGTH];
        recv.read_exact(&mut meta_buf).await?;
        let meta = FileMeta::decode(&meta_buf)?;
        debug!(file_size = meta.file_size, "file meta received");

        let bytes_received = Arc::new(AtomicU64::new(0));
        let (progress_tx, progress_rx) = watch::channel(());
        let reporter = (meta.file_size > 0).then(|| {
            tokio::spawn(progress::report(
                progress_rx,
                Arc::clone(&bytes_received),
                meta.file_size,
            ))
        });

        let ctx = Arc::new(WorkerContext {
            dst_path: Arc::new(dst_path.to_path_buf()),
            file_size: meta.file_size,
            byte_pool: Arc::new(ByteBufferPool::new(
                WRITE_SIZE,
                usize::from(self.options.streams) * 2,
            )),
            bytes_received,
            progress: progress_tx,
        });

        let outcome = match self.options.mode {
            WriteMode::Direct => self.run_direct(connection, &ctx).await,
            WriteMode::Mapped => self.run_mapped(connection, &ctx, dst_path).await,
        };

        // The last progress sender lives in the context; dropping it lets
        // the reporter drain and exit.
        drop(ctx);
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }
        outcome?;

        if self.options.check_md5 {
            self.verify(dst_path, &meta).await?;
        }
        Ok(())
    }

    async fn run_direct(
        &self,
        connection: &Connection,
        ctx: &Arc<WorkerContext>,
    ) -> Result<(), TransferError> {
        let resized = Arc::new(OnceCell::new());

        let mut workers = JoinSet::new();
        for _ in 0..self.options.streams {
            let stream = accept_data_stream(connection).await?;
            let ctx = Arc::clone(ctx);
            let resized = Arc::clone(&resized);
            let conn = connection.clone();
            workers.spawn(async move {
                let result = worker::run(stream, ctx, WriteBackend::Direct { resized }).await;
                fail_fast(&conn, &result);
                result
            });
        }

        join_workers(workers).await
    }

    async fn run_mapped(
        &self,
        connection: &Connection,
        ctx: &Arc<WorkerContext>,
        dst_path: &Path,
    ) -> Result<(), TransferError> {
        let dest = presize_and_map(dst_path, ctx.file_size).await?;
        let chunk_pool = Arc::new(WriteChunkPool::new(usize::from(self.options.streams) * 2));
        let writers = self.options.writers.max(1);

        let (write_tx, write_rx) = mpsc::channel::<WriteChunk>(writers * 2);
        let mut writer_tasks = JoinSet::new();
        let mut flusher = None;

        if let Some(dest) = &dest {
            let write_rx = Arc::new(Mutex::new(write_rx));
            let (flush_tx, flush_rx) = mpsc::channel::<()>(1);
            for _ in 0..writers {
                writer_tasks.spawn(mapped::copy_task(
                    Arc::clone(dest),
                    Arc::clone(&write_rx),
                    Arc::clone(&ctx.byte_pool),
                    Arc::clone(&chunk_pool),
                    flush_tx.clone(),
                ));
            }
            flusher = Some(tokio::spawn(mapped::flush_task(
                Arc::clone(dest),
                flush_rx,
            )));
        }

        let mut workers = JoinSet::new();
        for _ in 0..self.options.streams {
            let stream = accept_data_stream(connection).await?;
            let ctx = Arc::clone(ctx);
            let conn = connection.clone();
            let backend = WriteBackend::Mapped {
                tx: write_tx.clone(),
                chunk_pool: Arc::clone(&chunk_pool),
            };
            workers.spawn(async move {
                let result = worker::run(stream, ctx, backend).await;
                fail_fast(&conn, &result);
                result
            });
        }
        drop(write_tx);

        let outcome = join_workers(workers).await;

        // Writers exit once the queue drains and the last sender is gone;
        // the flusher follows when the writers drop their signal handles.
        while writer_tasks.join_next().await.is_some() {}
        if let Some(flusher) = flusher {
            let _ = flusher.await;
        }

        let flushed = match dest {
            Some(dest) => task::spawn_blocking(move || dest.flush())
                .await
                .map_err(TransferError::join)?
                .map_err(|err| TransferError::local_io("flushing the mapping", err)),
            None => Ok(()),
        };
        outcome.and(flushed)
    }

    async fn verify(&self, dst_path: &Path, meta: &FileMeta) -> Result<(), TransferError> {
        let path = dst_path.to_path_buf();
        let computed = task::spawn_blocking(move || qft_checksums::file_digest(&path))
            .await
            .map_err(TransferError::join)??;

        if computed != meta.md5 {
            std::fs::remove_file(dst_path).map_err(|err| {
                TransferError::local_io("removing the corrupt destination", err)
            })?;
            return Err(TransferError::IntegrityMismatch {
                expected: qft_checksums::to_hex(&meta.md5)?,
                computed: qft_checksums::to_hex(&computed)?,
            });
        }

        let sidecar = sidecar_path(dst_path);
        qft_checksums::write_sidecar(&sidecar, &computed)?;
        info!(sidecar = %sidecar.display(), "integrity verified");
        Ok(())
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".md5");
    PathBuf::from(os)
}

async fn accept_data_stream(connection: &Connection) -> Result<quinn::RecvStream, TransferError> {
    connection
        .accept_uni()
        .await
        .map_err(|err| TransferError::Connection(err.to_string()))
}

/// The first failing task closes the connection with its mapped code so
/// sibling streams error out promptly.
fn fail_fast(connection: &Connection, result: &Result<(), TransferError>) {
    if let Err(err) = result {
        close_with(
            connection,
            err.close_code().unwrap_or(CloseCode::Internal),
            &err.to_string(),
        );
    }
}

async fn join_workers(mut workers: JoinSet<Result<(), TransferError>>) -> Result<(), TransferError> {
    let mut first_error = None;
    while let Some(joined) = workers.join_next().await {
        let result = joined.map_err(TransferError::join).and_then(|result| result);
        if let Err(err) = result {
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn presize_and_map(
    dst_path: &Path,
    file_size: u64,
) -> Result<Option<Arc<MappedDest>>, TransferError> {
    let path = dst_path.to_path_buf();
    task::spawn_blocking(move || -> io::Result<Option<MappedDest>> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)?;
        file.set_len(file_size)?;
        // A zero-length mapping is not portable; nothing would be written
        // through it anyway.
        if file_size == 0 {
            return Ok(None);
        }
        MappedDest::new(&file).map(Some)
    })
    .await
    .map_err(TransferError::join)?
    .map_err(|err| TransferError::local_io("mapping the destination", err))
    .map(|dest| dest.map(Arc::new))
}

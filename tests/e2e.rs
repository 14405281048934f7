//! End-to-end transfers over loopback UDP.
//!
//! The happy paths run the real daemon; the fault scenarios (a corrupted
//! body byte, a prematurely finished stream) run a minimal in-test server
//! that speaks the same wire protocol but misbehaves on one data stream.

use std::num::NonZeroU8;
use std::path::{Path, PathBuf};
use std::time::Duration;

use qft_daemon::{FileServer, ServerOptions};
use qft_protocol::{FileMeta, TransferRequest, chunk_spans};
use qft_transfer::{Client, ClientOptions, TransferError, WriteMode};
use qft_transport::{ClientTrust, tls};
use rand::RngCore;
use tempfile::TempDir;

const TEST_DEADLINE: Duration = Duration::from_secs(60);

struct Fixture {
    src_dir: TempDir,
    dst_dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            src_dir: tempfile::tempdir().unwrap(),
            dst_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write_source(&self, filename: &str, len: usize) -> Vec<u8> {
        let mut contents = vec![0u8; len];
        rand::rng().fill_bytes(&mut contents);
        std::fs::write(self.src_dir.path().join(filename), &contents).unwrap();
        contents
    }

    fn write_sidecar(&self, filename: &str) {
        let path = self.src_dir.path().join(filename);
        let digest = qft_checksums::file_digest(&path).unwrap();
        let mut sidecar = path.into_os_string();
        sidecar.push(".md5");
        qft_checksums::write_sidecar(Path::new(&sidecar), &digest).unwrap();
    }

    fn dst_path(&self, filename: &str) -> PathBuf {
        self.dst_dir.path().join(filename)
    }
}

fn start_daemon() -> u16 {
    let server = FileServer::bind(&ServerOptions {
        host: "127.0.0.1".to_owned(),
        port: 0,
        cert: None,
        key: None,
        org: "qft test".to_owned(),
    })
    .unwrap();
    let port = server.local_addr().unwrap().port();
    tokio::spawn(async move { server.serve().await });
    port
}

fn client(port: u16, streams: u8, check_md5: bool, mode: WriteMode) -> Client {
    Client::new(ClientOptions {
        host: "127.0.0.1".to_owned(),
        port,
        local_port: 0,
        streams,
        check_md5,
        trust: ClientTrust::Insecure,
        mode,
        writers: 4,
    })
    .unwrap()
}

async fn transfer(fixture: &Fixture, client: &Client, filename: &str) -> Result<PathBuf, TransferError> {
    tokio::time::timeout(
        TEST_DEADLINE,
        client.transfer(fixture.src_dir.path(), filename, fixture.dst_dir.path()),
    )
    .await
    .expect("transfer must not hang")
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_file_over_a_single_stream() {
    let fixture = Fixture::new();
    fixture.write_source("empty", 0);
    let port = start_daemon();

    let client = client(port, 1, false, WriteMode::Direct);
    let dst = transfer(&fixture, &client, "empty").await.unwrap();

    assert_eq!(std::fs::metadata(&dst).unwrap().len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn round_trip_with_verification_over_four_streams() {
    let fixture = Fixture::new();
    let contents = fixture.write_source("payload", 1 << 20);
    fixture.write_sidecar("payload");
    let port = start_daemon();

    let client = client(port, 4, true, WriteMode::Direct);
    let dst = transfer(&fixture, &client, "payload").await.unwrap();

    assert_eq!(std::fs::read(&dst).unwrap(), contents);

    let sidecar = std::fs::read_to_string(fixture.dst_path("payload.md5")).unwrap();
    assert_eq!(sidecar.len(), 32);
    assert!(sidecar.bytes().all(|b| b.is_ascii_hexdigit()));
}

#[tokio::test(flavor = "multi_thread")]
async fn uneven_partition_over_five_streams() {
    let fixture = Fixture::new();
    let contents = fixture.write_source("odd", 1_000_003);
    let port = start_daemon();

    let client = client(port, 5, false, WriteMode::Direct);
    let dst = transfer(&fixture, &client, "odd").await.unwrap();

    let received = std::fs::read(&dst).unwrap();
    assert_eq!(received.len(), 1_000_003);
    assert_eq!(received, contents);
}

#[tokio::test(flavor = "multi_thread")]
async fn mapped_write_path_round_trips() {
    let fixture = Fixture::new();
    let contents = fixture.write_source("mapped", (1 << 20) + 17);
    fixture.write_sidecar("mapped");
    let port = start_daemon();

    let client = client(port, 4, true, WriteMode::Mapped);
    let dst = transfer(&fixture, &client, "mapped").await.unwrap();

    assert_eq!(std::fs::read(&dst).unwrap(), contents);
}

#[tokio::test(flavor = "multi_thread")]
async fn mapped_write_path_handles_an_empty_file() {
    let fixture = Fixture::new();
    fixture.write_source("empty", 0);
    let port = start_daemon();

    let client = client(port, 2, false, WriteMode::Mapped);
    let dst = transfer(&fixture, &client, "empty").await.unwrap();
    assert_eq!(std::fs::metadata(&dst).unwrap().len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_range_stream_counts_never_touch_the_network() {
    for streams in [0u8, 101] {
        // The port is a black hole; construction must fail before any dial.
        let result = Client::new(ClientOptions {
            host: "192.0.2.1".to_owned(),
            port: 9,
            local_port: 0,
            streams,
            check_md5: false,
            trust: ClientTrust::Insecure,
            mode: WriteMode::Direct,
            writers: 4,
        });
        assert!(matches!(result, Err(TransferError::Config(_))));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_source_fails_the_transfer() {
    let fixture = Fixture::new();
    let port = start_daemon();

    let client = client(port, 2, false, WriteMode::Direct);
    let result = transfer(&fixture, &client, "no-such-file").await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn requesting_verification_without_a_sidecar_fails() {
    let fixture = Fixture::new();
    fixture.write_source("payload", 4096);
    let port = start_daemon();

    let client = client(port, 2, true, WriteMode::Direct);
    assert!(transfer(&fixture, &client, "payload").await.is_err());
}

/// How the in-test fake server misbehaves.
#[derive(Clone, Copy)]
enum Fault {
    /// Flip one body byte on the second data stream.
    CorruptByte,
    /// Finish the second data stream after 1 KiB instead of its chunk.
    PrematureFinish,
}

fn digest_of(contents: &[u8]) -> [u8; 16] {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scratch");
    std::fs::write(&path, contents).unwrap();
    qft_checksums::file_digest(&path).unwrap()
}

/// Serves exactly one connection with the real wire protocol, injecting
/// `fault` into stream 1. Returns the bound port.
fn start_faulty_server(contents: Vec<u8>, md5: [u8; 16], fault: Fault) -> u16 {
    let material = tls::self_signed("qft test", &["localhost".to_owned()]).unwrap();
    let endpoint =
        qft_transport::server_endpoint("127.0.0.1:0".parse().unwrap(), material).unwrap();
    let port = endpoint.local_addr().unwrap().port();

    tokio::spawn(async move {
        let incoming = endpoint.accept().await.expect("one connection");
        let connection = incoming.accept().unwrap().await.unwrap();
        let (mut send, mut recv) = connection.accept_bi().await.unwrap();

        let mut buf = vec![0u8; qft_protocol::TRANSFER_REQUEST_MAX_LENGTH];
        let n = recv.read(&mut buf).await.unwrap().unwrap();
        let request = TransferRequest::decode(&buf[..n]).unwrap();

        let file_size = contents.len() as u64;
        let md5 = if request.check_md5 {
            md5
        } else {
            qft_protocol::ZERO_DIGEST
        };
        send.write_all(&FileMeta { file_size, md5 }.encode())
            .await
            .unwrap();

        let streams = NonZeroU8::new(request.streams).unwrap();
        for (index, span) in chunk_spans(file_size, streams).into_iter().enumerate() {
            let mut stream = connection.open_uni().await.unwrap();
            stream.write_all(&span.encode()).await.unwrap();

            let start = usize::try_from(span.start_offset).unwrap();
            let mut body =
                contents[start..start + usize::try_from(span.chunk_size).unwrap()].to_vec();

            match fault {
                Fault::CorruptByte if index == 1 && !body.is_empty() => {
                    let mid = body.len() / 2;
                    body[mid] ^= 0xff;
                }
                Fault::PrematureFinish if index == 1 => {
                    body.truncate(1024);
                }
                _ => {}
            }

            stream.write_all(&body).await.unwrap();
            stream.finish().unwrap();
        }

        send.finish().unwrap();
        // Hold the connection open; the client closes it.
        connection.closed().await;
    });

    port
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupted_stream_fails_integrity_and_deletes_the_destination() {
    let fixture = Fixture::new();
    let mut contents = vec![0u8; 10 << 20];
    rand::rng().fill_bytes(&mut contents);
    let md5 = digest_of(&contents);
    let port = start_faulty_server(contents, md5, Fault::CorruptByte);

    let client = client(port, 8, true, WriteMode::Direct);
    let result = transfer(&fixture, &client, "payload").await;

    assert!(matches!(
        result,
        Err(TransferError::IntegrityMismatch { .. })
    ));
    assert!(!fixture.dst_path("payload").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn premature_stream_close_is_a_transport_error() {
    let fixture = Fixture::new();
    let mut contents = vec![0u8; 10 << 20];
    rand::rng().fill_bytes(&mut contents);
    let port = start_faulty_server(contents, qft_protocol::ZERO_DIGEST, Fault::PrematureFinish);

    let client = client(port, 2, false, WriteMode::Direct);
    let result = transfer(&fixture, &client, "payload").await;

    assert!(matches!(result, Err(TransferError::Transport(_))));
}

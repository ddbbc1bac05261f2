//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use gateway_server::config::ServerConfig;
use gateway_server::{Application, HttpServer, Listener, ServerError, Shutdown};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A server running on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to return.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        tokio::time::timeout(IO_TIMEOUT, self.task)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

pub async fn start_server<A: Application + 'static>(app: A) -> TestServer {
    start_server_with(app, |_| {}).await
}

pub async fn start_server_with<A, F>(app: A, tweak: F) -> TestServer
where
    A: Application + 'static,
    F: FnOnce(&mut ServerConfig),
{
    let mut config = ServerConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.timeouts.poll_interval_ms = 20;
    config.timeouts.shutdown_secs = 2;
    tweak(&mut config);

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(Arc::new(app), config);
    let task = tokio::spawn(server.run(listener, shutdown.clone()));

    TestServer {
        addr,
        shutdown,
        task,
    }
}

/// Send raw bytes and read until the server closes the connection.
pub async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

/// One parsed response from a persistent connection.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Read exactly one response framed by Content-Length or chunked encoding.
pub async fn read_response(reader: &mut BufReader<TcpStream>) -> RawResponse {
    tokio::time::timeout(IO_TIMEOUT, read_response_inner(reader))
        .await
        .expect("timed out reading response")
}

async fn read_response_inner(reader: &mut BufReader<TcpStream>) -> RawResponse {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "connection closed mid-head: {head:?}");
        if line == "\r\n" {
            break;
        }
        head.push_str(&line);
    }
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");

    let mut response = RawResponse {
        status,
        head,
        body: Vec::new(),
    };

    if response
        .header("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line).await.unwrap();
            let size = usize::from_str_radix(size_line.trim(), 16).unwrap();
            let mut chunk = vec![0u8; size + 2];
            reader.read_exact(&mut chunk).await.unwrap();
            if size == 0 {
                break;
            }
            response.body.extend_from_slice(&chunk[..size]);
        }
    } else if let Some(len) = response.header("content-length") {
        let mut body = vec![0u8; len.parse().unwrap()];
        reader.read_exact(&mut body).await.unwrap();
        response.body = body;
    }
    response
}

pub async fn connect(addr: SocketAddr) -> BufReader<TcpStream> {
    BufReader::new(TcpStream::connect(addr).await.unwrap())
}

pub async fn send(reader: &mut BufReader<TcpStream>, raw: &[u8]) {
    reader.get_mut().write_all(raw).await.unwrap();
}

/// Whether the peer has closed: a read returns EOF within the timeout.
pub async fn is_closed(reader: &mut BufReader<TcpStream>) -> bool {
    let mut buf = [0u8; 1];
    matches!(
        tokio::time::timeout(IO_TIMEOUT, reader.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

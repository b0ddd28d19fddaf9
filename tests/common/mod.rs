//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cache_proxy::net::Listener;
use cache_proxy::{ProxyConfig, ProxyServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// An origin server that answers each connection with a canned response.
pub struct MockOrigin {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    task: JoinHandle<()>,
}

#[allow(dead_code)]
impl MockOrigin {
    /// Number of connections accepted so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Header blocks received, in arrival order.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }

    /// Value a client puts in its Host header to reach this origin.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Stop accepting; later connections are refused.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Builds the raw response for a received header block.
pub type Responder = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Start a mock origin on an ephemeral loopback port.
pub async fn start_mock_origin(response: &'static [u8]) -> MockOrigin {
    start_mock_origin_with(Arc::new(move |_: &[u8]| response.to_vec())).await
}

/// Start a mock origin that answers `200 OK` with the body routed by the
/// request path, or `404 Not Found` for unknown paths.
#[allow(dead_code)]
pub async fn start_routed_origin(routes: &'static [(&'static str, &'static str)]) -> MockOrigin {
    start_mock_origin_with(Arc::new(move |head: &[u8]| {
        let head = String::from_utf8_lossy(head);
        let path = head.split_whitespace().nth(1).unwrap_or("");
        match routes.iter().find(|(route, _)| *route == path) {
            Some((_, body)) => {
                format!("HTTP/1.1 200 OK\r\nServer: mock\r\n\r\n{body}").into_bytes()
            }
            None => b"HTTP/1.1 404 Not Found\r\n\r\n".to_vec(),
        }
    }))
    .await
}

/// Start a mock origin whose response is computed per request.
pub async fn start_mock_origin_with(respond: Responder) -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let task = {
        let hits = hits.clone();
        let requests = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                hits.fetch_add(1, Ordering::SeqCst);
                let requests = requests.clone();
                let respond = respond.clone();
                tokio::spawn(async move {
                    let head = read_header_block(&mut socket).await;
                    let response = respond(&head);
                    requests.lock().unwrap().push(head);
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        })
    };

    MockOrigin {
        addr,
        hits,
        requests,
        task,
    }
}

async fn read_header_block(socket: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    head
}

/// A fresh cache directory under the system temp dir.
pub fn temp_cache_root() -> PathBuf {
    std::env::temp_dir().join(format!("cache-proxy-it-{}", uuid::Uuid::new_v4()))
}

/// A running proxy bound to an ephemeral loopback port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<()>,
}

/// Bind and start a proxy with `config` (the bind address is overridden).
pub async fn start_proxy(mut config: ProxyConfig) -> RunningProxy {
    config.listener.bind_address = "127.0.0.1:0".to_string();
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = ProxyServer::new(config);
    let server_shutdown = shutdown.subscribe();
    let task = tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    RunningProxy {
        addr,
        shutdown,
        task,
    }
}

/// Config with a temp cache root; returns the root for inspection.
pub fn test_config() -> (ProxyConfig, PathBuf) {
    let root = temp_cache_root();
    let mut config = ProxyConfig::default();
    config.cache.root = root.display().to_string();
    (config, root)
}

/// Send a raw request through the proxy and read until it closes.
pub async fn fetch(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

/// `GET <path>` for `host` in origin form.
pub fn get_request(host: &str, path: &str) -> Vec<u8> {
    format!("GET {path} HTTP/1.1\r\nHost: {host}\r\n\r\n").into_bytes()
}

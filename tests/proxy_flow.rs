//! End-to-end tests for the request pipeline.

use std::time::Duration;

use cache_proxy::CacheKey;
use cache_proxy::CacheStore;
use tokio::net::TcpStream;

mod common;

use common::{
    fetch, get_request, start_mock_origin, start_proxy, start_routed_origin, temp_cache_root,
    test_config,
};

const PAGE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Length: 21\r\n\
Content-Type: text/html\r\n\
\r\n\
<html>cached!</html>\n";
const PAGE_BODY: &[u8] = b"<html>cached!</html>\n";

#[tokio::test]
async fn miss_then_hit_with_origin_gone() {
    let origin = start_mock_origin(PAGE).await;
    let host = origin.host();
    let (config, root) = test_config();
    let proxy = start_proxy(config).await;

    let first = fetch(proxy.addr, &get_request(&host, "/index.html")).await;
    assert_eq!(first, PAGE_BODY);
    assert_eq!(origin.hits(), 1);
    assert_eq!(
        origin.requests(),
        vec![format!("GET /index.html HTTP/1.1\r\nHost: {host}\r\n\r\n").into_bytes()]
    );

    let on_disk = std::fs::read(root.join(&host).join("index.html")).unwrap();
    let mut expected = b"Content-Type: text/html".to_vec();
    expected.extend_from_slice(PAGE_BODY);
    assert_eq!(on_disk, expected);

    origin.stop().await;

    let second = fetch(proxy.addr, &get_request(&host, "/index.html")).await;
    assert_eq!(second, expected);

    proxy.shutdown.trigger();
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn repeated_hits_do_not_touch_origin() {
    let origin = start_mock_origin(PAGE).await;
    let host = origin.host();
    let (config, root) = test_config();
    let proxy = start_proxy(config).await;

    fetch(proxy.addr, &get_request(&host, "/a/b/c.html")).await;
    let second = fetch(proxy.addr, &get_request(&host, "/a/b/c.html")).await;
    let third = fetch(proxy.addr, &get_request(&host, "/a/b/c.html")).await;

    assert_eq!(origin.hits(), 1);
    assert_eq!(second, third);
    let store = CacheStore::new(&root);
    assert_eq!(
        store.lookup(&CacheKey::new(&host, "/a/b/c.html")).await.unwrap(),
        Some(second)
    );

    proxy.shutdown.trigger();
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn non_get_never_reaches_origin_or_cache() {
    let origin = start_mock_origin(PAGE).await;
    let host = origin.host();
    let (config, root) = test_config();
    let proxy = start_proxy(config).await;

    for method in ["POST", "PUT", "HEAD", "DELETE"] {
        let request = format!("{method} /index.html HTTP/1.1\r\nHost: {host}\r\n\r\n");
        let response = fetch(proxy.addr, request.as_bytes()).await;
        assert!(response.is_empty(), "{method} got a reply");
    }

    assert_eq!(origin.hits(), 0);
    assert!(!root.exists());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn non_200_is_neither_relayed_nor_cached() {
    let origin =
        start_mock_origin(b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found").await;
    let host = origin.host();
    let (config, root) = test_config();
    let proxy = start_proxy(config).await;

    let first = fetch(proxy.addr, &get_request(&host, "/missing")).await;
    assert!(first.is_empty());
    let second = fetch(proxy.addr, &get_request(&host, "/missing")).await;
    assert!(second.is_empty());

    // No entry was created, so both requests went upstream.
    assert_eq!(origin.hits(), 2);
    assert!(!root.join(&host).join("missing").exists());

    proxy.shutdown.trigger();
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn absolute_form_shares_cache_with_origin_form() {
    let origin = start_mock_origin(PAGE).await;
    let host = origin.host();
    let (config, root) = test_config();
    let proxy = start_proxy(config).await;

    let request =
        format!("GET http://{host}/page.html HTTP/1.1\r\nHost: {host}\r\nAccept: */*\r\n\r\n");
    let body = fetch(proxy.addr, request.as_bytes()).await;
    assert_eq!(body, PAGE_BODY);
    assert_eq!(
        origin.requests(),
        vec![format!("GET /page.html HTTP/1.1\r\nHost: {host}\r\n\r\n").into_bytes()]
    );

    fetch(proxy.addr, &get_request(&host, "/page.html")).await;
    assert_eq!(origin.hits(), 1);

    proxy.shutdown.trigger();
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn extra_headers_forwarded_when_enabled() {
    let origin = start_mock_origin(PAGE).await;
    let host = origin.host();
    let (mut config, root) = test_config();
    config.origin.forward_extra_headers = true;
    let proxy = start_proxy(config).await;

    let request =
        format!("GET /x HTTP/1.1\r\nHost: {host}\r\nUser-Agent: it\r\nAccept: */*\r\n\r\n");
    fetch(proxy.addr, request.as_bytes()).await;
    assert_eq!(origin.requests(), vec![request.into_bytes()]);

    proxy.shutdown.trigger();
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn large_body_relayed_in_small_chunks() {
    let mut response = b"HTTP/1.1 200 OK\r\nServer: mock\r\n\r\n".to_vec();
    let body: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    response.extend_from_slice(&body);
    let origin = start_mock_origin(Box::leak(response.into_boxed_slice())).await;
    let host = origin.host();

    let (mut config, root) = test_config();
    config.cache.chunk_size = 7;
    let proxy = start_proxy(config).await;

    let received = fetch(proxy.addr, &get_request(&host, "/blob.bin")).await;
    assert_eq!(received, body);

    let cached = fetch(proxy.addr, &get_request(&host, "/blob.bin")).await;
    assert_eq!(&cached[..12], b"Server: mock");
    assert_eq!(&cached[12..], &body[..]);
    assert_eq!(origin.hits(), 1);

    proxy.shutdown.trigger();
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn directory_entry_and_literal_index_are_separate() {
    static ROUTES: &[(&str, &str)] = &[
        ("/docs/", "DIRECTORY-LISTING"),
        ("/docs/_index", "INDEX-FILE"),
    ];
    let origin = start_routed_origin(ROUTES).await;
    let host = origin.host();
    let (config, root) = test_config();
    let proxy = start_proxy(config).await;

    let listing = fetch(proxy.addr, &get_request(&host, "/docs/")).await;
    assert_eq!(listing, b"DIRECTORY-LISTING");
    let index = fetch(proxy.addr, &get_request(&host, "/docs/_index")).await;
    assert_eq!(index, b"INDEX-FILE");
    assert_eq!(origin.hits(), 2);

    // Both are now served from their own entries.
    origin.stop().await;
    let listing = fetch(proxy.addr, &get_request(&host, "/docs/")).await;
    let index = fetch(proxy.addr, &get_request(&host, "/docs/_index")).await;
    assert_eq!(listing, b"Server: mockDIRECTORY-LISTING");
    assert_eq!(index, b"Server: mockINDEX-FILE");

    proxy.shutdown.trigger();
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn unwritable_cache_root_still_relays() {
    let origin = start_mock_origin(PAGE).await;
    let host = origin.host();
    let root = temp_cache_root();
    std::fs::write(&root, b"a file where the cache directory should be").unwrap();

    let mut config = cache_proxy::ProxyConfig::default();
    config.cache.root = root.display().to_string();
    let proxy = start_proxy(config).await;

    let first = fetch(proxy.addr, &get_request(&host, "/index.html")).await;
    assert_eq!(first, PAGE_BODY);
    let second = fetch(proxy.addr, &get_request(&host, "/index.html")).await;
    assert_eq!(second, PAGE_BODY);

    // Nothing could be stored, so every request went upstream.
    assert_eq!(origin.hits(), 2);
    assert!(root.is_file());

    proxy.shutdown.trigger();
    let _ = std::fs::remove_file(root);
}

#[tokio::test]
async fn oversized_response_is_relayed_but_not_cached() {
    let origin = start_mock_origin(PAGE).await;
    let host = origin.host();
    let (mut config, root) = test_config();
    config.cache.max_entry_bytes = Some(16);
    config.cache.chunk_size = 4;
    let proxy = start_proxy(config).await;

    let first = fetch(proxy.addr, &get_request(&host, "/index.html")).await;
    assert_eq!(first, PAGE_BODY);
    let second = fetch(proxy.addr, &get_request(&host, "/index.html")).await;
    assert_eq!(second, PAGE_BODY);

    assert_eq!(origin.hits(), 2);
    assert!(!root.join(&host).join("index.html").exists());

    proxy.shutdown.trigger();
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn concurrent_sessions_are_served() {
    let origin = start_mock_origin(PAGE).await;
    let host = origin.host();
    let (config, root) = test_config();
    let proxy = start_proxy(config).await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let request = get_request(&host, &format!("/item/{i}"));
            let addr = proxy.addr;
            tokio::spawn(async move { fetch(addr, &request).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), PAGE_BODY);
    }
    assert_eq!(origin.hits(), 8);

    proxy.shutdown.trigger();
    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn single_session_mode_closes_listener() {
    let origin = start_mock_origin(PAGE).await;
    let host = origin.host();
    let (mut config, root) = test_config();
    config.listener.single_session = true;
    let proxy = start_proxy(config).await;

    let body = fetch(proxy.addr, &get_request(&host, "/once")).await;
    assert_eq!(body, PAGE_BODY);

    tokio::time::timeout(Duration::from_secs(5), proxy.task)
        .await
        .expect("server should stop after one session")
        .unwrap();
    assert!(TcpStream::connect(proxy.addr).await.is_err());

    let _ = std::fs::remove_dir_all(root);
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let (config, root) = test_config();
    let proxy = start_proxy(config).await;

    proxy.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), proxy.task)
        .await
        .expect("server should stop on shutdown")
        .unwrap();
    assert!(TcpStream::connect(proxy.addr).await.is_err());

    let _ = std::fs::remove_dir_all(root);
}

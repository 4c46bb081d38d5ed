//! End-to-end exercise of `StreamBridge` over a real `h2` session: one
//! loopback TCP pair stands in for the browser side, another for the
//! origin side, connected by an in-memory duplex carrying HTTP/2 frames.
//! Covers the happy-path-echo and half-close-preserved scenarios.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tunnel_core::{bridge, Role, Supervisor};

async fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (server_side, (client_side, _)) =
        tokio::try_join!(TcpStream::connect(addr), async { listener.accept().await })
            .unwrap();
    (server_side, client_side)
}

#[tokio::test]
async fn happy_path_echo() {
    let (h2_client_io, h2_server_io) = tokio::io::duplex(64 * 1024);

    let (mut send_request, h2_client_conn) = h2::client::handshake(h2_client_io).await.unwrap();
    tokio::spawn(async move {
        let _ = h2_client_conn.await;
    });

    let mut h2_server_conn = h2::server::handshake(h2_server_io).await.unwrap();

    send_request.ready().await.unwrap();
    let request = http::Request::builder()
        .method(http::Method::POST)
        .body(())
        .unwrap();
    let (response_fut, client_send_stream) = send_request.send_request(request, false).unwrap();

    let (request, mut send_response) = h2_server_conn.accept().await.unwrap().unwrap();
    let (_, server_recv_stream) = request.into_parts();
    let response = http::Response::builder().status(200).body(()).unwrap();
    let server_send_stream = send_response.send_response(response, false).unwrap();

    tokio::spawn(async move { while h2_server_conn.accept().await.is_some() {} });

    let client_response = response_fut.await.unwrap();
    let client_recv_stream = client_response.into_body();

    let (browser_tcp, mut browser) = loopback_pair().await;
    let (origin_tcp, mut origin) = loopback_pair().await;

    let (supervisor, _state_rx) = Supervisor::new();

    let server_bridge = tokio::spawn(bridge::run(
        std::sync::Arc::clone(&supervisor),
        browser_tcp,
        client_send_stream,
        client_recv_stream,
        1,
        Role::Server,
    ));
    let client_bridge = tokio::spawn(bridge::run(
        std::sync::Arc::clone(&supervisor),
        origin_tcp,
        server_send_stream,
        server_recv_stream,
        1,
        Role::Client,
    ));

    // browser writes 'a' then FINs; origin must see exactly that, then EOF.
    browser.write_all(b"a").await.unwrap();
    browser.shutdown().await.unwrap();

    let mut from_browser = Vec::new();
    origin.read_to_end(&mut from_browser).await.unwrap();
    assert_eq!(from_browser, b"a");

    // origin replies 'z' then FINs; browser must see exactly that, then EOF.
    origin.write_all(b"z").await.unwrap();
    origin.shutdown().await.unwrap();

    let mut from_origin = Vec::new();
    browser.read_to_end(&mut from_origin).await.unwrap();
    assert_eq!(from_origin, b"z");

    server_bridge.await.unwrap();
    client_bridge.await.unwrap();
    assert_eq!(supervisor.active_stream_count(), 0);
}

//! §8 scenario 1 ("happy-path-echo"): start server, then client, await
//! `connected` on both, open a TCP connection to the public proxy port,
//! write a byte, read it back through the full server-proxy -> H2 ->
//! client-origin round trip, then observe a clean close on both ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use e2e_tests::{identity_pair, spawn_echo_origin, WAIT};
use tunnel_client::tunnel as client_tunnel;
use tunnel_core::{EndpointState, Supervisor};
use tunnel_server::{proxy, tunnel as server_tunnel};

#[tokio::test]
async fn happy_path_echo_end_to_end() {
    let (server_identity, client_identity) = identity_pair();
    let acceptor = server_identity.acceptor().expect("server acceptor");
    let connector = client_identity.connector().expect("client connector");

    let tunnel_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tunnel_port = tunnel_listener.local_addr().unwrap().port();
    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy_listener.local_addr().unwrap();
    let origin_addr = spawn_echo_origin().await;

    let (server_supervisor, _server_state) = Supervisor::new();
    let session: server_tunnel::SharedSession = Arc::new(Mutex::new(None));
    {
        let supervisor = Arc::clone(&server_supervisor);
        let session = Arc::clone(&session);
        server_supervisor.spawn_closeable(move |stop| {
            server_tunnel::run(
                supervisor,
                tunnel_listener,
                acceptor,
                session,
                Duration::from_secs(30),
                stop,
            )
        });
    }
    {
        let supervisor = Arc::clone(&server_supervisor);
        let session = Arc::clone(&session);
        server_supervisor
            .spawn_closeable(move |stop| proxy::run(supervisor, proxy_listener, session, stop));
    }

    let (client_supervisor, _client_state) = Supervisor::new();
    {
        let supervisor = Arc::clone(&client_supervisor);
        let params = client_tunnel::Params {
            tunnel_host: "127.0.0.1".to_string(),
            tunnel_port,
            origin_host: origin_addr.ip().to_string(),
            origin_port: origin_addr.port(),
            idle_timeout: Duration::from_secs(30),
            restart_timeout: Duration::from_millis(200),
        };
        client_supervisor
            .spawn_closeable(move |stop| client_tunnel::run(supervisor, connector, params, stop));
    }

    tokio::time::timeout(
        WAIT,
        server_supervisor.wait_until(EndpointState::Connected),
    )
    .await
    .expect("server should observe its tunnel connect");
    tokio::time::timeout(
        WAIT,
        client_supervisor.wait_until(EndpointState::Connected),
    )
    .await
    .expect("client should observe its tunnel connect");

    let mut browser = TcpStream::connect(proxy_addr).await.unwrap();
    browser.write_all(b"a").await.unwrap();
    browser.shutdown().await.unwrap();

    let mut echoed = Vec::new();
    tokio::time::timeout(WAIT, browser.read_to_end(&mut echoed))
        .await
        .expect("echo should not hang")
        .unwrap();
    assert_eq!(echoed, b"a");

    client_supervisor.stop().await;
    server_supervisor.stop().await;
    assert_eq!(server_supervisor.active_stream_count(), 0);
}

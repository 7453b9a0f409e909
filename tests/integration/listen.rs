use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use ccshim::transport::SessionTable;
use ccshim::ChaincodeServer;

use crate::*;

struct Running {
    addr: std::net::SocketAddr,
    sessions: SessionTable,
    shutdown: broadcast::Sender<()>,
    server: tokio::task::JoinHandle<Result<(), ccshim::SessionError>>,
}

async fn serve(name: &str) -> Running {
    let mut config = config(name);
    config.server.listen_address = "127.0.0.1:0".into();
    let server = ChaincodeServer::bind(&config, name, Arc::new(Echo::new))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let sessions = server.sessions();
    let (shutdown, rx) = broadcast::channel(1);
    let server = tokio::spawn(server.run(rx));
    Running {
        addr,
        sessions,
        shutdown,
        server,
    }
}

async fn wait_for_sessions(sessions: &SessionTable, n: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while sessions.len() != n {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {n} sessions, have {}",
            sessions.len()
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_listen_registers_each_connection() {
    let running = serve("mycc").await;

    let mut a = FakePeer::connect(running.addr).await.unwrap();
    let mut b = FakePeer::connect(running.addr).await.unwrap();
    assert_eq!(a.expect_register().await.unwrap(), "mycc");
    assert_eq!(b.expect_register().await.unwrap(), "mycc");
    wait_for_sessions(&running.sessions, 2).await;

    // interleave invocations across the two sessions
    a.send(ChaincodeMessage::new(MessageType::Transaction, b"from-a".to_vec()).with_correlation("a1", "ch"))
        .await
        .unwrap();
    let reply_b = b.invoke("b1", b"from-b").await.unwrap();
    let reply_a = a.recv().await.unwrap();
    assert_eq!((reply_a.txid.as_str(), reply_a.payload.as_slice()), ("a1", &b"from-a"[..]));
    assert_eq!((reply_b.txid.as_str(), reply_b.payload.as_slice()), ("b1", &b"from-b"[..]));

    // ending one session leaves the other alone
    a.hang_up();
    a.expect_closed().await.unwrap();
    wait_for_sessions(&running.sessions, 1).await;
    assert_eq!(b.invoke("b2", b"still here").await.unwrap().payload, b"still here");

    b.hang_up();
    b.expect_closed().await.unwrap();
    wait_for_sessions(&running.sessions, 0).await;
    running.shutdown.send(()).unwrap();
    tokio::time::timeout(WAIT, running.server).await.unwrap().unwrap().unwrap();
}

/// A connection that is not HTTP/2, and a session that breaks the
/// protocol, each end on their own.
#[tokio::test]
async fn test_listen_survives_bad_connection() {
    let running = serve("mycc").await;

    let mut garbage = TcpStream::connect(running.addr).await.unwrap();
    garbage.write_all(&[0xff; 64]).await.unwrap();

    let mut bad = FakePeer::connect(running.addr).await.unwrap();
    bad.expect_register().await.unwrap();
    bad.send(ChaincodeMessage::default()).await.unwrap();
    bad.expect_closed().await.unwrap();
    wait_for_sessions(&running.sessions, 0).await;

    let mut good = FakePeer::connect(running.addr).await.unwrap();
    good.expect_register().await.unwrap();
    assert_eq!(good.invoke("tx1", b"ok").await.unwrap().payload, b"ok");
    assert!(!running.server.is_finished());

    good.hang_up();
    good.expect_closed().await.unwrap();
    wait_for_sessions(&running.sessions, 0).await;
    drop((garbage, bad, good));
    running.shutdown.send(()).unwrap();
    tokio::time::timeout(WAIT, running.server).await.unwrap().unwrap().unwrap();
}

/// Shutdown lets a running session finish before `run` returns.
#[tokio::test]
async fn test_listen_shutdown_waits_for_sessions() {
    let running = serve("mycc").await;
    let mut peer = FakePeer::connect(running.addr).await.unwrap();
    peer.expect_register().await.unwrap();
    wait_for_sessions(&running.sessions, 1).await;

    running.shutdown.send(()).unwrap();
    // no new calls once shutdown has begun, the open one keeps working
    assert_eq!(peer.invoke("tx1", b"late").await.unwrap().payload, b"late");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!running.server.is_finished());

    peer.hang_up();
    peer.expect_closed().await.unwrap();
    drop(peer);
    tokio::time::timeout(WAIT, running.server).await.unwrap().unwrap().unwrap();
    wait_for_sessions(&running.sessions, 0).await;
}

/// Many pipelined invocations on one connection all come back.
#[tokio::test]
async fn test_listen_pipelined_invocations() {
    let running = serve("pipeline").await;
    let mut peer = FakePeer::connect(running.addr).await.unwrap();
    assert_eq!(peer.expect_register().await.unwrap(), "pipeline");

    const N: usize = 50;
    for i in 0..N {
        peer.send(
            ChaincodeMessage::new(MessageType::Transaction, i.to_string().into_bytes())
                .with_correlation(format!("tx{i}"), "ch"),
        )
        .await
        .unwrap();
    }

    let mut seen = Vec::with_capacity(N);
    for _ in 0..N {
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply.kind(), MessageType::Completed);
        assert_eq!(reply.txid, format!("tx{}", String::from_utf8(reply.payload.clone()).unwrap()));
        seen.push(reply.txid);
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), N);

    peer.hang_up();
    peer.expect_closed().await.unwrap();
    drop(peer);
    wait_for_sessions(&running.sessions, 0).await;
    running.shutdown.send(()).unwrap();
    tokio::time::timeout(WAIT, running.server).await.unwrap().unwrap().unwrap();
}

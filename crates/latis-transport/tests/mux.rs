//! Integration tests for the multiplexed listener and dialer

use anyhow::Result;
use latis_pki::{client_tls_config, node_identity, server_tls_config, CertificateAuthority, NodeCert};
use latis_proto::rpc::StreamAcceptor;
use latis_transport::{MuxDialer, MuxListener, StreamType};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{sleep, timeout};

struct TestPki {
    ca: CertificateAuthority,
    server_tls: rustls::ServerConfig,
    client_tls: rustls::ClientConfig,
}

fn test_pki() -> Result<TestPki> {
    let ca = CertificateAuthority::generate()?;
    let server_cert = NodeCert::generate(&ca, &node_identity("server"), true, true)?;
    let client_cert = NodeCert::generate(&ca, &node_identity("client"), false, true)?;

    let server_tls = server_tls_config(&server_cert, &ca)?;
    let client_tls = client_tls_config(&client_cert, &ca)?;

    Ok(TestPki {
        ca,
        server_tls,
        client_tls,
    })
}

fn loopback() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
}

#[tokio::test]
async fn test_stream_routing() -> Result<()> {
    let pki = test_pki()?;
    let listener = MuxListener::listen(loopback(), pki.server_tls)?;
    let addr = listener.local_addr();

    let control_acceptor = listener.control_listener();
    let agent_acceptor = listener.agent_listener();

    // Control echo: read "ping", reply "control-ack".
    let control_task = tokio::spawn(async move {
        let mut stream = control_acceptor.accept().await.expect("control stream");
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        stream.write_all(b"control-ack").await.unwrap();
        stream.flush().await.unwrap();
    });

    // Agent echo: read "hello-agent", reply "agent-ack".
    let agent_task = tokio::spawn(async move {
        let mut stream = agent_acceptor.accept().await.expect("agent stream");
        let mut buf = [0u8; 11];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello-agent");
        stream.write_all(b"agent-ack").await.unwrap();
        stream.flush().await.unwrap();
    });

    let dialer = MuxDialer::new(pki.client_tls, "localhost")?;

    let mut control = dialer.dial_control(addr).await?;
    control.write_all(b"ping").await?;
    control.flush().await?;
    let mut reply = [0u8; 11];
    timeout(Duration::from_secs(2), control.read_exact(&mut reply)).await??;
    assert_eq!(&reply, b"control-ack");

    let mut agent = dialer.dial_agent(addr).await?;
    agent.write_all(b"hello-agent").await?;
    agent.flush().await?;
    let mut reply = [0u8; 9];
    timeout(Duration::from_secs(2), agent.read_exact(&mut reply)).await??;
    assert_eq!(&reply, b"agent-ack");

    control_task.await?;
    agent_task.await?;

    dialer.close();
    listener.close();
    Ok(())
}

#[tokio::test]
async fn test_connection_reuse() -> Result<()> {
    let pki = test_pki()?;
    let listener = MuxListener::listen(loopback(), pki.server_tls)?;
    let addr = listener.local_addr();

    // Sink everything the server accepts.
    let control_acceptor = listener.control_listener();
    let agent_acceptor = listener.agent_listener();
    tokio::spawn(async move { while control_acceptor.accept().await.is_some() {} });
    tokio::spawn(async move { while agent_acceptor.accept().await.is_some() {} });

    let dialer = MuxDialer::new(pki.client_tls, "localhost")?;

    let _s1 = dialer.dial(addr, StreamType::Control).await?;
    let _s2 = dialer.dial(addr, StreamType::Control).await?;
    let _s3 = dialer.dial(addr, StreamType::Agent).await?;

    assert_eq!(dialer.pooled_connections(), 1);

    dialer.close();
    listener.close();
    Ok(())
}

#[tokio::test]
async fn test_concurrent_dials_share_one_connection() -> Result<()> {
    let pki = test_pki()?;
    let listener = MuxListener::listen(loopback(), pki.server_tls)?;
    let addr = listener.local_addr();

    let control_acceptor = listener.control_listener();
    tokio::spawn(async move { while control_acceptor.accept().await.is_some() {} });

    let dialer = Arc::new(MuxDialer::new(pki.client_tls, "localhost")?);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let dialer = Arc::clone(&dialer);
        tasks.push(tokio::spawn(async move {
            dialer.dial(addr, StreamType::Control).await
        }));
    }
    for task in tasks {
        task.await??;
    }

    assert_eq!(dialer.pooled_connections(), 1);

    dialer.close();
    listener.close();
    Ok(())
}

#[tokio::test]
async fn test_unknown_stream_type_preserves_connection() -> Result<()> {
    let pki = test_pki()?;
    let listener = MuxListener::listen(loopback(), pki.server_tls)?;
    let addr = listener.local_addr();

    let control_acceptor = listener.control_listener();
    let control_task = tokio::spawn(async move {
        let mut stream = control_acceptor.accept().await.expect("control stream");
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        stream.write_all(b"ack").await.unwrap();
        stream.flush().await.unwrap();
    });

    // Raw QUIC client so we can send a bogus type byte.
    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(pki.client_tls)?;
    let mut endpoint = quinn::Endpoint::client(loopback())?;
    endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));
    let conn = endpoint.connect(addr, "localhost")?.await?;

    // Unknown type: the server closes the stream but not the connection.
    let (mut bogus_send, mut bogus_recv) = conn.open_bi().await?;
    bogus_send.write_all(&[0xee]).await?;
    // May race the server's stop of the stream.
    let _ = bogus_send.write_all(b"junk").await;
    let _ = timeout(Duration::from_secs(2), bogus_recv.read_to_end(16)).await;

    // The same connection still serves known stream types.
    let (mut send, mut recv) = conn.open_bi().await?;
    send.write_all(&[StreamType::Control as u8]).await?;
    send.write_all(b"ping").await?;
    let mut reply = [0u8; 3];
    timeout(Duration::from_secs(2), recv.read_exact(&mut reply)).await??;
    assert_eq!(&reply, b"ack");

    control_task.await?;
    listener.close();
    Ok(())
}

#[tokio::test]
async fn test_mtls_rejects_foreign_ca() -> Result<()> {
    let pki = test_pki()?;
    let listener = MuxListener::listen(loopback(), pki.server_tls)?;
    let addr = listener.local_addr();

    // Client credentials minted by an unrelated CA.
    let other_ca = CertificateAuthority::generate()?;
    let other_cert = NodeCert::generate(&other_ca, &node_identity("intruder"), false, true)?;
    // Trust the server's CA so the failure is the server rejecting us.
    let client_tls = client_tls_config(&other_cert, &pki.ca)?;

    // The server rejects the client certificate once it sees it; no
    // round-trip may succeed, and the failure arrives within 2s.
    let dialer = MuxDialer::new(client_tls, "localhost")?;
    let outcome = timeout(Duration::from_secs(2), async {
        let mut stream = dialer.dial_control(addr).await?;
        stream.write_all(b"ping").await?;
        stream.flush().await?;
        let mut buf = [0u8; 1];
        stream.read_exact(&mut buf).await?;
        Ok::<_, anyhow::Error>(())
    })
    .await;
    match outcome {
        Ok(Ok(())) => panic!("round-trip succeeded with a foreign CA"),
        Ok(Err(_)) | Err(_) => {}
    }

    listener.close();
    Ok(())
}

#[tokio::test]
async fn test_pool_evicts_closed_connections() -> Result<()> {
    let pki = test_pki()?;
    let listener = MuxListener::listen(loopback(), pki.server_tls)?;
    let addr = listener.local_addr();

    let control_acceptor = listener.control_listener();
    tokio::spawn(async move { while control_acceptor.accept().await.is_some() {} });

    let dialer = MuxDialer::new(pki.client_tls, "localhost")?;
    let _stream = dialer.dial_control(addr).await?;
    assert_eq!(dialer.pooled_connections(), 1);

    // Closing the listener closes the pooled connection; the monitor
    // task must evict the entry.
    listener.close();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while dialer.pooled_connections() != 0 {
        assert!(tokio::time::Instant::now() < deadline, "pool entry never evicted");
        sleep(Duration::from_millis(50)).await;
    }

    dialer.close();
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent() -> Result<()> {
    let pki = test_pki()?;
    let listener = MuxListener::listen(loopback(), pki.server_tls)?;
    let addr = listener.local_addr();

    let control_acceptor = listener.control_listener();
    tokio::spawn(async move { while control_acceptor.accept().await.is_some() {} });

    let dialer = MuxDialer::new(pki.client_tls, "localhost")?;
    let _stream = dialer.dial_control(addr).await?;

    dialer.close();
    dialer.close();
    listener.close();
    listener.close();
    Ok(())
}

#[tokio::test]
async fn test_acceptors_observe_end_of_input_on_close() -> Result<()> {
    let pki = test_pki()?;
    let listener = MuxListener::listen(loopback(), pki.server_tls)?;

    let control_acceptor = listener.control_listener();
    let agent_acceptor = listener.agent_listener();

    listener.close();

    let control = timeout(Duration::from_secs(1), control_acceptor.accept()).await?;
    assert!(control.is_none());
    let agent = timeout(Duration::from_secs(1), agent_acceptor.accept()).await?;
    assert!(agent.is_none());
    Ok(())
}

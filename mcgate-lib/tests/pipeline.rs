mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::*;
use mcgate_lib::quota::MIB;
use mcgate_lib::sniff::varint::frame;
use mcgate_lib::sniff::{encode_handshake, NextState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn tls_service(upstream: std::net::SocketAddr) -> String {
    format!(
        r#"
        [lists]
        sni = ["allowed.example.com"]

        [[services]]
        name = "tls"
        listen = 0
        listen_host = "127.0.0.1"
        target_address = "127.0.0.1"
        target_port = {port}

        [services.tls_sniffing]
        reject_if_non_match = true
        sni_allow_list_tags = ["sni"]
        "#,
        port = upstream.port()
    )
}

fn game_service(upstream: std::net::SocketAddr, extra: &str) -> String {
    format!(
        r#"
        [[services]]
        name = "lobby"
        listen = 0
        listen_host = "127.0.0.1"
        target_address = "127.0.0.1"
        target_port = {port}

        [services.minecraft]
        {extra}
        "#,
        port = upstream.port()
    )
}

#[tokio::test]
async fn test_sni_reject_happens_before_dial() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let manager = start(parse(&tls_service(upstream.addr))?, memory_ledger(), dialer.clone()).await?;
    let addr = manager.local_addr("tls").ok_or("tls not bound")?;

    let mut client = TcpStream::connect(addr).await?;
    client.write_all(&client_hello(Some("evil.example.com"))).await?;
    assert!(closed_silently(&mut client).await);
    assert_eq!(dialer.count(), 0);
    assert_eq!(upstream.accepted.load(std::sync::atomic::Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_matching_sni_is_relayed_verbatim() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let manager = start(parse(&tls_service(upstream.addr))?, memory_ledger(), dialer.clone()).await?;
    let addr = manager.local_addr("tls").ok_or("tls not bound")?;

    let hello = client_hello(Some("Allowed.Example.com"));
    let mut client = TcpStream::connect(addr).await?;
    client.write_all(&hello).await?;
    let mut echoed = vec![0u8; hello.len()];
    tokio::time::timeout(Duration::from_secs(3), client.read_exact(&mut echoed)).await??;
    assert_eq!(echoed, hello);
    assert_eq!(dialer.count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_sni_is_rejected() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let manager = start(parse(&tls_service(upstream.addr))?, memory_ledger(), dialer.clone()).await?;
    let addr = manager.local_addr("tls").ok_or("tls not bound")?;

    let mut client = TcpStream::connect(addr).await?;
    client.write_all(&client_hello(None)).await?;
    assert!(closed_silently(&mut client).await);
    assert_eq!(dialer.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_online_cap_kicks_second_login_without_dialing() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let toml = game_service(
        upstream.addr,
        r#"
        [services.minecraft.online_count]
        max = 1
        enable_max_limit = true
        "#,
    );
    let manager = start(parse(&toml)?, memory_ledger(), dialer.clone()).await?;
    let addr = manager.local_addr("lobby").ok_or("lobby not bound")?;

    let (mut first, wire) = login(addr, "mc.example.com", "Steve").await?;
    // The echo proves the first session is relayed and counted
    let mut echoed = vec![0u8; wire.len()];
    tokio::time::timeout(Duration::from_secs(3), first.read_exact(&mut echoed)).await??;
    assert_eq!(echoed, wire);

    let (mut second, _) = login(addr, "mc.example.com", "Alex").await?;
    let (id, json) =
        tokio::time::timeout(Duration::from_secs(3), read_string_packet(&mut second)).await??;
    assert_eq!(id, 0x00);
    assert!(json.contains("The server is full."));
    assert!(json.contains("Alex"));
    assert_eq!(dialer.count(), 1);

    // Capacity frees up once the first player leaves
    drop(first);
    let mut admitted = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if manager.online().get("lobby").current() == 0 {
            admitted = true;
            break;
        }
    }
    assert!(admitted);
    Ok(())
}

#[tokio::test]
async fn test_denied_player_name_is_kicked() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let toml = format!(
        r#"
        [lists]
        banned = ["Griefer"]
        {}
        [services.minecraft.name_access]
        mode = "deny"
        list_tags = ["banned"]
        "#,
        game_service(upstream.addr, "")
    );
    let manager = start(parse(&toml)?, memory_ledger(), dialer.clone()).await?;
    let addr = manager.local_addr("lobby").ok_or("lobby not bound")?;

    let (mut client, _) = login(addr, "mc.example.com", "Griefer").await?;
    let (id, json) =
        tokio::time::timeout(Duration::from_secs(3), read_string_packet(&mut client)).await??;
    assert_eq!(id, 0x00);
    assert!(json.contains("not allowed"));
    assert_eq!(dialer.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_denied_ip_closes_silently() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let toml = format!(
        r#"
        [lists]
        local = ["127.0.0.0/8"]
        {}
        [services.ip_access]
        mode = "deny"
        list_tags = ["local"]
        "#,
        game_service(upstream.addr, "")
    );
    let manager = start(parse(&toml)?, memory_ledger(), dialer.clone()).await?;
    let addr = manager.local_addr("lobby").ok_or("lobby not bound")?;

    let (mut client, _) = login(addr, "mc.example.com", "Steve").await?;
    assert!(closed_silently(&mut client).await);
    assert_eq!(dialer.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_quota_is_kicked_at_login() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let toml = format!(
        r#"
        [traffic_limiter]
        enabled = true
        limit_mb = 1
        kick_message = "{{player}} used {{used}} of {{limit}} MB"
        {}
        "#,
        game_service(upstream.addr, "")
    );
    let ledger = memory_ledger();
    assert!(ledger.can_consume("Steve", 0, 1));
    ledger.consume("Steve", MIB);

    let manager = start(parse(&toml)?, ledger, dialer.clone()).await?;
    let addr = manager.local_addr("lobby").ok_or("lobby not bound")?;

    let (mut client, _) = login(addr, "mc.example.com", "Steve").await?;
    let (_, json) =
        tokio::time::timeout(Duration::from_secs(3), read_string_packet(&mut client)).await??;
    assert!(json.contains("Steve used 1.00 of 1 MB"));
    assert_eq!(dialer.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_new_player_gets_a_record_and_is_metered() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let toml = format!(
        r#"
        [traffic_limiter]
        enabled = true
        limit_mb = 10
        {}
        "#,
        game_service(upstream.addr, "")
    );
    let ledger = memory_ledger();
    let manager = start(parse(&toml)?, ledger.clone(), dialer.clone()).await?;
    let addr = manager.local_addr("lobby").ok_or("lobby not bound")?;

    let (mut client, wire) = login(addr, "mc.example.com", "Newbie").await?;
    let mut echoed = vec![0u8; wire.len()];
    tokio::time::timeout(Duration::from_secs(3), client.read_exact(&mut echoed)).await??;

    client.write_all(&[0u8; 1000]).await?;
    let mut back = vec![0u8; 1000];
    tokio::time::timeout(Duration::from_secs(3), client.read_exact(&mut back)).await??;

    let record = ledger.get("Newbie").ok_or("no record")?;
    assert_eq!(record.limit_mb, 10);
    // Only traffic through the client socket is charged, not the replayed prelude
    assert!(record.used_bytes >= 1000 + wire.len() as i64);
    assert!(record.used_bytes <= 2000 + wire.len() as i64);
    Ok(())
}

#[tokio::test]
async fn test_fake_status_answers_locally() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let toml = game_service(
        upstream.addr,
        r#"
        ping_mode = "fake"
        motd_description = "Welcome to mcgate"
        "#,
    );
    let manager = start(parse(&toml)?, memory_ledger(), dialer.clone()).await?;
    let addr = manager.local_addr("lobby").ok_or("lobby not bound")?;

    let mut client = TcpStream::connect(addr).await?;
    let mut wire = encode_handshake(765, "mc.example.com", 25565, NextState::Status).to_vec();
    wire.extend_from_slice(&frame(&[0x00]));
    let ping = frame(&[0x01, 1, 2, 3, 4, 5, 6, 7, 8]);
    wire.extend_from_slice(&ping);
    client.write_all(&wire).await?;

    let (id, json) =
        tokio::time::timeout(Duration::from_secs(3), read_string_packet(&mut client)).await??;
    assert_eq!(id, 0x00);
    assert!(json.contains("Welcome to mcgate"));
    assert!(json.contains("\"protocol\":765"));
    assert!(json.contains("\"online\":0"));

    let mut pong = vec![0u8; ping.len()];
    tokio::time::timeout(Duration::from_secs(3), client.read_exact(&mut pong)).await??;
    assert_eq!(pong, ping.to_vec());
    assert_eq!(dialer.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_silent_status_client_is_dropped_at_sniff_deadline() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let toml = format!(
        r#"
        [timeout]
        sniff_ms = 300
        {}
        "#,
        game_service(upstream.addr, r#"ping_mode = "fake""#)
    );
    let manager = start(parse(&toml)?, memory_ledger(), dialer.clone()).await?;
    let addr = manager.local_addr("lobby").ok_or("lobby not bound")?;

    // Handshake only: the status request never follows
    let mut client = TcpStream::connect(addr).await?;
    client
        .write_all(&encode_handshake(765, "mc.example.com", 25565, NextState::Status))
        .await?;
    assert!(closed_silently(&mut client).await);
    assert_eq!(dialer.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_any_dest_routes_to_subdomain_host() -> TestResult {
    let upstream = spawn_echo_upstream().await?;
    let dialer = Arc::new(CountingDialer::default());
    let toml = format!(
        r#"
        [[services]]
        name = "wild"
        listen = 0
        listen_host = "127.0.0.1"
        target_port = {port}

        [services.minecraft.any_dest]
        wildcard_root_domain = "mc.example.com"
        "#,
        port = upstream.addr.port()
    );
    let manager = start(parse(&toml)?, memory_ledger(), dialer.clone()).await?;
    let addr = manager.local_addr("wild").ok_or("wild not bound")?;

    let (mut client, _) = login(addr, "127.0.0.1.mc.example.com", "Steve").await?;
    // The upstream sees the handshake rewritten to the bare host
    let expected = encode_handshake(765, "127.0.0.1", 25565, NextState::Login);
    let mut echoed = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(3), client.read_exact(&mut echoed)).await??;
    assert_eq!(echoed, expected.to_vec());
    assert_eq!(dialer.count(), 1);

    let (mut stranger, _) = login(addr, "other.org", "Alex").await?;
    let (_, json) =
        tokio::time::timeout(Duration::from_secs(3), read_string_packet(&mut stranger)).await??;
    assert!(json.contains("refused"));
    assert_eq!(dialer.count(), 1);
    Ok(())
}

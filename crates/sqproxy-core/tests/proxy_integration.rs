//! End-to-end tests that run a `QueryProxy` against a fake upstream over
//! real loopback sockets, the way the rest of this crate's loopback tests
//! do -- no mocked transport.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use sqproxy_core::codec::{
    decode_request, decode_response, wrap_header, GetChallengeResponse, InfoRequest, InfoResponse,
    PlayersRequest, PlayersResponse, Request, Response, RulesRequest, RulesResponse,
};
use sqproxy_core::{ProxyConfig, QueryProxy};

/// Bind an ephemeral port, read it back, then release the socket so the
/// system under test can rebind it. A small race, but the same technique
/// the crate's own listener tests already rely on.
fn reserve_port() -> SocketAddrV4 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    match socket.local_addr().unwrap() {
        SocketAddr::V4(v4) => v4,
        _ => unreachable!(),
    }
}

fn sample_info() -> InfoResponse {
    InfoResponse {
        protocol: 17,
        server_name: "Integration Server".into(),
        map: "de_inferno".into(),
        folder: "csgo".into(),
        game: "Counter-Strike".into(),
        app_id: 730,
        player_count: 1,
        max_players: 20,
        bot_count: 0,
        server_type: b'd',
        platform: b'l',
        password_protected: 0,
        vac_enabled: 1,
        version: "1.0".into(),
    }
}

/// A fake upstream that answers `A2S_INFO` directly and gates players/rules
/// behind a fixed challenge number, the way a real Source server does.
fn spawn_fake_upstream(socket: UdpSocket, challenge: i32, stop_after: Option<usize>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut served = 0;
        loop {
            if let Some(limit) = stop_after {
                if served >= limit {
                    return;
                }
            }
            let mut buf = [0u8; 2048];
            socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
            let (len, addr) = match socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let Some(request) = decode_request(&buf[..len]) else { continue };
            let response_packet = match request {
                Request::Info(_) => wrap_header(sample_info().encode_body(), false),
                Request::Players(PlayersRequest { challenge: got }) if got == challenge => {
                    wrap_header(PlayersResponse { players: vec![] }.encode_body(), false)
                }
                Request::Players(_) => GetChallengeResponse { challenge }.encode(),
                Request::Rules(RulesRequest { challenge: got }) if got == challenge => {
                    wrap_header(RulesResponse { rules: vec![] }.encode_body(), false)
                }
                Request::Rules(_) => GetChallengeResponse { challenge }.encode(),
            };
            socket.send_to(&response_packet, addr).unwrap();
            served += 1;
        }
    })
}

#[test]
fn proxy_serves_cached_info_and_gates_players_behind_a_challenge() {
    let upstream_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let upstream_addr = match upstream_socket.local_addr().unwrap() {
        SocketAddr::V4(v4) => v4,
        _ => unreachable!(),
    };
    let upstream_handle = spawn_fake_upstream(upstream_socket, 0x4242, None);

    let bind_addr = reserve_port();
    let config = ProxyConfig {
        name: "integration".into(),
        bind_addr,
        server_addr: upstream_addr,
        response_timeout: Duration::from_millis(500),
        info_cache_lifetime: Duration::from_millis(50),
        players_cache_lifetime: Duration::from_millis(50),
        rules_cache_lifetime: Duration::from_millis(50),
        no_a2s_rules: false,
        max_fails_before_offline: 3,
        wait_ready_graceful_period: Duration::from_secs(2),
    };

    let mut proxy = QueryProxy::new(config);
    proxy.run();
    assert!(proxy.wait_ready(), "proxy should populate all three caches within the grace period");
    assert!(proxy.health().lock().online());

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

    // A2S_INFO is served straight from cache, no challenge needed.
    client
        .send_to(&Request::Info(InfoRequest::default()).encode(), SocketAddr::V4(bind_addr))
        .unwrap();
    let mut buf = [0u8; 2048];
    let (len, _) = client.recv_from(&mut buf).unwrap();
    assert_eq!(decode_response(&buf[..len]).unwrap(), Response::Info(sample_info()));

    // A players request without the proxy's own challenge gets a challenge back.
    client
        .send_to(
            &Request::Players(PlayersRequest { challenge: -1 }).encode(),
            SocketAddr::V4(bind_addr),
        )
        .unwrap();
    let (len, _) = client.recv_from(&mut buf).unwrap();
    let Response::Challenge(challenge_response) = decode_response(&buf[..len]).unwrap() else {
        panic!("expected a challenge response");
    };

    // Retrying with that challenge serves the cached players list.
    client
        .send_to(
            &Request::Players(PlayersRequest { challenge: challenge_response.challenge }).encode(),
            SocketAddr::V4(bind_addr),
        )
        .unwrap();
    let (len, _) = client.recv_from(&mut buf).unwrap();
    assert_eq!(decode_response(&buf[..len]).unwrap(), Response::Players(PlayersResponse { players: vec![] }));

    proxy.shutdown();
    drop(proxy);
    drop(upstream_handle);
}

#[test]
fn proxy_goes_offline_and_stops_answering_when_upstream_disappears() {
    let upstream_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let upstream_addr = match upstream_socket.local_addr().unwrap() {
        SocketAddr::V4(v4) => v4,
        _ => unreachable!(),
    };
    // Answer exactly once per query kind, then go silent -- enough for one
    // successful refresh, then the upstream effectively disappears.
    let upstream_handle = spawn_fake_upstream(upstream_socket, 0x99, Some(3));

    let bind_addr = reserve_port();
    let config = ProxyConfig {
        name: "flaky".into(),
        bind_addr,
        server_addr: upstream_addr,
        response_timeout: Duration::from_millis(100),
        info_cache_lifetime: Duration::from_millis(30),
        players_cache_lifetime: Duration::from_millis(30),
        rules_cache_lifetime: Duration::from_millis(30),
        no_a2s_rules: true,
        max_fails_before_offline: 2,
        wait_ready_graceful_period: Duration::from_secs(2),
    };

    let mut proxy = QueryProxy::new(config);
    proxy.run();
    assert!(proxy.wait_ready());
    assert!(proxy.health().lock().online());

    let deadline = Instant::now() + Duration::from_secs(5);
    while proxy.health().lock().online() {
        assert!(Instant::now() < deadline, "upstream silence should eventually flip health offline");
        thread::sleep(Duration::from_millis(20));
    }

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    client
        .send_to(&Request::Info(InfoRequest::default()).encode(), SocketAddr::V4(bind_addr))
        .unwrap();
    let mut buf = [0u8; 2048];
    assert!(client.recv_from(&mut buf).is_err(), "listener must drop requests while offline");

    proxy.shutdown();
    drop(proxy);
    drop(upstream_handle);
}

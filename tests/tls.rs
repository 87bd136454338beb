//! TLS pool integration tests.
//!
//! A throwaway self-signed certificate is generated for every test.

mod common;

use common::*;
use sockpool::prelude::*;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tls_test_helper::{tls_connect, TestCert};

fn tls_pool(cert: &TestCert, max_connections: usize, max_inactivity: u32) -> ConnectionPool {
    init_tracing();
    let mut pool = ConnectionPool::with_settings(
        loopback_settings(max_connections)
            .with_tls(cert.key_path(), cert.cert_path())
            .with_max_inactivity(max_inactivity),
    );
    pool.launch().expect("Failed to launch TLS pool");
    pool
}

// ============================================================================
// Launch
// ============================================================================

#[test]
fn launch_fails_on_missing_key() {
    init_tracing();
    let cert = TestCert::generate();
    let mut pool = ConnectionPool::with_settings(
        loopback_settings(1).with_tls("/nonexistent/key.pem", cert.cert_path()),
    );
    assert!(matches!(pool.launch(), Err(Error::TlsKeyLoad { .. })));
    assert!(!pool.is_launched());
    assert!(pool.local_addr().is_none());
}

#[test]
fn launch_fails_on_garbage_certificate() {
    init_tracing();
    let cert = TestCert::generate();
    let mut garbage = tempfile::NamedTempFile::new().unwrap();
    garbage.write_all(b"this is not a certificate").unwrap();
    garbage.flush().unwrap();

    let mut pool = ConnectionPool::with_settings(
        loopback_settings(1).with_tls(cert.key_path(), garbage.path()),
    );
    assert!(matches!(pool.launch(), Err(Error::TlsInvalidCertificate(_))));
    assert!(!pool.is_launched());
}

#[test]
fn launch_with_valid_certificate() {
    let cert = TestCert::generate();
    let pool = tls_pool(&cert, 1, 0);
    assert!(pool.is_launched());
    assert!(pool.is_tls());
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn handshake_completes_and_echoes() {
    let cert = TestCert::generate();
    let mut pool = tls_pool(&cert, 1, 0);
    let addr = pool.local_addr().unwrap();
    let client_config = cert.client_config();

    let client = thread::spawn(move || {
        let mut stream = tls_connect(addr, client_config);
        stream.write_all(b"hello over tls").unwrap();
        let mut reply = [0u8; 14];
        stream.read_exact(&mut reply).unwrap();
        // Handed back so the close can't race the last pass
        (reply, stream)
    });

    let mut echo = |_id: i64, frame: &mut Frame, reply: &mut bool| {
        *reply = !frame.is_empty();
        Directive::Keep
    };

    let deadline = Instant::now() + DEADLINE;
    let mut completed = 0;
    while !client.is_finished() {
        assert!(Instant::now() < deadline, "TLS exchange timed out");
        match pool.accept_connection() {
            Ok(_) | Err(Error::PoolFull { .. }) => {}
            Err(err) => panic!("Unexpected accept error: {err}"),
        }
        completed += pool.handshake_connections().unwrap();
        pool.read_from_connections(Some(&mut echo)).unwrap();

        // In-progress handshakes must never cost the connection
        assert!(pool.connections().iter().all(|c| c.is_connected()));
        thread::sleep(Duration::from_millis(1));
    }

    let (reply, _stream) = client.join().unwrap();
    assert_eq!(&reply, b"hello over tls");
    assert_eq!(completed, 1);
    assert!(pool.connections()[0].is_handshake_complete());
}

#[test]
fn silent_peer_stays_pending() {
    let cert = TestCert::generate();
    let mut pool = tls_pool(&cert, 1, 0);
    let _client = connect(&pool);
    accept_one(&mut pool);

    for _ in 0..20 {
        assert_eq!(pool.handshake_connections().unwrap(), 0);
    }
    let connection = &pool.connections()[0];
    assert!(connection.is_connected());
    assert!(connection.is_tls());
    assert!(!connection.is_handshake_complete());
}

#[test]
fn read_before_handshake_is_pending() {
    let cert = TestCert::generate();
    let mut pool = tls_pool(&cert, 1, 0);
    let _client = connect(&pool);
    accept_one(&mut pool);

    let mut frames = Vec::new();
    pool.read_from_connections(Some(&mut |id: i64, frame: &mut Frame, _reply: &mut bool| {
        frames.push((id, frame.len()));
        Directive::Keep
    }))
    .unwrap();

    assert_eq!(frames, vec![(UNIDENTIFIED, 0)]);
    assert!(pool.connections()[0].is_connected());
    assert_eq!(pool.connections()[0].inactivity_counter(), 1);
}

#[test]
fn stalled_handshake_is_evicted_as_inactive() {
    let cert = TestCert::generate();
    let mut pool = tls_pool(&cert, 1, 3);
    let _client = connect(&pool);
    accept_one(&mut pool);

    for _ in 0..3 {
        pool.handshake_connections().unwrap();
        pool.read_from_connections(None).unwrap();
    }
    assert_eq!(pool.cleanup_connections().unwrap(), 1);
    assert_eq!(pool.connected_connections(), 0);
}

#[test]
fn garbage_handshake_disconnects_only_that_peer() {
    let cert = TestCert::generate();
    let mut pool = tls_pool(&cert, 2, 0);
    let mut garbage = connect(&pool);
    accept_one(&mut pool);
    let _silent = connect(&pool);
    accept_one(&mut pool);

    garbage.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    eventually("reject the garbage handshake", || {
        let _ = pool.handshake_connections().unwrap();
        !pool.connections()[0].is_connected()
    });

    assert!(pool.connections()[1].is_connected());
    assert_eq!(pool.cleanup_connections().unwrap(), 1);
    assert_eq!(pool.connected_connections(), 1);
}

#[test]
fn shutdown_during_handshake_disconnects() {
    let cert = TestCert::generate();
    let mut pool = tls_pool(&cert, 1, 0);
    let mut client: TcpStream = connect(&pool);
    accept_one(&mut pool);
    pool.handshake_connections().unwrap();

    pool.shutdown();
    assert_eq!(pool.connected_connections(), 0);

    let mut buf = [0u8; 16];
    assert_eq!(client.read(&mut buf).unwrap(), 0);
}

#[test]
fn write_pass_reaches_tls_peer() {
    let cert = TestCert::generate();
    let mut pool = tls_pool(&cert, 1, 0);
    let addr = pool.local_addr().unwrap();
    let client_config = cert.client_config();

    let client = thread::spawn(move || {
        let mut stream = tls_connect(addr, client_config);
        // Drives the handshake
        stream.write_all(b"ready").unwrap();
        let mut pushed = [0u8; 11];
        stream.read_exact(&mut pushed).unwrap();
        pushed
    });

    let mut ready = false;
    let mut pushed = false;
    let deadline = Instant::now() + DEADLINE;
    while !client.is_finished() {
        assert!(Instant::now() < deadline, "TLS push timed out");
        let _ = pool.accept_connection();
        pool.handshake_connections().unwrap();
        pool.read_from_connections(Some(&mut |_id: i64, frame: &mut Frame, _reply: &mut bool| {
            if frame.as_bytes() == b"ready" {
                ready = true;
                return Directive::Reassign(1);
            }
            Directive::Keep
        }))
        .unwrap();
        if ready && !pushed {
            let sent = pool
                .write_to_connections(&mut |id: i64, frame: &mut Frame| {
                    frame.set_payload(b"server push");
                    id == 1
                })
                .unwrap();
            pushed = sent == 1;
        }
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(&client.join().unwrap(), b"server push");
}

// ============================================================================
// Peer Close
// ============================================================================

// Echoes data and records it, along with the close notification, until the
// first connection has been released.
fn serve_until_released(pool: &mut ConnectionPool) -> Vec<(i64, Vec<u8>)> {
    let mut calls: Vec<(i64, Vec<u8>)> = Vec::new();
    let deadline = Instant::now() + DEADLINE;
    while !pool.connections().first().is_some_and(|c| !c.is_connected()) {
        assert!(Instant::now() < deadline, "TLS peer close timed out");
        let _ = pool.accept_connection();
        pool.handshake_connections().unwrap();
        pool.read_from_connections(Some(&mut |id: i64, frame: &mut Frame, reply: &mut bool| {
            if !frame.is_empty() {
                calls.push((id, frame.as_bytes().to_vec()));
                *reply = true;
                return Directive::Reassign(1);
            }
            if id == UNIDENTIFIED && !calls.is_empty() {
                calls.push((id, Vec::new()));
            }
            Directive::Keep
        }))
        .unwrap();
        thread::sleep(Duration::from_millis(1));
    }
    calls
}

#[test]
fn close_notify_is_reported_as_peer_close() {
    let cert = TestCert::generate();
    let mut pool = tls_pool(&cert, 1, 0);
    let addr = pool.local_addr().unwrap();
    let client_config = cert.client_config();

    let client = thread::spawn(move || {
        let mut stream = tls_connect(addr, client_config);
        stream.write_all(b"hi").unwrap();
        stream.conn.send_close_notify();
        stream.flush().unwrap();
        // Keep the socket open so only the alert signals the close
        stream
    });

    let calls = serve_until_released(&mut pool);
    assert_eq!(
        calls,
        vec![(UNIDENTIFIED, b"hi".to_vec()), (UNIDENTIFIED, Vec::new())]
    );
    assert_eq!(pool.cleanup_connections().unwrap(), 1);
    drop(client.join().unwrap());
}

#[test]
fn transport_eof_without_close_notify_is_reported_as_peer_close() {
    let cert = TestCert::generate();
    let mut pool = tls_pool(&cert, 1, 0);
    let addr = pool.local_addr().unwrap();
    let client_config = cert.client_config();

    let client = thread::spawn(move || {
        let mut stream = tls_connect(addr, client_config);
        stream.write_all(b"hi").unwrap();
        let mut echo = [0u8; 2];
        stream.read_exact(&mut echo).unwrap();
        stream.sock.shutdown(Shutdown::Write).unwrap();
        stream
    });

    let calls = serve_until_released(&mut pool);
    assert_eq!(
        calls,
        vec![(UNIDENTIFIED, b"hi".to_vec()), (UNIDENTIFIED, Vec::new())]
    );
    assert_eq!(pool.connected_connections(), 1);
    assert_eq!(pool.cleanup_connections().unwrap(), 1);
    drop(client.join().unwrap());
}

//! Connection lifecycle and transfer tests
//!
//! Each test gets its own namespace root; the two peers are two handles
//! in one process, on separate threads where a transfer needs both sides
//! running at once.

use std::{
    io::{ErrorKind, Read, Write},
    thread,
    time::{Duration, Instant},
};

use mio::Token;
use tempfile::TempDir;
use vchan::{
    config::{DEFAULT_RING_SIZE, MAX_RING_SIZE, MIN_RING_SIZE},
    AckState, ChannelWatcher, ConnectProgress, ConnectionState, Vchan, VchanConfig, VchanError,
};

const SERVER_DOMAIN: u32 = 0;
const CLIENT_DOMAIN: u32 = 5;

fn server_config(dir: &TempDir) -> VchanConfig {
    VchanConfig::new(dir.path())
        .with_local_domain(SERVER_DOMAIN)
        .with_liveness_interval(Duration::from_millis(20))
}

fn client_config(dir: &TempDir) -> VchanConfig {
    VchanConfig::new(dir.path())
        .with_local_domain(CLIENT_DOMAIN)
        .with_liveness_interval(Duration::from_millis(20))
        .with_connect_retries(5, Duration::from_millis(10))
}

fn connected_pair(dir: &TempDir, port: i32, read_min: usize, write_min: usize) -> (Vchan, Vchan) {
    let server =
        Vchan::server(&server_config(dir), CLIENT_DOMAIN, port, read_min, write_min).unwrap();
    let client = Vchan::client(&client_config(dir), SERVER_DOMAIN, port).unwrap();
    (server, client)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

#[cfg(test)]
mod connection_tests {
    use super::*;

    /// Client streams more than one ring's worth; server reassembles it with recv
    #[test]
    fn test_stream_larger_than_ring() {
        let dir = TempDir::new().unwrap();
        let (mut server, client) = connected_pair(&dir, 100, 4096, 4096);
        assert_eq!(server.read_capacity(), Some(4096));

        let payload = pattern(10_000);
        let expected = payload.clone();
        let writer = thread::spawn(move || {
            let mut client = client;
            client.write_all(&payload).unwrap();
            client
        });

        let mut received = Vec::with_capacity(10_000);
        let mut chunk = [0u8; 1000];
        while received.len() < 10_000 {
            assert_eq!(server.recv(&mut chunk).unwrap(), chunk.len());
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, expected);

        let client = writer.join().unwrap();
        assert_eq!(client.stats().bytes_written, 10_000);
        assert_eq!(server.stats().bytes_read, 10_000);
    }

    /// A non-blocking atomic send that does not fit moves nothing
    #[test]
    fn test_nonblocking_send_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = connected_pair(&dir, 101, 1024, 1024);
        client.set_blocking(false);
        assert!(!client.is_blocking());

        assert_eq!(client.send(&pattern(1021)).unwrap(), 1021);
        assert_eq!(client.buffer_space(), 3);

        assert_eq!(client.send(&[1u8; 8]).unwrap(), 0);
        assert_eq!(client.buffer_space(), 3);
        assert_eq!(server.data_ready(), 1021);

        // partial write takes what fits
        assert_eq!(client.write(&[1u8; 8]).unwrap(), 3);
        assert_eq!(server.data_ready(), 1024);
        assert_eq!(client.write(&[1u8; 8]).unwrap(), 0);
    }

    #[test]
    fn test_no_server_fails_within_budget() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();

        let err = Vchan::client(&client_config(&dir), SERVER_DOMAIN, 102).unwrap_err();
        assert!(matches!(err, VchanError::NoPeer { domain: 0, port: 102 }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    /// Async client keeps reporting Pending until the server publishes
    #[test]
    fn test_async_client_progress() {
        let dir = TempDir::new().unwrap();
        let (mut client, fd) =
            Vchan::client_async(&client_config(&dir), SERVER_DOMAIN, 103).unwrap();
        assert!(fd >= 0);
        assert_eq!(client.status(), ConnectionState::Waiting);

        for _ in 0..3 {
            assert_eq!(client.finish(false).unwrap(), ConnectProgress::Pending);
            assert_eq!(client.status(), ConnectionState::Waiting);
        }

        let mut watcher = ChannelWatcher::new().unwrap();
        watcher.register(&mut client, Token(7)).unwrap();

        let mut server =
            Vchan::server(&server_config(&dir), CLIENT_DOMAIN, 103, 1024, 1024).unwrap();
        assert_eq!(server.status(), ConnectionState::Waiting);

        // the server wakes a client that was already waiting
        let ready = watcher.wait(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(ready, vec![Token(7)]);

        assert_eq!(client.finish(false).unwrap(), ConnectProgress::Connected);
        assert_eq!(client.ack_state(), AckState::Acknowledged);
        assert_eq!(client.status(), ConnectionState::Connected);
        assert_eq!(server.status(), ConnectionState::Connected);

        // repeated calls after connecting are harmless
        assert_eq!(client.finish(false).unwrap(), ConnectProgress::Connected);
    }

    /// A client that gave up stays disconnected when a server shows up later
    #[test]
    fn test_failed_handshake_is_final() {
        let dir = TempDir::new().unwrap();
        let (mut client, _) =
            Vchan::client_async(&client_config(&dir), SERVER_DOMAIN, 119).unwrap();
        assert!(matches!(
            client.finish(true),
            Err(VchanError::NoPeer { domain: 0, port: 119 })
        ));
        assert_eq!(client.status(), ConnectionState::Disconnected);

        let mut server =
            Vchan::server(&server_config(&dir), CLIENT_DOMAIN, 119, 1024, 1024).unwrap();
        assert!(matches!(client.finish(false), Err(VchanError::Disconnected)));
        assert!(matches!(client.finish(true), Err(VchanError::Disconnected)));
        assert_eq!(client.status(), ConnectionState::Disconnected);

        // the server never saw a client attach
        assert_eq!(server.status(), ConnectionState::Waiting);
    }

    /// A blocking client started first connects once the server publishes
    #[test]
    fn test_blocking_client_waits_for_late_server() {
        let dir = TempDir::new().unwrap();
        let config = client_config(&dir).with_connect_retries(200, Duration::from_millis(10));

        let connector = thread::spawn(move || Vchan::client(&config, SERVER_DOMAIN, 120));
        thread::sleep(Duration::from_millis(100));

        let mut server =
            Vchan::server(&server_config(&dir), CLIENT_DOMAIN, 120, 1024, 1024).unwrap();
        let mut client = connector.join().unwrap().unwrap();

        assert_eq!(client.status(), ConnectionState::Connected);
        assert_eq!(server.status(), ConnectionState::Connected);

        client.send(b"late").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(server.recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"late");
    }

    /// Server teardown unblocks a client stuck in recv
    #[test]
    fn test_server_close_unblocks_recv() {
        let dir = TempDir::new().unwrap();
        let (server, client) = connected_pair(&dir, 104, 1024, 1024);

        let reader = thread::spawn(move || {
            let mut client = client;
            let mut buf = [0u8; 16];
            let result = client.recv(&mut buf);
            (client, result)
        });

        thread::sleep(Duration::from_millis(50));
        server.close();

        let (mut client, result) = reader.join().unwrap();
        assert!(matches!(result, Err(VchanError::Disconnected)));
        assert_eq!(client.status(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_transitions_are_monotonic() {
        let dir = TempDir::new().unwrap();
        let mut server =
            Vchan::server(&server_config(&dir), CLIENT_DOMAIN, 105, 1024, 1024).unwrap();
        assert_eq!(server.status(), ConnectionState::Waiting);
        assert!(server.is_open());

        let client = Vchan::client(&client_config(&dir), SERVER_DOMAIN, 105).unwrap();
        assert_eq!(server.status(), ConnectionState::Connected);

        drop(client);
        assert_eq!(server.status(), ConnectionState::Disconnected);
        assert!(!server.is_open());

        // nothing brings it back
        for _ in 0..3 {
            assert_eq!(server.status(), ConnectionState::Disconnected);
        }
        assert!(matches!(server.write(b"x"), Err(VchanError::Disconnected)));
    }

    #[test]
    fn test_data_survives_peer_close() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = connected_pair(&dir, 106, 1024, 1024);

        client.send(b"last words").unwrap();
        client.close();

        let mut buf = [0u8; 10];
        assert_eq!(server.recv(&mut buf).unwrap(), 10);
        assert_eq!(&buf, b"last words");
        assert!(matches!(server.read(&mut buf), Err(VchanError::Disconnected)));
    }

    #[test]
    fn test_space_plus_ready_is_capacity() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = connected_pair(&dir, 107, 2048, 1024);
        let capacity = client.write_capacity().unwrap();
        assert_eq!(capacity, 2048);

        let mut sink = vec![0u8; 2048];
        for step in [100usize, 700, 1500, 2048, 1] {
            let written = client.write(&pattern(step)).unwrap();
            assert_eq!(client.buffer_space() + server.data_ready(), capacity);

            let read = server.read(&mut sink[..written]).unwrap();
            assert_eq!(read, written);
            assert_eq!(client.buffer_space() + server.data_ready(), capacity);
        }
    }

    #[test]
    fn test_oversized_atomic_transfer_rejected() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = connected_pair(&dir, 108, 1024, 1024);

        let err = client.send(&vec![0u8; 1025]).unwrap_err();
        assert!(matches!(err, VchanError::InvalidParameter { .. }));

        let mut buf = vec![0u8; 2048];
        let err = server.recv(&mut buf).unwrap_err();
        assert!(matches!(err, VchanError::InvalidParameter { .. }));

        // empty transfers are no-ops
        assert_eq!(client.send(&[]).unwrap(), 0);
        assert_eq!(server.recv(&mut []).unwrap(), 0);
    }

    #[test]
    fn test_sizes_are_rounded_up() {
        let dir = TempDir::new().unwrap();
        let (server, client) = connected_pair(&dir, 109, 1, 5000);

        assert_eq!(server.read_capacity(), Some(MIN_RING_SIZE));
        assert_eq!(server.write_capacity(), Some(8192));
        assert_eq!(client.write_capacity(), Some(MIN_RING_SIZE));
        assert_eq!(client.read_capacity(), Some(8192));

        let err = Vchan::server(&server_config(&dir), CLIENT_DOMAIN, 110, MAX_RING_SIZE + 1, 1024)
            .unwrap_err();
        assert!(matches!(err, VchanError::InvalidParameter { .. }));

        let (server, _client) = connected_pair(&dir, 121, DEFAULT_RING_SIZE, MAX_RING_SIZE);
        assert_eq!(server.read_capacity(), Some(DEFAULT_RING_SIZE));
        assert_eq!(server.write_capacity(), Some(MAX_RING_SIZE));
    }

    #[test]
    fn test_port_in_use() {
        let dir = TempDir::new().unwrap();
        let _server =
            Vchan::server(&server_config(&dir), CLIENT_DOMAIN, 111, 1024, 1024).unwrap();

        let err =
            Vchan::server(&server_config(&dir), CLIENT_DOMAIN, 111, 1024, 1024).unwrap_err();
        assert!(matches!(err, VchanError::PortInUse { domain: 5, port: 111 }));

        // a different port is fine
        assert!(Vchan::server(&server_config(&dir), CLIENT_DOMAIN, 112, 1024, 1024).is_ok());
    }

    #[test]
    fn test_negative_port_rejected() {
        let dir = TempDir::new().unwrap();
        let err = Vchan::server(&server_config(&dir), CLIENT_DOMAIN, -1, 1024, 1024).unwrap_err();
        assert!(matches!(err, VchanError::InvalidParameter { .. }));
    }

    /// Leftovers of a crashed server are reclaimed by the next one
    #[test]
    fn test_stale_server_reclaimed() {
        let dir = TempDir::new().unwrap();
        let paths = server_config(&dir)
            .namespace()
            .server_paths(CLIENT_DOMAIN, 113)
            .unwrap();
        paths.ensure_dir(0o600).unwrap();
        drop(std::os::unix::net::UnixDatagram::bind(&paths.server_endpoint).unwrap());
        std::fs::write(&paths.ring, b"garbage").unwrap();

        let mut server =
            Vchan::server(&server_config(&dir), CLIENT_DOMAIN, 113, 1024, 1024).unwrap();
        let mut client = Vchan::client(&client_config(&dir), SERVER_DOMAIN, 113).unwrap();

        client.send(b"hi").unwrap();
        let mut buf = [0u8; 2];
        server.recv(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    /// A region whose server endpoint is gone is not bound to
    #[test]
    fn test_orphaned_region_ignored() {
        let dir = TempDir::new().unwrap();
        let paths = server_config(&dir)
            .namespace()
            .server_paths(CLIENT_DOMAIN, 114)
            .unwrap();

        let server =
            Vchan::server(&server_config(&dir), CLIENT_DOMAIN, 114, 1024, 1024).unwrap();
        let saved = std::fs::read(&paths.ring).unwrap();
        drop(server);
        assert!(!paths.ring.exists());
        std::fs::write(&paths.ring, saved).unwrap();

        let (mut client, _) =
            Vchan::client_async(&client_config(&dir), SERVER_DOMAIN, 114).unwrap();
        assert_eq!(client.finish(false).unwrap(), ConnectProgress::Pending);
    }

    #[test]
    fn test_second_client_rejected() {
        let dir = TempDir::new().unwrap();
        let (_server, _client) = connected_pair(&dir, 115, 1024, 1024);

        let err = Vchan::client(&client_config(&dir), SERVER_DOMAIN, 115).unwrap_err();
        assert!(matches!(err, VchanError::PortInUse { .. }));
    }

    #[test]
    fn test_io_traits() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = connected_pair(&dir, 116, 1024, 1024);

        Write::write_all(&mut client, b"hello").unwrap();
        client.flush().unwrap();

        let mut buf = [0u8; 5];
        Read::read_exact(&mut server, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        server.set_blocking(false);
        let err = Read::read(&mut server, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);

        client.close();
        assert_eq!(Read::read(&mut server, &mut buf).unwrap(), 0);
        let err = Write::write(&mut server, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    /// Readiness comes through the watcher and is acknowledged once
    #[test]
    fn test_watcher_and_acknowledgment() {
        let dir = TempDir::new().unwrap();
        let (mut server, mut client) = connected_pair(&dir, 117, 1024, 1024);
        server.set_blocking(false);

        let mut watcher = ChannelWatcher::new().unwrap();
        watcher.register(&mut server, Token(1)).unwrap();

        // the client signalled on connect
        assert_eq!(
            watcher.wait(Some(Duration::from_secs(2))).unwrap(),
            vec![Token(1)]
        );
        server.wait().unwrap();
        assert_eq!(server.ack_state(), AckState::Acknowledged);

        assert_eq!(server.data_ready(), 0);
        client.send(b"ping").unwrap();

        assert_eq!(
            watcher.wait(Some(Duration::from_secs(2))).unwrap(),
            vec![Token(1)]
        );
        server.wait().unwrap();
        assert_eq!(server.data_ready(), 4);

        let mut buf = [0u8; 4];
        assert_eq!(server.recv(&mut buf).unwrap(), 4);
        assert_eq!(server.fd(), std::os::fd::AsRawFd::as_raw_fd(&server));
    }

    #[test]
    fn test_blocking_writer_waits_for_reader() {
        let dir = TempDir::new().unwrap();
        let (mut server, client) = connected_pair(&dir, 118, 1024, 1024);

        let writer = thread::spawn(move || {
            let mut client = client;
            // twice the ring, must wait for the server to drain
            for block in pattern(2048).chunks(512) {
                assert_eq!(client.send(block).unwrap(), 512);
            }
            client
        });

        thread::sleep(Duration::from_millis(50));
        let mut received = vec![0u8; 2048];
        for chunk in received.chunks_mut(256) {
            assert_eq!(server.recv(chunk).unwrap(), 256);
        }
        assert_eq!(received, pattern(2048));

        let client = writer.join().unwrap();
        assert!(client.stats().suspensions > 0);
    }
}

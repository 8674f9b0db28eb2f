//! End-to-end scenarios against a hub bound on ephemeral ports, driven with
//! real `TcpStream`/`UdpSocket` clients.

use std::time::Duration;

use hub_core::{Config, Hub};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};

async fn bind_hub() -> (Hub, Config) {
    let config = Config {
        bind_host: "127.0.0.1".to_string(),
        control_port: 0,
        video_port: 0,
        audio_port: 0,
        screen_control_port: 0,
        screen_data_port: 0,
        file_port: 0,
        ..Config::default()
    };
    let hub = Hub::bootstrap(&config).await.unwrap();
    (hub, config)
}

/// Resolves the actual bound port for a hub endpoint by asking the OS to
/// hand out a fixed port up front instead of relying on introspection that
/// `Hub` intentionally doesn't expose (spec §4.7 only promises behavior, not
/// a bound-port query API).
async fn reserve_ports(n: usize) -> Vec<u16> {
    let mut ports = Vec::with_capacity(n);
    for _ in 0..n {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        ports.push(listener.local_addr().unwrap().port());
        drop(listener);
    }
    ports
}

async fn bind_hub_on_fixed_ports() -> (Hub, Config) {
    let ports = reserve_ports(6).await;
    let config = Config {
        bind_host: "127.0.0.1".to_string(),
        control_port: ports[0],
        video_port: ports[1],
        audio_port: ports[2],
        screen_control_port: ports[3],
        screen_data_port: ports[4],
        file_port: ports[5],
        ..Config::default()
    };
    let hub = Hub::bootstrap(&config).await.unwrap();
    (hub, config)
}

async fn connect_control(config: &Config, username: &str) -> (BufReader<TcpStream>, u32) {
    let mut stream = TcpStream::connect((config.bind_host.as_str(), config.control_port))
        .await
        .unwrap();
    stream
        .write_all(format!("CONNECT:{username}\n").as_bytes())
        .await
        .unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let id: u32 = line.trim().strip_prefix("ID:").unwrap().parse().unwrap();
    (reader, id)
}

async fn read_line(stream: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    stream.read_line(&mut line).await.unwrap();
    line.trim_end().to_string()
}

#[tokio::test]
async fn bootstrap_and_shutdown_do_not_hang() {
    let (hub, _config) = bind_hub().await;
    hub.shutdown().await;
}

#[tokio::test]
async fn join_leave_roster_reflects_membership() {
    let (hub, config) = bind_hub_on_fixed_ports().await;

    let (mut alice, alice_id) = connect_control(&config, "alice").await;
    assert_eq!(alice_id, 0);
    let roster_after_alice = read_line(&mut alice).await;
    assert!(roster_after_alice.starts_with("USERS:"));

    let (mut bob, bob_id) = connect_control(&config, "bob").await;
    assert_eq!(bob_id, 1);
    let _ = read_line(&mut bob).await; // bob's own post-join USERS

    // alice's second USERS (now includes bob) carries the same two-entry
    // roster that bob's own first USERS just did.
    let roster_line = read_line(&mut alice).await;
    let hex = roster_line.strip_prefix("USERS:").unwrap();
    let bytes = decode_hex(hex);
    let entries = hub_core_protocol_decode(&bytes);
    assert_eq!(entries.len(), 2);

    drop(alice);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let roster_line = read_line(&mut bob).await;
    let hex = roster_line.strip_prefix("USERS:").unwrap();
    let entries = hub_core_protocol_decode(&decode_hex(hex));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1, "bob");

    hub.shutdown().await;
}

fn decode_hex(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
        .collect()
}

/// Minimal roster decoder mirroring `hub_core::protocol::decode_roster`'s
/// wire layout, used here because integration tests exercise only the
/// public TCP/UDP surface.
fn hub_core_protocol_decode(body: &[u8]) -> Vec<(u32, String)> {
    fn read_varint(body: &mut &[u8]) -> u64 {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            let (&byte, rest) = body.split_first().unwrap();
            *body = rest;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return result;
            }
            shift += 7;
        }
    }
    let mut body = body;
    let count = read_varint(&mut body);
    let mut out = Vec::new();
    for _ in 0..count {
        let id = read_varint(&mut body) as u32;
        let len = read_varint(&mut body) as usize;
        let (name, rest) = body.split_at(len);
        out.push((id, String::from_utf8(name.to_vec()).unwrap()));
        body = rest;
    }
    out
}

#[tokio::test]
async fn chat_fans_out_with_prefix() {
    let (hub, config) = bind_hub_on_fixed_ports().await;
    let (mut alice, _id) = connect_control(&config, "alice").await;
    let _ = read_line(&mut alice).await; // USERS

    alice.write_all(b"CHAT:hello there\n").await.unwrap();
    let line = read_line(&mut alice).await;
    assert!(line.starts_with("CHAT:0:alice:"));
    assert!(line.ends_with(":hello there"));

    hub.shutdown().await;
}

#[tokio::test]
async fn video_packets_fan_out_to_other_participants() {
    let (hub, config) = bind_hub_on_fixed_ports().await;
    let (mut alice, _) = connect_control(&config, "alice").await;
    let _ = read_line(&mut alice).await;
    let (mut bob, _) = connect_control(&config, "bob").await;
    let _ = read_line(&mut bob).await;
    let _ = read_line(&mut alice).await; // second USERS after bob joins

    let alice_video = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let bob_video = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Register bob's video address with a beacon-like frame first.
    let mut envelope = 1u32.to_le_bytes().to_vec();
    envelope.extend_from_slice(b"beacon");
    bob_video
        .send_to(&envelope, (config.bind_host.as_str(), config.video_port))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut frame = 0u32.to_le_bytes().to_vec();
    frame.extend_from_slice(b"frame-data");
    alice_video
        .send_to(&frame, (config.bind_host.as_str(), config.video_port))
        .await
        .unwrap();

    let mut buf = [0u8; 1500];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), bob_video.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], frame.as_slice());

    hub.shutdown().await;
}

#[tokio::test]
async fn presenter_exclusivity_and_release() {
    let (hub, config) = bind_hub_on_fixed_ports().await;
    let (mut alice, _) = connect_control(&config, "alice").await;
    let _ = read_line(&mut alice).await;
    let (mut bob, _) = connect_control(&config, "bob").await;
    let _ = read_line(&mut bob).await;
    let _ = read_line(&mut alice).await;

    let mut alice_screen =
        TcpStream::connect((config.bind_host.as_str(), config.screen_control_port))
            .await
            .unwrap();
    alice_screen.write_all(&0u32.to_le_bytes()).await.unwrap();
    let mut reply = [0u8; 7];
    alice_screen.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"GRANTED");

    let presenter_notice = read_line(&mut alice).await;
    assert_eq!(presenter_notice, "PRESENTER:0");
    let presenter_notice_bob = read_line(&mut bob).await;
    assert_eq!(presenter_notice_bob, "PRESENTER:0");

    let mut bob_screen =
        TcpStream::connect((config.bind_host.as_str(), config.screen_control_port))
            .await
            .unwrap();
    bob_screen.write_all(&1u32.to_le_bytes()).await.unwrap();
    let mut denied = [0u8; 6];
    bob_screen.read_exact(&mut denied).await.unwrap();
    assert_eq!(&denied, b"DENIED");

    alice_screen.write_all(b"STOP").await.unwrap();
    let released_alice = read_line(&mut alice).await;
    assert_eq!(released_alice, "PRESENTER:None");
    let released_bob = read_line(&mut bob).await;
    assert_eq!(released_bob, "PRESENTER:None");

    hub.shutdown().await;
}

#[tokio::test]
async fn file_round_trip_and_authorization() {
    let (hub, config) = bind_hub_on_fixed_ports().await;
    let (mut alice, _) = connect_control(&config, "alice").await;
    let _ = read_line(&mut alice).await;
    let (mut bob, _) = connect_control(&config, "bob").await;
    let _ = read_line(&mut bob).await;
    let _ = read_line(&mut alice).await;

    let payload: Vec<u8> = (0u8..10).collect();
    let mut upload = TcpStream::connect((config.bind_host.as_str(), config.file_port))
        .await
        .unwrap();
    upload
        .write_all(format!("UPLOAD:0:notes.txt:{}\n", payload.len()).as_bytes())
        .await
        .unwrap();
    upload.write_all(&payload).await.unwrap();
    let mut ack = [0u8; 9];
    upload.read_exact(&mut ack).await.unwrap();
    assert_eq!(&ack, b"SUCCESS:0");

    let offer_alice = read_line(&mut alice).await;
    assert_eq!(offer_alice, "FILE_OFFER:0:notes.txt:10:alice:0");
    let offer_bob = read_line(&mut bob).await;
    assert_eq!(offer_bob, "FILE_OFFER:0:notes.txt:10:alice:0");

    let mut download = TcpStream::connect((config.bind_host.as_str(), config.file_port))
        .await
        .unwrap();
    download.write_all(b"DOWNLOAD:0\n").await.unwrap();
    let mut reader = BufReader::new(download);
    let mut header = String::new();
    reader.read_line(&mut header).await.unwrap();
    assert_eq!(header.trim(), "FILE:notes.txt:10");
    let mut body = vec![0u8; 10];
    reader.read_exact(&mut body).await.unwrap();
    assert_eq!(body, payload);

    let mut bad_delete = TcpStream::connect((config.bind_host.as_str(), config.file_port))
        .await
        .unwrap();
    bad_delete.write_all(b"DELETE:0:1\n").await.unwrap();
    let mut buf = [0u8; 64];
    let n = bad_delete.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("ERROR:"));

    let mut good_delete = TcpStream::connect((config.bind_host.as_str(), config.file_port))
        .await
        .unwrap();
    good_delete.write_all(b"DELETE:0:0\n").await.unwrap();
    let mut ack = [0u8; 16];
    let n = good_delete.read(&mut ack).await.unwrap();
    assert_eq!(&ack[..n], b"DELETE_SUCCESS:0");

    let deleted_alice = read_line(&mut alice).await;
    assert_eq!(deleted_alice, "FILE_DELETED:0");

    hub.shutdown().await;
}

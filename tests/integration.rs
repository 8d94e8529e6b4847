//! End-to-end tests against a mock masquerade server.
//!
//! The mock accepts the login sequence, unwraps plugin messages into a server-side yamux session
//! and wraps its own traffic into chunk-data packets, mirroring what the production tunnel server
//! does. The engine under test runs unmodified, driven through its SOCKS5 front-end.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use futures::StreamExt;
use minewire::{Engine, ProxyType, TunnelConfig};
use minewire_packets::handshake::serverbound::{HandshakePacket, LoginStartPacket};
use minewire_packets::play::serverbound::{ClientSettingsPacket, PluginMessagePacket};
use minewire_packets::{AsyncReadPacket, AsyncWritePacket, Packet, VarInt};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::timeout;
use tokio_yamux::config::Config;
use tokio_yamux::session::Session;

const PASSWORD: &str = "hunter2";
const NONCE_LENGTH: usize = 12;

const CHUNK_DATA_ID: VarInt = 0x25;
const KEEP_ALIVE_ID: VarInt = 0x24;
const KEEP_ALIVE_ECHO_ID: VarInt = 0x15;
const PLAYER_POSITION_ID: VarInt = 0x14;

const KEEP_ALIVE_PROBE: i64 = 0x0123_4567_89AB_CDEF;

#[derive(Debug, PartialEq, Eq)]
enum MockEvent {
    LoggedIn { user_name: String },
    StreamOpened { destination: String },
    KeepAliveEchoed { id: i64 },
}

fn derive_cipher(password: &str) -> Aes256Gcm {
    let digest = Sha256::digest(password.as_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest))
}

fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Vec<u8> {
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .expect("seal failed");

    let mut body = Vec::with_capacity(NONCE_LENGTH + sealed.len());
    body.extend_from_slice(&nonce);
    body.extend_from_slice(&sealed);
    body
}

fn open(cipher: &Aes256Gcm, payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() < NONCE_LENGTH {
        return None;
    }
    let (nonce, sealed) = payload.split_at(NONCE_LENGTH);
    cipher.decrypt(Nonce::from_slice(nonce), sealed).ok()
}

/// Wraps a sealed payload into a full chunk-data frame the way the tunnel server does.
async fn write_chunk<W>(writer: &mut W, payload: &[u8])
where
    W: AsyncWrite + Unpin + Send,
{
    let mut body: Cursor<Vec<u8>> = Cursor::new(Vec::new());
    body.write_varint(CHUNK_DATA_ID).await.expect("id write failed");
    body.write_all(&[0u8; 8]).await.expect("position write failed");
    // an empty named compound stands in for the heightmaps blob
    body.write_all(&[0x0A, 0x00, 0x00, 0x00])
        .await
        .expect("nbt write failed");
    body.write_varint(payload.len() as VarInt)
        .await
        .expect("length write failed");
    body.write_all(payload).await.expect("payload write failed");

    let body = body.into_inner();
    let mut frame: Cursor<Vec<u8>> = Cursor::new(Vec::new());
    frame
        .write_varint(body.len() as VarInt)
        .await
        .expect("frame length write failed");
    frame.write_all(&body).await.expect("frame body write failed");

    writer
        .write_all(frame.get_ref())
        .await
        .expect("chunk write failed");
    writer.flush().await.expect("chunk flush failed");
}

/// Runs the masquerade server side of one client connection.
async fn serve_mock_connection(
    mut stream: TcpStream,
    events: UnboundedSender<MockEvent>,
    send_keep_alive_probe: bool,
) {
    let cipher = derive_cipher(PASSWORD);

    // login phase
    let handshake: HandshakePacket = stream.read_packet().await.expect("handshake read failed");
    assert_eq!(handshake.next_state, minewire_packets::State::Login);

    let login: LoginStartPacket = stream.read_packet().await.expect("login start read failed");

    // two opaque packets the client discards: login success and a first play packet
    stream
        .write_all(&[1, 0x02])
        .await
        .expect("login success write failed");
    stream
        .write_all(&[1, 0x0B])
        .await
        .expect("play packet write failed");

    let _settings: ClientSettingsPacket =
        stream.read_packet().await.expect("settings read failed");
    let _ = events.send(MockEvent::LoggedIn {
        user_name: login.user_name,
    });

    // tunnel phase
    let (mut socket_reader, socket_writer) = tokio::io::split(stream);
    let socket_writer = Arc::new(Mutex::new(socket_writer));

    if send_keep_alive_probe {
        let mut writer = socket_writer.lock().await;
        let mut frame: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        frame.write_varint(9).await.expect("length write failed");
        frame
            .write_varint(KEEP_ALIVE_ID)
            .await
            .expect("id write failed");
        frame
            .write_i64(KEEP_ALIVE_PROBE)
            .await
            .expect("probe write failed");
        writer
            .write_all(frame.get_ref())
            .await
            .expect("keep-alive write failed");
    }

    // the server-side multiplexer rides two in-process pipes
    let (mux_reader, mut payload_writer) = tokio::io::simplex(256 * 1024);
    let (mut payload_reader, mux_writer) = tokio::io::simplex(256 * 1024);
    let mut session = Session::new_server(tokio::io::join(mux_reader, mux_writer), Config::default());

    // inbound: unwrap plugin messages, record keep-alive echoes, ignore noise
    let inbound_events = events.clone();
    tokio::spawn(async move {
        loop {
            let Ok(frame) = socket_reader.read_frame().await else {
                break;
            };
            let mut body = Cursor::new(frame);
            let Ok(packet_id) = body.read_varint().await else {
                break;
            };
            match packet_id {
                id if id == PluginMessagePacket::ID => {
                    let Ok(channel) = body.read_string().await else {
                        break;
                    };
                    assert_eq!(channel, "minecraft:brand");
                    let mut payload = Vec::new();
                    body.read_to_end(&mut payload).await.expect("payload read failed");
                    if let Some(plaintext) = open(&cipher, &payload) {
                        if payload_writer.write_all(&plaintext).await.is_err() {
                            break;
                        }
                    }
                }
                id if id == KEEP_ALIVE_ECHO_ID => {
                    let id = body.read_i64().await.expect("echo id read failed");
                    let _ = inbound_events.send(MockEvent::KeepAliveEchoed { id });
                }
                id if id == PLAYER_POSITION_ID => {}
                _ => {}
            }
        }
    });

    // outbound: seal whatever the multiplexer emits into chunk-data packets
    let outbound_writer = Arc::clone(&socket_writer);
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 8 * 1024];
        loop {
            let read = match payload_reader.read(&mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(read) => read,
            };
            let sealed = seal(&derive_cipher(PASSWORD), &buffer[..read]);
            let mut writer = outbound_writer.lock().await;
            write_chunk(&mut *writer, &sealed).await;
        }
    });

    // accept tunnel streams and serve them
    while let Some(inbound) = session.next().await {
        let Ok(mut stream) = inbound else {
            break;
        };
        let stream_events = events.clone();
        tokio::spawn(async move {
            let destination = stream.read_string().await.expect("destination read failed");
            let _ = stream_events.send(MockEvent::StreamOpened {
                destination: destination.clone(),
            });

            if destination.starts_with("udp:") {
                // one u16-framed exchange, echoed back
                let length = stream.read_u16().await.expect("datagram length read failed");
                let mut payload = vec![0u8; length as usize];
                stream
                    .read_exact(&mut payload)
                    .await
                    .expect("datagram read failed");
                stream.write_u16(length).await.expect("reply length write failed");
                stream.write_all(&payload).await.expect("reply write failed");
                stream.flush().await.expect("reply flush failed");
                return;
            }

            // plain echo until the client half-closes
            let mut buffer = vec![0u8; 8 * 1024];
            loop {
                let read = match stream.read(&mut buffer).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => read,
                };
                if stream.write_all(&buffer[..read]).await.is_err() {
                    break;
                }
                if stream.flush().await.is_err() {
                    break;
                }
            }
        });
    }
}

struct Harness {
    engine: Arc<Engine>,
    local_port: u16,
    events: UnboundedReceiver<MockEvent>,
}

impl Harness {
    /// Boots a mock server plus an engine pointed at it and waits for the login to complete.
    async fn start(send_keep_alive_probe: bool) -> Harness {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("mock bind failed");
        let server = listener.local_addr().expect("mock addr failed").to_string();

        let (events_tx, mut events) = unbounded_channel();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let events = events_tx.clone();
                tokio::spawn(serve_mock_connection(stream, events, send_keep_alive_probe));
            }
        });

        let local_port = free_port().await;
        let engine = Arc::new(Engine::new());
        engine
            .start(TunnelConfig {
                local_port,
                server,
                password: PASSWORD.to_string(),
                proxy_type: ProxyType::Socks5,
            })
            .await
            .expect("engine start failed");

        let logged_in = timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("login timed out")
            .expect("mock events closed");
        assert_eq!(
            logged_in,
            MockEvent::LoggedIn {
                user_name: "Playerf52fbd32".to_string(),
            }
        );

        Harness {
            engine,
            local_port,
            events,
        }
    }

    async fn next_event(&mut self) -> MockEvent {
        timeout(Duration::from_secs(10), self.events.recv())
            .await
            .expect("event timed out")
            .expect("mock events closed")
    }

    /// Runs the SOCKS5 greeting and request, retrying while the session is still coming up.
    async fn socks_connect(&self, destination: &[u8]) -> TcpStream {
        for _ in 0..50 {
            let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, self.local_port))
                .await
                .expect("proxy connect failed");

            stream.write_all(&[0x05, 0x01, 0x00]).await.expect("greeting failed");
            let mut method = [0u8; 2];
            stream.read_exact(&mut method).await.expect("method read failed");
            assert_eq!(method, [0x05, 0x00]);

            let mut request = vec![0x05, 0x01, 0x00];
            request.extend_from_slice(destination);
            stream.write_all(&request).await.expect("request failed");

            let mut reply = [0u8; 10];
            stream.read_exact(&mut reply).await.expect("reply read failed");
            if reply[1] == 0x00 {
                return stream;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("no tunnel session became available");
    }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("probe bind failed");
    listener.local_addr().expect("probe addr failed").port()
}

#[tokio::test]
async fn tunnels_socks_connect_requests() {
    let mut harness = Harness::start(false).await;

    // CONNECT example.org:80 as a domain destination
    let mut destination = vec![0x03, 11];
    destination.extend_from_slice(b"example.org");
    destination.extend_from_slice(&80u16.to_be_bytes());
    let mut stream = harness.socks_connect(&destination).await;

    assert_eq!(
        harness.next_event().await,
        MockEvent::StreamOpened {
            destination: "example.org:80".to_string(),
        }
    );

    stream
        .write_all(b"ping through the tunnel")
        .await
        .expect("payload write failed");
    let mut echoed = vec![0u8; 23];
    stream.read_exact(&mut echoed).await.expect("echo read failed");
    assert_eq!(&echoed, b"ping through the tunnel");

    harness.engine.stop().await;
}

#[tokio::test]
async fn relays_socks_udp_datagrams() {
    let mut harness = Harness::start(false).await;

    // UDP ASSOCIATE with an any-address claim
    let mut control = TcpStream::connect((Ipv4Addr::LOCALHOST, harness.local_port))
        .await
        .expect("proxy connect failed");
    control.write_all(&[0x05, 0x01, 0x00]).await.expect("greeting failed");
    let mut method = [0u8; 2];
    control.read_exact(&mut method).await.expect("method read failed");

    control
        .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .expect("associate request failed");
    let mut reply = [0u8; 10];
    control.read_exact(&mut reply).await.expect("associate reply failed");
    assert_eq!(reply[..4], [0x05, 0x00, 0x00, 0x01]);
    let relay_port = u16::from_be_bytes([reply[8], reply[9]]);

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("udp bind failed");
    let mut datagram = vec![0x00, 0x00, 0x00, 0x01, 8, 8, 8, 8];
    datagram.extend_from_slice(&53u16.to_be_bytes());
    let query = [0xAB; 40];
    datagram.extend_from_slice(&query);

    // resend while the session is still coming up
    let mut response = vec![0u8; 64 * 1024];
    let received = 'outer: {
        for _ in 0..50 {
            socket
                .send_to(&datagram, (Ipv4Addr::LOCALHOST, relay_port))
                .await
                .expect("datagram send failed");
            if let Ok(Ok((received, _))) =
                timeout(Duration::from_millis(500), socket.recv_from(&mut response)).await
            {
                break 'outer received;
            }
        }
        panic!("no udp response arrived");
    };

    assert_eq!(
        harness.next_event().await,
        MockEvent::StreamOpened {
            destination: "udp:8.8.8.8:53".to_string(),
        }
    );
    assert_eq!(received, 10 + query.len());
    assert_eq!(response[..10], [0, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
    assert_eq!(&response[10..received], &query);

    harness.engine.stop().await;
}

#[tokio::test]
async fn echoes_keep_alive_probes() {
    let mut harness = Harness::start(true).await;

    assert_eq!(
        harness.next_event().await,
        MockEvent::KeepAliveEchoed {
            id: KEEP_ALIVE_PROBE,
        }
    );

    harness.engine.stop().await;
}

#[tokio::test]
async fn bypasses_split_tunnel_destinations() {
    let mut harness = Harness::start(false).await;

    // a direct echo server that must be reached without the tunnel
    let direct = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("direct bind failed");
    let direct_addr = direct.local_addr().expect("direct addr failed");
    tokio::spawn(async move {
        let (mut stream, _) = direct.accept().await.expect("direct accept failed");
        let mut buffer = vec![0u8; 1024];
        loop {
            let read = match stream.read(&mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(read) => read,
            };
            if stream.write_all(&buffer[..read]).await.is_err() {
                break;
            }
        }
    });

    let mut rules = tempfile::NamedTempFile::new().expect("rule file failed");
    std::io::Write::write_all(&mut rules, b"# local ranges stay direct\n127.0.0.0/8\n")
        .expect("rule write failed");
    harness
        .engine
        .update_split_rules(&[rules.path().to_path_buf()])
        .await;

    let IpAddr::V4(direct_ip) = direct_addr.ip() else {
        panic!("expected an IPv4 listener");
    };
    let mut destination = vec![0x01];
    destination.extend_from_slice(&direct_ip.octets());
    destination.extend_from_slice(&direct_addr.port().to_be_bytes());
    let mut stream = harness.socks_connect(&destination).await;

    stream.write_all(b"stay local").await.expect("payload write failed");
    let mut echoed = vec![0u8; 10];
    stream.read_exact(&mut echoed).await.expect("echo read failed");
    assert_eq!(&echoed, b"stay local");

    // the request never touched the session
    drop(stream);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(harness.events.try_recv().is_err());

    harness.engine.stop().await;
}

//! The login masquerade against the remote server.
//!
//! Everything up to the first plugin message has to be byte-identical to a vanilla client joining
//! a server, so the sequence is fixed: handshake, login start, two discarded server packets,
//! client settings. Only after that does the session switch to carrying tunnel traffic.

use crate::crypto;
use crate::error::Error;
use aes_gcm::Aes256Gcm;
use minewire_packets::handshake::serverbound::{HandshakePacket, LoginStartPacket};
use minewire_packets::play::serverbound::ClientSettingsPacket;
use minewire_packets::{AsyncReadPacket, AsyncWritePacket, ChatMode, MainHand, PROTOCOL_VERSION, State};
use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// How long the server may take to answer the login before the attempt is abandoned.
const LOGIN_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// The TCP keep-alive probe interval on the masquerade connection.
const TCP_KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// The server address announced inside the handshake packet. A vanilla client fills in whatever
/// the user typed; the masquerade always claims a local direct connection.
const ANNOUNCED_ADDRESS: &str = "127.0.0.1";

/// The server port announced inside the handshake packet (`0x63 0xDD` on the wire).
const ANNOUNCED_PORT: u16 = 25565;

/// How many server packets the login sequence consumes without interpreting them.
const DISCARDED_LOGIN_PACKETS: usize = 2;

/// Dials the server and performs the full login masquerade.
///
/// Returns the connected socket together with the session cipher. Every failure aborts the
/// attempt; the supervisor retries on its own schedule.
///
/// # Errors
///
/// Will return [`Error::DialFailed`] if the TCP connection cannot be established or configured,
/// and [`Error::HandshakeFailed`] or [`Error::HandshakeTimeout`] if the login sequence does not
/// complete.
pub(crate) async fn connect(server: &str, password: &str) -> Result<(TcpStream, Aes256Gcm), Error> {
    let mut stream = TcpStream::connect(server).await.map_err(Error::DialFailed)?;

    // an interactive game session disables Nagle and keeps the link warm
    stream.set_nodelay(true).map_err(Error::DialFailed)?;
    let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE_TIME);
    SockRef::from(&stream)
        .set_tcp_keepalive(&keepalive)
        .map_err(Error::DialFailed)?;

    login(&mut stream, password).await?;
    debug!(server, "masquerade login complete");

    Ok((stream, crypto::derive_cipher(password)))
}

/// Runs the login packet sequence on an already connected stream.
pub(crate) async fn login<S>(stream: &mut S, password: &str) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    stream
        .write_packet(HandshakePacket {
            protocol_version: PROTOCOL_VERSION,
            server_address: ANNOUNCED_ADDRESS.to_string(),
            server_port: ANNOUNCED_PORT,
            next_state: State::Login,
        })
        .await?;

    stream
        .write_packet(LoginStartPacket {
            user_name: crypto::derive_username(password),
        })
        .await?;
    stream.flush().await.map_err(minewire_packets::Error::Io)?;

    // the login success and the first play packet; their content is irrelevant to the masquerade
    timeout(LOGIN_READ_TIMEOUT, async {
        for _ in 0..DISCARDED_LOGIN_PACKETS {
            stream.read_frame().await?;
        }
        Ok::<(), minewire_packets::Error>(())
    })
    .await
    .map_err(|_| Error::HandshakeTimeout)??;

    stream
        .write_packet(ClientSettingsPacket {
            locale: "en_US".to_string(),
            view_distance: 8,
            chat_mode: ChatMode::Enabled,
            chat_colors: true,
            displayed_skin_parts: 0x7F,
            main_hand: MainHand::Right,
            text_filtering: false,
            server_listings: true,
        })
        .await?;
    stream.flush().await.map_err(minewire_packets::Error::Io)?;

    Ok(())
}

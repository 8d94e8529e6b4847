//! The SOCKS5 front-end (RFC 1928, no authentication).
//!
//! CONNECT requests become one long-lived tunnel stream each. UDP ASSOCIATE binds a loopback
//! UDP socket whose lifetime is tied to the TCP control connection; every datagram travels as its
//! own one-shot stream with `u16`-framed payloads.

use crate::error::Error;
use crate::proxy::{Destination, Host, Router};
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace};

const SOCKS_VERSION: u8 = 0x05;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REP_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// How long a UDP exchange may wait for the remote response.
const UDP_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// The fixed reply header in front of every relayed UDP response.
const UDP_RESPONSE_HEADER: [u8; 10] = [0, 0, 0, ATYP_IPV4, 0, 0, 0, 0, 0, 0];

const MAX_DATAGRAM_LENGTH: usize = 64 * 1024;

fn reply(code: u8) -> [u8; 10] {
    [SOCKS_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}

pub(crate) async fn handle_connection(mut stream: TcpStream, router: Router) -> Result<(), Error> {
    // method selection: VER NMETHODS METHODS...
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting[0] != SOCKS_VERSION {
        return Err(Error::UnsupportedSocksVersion(greeting[0]));
    }

    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&METHOD_NO_AUTH) {
        stream
            .write_all(&[SOCKS_VERSION, METHOD_NO_ACCEPTABLE])
            .await?;
        return Ok(());
    }
    stream.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;

    // request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != SOCKS_VERSION {
        return Err(Error::UnsupportedSocksVersion(request[0]));
    }

    let destination = match read_destination(&mut stream, request[3]).await {
        Ok(destination) => destination,
        Err(err @ Error::UnsupportedAddressType(_)) => {
            stream.write_all(&reply(REP_ADDRESS_NOT_SUPPORTED)).await?;
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    match request[1] {
        CMD_CONNECT => serve_connect(stream, router, destination).await,
        CMD_UDP_ASSOCIATE => serve_udp_associate(stream, router).await,
        other => {
            stream.write_all(&reply(REP_COMMAND_NOT_SUPPORTED)).await?;
            Err(Error::UnsupportedCommand(other))
        }
    }
}

async fn serve_connect(
    mut stream: TcpStream,
    router: Router,
    destination: Destination,
) -> Result<(), Error> {
    if router.should_bypass(&destination) {
        debug!(destination = destination.to_string(), "bypassing the tunnel");
        let mut upstream = match TcpStream::connect(destination.to_string()).await {
            Ok(upstream) => upstream,
            Err(err) => {
                stream.write_all(&reply(REP_GENERAL_FAILURE)).await?;
                return Err(err.into());
            }
        };
        stream.write_all(&reply(REP_SUCCESS)).await?;
        let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        return Ok(());
    }

    trace!(destination = destination.to_string(), "tunneling connect");
    let mut tunnel = match router.open_tunnel(&destination.to_string()).await {
        Ok(tunnel) => tunnel,
        Err(err) => {
            stream.write_all(&reply(REP_GENERAL_FAILURE)).await?;
            return Err(err);
        }
    };

    // the reply leaves only after the stream is open and the destination is on its way
    stream.write_all(&reply(REP_SUCCESS)).await?;
    let _ = tokio::io::copy_bidirectional(&mut stream, &mut tunnel).await;
    Ok(())
}

async fn serve_udp_associate(mut stream: TcpStream, router: Router) -> Result<(), Error> {
    let socket = match UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await {
        Ok(socket) => socket,
        Err(err) => {
            stream.write_all(&reply(REP_GENERAL_FAILURE)).await?;
            return Err(err.into());
        }
    };
    let local = socket.local_addr()?;

    let mut response = Vec::with_capacity(10);
    response.extend_from_slice(&[SOCKS_VERSION, REP_SUCCESS, 0x00, ATYP_IPV4]);
    response.extend_from_slice(&Ipv4Addr::LOCALHOST.octets());
    response.extend_from_slice(&local.port().to_be_bytes());
    stream.write_all(&response).await?;
    debug!(addr = local.to_string(), "udp associate bound");

    // the socket lives exactly as long as the TCP control connection
    let socket = Arc::new(socket);
    let mut control = [0u8; 256];
    let mut datagram = vec![0u8; MAX_DATAGRAM_LENGTH];
    loop {
        tokio::select! {
            read = stream.read(&mut control) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
            received = socket.recv_from(&mut datagram) => {
                let (length, client) = received?;
                let payload = datagram[..length].to_vec();
                let router = router.clone();
                let socket = Arc::clone(&socket);
                tokio::spawn(async move {
                    if let Err(err) = relay_datagram(router, socket, client, payload).await {
                        debug!(cause = err.to_string(), "udp datagram relay failed");
                    }
                });
            }
        }
    }

    Ok(())
}

/// Relays one SOCKS UDP datagram as a one-shot `udp:` stream.
async fn relay_datagram(
    router: Router,
    socket: Arc<UdpSocket>,
    client: SocketAddr,
    datagram: Vec<u8>,
) -> Result<(), Error> {
    // header: RSV(2) FRAG(1) ATYP(1) DST.ADDR DST.PORT
    let mut cursor = Cursor::new(datagram);
    let mut header = [0u8; 4];
    cursor.read_exact(&mut header).await?;
    if header[2] != 0 {
        trace!("dropping fragmented socks datagram");
        return Ok(());
    }

    let destination = read_destination(&mut cursor, header[3]).await?;
    let position = cursor.position() as usize;
    let payload = &cursor.get_ref()[position..];

    let mut tunnel = router.open_tunnel(&format!("udp:{destination}")).await?;
    tunnel.write_u16(payload.len() as u16).await?;
    tunnel.write_all(payload).await?;
    tunnel.flush().await?;

    let response = timeout(UDP_REPLY_TIMEOUT, async {
        let length = tunnel.read_u16().await?;
        let mut response = vec![0u8; length as usize];
        tunnel.read_exact(&mut response).await?;
        Ok::<Vec<u8>, std::io::Error>(response)
    })
    .await
    .map_err(|_| Error::Io(std::io::ErrorKind::TimedOut.into()))??;

    let mut packet = Vec::with_capacity(UDP_RESPONSE_HEADER.len() + response.len());
    packet.extend_from_slice(&UDP_RESPONSE_HEADER);
    packet.extend_from_slice(&response);
    socket.send_to(&packet, client).await?;

    Ok(())
}

/// Reads one `ATYP DST.ADDR DST.PORT` destination, shared by the TCP and UDP request formats.
async fn read_destination<R>(reader: &mut R, atyp: u8) -> Result<Destination, Error>
where
    R: AsyncRead + Unpin + Send,
{
    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            reader.read_exact(&mut octets).await?;
            Host::Ip(IpAddr::from(octets))
        }
        ATYP_DOMAIN => {
            let length = reader.read_u8().await? as usize;
            let mut name = vec![0u8; length];
            reader.read_exact(&mut name).await?;
            Host::Domain(String::from_utf8(name).map_err(|_| Error::MalformedRequest)?)
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            reader.read_exact(&mut octets).await?;
            Host::Ip(IpAddr::from(octets))
        }
        other => return Err(Error::UnsupportedAddressType(other)),
    };

    let port = reader.read_u16().await?;
    Ok(Destination { host, port })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_ipv4_destination() {
        let mut cursor = Cursor::new(vec![8, 8, 4, 4, 0, 53]);
        let destination = read_destination(&mut cursor, ATYP_IPV4)
            .await
            .expect("read failed");
        assert_eq!(destination.to_string(), "8.8.4.4:53");
    }

    #[tokio::test]
    async fn reads_domain_destination() {
        let mut data = vec![11u8];
        data.extend_from_slice(b"example.org");
        data.extend_from_slice(&443u16.to_be_bytes());
        let mut cursor = Cursor::new(data);

        let destination = read_destination(&mut cursor, ATYP_DOMAIN)
            .await
            .expect("read failed");
        assert_eq!(destination.to_string(), "example.org:443");
        assert!(destination.ip().is_none());
    }

    #[tokio::test]
    async fn reads_ipv6_destination() {
        let mut data = vec![0u8; 16];
        data[15] = 1;
        data.extend_from_slice(&8080u16.to_be_bytes());
        let mut cursor = Cursor::new(data);

        let destination = read_destination(&mut cursor, ATYP_IPV6)
            .await
            .expect("read failed");
        assert_eq!(destination.to_string(), "[::1]:8080");
    }

    #[tokio::test]
    async fn rejects_unknown_address_type() {
        let mut cursor = Cursor::new(vec![0u8; 6]);
        let result = read_destination(&mut cursor, 0x02).await;
        assert!(matches!(result, Err(Error::UnsupportedAddressType(0x02))));
    }
}

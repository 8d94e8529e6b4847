//! The HTTP CONNECT front-end.
//!
//! Only the CONNECT verb is served; after the `200 Connection Established` the socket carries raw
//! bytes and the request is indistinguishable from a SOCKS CONNECT further down. Everything else
//! is answered with a 405 and closed.

use crate::error::Error;
use crate::proxy::{Destination, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// The upper bound on the request head, matching common server defaults.
const MAX_HEAD_LENGTH: usize = 8 * 1024;

const RESPONSE_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const RESPONSE_METHOD_NOT_ALLOWED: &[u8] = b"HTTP/1.1 405 Method Not Allowed\r\n\r\n";
const RESPONSE_BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";
const RESPONSE_BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

pub(crate) async fn handle_connection(mut stream: TcpStream, router: Router) -> Result<(), Error> {
    let head = read_head(&mut stream).await?;
    let request_line = head.lines().next().ok_or(Error::MalformedRequest)?;

    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(Error::MalformedRequest)?;
    let target = parts.next().ok_or(Error::MalformedRequest)?;

    if method != "CONNECT" {
        debug!(method, "rejecting non-connect request");
        stream.write_all(RESPONSE_METHOD_NOT_ALLOWED).await?;
        return Ok(());
    }

    let Some(destination) = Destination::from_authority(target) else {
        stream.write_all(RESPONSE_BAD_REQUEST).await?;
        return Err(Error::MalformedRequest);
    };

    if router.should_bypass(&destination) {
        debug!(destination = destination.to_string(), "bypassing the tunnel");
        let mut upstream = match TcpStream::connect(destination.to_string()).await {
            Ok(upstream) => upstream,
            Err(err) => {
                stream.write_all(RESPONSE_BAD_GATEWAY).await?;
                return Err(err.into());
            }
        };
        stream.write_all(RESPONSE_ESTABLISHED).await?;
        let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        return Ok(());
    }

    trace!(destination = destination.to_string(), "tunneling connect");
    let mut tunnel = match router.open_tunnel(&destination.to_string()).await {
        Ok(tunnel) => tunnel,
        Err(err) => {
            stream.write_all(RESPONSE_BAD_GATEWAY).await?;
            return Err(err);
        }
    };

    stream.write_all(RESPONSE_ESTABLISHED).await?;
    let _ = tokio::io::copy_bidirectional(&mut stream, &mut tunnel).await;
    Ok(())
}

/// Reads the request head byte-wise up to the blank line, so no body bytes are consumed.
async fn read_head(stream: &mut TcpStream) -> Result<String, Error> {
    let mut head = Vec::new();
    loop {
        head.push(stream.read_u8().await?);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_HEAD_LENGTH {
            return Err(Error::MalformedRequest);
        }
    }

    String::from_utf8(head).map_err(|_| Error::MalformedRequest)
}

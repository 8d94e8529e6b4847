//! The local proxy front-ends.
//!
//! Both front-ends translate a local client request into one multiplexed stream whose first
//! message is the destination string; the split-tunnel matcher may divert IP-literal destinations
//! to a direct dial instead.

use crate::config::ProxyType;
use crate::error::Error;
use crate::session::Session;
use crate::split::SplitRules;
use crate::supervisor::SessionSlot;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_yamux::stream::StreamHandle;
use tracing::{debug, warn};

pub(crate) mod http;
pub(crate) mod socks5;

/// Accepts local clients and hands each connection to the selected front-end.
pub(crate) async fn serve(
    listener: TcpListener,
    proxy_type: ProxyType,
    router: Router,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, addr) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(cause = err.to_string(), "failed to accept a proxy client");
                    continue;
                }
            },
        };

        let router = router.clone();
        tokio::spawn(async move {
            let result = match proxy_type {
                ProxyType::Socks5 => socks5::handle_connection(stream, router).await,
                ProxyType::Http => http::handle_connection(stream, router).await,
            };
            if let Err(err) = result
                && !err.is_connection_closed()
            {
                debug!(
                    cause = err.to_string(),
                    addr = addr.to_string(),
                    "proxy connection ended"
                );
            }
        });
    }
    debug!(proxy = proxy_type.to_string(), "proxy listener stopped");
}

/// The shared view both front-ends route through: the current session and the bypass rules.
#[derive(Clone)]
pub(crate) struct Router {
    current: SessionSlot,
    rules: Arc<SplitRules>,
}

impl Router {
    pub(crate) fn new(current: SessionSlot, rules: Arc<SplitRules>) -> Self {
        Self { current, rules }
    }

    /// Snapshots the current session under the session mutex.
    pub(crate) async fn session(&self) -> Option<Arc<Session>> {
        self.current.lock().await.clone()
    }

    /// Whether the destination must skip the tunnel. Domain destinations never bypass; their
    /// resolution belongs to the remote end.
    pub(crate) fn should_bypass(&self, destination: &Destination) -> bool {
        destination
            .ip()
            .is_some_and(|address| self.rules.should_bypass(address))
    }

    /// Opens a tunnel stream announcing `destination`, or fails when no session is live.
    pub(crate) async fn open_tunnel(&self, destination: &str) -> Result<StreamHandle, Error> {
        let session = self.session().await.ok_or(Error::NoSession)?;
        session.open_stream(destination).await
    }
}

/// One requested forwarding target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Destination {
    pub(crate) host: Host,
    pub(crate) port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl Destination {
    /// Parses an HTTP-style authority, either `host:port` or a socket address literal.
    pub(crate) fn from_authority(value: &str) -> Option<Destination> {
        if let Ok(address) = SocketAddr::from_str(value) {
            return Some(Destination {
                host: Host::Ip(address.ip()),
                port: address.port(),
            });
        }

        let (host, port) = value.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some(Destination {
            host: Host::Domain(host.to_string()),
            port: port.parse().ok()?,
        })
    }

    pub(crate) fn ip(&self) -> Option<IpAddr> {
        match &self.host {
            Host::Ip(address) => Some(*address),
            Host::Domain(_) => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ip(address) => write!(f, "{}", SocketAddr::new(*address, self.port)),
            Host::Domain(domain) => write!(f, "{}:{}", domain, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_authorities() {
        assert_eq!(
            Destination::from_authority("example.org:443"),
            Some(Destination {
                host: Host::Domain("example.org".to_string()),
                port: 443,
            })
        );
        assert_eq!(
            Destination::from_authority("10.1.2.3:22"),
            Some(Destination {
                host: Host::Ip(IpAddr::from([10, 1, 2, 3])),
                port: 22,
            })
        );
        assert_eq!(
            Destination::from_authority("[2001:db8::1]:8080")
                .expect("parse failed")
                .to_string(),
            "[2001:db8::1]:8080"
        );

        assert!(Destination::from_authority("example.org").is_none());
        assert!(Destination::from_authority(":443").is_none());
        assert!(Destination::from_authority("example.org:http").is_none());
    }

    #[test]
    fn formats_destinations() {
        assert_eq!(
            Destination {
                host: Host::Ip(IpAddr::from([8, 8, 8, 8])),
                port: 53,
            }
            .to_string(),
            "8.8.8.8:53"
        );
        assert_eq!(
            Destination {
                host: Host::Domain("example.org".to_string()),
                port: 443,
            }
            .to_string(),
            "example.org:443"
        );
    }
}

use std::io::ErrorKind;

/// The internal error type for all failures of the tunnel engine.
///
/// Lifecycle errors surface through the control API; everything that happens inside a live session
/// is handled by tearing the session down and letting the supervisor rebuild it, so those errors
/// only ever reach the logs.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A `start` was issued while the tunnel was not stopped.
    #[error("tunnel is already running")]
    AlreadyRunning,

    /// The local proxy listener could not be bound. This is fatal for the `start`.
    #[error("failed to bind the local proxy listener: {0}")]
    ListenFailed(#[source] std::io::Error),

    /// The TCP connection to the masquerade server could not be established.
    #[error("failed to dial the server: {0}")]
    DialFailed(#[source] std::io::Error),

    /// The login sequence against the masquerade server failed.
    #[error("masquerade handshake failed: {0}")]
    HandshakeFailed(#[from] minewire_packets::Error),

    /// The login sequence did not complete within its deadline.
    #[error("masquerade handshake timed out")]
    HandshakeTimeout,

    /// A proxy request arrived while no tunnel session was live.
    #[error("no tunnel session is available")]
    NoSession,

    /// A stream could not be opened on the multiplexer in time.
    #[error("stream open timed out")]
    StreamOpenTimeout,

    /// The multiplexer reported a protocol or transport failure.
    #[error("multiplexer failure: {0}")]
    Mux(#[from] tokio_yamux::error::Error),

    /// Sealing an outbound payload failed.
    #[error("failed to seal an outbound payload")]
    SealFailed,

    /// A SOCKS client requested a command other than CONNECT or UDP ASSOCIATE.
    #[error("unsupported socks command: {0:#04x}")]
    UnsupportedCommand(u8),

    /// A SOCKS client announced an unknown address type.
    #[error("unsupported socks address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    /// A SOCKS client spoke a protocol version other than 5.
    #[error("unsupported socks version: {0:#04x}")]
    UnsupportedSocksVersion(u8),

    /// An HTTP client sent a request head the proxy cannot serve.
    #[error("malformed http request")]
    MalformedRequest,

    /// A connection link could not be parsed.
    #[error("invalid connection link: {0}")]
    ParseLink(String),

    /// A proxy type string was not recognized.
    #[error("unknown proxy type: {0}")]
    UnknownProxyType(String),

    /// An error occurred while reading or writing to an underlying byte stream.
    #[error("error reading or writing data: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_connection_closed(&self) -> bool {
        let err = match self {
            Error::Io(err) => err,
            Error::HandshakeFailed(minewire_packets::Error::Io(err)) => err,
            _ => return false,
        };
        err.kind() == ErrorKind::UnexpectedEof
            || err.kind() == ErrorKind::ConnectionReset
            || err.kind() == ErrorKind::ConnectionAborted
            || err.kind() == ErrorKind::BrokenPipe
    }
}

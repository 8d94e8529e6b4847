//! The multiplexed tunnel session.
//!
//! One session owns one frame channel and runs a yamux client on top of it. Every proxy request
//! becomes one yamux stream whose first message is the length-prefixed destination string; the
//! remote end dials out and splices bytes from there on.

use crate::error::Error;
use crate::frame::FrameChannel;
use crate::noise;
use aes_gcm::Aes256Gcm;
use futures::StreamExt;
use minewire_packets::AsyncWritePacket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_yamux::config::Config;
use tokio_yamux::Control;
use tokio_yamux::session::Session as MuxSession;
use tokio_yamux::stream::StreamHandle;
use tracing::{debug, trace};

/// The yamux keep-alive ping interval.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long a blocked connection write may stall before the multiplexer gives up.
const CONNECTION_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// The per-stream receive window cap.
const MAX_STREAM_WINDOW: u32 = 512 * 1024;

/// How long a stream open may take before the request fails.
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// One live tunnel session. Destroyed by [`Session::close`] or by any transport fault.
pub(crate) struct Session {
    control: Control,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl Session {
    /// Builds the frame channel over a logged-in connection, spawns its background tasks and
    /// starts the multiplexer client.
    pub(crate) fn establish<S>(stream: S, cipher: Aes256Gcm) -> Session
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let (channel, sink) = FrameChannel::open(stream, cipher, shutdown.clone());
        noise::spawn(sink, shutdown.clone());

        let config = Config {
            enable_keepalive: true,
            keepalive_interval: KEEP_ALIVE_INTERVAL,
            connection_write_timeout: CONNECTION_WRITE_TIMEOUT,
            max_stream_window_size: MAX_STREAM_WINDOW,
            ..Config::default()
        };
        let mut inner = MuxSession::new_client(channel, config);
        let control = inner.control();

        let closed = Arc::new(AtomicBool::new(false));
        let driver_closed = Arc::clone(&closed);
        let driver_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = driver_shutdown.cancelled() => break,
                    inbound = inner.next() => match inbound {
                        // the protocol has no server-initiated streams
                        Some(Ok(stream)) => {
                            trace!("dropping unsolicited inbound stream");
                            drop(stream);
                        }
                        Some(Err(err)) => {
                            debug!(cause = err.to_string(), "multiplexed session ended");
                            break;
                        }
                        None => break,
                    }
                }
            }
            driver_closed.store(true, Ordering::Release);
            driver_shutdown.cancel();
        });

        Session {
            control,
            closed,
            shutdown,
        }
    }

    /// Opens a stream to `destination` and writes the length-prefixed destination string.
    ///
    /// # Errors
    ///
    /// Will return [`Error::StreamOpenTimeout`] when the open is not acknowledged in time and
    /// [`Error::Mux`] or [`Error::Io`] for transport failures.
    pub(crate) async fn open_stream(&self, destination: &str) -> Result<StreamHandle, Error> {
        let mut control = self.control.clone();
        let mut stream = timeout(STREAM_OPEN_TIMEOUT, control.open_stream())
            .await
            .map_err(|_| Error::StreamOpenTimeout)??;

        if let Err(err) = stream.write_string(destination).await {
            return Err(match err {
                minewire_packets::Error::Io(io) => Error::Io(io),
                other => Error::Io(std::io::Error::other(other)),
            });
        }
        stream.flush().await?;

        Ok(stream)
    }

    /// Whether the underlying transport or multiplexer has died.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.shutdown.is_cancelled()
    }

    /// Tears the session down by cancelling every task that belongs to it; the frame channel
    /// closes the socket on its way out.
    pub(crate) fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

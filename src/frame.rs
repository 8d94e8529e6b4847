//! The obfuscated frame channel.
//!
//! One channel owns one TCP connection that has completed the login masquerade. To the
//! multiplexer above it behaves like a plain byte duplex; on the wire every write leaves as a
//! serverbound plugin message carrying `nonce ‖ ciphertext ‖ tag`, and reads are recovered from
//! clientbound chunk-data packets of the same payload shape. All other inbound packets are either
//! answered (keep-alive) or discarded, so the connection keeps looking like an idle player.

use crate::crypto;
use aes_gcm::Aes256Gcm;
use minewire_packets::play::clientbound;
use minewire_packets::play::serverbound::{KeepAlivePacket, PluginMessagePacket};
use minewire_packets::{AsyncReadPacket, AsyncWritePacket, WritePacket};
use std::fmt::Debug;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, SimplexStream,
    WriteHalf,
};
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// The plugin-message channel that outbound payloads are addressed to.
const PAYLOAD_CHANNEL: &str = "minecraft:brand";

/// The write buffer is flushed as soon as it holds this many bytes.
pub(crate) const FLUSH_THRESHOLD: usize = 4096;

/// A non-empty write buffer is flushed this long after its first append at the latest.
pub(crate) const FLUSH_DELAY: Duration = Duration::from_millis(5);

/// The initial capacity of the write buffer.
const WRITE_BUFFER_CAPACITY: usize = 16 * 1024;

/// The capacity of the in-process pipe between the reader task and the multiplexer.
const PIPE_CAPACITY: usize = 64 * 1024;

/// The fixed chunk-position prefix of a chunk-data packet body.
const CHUNK_HEADER_LENGTH: usize = 8;

/// A byte duplex that disguises its traffic as a Minecraft play session.
///
/// Writes are buffered and sealed into plugin messages by a flusher task; reads surface whatever
/// the reader task recovered from chunk-data packets. Dropping the channel (or cancelling its
/// token) tears both tasks and the socket down; unflushed data is lost and the layers above see a
/// torn connection.
pub(crate) struct FrameChannel {
    shared: Arc<Shared>,
    plain: ReadHalf<SimplexStream>,
}

struct Shared {
    buffer: Mutex<Vec<u8>>,
    dirty: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn buffered(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn take(&self) -> Vec<u8> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *buffer, Vec::with_capacity(WRITE_BUFFER_CAPACITY))
    }
}

/// The serialized write side of the masquerade socket.
///
/// The flusher, the keep-alive echo and the noise generator all emit whole packets through this
/// sink; the mutex guarantees that their frames never interleave.
#[derive(Clone)]
pub(crate) struct PacketSink {
    inner: Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl PacketSink {
    fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(Box::new(writer))),
        }
    }

    pub(crate) async fn send<T>(&self, packet: T) -> Result<(), minewire_packets::Error>
    where
        T: WritePacket + Send + Debug,
    {
        let mut writer = self.inner.lock().await;
        writer.write_packet(packet).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        let mut writer = self.inner.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl FrameChannel {
    /// Wraps a logged-in masquerade connection and spawns its flusher and reader tasks.
    ///
    /// The returned [`PacketSink`] shares the write side of the socket; the noise generator sends
    /// its position packets through it. Cancelling `shutdown` stops both tasks and closes the
    /// socket.
    pub(crate) fn open<S>(
        stream: S,
        cipher: Aes256Gcm,
        shutdown: CancellationToken,
    ) -> (FrameChannel, PacketSink)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (socket_reader, socket_writer) = tokio::io::split(stream);
        let sink = PacketSink::new(socket_writer);

        let (plain, recovered) = tokio::io::simplex(PIPE_CAPACITY);
        let shared = Arc::new(Shared {
            buffer: Mutex::new(Vec::with_capacity(WRITE_BUFFER_CAPACITY)),
            dirty: Notify::new(),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(flush_loop(
            Arc::clone(&shared),
            cipher.clone(),
            sink.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(read_loop(
            socket_reader,
            cipher,
            sink.clone(),
            recovered,
            shutdown,
        ));

        (FrameChannel { shared, plain }, sink)
    }
}

impl AsyncWrite for FrameChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let shared = &self.get_mut().shared;
        if shared.closed.load(Ordering::Acquire) {
            return Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()));
        }

        {
            let mut buffer = shared.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.extend_from_slice(buf);
        }
        shared.dirty.notify_one();

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        // flushing is owned by the flusher task; a flush request only wakes it early
        self.get_mut().shared.dirty.notify_one();
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let shared = &self.get_mut().shared;
        shared.closed.store(true, Ordering::Release);
        shared.dirty.notify_one();
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for FrameChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().plain).poll_read(cx, buf)
    }
}

/// Drains the write buffer into sealed plugin messages.
///
/// Each round waits for the first append, then either for the threshold or for the deadline,
/// whichever comes first, and emits exactly one plugin message per flush.
async fn flush_loop(
    shared: Arc<Shared>,
    cipher: Aes256Gcm,
    sink: PacketSink,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = shared.dirty.notified() => {}
        }
        if shared.buffered() == 0 {
            if shared.closed.load(Ordering::Acquire) {
                break;
            }
            continue;
        }

        let deadline = Instant::now() + FLUSH_DELAY;
        while shared.buffered() < FLUSH_THRESHOLD {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = shared.dirty.notified() => {}
                () = sleep_until(deadline) => break,
            }
        }

        let plaintext = shared.take();
        if plaintext.is_empty() {
            continue;
        }

        let Ok(body) = crypto::seal(&cipher, &plaintext) else {
            debug!("sealing an outbound payload failed, tearing the channel down");
            break;
        };

        let packet = PluginMessagePacket {
            channel: PAYLOAD_CHANNEL.to_string(),
            data: body,
        };
        if let Err(err) = sink.send(packet).await {
            debug!(cause = err.to_string(), "flush failed, tearing the channel down");
            break;
        }
    }

    shared.closed.store(true, Ordering::Release);
    shutdown.cancel();
}

/// Reads Minecraft packets off the socket and dispatches them.
///
/// Chunk-data packets feed the pipe after authentication, keep-alives are echoed ahead of any
/// buffered application data, everything else is discarded. Any read failure or length-bound
/// violation ends the session.
async fn read_loop<R>(
    mut socket: R,
    cipher: Aes256Gcm,
    sink: PacketSink,
    mut pipe: WriteHalf<SimplexStream>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Send + Unpin,
{
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            frame = socket.read_frame() => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(cause = err.to_string(), "masquerade read ended");
                break;
            }
        };

        let mut body = Cursor::new(frame);
        let Ok(packet_id) = body.read_varint().await else {
            break;
        };

        match packet_id {
            clientbound::CHUNK_DATA_ID => {
                if recover_payload(&cipher, &mut body, &mut pipe).await.is_err() {
                    debug!("recovered-payload pipe closed, ending masquerade read");
                    break;
                }
            }
            clientbound::KEEP_ALIVE_ID => {
                let Ok(id) = body.read_i64().await else {
                    break;
                };
                if let Err(err) = sink.send(KeepAlivePacket { id }).await {
                    debug!(cause = err.to_string(), "keep-alive echo failed");
                    break;
                }
            }
            _ => trace!(packet_id, "ignoring packet"),
        }
    }

    let _ = pipe.shutdown().await;
    sink.close().await;
    shutdown.cancel();
}

/// Extracts the tunnel payload of one chunk-data packet and forwards the plaintext.
///
/// Anything that fails before the pipe write is dropped silently: genuine chunk packets parse
/// fine but carry payloads that cannot authenticate, and malformed ones are not worth a
/// teardown. Only a pipe failure is fatal.
async fn recover_payload(
    cipher: &Aes256Gcm,
    body: &mut Cursor<Vec<u8>>,
    pipe: &mut WriteHalf<SimplexStream>,
) -> Result<(), std::io::Error> {
    let mut header = [0u8; CHUNK_HEADER_LENGTH];
    if body.read_exact(&mut header).await.is_err() {
        return Ok(());
    }

    // the heightmaps blob sits between the chunk position and the data section
    let position = body.position() as usize;
    let Ok(skipped) = minewire_packets::nbt::skip_named(&body.get_ref()[position..]) else {
        return Ok(());
    };
    body.set_position((position + skipped) as u64);

    let Ok(length) = body.read_varint().await else {
        return Ok(());
    };
    let length = length.max(0) as usize;
    if length < crypto::NONCE_LENGTH || body.get_ref().len() - (body.position() as usize) < length {
        return Ok(());
    }

    let mut payload = vec![0; length];
    if body.read_exact(&mut payload).await.is_err() {
        return Ok(());
    }

    let Some(plaintext) = crypto::open(cipher, &payload) else {
        trace!("dropping chunk payload that does not authenticate");
        return Ok(());
    };

    pipe.write_all(&plaintext).await
}

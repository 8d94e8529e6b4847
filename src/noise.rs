//! Background noise on the masquerade connection.
//!
//! A real player's client sends movement packets continuously; a silent socket between
//! application bursts would stand out to an observer. The generator emits one position packet per
//! second with a sub-block drift, which reads as a player standing mostly still.

use crate::frame::PacketSink;
use minewire_packets::play::serverbound::PlayerPositionPacket;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const NOISE_INTERVAL: Duration = Duration::from_secs(1);

const BASE_X: f64 = 100.5;
const BASE_Y: f64 = 64.0;
const BASE_Z: f64 = 100.5;

/// Spawns the noise task for one session. It stops when the token is cancelled or the sink dies.
pub(crate) fn spawn(sink: PacketSink, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = interval(NOISE_INTERVAL);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let drift = jitter();
            let packet = PlayerPositionPacket {
                x: BASE_X + drift,
                y: BASE_Y,
                z: BASE_Z + drift,
                on_ground: true,
            };
            if let Err(err) = sink.send(packet).await {
                debug!(cause = err.to_string(), "position packet failed, stopping noise");
                break;
            }
        }
    });
}

/// A sub-block offset derived from the nanosecond clock, at most 0.02 blocks.
fn jitter() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or_default();
    f64::from(nanos % 100) / 5000.0
}

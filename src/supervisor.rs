//! Keeps one tunnel session alive.
//!
//! The supervisor is the only writer of the current-session slot. Every tick it checks the slot
//! under the session mutex and, if the session is gone or dead, unpublishes it before dialing a
//! replacement. Proxy tasks snapshot the slot under the same mutex and then work lock-free, so at
//! no point are two sessions visible as current.

use crate::handshake;
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The pause between reconnect checks. There is no further back-off; a failed dial simply waits
/// for the next tick.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// The slot holding the at-most-one current session.
pub(crate) type SessionSlot = Arc<Mutex<Option<Arc<Session>>>>;

/// Runs the reconnect loop until the token is cancelled.
pub(crate) async fn run(
    server: String,
    password: String,
    current: SessionSlot,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(RECONNECT_INTERVAL);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        ensure_session(&server, &password, &current).await;
    }
    debug!("session supervisor stopped");
}

async fn ensure_session(server: &str, password: &str, current: &SessionSlot) {
    let mut slot = current.lock().await;

    if let Some(session) = slot.as_ref()
        && !session.is_closed()
    {
        return;
    }
    if let Some(dead) = slot.take() {
        debug!("releasing a dead session");
        dead.close();
    }

    match handshake::connect(server, password).await {
        Ok((stream, cipher)) => {
            *slot = Some(Arc::new(Session::establish(stream, cipher)));
            info!(server, "tunnel session established");
        }
        Err(err) => {
            warn!(
                cause = err.to_string(),
                server, "failed to establish a tunnel session"
            );
        }
    }
}

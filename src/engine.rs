//! The control surface of the tunnel.
//!
//! One [`Engine`] value owns the whole lifecycle: the state machine, the session slot and the
//! split-tunnel rules. All external entry points go through it. The state lock is never held
//! across a resource close; captured resources are closed after it is released, and the lock
//! order is always engine state before session slot.

use crate::config::TunnelConfig;
use crate::error::Error;
use crate::proxy::{self, Router};
use crate::split::SplitRules;
use crate::supervisor::{self, SessionSlot};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The deadline for a [`Engine::ping`] dial.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Lifecycle {
    state: State,
    shutdown: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// The tunnel engine. One instance per process.
pub struct Engine {
    lifecycle: Mutex<Lifecycle>,
    current: SessionSlot,
    rules: Arc<SplitRules>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle {
                state: State::Stopped,
                shutdown: None,
                tasks: Vec::new(),
            }),
            current: SessionSlot::default(),
            rules: Arc::new(SplitRules::new()),
        }
    }

    /// Starts the tunnel: binds the proxy listener, then spawns the supervisor and the selected
    /// front-end. Returns as soon as both are running; the first dial happens asynchronously.
    ///
    /// # Errors
    ///
    /// Will return [`Error::AlreadyRunning`] unless the engine is stopped, and
    /// [`Error::ListenFailed`] when the local port cannot be bound (which leaves the engine
    /// stopped).
    pub async fn start(&self, config: TunnelConfig) -> Result<(), Error> {
        let residual = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.state != State::Stopped {
                return Err(Error::AlreadyRunning);
            }
            lifecycle.state = State::Starting;
            self.current.lock().await.take()
        };
        // a leftover session can only exist after an unclean stop; drop it before dialing anew
        if let Some(residual) = residual {
            residual.close();
        }

        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, config.local_port)).await {
            Ok(listener) => listener,
            Err(err) => {
                self.lifecycle.lock().await.state = State::Stopped;
                return Err(Error::ListenFailed(err));
            }
        };

        let shutdown = CancellationToken::new();
        let router = Router::new(Arc::clone(&self.current), Arc::clone(&self.rules));

        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.tasks.push(tokio::spawn(supervisor::run(
            config.server.clone(),
            config.password.clone(),
            Arc::clone(&self.current),
            shutdown.clone(),
        )));
        lifecycle.tasks.push(tokio::spawn(proxy::serve(
            listener,
            config.proxy_type,
            router,
            shutdown.clone(),
        )));
        lifecycle.shutdown = Some(shutdown);
        lifecycle.state = State::Running;

        info!(
            port = config.local_port,
            server = config.server,
            proxy = config.proxy_type.to_string(),
            "tunnel started"
        );
        Ok(())
    }

    /// Stops the tunnel. A no-op unless the engine is running.
    ///
    /// The cancellation token and the task handles are captured under the lock and acted on after
    /// it is released; the current session is destroyed last.
    pub async fn stop(&self) {
        let (shutdown, tasks) = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.state != State::Running {
                return;
            }
            lifecycle.state = State::Stopping;
            (
                lifecycle.shutdown.take(),
                std::mem::take(&mut lifecycle.tasks),
            )
        };

        if let Some(shutdown) = shutdown {
            shutdown.cancel();
        }
        for task in tasks {
            task.abort();
        }

        let session = self.current.lock().await.take();
        if let Some(session) = session {
            debug!("destroying the current session");
            session.close();
        }

        self.lifecycle.lock().await.state = State::Stopped;
        info!("tunnel stopped");
    }

    /// Whether the engine is in the running state.
    pub async fn is_active(&self) -> bool {
        self.lifecycle.lock().await.state == State::Running
    }

    /// Measures the raw TCP dial time to `server` in milliseconds, `-1` on any failure. Does not
    /// touch the session state.
    pub async fn ping(&self, server: &str) -> i64 {
        let started = Instant::now();
        match timeout(PING_TIMEOUT, TcpStream::connect(server)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
            }
            _ => -1,
        }
    }

    /// Replaces the split-tunnel rules. Safe in any engine state.
    pub async fn update_split_rules(&self, paths: &[PathBuf]) {
        self.rules.update(paths).await;
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyType;

    fn config(local_port: u16) -> TunnelConfig {
        TunnelConfig {
            local_port,
            server: "127.0.0.1:1".to_string(),
            password: "hunter2".to_string(),
            proxy_type: ProxyType::Socks5,
        }
    }

    #[tokio::test]
    async fn rejects_double_start() {
        let engine = Engine::new();
        engine.start(config(0)).await.expect("start failed");

        let result = engine.start(config(0)).await;
        assert!(matches!(result, Err(Error::AlreadyRunning)));

        engine.stop().await;
    }

    #[tokio::test]
    async fn runs_through_the_lifecycle() {
        let engine = Engine::new();
        assert!(!engine.is_active().await);

        engine.start(config(0)).await.expect("start failed");
        assert!(engine.is_active().await);

        engine.stop().await;
        assert!(!engine.is_active().await);

        // a stopped engine accepts a fresh start
        engine.start(config(0)).await.expect("restart failed");
        engine.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let engine = Engine::new();
        engine.stop().await;
        assert!(!engine.is_active().await);
    }

    #[tokio::test]
    async fn reports_listen_failures() {
        let holder = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind failed");
        let port = holder.local_addr().expect("local addr failed").port();

        let engine = Engine::new();
        let result = engine.start(config(port)).await;
        assert!(matches!(result, Err(Error::ListenFailed(_))));
        assert!(!engine.is_active().await);
    }

    #[tokio::test]
    async fn ping_reports_failure_as_negative() {
        let engine = Engine::new();
        // nothing listens on a reserved port of the discard service
        assert_eq!(engine.ping("127.0.0.1:9").await, -1);
    }

    #[tokio::test]
    async fn ping_measures_reachable_servers() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind failed");
        let addr = listener.local_addr().expect("local addr failed");
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let engine = Engine::new();
        assert!(engine.ping(&addr.to_string()).await >= 0);
    }
}

/**
 * ALIVE - Suivi de la joignabilité d'un PC par ping périodique
 *
 * One `AliveMonitor` per PC. The first probe is awaited in `start`, so
 * `last_alive()` is meaningful as soon as the handle exists; a background task
 * then re-probes at a fixed cadence and calls every listener on every tick,
 * changed or not. Deciding whether a value is worth forwarding is the
 * listener's job.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Délai de réponse accordé à chaque ping.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

// hard ceiling around a probe, in case a prober ignores its timeout
const PROBE_DEADLINE: Duration = Duration::from_secs(3);

#[async_trait]
pub trait Prober: Send + Sync {
    /// `Ok(true)` when the host answered within `timeout`.
    async fn probe(&self, address: &str, timeout: Duration) -> io::Result<bool>;
}

/// Ping via the system `ping` binary (no raw socket privileges needed).
#[derive(Debug, Default, Clone, Copy)]
pub struct PingProber;

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, address: &str, probe_timeout: Duration) -> io::Result<bool> {
        if address.is_empty() || address.starts_with('-') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to ping {address:?}"),
            ));
        }

        let mut cmd = Command::new("ping");
        cmd.args(ping_args(address, probe_timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let status = timeout(probe_timeout + Duration::from_secs(1), cmd.status())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "ping did not exit in time"))??;
        Ok(status.success())
    }
}

fn ping_args(address: &str, probe_timeout: Duration) -> Vec<String> {
    let secs = probe_timeout.as_secs().max(1).to_string();
    if cfg!(target_os = "windows") {
        let ms = probe_timeout.as_millis().max(1).to_string();
        vec!["-n".into(), "1".into(), "-w".into(), ms, address.into()]
    } else if cfg!(target_os = "macos") {
        vec!["-c".into(), "1".into(), "-t".into(), secs, address.into()]
    } else {
        vec!["-c".into(), "1".into(), "-W".into(), secs, address.into()]
    }
}

type Listener = Box<dyn Fn(bool) + Send + Sync>;

struct AliveState {
    last_alive: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
}

pub struct AliveMonitor {
    address: String,
    state: Arc<AliveState>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl AliveMonitor {
    /// Probe once, then keep probing every `poll_interval` in the background.
    pub async fn start(
        address: impl Into<String>,
        poll_interval: Duration,
        prober: Arc<dyn Prober>,
    ) -> Self {
        let address = address.into();
        let initial = probe_once(prober.as_ref(), &address).await;
        debug!(address = %address, alive = initial, "initial probe");

        let state = Arc::new(AliveState {
            last_alive: AtomicBool::new(initial),
            listeners: Mutex::new(Vec::new()),
        });

        let poller = tokio::spawn(poll_loop(
            address.clone(),
            poll_interval.max(Duration::from_millis(1)),
            prober,
            Arc::clone(&state),
        ));

        Self {
            address,
            state,
            poller: Mutex::new(Some(poller)),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Result of the most recently completed probe.
    pub fn last_alive(&self) -> bool {
        self.state.last_alive.load(Ordering::Acquire)
    }

    /// Called from the polling task on every tick, in registration order.
    /// A listener must not call back into `add_listener` or `close`.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.state.listeners.lock().push(Box::new(listener));
    }

    /// Stops polling without waiting for an in-flight probe, drops listeners.
    pub fn close(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
            debug!(address = %self.address, "alive monitor closed");
        }
        self.state.listeners.lock().clear();
    }
}

impl Drop for AliveMonitor {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().take() {
            poller.abort();
        }
    }
}

async fn probe_once(prober: &dyn Prober, address: &str) -> bool {
    match timeout(PROBE_DEADLINE, prober.probe(address, PROBE_TIMEOUT)).await {
        Ok(Ok(alive)) => alive,
        Ok(Err(e)) => {
            warn!(address = %address, error = %e, "error pinging host");
            false
        }
        Err(_) => {
            warn!(address = %address, "probe exceeded {:?}", PROBE_DEADLINE);
            false
        }
    }
}

async fn poll_loop(address: String, period: Duration, prober: Arc<dyn Prober>, state: Arc<AliveState>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let alive = probe_once(prober.as_ref(), &address).await;
        state.last_alive.store(alive, Ordering::Release);
        trace!(address = %address, alive, "tick");

        let listeners = state.listeners.lock();
        for listener in listeners.iter() {
            listener(alive);
        }
    }
}

//! # Overlay Service
//!
//! Runs the topology manager on a dedicated `overlay-network` thread.
//!
//! The worker owns a current-thread tokio runtime and ticks the [`Network`]
//! on a fixed interval. Every tick waits a bounded time for the network lock;
//! when the lock stays contended the tick is skipped, logged and counted, and
//! never queued for later.
//!
//! ## Lifecycle
//! - [`Overlay::start`] spawns the worker, which activates the network and
//!   starts its listeners before `start` returns
//! - [`Overlay::stop`] signals the worker, which deactivates the network,
//!   shuts down its listeners and aborts every connection, then joins it
//!
//! ## Usage
//! ```rust,no_run
//! # use overlay_protocol::config::NetworkConfig;
//! # use overlay_protocol::network::Services;
//! # use overlay_protocol::service::overlay::Overlay;
//! # fn services() -> Services { unimplemented!() }
//! let overlay = Overlay::new(&NetworkConfig::default(), services())?;
//! overlay.start()?;
//! // ...
//! overlay.stop()?;
//! # Ok::<(), overlay_protocol::error::ProtocolError>(())
//! ```

use std::sync::{mpsc as std_mpsc, Arc, Mutex as StdMutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::config::NetworkConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::network::manager::Network;
use crate::network::services::Services;
use crate::utils::metrics::Metrics;
use crate::utils::time::unix_now;

/// Name of the network worker thread
pub const WORKER_THREAD_NAME: &str = "overlay-network";

#[derive(Debug, Clone, Copy)]
struct TickSettings {
    interval: Duration,
    lock_timeout: Duration,
}

struct Worker {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

/// Start/stop handle for the network worker.
pub struct Overlay {
    network: Arc<Mutex<Network>>,
    metrics: Arc<Metrics>,
    settings: TickSettings,
    worker: StdMutex<Option<Worker>>,
}

impl Overlay {
    /// Validate `config` and build the network it describes.
    pub fn new(config: &NetworkConfig, services: Services) -> Result<Self> {
        config.validate_strict()?;
        let network = Network::new(config, services)?;
        Ok(Self::with_network(network, config))
    }

    /// Wrap an already built network, taking tick timing from `config`.
    pub fn with_network(network: Network, config: &NetworkConfig) -> Self {
        let metrics = network.metrics();
        Self {
            network: Arc::new(Mutex::new(network)),
            metrics,
            settings: TickSettings {
                interval: config.node.tick_interval,
                lock_timeout: config.node.tick_lock_timeout,
            },
            worker: StdMutex::new(None),
        }
    }

    /// Shared handle to the network. Holding its lock delays worker ticks.
    pub fn network(&self) -> Arc<Mutex<Network>> {
        Arc::clone(&self.network)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().map(|w| w.is_some()).unwrap_or(false)
    }

    /// Spawn the worker and wait until the network is active and listening.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        let mut slot = self
            .worker
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;
        if slot.is_some() {
            return Err(ProtocolError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let network = Arc::clone(&self.network);
        let metrics = Arc::clone(&self.metrics);
        let settings = self.settings;

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(network, metrics, settings, shutdown_rx, ready_tx))
            .map_err(|e| ProtocolError::Custom(format!("{}: {e}", constants::ERR_WORKER_SPAWN)))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(ProtocolError::Custom(constants::ERR_WORKER_PANICKED.to_string())));
        if let Err(e) = ready {
            let _ = handle.join();
            return Err(e);
        }

        *slot = Some(Worker {
            shutdown_tx,
            handle,
        });
        info!("Overlay started");
        Ok(())
    }

    /// Signal the worker to tear down and wait for it to exit.
    #[instrument(skip(self))]
    pub fn stop(&self) -> Result<()> {
        let worker = self
            .worker
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?
            .take()
            .ok_or(ProtocolError::NotRunning)?;

        // A full channel means a stop is already pending
        let _ = worker.shutdown_tx.try_send(());
        let result = worker
            .handle
            .join()
            .map_err(|_| ProtocolError::Custom(constants::ERR_WORKER_PANICKED.to_string()))?;
        info!("Overlay stopped");
        result
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!(error = %e, "Overlay worker did not stop cleanly");
            }
        }
    }
}

fn run_worker(
    network: Arc<Mutex<Network>>,
    metrics: Arc<Metrics>,
    settings: TickSettings,
    mut shutdown_rx: mpsc::Receiver<()>,
    ready_tx: std_mpsc::Sender<Result<()>>,
) -> Result<()> {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready_tx.send(Err(ProtocolError::Custom(format!(
                "{}: {e}",
                constants::ERR_WORKER_SPAWN
            ))));
            return Err(ProtocolError::Io(e));
        }
    };

    runtime.block_on(async move {
        {
            let mut net = network.lock().await;
            net.activate();
            if let Err(e) = net.setup() {
                warn!(error = %e, "Network setup failed");
                net.deactivate();
                net.cleanup();
                let _ = ready_tx.send(Err(e));
                return Ok(());
            }
        }
        let _ = ready_tx.send(Ok(()));
        info!(
            interval_ms = settings.interval.as_millis() as u64,
            "Network worker running"
        );

        let mut interval = tokio::time::interval(settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Network worker received shutdown");
                    break;
                }
                _ = interval.tick() => {
                    tick(&network, &metrics, settings.lock_timeout).await;
                }
            }
        }

        let mut net = network.lock().await;
        net.deactivate();
        net.cleanup();
        Ok(())
    })
}

async fn tick(network: &Mutex<Network>, metrics: &Metrics, lock_timeout: Duration) {
    match tokio::time::timeout(lock_timeout, network.lock()).await {
        Ok(mut net) => {
            if let Err(e) = net.on_timer(unix_now()) {
                if e.is_format_error() {
                    metrics.format_error();
                }
                warn!(error = %e, "Maintenance tick failed");
            }
        }
        Err(_) => {
            metrics.tick_skipped();
            warn!(
                timeout_ms = lock_timeout.as_millis() as u64,
                "Network core overloaded, tick skipped"
            );
        }
    }
}

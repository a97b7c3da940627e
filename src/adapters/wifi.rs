//! WiFi station-mode connectivity manager.
//!
//! Owns the station link lifecycle: driver bring-up, the link task that runs
//! [`LinkStateMachine`], bounded reconnects and the caller-facing
//! [`ConnectivityManager::connect`] wait.
//!
//! ```text
//!  platform handler ──try_send──▶ ┌──────────────┐   driver.start/connect
//!  connect()        ──send──────▶ │  link task   │ ───────────────────────▶ WifiDriver
//!                                 │ (one event   │
//!  connect() wait  ◀──Signal───── │  at a time)  │
//!                                 └──────────────┘
//! ```
//!
//! ## cfg gating
//!
//! The manager itself is platform independent.  The radio behind it is
//! [`EspWifiDriver`](crate::drivers::wifi::EspWifiDriver) on target and
//! [`SimWifiDriver`](crate::drivers::wifi::SimWifiDriver) on the host.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use core::time::Duration;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use log::{debug, error, info, warn};

use crate::adapters::nvs::{Kvs, StorageError};
use crate::adapters::settings;
use crate::app::link::{ConnectionState, LinkAction, LinkEvent, LinkStateMachine};
use crate::app::ports::{NvsBackend, WifiDriver, WifiDriverError};
use crate::config::{CONNECT_TIMEOUT, MAX_RETRIES};
use crate::drivers::task_pin::{self, Core};
use crate::wait::block_on_timeout;

/// Pending link events.  Platform handlers drop events when this is full.
const EVENT_DEPTH: usize = 16;

/// Reason reported when the driver refuses a connect request outright
/// (`WIFI_REASON_UNSPECIFIED`).
const REASON_UNSPECIFIED: u8 = 1;

/// Bound on handing `Shutdown` to the link task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

const LINK_TASK_PRIORITY: u8 = 5;
const LINK_TASK_STACK_KB: usize = 4;

// ───────────────────────────────────────────────────────────────
// Errors and configuration
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    NotInitialized,
    /// Credentials could not be loaded from the KVS.
    Credentials(StorageError),
    Driver(WifiDriverError),
    /// The link task could not be created.
    ResourceExhausted,
    /// Retries exhausted without obtaining an address.
    ConnectFailed,
    /// Neither outcome arrived within the connect timeout.
    Timeout,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "connectivity not initialised"),
            Self::Credentials(e) => write!(f, "WiFi credentials: {}", e),
            Self::Driver(e) => write!(f, "WiFi driver: {}", e),
            Self::ResourceExhausted => write!(f, "could not allocate link task"),
            Self::ConnectFailed => write!(f, "WiFi connection failed"),
            Self::Timeout => write!(f, "WiFi connection timed out"),
        }
    }
}

impl std::error::Error for ConnectivityError {}

impl From<WifiDriverError> for ConnectivityError {
    fn from(e: WifiDriverError) -> Self {
        Self::Driver(e)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectivityConfig {
    /// Upper bound on [`ConnectivityManager::connect`].
    pub connect_timeout: Duration,
    /// Connect attempts per cycle, the first one included.
    pub max_retries: u8,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Shared link state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkOutcome {
    Connected,
    Failed,
}

struct LinkShared {
    events: Channel<CriticalSectionRawMutex, LinkEvent, EVENT_DEPTH>,
    outcome: Signal<CriticalSectionRawMutex, LinkOutcome>,
    connected: AtomicBool,
    state: AtomicU8,
}

impl LinkShared {
    fn new() -> Self {
        Self {
            events: Channel::new(),
            outcome: Signal::new(),
            connected: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Uninitialized as u8),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Handle given to the WiFi driver for posting platform notifications.
///
/// [`notify`](LinkNotifier::notify) never blocks, so it is safe to call from
/// the platform event loop task and from within driver calls.
#[derive(Clone)]
pub struct LinkNotifier {
    shared: Arc<LinkShared>,
}

impl LinkNotifier {
    /// Queue `event` for the link task.  Returns `false` if the queue is
    /// full and the event was dropped.
    pub fn notify(&self, event: LinkEvent) -> bool {
        if self.shared.events.try_send(event).is_err() {
            warn!("WiFi: event queue full, dropped {:?}", event);
            return false;
        }
        true
    }
}

// ───────────────────────────────────────────────────────────────
// Link task
// ───────────────────────────────────────────────────────────────

fn run_link_task<D: WifiDriver>(driver: Arc<D>, shared: Arc<LinkShared>, max_retries: u8) {
    let mut machine = LinkStateMachine::new(max_retries);
    shared.set_state(machine.state());

    futures_lite::future::block_on(async {
        loop {
            let mut next = Some(shared.events.receive().await);
            while let Some(event) = next.take() {
                if event == LinkEvent::Shutdown {
                    debug!("WiFi: link task stopping");
                    return;
                }
                if matches!(event, LinkEvent::StaDisconnected { .. }) {
                    shared.connected.store(false, Ordering::Release);
                }

                let action = machine.handle(event);
                shared.set_state(machine.state());

                match action {
                    LinkAction::None => {}
                    LinkAction::StartStation => {
                        if let Err(e) = driver.start() {
                            error!("WiFi: station start failed: {}", e);
                            next = Some(LinkEvent::StartFailed);
                        }
                    }
                    LinkAction::IssueConnect => {
                        if let Err(e) = driver.connect() {
                            warn!("WiFi: connect request rejected: {}", e);
                            next = Some(LinkEvent::StaDisconnected {
                                reason: REASON_UNSPECIFIED,
                            });
                        }
                    }
                    LinkAction::SignalConnected => {
                        shared.connected.store(true, Ordering::Release);
                        shared.outcome.signal(LinkOutcome::Connected);
                    }
                    LinkAction::SignalFailed => {
                        shared.outcome.signal(LinkOutcome::Failed);
                    }
                }
            }
        }
    });

    shared.connected.store(false, Ordering::Release);
    shared.set_state(ConnectionState::Uninitialized);
}

// ───────────────────────────────────────────────────────────────
// Manager
// ───────────────────────────────────────────────────────────────

pub struct ConnectivityManager<D: WifiDriver, B: NvsBackend> {
    driver: Arc<D>,
    kvs: Arc<Kvs<B>>,
    config: ConnectivityConfig,
    shared: Arc<LinkShared>,
    /// One `connect()` at a time owns the request and the outcome signal.
    connect_gate: Mutex<CriticalSectionRawMutex, ()>,
    task: Option<JoinHandle<()>>,
}

impl<D: WifiDriver, B: NvsBackend> ConnectivityManager<D, B> {
    pub fn new(driver: D, kvs: Arc<Kvs<B>>, config: ConnectivityConfig) -> Self {
        Self {
            driver: Arc::new(driver),
            kvs,
            config,
            shared: Arc::new(LinkShared::new()),
            connect_gate: Mutex::new(()),
            task: None,
        }
    }

    /// Bring up the driver in station role and start the link task.
    ///
    /// A second call while initialised is a no-op.
    pub fn initialize(&mut self) -> Result<(), ConnectivityError> {
        if self.task.is_some() {
            warn!("WiFi: already initialised");
            return Ok(());
        }

        let shared = Arc::new(LinkShared::new());
        self.driver.init(LinkNotifier {
            shared: Arc::clone(&shared),
        })?;

        let driver = Arc::clone(&self.driver);
        let task_shared = Arc::clone(&shared);
        let max_retries = self.config.max_retries;
        shared.set_state(ConnectionState::Starting);
        let task = task_pin::spawn_on_core(
            Core::Pro,
            LINK_TASK_PRIORITY,
            LINK_TASK_STACK_KB,
            "wifi-link\0",
            move || run_link_task(driver, task_shared, max_retries),
        );

        match task {
            Ok(handle) => {
                self.task = Some(handle);
                self.shared = shared;
                info!("WiFi: initialised");
                Ok(())
            }
            Err(e) => {
                error!("WiFi: link task spawn failed: {}", e);
                self.driver.deinit();
                Err(ConnectivityError::ResourceExhausted)
            }
        }
    }

    /// Connect with the stored credentials and wait for the outcome.
    ///
    /// Blocks for at most the configured connect timeout, including time
    /// spent queued behind another caller.  Concurrent callers are served
    /// one after the other; a caller that finds the link already up returns
    /// `Ok` at once.  After a [`ConnectivityError::Timeout`] the link keeps
    /// reacting to platform notifications, so a late address still brings
    /// it up.
    pub fn connect(&self) -> Result<(), ConnectivityError> {
        if self.task.is_none() {
            return Err(ConnectivityError::NotInitialized);
        }
        let deadline = Instant::now() + self.config.connect_timeout;
        let remaining = || deadline.saturating_duration_since(Instant::now());

        let Some(_gate) = block_on_timeout(self.connect_gate.lock(), remaining()) else {
            return self.timed_out();
        };

        let credentials =
            settings::load_credentials(&self.kvs).map_err(ConnectivityError::Credentials)?;
        info!(
            "WiFi: connecting to '{}' (secret {} bytes)",
            credentials.network_id,
            credentials.secret.len()
        );
        self.driver.configure(&credentials)?;

        self.shared.outcome.reset();
        if block_on_timeout(self.shared.events.send(LinkEvent::ConnectRequested), remaining())
            .is_none()
        {
            warn!("WiFi: link task not draining events");
            return self.timed_out();
        }

        match block_on_timeout(self.shared.outcome.wait(), remaining()) {
            Some(LinkOutcome::Connected) => {
                info!("WiFi: connected");
                Ok(())
            }
            Some(LinkOutcome::Failed) => {
                warn!("WiFi: connection failed");
                Err(ConnectivityError::ConnectFailed)
            }
            None => {
                warn!("WiFi: no outcome after {:?}", self.config.connect_timeout);
                self.timed_out()
            }
        }
    }

    /// Resolve a `connect()` whose deadline passed.  An address that arrived
    /// meanwhile still counts as success.
    fn timed_out(&self) -> Result<(), ConnectivityError> {
        if self.shared.connected.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.notifier().notify(LinkEvent::WaitTimedOut) {
            debug!("WiFi: timeout marker dropped");
        }
        Err(ConnectivityError::Timeout)
    }

    /// Initialised, in station role, and holding an address.
    pub fn is_connected(&self) -> bool {
        self.task.is_some()
            && self.driver.is_station()
            && self.shared.connected.load(Ordering::Acquire)
    }

    /// Non-blocking snapshot of the link state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Stop the link task, stop the station and release the driver.
    pub fn deinitialize(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        let delivered =
            block_on_timeout(self.shared.events.send(LinkEvent::Shutdown), SHUTDOWN_TIMEOUT)
                .is_some();
        if delivered || task.is_finished() {
            if task.join().is_err() {
                error!("WiFi: link task panicked");
            }
        } else {
            error!("WiFi: link task not responding, detaching it");
        }

        if let Err(e) = self.driver.stop() {
            warn!("WiFi: stop failed: {}", e);
        }
        self.driver.deinit();

        self.shared.connected.store(false, Ordering::Release);
        self.shared.set_state(ConnectionState::Uninitialized);
        info!("WiFi: deinitialised");
    }

    /// Access the radio (diagnostics and simulation control).
    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn notifier(&self) -> LinkNotifier {
        LinkNotifier {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: WifiDriver, B: NvsBackend> Drop for ConnectivityManager<D, B> {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

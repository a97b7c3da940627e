//! WiFi link state machine.
//!
//! Pure transition logic for the station link: no driver calls, no
//! channels, no clocks.  The link task in
//! [`adapters::wifi`](crate::adapters::wifi) feeds it one [`LinkEvent`] at a
//! time and carries out the returned [`LinkAction`].
//!
//! ```text
//!  Uninitialized ──initialize──▶ Starting ──StaStarted──▶ Connecting
//!                                                  │  ▲        │
//!                                   GotIp ◀────────┘  │        │ disconnect,
//!                                     │       disconnect,      │ attempts exhausted
//!                                     ▼       attempts left    ▼
//!                                 Connected ──────────────▶  Failed
//! ```
//!
//! A station that refuses to start moves the link straight to `Failed`; the
//! next connect request starts it again.
//!
//! Every connect request issued during one attempt cycle counts toward
//! [`MAX_RETRIES`](crate::config::MAX_RETRIES), the first one included.
//! The reason carried by a disconnect is classified for diagnostics only;
//! the retry decision depends on the attempt counter alone.

use core::fmt;
use log::{info, warn};

// ---------------------------------------------------------------------------
// States and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Uninitialized = 0,
    Starting = 1,
    Connecting = 2,
    Connected = 3,
    Failed = 4,
    TimedOut = 5,
}

impl ConnectionState {
    /// Decode a value previously produced by `state as u8`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Failed,
            5 => Self::TimedOut,
            _ => Self::Uninitialized,
        }
    }
}

/// Tagged notification delivered to the link task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Platform: station role is active.
    StaStarted,
    /// Platform: association lost or attempt failed.
    StaDisconnected { reason: u8 },
    /// Platform: DHCP assigned an IPv4 address.
    GotIp { addr: [u8; 4] },
    /// Link task: the driver refused to start the station.
    StartFailed,
    /// Caller: `connect()` wants a fresh attempt cycle.
    ConnectRequested,
    /// Caller: `connect()` stopped waiting.
    WaitTimedOut,
    /// Manager: stop the link task.
    Shutdown,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    None,
    /// Ask the driver to start the station.
    StartStation,
    /// Ask the driver to associate.
    IssueConnect,
    /// Raise the connected outcome.
    SignalConnected,
    /// Raise the failed outcome.
    SignalFailed,
}

// ---------------------------------------------------------------------------
// Disconnect classification
// ---------------------------------------------------------------------------

/// Diagnostic category of a station disconnect reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCategory {
    /// Credentials rejected or authentication expired.
    AuthFailure,
    /// Disassociated for inactivity.
    Inactivity,
    /// WPA 4-way handshake timed out.
    HandshakeTimeout,
    /// AP refused the association.
    ApRejected,
    /// AP has too many stations.
    ApCapacity,
    /// AP is asleep or unreachable.
    ApUnavailable,
    /// AP restarted.
    ApRestart,
    Unknown,
}

impl DisconnectCategory {
    pub fn classify(reason: u8) -> Self {
        match reason {
            2 => Self::AuthFailure,
            4 => Self::Inactivity,
            15 => Self::HandshakeTimeout,
            201 => Self::ApRejected,
            202 => Self::ApCapacity,
            203 => Self::ApUnavailable,
            204 => Self::ApRestart,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for DisconnectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthFailure => write!(f, "authentication failed or expired"),
            Self::Inactivity => write!(f, "disassociated due to inactivity"),
            Self::HandshakeTimeout => write!(f, "4-way handshake timeout"),
            Self::ApRejected => write!(f, "AP rejected connection"),
            Self::ApCapacity => write!(f, "too many stations on AP"),
            Self::ApUnavailable => write!(f, "AP asleep or unavailable"),
            Self::ApRestart => write!(f, "AP restarted"),
            Self::Unknown => write!(f, "unknown reason"),
        }
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub struct LinkStateMachine {
    state: ConnectionState,
    /// Connect requests issued in the current attempt cycle.
    attempts: u8,
    max_retries: u8,
    /// The station role has been reported active since the last start.
    station_up: bool,
    last_disconnect: Option<DisconnectCategory>,
}

impl LinkStateMachine {
    /// A freshly initialised link, waiting for the station to start.
    pub fn new(max_retries: u8) -> Self {
        Self {
            state: ConnectionState::Starting,
            attempts: 0,
            max_retries,
            station_up: false,
            last_disconnect: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn last_disconnect(&self) -> Option<DisconnectCategory> {
        self.last_disconnect
    }

    /// Apply one event and return the side effect to perform.
    pub fn handle(&mut self, event: LinkEvent) -> LinkAction {
        match event {
            LinkEvent::StaStarted => {
                info!("WiFi: station started, connecting");
                self.station_up = true;
                self.begin_cycle()
            }
            LinkEvent::StartFailed => {
                warn!("WiFi: station did not start");
                self.station_up = false;
                self.state = ConnectionState::Failed;
                LinkAction::SignalFailed
            }
            LinkEvent::ConnectRequested => match self.state {
                ConnectionState::Starting => LinkAction::StartStation,
                ConnectionState::Connected => LinkAction::SignalConnected,
                // An attempt cycle is already running; its outcome answers the caller.
                ConnectionState::Connecting => LinkAction::None,
                ConnectionState::Failed | ConnectionState::TimedOut if !self.station_up => {
                    self.state = ConnectionState::Starting;
                    self.attempts = 0;
                    LinkAction::StartStation
                }
                ConnectionState::Failed | ConnectionState::TimedOut => self.begin_cycle(),
                ConnectionState::Uninitialized => LinkAction::None,
            },
            LinkEvent::GotIp { addr } => {
                info!(
                    "WiFi: got IP {}.{}.{}.{}",
                    addr[0], addr[1], addr[2], addr[3]
                );
                self.state = ConnectionState::Connected;
                self.station_up = true;
                self.attempts = 0;
                LinkAction::SignalConnected
            }
            LinkEvent::StaDisconnected { reason } => self.on_disconnect(reason),
            LinkEvent::WaitTimedOut => {
                if matches!(
                    self.state,
                    ConnectionState::Starting | ConnectionState::Connecting
                ) {
                    self.state = ConnectionState::TimedOut;
                }
                LinkAction::None
            }
            LinkEvent::Shutdown => {
                self.state = ConnectionState::Uninitialized;
                self.station_up = false;
                self.attempts = 0;
                LinkAction::None
            }
        }
    }

    fn begin_cycle(&mut self) -> LinkAction {
        self.state = ConnectionState::Connecting;
        self.attempts = 1;
        LinkAction::IssueConnect
    }

    fn on_disconnect(&mut self, reason: u8) -> LinkAction {
        let category = DisconnectCategory::classify(reason);
        self.last_disconnect = Some(category);
        warn!("WiFi: disconnected, reason {} ({})", reason, category);

        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::TimedOut => {
                if self.attempts < self.max_retries {
                    self.attempts += 1;
                    self.state = ConnectionState::Connecting;
                    info!(
                        "WiFi: reconnecting, attempt {}/{}",
                        self.attempts, self.max_retries
                    );
                    LinkAction::IssueConnect
                } else {
                    warn!("WiFi: giving up after {} attempts", self.attempts);
                    self.state = ConnectionState::Failed;
                    LinkAction::SignalFailed
                }
            }
            ConnectionState::Starting
            | ConnectionState::Failed
            | ConnectionState::Uninitialized => LinkAction::None,
        }
    }
}

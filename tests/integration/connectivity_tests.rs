//! Connectivity Manager against the scripted radio.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use trailcam::adapters::nvs::{Kvs, SimNvsBackend, StorageError};
use trailcam::adapters::settings::save_credentials;
use trailcam::adapters::wifi::{ConnectivityConfig, ConnectivityError, ConnectivityManager};
use trailcam::app::link::{ConnectionState, LinkEvent};
use trailcam::config::WifiCredentials;
use trailcam::drivers::wifi::{SimLinkBehaviour, SimWifiDriver};

type Manager = ConnectivityManager<SimWifiDriver, SimNvsBackend>;

fn store(with_credentials: bool) -> Arc<Kvs<SimNvsBackend>> {
    let kvs = Kvs::new(SimNvsBackend::new());
    kvs.init().unwrap();
    if with_credentials {
        let creds = WifiCredentials::new("ridge", "trailpass").unwrap();
        save_credentials(&kvs, &creds).unwrap();
    }
    Arc::new(kvs)
}

fn manager(behaviour: SimLinkBehaviour, with_credentials: bool) -> Manager {
    let driver = SimWifiDriver::new();
    driver.set_behaviour(behaviour);
    let config = ConnectivityConfig {
        connect_timeout: Duration::from_millis(300),
        max_retries: 5,
    };
    let mut mgr = ConnectivityManager::new(driver, store(with_credentials), config);
    mgr.initialize().unwrap();
    mgr
}

/// Poll `cond` until it holds or two seconds pass.
fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn five_rejections_fail_without_sixth_attempt() {
    let mgr = manager(SimLinkBehaviour::Reject { reason: 15 }, true);
    assert_eq!(mgr.connect(), Err(ConnectivityError::ConnectFailed));
    assert_eq!(mgr.state(), ConnectionState::Failed);
    assert!(!mgr.is_connected());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(mgr.driver().connect_calls(), 5);
}

#[test]
fn missing_credentials_never_reach_radio() {
    let mgr = manager(SimLinkBehaviour::Associate, false);
    assert_eq!(
        mgr.connect(),
        Err(ConnectivityError::Credentials(StorageError::NotFound))
    );
    assert_eq!(mgr.driver().connect_calls(), 0);
    assert_eq!(mgr.driver().start_calls(), 0);
}

#[test]
fn silent_link_times_out_then_late_address_connects() {
    let mgr = manager(SimLinkBehaviour::Silent, true);
    let started = Instant::now();
    assert_eq!(mgr.connect(), Err(ConnectivityError::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(eventually(|| mgr.state() == ConnectionState::TimedOut));
    assert!(!mgr.is_connected());

    assert!(mgr.driver().inject(LinkEvent::GotIp { addr: [10, 0, 0, 9] }));
    assert!(eventually(|| mgr.is_connected()));
    assert_eq!(mgr.state(), ConnectionState::Connected);
}

#[test]
fn failed_link_can_be_retried() {
    let mgr = manager(SimLinkBehaviour::Reject { reason: 201 }, true);
    assert_eq!(mgr.connect(), Err(ConnectivityError::ConnectFailed));

    mgr.driver().set_behaviour(SimLinkBehaviour::Associate);
    assert_eq!(mgr.connect(), Ok(()));
    assert!(mgr.is_connected());
    assert_eq!(mgr.driver().connect_calls(), 6);
}

#[test]
fn dropped_link_reconnects_on_its_own() {
    let mgr = manager(SimLinkBehaviour::Associate, true);
    mgr.connect().unwrap();
    let calls = mgr.driver().connect_calls();

    assert!(mgr.driver().inject(LinkEvent::StaDisconnected { reason: 8 }));
    assert!(eventually(|| mgr.driver().connect_calls() == calls + 1));
    assert!(eventually(|| mgr.is_connected()));
}

#[test]
fn failed_start_reports_connect_failure() {
    let driver = SimWifiDriver::new();
    driver.fail_next_start();
    let mut mgr = ConnectivityManager::new(driver, store(true), ConnectivityConfig::default());
    mgr.initialize().unwrap();
    assert_eq!(mgr.connect(), Err(ConnectivityError::ConnectFailed));
    assert_eq!(mgr.state(), ConnectionState::Failed);
    assert!(!mgr.is_connected());

    // The next request starts the station again instead of associating blind.
    assert_eq!(mgr.connect(), Ok(()));
    assert_eq!(mgr.driver().start_calls(), 2);
    assert_eq!(mgr.state(), ConnectionState::Connected);

    mgr.deinitialize();
    assert_eq!(mgr.state(), ConnectionState::Uninitialized);
}

#[test]
fn concurrent_callers_both_see_late_address() {
    let driver = SimWifiDriver::new();
    driver.set_behaviour(SimLinkBehaviour::Silent);
    let config = ConnectivityConfig {
        connect_timeout: Duration::from_secs(2),
        max_retries: 5,
    };
    let mut mgr = ConnectivityManager::new(driver, store(true), config);
    mgr.initialize().unwrap();
    let mgr = Arc::new(mgr);

    let callers: Vec<_> = (0..2)
        .map(|_| {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || mgr.connect())
        })
        .collect();

    thread::sleep(Duration::from_millis(100));
    assert!(eventually(|| mgr.driver().inject(LinkEvent::GotIp { addr: [10, 0, 0, 7] })));

    for caller in callers {
        assert_eq!(caller.join().unwrap(), Ok(()));
    }
    assert!(mgr.is_connected());
    assert_eq!(mgr.driver().connect_calls(), 1);
}

#[test]
fn queued_caller_shares_one_deadline() {
    let mgr = Arc::new(manager(SimLinkBehaviour::Silent, true));
    let started = Instant::now();
    let callers: Vec<_> = (0..2)
        .map(|_| {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || mgr.connect())
        })
        .collect();
    for caller in callers {
        assert_eq!(caller.join().unwrap(), Err(ConnectivityError::Timeout));
    }
    // Each caller is bounded by its own 300 ms deadline, queueing included.
    assert!(started.elapsed() < Duration::from_millis(550));
}

#[test]
fn deinitialize_returns_when_link_task_is_gone() {
    let mut mgr = manager(SimLinkBehaviour::Associate, true);
    assert!(mgr.driver().inject(LinkEvent::Shutdown));
    assert!(eventually(|| mgr.state() == ConnectionState::Uninitialized));

    // Nobody drains the queue any more.
    while mgr.driver().inject(LinkEvent::WaitTimedOut) {}

    let started = Instant::now();
    mgr.deinitialize();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(mgr.state(), ConnectionState::Uninitialized);
}

//! Property tests for the storage, numbering and link logic.
//!
//! Runs on host only; proptest is not available for ESP32 targets.

#![cfg(not(target_os = "espidf"))]

use proptest::prelude::*;

use trailcam::adapters::image_store::{parse_sequence_name, sequence_file_name, ImageStore};
use trailcam::adapters::nvs::{Kvs, SimNvsBackend};
use trailcam::app::link::{ConnectionState, DisconnectCategory, LinkAction, LinkEvent, LinkStateMachine};
use trailcam::config::SdCardConfig;
use trailcam::drivers::sdmmc::SimVolume;
use trailcam::web::form;

fn kvs() -> Kvs<SimNvsBackend> {
    let kvs = Kvs::new(SimNvsBackend::new());
    kvs.init().unwrap();
    kvs
}

// ── KVS ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn kvs_u32_reads_back(ns in "[a-z]{1,15}", key in "[a-z_]{1,15}", value: u32) {
        let kvs = kvs();
        kvs.write_u32(&ns, &key, value).unwrap();
        prop_assert_eq!(kvs.read_u32(&ns, &key).unwrap(), value);
    }

    #[test]
    fn kvs_str_reads_back(value in "[ -~]{0,63}") {
        let kvs = kvs();
        kvs.write_str("wifi", "ssid", &value).unwrap();
        let read = kvs.read_str::<64>("wifi", "ssid").unwrap();
        prop_assert_eq!(read.as_str(), value.as_str());
    }

    #[test]
    fn kvs_lost_commit_keeps_old(old: u32, new: u32) {
        let kvs = kvs();
        kvs.write_u32("camera", "fb_count", old).unwrap();
        kvs.backend().lose_power_on_next_commit();
        prop_assert!(kvs.write_u32("camera", "fb_count", new).is_err());
        prop_assert_eq!(kvs.read_u32("camera", "fb_count").unwrap(), old);
    }
}

// ── Image numbering ──────────────────────────────────────────

proptest! {
    #[test]
    fn recovery_is_max_plus_one(
        numbers in proptest::collection::btree_set(1u32..100_000, 0..20),
        junk in proptest::collection::vec("[a-z]{1,8}\\.(txt|jpg|JPG\\.bak)", 0..5),
    ) {
        let vol = SimVolume::new();
        for n in &numbers {
            vol.add_file(&sequence_file_name(*n), b"x");
        }
        for name in &junk {
            vol.add_file(name, b"j");
        }
        let store = ImageStore::new(vol);
        store.mount(&SdCardConfig::default()).unwrap();
        let expected = numbers.iter().max().map_or(1, |m| m + 1);
        prop_assert_eq!(store.recover_sequence().unwrap(), expected);
    }

    #[test]
    fn file_names_parse_back(n: u32) {
        prop_assert_eq!(parse_sequence_name(&sequence_file_name(n)), Some(n));
    }
}

// ── Link state machine ───────────────────────────────────────

fn any_event() -> impl Strategy<Value = LinkEvent> {
    prop_oneof![
        Just(LinkEvent::StaStarted),
        any::<u8>().prop_map(|reason| LinkEvent::StaDisconnected { reason }),
        any::<[u8; 4]>().prop_map(|addr| LinkEvent::GotIp { addr }),
        Just(LinkEvent::ConnectRequested),
        Just(LinkEvent::WaitTimedOut),
    ]
}

proptest! {
    #[test]
    fn classification_is_total(reason: u8) {
        let category = DisconnectCategory::classify(reason);
        prop_assert!(!category.to_string().is_empty());
    }

    #[test]
    fn attempts_never_exceed_limit(
        max in 1u8..8,
        events in proptest::collection::vec(any_event(), 0..64),
    ) {
        let mut machine = LinkStateMachine::new(max);
        let mut connects_since_cycle = 0u32;
        for event in events {
            if matches!(event, LinkEvent::GotIp { .. }) {
                connects_since_cycle = 0;
            }
            if event == LinkEvent::ConnectRequested
                && matches!(machine.state(), ConnectionState::Failed | ConnectionState::TimedOut)
            {
                connects_since_cycle = 0;
            }
            if event == LinkEvent::StaStarted {
                connects_since_cycle = 0;
            }
            if machine.handle(event) == LinkAction::IssueConnect {
                connects_since_cycle += 1;
            }
            prop_assert!(machine.attempts() <= max);
            prop_assert!(connects_since_cycle <= u32::from(max));
            if machine.state() == ConnectionState::Failed {
                prop_assert_eq!(machine.attempts(), max);
            }
        }
    }
}

// ── Form decoding ────────────────────────────────────────────

proptest! {
    #[test]
    fn encoded_values_decode_exactly(value in "\\PC{0,40}") {
        let body = format!("a=1&ssid={}&b=2", form::percent_encode(&value));
        prop_assert_eq!(form::field(&body, "ssid"), Some(value));
    }
}

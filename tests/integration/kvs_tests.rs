//! Key-value store behaviour seen through its public API.

use trailcam::adapters::nvs::{ConfigValue, Kvs, SimNvsBackend, StorageError};
use trailcam::app::ports::NvsError;
use trailcam::error::Error;

fn kvs() -> Kvs<SimNvsBackend> {
    let kvs = Kvs::new(SimNvsBackend::new());
    kvs.init().unwrap();
    kvs
}

#[test]
fn written_values_read_back() {
    let kvs = kvs();
    kvs.write("camera", "fb_count", ConfigValue::U32(2)).unwrap();
    kvs.write("wifi", "ssid", ConfigValue::Str("north-ridge")).unwrap();
    assert_eq!(kvs.read_u32("camera", "fb_count").unwrap(), 2);
    assert_eq!(kvs.read_str::<31>("wifi", "ssid").unwrap(), "north-ridge");
}

#[test]
fn overwrite_replaces_value() {
    let kvs = kvs();
    kvs.write_u32("camera", "jpeg_quality", 10).unwrap();
    kvs.write_u32("camera", "jpeg_quality", 40).unwrap();
    assert_eq!(kvs.read_u32("camera", "jpeg_quality").unwrap(), 40);
}

#[test]
fn power_loss_before_commit_keeps_prior_state() {
    let kvs = kvs();
    kvs.write_str("wifi", "ssid", "old-net").unwrap();
    kvs.backend().lose_power_on_next_commit();
    assert!(kvs.write_str("wifi", "ssid", "new-net").is_err());
    assert_eq!(kvs.read_str::<31>("wifi", "ssid").unwrap(), "old-net");

    kvs.backend().lose_power_on_next_commit();
    assert!(kvs.write_u32("camera", "fb_count", 2).is_err());
    assert_eq!(kvs.read_u32("camera", "fb_count"), Err(StorageError::NotFound));
}

#[test]
fn erasing_absent_key_twice_succeeds() {
    let kvs = kvs();
    kvs.write_u32("camera", "fb_count", 1).unwrap();
    assert_eq!(kvs.erase("camera", "jpeg_quality"), Ok(()));
    assert_eq!(kvs.erase("camera", "jpeg_quality"), Ok(()));
    assert_eq!(kvs.read_u32("camera", "fb_count").unwrap(), 1);
}

#[test]
fn partition_needing_erase_is_recovered_at_init() {
    let kvs = Kvs::new(SimNvsBackend::new());
    kvs.backend().script_init_results([Err(NvsError::NewVersionFound)]);
    kvs.init().unwrap();
    assert!(kvs.is_initialized());
    assert_eq!(kvs.backend().erase_count(), 1);
}

#[test]
fn errors_fold_into_crate_taxonomy() {
    let kvs = kvs();
    kvs.write_str("wifi", "password", "a-rather-long-secret").unwrap();
    let err = kvs.read_str::<8>("wifi", "password").unwrap_err();
    assert!(matches!(err, StorageError::BufferTooSmall { required } if required > 8));
    assert!(matches!(Error::from(err), Error::BufferTooSmall { .. }));
    assert_eq!(kvs.backend().open_sessions(), 0);
}

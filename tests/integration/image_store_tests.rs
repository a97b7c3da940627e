//! Image Store numbering across mounts, threads and a real directory.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use trailcam::adapters::image_store::{ImageStore, ImageStoreError};
use trailcam::capture::capture_once;
use trailcam::config::SdCardConfig;
use trailcam::drivers::camera::SimCamera;
use trailcam::drivers::sdmmc::{FatVolume, SimVolume};
use trailcam::web::files;

fn mounted(vol: &SimVolume) -> ImageStore<SimVolume> {
    let store = ImageStore::new(vol.clone());
    store.mount(&SdCardConfig::default()).unwrap();
    store
}

#[test]
fn recovery_skips_foreign_names() {
    let vol = SimVolume::new();
    vol.add_file("3.JPG", b"a");
    vol.add_file("7.JPG", b"b");
    vol.add_file("garbage.txt", b"c");
    vol.add_file("7.JPG.bak", b"d");
    let store = mounted(&vol);
    assert_eq!(store.recover_sequence().unwrap(), 8);
    assert_eq!(store.write_image(b"frame").unwrap(), 8);
    assert!(vol.file("8.JPG").is_some());
}

#[test]
fn concurrent_writers_never_share_a_number() {
    const THREADS: u32 = 4;
    const PER_THREAD: u32 = 10;

    let vol = SimVolume::new();
    vol.add_file("5.JPG", b"old");
    let store = Arc::new(mounted(&vol));
    store.recover_sequence().unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|i| store.write_image(&[t as u8, i as u8]).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for h in handles {
        for n in h.join().unwrap() {
            assert!(seen.insert(n), "number {n} used twice");
        }
    }
    let total = THREADS * PER_THREAD;
    assert_eq!(seen.len() as u32, total);
    assert_eq!(seen.first().copied(), Some(6));
    assert_eq!(seen.last().copied(), Some(5 + total));
    assert_eq!(store.next_sequence(), Some(6 + total));
}

#[test]
fn remount_continues_after_highest_file() {
    let vol = SimVolume::new();
    let store = mounted(&vol);
    store.recover_sequence().unwrap();
    store.write_image(b"1").unwrap();
    store.write_image(b"2").unwrap();
    store.unmount().unwrap();
    assert_eq!(store.write_image(b"x"), Err(ImageStoreError::NotMounted));

    store.mount(&SdCardConfig::default()).unwrap();
    assert_eq!(store.recover_sequence().unwrap(), 3);
}

#[test]
fn captured_frames_show_up_in_file_browser() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("card");
    let store = ImageStore::new(FatVolume::new(&root));
    store.mount(&SdCardConfig::default()).unwrap();
    store.recover_sequence().unwrap();

    let mut cam = SimCamera::new();
    assert_eq!(capture_once(&mut cam, &store).unwrap(), 1);
    assert_eq!(capture_once(&mut cam, &store).unwrap(), 2);

    assert_eq!(files::list_images(&root).unwrap(), vec!["1.JPG", "2.JPG"]);
    let path = files::resolve_download(&root, "2.JPG").unwrap();
    let data = std::fs::read(path).unwrap();
    assert_eq!(&data[..2], &[0xFF, 0xD8]);
}

//! Image Store: numbered JPEG files on the SD card.
//!
//! All volume access goes through one `embassy_sync` mutex, so mount,
//! sequence recovery, writes and unmount are totally ordered.  Acquiring
//! the mutex is bounded by [`LOCK_TIMEOUT`]; a caller that cannot get it in
//! time receives [`ImageStoreError::Busy`].
//!
//! # Numbering
//!
//! Files are named `<n>.JPG` in the volume root.  After mounting,
//! [`ImageStore::recover_sequence`] scans the root and continues after the
//! highest existing number.  Each fully successful write consumes exactly
//! one number; a failed or short write consumes none, so numbers are never
//! reused or skipped within a mount session.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use log::{error, info, warn};

use crate::app::ports::{Volume, VolumeError};
use crate::config::{SdCardConfig, LOCK_TIMEOUT};
use crate::wait::block_on_timeout;

const IMAGE_SUFFIX: &str = ".JPG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStoreError {
    NotMounted,
    /// `recover_sequence` has not run since the last mount.
    NotRecovered,
    /// The store mutex could not be acquired in time.
    Busy,
    /// Fewer bytes reached the card than were handed in.
    PartialWrite { written: usize, expected: usize },
    /// The highest representable file number is used.
    SequenceExhausted,
    Io(VolumeError),
}

impl fmt::Display for ImageStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMounted => write!(f, "SD card not mounted"),
            Self::NotRecovered => write!(f, "image sequence not recovered"),
            Self::Busy => write!(f, "image store busy"),
            Self::PartialWrite { written, expected } => {
                write!(f, "partial write ({} of {} bytes)", written, expected)
            }
            Self::SequenceExhausted => write!(f, "image sequence exhausted"),
            Self::Io(e) => write!(f, "SD card: {}", e),
        }
    }
}

impl std::error::Error for ImageStoreError {}

impl From<VolumeError> for ImageStoreError {
    fn from(e: VolumeError) -> Self {
        match e {
            VolumeError::NotMounted => Self::NotMounted,
            other => Self::Io(other),
        }
    }
}

/// Parse `<decimal u32>.JPG`.  Anything else is not an image of ours.
pub fn parse_sequence_name(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(IMAGE_SUFFIX)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

pub fn sequence_file_name(n: u32) -> String {
    format!("{}{}", n, IMAGE_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequence {
    Unrecovered,
    Next(u32),
    Exhausted,
}

struct StoreInner<V> {
    volume: V,
    mounted: bool,
    sequence: Sequence,
}

pub struct ImageStore<V: Volume> {
    inner: Mutex<CriticalSectionRawMutex, StoreInner<V>>,
    lock_timeout: Duration,
    /// Mirror of the next number for lock-free diagnostics; 0 = unknown.
    next_snapshot: AtomicU32,
}

impl<V: Volume> ImageStore<V> {
    pub fn new(volume: V) -> Self {
        Self::with_lock_timeout(volume, LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(volume: V, lock_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                volume,
                mounted: false,
                sequence: Sequence::Unrecovered,
            }),
            lock_timeout,
            next_snapshot: AtomicU32::new(0),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CriticalSectionRawMutex, StoreInner<V>>, ImageStoreError> {
        block_on_timeout(self.inner.lock(), self.lock_timeout).ok_or_else(|| {
            warn!("SD: store busy for {:?}", self.lock_timeout);
            ImageStoreError::Busy
        })
    }

    fn publish(&self, sequence: Sequence) {
        let snapshot = match sequence {
            Sequence::Next(n) => n,
            Sequence::Unrecovered | Sequence::Exhausted => 0,
        };
        self.next_snapshot.store(snapshot, Ordering::Release);
    }

    /// Mount the card.  An unformatted card is formatted once, then mounted.
    pub fn mount(&self, config: &SdCardConfig) -> Result<(), ImageStoreError> {
        let mut inner = self.lock()?;
        if inner.mounted {
            warn!("SD: already mounted");
            return Ok(());
        }

        match inner.volume.mount(config, false) {
            Ok(()) => {}
            Err(VolumeError::Unformatted) => {
                warn!("SD: card not formatted, formatting");
                inner.volume.mount(config, true).map_err(ImageStoreError::Io)?;
            }
            Err(e) => {
                error!("SD: mount failed: {}", e);
                return Err(ImageStoreError::Io(e));
            }
        }

        inner.mounted = true;
        inner.sequence = Sequence::Unrecovered;
        info!("SD: mounted at {}", config.mount_point);
        Ok(())
    }

    /// Scan the root directory and set the next number to `max + 1`
    /// (1 on an empty card).  Returns the next number.
    pub fn recover_sequence(&self) -> Result<u32, ImageStoreError> {
        let mut inner = self.lock()?;
        if !inner.mounted {
            return Err(ImageStoreError::NotMounted);
        }

        let entries = inner.volume.list_root()?;
        let highest = entries
            .iter()
            .filter(|e| e.is_file)
            .filter_map(|e| parse_sequence_name(&e.name))
            .max();

        let sequence = match highest {
            None => Sequence::Next(1),
            Some(max) => max.checked_add(1).map_or(Sequence::Exhausted, Sequence::Next),
        };
        inner.sequence = sequence;
        self.publish(sequence);

        match sequence {
            Sequence::Next(n) => {
                info!("SD: {} entries scanned, next image {}", entries.len(), n);
                Ok(n)
            }
            _ => {
                error!("SD: image numbers exhausted");
                Err(ImageStoreError::SequenceExhausted)
            }
        }
    }

    /// Write one image as the next numbered file and return its number.
    ///
    /// A short write leaves the partial file in place and does not consume
    /// the number; the next write overwrites it.
    pub fn write_image(&self, data: &[u8]) -> Result<u32, ImageStoreError> {
        let mut inner = self.lock()?;
        if !inner.mounted {
            return Err(ImageStoreError::NotMounted);
        }
        let n = match inner.sequence {
            Sequence::Next(n) => n,
            Sequence::Unrecovered => return Err(ImageStoreError::NotRecovered),
            Sequence::Exhausted => return Err(ImageStoreError::SequenceExhausted),
        };

        let name = sequence_file_name(n);
        let written = inner.volume.write_file(&name, data).map_err(|e| {
            error!("SD: writing {} failed: {}", name, e);
            ImageStoreError::from(e)
        })?;
        if written < data.len() {
            error!("SD: short write on {} ({} of {} bytes)", name, written, data.len());
            return Err(ImageStoreError::PartialWrite {
                written,
                expected: data.len(),
            });
        }

        let next = n.checked_add(1).map_or(Sequence::Exhausted, Sequence::Next);
        inner.sequence = next;
        self.publish(next);
        info!("SD: saved {} ({} bytes)", name, data.len());
        Ok(n)
    }

    /// Unmount the card.  A no-op when not mounted.
    pub fn unmount(&self) -> Result<(), ImageStoreError> {
        let mut inner = self.lock()?;
        if !inner.mounted {
            return Ok(());
        }
        inner.volume.unmount().map_err(ImageStoreError::Io)?;
        inner.mounted = false;
        inner.sequence = Sequence::Unrecovered;
        self.publish(Sequence::Unrecovered);
        info!("SD: unmounted");
        Ok(())
    }

    /// Next number to be written, if recovered.  Lock-free snapshot.
    pub fn next_sequence(&self) -> Option<u32> {
        match self.next_snapshot.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::drivers::sdmmc::SimVolume;

    fn mounted(vol: &SimVolume) -> ImageStore<SimVolume> {
        let store = ImageStore::new(vol.clone());
        store.mount(&SdCardConfig::default()).unwrap();
        store
    }

    #[test]
    fn names_parse_strictly() {
        assert_eq!(parse_sequence_name("7.JPG"), Some(7));
        assert_eq!(parse_sequence_name("0007.JPG"), Some(7));
        assert_eq!(parse_sequence_name("7.jpg"), None);
        assert_eq!(parse_sequence_name("7.JPG.bak"), None);
        assert_eq!(parse_sequence_name(".JPG"), None);
        assert_eq!(parse_sequence_name("+7.JPG"), None);
        assert_eq!(parse_sequence_name("99999999999.JPG"), None);
    }

    #[test]
    fn recovery_ignores_foreign_entries() {
        let vol = SimVolume::new();
        vol.add_file("3.JPG", b"a");
        vol.add_file("7.JPG", b"b");
        vol.add_file("garbage.txt", b"c");
        vol.add_file("7.JPG.bak", b"d");
        vol.add_dir("9.JPG");
        let store = mounted(&vol);
        assert_eq!(store.recover_sequence().unwrap(), 8);
        assert_eq!(store.next_sequence(), Some(8));
    }

    #[test]
    fn empty_card_starts_at_one() {
        let store = mounted(&SimVolume::new());
        assert_eq!(store.recover_sequence().unwrap(), 1);
        assert_eq!(store.write_image(b"\xff\xd8jpeg").unwrap(), 1);
        assert_eq!(store.write_image(b"\xff\xd8jpeg").unwrap(), 2);
    }

    #[test]
    fn write_requires_mount_and_recovery() {
        let vol = SimVolume::new();
        let store = ImageStore::new(vol.clone());
        assert_eq!(store.write_image(b"x"), Err(ImageStoreError::NotMounted));
        assert_eq!(store.recover_sequence(), Err(ImageStoreError::NotMounted));
        store.mount(&SdCardConfig::default()).unwrap();
        assert_eq!(store.write_image(b"x"), Err(ImageStoreError::NotRecovered));
    }

    #[test]
    fn short_write_keeps_number() {
        let vol = SimVolume::new();
        let store = mounted(&vol);
        store.recover_sequence().unwrap();
        vol.short_write_next(2);
        assert_eq!(
            store.write_image(b"abcdef"),
            Err(ImageStoreError::PartialWrite { written: 2, expected: 6 })
        );
        assert_eq!(vol.file("1.JPG").as_deref(), Some(&b"ab"[..]));
        assert_eq!(store.next_sequence(), Some(1));
        assert_eq!(store.write_image(b"abcdef").unwrap(), 1);
        assert_eq!(vol.file("1.JPG").as_deref(), Some(&b"abcdef"[..]));
    }

    #[test]
    fn unformatted_card_is_formatted_once() {
        let vol = SimVolume::unformatted();
        let store = ImageStore::new(vol.clone());
        store.mount(&SdCardConfig::default()).unwrap();
        assert_eq!(vol.format_count(), 1);
        store.mount(&SdCardConfig::default()).unwrap();
        assert_eq!(vol.format_count(), 1);
    }

    #[test]
    fn unmount_clears_sequence() {
        let vol = SimVolume::new();
        let store = mounted(&vol);
        store.recover_sequence().unwrap();
        store.unmount().unwrap();
        assert_eq!(store.next_sequence(), None);
        assert!(!vol.is_mounted());
        store.unmount().unwrap();
    }

    #[test]
    fn last_number_exhausts_sequence() {
        let vol = SimVolume::new();
        vol.add_file(&sequence_file_name(u32::MAX - 1), b"x");
        let store = mounted(&vol);
        assert_eq!(store.recover_sequence().unwrap(), u32::MAX);
        assert_eq!(store.write_image(b"y").unwrap(), u32::MAX);
        assert_eq!(store.write_image(b"z"), Err(ImageStoreError::SequenceExhausted));
    }

    #[test]
    fn held_lock_reports_busy() {
        let store = ImageStore::with_lock_timeout(SimVolume::new(), Duration::from_millis(20));
        let guard = futures_lite::future::block_on(store.inner.lock());
        assert_eq!(store.recover_sequence(), Err(ImageStoreError::Busy));
        drop(guard);
        assert_eq!(store.recover_sequence(), Err(ImageStoreError::NotMounted));
    }
}

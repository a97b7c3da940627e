//! SD card volume drivers.
//!
//! - [`FatVolume`]: FAT filesystem accessed through std file I/O.  On target
//!   the card is mounted into the VFS with `esp_vfs_fat_sdmmc_mount`; on the
//!   host the "card" is a plain directory.
//! - [`SimVolume`] (host only): in-memory card with fault injection.  Clones
//!   share the same card so tests can inspect what the store wrote.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use log::{debug, info};

use crate::app::ports::{DirEntry, Volume, VolumeError};
use crate::config::SdCardConfig;

#[cfg(not(target_os = "espidf"))]
pub use sim::SimVolume;

// ---------------------------------------------------------------------------
// FAT volume
// ---------------------------------------------------------------------------

pub struct FatVolume {
    root: PathBuf,
    mounted: bool,
    #[cfg(target_os = "espidf")]
    card: *mut esp_idf_svc::sys::sdmmc_card_t,
}

// SAFETY: the card pointer is only used by the owning store under its mutex.
#[cfg(target_os = "espidf")]
unsafe impl Send for FatVolume {}

/// Write as much of `data` as the medium accepts and report the count.
fn write_counting(file: &mut File, data: &[u8]) -> Result<usize, VolumeError> {
    let mut written = 0;
    while written < data.len() {
        match file.write(&data[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if written == 0 => return Err(e.into()),
            Err(e) => {
                debug!("SD: write stopped after {} bytes: {}", written, e);
                break;
            }
        }
    }
    file.flush()?;
    Ok(written)
}

impl FatVolume {
    fn list_dir(&self) -> Result<Vec<DirEntry>, VolumeError> {
        if !self.mounted {
            return Err(VolumeError::NotMounted);
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_file: entry.file_type()?.is_file(),
            });
        }
        Ok(entries)
    }

    fn write_to(&mut self, name: &str, data: &[u8]) -> Result<usize, VolumeError> {
        if !self.mounted {
            return Err(VolumeError::NotMounted);
        }
        let mut file = File::create(self.root.join(name))?;
        write_counting(&mut file, data)
    }
}

#[cfg(target_os = "espidf")]
mod esp {
    use super::*;
    use esp_idf_svc::sys::*;
    use log::warn;

    fn check(ret: esp_err_t) -> Result<(), VolumeError> {
        if ret == ESP_OK as esp_err_t {
            Ok(())
        } else if ret == ESP_FAIL as esp_err_t {
            // The FAT layer could not mount the partition.
            Err(VolumeError::Unformatted)
        } else {
            Err(VolumeError::Driver(ret))
        }
    }

    /// Host controller descriptor equivalent to `SDMMC_HOST_DEFAULT()`.
    fn sdmmc_host() -> sdmmc_host_t {
        let mut host = sdmmc_host_t {
            flags: (SDMMC_HOST_FLAG_8BIT
                | SDMMC_HOST_FLAG_4BIT
                | SDMMC_HOST_FLAG_1BIT
                | SDMMC_HOST_FLAG_DDR) as _,
            slot: SDMMC_HOST_SLOT_1 as _,
            max_freq_khz: SDMMC_FREQ_DEFAULT as _,
            io_voltage: 3.3,
            init: Some(sdmmc_host_init),
            set_bus_width: Some(sdmmc_host_set_bus_width),
            get_bus_width: Some(sdmmc_host_get_slot_width),
            set_bus_ddr_mode: Some(sdmmc_host_set_bus_ddr_mode),
            set_card_clk: Some(sdmmc_host_set_card_clk),
            do_transaction: Some(sdmmc_host_do_transaction),
            io_int_enable: Some(sdmmc_host_io_int_enable),
            io_int_wait: Some(sdmmc_host_io_int_wait),
            command_timeout_ms: 0,
            ..Default::default()
        };
        host.__bindgen_anon_1.deinit = Some(sdmmc_host_deinit);
        host
    }

    impl FatVolume {
        /// Volume on the SDMMC slot; mounted at `SdCardConfig::mount_point`.
        pub fn new() -> Self {
            Self {
                root: PathBuf::new(),
                mounted: false,
                card: core::ptr::null_mut(),
            }
        }

        pub(super) fn platform_mount(
            &mut self,
            config: &SdCardConfig,
            format_if_unformatted: bool,
        ) -> Result<(), VolumeError> {
            let host = sdmmc_host();

            let mut slot = sdmmc_slot_config_t::default();
            slot.clk = config.clk;
            slot.cmd = config.cmd;
            slot.d0 = config.d0;
            slot.__bindgen_anon_1.gpio_cd = gpio_num_t_GPIO_NUM_NC;
            slot.__bindgen_anon_2.gpio_wp = gpio_num_t_GPIO_NUM_NC;
            slot.width = config.bus_width;
            slot.flags = SDMMC_SLOT_FLAG_INTERNAL_PULLUP as _;

            let mount = esp_vfs_fat_mount_config_t {
                format_if_mount_failed: format_if_unformatted,
                max_files: config.max_files as _,
                allocation_unit_size: config.allocation_unit_size,
                ..Default::default()
            };

            let mut path = config.mount_point.as_bytes().to_vec();
            path.push(0);

            let mut card: *mut sdmmc_card_t = core::ptr::null_mut();
            // SAFETY: all descriptors are valid locals for the duration of the
            // call; `path` is null-terminated; `card` receives the driver's card.
            check(unsafe {
                esp_vfs_fat_sdmmc_mount(
                    path.as_ptr().cast(),
                    &host,
                    (&slot as *const sdmmc_slot_config_t).cast(),
                    &mount,
                    &mut card,
                )
            })?;

            self.card = card;
            self.root = PathBuf::from(config.mount_point);
            Ok(())
        }

        pub(super) fn platform_unmount(&mut self) -> Result<(), VolumeError> {
            let mut path = self.root.to_string_lossy().into_owned().into_bytes();
            path.push(0);
            // SAFETY: `card` came from a successful mount at `root`.
            let ret = unsafe { esp_vfs_fat_sdcard_unmount(path.as_ptr().cast(), self.card) };
            if ret != ESP_OK as esp_err_t {
                warn!("SD: unmount returned {}", ret);
                return Err(VolumeError::Driver(ret));
            }
            self.card = core::ptr::null_mut();
            Ok(())
        }
    }

    impl Default for FatVolume {
        fn default() -> Self {
            Self::new()
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl FatVolume {
    /// Volume backed by the host directory `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounted: false,
        }
    }

    fn platform_mount(
        &mut self,
        _config: &SdCardConfig,
        format_if_unformatted: bool,
    ) -> Result<(), VolumeError> {
        if !self.root.is_dir() {
            if !format_if_unformatted {
                return Err(VolumeError::Unformatted);
            }
            fs::create_dir_all(&self.root)?;
        }
        Ok(())
    }

    fn platform_unmount(&mut self) -> Result<(), VolumeError> {
        Ok(())
    }
}

impl Volume for FatVolume {
    fn mount(&mut self, config: &SdCardConfig, format_if_unformatted: bool) -> Result<(), VolumeError> {
        self.platform_mount(config, format_if_unformatted)?;
        self.mounted = true;
        info!("SD: FAT volume ready at {}", self.root.display());
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), VolumeError> {
        if !self.mounted {
            return Ok(());
        }
        self.platform_unmount()?;
        self.mounted = false;
        Ok(())
    }

    fn list_root(&self) -> Result<Vec<DirEntry>, VolumeError> {
        self.list_dir()
    }

    fn write_file(&mut self, name: &str, data: &[u8]) -> Result<usize, VolumeError> {
        self.write_to(name, data)
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use super::*;

    #[derive(Default)]
    struct Card {
        formatted: bool,
        mounted: bool,
        files: BTreeMap<String, Vec<u8>>,
        dirs: BTreeSet<String>,
        short_write_next: Option<usize>,
        fail_mount: Option<VolumeError>,
        format_count: usize,
        write_count: usize,
    }

    #[derive(Clone, Default)]
    pub struct SimVolume {
        card: Arc<Mutex<Card>>,
    }

    impl SimVolume {
        /// A formatted, empty card.
        pub fn new() -> Self {
            let vol = Self::default();
            vol.lock().formatted = true;
            vol
        }

        /// A card with no filesystem.
        pub fn unformatted() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, Card> {
            self.card.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub fn add_file(&self, name: &str, data: &[u8]) {
            self.lock().files.insert(name.to_owned(), data.to_vec());
        }

        pub fn add_dir(&self, name: &str) {
            self.lock().dirs.insert(name.to_owned());
        }

        /// The next write stores only the first `n` bytes.
        pub fn short_write_next(&self, n: usize) {
            self.lock().short_write_next = Some(n);
        }

        /// The next mount fails with `err`.
        pub fn fail_next_mount(&self, err: VolumeError) {
            self.lock().fail_mount = Some(err);
        }

        pub fn file(&self, name: &str) -> Option<Vec<u8>> {
            self.lock().files.get(name).cloned()
        }

        pub fn file_names(&self) -> Vec<String> {
            self.lock().files.keys().cloned().collect()
        }

        pub fn format_count(&self) -> usize {
            self.lock().format_count
        }

        pub fn write_count(&self) -> usize {
            self.lock().write_count
        }

        pub fn is_mounted(&self) -> bool {
            self.lock().mounted
        }
    }

    impl Volume for SimVolume {
        fn mount(&mut self, _config: &SdCardConfig, format_if_unformatted: bool) -> Result<(), VolumeError> {
            let mut card = self.lock();
            if let Some(err) = card.fail_mount.take() {
                return Err(err);
            }
            if !card.formatted {
                if !format_if_unformatted {
                    return Err(VolumeError::Unformatted);
                }
                card.files.clear();
                card.dirs.clear();
                card.formatted = true;
                card.format_count += 1;
            }
            card.mounted = true;
            Ok(())
        }

        fn unmount(&mut self) -> Result<(), VolumeError> {
            self.lock().mounted = false;
            Ok(())
        }

        fn list_root(&self) -> Result<Vec<DirEntry>, VolumeError> {
            let card = self.lock();
            if !card.mounted {
                return Err(VolumeError::NotMounted);
            }
            let files = card.files.keys().map(|name| DirEntry {
                name: name.clone(),
                is_file: true,
            });
            let dirs = card.dirs.iter().map(|name| DirEntry {
                name: name.clone(),
                is_file: false,
            });
            Ok(files.chain(dirs).collect())
        }

        fn write_file(&mut self, name: &str, data: &[u8]) -> Result<usize, VolumeError> {
            let mut card = self.lock();
            if !card.mounted {
                return Err(VolumeError::NotMounted);
            }
            let len = card
                .short_write_next
                .take()
                .map_or(data.len(), |n| n.min(data.len()));
            card.files.insert(name.to_owned(), data[..len].to_vec());
            card.write_count += 1;
            Ok(len)
        }
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn directory_volume_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut vol = FatVolume::new(dir.path());
        vol.mount(&SdCardConfig::default(), false).unwrap();
        assert_eq!(vol.write_file("1.JPG", b"\xff\xd8data").unwrap(), 6);
        fs::create_dir(dir.path().join("DCIM")).unwrap();

        let mut entries = vol.list_root().unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "1.JPG".into(), is_file: true },
                DirEntry { name: "DCIM".into(), is_file: false },
            ]
        );
    }

    #[test]
    fn missing_directory_is_unformatted_until_formatted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("card");
        let mut vol = FatVolume::new(&root);
        assert_eq!(vol.mount(&SdCardConfig::default(), false), Err(VolumeError::Unformatted));
        vol.mount(&SdCardConfig::default(), true).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn unmounted_volume_rejects_io() {
        let dir = tempfile::tempdir().unwrap();
        let mut vol = FatVolume::new(dir.path());
        assert_eq!(vol.write_file("1.JPG", b"x"), Err(VolumeError::NotMounted));
        assert_eq!(vol.list_root(), Err(VolumeError::NotMounted));
    }
}

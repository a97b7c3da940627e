//! Key-value store over NVS (Non-Volatile Storage).
//!
//! [`Kvs`] is the only entry point the rest of the firmware uses for
//! persistence.  Every operation opens a short-lived namespace session,
//! performs one action and closes it again; no session outlives a call.
//!
//! # Durability
//!
//! A value is durable once [`Kvs::write`] returns `Ok`.  A power loss before
//! the commit leaves the previous value (or its absence) intact.  There is
//! no atomicity across keys: multi-field records are written field by field
//! and readers tolerate missing fields.

use core::sync::atomic::{AtomicBool, Ordering};
use core::fmt;

use log::{debug, info, warn};

use crate::app::ports::{NvsBackend, NvsError, NvsHandle, OpenMode};
use crate::config::NVS_NAME_MAX;

// ---------------------------------------------------------------------------
// Errors and values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// `init()` has not completed.
    NotInitialized,
    /// Namespace or key is absent.
    NotFound,
    /// Stored string does not fit the caller's capacity.
    BufferTooSmall { required: usize },
    /// Namespace or key is empty or longer than 15 bytes.
    InvalidName,
    /// Backend failure.
    Io(NvsError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "storage not initialised"),
            Self::NotFound => write!(f, "not found"),
            Self::BufferTooSmall { required } => {
                write!(f, "buffer too small ({} bytes required)", required)
            }
            Self::InvalidName => write!(f, "invalid namespace or key name"),
            Self::Io(e) => write!(f, "NVS: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<NvsError> for StorageError {
    fn from(e: NvsError) -> Self {
        match e {
            NvsError::NotFound => Self::NotFound,
            NvsError::InvalidLength { required } => Self::BufferTooSmall { required },
            other => Self::Io(other),
        }
    }
}

/// A value accepted by [`Kvs::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValue<'a> {
    U32(u32),
    Str(&'a str),
}

/// Stored bytes of a string entry were not valid UTF-8.
const ERR_INVALID_UTF8: i32 = -2;

// ---------------------------------------------------------------------------
// Kvs
// ---------------------------------------------------------------------------

pub struct Kvs<B: NvsBackend> {
    backend: B,
    initialized: AtomicBool,
}

/// Open namespace handle, closed on drop.
struct Session<'a, B: NvsBackend> {
    backend: &'a B,
    handle: NvsHandle,
}

impl<B: NvsBackend> Drop for Session<'_, B> {
    fn drop(&mut self) {
        self.backend.close(self.handle);
    }
}

fn check_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.len() > NVS_NAME_MAX || name.as_bytes().contains(&0) {
        return Err(StorageError::InvalidName);
    }
    Ok(())
}

impl<B: NvsBackend> Kvs<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            initialized: AtomicBool::new(false),
        }
    }

    /// Initialise the flash partition.
    ///
    /// A partition with no free pages or written by a newer NVS version is
    /// erased and initialised once more; a second failure is fatal.
    /// Calling `init` again after success is a no-op.
    pub fn init(&self) -> Result<(), StorageError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        match self.backend.flash_init() {
            Ok(()) => {}
            Err(e @ (NvsError::NoFreePages | NvsError::NewVersionFound)) => {
                warn!("KVS: {} - erasing and re-initialising partition", e);
                self.backend.flash_erase().map_err(StorageError::Io)?;
                self.backend.flash_init().map_err(StorageError::Io)?;
            }
            Err(e) => return Err(StorageError::Io(e)),
        }

        self.initialized.store(true, Ordering::Release);
        info!("KVS: initialised");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Access the backend (diagnostics and simulation control).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn session(&self, namespace: &str, mode: OpenMode) -> Result<Session<'_, B>, StorageError> {
        if !self.is_initialized() {
            return Err(StorageError::NotInitialized);
        }
        check_name(namespace)?;
        let handle = self.backend.open(namespace, mode)?;
        Ok(Session {
            backend: &self.backend,
            handle,
        })
    }

    /// Durably store `value` under `namespace/key`.
    pub fn write(&self, namespace: &str, key: &str, value: ConfigValue<'_>) -> Result<(), StorageError> {
        let s = self.session(namespace, OpenMode::ReadWrite)?;
        check_name(key)?;
        match value {
            ConfigValue::U32(v) => s.backend.set_u32(s.handle, key, v),
            ConfigValue::Str(v) => s.backend.set_str(s.handle, key, v),
        }
        .map_err(StorageError::Io)?;
        s.backend.commit(s.handle).map_err(StorageError::Io)?;
        debug!("KVS: wrote {}/{}", namespace, key);
        Ok(())
    }

    pub fn write_u32(&self, namespace: &str, key: &str, value: u32) -> Result<(), StorageError> {
        self.write(namespace, key, ConfigValue::U32(value))
    }

    pub fn write_str(&self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.write(namespace, key, ConfigValue::Str(value))
    }

    pub fn read_u32(&self, namespace: &str, key: &str) -> Result<u32, StorageError> {
        let s = self.session(namespace, OpenMode::ReadOnly)?;
        check_name(key)?;
        Ok(s.backend.get_u32(s.handle, key)?)
    }

    /// Read a string of at most `N` bytes.  Longer values are reported as
    /// [`StorageError::BufferTooSmall`], never truncated.
    pub fn read_str<const N: usize>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<heapless::String<N>, StorageError> {
        let s = self.session(namespace, OpenMode::ReadOnly)?;
        check_name(key)?;
        let mut buf = [0u8; N];
        let len = s.backend.get_str(s.handle, key, &mut buf)?;
        let text = core::str::from_utf8(&buf[..len])
            .map_err(|_| StorageError::Io(NvsError::Failed(ERR_INVALID_UTF8)))?;
        let mut out = heapless::String::new();
        out.push_str(text)
            .map_err(|()| StorageError::BufferTooSmall { required: len })?;
        Ok(out)
    }

    /// Remove `namespace/key`.  Absent keys are not an error.
    pub fn erase(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let s = self.session(namespace, OpenMode::ReadWrite)?;
        check_name(key)?;
        match s.backend.erase_key(s.handle, key) {
            Ok(()) => {}
            Err(NvsError::NotFound) => return Ok(()),
            Err(e) => return Err(StorageError::Io(e)),
        }
        s.backend.commit(s.handle).map_err(StorageError::Io)?;
        debug!("KVS: erased {}/{}", namespace, key);
        Ok(())
    }

    /// Remove every key in `namespace`.  An absent namespace is not an error.
    pub fn erase_all(&self, namespace: &str) -> Result<(), StorageError> {
        let s = self.session(namespace, OpenMode::ReadWrite)?;
        s.backend.erase_all(s.handle).map_err(StorageError::Io)?;
        s.backend.commit(s.handle).map_err(StorageError::Io)?;
        info!("KVS: erased namespace {}", namespace);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ESP-IDF backend
// ---------------------------------------------------------------------------

#[cfg(target_os = "espidf")]
pub use esp::EspNvsBackend;

#[cfg(target_os = "espidf")]
mod esp {
    use super::*;
    use esp_idf_svc::sys::*;

    /// `nvs_*` C API on the default partition.
    pub struct EspNvsBackend;

    fn check(ret: esp_err_t) -> Result<(), NvsError> {
        if ret == ESP_OK as esp_err_t {
            Ok(())
        } else if ret == ESP_ERR_NVS_NOT_FOUND as esp_err_t {
            Err(NvsError::NotFound)
        } else if ret == ESP_ERR_NVS_NO_FREE_PAGES as esp_err_t {
            Err(NvsError::NoFreePages)
        } else if ret == ESP_ERR_NVS_NEW_VERSION_FOUND as esp_err_t {
            Err(NvsError::NewVersionFound)
        } else {
            Err(NvsError::Failed(ret))
        }
    }

    /// Null-terminated copy of a name already checked by [`Kvs`].
    fn c_name(name: &str) -> Result<[u8; NVS_NAME_MAX + 1], NvsError> {
        let bytes = name.as_bytes();
        if bytes.len() > NVS_NAME_MAX {
            return Err(NvsError::Failed(ESP_ERR_NVS_INVALID_NAME as esp_err_t));
        }
        let mut buf = [0u8; NVS_NAME_MAX + 1];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }

    impl NvsBackend for EspNvsBackend {
        fn flash_init(&self) -> Result<(), NvsError> {
            // SAFETY: no arguments; ESP-IDF serialises partition init internally.
            check(unsafe { nvs_flash_init() })
        }

        fn flash_erase(&self) -> Result<(), NvsError> {
            // SAFETY: as above.
            check(unsafe { nvs_flash_erase() })
        }

        fn open(&self, namespace: &str, mode: OpenMode) -> Result<NvsHandle, NvsError> {
            let ns = c_name(namespace)?;
            let mode = match mode {
                OpenMode::ReadOnly => nvs_open_mode_t_NVS_READONLY,
                OpenMode::ReadWrite => nvs_open_mode_t_NVS_READWRITE,
            };
            let mut handle: nvs_handle_t = 0;
            // SAFETY: `ns` is null-terminated and outlives the call.
            check(unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) })?;
            Ok(handle)
        }

        fn close(&self, handle: NvsHandle) {
            // SAFETY: handle came from a successful nvs_open and is closed once.
            unsafe { nvs_close(handle) }
        }

        fn set_u32(&self, handle: NvsHandle, key: &str, value: u32) -> Result<(), NvsError> {
            let k = c_name(key)?;
            // SAFETY: `k` is null-terminated.
            check(unsafe { nvs_set_u32(handle, k.as_ptr().cast(), value) })
        }

        fn set_str(&self, handle: NvsHandle, key: &str, value: &str) -> Result<(), NvsError> {
            let k = c_name(key)?;
            let mut v = Vec::with_capacity(value.len() + 1);
            v.extend_from_slice(value.as_bytes());
            v.push(0);
            // SAFETY: both buffers are null-terminated and outlive the call.
            check(unsafe { nvs_set_str(handle, k.as_ptr().cast(), v.as_ptr().cast()) })
        }

        fn get_u32(&self, handle: NvsHandle, key: &str) -> Result<u32, NvsError> {
            let k = c_name(key)?;
            let mut value = 0u32;
            // SAFETY: `k` is null-terminated; `value` is a valid out pointer.
            check(unsafe { nvs_get_u32(handle, k.as_ptr().cast(), &mut value) })?;
            Ok(value)
        }

        fn get_str(&self, handle: NvsHandle, key: &str, buf: &mut [u8]) -> Result<usize, NvsError> {
            let k = c_name(key)?;

            // First call: length including the terminator.
            let mut size: usize = 0;
            // SAFETY: a null output pointer asks NVS for the length only.
            check(unsafe {
                nvs_get_str(handle, k.as_ptr().cast(), core::ptr::null_mut(), &mut size)
            })?;
            let len = size.saturating_sub(1);
            if len > buf.len() {
                return Err(NvsError::InvalidLength { required: len });
            }

            let mut tmp = vec![0u8; size];
            // SAFETY: `tmp` has exactly `size` writable bytes.
            check(unsafe {
                nvs_get_str(handle, k.as_ptr().cast(), tmp.as_mut_ptr().cast(), &mut size)
            })?;
            buf[..len].copy_from_slice(&tmp[..len]);
            Ok(len)
        }

        fn erase_key(&self, handle: NvsHandle, key: &str) -> Result<(), NvsError> {
            let k = c_name(key)?;
            // SAFETY: `k` is null-terminated.
            check(unsafe { nvs_erase_key(handle, k.as_ptr().cast()) })
        }

        fn erase_all(&self, handle: NvsHandle) -> Result<(), NvsError> {
            // SAFETY: handle is open.
            check(unsafe { nvs_erase_all(handle) })
        }

        fn commit(&self, handle: NvsHandle) -> Result<(), NvsError> {
            // SAFETY: handle is open.
            check(unsafe { nvs_commit(handle) })
        }
    }
}

// ---------------------------------------------------------------------------
// Simulation backend
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "espidf"))]
pub use sim::SimNvsBackend;

#[cfg(not(target_os = "espidf"))]
mod sim {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// `ESP_ERR_NVS_NOT_INITIALIZED`
    const ERR_NOT_INITIALIZED: i32 = 0x1101;
    /// `ESP_ERR_NVS_READ_ONLY`
    const ERR_READ_ONLY: i32 = 0x1107;
    /// `ESP_ERR_NVS_INVALID_HANDLE`
    const ERR_INVALID_HANDLE: i32 = 0x1109;
    /// `ESP_FAIL`
    const ERR_FAIL: i32 = -1;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Value {
        U32(u32),
        Str(String),
    }

    enum Staged {
        Set(String, Value),
        Erase(String),
        EraseAll,
    }

    struct Session {
        namespace: String,
        mode: OpenMode,
        staged: Vec<Staged>,
    }

    #[derive(Default)]
    struct State {
        flash_ready: bool,
        namespaces: HashSet<String>,
        committed: HashMap<(String, String), Value>,
        sessions: HashMap<NvsHandle, Session>,
        next_handle: NvsHandle,
        init_results: VecDeque<Result<(), NvsError>>,
        erase_count: usize,
        lose_power_on_next_commit: bool,
        fail_next_set: Option<NvsError>,
    }

    /// In-memory NVS with staged writes and fault injection.
    ///
    /// Values staged on a handle become visible to other sessions only after
    /// a successful `commit`.  Closing a handle discards whatever it staged.
    #[derive(Default)]
    pub struct SimNvsBackend {
        state: Mutex<State>,
    }

    impl SimNvsBackend {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Results returned by successive `flash_init` calls before falling
        /// back to `Ok`.
        pub fn script_init_results(&self, results: impl IntoIterator<Item = Result<(), NvsError>>) {
            self.lock().init_results.extend(results);
        }

        /// The next `commit` fails and its staged writes are lost.
        pub fn lose_power_on_next_commit(&self) {
            self.lock().lose_power_on_next_commit = true;
        }

        /// The next `set_*` fails with `err`.
        pub fn fail_next_set(&self, err: NvsError) {
            self.lock().fail_next_set = Some(err);
        }

        /// Number of `flash_erase` calls so far.
        pub fn erase_count(&self) -> usize {
            self.lock().erase_count
        }

        /// Handles currently open.
        pub fn open_sessions(&self) -> usize {
            self.lock().sessions.len()
        }

        fn stage(&self, handle: NvsHandle, op: Staged) -> Result<(), NvsError> {
            let mut st = self.lock();
            if let Some(err) = st.fail_next_set.take() {
                return Err(err);
            }
            let session = st
                .sessions
                .get_mut(&handle)
                .ok_or(NvsError::Failed(ERR_INVALID_HANDLE))?;
            if session.mode == OpenMode::ReadOnly {
                return Err(NvsError::Failed(ERR_READ_ONLY));
            }
            session.staged.push(op);
            Ok(())
        }

        fn committed(&self, handle: NvsHandle, key: &str) -> Result<Value, NvsError> {
            let st = self.lock();
            let session = st
                .sessions
                .get(&handle)
                .ok_or(NvsError::Failed(ERR_INVALID_HANDLE))?;
            st.committed
                .get(&(session.namespace.clone(), key.to_owned()))
                .cloned()
                .ok_or(NvsError::NotFound)
        }
    }

    impl NvsBackend for SimNvsBackend {
        fn flash_init(&self) -> Result<(), NvsError> {
            let mut st = self.lock();
            let result = st.init_results.pop_front().unwrap_or(Ok(()));
            st.flash_ready = result.is_ok();
            result
        }

        fn flash_erase(&self) -> Result<(), NvsError> {
            let mut st = self.lock();
            st.erase_count += 1;
            st.committed.clear();
            st.namespaces.clear();
            st.flash_ready = false;
            Ok(())
        }

        fn open(&self, namespace: &str, mode: OpenMode) -> Result<NvsHandle, NvsError> {
            let mut st = self.lock();
            if !st.flash_ready {
                return Err(NvsError::Failed(ERR_NOT_INITIALIZED));
            }
            if !st.namespaces.contains(namespace) {
                if mode == OpenMode::ReadOnly {
                    return Err(NvsError::NotFound);
                }
                st.namespaces.insert(namespace.to_owned());
            }
            st.next_handle += 1;
            let handle = st.next_handle;
            st.sessions.insert(
                handle,
                Session {
                    namespace: namespace.to_owned(),
                    mode,
                    staged: Vec::new(),
                },
            );
            Ok(handle)
        }

        fn close(&self, handle: NvsHandle) {
            self.lock().sessions.remove(&handle);
        }

        fn set_u32(&self, handle: NvsHandle, key: &str, value: u32) -> Result<(), NvsError> {
            self.stage(handle, Staged::Set(key.to_owned(), Value::U32(value)))
        }

        fn set_str(&self, handle: NvsHandle, key: &str, value: &str) -> Result<(), NvsError> {
            self.stage(handle, Staged::Set(key.to_owned(), Value::Str(value.to_owned())))
        }

        fn get_u32(&self, handle: NvsHandle, key: &str) -> Result<u32, NvsError> {
            match self.committed(handle, key)? {
                Value::U32(v) => Ok(v),
                // NVS entries are typed; a lookup with the wrong type misses.
                Value::Str(_) => Err(NvsError::NotFound),
            }
        }

        fn get_str(&self, handle: NvsHandle, key: &str, buf: &mut [u8]) -> Result<usize, NvsError> {
            match self.committed(handle, key)? {
                Value::Str(s) => {
                    let bytes = s.as_bytes();
                    if bytes.len() > buf.len() {
                        return Err(NvsError::InvalidLength {
                            required: bytes.len(),
                        });
                    }
                    buf[..bytes.len()].copy_from_slice(bytes);
                    Ok(bytes.len())
                }
                Value::U32(_) => Err(NvsError::NotFound),
            }
        }

        fn erase_key(&self, handle: NvsHandle, key: &str) -> Result<(), NvsError> {
            self.committed(handle, key)?;
            self.stage(handle, Staged::Erase(key.to_owned()))
        }

        fn erase_all(&self, handle: NvsHandle) -> Result<(), NvsError> {
            self.stage(handle, Staged::EraseAll)
        }

        fn commit(&self, handle: NvsHandle) -> Result<(), NvsError> {
            let mut st = self.lock();
            let State {
                sessions,
                committed,
                lose_power_on_next_commit,
                ..
            } = &mut *st;
            let session = sessions
                .get_mut(&handle)
                .ok_or(NvsError::Failed(ERR_INVALID_HANDLE))?;
            if session.mode == OpenMode::ReadOnly {
                return Err(NvsError::Failed(ERR_READ_ONLY));
            }
            let staged = core::mem::take(&mut session.staged);
            if core::mem::take(lose_power_on_next_commit) {
                return Err(NvsError::Failed(ERR_FAIL));
            }
            for op in staged {
                match op {
                    Staged::Set(key, value) => {
                        committed.insert((session.namespace.clone(), key), value);
                    }
                    Staged::Erase(key) => {
                        committed.remove(&(session.namespace.clone(), key));
                    }
                    Staged::EraseAll => committed.retain(|(ns, _), _| *ns != session.namespace),
                }
            }
            Ok(())
        }
    }
}

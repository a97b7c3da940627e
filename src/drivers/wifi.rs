//! Station-mode WiFi radio drivers.
//!
//! - **`target_os = "espidf"`**: [`EspWifiDriver`] wraps `esp_idf_svc::wifi::EspWifi`
//!   and registers raw `esp_event` handlers that forward station and IP
//!   events into the link task.
//! - **all other targets**: [`SimWifiDriver`], a scripted radio for host tests.

#[cfg(target_os = "espidf")]
pub use esp::EspWifiDriver;

#[cfg(not(target_os = "espidf"))]
pub use sim::{SimLinkBehaviour, SimWifiDriver};

// ───────────────────────────────────────────────────────────────
// ESP-IDF
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use core::ffi::c_void;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_hal::modem::Modem;
    use esp_idf_svc::sys::*;
    use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};
    use log::{info, warn};

    use crate::adapters::wifi::LinkNotifier;
    use crate::app::link::LinkEvent;
    use crate::app::ports::{WifiDriver, WifiDriverError};
    use crate::config::WifiCredentials;

    /// Handler registrations, released in `deinit`.
    struct Registration {
        notifier: *mut LinkNotifier,
        wifi_instance: esp_event_handler_instance_t,
        ip_instance: esp_event_handler_instance_t,
    }

    // SAFETY: the raw pointers are only dereferenced by the event loop task
    // (notifier) and by `deinit` under the registration mutex.
    unsafe impl Send for Registration {}

    pub struct EspWifiDriver {
        wifi: Mutex<EspWifi<'static>>,
        registration: Mutex<Option<Registration>>,
    }

    fn driver_err(e: EspError) -> WifiDriverError {
        WifiDriverError::Driver(e.code())
    }

    fn check(ret: esp_err_t) -> Result<(), WifiDriverError> {
        EspError::convert(ret).map_err(driver_err)
    }

    /// Platform event callback.  Runs on the system event loop task; it only
    /// decodes the event and queues it without blocking.
    unsafe extern "C" fn on_platform_event(
        arg: *mut c_void,
        base: esp_event_base_t,
        id: i32,
        data: *mut c_void,
    ) {
        // SAFETY: `arg` is the leaked notifier registered alongside this
        // handler and is freed only after the handler is unregistered.
        let notifier = unsafe { &*(arg as *const LinkNotifier) };

        // SAFETY: the event bases are immutable statics defined by ESP-IDF.
        let (wifi_base, ip_base) = unsafe { (WIFI_EVENT, IP_EVENT) };

        let event = if base == wifi_base {
            match id as u32 {
                wifi_event_t_WIFI_EVENT_STA_START => Some(LinkEvent::StaStarted),
                wifi_event_t_WIFI_EVENT_STA_DISCONNECTED if !data.is_null() => {
                    // SAFETY: ESP-IDF passes a `wifi_event_sta_disconnected_t` for this id.
                    let ev = unsafe { &*(data as *const wifi_event_sta_disconnected_t) };
                    let reason = u8::try_from(ev.reason).unwrap_or(u8::MAX);
                    Some(LinkEvent::StaDisconnected { reason })
                }
                _ => None,
            }
        } else if base == ip_base && id as u32 == ip_event_t_IP_EVENT_STA_GOT_IP && !data.is_null() {
            // SAFETY: ESP-IDF passes an `ip_event_got_ip_t` for this id.
            let ev = unsafe { &*(data as *const ip_event_got_ip_t) };
            Some(LinkEvent::GotIp {
                addr: ev.ip_info.ip.addr.to_le_bytes(),
            })
        } else {
            None
        };

        if let Some(event) = event {
            notifier.notify(event);
        }
    }

    impl EspWifiDriver {
        pub fn new(modem: Modem, sysloop: EspSystemEventLoop) -> Result<Self, EspError> {
            // Credentials live in the KVS, not in the WiFi driver's own NVS area.
            let wifi = EspWifi::new(modem, sysloop, None)?;
            Ok(Self {
                wifi: Mutex::new(wifi),
                registration: Mutex::new(None),
            })
        }

        fn wifi(&self) -> MutexGuard<'_, EspWifi<'static>> {
            self.wifi.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl WifiDriver for EspWifiDriver {
        fn init(&self, notifier: LinkNotifier) -> Result<(), WifiDriverError> {
            let mut reg = self.registration.lock().unwrap_or_else(PoisonError::into_inner);
            if reg.is_some() {
                return Ok(());
            }

            self.wifi()
                .set_configuration(&Configuration::Client(ClientConfiguration::default()))
                .map_err(driver_err)?;

            let arg = Box::into_raw(Box::new(notifier));
            let mut wifi_instance: esp_event_handler_instance_t = core::ptr::null_mut();
            let mut ip_instance: esp_event_handler_instance_t = core::ptr::null_mut();

            // SAFETY: `arg` stays valid until both handlers are unregistered in
            // `deinit`; the out pointers are valid locals.
            let registered = unsafe {
                check(esp_event_handler_instance_register(
                    WIFI_EVENT,
                    ESP_EVENT_ANY_ID,
                    Some(on_platform_event),
                    arg.cast(),
                    &mut wifi_instance,
                ))
                .and_then(|()| {
                    check(esp_event_handler_instance_register(
                        IP_EVENT,
                        ip_event_t_IP_EVENT_STA_GOT_IP as i32,
                        Some(on_platform_event),
                        arg.cast(),
                        &mut ip_instance,
                    ))
                })
            };

            if let Err(e) = registered {
                // SAFETY: unregistering a null instance is rejected harmlessly;
                // after that no handler can observe `arg`.
                unsafe {
                    if !wifi_instance.is_null() {
                        esp_event_handler_instance_unregister(WIFI_EVENT, ESP_EVENT_ANY_ID, wifi_instance);
                    }
                    drop(Box::from_raw(arg));
                }
                return Err(e);
            }

            *reg = Some(Registration {
                notifier: arg,
                wifi_instance,
                ip_instance,
            });
            info!("WiFi: driver initialised in station mode");
            Ok(())
        }

        fn configure(&self, credentials: &WifiCredentials) -> Result<(), WifiDriverError> {
            let auth_method = if credentials.is_open_network() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            };
            let config = ClientConfiguration {
                ssid: credentials
                    .network_id
                    .as_str()
                    .try_into()
                    .map_err(|_| WifiDriverError::InvalidConfig)?,
                password: credentials
                    .secret
                    .as_str()
                    .try_into()
                    .map_err(|_| WifiDriverError::InvalidConfig)?,
                auth_method,
                ..Default::default()
            };
            self.wifi()
                .set_configuration(&Configuration::Client(config))
                .map_err(driver_err)
        }

        fn start(&self) -> Result<(), WifiDriverError> {
            self.wifi().start().map_err(driver_err)
        }

        fn connect(&self) -> Result<(), WifiDriverError> {
            self.wifi().connect().map_err(driver_err)
        }

        fn stop(&self) -> Result<(), WifiDriverError> {
            self.wifi().stop().map_err(driver_err)
        }

        fn deinit(&self) {
            let mut reg = self.registration.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(r) = reg.take() else {
                return;
            };
            // SAFETY: both instances came from successful registrations; once
            // unregistered no callback can reach the notifier, so it is freed.
            unsafe {
                if let Err(e) = check(esp_event_handler_instance_unregister(
                    WIFI_EVENT,
                    ESP_EVENT_ANY_ID,
                    r.wifi_instance,
                )) {
                    warn!("WiFi: unregister station handler failed: {}", e);
                }
                if let Err(e) = check(esp_event_handler_instance_unregister(
                    IP_EVENT,
                    ip_event_t_IP_EVENT_STA_GOT_IP as i32,
                    r.ip_instance,
                )) {
                    warn!("WiFi: unregister IP handler failed: {}", e);
                }
                drop(Box::from_raw(r.notifier));
            }
            info!("WiFi: driver handlers released");
        }

        fn is_station(&self) -> bool {
            let mut mode: wifi_mode_t = wifi_mode_t_WIFI_MODE_NULL;
            // SAFETY: `mode` is a valid out pointer.
            let ret = unsafe { esp_wifi_get_mode(&mut mode) };
            check(ret).is_ok()
                && (mode == wifi_mode_t_WIFI_MODE_STA || mode == wifi_mode_t_WIFI_MODE_APSTA)
        }
    }

    impl Drop for EspWifiDriver {
        fn drop(&mut self) {
            self.deinit();
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use log::info;

    use crate::adapters::wifi::LinkNotifier;
    use crate::app::link::LinkEvent;
    use crate::app::ports::{WifiDriver, WifiDriverError};
    use crate::config::WifiCredentials;

    /// How the simulated access point answers a connect request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SimLinkBehaviour {
        /// Associate and hand out an address.
        Associate,
        /// Refuse with the given disconnect reason.
        Reject { reason: u8 },
        /// Never answer.
        Silent,
    }

    #[derive(Default)]
    struct State {
        notifier: Option<LinkNotifier>,
        behaviour: Option<SimLinkBehaviour>,
        network: Option<String>,
        station: bool,
        fail_start: bool,
        init_calls: usize,
        start_calls: usize,
        connect_calls: usize,
    }

    /// Scripted radio.  Defaults to [`SimLinkBehaviour::Associate`].
    #[derive(Default)]
    pub struct SimWifiDriver {
        state: Mutex<State>,
    }

    /// Address handed out by the simulated access point.
    const SIM_ADDR: [u8; 4] = [192, 168, 4, 2];

    impl SimWifiDriver {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub fn set_behaviour(&self, behaviour: SimLinkBehaviour) {
            self.lock().behaviour = Some(behaviour);
        }

        /// Make the next `start` fail.
        pub fn fail_next_start(&self) {
            self.lock().fail_start = true;
        }

        /// Deliver a platform notification as the event loop would.
        /// Returns `false` if the driver is not initialised or the queue is full.
        pub fn inject(&self, event: LinkEvent) -> bool {
            let notifier = self.lock().notifier.clone();
            notifier.is_some_and(|n| n.notify(event))
        }

        pub fn init_calls(&self) -> usize {
            self.lock().init_calls
        }

        pub fn start_calls(&self) -> usize {
            self.lock().start_calls
        }

        pub fn connect_calls(&self) -> usize {
            self.lock().connect_calls
        }

        pub fn configured_network(&self) -> Option<String> {
            self.lock().network.clone()
        }
    }

    impl WifiDriver for SimWifiDriver {
        fn init(&self, notifier: LinkNotifier) -> Result<(), WifiDriverError> {
            let mut st = self.lock();
            st.notifier = Some(notifier);
            st.station = true;
            st.init_calls += 1;
            info!("WiFi(sim): driver initialised");
            Ok(())
        }

        fn configure(&self, credentials: &WifiCredentials) -> Result<(), WifiDriverError> {
            self.lock().network = Some(credentials.network_id.as_str().to_owned());
            Ok(())
        }

        fn start(&self) -> Result<(), WifiDriverError> {
            let notifier = {
                let mut st = self.lock();
                st.start_calls += 1;
                if core::mem::take(&mut st.fail_start) {
                    return Err(WifiDriverError::Driver(-1));
                }
                st.notifier.clone()
            };
            if let Some(n) = notifier {
                n.notify(LinkEvent::StaStarted);
            }
            Ok(())
        }

        fn connect(&self) -> Result<(), WifiDriverError> {
            let (notifier, behaviour) = {
                let mut st = self.lock();
                st.connect_calls += 1;
                (
                    st.notifier.clone(),
                    st.behaviour.unwrap_or(SimLinkBehaviour::Associate),
                )
            };
            let Some(n) = notifier else {
                return Err(WifiDriverError::Driver(-1));
            };
            match behaviour {
                SimLinkBehaviour::Associate => {
                    n.notify(LinkEvent::GotIp { addr: SIM_ADDR });
                }
                SimLinkBehaviour::Reject { reason } => {
                    n.notify(LinkEvent::StaDisconnected { reason });
                }
                SimLinkBehaviour::Silent => {}
            }
            Ok(())
        }

        fn stop(&self) -> Result<(), WifiDriverError> {
            info!("WiFi(sim): station stopped");
            Ok(())
        }

        fn deinit(&self) {
            let mut st = self.lock();
            st.notifier = None;
            st.station = false;
        }

        fn is_station(&self) -> bool {
            self.lock().station
        }
    }
}

//! `SimulatedRadio`: a `WlanDriver` for hosts without a controllable radio.
//!
//! # Behaviour (for beginners)
//!
//! A real radio driver answers configuration calls immediately and reports
//! what actually happened later, through the link callback, from a context
//! the application does not own.  The simulation keeps that shape:
//!
//! - `commit()` in station mode looks the staged SSID up in the configured
//!   network list and checks the staged credentials.  After `link_delay_ms`
//!   a background thread updates the link state and fires the callback:
//!   `1` then `16` for a good handshake, `1` then `10` for a bad
//!   passphrase, `0` when the network does not exist.
//! - `request_lease()` returns nothing at first; the lease appears in
//!   `ip_config()` after `lease_delay_ms`.
//! - `start_ap()` fires `1` at once for the AP itself and, if configured,
//!   `1` again after `ap_client_delay_ms` when a client joins.
//!
//! Every asynchronous notification is stamped with a generation counter.
//! `disconnect`, `commit` and `start_ap` bump the counter, so a notification
//! scheduled for an earlier attempt is dropped instead of firing late.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use airlink_core::driver::{
    cipher_suite, AuthMode, BssInfo, EncryptMode, FirmwareVersion, LinkCallback, LinkState,
    OperatingMode, WepAuth,
};
use airlink_core::{CipherType, DriverError, IpConfig, SecurityType, WlanDriver};
use tracing::{debug, info, trace, warn};

use super::storage::config::{RadioSection, SimNetwork};

/// Raw link notification codes, as a radio reports them.
mod code {
    pub const DOWN: i32 = 0;
    pub const UP: i32 = 1;
    pub const AUTH_FAILED: i32 = 10;
    pub const AUTH_OK: i32 = 16;
}

/// Configuration staged by the setters and applied by `commit`/`start_ap`.
#[derive(Debug, Clone)]
struct Staged {
    mode: OperatingMode,
    ssid: String,
    auth: AuthMode,
    encrypt: EncryptMode,
    passphrase: String,
    wep_key: Option<String>,
    hidden: bool,
}

impl Default for Staged {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Station,
            ssid: String::new(),
            auth: AuthMode::None,
            encrypt: EncryptMode::None,
            passphrase: String::new(),
            wep_key: None,
            hidden: false,
        }
    }
}

/// Outcome of a station `commit` against the simulated network list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Association {
    Joined { handshake: bool },
    Rejected,
    NoSuchNetwork,
}

/// State shared with the notification threads.
struct Shared {
    device_id: u8,
    callback: Mutex<Option<LinkCallback>>,
    link: AtomicU8,
    generation: AtomicU64,
    ip: Mutex<IpConfig>,
}

impl Shared {
    fn set_link(&self, state: LinkState) {
        let raw = match state {
            LinkState::Disconnected => 0,
            LinkState::Connecting => 1,
            LinkState::Connected => 2,
        };
        self.link.store(raw, Ordering::Release);
    }

    fn link(&self) -> LinkState {
        match self.link.load(Ordering::Acquire) {
            2 => LinkState::Connected,
            1 => LinkState::Connecting,
            _ => LinkState::Disconnected,
        }
    }

    /// Fires the installed callback.  The lock is released before the call.
    fn notify(&self, code: i32) {
        let callback = self.callback.lock().ok().and_then(|guard| guard.clone());
        match callback {
            Some(callback) => {
                trace!("radio: notify code {code}");
                callback(self.device_id, code);
            }
            None => trace!("radio: code {code} with no callback installed"),
        }
    }

    fn set_ip(&self, config: IpConfig) {
        if let Ok(mut ip) = self.ip.lock() {
            *ip = config;
        }
    }
}

/// Simulated radio driven by the `[radio]` configuration section.
pub struct SimulatedRadio {
    config: RadioSection,
    shared: Arc<Shared>,
    staged: Mutex<Staged>,
    dhcp_enabled: AtomicBool,
    scan_results: Mutex<Vec<BssInfo>>,
}

impl SimulatedRadio {
    pub fn new(device_id: u8, config: RadioSection) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                device_id,
                callback: Mutex::new(None),
                link: AtomicU8::new(0),
                generation: AtomicU64::new(0),
                ip: Mutex::new(IpConfig::UNASSIGNED),
            }),
            staged: Mutex::new(Staged::default()),
            dhcp_enabled: AtomicBool::new(false),
            scan_results: Mutex::new(Vec::new()),
        }
    }

    fn staged(&self) -> Staged {
        self.staged
            .lock()
            .map(|staged| staged.clone())
            .unwrap_or_default()
    }

    fn stage(&self, update: impl FnOnce(&mut Staged)) {
        if let Ok(mut staged) = self.staged.lock() {
            update(&mut staged);
        }
    }

    /// Invalidates every pending notification and returns the new generation.
    fn next_generation(&self) -> u64 {
        self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Runs `action` on a background thread after `delay`, unless another
    /// attempt has started in the meantime.
    fn after<F>(&self, delay: Duration, generation: u64, action: F)
    where
        F: FnOnce(&Shared) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            thread::sleep(delay);
            if shared.generation.load(Ordering::Acquire) == generation {
                action(&shared);
            } else {
                trace!("radio: stale notification dropped");
            }
        });
    }

    fn link_delay(&self) -> Duration {
        Duration::from_millis(self.config.link_delay_ms)
    }

    fn network(&self, ssid: &str) -> Option<&SimNetwork> {
        self.config.networks.iter().find(|n| n.ssid == ssid)
    }

    fn associate(&self, staged: &Staged) -> Association {
        let Some(network) = self.network(&staged.ssid) else {
            return Association::NoSuchNetwork;
        };
        let expected = network.passphrase.as_deref().unwrap_or("");
        match network.security {
            SecurityType::None => Association::Joined { handshake: false },
            SecurityType::Wep => match staged.wep_key.as_deref() {
                Some(key) if key == expected => Association::Joined { handshake: false },
                _ => Association::Rejected,
            },
            SecurityType::Wpa | SecurityType::Wpa2 => {
                let auth = if network.security == SecurityType::Wpa2 {
                    AuthMode::Wpa2Psk
                } else {
                    AuthMode::WpaPsk
                };
                if staged.auth == auth && staged.passphrase == expected {
                    Association::Joined { handshake: true }
                } else {
                    Association::Rejected
                }
            }
        }
    }
}

/// Beacon flags a network of the given security would advertise.
fn beacon(index: usize, network: &SimNetwork) -> BssInfo {
    let suite = match network.cipher {
        CipherType::None => 0,
        CipherType::Wep => cipher_suite::WEP,
        CipherType::Tkip => cipher_suite::TKIP,
        CipherType::Ccmp => cipher_suite::CCMP,
    };
    let mut bssid = [0x02, 0, 0, 0, 0, 0];
    bssid[4] = (index >> 8) as u8;
    bssid[5] = (index as u8).wrapping_add(1);

    BssInfo {
        ssid: network.ssid.clone(),
        bssid,
        rssi: network.rssi,
        security_enabled: network.security != SecurityType::None,
        rsn_auth: network.security == SecurityType::Wpa2,
        rsn_cipher: if network.security == SecurityType::Wpa2 { suite } else { 0 },
        wpa_auth: network.security == SecurityType::Wpa,
        wpa_cipher: if network.security == SecurityType::Wpa { suite } else { 0 },
    }
}

impl WlanDriver for SimulatedRadio {
    fn device_id(&self) -> u8 {
        self.shared.device_id
    }

    fn set_link_callback(&self, callback: LinkCallback) {
        if let Ok(mut slot) = self.shared.callback.lock() {
            *slot = Some(callback);
        }
    }

    fn set_mode(&self, mode: OperatingMode) {
        debug!("radio: mode {mode:?}");
        self.stage(|s| s.mode = mode);
    }

    fn disconnect(&self) -> Result<(), DriverError> {
        let generation = self.next_generation();
        let was = self.shared.link();
        self.shared.set_link(LinkState::Disconnected);
        self.shared.set_ip(IpConfig::UNASSIGNED);
        if was != LinkState::Disconnected {
            debug!("radio: dropping link");
            self.after(self.link_delay(), generation, |shared| {
                shared.notify(code::DOWN)
            });
        }
        Ok(())
    }

    fn set_wep_key(&self, slot: u8, key: &str) {
        debug!("radio: WEP key slot {slot} ({} bytes)", key.len());
        let key = key.to_string();
        self.stage(|s| s.wep_key = Some(key));
    }

    fn set_wep_key_index(&self, slot: u8) {
        trace!("radio: WEP key index {slot}");
    }

    fn set_wep_auth(&self, auth: WepAuth) {
        trace!("radio: WEP auth {auth:?}");
    }

    fn set_auth_mode(&self, mode: AuthMode) {
        debug!("radio: auth mode {mode:?}");
        self.stage(|s| s.auth = mode);
    }

    fn set_passphrase(&self, passphrase: &str) {
        debug!("radio: passphrase ({} bytes)", passphrase.len());
        let passphrase = passphrase.to_string();
        self.stage(|s| s.passphrase = passphrase);
    }

    fn set_encrypt_mode(&self, mode: EncryptMode) {
        debug!("radio: encryption {mode:?}");
        self.stage(|s| s.encrypt = mode);
    }

    fn set_ssid(&self, ssid: &str) {
        let ssid = ssid.to_string();
        self.stage(|s| s.ssid = ssid);
    }

    fn commit(&self) {
        let staged = self.staged();
        let generation = self.next_generation();
        if staged.mode != OperatingMode::Station {
            debug!("radio: commit outside station mode ignored");
            return;
        }

        let outcome = self.associate(&staged);
        info!(
            "radio: joining {:?} (encryption {:?}) -> {outcome:?}",
            staged.ssid, staged.encrypt
        );
        self.after(self.link_delay(), generation, move |shared| match outcome {
            Association::Joined { handshake } => {
                // Notify first so the state has settled once the link reads up.
                shared.notify(code::UP);
                if handshake {
                    shared.notify(code::AUTH_OK);
                }
                shared.set_link(LinkState::Connected);
            }
            Association::Rejected => {
                shared.set_link(LinkState::Connecting);
                shared.notify(code::UP);
                shared.notify(code::AUTH_FAILED);
            }
            Association::NoSuchNetwork => shared.notify(code::DOWN),
        });
    }

    fn link_state(&self) -> LinkState {
        self.shared.link()
    }

    fn enable_dhcp_client(&self) {
        self.dhcp_enabled.store(true, Ordering::Release);
    }

    fn request_lease(&self) -> IpConfig {
        if !self.dhcp_enabled.load(Ordering::Acquire) {
            warn!("radio: DHCP request with the client disabled");
            return IpConfig::UNASSIGNED;
        }
        if self.shared.link() != LinkState::Connected {
            warn!("radio: DHCP request without a link");
            return IpConfig::UNASSIGNED;
        }

        let lease = IpConfig {
            address: self.config.lease_address,
            netmask: self.config.netmask,
            gateway: self.config.gateway,
        };
        if self.config.lease_delay_ms == 0 {
            self.shared.set_ip(lease);
            return lease;
        }

        let generation = self.shared.generation.load(Ordering::Acquire);
        self.after(
            Duration::from_millis(self.config.lease_delay_ms),
            generation,
            move |shared| {
                debug!("radio: lease {} granted", lease.address);
                shared.set_ip(lease);
            },
        );
        IpConfig::UNASSIGNED
    }

    fn ip_config(&self) -> Result<IpConfig, DriverError> {
        self.shared
            .ip
            .lock()
            .map(|ip| *ip)
            .map_err(|_| DriverError::Status(-1))
    }

    fn set_ip_config(&self, config: IpConfig) {
        self.shared.set_ip(config);
    }

    fn set_hidden(&self, hidden: bool) {
        self.stage(|s| s.hidden = hidden);
    }

    fn set_dhcp_pool(&self, start: Ipv4Addr, end: Ipv4Addr, lease: Duration) {
        debug!("radio: DHCP pool {start}-{end}, lease {lease:?}");
        let [a, b, c, _] = start.octets();
        let gateway = Ipv4Addr::new(a, b, c, 1);
        self.shared.set_ip(IpConfig {
            address: gateway,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway,
        });
    }

    fn start_ap(&self, ssid: &str) {
        let staged = self.staged();
        let generation = self.next_generation();
        self.shared.set_link(LinkState::Disconnected);
        info!(
            "radio: access point {ssid:?} starting (hidden={}, auth={:?})",
            staged.hidden, staged.auth
        );

        // The AP itself comes up at once; only the client join is delayed.
        self.shared.notify(code::UP);
        if self.config.ap_client_joins {
            self.after(
                Duration::from_millis(self.config.ap_client_delay_ms),
                generation,
                |shared| {
                    shared.notify(code::UP);
                    shared.set_link(LinkState::Connected);
                },
            );
        }
    }

    fn start_scan(&self) {
        let results: Vec<BssInfo> = self
            .config
            .networks
            .iter()
            .enumerate()
            .map(|(index, network)| beacon(index, network))
            .collect();
        debug!("radio: scan will report {} networks", results.len());
        if let Ok(mut slot) = self.scan_results.lock() {
            *slot = results;
        }
    }

    fn scan_count(&self) -> usize {
        self.scan_results.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn scan_entry(&self, index: usize) -> Option<BssInfo> {
        self.scan_results
            .lock()
            .ok()
            .and_then(|r| r.get(index).cloned())
    }

    fn firmware_version(&self) -> FirmwareVersion {
        FirmwareVersion {
            date: "n/a".to_string(),
            time: "n/a".to_string(),
            version: format!("simulated-{}", env!("CARGO_PKG_VERSION")),
            changelist: "0".to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use airlink_core::wifi::classify;
    use std::sync::mpsc;
    use std::time::Instant;

    fn config(networks: Vec<SimNetwork>) -> RadioSection {
        RadioSection {
            networks,
            link_delay_ms: 5,
            lease_delay_ms: 5,
            ap_client_delay_ms: 5,
            ..RadioSection::default()
        }
    }

    fn network(ssid: &str, security: SecurityType, passphrase: Option<&str>) -> SimNetwork {
        SimNetwork {
            ssid: ssid.to_string(),
            rssi: 60,
            security,
            cipher: match security {
                SecurityType::None => CipherType::None,
                SecurityType::Wep => CipherType::Wep,
                SecurityType::Wpa => CipherType::Tkip,
                SecurityType::Wpa2 => CipherType::Ccmp,
            },
            passphrase: passphrase.map(str::to_string),
        }
    }

    /// Installs a callback that forwards `(device, code)` into a channel.
    fn listen(radio: &SimulatedRadio) -> mpsc::Receiver<(u8, i32)> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        radio.set_link_callback(Arc::new(move |device, code| {
            if let Ok(tx) = tx.lock() {
                tx.send((device, code)).ok();
            }
        }));
        rx
    }

    fn codes(rx: &mpsc::Receiver<(u8, i32)>, count: usize) -> Vec<i32> {
        (0..count)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("notification").1)
            .collect()
    }

    /// The link state settles just after the last notification.
    fn settles_to(radio: &SimulatedRadio, state: LinkState) -> bool {
        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(2) {
            if radio.link_state() == state {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_open_network_commit_fires_up_and_connects() {
        // Arrange
        let radio = SimulatedRadio::new(4, config(vec![network("cafe", SecurityType::None, None)]));
        let rx = listen(&radio);
        radio.set_ssid("cafe");

        // Act
        radio.commit();

        // Assert
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), (4, code::UP));
        assert!(settles_to(&radio, LinkState::Connected));
    }

    #[test]
    fn test_wpa2_with_correct_passphrase_reports_auth_ok() {
        let radio = SimulatedRadio::new(
            0,
            config(vec![network("home", SecurityType::Wpa2, Some("hunter22"))]),
        );
        let rx = listen(&radio);
        radio.set_auth_mode(AuthMode::Wpa2Psk);
        radio.set_passphrase("hunter22");
        radio.set_ssid("home");

        radio.commit();

        assert_eq!(codes(&rx, 2), [code::UP, code::AUTH_OK]);
    }

    #[test]
    fn test_wpa2_with_wrong_passphrase_reports_auth_failed() {
        // Arrange
        let radio = SimulatedRadio::new(
            0,
            config(vec![network("home", SecurityType::Wpa2, Some("hunter22"))]),
        );
        let rx = listen(&radio);
        radio.set_auth_mode(AuthMode::Wpa2Psk);
        radio.set_passphrase("nope");
        radio.set_ssid("home");

        // Act
        radio.commit();

        // Assert
        assert_eq!(codes(&rx, 2), [code::UP, code::AUTH_FAILED]);
        assert_eq!(radio.link_state(), LinkState::Connecting);
    }

    #[test]
    fn test_unknown_ssid_reports_down() {
        let radio = SimulatedRadio::new(0, config(vec![]));
        let rx = listen(&radio);
        radio.set_ssid("ghost");

        radio.commit();

        assert_eq!(codes(&rx, 1), [code::DOWN]);
        assert_eq!(radio.link_state(), LinkState::Disconnected);
    }

    #[test]
    fn test_disconnect_cancels_pending_association() {
        // Arrange: a long link delay so disconnect lands first
        let mut cfg = config(vec![network("cafe", SecurityType::None, None)]);
        cfg.link_delay_ms = 50;
        let radio = SimulatedRadio::new(0, cfg);
        let rx = listen(&radio);
        radio.set_ssid("cafe");

        // Act
        radio.commit();
        radio.disconnect().unwrap();

        // Assert
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(radio.link_state(), LinkState::Disconnected);
    }

    #[test]
    fn test_lease_appears_after_delay() {
        // Arrange
        let radio = SimulatedRadio::new(0, config(vec![network("cafe", SecurityType::None, None)]));
        let rx = listen(&radio);
        radio.set_ssid("cafe");
        radio.commit();
        codes(&rx, 1);
        assert!(settles_to(&radio, LinkState::Connected));
        radio.enable_dhcp_client();

        // Act
        let immediate = radio.request_lease();
        let started = Instant::now();
        let mut lease = radio.ip_config().unwrap();
        while !lease.is_assigned() && started.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(2));
            lease = radio.ip_config().unwrap();
        }

        // Assert
        assert!(!immediate.is_assigned());
        assert_eq!(lease.address, RadioSection::default().lease_address);
    }

    #[test]
    fn test_request_lease_without_dhcp_client_returns_nothing() {
        let radio = SimulatedRadio::new(0, config(vec![]));
        assert!(!radio.request_lease().is_assigned());
    }

    #[test]
    fn test_scan_entries_classify_like_their_config() {
        // Arrange
        let radio = SimulatedRadio::new(
            0,
            config(vec![
                network("open", SecurityType::None, None),
                network("legacy", SecurityType::Wep, Some("abcde")),
                network("old", SecurityType::Wpa, Some("x")),
                network("home", SecurityType::Wpa2, Some("y")),
            ]),
        );

        // Act
        radio.start_scan();
        let classified: Vec<_> = (0..radio.scan_count())
            .map(|i| classify(&radio.scan_entry(i).unwrap()))
            .collect();

        // Assert
        assert_eq!(
            classified,
            [
                (SecurityType::None, CipherType::None),
                (SecurityType::Wep, CipherType::Wep),
                (SecurityType::Wpa, CipherType::Tkip),
                (SecurityType::Wpa2, CipherType::Ccmp),
            ]
        );
        assert_eq!(radio.scan_entry(4), None);
    }

    #[test]
    fn test_soft_ap_reports_up_then_client() {
        // Arrange
        let radio = SimulatedRadio::new(0, config(vec![]));
        let rx = listen(&radio);
        radio.set_mode(OperatingMode::SoftAp);

        // Act
        radio.start_ap("setup");

        // Assert
        assert_eq!(codes(&rx, 2), [code::UP, code::UP]);
        assert!(settles_to(&radio, LinkState::Connected));
    }

    #[test]
    fn test_commit_in_soft_ap_mode_does_nothing() {
        let radio = SimulatedRadio::new(0, config(vec![network("cafe", SecurityType::None, None)]));
        let rx = listen(&radio);
        radio.set_mode(OperatingMode::SoftAp);
        radio.set_ssid("cafe");

        radio.commit();

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}

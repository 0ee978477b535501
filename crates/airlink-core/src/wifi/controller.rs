//! `WifiController`: drives the radio driver through association, soft-AP
//! bring-up and DHCP.
//!
//! # Blocking with bounded polls (for beginners)
//!
//! The driver gives no synchronous "connected" or "lease ready" answer.
//! Every wait here is therefore a loop that asks the driver, sleeps a fixed
//! interval and subtracts it from a budget.  Running out of budget is always
//! reported as an error ([`WifiError::Connect`] or [`WifiError::Timeout`]),
//! never as silent success.
//!
//! Link notifications arrive separately, through a callback the controller
//! installs into the driver.  The callback and the polling thread share one
//! [`ConnectionCell`].

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::scan::{rank_scan_results, ScanRecord};
use super::state::{ConnectState, ConnectionCell, LinkEvent, SoftApSignal, StationSignal};
use super::{CipherType, IpConfig, SecurityType, WifiError};
use crate::driver::{
    AuthMode, EncryptMode, FirmwareVersion, LinkCallback, LinkState, OperatingMode, Platform,
    WepAuth, WlanDriver,
};

/// First address handed out by the soft-AP DHCP server.
pub const SOFT_AP_POOL_START: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);
/// Last address handed out by the soft-AP DHCP server.
pub const SOFT_AP_POOL_END: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 199);
/// Lease time of the soft-AP DHCP server.
pub const SOFT_AP_LEASE: Duration = Duration::from_secs(60 * 60);

/// WEP keys live in this driver key slot.
const WEP_KEY_SLOT: u8 = 1;
/// Longest WEP key the driver accepts, in bytes.
const WEP_KEY_MAX: usize = 32;

/// Floor for every poll interval; a zero interval would never spend a budget.
const MIN_POLL: Duration = Duration::from_millis(1);

/// Poll intervals and budgets used by [`WifiController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifiTimings {
    pub connect_poll: Duration,
    pub connect_timeout: Duration,
    pub dhcp_poll: Duration,
    /// How long a scan runs before results are read.
    pub scan_settle: Duration,
    pub client_poll: Duration,
    /// Pause between starting the access point and declaring it up.
    pub ap_settle: Duration,
}

impl Default for WifiTimings {
    fn default() -> Self {
        Self {
            connect_poll: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(10),
            dhcp_poll: Duration::from_millis(100),
            scan_settle: Duration::from_secs(8),
            client_poll: Duration::from_millis(100),
            ap_settle: Duration::from_millis(10),
        }
    }
}

/// Station and soft-AP lifecycle on top of a [`WlanDriver`].
pub struct WifiController {
    driver: Arc<dyn WlanDriver>,
    platform: Arc<dyn Platform>,
    cell: Arc<ConnectionCell>,
    timings: WifiTimings,
}

impl WifiController {
    pub fn new(driver: Arc<dyn WlanDriver>, platform: Arc<dyn Platform>) -> Self {
        Self {
            driver,
            platform,
            cell: Arc::new(ConnectionCell::new()),
            timings: WifiTimings::default(),
        }
    }

    /// Replaces the default poll intervals and budgets.
    ///
    /// Poll intervals shorter than 1 ms are raised to 1 ms.
    pub fn with_timings(mut self, timings: WifiTimings) -> Self {
        self.timings = WifiTimings {
            connect_poll: timings.connect_poll.max(MIN_POLL),
            dhcp_poll: timings.dhcp_poll.max(MIN_POLL),
            client_poll: timings.client_poll.max(MIN_POLL),
            ..timings
        };
        self
    }

    pub fn timings(&self) -> &WifiTimings {
        &self.timings
    }

    /// Current association state.
    pub fn state(&self) -> ConnectState {
        self.cell.get()
    }

    /// Joins `ssid` as a station and enables the DHCP client.
    ///
    /// Tears down any existing association first, programs security and
    /// cipher, commits, then polls the link state every
    /// [`connect_poll`](WifiTimings::connect_poll) for at most
    /// [`connect_timeout`](WifiTimings::connect_timeout).
    ///
    /// # Errors
    ///
    /// [`WifiError::Connect`] if the link did not come up in time.  The state
    /// is then [`ConnectState::ConnectFailed`].
    pub fn connect(
        &self,
        ssid: &str,
        security: SecurityType,
        cipher: CipherType,
        passphrase: &str,
    ) -> Result<(), WifiError> {
        self.cell.set(ConnectState::Idle);
        self.disconnect()?;

        info!(
            "connecting to {ssid:?} (security={security:?}, cipher={cipher:?}, passphrase {} bytes)",
            passphrase.len()
        );

        self.cell.set_security(security);
        self.driver
            .set_link_callback(station_callback(Arc::clone(&self.cell), self.driver.device_id()));
        self.driver.set_mode(OperatingMode::Station);

        match security {
            SecurityType::Wep => {
                // Switching from AP to station wipes WEP keys on commit, so
                // the radio must be disconnected before the key is stored.
                if let Err(e) = self.driver.disconnect() {
                    debug!("connect: pre-WEP disconnect returned {e}");
                }
                self.driver.set_wep_key(WEP_KEY_SLOT, wep_key(passphrase));
                self.driver.set_wep_key_index(WEP_KEY_SLOT);
                self.driver.set_wep_auth(WepAuth::Auto);
            }
            SecurityType::Wpa => {
                self.driver.set_auth_mode(AuthMode::WpaPsk);
                self.driver.set_passphrase(passphrase);
            }
            SecurityType::Wpa2 => {
                self.driver.set_auth_mode(AuthMode::Wpa2Psk);
                self.driver.set_passphrase(passphrase);
            }
            SecurityType::None => {}
        }
        self.driver.set_encrypt_mode(encrypt_mode(cipher));

        self.driver.set_ssid(ssid);
        self.driver.commit();

        if self.wait_for_link() {
            self.cell.set(ConnectState::ConnectOk);
            self.driver.enable_dhcp_client();
            info!("associated with {ssid:?}");
            Ok(())
        } else {
            self.cell.set(ConnectState::ConnectFailed);
            error!(
                "association with {ssid:?} not confirmed within {:?}",
                self.timings.connect_timeout
            );
            Err(WifiError::Connect {
                ssid: ssid.to_string(),
            })
        }
    }

    /// Polls until the driver reports the associated link state or the
    /// connect budget is spent.
    fn wait_for_link(&self) -> bool {
        let poll = self.timings.connect_poll;
        let mut remaining = self.timings.connect_timeout;
        loop {
            let link = self.driver.link_state();
            trace!("connect: link state {link:?}");
            if link == LinkState::Connected {
                return true;
            }
            self.platform.sleep(poll);
            remaining = remaining.saturating_sub(poll);
            if remaining.is_zero() {
                return false;
            }
        }
    }

    /// Asks the driver to drop the current association.
    ///
    /// Does nothing while a disconnect is already pending.  If the driver
    /// refuses, the previous state is restored.  Always succeeds; the result
    /// type leaves room for platforms where a disconnect can fail.
    pub fn disconnect(&self) -> Result<(), WifiError> {
        let previous = self.cell.get();
        if previous == ConnectState::Disconnecting {
            debug!("disconnect: already disconnecting");
            return Ok(());
        }

        if previous != ConnectState::Idle {
            self.cell.set(ConnectState::Disconnecting);
        }
        if let Err(e) = self.driver.disconnect() {
            warn!("disconnect: driver refused ({e}), staying {previous}");
            self.cell.set(previous);
        }
        Ok(())
    }

    /// Starts an access point named `ssid` and waits for a client.
    ///
    /// With no passphrase (or an empty one) the AP is open, otherwise it uses
    /// WPA2-PSK with CCMP.  Clients get addresses from
    /// [`SOFT_AP_POOL_START`]..=[`SOFT_AP_POOL_END`].
    ///
    /// # Errors
    ///
    /// [`WifiError::Timeout`] if no client attached within `client_timeout`.
    /// The AP stays up ([`ConnectState::SoftApUp`]) in that case.
    pub fn enable_soft_ap(
        &self,
        ssid: &str,
        hidden: bool,
        passphrase: Option<&str>,
        client_timeout: Duration,
    ) -> Result<(), WifiError> {
        self.cell.set(ConnectState::Idle);
        self.disconnect()?;

        let passphrase = passphrase.filter(|p| !p.is_empty());
        self.cell.set_security(if passphrase.is_some() {
            SecurityType::Wpa2
        } else {
            SecurityType::None
        });
        info!(
            "starting soft AP {ssid:?} (hidden={hidden}, {})",
            if passphrase.is_some() { "wpa2-psk" } else { "open" }
        );

        self.cell.set(ConnectState::SoftApInit);
        self.driver
            .set_link_callback(soft_ap_callback(Arc::clone(&self.cell), self.driver.device_id()));
        self.driver.set_mode(OperatingMode::SoftAp);

        if hidden {
            self.driver.set_hidden(true);
        }
        if let Some(passphrase) = passphrase {
            self.driver.set_auth_mode(AuthMode::Wpa2Psk);
            self.driver.set_encrypt_mode(EncryptMode::Aes);
            self.driver.set_passphrase(passphrase);
        }

        self.driver
            .set_dhcp_pool(SOFT_AP_POOL_START, SOFT_AP_POOL_END, SOFT_AP_LEASE);
        self.driver.start_ap(ssid);
        self.platform.sleep(self.timings.ap_settle);
        self.cell.set(ConnectState::SoftApUp);
        info!("soft AP {ssid:?} up, waiting for a client");

        let poll = self.timings.client_poll;
        let mut remaining = client_timeout;
        loop {
            if self.driver.link_state() != LinkState::Disconnected {
                self.cell.set(ConnectState::StationOk);
                info!("soft AP {ssid:?}: client attached");
                return Ok(());
            }
            if remaining.is_zero() {
                warn!("soft AP {ssid:?}: no client within {client_timeout:?}");
                return Err(WifiError::Timeout {
                    waited: client_timeout,
                });
            }
            self.platform.sleep(poll);
            remaining = remaining.saturating_sub(poll);
        }
    }

    /// Scans, ranks the results strongest first and hands at most
    /// `max_records` of them to `on_record`.  Returns how many were handed out.
    ///
    /// # Errors
    ///
    /// [`WifiError::NoNetworks`] if the scan found nothing.
    pub fn scan<F>(&self, max_records: usize, mut on_record: F) -> Result<usize, WifiError>
    where
        F: FnMut(&ScanRecord),
    {
        self.driver.start_scan();
        self.platform.sleep(self.timings.scan_settle);

        let count = self.driver.scan_count();
        info!("scan found {count} networks");
        if count == 0 {
            error!("scan: no networks found");
            return Err(WifiError::NoNetworks);
        }

        let entries = (0..count)
            .filter_map(|index| {
                let entry = self.driver.scan_entry(index);
                if entry.is_none() {
                    warn!("scan: entry {index} of {count} missing");
                }
                entry
            })
            .collect();

        let ranked = rank_scan_results(entries);
        let mut delivered = 0;
        for record in ranked.iter().take(max_records) {
            debug!(
                "scan: {:?} {} rssi={} {:?}/{:?}",
                record.ssid,
                record.bssid_string(),
                record.rssi,
                record.security,
                record.cipher
            );
            on_record(record);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Obtains an IPv4 address.
    ///
    /// In station mode this clears the current address, starts a DHCP
    /// request and polls every [`dhcp_poll`](WifiTimings::dhcp_poll) until
    /// an address appears or `timeout` is spent.  In soft-AP mode the
    /// interface already has its address, which is returned as is.
    ///
    /// # Errors
    ///
    /// - [`WifiError::NotAssociated`] if the state cannot have an address.
    ///   The DHCP client is not touched.
    /// - [`WifiError::Timeout`] if no address appeared in time.
    /// - [`WifiError::Driver`] if reading the address fails.
    pub fn acquire_address(&self, timeout: Duration) -> Result<IpConfig, WifiError> {
        match self.state() {
            ConnectState::ConnectOk => {}
            state if state.is_soft_ap() => {
                debug!("acquire address: {state}, no lease needed");
                return self.ip_address();
            }
            state => {
                error!("acquire address: not associated ({state})");
                return Err(WifiError::NotAssociated { state });
            }
        }

        self.driver.set_ip_config(IpConfig::UNASSIGNED);
        info!("requesting DHCP lease");
        let mut config = self.driver.request_lease();

        let poll = self.timings.dhcp_poll;
        let mut remaining = timeout;
        while !config.is_assigned() {
            if remaining.is_zero() {
                error!("DHCP: no lease within {timeout:?}");
                return Err(WifiError::Timeout { waited: timeout });
            }
            self.platform.sleep(poll);
            config = self.driver.ip_config()?;
            remaining = remaining.saturating_sub(poll);
        }

        info!(
            "DHCP lease: {} netmask {} gateway {}",
            config.address, config.netmask, config.gateway
        );
        Ok(config)
    }

    /// Current interface address.
    pub fn ip_address(&self) -> Result<IpConfig, WifiError> {
        Ok(self.driver.ip_config()?)
    }

    /// Sets a static interface address.
    pub fn set_ip_address(&self, config: IpConfig) {
        debug!("setting static address {}", config.address);
        self.driver.set_ip_config(config);
    }

    /// Resets the radio.  Nothing to do on current drivers.
    pub fn reset(&self) -> Result<(), WifiError> {
        debug!("radio reset requested");
        Ok(())
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        let version = self.driver.firmware_version();
        info!(
            "firmware {} (changelist {}), built {} {}",
            version.version, version.changelist, version.date, version.time
        );
        version
    }
}

fn encrypt_mode(cipher: CipherType) -> EncryptMode {
    match cipher {
        CipherType::None => EncryptMode::None,
        CipherType::Wep => EncryptMode::Wep,
        CipherType::Tkip => EncryptMode::Tkip,
        CipherType::Ccmp => EncryptMode::Aes,
    }
}

/// Longest prefix of `passphrase` that fits a WEP key slot.
fn wep_key(passphrase: &str) -> &str {
    let mut end = passphrase.len().min(WEP_KEY_MAX);
    while !passphrase.is_char_boundary(end) {
        end -= 1;
    }
    &passphrase[..end]
}

fn log_transition(source: &str, previous: ConnectState, next: ConnectState) {
    match next {
        ConnectState::ConnectFailed | ConnectState::AuthFailed => {
            warn!("{source}: {previous} -> {next}")
        }
        _ => info!("{source}: {previous} -> {next}"),
    }
}

fn station_callback(cell: Arc<ConnectionCell>, device_id: u8) -> LinkCallback {
    Arc::new(move |device, code| {
        if device != device_id {
            trace!("station callback for device {device} ignored");
            return;
        }
        let Some(signal) = StationSignal::from_code(code) else {
            debug!("station callback: unknown code {code}");
            return;
        };
        let (previous, next) = cell.apply(LinkEvent::Station {
            signal,
            security: cell.security(),
        });
        log_transition("station", previous, next);
    })
}

fn soft_ap_callback(cell: Arc<ConnectionCell>, device_id: u8) -> LinkCallback {
    Arc::new(move |device, code| {
        if device != device_id {
            trace!("soft-AP callback for device {device} ignored");
            return;
        }
        let Some(signal) = SoftApSignal::from_code(code) else {
            debug!("soft-AP callback: unknown code {code}");
            return;
        };
        let (previous, next) = cell.apply(LinkEvent::SoftAp(signal));
        log_transition("soft AP", previous, next);
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{BssInfo, DriverError, MockPlatform, MockWlanDriver};
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const DEVICE: u8 = 0;

    fn lease() -> IpConfig {
        IpConfig {
            address: Ipv4Addr::new(10, 0, 0, 42),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
        }
    }

    /// Expectations shared by every station connect.  Security-specific
    /// calls are left to the test.
    fn expect_station_setup(driver: &mut MockWlanDriver) {
        driver.expect_device_id().return_const(DEVICE);
        driver.expect_set_link_callback().return_const(());
        driver
            .expect_set_mode()
            .with(eq(OperatingMode::Station))
            .times(1)
            .return_const(());
        driver.expect_set_ssid().return_const(());
        driver.expect_commit().times(1).return_const(());
    }

    fn quiet_platform() -> MockPlatform {
        let mut platform = MockPlatform::new();
        platform.expect_sleep().return_const(());
        platform
    }

    fn controller(driver: MockWlanDriver, platform: MockPlatform) -> WifiController {
        WifiController::new(Arc::new(driver), Arc::new(platform))
    }

    #[test]
    fn test_connect_open_network_enables_dhcp_client() {
        // Arrange
        let mut driver = MockWlanDriver::new();
        expect_station_setup(&mut driver);
        driver.expect_disconnect().times(1).returning(|| Ok(()));
        driver
            .expect_set_encrypt_mode()
            .with(eq(EncryptMode::None))
            .times(1)
            .return_const(());
        driver.expect_set_auth_mode().times(0);
        driver.expect_set_passphrase().times(0);
        driver.expect_set_wep_key().times(0);
        driver
            .expect_link_state()
            .times(1)
            .return_const(LinkState::Connected);
        driver.expect_enable_dhcp_client().times(1).return_const(());
        let wifi = controller(driver, MockPlatform::new());

        // Act
        let result = wifi.connect("cafe", SecurityType::None, CipherType::None, "");

        // Assert
        assert!(result.is_ok());
        assert_eq!(wifi.state(), ConnectState::ConnectOk);
    }

    #[test]
    fn test_connect_wpa2_sets_psk_auth_and_aes() {
        // Arrange
        let mut driver = MockWlanDriver::new();
        expect_station_setup(&mut driver);
        driver.expect_disconnect().returning(|| Ok(()));
        driver
            .expect_set_auth_mode()
            .with(eq(AuthMode::Wpa2Psk))
            .times(1)
            .return_const(());
        driver
            .expect_set_passphrase()
            .withf(|p| p == "hunter22")
            .times(1)
            .return_const(());
        driver
            .expect_set_encrypt_mode()
            .with(eq(EncryptMode::Aes))
            .times(1)
            .return_const(());
        driver
            .expect_link_state()
            .return_const(LinkState::Connected);
        driver.expect_enable_dhcp_client().return_const(());
        let wifi = controller(driver, MockPlatform::new());

        // Act
        let result = wifi.connect("home", SecurityType::Wpa2, CipherType::Ccmp, "hunter22");

        // Assert
        assert!(result.is_ok());
        assert_eq!(wifi.cell.security(), SecurityType::Wpa2);
    }

    #[test]
    fn test_connect_wpa_with_tkip() {
        let mut driver = MockWlanDriver::new();
        expect_station_setup(&mut driver);
        driver.expect_disconnect().returning(|| Ok(()));
        driver
            .expect_set_auth_mode()
            .with(eq(AuthMode::WpaPsk))
            .times(1)
            .return_const(());
        driver.expect_set_passphrase().return_const(());
        driver
            .expect_set_encrypt_mode()
            .with(eq(EncryptMode::Tkip))
            .times(1)
            .return_const(());
        driver
            .expect_link_state()
            .return_const(LinkState::Connected);
        driver.expect_enable_dhcp_client().return_const(());
        let wifi = controller(driver, MockPlatform::new());

        assert!(wifi
            .connect("old", SecurityType::Wpa, CipherType::Tkip, "passw0rd")
            .is_ok());
    }

    #[test]
    fn test_connect_wep_forces_disconnect_and_truncates_key() {
        // Arrange
        let long_key = "k".repeat(40);
        let expected = "k".repeat(WEP_KEY_MAX);
        let mut driver = MockWlanDriver::new();
        expect_station_setup(&mut driver);
        // once to clear the old association, once before storing the key
        driver.expect_disconnect().times(2).returning(|| Ok(()));
        driver
            .expect_set_wep_key()
            .withf(move |slot, key| *slot == WEP_KEY_SLOT && key == expected)
            .times(1)
            .return_const(());
        driver
            .expect_set_wep_key_index()
            .with(eq(WEP_KEY_SLOT))
            .times(1)
            .return_const(());
        driver
            .expect_set_wep_auth()
            .with(eq(WepAuth::Auto))
            .times(1)
            .return_const(());
        driver
            .expect_set_encrypt_mode()
            .with(eq(EncryptMode::Wep))
            .return_const(());
        driver.expect_set_auth_mode().times(0);
        driver
            .expect_link_state()
            .return_const(LinkState::Connected);
        driver.expect_enable_dhcp_client().return_const(());
        let wifi = controller(driver, MockPlatform::new());

        // Act / Assert
        assert!(wifi
            .connect("legacy", SecurityType::Wep, CipherType::Wep, &long_key)
            .is_ok());
    }

    #[test]
    fn test_connect_times_out_without_link() {
        // Arrange: 1 s budget polled every 200 ms
        let mut driver = MockWlanDriver::new();
        expect_station_setup(&mut driver);
        driver.expect_disconnect().returning(|| Ok(()));
        driver.expect_set_encrypt_mode().return_const(());
        driver
            .expect_link_state()
            .times(5)
            .return_const(LinkState::Connecting);
        driver.expect_enable_dhcp_client().times(0);
        let mut platform = MockPlatform::new();
        platform
            .expect_sleep()
            .with(eq(Duration::from_millis(200)))
            .times(5)
            .return_const(());
        let wifi = controller(driver, platform).with_timings(WifiTimings {
            connect_timeout: Duration::from_secs(1),
            ..WifiTimings::default()
        });

        // Act
        let result = wifi.connect("far-away", SecurityType::None, CipherType::None, "");

        // Assert
        assert_eq!(
            result,
            Err(WifiError::Connect {
                ssid: "far-away".to_string()
            })
        );
        assert_eq!(wifi.state(), ConnectState::ConnectFailed);
    }

    #[test]
    fn test_zero_poll_intervals_are_raised_to_one_millisecond() {
        // Arrange / Act
        let wifi = controller(MockWlanDriver::new(), MockPlatform::new()).with_timings(
            WifiTimings {
                connect_poll: Duration::ZERO,
                dhcp_poll: Duration::ZERO,
                client_poll: Duration::ZERO,
                ..WifiTimings::default()
            },
        );

        // Assert
        assert_eq!(wifi.timings().connect_poll, MIN_POLL);
        assert_eq!(wifi.timings().dhcp_poll, MIN_POLL);
        assert_eq!(wifi.timings().client_poll, MIN_POLL);
        assert_eq!(wifi.timings().scan_settle, WifiTimings::default().scan_settle);
    }

    #[test]
    fn test_connect_with_zero_poll_still_gives_up() {
        // Arrange: 3 ms budget, zero poll clamped to 1 ms
        let mut driver = MockWlanDriver::new();
        expect_station_setup(&mut driver);
        driver.expect_disconnect().returning(|| Ok(()));
        driver.expect_set_encrypt_mode().return_const(());
        driver
            .expect_link_state()
            .times(3)
            .return_const(LinkState::Connecting);
        let mut platform = MockPlatform::new();
        platform
            .expect_sleep()
            .with(eq(MIN_POLL))
            .times(3)
            .return_const(());
        let wifi = controller(driver, platform).with_timings(WifiTimings {
            connect_poll: Duration::ZERO,
            connect_timeout: Duration::from_millis(3),
            ..WifiTimings::default()
        });

        // Act
        let result = wifi.connect("void", SecurityType::None, CipherType::None, "");

        // Assert
        assert!(matches!(result, Err(WifiError::Connect { .. })));
    }

    #[test]
    fn test_station_callback_ignores_other_devices_and_unknown_codes() {
        // Arrange
        let cell = Arc::new(ConnectionCell::new());
        let callback = station_callback(Arc::clone(&cell), DEVICE);

        // Act
        callback(DEVICE + 1, 1);
        callback(DEVICE, 7);

        // Assert
        assert_eq!(cell.get(), ConnectState::Idle);

        callback(DEVICE, 1);
        assert_eq!(cell.get(), ConnectState::ConnectOk);
    }

    #[test]
    fn test_station_callback_uses_recorded_security() {
        let cell = Arc::new(ConnectionCell::new());
        cell.set_security(SecurityType::Wpa2);
        let callback = station_callback(Arc::clone(&cell), DEVICE);

        callback(DEVICE, 1);
        assert_eq!(cell.get(), ConnectState::Connecting);
        callback(DEVICE, 10);
        assert_eq!(cell.get(), ConnectState::AuthFailed);
    }

    #[test]
    fn test_disconnect_from_connected_moves_to_disconnecting() {
        // Arrange
        let mut driver = MockWlanDriver::new();
        driver.expect_disconnect().times(1).returning(|| Ok(()));
        let wifi = controller(driver, MockPlatform::new());
        wifi.cell.set(ConnectState::ConnectOk);

        // Act
        let result = wifi.disconnect();

        // Assert
        assert!(result.is_ok());
        assert_eq!(wifi.state(), ConnectState::Disconnecting);
    }

    #[test]
    fn test_disconnect_restores_state_when_driver_refuses() {
        // Arrange
        let mut driver = MockWlanDriver::new();
        driver
            .expect_disconnect()
            .times(1)
            .returning(|| Err(DriverError::Status(-3)));
        let wifi = controller(driver, MockPlatform::new());
        wifi.cell.set(ConnectState::ConnectOk);

        // Act
        let result = wifi.disconnect();

        // Assert
        assert!(result.is_ok(), "disconnect always reports success");
        assert_eq!(wifi.state(), ConnectState::ConnectOk);
    }

    #[test]
    fn test_disconnect_while_disconnecting_does_not_call_driver() {
        let mut driver = MockWlanDriver::new();
        driver.expect_disconnect().times(0);
        let wifi = controller(driver, MockPlatform::new());
        wifi.cell.set(ConnectState::Disconnecting);

        assert!(wifi.disconnect().is_ok());
        assert_eq!(wifi.state(), ConnectState::Disconnecting);
    }

    #[test]
    fn test_disconnect_from_idle_stays_idle() {
        let mut driver = MockWlanDriver::new();
        driver.expect_disconnect().times(1).returning(|| Ok(()));
        let wifi = controller(driver, MockPlatform::new());

        assert!(wifi.disconnect().is_ok());
        assert_eq!(wifi.state(), ConnectState::Idle);
    }

    #[test]
    fn test_acquire_address_while_connecting_never_requests_lease() {
        // Arrange
        let mut driver = MockWlanDriver::new();
        driver.expect_request_lease().times(0);
        driver.expect_set_ip_config().times(0);
        let wifi = controller(driver, MockPlatform::new());
        wifi.cell.set(ConnectState::Connecting);

        // Act
        let result = wifi.acquire_address(Duration::from_secs(5));

        // Assert
        assert_eq!(
            result,
            Err(WifiError::NotAssociated {
                state: ConnectState::Connecting
            })
        );
    }

    #[test]
    fn test_acquire_address_rejects_every_non_associated_state() {
        for state in [
            ConnectState::Idle,
            ConnectState::ConnectFailed,
            ConnectState::AuthFailed,
            ConnectState::Disconnecting,
        ] {
            let mut driver = MockWlanDriver::new();
            driver.expect_request_lease().times(0);
            let wifi = controller(driver, MockPlatform::new());
            wifi.cell.set(state);

            assert_eq!(
                wifi.acquire_address(Duration::from_secs(1)),
                Err(WifiError::NotAssociated { state })
            );
        }
    }

    #[test]
    fn test_acquire_address_polls_until_address_appears() {
        // Arrange: the lease shows up on the third poll
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let mut driver = MockWlanDriver::new();
        driver
            .expect_set_ip_config()
            .with(eq(IpConfig::UNASSIGNED))
            .times(1)
            .return_const(());
        driver
            .expect_request_lease()
            .times(1)
            .return_const(IpConfig::UNASSIGNED);
        driver.expect_ip_config().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                Ok(IpConfig::UNASSIGNED)
            } else {
                Ok(lease())
            }
        });
        let mut platform = MockPlatform::new();
        platform
            .expect_sleep()
            .with(eq(Duration::from_millis(100)))
            .times(3)
            .return_const(());
        let wifi = controller(driver, platform);
        wifi.cell.set(ConnectState::ConnectOk);

        // Act
        let result = wifi.acquire_address(Duration::from_secs(1));

        // Assert
        assert_eq!(result, Ok(lease()));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_acquire_address_uses_immediate_lease_without_polling() {
        let mut driver = MockWlanDriver::new();
        driver.expect_set_ip_config().return_const(());
        driver.expect_request_lease().return_const(lease());
        driver.expect_ip_config().times(0);
        let mut platform = MockPlatform::new();
        platform.expect_sleep().times(0);
        let wifi = controller(driver, platform);
        wifi.cell.set(ConnectState::ConnectOk);

        assert_eq!(wifi.acquire_address(Duration::from_secs(1)), Ok(lease()));
    }

    #[test]
    fn test_acquire_address_times_out_within_poll_bound() {
        // Arrange: 250 ms budget at 100 ms per poll allows at most 3 polls
        let mut driver = MockWlanDriver::new();
        driver.expect_set_ip_config().return_const(());
        driver
            .expect_request_lease()
            .return_const(IpConfig::UNASSIGNED);
        driver
            .expect_ip_config()
            .times(3)
            .returning(|| Ok(IpConfig::UNASSIGNED));
        let wifi = controller(driver, quiet_platform());
        wifi.cell.set(ConnectState::ConnectOk);

        // Act
        let result = wifi.acquire_address(Duration::from_millis(250));

        // Assert
        assert_eq!(
            result,
            Err(WifiError::Timeout {
                waited: Duration::from_millis(250)
            })
        );
    }

    #[test]
    fn test_acquire_address_propagates_driver_error() {
        let mut driver = MockWlanDriver::new();
        driver.expect_set_ip_config().return_const(());
        driver
            .expect_request_lease()
            .return_const(IpConfig::UNASSIGNED);
        driver
            .expect_ip_config()
            .returning(|| Err(DriverError::Status(-9)));
        let wifi = controller(driver, quiet_platform());
        wifi.cell.set(ConnectState::ConnectOk);

        assert_eq!(
            wifi.acquire_address(Duration::from_secs(1)),
            Err(WifiError::Driver(DriverError::Status(-9)))
        );
    }

    #[test]
    fn test_acquire_address_in_soft_ap_returns_current_config() {
        // Arrange
        let mut driver = MockWlanDriver::new();
        driver.expect_request_lease().times(0);
        driver.expect_ip_config().returning(|| Ok(lease()));
        let wifi = controller(driver, MockPlatform::new());
        wifi.cell.set(ConnectState::SoftApUp);

        // Act / Assert
        assert_eq!(wifi.acquire_address(Duration::ZERO), Ok(lease()));
    }

    #[test]
    fn test_enable_soft_ap_open_waits_for_client() {
        // Arrange: the first poll sees no client, the second does
        let mut driver = MockWlanDriver::new();
        driver.expect_device_id().return_const(DEVICE);
        driver.expect_disconnect().returning(|| Ok(()));
        driver.expect_set_link_callback().times(1).return_const(());
        driver
            .expect_set_mode()
            .with(eq(OperatingMode::SoftAp))
            .times(1)
            .return_const(());
        driver.expect_set_hidden().times(0);
        driver.expect_set_auth_mode().times(0);
        driver.expect_set_passphrase().times(0);
        driver
            .expect_set_dhcp_pool()
            .with(
                eq(SOFT_AP_POOL_START),
                eq(SOFT_AP_POOL_END),
                eq(SOFT_AP_LEASE),
            )
            .times(1)
            .return_const(());
        driver
            .expect_start_ap()
            .withf(|ssid| ssid == "setup-ap")
            .times(1)
            .return_const(());
        let mut seq = mockall::Sequence::new();
        driver
            .expect_link_state()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(LinkState::Disconnected);
        driver
            .expect_link_state()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(LinkState::Connected);
        let wifi = controller(driver, quiet_platform());

        // Act
        let result = wifi.enable_soft_ap("setup-ap", false, Some(""), Duration::from_secs(1));

        // Assert
        assert!(result.is_ok());
        assert_eq!(wifi.state(), ConnectState::StationOk);
        assert_eq!(wifi.cell.security(), SecurityType::None);
    }

    #[test]
    fn test_enable_soft_ap_with_passphrase_uses_wpa2_and_hides_ssid() {
        // Arrange
        let mut driver = MockWlanDriver::new();
        driver.expect_device_id().return_const(DEVICE);
        driver.expect_disconnect().returning(|| Ok(()));
        driver.expect_set_link_callback().return_const(());
        driver.expect_set_mode().return_const(());
        driver
            .expect_set_hidden()
            .with(eq(true))
            .times(1)
            .return_const(());
        driver
            .expect_set_auth_mode()
            .with(eq(AuthMode::Wpa2Psk))
            .times(1)
            .return_const(());
        driver
            .expect_set_encrypt_mode()
            .with(eq(EncryptMode::Aes))
            .times(1)
            .return_const(());
        driver
            .expect_set_passphrase()
            .withf(|p| p == "ap-secret")
            .times(1)
            .return_const(());
        driver.expect_set_dhcp_pool().return_const(());
        driver.expect_start_ap().return_const(());
        driver
            .expect_link_state()
            .return_const(LinkState::Connected);
        let wifi = controller(driver, quiet_platform());

        // Act
        let result = wifi.enable_soft_ap("hidden-ap", true, Some("ap-secret"), Duration::ZERO);

        // Assert
        assert!(result.is_ok());
        assert_eq!(wifi.cell.security(), SecurityType::Wpa2);
    }

    #[test]
    fn test_enable_soft_ap_without_client_times_out_with_ap_up() {
        // Arrange: 300 ms budget polled every 100 ms
        let mut driver = MockWlanDriver::new();
        driver.expect_device_id().return_const(DEVICE);
        driver.expect_disconnect().returning(|| Ok(()));
        driver.expect_set_link_callback().return_const(());
        driver.expect_set_mode().return_const(());
        driver.expect_set_dhcp_pool().return_const(());
        driver.expect_start_ap().return_const(());
        driver
            .expect_link_state()
            .times(4)
            .return_const(LinkState::Disconnected);
        let wifi = controller(driver, quiet_platform());

        // Act
        let result = wifi.enable_soft_ap("lonely", false, None, Duration::from_millis(300));

        // Assert
        assert!(matches!(result, Err(WifiError::Timeout { .. })));
        assert_eq!(wifi.state(), ConnectState::SoftApUp);
    }

    #[test]
    fn test_soft_ap_callback_tracks_client() {
        let cell = Arc::new(ConnectionCell::new());
        cell.set(ConnectState::SoftApUp);
        let callback = soft_ap_callback(Arc::clone(&cell), DEVICE);

        callback(DEVICE, 1);
        assert_eq!(cell.get(), ConnectState::StationOk);
        callback(DEVICE, 0);
        assert_eq!(cell.get(), ConnectState::SoftApUp);
    }

    fn entry(ssid: &str, rssi: u8) -> BssInfo {
        BssInfo {
            ssid: ssid.to_string(),
            bssid: [0; 6],
            rssi,
            security_enabled: false,
            rsn_auth: false,
            rsn_cipher: 0,
            wpa_auth: false,
            wpa_cipher: 0,
        }
    }

    #[test]
    fn test_scan_ranks_and_limits_records() {
        // Arrange
        let mut driver = MockWlanDriver::new();
        driver.expect_start_scan().times(1).return_const(());
        driver.expect_scan_count().return_const(3usize);
        driver.expect_scan_entry().returning(|i| {
            Some(match i {
                0 => entry("weak", 10),
                1 => entry("strong", 80),
                _ => entry("middle", 40),
            })
        });
        let mut platform = MockPlatform::new();
        platform
            .expect_sleep()
            .with(eq(Duration::from_secs(8)))
            .times(1)
            .return_const(());
        let wifi = controller(driver, platform);
        let seen = Mutex::new(Vec::new());

        // Act
        let delivered = wifi
            .scan(2, |record| seen.lock().unwrap().push(record.ssid.clone()))
            .unwrap();

        // Assert
        assert_eq!(delivered, 2);
        assert_eq!(*seen.lock().unwrap(), ["strong", "middle"]);
    }

    #[test]
    fn test_scan_with_no_networks_fails() {
        let mut driver = MockWlanDriver::new();
        driver.expect_start_scan().return_const(());
        driver.expect_scan_count().return_const(0usize);
        driver.expect_scan_entry().times(0);
        let wifi = controller(driver, quiet_platform());

        assert_eq!(wifi.scan(10, |_| {}), Err(WifiError::NoNetworks));
    }

    #[test]
    fn test_wep_key_truncation_respects_char_boundaries() {
        let key = format!("{}é", "a".repeat(31));
        assert_eq!(wep_key(&key), "a".repeat(31));
        assert_eq!(wep_key("short"), "short");
    }

    #[test]
    fn test_reset_and_static_address() {
        let mut driver = MockWlanDriver::new();
        driver
            .expect_set_ip_config()
            .with(eq(lease()))
            .times(1)
            .return_const(());
        let wifi = controller(driver, MockPlatform::new());

        assert!(wifi.reset().is_ok());
        wifi.set_ip_address(lease());
    }
}

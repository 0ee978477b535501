//! Scan-result classification and ranking.

use crate::driver::{cipher_suite, BssInfo};

use super::{CipherType, SecurityType};

/// One ranked scan result handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub rssi: u8,
    pub security: SecurityType,
    pub cipher: CipherType,
}

impl ScanRecord {
    /// BSSID in the usual colon-separated hex form.
    pub fn bssid_string(&self) -> String {
        self.bssid
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Derives the security and cipher a beacon advertises.
///
/// RSN wins over WPA; within either, CCMP wins over TKIP.  Security enabled
/// without RSN or WPA means WEP.
pub fn classify(bss: &BssInfo) -> (SecurityType, CipherType) {
    fn pairwise(suites: u8) -> CipherType {
        if suites & cipher_suite::CCMP != 0 {
            CipherType::Ccmp
        } else if suites & cipher_suite::TKIP != 0 {
            CipherType::Tkip
        } else {
            CipherType::None
        }
    }

    if !bss.security_enabled {
        (SecurityType::None, CipherType::None)
    } else if bss.rsn_auth {
        (SecurityType::Wpa2, pairwise(bss.rsn_cipher))
    } else if bss.wpa_auth {
        (SecurityType::Wpa, pairwise(bss.wpa_cipher))
    } else {
        (SecurityType::Wep, CipherType::Wep)
    }
}

/// Classifies `entries` and orders them strongest signal first.
///
/// The sort is stable: entries with equal signal keep the driver's order.
pub fn rank_scan_results(entries: Vec<BssInfo>) -> Vec<ScanRecord> {
    let mut records: Vec<ScanRecord> = entries
        .into_iter()
        .map(|bss| {
            let (security, cipher) = classify(&bss);
            ScanRecord {
                ssid: bss.ssid,
                bssid: bss.bssid,
                rssi: bss.rssi,
                security,
                cipher,
            }
        })
        .collect();
    records.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    records
}

// ── Tests ─────────────────────────────────────────────────────────────────────

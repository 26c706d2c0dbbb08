//! BLE peripheral scanning and candidate ranking.
//!
//! A scan merges two sources: peripherals that advertise the Lumideck
//! GATT service and the adapter's general device list (some stacks omit
//! service UUIDs from cached advertisements).  Entries are deduplicated
//! by peripheral id, preferring the copy with a resolved name, and
//! candidates for connection are ranked: the pinned device from the last
//! session first, then service advertisers, then name matches, then by
//! signal strength.

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tracing::{debug, info};

use super::LocatorError;
use crate::infrastructure::transport::ble::SERVICE_UUID;

/// How long a scan listens for advertisements.
pub const SCAN_DURATION: Duration = Duration::from_secs(4);

/// One discovered peripheral, reduced to what listing and ranking need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleDeviceInfo {
    /// Stack-assigned peripheral id, stable per host.
    pub id: String,
    /// Resolved advertisement name, if any.
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Whether the advertisement carried the Lumideck service UUID.
    pub advertises_service: bool,
}

impl BleDeviceInfo {
    /// Name for display and the link label.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("[unnamed]")
    }
}

/// Deduplicates by id and sorts by display name.
///
/// When the same peripheral appears twice, the copy with a resolved name
/// wins, and the service-advertiser flag is kept if either copy had it.
pub fn merge_device_list(devices: Vec<BleDeviceInfo>) -> Vec<BleDeviceInfo> {
    let mut merged: Vec<BleDeviceInfo> = Vec::with_capacity(devices.len());
    for device in devices {
        if let Some(existing) = merged.iter_mut().find(|d| d.id == device.id) {
            if existing.name.is_none() && device.name.is_some() {
                existing.name = device.name;
            }
            existing.advertises_service |= device.advertises_service;
            if existing.rssi.is_none() {
                existing.rssi = device.rssi;
            }
            continue;
        }
        merged.push(device);
    }
    merged.sort_by(|a, b| a.display_name().cmp(b.display_name()));
    merged
}

/// Candidate rank; lower probes first.  RSSI breaks ties within a rank.
pub fn rank_candidate(
    device: &BleDeviceInfo,
    pinned_id: Option<&str>,
    name_hint: Option<&str>,
) -> (u8, i16) {
    let tier = if pinned_id.is_some_and(|id| id == device.id) {
        0
    } else if device.advertises_service {
        1
    } else if name_hint.is_some_and(|hint| {
        device
            .name
            .as_deref()
            .is_some_and(|n| n.to_ascii_lowercase().contains(&hint.to_ascii_lowercase()))
    }) {
        2
    } else {
        3
    };
    // Negated so sorting ascending puts the strongest signal first.
    (tier, -device.rssi.unwrap_or(i16::MIN + 1))
}

/// Scans for peripherals and ranks connection candidates.
pub struct BleLocator {
    adapter: Adapter,
}

impl BleLocator {
    /// Grabs the first Bluetooth adapter on the host.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::NoAdapter`] when the host has none.
    pub async fn new() -> Result<Self, LocatorError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(LocatorError::NoAdapter)?;
        Ok(Self { adapter })
    }

    /// Runs one scan window and returns every visible peripheral.
    async fn scan(&self) -> Result<Vec<(Peripheral, BleDeviceInfo)>, LocatorError> {
        self.adapter
            .start_scan(ScanFilter {
                services: vec![SERVICE_UUID],
            })
            .await?;
        tokio::time::sleep(SCAN_DURATION).await;
        self.adapter.stop_scan().await?;

        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let id = peripheral.id().to_string();
            let props = peripheral.properties().await.ok().flatten();
            let (name, rssi, advertises_service) = match props {
                Some(p) => (
                    p.local_name,
                    p.rssi,
                    p.services.contains(&SERVICE_UUID),
                ),
                None => (None, None, false),
            };
            found.push((
                peripheral,
                BleDeviceInfo {
                    id,
                    name,
                    rssi,
                    advertises_service,
                },
            ));
        }
        debug!("scan found {} peripherals", found.len());
        Ok(found)
    }

    /// Lists visible devices for display, deduplicated and name-sorted.
    pub async fn list_devices(&self) -> Result<Vec<BleDeviceInfo>, LocatorError> {
        let devices = self.scan().await?.into_iter().map(|(_, info)| info).collect();
        Ok(merge_device_list(devices))
    }

    /// Returns connection candidates in probe order.
    pub async fn find_candidates(
        &self,
        pinned_id: Option<&str>,
        name_hint: Option<&str>,
    ) -> Result<Vec<(Peripheral, BleDeviceInfo)>, LocatorError> {
        let mut found = self.scan().await?;
        found.sort_by_key(|(_, info)| rank_candidate(info, pinned_id, name_hint));
        // Unranked leftovers with no service, no pin, no hint are noise.
        found.retain(|(_, info)| rank_candidate(info, pinned_id, name_hint).0 < 3);
        info!("{} bluetooth connection candidate(s)", found.len());
        Ok(found)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, name: Option<&str>, rssi: Option<i16>, service: bool) -> BleDeviceInfo {
        BleDeviceInfo {
            id: id.to_string(),
            name: name.map(str::to_string),
            rssi,
            advertises_service: service,
        }
    }

    #[test]
    fn test_merge_prefers_resolved_name() {
        let merged = merge_device_list(vec![
            device("aa", None, Some(-70), true),
            device("aa", Some("Lumideck-3F"), Some(-68), false),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].display_name(), "Lumideck-3F");
        // Service flag survives the merge even though the named copy lacked it
        assert!(merged[0].advertises_service);
    }

    #[test]
    fn test_merge_sorts_by_display_name() {
        let merged = merge_device_list(vec![
            device("bb", Some("Zeta"), None, false),
            device("aa", Some("Alpha"), None, false),
            device("cc", None, None, false),
        ]);
        let names: Vec<&str> = merged.iter().map(|d| d.display_name()).collect();
        assert_eq!(names, vec!["Alpha", "Zeta", "[unnamed]"]);
    }

    #[test]
    fn test_pinned_device_ranks_first() {
        let pinned = device("aa", None, Some(-90), false);
        let advertiser = device("bb", Some("Lumideck"), Some(-40), true);
        assert!(rank_candidate(&pinned, Some("aa"), None) < rank_candidate(&advertiser, Some("aa"), None));
    }

    #[test]
    fn test_service_advertiser_outranks_name_match() {
        let advertiser = device("aa", None, Some(-90), true);
        let named = device("bb", Some("Lumideck-7"), Some(-30), false);
        assert!(
            rank_candidate(&advertiser, None, Some("lumideck"))
                < rank_candidate(&named, None, Some("lumideck"))
        );
    }

    #[test]
    fn test_name_hint_match_is_case_insensitive() {
        let named = device("aa", Some("LUMIDECK-2"), None, false);
        let (tier, _) = rank_candidate(&named, None, Some("lumideck"));
        assert_eq!(tier, 2);
    }

    #[test]
    fn test_stronger_signal_wins_within_a_tier() {
        let weak = device("aa", None, Some(-90), true);
        let strong = device("bb", None, Some(-40), true);
        assert!(rank_candidate(&strong, None, None) < rank_candidate(&weak, None, None));
    }

    #[test]
    fn test_unrelated_device_lands_in_the_noise_tier() {
        let noise = device("aa", Some("Headphones"), Some(-30), false);
        let (tier, _) = rank_candidate(&noise, None, Some("lumideck"));
        assert_eq!(tier, 3);
    }
}

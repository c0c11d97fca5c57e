//! Scan controller - owns the GAP discovery procedure.
//!
//! Tracks whether a scan is running, whether the user still wants one
//! (an explicit stop switches automatic restarts off), and the list of
//! cameras seen so far.

use heapless::Vec;

use super::adv_filter::extract_device_name;
use super::event::{AdvReport, Reaction, Status};
use super::{DeviceNames, DiscoveredDevice, HostStack, ScanParams};
use crate::config::{BLE_AUTO_RESCAN, BLE_MAX_DISCOVERED, BLE_SCAN_RESTART_DELAY_MS};
use crate::error::Result;

pub struct ScanController {
    params: ScanParams,
    scanning: bool,
    /// Cleared by an explicit stop; gates automatic restarts.
    wanted: bool,
    devices: Vec<DiscoveredDevice, BLE_MAX_DISCOVERED>,
}

impl Default for ScanController {
    fn default() -> Self {
        Self::new(ScanParams::default())
    }
}

impl ScanController {
    pub const fn new(params: ScanParams) -> Self {
        Self {
            params,
            scanning: false,
            wanted: false,
            devices: Vec::new(),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn params(&self) -> &ScanParams {
        &self.params
    }

    /// Start scanning on behalf of a collaborator.
    ///
    /// Clears the discovered-device list. Starting while already scanning
    /// is a no-op.
    pub fn start<H: HostStack>(&mut self, host: &mut H) -> Result<()> {
        self.wanted = true;
        if self.scanning {
            info!("BLE scan already running");
            return Ok(());
        }
        self.devices.clear();
        self.begin(host)
    }

    /// Re-enable automatic restarts without touching the radio.
    ///
    /// Used when a collaborator asks for a scan while a link is busy.
    pub fn want(&mut self) {
        self.wanted = true;
    }

    /// Stop scanning on behalf of a collaborator.
    ///
    /// Also disables automatic restarts until the next [`start`](Self::start).
    /// Stopping while idle is a handled no-op.
    pub fn stop<H: HostStack>(&mut self, host: &mut H) -> Result<()> {
        self.wanted = false;
        if !self.scanning {
            debug!("BLE scan not running; nothing to stop");
            return Ok(());
        }
        self.cancel(host)
    }

    /// Cancel the running scan so a connection can be initiated.
    ///
    /// Unlike [`stop`](Self::stop) this keeps automatic restarts enabled.
    pub fn cancel<H: HostStack>(&mut self, host: &mut H) -> Result<()> {
        if let Err(e) = host.cancel_discovery() {
            error!("Failed to cancel BLE scan: {}", e);
            return Err(e.into());
        }
        self.scanning = false;
        info!("BLE scan stopped");
        Ok(())
    }

    /// The host reports the discovery procedure has ended.
    pub fn on_scan_complete(&mut self, reason: Status) {
        self.scanning = false;
        info!(
            "BLE scan complete; reason={} devices={}",
            reason.0,
            self.devices.len()
        );
    }

    /// Remember a camera seen in `report`.
    ///
    /// Known addresses only get their RSSI refreshed. Returns `true` for a
    /// newly recorded camera.
    pub fn record_device(&mut self, report: &AdvReport) -> bool {
        if let Some(known) = self
            .devices
            .iter_mut()
            .find(|d| d.address == report.address)
        {
            known.rssi = report.rssi;
            return false;
        }

        let device = DiscoveredDevice {
            address: report.address,
            name: extract_device_name(&report.data),
            rssi: report.rssi,
        };
        info!("Found: {} (RSSI {})", device.name.as_str(), device.rssi);
        if self.devices.push(device).is_err() {
            debug!("Discovered-device list full; not recording");
            return false;
        }
        true
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    pub fn device_names(&self) -> DeviceNames {
        let mut names = DeviceNames::new();
        for device in &self.devices {
            // Same capacity as `devices`.
            let _ = names.push(device.name.clone());
        }
        names
    }

    /// What to do after the camera was lost or a connection attempt failed.
    pub fn restart_reaction(&self) -> Reaction {
        if BLE_AUTO_RESCAN && self.wanted && !self.scanning {
            Reaction::RestartScanAfter(BLE_SCAN_RESTART_DELAY_MS)
        } else {
            Reaction::None
        }
    }

    /// The restart delay elapsed: make a single start attempt.
    ///
    /// The device list is kept. A failure is logged and not retried.
    pub fn on_restart_due<H: HostStack>(&mut self, host: &mut H) {
        if !self.wanted || self.scanning {
            debug!("BLE scan restart no longer needed");
            return;
        }
        info!("Restarting BLE scan");
        // `begin` already logged the failure.
        let _ = self.begin(host);
    }

    fn begin<H: HostStack>(&mut self, host: &mut H) -> Result<()> {
        if let Err(e) = host.start_discovery(&self.params) {
            error!("Failed to start BLE scan: {}", e);
            return Err(e.into());
        }
        self.scanning = true;
        info!("BLE scan starting ({} ms window)", self.params.duration_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::host::mock::{Call, MockHost};
    use crate::ble::{AddrKind, PeerAddress};
    use crate::error::{Error, HostError};

    fn report(last: u8, rssi: i8, data: &[u8]) -> AdvReport {
        AdvReport::new(PeerAddress::new(AddrKind::Public, [last, 0, 0, 0, 0, 0]), rssi, data)
    }

    const CAMERA_AD: [u8; 12] = [
        0x03, 0x03, 0xA6, 0xFE, // camera service
        0x07, 0x09, b'G', b'o', b'P', b'r', b'o', b'1',
    ];

    #[test]
    fn start_uses_passive_filtered_scan() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        scan.start(&mut host).unwrap();
        assert!(scan.is_scanning());
        let calls = host.take_calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::StartDiscovery(p) => {
                assert!(p.passive);
                assert!(p.filter_duplicates);
                assert_eq!(p.interval, 0x0010);
                assert_eq!(p.window, 0x0010);
                assert_eq!(p.duration_ms, 30_000);
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[test]
    fn start_while_scanning_is_noop() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        scan.start(&mut host).unwrap();
        host.take_calls();
        scan.start(&mut host).unwrap();
        assert!(host.take_calls().is_empty());
    }

    #[test]
    fn stop_when_idle_is_handled_noop() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        assert_eq!(scan.stop(&mut host), Ok(()));
        assert_eq!(scan.stop(&mut host), Ok(()));
        assert!(host.take_calls().is_empty());
    }

    #[test]
    fn stop_cancels_active_scan() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        scan.start(&mut host).unwrap();
        host.take_calls();
        scan.stop(&mut host).unwrap();
        assert_eq!(host.take_calls(), [Call::CancelDiscovery]);
        assert!(!scan.is_scanning());
    }

    #[test]
    fn start_failure_is_reported() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        host.fail_start = true;
        assert_eq!(
            scan.start(&mut host),
            Err(Error::Host(HostError::Raw(2)))
        );
        assert!(!scan.is_scanning());
    }

    #[test]
    fn scan_complete_returns_to_idle() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        scan.start(&mut host).unwrap();
        scan.on_scan_complete(Status::SUCCESS);
        assert!(!scan.is_scanning());
    }

    #[test]
    fn records_devices_once_per_address() {
        let mut scan = ScanController::default();
        assert!(scan.record_device(&report(1, -60, &CAMERA_AD)));
        assert!(!scan.record_device(&report(1, -40, &CAMERA_AD)));
        assert!(scan.record_device(&report(2, -70, &[])));
        assert_eq!(scan.devices().len(), 2);
        assert_eq!(scan.devices()[0].rssi, -40);

        let names = scan.device_names();
        assert_eq!(names[0].as_str(), "GoPro1");
        assert_eq!(names[1].as_str(), "Unknown");
    }

    #[test]
    fn device_list_is_bounded() {
        let mut scan = ScanController::default();
        for i in 0..(BLE_MAX_DISCOVERED as u8 + 5) {
            scan.record_device(&report(i, -50, &CAMERA_AD));
        }
        assert_eq!(scan.devices().len(), BLE_MAX_DISCOVERED);
    }

    #[test]
    fn explicit_start_clears_list_but_restart_keeps_it() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        scan.start(&mut host).unwrap();
        scan.record_device(&report(1, -60, &CAMERA_AD));
        scan.cancel(&mut host).unwrap();

        scan.on_restart_due(&mut host);
        assert!(scan.is_scanning());
        assert_eq!(scan.devices().len(), 1);

        scan.stop(&mut host).unwrap();
        scan.start(&mut host).unwrap();
        assert!(scan.devices().is_empty());
    }

    #[test]
    fn restart_only_while_wanted() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        // Never started by a collaborator.
        assert_eq!(scan.restart_reaction(), Reaction::None);

        scan.start(&mut host).unwrap();
        scan.cancel(&mut host).unwrap();
        assert_eq!(
            scan.restart_reaction(),
            Reaction::RestartScanAfter(BLE_SCAN_RESTART_DELAY_MS)
        );

        scan.stop(&mut host).unwrap();
        assert_eq!(scan.restart_reaction(), Reaction::None);
        host.take_calls();
        scan.on_restart_due(&mut host);
        assert!(host.take_calls().is_empty());
    }

    #[test]
    fn want_rearms_restart_without_scanning() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        scan.want();
        assert!(host.take_calls().is_empty());
        assert!(!scan.is_scanning());
        assert_eq!(
            scan.restart_reaction(),
            Reaction::RestartScanAfter(BLE_SCAN_RESTART_DELAY_MS)
        );
    }

    #[test]
    fn failed_restart_is_not_retried() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        scan.start(&mut host).unwrap();
        scan.cancel(&mut host).unwrap();
        host.take_calls();

        host.fail_start = true;
        scan.on_restart_due(&mut host);
        assert!(!scan.is_scanning());
        assert_eq!(host.take_calls().len(), 1);
    }

    #[test]
    fn cancel_failure_keeps_scanning() {
        let mut scan = ScanController::default();
        let mut host = MockHost::new();
        scan.start(&mut host).unwrap();
        host.fail_cancel = true;
        assert!(scan.cancel(&mut host).is_err());
        assert!(scan.is_scanning());
    }
}

//! Subscription engine - runs once the peer's GATT database is cached.
//!
//! Enables notifications/indications on every subscribable characteristic
//! of the camera service and resolves the handle commands are written to.
//! CCCD writes are submitted back to back without waiting for each one to
//! complete; their `WriteComplete` events are only logged.

use super::peer::{Characteristic, Peer};
use super::uuid::{CAMERA_SERVICE, CCCD, COMMAND_CHARACTERISTIC};
use super::{AttHandle, HostStack};

/// CCCD bit enabling notifications.
pub const CCCD_NOTIFY: u16 = 0x0001;
/// CCCD bit enabling indications.
pub const CCCD_INDICATE: u16 = 0x0002;

/// What [`subscribe_all`] managed to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubscribeReport {
    /// CCCD writes accepted by the host.
    pub submitted: u8,
    /// Subscribable characteristics without a CCCD.
    pub missing_cccd: u8,
    /// CCCD writes the host refused.
    pub failed: u8,
}

/// Value to write to the CCCD of `chr`, or `None` if it cannot push data.
pub fn cccd_value(chr: &Characteristic) -> Option<u16> {
    let mut value = 0;
    if chr.properties.can_notify() {
        value |= CCCD_NOTIFY;
    }
    if chr.properties.can_indicate() {
        value |= CCCD_INDICATE;
    }
    (value != 0).then_some(value)
}

/// Enable every notification and indication the camera service offers.
///
/// A missing CCCD or a refused write only skips that characteristic.
pub fn subscribe_all<H: HostStack>(peer: &Peer, host: &mut H) -> SubscribeReport {
    let mut report = SubscribeReport::default();

    let Some(service) = peer.find_service(&CAMERA_SERVICE) else {
        warn!(
            "Camera service not found; conn_handle={}",
            peer.conn_handle
        );
        return report;
    };

    for chr in &service.characteristics {
        let Some(value) = cccd_value(chr) else {
            continue;
        };
        let Some(cccd) = chr.find_descriptor(&CCCD) else {
            warn!(
                "Peer lacks a CCCD for subscribable characteristic; val_handle={}",
                chr.val_handle
            );
            report.missing_cccd += 1;
            continue;
        };

        match host.write(peer.conn_handle, cccd.handle, &value.to_le_bytes()) {
            Ok(()) => {
                info!(
                    "Subscribing to characteristic; val_handle={} cccd={}",
                    chr.val_handle, value
                );
                report.submitted += 1;
            }
            Err(e) => {
                error!(
                    "Failed to write CCCD; handle={} error={}",
                    cccd.handle, e
                );
                report.failed += 1;
            }
        }
    }

    report
}

/// Value handle of the command characteristic inside the camera service.
pub fn resolve_command_handle(peer: &Peer) -> Option<AttHandle> {
    let handle = peer
        .find_service(&CAMERA_SERVICE)?
        .find_characteristic(&COMMAND_CHARACTERISTIC)
        .map(|chr| chr.val_handle);
    match handle {
        Some(h) => info!("Assigned command handle: {}", h),
        None => error!("Command characteristic not found"),
    }
    handle
}

//! Events delivered by the host stack, and the link's answers to them.
//!
//! The host-stack task turns every GAP/GATT callback into one [`BleEvent`]
//! and hands it to [`CameraLink::handle_event`](super::CameraLink::handle_event).
//! Events for one connection arrive in link-layer order; the link never
//! assumes the connection still exists when an event shows up.

use heapless::Vec;

use super::{AttHandle, ConnHandle, PeerAddress, Properties, Uuid};
use crate::config::BLE_ADV_DATA_MAX;
use crate::error::{Error, HostError};

/// Host-stack status code. Zero is success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Status = Status(0);

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Host(HostError::Raw(u32::from(status.0)))
    }
}

/// One advertising report.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvReport {
    pub address: PeerAddress,
    pub rssi: i8,
    /// Raw AD structure stream, truncated to the legacy 31-byte payload.
    pub data: Vec<u8, BLE_ADV_DATA_MAX>,
}

impl AdvReport {
    /// Copy an advertising payload; anything beyond 31 bytes is dropped.
    pub fn new(address: PeerAddress, rssi: i8, data: &[u8]) -> Self {
        let len = data.len().min(BLE_ADV_DATA_MAX);
        let mut buf = Vec::new();
        // Cannot fail: `len` is clamped to the capacity.
        let _ = buf.extend_from_slice(&data[..len]);
        Self {
            address,
            rssi,
            data: buf,
        }
    }
}

/// A primary service as reported by service discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub start_handle: AttHandle,
    pub end_handle: AttHandle,
}

/// A characteristic declaration as reported by characteristic discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub def_handle: AttHandle,
    pub val_handle: AttHandle,
    pub properties: Properties,
}

/// A descriptor as reported by descriptor discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DescriptorInfo {
    pub uuid: Uuid,
    pub handle: AttHandle,
}

/// Everything the host stack can tell the camera link.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleEvent {
    // GAP
    /// An advertising report arrived during scanning.
    Advertisement(AdvReport),
    /// The scan procedure ended (timeout or cancel).
    ScanComplete { reason: Status },
    /// A connection attempt finished, successfully or not.
    LinkEstablished {
        conn_handle: ConnHandle,
        address: PeerAddress,
        status: Status,
    },
    /// Encryption was enabled (or failed to be) on a link.
    EncryptionChange {
        conn_handle: ConnHandle,
        status: Status,
    },
    /// A link went down.
    Disconnect {
        conn_handle: ConnHandle,
        reason: Status,
    },
    /// A bonded peer asks to pair again.
    RepeatPairing { conn_handle: ConnHandle },
    /// ATT MTU was negotiated.
    MtuChanged { conn_handle: ConnHandle, mtu: u16 },

    // GATT client
    /// One primary service found.
    ServiceDiscovered {
        conn_handle: ConnHandle,
        service: ServiceInfo,
    },
    /// Service discovery finished.
    ServicesDone {
        conn_handle: ConnHandle,
        status: Status,
    },
    /// One characteristic found in the service being walked.
    CharacteristicDiscovered {
        conn_handle: ConnHandle,
        characteristic: CharacteristicInfo,
    },
    /// Characteristic discovery for the current service finished.
    CharacteristicsDone {
        conn_handle: ConnHandle,
        status: Status,
    },
    /// One descriptor found for the characteristic with `chr_val_handle`.
    DescriptorDiscovered {
        conn_handle: ConnHandle,
        chr_val_handle: AttHandle,
        descriptor: DescriptorInfo,
    },
    /// Descriptor discovery for the current characteristic finished.
    DescriptorsDone {
        conn_handle: ConnHandle,
        status: Status,
    },
    /// A write with response completed.
    WriteComplete {
        conn_handle: ConnHandle,
        attr_handle: AttHandle,
        status: Status,
    },
    /// The peer sent a notification or indication.
    Notification {
        conn_handle: ConnHandle,
        attr_handle: AttHandle,
        indication: bool,
        len: u16,
    },

    // Local
    /// The post-disconnect delay elapsed; time to scan again.
    ScanRestartDue,
}

/// What the caller of `handle_event` must do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reaction {
    /// Nothing.
    None,
    /// Post [`BleEvent::ScanRestartDue`] after this many milliseconds.
    RestartScanAfter(u32),
    /// Answer a repeat-pairing request with "retry"; the old bond is gone.
    RetryPairing,
    /// Answer a repeat-pairing request with "ignore".
    IgnorePairing,
}

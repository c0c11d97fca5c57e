//! Bluetooth Low Energy subsystem.
//!
//! This module drives the camera link in **Central** role:
//!
//! 1. **Scan Controller** - starts/stops discovery and decides when to
//!    resume after the camera drops.
//! 2. **Advertisement Filter** - spots the camera by its 0xFEA6 service UUID.
//! 3. **Link** - the connection/security state machine, fed one
//!    [`BleEvent`] at a time by the host-stack task.
//! 4. **Peer Registry** - per-connection cache of the remote GATT database,
//!    filled by a multi-round-trip discovery walk.
//! 5. **Subscription Engine** - enables notifications and resolves the
//!    command characteristic handle.
//! 6. **Command Dispatcher** - fire-and-forget writes to the camera.
//!
//! Everything here is hardware independent; the radio itself is reached
//! through the [`HostStack`] trait.

pub mod adv_filter;
pub mod command;
pub mod event;
pub mod host;
pub mod link;
pub mod peer;
pub mod scan;
pub mod subscribe;
pub mod uuid;

use core::fmt;

use heapless::{String, Vec};

use crate::config::{BLE_MAX_DISCOVERED, COMMAND_MAX_LEN};

pub use event::{BleEvent, Reaction, Status};
pub use host::{HostStack, ScanParams};
pub use link::{CameraLink, ConnectedCamera, LinkSnapshot, LinkState};
pub use peer::{Characteristic, Descriptor, Peer, PeerRegistry, Service};
pub use uuid::Uuid;

/// Connection handle assigned by the host stack; valid only while connected.
pub type ConnHandle = u16;

/// Attribute handle inside a peer's GATT database.
pub type AttHandle = u16;

/// Link-layer address type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddrKind {
    Public,
    RandomStatic,
    RandomPrivateResolvable,
    RandomPrivateNonResolvable,
}

impl AddrKind {
    pub const fn to_raw(self) -> u8 {
        match self {
            AddrKind::Public => 0,
            AddrKind::RandomStatic => 1,
            AddrKind::RandomPrivateResolvable => 2,
            AddrKind::RandomPrivateNonResolvable => 3,
        }
    }

    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(AddrKind::Public),
            1 => Some(AddrKind::RandomStatic),
            2 => Some(AddrKind::RandomPrivateResolvable),
            3 => Some(AddrKind::RandomPrivateNonResolvable),
            _ => None,
        }
    }
}

/// BLE device address (6 bytes, least-significant byte first as on air).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    pub kind: AddrKind,
    pub bytes: [u8; 6],
}

impl PeerAddress {
    pub const fn new(kind: AddrKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// GATT characteristic property bits (Core spec Vol 3, Part G, 3.3.1.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Properties(pub u8);

impl Properties {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;

    pub const fn contains(self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    pub const fn can_notify(self) -> bool {
        self.contains(Self::NOTIFY)
    }

    pub const fn can_indicate(self) -> bool {
        self.contains(Self::INDICATE)
    }
}

/// Information about a camera seen while scanning.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredDevice {
    /// BLE address.
    pub address: PeerAddress,
    /// Human-readable name (truncated to 32 bytes for `heapless::String`).
    pub name: String<32>,
    /// Received Signal Strength Indicator (dBm).
    pub rssi: i8,
}

/// Requests other tasks (web UI, UDP, buttons) send to the BLE task.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkCommand {
    /// Start scanning for cameras.
    StartScan,
    /// Stop an active scan.
    StopScan,
    /// Write an opaque command to the camera.
    WriteCommand(Vec<u8, COMMAND_MAX_LEN>),
}

/// Names of every camera seen since the last explicit scan start.
pub type DeviceNames = Vec<String<32>, BLE_MAX_DISCOVERED>;

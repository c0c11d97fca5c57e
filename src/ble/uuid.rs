//! Bluetooth UUIDs used to find and drive the camera.
//!
//! 16-bit UUIDs are aliases inside the Bluetooth Base UUID
//! (`0000xxxx-0000-1000-8000-00805f9b34fb`). Comparison always happens on
//! the expanded 128-bit form, so a service reported as 0xFEA6 by one stack
//! and as its full 128-bit value by another still matches.

/// A 16-bit or 128-bit attribute UUID.
///
/// 128-bit values are stored in the canonical (big-endian, textual) order.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Uuid {
    Uuid16(u16),
    Uuid128([u8; 16]),
}

/// Bluetooth Base UUID with the 16-bit alias bits cleared.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

impl Uuid {
    pub const fn from_u16(value: u16) -> Self {
        Uuid::Uuid16(value)
    }

    pub const fn from_u128(value: u128) -> Self {
        Uuid::Uuid128(value.to_be_bytes())
    }

    /// Build from the little-endian byte order used on air.
    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Uuid::Uuid128(u128::from_le_bytes(bytes).to_be_bytes())
    }

    /// Full 128-bit value.
    pub const fn as_u128(&self) -> u128 {
        match self {
            Uuid::Uuid16(v) => BASE_UUID | ((*v as u128) << 96),
            Uuid::Uuid128(bytes) => u128::from_be_bytes(*bytes),
        }
    }

    /// The 16-bit alias, if this UUID lives inside the Base UUID.
    pub const fn as_u16(&self) -> Option<u16> {
        let value = self.as_u128();
        if value & !(0xFFFF_u128 << 96) == BASE_UUID {
            Some((value >> 96) as u16)
        } else {
            None
        }
    }
}

impl PartialEq for Uuid {
    fn eq(&self, other: &Self) -> bool {
        self.as_u128() == other.as_u128()
    }
}

impl Eq for Uuid {}

// Camera service and characteristics

/// 16-bit service UUID the camera advertises (Control & Query service).
pub const CAMERA_SERVICE_UUID16: u16 = 0xFEA6;

/// Control & Query service, `0000fea6-0000-1000-8000-00805f9b34fb`.
pub const CAMERA_SERVICE: Uuid = Uuid::from_u16(CAMERA_SERVICE_UUID16);

/// Command characteristic - written to control the camera.
pub const COMMAND_CHARACTERISTIC: Uuid = Uuid::from_u128(0xb5f90072_aa8d_11e3_9046_0002a5d5c51b);

/// Command response characteristic - notifies command results.
pub const COMMAND_RESPONSE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xb5f90073_aa8d_11e3_9046_0002a5d5c51b);

/// Query response characteristic.
pub const QUERY_RESPONSE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xb5f90077_aa8d_11e3_9046_0002a5d5c51b);

// Standard descriptors

/// Client Characteristic Configuration Descriptor.
pub const CCCD: Uuid = Uuid::from_u16(0x2902);

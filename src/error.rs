//! Unified error type for camlink.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (with the `defmt` feature) for efficient
//! on-target logging.

use crate::ble::ConnHandle;

/// Top-level error type used across the BLE core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Radio / link
    /// The host stack rejected a request.
    Host(HostError),

    // Protocol state
    /// No camera link is up.
    NotConnected,
    /// Discovery has not located the command characteristic.
    CommandHandleUnresolved,
    /// No peer is registered under this connection handle.
    PeerNotFound(ConnHandle),
    /// A peer is already registered under this connection handle.
    PeerExists(ConnHandle),
    /// A discovery walk is already running for the peer.
    DiscoveryInProgress,
    /// An attribute handle does not fall inside any known range.
    HandleOutOfRange(u16),
    /// No characteristic owns the given value handle.
    CharacteristicNotFound(u16),

    // Capacity
    /// All peer slots are taken.
    RegistryFull,
    /// Service table of the peer is full.
    ServiceTableFull,
    /// Characteristic table of a service is full.
    CharacteristicTableFull,
    /// Descriptor table of a characteristic is full.
    DescriptorTableFull,

    // Payload
    /// Command payload is empty.
    EmptyPayload,
    /// Command payload exceeds `COMMAND_MAX_LEN`.
    PayloadTooLarge,
    /// Buffer too small for the requested operation.
    BufferOverflow,
}

/// Status returned by the host stack for a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostError {
    /// Raw status code from the stack.
    Raw(u32),
    /// The request queue to the radio task is full.
    Busy,
}

// Convenience conversions

impl From<HostError> for Error {
    fn from(e: HostError) -> Self {
        Error::Host(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

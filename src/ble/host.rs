//! The host-stack capability the camera link drives.
//!
//! Every method is a request that returns immediately: `Ok` means the
//! stack accepted it, and the outcome (if any) comes back later as a
//! [`BleEvent`](super::BleEvent). The one exception is
//! [`cancel_discovery`](HostStack::cancel_discovery), which must have
//! taken effect by the time it returns so a connect can follow.

use super::{AttHandle, ConnHandle, PeerAddress};
use crate::config;
use crate::error::HostError;

/// Scan parameters handed to the host stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanParams {
    pub passive: bool,
    pub filter_duplicates: bool,
    /// Scan interval (0.625 ms units).
    pub interval: u16,
    /// Scan window (0.625 ms units).
    pub window: u16,
    /// How long to scan (ms), 0 = until cancelled.
    pub duration_ms: u32,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            passive: config::BLE_SCAN_PASSIVE,
            filter_duplicates: config::BLE_SCAN_FILTER_DUPLICATES,
            interval: config::BLE_SCAN_INTERVAL,
            window: config::BLE_SCAN_WINDOW,
            duration_ms: config::BLE_SCAN_DURATION_MS,
        }
    }
}

/// GAP and GATT-client operations provided by the platform.
pub trait HostStack {
    /// Start the GAP discovery procedure.
    fn start_discovery(&mut self, params: &ScanParams) -> Result<(), HostError>;

    /// Cancel an active discovery procedure.
    fn cancel_discovery(&mut self) -> Result<(), HostError>;

    /// Initiate a connection; the result arrives as `LinkEstablished`.
    fn connect(&mut self, address: &PeerAddress, timeout_ms: u32) -> Result<(), HostError>;

    /// Tear down a link; `Disconnect` follows.
    fn terminate(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError>;

    /// Pair/bond/encrypt; `EncryptionChange` follows.
    fn initiate_security(&mut self, conn: ConnHandle) -> Result<(), HostError>;

    /// Discover all primary services.
    fn discover_services(&mut self, conn: ConnHandle) -> Result<(), HostError>;

    /// Discover the characteristics declared in `start..=end`.
    fn discover_characteristics(
        &mut self,
        conn: ConnHandle,
        start: AttHandle,
        end: AttHandle,
    ) -> Result<(), HostError>;

    /// Discover the descriptors of the characteristic whose value handle is
    /// `chr_val_handle`, up to `end`.
    fn discover_descriptors(
        &mut self,
        conn: ConnHandle,
        chr_val_handle: AttHandle,
        end: AttHandle,
    ) -> Result<(), HostError>;

    /// Write with response; `WriteComplete` follows.
    fn write(&mut self, conn: ConnHandle, handle: AttHandle, data: &[u8])
        -> Result<(), HostError>;

    /// Write without response.
    fn write_no_response(
        &mut self,
        conn: ConnHandle,
        handle: AttHandle,
        data: &[u8],
    ) -> Result<(), HostError>;

    /// Forget the stored bond for a peer identity.
    fn delete_bond(&mut self, address: &PeerAddress) -> Result<(), HostError>;
}

/// Where a paged GATT discovery continues.
///
/// A host whose stack answers discovery one response at a time reissues
/// the request after the highest handle (`last`) the previous response
/// covered. Returns `None` once `start..=end` is exhausted or the peer
/// stopped making progress.
pub fn next_page_start(start: AttHandle, last: AttHandle, end: AttHandle) -> Option<AttHandle> {
    let next = last.checked_add(1)?;
    (next > start && next <= end).then_some(next)
}

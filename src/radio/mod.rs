//! SoftDevice S140 adapter.
//!
//! Implements [`HostStack`] on top of `nrf-softdevice`. The BLE task owns
//! the [`CameraLink`](crate::ble::CameraLink) and talks to the radio only
//! through the statics below:
//!
//! - [`RadioHost`] queues [`HostRequest`]s (never blocks);
//! - the radio task ([`run`]) executes them and answers on [`EVENTS`];
//! - the scanner task ([`run_scanner`]) owns the GAP scan procedure;
//! - other tasks send [`LinkCommand`]s on [`COMMANDS`] and read
//!   [`snapshot`].

mod bonder;
mod gatt;
mod runner;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use heapless::Vec;
use nrf_softdevice::ble::{Address, AddressType};
use nrf_softdevice::raw;

use crate::ble::{
    AddrKind, AttHandle, BleEvent, ConnHandle, HostStack, LinkCommand, LinkSnapshot, PeerAddress,
    ScanParams,
};
use crate::config::COMMAND_MAX_LEN;
use crate::error::HostError;

pub use bonder::Bonder;
pub use gatt::on_ble_event;
pub use runner::{run, run_scanner};

/// Work for the radio task.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostRequest {
    Connect {
        address: PeerAddress,
        timeout_ms: u32,
    },
    Terminate {
        conn: ConnHandle,
        reason: u8,
    },
    InitiateSecurity(ConnHandle),
    /// Answer to a `RepeatPairing` event.
    AnswerPairing {
        conn: ConnHandle,
        retry: bool,
    },
    DiscoverServices(ConnHandle),
    DiscoverCharacteristics {
        conn: ConnHandle,
        start: AttHandle,
        end: AttHandle,
    },
    DiscoverDescriptors {
        conn: ConnHandle,
        chr_val_handle: AttHandle,
        end: AttHandle,
    },
    Write {
        conn: ConnHandle,
        handle: AttHandle,
        data: Vec<u8, COMMAND_MAX_LEN>,
        with_response: bool,
    },
    DeleteBond(PeerAddress),
}

/// Requests from the BLE task to the radio task.
pub static REQUESTS: Channel<CriticalSectionRawMutex, HostRequest, 8> = Channel::new();

/// Events from the radio (and the restart timer) to the BLE task.
pub static EVENTS: Channel<CriticalSectionRawMutex, BleEvent, 16> = Channel::new();

/// Commands from the control surface to the BLE task.
pub static COMMANDS: Channel<CriticalSectionRawMutex, LinkCommand, 4> = Channel::new();

/// Start a scan with these parameters.
pub(crate) static SCAN_START: Signal<CriticalSectionRawMutex, ScanParams> = Signal::new();

/// Abandon the running (or about to run) scan.
pub(crate) static SCAN_CANCEL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Delay (ms) after which the BLE task wants `ScanRestartDue`.
pub static SCAN_RESTART: Signal<CriticalSectionRawMutex, u32> = Signal::new();

static SNAPSHOT: Mutex<CriticalSectionRawMutex, RefCell<LinkSnapshot>> =
    Mutex::new(RefCell::new(LinkSnapshot::new()));

/// Latest published state of the camera link.
pub fn snapshot() -> LinkSnapshot {
    SNAPSHOT.lock(|s| s.borrow().clone())
}

/// Publish the link state for other tasks.
pub fn publish(snapshot: LinkSnapshot) {
    SNAPSHOT.lock(|s| *s.borrow_mut() = snapshot);
}

/// Queue an event for the BLE task from a context that cannot wait.
pub(crate) fn emit_now(event: BleEvent) {
    if EVENTS.try_send(event).is_err() {
        warn!("BLE event queue full - dropping event");
    }
}

/// [`HostStack`] handle used by the BLE task.
pub struct RadioHost;

impl RadioHost {
    fn submit(&mut self, request: HostRequest) -> Result<(), HostError> {
        REQUESTS.try_send(request).map_err(|_| {
            warn!("Radio request queue full");
            HostError::Busy
        })
    }

    /// Tell the radio how to handle a repeat-pairing request.
    pub fn answer_pairing(&mut self, conn: ConnHandle, retry: bool) -> Result<(), HostError> {
        self.submit(HostRequest::AnswerPairing { conn, retry })
    }

    fn write_request(
        &mut self,
        conn: ConnHandle,
        handle: AttHandle,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), HostError> {
        let data =
            Vec::from_slice(data).map_err(|_| HostError::Raw(raw::NRF_ERROR_DATA_SIZE))?;
        self.submit(HostRequest::Write {
            conn,
            handle,
            data,
            with_response,
        })
    }
}

impl HostStack for RadioHost {
    fn start_discovery(&mut self, params: &ScanParams) -> Result<(), HostError> {
        SCAN_START.signal(*params);
        Ok(())
    }

    fn cancel_discovery(&mut self) -> Result<(), HostError> {
        // Stop the controller right away so a connect can follow; the
        // scanner task then drops its scan future.
        let ret = unsafe { raw::sd_ble_gap_scan_stop() };
        SCAN_CANCEL.signal(());
        match ret {
            // INVALID_STATE: the scanner task has not started the scan yet.
            raw::NRF_SUCCESS | raw::NRF_ERROR_INVALID_STATE => Ok(()),
            err => Err(HostError::Raw(err)),
        }
    }

    fn connect(&mut self, address: &PeerAddress, timeout_ms: u32) -> Result<(), HostError> {
        self.submit(HostRequest::Connect {
            address: *address,
            timeout_ms,
        })
    }

    fn terminate(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError> {
        self.submit(HostRequest::Terminate { conn, reason })
    }

    fn initiate_security(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.submit(HostRequest::InitiateSecurity(conn))
    }

    fn discover_services(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.submit(HostRequest::DiscoverServices(conn))
    }

    fn discover_characteristics(
        &mut self,
        conn: ConnHandle,
        start: AttHandle,
        end: AttHandle,
    ) -> Result<(), HostError> {
        self.submit(HostRequest::DiscoverCharacteristics { conn, start, end })
    }

    fn discover_descriptors(
        &mut self,
        conn: ConnHandle,
        chr_val_handle: AttHandle,
        end: AttHandle,
    ) -> Result<(), HostError> {
        self.submit(HostRequest::DiscoverDescriptors {
            conn,
            chr_val_handle,
            end,
        })
    }

    fn write(&mut self, conn: ConnHandle, handle: AttHandle, data: &[u8]) -> Result<(), HostError> {
        self.write_request(conn, handle, data, true)
    }

    fn write_no_response(
        &mut self,
        conn: ConnHandle,
        handle: AttHandle,
        data: &[u8],
    ) -> Result<(), HostError> {
        self.write_request(conn, handle, data, false)
    }

    fn delete_bond(&mut self, address: &PeerAddress) -> Result<(), HostError> {
        self.submit(HostRequest::DeleteBond(*address))
    }
}

pub(crate) fn to_address(address: &PeerAddress) -> Address {
    let kind = match address.kind {
        AddrKind::Public => AddressType::Public,
        AddrKind::RandomStatic => AddressType::RandomStatic,
        AddrKind::RandomPrivateResolvable => AddressType::RandomPrivateResolvable,
        AddrKind::RandomPrivateNonResolvable => AddressType::RandomPrivateNonResolvable,
    };
    Address::new(kind, address.bytes)
}

pub(crate) fn from_address(address: &Address) -> PeerAddress {
    let kind = match address.address_type() {
        AddressType::Public => AddrKind::Public,
        AddressType::RandomStatic => AddrKind::RandomStatic,
        AddressType::RandomPrivateResolvable => AddrKind::RandomPrivateResolvable,
        // Anonymous advertisers cannot be connected to by address anyway.
        AddressType::RandomPrivateNonResolvable | AddressType::Anonymous => {
            AddrKind::RandomPrivateNonResolvable
        }
    };
    PeerAddress::new(kind, address.bytes())
}

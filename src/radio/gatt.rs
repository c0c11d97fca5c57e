//! GATT client plumbing for the camera link.
//!
//! `gatt_client::discover` only looks up a single service by UUID. The
//! link walks the whole database, so the radio issues the SoftDevice's
//! primary service, characteristic and descriptor discovery calls itself
//! and picks their responses out of the raw event stream
//! ([`on_ble_event`]). Each call returns one page; the radio task pages
//! through the handle range until the peer reports "attribute not found".
//!
//! Notifications still go through `gatt_client::run` with [`CameraClient`].

use core::ptr;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use heapless::Vec;
use nrf_softdevice::ble::gatt_client::{self, Client, DiscoverError, HvxType};
use nrf_softdevice::ble::{Connection, Uuid as SdUuid};
use nrf_softdevice::raw;

use crate::ble::event::{CharacteristicInfo, DescriptorInfo, ServiceInfo};
use crate::ble::uuid::{CAMERA_SERVICE_UUID16, COMMAND_CHARACTERISTIC};
use crate::ble::{AttHandle, BleEvent, ConnHandle, Properties, Status, Uuid};
use crate::config::BLE_GATT_TIMEOUT_MS;

/// Entries kept from one discovery response. A 23-byte MTU fits at most
/// five descriptors.
const PAGE_LEN: usize = 8;

const GATT_SUCCESS: u16 = raw::BLE_GATT_STATUS_SUCCESS as u16;
const ATTRIBUTE_NOT_FOUND: u16 = raw::BLE_GATT_STATUS_ATTERR_ATTRIBUTE_NOT_FOUND as u16;
const UNLIKELY_ERROR: u16 = raw::BLE_GATT_STATUS_ATTERR_UNLIKELY_ERROR as u16;

/// Notification or indication received from the camera.
#[derive(Clone, Copy)]
pub struct CameraNotification {
    pub handle: AttHandle,
    pub indication: bool,
    pub len: u16,
}

/// Decodes notifications for `gatt_client::run`.
pub struct CameraClient;

impl Client for CameraClient {
    type Event = CameraNotification;

    fn on_hvx(
        &self,
        _conn: &Connection,
        type_: HvxType,
        handle: u16,
        data: &[u8],
    ) -> Option<Self::Event> {
        Some(CameraNotification {
            handle,
            indication: matches!(type_, HvxType::Indication),
            len: data.len() as u16,
        })
    }

    fn uuid() -> SdUuid {
        SdUuid::new_16(CAMERA_SERVICE_UUID16)
    }

    fn new_undiscovered(_conn: Connection) -> Self {
        Self
    }

    // Discovery goes through `discover_page`.
    fn discovered_characteristic(
        &mut self,
        _characteristic: &gatt_client::Characteristic,
        _descriptors: &[gatt_client::Descriptor],
    ) {
    }

    fn discovery_complete(&mut self) -> Result<(), DiscoverError> {
        Ok(())
    }
}

/// Register the camera's 128-bit UUID base so the SoftDevice reports its
/// characteristics with a decodable UUID type.
pub fn register_vendor_base() {
    let base = raw::ble_uuid128_t {
        uuid128: COMMAND_CHARACTERISTIC.as_u128().to_le_bytes(),
    };
    let mut uuid_type = 0u8;
    let ret = unsafe { raw::sd_ble_uuid_vs_add(&base, &mut uuid_type) };
    if ret != raw::NRF_SUCCESS {
        warn!("sd_ble_uuid_vs_add failed: {}", ret);
    }
}

/// One GATT discovery procedure.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Procedure {
    Services,
    Characteristics,
    Descriptors { chr_val_handle: AttHandle },
}

impl Procedure {
    /// The event closing this procedure for the link.
    pub fn done(self, conn_handle: ConnHandle, status: Status) -> BleEvent {
        match self {
            Procedure::Services => BleEvent::ServicesDone {
                conn_handle,
                status,
            },
            Procedure::Characteristics => BleEvent::CharacteristicsDone {
                conn_handle,
                status,
            },
            Procedure::Descriptors { .. } => BleEvent::DescriptorsDone {
                conn_handle,
                status,
            },
        }
    }
}

/// Events from one discovery response.
pub struct Page {
    pub events: Vec<BleEvent, PAGE_LEN>,
    /// Highest handle the response covered; the next page starts after it.
    pub last: AttHandle,
}

enum Found {
    Services(Vec<ServiceInfo, PAGE_LEN>),
    Characteristics(Vec<CharacteristicInfo, PAGE_LEN>),
    Descriptors(Vec<DescriptorInfo, PAGE_LEN>),
    Nothing,
}

struct GattResponse {
    conn: ConnHandle,
    status: u16,
    last: AttHandle,
    found: Found,
}

static RESPONSE: Signal<CriticalSectionRawMutex, GattResponse> = Signal::new();

/// Raw SoftDevice event hook; see `Softdevice::run_with_callback`.
///
/// Copies discovery responses out of the event buffer for the radio task.
pub fn on_ble_event(evt: *const raw::ble_evt_t) {
    let evt = unsafe { &*evt };
    let id = u32::from(evt.header.evt_id);
    let gattc = match id {
        raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_PRIM_SRVC_DISC_RSP
        | raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_CHAR_DISC_RSP
        | raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_DESC_DISC_RSP
        | raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_TIMEOUT => unsafe { &evt.evt.gattc_evt },
        _ => return,
    };

    let mut last = 0;
    let found = match id {
        raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_PRIM_SRVC_DISC_RSP => {
            let rsp = unsafe { &gattc.params.prim_srvc_disc_rsp };
            let entries = unsafe { rsp.services.as_slice(usize::from(rsp.count)) };
            let mut services = Vec::new();
            for s in entries {
                if services.is_full() {
                    break;
                }
                last = s.handle_range.end_handle;
                let Some(uuid) = convert_uuid(&s.uuid) else {
                    warn!(
                        "Skipping service with unknown UUID; start_handle={}",
                        s.handle_range.start_handle
                    );
                    continue;
                };
                let _ = services.push(ServiceInfo {
                    uuid,
                    start_handle: s.handle_range.start_handle,
                    end_handle: s.handle_range.end_handle,
                });
            }
            Found::Services(services)
        }
        raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_CHAR_DISC_RSP => {
            let rsp = unsafe { &gattc.params.char_disc_rsp };
            let entries = unsafe { rsp.chars.as_slice(usize::from(rsp.count)) };
            let mut characteristics = Vec::new();
            for c in entries {
                if characteristics.is_full() {
                    break;
                }
                last = c.handle_value;
                let Some(uuid) = convert_uuid(&c.uuid) else {
                    warn!(
                        "Skipping characteristic with unknown UUID; handle={}",
                        c.handle_value
                    );
                    continue;
                };
                let _ = characteristics.push(CharacteristicInfo {
                    uuid,
                    def_handle: c.handle_decl,
                    val_handle: c.handle_value,
                    properties: properties(&c.char_props),
                });
            }
            Found::Characteristics(characteristics)
        }
        raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_DESC_DISC_RSP => {
            let rsp = unsafe { &gattc.params.desc_disc_rsp };
            let entries = unsafe { rsp.descs.as_slice(usize::from(rsp.count)) };
            let mut descriptors = Vec::new();
            for d in entries {
                if descriptors.is_full() {
                    break;
                }
                last = d.handle;
                let Some(uuid) = convert_uuid(&d.uuid) else {
                    continue;
                };
                let _ = descriptors.push(DescriptorInfo {
                    uuid,
                    handle: d.handle,
                });
            }
            Found::Descriptors(descriptors)
        }
        _ => Found::Nothing,
    };

    let status = if id == raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_TIMEOUT {
        UNLIKELY_ERROR
    } else {
        gattc.gatt_status
    };
    RESPONSE.signal(GattResponse {
        conn: gattc.conn_handle,
        status,
        last,
        found,
    });
}

/// Run one discovery call over `start..=end`.
///
/// `Ok(None)` means the peer has nothing more in the range.
pub async fn discover_page(
    conn: ConnHandle,
    procedure: Procedure,
    start: AttHandle,
    end: AttHandle,
) -> Result<Option<Page>, Status> {
    RESPONSE.reset();
    let range = raw::ble_gattc_handle_range_t {
        start_handle: start,
        end_handle: end,
    };
    let ret = unsafe {
        match procedure {
            Procedure::Services => raw::sd_ble_gattc_primary_services_discover(conn, start, ptr::null()),
            Procedure::Characteristics => raw::sd_ble_gattc_characteristics_discover(conn, &range),
            Procedure::Descriptors { .. } => raw::sd_ble_gattc_descriptors_discover(conn, &range),
        }
    };
    if ret != raw::NRF_SUCCESS {
        warn!("{} discovery refused: {}", procedure, ret);
        return Err(Status(UNLIKELY_ERROR));
    }

    let response = async {
        loop {
            let response = RESPONSE.wait().await;
            if response.conn == conn {
                return response;
            }
        }
    };
    let response = match with_timeout(Duration::from_millis(BLE_GATT_TIMEOUT_MS), response).await {
        Ok(response) => response,
        Err(_) => {
            warn!("{} discovery timed out; conn_handle={}", procedure, conn);
            return Err(Status(UNLIKELY_ERROR));
        }
    };

    match response.status {
        GATT_SUCCESS => {}
        ATTRIBUTE_NOT_FOUND => return Ok(None),
        status => return Err(Status(status)),
    }

    let mut events = Vec::new();
    match (procedure, response.found) {
        (Procedure::Services, Found::Services(services)) => {
            for service in services {
                let _ = events.push(BleEvent::ServiceDiscovered {
                    conn_handle: conn,
                    service,
                });
            }
        }
        (Procedure::Characteristics, Found::Characteristics(characteristics)) => {
            for characteristic in characteristics {
                let _ = events.push(BleEvent::CharacteristicDiscovered {
                    conn_handle: conn,
                    characteristic,
                });
            }
        }
        (Procedure::Descriptors { chr_val_handle }, Found::Descriptors(descriptors)) => {
            for descriptor in descriptors {
                let _ = events.push(BleEvent::DescriptorDiscovered {
                    conn_handle: conn,
                    chr_val_handle,
                    descriptor,
                });
            }
        }
        _ => {
            warn!("Unexpected GATT response to {}", procedure);
            return Err(Status(UNLIKELY_ERROR));
        }
    }
    Ok(Some(Page {
        events,
        last: response.last,
    }))
}

fn properties(props: &raw::ble_gatt_char_props_t) -> Properties {
    let mut bits = 0;
    for (set, bit) in [
        (props.broadcast(), Properties::BROADCAST),
        (props.read(), Properties::READ),
        (props.write_wo_resp(), Properties::WRITE_WITHOUT_RESPONSE),
        (props.write(), Properties::WRITE),
        (props.notify(), Properties::NOTIFY),
        (props.indicate(), Properties::INDICATE),
    ] {
        if set != 0 {
            bits |= bit;
        }
    }
    Properties(bits)
}

fn convert_uuid(uuid: &raw::ble_uuid_t) -> Option<Uuid> {
    if u32::from(uuid.type_) == raw::BLE_UUID_TYPE_UNKNOWN {
        return None;
    }
    let mut len = 0u8;
    let mut bytes = [0u8; 16];
    let ret = unsafe { raw::sd_ble_uuid_encode(uuid, &mut len, bytes.as_mut_ptr()) };
    if ret != raw::NRF_SUCCESS {
        return None;
    }
    match len {
        2 => Some(Uuid::from_u16(u16::from_le_bytes([bytes[0], bytes[1]]))),
        16 => Some(Uuid::from_le_bytes(bytes)),
        _ => None,
    }
}

//! Radio and scanner tasks.

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Timer};
use heapless::Vec;
use nrf_softdevice::ble::central::{self, ScanError};
use nrf_softdevice::ble::gatt_client;
use nrf_softdevice::ble::{Address, Connection, EncryptError, SecurityMode};
use nrf_softdevice::{raw, Flash, Softdevice};

use super::gatt::{self, CameraClient, Procedure};
use super::{
    emit_now, from_address, to_address, Bonder, HostRequest, REQUESTS, SCAN_CANCEL, SCAN_START,
};
use crate::ble::adv_filter::advertises_camera;
use crate::ble::host::next_page_start;
use crate::ble::event::AdvReport;
use crate::ble::{AttHandle, BleEvent, ConnHandle, PeerAddress, Status};
use crate::config;

/// Handle reported with a failed `LinkEstablished`.
const NO_CONNECTION: ConnHandle = 0xFFFF;

// HCI / ATT codes used when the wrapper only tells us "it failed".
const STATUS_AUTH_FAILURE: Status = Status(0x05);
const STATUS_REMOTE_USER_TERMINATED: Status = Status(0x13);
const STATUS_LOCAL_HOST_TERMINATED: Status = Status(0x16);
const STATUS_CONN_FAILED_TO_ESTABLISH: Status = Status(0x3E);
const STATUS_UNSPECIFIED: Status = Status(0x1F);
const STATUS_ATT_UNLIKELY_ERROR: Status = Status(0x0E);

async fn emit(event: BleEvent) {
    super::EVENTS.send(event).await;
}

/// Poll the security mode until the link is encrypted (5 s max).
async fn wait_for_secure_link(conn: &Connection) -> bool {
    for _ in 0..25 {
        match conn.security_mode() {
            SecurityMode::NoAccess | SecurityMode::Open => {
                Timer::after(Duration::from_millis(200)).await
            }
            _ => return true,
        }
    }
    false
}

async fn pair(conn: &Connection) -> Status {
    if conn.request_pairing().is_err() {
        warn!("Pairing request refused");
        return STATUS_AUTH_FAILURE;
    }
    if wait_for_secure_link(conn).await {
        Status::SUCCESS
    } else {
        warn!("Pairing did not complete");
        STATUS_AUTH_FAILURE
    }
}

async fn walk(conn: ConnHandle, procedure: Procedure, mut start: AttHandle, end: AttHandle) -> Status {
    while start <= end {
        let page = match gatt::discover_page(conn, procedure, start, end).await {
            Ok(Some(page)) => page,
            Ok(None) => break,
            Err(status) => {
                warn!("{} discovery failed; conn_handle={} status={}", procedure, conn, status.0);
                return status;
            }
        };
        for event in page.events {
            emit(event).await;
        }
        match next_page_start(start, page.last, end) {
            Some(next) => start = next,
            None => break,
        }
    }
    Status::SUCCESS
}

/// Scan timeouts are in 10 ms units; 0 means no timeout.
fn scan_timeout(ms: u32) -> u16 {
    (ms / 10).min(u32::from(u16::MAX)) as u16
}

struct Link {
    conn: Connection,
    handle: ConnHandle,
    client: CameraClient,
    /// We asked for the disconnect.
    terminating: bool,
}

struct Radio {
    sd: &'static Softdevice,
    bonder: &'static Bonder,
    flash: Flash,
    link: Option<Link>,
}

/// Execute [`HostRequest`]s and report their outcome on `EVENTS`.
///
/// While a link is up, notifications are forwarded between requests.
pub async fn run(sd: &'static Softdevice, bonder: &'static Bonder, flash: Flash) -> ! {
    gatt::register_vendor_base();
    let mut radio = Radio {
        sd,
        bonder,
        flash,
        link: None,
    };

    loop {
        let request = match &radio.link {
            Some(link) => {
                let watch = gatt_client::run(&link.conn, &link.client, |n| {
                    emit_now(BleEvent::Notification {
                        conn_handle: link.handle,
                        attr_handle: n.handle,
                        indication: n.indication,
                        len: n.len,
                    })
                });
                match select(REQUESTS.receive(), watch).await {
                    Either::First(request) => Some(request),
                    Either::Second(_) => None,
                }
            }
            None => Some(REQUESTS.receive().await),
        };

        if let Some(request) = request {
            radio.execute(request).await;
        }
        radio.check_link().await;
    }
}

impl Radio {
    async fn execute(&mut self, request: HostRequest) {
        debug!("Radio request: {}", request);
        match request {
            HostRequest::Connect {
                address,
                timeout_ms,
            } => self.connect(address, timeout_ms).await,
            HostRequest::Terminate { conn, reason } => self.terminate(conn, reason),
            HostRequest::InitiateSecurity(conn) => self.secure(conn).await,
            HostRequest::AnswerPairing { conn, retry } => self.answer_pairing(conn, retry).await,
            HostRequest::DiscoverServices(conn) => {
                self.discover(conn, Procedure::Services, 1, AttHandle::MAX)
                    .await
            }
            HostRequest::DiscoverCharacteristics { conn, start, end } => {
                self.discover(conn, Procedure::Characteristics, start, end)
                    .await
            }
            HostRequest::DiscoverDescriptors {
                conn,
                chr_val_handle,
                end,
            } => {
                // Descriptors sit between the value and the range end.
                let procedure = Procedure::Descriptors { chr_val_handle };
                self.discover(conn, procedure, chr_val_handle.saturating_add(1), end)
                    .await
            }
            HostRequest::Write {
                conn,
                handle,
                data,
                with_response,
            } => self.write(conn, handle, &data, with_response).await,
            HostRequest::DeleteBond(address) => {
                if self.bonder.forget(&address) {
                    info!("Deleted bond for {}", address);
                }
                self.persist_bonds().await;
            }
        }
    }

    fn link(&mut self, conn: ConnHandle) -> Option<&mut Link> {
        let link = self.link.as_mut().filter(|l| l.handle == conn);
        if link.is_none() {
            warn!("Request for unknown connection; conn_handle={}", conn);
        }
        link
    }

    async fn connect(&mut self, address: PeerAddress, timeout_ms: u32) {
        if self.link.is_some() {
            warn!("Connect requested while a link is up");
            emit(BleEvent::LinkEstablished {
                conn_handle: NO_CONNECTION,
                address,
                status: STATUS_CONN_FAILED_TO_ESTABLISH,
            })
            .await;
            return;
        }

        let target = to_address(&address);
        let whitelist = [&target];
        let conn_cfg = central::ConnectConfig {
            scan_config: central::ScanConfig {
                whitelist: Some(&whitelist),
                timeout: scan_timeout(timeout_ms),
                ..Default::default()
            },
            conn_params: raw::ble_gap_conn_params_t {
                min_conn_interval: config::BLE_CONN_INTERVAL_MIN,
                max_conn_interval: config::BLE_CONN_INTERVAL_MAX,
                slave_latency: config::BLE_SLAVE_LATENCY,
                conn_sup_timeout: config::BLE_SUP_TIMEOUT,
            },
            ..Default::default()
        };

        let established = central::connect_with_security(self.sd, &conn_cfg, self.bonder)
            .await
            .ok()
            .and_then(|conn| conn.handle().map(|handle| (conn, handle)));

        let event = match established {
            Some((conn, handle)) => {
                self.link = Some(Link {
                    conn,
                    handle,
                    client: CameraClient,
                    terminating: false,
                });
                BleEvent::LinkEstablished {
                    conn_handle: handle,
                    address,
                    status: Status::SUCCESS,
                }
            }
            None => {
                warn!("Connection to {} failed", address);
                BleEvent::LinkEstablished {
                    conn_handle: NO_CONNECTION,
                    address,
                    status: STATUS_CONN_FAILED_TO_ESTABLISH,
                }
            }
        };
        emit(event).await;
    }

    fn terminate(&mut self, conn: ConnHandle, reason: u8) {
        let Some(link) = self.link(conn) else {
            return;
        };
        link.terminating = true;
        let ret = unsafe { raw::sd_ble_gap_disconnect(conn, reason) };
        if ret != raw::NRF_SUCCESS {
            warn!("sd_ble_gap_disconnect failed: {}", ret);
        }
    }

    async fn secure(&mut self, conn: ConnHandle) {
        let Some(link) = self.link(conn) else {
            return;
        };

        let status = match link.conn.encrypt() {
            Ok(()) => {
                if !wait_for_secure_link(&link.conn).await {
                    // Stored keys were rejected: the camera dropped our bond.
                    warn!("Camera rejected stored keys; conn_handle={}", conn);
                    emit(BleEvent::RepeatPairing { conn_handle: conn }).await;
                    return;
                }
                Status::SUCCESS
            }
            Err(EncryptError::PeerKeysNotFound) => pair(&link.conn).await,
            Err(_) => STATUS_AUTH_FAILURE,
        };

        self.persist_bonds().await;
        emit(BleEvent::EncryptionChange {
            conn_handle: conn,
            status,
        })
        .await;
    }

    async fn answer_pairing(&mut self, conn: ConnHandle, retry: bool) {
        let Some(link) = self.link(conn) else {
            return;
        };
        let status = if retry {
            pair(&link.conn).await
        } else {
            STATUS_AUTH_FAILURE
        };
        self.persist_bonds().await;
        emit(BleEvent::EncryptionChange {
            conn_handle: conn,
            status,
        })
        .await;
    }

    /// Run `procedure` over `start..=end` page by page and report every
    /// entry, then close it with the matching "done" event.
    async fn discover(&mut self, conn: ConnHandle, procedure: Procedure, start: AttHandle, end: AttHandle) {
        if self.link(conn).is_none() {
            return;
        }
        let status = walk(conn, procedure, start, end).await;
        emit(procedure.done(conn, status)).await;
    }

    async fn write(&mut self, conn: ConnHandle, handle: AttHandle, data: &[u8], with_response: bool) {
        let Some(link) = self.link(conn) else {
            return;
        };

        if !with_response {
            if gatt_client::write_without_response(&link.conn, handle, data)
                .await
                .is_err()
            {
                warn!("Write without response failed; handle={}", handle);
            }
            return;
        }

        let status = match gatt_client::write(&link.conn, handle, data).await {
            Ok(()) => Status::SUCCESS,
            Err(_) => STATUS_ATT_UNLIKELY_ERROR,
        };
        emit(BleEvent::WriteComplete {
            conn_handle: conn,
            attr_handle: handle,
            status,
        })
        .await;
    }

    /// Report the link as gone once the SoftDevice has dropped it.
    async fn check_link(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        if link.conn.handle().is_some() {
            return;
        }

        // The wrapper does not hand out the HCI reason.
        let reason = if link.terminating {
            STATUS_LOCAL_HOST_TERMINATED
        } else {
            STATUS_REMOTE_USER_TERMINATED
        };
        let conn_handle = link.handle;
        self.link = None;
        emit(BleEvent::Disconnect {
            conn_handle,
            reason,
        })
        .await;
    }

    async fn persist_bonds(&mut self) {
        let Some(mut store) = self.bonder.pending_save() else {
            return;
        };
        if store.save_to_flash(&mut self.flash).await {
            self.bonder.mark_saved();
        }
    }
}

/// Own the GAP scan procedure: run one scan per `SCAN_START`, forward
/// camera advertisements and stop early on `SCAN_CANCEL`.
pub async fn run_scanner(sd: &'static Softdevice) -> ! {
    loop {
        let params = SCAN_START.wait().await;
        if SCAN_CANCEL.try_take().is_some() {
            debug!("Scan cancelled before it started");
            continue;
        }

        let scan_cfg = central::ScanConfig {
            active: !params.passive,
            interval: u32::from(params.interval),
            window: u32::from(params.window),
            timeout: scan_timeout(params.duration_ms),
            ..Default::default()
        };
        let mut seen: Vec<[u8; 6], { config::BLE_MAX_DISCOVERED }> = Vec::new();

        let scan = central::scan(sd, &scan_cfg, |report| {
            let data =
                unsafe { core::slice::from_raw_parts(report.data.p_data, report.data.len as usize) };
            if !advertises_camera(data) {
                return None;
            }

            let address = from_address(&Address::from_raw(report.peer_addr));
            if params.filter_duplicates {
                if seen.contains(&address.bytes) {
                    return None;
                }
                let _ = seen.push(address.bytes);
            }
            emit_now(BleEvent::Advertisement(AdvReport::new(
                address,
                report.rssi,
                data,
            )));
            None
        });

        match select(scan, SCAN_CANCEL.wait()).await {
            Either::First(result) => {
                SCAN_CANCEL.reset();
                let reason = match result {
                    Ok(()) | Err(ScanError::Timeout) => Status::SUCCESS,
                    Err(_) => {
                        error!("Scan failed");
                        STATUS_UNSPECIFIED
                    }
                };
                emit(BleEvent::ScanComplete { reason }).await;
            }
            Either::Second(()) => debug!("Scan cancelled"),
        }
    }
}

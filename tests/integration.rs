//! Host integration tests: drive `CameraLink` end to end through the public
//! API with a recording host stack.

use camlink::ble::command::{SHUTTER_OFF, SHUTTER_ON};
use camlink::ble::event::{AdvReport, CharacteristicInfo, DescriptorInfo, ServiceInfo};
use camlink::ble::uuid::{
    CAMERA_SERVICE, CCCD, COMMAND_CHARACTERISTIC, COMMAND_RESPONSE_CHARACTERISTIC,
    QUERY_RESPONSE_CHARACTERISTIC,
};
use camlink::ble::{
    AddrKind, AttHandle, BleEvent, CameraLink, ConnHandle, HostStack, LinkCommand, LinkState,
    PeerAddress, Properties, Reaction, ScanParams, Status, Uuid,
};
use camlink::config::{BLE_CONNECT_TIMEOUT_MS, BLE_SCAN_RESTART_DELAY_MS, BLE_TERMINATE_REASON};
use camlink::control::{ButtonEvent, ControlSurface};
use camlink::{Error, HostError};

// ════════════════════════════════════════════════════════════════════════
// Recording host
// ════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    StartDiscovery,
    CancelDiscovery,
    Connect(PeerAddress, u32),
    Terminate(ConnHandle, u8),
    InitiateSecurity(ConnHandle),
    DiscoverServices(ConnHandle),
    DiscoverCharacteristics(ConnHandle, AttHandle, AttHandle),
    DiscoverDescriptors(ConnHandle, AttHandle, AttHandle),
    Write(ConnHandle, AttHandle, Vec<u8>),
    WriteNoResponse(ConnHandle, AttHandle, Vec<u8>),
    DeleteBond(PeerAddress),
}

#[derive(Default)]
struct RecordingHost {
    calls: Vec<Call>,
    refuse_connect: bool,
}

impl RecordingHost {
    fn take(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }
}

impl HostStack for RecordingHost {
    fn start_discovery(&mut self, _params: &ScanParams) -> Result<(), HostError> {
        self.calls.push(Call::StartDiscovery);
        Ok(())
    }

    fn cancel_discovery(&mut self) -> Result<(), HostError> {
        self.calls.push(Call::CancelDiscovery);
        Ok(())
    }

    fn connect(&mut self, address: &PeerAddress, timeout_ms: u32) -> Result<(), HostError> {
        self.calls.push(Call::Connect(*address, timeout_ms));
        if self.refuse_connect {
            Err(HostError::Busy)
        } else {
            Ok(())
        }
    }

    fn terminate(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError> {
        self.calls.push(Call::Terminate(conn, reason));
        Ok(())
    }

    fn initiate_security(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.calls.push(Call::InitiateSecurity(conn));
        Ok(())
    }

    fn discover_services(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.calls.push(Call::DiscoverServices(conn));
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        conn: ConnHandle,
        start: AttHandle,
        end: AttHandle,
    ) -> Result<(), HostError> {
        self.calls.push(Call::DiscoverCharacteristics(conn, start, end));
        Ok(())
    }

    fn discover_descriptors(
        &mut self,
        conn: ConnHandle,
        chr_val_handle: AttHandle,
        end: AttHandle,
    ) -> Result<(), HostError> {
        self.calls
            .push(Call::DiscoverDescriptors(conn, chr_val_handle, end));
        Ok(())
    }

    fn write(&mut self, conn: ConnHandle, handle: AttHandle, data: &[u8]) -> Result<(), HostError> {
        self.calls.push(Call::Write(conn, handle, data.to_vec()));
        Ok(())
    }

    fn write_no_response(
        &mut self,
        conn: ConnHandle,
        handle: AttHandle,
        data: &[u8],
    ) -> Result<(), HostError> {
        self.calls
            .push(Call::WriteNoResponse(conn, handle, data.to_vec()));
        Ok(())
    }

    fn delete_bond(&mut self, address: &PeerAddress) -> Result<(), HostError> {
        self.calls.push(Call::DeleteBond(*address));
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════
// Fixtures
// ════════════════════════════════════════════════════════════════════════

const CONN: ConnHandle = 1;
const CAMERA: PeerAddress = PeerAddress::new(AddrKind::RandomStatic, [1, 2, 3, 4, 5, 0xC6]);

/// Flags, complete 16-bit UUID list [0xFEA6], complete name "GoPro 1234".
fn camera_adv() -> BleEvent {
    let mut data = vec![0x02, 0x01, 0x06, 0x03, 0x03, 0xA6, 0xFE, 0x0B, 0x09];
    data.extend_from_slice(b"GoPro 1234");
    BleEvent::Advertisement(AdvReport::new(CAMERA, -60, &data))
}

fn done(status: Status) -> [BleEvent; 3] {
    [
        BleEvent::ServicesDone {
            conn_handle: CONN,
            status,
        },
        BleEvent::CharacteristicsDone {
            conn_handle: CONN,
            status,
        },
        BleEvent::DescriptorsDone {
            conn_handle: CONN,
            status,
        },
    ]
}

fn characteristic(uuid: Uuid, def: AttHandle, props: u8) -> BleEvent {
    BleEvent::CharacteristicDiscovered {
        conn_handle: CONN,
        characteristic: CharacteristicInfo {
            uuid,
            def_handle: def,
            val_handle: def + 1,
            properties: Properties(props),
        },
    }
}

fn cccd(chr_val_handle: AttHandle, handle: AttHandle) -> BleEvent {
    BleEvent::DescriptorDiscovered {
        conn_handle: CONN,
        chr_val_handle,
        descriptor: DescriptorInfo { uuid: CCCD, handle },
    }
}

fn feed(link: &mut CameraLink, host: &mut RecordingHost, events: &[BleEvent]) -> Vec<Reaction> {
    events.iter().map(|e| link.handle_event(host, e)).collect()
}

/// Scan, connect and encrypt; returns with service discovery requested.
fn connect_and_secure(link: &mut CameraLink, host: &mut RecordingHost) {
    link.start_scan(host).unwrap();
    feed(
        link,
        host,
        &[
            camera_adv(),
            BleEvent::LinkEstablished {
                conn_handle: CONN,
                address: CAMERA,
                status: Status::SUCCESS,
            },
            BleEvent::EncryptionChange {
                conn_handle: CONN,
                status: Status::SUCCESS,
            },
        ],
    );
    assert_eq!(link.state(), LinkState::ServiceDiscovery);
    host.take();
}

/// Camera service 0x10..=0x1A:
///   command          0x11/0x12  write
///   command response 0x13/0x14  notify, CCCD 0x15
///   query response   0x16/0x17  notify, CCCD 0x18
fn walk_camera_database(link: &mut CameraLink, host: &mut RecordingHost) {
    let [services_done, chars_done, descs_done] = done(Status::SUCCESS);
    feed(
        link,
        host,
        &[
            BleEvent::ServiceDiscovered {
                conn_handle: CONN,
                service: ServiceInfo {
                    uuid: CAMERA_SERVICE,
                    start_handle: 0x10,
                    end_handle: 0x1A,
                },
            },
            services_done,
            characteristic(
                COMMAND_CHARACTERISTIC,
                0x11,
                Properties::WRITE | Properties::WRITE_WITHOUT_RESPONSE,
            ),
            characteristic(COMMAND_RESPONSE_CHARACTERISTIC, 0x13, Properties::NOTIFY),
            characteristic(QUERY_RESPONSE_CHARACTERISTIC, 0x16, Properties::NOTIFY),
            chars_done,
            cccd(0x14, 0x15),
            descs_done.clone(),
            cccd(0x17, 0x18),
            descs_done,
        ],
    );
}

// ════════════════════════════════════════════════════════════════════════
// Full flow
// ════════════════════════════════════════════════════════════════════════

#[test]
fn scan_connect_discover_subscribe_and_shoot() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();

    link.start_scan(&mut host).unwrap();
    assert_eq!(link.state(), LinkState::Scanning);
    assert_eq!(host.take(), [Call::StartDiscovery]);

    assert_eq!(link.handle_event(&mut host, &camera_adv()), Reaction::None);
    assert_eq!(link.state(), LinkState::Connecting);
    assert_eq!(
        host.take(),
        [
            Call::CancelDiscovery,
            Call::Connect(CAMERA, BLE_CONNECT_TIMEOUT_MS)
        ]
    );
    assert_eq!(link.discovered_device_names()[0].as_str(), "GoPro 1234");

    link.handle_event(
        &mut host,
        &BleEvent::LinkEstablished {
            conn_handle: CONN,
            address: CAMERA,
            status: Status::SUCCESS,
        },
    );
    assert_eq!(link.state(), LinkState::Securing);
    assert_eq!(host.take(), [Call::InitiateSecurity(CONN)]);

    link.handle_event(
        &mut host,
        &BleEvent::EncryptionChange {
            conn_handle: CONN,
            status: Status::SUCCESS,
        },
    );
    assert_eq!(link.state(), LinkState::ServiceDiscovery);
    assert_eq!(host.take(), [Call::DiscoverServices(CONN)]);

    walk_camera_database(&mut link, &mut host);
    assert_eq!(
        host.take(),
        [
            Call::DiscoverCharacteristics(CONN, 0x10, 0x1A),
            Call::DiscoverDescriptors(CONN, 0x14, 0x15),
            Call::DiscoverDescriptors(CONN, 0x17, 0x1A),
            Call::Write(CONN, 0x15, vec![0x01, 0x00]),
            Call::Write(CONN, 0x18, vec![0x01, 0x00]),
        ]
    );
    assert_eq!(link.state(), LinkState::Ready);
    assert_eq!(link.camera().command_handle, Some(0x12));

    link.write_command(&mut host, &SHUTTER_ON).unwrap();
    assert_eq!(
        host.take(),
        [Call::WriteNoResponse(CONN, 0x12, SHUTTER_ON.to_vec())]
    );
}

/// GAP 0x01..=0x07, Battery 0x08..=0x0B and the camera service, reported
/// one service per page the way a paging radio delivers them.
#[test]
fn walks_every_primary_service() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();
    connect_and_secure(&mut link, &mut host);

    let service = |uuid: u16, start: AttHandle, end: AttHandle| BleEvent::ServiceDiscovered {
        conn_handle: CONN,
        service: ServiceInfo {
            uuid: Uuid::from_u16(uuid),
            start_handle: start,
            end_handle: end,
        },
    };
    let [services_done, chars_done, descs_done] = done(Status::SUCCESS);

    feed(
        &mut link,
        &mut host,
        &[
            service(0x1800, 0x01, 0x07),
            service(0x180F, 0x08, 0x0B),
            BleEvent::ServiceDiscovered {
                conn_handle: CONN,
                service: ServiceInfo {
                    uuid: CAMERA_SERVICE,
                    start_handle: 0x10,
                    end_handle: 0x1A,
                },
            },
            services_done,
            characteristic(Uuid::from_u16(0x2A00), 0x02, Properties::READ),
            chars_done.clone(),
            characteristic(Uuid::from_u16(0x2A19), 0x09, Properties::READ | Properties::NOTIFY),
            chars_done.clone(),
            characteristic(
                COMMAND_CHARACTERISTIC,
                0x11,
                Properties::WRITE | Properties::WRITE_WITHOUT_RESPONSE,
            ),
            characteristic(COMMAND_RESPONSE_CHARACTERISTIC, 0x13, Properties::NOTIFY),
            chars_done,
            descs_done.clone(),
            cccd(0x0A, 0x0B),
            descs_done.clone(),
            cccd(0x14, 0x15),
            descs_done,
        ],
    );

    assert_eq!(
        host.take(),
        [
            Call::DiscoverCharacteristics(CONN, 0x01, 0x07),
            Call::DiscoverCharacteristics(CONN, 0x08, 0x0B),
            Call::DiscoverCharacteristics(CONN, 0x10, 0x1A),
            Call::DiscoverDescriptors(CONN, 0x03, 0x07),
            Call::DiscoverDescriptors(CONN, 0x0A, 0x0B),
            Call::DiscoverDescriptors(CONN, 0x14, 0x1A),
            // Only the camera service gets subscribed.
            Call::Write(CONN, 0x15, vec![0x01, 0x00]),
        ]
    );
    assert_eq!(link.state(), LinkState::Ready);

    let peer = link.peers().find(CONN).unwrap();
    assert_eq!(peer.services.len(), 3);
    let battery = peer.find_service(&Uuid::from_u16(0x180F)).unwrap();
    assert_eq!(battery.characteristics.len(), 1);
    assert_eq!(battery.characteristics[0].descriptors.len(), 1);
}

#[test]
fn camera_loss_schedules_scan_restart() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();
    connect_and_secure(&mut link, &mut host);
    walk_camera_database(&mut link, &mut host);
    host.take();

    let reaction = link.handle_event(
        &mut host,
        &BleEvent::Disconnect {
            conn_handle: CONN,
            reason: Status(0x08),
        },
    );
    assert_eq!(reaction, Reaction::RestartScanAfter(BLE_SCAN_RESTART_DELAY_MS));
    assert_eq!(link.state(), LinkState::Idle);
    assert!(!link.camera().is_connected());
    assert!(link.peers().is_empty());
    assert_eq!(
        link.write_command(&mut host, &SHUTTER_ON),
        Err(Error::NotConnected)
    );

    link.handle_event(&mut host, &BleEvent::ScanRestartDue);
    assert_eq!(link.state(), LinkState::Scanning);
    assert_eq!(host.take(), [Call::StartDiscovery]);
}

#[test]
fn stop_scan_while_connected_disables_auto_rescan() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();
    connect_and_secure(&mut link, &mut host);

    link.handle_command(&mut host, &LinkCommand::StopScan).unwrap();
    // Nothing to cancel: the scan already stopped for the connect.
    assert!(host.take().is_empty());

    let reaction = link.handle_event(
        &mut host,
        &BleEvent::Disconnect {
            conn_handle: CONN,
            reason: Status(0x13),
        },
    );
    assert_eq!(reaction, Reaction::None);
    assert_eq!(link.state(), LinkState::Idle);
}

#[test]
fn security_failure_terminates_the_link() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();
    link.start_scan(&mut host).unwrap();
    feed(
        &mut link,
        &mut host,
        &[
            camera_adv(),
            BleEvent::LinkEstablished {
                conn_handle: CONN,
                address: CAMERA,
                status: Status::SUCCESS,
            },
        ],
    );
    host.take();

    link.handle_event(
        &mut host,
        &BleEvent::EncryptionChange {
            conn_handle: CONN,
            status: Status(0x05),
        },
    );
    assert_eq!(host.take(), [Call::Terminate(CONN, BLE_TERMINATE_REASON)]);

    let reaction = link.handle_event(
        &mut host,
        &BleEvent::Disconnect {
            conn_handle: CONN,
            reason: Status(0x16),
        },
    );
    assert_eq!(reaction, Reaction::RestartScanAfter(BLE_SCAN_RESTART_DELAY_MS));
}

#[test]
fn failed_discovery_terminates_the_link() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();
    connect_and_secure(&mut link, &mut host);

    let [services_done, ..] = done(Status(0x0E));
    link.handle_event(&mut host, &services_done);
    assert_eq!(host.take(), [Call::Terminate(CONN, BLE_TERMINATE_REASON)]);
    assert!(!link.camera().is_ready());
}

#[test]
fn camera_without_command_characteristic_never_becomes_ready() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();
    connect_and_secure(&mut link, &mut host);

    let [services_done, chars_done, descs_done] = done(Status::SUCCESS);
    feed(
        &mut link,
        &mut host,
        &[
            BleEvent::ServiceDiscovered {
                conn_handle: CONN,
                service: ServiceInfo {
                    uuid: CAMERA_SERVICE,
                    start_handle: 0x10,
                    end_handle: 0x15,
                },
            },
            services_done,
            characteristic(COMMAND_RESPONSE_CHARACTERISTIC, 0x11, Properties::NOTIFY),
            chars_done,
            cccd(0x12, 0x13),
            descs_done,
        ],
    );

    assert_eq!(link.state(), LinkState::Subscribed);
    assert_eq!(link.camera().command_handle, None);
    assert_eq!(
        link.write_command(&mut host, &SHUTTER_ON),
        Err(Error::CommandHandleUnresolved)
    );
}

#[test]
fn repeat_pairing_deletes_the_stale_bond() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();
    link.start_scan(&mut host).unwrap();
    feed(
        &mut link,
        &mut host,
        &[
            camera_adv(),
            BleEvent::LinkEstablished {
                conn_handle: CONN,
                address: CAMERA,
                status: Status::SUCCESS,
            },
        ],
    );
    host.take();

    let reaction = link.handle_event(&mut host, &BleEvent::RepeatPairing { conn_handle: CONN });
    assert_eq!(reaction, Reaction::RetryPairing);
    assert_eq!(host.take(), [Call::DeleteBond(CAMERA)]);

    let reaction = link.handle_event(&mut host, &BleEvent::RepeatPairing { conn_handle: 9 });
    assert_eq!(reaction, Reaction::IgnorePairing);
    assert!(host.take().is_empty());
}

#[test]
fn refused_connect_falls_back_to_idle() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost {
        refuse_connect: true,
        ..Default::default()
    };
    link.start_scan(&mut host).unwrap();

    let reaction = link.handle_event(&mut host, &camera_adv());
    assert_eq!(reaction, Reaction::RestartScanAfter(BLE_SCAN_RESTART_DELAY_MS));
    assert_eq!(link.state(), LinkState::Idle);
}

#[test]
fn other_advertisers_are_ignored() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();
    link.start_scan(&mut host).unwrap();
    host.take();

    // Heart-rate sensor: 16-bit UUID 0x180D.
    let data = [0x02, 0x01, 0x06, 0x03, 0x03, 0x0D, 0x18];
    let adv = BleEvent::Advertisement(AdvReport::new(CAMERA, -40, &data));
    assert_eq!(link.handle_event(&mut host, &adv), Reaction::None);
    assert_eq!(link.state(), LinkState::Scanning);
    assert!(host.take().is_empty());
    assert!(link.discovered_device_names().is_empty());
}

// ════════════════════════════════════════════════════════════════════════
// Control surface
// ════════════════════════════════════════════════════════════════════════

#[test]
fn shutter_button_drives_the_camera() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();
    let mut surface = ControlSurface::new();

    // Not ready yet: the press is dropped.
    assert_eq!(surface.on_button(ButtonEvent::Shutter, &link.snapshot()), None);

    connect_and_secure(&mut link, &mut host);
    walk_camera_database(&mut link, &mut host);
    host.take();

    for expected in [SHUTTER_ON, SHUTTER_OFF] {
        let cmd = surface
            .on_button(ButtonEvent::Shutter, &link.snapshot())
            .unwrap();
        link.handle_command(&mut host, &cmd).unwrap();
        assert_eq!(
            host.take(),
            [Call::WriteNoResponse(CONN, 0x12, expected.to_vec())]
        );
    }
}

#[test]
fn scan_button_follows_snapshot() {
    let mut link = CameraLink::default();
    let mut host = RecordingHost::default();
    let mut surface = ControlSurface::new();

    let cmd = surface.on_button(ButtonEvent::Scan, &link.snapshot()).unwrap();
    assert_eq!(cmd, LinkCommand::StartScan);
    link.handle_command(&mut host, &cmd).unwrap();
    assert!(link.snapshot().scanning);

    let cmd = surface.on_button(ButtonEvent::Scan, &link.snapshot()).unwrap();
    assert_eq!(cmd, LinkCommand::StopScan);
    link.handle_command(&mut host, &cmd).unwrap();
    assert_eq!(host.take(), [Call::StartDiscovery, Call::CancelDiscovery]);
    assert_eq!(link.state(), LinkState::Idle);
}

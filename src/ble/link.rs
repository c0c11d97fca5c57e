//! Camera link - the connection and security state machine.
//!
//! ```text
//! Idle -> Scanning -> Connecting -> LinkEstablished -> Securing
//!      -> ServiceDiscovery -> Subscribed -> Ready
//! ```
//!
//! A failed connect, a security failure or a disconnect from any state
//! lands back in Idle; the scan controller decides whether to resume.
//!
//! [`CameraLink`] owns the scan controller, the peer registry and the
//! connected-camera record. The BLE task feeds it one [`BleEvent`] at a
//! time and carries out the returned [`Reaction`]; other tasks read a
//! [`LinkSnapshot`].

use super::adv_filter::advertises_camera;
use super::command;
use super::event::{AdvReport, BleEvent, Reaction, Status};
use super::peer::DiscoveryOutcome;
use super::scan::ScanController;
use super::subscribe::{resolve_command_handle, subscribe_all};
use super::{AttHandle, ConnHandle, DeviceNames, HostStack, LinkCommand, PeerAddress, PeerRegistry};
use crate::config::{BLE_CONNECT_TIMEOUT_MS, BLE_TERMINATE_REASON};
use crate::error::{Error, Result};

/// Where the camera link stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    LinkEstablished,
    Securing,
    ServiceDiscovery,
    Subscribed,
    /// Commands can be written.
    Ready,
}

/// The camera currently connected, if any.
///
/// Both handles are `None` until known and are cleared on disconnect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectedCamera {
    pub conn_handle: Option<ConnHandle>,
    pub command_handle: Option<AttHandle>,
    pub address: Option<PeerAddress>,
}

impl ConnectedCamera {
    pub const fn new() -> Self {
        Self {
            conn_handle: None,
            command_handle: None,
            address: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn_handle.is_some()
    }

    /// True when a command write would be attempted.
    pub fn is_ready(&self) -> bool {
        self.conn_handle.is_some() && self.command_handle.is_some()
    }
}

/// Read-only copy of the link for other tasks.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkSnapshot {
    pub state: LinkState,
    pub scanning: bool,
    pub camera: ConnectedCamera,
    pub devices: DeviceNames,
}

impl LinkSnapshot {
    pub const fn new() -> Self {
        Self {
            state: LinkState::Idle,
            scanning: false,
            camera: ConnectedCamera::new(),
            devices: DeviceNames::new(),
        }
    }
}

impl Default for LinkSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CameraLink {
    state: LinkState,
    scan: ScanController,
    peers: PeerRegistry,
    camera: ConnectedCamera,
}

impl Default for CameraLink {
    fn default() -> Self {
        Self::new(ScanController::default())
    }
}

impl CameraLink {
    pub const fn new(scan: ScanController) -> Self {
        Self {
            state: LinkState::Idle,
            scan,
            peers: PeerRegistry::new(),
            camera: ConnectedCamera::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn camera(&self) -> &ConnectedCamera {
        &self.camera
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn scanner(&self) -> &ScanController {
        &self.scan
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: self.state,
            scanning: self.scan.is_scanning(),
            camera: self.camera,
            devices: self.scan.device_names(),
        }
    }

    // Collaborator interface

    /// Start looking for a camera.
    ///
    /// While a connect is pending or a link is up the scan is deferred:
    /// automatic restarts are switched back on and the scan resumes once
    /// the link drops.
    pub fn start_scan<H: HostStack>(&mut self, host: &mut H) -> Result<()> {
        if self.link_busy() {
            info!("BLE scan deferred; link busy state={}", self.state);
            self.scan.want();
            return Ok(());
        }
        self.scan.start(host)?;
        if self.state == LinkState::Idle {
            self.state = LinkState::Scanning;
        }
        Ok(())
    }

    /// Stop looking for a camera and stay put after the next disconnect.
    pub fn stop_scan<H: HostStack>(&mut self, host: &mut H) -> Result<()> {
        self.scan.stop(host)?;
        if self.state == LinkState::Scanning {
            self.state = LinkState::Idle;
        }
        Ok(())
    }

    /// Send an opaque command to the connected camera.
    pub fn write_command<H: HostStack>(&mut self, host: &mut H, payload: &[u8]) -> Result<()> {
        command::write_command(&self.camera, host, payload)
    }

    /// Names of the cameras seen since the last explicit scan start.
    pub fn discovered_device_names(&self) -> DeviceNames {
        self.scan.device_names()
    }

    /// Carry out a request from another task.
    pub fn handle_command<H: HostStack>(&mut self, host: &mut H, cmd: &LinkCommand) -> Result<()> {
        match cmd {
            LinkCommand::StartScan => self.start_scan(host),
            LinkCommand::StopScan => self.stop_scan(host),
            LinkCommand::WriteCommand(payload) => self.write_command(host, payload),
        }
    }

    // Host events

    /// Advance the state machine by one host event.
    pub fn handle_event<H: HostStack>(&mut self, host: &mut H, event: &BleEvent) -> Reaction {
        match event {
            BleEvent::Advertisement(report) => self.on_advertisement(host, report),
            BleEvent::ScanComplete { reason } => {
                self.scan.on_scan_complete(*reason);
                if self.state == LinkState::Scanning {
                    self.state = LinkState::Idle;
                }
                Reaction::None
            }
            BleEvent::LinkEstablished {
                conn_handle,
                address,
                status,
            } => self.on_link_established(host, *conn_handle, *address, *status),
            BleEvent::EncryptionChange {
                conn_handle,
                status,
            } => self.on_encryption_change(host, *conn_handle, *status),
            BleEvent::Disconnect {
                conn_handle,
                reason,
            } => {
                info!("disconnect; conn_handle={} reason={}", conn_handle, reason.0);
                self.drop_link(*conn_handle)
            }
            BleEvent::RepeatPairing { conn_handle } => self.on_repeat_pairing(host, *conn_handle),
            BleEvent::MtuChanged { conn_handle, mtu } => {
                info!("mtu update; conn_handle={} mtu={}", conn_handle, mtu);
                Reaction::None
            }
            BleEvent::ServiceDiscovered { conn_handle, .. }
            | BleEvent::ServicesDone { conn_handle, .. }
            | BleEvent::CharacteristicDiscovered { conn_handle, .. }
            | BleEvent::CharacteristicsDone { conn_handle, .. }
            | BleEvent::DescriptorDiscovered { conn_handle, .. }
            | BleEvent::DescriptorsDone { conn_handle, .. } => {
                match self.peers.on_discovery_event(host, event) {
                    Some(DiscoveryOutcome::Complete) => self.on_discovery_complete(host, *conn_handle),
                    Some(DiscoveryOutcome::Failed(_)) => self.terminate(host, *conn_handle),
                    None => Reaction::None,
                }
            }
            BleEvent::WriteComplete {
                conn_handle,
                attr_handle,
                status,
            } => {
                if status.is_success() {
                    debug!(
                        "write complete; conn_handle={} attr_handle={}",
                        conn_handle, attr_handle
                    );
                } else {
                    warn!(
                        "write failed; conn_handle={} attr_handle={} status={}",
                        conn_handle, attr_handle, status.0
                    );
                }
                Reaction::None
            }
            BleEvent::Notification {
                conn_handle,
                attr_handle,
                indication,
                len,
            } => {
                info!(
                    "received {}; conn_handle={} attr_handle={} attr_len={}",
                    if *indication { "indication" } else { "notification" },
                    conn_handle,
                    attr_handle,
                    len
                );
                Reaction::None
            }
            BleEvent::ScanRestartDue => {
                if self.link_busy() {
                    debug!("scan restart skipped; link busy");
                    return Reaction::None;
                }
                self.scan.on_restart_due(host);
                if self.scan.is_scanning() {
                    self.state = LinkState::Scanning;
                }
                Reaction::None
            }
        }
    }

    fn on_advertisement<H: HostStack>(&mut self, host: &mut H, report: &AdvReport) -> Reaction {
        if !self.scan.is_scanning() || self.link_busy() || !advertises_camera(&report.data) {
            return Reaction::None;
        }
        self.scan.record_device(report);

        // Scanning and connecting cannot overlap.
        if self.scan.cancel(host).is_err() {
            return Reaction::None;
        }

        info!("Connecting to camera {}", report.address);
        if let Err(e) = host.connect(&report.address, BLE_CONNECT_TIMEOUT_MS) {
            error!("Failed to connect to camera; error={}", e);
            self.state = LinkState::Idle;
            return self.scan.restart_reaction();
        }
        self.state = LinkState::Connecting;
        Reaction::None
    }

    fn on_link_established<H: HostStack>(
        &mut self,
        host: &mut H,
        conn: ConnHandle,
        address: PeerAddress,
        status: Status,
    ) -> Reaction {
        if !status.is_success() {
            error!("Connection failed; status={}", status.0);
            if !self.camera.is_connected() {
                self.state = LinkState::Idle;
            }
            return self.scan.restart_reaction();
        }

        info!("Connection established; conn_handle={}", conn);
        if let Err(e) = self.peers.add(conn, address) {
            error!("Failed to add peer; error={}", e);
            return self.terminate(host, conn);
        }
        self.camera = ConnectedCamera {
            conn_handle: Some(conn),
            command_handle: None,
            address: Some(address),
        };
        self.state = LinkState::LinkEstablished;

        if let Err(e) = host.initiate_security(conn) {
            error!("Failed to initiate security; error={}", e);
            return self.terminate(host, conn);
        }
        self.state = LinkState::Securing;
        Reaction::None
    }

    fn on_encryption_change<H: HostStack>(
        &mut self,
        host: &mut H,
        conn: ConnHandle,
        status: Status,
    ) -> Reaction {
        if self.peers.find(conn).is_none() {
            warn!("encryption change for unknown peer; conn_handle={}", conn);
            return Reaction::None;
        }
        if !status.is_success() {
            error!("Security failed; conn_handle={} status={}", conn, status.0);
            return self.terminate(host, conn);
        }

        info!("Link encrypted; conn_handle={}", conn);
        match self.peers.discover_all(conn, host) {
            Ok(()) => {
                self.state = LinkState::ServiceDiscovery;
                Reaction::None
            }
            Err(Error::DiscoveryInProgress) => {
                debug!("discovery already running; conn_handle={}", conn);
                Reaction::None
            }
            Err(e) => {
                error!("Failed to discover services; error={}", e);
                self.terminate(host, conn)
            }
        }
    }

    fn on_discovery_complete<H: HostStack>(&mut self, host: &mut H, conn: ConnHandle) -> Reaction {
        let Some(peer) = self.peers.find(conn) else {
            return Reaction::None;
        };
        let report = subscribe_all(peer, host);
        debug!("subscriptions: {}", report);
        self.state = LinkState::Subscribed;

        if self.camera.conn_handle == Some(conn) {
            self.camera.command_handle = resolve_command_handle(peer);
            if self.camera.command_handle.is_some() {
                self.state = LinkState::Ready;
                info!("Camera ready; conn_handle={}", conn);
            }
        }
        Reaction::None
    }

    fn on_repeat_pairing<H: HostStack>(&mut self, host: &mut H, conn: ConnHandle) -> Reaction {
        let Some(address) = self.peers.find(conn).map(|p| p.address) else {
            warn!("repeat pairing for unknown peer; conn_handle={}", conn);
            return Reaction::IgnorePairing;
        };
        // Stale bond: forget it and let the peer pair again.
        if let Err(e) = host.delete_bond(&address) {
            warn!("Failed to delete bond; error={}", e);
        }
        Reaction::RetryPairing
    }

    /// A connect is pending or a camera link is up.
    fn link_busy(&self) -> bool {
        self.camera.is_connected() || self.state == LinkState::Connecting
    }

    /// Ask the host to drop `conn`; cleans up locally if it refuses.
    fn terminate<H: HostStack>(&mut self, host: &mut H, conn: ConnHandle) -> Reaction {
        match host.terminate(conn, BLE_TERMINATE_REASON) {
            // `Disconnect` will follow.
            Ok(()) => Reaction::None,
            Err(e) => {
                error!("Failed to terminate link; conn_handle={} error={}", conn, e);
                self.drop_link(conn)
            }
        }
    }

    fn drop_link(&mut self, conn: ConnHandle) -> Reaction {
        let known = self.peers.delete(conn).is_ok();
        // A link that never got registered still belongs to a pending connect.
        let ours = self.camera.conn_handle == Some(conn)
            || (!self.camera.is_connected() && self.state == LinkState::Connecting);
        if !known && !ours {
            debug!("disconnect for unknown link; conn_handle={}", conn);
            return Reaction::None;
        }
        if ours {
            self.camera = ConnectedCamera::new();
        }
        self.state = LinkState::Idle;
        self.scan.restart_reaction()
    }
}

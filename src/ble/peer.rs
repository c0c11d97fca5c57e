//! Peer registry - per-connection cache of the remote GATT database.
//!
//! GATT discovery takes many round trips: one request lists the primary
//! services, then one request per service lists its characteristics, then
//! one request per characteristic lists its descriptors. The registry
//! issues each request through the [`HostStack`] and files the results as
//! the matching events come back, keeping its place in [`Peer::progress`].

use heapless::Vec;

use super::event::{BleEvent, CharacteristicInfo, DescriptorInfo, ServiceInfo, Status};
use super::{AttHandle, ConnHandle, HostStack, PeerAddress, Properties, Uuid};
use crate::config::{
    BLE_MAX_CHARACTERISTICS, BLE_MAX_DESCRIPTORS, BLE_MAX_PEERS, BLE_MAX_SERVICES,
};
use crate::error::{Error, Result};

/// A descriptor of a remote characteristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Descriptor {
    pub uuid: Uuid,
    pub handle: AttHandle,
}

/// A remote characteristic with its descriptors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    /// Handle of the characteristic declaration.
    pub def_handle: AttHandle,
    /// Handle of the characteristic value.
    pub val_handle: AttHandle,
    pub properties: Properties,
    pub descriptors: Vec<Descriptor, BLE_MAX_DESCRIPTORS>,
}

impl Characteristic {
    pub fn find_descriptor(&self, uuid: &Uuid) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.uuid == *uuid)
    }
}

/// A remote primary service and the characteristics inside its range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    pub start_handle: AttHandle,
    pub end_handle: AttHandle,
    pub characteristics: Vec<Characteristic, BLE_MAX_CHARACTERISTICS>,
}

impl Service {
    /// True when `handle` lies inside this service's attribute range.
    pub fn contains(&self, handle: AttHandle) -> bool {
        (self.start_handle..=self.end_handle).contains(&handle)
    }

    pub fn find_characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }

    /// Last handle that can hold descriptors of `chr`: just before the next
    /// characteristic declaration, or the end of the service.
    fn descriptor_end(&self, chr: &Characteristic) -> AttHandle {
        self.characteristics
            .iter()
            .map(|c| c.def_handle)
            .filter(|&def| def > chr.val_handle)
            .min()
            .map_or(self.end_handle, |def| def - 1)
    }
}

/// Where a peer's discovery walk stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryProgress {
    NotStarted,
    Services,
    /// Waiting for the characteristics of `services[service]`.
    Characteristics { service: usize },
    /// Waiting for the descriptors of
    /// `services[service].characteristics[characteristic]`.
    Descriptors { service: usize, characteristic: usize },
    Complete,
    Failed,
}

impl DiscoveryProgress {
    pub const fn in_flight(self) -> bool {
        matches!(
            self,
            DiscoveryProgress::Services
                | DiscoveryProgress::Characteristics { .. }
                | DiscoveryProgress::Descriptors { .. }
        )
    }
}

/// How a discovery walk ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryOutcome {
    Complete,
    Failed(Error),
}

/// One connected peer and its discovered GATT database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub conn_handle: ConnHandle,
    pub address: PeerAddress,
    pub services: Vec<Service, BLE_MAX_SERVICES>,
    pub progress: DiscoveryProgress,
}

impl Peer {
    fn new(conn_handle: ConnHandle, address: PeerAddress) -> Self {
        Self {
            conn_handle,
            address,
            services: Vec::new(),
            progress: DiscoveryProgress::NotStarted,
        }
    }

    pub fn find_service(&self, uuid: &Uuid) -> Option<&Service> {
        self.services.iter().find(|s| s.uuid == *uuid)
    }

    /// Characteristic owning the given value handle, in any service.
    pub fn find_characteristic(&self, val_handle: AttHandle) -> Option<&Characteristic> {
        self.services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.val_handle == val_handle)
    }

    fn add_service(&mut self, info: &ServiceInfo) -> Result<()> {
        if info.end_handle < info.start_handle {
            return Err(Error::HandleOutOfRange(info.end_handle));
        }
        self.services
            .push(Service {
                uuid: info.uuid,
                start_handle: info.start_handle,
                end_handle: info.end_handle,
                characteristics: Vec::new(),
            })
            .map_err(|_| Error::ServiceTableFull)
    }

    fn add_characteristic(&mut self, info: &CharacteristicInfo) -> Result<()> {
        let service = self
            .services
            .iter_mut()
            .find(|s| s.contains(info.def_handle) && s.contains(info.val_handle))
            .ok_or(Error::HandleOutOfRange(info.def_handle))?;
        service
            .characteristics
            .push(Characteristic {
                uuid: info.uuid,
                def_handle: info.def_handle,
                val_handle: info.val_handle,
                properties: info.properties,
                descriptors: Vec::new(),
            })
            .map_err(|_| Error::CharacteristicTableFull)
    }

    fn add_descriptor(&mut self, chr_val_handle: AttHandle, info: &DescriptorInfo) -> Result<()> {
        let chr = self
            .services
            .iter_mut()
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.val_handle == chr_val_handle)
            .ok_or(Error::CharacteristicNotFound(chr_val_handle))?;
        chr.descriptors
            .push(Descriptor {
                uuid: info.uuid,
                handle: info.handle,
            })
            .map_err(|_| Error::DescriptorTableFull)
    }

    /// First service at or after `from` whose range can hold a characteristic.
    fn next_characteristic_range(&self, from: usize) -> Option<(usize, AttHandle, AttHandle)> {
        self.services
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, s)| s.end_handle > s.start_handle)
            .map(|(i, s)| (i, s.start_handle, s.end_handle))
    }

    /// First characteristic at or after `(service, characteristic)` with room
    /// for descriptors after its value handle.
    fn next_descriptor_range(
        &self,
        service: usize,
        characteristic: usize,
    ) -> Option<(usize, usize, AttHandle, AttHandle)> {
        for (si, svc) in self.services.iter().enumerate().skip(service) {
            let first = if si == service { characteristic } else { 0 };
            for (ci, chr) in svc.characteristics.iter().enumerate().skip(first) {
                let end = svc.descriptor_end(chr);
                if chr.val_handle < end {
                    return Some((si, ci, chr.val_handle, end));
                }
            }
        }
        None
    }
}

/// Every peer the central is connected to, keyed by connection handle.
#[derive(Default)]
pub struct PeerRegistry {
    peers: Vec<Peer, BLE_MAX_PEERS>,
}

impl PeerRegistry {
    pub const fn new() -> Self {
        Self { peers: Vec::new() }
    }

    /// Register an empty peer for a fresh connection.
    pub fn add(&mut self, conn_handle: ConnHandle, address: PeerAddress) -> Result<()> {
        if self.find(conn_handle).is_some() {
            return Err(Error::PeerExists(conn_handle));
        }
        self.peers
            .push(Peer::new(conn_handle, address))
            .map_err(|_| Error::RegistryFull)
    }

    pub fn find(&self, conn_handle: ConnHandle) -> Option<&Peer> {
        self.peers.iter().find(|p| p.conn_handle == conn_handle)
    }

    pub fn find_mut(&mut self, conn_handle: ConnHandle) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|p| p.conn_handle == conn_handle)
    }

    /// Drop a peer and its discovered database.
    pub fn delete(&mut self, conn_handle: ConnHandle) -> Result<()> {
        let index = self
            .peers
            .iter()
            .position(|p| p.conn_handle == conn_handle)
            .ok_or(Error::PeerNotFound(conn_handle))?;
        self.peers.swap_remove(index);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn add_service(&mut self, conn_handle: ConnHandle, info: &ServiceInfo) -> Result<()> {
        self.peer_mut(conn_handle)?.add_service(info)
    }

    /// File a characteristic under the service whose range contains it.
    pub fn add_characteristic(
        &mut self,
        conn_handle: ConnHandle,
        info: &CharacteristicInfo,
    ) -> Result<()> {
        self.peer_mut(conn_handle)?.add_characteristic(info)
    }

    /// File a descriptor under the characteristic with `chr_val_handle`.
    pub fn add_descriptor(
        &mut self,
        conn_handle: ConnHandle,
        chr_val_handle: AttHandle,
        info: &DescriptorInfo,
    ) -> Result<()> {
        self.peer_mut(conn_handle)?
            .add_descriptor(chr_val_handle, info)
    }

    fn peer_mut(&mut self, conn_handle: ConnHandle) -> Result<&mut Peer> {
        self.find_mut(conn_handle)
            .ok_or(Error::PeerNotFound(conn_handle))
    }

    /// Start a full discovery walk for `conn_handle`.
    ///
    /// Any previously cached database is discarded. The walk then advances
    /// through [`on_discovery_event`](Self::on_discovery_event).
    pub fn discover_all<H: HostStack>(&mut self, conn_handle: ConnHandle, host: &mut H) -> Result<()> {
        let peer = self.peer_mut(conn_handle)?;
        if peer.progress.in_flight() {
            return Err(Error::DiscoveryInProgress);
        }
        peer.services.clear();
        match host.discover_services(conn_handle) {
            Ok(()) => {
                peer.progress = DiscoveryProgress::Services;
                Ok(())
            }
            Err(e) => {
                peer.progress = DiscoveryProgress::Failed;
                Err(e.into())
            }
        }
    }

    /// Feed a GATT discovery event into the walk.
    ///
    /// Returns the outcome once the walk for that peer has finished, and
    /// `None` while it is still running or when the event is not part of a
    /// running walk (unknown peer, wrong phase, not a discovery event).
    pub fn on_discovery_event<H: HostStack>(
        &mut self,
        host: &mut H,
        event: &BleEvent,
    ) -> Option<DiscoveryOutcome> {
        let (conn_handle, step) = Step::from_event(event)?;
        let Some(peer) = self.find_mut(conn_handle) else {
            warn!("discovery event for unknown peer; conn_handle={}", conn_handle);
            return None;
        };

        let step = match (step, peer.progress) {
            (Step::Service(info), DiscoveryProgress::Services) => {
                peer.add_service(&info).map(|()| None)
            }
            (Step::ServicesDone(status), DiscoveryProgress::Services) => {
                succeeded(status).and_then(|()| start_characteristics(peer, host, 0))
            }
            (Step::Characteristic(info), DiscoveryProgress::Characteristics { .. }) => {
                peer.add_characteristic(&info).map(|()| None)
            }
            (Step::CharacteristicsDone(status), DiscoveryProgress::Characteristics { service }) => {
                succeeded(status).and_then(|()| start_characteristics(peer, host, service + 1))
            }
            (Step::Descriptor(chr, info), DiscoveryProgress::Descriptors { .. }) => {
                peer.add_descriptor(chr, &info).map(|()| None)
            }
            (
                Step::DescriptorsDone(status),
                DiscoveryProgress::Descriptors {
                    service,
                    characteristic,
                },
            ) => succeeded(status)
                .and_then(|()| start_descriptors(peer, host, service, characteristic + 1)),
            (_, progress) => {
                debug!(
                    "discovery event out of phase; conn_handle={} progress={}",
                    conn_handle, progress
                );
                return None;
            }
        };

        match step {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "GATT discovery failed; conn_handle={} error={}",
                    conn_handle, e
                );
                peer.progress = DiscoveryProgress::Failed;
                Some(DiscoveryOutcome::Failed(e))
            }
        }
    }
}

/// Discovery event stripped to what the walk needs.
#[derive(Clone, Copy)]
enum Step {
    Service(ServiceInfo),
    ServicesDone(Status),
    Characteristic(CharacteristicInfo),
    CharacteristicsDone(Status),
    Descriptor(AttHandle, DescriptorInfo),
    DescriptorsDone(Status),
}

impl Step {
    fn from_event(event: &BleEvent) -> Option<(ConnHandle, Step)> {
        let step = match *event {
            BleEvent::ServiceDiscovered {
                conn_handle,
                service,
            } => (conn_handle, Step::Service(service)),
            BleEvent::ServicesDone {
                conn_handle,
                status,
            } => (conn_handle, Step::ServicesDone(status)),
            BleEvent::CharacteristicDiscovered {
                conn_handle,
                characteristic,
            } => (conn_handle, Step::Characteristic(characteristic)),
            BleEvent::CharacteristicsDone {
                conn_handle,
                status,
            } => (conn_handle, Step::CharacteristicsDone(status)),
            BleEvent::DescriptorDiscovered {
                conn_handle,
                chr_val_handle,
                descriptor,
            } => (conn_handle, Step::Descriptor(chr_val_handle, descriptor)),
            BleEvent::DescriptorsDone {
                conn_handle,
                status,
            } => (conn_handle, Step::DescriptorsDone(status)),
            _ => return None,
        };
        Some(step)
    }
}

fn succeeded(status: Status) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(status.into())
    }
}

/// Request the characteristics of the next non-empty service, or move on
/// to descriptors once every service has been walked.
fn start_characteristics<H: HostStack>(
    peer: &mut Peer,
    host: &mut H,
    from: usize,
) -> Result<Option<DiscoveryOutcome>> {
    match peer.next_characteristic_range(from) {
        Some((service, start, end)) => {
            host.discover_characteristics(peer.conn_handle, start, end)?;
            peer.progress = DiscoveryProgress::Characteristics { service };
            Ok(None)
        }
        None => start_descriptors(peer, host, 0, 0),
    }
}

/// Request the descriptors of the next characteristic that can have any,
/// or finish the walk.
fn start_descriptors<H: HostStack>(
    peer: &mut Peer,
    host: &mut H,
    service: usize,
    characteristic: usize,
) -> Result<Option<DiscoveryOutcome>> {
    match peer.next_descriptor_range(service, characteristic) {
        Some((service, characteristic, val_handle, end)) => {
            host.discover_descriptors(peer.conn_handle, val_handle, end)?;
            peer.progress = DiscoveryProgress::Descriptors {
                service,
                characteristic,
            };
            Ok(None)
        }
        None => {
            info!(
                "GATT discovery complete; conn_handle={} services={}",
                peer.conn_handle,
                peer.services.len()
            );
            peer.progress = DiscoveryProgress::Complete;
            Ok(Some(DiscoveryOutcome::Complete))
        }
    }
}

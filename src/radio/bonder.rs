//! SoftDevice security handler backed by the persistent [`BondStore`].

use core::cell::RefCell;

use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{
    Connection, EncryptionInfo, IdentityKey, IdentityResolutionKey, MasterId, SecurityMode,
};
use nrf_softdevice::raw;

use super::{from_address, to_address};
use crate::ble::PeerAddress;
use crate::storage::{BondRecord, BondStore};

/// Just-works bonding with every key kept in a [`BondStore`].
pub struct Bonder {
    store: RefCell<BondStore>,
}

impl Bonder {
    pub fn new(store: BondStore) -> Self {
        Self {
            store: RefCell::new(store),
        }
    }

    /// Forget the keys of `address`. Returns `true` if a bond was removed.
    pub fn forget(&self, address: &PeerAddress) -> bool {
        self.store.borrow_mut().remove(address)
    }

    /// Copy of the store if it changed since the last [`mark_saved`](Self::mark_saved).
    pub fn pending_save(&self) -> Option<BondStore> {
        let store = self.store.borrow();
        store.is_dirty().then(|| store.clone())
    }

    pub fn mark_saved(&self) {
        self.store.borrow_mut().mark_clean();
    }

    fn identity(record: &BondRecord) -> IdentityKey {
        IdentityKey {
            irk: IdentityResolutionKey::from_raw(raw::ble_gap_irk_t { irk: record.irk }),
            addr: to_address(&record.address),
        }
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::None
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        true
    }

    fn on_bonded(
        &self,
        _conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        peer_id: IdentityKey,
    ) {
        let record = BondRecord {
            address: from_address(&peer_id.addr),
            ltk: key.ltk,
            ltk_flags: key.flags,
            ediv: master_id.ediv,
            rand: master_id.rand,
            irk: peer_id.irk.as_raw().irk,
        };
        info!("Bonded with {}", record.address);
        self.store.borrow_mut().insert(record);
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.store
            .borrow()
            .find_by_master_id(master_id.ediv, &master_id.rand)
            .map(|b| EncryptionInfo {
                ltk: b.ltk,
                flags: b.ltk_flags,
            })
    }

    fn get_peripheral_key(&self, conn: &Connection) -> Option<(MasterId, EncryptionInfo)> {
        let peer = conn.peer_address();
        self.store.borrow().iter().find_map(|b| {
            Self::identity(b).is_match(peer).then_some((
                MasterId {
                    ediv: b.ediv,
                    rand: b.rand,
                },
                EncryptionInfo {
                    ltk: b.ltk,
                    flags: b.ltk_flags,
                },
            ))
        })
    }

    fn on_security_update(&self, _conn: &Connection, mode: SecurityMode) {
        info!("BLE security mode updated: {}", mode);
    }
}

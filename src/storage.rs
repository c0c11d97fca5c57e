//! Persistent storage for camera bonds.
//!
//! Keys exchanged while pairing with the camera are kept in the nRF52840's
//! internal flash via the `sequential-storage` crate, so a power cycle does
//! not force the camera through pairing again.
//!
//! Storage layout:
//!   - One map item (key `KEY_BONDS`) holds every bond:
//!     `[count][record]*`, each record a fixed `BondRecord::ENCODED_LEN` bytes.
//!   - `sequential-storage` handles wear levelling and GC of the pages.

use heapless::Vec;

use crate::ble::{AddrKind, PeerAddress};
use crate::config::MAX_BONDS;
use crate::error::{Error, Result};

/// Flash page size for nRF52840 (4 KB).
#[cfg(feature = "embedded")]
const FLASH_PAGE_SIZE: u32 = 4096;

/// Start address of our storage region.
#[cfg(feature = "embedded")]
const STORAGE_START: u32 = crate::config::STORAGE_FLASH_PAGE_START * FLASH_PAGE_SIZE;

/// End address (exclusive) of our storage region.
#[cfg(feature = "embedded")]
const STORAGE_END: u32 = (crate::config::STORAGE_FLASH_PAGE_START
    + crate::config::STORAGE_FLASH_PAGE_COUNT)
    * FLASH_PAGE_SIZE;

/// Key for the bond list in the map storage.
#[cfg(feature = "embedded")]
const KEY_BONDS: u8 = 0x01;

/// Serialized size of the whole store.
pub const MAX_STORE_SIZE: usize = 1 + MAX_BONDS * BondRecord::ENCODED_LEN;

/// Keys of one bonded camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BondRecord {
    /// Identity address of the camera.
    pub address: PeerAddress,
    /// Long-term key.
    pub ltk: [u8; 16],
    /// LTK flags (authenticated, LE secure connections).
    pub ltk_flags: u8,
    /// Encrypted diversifier identifying the LTK.
    pub ediv: u16,
    /// Random number identifying the LTK.
    pub rand: [u8; 8],
    /// Identity resolving key, for cameras using resolvable private addresses.
    pub irk: [u8; 16],
}

impl BondRecord {
    /// `[6 addr][1 type][16 ltk][1 flags][2 ediv][8 rand][16 irk]`
    pub const ENCODED_LEN: usize = 6 + 1 + 16 + 1 + 2 + 8 + 16;

    /// Serialize into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let out = buf
            .get_mut(..Self::ENCODED_LEN)
            .ok_or(Error::BufferOverflow)?;
        out[0..6].copy_from_slice(&self.address.bytes);
        out[6] = self.address.kind.to_raw();
        out[7..23].copy_from_slice(&self.ltk);
        out[23] = self.ltk_flags;
        out[24..26].copy_from_slice(&self.ediv.to_le_bytes());
        out[26..34].copy_from_slice(&self.rand);
        out[34..50].copy_from_slice(&self.irk);
        Ok(Self::ENCODED_LEN)
    }

    /// Deserialize one record; `None` if truncated or the address type is unknown.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let data = data.get(..Self::ENCODED_LEN)?;
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&data[0..6]);
        let kind = AddrKind::from_raw(data[6])?;
        let mut ltk = [0u8; 16];
        ltk.copy_from_slice(&data[7..23]);
        let mut rand = [0u8; 8];
        rand.copy_from_slice(&data[26..34]);
        let mut irk = [0u8; 16];
        irk.copy_from_slice(&data[34..50]);

        Some(Self {
            address: PeerAddress::new(kind, bytes),
            ltk,
            ltk_flags: data[23],
            ediv: u16::from_le_bytes([data[24], data[25]]),
            rand,
            irk,
        })
    }
}

/// In-memory cache of bonds, synced with flash.
#[derive(Clone, Debug, Default)]
pub struct BondStore {
    /// Oldest first.
    bonds: Vec<BondRecord, MAX_BONDS>,
    /// True if the cache differs from flash.
    dirty: bool,
}

impl BondStore {
    pub const fn new() -> Self {
        Self {
            bonds: Vec::new(),
            dirty: false,
        }
    }

    /// Store a new bond, replacing any bond with the same address.
    ///
    /// When full, the oldest bond is evicted.
    pub fn insert(&mut self, record: BondRecord) {
        if let Some(existing) = self
            .bonds
            .iter_mut()
            .find(|b| b.address == record.address)
        {
            *existing = record;
            self.dirty = true;
            info!("Updated bond for {}", record.address);
            return;
        }

        if self.bonds.is_full() {
            warn!("Bond store full - evicting oldest entry");
            self.bonds.remove(0);
        }

        // Cannot fail: a slot was freed above.
        let _ = self.bonds.push(record);
        self.dirty = true;
        info!("Added bond - now storing {}", self.bonds.len());
    }

    /// Forget the bond for `address`. Returns `true` if one existed.
    pub fn remove(&mut self, address: &PeerAddress) -> bool {
        match self.bonds.iter().position(|b| b.address == *address) {
            Some(index) => {
                self.bonds.remove(index);
                self.dirty = true;
                info!("Deleted bond for {}", address);
                true
            }
            None => false,
        }
    }

    pub fn find(&self, address: &PeerAddress) -> Option<&BondRecord> {
        self.bonds.iter().find(|b| b.address == *address)
    }

    /// Look a bond up by the (EDIV, RAND) pair the peer presents.
    pub fn find_by_master_id(&self, ediv: u16, rand: &[u8; 8]) -> Option<&BondRecord> {
        self.bonds
            .iter()
            .find(|b| b.ediv == ediv && b.rand == *rand)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BondRecord> {
        self.bonds.iter()
    }

    pub fn len(&self) -> usize {
        self.bonds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bonds.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Serialize every bond to `buf`.
    pub fn encode_all(&self, buf: &mut [u8]) -> Result<usize> {
        let count = buf.first_mut().ok_or(Error::BufferOverflow)?;
        *count = self.bonds.len() as u8;
        let mut offset = 1;
        for bond in &self.bonds {
            offset += bond.encode(&mut buf[offset..])?;
        }
        Ok(offset)
    }

    /// Replace the cache with the bonds in `data`.
    ///
    /// Stops at the first truncated or unreadable record.
    pub fn decode_all(&mut self, data: &[u8]) {
        self.bonds.clear();
        self.dirty = false;

        let Some((&count, mut rest)) = data.split_first() else {
            return;
        };
        for _ in 0..count {
            let Some(bond) = BondRecord::decode(rest) else {
                warn!("Bond record truncated or corrupt; dropping the rest");
                break;
            };
            if self.bonds.push(bond).is_err() {
                break;
            }
            rest = &rest[BondRecord::ENCODED_LEN..];
        }
    }

    /// Load the bond list from flash. A missing or unreadable item leaves
    /// the store empty.
    #[cfg(feature = "embedded")]
    pub async fn load_from_flash(
        &mut self,
        flash: &mut impl embedded_storage_async::nor_flash::NorFlash,
    ) {
        let mut buf = [0u8; MAX_STORE_SIZE + 16];

        match sequential_storage::map::fetch_item::<u8, &[u8], _>(
            flash,
            STORAGE_START..STORAGE_END,
            &mut sequential_storage::cache::NoCache::new(),
            &mut buf,
            &KEY_BONDS,
        )
        .await
        {
            Ok(Some(data)) => {
                self.decode_all(data);
                info!("Loaded {} bonds from flash", self.bonds.len());
            }
            Ok(None) => {
                info!("No bonds in flash");
                self.decode_all(&[]);
            }
            Err(e) => {
                error!("Flash read error: {:?}", defmt::Debug2Format(&e));
                self.decode_all(&[]);
            }
        }
    }

    /// Persist the bond list if it changed. Returns `true` when flash
    /// matches the cache afterwards.
    #[cfg(feature = "embedded")]
    pub async fn save_to_flash(
        &mut self,
        flash: &mut impl embedded_storage_async::nor_flash::NorFlash,
    ) -> bool {
        if !self.dirty {
            debug!("BondStore: no changes to save");
            return true;
        }

        let mut buf = [0u8; MAX_STORE_SIZE + 16];
        let mut data_buf = [0u8; MAX_STORE_SIZE];
        let Ok(len) = self.encode_all(&mut data_buf) else {
            return false;
        };
        let item = &data_buf[..len];

        match sequential_storage::map::store_item::<u8, &[u8], _>(
            flash,
            STORAGE_START..STORAGE_END,
            &mut sequential_storage::cache::NoCache::new(),
            &mut buf,
            &KEY_BONDS,
            &item,
        )
        .await
        {
            Ok(_) => {
                info!("Saved {} bonds to flash", self.bonds.len());
                self.dirty = false;
                true
            }
            Err(e) => {
                error!("Flash write error: {:?}", defmt::Debug2Format(&e));
                false
            }
        }
    }
}

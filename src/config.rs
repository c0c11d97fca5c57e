//! Application-wide constants and compile-time configuration.
//!
//! All timing parameters, capacities and protocol limits live here so
//! they can be tuned in one place.

// BLE scanning

/// Duration of one scan window (ms). 0 scans until cancelled.
pub const BLE_SCAN_DURATION_MS: u32 = 30_000;

/// Scan interval and window (in 0.625 ms units). 0x0010 = 10 ms.
pub const BLE_SCAN_INTERVAL: u16 = 0x0010;
pub const BLE_SCAN_WINDOW: u16 = 0x0010;

/// Passive scanning - the camera advertises its service UUID in the
/// advertising packet, so no scan response is needed.
pub const BLE_SCAN_PASSIVE: bool = true;

/// Ask the controller to drop duplicate advertising reports.
pub const BLE_SCAN_FILTER_DUPLICATES: bool = true;

/// Delay before scanning resumes after the camera is lost (ms).
pub const BLE_SCAN_RESTART_DELAY_MS: u32 = 1_000;

/// Resume scanning automatically after a disconnect or failed connect.
pub const BLE_AUTO_RESCAN: bool = true;

/// Maximum number of cameras remembered in the discovered-device list.
pub const BLE_MAX_DISCOVERED: usize = 20;

/// Longest legacy advertising payload.
pub const BLE_ADV_DATA_MAX: usize = 31;

// BLE connection

/// Connection attempt timeout (ms).
pub const BLE_CONNECT_TIMEOUT_MS: u32 = 30_000;

/// BLE connection interval range (in 1.25 ms units).
pub const BLE_CONN_INTERVAL_MIN: u16 = 24;
pub const BLE_CONN_INTERVAL_MAX: u16 = 40;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// HCI reason sent when we drop a link ourselves
/// ("Remote User Terminated Connection").
pub const BLE_TERMINATE_REASON: u8 = 0x13;

/// Longest wait for one GATT discovery response (ms). Matches the ATT
/// transaction timeout.
pub const BLE_GATT_TIMEOUT_MS: u64 = 30_000;

// GATT database cache

/// Simultaneous peers tracked by the registry.
pub const BLE_MAX_PEERS: usize = 2;

/// Services kept per peer.
pub const BLE_MAX_SERVICES: usize = 12;

/// Characteristics kept per service.
pub const BLE_MAX_CHARACTERISTICS: usize = 10;

/// Descriptors kept per characteristic.
pub const BLE_MAX_DESCRIPTORS: usize = 4;

// Camera commands

/// Largest command accepted by the dispatcher (default ATT MTU 23 - 3).
pub const COMMAND_MAX_LEN: usize = 20;

// Bond storage

/// Maximum number of bonds kept in flash.
pub const MAX_BONDS: usize = 4;

/// Flash page index where bond storage starts (4 KB per page on nRF52840).
pub const STORAGE_FLASH_PAGE_START: u32 = 240;

/// Number of flash pages reserved for bond storage.
pub const STORAGE_FLASH_PAGE_COUNT: u32 = 4;

// Control surface

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 50;

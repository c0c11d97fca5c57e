//! camlink - BLE central bridge for an action camera.
//!
//! The library holds everything that does not touch hardware: the camera
//! link state machine, the GATT database cache, the advertisement filter,
//! the bond store codec and the button mapping. All of it is tested on the
//! host.
//!
//! Usage: `cargo test --lib` (unit tests) or `cargo test` (plus `tests/`).
//!
//! The `embedded` feature adds the SoftDevice adapter ([`radio`]), the
//! flash-backed bond persistence and the GPIO button tasks used by the
//! `#![no_std]` binary in `main.rs`.

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible everywhere.
#[macro_use]
mod fmt;

pub mod ble;
pub mod config;
pub mod control;
pub mod error;
pub mod storage;

#[cfg(feature = "embedded")]
pub mod radio;

pub use error::{Error, HostError, Result};

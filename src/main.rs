//! camlink - BLE central bridge between an action camera and a local
//! control surface.
//!
//! Runs on the nRF52840 with the S140 SoftDevice:
//!   - scans for a camera advertising the 0xFEA6 service,
//!   - connects, pairs/bonds and walks its GATT database,
//!   - subscribes to the camera's notifications,
//!   - forwards shutter commands from the buttons.
//!
//! Task layout:
//!   softdevice_task  - SoftDevice event pump
//!   radio_task       - executes host requests (connect, security, GATT)
//!   scanner_task     - owns the GAP scan procedure
//!   ble_task         - owns the `CameraLink` state machine
//!   restart_task     - delayed scan restart after the camera is lost
//!   control_task     - maps button presses to link commands
//!   button_task x2   - debounced GPIO input

#![no_std]
#![no_main]

use camlink::ble::{BleEvent, CameraLink, Reaction};
use camlink::control::buttons::button_task;
use camlink::control::{ButtonEvent, ControlSurface};
use camlink::radio::{self, Bonder, RadioHost, COMMANDS, EVENTS, SCAN_RESTART};
use camlink::storage::BondStore;
use core::mem;
use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{AnyPin, Pin};
use embassy_nrf::interrupt::Priority;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Timer};
use nrf_softdevice::{raw, Flash, Softdevice};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

static BUTTONS: Channel<CriticalSectionRawMutex, ButtonEvent, 4> = Channel::new();

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    // GATT discovery responses are picked up from the raw event stream.
    sd.run_with_callback(radio::on_ble_event).await
}

#[embassy_executor::task]
async fn radio_task(sd: &'static Softdevice, bonder: &'static Bonder, flash: Flash) -> ! {
    radio::run(sd, bonder, flash).await
}

#[embassy_executor::task]
async fn scanner_task(sd: &'static Softdevice) -> ! {
    radio::run_scanner(sd).await
}

#[embassy_executor::task]
async fn ble_task() -> ! {
    let mut link = CameraLink::default();
    let mut host = RadioHost;

    if let Err(e) = link.start_scan(&mut host) {
        warn!("Initial scan failed: {}", e);
    }
    radio::publish(link.snapshot());

    loop {
        match select(EVENTS.receive(), COMMANDS.receive()).await {
            Either::First(event) => {
                let reaction = link.handle_event(&mut host, &event);
                match reaction {
                    Reaction::None => {}
                    Reaction::RestartScanAfter(ms) => SCAN_RESTART.signal(ms),
                    Reaction::RetryPairing | Reaction::IgnorePairing => {
                        if let BleEvent::RepeatPairing { conn_handle } = event {
                            let retry = reaction == Reaction::RetryPairing;
                            if let Err(e) = host.answer_pairing(conn_handle, retry) {
                                warn!("Could not answer pairing request: {}", e);
                            }
                        }
                    }
                }
            }
            Either::Second(cmd) => {
                if let Err(e) = link.handle_command(&mut host, &cmd) {
                    warn!("Command {} failed: {}", cmd, e);
                }
            }
        }
        radio::publish(link.snapshot());
    }
}

#[embassy_executor::task]
async fn restart_task() -> ! {
    loop {
        let delay_ms = SCAN_RESTART.wait().await;
        Timer::after(Duration::from_millis(u64::from(delay_ms))).await;
        EVENTS.send(BleEvent::ScanRestartDue).await;
    }
}

#[embassy_executor::task]
async fn control_task(rx: Receiver<'static, CriticalSectionRawMutex, ButtonEvent, 4>) -> ! {
    let mut surface = ControlSurface::new();
    loop {
        let event = rx.receive().await;
        if let Some(cmd) = surface.on_button(event, &radio::snapshot()) {
            COMMANDS.send(cmd).await;
        }
    }
}

#[embassy_executor::task(pool_size = 2)]
async fn button(
    pin: AnyPin,
    event: ButtonEvent,
    tx: Sender<'static, CriticalSectionRawMutex, ButtonEvent, 4>,
) -> ! {
    button_task(pin, event, tx).await
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 23 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 0,
            central_role_count: 1,
            central_sec_count: 1,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: b"camlink" as *const u8 as _,
            current_len: 7,
            max_len: 7,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("camlink starting");

    // The SoftDevice reserves priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);

    let sd = Softdevice::enable(&softdevice_config());
    unwrap!(spawner.spawn(softdevice_task(sd)));

    let mut flash = Flash::take(sd);
    let mut store = BondStore::new();
    store.load_from_flash(&mut flash).await;

    static BONDER: StaticCell<Bonder> = StaticCell::new();
    let bonder = BONDER.init(Bonder::new(store));

    unwrap!(spawner.spawn(radio_task(sd, bonder, flash)));
    unwrap!(spawner.spawn(scanner_task(sd)));
    unwrap!(spawner.spawn(ble_task()));
    unwrap!(spawner.spawn(restart_task()));
    unwrap!(spawner.spawn(control_task(BUTTONS.receiver())));

    // nRF52840-DK buttons 1 and 2.
    unwrap!(spawner.spawn(button(
        p.P0_11.degrade(),
        ButtonEvent::Shutter,
        BUTTONS.sender()
    )));
    unwrap!(spawner.spawn(button(
        p.P0_12.degrade(),
        ButtonEvent::Scan,
        BUTTONS.sender()
    )));
}

//! Local control surface - two physical buttons.
//!
//!   - SHUTTER - start/stop recording on the connected camera
//!   - SCAN    - start scanning, or stop a running scan
//!
//! The button tasks only report debounced presses; [`ControlSurface`]
//! turns them into [`LinkCommand`]s using the last published
//! [`LinkSnapshot`].

#[cfg(feature = "embedded")]
pub mod buttons;

use heapless::Vec;

use crate::ble::command::{SHUTTER_OFF, SHUTTER_ON};
use crate::ble::{LinkCommand, LinkSnapshot};

/// Physical button events (after debouncing).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonEvent {
    Shutter,
    Scan,
}

/// Button-to-command mapping. Remembers whether the last shutter press
/// started a recording.
#[derive(Debug, Default)]
pub struct ControlSurface {
    recording: bool,
}

impl ControlSurface {
    pub const fn new() -> Self {
        Self { recording: false }
    }

    /// True if the next shutter press will stop recording.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn on_button(&mut self, event: ButtonEvent, link: &LinkSnapshot) -> Option<LinkCommand> {
        match event {
            ButtonEvent::Shutter => {
                if !link.camera.is_ready() {
                    warn!("Shutter pressed but camera is not ready");
                    self.recording = false;
                    return None;
                }
                let payload: &[u8] = if self.recording {
                    &SHUTTER_OFF
                } else {
                    &SHUTTER_ON
                };
                let cmd = LinkCommand::WriteCommand(Vec::from_slice(payload).ok()?);
                self.recording = !self.recording;
                Some(cmd)
            }
            ButtonEvent::Scan if link.scanning => Some(LinkCommand::StopScan),
            ButtonEvent::Scan => Some(LinkCommand::StartScan),
        }
    }
}

//! Command dispatcher - fire-and-forget writes to the camera.
//!
//! Payloads are opaque bytes of the camera's own control protocol. They go
//! out as write-without-response, so the only result is whether the host
//! accepted the packet.

use super::link::ConnectedCamera;
use super::HostStack;
use crate::config::COMMAND_MAX_LEN;
use crate::error::{Error, Result};

/// Start recording / take a photo.
pub const SHUTTER_ON: [u8; 4] = [0x03, 0x01, 0x01, 0x01];

/// Stop recording.
pub const SHUTTER_OFF: [u8; 4] = [0x03, 0x01, 0x01, 0x00];

/// Write `payload` to the camera's command characteristic.
///
/// Refused without touching the radio unless both the connection and the
/// command handle are known.
pub fn write_command<H: HostStack>(
    camera: &ConnectedCamera,
    host: &mut H,
    payload: &[u8],
) -> Result<()> {
    let conn = camera.conn_handle.ok_or(Error::NotConnected)?;
    let handle = camera
        .command_handle
        .ok_or(Error::CommandHandleUnresolved)?;
    if payload.is_empty() {
        return Err(Error::EmptyPayload);
    }
    if payload.len() > COMMAND_MAX_LEN {
        return Err(Error::PayloadTooLarge);
    }

    debug!(
        "Writing command; conn_handle={} handle={} data={=[u8]:x}",
        conn, handle, payload
    );
    match host.write_no_response(conn, handle, payload) {
        Ok(()) => {
            info!("Command sent ({} bytes)", payload.len());
            Ok(())
        }
        Err(e) => {
            error!("Failed to send command: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::host::mock::{Call, MockHost};
    use crate::ble::{AddrKind, PeerAddress};
    use crate::error::HostError;

    fn ready_camera() -> ConnectedCamera {
        ConnectedCamera {
            conn_handle: Some(5),
            command_handle: Some(0x2A),
            address: Some(PeerAddress::new(AddrKind::Public, [9; 6])),
        }
    }

    #[test]
    fn rejected_before_any_connection() {
        let mut host = MockHost::new();
        let camera = ConnectedCamera::default();
        assert_eq!(
            write_command(&camera, &mut host, &SHUTTER_ON),
            Err(Error::NotConnected)
        );
        assert!(host.take_calls().is_empty());
    }

    #[test]
    fn rejected_until_handle_resolved() {
        let mut host = MockHost::new();
        let camera = ConnectedCamera {
            command_handle: None,
            ..ready_camera()
        };
        assert_eq!(
            write_command(&camera, &mut host, &SHUTTER_ON),
            Err(Error::CommandHandleUnresolved)
        );
        assert!(host.take_calls().is_empty());
    }

    #[test]
    fn shutter_goes_out_without_response() {
        let mut host = MockHost::new();
        write_command(&ready_camera(), &mut host, &SHUTTER_ON).unwrap();
        assert_eq!(
            host.take_calls(),
            [Call::WriteNoResponse(5, 0x2A, vec![3, 1, 1, 1])]
        );
    }

    #[test]
    fn payload_bounds() {
        let mut host = MockHost::new();
        let camera = ready_camera();
        assert_eq!(
            write_command(&camera, &mut host, &[]),
            Err(Error::EmptyPayload)
        );
        assert_eq!(
            write_command(&camera, &mut host, &[0u8; COMMAND_MAX_LEN + 1]),
            Err(Error::PayloadTooLarge)
        );
        write_command(&camera, &mut host, &[0u8; COMMAND_MAX_LEN]).unwrap();
        assert_eq!(host.take_calls().len(), 1);
    }

    #[test]
    fn host_refusal_is_surfaced() {
        let mut host = MockHost::new();
        host.fail_write = true;
        assert_eq!(
            write_command(&ready_camera(), &mut host, &SHUTTER_OFF),
            Err(Error::Host(HostError::Raw(2)))
        );
    }
}

//! Advertisement filter - recognises the camera in raw AD data.
//!
//! Advertising payloads come straight off the radio, so every field is
//! bounds-checked: a truncated or lying length byte ends parsing with
//! "not found" and nothing past the buffer is ever read.

use heapless::String;

use super::uuid::CAMERA_SERVICE_UUID16;

/// AD type: Incomplete List of 16-bit Service UUIDs.
const AD_INCOMPLETE_UUID16: u8 = 0x02;
/// AD type: Complete List of 16-bit Service UUIDs.
const AD_COMPLETE_UUID16: u8 = 0x03;
/// AD type: Shortened Local Name.
const AD_SHORT_NAME: u8 = 0x08;
/// AD type: Complete Local Name.
const AD_COMPLETE_NAME: u8 = 0x09;
/// AD type: Service Data - 16-bit UUID.
const AD_SERVICE_DATA_UUID16: u8 = 0x16;

/// Iterator over the `(type, payload)` AD structures of a buffer.
///
/// Stops at a zero length byte (end of significant data) or at the first
/// structure that would overrun the buffer.
struct AdFields<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AdFields<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for AdFields<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.data.get(self.pos)? as usize;
        if len == 0 {
            return None;
        }
        // The structure spans data[pos ..= pos + len]; len covers type + payload.
        let end = self.pos + len;
        if end >= self.data.len() {
            self.pos = self.data.len();
            return None;
        }
        let ad_type = self.data[self.pos + 1];
        let payload = &self.data[self.pos + 2..=end];
        self.pos = end + 1;
        Some((ad_type, payload))
    }
}

/// Check if raw advertisement data announces the camera service (0xFEA6).
///
/// Looks at 16-bit UUID lists (complete or incomplete) and at 16-bit
/// service data, whose leading two bytes are the service UUID.
pub fn advertises_camera(data: &[u8]) -> bool {
    let target = CAMERA_SERVICE_UUID16.to_le_bytes();

    AdFields::new(data).any(|(ad_type, payload)| match ad_type {
        AD_INCOMPLETE_UUID16 | AD_COMPLETE_UUID16 => {
            payload.chunks_exact(2).any(|chunk| chunk == target)
        }
        AD_SERVICE_DATA_UUID16 => payload.get(..2) == Some(&target[..]),
        _ => false,
    })
}

/// Extract the local name from advertisement data.
///
/// Prefers the complete name, falls back to the shortened one, and
/// returns "Unknown" when neither is present. Invalid UTF-8 bytes are
/// replaced so the result is always displayable.
pub fn extract_device_name(data: &[u8]) -> String<32> {
    let mut shortened: Option<&[u8]> = None;

    for (ad_type, payload) in AdFields::new(data) {
        match ad_type {
            AD_COMPLETE_NAME => return to_name(payload),
            AD_SHORT_NAME if shortened.is_none() => shortened = Some(payload),
            _ => {}
        }
    }

    match shortened {
        Some(payload) => to_name(payload),
        None => {
            let mut s = String::new();
            let _ = s.push_str("Unknown");
            s
        }
    }
}

fn to_name(bytes: &[u8]) -> String<32> {
    let mut name = String::new();
    for &b in bytes {
        let c = if b.is_ascii() && !b.is_ascii_control() {
            b as char
        } else {
            '?'
        };
        if name.push(c).is_err() {
            break;
        }
    }
    name
}

//! Scale wire protocol
//!
//! Frame layouts for the vendor weight scale. Commands go out on the command
//! characteristic, measurements come back as notifications on the results
//! characteristic. Both travel base64 encoded through the BLE stack.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const SERVICE_UUID: &str = "0000fff0-0000-1000-8000-00805f9b34fb";
pub const RESULTS_CHAR_UUID: &str = "0000fff1-0000-1000-8000-00805f9b34fb";
pub const COMMAND_CHAR_UUID: &str = "0000fff2-0000-1000-8000-00805f9b34fb";

/// Leading byte of a stable weight frame
pub const STABLE_WEIGHT_FRAME: u8 = 0x10;

/// Leading byte of the time sync command
pub const TIME_SYNC_MARKER: u8 = 0x02;

/// Subtracted from Unix time before it is sent to the scale.
pub const SCALE_EPOCH_OFFSET: i64 = 946_702_800;

const UNIT_COMMAND_PAYLOAD: [u8; 8] = [0x13, 0x09, 0x15, 0x01, 0x10, 0x00, 0x00, 0x00];

const MIN_FRAME_LEN: usize = 6;

/// Lowercase name fragments of supported scale models
const SUPPORTED_NAME_PATTERNS: &[&str] = &["scale"];

/// 8-bit truncated sum
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Unit configuration command: fixed payload followed by its checksum.
pub fn unit_command() -> [u8; 9] {
    let mut frame = [0u8; 9];
    frame[..8].copy_from_slice(&UNIT_COMMAND_PAYLOAD);
    frame[8] = checksum(&UNIT_COMMAND_PAYLOAD);
    frame
}

/// Time sync command for the given Unix time (seconds).
pub fn time_sync_command(unix_seconds: i64) -> [u8; 5] {
    let scale_time = u32::try_from(unix_seconds - SCALE_EPOCH_OFFSET).unwrap_or(0);
    let mut frame = [0u8; 5];
    frame[0] = TIME_SYNC_MARKER;
    frame[1..].copy_from_slice(&scale_time.to_le_bytes());
    frame
}

/// Decode a raw measurement frame into kilograms.
///
/// `None` for short frames, frames whose validity flag (byte 5) is clear,
/// and anything that is not a stable weight frame. Scales stream unstable
/// readings while settling, so these are expected and not errors.
pub fn decode_measurement(frame: &[u8]) -> Option<f64> {
    if frame.len() < MIN_FRAME_LEN {
        return None;
    }
    if frame[5] == 0 {
        return None;
    }
    if frame[0] != STABLE_WEIGHT_FRAME {
        return None;
    }

    let raw = u16::from_be_bytes([frame[3], frame[4]]);
    Some(f64::from(raw) / 100.0)
}

/// Decode a base64 notification value as delivered by the BLE stack.
pub fn decode_notification(value: &str) -> Option<f64> {
    let bytes = STANDARD.decode(value.trim()).ok()?;
    decode_measurement(&bytes)
}

pub fn encode_command(frame: &[u8]) -> String {
    STANDARD.encode(frame)
}

/// Case-insensitive match of an advertised name against supported models.
pub fn is_supported_scale(name: Option<&str>) -> bool {
    let Some(name) = name else {
        return false;
    };
    let name = name.to_lowercase();
    SUPPORTED_NAME_PATTERNS.iter().any(|pattern| name.contains(pattern))
}

//! CRSF/ELRS receiver frames and the pilot-input snapshot they feed.

use crate::fixed_point::{Fp, ONE};
use crate::state::{PilotInput, RcChannel, RC_CHANNEL_COUNT};

pub const CRSF_SYNC: u8 = 0xC8;
pub const CRSF_FRAMETYPE_RC_CHANNELS_PACKED: u8 = 0x16;

/// 11-bit channel value at stick centre.
pub const CRSF_CHANNEL_MID: i32 = 992;
/// Counts to fixed-point scale: 65536 / 820 rounded, keeps 1811 just under 1.0.
const CRSF_COUNTS_TO_FP: i32 = 80;

/// No valid frame for this long raises the failsafe flag.
pub const FAILSAFE_TIMEOUT_US: u32 = 500_000;

/// CRSF channel order (AETR) mapped onto the controller's channels.
const CHANNEL_MAP: [(usize, RcChannel); RC_CHANNEL_COUNT] = [
    (0, RcChannel::Roll),
    (1, RcChannel::Pitch),
    (2, RcChannel::Throttle),
    (3, RcChannel::Yaw),
    (4, RcChannel::Aux1),
    (5, RcChannel::Aux2),
    (6, RcChannel::Aux3),
    (7, RcChannel::Aux4),
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RcChannels {
    pub channels: [u16; 16], // 11-bit values (0-2047)
}

pub struct CrsfParser {
    buffer: heapless::Vec<u8, 64>, // Max frame size
}

impl Default for CrsfParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CrsfParser {
    pub fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
        }
    }

    pub fn push_byte(&mut self, b: u8) -> Option<RcChannels> {
        // [Sync] [Len] [Type] [Payload...] [CRC], Len covers Type..CRC.
        if self.buffer.is_empty() {
            if b == CRSF_SYNC {
                let _ = self.buffer.push(b);
            }
            return None;
        }

        if self.buffer.len() == 1 {
            if !(2..=62).contains(&b) {
                self.buffer.clear();
                if b == CRSF_SYNC {
                    let _ = self.buffer.push(b);
                }
                return None;
            }
            let _ = self.buffer.push(b);
            return None;
        }

        let total_size = 2 + self.buffer[1] as usize;
        if self.buffer.len() < total_size {
            let _ = self.buffer.push(b);
        }

        if self.buffer.len() == total_size {
            let frame = self.buffer.as_slice();
            let received_crc = frame[total_size - 1];

            if crc8_dvb_s2(&frame[2..total_size - 1]) == received_crc {
                let type_byte = frame[2];
                let payload = &frame[3..total_size - 1];

                if type_byte == CRSF_FRAMETYPE_RC_CHANNELS_PACKED && payload.len() == 22 {
                    let channels = parse_channels(payload);
                    self.buffer.clear();
                    return Some(channels);
                }
            } else {
                trace!("crsf crc mismatch");
            }

            self.buffer.clear();
        }

        None
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> Option<RcChannels> {
        let mut last_res = None;
        for &b in data {
            if let Some(res) = self.push_byte(b) {
                last_res = Some(res);
            }
        }
        last_res
    }
}

/// CRC-8, polynomial 0xD5.
pub fn crc8_dvb_s2(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ 0xD5;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn parse_channels(buf: &[u8]) -> RcChannels {
    // 16 channels, 11 bits each, packed little-endian into 22 bytes.
    let mut ch = [0u16; 16];
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut n = 0;
    for &byte in buf {
        acc |= (byte as u32) << bits;
        bits += 8;
        while bits >= 11 && n < ch.len() {
            ch[n] = (acc & 0x07FF) as u16;
            acc >>= 11;
            bits -= 11;
            n += 1;
        }
    }
    RcChannels { channels: ch }
}

/// 11-bit channel value to `[-1, 1)`.
pub fn channel_to_fixed(value: u16) -> Fp {
    let bits = (value as i32 - CRSF_CHANNEL_MID) * CRSF_COUNTS_TO_FP;
    Fp::from_bits(bits).clamp(-ONE, ONE - Fp::DELTA)
}

/// Latest pilot input plus link-loss tracking.
///
/// Losing the link only raises [`RcReceiver::failsafe`]; the sticks keep
/// their last values and nothing here disarms.
#[derive(Debug, Clone, Copy)]
pub struct RcReceiver {
    input: PilotInput,
    last_frame_us: Option<u32>,
}

impl Default for RcReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl RcReceiver {
    pub fn new() -> Self {
        // Throttle idles at the bottom until the first frame arrives.
        let mut input = PilotInput::default();
        input.set(RcChannel::Throttle, -ONE);
        Self {
            input,
            last_frame_us: None,
        }
    }

    pub fn on_frame(&mut self, frame: &RcChannels, now_us: u32) {
        for (source, channel) in CHANNEL_MAP {
            self.input.set(channel, channel_to_fixed(frame.channels[source]));
        }
        self.last_frame_us = Some(now_us);
    }

    pub fn input(&self) -> &PilotInput {
        &self.input
    }

    pub fn failsafe(&self, now_us: u32) -> bool {
        match self.last_frame_us {
            Some(t) => now_us.wrapping_sub(t) > FAILSAFE_TIMEOUT_US,
            None => true,
        }
    }
}

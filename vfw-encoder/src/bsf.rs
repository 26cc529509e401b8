//! MPEG-2 elementary stream rewriting.
//!
//! Some VFW MPEG-2 encoders flag progressive content as interlaced,
//! top-field-first, and write a frame rate code that does not match the
//! stream. [`rewrite_mpeg2_progressive`] patches those header fields in place.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::frame::FrameRate;

/// MPEG start code prefix.
const START_CODE: &[u8] = &[0x00, 0x00, 0x01];

const SEQUENCE_HEADER: u8 = 0xB3;
const EXTENSION: u8 = 0xB5;

const EXT_SEQUENCE: u8 = 0x1;
const EXT_SEQUENCE_DISPLAY: u8 = 0x2;
const EXT_PICTURE_CODING: u8 = 0x8;

/// Native `frame_rate_code` values, in table insertion order.
const NATIVE_RATES: [(u8, f64); 8] = [
    (8, 60.0),
    (7, 60000.0 / 1001.0),
    (6, 50.0),
    (5, 30.0),
    (4, 30000.0 / 1001.0),
    (3, 25.0),
    (2, 24.0),
    (1, 24000.0 / 1001.0),
];

/// `frame_rate_extension_n` is 2 bits wide, `_d` is 5 bits.
const EXT_N_RANGE: u8 = 1 << 2;
const EXT_D_RANGE: u8 = 1 << 5;

/// A coded frame rate: `native(code) * (ext_n + 1) / (ext_d + 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateCode {
    pub code: u8,
    pub ext_n: u8,
    pub ext_d: u8,
}

/// Every rate MPEG-2 can express, keyed by `round(rate * 2^32)`.
pub struct RateTable {
    entries: BTreeMap<u64, RateCode>,
}

fn rate_key(rate: f64) -> u64 {
    (rate * 4_294_967_296.0).round() as u64
}

impl RateTable {
    fn build() -> Self {
        let mut entries = BTreeMap::new();
        for (code, rate) in NATIVE_RATES {
            entries.insert(
                rate_key(rate),
                RateCode {
                    code,
                    ext_n: 0,
                    ext_d: 0,
                },
            );
        }
        // First insertion of a key wins, so native codes shadow derived ones.
        for (code, rate) in NATIVE_RATES {
            for ext_n in 0..EXT_N_RANGE {
                for ext_d in 0..EXT_D_RANGE {
                    let derived = rate * ((ext_n as f64 + 1.0) / (ext_d as f64 + 1.0));
                    entries
                        .entry(rate_key(derived))
                        .or_insert(RateCode { code, ext_n, ext_d });
                }
            }
        }
        log::debug!("(MPEG-2 rewrite) rate table built with {} entries", entries.len());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closest coded rate. Ties go to the lower rate.
    pub fn best_match(&self, fps: FrameRate) -> RateCode {
        let target = rate_key(fps.as_f64());
        let mut best = RateCode {
            code: 0,
            ext_n: 0,
            ext_d: 0,
        };
        let mut best_diff = u64::MAX;
        for (&key, &code) in &self.entries {
            let diff = key.abs_diff(target);
            if diff < best_diff {
                best = code;
                best_diff = diff;
            }
        }
        best
    }
}

pub fn rate_table() -> &'static RateTable {
    static TABLE: LazyLock<RateTable> = LazyLock::new(RateTable::build);
    &TABLE
}

/// Finds the next `00 00 01 xx` at or after `from`.
fn next_start_code(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < 4 || from > buf.len() - 4 {
        return None;
    }
    buf[from..]
        .windows(4)
        .position(|w| &w[..3] == START_CODE)
        .map(|offset| from + offset)
}

fn patch(buf: &mut [u8], at: usize, f: impl FnOnce(u8) -> u8) {
    if let Some(byte) = buf.get_mut(at) {
        *byte = f(*byte);
    }
}

/// Marks every picture in `buf` progressive and rewrites the frame rate
/// fields to the closest coded match of `fps`.
///
/// Not idempotent: apply once per frame.
pub fn rewrite_mpeg2_progressive(buf: &mut [u8], fps: FrameRate) {
    let rate = rate_table().best_match(fps);

    let mut next = next_start_code(buf, 0);
    while let Some(start) = next {
        let marker = buf[start + 3];
        let mut pos = start + 4;

        match marker {
            SEQUENCE_HEADER => {
                // aspect_ratio_information(4) | frame_rate_code(4)
                patch(buf, pos + 3, |b| (b & 0xF0) | (rate.code & 0x0F));
                pos += 8;
            }
            EXTENSION => match buf.get(pos).map(|b| b >> 4) {
                Some(EXT_SEQUENCE) => {
                    // progressive_sequence
                    patch(buf, pos + 1, |b| b | 1 << 3);
                    // marker(1) | frame_rate_extension_n(2) | frame_rate_extension_d(5)
                    patch(buf, pos + 5, |b| {
                        (b & 0x80) | ((rate.ext_n & 0x3) << 5) | (rate.ext_d & 0x1F)
                    });
                    pos += 6;
                }
                Some(EXT_SEQUENCE_DISPLAY) => {
                    // colour_description present
                    pos += if buf[pos] & 0x1 != 0 { 8 } else { 5 };
                }
                Some(EXT_PICTURE_CODING) => {
                    // picture_structure = frame
                    patch(buf, pos + 2, |b| b | 0x03);
                    // top_field_first, repeat_first_field
                    patch(buf, pos + 3, |b| b & !(1 << 7) & !(1 << 1));
                    // progressive_frame
                    patch(buf, pos + 4, |b| b | 1 << 7);
                    let composite = buf.get(pos + 4).is_some_and(|b| b & 0x40 != 0);
                    pos += if composite { 7 } else { 5 };
                }
                Some(other) => {
                    log::trace!("(MPEG-2 rewrite) unknown extension {:#x} at {}", other, pos);
                }
                None => {}
            },
            _ => {}
        }

        next = next_start_code(buf, pos);
    }
}

//! # Bus Signal Decoder
//!
//! Extracts numeric signals from fixed-length vehicle-bus frames.
//!
//! A signal is described by a frame identifier, a start bit, a bit length,
//! an endianness, and a scale factor. Decoding is a pure function over the
//! frame bytes: no state, no persistence, no concurrency. Bits addressed
//! past the end of the frame read as absent.
//!
//! Bit addressing follows the two conventions used on CAN-style buses:
//!
//! - **Big endian** (Motorola / network order): the frame is a stream of
//!   bits MSB first — index 0 is byte 0 bit 7, index 7 is byte 0 bit 0,
//!   index 8 is byte 1 bit 7, and so on.
//! - **Little endian** (Intel): the frame is a stream of bits LSB first —
//!   index 0 is byte 0 bit 0, index 7 is byte 0 bit 7, index 8 is byte 1
//!   bit 0.

use serde::Deserialize;

/// Maximum signal width; wider extractions would overflow the accumulator.
pub const MAX_SIGNAL_BITS: usize = 64;

/// Description of one signal within a bus frame.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalSpec {
    /// Frame identifier this signal lives in
    pub frame_id: u32,
    /// First bit of the signal, in the endianness' bit-stream order
    pub start_bit: usize,
    /// Width in bits (1..=64)
    pub bit_length: usize,
    /// Motorola bit order when true, Intel when false
    pub big_endian: bool,
    /// Multiplier applied to the raw value
    pub factor: f64,
}

/// A received bus frame: identifier plus up to 8 data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFrame {
    pub id: u32,
    pub data: Vec<u8>,
}

/// Extract a signal from `frame` according to `spec`.
///
/// Returns `None` when the frame identifier does not match, the bit length
/// is zero or above [`MAX_SIGNAL_BITS`], or any addressed bit lies past the
/// end of the frame data.
pub fn decode_signal(frame: &BusFrame, spec: &SignalSpec) -> Option<f64> {
    if frame.id != spec.frame_id {
        return None;
    }
    if spec.bit_length == 0 || spec.bit_length > MAX_SIGNAL_BITS {
        return None;
    }

    let total_bits = frame.data.len() * 8;
    if spec.start_bit + spec.bit_length > total_bits {
        return None;
    }

    let mut raw: u64 = 0;

    if spec.big_endian {
        // MSB-first stream: shift each bit in from the right
        for i in 0..spec.bit_length {
            let pos = spec.start_bit + i;
            let byte = pos / 8;
            let bit = 7 - (pos % 8);
            let value = (frame.data[byte] >> bit) & 1;
            raw = (raw << 1) | u64::from(value);
        }
    } else {
        // LSB-first stream: fill the accumulator from the bottom up
        for i in 0..spec.bit_length {
            let pos = spec.start_bit + i;
            let byte = pos / 8;
            let bit = pos % 8;
            let value = (frame.data[byte] >> bit) & 1;
            raw |= u64::from(value) << i;
        }
    }

    Some(raw as f64 * spec.factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(start_bit: usize, bit_length: usize, big_endian: bool, factor: f64) -> SignalSpec {
        SignalSpec {
            frame_id: 0x123,
            start_bit,
            bit_length,
            big_endian,
            factor,
        }
    }

    fn frame(data: &[u8]) -> BusFrame {
        BusFrame {
            id: 0x123,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_wrong_frame_id_is_none() {
        let mut f = frame(&[0xFF]);
        f.id = 0x456;
        assert_eq!(decode_signal(&f, &spec(0, 8, true, 1.0)), None);
    }

    #[test]
    fn test_big_endian_full_byte() {
        // Byte 0 = 0xA5, read MSB first from bit 0
        let f = frame(&[0xA5, 0x00]);
        assert_eq!(decode_signal(&f, &spec(0, 8, true, 1.0)), Some(0xA5 as f64));
    }

    #[test]
    fn test_big_endian_spans_bytes() {
        // Bits 4..12 MSB-first across bytes 0xAB 0xCD: low nibble of 0xAB
        // followed by high nibble of 0xCD = 0xBC
        let f = frame(&[0xAB, 0xCD]);
        assert_eq!(decode_signal(&f, &spec(4, 8, true, 1.0)), Some(0xBC as f64));
    }

    #[test]
    fn test_little_endian_full_byte() {
        let f = frame(&[0xA5, 0x00]);
        assert_eq!(
            decode_signal(&f, &spec(0, 8, false, 1.0)),
            Some(0xA5 as f64)
        );
    }

    #[test]
    fn test_little_endian_16_bit_word() {
        // Intel order: byte 0 is the low byte
        let f = frame(&[0x34, 0x12]);
        assert_eq!(
            decode_signal(&f, &spec(0, 16, false, 1.0)),
            Some(0x1234 as f64)
        );
    }

    #[test]
    fn test_little_endian_offset_bits() {
        // 0b0110_0000: bits 5..7 LSB-first = 0b11
        let f = frame(&[0x60]);
        assert_eq!(decode_signal(&f, &spec(5, 2, false, 1.0)), Some(3.0));
    }

    #[test]
    fn test_factor_scales_raw_value() {
        // Vehicle speed style signal: raw 250 at 0.1 km/h per bit
        let f = frame(&[250, 0x00]);
        let decoded = decode_signal(&f, &spec(0, 8, false, 0.1)).unwrap();
        assert!((decoded - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_bits_are_none() {
        let f = frame(&[0xFF]);
        assert_eq!(decode_signal(&f, &spec(4, 8, true, 1.0)), None);
        assert_eq!(decode_signal(&f, &spec(0, 9, false, 1.0)), None);
    }

    #[test]
    fn test_zero_and_oversized_length_are_none() {
        let f = frame(&[0xFF; 8]);
        assert_eq!(decode_signal(&f, &spec(0, 0, true, 1.0)), None);
        assert_eq!(decode_signal(&f, &spec(0, 65, true, 1.0)), None);
    }

    #[test]
    fn test_64_bit_extraction() {
        let f = frame(&[0xFF; 8]);
        assert_eq!(
            decode_signal(&f, &spec(0, 64, true, 1.0)),
            Some(u64::MAX as f64)
        );
    }

    #[test]
    fn test_empty_frame_is_none() {
        let f = frame(&[]);
        assert_eq!(decode_signal(&f, &spec(0, 1, true, 1.0)), None);
    }
}

//! Order-preserving key encoding for index insertion.
//!
//! Keys are big-endian byte strings of the column's fixed width, encoded
//! so that lexicographic byte order matches the natural order of the
//! values:
//!
//! - booleans: one byte, 0 or 1
//! - signed integers: two's complement with the sign bit flipped
//! - floats: IEEE-754 bits, all bits flipped for negatives and the sign
//!   bit set for positives
//! - fixed-width strings: raw bytes, right-padded with NUL
//!
//! Numeric keys are coarsened before encoding by dividing by the
//! column's bucket size and rounding toward negative infinity, so an
//! index groups nearby values under one key.

use crate::schema::column::ColumnType;

const SIGN32: u32 = 1 << 31;
const SIGN64: u64 = 1 << 63;

/// Encodes a packed little-endian column value into its big-endian,
/// order-preserving key of the column's width.
///
/// `raw` must be exactly the column's packed extent; `bucket_size` must
/// be positive.
pub fn encode_key(ty: ColumnType, raw: &[u8], bucket_size: f64) -> Vec<u8> {
    debug_assert_eq!(raw.len(), ty.width(), "key extent width mismatch");
    match ty {
        ColumnType::Bool => vec![u8::from(raw[0] != 0)],
        ColumnType::Char => vec![raw[0]],
        ColumnType::Short => {
            let v = i16::from_le_bytes([raw[0], raw[1]]);
            let q = quantize_int(v as i64, bucket_size)
                .clamp(i16::MIN as i64, i16::MAX as i64) as i16;
            ((q as u16) ^ 0x8000).to_be_bytes().to_vec()
        }
        ColumnType::Int => {
            let v = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let q = quantize_int(v as i64, bucket_size)
                .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
            ((q as u32) ^ SIGN32).to_be_bytes().to_vec()
        }
        ColumnType::Long => {
            let v = i64::from_le_bytes(raw.try_into().expect("long extent"));
            let q = quantize_int(v, bucket_size);
            ((q as u64) ^ SIGN64).to_be_bytes().to_vec()
        }
        ColumnType::Float => {
            let v = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let q = quantize_float(v as f64, bucket_size) as f32;
            order_f32(q).to_be_bytes().to_vec()
        }
        ColumnType::Double => {
            let v = f64::from_le_bytes(raw.try_into().expect("double extent"));
            let q = quantize_float(v, bucket_size);
            order_f64(q).to_be_bytes().to_vec()
        }
        ColumnType::String(_) => raw.to_vec(),
    }
}

/// Coarsens an integer value by `bucket_size`, rounding toward negative
/// infinity. A bucket size of 1 is the identity and keeps full 64-bit
/// precision; other bucket sizes go through f64 and are exact up to
/// 2^53.
fn quantize_int(v: i64, bucket_size: f64) -> i64 {
    if bucket_size == 1.0 {
        v
    } else {
        (v as f64 / bucket_size).floor() as i64
    }
}

/// Coarsens a float value by `bucket_size`, rounding toward negative
/// infinity. Negative zero is normalized so equal buckets always encode
/// to equal keys.
fn quantize_float(v: f64, bucket_size: f64) -> f64 {
    let q = (v / bucket_size).floor();
    if q == 0.0 {
        0.0
    } else {
        q
    }
}

/// IEEE-754 order transform: negatives flip every bit, positives flip
/// only the sign bit, so byte order matches numeric order.
fn order_f32(v: f32) -> u32 {
    let bits = v.to_bits();
    if bits & SIGN32 != 0 {
        !bits
    } else {
        bits | SIGN32
    }
}

/// See [`order_f32`].
fn order_f64(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & SIGN64 != 0 {
        !bits
    } else {
        bits | SIGN64
    }
}

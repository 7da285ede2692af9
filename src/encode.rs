//! Printable-character encoding of integer arrays.
//!
//! Numbers are written in base 46, most significant digit first. Digits map to the
//! printable ASCII range starting at `' '`, skipping `"` and `\` so that the result
//! can be put in a double-quoted string literal without escaping. The last digit of
//! each number is offset by 46, which marks where the number ends. The value `0xffff`
//! is common enough (it terminates sequences) to get its own single character.

use crate::error::{GenError, Result};

const BIG_VAL_CODE: u32 = 126;
const BIG_VAL: u32 = 0xffff;
const START: u32 = 32;
const GAP1: u32 = 34;
const GAP2: u32 = 92;
const BASE: u32 = 46;

fn digit_to_char(digit: u32) -> char {
    let mut ch = digit + START;
    if ch >= GAP1 {
        ch += 1;
    }
    if ch >= GAP2 {
        ch += 1;
    }
    // Always ASCII: digits are below 2 * BASE
    char::from(ch as u8)
}

/// Encodes a single value, failing when it is larger than `max`.
pub fn encode(value: u32, max: u32) -> Result<String> {
    if value > max {
        return Err(GenError::Capacity(format!(
            "Trying to encode a number that's too big: {}",
            value
        )));
    }
    if value == BIG_VAL {
        return Ok(char::from(BIG_VAL_CODE as u8).to_string());
    }
    let mut digits: Vec<char> = vec![];
    let mut value = value;
    let mut first = BASE;
    loop {
        let low = value % BASE;
        let rest = value - low;
        digits.push(digit_to_char(low + first));
        if rest == 0 {
            break;
        }
        value = rest / BASE;
        first = 0;
    }
    Ok(digits.into_iter().rev().collect())
}

/// Encodes an array as a quoted string. The length is written first, without a limit.
pub fn encode_array<T: Copy + Into<u32>>(values: &[T], max: u32) -> Result<String> {
    let mut result = String::with_capacity(values.len() * 2 + 4);
    result.push('"');
    result.push_str(&encode(values.len() as u32, u32::MAX)?);
    for value in values {
        result.push_str(&encode((*value).into(), max)?);
    }
    result.push('"');
    Ok(result)
}

/// Decodes the body (without quotes) of a string produced by [`encode_array`].
pub fn decode_array(input: &str) -> Vec<u32> {
    let bytes = input.as_bytes();
    let mut result: Option<Vec<u32>> = None;
    let mut pos = 0;
    while pos < bytes.len() {
        let mut value: u32 = 0;
        loop {
            let mut next = u32::from(bytes[pos]);
            pos += 1;
            if next == BIG_VAL_CODE {
                value = BIG_VAL;
                break;
            }
            if next >= GAP2 {
                next -= 1;
            }
            if next >= GAP1 {
                next -= 1;
            }
            let mut digit = next - START;
            let mut stop = false;
            if digit >= BASE {
                digit -= BASE;
                stop = true;
            }
            value = value.wrapping_add(digit);
            if stop {
                break;
            }
            value = value.wrapping_mul(BASE);
        }
        match &mut result {
            Some(array) => array.push(value),
            None => result = Some(Vec::with_capacity(value as usize)),
        }
    }
    result.unwrap_or_default()
}

#[test]
fn encode_small_values() {
    // Single digits carry the end marker
    assert_eq!(encode(0, 0xffff).unwrap(), "O");
    assert_eq!(encode(1, 0xffff).unwrap(), "P");
    // Multi-digit values skip the quote character
    assert_eq!(encode(46, 0xffff).unwrap(), "!O");
    assert_eq!(encode(92, 0xffff).unwrap(), "#O");
    assert_eq!(encode(0xffff, 0xffff).unwrap(), "~");
}

#[test]
fn encode_rejects_large_values() {
    assert!(matches!(encode(0x10000, 0xffff), Err(GenError::Capacity(_))));
}

#[test]
fn array_round_trip() {
    let values: Vec<u32> = vec![0, 1, 45, 46, 47, 2115, 0xfffe, 0xffff, 12];
    let encoded = encode_array(&values, 0xffff).unwrap();
    assert!(!encoded[1..encoded.len() - 1].contains('"'));
    assert!(!encoded.contains('\\'));
    assert_eq!(decode_array(&encoded[1..encoded.len() - 1]), values);
}

#[test]
fn large_round_trip() {
    let values: Vec<u32> = vec![0xffff_fffe, 0x1_0000, 0xffff_ffff];
    let encoded = encode_array(&values, u32::MAX).unwrap();
    assert_eq!(decode_array(&encoded[1..encoded.len() - 1]), values);
}

//! Little-endian sign-magnitude numbers used by arithmetic opcodes.

use crate::interpreter::ScriptError;

pub const DEFAULT_MAX_NUM_SIZE: usize = 4;

/// Decode a stack element as a number.
///
/// Elements wider than `max_len` are rejected. With `require_minimal` the
/// encoding must not carry redundant zero bytes.
pub fn decode(data: &[u8], require_minimal: bool, max_len: usize) -> Result<i64, ScriptError> {
    if data.len() > max_len {
        return Err(ScriptError::NumOverflow);
    }
    let Some((&last, rest)) = data.split_last() else {
        return Ok(0);
    };
    if require_minimal && (last & 0x7f) == 0 {
        // A trailing 0x00/0x80 is only allowed when the next byte needs its
        // high bit for magnitude.
        match rest.last() {
            Some(prev) if prev & 0x80 != 0 => {}
            _ => return Err(ScriptError::MinimalData),
        }
    }

    let mut result: i64 = 0;
    for (i, byte) in data.iter().enumerate() {
        result |= (*byte as i64) << (8 * i);
    }
    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (data.len() - 1)));
        result &= mask;
        result = -result;
    }
    Ok(result)
}

pub fn encode(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    let last = out.len() - 1;
    if out[last] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        out[last] |= 0x80;
    }
    out
}

pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, byte) in data.iter().enumerate() {
        if *byte != 0 {
            // negative zero
            return !(i == data.len() - 1 && *byte == 0x80);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_sign_and_magnitude() {
        assert_eq!(encode(0), Vec::<u8>::new());
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(-1), vec![0x81]);
        assert_eq!(encode(127), vec![0x7f]);
        assert_eq!(encode(128), vec![0x80, 0x00]);
        assert_eq!(encode(-128), vec![0x80, 0x80]);
        assert_eq!(encode(255), vec![0xff, 0x00]);
        assert_eq!(encode(256), vec![0x00, 0x01]);
    }

    #[test]
    fn decode_inverts_encode() {
        for value in [-70_000i64, -256, -1, 0, 1, 127, 128, 255, 32_767, 2_147_483_647] {
            let bytes = encode(value);
            assert_eq!(decode(&bytes, true, 4).expect("decode"), value);
        }
    }

    #[test]
    fn rejects_wide_and_non_minimal() {
        assert_eq!(
            decode(&[1, 0, 0, 0, 0], false, 4),
            Err(ScriptError::NumOverflow)
        );
        assert_eq!(decode(&[0x01, 0x00], true, 4), Err(ScriptError::MinimalData));
        assert_eq!(decode(&[0x80], true, 4), Err(ScriptError::MinimalData));
        assert_eq!(decode(&[0x01, 0x00], false, 4).expect("lax"), 1);
        assert_eq!(decode(&[0xff, 0x00], true, 4).expect("needed pad"), 255);
    }

    #[test]
    fn negative_zero_is_false() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0x00, 0x80]));
        assert!(cast_to_bool(&[0x80, 0x00]));
        assert!(cast_to_bool(&[0x01]));
    }
}

//! Decimal formatting helpers for response values.

/// Maximum bytes needed for an i32 in decimal: sign plus 10 digits.
pub const MAX_I32_LEN: usize = 11;

/// Write `value` as decimal ASCII into `buf`, returning the length.
///
/// `buf` must hold at least [`MAX_I32_LEN`] bytes.
pub fn write_i32(buf: &mut [u8], value: i32) -> usize {
    let mut pos = 0;
    if value < 0 {
        buf[pos] = b'-';
        pos += 1;
    }

    let mut magnitude = value.unsigned_abs();
    let mut digits = [0u8; 10];
    let mut count = 0;
    loop {
        digits[count] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        count += 1;
        if magnitude == 0 {
            break;
        }
    }

    for &d in digits[..count].iter().rev() {
        buf[pos] = d;
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: i32) -> ([u8; MAX_I32_LEN], usize) {
        let mut buf = [0u8; MAX_I32_LEN];
        let len = write_i32(&mut buf, value);
        (buf, len)
    }

    #[test]
    fn test_write_i32() {
        let (buf, len) = fmt(0);
        assert_eq!(&buf[..len], b"0");
        let (buf, len) = fmt(-25);
        assert_eq!(&buf[..len], b"-25");
        let (buf, len) = fmt(i32::MIN);
        assert_eq!(&buf[..len], b"-2147483648");
        let (buf, len) = fmt(i32::MAX);
        assert_eq!(&buf[..len], b"2147483647");
    }
}

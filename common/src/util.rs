use std::num::ParseIntError;

/// Loads and stores always move one little-endian 64-bit word.
pub const WORD_BYTES: u64 = 8;

#[inline(always)]
pub fn is_word_aligned(address: u64) -> bool {
    address & (WORD_BYTES - 1) == 0
}

/// Read the word starting at `offset`. The caller guarantees the slice is long enough.
#[inline(always)]
pub fn read_word(bytes: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; WORD_BYTES as usize];
    word.copy_from_slice(&bytes[offset..offset + WORD_BYTES as usize]);
    u64::from_le_bytes(word)
}

#[inline(always)]
pub fn write_word(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + WORD_BYTES as usize].copy_from_slice(&value.to_le_bytes());
}

/// Parse a signed integer written in decimal or with a `0x`/`0b` prefix.
pub fn parse_int(text: &str) -> Result<i64, ParseIntError> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)?
    } else if let Some(bin) = digits.strip_prefix("0b") {
        i64::from_str_radix(bin, 2)?
    } else {
        digits.parse::<i64>()?
    };
    Ok(if negative { value.wrapping_neg() } else { value })
}

/// Parse an unsigned size or address, accepting the same prefixes as [`parse_int`].
pub fn parse_size(text: &str) -> Result<u64, ParseIntError> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = text.strip_prefix("0b") {
        u64::from_str_radix(bin, 2)
    } else {
        text.parse::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian() {
        let mut line = [0u8; 16];
        write_word(&mut line, 8, 0x0102_0304_0506_0708);
        assert_eq!(line[8], 0x08);
        assert_eq!(line[15], 0x01);
        assert_eq!(read_word(&line, 8), 0x0102_0304_0506_0708);
        assert_eq!(read_word(&line, 0), 0);
    }

    #[test]
    fn alignment() {
        assert!(is_word_aligned(0x100));
        assert!(!is_word_aligned(0x104));
    }

    #[test]
    fn parses_prefixed_numbers() {
        assert_eq!(parse_int("42"), Ok(42));
        assert_eq!(parse_int("-0x10"), Ok(-16));
        assert_eq!(parse_int("0b101"), Ok(5));
        assert!(parse_int("r1").is_err());
        assert_eq!(parse_size("0x1000"), Ok(4096));
        assert!(parse_size("-1").is_err());
    }
}

//! ThinkGear payload checksum

/// Compute the checksum of a payload: low 8 bits of the inverted byte sum
pub fn compute_checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    !sum
}

/// Check a payload against the checksum byte that followed it on the wire
pub fn check_checksum(payload: &[u8], checksum: u8) -> Result<(), u8> {
    let expected = compute_checksum(payload);
    if expected == checksum {
        Ok(())
    } else {
        Err(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_vendor_example() {
        // Sample packet from the ThinkGear protocol document:
        // AA AA 08 | 02 20 01 7E 04 12 05 60 | E3
        let payload = hex::decode("0220017E04120560").unwrap();
        assert_eq!(compute_checksum(&payload), 0xE3);
    }

    #[test]
    fn test_checksum_empty_payload() {
        assert_eq!(compute_checksum(&[]), 0xFF);
    }

    #[test]
    fn test_checksum_wraps() {
        // 0x80 + 0x80 = 0x100 -> 0x00 -> !0x00 = 0xFF
        assert_eq!(compute_checksum(&[0x80, 0x80]), 0xFF);
        // 0x80 + 0x02 + 0xFF + 0xFE = 0x27F -> 0x7F -> 0x80
        assert_eq!(compute_checksum(&[0x80, 0x02, 0xFF, 0xFE]), 0x80);
    }

    #[test]
    fn test_check_checksum_rejects_any_flipped_bit() {
        let payload = [0x80, 0x02, 0xFF, 0xFE];
        let good = compute_checksum(&payload);
        assert!(check_checksum(&payload, good).is_ok());
        for bit in 0..8 {
            assert_eq!(check_checksum(&payload, good ^ (1 << bit)), Err(good));
        }
    }
}

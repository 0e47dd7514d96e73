//! Checksum and byte encoding helpers
//!
//! The watch protects every 256-byte window with CRC-16/KERMIT (reflected
//! CCITT polynomial, zero initial value, no final XOR). The checksum is always
//! computed over bytes that are already bit-inverted, and the two CRC bytes are
//! carried high byte first.

/// Reflected form of the CCITT polynomial 0x1021
const KERMIT_POLY: u16 = 0x8408;

/// Compute CRC-16/KERMIT over `data`
pub fn crc16_kermit(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in data {
        crc ^= byte as u16;

        for _ in 0..8 {
            if (crc & 1) != 0 {
                crc = (crc >> 1) ^ KERMIT_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// CRC bytes in transmission order (high byte first)
pub fn crc_bytes(data: &[u8]) -> [u8; 2] {
    crc16_kermit(data).to_be_bytes()
}

/// Check a window against the two CRC bytes that followed it on the wire
pub fn verify(window: &[u8], received: [u8; 2]) -> bool {
    crc16_kermit(window) == u16::from_be_bytes(received)
}

/// Bit inversion applied to every payload byte in both directions
#[inline]
pub fn invert(byte: u8) -> u8 {
    !byte
}

/// Invert a whole slice
pub fn invert_all(data: &[u8]) -> Vec<u8> {
    data.iter().map(|&b| invert(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kermit_check_value() {
        assert_eq!(crc16_kermit(b"123456789"), 0x2189);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc16_kermit(&[]), 0x0000);
    }

    #[test]
    fn test_crc_bytes_are_high_byte_first() {
        assert_eq!(crc_bytes(b"123456789"), [0x21, 0x89]);
    }

    #[test]
    fn test_verify_accepts_own_checksum() {
        let window: Vec<u8> = (0..254u16).map(|i| (i * 7) as u8).collect();
        assert!(verify(&window, crc_bytes(&window)));
    }

    #[test]
    fn test_single_bit_flip_changes_checksum() {
        let window: Vec<u8> = (0..254u16).map(|i| (i * 13 + 1) as u8).collect();
        let original = crc16_kermit(&window);

        for index in [0usize, 17, 128, 253] {
            for bit in 0..8 {
                let mut corrupted = window.clone();
                corrupted[index] ^= 1 << bit;
                assert_ne!(crc16_kermit(&corrupted), original);
            }
        }
    }

    #[test]
    fn test_invert_is_involution() {
        for b in 0..=255u8 {
            assert_eq!(invert(invert(b)), b);
        }
        assert_eq!(invert_all(&[0x00, 0xFF, 0x5A]), vec![0xFF, 0x00, 0xA5]);
    }
}

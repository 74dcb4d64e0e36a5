// Table-driven CRC-8 for frame integrity checking
// Default polynomial: x^8 + x^2 + x + 1 (0x07), no reflection, zero init

use crate::utils::consts::CRC8_POLYNOMIAL;

#[derive(Debug, Clone)]
pub struct Crc8 {
    table: [u8; 256],
    value: u8,
}

impl Crc8 {
    pub fn new(polynomial: u8) -> Self {
        Self {
            table: build_table(polynomial),
            value: 0,
        }
    }

    pub fn update(&mut self, byte: u8) {
        self.value = self.table[(self.value ^ byte) as usize];
    }

    /// Folds raw bits in groups of eight, MSB first. A trailing partial
    /// group is padded with zeros.
    pub fn update_bits(&mut self, bits: &[bool]) {
        for group in bits.chunks(8) {
            self.update(bits_to_byte(group));
        }
    }

    pub fn get(&self) -> u8 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }

    pub fn checksum(&mut self, data: &[u8]) -> u8 {
        self.reset();
        for &byte in data {
            self.update(byte);
        }
        self.value
    }
}

impl Default for Crc8 {
    fn default() -> Self {
        Self::new(CRC8_POLYNOMIAL)
    }
}

const fn build_table(polynomial: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ polynomial
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Convert byte to bits (MSB first)
pub fn byte_to_bits(byte: u8) -> [bool; 8] {
    std::array::from_fn(|i| (byte >> (7 - i)) & 1 == 1)
}

/// Convert up to eight bits (MSB first) to a byte
pub fn bits_to_byte(bits: &[bool]) -> u8 {
    bits.iter()
        .take(8)
        .enumerate()
        .filter(|&(_, &bit)| bit)
        .fold(0u8, |byte, (i, _)| byte | 1 << (7 - i))
}

pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| byte_to_bits(byte))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitwise_crc8(data: &[u8]) -> u8 {
        data.iter().fold(0u8, |mut crc, &byte| {
            crc ^= byte;
            for _ in 0..8 {
                crc = if crc & 0x80 != 0 {
                    (crc << 1) ^ CRC8_POLYNOMIAL
                } else {
                    crc << 1
                };
            }
            crc
        })
    }

    #[test]
    fn test_crc8() {
        let data = b"Hello, World!";
        let mut crc = Crc8::default();
        let sum = crc.checksum(data);
        assert_eq!(sum, bitwise_crc8(data));

        // Verify that modified data fails
        let mut modified = data.to_vec();
        modified[0] = b'h';
        assert_ne!(crc.checksum(&modified), sum);
    }

    #[test]
    fn test_known_vector() {
        // CRC-8/SMBUS check value
        assert_eq!(Crc8::default().checksum(b"123456789"), 0xF4);
    }

    #[test]
    fn test_single_bit_flips_detected() {
        let data: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(37)).collect();
        let mut crc = Crc8::default();
        let sum = crc.checksum(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc.checksum(&flipped), sum, "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn test_bit_variant_matches_byte_variant() {
        let data = b"\x00\xffline coding";
        let mut by_bytes = Crc8::default();
        let mut by_bits = Crc8::default();
        by_bytes.checksum(data);
        by_bits.update_bits(&bytes_to_bits(data));
        assert_eq!(by_bits.get(), by_bytes.get());
    }

    #[test]
    fn test_partial_bit_group_is_zero_padded() {
        let mut by_bits = Crc8::default();
        by_bits.update_bits(&[true, false, true]);
        let mut by_bytes = Crc8::default();
        by_bytes.update(0b1010_0000);
        assert_eq!(by_bits.get(), by_bytes.get());
    }

    #[test]
    fn test_bit_conversion() {
        let byte = 0b10110011;
        let bits = byte_to_bits(byte);
        assert_eq!(bits, [true, false, true, true, false, false, true, true]);
        assert_eq!(bits_to_byte(&bits), byte);
    }
}

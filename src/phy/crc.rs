// CRC32 (IEEE) frame check sequence and LSB-first bit helpers

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;

use crate::utils::consts::CRC_BYTES;

/// Calculate CRC32 checksum for given data
pub fn calculate_crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Append the little-endian CRC32 of `data` to it
pub fn append_crc32(data: &mut Vec<u8>) {
    let mut trailer = [0u8; CRC_BYTES];
    LittleEndian::write_u32(&mut trailer, calculate_crc32(data));
    data.extend_from_slice(&trailer);
}

/// Verify a buffer whose last four bytes are a little-endian CRC32 of the rest
pub fn verify_crc32(data_with_crc: &[u8]) -> bool {
    if data_with_crc.len() < CRC_BYTES {
        return false;
    }
    let (data, trailer) = data_with_crc.split_at(data_with_crc.len() - CRC_BYTES);
    calculate_crc32(data) == LittleEndian::read_u32(trailer)
}

/// Convert byte to bit array (LSB first)
pub fn byte_to_bits(byte: u8) -> [u8; 8] {
    let mut bits = [0u8; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (byte >> i) & 1;
    }
    bits
}

/// Convert bytes to bit vector
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        bits.extend_from_slice(&byte_to_bits(byte));
    }
    bits
}

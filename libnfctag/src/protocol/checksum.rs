// libnfctag/src/protocol/checksum.rs

/// Checksum of the T3T NDEF attribute information block: the 16-bit sum
/// of bytes 0 to 13.
pub fn t3t_attr_checksum(block: &[u8]) -> u16 {
    block
        .iter()
        .take(14)
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

/// CRC-8 protecting a MIFARE Application Directory sector
/// (polynomial 0x1D, preset 0xC7, no reflection).
pub fn mad_crc8(data: &[u8]) -> u8 {
    data.iter().fold(0xC7u8, |mut crc, &b| {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x1D
            } else {
                crc << 1
            };
        }
        crc
    })
}

// fixtures.rs: identifiers and NDEF payloads shared by the tests

use libnfctag::{Idm, Pmm};

pub const T2T_UID: [u8; 7] = [0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0x80];
pub const T1T_UID: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
/// ICODE SLI: NXP manufacturer code with the SLI type byte.
pub const I93_UID: [u8; 8] = [0xE0, 0x04, 0x01, 0x50, 0x11, 0x22, 0x33, 0x44];
pub const MFC_UID: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];
/// SAK of a MIFARE Classic 1K.
pub const MFC_SAK_1K: u8 = 0x08;

pub fn sample_idm() -> Idm {
    Idm::from_bytes([0x02, 0xFE, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05])
}

pub fn sample_pmm() -> Pmm {
    Pmm::from_bytes([0x00, 0xF1, 0x00, 0x00, 0x00, 0x01, 0x43, 0x00])
}

/// Bytes from a hex string, spaces allowed.
pub fn from_hex(s: &str) -> Vec<u8> {
    let compact: String = s.split_whitespace().collect();
    hex::decode(compact).expect("valid hex fixture")
}

/// Short NDEF URI record with no prefix abbreviation.
pub fn uri_record(uri: &str) -> Vec<u8> {
    let mut msg = vec![0xD1, 0x01, uri.len() as u8 + 1, b'U', 0x00];
    msg.extend_from_slice(uri.as_bytes());
    msg
}

/// `len` bytes with no zero among them, so misplaced bytes show up.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| 0xA0u8.wrapping_add(i as u8) | 0x01).collect()
}

// libnfctag/src/constants.rs
//! Protocol constants shared by several tag types

/// NDEF magic number found in byte 0 of the T1T/T2T/T5T capability container
pub const NDEF_MAGIC_NUMBER: u8 = 0xE1;

/// T5T capability container magic for two-byte addressed tags
pub const NDEF_MAGIC_NUMBER_E2: u8 = 0xE2;

/// TLV types used by T1T, T2T, T5T and MIFARE Classic
pub const TLV_NULL: u8 = 0x00;
pub const TLV_LOCK_CONTROL: u8 = 0x01;
pub const TLV_MEMORY_CONTROL: u8 = 0x02;
pub const TLV_NDEF: u8 = 0x03;
pub const TLV_PROPRIETARY: u8 = 0xFD;
pub const TLV_TERMINATOR: u8 = 0xFE;

/// First length byte announcing the three byte length format
pub const TLV_LONG_LENGTH_MARKER: u8 = 0xFF;

/// Largest length encodable in the one byte format
pub const TLV_SHORT_LENGTH_MAX: usize = 0xFE;

/// Largest NDEF TLV length (0xFFFF is reserved)
pub const TLV_LONG_LENGTH_MAX: usize = 0xFFFE;

/// Value length of lock/memory control TLVs
pub const TLV_CONTROL_VALUE_LEN: usize = 3;

/// Capability container access byte values (T1T/T2T)
pub const CC_ACCESS_RW: u8 = 0x00;
pub const CC_ACCESS_RO: u8 = 0x0F;

/// Major version of the NFC Forum tag mapping supported for T1T/T2T
pub const CC_VERSION_MAJOR: u8 = 0x01;

/// Default NDEF capable version byte written when formatting
pub const CC_VERSION_1_0: u8 = 0x10;

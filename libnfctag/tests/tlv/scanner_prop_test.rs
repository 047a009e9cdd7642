use libnfctag::addressing::{ByteKind, MemoryMap};
use libnfctag::constants::{TLV_LONG_LENGTH_MAX, TLV_NDEF, TLV_PROPRIETARY};
use libnfctag::tlv::{self, ScanEvent, TlvScanner};
use proptest::prelude::*;

/// Feed `bytes` from offset 0 until the scanner reports something other
/// than `NeedMore`.
fn scan(bytes: &[u8]) -> libnfctag::Result<Option<ScanEvent>> {
    let mut scanner = TlvScanner::new();
    for (offset, byte) in bytes.iter().enumerate() {
        match scanner.feed(offset, *byte)? {
            ScanEvent::NeedMore => continue,
            ScanEvent::Ndef(found) => return Ok(Some(ScanEvent::Ndef(found))),
            ScanEvent::Terminator => return Ok(Some(ScanEvent::Terminator)),
            _ => continue,
        }
    }
    Ok(None)
}

proptest! {
    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut scanner = TlvScanner::new();
        for (offset, byte) in bytes.iter().enumerate() {
            if scanner.feed(offset, *byte).is_err() {
                break;
            }
            if scanner.is_done() {
                // a finished scanner ignores whatever follows
                prop_assert_eq!(scanner.feed(offset + 1, 0x03).unwrap(), ScanEvent::NeedMore);
                prop_assert!(scanner.finish().is_ok());
                break;
            }
        }
    }

    #[test]
    fn ndef_tlv_is_found_behind_padding(
        nulls in 0usize..8,
        proprietary in prop::collection::vec(any::<u8>(), 0..20),
        msg_len in 0usize..=TLV_LONG_LENGTH_MAX,
    ) {
        let mut image = vec![0x00; nulls];
        image.push(TLV_PROPRIETARY);
        image.push(proprietary.len() as u8);
        image.extend_from_slice(&proprietary);
        let header = image.len();
        image.push(TLV_NDEF);
        image.extend_from_slice(&tlv::encode_length(msg_len).unwrap());

        match scan(&image).unwrap() {
            Some(ScanEvent::Ndef(found)) => {
                prop_assert_eq!(found.header_offset, header);
                prop_assert_eq!(found.length_offset, header + 1);
                prop_assert_eq!(found.last_length_offset, image.len() - 1);
                prop_assert_eq!(found.length_field_size, tlv::length_field_size(msg_len));
                prop_assert_eq!(found.msg_len, msg_len);
            }
            other => prop_assert!(false, "unexpected scan result {:?}", other),
        }
    }

    #[test]
    fn max_message_len_fits_and_is_largest(free in 0usize..70_000) {
        let max = tlv::max_message_len(free);
        if free > 0 {
            prop_assert!(max + tlv::length_field_size(max) <= free);
        } else {
            prop_assert_eq!(max, 0);
        }
        if max < TLV_LONG_LENGTH_MAX {
            let bigger = max + 1;
            prop_assert!(bigger + tlv::length_field_size(bigger) > free);
        }
    }

    #[test]
    fn data_offsets_skip_excluded_regions(
        start in 0usize..32,
        len in 0usize..256,
        holes in prop::collection::vec((0usize..300, 1usize..8), 0..4),
        from in 0usize..300,
    ) {
        let mut map = MemoryMap::new(4, start, start + len);
        for (at, size) in &holes {
            map.exclude(*at..*at + *size, ByteKind::Lock);
        }

        let expected: Vec<usize> = (from..start + len)
            .filter(|o| *o >= start && !holes.iter().any(|(at, size)| (*at..*at + *size).contains(o)))
            .collect();
        prop_assert_eq!(map.data_bytes_from(from), expected.len());
        for (n, offset) in expected.iter().enumerate() {
            prop_assert_eq!(map.nth_data_offset(from, n), Some(*offset));
        }
        prop_assert_eq!(map.nth_data_offset(from, expected.len()), None);
        prop_assert_eq!(map.next_data_offset(from), expected.first().copied());
    }
}

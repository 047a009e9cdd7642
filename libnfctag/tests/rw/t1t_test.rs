#[path = "../common/mod.rs"]
mod common;

use common::fixtures::{pattern, uri_record, T1T_UID};
use libnfctag::rw::RwEvent;
use libnfctag::test_support::{Loopback, T1tSim};
use libnfctag::{NdefFlags, Status, TagProtocol};

fn static_tag(data: &[u8]) -> Loopback<T1tSim> {
    common::init_logging();
    let sim = T1tSim::static_tag(T1T_UID, data);
    let hr = sim.hr;
    let mut lb = Loopback::new(sim);
    lb.rw.select_t1t(hr, &T1T_UID).unwrap();
    lb
}

fn dynamic_tag(data: &[u8]) -> Loopback<T1tSim> {
    common::init_logging();
    let sim = T1tSim::dynamic_tag(T1T_UID, data);
    let hr = sim.hr;
    let mut lb = Loopback::new(sim);
    lb.rw.select_t1t(hr, &T1T_UID).unwrap();
    lb
}

/// Reserved and lock blocks 0x0D to 0x0F of a dynamic tag.
const DYNAMIC_HOLE: std::ops::Range<usize> = 0x68..0x80;

/// Data offsets from `from`, skipping the reserved blocks.
fn data_offsets(from: usize) -> impl Iterator<Item = usize> {
    (from..0x200).filter(|o| !DYNAMIC_HOLE.contains(o))
}

fn tlv(msg: &[u8]) -> Vec<u8> {
    let mut data = vec![0x03, msg.len() as u8];
    data.extend_from_slice(msg);
    data.push(0xFE);
    data
}

#[test]
fn detect_and_read_static_tag() {
    let record = uri_record("nfc-forum.org");
    let mut lb = static_tag(&tlv(&record));

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.protocol, TagProtocol::T1t);
    assert_eq!(info.cur_size, record.len());
    assert_eq!(info.max_size, 90);
    assert!(info.flags.contains(NdefFlags::SOFT_LOCKABLE));

    // the whole static memory came with RALL, nothing more to read
    let before = lb.exchanges();
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(256)).unwrap()), record);
    assert_eq!(lb.exchanges(), before);
}

#[test]
fn write_then_detect_again() {
    let mut lb = static_tag(&tlv(&[0xD0, 0x00, 0x00]));
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    let msg = pattern(20);
    assert_eq!(lb.exec(|rw| rw.write_ndef(&msg)).unwrap(), vec![RwEvent::NdefUpdateComplete]);
    assert_eq!(lb.sim.mem[8], 0xE1);
    assert_eq!(lb.sim.mem[12..14], [0x03, 20]);
    assert_eq!(lb.sim.mem[14..34], msg[..]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.cur_size, 20);
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(256)).unwrap()), msg);
}

#[test]
fn soft_lock_sets_cc_access() {
    let mut lb = static_tag(&tlv(&[0xD0, 0x00, 0x00]));
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(
        lb.exec(|rw| rw.set_tag_read_only(false)).unwrap(),
        vec![RwEvent::SetReadOnly(Status::Ok)]
    );
    assert_eq!(lb.sim.mem[11], 0x0F);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(info.flags.contains(NdefFlags::READ_ONLY));
}

#[test]
fn byte_access() {
    let mut lb = static_tag(&tlv(&[0xD0, 0x00, 0x00]));
    assert_eq!(
        lb.exec(|rw| rw.t1t_read(1, 4)).unwrap(),
        vec![RwEvent::BlockData {
            status: Status::Ok,
            block: 1,
            data: vec![0x03],
        }]
    );
    assert_eq!(
        lb.exec(|rw| rw.t1t_write(2, 0, 0x5A, true)).unwrap(),
        vec![RwEvent::BlockWritten {
            status: Status::Ok,
            block: 2,
        }]
    );
    assert_eq!(lb.sim.mem[16], 0x5A);
    assert!(lb.rw.t1t_read(1, 9).is_err());
}

#[test]
fn presence_check_uses_rid() {
    let mut lb = static_tag(&tlv(&[]));
    assert_eq!(
        lb.exec(|rw| rw.presence_check()).unwrap(),
        vec![RwEvent::PresenceCheck(Status::Ok)]
    );
}

#[test]
fn dynamic_tag_read_crosses_into_segment_one() {
    let msg = pattern(200);
    let mut lb = dynamic_tag(&[0x03, 200]);
    for (offset, byte) in data_offsets(14).zip(&msg) {
        lb.sim.mem[offset] = *byte;
    }

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.cur_size, 200);
    // 499 bytes after the TLV type, minus blocks 0x0D to 0x0F, minus a
    // three byte length field
    assert_eq!(info.max_size, 472);
    assert!(info.flags.contains(NdefFlags::SOFT_LOCKABLE | NdefFlags::HARD_LOCKABLE));
    // RALL, then READ8 of block 0x0F for the default lock bytes
    assert_eq!(lb.exchanges(), 2);

    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(256)).unwrap()), msg);
    // one RSEG brings in segment 1
    assert_eq!(lb.exchanges(), 3);
}

#[test]
fn dynamic_tag_write_skips_reserved_blocks() {
    let mut lb = dynamic_tag(&tlv(&[0xD0, 0x00, 0x00]));
    lb.sim.mem[DYNAMIC_HOLE].fill(0x5A);
    lb.sim.mem[0x7A..0x80].fill(0x00);
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    let msg = pattern(150);
    assert_eq!(lb.exec(|rw| rw.write_ndef(&msg)).unwrap(), vec![RwEvent::NdefUpdateComplete]);
    assert_eq!(lb.sim.mem[8], 0xE1);
    assert_eq!(lb.sim.mem[12..14], [0x03, 150]);
    assert_eq!(lb.sim.mem[14..0x68], msg[..90]);
    assert!(lb.sim.mem[0x68..0x7A].iter().all(|b| *b == 0x5A));
    assert_eq!(lb.sim.mem[0x80..0x80 + 60], msg[90..]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.cur_size, 150);
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(256)).unwrap()), msg);
}

#[test]
fn control_tlvs_and_dynamic_lock_bits() {
    let mut data = vec![0x01, 0x03, 0xF2, 0x30, 0x33, 0x02, 0x03, 0xF0, 0x02, 0x03];
    data.extend_from_slice(&tlv(&[0xD0, 0x00, 0x00]));
    let mut lb = dynamic_tag(&data);
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.cur_size, 3);
    assert_eq!(info.max_size, 462);
    assert!(!info.flags.contains(NdefFlags::READ_ONLY));

    // bit 0 of the first dynamic lock byte protects bytes 0x80 to 0x87
    lb.sim.mem[0x7A] = 0x01;
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(info.flags.contains(NdefFlags::READ_ONLY));
    assert!(lb.rw.write_ndef(&[0xD0, 0x00, 0x00]).is_err());
}

#[test]
fn dynamic_hard_lock_sets_every_lock_bit() {
    let mut lb = dynamic_tag(&tlv(&[0xD0, 0x00, 0x00]));
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(
        lb.exec(|rw| rw.set_tag_read_only(true)).unwrap(),
        vec![RwEvent::SetReadOnly(Status::Ok)]
    );
    assert_eq!(lb.sim.mem[11], 0x0F);
    assert_eq!(lb.sim.mem[0x70..0x72], [0xFF, 0xFF]);
    assert_eq!(lb.sim.mem[0x7A..0x80], [0xFF; 6]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(info.flags.contains(NdefFlags::READ_ONLY));
}

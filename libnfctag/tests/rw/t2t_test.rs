#[path = "../common/mod.rs"]
mod common;

use common::fixtures::{from_hex, pattern, T2T_UID};
use libnfctag::rw::RwEvent;
use libnfctag::test_support::{Loopback, T2tSim};
use libnfctag::{Error, NdefFlags, Status, TagProtocol};

fn tag(cc: [u8; 4], data: &[u8]) -> Loopback<T2tSim> {
    common::init_logging();
    let mut lb = Loopback::new(T2tSim::new(&T2T_UID, cc, data));
    lb.rw.select_t2t(&T2T_UID).unwrap();
    lb
}

#[test]
fn read_only_tag_reports_message_and_refuses_writes() {
    let mut lb = tag([0xE1, 0x10, 0x06, 0x0F], &from_hex("03 03 61 62 63 FE"));

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.protocol, TagProtocol::T2t);
    assert_eq!(info.cur_size, 3);
    assert_eq!(info.max_size, 46);
    assert!(info.flags.contains(NdefFlags::SUPPORTED | NdefFlags::FORMATED | NdefFlags::READ_ONLY));

    let msg = common::read_back(lb.exec(|rw| rw.read_ndef(64)).unwrap());
    assert_eq!(msg, b"abc");

    assert!(matches!(lb.rw.write_ndef(b"xyz"), Err(Error::Refused(_))));
    assert!(lb.rw.is_idle());
}

#[test]
fn writable_tag_round_trip() {
    let mut lb = tag([0xE1, 0x10, 0x06, 0x00], &from_hex("03 03 61 62 63 FE"));
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(info.flags.contains(NdefFlags::SOFT_LOCKABLE | NdefFlags::HARD_LOCKABLE));
    assert!(!info.flags.contains(NdefFlags::READ_ONLY));

    let msg = pattern(40);
    assert_eq!(lb.exec(|rw| rw.write_ndef(&msg)).unwrap(), vec![RwEvent::NdefUpdateComplete]);
    assert_eq!(lb.sim.mem[16..18], [0x03, 40]);
    assert_eq!(lb.sim.mem[18..58], msg[..]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.cur_size, 40);
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(64)).unwrap()), msg);
}

#[test]
fn oversized_message_is_refused_before_any_frame() {
    let mut lb = tag([0xE1, 0x10, 0x06, 0x00], &from_hex("03 00 FE"));
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    let sent = lb.exchanges();
    assert!(matches!(lb.rw.write_ndef(&pattern(47)), Err(Error::Refused(_))));
    assert!(lb.exec(|_| Ok(())).unwrap().is_empty());
    assert_eq!(lb.exchanges(), sent);
}

#[test]
fn lock_control_bytes_are_skipped() {
    // Lock Control TLV: two lock bytes at offset 40 (page 2 of 16 bytes, byte 8)
    let data = from_hex("01 03 28 10 34 03 03 61 62 63 FE");
    let mut lb = tag([0xE1, 0x10, 0x10, 0x00], &data);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.cur_size, 3);
    // 122 bytes after the NDEF type byte, two of them lock bytes
    assert_eq!(info.max_size, 119);

    let msg = pattern(30);
    assert_eq!(lb.exec(|rw| rw.write_ndef(&msg)).unwrap(), vec![RwEvent::NdefUpdateComplete]);
    assert_eq!(lb.sim.mem[21..23], [0x03, 30]);
    assert_eq!(lb.sim.mem[23..40], msg[..17]);
    assert_eq!(lb.sim.mem[40..42], [0x00, 0x00]);
    assert_eq!(lb.sim.mem[42..55], msg[17..]);

    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(128)).unwrap()), msg);
}

#[test]
fn soft_and_hard_lock() {
    let mut lb = tag([0xE1, 0x10, 0x06, 0x00], &from_hex("03 03 61 62 63 FE"));
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    assert_eq!(
        lb.exec(|rw| rw.set_tag_read_only(true)).unwrap(),
        vec![RwEvent::SetReadOnly(Status::Ok)]
    );
    assert_eq!(lb.sim.mem[15], 0x0F);
    assert_eq!(lb.sim.mem[10..12], [0xFF, 0xFF]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(info.flags.contains(NdefFlags::READ_ONLY));
}

#[test]
fn blank_tag_is_formatted() {
    let mut lb = tag([0x00; 4], &[]);
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_ne!(info.status, Status::Ok);
    assert!(info.flags.contains(NdefFlags::FORMATABLE));

    assert_eq!(lb.exec(|rw| rw.format_ndef()).unwrap(), vec![RwEvent::Format(Status::Ok)]);
    assert_eq!(lb.sim.mem[12..16], [0xE1, 0x10, 0x06, 0x00]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.cur_size, 0);
    assert_eq!(info.max_size, 46);
}

#[test]
fn block_in_second_sector_is_reached_through_sector_select() {
    common::init_logging();
    let mut sim = T2tSim::with_memory(vec![0u8; 2048]);
    let expected = pattern(16);
    sim.mem[1040..1056].copy_from_slice(&expected);
    let mut lb = Loopback::new(sim);
    lb.rw.select_t2t(&T2T_UID).unwrap();

    let events = lb.exec(|rw| rw.t2t_read(260)).unwrap();
    assert_eq!(
        events,
        vec![RwEvent::BlockData {
            status: Status::Ok,
            block: 260,
            data: expected,
        }]
    );
    let frames = lb.exchanges();
    // select, sector number, read
    assert_eq!(frames, 3);
}

#[test]
fn presence_check_reads_block_zero() {
    let mut lb = tag([0xE1, 0x10, 0x06, 0x00], &from_hex("03 00 FE"));
    assert_eq!(
        lb.exec(|rw| rw.presence_check()).unwrap(),
        vec![RwEvent::PresenceCheck(Status::Ok)]
    );
}

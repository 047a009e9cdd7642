#[path = "../common/mod.rs"]
mod common;

use common::fixtures::{from_hex, pattern, I93_UID};
use libnfctag::rw::RwEvent;
use libnfctag::test_support::{I93Sim, Loopback};
use libnfctag::{Error, NdefFlags, Status, TagProtocol};

const BLOCKS: usize = 28;

fn tag(sim: I93Sim) -> Loopback<I93Sim> {
    common::init_logging();
    let mut lb = Loopback::new(sim);
    lb.rw.select_i93(&I93_UID).unwrap();
    lb
}

fn formatted() -> I93Sim {
    I93Sim::new(I93_UID, 4, BLOCKS).load(0, &from_hex("E1 40 0D 00 03 03 61 62 63 FE"))
}

#[test]
fn detect_and_read() {
    let mut lb = tag(formatted());
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.protocol, TagProtocol::I93);
    assert_eq!(info.cur_size, 3);
    // 104 byte data area minus the NDEF type and length bytes
    assert_eq!(info.max_size, 102);
    assert!(info.flags.contains(NdefFlags::SOFT_LOCKABLE | NdefFlags::HARD_LOCKABLE));

    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(16)).unwrap()), b"abc");
}

#[test]
fn read_into_short_buffer_is_refused() {
    let mut lb = tag(formatted());
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(matches!(lb.rw.read_ndef(2), Err(Error::Refused(_))));
    assert!(lb.rw.is_idle());
}

#[test]
fn geometry_from_product_table() {
    let mut sim = formatted();
    sim.system_info = false;
    let mut lb = tag(sim);
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.max_size, 102);
}

#[test]
fn write_round_trip() {
    let mut lb = tag(formatted());
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    let msg = pattern(50);
    assert_eq!(lb.exec(|rw| rw.write_ndef(&msg)).unwrap(), vec![RwEvent::NdefUpdateComplete]);
    assert_eq!(lb.sim.mem[4..6], [0x03, 50]);
    assert_eq!(lb.sim.mem[6..56], msg[..]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.cur_size, 50);
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(128)).unwrap()), msg);
}

#[test]
fn write_to_locked_block_fails() {
    let mut sim = formatted();
    sim.locked[3] = true;
    let mut lb = tag(sim);
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    let events = lb.exec(|rw| rw.write_ndef(&pattern(20))).unwrap();
    assert_eq!(events, vec![RwEvent::NdefUpdateFailed(Status::Failed)]);
    assert!(lb.rw.is_idle());
}

#[test]
fn hard_lock_locks_every_data_block() {
    let mut lb = tag(formatted());
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    assert_eq!(
        lb.exec(|rw| rw.set_tag_read_only(true)).unwrap(),
        vec![RwEvent::SetReadOnly(Status::Ok)]
    );
    assert_ne!(lb.sim.mem[1] & 0x03, 0);
    // data area ends at byte 108, inside block 26
    assert!(lb.sim.locked[..27].iter().all(|l| *l));
    assert!(!lb.sim.locked[27]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(info.flags.contains(NdefFlags::READ_ONLY));
    assert!(matches!(lb.rw.write_ndef(b"x"), Err(Error::Refused(_))));
}

#[test]
fn blank_tag_is_formatted() {
    let mut lb = tag(I93Sim::new(I93_UID, 4, BLOCKS));
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_ne!(info.status, Status::Ok);
    assert!(info.flags.contains(NdefFlags::FORMATABLE));

    assert_eq!(lb.exec(|rw| rw.format_ndef()).unwrap(), vec![RwEvent::Format(Status::Ok)]);
    assert_eq!(lb.sim.mem[..7], from_hex("E1 40 0D 00 03 00 FE")[..]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.cur_size, 0);
}

#[test]
fn single_block_access() {
    let mut lb = tag(formatted());
    assert_eq!(
        lb.exec(|rw| rw.i93_read_single_block(1)).unwrap(),
        vec![RwEvent::BlockData {
            status: Status::Ok,
            block: 1,
            data: vec![0x03, 0x03, 0x61, 0x62],
        }]
    );
    assert_eq!(
        lb.exec(|rw| rw.i93_write_single_block(5, &[1, 2, 3, 4])).unwrap(),
        vec![RwEvent::BlockWritten {
            status: Status::Ok,
            block: 5,
        }]
    );
    assert_eq!(lb.sim.mem[20..24], [1, 2, 3, 4]);
}

#[test]
fn other_uid_never_answers() {
    let mut sim = formatted();
    sim.uid[7] ^= 0xFF;
    let mut lb = tag(sim);
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Timeout);
}

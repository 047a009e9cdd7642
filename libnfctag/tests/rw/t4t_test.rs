#[path = "../common/mod.rs"]
mod common;

use common::fixtures::{from_hex, pattern, uri_record};
use libnfctag::ce::CeEvent;
use libnfctag::protocol::apdu::{T4tCc, T4tVersion};
use libnfctag::rw::RwEvent;
use libnfctag::test_support::{CeLoopback, Loopback};
use libnfctag::{Error, NdefFlags, Status, TagProtocol};

const CAPACITY: usize = 128;

/// Reader facing an emulated Type 4 tag holding `msg`.
fn emulated(read_only: bool, msg: &[u8]) -> CeLoopback {
    common::init_logging();
    let mut lb = CeLoopback::default();
    lb.ce.set_local_ndef(read_only, CAPACITY, msg).unwrap();
    lb.ce.activate_t4t().unwrap();
    lb.rw.select_t4t().unwrap();
    lb.ce.take_events();
    lb
}

#[test]
fn detect_and_read() {
    let record = uri_record("example.org/some/longer/path");
    let mut lb = emulated(false, &record);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.protocol, TagProtocol::T4t);
    assert_eq!(info.cur_size, record.len());
    assert_eq!(info.max_size, CAPACITY);
    assert!(info.flags.contains(NdefFlags::SUPPORTED | NdefFlags::FORMATED));
    assert!(info.flags.contains(NdefFlags::SOFT_LOCKABLE));
    assert!(!info.flags.contains(NdefFlags::READ_ONLY));

    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(CAPACITY)).unwrap()), record);
}

#[test]
fn read_needs_detection() {
    let mut lb = emulated(false, &[]);
    assert_eq!(lb.rw.read_ndef(CAPACITY), Err(Error::NotInitialized));
    assert!(lb.rw.is_idle());
}

#[test]
fn write_spans_several_update_binary_commands() {
    let mut lb = emulated(false, &uri_record("example.org"));
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    // larger than the emulator's MaxLc, so the body takes two commands
    let msg = pattern(100);
    assert_eq!(lb.exec(|rw| rw.write_ndef(&msg)).unwrap(), vec![RwEvent::NdefUpdateComplete]);
    assert_eq!(
        lb.ce.take_events(),
        vec![
            CeEvent::NdefUpdateStart,
            CeEvent::NdefUpdateComplete {
                status: Status::Ok,
                data: msg.clone(),
            },
        ]
    );
    assert!(lb.ce_timer().running().is_none());

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.cur_size, 100);
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(CAPACITY)).unwrap()), msg);
}

#[test]
fn empty_message_only_clears_nlen() {
    let mut lb = emulated(false, &uri_record("example.org"));
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    assert_eq!(lb.exec(|rw| rw.write_ndef(&[])).unwrap(), vec![RwEvent::NdefUpdateComplete]);
    // NLEN 0 alone never commits on the emulator side
    assert_eq!(lb.ce.take_events(), vec![CeEvent::NdefUpdateStart]);
    assert!(lb.ce.local_ndef().is_updating());
}

#[test]
fn oversized_message_is_refused() {
    let mut lb = emulated(false, &[]);
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(matches!(lb.rw.write_ndef(&pattern(CAPACITY + 1)), Err(Error::Refused(_))));
    assert!(lb.ce.take_events().is_empty());
}

#[test]
fn read_only_emulation() {
    let mut lb = emulated(true, &uri_record("example.org"));
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(info.flags.contains(NdefFlags::READ_ONLY));
    assert!(!info.flags.contains(NdefFlags::SOFT_LOCKABLE));
    assert!(matches!(lb.rw.write_ndef(b"x"), Err(Error::Refused(_))));
}

#[test]
fn emulator_refuses_cc_update() {
    let mut lb = emulated(false, &uri_record("example.org"));
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(
        lb.exec(|rw| rw.set_tag_read_only(false)).unwrap(),
        vec![RwEvent::SetReadOnly(Status::Failed)]
    );
    assert!(!lb.ce.local_ndef().is_read_only());
    assert!(lb.rw.is_idle());
}

#[test]
fn format_is_not_supported() {
    let mut lb = emulated(false, &[]);
    assert!(matches!(lb.rw.format_ndef(), Err(Error::NotSupported(_))));
}

#[test]
fn presence_check_reads_the_selected_file() {
    let mut lb = emulated(false, &uri_record("example.org"));
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(
        lb.exec(|rw| rw.presence_check()).unwrap(),
        vec![RwEvent::PresenceCheck(Status::Ok)]
    );
}

#[test]
fn invalid_capability_container_fails_detection() {
    common::init_logging();
    // every command succeeds, but the CC read returns no data
    let mut lb = Loopback::new(|_: &[u8]| Some(vec![0x90, 0x00]));
    lb.rw.select_t4t().unwrap();
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Failed);
    assert_eq!(info.protocol, TagProtocol::T4t);
}

#[test]
fn capability_container_validation() {
    let good = from_hex("00 0F 20 00 3B 00 34 04 06 E1 04 00 82 00 00");
    let cc = T4tCc::parse(&good, T4tVersion::V2).unwrap();
    assert_eq!(cc.ndef_fc.max_file_size, 0x82);
    assert_eq!(cc.encode(), good);

    // mapping version must match the selected application
    assert!(matches!(T4tCc::parse(&good, T4tVersion::V1), Err(Error::InvalidCc(_))));

    let mut reserved_id = good.clone();
    reserved_id[9..11].copy_from_slice(&[0xE1, 0x03]);
    assert!(matches!(T4tCc::parse(&reserved_id, T4tVersion::V2), Err(Error::InvalidCc(_))));

    let mut small_le = good.clone();
    small_le[3..5].copy_from_slice(&[0x00, 0x0E]);
    assert!(matches!(T4tCc::parse(&small_le, T4tVersion::V2), Err(Error::InvalidCc(_))));

    let mut locked = good;
    locked[14] = 0xFF;
    assert!(T4tCc::parse(&locked, T4tVersion::V2).unwrap().is_read_only());
}

#[test]
fn file_size_is_limited_to_short_offsets() {
    common::init_logging();
    let cc = from_hex("00 0F 20 00 3B 00 34 04 06 E1 04 FF FE 00 00");
    let mut selected = 0u16;
    let mut lb = Loopback::new(move |apdu: &[u8]| match *apdu.get(1)? {
        // SELECT by file identifier
        0xA4 if apdu.get(2) == Some(&0x00) => {
            selected = u16::from_be_bytes([*apdu.get(5)?, *apdu.get(6)?]);
            Some(vec![0x90, 0x00])
        }
        0xA4 => Some(vec![0x90, 0x00]),
        0xB0 if selected == 0xE103 => {
            let mut rsp = cc.clone();
            rsp.extend_from_slice(&[0x90, 0x00]);
            Some(rsp)
        }
        0xB0 => Some(vec![0x00, 0x00, 0x90, 0x00]),
        _ => Some(vec![0x6D, 0x00]),
    });
    lb.rw.select_t4t().unwrap();

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.cur_size, 0);
    // 0x8000 byte file minus NLEN
    assert_eq!(info.max_size, 0x7FFE);
    assert!(matches!(lb.rw.write_ndef(&[0u8; 0x7FFF]), Err(Error::Refused(_))));
    assert!(lb.rw.is_idle());
}

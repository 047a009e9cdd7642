#[path = "../common/mod.rs"]
mod common;

use common::fixtures::{pattern, sample_idm, sample_pmm, uri_record};
use libnfctag::ce::CeEvent;
use libnfctag::config::{CeConfig, RwConfig};
use libnfctag::rw::RwEvent;
use libnfctag::test_support::CeLoopback;
use libnfctag::{Error, NdefFlags, Status, SystemCode, TagProtocol};

/// Reader facing an emulated Type 3 tag holding `msg`.
fn emulated(read_only: bool, msg: &[u8]) -> CeLoopback {
    common::init_logging();
    let mut lb = CeLoopback::default();
    lb.ce.set_local_ndef(read_only, 64, msg).unwrap();
    lb.ce.activate_t3t(sample_idm()).unwrap();
    lb.rw
        .select_t3t(sample_idm(), sample_pmm(), SystemCode::NDEF)
        .unwrap();
    lb.ce.take_events();
    lb
}

#[test]
fn detect_and_read() {
    let record = uri_record("example.com");
    let mut lb = emulated(false, &record);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.protocol, TagProtocol::T3t);
    assert_eq!(info.cur_size, record.len());
    assert_eq!(info.max_size, 64);
    assert!(info.flags.contains(NdefFlags::SOFT_LOCKABLE | NdefFlags::HARD_LOCKABLE));

    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(64)).unwrap()), record);
}

#[test]
fn write_is_bracketed_by_writef() {
    let mut lb = emulated(false, &uri_record("example.com"));
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    let msg = pattern(40);
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
    assert_eq!(lb.ce.local_ndef().message(), &msg[..]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.cur_size, 40);
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(64)).unwrap()), msg);
}

#[test]
fn message_larger_than_capacity_is_refused() {
    let mut lb = emulated(false, &[]);
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(matches!(lb.rw.write_ndef(&pattern(65)), Err(Error::Refused(_))));
}

#[test]
fn read_only_emulation() {
    let mut lb = emulated(true, &uri_record("example.com"));
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(info.flags.contains(NdefFlags::READ_ONLY));
    assert!(matches!(lb.rw.write_ndef(b"x"), Err(Error::Refused(_))));
}

#[test]
fn soft_lock_marks_local_ndef_read_only() {
    let record = uri_record("example.com");
    let mut lb = emulated(false, &record);
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    assert_eq!(
        lb.exec(|rw| rw.set_tag_read_only(false)).unwrap(),
        vec![RwEvent::SetReadOnly(Status::Ok)]
    );
    assert!(lb.ce.local_ndef().is_read_only());
    assert_eq!(lb.ce.local_ndef().message(), &record[..]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(info.flags.contains(NdefFlags::READ_ONLY));
}

#[test]
fn memory_configuration_is_not_emulated() {
    let mut lb = emulated(false, &[]);
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    // the attribute block is locked before the MC block read is refused
    assert_eq!(
        lb.exec(|rw| rw.set_tag_read_only(true)).unwrap(),
        vec![RwEvent::SetReadOnly(Status::Failed)]
    );
    assert!(lb.ce.local_ndef().is_read_only());

    assert_eq!(lb.exec(|rw| rw.format_ndef()).unwrap(), vec![RwEvent::Format(Status::Failed)]);
}

#[test]
fn poll_is_left_to_the_application() {
    let mut lb = emulated(false, &[]);
    assert_eq!(
        lb.exec(|rw| rw.presence_check()).unwrap(),
        vec![RwEvent::PresenceCheck(Status::Timeout)]
    );
    assert!(lb
        .ce
        .take_events()
        .iter()
        .all(|ev| matches!(ev, CeEvent::RawFrame(f) if f[1] == 0x00)));
}

#[test]
fn large_nbw_is_split_to_fit_the_frame() {
    common::init_logging();
    let config = CeConfig {
        t3t_nbr: 15,
        t3t_nbw: 15,
        ..CeConfig::default()
    };
    let mut lb = CeLoopback::new(RwConfig::default(), config);
    lb.ce.set_local_ndef(false, 480, &uri_record("example.com")).unwrap();
    lb.ce.activate_t3t(sample_idm()).unwrap();
    lb.rw
        .select_t3t(sample_idm(), sample_pmm(), SystemCode::NDEF)
        .unwrap();
    lb.ce.take_events();
    assert_eq!(common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap()).max_size, 480);

    let msg = pattern(240);
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
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(480)).unwrap()), msg);
}

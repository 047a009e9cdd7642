#[path = "../common/mod.rs"]
mod common;

use common::fixtures::{pattern, MFC_SAK_1K, MFC_UID};
use libnfctag::protocol::mfc::{MFC_ACCESS_NDEF_RW, MFC_KEY_MAD, MFC_KEY_NDEF};
use libnfctag::rw::RwEvent;
use libnfctag::test_support::{Loopback, MfcSim};
use libnfctag::{Error, NdefFlags, Status, TagProtocol};

fn card(sak: u8) -> Loopback<MfcSim> {
    common::init_logging();
    let mut lb = Loopback::new(MfcSim::new(sak).unwrap());
    lb.rw.select_mfc(&MFC_UID, sak).unwrap();
    lb
}

fn formatted_1k() -> Loopback<MfcSim> {
    let mut lb = card(MFC_SAK_1K);
    assert_eq!(lb.exec(|rw| rw.format_ndef()).unwrap(), vec![RwEvent::Format(Status::Ok)]);
    lb
}

#[test]
fn transport_configured_card_has_no_ndef() {
    let mut lb = card(MFC_SAK_1K);
    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.protocol, TagProtocol::Mfc);
    assert_eq!(info.status, Status::Failed);
}

#[test]
fn format_then_detect() {
    let mut lb = formatted_1k();
    assert_eq!(lb.sim.block(3)[..6], MFC_KEY_MAD);
    assert_eq!(lb.sim.block(4)[..3], [0x03, 0x00, 0xFE]);
    assert_eq!(lb.sim.block(7)[..6], MFC_KEY_NDEF);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.cur_size, 0);
    // 15 sectors of 48 data bytes, minus the NDEF type and long length field
    assert_eq!(info.max_size, 716);
    assert!(info.flags.contains(NdefFlags::SOFT_LOCKABLE));
    assert!(!info.flags.contains(NdefFlags::READ_ONLY));
}

#[test]
fn message_skips_sector_trailers() {
    let mut lb = formatted_1k();
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    let msg = pattern(60);
    assert_eq!(lb.exec(|rw| rw.write_ndef(&msg)).unwrap(), vec![RwEvent::NdefUpdateComplete]);
    assert_eq!(lb.sim.block(4)[..2], [0x03, 60]);
    assert_eq!(lb.sim.block(7)[6..10], MFC_ACCESS_NDEF_RW);
    // 46 bytes fit in blocks 4 to 6, the rest continues in block 8
    assert_eq!(lb.sim.block(8)[..14], msg[46..]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.cur_size, 60);
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(1024)).unwrap()), msg);
}

#[test]
fn read_only_trailers() {
    let mut lb = formatted_1k();
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());

    assert!(matches!(lb.rw.set_tag_read_only(true), Err(Error::NotSupported(_))));
    assert_eq!(
        lb.exec(|rw| rw.set_tag_read_only(false)).unwrap(),
        vec![RwEvent::SetReadOnly(Status::Ok)]
    );

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert!(info.flags.contains(NdefFlags::READ_ONLY));
    assert!(matches!(lb.rw.write_ndef(b"x"), Err(Error::Refused(_))));
}

#[test]
fn presence_check_authenticates() {
    let mut lb = formatted_1k();
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(
        lb.exec(|rw| rw.presence_check()).unwrap(),
        vec![RwEvent::PresenceCheck(Status::Ok)]
    );
}

#[test]
fn classic_4k_uses_both_directories() {
    let mut lb = card(0x18);
    assert_eq!(lb.exec(|rw| rw.format_ndef()).unwrap(), vec![RwEvent::Format(Status::Ok)]);

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(info.cur_size, 0);
    assert!(info.max_size > 1024);

    let msg = pattern(300);
    assert_eq!(lb.exec(|rw| rw.write_ndef(&msg)).unwrap(), vec![RwEvent::NdefUpdateComplete]);
    common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(1024)).unwrap()), msg);
}

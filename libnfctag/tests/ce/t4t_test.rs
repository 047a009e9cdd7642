#[path = "../common/mod.rs"]
mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::fixtures::{from_hex, uri_record};
use libnfctag::ce::{AidEvent, AidHandler, CardEmulator, CeEvent};
use libnfctag::config::CeConfig;
use libnfctag::protocol::apdu::{T4T_DEFAULT_NDEF_FILE_ID, T4tVersion};
use libnfctag::protocol::{T4tCommand, WireCommand};
use libnfctag::test_support::CeLoopback;
use libnfctag::transport::{MockTimer, MockTransport};
use libnfctag::{Error, Status, TagProtocol};

const PAYMENT_AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10];

type Log = Rc<RefCell<Vec<(AidEvent, Vec<u8>)>>>;

fn emulator() -> (CardEmulator, MockTransport, MockTimer) {
    common::init_logging();
    let t = MockTransport::new();
    let q = MockTimer::new();
    let mut ce = CardEmulator::new(Box::new(t.clone()), Box::new(q.clone()), CeConfig::default());
    ce.set_local_ndef(false, 64, &uri_record("example.net")).unwrap();
    ce.activate_t4t().unwrap();
    assert_eq!(ce.take_events(), vec![CeEvent::Activated(TagProtocol::T4t)]);
    (ce, t, q)
}

/// Handler recording every call and answering `reply` to data APDUs.
fn recorder(log: &Log, reply: &'static [u8]) -> Box<dyn AidHandler> {
    let log = log.clone();
    Box::new(move |event: AidEvent, frame: &[u8]| {
        log.borrow_mut().push((event, frame.to_vec()));
        match event {
            AidEvent::Data => Some(reply.to_vec()),
            _ => None,
        }
    })
}

fn select_aid(aid: &[u8]) -> Vec<u8> {
    let mut apdu = vec![0x00, 0xA4, 0x04, 0x00, aid.len() as u8];
    apdu.extend_from_slice(aid);
    apdu.push(0x00);
    apdu
}

fn exchange(ce: &mut CardEmulator, t: &MockTransport, frame: &[u8]) -> Vec<u8> {
    ce.on_data(frame);
    t.take_sent().pop().unwrap_or_default()
}

#[test]
fn registered_application_gets_its_apdus() {
    let (mut ce, t, _) = emulator();
    let log = Log::default();
    ce.register_aid(&PAYMENT_AID, recorder(&log, &[0x6F, 0x00, 0x90, 0x00]))
        .unwrap();

    assert_eq!(exchange(&mut ce, &t, &select_aid(&PAYMENT_AID)), vec![0x90, 0x00]);
    let gpo = from_hex("80 A8 00 00 02 83 00 00");
    assert_eq!(exchange(&mut ce, &t, &gpo), vec![0x6F, 0x00, 0x90, 0x00]);

    let log = log.borrow();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0], (AidEvent::Selected, select_aid(&PAYMENT_AID)));
    assert_eq!(log[1], (AidEvent::Data, gpo));
}

#[test]
fn wildcard_takes_unmatched_selects() {
    let (mut ce, t, _) = emulator();
    let exact = Log::default();
    let wild = Log::default();
    ce.register_aid(&PAYMENT_AID, recorder(&exact, &[0x90, 0x00])).unwrap();
    ce.register_aid(&[], recorder(&wild, &[0x90, 0x00])).unwrap();

    let other = [0xF0, 0x01, 0x02, 0x03, 0x04, 0x05];
    assert_eq!(exchange(&mut ce, &t, &select_aid(&other)), vec![0x90, 0x00]);
    assert!(exact.borrow().is_empty());
    assert_eq!(wild.borrow()[0].0, AidEvent::Selected);
}

#[test]
fn selecting_another_application_deactivates_the_previous_one() {
    let (mut ce, t, _) = emulator();
    let log = Log::default();
    ce.register_aid(&PAYMENT_AID, recorder(&log, &[0x90, 0x00])).unwrap();
    exchange(&mut ce, &t, &select_aid(&PAYMENT_AID));

    // the NDEF application is still served while an AID is registered
    let ndef_app = T4tCommand::SelectApp(T4tVersion::V2).encode().unwrap();
    assert_eq!(exchange(&mut ce, &t, &ndef_app), vec![0x90, 0x00]);
    assert_eq!(log.borrow().last().map(|e| e.0), Some(AidEvent::Deactivated));
}

#[test]
fn link_loss_is_reported_to_the_selected_application() {
    let (mut ce, t, _) = emulator();
    let log = Log::default();
    ce.register_aid(&PAYMENT_AID, recorder(&log, &[0x90, 0x00])).unwrap();
    exchange(&mut ce, &t, &select_aid(&PAYMENT_AID));

    ce.on_deactivated();
    assert_eq!(log.borrow().last().map(|e| e.0), Some(AidEvent::Deactivated));
    assert_eq!(ce.take_events(), vec![CeEvent::Deactivated]);
}

#[test]
fn deregistered_application_is_no_longer_routed() {
    let (mut ce, t, _) = emulator();
    let log = Log::default();
    let handle = ce
        .register_aid(&PAYMENT_AID, recorder(&log, &[0x90, 0x00]))
        .unwrap();
    exchange(&mut ce, &t, &select_aid(&PAYMENT_AID));
    ce.deregister_aid(handle).unwrap();
    assert!(ce.deregister_aid(handle).is_err());

    assert_eq!(exchange(&mut ce, &t, &select_aid(&PAYMENT_AID)), vec![0x6A, 0x82]);
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn aid_registration_limits() {
    let (mut ce, _, _) = emulator();
    let log = Log::default();
    assert!(matches!(
        ce.register_aid(&[0xA0, 0x00, 0x00, 0x00], recorder(&log, &[])),
        Err(Error::InvalidLength { .. })
    ));
    for last in 0..4u8 {
        ce.register_aid(&[0xA0, 0x00, 0x00, 0x01, last], recorder(&log, &[]))
            .unwrap();
    }
    assert!(matches!(
        ce.register_aid(&[0xA0, 0x00, 0x00, 0x02, 0x00], recorder(&log, &[])),
        Err(Error::Refused(_))
    ));
}

fn start_update(ce: &mut CardEmulator, t: &MockTransport) {
    exchange(ce, t, &T4tCommand::SelectApp(T4tVersion::V2).encode().unwrap());
    let select_ndef = T4tCommand::SelectFile {
        version: T4tVersion::V2,
        file_id: T4T_DEFAULT_NDEF_FILE_ID,
    };
    assert_eq!(exchange(ce, t, &select_ndef.encode().unwrap()), vec![0x90, 0x00]);
    let clear = T4tCommand::UpdateBinary {
        offset: 0,
        data: vec![0x00, 0x00],
    };
    assert_eq!(exchange(ce, t, &clear.encode().unwrap()), vec![0x90, 0x00]);
    assert_eq!(ce.take_events(), vec![CeEvent::NdefUpdateStart]);
}

#[test]
fn stalled_update_times_out() {
    let (mut ce, t, q) = emulator();
    start_update(&mut ce, &t);
    assert_eq!(q.running(), Some(CeConfig::default().t4t_update_timeout_ms));

    ce.on_timeout();
    assert_eq!(ce.take_events(), vec![CeEvent::NdefUpdateAbort]);
    assert_eq!(ce.local_ndef().message(), &uri_record("example.net")[..]);
    // a second expiry has nothing left to abort
    ce.on_timeout();
    assert!(ce.take_events().is_empty());
}

#[test]
fn link_loss_during_update_keeps_the_old_message() {
    let (mut ce, t, q) = emulator();
    start_update(&mut ce, &t);
    ce.on_deactivated();
    assert_eq!(ce.take_events(), vec![CeEvent::NdefUpdateAbort, CeEvent::Deactivated]);
    assert!(q.running().is_none());
    assert!(!ce.local_ndef().is_updating());
}

#[test]
fn nlen_beyond_the_file_is_rejected() {
    let (mut ce, t, _) = emulator();
    start_update(&mut ce, &t);
    let nlen = T4tCommand::UpdateBinary {
        offset: 0,
        data: vec![0x00, 0x41],
    };
    assert_eq!(exchange(&mut ce, &t, &nlen.encode().unwrap()), vec![0x67, 0x00]);
    assert_eq!(ce.take_events(), vec![CeEvent::NdefUpdateAbort]);
}

#[test]
fn update_past_the_ndef_file_is_a_wrong_offset() {
    let (mut ce, t, _) = emulator();
    exchange(&mut ce, &t, &T4tCommand::SelectApp(T4tVersion::V2).encode().unwrap());
    let select_ndef = T4tCommand::SelectFile {
        version: T4tVersion::V2,
        file_id: T4T_DEFAULT_NDEF_FILE_ID,
    };
    assert_eq!(exchange(&mut ce, &t, &select_ndef.encode().unwrap()), vec![0x90, 0x00]);

    // 64 byte capacity plus NLEN ends the file at offset 66
    let update = T4tCommand::UpdateBinary {
        offset: 66,
        data: vec![0xAA],
    };
    assert_eq!(exchange(&mut ce, &t, &update.encode().unwrap()), vec![0x6B, 0x00]);
    assert!(ce.take_events().is_empty());
    assert!(!ce.local_ndef().is_updating());
    assert_eq!(ce.local_ndef().message(), &uri_record("example.net")[..]);
}

#[test]
fn reader_and_aid_handler_share_the_emulator() {
    common::init_logging();
    let mut lb = CeLoopback::default();
    let record = uri_record("example.net");
    lb.ce.set_local_ndef(false, 64, &record).unwrap();
    let log = Log::default();
    lb.ce.register_aid(&[], recorder(&log, &[0x90, 0x00])).unwrap();
    lb.ce.activate_t4t().unwrap();
    lb.rw.select_t4t().unwrap();

    let info = common::detected(lb.exec(|rw| rw.detect_ndef()).unwrap());
    assert_eq!(info.status, Status::Ok);
    assert_eq!(common::read_back(lb.exec(|rw| rw.read_ndef(64)).unwrap()), record);
    assert!(log.borrow().is_empty());
}

#[path = "../common/mod.rs"]
mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::fixtures::{
    I93_UID, MFC_SAK_1K, MFC_UID, T1T_UID, T2T_UID, pattern, sample_idm, sample_pmm,
};
use libnfctag::config::RwConfig;
use libnfctag::protocol::NdefAttributes;
use libnfctag::protocol::t3t::{self, T3T_MAX_FRAME_LEN, T3T_RSP_CHECK, T3T_RSP_UPDATE};
use libnfctag::rw::{ReaderWriter, RwEvent, RwState};
use libnfctag::test_support::{Loopback, T2tSim};
use libnfctag::transport::{ConnEvent, MockTimer, MockTransport};
use libnfctag::{Error, Status, SystemCode, TagProtocol};

type Select = fn(&mut ReaderWriter) -> libnfctag::Result<()>;

fn every_tag_type() -> Vec<(TagProtocol, Select)> {
    vec![
        (TagProtocol::T1t, |rw| rw.select_t1t([0x11, 0x48], &T1T_UID)),
        (TagProtocol::T2t, |rw| rw.select_t2t(&T2T_UID)),
        (TagProtocol::T3t, |rw| {
            rw.select_t3t(sample_idm(), sample_pmm(), SystemCode::NDEF)
        }),
        (TagProtocol::T4t, |rw| rw.select_t4t()),
        (TagProtocol::I93, |rw| rw.select_i93(&I93_UID)),
        (TagProtocol::Mfc, |rw| rw.select_mfc(&MFC_UID, MFC_SAK_1K)),
    ]
}

fn silent(_: &[u8]) -> Option<Vec<u8>> {
    None
}

fn reader() -> (ReaderWriter, MockTransport, MockTimer) {
    common::init_logging();
    let t = MockTransport::new();
    let timer = MockTimer::new();
    let rw = ReaderWriter::new(Box::new(t.clone()), Box::new(timer.clone()), RwConfig::default());
    (rw, t, timer)
}

fn failed_detect(events: Vec<RwEvent>) -> Status {
    let info = common::detected(events);
    assert_eq!(info.protocol, TagProtocol::T2t);
    assert_eq!(info.cur_size, 0);
    info.status
}

#[test]
fn operations_need_an_activated_tag() {
    let (mut rw, t, _) = reader();
    assert_eq!(rw.detect_ndef(), Err(Error::NotInitialized));
    assert_eq!(rw.send_raw_frame(&[0x30, 0x00]), Err(Error::NotInitialized));
    assert_eq!(rw.state(), RwState::NotActivated);
    assert_eq!(t.sent_count(), 0);
}

#[test]
fn second_operation_is_rejected_while_busy() {
    for (protocol, select) in every_tag_type() {
        let (mut rw, t, timer) = reader();
        select(&mut rw).unwrap();
        assert_eq!(rw.protocol(), Some(protocol));
        rw.detect_ndef().unwrap();
        assert_eq!(rw.state(), RwState::DetectNdef, "{}", protocol);
        assert!(timer.running().is_some(), "{}", protocol);

        assert_eq!(rw.detect_ndef(), Err(Error::Busy), "{}", protocol);
        assert_eq!(rw.read_ndef(64), Err(Error::Busy), "{}", protocol);
        assert_eq!(rw.write_ndef(&[0xD0, 0x00, 0x00]), Err(Error::Busy), "{}", protocol);
        assert_eq!(rw.set_tag_read_only(false), Err(Error::Busy), "{}", protocol);
        assert_eq!(rw.format_ndef(), Err(Error::Busy), "{}", protocol);
        assert_eq!(rw.presence_check(), Err(Error::Busy), "{}", protocol);
        assert_eq!(rw.send_raw_frame(&[0x30, 0x00]), Err(Error::Busy), "{}", protocol);
        assert_eq!(t.sent_count(), 1, "{}", protocol);
        assert_eq!(rw.state(), RwState::DetectNdef, "{}", protocol);
    }
}

#[test]
fn t3t_transfers_fit_the_length_byte() {
    let (mut rw, t, _) = reader();
    let idm = sample_idm();
    rw.select_t3t(idm, sample_pmm(), SystemCode::NDEF).unwrap();

    // Nbr and Nbw of 15 blocks: a 15 block UPDATE would need 284 bytes
    let attr = NdefAttributes {
        version: 0x10,
        nbr: 15,
        nbw: 15,
        nmaxb: 30,
        writef: 0x00,
        rwflag: 0x01,
        ln: 0,
    };
    rw.detect_ndef().unwrap();
    t.take_sent();
    let mut payload = vec![0x01];
    payload.extend_from_slice(&attr.encode());
    rw.on_data(&t3t::encode_response(T3T_RSP_CHECK, &idm, 0, 0, &payload).unwrap());
    assert_eq!(common::detected(rw.take_events()).max_size, 480);

    let ok = t3t::encode_response(T3T_RSP_UPDATE, &idm, 0, 0, &[]).unwrap();
    rw.write_ndef(&pattern(240)).unwrap();
    let mut blocks_per_frame = Vec::new();
    while rw.state() == RwState::WriteNdef {
        let sent = t.take_sent();
        assert_eq!(sent.len(), 1);
        let frame = &sent[0];
        assert!(frame.len() <= T3T_MAX_FRAME_LEN);
        assert_eq!(frame[0] as usize, frame.len());
        blocks_per_frame.push(frame[13]);
        rw.on_data(&ok);
    }
    assert_eq!(rw.take_events(), vec![RwEvent::NdefUpdateComplete]);
    // attribute block, 13 + 2 data blocks, attribute block
    assert_eq!(blocks_per_frame, vec![1, 13, 2, 1]);

    rw.read_ndef(480).unwrap();
    assert_eq!(t.take_sent()[0][13], 15);
}

#[test]
fn silent_tag_is_retried_then_times_out() {
    common::init_logging();
    let mut lb = Loopback::new(silent);
    lb.rw.select_t2t(&T2T_UID).unwrap();

    let events = lb.exec(|rw| rw.detect_ndef()).unwrap();
    assert_eq!(failed_detect(events), Status::Timeout);
    // first attempt plus the configured retransmissions
    assert_eq!(lb.exchanges(), 1 + RwConfig::default().max_retries as usize);
    assert!(lb.timer().running().is_none());
    assert!(lb.rw.is_idle());
}

#[test]
fn retry_count_follows_configuration() {
    common::init_logging();
    let config = RwConfig {
        max_retries: 0,
        ..RwConfig::default()
    };
    let mut lb = Loopback::with_config(silent, config);
    lb.rw.select_t2t(&T2T_UID).unwrap();
    let events = lb.exec(|rw| rw.presence_check()).unwrap();
    assert_eq!(events, vec![RwEvent::PresenceCheck(Status::Timeout)]);
    assert_eq!(lb.exchanges(), 1);
}

#[test]
fn retransmission_repeats_the_frame() {
    let (mut rw, t, _) = reader();
    rw.select_t2t(&T2T_UID).unwrap();
    rw.detect_ndef().unwrap();
    let first = t.take_sent();
    rw.on_timeout();
    assert_eq!(t.take_sent(), first);
    assert_eq!(rw.retries(), 1);

    // an answer ends supervision of that request
    rw.on_data(&[0u8; 16]);
    assert_eq!(rw.retries(), 0);
}

#[test]
fn failed_retransmission_fails_the_operation() {
    let (mut rw, t, _) = reader();
    rw.select_t2t(&T2T_UID).unwrap();
    rw.detect_ndef().unwrap();
    t.set_send_failures(1);
    rw.on_timeout();
    assert_eq!(failed_detect(rw.take_events()), Status::Failed);
    assert!(rw.is_idle());
}

#[test]
fn send_failure_leaves_the_tag_idle() {
    let (mut rw, t, timer) = reader();
    rw.select_t2t(&T2T_UID).unwrap();
    t.set_send_failures(1);
    assert!(matches!(rw.detect_ndef(), Err(Error::Transport(_))));
    assert!(rw.is_idle());
    assert!(timer.running().is_none());
    assert!(rw.take_events().is_empty());
}

#[test]
fn deactivation_fails_the_running_operation() {
    let (mut rw, _, timer) = reader();
    rw.select_t2t(&T2T_UID).unwrap();
    rw.detect_ndef().unwrap();

    rw.handle_conn_event(ConnEvent::Deactivated);
    assert_eq!(failed_detect(rw.take_events()), Status::Failed);
    assert_eq!(rw.state(), RwState::NotActivated);
    assert_eq!(rw.protocol(), None);
    assert!(timer.running().is_none());
}

#[test]
fn connection_error_keeps_the_tag() {
    let (mut rw, _, _) = reader();
    rw.select_t2t(&T2T_UID).unwrap();
    rw.presence_check().unwrap();
    rw.handle_conn_event(ConnEvent::Error);
    assert_eq!(rw.take_events(), vec![RwEvent::PresenceCheck(Status::Failed)]);
    assert_eq!(rw.protocol(), Some(TagProtocol::T2t));
    assert!(rw.is_idle());
}

#[test]
fn raw_frames_round_trip() {
    common::init_logging();
    let mut sim = T2tSim::with_memory(vec![0u8; 64]);
    sim.mem[..4].copy_from_slice(&[1, 2, 3, 4]);
    let mut lb = Loopback::new(sim);
    lb.rw.select_t2t(&T2T_UID).unwrap();

    let events = lb.exec(|rw| rw.send_raw_frame(&[0x30, 0x00])).unwrap();
    match events.as_slice() {
        [RwEvent::RawFrame { status, data }] => {
            assert_eq!(*status, Status::Ok);
            assert_eq!(data.len(), 16);
            assert_eq!(data[..4], [1, 2, 3, 4]);
        }
        other => panic!("unexpected events {:?}", other),
    }
    assert!(lb.timer().running().is_none());
    assert!(matches!(lb.rw.send_raw_frame(&[]), Err(Error::Refused(_))));
}

#[test]
fn unsolicited_data_is_reported_raw() {
    let (mut rw, _, _) = reader();
    rw.select_t2t(&T2T_UID).unwrap();
    rw.handle_conn_event(ConnEvent::Data(vec![0xAA, 0x55]));
    assert_eq!(
        rw.take_events(),
        vec![RwEvent::RawFrame {
            status: Status::Ok,
            data: vec![0xAA, 0x55],
        }]
    );
}

#[test]
fn client_receives_events_in_order() {
    let (mut rw, _, _) = reader();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    rw.set_client(move |ev| sink.borrow_mut().push(ev));

    rw.select_t2t(&T2T_UID).unwrap();
    rw.on_data(&[0x01]);
    rw.presence_check().unwrap();
    rw.on_data(&[0u8; 16]);

    assert!(rw.take_events().is_empty());
    assert_eq!(
        *seen.borrow(),
        vec![
            RwEvent::RawFrame {
                status: Status::Ok,
                data: vec![0x01],
            },
            RwEvent::PresenceCheck(Status::Ok),
        ]
    );
}

#[test]
fn block_access_is_tag_type_specific() {
    let (mut rw, _, _) = reader();
    rw.select_t2t(&T2T_UID).unwrap();
    assert!(matches!(rw.t1t_read(0, 0), Err(Error::NotSupported(_))));
    assert!(matches!(rw.i93_read_single_block(0), Err(Error::NotSupported(_))));
    assert!(rw.is_idle());
}

#[path = "../common/mod.rs"]
mod common;

use common::fixtures::sample_idm;
use libnfctag::ce::{CardEmulator, CeEvent};
use libnfctag::config::CeConfig;
use libnfctag::protocol::t3t::{T3T_WRITEF_OFF, T3T_WRITEF_ON};
use libnfctag::protocol::{NdefAttributes, T3tCommand, WireCommand};
use libnfctag::transport::{ConnEvent, MockTimer, MockTransport};
use libnfctag::{BlockElement, ServiceCode, Status, TagProtocol};

const MSG: &[u8] = b"hello";

fn emulator(read_only: bool) -> (CardEmulator, MockTransport) {
    emulator_with(read_only, CeConfig::default())
}

fn emulator_with(read_only: bool, config: CeConfig) -> (CardEmulator, MockTransport) {
    common::init_logging();
    let t = MockTransport::new();
    let mut ce = CardEmulator::new(Box::new(t.clone()), Box::new(MockTimer::new()), config);
    ce.set_local_ndef(read_only, 64, MSG).unwrap();
    ce.activate_t3t(sample_idm()).unwrap();
    assert_eq!(ce.take_events(), vec![CeEvent::Activated(TagProtocol::T3t)]);
    (ce, t)
}

fn attributes(writef: u8, ln: u32) -> Vec<u8> {
    NdefAttributes {
        version: 0x10,
        nbr: 4,
        nbw: 1,
        nmaxb: 4,
        writef,
        rwflag: 0x01,
        ln,
    }
    .encode()
    .to_vec()
}

/// UPDATE one block through `service`, returning the status flags.
fn update(ce: &mut CardEmulator, t: &MockTransport, service: ServiceCode, block: u16, data: Vec<u8>) -> [u8; 2] {
    update_blocks(ce, t, service, &[block], data)
}

fn update_blocks(ce: &mut CardEmulator, t: &MockTransport, service: ServiceCode, blocks: &[u16], data: Vec<u8>) -> [u8; 2] {
    let cmd = T3tCommand::Update {
        idm: sample_idm(),
        services: vec![service],
        blocks: blocks.iter().map(|b| BlockElement::new(0, *b)).collect(),
        data,
    };
    ce.on_data(&cmd.encode().unwrap());
    let rsp = t.take_sent().pop().unwrap();
    assert_eq!(rsp[1], 0x09);
    [rsp[10], rsp[11]]
}

/// CHECK one block, returning its 16 bytes.
fn check(ce: &mut CardEmulator, t: &MockTransport, block: u16) -> Vec<u8> {
    let cmd = T3tCommand::Check {
        idm: sample_idm(),
        services: vec![ServiceCode::NDEF_RO],
        blocks: vec![BlockElement::new(0, block)],
    };
    ce.on_data(&cmd.encode().unwrap());
    let rsp = t.take_sent().pop().unwrap();
    assert_eq!(rsp[10..13], [0x00, 0x00, 0x01]);
    rsp[13..29].to_vec()
}

#[test]
fn update_cycle_replaces_the_message() {
    let (mut ce, t) = emulator(false);

    assert_eq!(update(&mut ce, &t, ServiceCode::NDEF_RW, 0, attributes(T3T_WRITEF_ON, 5)), [0, 0]);
    assert_eq!(ce.take_events(), vec![CeEvent::NdefUpdateStart]);
    assert!(ce.local_ndef().is_updating());

    assert_eq!(update(&mut ce, &t, ServiceCode::NDEF_RW, 1, vec![0xAA; 16]), [0, 0]);
    // the reader sees the block it wrote and the WriteF flag
    assert_eq!(check(&mut ce, &t, 1), vec![0xAA; 16]);
    let attr = NdefAttributes::decode(&check(&mut ce, &t, 0)).unwrap();
    assert_eq!(attr.writef, T3T_WRITEF_ON);
    assert_eq!(ce.local_ndef().message(), MSG);

    assert_eq!(update(&mut ce, &t, ServiceCode::NDEF_RW, 0, attributes(T3T_WRITEF_OFF, 16)), [0, 0]);
    assert_eq!(
        ce.take_events(),
        vec![CeEvent::NdefUpdateComplete {
            status: Status::Ok,
            data: vec![0xAA; 16],
        }]
    );
    assert_eq!(ce.local_ndef().message(), &[0xAA; 16]);
    assert!(!ce.local_ndef().is_updating());
}

#[test]
fn length_beyond_capacity_aborts_the_update() {
    let (mut ce, t) = emulator(false);
    update(&mut ce, &t, ServiceCode::NDEF_RW, 0, attributes(T3T_WRITEF_ON, 5));
    ce.take_events();

    assert_eq!(
        update(&mut ce, &t, ServiceCode::NDEF_RW, 0, attributes(T3T_WRITEF_OFF, 65)),
        [0x01, 0x70]
    );
    assert_eq!(ce.take_events(), vec![CeEvent::NdefUpdateAbort]);
    assert_eq!(ce.local_ndef().message(), MSG);
}

#[test]
fn rejected_update_leaves_the_pending_data_untouched() {
    let config = CeConfig {
        t3t_nbw: 4,
        ..CeConfig::default()
    };
    let (mut ce, t) = emulator_with(false, config);
    update(&mut ce, &t, ServiceCode::NDEF_RW, 0, attributes(T3T_WRITEF_ON, 5));
    update(&mut ce, &t, ServiceCode::NDEF_RW, 1, vec![0xAA; 16]);
    ce.take_events();

    let mut data = vec![0xBB; 16];
    data.extend_from_slice(&[0xCC; 16]);
    assert_eq!(update_blocks(&mut ce, &t, ServiceCode::NDEF_RW, &[1, 9], data), [0x01, 0xA8]);
    assert_eq!(check(&mut ce, &t, 1), vec![0xAA; 16]);

    assert_eq!(update(&mut ce, &t, ServiceCode::NDEF_RW, 0, attributes(T3T_WRITEF_OFF, 16)), [0, 0]);
    assert_eq!(ce.local_ndef().message(), &[0xAA; 16]);
}

#[test]
fn data_ahead_of_a_bad_attribute_block_is_not_written() {
    let config = CeConfig {
        t3t_nbw: 2,
        ..CeConfig::default()
    };
    let (mut ce, t) = emulator_with(false, config);

    let mut data = vec![0xBB; 16];
    let mut attr = attributes(T3T_WRITEF_OFF, 16);
    attr[15] ^= 0x01;
    data.extend_from_slice(&attr);
    assert_eq!(update_blocks(&mut ce, &t, ServiceCode::NDEF_RW, &[1, 0], data), [0x01, 0x70]);
    assert!(!ce.local_ndef().is_updating());
    assert!(ce.take_events().is_empty());
    assert_eq!(check(&mut ce, &t, 1)[..5], *MSG);

    // an oversized Ln abandons the update before the data lands
    update(&mut ce, &t, ServiceCode::NDEF_RW, 0, attributes(T3T_WRITEF_ON, 5));
    ce.take_events();
    let mut data = vec![0xBB; 16];
    data.extend_from_slice(&attributes(T3T_WRITEF_OFF, 65));
    assert_eq!(update_blocks(&mut ce, &t, ServiceCode::NDEF_RW, &[1, 0], data), [0x01, 0x70]);
    assert_eq!(ce.take_events(), vec![CeEvent::NdefUpdateAbort]);
    assert_eq!(check(&mut ce, &t, 1)[..5], *MSG);
    assert_eq!(ce.local_ndef().message(), MSG);
}

#[test]
fn corrupted_attribute_block_is_refused() {
    let (mut ce, t) = emulator(false);
    let mut block = attributes(T3T_WRITEF_ON, 5);
    block[15] ^= 0x01;
    assert_eq!(update(&mut ce, &t, ServiceCode::NDEF_RW, 0, block), [0x01, 0x70]);
    assert!(ce.take_events().is_empty());
    assert!(!ce.local_ndef().is_updating());
}

#[test]
fn read_only_message_cannot_be_updated() {
    let (mut ce, t) = emulator(true);
    assert_eq!(update(&mut ce, &t, ServiceCode::NDEF_RW, 1, vec![0x55; 16]), [0x01, 0x70]);
    assert_eq!(check(&mut ce, &t, 1)[..5], *MSG);
    assert!(NdefAttributes::decode(&check(&mut ce, &t, 0)).unwrap().is_read_only());
}

#[test]
fn memory_configuration_block_is_out_of_range() {
    let (mut ce, t) = emulator(false);
    let cmd = T3tCommand::Check {
        idm: sample_idm(),
        services: vec![ServiceCode::NDEF_RO],
        blocks: vec![BlockElement::new(0, 0x88)],
    };
    ce.on_data(&cmd.encode().unwrap());
    assert_eq!(t.take_sent().pop().unwrap()[10..12], [0x01, 0xA8]);
}

#[test]
fn deactivation_abandons_the_update() {
    let (mut ce, t) = emulator(false);
    update(&mut ce, &t, ServiceCode::NDEF_RW, 0, attributes(T3T_WRITEF_ON, 5));
    update(&mut ce, &t, ServiceCode::NDEF_RW, 1, vec![0xAA; 16]);
    ce.take_events();

    ce.handle_conn_event(ConnEvent::Deactivated);
    assert_eq!(ce.take_events(), vec![CeEvent::NdefUpdateAbort, CeEvent::Deactivated]);
    assert_eq!(ce.local_ndef().message(), MSG);
    assert_eq!(ce.protocol(), None);

    // frames after deactivation are dropped
    ce.on_data(&T3tCommand::Check {
        idm: sample_idm(),
        services: vec![ServiceCode::NDEF_RO],
        blocks: vec![BlockElement::new(0, 0)],
    }
    .encode()
    .unwrap());
    assert!(t.take_sent().is_empty());
}

#[test]
fn client_callback_replaces_the_event_queue() {
    let (mut ce, _t) = emulator(false);
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = seen.clone();
    ce.set_client(move |ev| sink.borrow_mut().push(ev));

    ce.on_data(&[0x03, 0x0C, 0x00]);
    assert!(ce.take_events().is_empty());
    assert_eq!(*seen.borrow(), vec![CeEvent::RawFrame(vec![0x03, 0x0C, 0x00])]);
}

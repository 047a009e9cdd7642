// Shared helpers for the integration tests. Each aggregator includes this
// module through `#[path]`, so not every helper is used by every crate.
#![allow(dead_code)]

pub mod fixtures;

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

use libnfctag::rw::{NdefInfo, RwEvent};

/// The detection result, when it is the only event.
pub fn detected(events: Vec<RwEvent>) -> NdefInfo {
    match events.as_slice() {
        [RwEvent::NdefDetect(info)] => info.clone(),
        other => panic!("expected a single detection event, got {:?}", other),
    }
}

/// The message of a successful read, when it is the only event.
pub fn read_back(events: Vec<RwEvent>) -> Vec<u8> {
    match events.as_slice() {
        [RwEvent::NdefReadComplete(msg)] => msg.clone(),
        other => panic!("expected a single read event, got {:?}", other),
    }
}

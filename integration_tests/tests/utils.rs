#![allow(dead_code)]
use dcfsync_client::{LocalNode, Network, SyncEngine, SyncOptions};
use dcfsync_common::NodeId;
use integration_tests::{
    load_dictionary,
    sim_bus::{SimBus, SimBusReceiver, SimBusSender},
};

pub const DEVICE_ID: u8 = 1;

pub fn device_id() -> NodeId {
    NodeId::new(DEVICE_ID).unwrap()
}

/// Create a bus with a single device, initialized with the defaults from sample.eds
pub fn setup_device() -> (SimBus, Network<SimBusSender, SimBusReceiver>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = LocalNode::new(device_id(), load_dictionary("sample.eds", device_id()));
    let bus = SimBus::new(vec![device]);
    let network = Network::new(bus.new_sender(), bus.new_receiver());
    (bus, network)
}

/// An engine with short timeouts, so that tests with missing devices run quickly
pub fn fast_engine(max_consecutive_timeouts: usize) -> SyncEngine {
    let options = SyncOptions::load_from_str(&format!(
        "sdo_timeout_ms = 20\nmax_consecutive_timeouts = {max_consecutive_timeouts}\n"
    ))
    .unwrap();
    SyncEngine::new(options)
}

use std::time::Duration;

use assertables::*;
use dcfsync_client::{
    common::sdo::AbortCode,
    object_dict::{Entry, Object, Value},
    pdo::managed_indices,
    sync::EntryError,
    CancelToken, ConfigDocument, Node, ObjectDictionary, PdoDirection, PdoMappingModel,
    SdoClientError, SdoTransfer, SyncError, SyncPhase,
};
use dcfsync_common::{
    objects::{AccessType, DataType},
    NodeId,
};
use integration_tests::{load_dictionary, load_document};

mod utils;
use utils::{device_id, fast_engine, setup_device};

#[test]
#[serial_test::serial]
fn test_write_then_read_round_trip() {
    let (bus, network) = setup_device();
    let engine = fast_engine(5);
    let dcf = load_dictionary("sample.dcf", device_id());

    let mut node = network.add_node(device_id(), dcf.clone());
    let report = engine.write(&mut node, &CancelToken::new()).unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(SyncPhase::Done, report.phase);

    bus.with_node(device_id(), |device| {
        let od = device.object_dictionary();
        let value = |index, sub| od.get(index, sub).unwrap().value.clone();
        assert_eq!(Value::Str("hello!".into()), value(0x2000, 0));
        assert_eq!(Value::UInt(12345), value(0x2001, 0));
        assert_eq!(Value::UInt(12), value(0x2002, 0));
        assert_eq!(Value::Int(123), value(0x2003, 0));
        assert_eq!(Value::UInt(123456), value(0x2004, 0));
        assert_eq!(Value::Bool(true), value(0x2005, 0));
        assert_eq!(Value::Bool(false), value(0x2006, 0));
        assert_eq!(Value::UInt(1000), value(0x1017, 0));
        // Refused on download, so the device keeps its own value
        assert_eq!(Value::UInt(42), value(0x2009, 0));
    });

    // Read back into a model built from the EDS
    let mut node = network.add_node(device_id(), load_dictionary("sample.eds", device_id()));
    let mut doc = load_document("sample.eds");
    let report = engine.read(&mut node, &mut doc, &CancelToken::new()).unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);

    let compared: Vec<&Entry> = dcf
        .objects()
        .iter()
        .flat_map(|obj| obj.entries())
        .filter(|e| e.readable() && !e.refuse_read_on_scan && !e.refuse_write_on_download)
        .collect();
    assert!(compared.len() > 50);
    for expected in compared {
        let actual = node
            .object_dictionary()
            .get(expected.index, expected.sub)
            .unwrap();
        assert_eq!(expected.value, actual.value, "Mismatch at {}", expected.id());
    }

    assert_eq!(Some("0x3930"), doc.get("2001", "ParameterValue"));
    assert_eq!(Some("0x68656c6c6f21"), doc.get("2000", "ParameterValue"));
    assert_eq!(Some("0x01020000"), doc.get("1400sub1", "ParameterValue"));
    assert_eq!(Some("1"), doc.get("DeviceComissioning", "NodeID"));
    assert!(doc.section("DeviceComissioning").unwrap().contains_key("Baudrate"));
}

#[test]
#[serial_test::serial]
fn test_refused_and_inaccessible_entries() {
    let (bus, network) = setup_device();
    let engine = fast_engine(5);

    let mut node = network.add_node(device_id(), load_dictionary("sample.eds", device_id()));
    let mut doc = load_document("sample.eds");
    let report = engine.read(&mut node, &mut doc, &CancelToken::new()).unwrap();
    assert!(report.is_clean());
    // 0x2008 refuses reads, and 0x200A is write only
    assert_eq!(2, report.skipped);

    let requests = bus.sdo_requests(device_id());
    assert_not_contains!(requests, &(0x2008, 0));
    assert_not_contains!(requests, &(0x200A, 0));
    assert_contains!(requests, &(0x2009, 0));
    assert!(!doc.section("2008").unwrap().contains_key("ParameterValue"));

    bus.clear_log();
    let mut node = network.add_node(device_id(), load_dictionary("sample.dcf", device_id()));
    engine.write(&mut node, &CancelToken::new()).unwrap();
    let requests = bus.sdo_requests(device_id());
    assert_not_contains!(requests, &(0x2009, 0));
    assert_not_contains!(requests, &(0x1000, 0));
    assert_contains!(requests, &(0x200A, 0));
}

#[test]
#[serial_test::serial]
fn test_managed_indices_are_committed_last() {
    let (bus, network) = setup_device();
    let engine = fast_engine(5);
    let dcf = load_dictionary("sample.dcf", device_id());
    let managed = managed_indices(&[
        PdoMappingModel::from_dictionary(&dcf, PdoDirection::Transmit),
        PdoMappingModel::from_dictionary(&dcf, PdoDirection::Receive),
    ]);
    assert_contains!(managed, &0x1600u16);
    assert_contains!(managed, &0x1A03u16);

    let mut node = network.add_node(device_id(), dcf);
    engine.write(&mut node, &CancelToken::new()).unwrap();

    let requests = bus.sdo_requests(device_id());
    let first_managed = requests
        .iter()
        .position(|(index, _)| managed.contains(index))
        .unwrap();
    assert!(requests[first_managed..]
        .iter()
        .all(|(index, _)| managed.contains(index)));
    // Transmit PDOs are committed before receive PDOs
    assert_eq!(0x1800, requests[first_managed].0);

    let rpdo1: Vec<(u16, u8)> = requests
        .iter()
        .copied()
        .filter(|(index, _)| *index == 0x1400 || *index == 0x1600)
        .collect();
    assert_eq!(
        vec![
            (0x1400, 1),
            (0x1400, 2),
            (0x1600, 0),
            (0x1600, 1),
            (0x1600, 2),
            (0x1600, 0),
            (0x1400, 1),
        ],
        rpdo1
    );
}

#[test]
#[serial_test::serial]
fn test_upload_abort_is_recorded() {
    let (_bus, network) = setup_device();
    let engine = fast_engine(5);

    let mut od = load_dictionary("sample.eds", device_id());
    od.insert(Object::Variable(
        Entry::new("Not on device", 0x2100, 0, DataType::UInt8, AccessType::Rw)
            .with_value(Value::UInt(1)),
    ));
    let mut node = network.add_node(device_id(), od);
    let mut doc = load_document("sample.eds");
    let report = engine.read(&mut node, &mut doc, &CancelToken::new()).unwrap();

    assert_eq!(1, report.failures.len());
    let failure = &report.failures[0];
    assert_eq!(0x2100, failure.id.index);
    assert_eq!("Not on device", failure.name);
    match &failure.error {
        EntryError::Transfer { source } => {
            assert_eq!(Some(AbortCode::NoSuchObject), source.abort_code())
        }
        e => panic!("Unexpected error {e:?}"),
    }

    assert!(doc.section("2100").is_none());
    for section in ["1000", "1018sub2", "1A03sub2", "2000", "2007", "60FF"] {
        assert!(
            doc.get(section, "ParameterValue").is_some(),
            "No value in {section}"
        );
    }
}

#[test]
#[serial_test::serial]
fn test_lost_device() {
    let (bus, network) = setup_device();
    bus.disconnect_nodes();
    let engine = fast_engine(3);

    let mut node = network.add_node(device_id(), load_dictionary("sample.eds", device_id()));
    let mut doc = load_document("sample.eds");
    match engine.read(&mut node, &mut doc, &CancelToken::new()) {
        Err(SyncError::Connectivity { count, report }) => {
            assert_eq!(3, count);
            assert_eq!(0, report.transferred);
            assert_eq!(3, report.failures.len());
        }
        r => panic!("Unexpected result {r:?}"),
    }

    bus.clear_log();
    let mut node = network.add_node(device_id(), load_dictionary("sample.dcf", device_id()));
    let result = engine.write(&mut node, &CancelToken::new());
    assert!(matches!(result, Err(SyncError::Connectivity { .. })));
    // The PDO commit is never started
    assert_eq!(
        vec![(0x1017, 0), (0x2000, 0), (0x2001, 0)],
        bus.sdo_requests(device_id())
    );
}

#[test]
#[serial_test::serial]
fn test_cancelled_run() {
    let (bus, network) = setup_device();
    let engine = fast_engine(5);
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut node = network.add_node(device_id(), load_dictionary("sample.dcf", device_id()));
    match engine.write(&mut node, &cancel) {
        Err(SyncError::Cancelled { report }) => assert_eq!(0, report.transferred),
        r => panic!("Unexpected result {r:?}"),
    }
    assert!(bus.sdo_requests(device_id()).is_empty());
}

/// Wraps a node, cancelling a run once a number of downloads have completed
struct CancelAfter<N> {
    inner: N,
    cancel: CancelToken,
    remaining: usize,
}

impl<N: Node> SdoTransfer for CancelAfter<N> {
    fn upload(&mut self, index: u16, sub: u8, timeout: Duration) -> Result<Vec<u8>, SdoClientError> {
        self.inner.sdo().upload(index, sub, timeout)
    }

    fn download(
        &mut self,
        index: u16,
        sub: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), SdoClientError> {
        let result = self.inner.sdo().download(index, sub, data, timeout);
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.cancel.cancel();
        }
        result
    }
}

impl<N: Node> Node for CancelAfter<N> {
    fn node_id(&self) -> NodeId {
        self.inner.node_id()
    }
    fn object_dictionary(&self) -> &ObjectDictionary {
        self.inner.object_dictionary()
    }
    fn object_dictionary_mut(&mut self) -> &mut ObjectDictionary {
        self.inner.object_dictionary_mut()
    }
    fn sdo(&mut self) -> &mut dyn SdoTransfer {
        self
    }
}

#[test]
#[serial_test::serial]
fn test_cancelled_mid_run() {
    let (bus, network) = setup_device();
    let engine = fast_engine(5);
    let cancel = CancelToken::new();
    let dcf = load_dictionary("sample.dcf", device_id());
    let managed = managed_indices(&[
        PdoMappingModel::from_dictionary(&dcf, PdoDirection::Transmit),
        PdoMappingModel::from_dictionary(&dcf, PdoDirection::Receive),
    ]);

    let mut node = CancelAfter {
        inner: network.add_node(device_id(), dcf),
        cancel: cancel.clone(),
        remaining: 3,
    };
    match engine.write(&mut node, &cancel) {
        Err(SyncError::Cancelled { report }) => {
            assert_eq!(3, report.transferred);
            assert_eq!(SyncPhase::Scanning, report.phase);
        }
        r => panic!("Unexpected result {r:?}"),
    }

    // Transfers completed before the cancellation are kept
    bus.with_node(device_id(), |device| {
        let od = device.object_dictionary();
        let value = |index, sub| od.get(index, sub).unwrap().value.clone();
        assert_eq!(Value::UInt(1000), value(0x1017, 0));
        assert_eq!(Value::Str("hello!".into()), value(0x2000, 0));
        assert_eq!(Value::UInt(12345), value(0x2001, 0));
        assert_eq!(Value::UInt(0), value(0x2002, 0));
    });

    // The PDO commit is never started
    let requests = bus.sdo_requests(device_id());
    assert_eq!(3, requests.len());
    assert!(requests.iter().all(|(index, _)| !managed.contains(index)));
}

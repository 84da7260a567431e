//! Synchronization of a node's object dictionary with a configuration document
//!
//! A *read* uploads every readable entry from the node and records it in the document as a
//! `ParameterValue`, producing a DCF. A *write* downloads every writable entry from the dictionary
//! model, which was loaded from a DCF, and then commits the PDO configuration as a unit.
//!
//! Failures on individual entries are logged and collected in the [SyncReport] but do not stop the
//! run. The run as a whole fails with a [SyncError] when it is cancelled, when the node stops
//! responding, or when the PDO commit fails.
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use dcfsync_common::objects::ObjectId;
use snafu::Snafu;

use crate::{
    document::{encode_hex, ConfigDocument},
    node::Node,
    object_dict::{decode_raw, EncodingError, Entry, Value},
    options::SyncOptions,
    pdo::{managed_indices, PdoDirection, PdoMappingModel},
    sdo_client::SdoClientError,
};

const LOG_TARGET: &str = "dcfsync::sync";

/// Section holding node commissioning information in a DCF
pub const COMMISSIONING_SECTION: &str = "DeviceComissioning";
/// Key holding the value read from a device
pub const PARAMETER_VALUE_KEY: &str = "ParameterValue";

/// Run level synchronization errors
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    /// Committing or loading a PDO failed
    #[snafu(display("{direction}{slot} transfer failed at {id}: {source}"))]
    Pdo {
        /// Direction of the failed slot
        direction: PdoDirection,
        /// 1-based number of the failed slot
        slot: u16,
        /// The object being transferred
        id: ObjectId,
        /// The underlying error
        source: SdoClientError,
    },
    /// The node does not support the requested operation
    #[snafu(display("Operation not supported by node: {operation}"))]
    UnsupportedOperation {
        /// Description of the operation
        operation: String,
    },
    /// The node stopped responding
    #[snafu(display("Lost contact with node after {count} consecutive SDO timeouts"))]
    Connectivity {
        /// Number of consecutive timeouts
        count: usize,
        /// Results up to the point of failure
        report: SyncReport,
    },
    /// The run was cancelled
    #[snafu(display("Synchronization cancelled"))]
    Cancelled {
        /// Results up to the point of cancellation
        report: SyncReport,
    },
}

/// The reason a single entry could not be transferred
#[derive(Debug, PartialEq, Snafu)]
pub enum EntryError {
    /// The SDO transfer failed
    #[snafu(display("{source}"))]
    Transfer {
        /// The underlying error
        source: SdoClientError,
    },
    /// The entry value could not be encoded for download
    #[snafu(display("{source}"))]
    Encoding {
        /// The underlying error
        source: EncodingError,
    },
}

/// A failed entry transfer
#[derive(Debug, PartialEq)]
pub struct EntryFailure {
    /// Address of the entry
    pub id: ObjectId,
    /// Name of the entry
    pub name: String,
    /// What went wrong
    pub error: EntryError,
}

impl core::fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})\n\t{}", self.id, self.name, self.error)
    }
}

/// The phases of a synchronization run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncPhase {
    /// Connected to the node, nothing transferred yet
    #[default]
    Connected,
    /// Transferring individual entries
    Scanning,
    /// Writing the PDO configuration
    PdoCommit,
    /// The run completed
    Done,
}

/// The outcome of a synchronization run
#[derive(Debug, Default, PartialEq)]
pub struct SyncReport {
    /// The last phase entered
    pub phase: SyncPhase,
    /// Number of entries transferred
    pub transferred: usize,
    /// Number of entries skipped because of their access type or refuse flags
    pub skipped: usize,
    /// Entries which failed, in the order they were attempted
    pub failures: Vec<EntryFailure>,
}

impl SyncReport {
    /// Returns true if every attempted entry was transferred
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn enter(&mut self, phase: SyncPhase) {
        log::debug!(target: LOG_TARGET, "Entering phase {phase:?}");
        self.phase = phase;
    }
}

/// A flag used to cancel a run from another thread
///
/// Cancellation is checked before each entry, so at most one SDO transfer completes after
/// [CancelToken::cancel] is called.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a new token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Name of the document section describing `entry`
///
/// The sub index suffix is only used when the containing object has more than one entry.
pub fn section_name(entry: &Entry, multi_entry: bool) -> String {
    if multi_entry {
        format!("{:04X}sub{:X}", entry.index, entry.sub)
    } else {
        format!("{:04X}", entry.index)
    }
}

/// Tracks consecutive timeouts over a run
struct TimeoutCounter {
    count: usize,
    limit: usize,
}

impl TimeoutCounter {
    /// Record the result of a transfer, returning true once the limit is reached
    fn record(&mut self, error: Option<&SdoClientError>) -> bool {
        match error {
            Some(SdoClientError::NoResponse) => self.count += 1,
            _ => self.count = 0,
        }
        self.limit > 0 && self.count >= self.limit
    }
}

/// Runs reads and writes between nodes and documents
#[derive(Clone, Debug, Default)]
pub struct SyncEngine {
    options: SyncOptions,
}

impl SyncEngine {
    /// Create an engine with the given options
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    /// The run options
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn fail(report: &mut SyncReport, entry: &Entry, error: EntryError) {
        let failure = EntryFailure {
            id: entry.id(),
            name: entry.name.clone(),
            error,
        };
        log::warn!(target: LOG_TARGET, "{failure}");
        report.failures.push(failure);
    }

    /// Read all entries from the node into `doc`
    ///
    /// Each uploaded value is stored as `0x` followed by the raw bytes in hex, and the node's
    /// dictionary model is updated with the decoded value.
    pub fn read<D: ConfigDocument + ?Sized>(
        &self,
        node: &mut dyn Node,
        doc: &mut D,
        cancel: &CancelToken,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let timeout = self.options.sdo_timeout();
        let mut timeouts = TimeoutCounter {
            count: 0,
            limit: self.options.max_consecutive_timeouts,
        };

        doc.set(
            COMMISSIONING_SECTION,
            "NodeID",
            Some(node.node_id().to_string()),
        );
        doc.set(COMMISSIONING_SECTION, "Baudrate", None);

        let entries: Vec<(Entry, bool)> = node
            .object_dictionary()
            .objects()
            .iter()
            .flat_map(|obj| {
                let multi = obj.entries().len() > 1;
                obj.entries().iter().map(move |e| (e.clone(), multi))
            })
            .collect();

        report.enter(SyncPhase::Scanning);
        for (entry, multi) in entries {
            if cancel.is_cancelled() {
                return CancelledSnafu { report }.fail();
            }
            if !entry.readable() || entry.refuse_read_on_scan {
                log::debug!(target: LOG_TARGET, "Skipping {} ({})", entry.id(), entry.name);
                report.skipped += 1;
                continue;
            }

            let result = node.sdo().upload(entry.index, entry.sub, timeout);
            let lost = timeouts.record(result.as_ref().err());
            match result {
                Ok(raw) => {
                    let section = section_name(&entry, multi);
                    doc.set(&section, PARAMETER_VALUE_KEY, Some(encode_hex(&raw)));
                    let value = decode_raw(entry.data_type, &raw)
                        .unwrap_or_else(|_| Value::Bytes(raw.clone()));
                    if let Err(e) = node
                        .object_dictionary_mut()
                        .set_value(entry.index, entry.sub, value)
                    {
                        log::error!(target: LOG_TARGET, "Cannot store scanned value: {e}");
                    }
                    report.transferred += 1;
                }
                Err(source) => Self::fail(&mut report, &entry, EntryError::Transfer { source }),
            }
            if lost {
                return ConnectivitySnafu {
                    count: timeouts.count,
                    report,
                }
                .fail();
            }
        }

        report.enter(SyncPhase::Done);
        log::info!(
            target: LOG_TARGET,
            "Read {} entries from node {} ({} skipped, {} failed)",
            report.transferred,
            node.node_id(),
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }

    /// Write the node's dictionary model to the node
    ///
    /// Entries belonging to PDO communication or mapping parameters are not downloaded
    /// individually; once all other entries are written, the TPDO and then RPDO configuration is
    /// committed slot by slot.
    pub fn write(&self, node: &mut dyn Node, cancel: &CancelToken) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let timeout = self.options.sdo_timeout();
        let mut timeouts = TimeoutCounter {
            count: 0,
            limit: self.options.max_consecutive_timeouts,
        };

        let od = node.object_dictionary();
        let tpdo = PdoMappingModel::from_dictionary(od, PdoDirection::Transmit);
        let rpdo = PdoMappingModel::from_dictionary(od, PdoDirection::Receive);
        let managed: BTreeSet<u16> = managed_indices([&tpdo, &rpdo]);

        let entries: Vec<Entry> = od
            .objects()
            .iter()
            .filter(|obj| !managed.contains(&obj.index()))
            .flat_map(|obj| obj.entries().iter().cloned())
            .collect();

        report.enter(SyncPhase::Scanning);
        for entry in entries {
            if cancel.is_cancelled() {
                return CancelledSnafu { report }.fail();
            }
            if !entry.writable() || entry.refuse_write_on_download {
                log::debug!(target: LOG_TARGET, "Skipping {} ({})", entry.id(), entry.name);
                report.skipped += 1;
                continue;
            }

            let raw = match entry.encode_raw() {
                Ok(raw) => raw,
                Err(source) => {
                    Self::fail(&mut report, &entry, EntryError::Encoding { source });
                    continue;
                }
            };
            let result = node.sdo().download(entry.index, entry.sub, &raw, timeout);
            let lost = timeouts.record(result.as_ref().err());
            match result {
                Ok(()) => report.transferred += 1,
                Err(source) => Self::fail(&mut report, &entry, EntryError::Transfer { source }),
            }
            if lost {
                return ConnectivitySnafu {
                    count: timeouts.count,
                    report,
                }
                .fail();
            }
        }

        if cancel.is_cancelled() {
            return CancelledSnafu { report }.fail();
        }
        report.enter(SyncPhase::PdoCommit);
        tpdo.save(node.sdo(), timeout)?;
        rpdo.save(node.sdo(), timeout)?;

        report.enter(SyncPhase::Done);
        log::info!(
            target: LOG_TARGET,
            "Wrote {} entries to node {} ({} skipped, {} failed), {} PDOs committed",
            report.transferred,
            node.node_id(),
            report.skipped,
            report.failures.len(),
            tpdo.slots().len() + rpdo.slots().len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dcfsync_common::{
        objects::{AccessType, DataType},
        sdo::AbortCode,
        NodeId,
    };

    use super::*;
    use crate::{
        document::IniDocument,
        node::LocalNode,
        object_dict::{Object, ObjectDictionary},
        sdo_client::SdoTransfer,
    };

    fn od() -> ObjectDictionary {
        let mut od = ObjectDictionary::new();
        od.insert(Object::Variable(
            Entry::new("Label", 0x2000, 0, DataType::VisibleString, AccessType::Rw)
                .with_value(Value::Str("hello!".into())),
        ));
        od.insert(Object::Variable(
            Entry::new("Counter", 0x2001, 0, DataType::UInt16, AccessType::Rw)
                .with_value(Value::UInt(12345)),
        ));
        od.insert(Object::Record {
            index: 0x2010,
            name: "Limits".into(),
            entries: vec![
                Entry::new("Count", 0x2010, 0, DataType::UInt8, AccessType::Const)
                    .with_value(Value::UInt(1)),
                Entry::new("Max", 0x2010, 1, DataType::Int32, AccessType::Rw)
                    .with_value(Value::Int(-1)),
            ],
        });
        let mut secret = Entry::new("Secret", 0x2020, 0, DataType::UInt8, AccessType::Rw)
            .with_value(Value::UInt(9));
        secret.refuse_read_on_scan = true;
        secret.refuse_write_on_download = true;
        od.insert(Object::Variable(secret));
        od
    }

    fn local() -> LocalNode {
        LocalNode::new(NodeId::new(2).unwrap(), od())
    }

    #[test]
    fn test_section_names() {
        let od = od();
        let e = od.get(0x2001, 0).unwrap();
        assert_eq!("2001", section_name(e, false));
        let e = od.get(0x2010, 1).unwrap();
        assert_eq!("2010sub1", section_name(e, true));
        let e = Entry::new("", 0x1a00, 0x1f, DataType::UInt8, AccessType::Ro);
        assert_eq!("1A00sub1F", section_name(&e, true));
    }

    #[test]
    fn test_read() {
        let mut node = local();
        let mut doc = IniDocument::new();
        let report = SyncEngine::default()
            .read(&mut node, &mut doc, &CancelToken::new())
            .unwrap();

        assert_eq!(SyncPhase::Done, report.phase);
        assert_eq!(4, report.transferred);
        assert_eq!(1, report.skipped);
        assert!(report.is_clean());
        assert_eq!(Some("2"), doc.get(COMMISSIONING_SECTION, "NodeID"));
        assert!(doc.section(COMMISSIONING_SECTION).unwrap().contains_key("Baudrate"));
        assert_eq!(Some("0x68656c6c6f21"), doc.get("2000", PARAMETER_VALUE_KEY));
        assert_eq!(Some("0x3930"), doc.get("2001", PARAMETER_VALUE_KEY));
        assert_eq!(Some("0x01"), doc.get("2010sub0", PARAMETER_VALUE_KEY));
        assert_eq!(Some("0xffffffff"), doc.get("2010sub1", PARAMETER_VALUE_KEY));
        assert!(doc.section("2020").is_none());
        // Scanned values are stored in the node's model
        assert_eq!(
            Value::Str("hello!".into()),
            node.object_dictionary().get(0x2000, 0).unwrap().value
        );
    }

    /// A node whose transport fails every transfer with a fixed error
    struct FailingNode {
        inner: LocalNode,
        error: SdoClientError,
        calls: usize,
    }

    impl SdoTransfer for FailingNode {
        fn upload(&mut self, _: u16, _: u8, _: Duration) -> Result<Vec<u8>, SdoClientError> {
            self.calls += 1;
            Err(match &self.error {
                SdoClientError::NoResponse => SdoClientError::NoResponse,
                _ => SdoClientError::ServerAbort {
                    abort_code: AbortCode::GeneralError as u32,
                },
            })
        }

        fn download(&mut self, i: u16, s: u8, _: &[u8], t: Duration) -> Result<(), SdoClientError> {
            self.upload(i, s, t).map(|_| ())
        }
    }

    impl Node for FailingNode {
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
    fn test_consecutive_timeouts_abort_run() {
        let mut node = FailingNode {
            inner: local(),
            error: SdoClientError::NoResponse,
            calls: 0,
        };
        let engine = SyncEngine::new(SyncOptions {
            sdo_timeout_ms: 1,
            max_consecutive_timeouts: 3,
        });
        match engine.write(&mut node, &CancelToken::new()) {
            Err(SyncError::Connectivity { count, report }) => {
                assert_eq!(3, count);
                assert_eq!(3, report.failures.len());
                assert_eq!(SyncPhase::Scanning, report.phase);
            }
            other => panic!("Unexpected result {other:?}"),
        }
        assert_eq!(3, node.calls);
    }

    #[test]
    fn test_entry_failures_do_not_stop_run() {
        let mut node = FailingNode {
            inner: local(),
            error: SdoClientError::MalformedResponse,
            calls: 0,
        };
        let engine = SyncEngine::new(SyncOptions {
            sdo_timeout_ms: 1,
            max_consecutive_timeouts: 1,
        });
        let report = engine
            .read(&mut node, &mut IniDocument::new(), &CancelToken::new())
            .unwrap();
        assert_eq!(4, report.failures.len());
        assert_eq!(0, report.transferred);
        assert_eq!(ObjectId { index: 0x2000, sub: 0 }, report.failures[0].id);
        assert_eq!("Label", report.failures[0].name);
    }

    #[test]
    fn test_encoding_failure_is_per_entry() {
        let mut node = local();
        node.object_dictionary_mut()
            .set_value(0x2001, 0, Value::UInt(70000))
            .unwrap();
        let report = SyncEngine::default()
            .write(&mut node, &CancelToken::new())
            .unwrap();
        assert_eq!(1, report.failures.len());
        assert!(matches!(
            report.failures[0].error,
            EntryError::Encoding { .. }
        ));
        // Label and Limits.Max
        assert_eq!(2, report.transferred);
    }

    #[test]
    fn test_cancelled_run() {
        let mut node = local();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            SyncEngine::default().write(&mut node, &cancel),
            Err(SyncError::Cancelled { .. })
        ));
        assert!(matches!(
            SyncEngine::default().read(&mut node, &mut IniDocument::new(), &cancel),
            Err(SyncError::Cancelled { .. })
        ));
    }
}

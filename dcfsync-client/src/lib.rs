//! Synchronize the configuration of CANopen devices with DCF files
//!
//! The crate provides:
//!
//! - An [object dictionary model](ObjectDictionary) built from [EDS or DCF](load_object_dictionary)
//!   documents
//! - A lossless [INI document](IniDocument) for reading and writing those files
//! - An [SDO client](SdoClient) for reading/writing a node's object dictionary via its SDO server,
//!   and a [LocalNode] serving an in-process dictionary
//! - A [PDO model](PdoMappingModel) which commits PDO configuration as a unit
//! - The [SyncEngine], which reads a device into a DCF, or writes a DCF to a device
//! - [SyncOptions], loaded from a TOML file
#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod document;
pub mod eds;
pub mod network;
pub mod node;
pub mod object_dict;
mod options;
pub mod pdo;
mod sdo_client;
mod sdo_server;
pub mod sync;
pub use dcfsync_common as common;

pub use document::{ConfigDocument, IniDocument, Section};
pub use eds::{load_object_dictionary, LoadError};
pub use network::{ConnectionError, DriverKind, Network};
pub use node::{LocalNode, Node, PdoControl, RemoteNode};
pub use object_dict::{Entry, Object, ObjectDictionary, Value};
pub use options::{ConfigError, SyncOptions};
pub use pdo::{PdoDirection, PdoMappingModel, PdoSlot};
pub use sdo_client::{SdoClient, SdoClientError, SdoTransfer, RESPONSE_TIMEOUT};
pub use sdo_server::SdoServer;
pub use sync::{CancelToken, SyncEngine, SyncError, SyncPhase, SyncReport};

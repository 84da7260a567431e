//! Shared helpers for dcfsync integration tests
use std::path::PathBuf;

use dcfsync_client::{load_object_dictionary, IniDocument, ObjectDictionary};
use dcfsync_common::NodeId;

pub mod sim_bus;

/// Path to a file in the device_configs directory
pub fn config_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("device_configs")
        .join(name)
}

/// Load one of the sample documents
pub fn load_document(name: &str) -> IniDocument {
    IniDocument::load(config_path(name)).unwrap()
}

/// Load the dictionary described by one of the sample documents
pub fn load_dictionary(name: &str, node_id: NodeId) -> ObjectDictionary {
    load_object_dictionary(&load_document(name), node_id).unwrap()
}

//! Common functionality shared among the dcfsync crates.
//!
//! Most users will have no reason to depend on this crate directly, as it is re-exported by
//! `dcfsync-client`.
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod constants;
pub mod messages;
pub mod node_id;
pub mod objects;
pub mod sdo;
pub mod traits;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socketcan;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub use socketcan::{open_socketcan, SocketCanReceiver, SocketCanSender};

pub use node_id::NodeId;

pub use messages::{CanError, CanId, CanMessage};

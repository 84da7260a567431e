//! Connection to a CAN bus
use core::str::FromStr;

use dcfsync_common::{
    traits::{CanReceiver, CanSender},
    NodeId,
};
use snafu::Snafu;

use crate::{node::RemoteNode, object_dict::ObjectDictionary, sdo_client::SdoClient};

/// The CAN drivers which can be used to connect to a bus
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriverKind {
    /// Linux socketcan
    #[default]
    SocketCan,
}

/// Returned when parsing an unknown driver name
#[derive(Debug, Snafu)]
#[snafu(display("Unknown bus type '{name}'. Supported: socketcan"))]
pub struct UnknownDriverError {
    name: String,
}

impl FromStr for DriverKind {
    type Err = UnknownDriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "socketcan" => Ok(DriverKind::SocketCan),
            _ => UnknownDriverSnafu { name: s }.fail(),
        }
    }
}

impl core::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DriverKind::SocketCan => write!(f, "socketcan"),
        }
    }
}

/// Errors opening a bus connection
#[derive(Debug, Snafu)]
pub enum ConnectionError {
    /// The driver was not compiled in, or is not available on this platform
    #[snafu(display("The {driver} driver is not available in this build"))]
    DriverUnavailable {
        /// The requested driver
        driver: DriverKind,
    },
    /// The channel could not be opened
    #[snafu(display("Error opening {driver} channel '{channel}': {source}"))]
    Open {
        /// The requested driver
        driver: DriverKind,
        /// The requested channel
        channel: String,
        /// The underlying error
        source: std::io::Error,
    },
}

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod bus {
    pub use dcfsync_common::{SocketCanReceiver as BusReceiver, SocketCanSender as BusSender};
}

#[cfg(not(all(feature = "socketcan", target_os = "linux")))]
mod bus {
    use std::time::Duration;

    use dcfsync_common::{
        traits::{CanReceiver, CanSendError, CanSender},
        CanMessage,
    };

    /// Placeholder sender for builds without a bus driver. It cannot be constructed.
    #[derive(Clone, Copy, Debug)]
    pub enum BusSender {}

    /// Placeholder receiver for builds without a bus driver. It cannot be constructed.
    #[derive(Clone, Copy, Debug)]
    pub enum BusReceiver {}

    impl CanSender for BusSender {
        fn send(&mut self, _msg: CanMessage) -> Result<(), CanSendError> {
            match *self {}
        }
    }

    impl CanReceiver for BusReceiver {
        type Error = ();

        fn try_recv(&mut self) -> Option<CanMessage> {
            match *self {}
        }

        fn recv(&mut self, _timeout: Duration) -> Result<CanMessage, ()> {
            match *self {}
        }
    }
}

pub use bus::{BusReceiver, BusSender};

/// A connection to a CAN bus, used to create [RemoteNode]s
#[derive(Debug)]
pub struct Network<S, R> {
    sender: S,
    receiver: R,
}

impl<S: CanSender + Clone, R: CanReceiver + Clone> Network<S, R> {
    /// Create a network from an existing sender and receiver pair
    pub fn new(sender: S, receiver: R) -> Self {
        Self { sender, receiver }
    }

    /// Create a node on this network, described by `od`
    pub fn add_node(&self, node_id: NodeId, od: ObjectDictionary) -> RemoteNode<S, R> {
        let client = SdoClient::new_std(node_id, self.sender.clone(), self.receiver.clone());
        RemoteNode::new(node_id, od, client)
    }
}

impl Network<BusSender, BusReceiver> {
    /// Open a bus using the given driver
    pub fn connect(driver: DriverKind, channel: &str) -> Result<Self, ConnectionError> {
        match driver {
            DriverKind::SocketCan => Self::connect_socketcan(channel),
        }
    }

    #[cfg(all(feature = "socketcan", target_os = "linux"))]
    fn connect_socketcan(channel: &str) -> Result<Self, ConnectionError> {
        use snafu::ResultExt;

        let (sender, receiver) =
            dcfsync_common::open_socketcan(channel).context(OpenSnafu {
                driver: DriverKind::SocketCan,
                channel,
            })?;
        log::info!("Connected to socketcan channel {channel}");
        Ok(Self::new(sender, receiver))
    }

    #[cfg(not(all(feature = "socketcan", target_os = "linux")))]
    fn connect_socketcan(_channel: &str) -> Result<Self, ConnectionError> {
        DriverUnavailableSnafu {
            driver: DriverKind::SocketCan,
        }
        .fail()
    }
}

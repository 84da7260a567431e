//! Nodes which can be synchronized with a configuration document
use std::time::Duration;

use dcfsync_common::{
    constants::{pdo_subs, values::COB_ID_INVALID},
    messages::{is_std_sdo_request, SDO_RESP_BASE},
    sdo::SdoRequest,
    traits::{CanReceiver, CanSender},
    CanId, CanMessage, NodeId,
};

use crate::{
    object_dict::ObjectDictionary,
    sdo_client::{SdoClient, SdoClientError, SdoTransfer},
    sdo_server::{read_entry, write_entry, SdoServer},
};

/// Control over the PDO transmission of a live device
pub trait PdoControl {
    /// Disable the PDO whose communication record is at `com_index` by writing `cob_id` with the
    /// invalid bit set
    fn disable_pdo(&mut self, com_index: u16, cob_id: u32, timeout: Duration)
        -> Result<(), SdoClientError>;
}

/// A node with an object dictionary model and SDO access to its values
pub trait Node {
    /// The node ID
    fn node_id(&self) -> NodeId;

    /// The object dictionary model of the node
    fn object_dictionary(&self) -> &ObjectDictionary;

    /// Mutable access to the object dictionary model
    fn object_dictionary_mut(&mut self) -> &mut ObjectDictionary;

    /// The transport used to read and write values on the node
    fn sdo(&mut self) -> &mut dyn SdoTransfer;

    /// PDO control, if the node supports it
    fn pdo_control(&mut self) -> Option<&mut dyn PdoControl> {
        None
    }
}

/// A device on a CAN bus, accessed through an [SdoClient]
#[derive(Debug)]
pub struct RemoteNode<S, R> {
    node_id: NodeId,
    od: ObjectDictionary,
    client: SdoClient<S, R>,
}

impl<S: CanSender, R: CanReceiver> RemoteNode<S, R> {
    /// Create a remote node from a dictionary model and a client
    pub fn new(node_id: NodeId, od: ObjectDictionary, client: SdoClient<S, R>) -> Self {
        Self {
            node_id,
            od,
            client,
        }
    }
}

impl<S: CanSender, R: CanReceiver> Node for RemoteNode<S, R> {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn object_dictionary(&self) -> &ObjectDictionary {
        &self.od
    }

    fn object_dictionary_mut(&mut self) -> &mut ObjectDictionary {
        &mut self.od
    }

    fn sdo(&mut self) -> &mut dyn SdoTransfer {
        &mut self.client
    }

    fn pdo_control(&mut self) -> Option<&mut dyn PdoControl> {
        Some(self)
    }
}

impl<S: CanSender, R: CanReceiver> PdoControl for RemoteNode<S, R> {
    fn disable_pdo(
        &mut self,
        com_index: u16,
        cob_id: u32,
        timeout: Duration,
    ) -> Result<(), SdoClientError> {
        let value = cob_id | COB_ID_INVALID;
        log::debug!("Disabling PDO {com_index:04x} (COB-ID {value:#010x})");
        self.client
            .download(com_index, pdo_subs::COB_ID, &value.to_le_bytes(), timeout)
    }
}

/// A node living in this process, serving its own dictionary
///
/// Values are read and written directly when the node is used through [Node::sdo], or over SDO
/// messages via [LocalNode::handle_message]. A local node has no PDO control.
#[derive(Debug)]
pub struct LocalNode {
    node_id: NodeId,
    od: ObjectDictionary,
    sdo_server: SdoServer,
}

impl LocalNode {
    /// Create a local node serving `od`
    pub fn new(node_id: NodeId, od: ObjectDictionary) -> Self {
        Self {
            node_id,
            od,
            sdo_server: SdoServer::new(),
        }
    }

    /// Process a message received from the bus
    ///
    /// Returns the response to transmit, if the message was an SDO request for this node.
    pub fn handle_message(&mut self, msg: &CanMessage) -> Option<CanMessage> {
        if !is_std_sdo_request(msg.id, self.node_id.raw()) {
            return None;
        }
        let req = match SdoRequest::try_from(msg.data()) {
            Ok(req) => req,
            Err(e) => {
                log::warn!("Node {} received invalid SDO request: {e}", self.node_id);
                return None;
            }
        };
        let resp = self.sdo_server.handle_request(&req, &mut self.od)?;
        let resp_id = CanId::Std(SDO_RESP_BASE + self.node_id.raw() as u16);
        Some(resp.to_can_message(resp_id))
    }
}

impl SdoTransfer for LocalNode {
    fn upload(&mut self, index: u16, sub: u8, _timeout: Duration) -> Result<Vec<u8>, SdoClientError> {
        read_entry(&self.od, index, sub).map_err(|code| SdoClientError::ServerAbort {
            abort_code: code as u32,
        })
    }

    fn download(
        &mut self,
        index: u16,
        sub: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<(), SdoClientError> {
        write_entry(&mut self.od, index, sub, data).map_err(|code| SdoClientError::ServerAbort {
            abort_code: code as u32,
        })
    }
}

impl Node for LocalNode {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn object_dictionary(&self) -> &ObjectDictionary {
        &self.od
    }

    fn object_dictionary_mut(&mut self) -> &mut ObjectDictionary {
        &mut self.od
    }

    fn sdo(&mut self) -> &mut dyn SdoTransfer {
        self
    }
}

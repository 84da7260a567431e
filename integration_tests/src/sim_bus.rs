//! A simulated CAN bus connecting clients to in-process nodes
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use dcfsync_client::LocalNode;
use dcfsync_common::{
    messages::{CanMessage, SDO_REQ_BASE},
    sdo::SdoRequest,
    traits::{CanReceiver, CanSendError, CanSender},
    NodeId,
};

#[derive(Default)]
struct BusState {
    nodes: Vec<LocalNode>,
    queues: Vec<Sender<CanMessage>>,
    log: Vec<CanMessage>,
}

impl BusState {
    fn deliver(&mut self, msg: CanMessage) {
        self.log.push(msg);
        // Drop queues whose receivers have gone away
        self.queues.retain(|q| q.send(msg).is_ok());
    }
}

/// A bus shared between any number of senders, receivers, and [LocalNode]s
///
/// Every message sent is logged, delivered to every receiver, and handed to every node. Node
/// responses are delivered to every receiver, but not to other nodes.
#[derive(Clone, Default)]
pub struct SimBus {
    state: Arc<Mutex<BusState>>,
}

impl SimBus {
    pub fn new(nodes: Vec<LocalNode>) -> Self {
        let state = BusState {
            nodes,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap()
    }

    pub fn new_sender(&self) -> SimBusSender {
        SimBusSender { bus: self.clone() }
    }

    pub fn new_receiver(&self) -> SimBusReceiver {
        let (tx, rx) = unbounded();
        self.lock().queues.push(tx);
        SimBusReceiver { channel: rx }
    }

    /// Access a node on the bus by its ID
    pub fn with_node<T>(&self, node_id: NodeId, f: impl FnOnce(&mut LocalNode) -> T) -> T {
        use dcfsync_client::Node;
        let mut state = self.lock();
        let node = state
            .nodes
            .iter_mut()
            .find(|n| n.node_id() == node_id)
            .expect("No node with that ID on the bus");
        f(node)
    }

    /// Remove all nodes from the bus, so requests go unanswered
    pub fn disconnect_nodes(&self) -> Vec<LocalNode> {
        std::mem::take(&mut self.lock().nodes)
    }

    /// All messages which have been sent on the bus
    pub fn messages(&self) -> Vec<CanMessage> {
        self.lock().log.clone()
    }

    /// The (index, sub) addressed by each SDO initiate request sent to `node_id`
    pub fn sdo_requests(&self, node_id: NodeId) -> Vec<(u16, u8)> {
        let req_id = SDO_REQ_BASE + node_id.raw() as u16;
        self.messages()
            .iter()
            .filter(|msg| msg.id.raw() == req_id as u32)
            .filter_map(|msg| match SdoRequest::try_from(msg.data()) {
                Ok(SdoRequest::InitiateUpload { index, sub })
                | Ok(SdoRequest::InitiateDownload { index, sub, .. }) => Some((index, sub)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }
}

#[derive(Clone)]
pub struct SimBusSender {
    bus: SimBus,
}

impl CanSender for SimBusSender {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        let mut state = self.bus.lock();
        state.deliver(msg);
        let responses: Vec<CanMessage> = state
            .nodes
            .iter_mut()
            .filter_map(|node| node.handle_message(&msg))
            .collect();
        for resp in responses {
            state.deliver(resp);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct SimBusReceiver {
    channel: Receiver<CanMessage>,
}

impl CanReceiver for SimBusReceiver {
    type Error = RecvTimeoutError;

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.channel.try_recv().ok()
    }

    fn recv(&mut self, timeout: Duration) -> Result<CanMessage, RecvTimeoutError> {
        self.channel.recv_timeout(timeout)
    }
}

use std::{sync::Arc, time::Duration};

use snafu::{ResultExt, Snafu};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId};

use crate::{
    messages::{CanError, CanId, CanMessage},
    traits::{CanReceiver, CanSendError, CanSender},
};

fn socketcan_id_to_dcfsync_id(id: Id) -> CanId {
    match id {
        Id::Standard(id) => CanId::std(id.as_raw()),
        Id::Extended(id) => CanId::extended(id.as_raw()),
    }
}

fn dcfsync_id_to_socketcan_id(id: CanId) -> Option<Id> {
    match id {
        CanId::Extended(id) => ExtendedId::new(id).map(Id::Extended),
        CanId::Std(id) => StandardId::new(id).map(Id::Standard),
    }
}

fn socketcan_frame_to_dcfsync_message(frame: CanFrame) -> Result<Option<CanMessage>, CanError> {
    match frame {
        CanFrame::Data(frame) => Ok(Some(CanMessage::new(
            socketcan_id_to_dcfsync_id(frame.id()),
            frame.data(),
        ))),
        // Remote frames are never part of an SDO exchange
        CanFrame::Remote(_) => Ok(None),
        CanFrame::Error(frame) => Err(CanError::from_raw(frame.error_bits())),
    }
}

/// Errors returned by [SocketCanReceiver]
#[derive(Debug, Snafu)]
pub enum ReceiveError {
    /// Socket level error, including timeouts
    Io {
        /// The underlying IO error
        source: std::io::Error,
    },
    /// The controller reported a bus error
    Can {
        /// The reported bus error
        source: CanError,
    },
}

/// A blocking socketcan receiver
#[derive(Debug, Clone)]
pub struct SocketCanReceiver {
    socket: Arc<CanSocket>,
}

impl CanReceiver for SocketCanReceiver {
    type Error = ReceiveError;

    fn try_recv(&mut self) -> Option<CanMessage> {
        match self.socket.read_frame_timeout(Duration::from_millis(1)) {
            Ok(frame) => socketcan_frame_to_dcfsync_message(frame).ok().flatten(),
            Err(_) => None,
        }
    }

    fn recv(&mut self, timeout: Duration) -> Result<CanMessage, ReceiveError> {
        loop {
            let frame = self.socket.read_frame_timeout(timeout).context(IoSnafu)?;
            if let Some(msg) = socketcan_frame_to_dcfsync_message(frame).context(CanSnafu)? {
                return Ok(msg);
            }
        }
    }
}

/// A blocking socketcan sender
#[derive(Debug, Clone)]
pub struct SocketCanSender {
    socket: Arc<CanSocket>,
}

impl CanSender for SocketCanSender {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        let frame = dcfsync_id_to_socketcan_id(msg.id())
            .and_then(|id| CanFrame::new(id, msg.data()))
            .ok_or(CanSendError(msg))?;
        self.socket.write_frame(&frame).map_err(|e| {
            log::debug!("socketcan write failed: {e}");
            CanSendError(msg)
        })
    }
}

/// Open a socketcan device and split it into a sender and receiver object
///
/// # Arguments
/// * `device` - The name of the socketcan device to open, e.g. "vcan0", or "can0"
///
/// A key benefit of this is that by creating both sender and receiver objects from a shared socket,
/// the receiver will not receive messages sent by the sender.
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub fn open_socketcan<S: AsRef<str>>(
    device: S,
) -> Result<(SocketCanSender, SocketCanReceiver), std::io::Error> {
    let device: &str = device.as_ref();
    let socket = CanSocket::open(device)?;
    log::debug!("Opened socketcan device {device}");
    let socket = Arc::new(socket);
    let receiver = SocketCanReceiver {
        socket: socket.clone(),
    };
    let sender = SocketCanSender { socket };
    Ok((sender, receiver))
}

use std::time::{Duration, Instant};

use dcfsync_common::{
    messages::{SDO_REQ_BASE, SDO_RESP_BASE},
    sdo::{AbortCode, SdoRequest, SdoResponse},
    traits::{CanReceiver, CanSender},
    CanId, NodeId,
};
use snafu::Snafu;

/// Default time to wait for each SDO response
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Errors returned by an SDO transfer
#[derive(Debug, PartialEq, Snafu)]
pub enum SdoClientError {
    /// No response was received before the timeout
    NoResponse,
    /// A response was received which could not be decoded
    MalformedResponse,
    /// A valid response was received, but it does not fit the transfer in progress
    UnexpectedResponse,
    /// The server aborted the transfer
    #[snafu(display("Server aborted transfer: {}", describe_abort(*abort_code)))]
    ServerAbort {
        /// The raw abort code sent by the server
        abort_code: u32,
    },
    /// The server did not alternate the toggle bit
    ToggleNotAlternated,
    /// The request could not be sent to the bus
    SendFailed,
}

impl SdoClientError {
    /// The abort code, when the error was a server abort with a known code
    pub fn abort_code(&self) -> Option<AbortCode> {
        match self {
            SdoClientError::ServerAbort { abort_code } => AbortCode::try_from(*abort_code).ok(),
            _ => None,
        }
    }
}

fn describe_abort(abort_code: u32) -> String {
    match AbortCode::try_from(abort_code) {
        Ok(code) => code.to_string(),
        Err(()) => format!("Unknown abort code ({abort_code:#010x})"),
    }
}

type Result<T> = std::result::Result<T, SdoClientError>;

/// A blocking request/response SDO transport
///
/// Implemented by [SdoClient] for devices on a bus, and by
/// [LocalNode](crate::node::LocalNode) for in-process dictionaries.
pub trait SdoTransfer {
    /// Read the raw value of an object
    fn upload(&mut self, index: u16, sub: u8, timeout: Duration) -> Result<Vec<u8>>;

    /// Write the raw value of an object
    fn download(&mut self, index: u16, sub: u8, data: &[u8], timeout: Duration) -> Result<()>;
}

/// An SDO client for accessing the dictionary of a single remote node
///
/// Payloads of up to 4 bytes are sent with expedited transfers, larger ones are segmented. There
/// are no retries: any failure ends the transfer and is returned to the caller.
#[derive(Debug)]
pub struct SdoClient<S, R> {
    req_cob_id: CanId,
    resp_cob_id: CanId,
    sender: S,
    receiver: R,
}

impl<S: CanSender, R: CanReceiver> SdoClient<S, R> {
    /// Create a client using the default SDO COB-IDs for `server_node_id`
    pub fn new_std(server_node_id: NodeId, sender: S, receiver: R) -> Self {
        let node = server_node_id.raw() as u16;
        Self {
            req_cob_id: CanId::Std(SDO_REQ_BASE + node),
            resp_cob_id: CanId::Std(SDO_RESP_BASE + node),
            sender,
            receiver,
        }
    }

    fn send(&mut self, req: SdoRequest) -> Result<()> {
        self.sender
            .send(req.to_can_message(self.req_cob_id))
            .map_err(|_| SendFailedSnafu.build())
    }

    fn send_abort(&mut self, index: u16, sub: u8, code: AbortCode) {
        if self.send(SdoRequest::abort(index, sub, code)).is_err() {
            log::warn!("Failed to send SDO abort for {index:04x}:{sub:02x}");
        }
    }

    /// Write `data` to the object at `index`/`sub`
    pub fn download(&mut self, index: u16, sub: u8, data: &[u8], timeout: Duration) -> Result<()> {
        if data.len() <= 4 {
            self.send(SdoRequest::expedited_download(index, sub, data))?;

            return match self.wait_for_response(timeout)? {
                SdoResponse::ConfirmDownload { .. } => Ok(()),
                SdoResponse::Abort { abort_code, .. } => ServerAbortSnafu { abort_code }.fail(),
                _ => UnexpectedResponseSnafu.fail(),
            };
        }

        self.send(SdoRequest::initiate_download(
            index,
            sub,
            Some(data.len() as u32),
        ))?;
        match self.wait_for_response(timeout)? {
            SdoResponse::ConfirmDownload { .. } => (),
            SdoResponse::Abort { abort_code, .. } => return ServerAbortSnafu { abort_code }.fail(),
            _ => return UnexpectedResponseSnafu.fail(),
        }

        let mut toggle = false;
        let total_segments = data.len().div_ceil(7);
        for (n, segment) in data.chunks(7).enumerate() {
            let last_segment = n == total_segments - 1;
            self.send(SdoRequest::download_segment(toggle, last_segment, segment))?;
            match self.wait_for_response(timeout)? {
                SdoResponse::ConfirmDownloadSegment { t } => {
                    if t != toggle {
                        self.send_abort(index, sub, AbortCode::ToggleNotAlternated);
                        return ToggleNotAlternatedSnafu.fail();
                    }
                }
                SdoResponse::Abort { abort_code, .. } => {
                    return ServerAbortSnafu { abort_code }.fail()
                }
                _ => return UnexpectedResponseSnafu.fail(),
            }
            toggle = !toggle;
        }
        Ok(())
    }

    /// Read the object at `index`/`sub`
    pub fn upload(&mut self, index: u16, sub: u8, timeout: Duration) -> Result<Vec<u8>> {
        let mut read_buf = Vec::new();

        self.send(SdoRequest::initiate_upload(index, sub))?;

        let expedited = match self.wait_for_response(timeout)? {
            SdoResponse::ConfirmUpload { n, e, s, data, .. } => {
                if e {
                    // Without the size flag, the number of valid bytes is unspecified
                    let len = if s { 4 - n as usize } else { 4 };
                    read_buf.extend_from_slice(&data[0..len]);
                }
                e
            }
            SdoResponse::Abort { abort_code, .. } => return ServerAbortSnafu { abort_code }.fail(),
            _ => return UnexpectedResponseSnafu.fail(),
        };

        if !expedited {
            let mut toggle = false;
            loop {
                self.send(SdoRequest::upload_segment_request(toggle))?;

                match self.wait_for_response(timeout)? {
                    SdoResponse::UploadSegment { t, n, c, data } => {
                        if t != toggle {
                            self.send_abort(index, sub, AbortCode::ToggleNotAlternated);
                            return ToggleNotAlternatedSnafu.fail();
                        }
                        read_buf.extend_from_slice(&data[0..7 - n as usize]);
                        if c {
                            break;
                        }
                    }
                    SdoResponse::Abort { abort_code, .. } => {
                        return ServerAbortSnafu { abort_code }.fail()
                    }
                    _ => return UnexpectedResponseSnafu.fail(),
                }
                toggle = !toggle;
            }
        }
        Ok(read_buf)
    }

    fn wait_for_response(&mut self, mut timeout: Duration) -> Result<SdoResponse> {
        let wait_until = Instant::now() + timeout;
        loop {
            let msg = self
                .receiver
                .recv(timeout)
                .map_err(|_| NoResponseSnafu.build())?;
            if msg.id == self.resp_cob_id {
                return msg.try_into().map_err(|_| MalformedResponseSnafu.build());
            }
            timeout = wait_until.saturating_duration_since(Instant::now());
            if timeout.is_zero() {
                return NoResponseSnafu.fail();
            }
        }
    }
}

impl<S: CanSender, R: CanReceiver> SdoTransfer for SdoClient<S, R> {
    fn upload(&mut self, index: u16, sub: u8, timeout: Duration) -> Result<Vec<u8>> {
        SdoClient::upload(self, index, sub, timeout)
    }

    fn download(&mut self, index: u16, sub: u8, data: &[u8], timeout: Duration) -> Result<()> {
        SdoClient::download(self, index, sub, data, timeout)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use dcfsync_common::{traits::CanSendError, CanMessage};

    use super::*;

    /// Records sent messages and replays scripted responses
    #[derive(Default)]
    struct Script {
        sent: Vec<CanMessage>,
        responses: VecDeque<CanMessage>,
    }

    struct Sender<'a>(&'a std::cell::RefCell<Script>);
    struct Receiver<'a>(&'a std::cell::RefCell<Script>);

    impl CanSender for Sender<'_> {
        fn send(&mut self, msg: CanMessage) -> std::result::Result<(), CanSendError> {
            self.0.borrow_mut().sent.push(msg);
            Ok(())
        }
    }

    impl CanReceiver for Receiver<'_> {
        type Error = ();

        fn try_recv(&mut self) -> Option<CanMessage> {
            self.0.borrow_mut().responses.pop_front()
        }

        fn recv(&mut self, _timeout: Duration) -> std::result::Result<CanMessage, ()> {
            self.try_recv().ok_or(())
        }
    }

    const RESP: CanId = CanId::Std(0x585);

    fn script(responses: &[SdoResponse]) -> std::cell::RefCell<Script> {
        std::cell::RefCell::new(Script {
            sent: Vec::new(),
            responses: responses.iter().map(|r| r.to_can_message(RESP)).collect(),
        })
    }

    fn node() -> NodeId {
        NodeId::new(5).unwrap()
    }

    #[test]
    fn test_expedited_upload() {
        let s = script(&[SdoResponse::expedited_upload(0x2001, 0, &[0x39, 0x30])]);
        let mut client = SdoClient::new_std(node(), Sender(&s), Receiver(&s));
        assert_eq!(
            vec![0x39, 0x30],
            client.upload(0x2001, 0, RESPONSE_TIMEOUT).unwrap()
        );
        let script = s.borrow();
        let sent = &script.sent;
        assert_eq!(CanId::Std(0x605), sent[0].id);
        assert_eq!(
            SdoRequest::initiate_upload(0x2001, 0),
            SdoRequest::try_from(sent[0].data()).unwrap()
        );
    }

    #[test]
    fn test_segmented_upload() {
        let s = script(&[
            SdoResponse::upload_acknowledge(0x2000, 0, 9),
            SdoResponse::upload_segment(false, false, b"hello w"),
            SdoResponse::upload_segment(true, true, b"ld"),
        ]);
        let mut client = SdoClient::new_std(node(), Sender(&s), Receiver(&s));
        assert_eq!(
            b"hello wld".to_vec(),
            client.upload(0x2000, 0, RESPONSE_TIMEOUT).unwrap()
        );
    }

    #[test]
    fn test_upload_toggle_error_sends_abort() {
        let s = script(&[
            SdoResponse::upload_acknowledge(0x2000, 0, 9),
            SdoResponse::upload_segment(true, false, b"hello w"),
        ]);
        let mut client = SdoClient::new_std(node(), Sender(&s), Receiver(&s));
        assert_eq!(
            Err(SdoClientError::ToggleNotAlternated),
            client.upload(0x2000, 0, RESPONSE_TIMEOUT)
        );
        let last = *s.borrow().sent.last().unwrap();
        assert_eq!(
            SdoRequest::abort(0x2000, 0, AbortCode::ToggleNotAlternated),
            SdoRequest::try_from(last.data()).unwrap()
        );
    }

    #[test]
    fn test_segmented_download() {
        let s = script(&[
            SdoResponse::download_acknowledge(0x2000, 0),
            SdoResponse::download_segment_acknowledge(false),
            SdoResponse::download_segment_acknowledge(true),
        ]);
        let mut client = SdoClient::new_std(node(), Sender(&s), Receiver(&s));
        client
            .download(0x2000, 0, b"0123456789", RESPONSE_TIMEOUT)
            .unwrap();
        let script = s.borrow();
        let sent = &script.sent;
        assert_eq!(3, sent.len());
        assert_eq!(
            SdoRequest::download_segment(true, true, b"789"),
            SdoRequest::try_from(sent[2].data()).unwrap()
        );
    }

    #[test]
    fn test_abort_and_timeout() {
        let s = script(&[SdoResponse::abort(0x2000, 0, AbortCode::NoSuchObject)]);
        let mut client = SdoClient::new_std(node(), Sender(&s), Receiver(&s));
        let err = client.download(0x2000, 0, &[1], RESPONSE_TIMEOUT).unwrap_err();
        assert_eq!(Some(AbortCode::NoSuchObject), err.abort_code());
        assert!(err.to_string().contains("0x06020000"));

        assert_eq!(
            Err(SdoClientError::NoResponse),
            client.upload(0x2000, 0, RESPONSE_TIMEOUT)
        );
    }

    #[test]
    fn test_other_node_responses_are_ignored() {
        let s = script(&[]);
        s.borrow_mut().responses.push_back(
            SdoResponse::download_acknowledge(0x2000, 0).to_can_message(CanId::Std(0x586)),
        );
        s.borrow_mut().responses.push_back(
            SdoResponse::download_acknowledge(0x2000, 0).to_can_message(RESP),
        );
        let mut client = SdoClient::new_std(node(), Sender(&s), Receiver(&s));
        client.download(0x2000, 0, &[1, 2], RESPONSE_TIMEOUT).unwrap();
    }
}

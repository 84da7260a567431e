//! An SDO server backed by an in-memory [ObjectDictionary]
use dcfsync_common::{
    objects::DataType,
    sdo::{AbortCode, SdoRequest, SdoResponse},
};

use crate::object_dict::{decode_raw, Entry, ObjectDictionary, Value};

#[derive(Clone, Debug, Default, PartialEq)]
enum State {
    #[default]
    Idle,
    DownloadSegment {
        size: Option<usize>,
        buf: Vec<u8>,
    },
    UploadSegment {
        data: Vec<u8>,
        offset: usize,
    },
}

/// Serves SDO requests against the values of an object dictionary
#[derive(Debug, Default)]
pub struct SdoServer {
    toggle_state: bool,
    state: State,
    index: u16,
    sub: u8,
}

fn lookup(od: &ObjectDictionary, index: u16, sub: u8) -> Result<&Entry, AbortCode> {
    let obj = od.object(index).ok_or(AbortCode::NoSuchObject)?;
    obj.entry(sub).ok_or(AbortCode::NoSuchSubIndex)
}

/// Read the raw value of an entry, applying the access rules of an SDO upload
pub(crate) fn read_entry(od: &ObjectDictionary, index: u16, sub: u8) -> Result<Vec<u8>, AbortCode> {
    let entry = lookup(od, index, sub)?;
    if !entry.readable() {
        return Err(AbortCode::WriteOnly);
    }
    if entry.value.is_none() {
        return Err(AbortCode::NoData);
    }
    entry.encode_raw().map_err(|e| {
        log::warn!("Cannot encode {}: {e}", entry.id());
        AbortCode::GeneralError
    })
}

fn check_size(data_type: DataType, dl_size: usize) -> Result<(), AbortCode> {
    if let Some(size) = data_type.fixed_size() {
        if dl_size < size {
            return Err(AbortCode::DataTypeMismatchLengthLow);
        } else if dl_size > size {
            return Err(AbortCode::DataTypeMismatchLengthHigh);
        }
    }
    Ok(())
}

fn check_writable(od: &ObjectDictionary, index: u16, sub: u8) -> Result<DataType, AbortCode> {
    let entry = lookup(od, index, sub)?;
    if !entry.writable() {
        return Err(AbortCode::ReadOnly);
    }
    Ok(entry.data_type)
}

/// Store raw data into an entry, applying the access rules of an SDO download
pub(crate) fn write_entry(
    od: &mut ObjectDictionary,
    index: u16,
    sub: u8,
    data: &[u8],
) -> Result<(), AbortCode> {
    let data_type = check_writable(od, index, sub)?;
    check_size(data_type, data.len())?;
    let value = match decode_raw(data_type, data) {
        Ok(value) => value,
        Err(_) => Value::Bytes(data.to_vec()),
    };
    od.set_value(index, sub, value)
        .map_err(|_| AbortCode::NoSuchSubIndex)
}

impl SdoServer {
    /// Create a new, idle server
    pub fn new() -> Self {
        Self::default()
    }

    fn abort(&mut self, abort_code: AbortCode) -> Option<SdoResponse> {
        self.state = State::Idle;
        Some(SdoResponse::abort(self.index, self.sub, abort_code))
    }

    /// Process one request, returning the response to send, if any
    pub fn handle_request(
        &mut self,
        req: &SdoRequest,
        od: &mut ObjectDictionary,
    ) -> Option<SdoResponse> {
        match req {
            SdoRequest::InitiateUpload { index, sub } => {
                self.index = *index;
                self.sub = *sub;
                self.toggle_state = false;
                let data = match read_entry(od, *index, *sub) {
                    Ok(data) => data,
                    Err(abort_code) => return self.abort(abort_code),
                };

                if data.len() <= 4 {
                    self.state = State::Idle;
                    Some(SdoResponse::expedited_upload(*index, *sub, &data))
                } else {
                    let size = data.len() as u32;
                    self.state = State::UploadSegment { data, offset: 0 };
                    Some(SdoResponse::upload_acknowledge(*index, *sub, size))
                }
            }
            SdoRequest::InitiateDownload {
                n,
                e,
                s,
                index,
                sub,
                data,
            } => {
                self.index = *index;
                self.sub = *sub;
                if *e {
                    let dl_size = if *s { 4 - *n as usize } else { 4 };
                    if let Err(abort_code) = write_entry(od, *index, *sub, &data[0..dl_size]) {
                        return self.abort(abort_code);
                    }
                    self.state = State::Idle;
                    Some(SdoResponse::download_acknowledge(*index, *sub))
                } else {
                    let data_type = match check_writable(od, *index, *sub) {
                        Ok(data_type) => data_type,
                        Err(abort_code) => return self.abort(abort_code),
                    };
                    let size = if *s {
                        let size = u32::from_le_bytes(*data) as usize;
                        if let Err(abort_code) = check_size(data_type, size) {
                            return self.abort(abort_code);
                        }
                        Some(size)
                    } else {
                        None
                    };

                    self.toggle_state = false;
                    self.state = State::DownloadSegment {
                        size,
                        buf: Vec::new(),
                    };
                    Some(SdoResponse::download_acknowledge(*index, *sub))
                }
            }
            SdoRequest::DownloadSegment { t, n, c, data } => {
                let State::DownloadSegment { size, buf } = &mut self.state else {
                    return self.abort(AbortCode::InvalidCommandSpecifier);
                };
                if *t != self.toggle_state {
                    return self.abort(AbortCode::ToggleNotAlternated);
                }

                buf.extend_from_slice(&data[0..7 - *n as usize]);
                if let Some(size) = size {
                    if buf.len() > *size {
                        return self.abort(AbortCode::DataTypeMismatchLengthHigh);
                    }
                }
                if *c {
                    let buf = core::mem::take(buf);
                    if let Err(abort_code) = write_entry(od, self.index, self.sub, &buf) {
                        return self.abort(abort_code);
                    }
                    self.state = State::Idle;
                }
                self.toggle_state = !self.toggle_state;
                Some(SdoResponse::download_segment_acknowledge(*t))
            }
            SdoRequest::ReqUploadSegment { t } => {
                let State::UploadSegment { data, offset } = &mut self.state else {
                    return self.abort(AbortCode::InvalidCommandSpecifier);
                };
                if *t != self.toggle_state {
                    return self.abort(AbortCode::ToggleNotAlternated);
                }

                let read_size = (data.len() - *offset).min(7);
                let segment = &data[*offset..*offset + read_size];
                *offset += read_size;
                // Is this the last segment of the upload?
                let c = *offset == data.len();
                let resp = SdoResponse::upload_segment(*t, c, segment);
                if c {
                    self.state = State::Idle;
                }
                self.toggle_state = !self.toggle_state;
                Some(resp)
            }
            SdoRequest::Abort { .. } => {
                self.state = State::Idle;
                // No response is sent to an abort command
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dcfsync_common::objects::AccessType;

    use super::*;
    use crate::object_dict::Object;

    fn od() -> ObjectDictionary {
        let mut od = ObjectDictionary::new();
        od.insert(Object::Variable(
            Entry::new("Name", 0x2000, 0, DataType::VisibleString, AccessType::Rw)
                .with_value(Value::Str("hello!".into())),
        ));
        od.insert(Object::Variable(
            Entry::new("Counter", 0x2001, 0, DataType::UInt16, AccessType::Rw)
                .with_value(Value::UInt(12345)),
        ));
        od.insert(Object::Variable(
            Entry::new("Serial", 0x2002, 0, DataType::UInt32, AccessType::Ro)
                .with_value(Value::UInt(7)),
        ));
        od.insert(Object::Variable(Entry::new(
            "Command",
            0x2003,
            0,
            DataType::UInt8,
            AccessType::Wo,
        )));
        od
    }

    #[test]
    fn test_expedited() {
        let mut od = od();
        let mut server = SdoServer::new();
        assert_eq!(
            Some(SdoResponse::expedited_upload(0x2001, 0, &[0x39, 0x30])),
            server.handle_request(&SdoRequest::initiate_upload(0x2001, 0), &mut od)
        );
        assert_eq!(
            Some(SdoResponse::download_acknowledge(0x2001, 0)),
            server.handle_request(&SdoRequest::expedited_download(0x2001, 0, &[1, 0]), &mut od)
        );
        assert_eq!(Value::UInt(1), od.get(0x2001, 0).unwrap().value);
    }

    #[test]
    fn test_access_aborts() {
        let mut od = od();
        let mut server = SdoServer::new();
        let cases = [
            (SdoRequest::initiate_upload(0x3000, 0), AbortCode::NoSuchObject),
            (SdoRequest::initiate_upload(0x2001, 1), AbortCode::NoSuchSubIndex),
            (SdoRequest::initiate_upload(0x2003, 0), AbortCode::WriteOnly),
            (
                SdoRequest::expedited_download(0x2002, 0, &[1, 0, 0, 0]),
                AbortCode::ReadOnly,
            ),
            (
                SdoRequest::expedited_download(0x2001, 0, &[1]),
                AbortCode::DataTypeMismatchLengthLow,
            ),
            (
                SdoRequest::expedited_download(0x2001, 0, &[1, 2, 3]),
                AbortCode::DataTypeMismatchLengthHigh,
            ),
            (SdoRequest::upload_segment_request(false), AbortCode::InvalidCommandSpecifier),
        ];
        for (req, code) in cases {
            match server.handle_request(&req, &mut od) {
                Some(SdoResponse::Abort { abort_code, .. }) => assert_eq!(code as u32, abort_code),
                other => panic!("Expected abort {code:?} for {req:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_segmented_upload_and_download() {
        let mut od = od();
        let mut server = SdoServer::new();

        assert_eq!(
            Some(SdoResponse::download_acknowledge(0x2000, 0)),
            server.handle_request(&SdoRequest::initiate_download(0x2000, 0, Some(9)), &mut od)
        );
        assert_eq!(
            Some(SdoResponse::download_segment_acknowledge(false)),
            server.handle_request(&SdoRequest::download_segment(false, false, b"goodbye"), &mut od)
        );
        assert_eq!(
            Some(SdoResponse::download_segment_acknowledge(true)),
            server.handle_request(&SdoRequest::download_segment(true, true, b"!!"), &mut od)
        );
        assert_eq!(
            Value::Str("goodbye!!".into()),
            od.get(0x2000, 0).unwrap().value
        );

        assert_eq!(
            Some(SdoResponse::upload_acknowledge(0x2000, 0, 9)),
            server.handle_request(&SdoRequest::initiate_upload(0x2000, 0), &mut od)
        );
        assert_eq!(
            Some(SdoResponse::upload_segment(false, false, b"goodbye")),
            server.handle_request(&SdoRequest::upload_segment_request(false), &mut od)
        );
        // Repeating the toggle value is an error
        assert_eq!(
            Some(SdoResponse::abort(0x2000, 0, AbortCode::ToggleNotAlternated)),
            server.handle_request(&SdoRequest::upload_segment_request(false), &mut od)
        );
    }

    #[test]
    fn test_client_abort_resets_state() {
        let mut od = od();
        let mut server = SdoServer::new();
        server.handle_request(&SdoRequest::initiate_upload(0x2000, 0), &mut od);
        assert_eq!(
            None,
            server.handle_request(
                &SdoRequest::abort(0x2000, 0, AbortCode::GeneralError),
                &mut od
            )
        );
        assert!(matches!(
            server.handle_request(&SdoRequest::upload_segment_request(false), &mut od),
            Some(SdoResponse::Abort { .. })
        ));
    }
}

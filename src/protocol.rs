//! The bracketed, comma separated text protocol spoken by 4Heat stove controllers.
//!
//! Every exchange is a single request frame such as `["SEL","0"]` answered by a single response
//! frame such as `["SEL","3","I30001000000000005","I30002000000000000","B20364000000000004"]`.
//! Reading items are laid out as `<marker:1><register:5><separator:1><value>`.
use std::num::ParseIntError;

use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::registers::{Marker, RegisterId};

pub const TCP_PORT: u16 = 80;

/// Responses are never read past this many bytes.
pub const SOCKET_BUFFER: usize = 1024;

/// Fields of this length or shorter are protocol bookkeeping rather than readings.
pub const MIN_FIELD_LEN: usize = 5;

/// Offset of the register id in a reading field.
const REGISTER_OFFSET: usize = 1;
/// Offset of the value digits in a reading field.
const VALUE_OFFSET: usize = 7;
/// Width the value is zero-padded to in command items.
const VALUE_WIDTH: usize = 12;

/// Values that fit the fixed width of a command item, sign included.
pub const SETTABLE_VALUES: std::ops::RangeInclusive<i64> = -99_999_999_999..=999_999_999_999;

/// First field of a response telling the client to re-query with [`Request::Errors`].
pub const ERROR_SENTINEL: &str = "ERR";

const TURN_ON: RegisterId = RegisterId::new_const("30253");
const TURN_OFF: RegisterId = RegisterId::new_const("30254");
const UNBLOCK: RegisterId = RegisterId::new_const("30255");
const ERROR_QUERY_REGISTERS: [RegisterId; 3] = [
    RegisterId::new_const("30001"),
    RegisterId::new_const("30002"),
    RegisterId::new_const("30017"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Read out every register the controller is willing to report.
    Data,
    /// Read out the state, error and boiler water registers while the stove reports an error.
    Errors,
    TurnOn,
    TurnOff,
    Unblock,
    /// Switch command understood by older controller firmware. `false` turns the stove on.
    LegacySwitch { off: bool },
    SetValue { register: RegisterId, value: i64 },
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("field `{0}` is too short to carry a reading")]
    TooShort(String),
    #[error("field `{0}` does not carry a valid register id")]
    RegisterId(String),
    #[error("value of field `{1}` is not an integer")]
    Value(#[source] ParseIntError, String),
}

/// A decoded register reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub marker: Marker,
    pub register: RegisterId,
    pub value: i64,
}

impl Reading {
    /// Decode a single reading field.
    pub fn decode(field: &str) -> Result<Self, DecodeError> {
        let too_short = || DecodeError::TooShort(field.to_string());
        let marker = field.chars().next().ok_or_else(too_short)?;
        let register = field
            .get(REGISTER_OFFSET..REGISTER_OFFSET + RegisterId::LEN)
            .ok_or_else(too_short)?;
        let register = register
            .parse::<RegisterId>()
            .map_err(|_| DecodeError::RegisterId(field.to_string()))?;
        let value = field.get(VALUE_OFFSET..).filter(|v| !v.is_empty()).ok_or_else(too_short)?;
        let value = value.parse::<i64>().map_err(|e| DecodeError::Value(e, field.to_string()))?;
        Ok(Reading { marker: Marker(marker), register, value })
    }
}

/// The fields of one response frame, with brackets and quotes removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub fields: Vec<String>,
}

impl Frame {
    pub fn parse(text: &str) -> Self {
        let stripped = text.replace(['[', ']', '"'], "");
        Frame { fields: stripped.split(',').map(|f| f.trim().to_string()).collect() }
    }

    pub fn first_field(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }

    /// An empty frame or one with a blank leading field carries nothing usable.
    pub fn is_blank(&self) -> bool {
        self.first_field().is_none_or(str::is_empty)
    }

    /// The controller asks for an [`Request::Errors`] query instead of sending data.
    pub fn is_error_redirect(&self) -> bool {
        self.first_field() == Some(ERROR_SENTINEL)
    }

    /// Decode all candidate reading fields.
    ///
    /// Fields not longer than [`MIN_FIELD_LEN`] are skipped silently, each remaining field
    /// produces either a reading or the reason it could not be decoded.
    pub fn readings(&self) -> impl Iterator<Item = Result<Reading, DecodeError>> + '_ {
        self.fields.iter().filter(|f| f.len() > MIN_FIELD_LEN).map(|f| Reading::decode(f))
    }

    /// Register ids reported in this frame, in order and without duplicates.
    pub fn registers(&self) -> Vec<RegisterId> {
        let mut ids = Vec::new();
        for reading in self.readings().flatten() {
            if !ids.contains(&reading.register) {
                ids.push(reading.register);
            }
        }
        ids
    }
}

fn write_frame(dst: &mut BytesMut, fields: &[&str]) {
    dst.extend_from_slice(b"[");
    for (idx, field) in fields.iter().enumerate() {
        if idx != 0 {
            dst.extend_from_slice(b",");
        }
        dst.extend_from_slice(b"\"");
        dst.extend_from_slice(field.as_bytes());
        dst.extend_from_slice(b"\"");
    }
    dst.extend_from_slice(b"]");
}

fn item(kind: char, register: RegisterId, value: i64) -> String {
    format!("{kind}{register}{value:0width$}", width = VALUE_WIDTH)
}

fn execute(register: RegisterId) -> String {
    item('J', register, 1)
}

pub struct StoveCodec {}

impl Encoder<&Request> for StoveCodec {
    type Error = std::io::Error;
    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match *req {
            Request::Data => write_frame(dst, &["SEL", "0"]),
            Request::Errors => {
                let items = ERROR_QUERY_REGISTERS.map(|r| item('I', r, 0));
                let count = items.len().to_string();
                let mut fields = vec!["SEC", count.as_str()];
                fields.extend(items.iter().map(String::as_str));
                write_frame(dst, &fields);
            }
            Request::TurnOn => write_frame(dst, &["SEC", "1", execute(TURN_ON).as_str()]),
            Request::TurnOff => write_frame(dst, &["SEC", "1", execute(TURN_OFF).as_str()]),
            Request::Unblock => write_frame(dst, &["SEC", "1", execute(UNBLOCK).as_str()]),
            Request::LegacySwitch { off } => {
                write_frame(dst, &["SEC", "1", if off { "1" } else { "0" }])
            }
            Request::SetValue { register, value } => {
                write_frame(dst, &["SEC", "1", item('B', register, value).as_str()])
            }
        }
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for StoveCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        trace!(message = "attempt at decoding", buffer = ?src);
        let Some(end) = src.iter().position(|b| *b == b']') else {
            return Ok(None);
        };
        let frame = src.split_to(end + 1);
        Ok(Some(Frame::parse(&String::from_utf8_lossy(&frame))))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Without the closing bracket the response may have been cut off mid field. Only a last
        // field that is closed by its quote is known to be complete.
        let text = String::from_utf8_lossy(src).into_owned();
        src.advance(src.len());
        let mut frame = Frame::parse(&text);
        let last = text.rsplit(',').next().unwrap_or_default().trim();
        let complete = last.len() >= 2 && last.starts_with('"') && last.ends_with('"');
        if !complete {
            let dropped = frame.fields.pop();
            debug!(message = "dropped a truncated field", ?dropped);
        }
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(req: Request) -> String {
        let mut dst = BytesMut::new();
        StoveCodec {}.encode(&req, &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn fixed_command_frames() {
        assert_eq!(encode(Request::Data), r#"["SEL","0"]"#);
        assert_eq!(
            encode(Request::Errors),
            r#"["SEC","3","I30001000000000000","I30002000000000000","I30017000000000000"]"#
        );
        assert_eq!(encode(Request::TurnOn), r#"["SEC","1","J30253000000000001"]"#);
        assert_eq!(encode(Request::TurnOff), r#"["SEC","1","J30254000000000001"]"#);
        assert_eq!(encode(Request::Unblock), r#"["SEC","1","J30255000000000001"]"#);
        assert_eq!(encode(Request::LegacySwitch { off: false }), r#"["SEC","1","0"]"#);
        assert_eq!(encode(Request::LegacySwitch { off: true }), r#"["SEC","1","1"]"#);
    }

    #[test]
    fn set_value_frame_is_zero_padded() {
        let register = RegisterId::new_const("30001");
        assert_eq!(
            encode(Request::SetValue { register, value: 2 }),
            r#"["SEC","1","B30001000000000002"]"#
        );
        assert_eq!(
            encode(Request::SetValue { register, value: -5 }),
            r#"["SEC","1","B30001-00000000005"]"#
        );
        for value in [*SETTABLE_VALUES.start(), *SETTABLE_VALUES.end()] {
            let frame = encode(Request::SetValue { register, value });
            assert_eq!(frame.len(), r#"["SEC","1","B30001000000000002"]"#.len());
        }
    }

    #[test]
    fn reading_offsets() {
        let reading = Reading::decode("I30017000000000210").unwrap();
        assert_eq!(reading.marker, Marker('I'));
        assert_eq!(reading.register, RegisterId::new_const("30017"));
        assert_eq!(reading.value, 210);

        let reading = Reading::decode("B20364000000000004").unwrap();
        assert!(reading.marker.is_settable());
        assert_eq!(reading.value, 4);
    }

    #[test]
    fn malformed_readings() {
        assert!(matches!(Reading::decode("I3001"), Err(DecodeError::TooShort(_))));
        assert!(matches!(Reading::decode("I300010"), Err(DecodeError::TooShort(_))));
        assert!(matches!(Reading::decode("Ix0001000000000001"), Err(DecodeError::RegisterId(_))));
        assert!(matches!(Reading::decode("I300010000000000zz"), Err(DecodeError::Value(..))));
    }

    #[test]
    fn frame_skips_bad_fields_without_dropping_the_batch() {
        let frame =
            Frame::parse(r#"["SEL","3","I30001000000000005","I30002000000000x00","I30017000000000210"]"#);
        let (ok, err): (Vec<_>, Vec<_>) = frame.readings().partition(Result::is_ok);
        assert_eq!(ok.len(), 2);
        assert_eq!(err.len(), 1);
        assert_eq!(
            frame.registers(),
            vec![RegisterId::new_const("30001"), RegisterId::new_const("30017")]
        );
    }

    #[test]
    fn error_redirect() {
        assert!(Frame::parse(r#"["ERR","0"]"#).is_error_redirect());
        assert!(!Frame::parse(r#"["SEL","0"]"#).is_error_redirect());
        assert!(Frame::parse("").is_blank());
        assert!(Frame::default().is_blank());
    }

    #[test]
    fn decoder_takes_one_frame() {
        let mut codec = StoveCodec {};
        let mut src = BytesMut::from(&br#"["SEL","1","I30001000000000005"]"#[..]);
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.fields, vec!["SEL", "1", "I30001000000000005"]);
        assert!(src.is_empty());

        let mut partial = BytesMut::from(&br#"["SEL","1","I30001000000000005""#[..]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        let frame = codec.decode_eof(&mut partial).unwrap().unwrap();
        assert_eq!(frame.fields, vec!["SEL", "1", "I30001000000000005"]);
        assert!(codec.decode_eof(&mut partial).unwrap().is_none());
    }

    #[test]
    fn truncated_response_loses_its_last_field() {
        let mut codec = StoveCodec {};
        let full = br#"["SEL","2","I30001000000000005","I30017000000000210"]"#;
        let mut cut = BytesMut::from(&full[..full.len() - 6]);
        let frame = codec.decode_eof(&mut cut).unwrap().unwrap();
        assert_eq!(frame.fields, vec!["SEL", "2", "I30001000000000005"]);
        assert_eq!(frame.registers(), vec![RegisterId::new_const("30001")]);

        let mut cut = BytesMut::from(&br#"["SEL","2","I30001000000000005",""#[..]);
        let frame = codec.decode_eof(&mut cut).unwrap().unwrap();
        assert_eq!(frame.fields, vec!["SEL", "2", "I30001000000000005"]);
    }
}

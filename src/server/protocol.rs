// Framing for the unix socket protocol.
//
// Every message is a 10 byte header followed by a JSON
// body of msg_len bytes:
//   [0]     version (always 0)
//   [1]     message type
//   [2..6]  msg_len u32 little endian
//   [6..10] msg_id  u32 little endian
//
// Upper case types go client -> server, lower case
// server -> client.

use std::io::Read;

use serde::{Serialize, Deserialize};

use crate::errors::*;
use crate::echo::Config;
use crate::exchange::State;

pub const VERSION: u8 = 0;
pub const HEADER_LEN: usize = 10;
// Requests are tiny; anything bigger is garbage
pub const MAX_BODY: u32 = 64 * 1024;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum MsgType {
	// client -> server
	Hello,
	Heartbeat,
	Init,
	Start,
	Stop,
	Shutdown,
	Close,

	// server -> client
	HelloReply,
	InitReply,
	StartReply,
	StopReply,
	ShutdownReply,
	Measurement,
	Closed,
}

impl MsgType {
	pub fn from_byte(b: u8) -> Result<Self> {
		use MsgType::*;
		Ok(match b {
			b'A' => Hello,
			b'H' => Heartbeat,
			b'I' => Init,
			b'S' => Start,
			b'T' => Stop,
			b'D' => Shutdown,
			b'Z' => Close,
			b'a' => HelloReply,
			b'i' => InitReply,
			b's' => StartReply,
			b't' => StopReply,
			b'd' => ShutdownReply,
			b'f' => Measurement,
			b'z' => Closed,
			_ => return Err(Error::new(ErrorType::InvalidRequest)),
		})
	}

	pub fn to_byte(self) -> u8 {
		use MsgType::*;
		match self {
			Hello => b'A',
			Heartbeat => b'H',
			Init => b'I',
			Start => b'S',
			Stop => b'T',
			Shutdown => b'D',
			Close => b'Z',
			HelloReply => b'a',
			InitReply => b'i',
			StartReply => b's',
			StopReply => b't',
			ShutdownReply => b'd',
			Measurement => b'f',
			Closed => b'z',
		}
	}

	pub fn from_client(self) -> bool {
		self.to_byte().is_ascii_uppercase()
	}
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Header {
	pub msg_type: MsgType,
	pub msg_len: u32,
	pub msg_id: u32,
}

impl Header {
	pub fn from_raw(raw: &[u8; HEADER_LEN]) -> Result<Self> {
		// The first byte is the version
		if raw[0] != VERSION {
			return Err(Error::new(ErrorType::InvalidRequest));
		}

		let msg_type = MsgType::from_byte(raw[1])?;

		// Parse the msg_len - u32 little endian
		let msg_len = u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]);
		if msg_len > MAX_BODY {
			return Err(Error::new(ErrorType::InvalidRequest));
		}

		let msg_id = u32::from_le_bytes([raw[6], raw[7], raw[8], raw[9]]);

		Ok(Self{
			msg_type: msg_type,
			msg_len: msg_len,
			msg_id: msg_id,
		})
	}

	pub fn to_raw(&self) -> [u8; HEADER_LEN] {
		let mut raw = [0u8; HEADER_LEN];
		raw[0] = VERSION;
		raw[1] = self.msg_type.to_byte();
		raw[2..6].copy_from_slice(&self.msg_len.to_le_bytes());
		raw[6..10].copy_from_slice(&self.msg_id.to_le_bytes());
		raw
	}
}

// encode writes one whole message into buf, replacing
// whatever was there.
pub fn encode<T: Serialize>(buf: &mut Vec<u8>,
	                        msg_type: MsgType,
	                        msg_id: u32,
	                        body: &T) -> Result<()> {
	let body = serde_json::to_vec(body)?;
	let header = Header{
		msg_type: msg_type,
		msg_len: body.len() as u32,
		msg_id: msg_id,
	};
	buf.clear();
	buf.extend_from_slice(&header.to_raw());
	buf.extend_from_slice(&body);
	Ok(())
}

// encode_empty is for messages with no body at all
pub fn encode_empty(buf: &mut Vec<u8>, msg_type: MsgType, msg_id: u32) {
	let header = Header{
		msg_type: msg_type,
		msg_len: 0,
		msg_id: msg_id,
	};
	buf.clear();
	buf.extend_from_slice(&header.to_raw());
}

// read_msg blocks for one whole message
pub fn read_msg<R: Read>(r: &mut R) -> Result<(Header, Vec<u8>)> {
	let mut raw = [0u8; HEADER_LEN];
	r.read_exact(&mut raw)?;
	let header = Header::from_raw(&raw)?;
	let mut body = vec![0u8; header.msg_len as usize];
	r.read_exact(&mut body)?;
	Ok((header, body))
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HelloResponse {
	pub config: Config,
	pub session_id: String,
	pub state: State,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
	pub token: String,
}

// Status answers init, start, stop and shutdown
#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
	pub success: bool,
	pub exit_code: u8,
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
}

impl Status {
	pub fn ok() -> Self {
		Self{
			success: true,
			exit_code: 0,
			error: None,
			token: None,
		}
	}

	pub fn failed(e: &Box<dyn std::error::Error>) -> Self {
		Self{
			success: false,
			exit_code: code_of(e),
			error: Some(e.to_string()),
			token: None,
		}
	}

	pub fn from_result(r: &Result<()>) -> Self {
		match r {
			Ok(()) => Self::ok(),
			Err(e) => Self::failed(e),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn header_layout() {
		let h = Header{
			msg_type: MsgType::Stop,
			msg_len: 0x0102,
			msg_id: 7,
		};
		assert_eq!(h.to_raw(), [0, b'T', 2, 1, 0, 0, 7, 0, 0, 0]);
		assert_eq!(Header::from_raw(&h.to_raw()).unwrap(), h);
	}

	#[test]
	fn bad_headers_are_refused() {
		let wrong_version = [1, b'A', 0, 0, 0, 0, 0, 0, 0, 0];
		let unknown_type = [0, b'Q', 0, 0, 0, 0, 0, 0, 0, 0];
		let huge = [0, b'I', 0, 0, 0, 1, 0, 0, 0, 0];
		for raw in [wrong_version, unknown_type, huge].iter() {
			let e = Header::from_raw(raw).unwrap_err();
			assert_eq!(kind_of(&e), Some(ErrorType::InvalidRequest));
		}
	}

	#[test]
	fn direction_follows_case() {
		assert!(MsgType::Init.from_client());
		assert!(!MsgType::InitReply.from_client());
		assert!(!MsgType::Measurement.from_client());
	}

	#[test]
	fn messages_read_back() {
		let mut buf = vec![];
		let req = StopRequest{token: "abc".to_string()};
		encode(&mut buf, MsgType::Stop, 3, &req).unwrap();

		let (h, body) = read_msg(&mut Cursor::new(&buf)).unwrap();
		assert_eq!(h.msg_type, MsgType::Stop);
		assert_eq!(h.msg_id, 3);
		assert_eq!(h.msg_len as usize, body.len());
		let back: StopRequest = serde_json::from_slice(&body).unwrap();
		assert_eq!(back, req);
	}

	#[test]
	fn status_json() {
		let e = Error::new(ErrorType::ServerBusy);
		let s = serde_json::to_string(&Status::failed(&e)).unwrap();
		assert_eq!(s,
			r#"{"success":false,"exitCode":4,"error":"server_busy"}"#);

		let mut ok = Status::ok();
		ok.token = Some("ff".to_string());
		let s = serde_json::to_string(&ok).unwrap();
		assert_eq!(s,
			r#"{"success":true,"exitCode":0,"error":null,"token":"ff"}"#);
	}
}

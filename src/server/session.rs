use std::sync::Arc;
use std::os::unix::net::UnixStream;
use std::time;
use std::io::{Read, Write};
use std::fs::{File, OpenOptions};

use serde::Serialize;

use crate::errors::*;
use crate::echo::Echo;
use crate::exchange::{Exchange, Subscription};
use crate::{info, warn, error, tags};
use super::protocol::*;

// Bytes a client may leave unread before we drop it
const MAX_BACKLOG: usize = 256 * 1024;

#[derive(Copy, Clone, PartialEq)]
enum ReadState {
	Header,
	Body,
}

pub struct Session{
	n: Arc<Echo>,
	exc: Arc<Exchange>,
	stream: UnixStream,
	last_read: time::Instant,

	// The stream this connection started, if any
	subscription: Option<Subscription>,
	last_write: time::Instant,
	stream_interval: time::Duration,

	// Session Data
	session_id: String,

	// Read state / buffers
	read_state: ReadState,
	read_header_buf: [u8; HEADER_LEN],
	read_bytes_read: usize,
	read_body_buf: Vec<u8>,
	read_header: Option<Header>,

	// Encoded messages not yet taken by the socket. The
	// client may be slow so this only drains as it reads.
	write_buffer: Vec<u8>,
	msg_buffer: Vec<u8>,
	// Last time the backlog was empty or shrank
	last_drain: time::Instant,

	// Random number file/buffer
	rand_file: File,
	rand_buf: [u8; 4],
}

impl Session {
	pub fn new(n: Arc<Echo>,
		exc: Arc<Exchange>,
		stream: UnixStream) -> Result<Self>{

		let rand_file = OpenOptions::new()
			.read(true)
			.open("/dev/urandom")?;

		let stream_interval = time::Duration::from_millis(
			n.config.stream_interval);

		Ok(Self{
			n: n,
			exc: exc,
			stream: stream,
			last_read: time::Instant::now(),
			subscription: None,
			last_write: time::Instant::now(),
			stream_interval: stream_interval,
			session_id: String::new(),
			read_state: ReadState::Header,
			read_header_buf: [0; HEADER_LEN],
			read_bytes_read: 0,
			read_body_buf: Vec::with_capacity(1024),
			read_header: None,
			write_buffer: Vec::with_capacity(1024),
			msg_buffer: Vec::with_capacity(256),
			last_drain: time::Instant::now(),
			rand_file: rand_file,
			rand_buf: [0; 4],
		})
	}

	fn rand_u32(&mut self) -> Result<u32> {
		self.rand_file.read_exact(&mut self.rand_buf)?;
		Ok(u32::from_le_bytes(self.rand_buf))
	}

	fn new_session_id(&mut self) -> Result<()> {
		let id = self.rand_u32()?;
		self.session_id = format!("{:08x}", id);
		Ok(())
	}

	fn write_msg<T: Serialize>(&mut self,
				               msg_type: MsgType,
				               body: &T) -> Result<()> {
		let msg_id = self.rand_u32()?;
		encode(&mut self.msg_buffer, msg_type, msg_id, body)?;
		self.queue()
	}

	// queue appends the encoded message and sends what the
	// socket will take without blocking.
	fn queue(&mut self) -> Result<()> {
		if self.write_buffer.is_empty() {
			self.last_drain = time::Instant::now();
		}
		self.write_buffer.extend_from_slice(&self.msg_buffer);
		if self.write_buffer.len() > MAX_BACKLOG {
			warn!("client isn't reading", tags![
				("session_id", &self.session_id),
				("backlog", &self.write_buffer.len().to_string())
			]);
			return Err(Error::new(ErrorType::ClientTimeout));
		}
		self.write()
	}

	fn write_status(&mut self, msg_type: MsgType, status: Status) -> Result<()> {
		info!("replying", tags![
			("session_id", &self.session_id),
			("msg_type", &format!("{:?}", msg_type)),
			("exit_code", &status.exit_code.to_string())
		]);
		self.write_msg(msg_type, &status)
	}

	// write never blocks. Whatever the socket refuses stays
	// in write_buffer for the next tick.
	fn write(&mut self) -> Result<()> {
		use std::io::ErrorKind::{WouldBlock, Interrupted, WriteZero};

		let mut num_sent = 0;
		while num_sent < self.write_buffer.len() {
			let buf = &self.write_buffer[num_sent..];
			match self.stream.write(buf) {
				Ok(0) => return Err(Box::new(std::io::Error::from(WriteZero))),
				Ok(n) => num_sent += n,
				Err(ref e) if e.kind() == WouldBlock => break,
				Err(ref e) if e.kind() == Interrupted => {},
				Err(e) => {
					error!("couldn't write to socket", tags![
						("error", &e.to_string())
					]);
					return Err(Box::new(e));
				},
			}
		}

		if num_sent > 0 {
			self.write_buffer.drain(..num_sent);
			self.last_drain = time::Instant::now();
		}
		Ok(())
	}

	#[cfg(test)]
	pub fn backlog(&self) -> usize {
		self.write_buffer.len()
	}

	// read_some returns None when the read would block and
	// Some(0) when the client hung up.
	fn read_some(stream: &mut UnixStream, buf: &mut [u8])
		-> Result<Option<usize>> {
		use std::io::ErrorKind::WouldBlock;

		match stream.read(buf) {
			Ok(n) => Ok(Some(n)),
			Err(ref e) if e.kind() == WouldBlock => Ok(None),
			Err(e) => {
				error!("couldn't read from socket");
				Err(Box::new(e))
			},
		}
	}

	fn tick_read_header(&mut self) -> Result<bool> {
		let buf = &mut self.read_header_buf[self.read_bytes_read..];
		match Self::read_some(&mut self.stream, buf)? {
			None => return Ok(true),
			Some(0) => {
				self.info("client hung up");
				return Ok(false);
			},
			Some(n) => self.read_bytes_read += n,
		}

		if self.read_bytes_read < HEADER_LEN {
			return Ok(true);
		}

		let header = Header::from_raw(&self.read_header_buf)?;
		info!("received message header", tags![
			("session_id", &self.session_id),
			("msg_id", &header.msg_id.to_string()),
			("msg_type", &format!("{:?}", header.msg_type)),
			("msg_len", &header.msg_len.to_string())
		]);
		self.read_header = Some(header);
		self.read_body_buf.resize(header.msg_len as usize, 0);
		self.read_bytes_read = 0;

		if header.msg_len > 0 {
			self.read_state = ReadState::Body;
			return Ok(true);
		}
		self.dispatch()
	}

	fn tick_read_body(&mut self) -> Result<bool> {
		let buf = &mut self.read_body_buf[self.read_bytes_read..];
		match Self::read_some(&mut self.stream, buf)? {
			None => return Ok(true),
			Some(0) => {
				self.info("client hung up");
				return Ok(false);
			},
			Some(n) => self.read_bytes_read += n,
		}

		// Have we got a complete message?
		if self.read_bytes_read < self.read_body_buf.len() {
			return Ok(true);
		}

		self.read_state = ReadState::Header;
		self.read_bytes_read = 0;
		self.dispatch()
	}

	// dispatch acts on one complete message. Returns false
	// when the client has asked to close.
	fn dispatch(&mut self) -> Result<bool> {
		let header = match self.read_header.take() {
			Some(h) => h,
			None => return Ok(true),
		};
		self.last_read = time::Instant::now();
		if !header.msg_type.from_client() {
			return Err(Error::new(ErrorType::InvalidRequest));
		}

		match header.msg_type {
			MsgType::Heartbeat => {},
			MsgType::Hello => {
				warn!("repeated hello ignored", tags![
					("session_id", &self.session_id)
				]);
			},
			MsgType::Init => {
				self.info("init requested");
				// Blocks for the whole calibration
				let r = self.exc.init();
				self.last_read = time::Instant::now();
				if let Some(calib) = self.exc.calibration() {
					info!("initialised", tags![
						("session_id", &self.session_id),
						("eye_separation",
							&calib.features.eye_separation.to_string()),
						("ratio", &calib.ratio.to_string())
					]);
				}
				self.write_status(MsgType::InitReply, Status::from_result(&r))?;
			},
			MsgType::Start => {
				let status = self.start();
				self.write_status(MsgType::StartReply, status)?;
			},
			MsgType::Stop => {
				let status = match serde_json::from_slice(&self.read_body_buf) {
					Ok(req) => self.stop(req),
					Err(_) => {
						Status::failed(&Error::new(ErrorType::InvalidRequest))
					},
				};
				self.write_status(MsgType::StopReply, status)?;
			},
			MsgType::Shutdown => {
				let r = self.exc.shutdown();
				self.write_status(MsgType::ShutdownReply,
					Status::from_result(&r))?;
			},
			MsgType::Close => {
				self.shutdown()?;
				return Ok(false);
			},
			_ => return Err(Error::new(ErrorType::InvalidRequest)),
		}
		Ok(true)
	}

	fn start(&mut self) -> Status {
		// One stream per connection
		if let Some(ref sub) = self.subscription {
			if sub.is_active() {
				let mut status = Status::ok();
				status.token = Some(sub.token().to_string());
				return status;
			}
		}
		self.release();

		match self.exc.start() {
			Ok(sub) => {
				let mut status = Status::ok();
				status.token = Some(sub.token().to_string());
				info!("streaming", tags![
					("session_id", &self.session_id),
					("token", sub.token())
				]);
				self.last_write = time::Instant::now();
				self.subscription = Some(sub);
				status
			},
			Err(e) => Status::failed(&e),
		}
	}

	fn stop(&mut self, req: StopRequest) -> Status {
		let r = self.exc.stop(&req.token);
		let ours = self.subscription.as_ref()
			.map_or(false, |s| s.token() == req.token);
		if ours {
			self.subscription = None;
		}
		Status::from_result(&r)
	}

	// release gives back our stream if we still hold one
	fn release(&mut self) {
		if let Some(sub) = self.subscription.take() {
			if let Err(e) = self.exc.stop(sub.token()) {
				// Already stopped elsewhere or halted
				if kind_of(&e) != Some(ErrorType::InvalidToken) {
					error!("couldn't stop stream", tags![
						("error", &e.to_string())
					]);
				}
			}
		}
	}

	pub fn read_hello(&mut self) -> Result<()> {
		// Read exactly ten bytes (i.e the header)
		use time::Duration;
		let t = Duration::new(self.n.config.client_hello_timeout, 0);
		self.stream.set_read_timeout(Some(t))?;
		self.stream.read_exact(&mut self.read_header_buf)?;
		let header = Header::from_raw(&self.read_header_buf)?;

		if header.msg_type != MsgType::Hello || header.msg_len != 0 {
			return Err(Error::new(ErrorType::InvalidRequest));
		}

		self.last_read = time::Instant::now();
		self.new_session_id()?;
		info!("received client hello", tags![
			("session_id", &self.session_id),
			("msg_id", &header.msg_id.to_string())
		]);

		self.stream.set_nonblocking(true)?;
		Ok(())
	}

	pub fn write_hello(&mut self) -> Result<()> {
		let body = HelloResponse{
			config: self.n.config.clone(),
			session_id: self.session_id.clone(),
			state: self.exc.state(),
		};
		self.write_msg(MsgType::HelloReply, &body)
	}

	pub fn info(&self, msg: &'static str) {
		info!(msg, tags![
			("session_id", &self.session_id)
		]);
	}

	// shutdown tells the client we're closing
	pub fn shutdown(&mut self) -> Result<()> {
		self.release();
		let msg_id = self.rand_u32()?;
		encode_empty(&mut self.msg_buffer, MsgType::Closed, msg_id);
		self.queue()
	}

	pub fn tick_read(&mut self) -> Result<bool> {
		if self.read_state == ReadState::Header {
			self.tick_read_header()
		} else {
			self.tick_read_body()
		}
	}

	pub fn tick_write(&mut self) -> Result<()> {
		let timeout = time::Duration::new(self.n.config.client_timeout, 0);
		if self.last_read.elapsed() > timeout {
			// The client has gone away
			// Try to shutdown but the client is probably dead
			self.info("closing due to timeout");
			self.shutdown()?;
			return Err(Error::new(ErrorType::ClientTimeout));
		}

		// Finish what's queued before anything new. A client
		// still sending heartbeats but not reading is dropped
		// once it has taken nothing for client_timeout.
		self.write()?;
		if !self.write_buffer.is_empty() {
			if self.last_drain.elapsed() > timeout {
				self.info("closing stalled client");
				self.release();
				return Err(Error::new(ErrorType::ClientTimeout));
			}
			return Ok(());
		}

		let live = match self.subscription {
			Some(ref sub) => sub.is_active(),
			None => return Ok(()),
		};
		if !live {
			self.info("stream ended");
			self.release();
			return Ok(());
		}

		let now = time::Instant::now();
		if now - self.last_write < self.stream_interval {
			return Ok(());
		}

		// Only the newest value goes out, older ones are
		// never queued up behind a slow reader.
		let latest = self.subscription.as_ref().and_then(|s| s.latest());
		if let Some(m) = latest {
			self.write_msg(MsgType::Measurement, &m)?;
			self.last_write = now;
		}
		Ok(())
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		// Streams never outlive their connection
		self.release();
	}
}

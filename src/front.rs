// `echo front` is a minimal consumer: it initialises the
// server, streams measurements and prints which way the
// face is pointing.

use std::io::Write;
use std::net::{Ipv4Addr, UdpSocket};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::thread::Builder;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::errors::*;
use crate::echo::Echo;
use crate::exchange::msgs::Measurement;
use crate::server::protocol::*;
use crate::{info, error, tags};

const HEARTBEAT: Duration = Duration::from_secs(2);

pub fn facing(m: &Measurement) -> (&'static str, &'static str) {
	// Image y grows downwards
	let ud = if m.pitch < 0.0 { "up" } else { "down" };
	let rl = if m.yaw > 0.0 { "right" } else { "left" };
	(ud, rl)
}

struct Client {
	stream: UnixStream,
	buf: Vec<u8>,
	msg_id: u32,
}

impl Client {
	fn send_empty(&mut self, t: MsgType) -> Result<()> {
		self.msg_id = self.msg_id.wrapping_add(1);
		encode_empty(&mut self.buf, t, self.msg_id);
		self.stream.write_all(&self.buf)?;
		Ok(())
	}

	fn send<T: Serialize>(&mut self, t: MsgType, body: &T) -> Result<()> {
		self.msg_id = self.msg_id.wrapping_add(1);
		encode(&mut self.buf, t, self.msg_id, body)?;
		self.stream.write_all(&self.buf)?;
		Ok(())
	}
}

// reader forwards every server message onto a channel so
// the main loop can wait with a timeout.
fn reader(mut stream: UnixStream) -> Result<Receiver<(Header, Vec<u8>)>> {
	let (sender, receiver) = channel();
	Builder::new()
		.name("front_reader".to_string())
		.spawn(move || {
			while let Ok(msg) = read_msg(&mut stream) {
				if sender.send(msg).is_err() {
					break;
				}
			}
		})?;
	Ok(receiver)
}

// wait_for skips measurements until the reply we want
fn wait_for(rx: &Receiver<(Header, Vec<u8>)>, want: MsgType) -> Result<Vec<u8>> {
	loop {
		let (header, body) = rx.recv()?;
		if header.msg_type == want {
			return Ok(body);
		}
		if header.msg_type == MsgType::Closed {
			return Err(Error::new(ErrorType::CaptureSourceClosed));
		}
	}
}

fn status(rx: &Receiver<(Header, Vec<u8>)>, want: MsgType) -> Result<Status> {
	let body = wait_for(rx, want)?;
	Ok(serde_json::from_slice(&body)?)
}

// run returns the process exit code
pub fn run(n: &Echo, running: Arc<AtomicBool>) -> Result<i32> {
	let stream = UnixStream::connect(&n.config.socket_path)?;
	let rx = reader(stream.try_clone()?)?;
	let mut c = Client{
		stream: stream,
		buf: Vec::with_capacity(256),
		msg_id: 0,
	};

	c.send_empty(MsgType::Hello)?;
	wait_for(&rx, MsgType::HelloReply)?;

	println!("--- Initializing... please face the camera");
	c.send_empty(MsgType::Init)?;
	let st = status(&rx, MsgType::InitReply)?;
	if !st.success {
		println!("Initialization failed: {}",
			st.error.as_deref().unwrap_or("unknown"));
		return Ok(st.exit_code as i32);
	}
	println!("Initialized");

	c.send_empty(MsgType::Start)?;
	let st = status(&rx, MsgType::StartReply)?;
	let token = match (st.success, st.token) {
		(true, Some(token)) => token,
		_ => {
			println!("Couldn't start stream: {}",
				st.error.as_deref().unwrap_or("unknown"));
			return Ok(st.exit_code as i32);
		},
	};
	info!("streaming", tags![("token", &token)]);

	let mut last_beat = Instant::now();
	while running.load(Ordering::SeqCst) {
		if last_beat.elapsed() > HEARTBEAT {
			c.send_empty(MsgType::Heartbeat)?;
			last_beat = Instant::now();
		}

		match rx.recv_timeout(Duration::from_millis(100)) {
			Ok((header, body)) => match header.msg_type {
				MsgType::Measurement => {
					let m: Measurement = serde_json::from_slice(&body)?;
					let (ud, rl) = facing(&m);
					println!("Face faces {} {}", ud, rl);
				},
				MsgType::Closed => {
					println!("Server closed the connection");
					return Ok(ErrorType::CaptureSourceClosed.code() as i32);
				},
				_ => {},
			},
			Err(RecvTimeoutError::Timeout) => {},
			Err(RecvTimeoutError::Disconnected) => {
				error!("server went away");
				return Ok(1);
			},
		}
	}

	println!("--- Stopping stream");
	c.send(MsgType::Stop, &StopRequest{token: token})?;
	let st = status(&rx, MsgType::StopReply)?;
	if !st.success {
		return Ok(st.exit_code as i32);
	}
	c.send_empty(MsgType::Close)?;
	println!("Done");
	Ok(0)
}

// listen prints the multicast frames instead of using
// the socket, so it needs no session at all.
pub fn listen(n: &Echo, running: Arc<AtomicBool>) -> Result<i32> {
	let config = &n.config.multicast;
	let group: Ipv4Addr = config.group.parse()?;
	let interface: Ipv4Addr = config.interface.parse()?;

	let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port))?;
	socket.join_multicast_v4(&group, &interface)?;
	socket.set_read_timeout(Some(Duration::from_millis(100)))?;
	info!("listening", tags![
		("group", &config.group),
		("port", &config.port.to_string())
	]);

	let mut buf = [0u8; 64];
	while running.load(Ordering::SeqCst) {
		let len = match socket.recv_from(&mut buf) {
			Ok((len, _)) => len,
			Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock
				|| e.kind() == std::io::ErrorKind::TimedOut => continue,
			Err(e) => return Err(Box::new(e)),
		};
		match Measurement::from_frame(&buf[..len]) {
			Ok(m) => {
				let (ud, rl) = facing(&m);
				println!("Face faces {} {} (mouth {}% {}%, eyes {}% {}%)",
					ud, rl, m.mouth_height, m.mouth_width,
					m.left_eye, m.right_eye);
			},
			Err(_) => {
				error!("dropping bad frame", tags![
					("len", &len.to_string())
				]);
			},
		}
	}
	Ok(0)
}

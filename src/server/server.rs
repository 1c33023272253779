use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::path::Path;
use std::fs::remove_file;
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread::{JoinHandle, Builder, sleep};
use std::sync::mpsc::{channel, Sender, Receiver, TryRecvError};
use std::time;

use crate::errors::*;
use crate::echo::Echo;
use crate::exchange::Exchange;
use crate::{info, error, tags};

use super::session::Session;

struct Client {
	handle: Option<JoinHandle<()>>,
	closer: Sender<()>,
	// Set by the client thread on its way out
	done: Arc<AtomicBool>,
}

impl Client {
	fn join(&mut self) {
		if let Some(handle) = self.handle.take() {
			if handle.join().is_err() {
				error!("client thread panicked");
			}
		}
	}
}

pub struct Server{
	n: Arc<Echo>,
	exc: Arc<Exchange>,
	listener: UnixListener,
	client_num: u32,
	clients: Vec<Client>,
}

impl Server {
	pub fn new(n: Arc<Echo>, exc: Arc<Exchange>) -> Result<Self> {
		let path = Path::new(&n.config.socket_path);
		if path.exists() {
			remove_file(&path)?;
		}

		// Create the Unix socket file
		info!("creating unix socket", tags![
			("path", &n.config.socket_path)
		]);
		let listener = UnixListener::bind(path)?;
		listener.set_nonblocking(true)?;

		Ok(Self{
			n: n,
			exc: exc,
			listener: listener,
			client_num: 0,
			clients: vec![],
		})
	}

	pub fn tick(&mut self) -> Result<()> {
		// Threading server - check if we have
		// any new client connections
		use std::io::ErrorKind::WouldBlock;

		match self.listener.accept() {
			Ok((stream, _)) => {
				// Accepted sockets inherit non blocking mode
				stream.set_nonblocking(false)?;

				let name = format!("client_{}", self.client_num);
				self.client_num += 1;
				let (sender, receiver) = channel();
				let done = Arc::new(AtomicBool::new(false));

				let n = self.n.clone();
				let e = self.exc.clone();
				let d = done.clone();

				let handle = Builder::new()
					.name(name)
					.spawn(move || {
						start_session(n, e, stream, receiver);
						d.store(true, Ordering::SeqCst);
					})?;

				self.clients.push(Client{
					handle: Some(handle),
					closer: sender,
					done: done,
				});
				Ok(())
			},
			Err(ref e) if e.kind() == WouldBlock => Ok(()),
			Err(e) => Err(e),
		}?;

		// Reap finished client threads
		for c in self.clients.iter_mut() {
			if c.done.load(Ordering::SeqCst) {
				c.join();
			}
		}
		self.clients.retain(|c| c.handle.is_some());

		Ok(())
	}

	pub fn shutdown(&mut self) -> Result<()> {
		// Tell every client first so they close together
		for c in self.clients.iter() {
			// A finished client has dropped its receiver
			let _ = c.closer.send(());
		}
		for c in self.clients.iter_mut() {
			c.join();
		}
		self.clients.clear();
		Ok(())
	}

	#[cfg(test)]
	pub fn client_count(&self) -> usize {
		self.clients.len()
	}
}

impl Drop for Server {
	fn drop(&mut self) {
		if let Err(e) = remove_file(&self.n.config.socket_path) {
			error!("couldn't remove socket file", tags![
				("error", &e.to_string())
			]);
		}
	}
}

fn start_session(n: Arc<Echo>,
	            exc: Arc<Exchange>,
	            stream: UnixStream,
	            closer: Receiver<()>) {
	info!("new session");
	if let Err(e) = run_session(n, exc, stream, closer) {
		error!("session crashed", tags![
			("error", &e.to_string()),
			("exit_code", &code_of(&e).to_string())
		]);
	}
}

fn run_session(n: Arc<Echo>,
	          exc: Arc<Exchange>,
	          stream: UnixStream,
	          closer: Receiver<()>) -> Result<()> {

	let mut c = Session::new(n, exc, stream)?;

	// Block here waiting for client hello
	// This will timeout and Error so the
	// client can't hang.
	c.read_hello()?;

	// Okay send server hello back
	c.write_hello()?;

	c.info("session established");

	loop {
		// Poll the channel to check if we're shutting down
		match closer.try_recv() {
			Ok(_) | Err(TryRecvError::Disconnected) => {
				c.info("sending shutdown");
				c.shutdown()?;
				break;
			},
			Err(TryRecvError::Empty) => {},
		}

		// tick_read returns false when the client
		// closed or hung up.
		if !c.tick_read()? {
			break;
		}

		// tick_write streams measurements and closes
		// clients that stopped heartbeating.
		c.tick_write()?;

		// Short enough not to hold back the stream interval
		sleep(time::Duration::from_millis(2));
	}
	c.info("session finished");
	Ok(())
}

// The socket server runs on its own thread. ServerRAII owns
// that thread and the measurement store it serves; dropping
// it halts the store first, which frees any client blocked
// in init, and then closes every connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{Builder, JoinHandle, sleep};
use std::time::{Duration, Instant};

use crate::errors::*;
use crate::echo::Echo;
use crate::exchange::Exchange;
use crate::{info, error, tags};

mod server;
use server::Server;
mod session;
pub mod protocol;

// How often the accept loop and the backoff check for halt
const POLL: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

pub struct ServerRAII{
	exc: Arc<Exchange>,
	halt: Arc<AtomicBool>,
	handle: Option<JoinHandle<()>>,
}

impl ServerRAII {
	pub fn new(n: Arc<Echo>, exc: Arc<Exchange>) -> Result<Self> {
		let halt = Arc::new(AtomicBool::new(false));
		let h = halt.clone();
		let e = exc.clone();

		let handle = Builder::new()
			.name("server".to_string())
			.spawn(move || supervise(n, e, h))?;

		Ok(Self{
			exc: exc,
			halt: halt,
			handle: Some(handle),
		})
	}
}

impl Drop for ServerRAII {
	fn drop(&mut self) {
		self.exc.halt();
		self.halt.store(true, Ordering::SeqCst);
		if let Some(handle) = self.handle.take() {
			if handle.join().is_err() {
				error!("server thread panicked");
			}
		}
	}
}

// backoff doubles with each failed attempt to serve the
// socket, from 250ms up to MAX_BACKOFF.
fn backoff(failures: u32) -> Duration {
	let shift = failures.saturating_sub(1).min(5);
	(Duration::from_millis(250) * (1 << shift)).min(MAX_BACKOFF)
}

// wait sleeps for d unless halted first
fn wait(halt: &AtomicBool, d: Duration) {
	let until = Instant::now() + d;
	while !halt.load(Ordering::SeqCst) && Instant::now() < until {
		sleep(POLL);
	}
}

// supervise keeps the socket served until halted. A failure
// usually means the socket path is unusable, so it is
// retried with backoff rather than spinning.
fn supervise(n: Arc<Echo>, exc: Arc<Exchange>, halt: Arc<AtomicBool>) {
	let mut failures = 0;
	while !halt.load(Ordering::SeqCst) {
		let started = Instant::now();
		match serve(&n, &exc, &halt) {
			Ok(()) => break,
			Err(e) => {
				// A server that ran for a while starts afresh
				if started.elapsed() > MAX_BACKOFF {
					failures = 0;
				}
				failures += 1;
				let delay = backoff(failures);
				error!("server failed - retrying", tags![
					("error", &e.to_string()),
					("socket_path", &n.config.socket_path),
					("failures", &failures.to_string()),
					("retry_ms", &delay.as_millis().to_string())
				]);
				wait(&halt, delay);
			},
		}
	}
	info!("server stopped");
}

fn serve(n: &Arc<Echo>, exc: &Arc<Exchange>, halt: &AtomicBool) -> Result<()> {
	let mut server = Server::new(n.clone(), exc.clone())?;

	// Server::new and tick only report OS errors, each
	// client runs on its own thread.
	while !halt.load(Ordering::SeqCst) {
		server.tick()?;
		sleep(POLL);
	}

	// Logged rather than returned so we aren't restarted
	if let Err(e) = server.shutdown() {
		error!("couldn't close clients", tags![
			("error", &e.to_string())
		]);
	}
	Ok(())
}

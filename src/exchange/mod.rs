use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{Builder, JoinHandle};

use serde::{Serialize, Deserialize};

use crate::errors::*;
use crate::echo::Echo;
use crate::capture::Device;
use crate::face::normalize::Normalizer;
use crate::measure::Calibration;
use crate::measure::tracker::Tracker;
use crate::{info, warn, error, tags};

pub mod confchannel;
use confchannel::{Sender, Receiver};
pub mod msgs;
use msgs::Measurement;
pub mod broadcast;
use broadcast::Broadcaster;

#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
	Uninitialized,
	Calibrating,
	Ready,
	Streaming,
}

// What the production thread reports back to init. ErrorType
// rather than a boxed error because it crosses threads.
type Report = std::result::Result<(Calibration, Receiver<Measurement>), ErrorType>;

struct Production {
	halt: Arc<AtomicBool>,
	handle: Option<JoinHandle<()>>,
}

impl Production {
	fn stop(&mut self) {
		self.halt.store(true, Ordering::SeqCst);
		if let Some(handle) = self.handle.take() {
			if handle.join().is_err() {
				error!("production thread panicked");
			}
		}
	}
}

struct Inner {
	state: State,
	calibration: Option<Calibration>,
	// Kept so sessions can clone it
	receiver: Option<Receiver<Measurement>>,
	production: Option<Production>,
	sessions: HashMap<String, Arc<AtomicBool>>,
}

impl Inner {
	// The producer exits by itself when the frame source
	// closes. Once nobody is streaming we forget it so the
	// next init calibrates afresh.
	fn reap(&mut self) {
		let closed = self.receiver.as_ref().map_or(false, |r| r.is_closed());
		if closed && self.sessions.is_empty() {
			info!("frame source closed - releasing");
			self.release();
		}
	}

	fn release(&mut self) {
		if let Some(mut p) = self.production.take() {
			p.stop();
		}
		self.receiver = None;
		self.calibration = None;
		self.state = State::Uninitialized;
	}
}

// Subscription is one session's view of the latest
// measurement.
pub struct Subscription {
	token: String,
	receiver: Receiver<Measurement>,
	active: Arc<AtomicBool>,
}

impl Subscription {
	pub fn token(&self) -> &str {
		&self.token
	}

	// False once stopped or once production has ended
	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::SeqCst) && !self.receiver.is_closed()
	}

	pub fn latest(&self) -> Option<Measurement> {
		if !self.active.load(Ordering::SeqCst) {
			return None;
		}
		self.receiver.recv()
	}
}

// Exchange is the measurement store and session manager.
// It owns the production thread; sessions only ever read.
pub struct Exchange {
	n: Arc<Echo>,
	device: Arc<dyn Device>,
	inner: Mutex<Inner>,
}

impl Exchange {
	pub fn new(n: Arc<Echo>, device: Arc<dyn Device>) -> Self {
		Self{
			n: n,
			device: device,
			inner: Mutex::new(Inner{
				state: State::Uninitialized,
				calibration: None,
				receiver: None,
				production: None,
				sessions: HashMap::new(),
			}),
		}
	}

	fn lock(&self) -> MutexGuard<Inner> {
		// Nothing panics while holding the lock mid update
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn state(&self) -> State {
		self.lock().state
	}

	pub fn active_sessions(&self) -> usize {
		self.lock().sessions.len()
	}

	pub fn calibration(&self) -> Option<Calibration> {
		self.lock().calibration
	}

	// init opens the device and calibrates. It blocks until
	// calibration finishes; the lock is not held meanwhile
	// so other callers see Calibrating.
	pub fn init(&self) -> Result<()> {
		let (report, ours) = {
			let mut inner = self.lock();
			inner.reap();
			match inner.state {
				State::Ready | State::Streaming => return Ok(()),
				State::Calibrating => {
					return Err(Error::new(ErrorType::ServerBusy));
				},
				State::Uninitialized => {},
			}

			let (sender, report) = mpsc::channel();
			let halt = Arc::new(AtomicBool::new(false));
			let n = self.n.clone();
			let device = self.device.clone();
			let h = halt.clone();
			let handle = Builder::new()
				.name("production".to_string())
				.spawn(move || produce(n, device, h, sender))?;

			inner.state = State::Calibrating;
			inner.production = Some(Production{
				halt: halt.clone(),
				handle: Some(handle),
			});
			(report, halt)
		};

		// A dropped sender means the thread died without
		// reporting, treat it like losing the camera.
		let result = report.recv()
			.unwrap_or(Err(ErrorType::CaptureSourceClosed));

		let mut inner = self.lock();
		// A halt while we waited may have been followed by
		// another init, so only touch our own production.
		let still_ours = inner.production.as_ref()
			.map_or(false, |p| Arc::ptr_eq(&p.halt, &ours));
		match result {
			Ok((calibration, receiver)) if still_ours => {
				inner.calibration = Some(calibration);
				inner.receiver = Some(receiver);
				inner.state = State::Ready;
				Ok(())
			},
			Ok(_) => Err(Error::new(ErrorType::CaptureSourceClosed)),
			Err(t) => {
				if still_ours {
					inner.release();
				}
				Err(Error::new(t))
			},
		}
	}

	// start opens a session and hands back its token along
	// with the subscription it reads from.
	pub fn start(&self) -> Result<Subscription> {
		let mut inner = self.lock();
		match inner.state {
			State::Ready | State::Streaming => {},
			_ => return Err(Error::new(ErrorType::NotInitialized)),
		}

		let receiver = match inner.receiver {
			Some(ref r) if !r.is_closed() => r.clone(),
			_ => return Err(Error::new(ErrorType::CaptureSourceClosed)),
		};

		let mut token = new_token()?;
		while inner.sessions.contains_key(&token) {
			token = new_token()?;
		}

		let active = Arc::new(AtomicBool::new(true));
		inner.sessions.insert(token.clone(), active.clone());
		inner.state = State::Streaming;
		info!("session started", tags![
			("token", &token),
			("active_sessions", &inner.sessions.len().to_string())
		]);

		Ok(Subscription{
			token: token,
			receiver: receiver,
			active: active,
		})
	}

	pub fn stop(&self, token: &str) -> Result<()> {
		let mut inner = self.lock();
		let active = match inner.sessions.remove(token) {
			Some(active) => active,
			None => return Err(Error::new(ErrorType::InvalidToken)),
		};
		active.store(false, Ordering::SeqCst);

		if inner.sessions.is_empty() && inner.state == State::Streaming {
			inner.state = State::Ready;
		}
		info!("session stopped", tags![
			("token", token),
			("active_sessions", &inner.sessions.len().to_string())
		]);
		inner.reap();
		Ok(())
	}

	// shutdown is refused while anyone is streaming or a
	// calibration is underway.
	pub fn shutdown(&self) -> Result<()> {
		let mut inner = self.lock();
		match inner.state {
			State::Uninitialized => return Ok(()),
			State::Calibrating => {
				return Err(Error::new(ErrorType::ServerBusy));
			},
			_ => {},
		}
		if !inner.sessions.is_empty() {
			return Err(Error::new(ErrorType::ServerBusy));
		}
		inner.release();
		info!("measurement store shut down");
		Ok(())
	}

	// halt is process teardown: it ends every session, aborts
	// a calibration in progress and stops production.
	pub fn halt(&self) {
		let mut inner = self.lock();
		for active in inner.sessions.values() {
			active.store(false, Ordering::SeqCst);
		}
		inner.sessions.clear();
		inner.release();
	}
}

impl Drop for Exchange {
	fn drop(&mut self) {
		self.halt();
	}
}

fn new_token() -> Result<String> {
	let mut buf = [0u8; 8];
	File::open("/dev/urandom")?.read_exact(&mut buf)?;
	Ok(buf.iter().map(|b| format!("{:02x}", b)).collect())
}

fn produce(n: Arc<Echo>,
	       device: Arc<dyn Device>,
	       halt: Arc<AtomicBool>,
	       report: mpsc::Sender<Report>) {
	let (source, detector) = match device.open() {
		Ok(pair) => pair,
		Err(e) => {
			error!("couldn't open capture device", tags![
				("error", &e.to_string())
			]);
			let t = kind_of(&e).unwrap_or(ErrorType::CaptureSourceClosed);
			let _ = report.send(Err(t));
			return;
		},
	};

	let normalizer = Normalizer::new(n.layout(), n.config.face_box);
	let mut tracker = Tracker::new(source, detector, normalizer);

	let calibration = match tracker.calibrate(&halt) {
		Ok(c) => c,
		Err(e) => {
			error!("calibration failed", tags![
				("error", &e.to_string())
			]);
			let t = kind_of(&e).unwrap_or(ErrorType::CaptureSourceClosed);
			let _ = report.send(Err(t));
			return;
		},
	};

	let (sender, receiver) = confchannel::confchannel();
	if report.send(Ok((calibration, receiver))).is_err() {
		return;
	}

	let broadcaster = if n.config.multicast.enabled {
		match Broadcaster::new(&n.config.multicast) {
			Ok(b) => Some(b),
			Err(e) => {
				error!("multicast disabled", tags![
					("error", &e.to_string())
				]);
				None
			},
		}
	} else {
		None
	};

	run_production(&mut tracker, &calibration, &halt, sender,
		broadcaster.as_ref());
}

// The loop is the only writer of the latest measurement.
// Dropping the sender on exit tells every session.
fn run_production(tracker: &mut Tracker,
	              calibration: &Calibration,
	              halt: &AtomicBool,
	              mut sender: Sender<Measurement>,
	              broadcaster: Option<&Broadcaster>) {
	info!("production started");
	let mut send_failures = 0u64;

	while tracker.is_open() && !halt.load(Ordering::SeqCst) {
		let m = tracker.measure(calibration);
		sender.send(m);

		if let Some(b) = broadcaster {
			if let Err(e) = b.send(&m) {
				// One line per burst, not one per frame
				if send_failures == 0 {
					warn!("multicast send failed", tags![
						("error", &e.to_string())
					]);
				}
				send_failures += 1;
			} else {
				send_failures = 0;
			}
		}
	}

	if halt.load(Ordering::SeqCst) {
		info!("production halted");
	} else {
		info!("capture source closed - production finished");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::thread::sleep;
	use std::time::Duration;
	use crate::capture::testing::{ScriptedDevice, Shot, face, empty};
	use crate::echo::{Config, LayoutName, Multicast};
	use crate::face::normalize::tests::{helen_points, turned_points};
	use crate::measure::estimate::ANGLE_LIMIT;

	fn echo() -> Arc<Echo> {
		Arc::new(Echo::new(Config{
			layout: LayoutName::Helen194,
			multicast: Multicast{enabled: false, ..Multicast::default()},
			..Config::default()
		}))
	}

	fn front() -> Shot {
		face(helen_points((320.0, 240.0), 1.0))
	}

	fn exchange(shots: Vec<Shot>, repeat: bool) -> Exchange {
		Exchange::new(echo(), Arc::new(ScriptedDevice::new(shots, repeat)))
	}

	fn live() -> Exchange {
		exchange(vec![empty(), front()], true)
	}

	#[test]
	fn init_calibrates_once() {
		let exc = live();
		assert_eq!(exc.state(), State::Uninitialized);
		exc.init().unwrap();
		assert_eq!(exc.state(), State::Ready);

		let calib = exc.calibration().unwrap();
		assert_eq!(calib.features.eye_separation, 6.0);

		// Repeated init is a no-op
		exc.init().unwrap();
		assert_eq!(exc.calibration(), Some(calib));
	}

	#[test]
	fn start_before_init_is_refused() {
		let exc = live();
		let e = exc.start().err().unwrap();
		assert_eq!(kind_of(&e), Some(ErrorType::NotInitialized));
	}

	#[test]
	fn start_then_stop_restores_count() {
		let exc = live();
		exc.init().unwrap();
		let before = exc.active_sessions();

		let sub = exc.start().unwrap();
		assert_eq!(exc.active_sessions(), before + 1);
		assert_eq!(exc.state(), State::Streaming);
		assert_eq!(sub.token().len(), 16);

		exc.stop(sub.token()).unwrap();
		assert_eq!(exc.active_sessions(), before);
		assert_eq!(exc.state(), State::Ready);
	}

	#[test]
	fn sessions_get_distinct_tokens() {
		let exc = live();
		exc.init().unwrap();
		let a = exc.start().unwrap();
		let b = exc.start().unwrap();
		assert_ne!(a.token(), b.token());

		exc.stop(a.token()).unwrap();
		// Still one left
		assert_eq!(exc.state(), State::Streaming);
		exc.stop(b.token()).unwrap();
	}

	#[test]
	fn shutdown_lifecycle() {
		let exc = live();
		// Nothing to shut down yet
		exc.shutdown().unwrap();

		exc.init().unwrap();
		let sub = exc.start().unwrap();
		let e = exc.shutdown().unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::ServerBusy));
		assert_eq!(exc.state(), State::Streaming);

		exc.stop(sub.token()).unwrap();
		exc.shutdown().unwrap();
		assert_eq!(exc.state(), State::Uninitialized);
		assert_eq!(exc.calibration(), None);
	}

	#[test]
	fn unknown_token_changes_nothing() {
		let exc = live();
		exc.init().unwrap();
		let sub = exc.start().unwrap();

		let e = exc.stop("0000000000000000").unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::InvalidToken));
		assert_eq!(exc.active_sessions(), 1);

		exc.stop(sub.token()).unwrap();
		let e = exc.stop(sub.token()).unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::InvalidToken));
	}

	#[test]
	fn stop_takes_effect_immediately() {
		let exc = live();
		exc.init().unwrap();
		let sub = exc.start().unwrap();
		assert!(sub.is_active());

		exc.stop(sub.token()).unwrap();
		assert!(!sub.is_active());
		assert_eq!(sub.latest(), None);
	}

	#[test]
	fn subscribers_see_measurements() {
		let exc = live();
		exc.init().unwrap();
		let sub = exc.start().unwrap();

		// The scripted camera repeats the calibration face
		sleep(Duration::from_millis(50));
		assert_eq!(sub.latest(), Some(Measurement::default()));
		exc.stop(sub.token()).unwrap();
	}

	#[test]
	fn subscribers_see_the_head_turn() {
		// Calibrate facing forward, then hold the head turned
		let turned = face(turned_points((300.0, 240.0)));
		let exc = exchange(vec![empty(), front(), turned], true);
		exc.init().unwrap();
		let sub = exc.start().unwrap();

		let mut seen = None;
		for _ in 0..200 {
			match sub.latest() {
				Some(m) if m.yaw < 0.0 => {
					seen = Some(m);
					break;
				},
				_ => sleep(Duration::from_millis(10)),
			}
		}
		let m = seen.unwrap();
		assert_eq!(m.yaw, -ANGLE_LIMIT);
		assert_eq!(m.pitch, 0.0);
		assert_eq!(m.mouth_height, 100);
		exc.stop(sub.token()).unwrap();
	}

	#[test]
	fn init_reports_a_closed_source() {
		let exc = exchange(vec![empty(), empty()], false);
		let e = exc.init().unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::CaptureSourceClosed));
		assert_eq!(exc.state(), State::Uninitialized);
	}

	#[test]
	fn init_reports_a_failed_open() {
		let mut device = ScriptedDevice::new(vec![front()], true);
		device.open_fails = true;
		let exc = Exchange::new(echo(), Arc::new(device));
		let e = exc.init().unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::CaptureSourceClosed));
	}

	#[test]
	fn init_reports_a_degenerate_calibration() {
		let mut points = helen_points((320.0, 240.0), 1.0);
		points[135] = points[114];
		let exc = exchange(vec![face(points)], true);
		let e = exc.init().unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::CalibrationDegenerate));
		assert_eq!(exc.state(), State::Uninitialized);
	}

	#[test]
	fn closed_source_ends_streams() {
		// Calibrate on the first frame then run dry
		let exc = exchange(vec![front(), empty(), empty()], false);
		exc.init().unwrap();
		let sub = match exc.start() {
			Ok(sub) => sub,
			// Production may already have finished
			Err(e) => {
				assert_eq!(kind_of(&e), Some(ErrorType::CaptureSourceClosed));
				return;
			},
		};

		for _ in 0..100 {
			if !sub.is_active() {
				break;
			}
			sleep(Duration::from_millis(10));
		}
		assert!(!sub.is_active());
		assert_eq!(sub.latest(), None);

		exc.stop(sub.token()).unwrap();
		let e = exc.start().err().unwrap();
		assert_eq!(kind_of(&e), Some(ErrorType::NotInitialized));
	}

	#[test]
	fn halt_ends_everything() {
		let exc = live();
		exc.init().unwrap();
		let sub = exc.start().unwrap();
		exc.halt();
		assert!(!sub.is_active());
		assert_eq!(exc.state(), State::Uninitialized);
		assert_eq!(exc.active_sessions(), 0);
	}
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::fs::{OpenOptions, remove_file};
use std::io::Write;
use std::time::Duration;
use std::thread;
use std::process;

use libc;

mod errors;
use errors::*;
mod echo;
use echo::Echo;
mod server;
use server::ServerRAII;
mod capture;
mod cascade;
mod face;
mod facemark;
mod measure;
mod webcam;
mod exchange;
use exchange::Exchange;
mod front;

mod ltsv;

struct PidFile{
	path: String,
}

impl PidFile {
	fn new(path: &str) -> Result<Self> {
		let pid = unsafe {
			libc::getpid()
		};

		info!("creating pidfile", tags![
			("path", path),
			("pid", &pid.to_string())
		]);
		let mut file = OpenOptions::new()
			.create_new(true)
			.write(true)
			.open(path)?;

		file.write_all(format!("{}", pid).as_bytes())?;
		Ok(Self{path: path.to_string()})
	}
}

impl Drop for PidFile {
	fn drop(&mut self) {
		// Try to delete the pidfile
		// log an error if we can't.
		if let Err(e) = remove_file(&self.path) {
			error!("couldn't delete pidfile", tags![
				("error", &e.to_string())
			]);
		}
	}
}

enum Command {
	Serve,
	Front,
	Listen,
}

// parse_args understands `[serve|front|listen] [--config <path>]`
fn parse_args(args: &[String]) -> Result<(Command, Option<String>)> {
	let mut command = Command::Serve;
	let mut config = None;
	let mut iter = args.iter();
	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"front" => command = Command::Front,
			"listen" => command = Command::Listen,
			"serve" => command = Command::Serve,
			"--config" => match iter.next() {
				Some(path) => config = Some(path.clone()),
				None => return Err(Error::new(ErrorType::InvalidRequest)),
			},
			_ => {
				error!("unknown argument", tags![("arg", arg)]);
				return Err(Error::new(ErrorType::InvalidRequest));
			},
		}
	}
	Ok((command, config))
}

fn load_config(path: Option<String>) -> Result<Echo> {
	match path.or_else(|| std::env::var("ECHO_CONFIG").ok()) {
		Some(path) => {
			info!("loading config", tags![("path", &path)]);
			Echo::from_file(&path)
		},
		None => Ok(Echo::default()),
	}
}

fn ctrlc_flag() -> Result<Arc<AtomicBool>> {
	let running = Arc::new(AtomicBool::new(true));
	let r = running.clone();

	ctrlc::set_handler(move || {
		info!("received ctrlc - closing");
		r.store(false, Ordering::SeqCst);
	})?;
	Ok(running)
}

fn serve(n: Arc<Echo>) -> Result<()> {
	info!("echo started");
	let _pidfile = PidFile::new(&n.config.pid_path)?;
	let running = ctrlc_flag()?;

	// Camera and detector are opened on the production
	// thread when a client asks for init.
	let device = Arc::new(webcam::Camera::new(n.clone()));
	let exc = Arc::new(Exchange::new(n.clone(), device));

	// Start the threading server
	let server_raii = ServerRAII::new(n.clone(), exc)?;

	// poll for shutdown twenty times per second
	while running.load(Ordering::SeqCst) {
		thread::sleep(Duration::from_millis(50));
	}

	// Halts the store, then closes every client
	drop(server_raii);
	Ok(())
}

fn run() -> Result<i32> {
	let args: Vec<String> = std::env::args().skip(1).collect();
	let (command, config) = parse_args(&args)?;
	let n = Arc::new(load_config(config)?);

	match command {
		Command::Serve => serve(n).map(|_| 0),
		Command::Front => {
			let running = ctrlc_flag()?;
			front::run(&n, running)
		},
		Command::Listen => {
			let running = ctrlc_flag()?;
			front::listen(&n, running)
		},
	}
}

fn main() {
	let code = match run() {
		Ok(code) => code,
		Err(e) => {
			error!("something went wrong", tags![
				("error", &e.to_string())
			]);
			code_of(&e) as i32
		},
	};
	process::exit(code);
}

#[cfg(test)]
mod tests {
	use super::*;

	fn args(a: &[&str]) -> Vec<String> {
		a.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn front_with_config() {
		let (c, path) = parse_args(&args(&["front", "--config", "/e.json"]))
			.unwrap();
		assert!(match c { Command::Front => true, _ => false });
		assert_eq!(path.as_deref(), Some("/e.json"));
	}

	#[test]
	fn bare_invocation_serves() {
		let (c, path) = parse_args(&[]).unwrap();
		assert!(match c { Command::Serve => true, _ => false });
		assert_eq!(path, None);
	}

	#[test]
	fn listen_command() {
		let (c, _) = parse_args(&args(&["listen"])).unwrap();
		assert!(match c { Command::Listen => true, _ => false });
	}

	#[test]
	fn bad_arguments() {
		assert!(parse_args(&args(&["--config"])).is_err());
		assert!(parse_args(&args(&["--verbose"])).is_err());
	}

	#[test]
	fn pidfile_is_exclusive() {
		let path = std::env::temp_dir()
			.join(format!("echo-test-{}.pid", process::id()));
		let path = path.to_string_lossy().into_owned();
		{
			let _p = PidFile::new(&path).unwrap();
			assert!(PidFile::new(&path).is_err());
		}
		assert!(!std::path::Path::new(&path).exists());
	}
}

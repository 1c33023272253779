// Key value logging macros

use std::io::Write;
use std::thread;

pub type Tags<'a> = Vec<(&'static str, &'a str)>;

// The tags macro is essentially the same as vec![]
// Where the elements are of type (&'static str, &str)

#[macro_export]
macro_rules! tags {
	($($x:expr),*) => {
		vec![
			$($x),*
		]
	};
}

#[macro_export]
macro_rules! info {
	($msg:expr) => {
		$crate::ltsv::log("info", $msg, $crate::ltsv::Tags::new());
	};
	($msg:expr, $kvs:expr) => {
		$crate::ltsv::log("info", $msg, $kvs);
	};
}

#[macro_export]
macro_rules! warn {
	($msg:expr) => {
		$crate::ltsv::log("warn", $msg, $crate::ltsv::Tags::new());
	};
	($msg:expr, $kvs:expr) => {
		$crate::ltsv::log("warn", $msg, $kvs);
	};
}

#[macro_export]
macro_rules! error {
	($msg:expr) => {
		$crate::ltsv::log("error", $msg, $crate::ltsv::Tags::new());
	};
	($msg:expr, $kvs:expr) => {
		$crate::ltsv::log("error", $msg, $kvs);
	};
}

fn ltsv_encode(buf: &mut String, key: &str, value: &str) {
	escape(buf, key);
	buf.push('=');
	escape(buf, value);
}

fn escape(buf: &mut String, s: &str) {
	for c in s.chars() {
		match c {
			'\\' | '=' => buf.push('\\'),
			'\t' => {
				buf.push_str("\\t");
				continue;
			},
			'\n' => {
				buf.push_str("\\n");
				continue;
			},
			_ => {},
		}
		buf.push(c)
	}
}

pub fn format_line(thread_name: &str,
	               level: &str,
	               msg: &str,
	               tags: &[(&str, &str)]) -> String {
	let mut log_line = String::with_capacity(1024);
	// thread, level and msg always lead
	ltsv_encode(&mut log_line, "thread", thread_name);
	log_line.push('\t');
	ltsv_encode(&mut log_line, "level", level);
	log_line.push('\t');
	ltsv_encode(&mut log_line, "msg", msg);

	for (key, value) in tags.iter() {
		log_line.push('\t');
		ltsv_encode(&mut log_line, key, value);
	}
	log_line
}

pub fn log(level: &'static str,
	       msg: &str,
	       tags: Tags) {
	let current = thread::current();
	let name = current.name().unwrap_or("unnamed");
	let line = format_line(name, level, msg, &tags);

	// A closed stdout isn't worth crashing over
	let stdout = std::io::stdout();
	let mut lock = stdout.lock();
	let _ = writeln!(lock, "{}", line);
}

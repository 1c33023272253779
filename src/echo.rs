use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::errors::*;
use crate::face::layout::{Layout, IBUG_68, HELEN_194};

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum LayoutName {
	Ibug68,
	Helen194,
}

impl LayoutName {
	pub fn layout(&self) -> &'static Layout {
		match self {
			LayoutName::Ibug68 => &IBUG_68,
			LayoutName::Helen194 => &HELEN_194,
		}
	}
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Multicast {
	pub enabled: bool,
	pub group: String,
	pub port: u16,
	pub interface: String,
}

impl Default for Multicast {
	fn default() -> Self {
		Self{
			enabled: true,
			group: "226.0.0.1".to_string(),
			port: 5032,
			interface: "0.0.0.0".to_string(),
		}
	}
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	pub socket_path: String,
	pub pid_path: String,
	pub webcam_device: String,
	pub webcam_interval: (u32, u32),
	pub webcam_resolution: (u32, u32),
	pub detector_model: String,
	pub shape_model: String,
	pub min_face_size: u32,
	pub layout: LayoutName,
	pub face_box: Option<f64>,
	pub client_hello_timeout: u64,
	pub client_timeout: u64,
	pub stream_interval: u64,
	pub multicast: Multicast,
}

impl Default for Config {
	fn default() -> Self {
		Self{
			socket_path: "/tmp/echo.sock".to_string(),
			pid_path: "/tmp/echo.pid".to_string(),
			webcam_device: "/dev/video0".to_string(),
			webcam_interval: (1, 30),
			webcam_resolution: (640, 480),
			detector_model: "/usr/share/echo/seeta_fd_frontal_v1.0.bin"
				.to_string(),
			shape_model:
				"/usr/share/echo/shape_predictor_68_face_landmarks.dat.bz2"
				.to_string(),
			min_face_size: 40,
			layout: LayoutName::Ibug68,
			face_box: None,
			client_hello_timeout: 2,
			client_timeout: 15,
			stream_interval: 33,
			multicast: Multicast::default(),
		}
	}
}

// Echo is a global config passed around
// all threads.
pub struct Echo {
	pub config: Config,
}

impl Echo {
	pub fn new(config: Config) -> Self {
		Self{
			config: config,
		}
	}

	// Fields missing from the file keep their defaults
	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let file = File::open(path)?;
		let config = serde_json::from_reader(BufReader::new(file))?;
		Ok(Self::new(config))
	}

	pub fn layout(&self) -> &'static Layout {
		self.config.layout.layout()
	}
}

impl Default for Echo {
	fn default() -> Self {
		Self::new(Config::default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partial_config_keeps_defaults() {
		let config: Config = serde_json::from_str(r#"{
			"socketPath": "/run/echo.sock",
			"layout": "helen194",
			"multicast": {"port": 6000}
		}"#).unwrap();

		assert_eq!(config.socket_path, "/run/echo.sock");
		assert_eq!(config.layout, LayoutName::Helen194);
		assert_eq!(config.multicast.port, 6000);
		assert_eq!(config.multicast.group, "226.0.0.1");
		assert_eq!(config.webcam_resolution, (640, 480));
		assert_eq!(config.face_box, None);
	}

	#[test]
	fn layout_names_resolve() {
		assert_eq!(LayoutName::Ibug68.layout().len, 68);
		assert_eq!(LayoutName::Helen194.layout().len, 194);
	}
}

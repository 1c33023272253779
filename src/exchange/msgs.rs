use serde::{Serialize, Deserialize};

use crate::errors::*;

// Framed broadcast layout, big endian:
//   [0]      version, major << 4 | minor
//   [1..9]   yaw   f64
//   [9..17]  pitch f64
//   [17..25] roll  f64
//   [25]     mouth height %
//   [26]     mouth width %
//   [27]     left eye %
//   [28]     right eye %
// Changing any of this is a protocol break, bump VERSION_MAJOR.
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
pub const FRAME_LEN: usize = 29;

// Percentages above this never leave the estimator
pub const PERCENT_MAX: u8 = 150;

// Measurement is the head orientation (radians) and
// expression (percent of calibration) for one frame.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
	pub yaw: f64,
	pub pitch: f64,
	pub roll: f64,
	pub mouth_height: u8,
	pub mouth_width: u8,
	pub left_eye: u8,
	pub right_eye: u8,
}

// The neutral measurement: facing forward, everything
// as it was at calibration.
impl Default for Measurement {
	fn default() -> Self {
		Self{
			yaw: 0.0,
			pitch: 0.0,
			roll: 0.0,
			mouth_height: 100,
			mouth_width: 100,
			left_eye: 100,
			right_eye: 100,
		}
	}
}

fn read_f64(buf: &[u8], at: usize) -> f64 {
	let mut b = [0u8; 8];
	b.copy_from_slice(&buf[at..at + 8]);
	f64::from_be_bytes(b)
}

impl Measurement {
	pub fn to_frame(&self) -> [u8; FRAME_LEN] {
		let mut buf = [0u8; FRAME_LEN];
		buf[0] = VERSION_MAJOR << 4 | VERSION_MINOR;
		buf[1..9].copy_from_slice(&self.yaw.to_be_bytes());
		buf[9..17].copy_from_slice(&self.pitch.to_be_bytes());
		buf[17..25].copy_from_slice(&self.roll.to_be_bytes());
		buf[25] = self.mouth_height.min(PERCENT_MAX);
		buf[26] = self.mouth_width.min(PERCENT_MAX);
		buf[27] = self.left_eye.min(PERCENT_MAX);
		buf[28] = self.right_eye.min(PERCENT_MAX);
		buf
	}

	// from_frame accepts any minor version of our major.
	pub fn from_frame(buf: &[u8]) -> Result<Self> {
		if buf.len() != FRAME_LEN || buf[0] >> 4 != VERSION_MAJOR {
			return Err(Error::new(ErrorType::InvalidRequest));
		}
		Ok(Self{
			yaw: read_f64(buf, 1),
			pitch: read_f64(buf, 9),
			roll: read_f64(buf, 17),
			mouth_height: buf[25],
			mouth_width: buf[26],
			left_eye: buf[27],
			right_eye: buf[28],
		})
	}
}

// The collaborators the measurement pipeline reads from:
// something that yields frames and something that finds
// landmarks in them.

use crate::errors::*;
use crate::face::normalize::Landmarks;

// Frame is a single grayscale image.
#[derive(Clone, Default)]
pub struct Frame {
	pub luma: Vec<u8>,
	pub width: u32,
	pub height: u32,
	pub timestamp: u64,
}

impl Frame {
	// pixel is the luma at (x, y), None outside the image
	pub fn pixel(&self, x: i64, y: i64) -> Option<u8> {
		if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
			return None;
		}
		self.luma.get(y as usize * self.width as usize + x as usize).cloned()
	}
}

pub trait FrameSource {
	fn is_open(&self) -> bool;

	// Errors with CaptureSourceClosed once the source is gone.
	// Any other error is a bad frame and the caller may retry.
	fn read_frame(&mut self) -> Result<Frame>;
}

pub trait LandmarkDetector {
	// One point list per face found, possibly none.
	fn detect(&mut self, frame: &Frame) -> Result<Vec<Landmarks>>;
}

// Device opens a source/detector pair. It is called on the
// thread that will use them so neither needs to be Send.
pub trait Device: Send + Sync + 'static {
	fn open(&self) -> Result<(Box<dyn FrameSource>, Box<dyn LandmarkDetector>)>;
}

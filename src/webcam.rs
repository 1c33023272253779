use std::sync::Arc;

use rscam::Camera as Rscam;

use crate::errors::*;
use crate::{info, error, tags};
use crate::echo::Echo;
use crate::capture::{Device, Frame, FrameSource, LandmarkDetector};
use crate::cascade::Cascade;
use crate::facemark::{Facemark, fits_layout};

// Consecutive capture failures before we give up on the camera
const MAX_FAILURES: u32 = 30;

pub struct Webcam {
	camera: Rscam,
	failures: u32,
}

// YUYV interleaves luma with chroma, so the grey image is
// every other byte.
fn luma(yuyv: &[u8]) -> Vec<u8> {
	yuyv.iter().step_by(2).cloned().collect()
}

impl Webcam {
	pub fn open(n: &Echo) -> Result<Self> {
		info!("opening camera", tags![
			("webcam_device", &n.config.webcam_device),
			("webcam_interval", &format!("{:?}", &n.config.webcam_interval)),
			("webcam_resolution", &format!("{:?}", &n.config.webcam_resolution))
		]);
		let mut camera = Rscam::new(&n.config.webcam_device)?;
		let config = rscam::Config{
			interval: n.config.webcam_interval,
			resolution: n.config.webcam_resolution,
			format: b"YUYV",
			nbuffers: 2,
			field: rscam::FIELD_NONE,
		};

		camera.start(&config)?;

		// Check it's working
		for _ in 0..3 {
			camera.capture()?;
		}
		info!("capture started");

		Ok(Self{
			camera: camera,
			failures: 0,
		})
	}
}

impl FrameSource for Webcam {
	fn is_open(&self) -> bool {
		self.failures < MAX_FAILURES
	}

	fn read_frame(&mut self) -> Result<Frame> {
		if !self.is_open() {
			return Err(Error::new(ErrorType::CaptureSourceClosed));
		}

		match self.camera.capture() {
			Err(e) => {
				self.failures += 1;
				error!("couldn't read frame", tags![
					("error", &e.to_string()),
					("failures", &self.failures.to_string())
				]);
				if !self.is_open() {
					error!("giving up on camera");
					return Err(Error::new(ErrorType::CaptureSourceClosed));
				}
				Err(Box::new(e))
			},
			Ok(frame) => {
				self.failures = 0;
				let (width, height) = frame.resolution;
				Ok(Frame{
					luma: luma(&frame[..]),
					width: width,
					height: height,
					timestamp: frame.get_timestamp(),
				})
			},
		}
	}
}

// Camera opens the webcam and the face detector together
// on whichever thread runs production.
pub struct Camera {
	n: Arc<Echo>,
}

impl Camera {
	pub fn new(n: Arc<Echo>) -> Self {
		Self{n: n}
	}
}

impl Device for Camera {
	fn open(&self) -> Result<(Box<dyn FrameSource>, Box<dyn LandmarkDetector>)> {
		// Load the models first, a bad one shouldn't hold the camera
		let cascade = Cascade::load(&self.n.config.shape_model)?;
		fits_layout(&cascade, self.n.layout())?;
		let facemark = Facemark::new(&self.n.config.detector_model,
			                         self.n.config.min_face_size,
			                         cascade)?;
		let webcam = Webcam::open(&self.n)?;
		Ok((Box::new(webcam), Box::new(facemark)))
	}
}

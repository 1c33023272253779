use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::*;
use crate::capture::{FrameSource, LandmarkDetector};
use crate::exchange::msgs::Measurement;
use crate::face::Face;
use crate::face::normalize::Normalizer;
use crate::{info, warn, tags};
use super::Calibration;
use super::estimate::estimate;

// Tracker owns the frame source and detector for the
// lifetime of a measurement session.
pub struct Tracker {
	source: Box<dyn FrameSource>,
	detector: Box<dyn LandmarkDetector>,
	normalizer: Normalizer,
}

impl Tracker {
	pub fn new(source: Box<dyn FrameSource>,
		       detector: Box<dyn LandmarkDetector>,
		       normalizer: Normalizer) -> Self {
		Self{
			source: source,
			detector: detector,
			normalizer: normalizer,
		}
	}

	pub fn is_open(&self) -> bool {
		self.source.is_open()
	}

	// next_face reads one frame. Ok(None) is a frame with
	// no face in it.
	pub fn next_face(&mut self) -> Result<Option<Face>> {
		let frame = self.source.read_frame()?;
		let candidates = self.detector.detect(&frame)?;
		self.normalizer.face(&candidates)
	}

	// calibrate blocks until a face turns up and takes the
	// baseline from it. Bad frames are skipped; running out
	// of frames (or being halted) is fatal.
	pub fn calibrate(&mut self, halt: &AtomicBool) -> Result<Calibration> {
		info!("calibrating - face the camera");
		while self.is_open() && !halt.load(Ordering::SeqCst) {
			match self.next_face() {
				Ok(Some(face)) => {
					let calib = Calibration::new(&face)?;
					info!("calibrated", tags![
						("eye_separation",
							&calib.features.eye_separation.to_string()),
						("face_height",
							&calib.features.face_height.to_string()),
						("ratio", &calib.ratio.to_string())
					]);
					return Ok(calib);
				},
				Ok(None) => {},
				Err(e) => {
					if kind_of(&e) == Some(ErrorType::CaptureSourceClosed) {
						break;
					}
					warn!("skipping frame", tags![
						("error", &e.to_string())
					]);
				},
			}
		}
		Err(Error::new(ErrorType::CaptureSourceClosed))
	}

	// measure never fails. Any per-frame fault gives the
	// neutral measurement so streams keep flowing.
	pub fn measure(&mut self, calib: &Calibration) -> Measurement {
		let face = match self.next_face() {
			Ok(Some(face)) => face,
			Ok(None) => return Measurement::default(),
			Err(e) => {
				warn!("frame dropped", tags![
					("error", &e.to_string())
				]);
				return Measurement::default();
			},
		};

		match estimate(&face, calib) {
			Ok(m) => m,
			Err(e) => {
				warn!("estimate failed", tags![
					("error", &e.to_string())
				]);
				Measurement::default()
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::capture::Device;
	use crate::capture::testing::{ScriptedDevice, Shot, face, empty};
	use crate::face::Absolute;
	use crate::face::layout::HELEN_194;
	use crate::face::normalize::tests::{helen_points, turned_points,
		open_mouth_points};
	use crate::measure::estimate::ANGLE_LIMIT;

	fn tracker(shots: Vec<Shot>, repeat: bool) -> Tracker {
		let (source, detector) = ScriptedDevice::new(shots, repeat)
			.open().unwrap();
		Tracker::new(source, detector, Normalizer::new(&HELEN_194, None))
	}

	fn front() -> Shot {
		face(helen_points((320.0, 240.0), 1.0))
	}

	#[test]
	fn calibration_waits_for_a_face() {
		let mut t = tracker(vec![empty(), Shot::Fail, front()], false);
		let calib = t.calibrate(&AtomicBool::new(false)).unwrap();
		assert_eq!(calib.features.eye_separation, 6.0);
		assert_eq!(calib.features.face_height, 100.0);
		assert_eq!(calib.features.center, Absolute::new(320.0, 240.0));
	}

	#[test]
	fn calibration_fails_when_the_source_closes() {
		let mut t = tracker(vec![empty(), empty()], false);
		let e = t.calibrate(&AtomicBool::new(false)).unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::CaptureSourceClosed));
	}

	#[test]
	fn calibration_stops_when_halted() {
		let mut t = tracker(vec![empty()], true);
		let e = t.calibrate(&AtomicBool::new(true)).unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::CaptureSourceClosed));
	}

	#[test]
	fn degenerate_calibration_is_reported() {
		let mut points = helen_points((320.0, 240.0), 1.0);
		// both inner eye corners on the same spot
		points[135] = points[114];
		let mut t = tracker(vec![face(points)], false);
		let e = t.calibrate(&AtomicBool::new(false)).unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::CalibrationDegenerate));
	}

	#[test]
	fn turned_face_measures_negative_yaw() {
		let turned = face(turned_points((300.0, 240.0)));
		let mut t = tracker(vec![front(), turned], false);
		let calib = t.calibrate(&AtomicBool::new(false)).unwrap();

		let m = t.measure(&calib);
		// eye separation 3 against 6 is past the clamp
		assert_eq!(m.yaw, -ANGLE_LIMIT);
		assert_eq!(m.pitch, 0.0);
		assert_eq!(m.roll, 0.0);
		assert_eq!(m.mouth_width, 100);
	}

	#[test]
	fn open_mouth_measures_above_calibration() {
		let open = face(open_mouth_points((320.0, 240.0)));
		let mut t = tracker(vec![front(), open], false);
		let calib = t.calibrate(&AtomicBool::new(false)).unwrap();

		let m = t.measure(&calib);
		assert_eq!(m.mouth_height, 133);
		assert_eq!(m.mouth_width, 100);
		assert_eq!(m.yaw, 0.0);
		assert_ne!(m, Measurement::default());
	}

	#[test]
	fn gaps_and_faults_measure_neutral() {
		let mut t = tracker(vec![front(), empty(), Shot::Fail,
			face(vec![Absolute::default(); 4])], false);
		let calib = t.calibrate(&AtomicBool::new(false)).unwrap();
		for _ in 0..3 {
			assert_eq!(t.measure(&calib), Measurement::default());
		}
		assert!(!t.is_open());
		assert_eq!(t.measure(&calib), Measurement::default());
	}
}

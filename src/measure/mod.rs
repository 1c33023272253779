// Scalar measurements taken from a Face, and the one-off
// calibration baseline they are compared against.

use crate::errors::*;
use crate::face::{Absolute, Face, Relative};

pub mod estimate;
pub mod tracker;

#[derive(Default, Clone, Copy, PartialEq, Debug)]
pub struct Features {
	pub eye_separation: f64,
	pub face_height: f64,
	pub mouth_height: f64,
	pub mouth_width: f64,
	pub left_eye_height: f64,
	pub right_eye_height: f64,
	pub center: Absolute,
}

impl Features {
	pub fn of(face: &Face) -> Self {
		// Inner eye corners face each other across the nose
		let eye_line = face.left_eye.left_side - face.right_eye.right_side;
		let brows = Relative::midpoint(face.left_eyebrow.left_side,
			                           face.right_eyebrow.right_side);

		Self{
			eye_separation: eye_line.norm(),
			face_height: (brows - face.chin).norm(),
			mouth_height: face.mouth.height(),
			mouth_width: face.mouth.width(),
			left_eye_height: face.left_eye.height(),
			right_eye_height: face.right_eye.height(),
			center: face.center,
		}
	}

	// thresholded caps every scalar at its calibration value
	// so raw / calib never exceeds one. The centre is kept.
	pub fn thresholded(&self, calib: &Features) -> Self {
		Self{
			eye_separation: self.eye_separation.min(calib.eye_separation),
			face_height: self.face_height.min(calib.face_height),
			mouth_height: self.mouth_height.min(calib.mouth_height),
			mouth_width: self.mouth_width.min(calib.mouth_width),
			left_eye_height: self.left_eye_height.min(calib.left_eye_height),
			right_eye_height: self.right_eye_height
				.min(calib.right_eye_height),
			center: self.center,
		}
	}

	fn scalars(&self) -> [f64; 6] {
		[
			self.eye_separation, self.face_height,
			self.mouth_height, self.mouth_width,
			self.left_eye_height, self.right_eye_height,
		]
	}
}

// Calibration is captured once per session and never
// changes afterwards.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Calibration {
	pub features: Features,
	// Face height over width at calibration time
	pub ratio: f64,
}

impl Calibration {
	pub fn new(face: &Face) -> Result<Self> {
		let ratio = face.ratio().unwrap_or(0.0);
		Self::from_parts(Features::of(face), ratio)
	}

	// Every scalar is a denominator later on, so none of
	// them may be zero.
	pub fn from_parts(features: Features, ratio: f64) -> Result<Self> {
		let usable = |x: f64| x.is_finite() && x > 0.0;
		if !usable(ratio) || !features.scalars().iter().all(|&x| usable(x)) {
			return Err(Error::new(ErrorType::CalibrationDegenerate));
		}
		Ok(Self{
			features: features,
			ratio: ratio,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::face::layout::HELEN_194;
	use crate::face::normalize::Normalizer;
	use crate::face::normalize::tests::helen_points;

	fn front() -> Face {
		Normalizer::new(&HELEN_194, None)
			.normalize(&helen_points((320.0, 240.0), 1.0))
			.unwrap()
	}

	#[test]
	fn features_of_front_face() {
		let f = Features::of(&front());
		assert_eq!(f.eye_separation, 6.0);
		assert_eq!(f.face_height, 100.0);
		assert_eq!(f.mouth_height, 6.0);
		assert_eq!(f.mouth_width, 20.0);
		assert_eq!(f.left_eye_height, 4.0);
		assert_eq!(f.right_eye_height, 4.0);
		assert_eq!(f.center, Absolute::new(320.0, 240.0));
	}

	#[test]
	fn thresholding_against_itself_is_identity() {
		let f = Features::of(&front());
		assert_eq!(f.thresholded(&f), f);
	}

	#[test]
	fn thresholding_caps_each_field() {
		let calib = Features::of(&front());
		let mut raw = calib;
		raw.eye_separation = 9.0;
		raw.mouth_width = 5.0;
		raw.center = Absolute::new(1.0, 2.0);

		let t = raw.thresholded(&calib);
		assert_eq!(t.eye_separation, 6.0);
		assert_eq!(t.mouth_width, 5.0);
		assert_eq!(t.center, Absolute::new(1.0, 2.0));
	}

	#[test]
	fn calibration_records_ratio() {
		let c = Calibration::new(&front()).unwrap();
		// brow top at -53, chin at 50, temples 50 apart
		assert_eq!(c.ratio, 103.0 / 50.0);
	}

	#[test]
	fn zero_scalar_is_degenerate() {
		let mut face = front();
		face.left_eye.top = Some(face.left_eye.bottom);
		let e = Calibration::new(&face).unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::CalibrationDegenerate));
	}

	#[test]
	fn flat_face_is_degenerate() {
		let e = Calibration::new(&Face::default()).unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::CalibrationDegenerate));
	}
}

use std::f64::consts::PI;

use crate::errors::*;
use crate::exchange::msgs::Measurement;
use crate::face::Face;
use super::{Calibration, Features};

// Output angles are clamped to +/- ANGLE_LIMIT radians
pub const ANGLE_LIMIT: f64 = 1.0 / PI;

pub const PERCENT_LIMIT: f64 = 150.0;

fn clamp_angle(a: f64) -> f64 {
	a.max(-ANGLE_LIMIT).min(ANGLE_LIMIT)
}

// percent of calibration, rounded and held to [0, 150]
fn percent(raw: f64, calib: f64) -> u8 {
	(100.0 * raw / calib).round().max(0.0).min(PERCENT_LIMIT) as u8
}

fn signed(magnitude: f64, negative: bool) -> f64 {
	if negative {
		-magnitude
	} else {
		magnitude
	}
}

// roll is the slope of the line through the bottoms of
// both eyes. A vertical eye line means the landmarks are
// nonsense rather than the head being on its side.
fn roll(face: &Face) -> Result<f64> {
	let line = face.left_eye.bottom - face.right_eye.bottom;
	if line.x == 0.0 {
		return Err(Error::new(ErrorType::DegenerateFace));
	}
	Ok((line.y / line.x).atan())
}

// ratio_corrected undoes the vertical stretch that comes
// from the face box growing, e.g. when the mouth opens.
fn ratio_corrected(face: &Face, calib: &Calibration) -> Result<Face> {
	let ratio = face.ratio()
		.filter(|r| *r > 0.0)
		.ok_or_else(|| Error::new(ErrorType::DegenerateFace))?;
	Ok(face.scale_vertical(ratio / calib.ratio))
}

// estimate compares a live face with the calibration.
//
// Yaw and pitch only know their magnitude from the ratios;
// the sign comes from which side of the calibration centre
// the face is on. A head moved sideways without turning is
// indistinguishable from a turn by this measure.
pub fn estimate(face: &Face, calib: &Calibration) -> Result<Measurement> {
	// Recheck so a hand built calibration can't give NaN
	let calib = Calibration::from_parts(calib.features, calib.ratio)?;
	let c = &calib.features;

	let raw = Features::of(face);
	let t = raw.thresholded(c);

	let yaw = signed((t.eye_separation / c.eye_separation).acos(),
		             raw.center.x < c.center.x);
	// Image y grows downwards so above means smaller y
	let pitch = signed((t.face_height / c.face_height).acos(),
		               raw.center.y < c.center.y);
	let roll = roll(face)?;

	let e = Features::of(&ratio_corrected(face, &calib)?);

	Ok(Measurement{
		yaw: clamp_angle(yaw),
		pitch: clamp_angle(pitch),
		roll: clamp_angle(roll),
		mouth_height: percent(e.mouth_height, c.mouth_height),
		mouth_width: percent(e.mouth_width, c.mouth_width),
		left_eye: percent(e.left_eye_height, c.left_eye_height),
		right_eye: percent(e.right_eye_height, c.right_eye_height),
	})
}

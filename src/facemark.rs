// Landmark detection: rustface finds the face rectangles
// and a ShapePredictor places the points inside each one.

use rustface::{Detector, ImageData};

use crate::errors::*;
use crate::capture::{Frame, LandmarkDetector};
use crate::face::Absolute;
use crate::face::layout::Layout;
use crate::face::normalize::Landmarks;
use crate::{error, tags};

// Rect is a detected face in pixels
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Rect {
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
}

impl Rect {
	// Maps a point in [0,1] box coordinates into the image
	pub fn place(&self, x: f64, y: f64) -> Absolute {
		Absolute::new(self.x + x * self.width, self.y + y * self.height)
	}
}

pub trait ShapePredictor {
	// Number of points predict returns
	fn len(&self) -> usize;
	fn predict(&self, frame: &Frame, rect: &Rect) -> Landmarks;
}

// fits_layout checks the predictor emits the point list
// the configured layout indexes into.
pub fn fits_layout(predictor: &dyn ShapePredictor, layout: &Layout) -> Result<()> {
	if predictor.len() != layout.len {
		error!("shape model doesn't match layout", tags![
			("model_points", &predictor.len().to_string()),
			("layout", layout.name),
			("layout_points", &layout.len.to_string())
		]);
		return Err(Error::new(ErrorType::InvalidRequest));
	}
	Ok(())
}

pub struct Facemark<P: ShapePredictor> {
	detector: Box<dyn Detector>,
	predictor: P,
}

impl<P: ShapePredictor> Facemark<P> {
	pub fn new(model: &str, min_face_size: u32, predictor: P) -> Result<Self> {
		let mut detector = rustface::create_detector(model)
			.map_err(|e| format!("couldn't load face detector: {}", e))?;
		detector.set_min_face_size(min_face_size);
		detector.set_score_thresh(2.0);
		detector.set_pyramid_scale_factor(0.8);
		detector.set_slide_window_step(4, 4);

		Ok(Self{
			detector: detector,
			predictor: predictor,
		})
	}
}

impl<P: ShapePredictor> LandmarkDetector for Facemark<P> {
	fn detect(&mut self, frame: &Frame) -> Result<Vec<Landmarks>> {
		let expected = (frame.width * frame.height) as usize;
		if frame.luma.len() != expected || expected == 0 {
			return Err(Error::new(ErrorType::InvalidRequest));
		}

		let image = ImageData::new(&frame.luma, frame.width, frame.height);
		let faces = self.detector.detect(&image);

		Ok(faces.iter().map(|f| {
			let b = f.bbox();
			let rect = Rect{
				x: b.x() as f64,
				y: b.y() as f64,
				width: b.width() as f64,
				height: b.height() as f64,
			};
			self.predictor.predict(frame, &rect)
		}).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::face::layout::{IBUG_68, HELEN_194};
	use crate::face::normalize::Normalizer;
	use crate::measure::Features;

	// MeanShape is the iBUG 68 point mean face with no
	// refinement, it only follows the rectangle.
	struct MeanShape;

	const MEAN_SHAPE_68: [(f64, f64); 68] = [
		// jaw
		(0.10, 0.35), (0.11, 0.45), (0.12, 0.55), (0.14, 0.65),
		(0.18, 0.73), (0.24, 0.80), (0.32, 0.85), (0.41, 0.88),
		(0.50, 0.89), (0.59, 0.88), (0.68, 0.85), (0.76, 0.80),
		(0.82, 0.73), (0.86, 0.65), (0.88, 0.55), (0.89, 0.45),
		(0.90, 0.35),
		// brows
		(0.20, 0.26), (0.25, 0.22), (0.32, 0.21), (0.38, 0.23), (0.43, 0.27),
		(0.57, 0.27), (0.62, 0.23), (0.68, 0.21), (0.75, 0.22), (0.80, 0.26),
		// nose
		(0.50, 0.32), (0.50, 0.40), (0.50, 0.48), (0.50, 0.55),
		(0.40, 0.58), (0.45, 0.60), (0.50, 0.62), (0.55, 0.60), (0.60, 0.58),
		// eyes
		(0.24, 0.32), (0.28, 0.29), (0.34, 0.29),
		(0.38, 0.33), (0.34, 0.35), (0.28, 0.35),
		(0.62, 0.33), (0.66, 0.29), (0.72, 0.29),
		(0.76, 0.32), (0.72, 0.35), (0.66, 0.35),
		// outer lip
		(0.32, 0.72), (0.38, 0.68), (0.44, 0.66), (0.50, 0.67),
		(0.56, 0.66), (0.62, 0.68), (0.68, 0.72), (0.62, 0.78),
		(0.56, 0.80), (0.50, 0.81), (0.44, 0.80), (0.38, 0.78),
		// inner lip
		(0.36, 0.72), (0.44, 0.70), (0.50, 0.70), (0.56, 0.70),
		(0.64, 0.72), (0.56, 0.74), (0.50, 0.75), (0.44, 0.74),
	];

	impl ShapePredictor for MeanShape {
		fn len(&self) -> usize {
			MEAN_SHAPE_68.len()
		}

		fn predict(&self, _frame: &Frame, rect: &Rect) -> Landmarks {
			MEAN_SHAPE_68.iter().map(|&(x, y)| rect.place(x, y)).collect()
		}
	}

	fn rect() -> Rect {
		Rect{x: 100.0, y: 50.0, width: 200.0, height: 200.0}
	}

	#[test]
	fn mean_shape_fills_the_rectangle() {
		let points = MeanShape.predict(&Frame::default(), &rect());
		assert_eq!(points.len(), IBUG_68.len);
		assert!(points.iter().all(|p| {
			p.x >= 100.0 && p.x <= 300.0 && p.y >= 50.0 && p.y <= 250.0
		}));
		// chin sits centrally near the bottom
		assert_eq!(points[8], Absolute::new(200.0, 50.0 + 0.89 * 200.0));
	}

	#[test]
	fn mean_shape_normalizes_to_a_frontal_face() {
		let points = MeanShape.predict(&Frame::default(), &rect());
		let face = Normalizer::new(&IBUG_68, None).normalize(&points).unwrap();
		assert_eq!(face.center, points[33]);

		let f = Features::of(&face);
		assert!(f.eye_separation > 0.0);
		assert!(f.mouth_width > f.mouth_height);
		// symmetric about the vertical midline
		assert!((f.left_eye_height - f.right_eye_height).abs() < 1e-9);
		assert!(face.left_eye.left_side.x > face.right_eye.right_side.x);
	}

	#[test]
	fn predictor_must_fit_the_layout() {
		assert!(fits_layout(&MeanShape, &IBUG_68).is_ok());
		let e = fits_layout(&MeanShape, &HELEN_194).unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::InvalidRequest));
	}
}

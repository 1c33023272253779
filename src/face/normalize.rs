use crate::errors::*;
use super::{Absolute, Relative, Part, PartKind, Face};
use super::layout::{Layout, PartIndex};

// One detector result, in detector order.
pub type Landmarks = Vec<Absolute>;

// Normalizer turns detector point lists into Faces. It
// holds no state between calls so identical input always
// gives an identical Face.
#[derive(Clone, Copy)]
pub struct Normalizer {
	layout: &'static Layout,
	// Width the temples are scaled onto, None leaves pixels
	face_box: Option<f64>,
}

impl Normalizer {
	pub fn new(layout: &'static Layout, face_box: Option<f64>) -> Self {
		Self{
			layout: layout,
			face_box: face_box,
		}
	}

	pub fn layout(&self) -> &'static Layout {
		self.layout
	}

	fn well_formed(&self, points: &[Absolute]) -> bool {
		points.len() > self.layout.max_index() &&
			points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
	}

	// span is the horizontal distance between the temples
	fn span(&self, points: &[Absolute]) -> f64 {
		let l = points[self.layout.left_temple];
		let r = points[self.layout.right_temple];
		(l.x - r.x).abs()
	}

	// select picks the widest well formed candidate.
	// The first one seen wins a tie.
	pub fn select<'a>(&self, candidates: &'a [Landmarks])
		-> Option<&'a Landmarks> {
		let mut best: Option<(&Landmarks, f64)> = None;
		for c in candidates.iter().filter(|c| self.well_formed(c)) {
			let span = self.span(c);
			match best {
				Some((_, widest)) if span <= widest => {},
				_ => best = Some((c, span)),
			}
		}
		best.map(|(c, _)| c)
	}

	// face runs selection then normalization. No candidates
	// means no face, which isn't an error.
	pub fn face(&self, candidates: &[Landmarks]) -> Result<Option<Face>> {
		if candidates.is_empty() {
			return Ok(None);
		}
		match self.select(candidates) {
			Some(points) => Ok(Some(self.normalize(points)?)),
			None => Err(Error::new(ErrorType::MalformedLandmarks)),
		}
	}

	pub fn normalize(&self, points: &[Absolute]) -> Result<Face> {
		if !self.well_formed(points) {
			return Err(Error::new(ErrorType::MalformedLandmarks));
		}

		let scale = match self.face_box {
			Some(size) => {
				let span = self.span(points);
				if span == 0.0 {
					return Err(Error::new(ErrorType::MalformedLandmarks));
				}
				size / span
			},
			None => 1.0,
		};

		let l = self.layout;
		let center = points[l.center];
		let rel = |i: usize| Relative::from_detector(points[i], center) * scale;
		let part = |kind: PartKind, idx: &PartIndex| Part{
			kind: kind,
			top: idx.top.map(&rel),
			bottom: rel(idx.bottom),
			left_side: rel(idx.left_side),
			right_side: rel(idx.right_side),
		};

		Ok(Face{
			center: center,
			left_temple: rel(l.left_temple),
			right_temple: rel(l.right_temple),
			chin: rel(l.chin),
			left_eye: part(PartKind::Eye, &l.left_eye),
			right_eye: part(PartKind::Eye, &l.right_eye),
			left_eyebrow: part(PartKind::EyeBrow, &l.left_eyebrow),
			right_eyebrow: part(PartKind::EyeBrow, &l.right_eyebrow),
			mouth: part(PartKind::Mouth, &l.mouth),
			nose: part(PartKind::Nose, &l.nose),
		})
	}
}

#[cfg(test)]
pub mod tests {
	use super::*;
	use crate::face::layout::HELEN_194;

	// helen_points builds a Helen list with the named points
	// set and everything else at the origin. Coordinates are
	// image coordinates, y grows downwards.
	pub fn helen_points(offset: (f64, f64), scale: f64) -> Landmarks {
		let mut ps = vec![Absolute::default(); HELEN_194.len];
		let mut set = |i: usize, x: f64, y: f64| {
			ps[i] = Absolute::new(offset.0 + x * scale,
				                  offset.1 + y * scale);
		};
		// temples, chin, centre
		set(0, -25.0, -30.0);
		set(40, 25.0, -30.0);
		set(19, 0.0, 50.0);
		set(49, 0.0, 0.0);
		// nose
		set(45, -4.0, -2.0);
		set(53, 4.0, -2.0);
		// left eye: inner, outer, top, bottom
		set(114, 3.0, -25.0);
		set(124, 13.0, -25.0);
		set(120, 8.0, -27.0);
		set(129, 8.0, -23.0);
		// right eye
		set(135, -3.0, -25.0);
		set(145, -13.0, -25.0);
		set(140, -8.0, -27.0);
		set(149, -8.0, -23.0);
		// left brow
		set(154, 5.0, -50.0);
		set(165, 15.0, -50.0);
		set(160, 10.0, -53.0);
		set(169, 10.0, -49.0);
		// right brow
		set(174, -5.0, -50.0);
		set(184, -15.0, -50.0);
		set(178, -10.0, -53.0);
		set(189, -10.0, -49.0);
		// mouth
		set(58, -10.0, 20.0);
		set(71, 10.0, 20.0);
		set(65, 0.0, 17.0);
		set(79, 0.0, 23.0);
		ps
	}

	// turned_points is the helen_points face with its inner
	// eye corners pulled in to half the separation, the way
	// they look with the head turned.
	pub fn turned_points(offset: (f64, f64)) -> Landmarks {
		let mut ps = helen_points(offset, 1.0);
		ps[114] = Absolute::new(offset.0 + 1.5, offset.1 - 25.0);
		ps[135] = Absolute::new(offset.0 - 1.5, offset.1 - 25.0);
		ps
	}

	// open_mouth_points drops the bottom lip by two, a mouth
	// height of 8 against the usual 6.
	pub fn open_mouth_points(offset: (f64, f64)) -> Landmarks {
		let mut ps = helen_points(offset, 1.0);
		ps[79] = Absolute::new(offset.0, offset.1 + 25.0);
		ps
	}

	fn pixels() -> Normalizer {
		Normalizer::new(&HELEN_194, None)
	}

	#[test]
	fn centre_is_nose_bottom() {
		let face = pixels().normalize(&helen_points((320.0, 240.0), 1.0))
			.unwrap();
		assert_eq!(face.center, Absolute::new(320.0, 240.0));
		assert_eq!(face.chin, Relative::new(0.0, 50.0));
		assert_eq!(face.left_eye.left_side, Relative::new(3.0, -25.0));
		assert_eq!(face.right_eye.right_side, Relative::new(-3.0, -25.0));
		assert_eq!(face.mouth.top, Some(Relative::new(0.0, 17.0)));
		assert_eq!(face.nose.top, None);
		assert_eq!(face.nose.kind, PartKind::Nose);
	}

	#[test]
	fn normalization_is_pure() {
		let n = Normalizer::new(&HELEN_194, Some(100.0));
		let points = helen_points((101.5, 77.25), 1.7);
		let a = n.normalize(&points).unwrap();
		let b = n.normalize(&points).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn translation_doesnt_change_relative_points() {
		let a = pixels().normalize(&helen_points((0.0, 0.0), 1.0)).unwrap();
		let b = pixels().normalize(&helen_points((50.0, -20.0), 1.0))
			.unwrap();
		assert_eq!(a.left_eye, b.left_eye);
		assert_eq!(a.chin, b.chin);
		assert!(a.center != b.center);
	}

	#[test]
	fn face_box_removes_scale() {
		let n = Normalizer::new(&HELEN_194, Some(100.0));
		let small = n.normalize(&helen_points((0.0, 0.0), 1.0)).unwrap();
		let large = n.normalize(&helen_points((0.0, 0.0), 2.0)).unwrap();
		assert_eq!(small.width(), 100.0);
		assert_eq!(large.width(), 100.0);
		assert_eq!(small.chin, large.chin);
		assert_eq!(small.ratio(), large.ratio());
	}

	#[test]
	fn short_input_is_malformed() {
		let mut points = helen_points((0.0, 0.0), 1.0);
		points.truncate(189);
		let e = pixels().normalize(&points).unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::MalformedLandmarks));

		let e = pixels().normalize(&[]).unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::MalformedLandmarks));
	}

	#[test]
	fn non_finite_input_is_malformed() {
		let mut points = helen_points((0.0, 0.0), 1.0);
		points[7] = Absolute::new(f64::NAN, 0.0);
		assert!(pixels().normalize(&points).is_err());
	}

	#[test]
	fn widest_candidate_wins() {
		let narrow = helen_points((0.0, 0.0), 1.0);
		let wide = helen_points((300.0, 0.0), 2.0);
		let tie = helen_points((600.0, 0.0), 2.0);
		let candidates = vec![narrow, wide.clone(), tie];
		let chosen = pixels().select(&candidates).unwrap();
		assert_eq!(chosen, &wide);
	}

	#[test]
	fn no_candidates_is_no_face() {
		assert_eq!(pixels().face(&[]).unwrap(), None);
	}

	#[test]
	fn only_malformed_candidates_is_an_error() {
		let candidates = vec![vec![Absolute::default(); 3]];
		let e = pixels().face(&candidates).unwrap_err();
		assert_eq!(kind_of(&e), Some(ErrorType::MalformedLandmarks));
	}
}

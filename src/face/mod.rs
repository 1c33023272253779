// Face geometry. A Face is a set of named parts expressed
// relative to one absolute centre (the bottom of the nose).

use std::ops::{Add, Sub, Neg, Div, Mul};

pub mod layout;
pub mod normalize;

// coord! stamps out a 2-D point type with the usual vector
// arithmetic. Absolute and Relative points must never mix,
// so they are separate types with identical operators.
macro_rules! coord {
	($name:ident) => {
		#[derive(Default, Clone, Copy, PartialEq, Debug)]
		pub struct $name {
			pub x: f64,
			pub y: f64,
		}

		impl $name {
			pub const fn new(x: f64, y: f64) -> Self {
				Self{x: x, y: y}
			}

			pub fn norm(&self) -> f64 {
				self.x.hypot(self.y)
			}
		}

		impl Add for $name {
			type Output = Self;
			fn add(self, o: Self) -> Self {
				Self::new(self.x + o.x, self.y + o.y)
			}
		}

		impl Sub for $name {
			type Output = Self;
			fn sub(self, o: Self) -> Self {
				Self::new(self.x - o.x, self.y - o.y)
			}
		}

		impl Neg for $name {
			type Output = Self;
			fn neg(self) -> Self {
				Self::new(-self.x, -self.y)
			}
		}

		impl Div<f64> for $name {
			type Output = Self;
			fn div(self, d: f64) -> Self {
				Self::new(self.x / d, self.y / d)
			}
		}

		impl Mul<f64> for $name {
			type Output = Self;
			fn mul(self, m: f64) -> Self {
				Self::new(self.x * m, self.y * m)
			}
		}
	};
}

// Pixel space position, only meaningful against the camera frame.
coord!(Absolute);
// Offset from the face's Absolute centre.
coord!(Relative);

impl Relative {
	// from_detector re-expresses a raw detector point
	// against the face centre.
	pub fn from_detector(p: Absolute, center: Absolute) -> Self {
		let d = p - center;
		Self::new(d.x, d.y)
	}

	pub fn from_coord(x: f64, y: f64) -> Self {
		Self::new(x, y)
	}

	pub fn midpoint(a: Self, b: Self) -> Self {
		(a + b) / 2.0
	}
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum PartKind {
	Generic,
	Eye,
	EyeBrow,
	Mouth,
	Nose,
}

impl Default for PartKind {
	fn default() -> Self {
		PartKind::Generic
	}
}

// Part describes one feature by its four extremes.
// left_side / right_side are the smaller / larger x
// in image coordinates, top is the smaller y.
// The nose has no top landmark.
#[derive(Default, Clone, Copy, PartialEq, Debug)]
pub struct Part {
	pub kind: PartKind,
	pub top: Option<Relative>,
	pub bottom: Relative,
	pub left_side: Relative,
	pub right_side: Relative,
}

impl Part {
	pub fn new(kind: PartKind,
		       top: Relative,
		       bottom: Relative,
		       left_side: Relative,
		       right_side: Relative) -> Self {
		Self{
			kind: kind,
			top: Some(top),
			bottom: bottom,
			left_side: left_side,
			right_side: right_side,
		}
	}

	pub fn nose(bottom: Relative,
		        left_side: Relative,
		        right_side: Relative) -> Self {
		Self{
			kind: PartKind::Nose,
			top: None,
			bottom: bottom,
			left_side: left_side,
			right_side: right_side,
		}
	}

	// Vertical extent; a part without a top has none.
	pub fn height(&self) -> f64 {
		match self.top {
			Some(top) => (top - self.bottom).norm(),
			None => 0.0,
		}
	}

	pub fn width(&self) -> f64 {
		(self.right_side - self.left_side).norm()
	}

	// map applies f to every point. All of the arithmetic
	// below goes through here or zip.
	pub fn map<F: Fn(Relative) -> Relative>(&self, f: F) -> Self {
		Self{
			kind: self.kind,
			top: self.top.map(&f),
			bottom: f(self.bottom),
			left_side: f(self.left_side),
			right_side: f(self.right_side),
		}
	}

	fn zip<F: Fn(Relative, Relative) -> Relative>(&self, o: &Self, f: F)
		-> Self {
		Self{
			kind: self.kind,
			top: match (self.top, o.top) {
				(Some(a), Some(b)) => Some(f(a, b)),
				(a, b) => a.or(b),
			},
			bottom: f(self.bottom, o.bottom),
			left_side: f(self.left_side, o.left_side),
			right_side: f(self.right_side, o.right_side),
		}
	}
}

impl Add for Part {
	type Output = Self;
	fn add(self, o: Self) -> Self {
		self.zip(&o, |a, b| a + b)
	}
}

impl Sub for Part {
	type Output = Self;
	fn sub(self, o: Self) -> Self {
		self + -o
	}
}

impl Neg for Part {
	type Output = Self;
	fn neg(self) -> Self {
		self.map(|p| -p)
	}
}

impl Div<f64> for Part {
	type Output = Self;
	fn div(self, d: f64) -> Self {
		self.map(|p| p / d)
	}
}

#[derive(Default, Clone, Copy, PartialEq, Debug)]
pub struct Face {
	pub center: Absolute,
	pub left_temple: Relative,
	pub right_temple: Relative,
	pub chin: Relative,
	pub left_eye: Part,
	pub right_eye: Part,
	pub left_eyebrow: Part,
	pub right_eyebrow: Part,
	pub mouth: Part,
	pub nose: Part,
}

impl Face {
	// Temple to temple.
	pub fn width(&self) -> f64 {
		(self.right_temple.x - self.left_temple.x).abs()
	}

	// Highest eyebrow point down to the chin.
	pub fn height(&self) -> f64 {
		let top = self.eyebrow_top().unwrap_or(self.chin.y);
		(self.chin.y - top).abs()
	}

	fn eyebrow_top(&self) -> Option<f64> {
		let tops = [self.left_eyebrow.top, self.right_eyebrow.top];
		tops.iter()
			.flatten()
			.map(|p| p.y)
			.fold(None, |m: Option<f64>, y| Some(m.map_or(y, |m| m.min(y))))
	}

	// Height over width, None when the face has no width
	pub fn ratio(&self) -> Option<f64> {
		let w = self.width();
		if w == 0.0 {
			return None;
		}
		Some(self.height() / w)
	}

	// map_relative applies f to every Relative point,
	// the centre is left alone.
	pub fn map_relative<F: Fn(Relative) -> Relative>(&self, f: F) -> Self {
		Self{
			center: self.center,
			left_temple: f(self.left_temple),
			right_temple: f(self.right_temple),
			chin: f(self.chin),
			left_eye: self.left_eye.map(&f),
			right_eye: self.right_eye.map(&f),
			left_eyebrow: self.left_eyebrow.map(&f),
			right_eyebrow: self.right_eyebrow.map(&f),
			mouth: self.mouth.map(&f),
			nose: self.nose.map(&f),
		}
	}

	pub fn scale_vertical(&self, divisor: f64) -> Self {
		self.map_relative(|p| Relative::new(p.x, p.y / divisor))
	}
}

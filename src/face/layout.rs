// Index tables mapping a detector's ordered point list
// onto named face parts. These are part of the detector's
// contract and are never derived at runtime.
//
// "left" and "right" are the subject's, so the left eye
// sits at the larger image x.

#[derive(Clone, Copy, Debug)]
pub struct PartIndex {
	pub top: Option<usize>,
	pub bottom: usize,
	pub left_side: usize,
	pub right_side: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct Layout {
	pub name: &'static str,
	// Number of points the detector emits
	pub len: usize,
	// Bottom of the nose, the Absolute face centre
	pub center: usize,
	pub left_temple: usize,
	pub right_temple: usize,
	pub chin: usize,
	pub left_eye: PartIndex,
	pub right_eye: PartIndex,
	pub left_eyebrow: PartIndex,
	pub right_eyebrow: PartIndex,
	pub mouth: PartIndex,
	pub nose: PartIndex,
}

const fn part(top: usize, bottom: usize, left_side: usize, right_side: usize)
	-> PartIndex {
	PartIndex{
		top: Some(top),
		bottom: bottom,
		left_side: left_side,
		right_side: right_side,
	}
}

// dlib / iBUG 300-W 68 point markup
pub const IBUG_68: Layout = Layout{
	name: "ibug68",
	len: 68,
	center: 33,
	left_temple: 16,
	right_temple: 0,
	chin: 8,
	left_eye: part(44, 46, 42, 45),
	right_eye: part(37, 41, 36, 39),
	// Eyebrows have no lower edge here, the inner end stands in
	left_eyebrow: part(24, 22, 22, 26),
	right_eyebrow: part(19, 21, 17, 21),
	mouth: part(51, 57, 48, 54),
	nose: PartIndex{top: None, bottom: 33, left_side: 31, right_side: 35},
};

// Helen 194 point markup, grouped order:
//   [0~40]: chin           [41~57]: nose
//   [58~85]: outer lips    [86~113]: inner lips
//   [114~133]: left eye    [134~153]: right eye
//   [154~173]: left brow   [174~193]: right brow
pub const HELEN_194: Layout = Layout{
	name: "helen194",
	len: 194,
	center: 49,
	left_temple: 40,
	right_temple: 0,
	chin: 19,
	left_eye: part(120, 129, 114, 124),
	right_eye: part(140, 149, 145, 135),
	left_eyebrow: part(160, 169, 154, 165),
	right_eyebrow: part(178, 189, 184, 174),
	mouth: part(65, 79, 58, 71),
	nose: PartIndex{top: None, bottom: 49, left_side: 45, right_side: 53},
};

impl PartIndex {
	fn max(&self) -> usize {
		let sides = self.bottom.max(self.left_side).max(self.right_side);
		match self.top {
			Some(top) => sides.max(top),
			None => sides,
		}
	}
}

impl Layout {
	// max_index is the largest index this table reads. Point
	// lists shorter than max_index + 1 are malformed.
	pub fn max_index(&self) -> usize {
		let parts = [
			&self.left_eye, &self.right_eye,
			&self.left_eyebrow, &self.right_eyebrow,
			&self.mouth, &self.nose,
		];
		parts.iter()
			.map(|p| p.max())
			.chain(vec![
				self.center, self.left_temple,
				self.right_temple, self.chin,
			])
			.max()
			.unwrap_or(0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tables_fit_their_detectors() {
		for layout in [IBUG_68, HELEN_194].iter() {
			assert!(layout.max_index() < layout.len, "{}", layout.name);
		}
	}

	#[test]
	fn helen_reads_the_last_brow_points() {
		assert_eq!(HELEN_194.max_index(), 189);
		assert_eq!(IBUG_68.max_index(), 57);
	}
}

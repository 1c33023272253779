// Regression tree cascade for placing face landmarks, read
// from dlib's shape_predictor files (.dat or .dat.bz2).
//
// Shapes are flat [x0, y0, x1, y1, ..] vectors in face
// rectangle coordinates, where the rectangle is the unit
// square. Each stage samples pixels around the current
// estimate and every tree in the stage adds a correction.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;

use crate::errors::*;
use crate::capture::Frame;
use crate::face::normalize::Landmarks;
use crate::facemark::{Rect, ShapePredictor};
use crate::{info, tags};

const FORMAT_VERSION: i64 = 1;
// No list in a real model comes close
const MAX_LEN: usize = 1 << 20;
// Exponents at and above this mark inf and nan
const SPECIAL_EXPONENT: i64 = 32000;

fn invalid(what: &str) -> Box<dyn std::error::Error> {
	format!("bad shape model: {}", what).into()
}

struct Decoder<R: Read> {
	r: R,
}

impl<R: Read> Decoder<R> {
	fn byte(&mut self) -> Result<u8> {
		let mut b = [0u8; 1];
		self.r.read_exact(&mut b)?;
		Ok(b[0])
	}

	// A control byte, sign in the top bit and length in the
	// low nibble, then that many little endian bytes.
	fn int(&mut self) -> Result<i64> {
		let control = self.byte()?;
		let len = (control & 0x0f) as usize;
		if len > 8 {
			return Err(invalid("integer too long"));
		}
		let mut v: u64 = 0;
		for i in 0..len {
			v |= (self.byte()? as u64) << (8 * i);
		}
		let v = v as i64;
		Ok(if control & 0x80 != 0 { v.wrapping_neg() } else { v })
	}

	fn ulong(&mut self) -> Result<usize> {
		let v = self.int()?;
		if v < 0 || v as usize > MAX_LEN {
			return Err(invalid("length out of range"));
		}
		Ok(v as usize)
	}

	// Mantissa then base two exponent
	fn float(&mut self) -> Result<f32> {
		let mantissa = self.int()?;
		let exponent = self.int()?;
		if exponent >= SPECIAL_EXPONENT {
			return Err(invalid("non finite value"));
		}
		Ok((mantissa as f64 * 2f64.powi(exponent as i32)) as f32)
	}

	// Column vectors carry their dimensions first. Newer
	// files store them negated.
	fn column(&mut self) -> Result<Vec<f32>> {
		let rows = self.int()?.unsigned_abs();
		let cols = self.int()?.unsigned_abs();
		if cols != 1 || rows > MAX_LEN as u64 {
			return Err(invalid("expected a column vector"));
		}
		(0..rows).map(|_| self.float()).collect()
	}

	fn list<T, F>(&mut self, mut f: F) -> Result<Vec<T>>
		where F: FnMut(&mut Self) -> Result<T> {
		let len = self.ulong()?;
		(0..len).map(|_| f(self)).collect()
	}

	fn tree(&mut self, shape_len: usize) -> Result<Tree> {
		let splits = self.list(|d| Ok(Split{
			idx1: d.ulong()?,
			idx2: d.ulong()?,
			thresh: d.float()?,
		}))?;
		let leaves = self.list(|d| d.column())?;

		if leaves.len() != splits.len() + 1 {
			return Err(invalid("leaf count doesn't match splits"));
		}
		if leaves.iter().any(|l| l.len() != shape_len) {
			return Err(invalid("leaf size doesn't match shape"));
		}
		Ok(Tree{
			splits: splits,
			leaves: leaves,
		})
	}
}

struct Split {
	idx1: usize,
	idx2: usize,
	thresh: f32,
}

struct Tree {
	// A complete binary tree in breadth first order, the
	// leaves carry on where the splits stop.
	splits: Vec<Split>,
	leaves: Vec<Vec<f32>>,
}

impl Tree {
	fn leaf(&self, pixels: &[f32]) -> &[f32] {
		let mut i = 0;
		while i < self.splits.len() {
			let s = &self.splits[i];
			i = if pixels[s.idx1] - pixels[s.idx2] > s.thresh {
				2 * i + 1
			} else {
				2 * i + 2
			};
		}
		&self.leaves[i - self.splits.len()]
	}
}

struct Stage {
	trees: Vec<Tree>,
	// Feature i samples at landmark anchors[i] plus deltas[i]
	anchors: Vec<usize>,
	deltas: Vec<(f32, f32)>,
}

// similarity is the scaled rotation [a -b; b a] that best
// takes from onto to once both are centred.
fn similarity(from: &[f32], to: &[f32]) -> (f32, f32) {
	let n = (from.len() / 2) as f32;
	let mean = |s: &[f32], k: usize| {
		s.iter().skip(k).step_by(2).sum::<f32>() / n
	};
	let (fx, fy) = (mean(from, 0), mean(from, 1));
	let (tx, ty) = (mean(to, 0), mean(to, 1));

	let (mut dot, mut cross, mut norm) = (0f32, 0f32, 0f32);
	for (f, t) in from.chunks(2).zip(to.chunks(2)) {
		let (x, y) = (f[0] - fx, f[1] - fy);
		let (u, v) = (t[0] - tx, t[1] - ty);
		dot += x * u + y * v;
		cross += x * v - y * u;
		norm += x * x + y * y;
	}
	if norm == 0.0 {
		return (1.0, 0.0);
	}
	(dot / norm, cross / norm)
}

pub struct Cascade {
	initial: Vec<f32>,
	stages: Vec<Stage>,
}

impl Cascade {
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		info!("loading shape model", tags![
			("path", &path.display().to_string())
		]);
		let file = BufReader::new(File::open(path)?);
		let cascade = if path.extension().map_or(false, |e| e == "bz2") {
			Self::read(BzDecoder::new(file))?
		} else {
			Self::read(file)?
		};
		info!("shape model loaded", tags![
			("landmarks", &cascade.len().to_string()),
			("stages", &cascade.stages.len().to_string())
		]);
		Ok(cascade)
	}

	pub fn read<R: Read>(r: R) -> Result<Self> {
		let mut d = Decoder{r: r};
		if d.int()? != FORMAT_VERSION {
			return Err(invalid("unknown version"));
		}

		let initial = d.column()?;
		if initial.is_empty() || initial.len() % 2 != 0 {
			return Err(invalid("initial shape"));
		}
		let shape_len = initial.len();
		let forests = d.list(|d| d.list(|d| d.tree(shape_len)))?;
		let anchors = d.list(|d| d.list(|d| d.ulong()))?;
		let deltas = d.list(|d| d.list(|d| Ok((d.float()?, d.float()?))))?;

		if anchors.len() != forests.len() || deltas.len() != forests.len() {
			return Err(invalid("stage tables don't line up"));
		}

		let landmarks = shape_len / 2;
		let stages = forests.into_iter()
			.zip(anchors)
			.zip(deltas)
			.map(|((trees, anchors), deltas)| {
				if anchors.len() != deltas.len()
					|| anchors.iter().any(|&a| a >= landmarks) {
					return Err(invalid("feature table"));
				}
				let features = anchors.len();
				let in_range = trees.iter()
					.flat_map(|t| t.splits.iter())
					.all(|s| s.idx1 < features && s.idx2 < features);
				if !in_range {
					return Err(invalid("split reads a missing feature"));
				}
				Ok(Stage{
					trees: trees,
					anchors: anchors,
					deltas: deltas,
				})
			})
			.collect::<Result<Vec<_>>>()?;

		Ok(Self{
			initial: initial,
			stages: stages,
		})
	}

	// Pixels outside the frame read as black
	fn pixels(&self, stage: &Stage, frame: &Frame, rect: &Rect, shape: &[f32])
		-> Vec<f32> {
		// The offsets were learnt around the mean shape so
		// they turn and scale with the current estimate.
		let (a, b) = similarity(&self.initial, shape);
		stage.anchors.iter().zip(stage.deltas.iter()).map(|(&i, &(dx, dy))| {
			let x = shape[2 * i] + a * dx - b * dy;
			let y = shape[2 * i + 1] + b * dx + a * dy;
			let p = rect.place(x as f64, y as f64);
			frame.pixel(p.x.round() as i64, p.y.round() as i64)
				.map_or(0.0, |v| v as f32)
		}).collect()
	}
}

impl ShapePredictor for Cascade {
	fn len(&self) -> usize {
		self.initial.len() / 2
	}

	fn predict(&self, frame: &Frame, rect: &Rect) -> Landmarks {
		let mut shape = self.initial.clone();
		for stage in self.stages.iter() {
			let pixels = self.pixels(stage, frame, rect, &shape);
			for tree in stage.trees.iter() {
				for (s, d) in shape.iter_mut().zip(tree.leaf(&pixels)) {
					*s += d;
				}
			}
		}
		shape.chunks(2)
			.map(|p| rect.place(p[0] as f64, p[1] as f64))
			.collect()
	}
}

//! Native int8 dense classifier and its on-disk blob format.
//!
//! Blob layout (little-endian):
//!
//! ```text
//! "KWSQ"  u16 version  u16 layer_count  u32 input_len  f32 input_scale  i32 input_zero_point
//! per layer:
//!   u32 in  u32 out  u8 activation  f32 weight_scale  f32 output_scale  i32 output_zero_point
//!   i8 weights[out][in]  i32 biases[out]
//! u32 fnv1a32(every preceding byte)
//! ```
//!
//! Activations are int8 with per-tensor affine quantization; biases are int32
//! in units of `input_scale * weight_scale`. The last layer's output is
//! dequantized and passed through softmax.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

use super::arena::{aligned, TensorArena};
use super::{softmax, ClassifierBackend, InferenceError, ModelLoadError};

pub const MODEL_MAGIC: &[u8; 4] = b"KWSQ";
pub const MODEL_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    None,
    Relu,
}

impl Activation {
    fn from_byte(byte: u8) -> Result<Self, ModelLoadError> {
        match byte {
            0 => Ok(Activation::None),
            1 => Ok(Activation::Relu),
            other => Err(ModelLoadError::ShapeMismatch(format!(
                "unknown activation code {}",
                other
            ))),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Activation::None => 0,
            Activation::Relu => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    input_len: usize,
    output_len: usize,
    activation: Activation,
    weight_scale: f32,
    output_scale: f32,
    output_zero_point: i32,
    weights: Vec<i8>,
    biases: Vec<i32>,
}

impl DenseLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input_len: usize,
        output_len: usize,
        activation: Activation,
        weight_scale: f32,
        output_scale: f32,
        output_zero_point: i32,
        weights: Vec<i8>,
        biases: Vec<i32>,
    ) -> Result<Self, ModelLoadError> {
        if input_len == 0 || output_len == 0 {
            return Err(ModelLoadError::ShapeMismatch(
                "layer dimensions must be positive".to_string(),
            ));
        }
        if weights.len() != input_len * output_len {
            return Err(ModelLoadError::ShapeMismatch(format!(
                "expected {}x{} weights, got {}",
                output_len,
                input_len,
                weights.len()
            )));
        }
        if biases.len() != output_len {
            return Err(ModelLoadError::ShapeMismatch(format!(
                "expected {} biases, got {}",
                output_len,
                biases.len()
            )));
        }
        check_scale("weight_scale", weight_scale)?;
        check_scale("output_scale", output_scale)?;
        check_zero_point("output_zero_point", output_zero_point)?;

        Ok(Self {
            input_len,
            output_len,
            activation,
            weight_scale,
            output_scale,
            output_zero_point,
            weights,
            biases,
        })
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    pub fn output_len(&self) -> usize {
        self.output_len
    }

    fn run(&self, input: &[i8], input_scale: f32, input_zero_point: i32, output: &mut [i8]) {
        let multiplier = input_scale * self.weight_scale / self.output_scale;
        let floor = match self.activation {
            Activation::Relu => self.output_zero_point,
            Activation::None => i8::MIN as i32,
        };

        for (row, (out, &bias)) in self
            .weights
            .chunks_exact(self.input_len)
            .zip(output.iter_mut().zip(&self.biases))
        {
            let acc = row
                .iter()
                .zip(input)
                .fold(bias, |acc, (&w, &x)| acc + w as i32 * (x as i32 - input_zero_point));
            let q = (acc as f32 * multiplier).round() as i32 + self.output_zero_point;
            *out = q.clamp(floor, i8::MAX as i32) as i8;
        }
    }
}

fn check_scale(name: &str, scale: f32) -> Result<(), ModelLoadError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(ModelLoadError::InvalidQuantization(format!(
            "{} must be positive, got {}",
            name, scale
        )))
    }
}

fn check_zero_point(name: &str, zero_point: i32) -> Result<(), ModelLoadError> {
    if (i8::MIN as i32..=i8::MAX as i32).contains(&zero_point) {
        Ok(())
    } else {
        Err(ModelLoadError::InvalidQuantization(format!(
            "{} {} outside int8 range",
            name, zero_point
        )))
    }
}

pub fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, &b| {
        (hash ^ b as u32).wrapping_mul(0x0100_0193)
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedModel {
    input_len: usize,
    input_scale: f32,
    input_zero_point: i32,
    layers: Vec<DenseLayer>,
}

impl QuantizedModel {
    pub fn new(
        input_len: usize,
        input_scale: f32,
        input_zero_point: i32,
        layers: Vec<DenseLayer>,
    ) -> Result<Self, ModelLoadError> {
        check_scale("input_scale", input_scale)?;
        check_zero_point("input_zero_point", input_zero_point)?;
        if layers.is_empty() {
            return Err(ModelLoadError::ShapeMismatch(
                "model has no layers".to_string(),
            ));
        }

        let mut expected = input_len;
        for (i, layer) in layers.iter().enumerate() {
            if layer.input_len != expected {
                return Err(ModelLoadError::ShapeMismatch(format!(
                    "layer {} takes {} inputs but receives {}",
                    i, layer.input_len, expected
                )));
            }
            expected = layer.output_len;
        }

        Ok(Self {
            input_len,
            input_scale,
            input_zero_point,
            layers,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::from_bytes(&bytes)?;
        log::info!(
            "✅ Loaded model {} ({} bytes, {} layers, {} → {})",
            path.display(),
            bytes.len(),
            model.layers.len(),
            model.input_len,
            model.output_len()
        );
        Ok(model)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelLoadError> {
        if bytes.len() < MODEL_MAGIC.len() || &bytes[..MODEL_MAGIC.len()] != MODEL_MAGIC {
            return Err(ModelLoadError::BadMagic);
        }
        if bytes.len() < MODEL_MAGIC.len() + 4 {
            return Err(ModelLoadError::Truncated {
                offset: bytes.len(),
            });
        }

        let (body, trailer) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = fnv1a32(body);
        if stored != computed {
            return Err(ModelLoadError::ChecksumMismatch { stored, computed });
        }

        let mut r = Reader::new(body, MODEL_MAGIC.len());
        let version = r.u16()?;
        if version != MODEL_VERSION {
            return Err(ModelLoadError::UnsupportedVersion(version));
        }
        let layer_count = r.u16()? as usize;
        let input_len = r.u32()? as usize;
        let input_scale = r.f32()?;
        let input_zero_point = r.i32()?;

        let mut layers = Vec::with_capacity(layer_count);
        for _ in 0..layer_count {
            let layer_in = r.u32()? as usize;
            let layer_out = r.u32()? as usize;
            let activation = Activation::from_byte(r.u8()?)?;
            let weight_scale = r.f32()?;
            let output_scale = r.f32()?;
            let output_zero_point = r.i32()?;
            if layer_in == 0 || layer_out == 0 {
                return Err(ModelLoadError::ShapeMismatch(
                    "layer dimensions must be positive".to_string(),
                ));
            }
            // Sizes come from the file; never allocate more than it holds
            let weight_bytes = layer_in
                .checked_mul(layer_out)
                .ok_or(ModelLoadError::Truncated { offset: r.pos })?;
            let weights = r.take(weight_bytes)?.iter().map(|&b| b as i8).collect();
            let bias_bytes = layer_out
                .checked_mul(4)
                .ok_or(ModelLoadError::Truncated { offset: r.pos })?;
            let biases = r
                .take(bias_bytes)?
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            layers.push(DenseLayer::new(
                layer_in,
                layer_out,
                activation,
                weight_scale,
                output_scale,
                output_zero_point,
                weights,
                biases,
            )?);
        }

        if r.remaining() > 0 {
            return Err(ModelLoadError::TrailingBytes {
                extra: r.remaining(),
            });
        }

        Self::new(input_len, input_scale, input_zero_point, layers)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MODEL_MAGIC);
        out.extend_from_slice(&MODEL_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.layers.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.input_len as u32).to_le_bytes());
        out.extend_from_slice(&self.input_scale.to_le_bytes());
        out.extend_from_slice(&self.input_zero_point.to_le_bytes());

        for layer in &self.layers {
            out.extend_from_slice(&(layer.input_len as u32).to_le_bytes());
            out.extend_from_slice(&(layer.output_len as u32).to_le_bytes());
            out.push(layer.activation.to_byte());
            out.extend_from_slice(&layer.weight_scale.to_le_bytes());
            out.extend_from_slice(&layer.output_scale.to_le_bytes());
            out.extend_from_slice(&layer.output_zero_point.to_le_bytes());
            out.extend(layer.weights.iter().map(|&w| w as u8));
            for bias in &layer.biases {
                out.extend_from_slice(&bias.to_le_bytes());
            }
        }

        let checksum = fnv1a32(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    /// A small seeded two-layer network (input → 16 ReLU → `class_count`)
    /// for demos and smoke tests. Its predictions are arbitrary but stable.
    pub fn demo(input_len: usize, class_count: usize, seed: u64) -> Result<Self, ModelLoadError> {
        const HIDDEN: usize = 16;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut random_weights =
            |n: usize| -> Vec<i8> { (0..n).map(|_| rng.gen_range(-64i8..=64)).collect() };

        let hidden_weights = random_weights(input_len * HIDDEN);
        let output_weights = random_weights(HIDDEN * class_count);
        let hidden = DenseLayer::new(
            input_len,
            HIDDEN,
            Activation::Relu,
            1.0 / 64.0,
            0.1,
            -128,
            hidden_weights,
            vec![0; HIDDEN],
        )?;
        let output = DenseLayer::new(
            HIDDEN,
            class_count,
            Activation::None,
            1.0 / 64.0,
            0.1,
            0,
            output_weights,
            vec![0; class_count],
        )?;
        Self::new(input_len, 1.0 / 127.0, 0, vec![hidden, output])
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    fn quantize_input(&self, input: &[f32], output: &mut [i8]) {
        for (q, &x) in output.iter_mut().zip(input) {
            let v = (x / self.input_scale).round() as i32 + self.input_zero_point;
            *q = v.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
        }
    }
}

impl ClassifierBackend for QuantizedModel {
    fn name(&self) -> &'static str {
        "int8-dense"
    }

    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        self.layers
            .last()
            .map_or(self.input_len, |layer| layer.output_len)
    }

    fn arena_requirement(&self) -> usize {
        aligned(self.input_len)
            + self
                .layers
                .iter()
                .map(|layer| aligned(layer.output_len))
                .sum::<usize>()
    }

    fn forward(
        &mut self,
        input: &[f32],
        arena: &mut TensorArena,
        scores: &mut [f32],
    ) -> Result<(), InferenceError> {
        if input.len() != self.input_len {
            return Err(InferenceError::InputLength {
                expected: self.input_len,
                actual: input.len(),
            });
        }

        let mut current = arena.alloc(self.input_len)?;
        self.quantize_input(input, arena.get_mut(current));

        let mut scale = self.input_scale;
        let mut zero_point = self.input_zero_point;
        for layer in &self.layers {
            let next = arena.alloc(layer.output_len)?;
            let (src, dst) = arena.input_output(current, next);
            layer.run(src, scale, zero_point, dst);
            current = next;
            scale = layer.output_scale;
            zero_point = layer.output_zero_point;
        }

        for (score, &q) in scores.iter_mut().zip(arena.get(current)) {
            *score = (q as i32 - zero_point) as f32 * scale;
        }
        softmax(scores);
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ModelLoadError> {
        if n > self.remaining() {
            return Err(ModelLoadError::Truncated { offset: self.pos });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ModelLoadError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ModelLoadError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ModelLoadError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ModelLoadError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, ModelLoadError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, ModelLoadError> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}

//! Log band energies of a Hann-windowed FFT over the whole frame.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use super::{FeatureError, FeatureTransform};

/// Added before the log so silent bands stay finite
const LOG_FLOOR: f32 = 1e-10;

pub struct SpectralTransform {
    frame_len: usize,
    bands: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectralTransform {
    pub fn new(frame_len: usize, bands: usize) -> Result<Self, FeatureError> {
        let bins = frame_len / 2 + 1;
        if frame_len < 2 || bands == 0 || bands > bins {
            return Err(FeatureError::InvalidTransform(format!(
                "cannot split a {}-sample FFT into {} bands",
                frame_len, bands
            )));
        }

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame_len);
        let scratch = vec![Complex32::default(); fft.get_inplace_scratch_len()];

        let window = (0..frame_len)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / frame_len as f32).cos())
            .collect();

        Ok(Self {
            frame_len,
            bands,
            fft,
            window,
            buffer: vec![Complex32::default(); frame_len],
            scratch,
        })
    }

    fn bins(&self) -> usize {
        self.frame_len / 2 + 1
    }
}

impl FeatureTransform for SpectralTransform {
    fn input_len(&self) -> usize {
        self.frame_len
    }

    fn output_len(&self) -> usize {
        self.bands
    }

    fn name(&self) -> &'static str {
        "spectral"
    }

    fn transform(&mut self, input: &[f32], output: &mut [f32]) {
        for ((dst, &x), &w) in self.buffer.iter_mut().zip(input).zip(&self.window) {
            *dst = Complex32::new(x * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let bins = self.bins();
        let norm = 1.0 / self.frame_len as f32;
        for (band, out) in output.iter_mut().enumerate() {
            let start = band * bins / self.bands;
            let end = ((band + 1) * bins / self.bands).max(start + 1);
            let power: f32 = self.buffer[start..end]
                .iter()
                .map(|c| c.norm_sqr() * norm)
                .sum::<f32>()
                / (end - start) as f32;
            *out = (power + LOG_FLOOR).ln();
        }
    }
}

//! Fixed-length sample buffers and the small DSP toolbox used around the simulators.

use std::io::Write;
use std::ops::{Deref, DerefMut};

use byteorder::{LittleEndian, WriteBytesExt};
use rustfft::FftPlanner;
use rustfft::num_complex::Complex64;

pub mod f0;
pub mod iir;
pub mod ring_buffer;

pub use self::ring_buffer::CircularBuffer;

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("FFT length must be a power of two, got {0}")]
    NotPowerOfTwo(usize),
    #[error("Signal of length {got} is shorter than the requested {wanted}")]
    TooShort { got: usize, wanted: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! deref_buffer {
    ($t:ty, $item:ty) => {
        impl Deref for $t {
            type Target = [$item];

            fn deref(&self) -> &Self::Target {
                &self.buffer
            }
        }

        impl DerefMut for $t {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.buffer
            }
        }
    };
}

/// Real-valued sample buffer. Reused across calls; never grows on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signal {
    buffer: Vec<f64>,
}

deref_buffer!(Signal, f64);

impl Signal {
    pub fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len],
        }
    }

    /// Resize to `len` samples and set every sample to zero.
    pub fn reset(&mut self, len: usize) {
        self.buffer.clear();
        self.buffer.resize(len, 0.0);
    }

    pub fn scale(&mut self, factor: f64) {
        self.buffer.iter_mut().for_each(|x| *x *= factor);
    }

    pub fn max_abs(&self) -> f64 {
        self.buffer.iter().fold(0.0, |acc, x| acc.max(x.abs()))
    }
}

impl From<Vec<f64>> for Signal {
    fn from(buffer: Vec<f64>) -> Self {
        Self { buffer }
    }
}

/// Complex spectrum buffer, stored as separate real and imaginary parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComplexSignal {
    pub re: Vec<f64>,
    pub im: Vec<f64>,
}

impl ComplexSignal {
    pub fn new(len: usize) -> Self {
        Self {
            re: vec![0.0; len],
            im: vec![0.0; len],
        }
    }

    pub fn reset(&mut self, len: usize) {
        self.re.clear();
        self.re.resize(len, 0.0);
        self.im.clear();
        self.im.resize(len, 0.0);
    }

    pub fn len(&self) -> usize {
        self.re.len()
    }

    pub fn is_empty(&self) -> bool {
        self.re.is_empty()
    }

    pub fn get(&self, i: usize) -> Complex64 {
        Complex64::new(self.re[i], self.im[i])
    }

    pub fn set(&mut self, i: usize, value: Complex64) {
        self.re[i] = value.re;
        self.im[i] = value.im;
    }

    pub fn magnitude(&self, i: usize) -> f64 {
        self.re[i].hypot(self.im[i])
    }

    pub fn phase(&self, i: usize) -> f64 {
        self.im[i].atan2(self.re[i])
    }

    pub fn scale(&mut self, factor: f64) {
        self.re.iter_mut().for_each(|x| *x *= factor);
        self.im.iter_mut().for_each(|x| *x *= factor);
    }

    /// Forward FFT in place.
    pub fn fft(&mut self) -> Result<(), SignalError> {
        self.transform(false)
    }

    /// Inverse FFT in place, normalized by 1/N.
    pub fn ifft(&mut self) -> Result<(), SignalError> {
        self.transform(true)?;
        let n = self.len() as f64;
        self.scale(1.0 / n);
        Ok(())
    }

    fn transform(&mut self, inverse: bool) -> Result<(), SignalError> {
        let n = self.len();
        if !n.is_power_of_two() {
            return Err(SignalError::NotPowerOfTwo(n));
        }
        let mut data: Vec<Complex64> = (0..n).map(|i| self.get(i)).collect();
        let mut planner = FftPlanner::<f64>::new();
        let fft = if inverse {
            planner.plan_fft_inverse(n)
        } else {
            planner.plan_fft_forward(n)
        };
        fft.process(&mut data);
        for (i, c) in data.into_iter().enumerate() {
            self.set(i, c);
        }
        Ok(())
    }

    /// Spectrum of the first `len` samples of a real signal.
    pub fn from_real(signal: &[f64], len: usize) -> Result<Self, SignalError> {
        let mut spectrum = Self::new(len);
        for (re, x) in spectrum.re.iter_mut().zip(signal) {
            *re = *x;
        }
        spectrum.fft()?;
        Ok(spectrum)
    }
}

/// 16-bit PCM track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signal16 {
    buffer: Vec<i16>,
}

deref_buffer!(Signal16, i16);

impl Signal16 {
    pub fn new(len: usize) -> Self {
        Self {
            buffer: vec![0; len],
        }
    }

    pub fn reset(&mut self, len: usize) {
        self.buffer.clear();
        self.buffer.resize(len, 0);
    }

    /// Store a sample, saturating to the i16 range. Writes past the end are ignored.
    pub fn set_value(&mut self, pos: usize, value: f64) {
        if let Some(sample) = self.buffer.get_mut(pos) {
            *sample = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
    }

    pub fn value(&self, pos: usize) -> i16 {
        self.buffer.get(pos).copied().unwrap_or(0)
    }

    /// Scale the samples in `range` so that the peak is 0.89 of full scale (about -1 dB).
    pub fn normalize_amplitude(&mut self, range: std::ops::Range<usize>) {
        let end = range.end.min(self.buffer.len());
        let slice = &mut self.buffer[range.start.min(end)..end];
        let max = slice.iter().map(|s| (*s as i32).abs()).max().unwrap_or(0);
        if max < 1 {
            return;
        }
        let factor = 0.89 * i16::MAX as f64 / max as f64;
        for s in slice.iter_mut() {
            *s = (*s as f64 * factor).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
    }

    /// Write samples as little-endian raw PCM.
    pub fn write_pcm<W: Write>(&self, writer: &mut W, range: std::ops::Range<usize>) -> Result<(), SignalError> {
        if range.end > self.buffer.len() {
            return Err(SignalError::TooShort {
                got: self.buffer.len(),
                wanted: range.end,
            });
        }
        for s in &self.buffer[range] {
            writer.write_i16::<LittleEndian>(*s)?;
        }
        Ok(())
    }
}

/// Periodic Hann window of length `len`.
pub fn hann_window(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (std::f64::consts::TAU * i as f64 / len as f64).cos())
        .collect()
}

/// Right (falling) half of a Hann window of length `len`, starting at 1.0.
pub fn right_half_hann_window(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| 0.5 + 0.5 * (std::f64::consts::PI * i as f64 / len as f64).cos())
        .collect()
}

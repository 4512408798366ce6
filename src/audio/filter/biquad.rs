// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use crate::audio::format::AudioFormat;

use super::{Filter, FilterError};

/// Previous two inputs and outputs of one audio channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct History {
    in1: f32,
    in2: f32,
    out1: f32,
    out2: f32,
}

/// A second order IIR filter in direct form I:
///
/// `out = c0*in + c1*in1 + c2*in2 - c3*out1 - c4*out2`
#[derive(Debug, Clone, PartialEq)]
pub struct BiquadFilter {
    coefficients: [f32; 5],
    history: Vec<History>,
}

impl Default for BiquadFilter {
    /// A pass-through filter.
    fn default() -> Self {
        BiquadFilter::new([1.0, 0.0, 0.0, 0.0, 0.0])
    }
}

impl BiquadFilter {
    pub fn new(coefficients: [f32; 5]) -> BiquadFilter {
        BiquadFilter {
            coefficients,
            history: Vec::new(),
        }
    }

    /// Builds a filter from unnormalized feedback (a) and feedforward (b) coefficients.
    pub fn from_unnormalized(
        a0: f32,
        a1: f32,
        a2: f32,
        b0: f32,
        b1: f32,
        b2: f32,
    ) -> Result<BiquadFilter, FilterError> {
        let mut filter = BiquadFilter::default();
        filter.set_normalized(a0, a1, a2, b0, b1, b2)?;
        Ok(filter)
    }

    pub fn coefficients(&self) -> [f32; 5] {
        self.coefficients
    }

    /// Replaces the coefficients and clears the history.
    pub fn set(&mut self, coefficients: [f32; 5]) {
        self.coefficients = coefficients;
        self.reset();
    }

    /// Replaces the coefficients with `b/a0` and `a/a0` and clears the history.
    pub fn set_normalized(
        &mut self,
        a0: f32,
        a1: f32,
        a2: f32,
        b0: f32,
        b1: f32,
        b2: f32,
    ) -> Result<(), FilterError> {
        if a0 == 0.0 || !a0.is_finite() {
            return Err(FilterError::InvalidArgument {
                name: "a0",
                reason: "must be finite and nonzero",
            });
        }
        self.set([b0 / a0, b1 / a0, b2 / a0, a1 / a0, a2 / a0]);
        Ok(())
    }
}

impl Filter for BiquadFilter {
    fn process(&mut self, channel: usize, samples: &mut [f32], format: &AudioFormat) {
        let channels = usize::from(format.channels).max(channel + 1);
        if self.history.len() < channels {
            self.history.resize(channels, History::default());
        }

        let [c0, c1, c2, c3, c4] = self.coefficients;
        let h = &mut self.history[channel];
        for sample in samples.iter_mut() {
            let input = *sample;
            let output = c0 * input + c1 * h.in1 + c2 * h.in2 - c3 * h.out1 - c4 * h.out2;
            h.in2 = h.in1;
            h.in1 = input;
            h.out2 = h.out1;
            h.out1 = output;
            *sample = output;
        }
    }

    fn reset(&mut self) {
        self.history.fill(History::default());
    }
}

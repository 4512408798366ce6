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
//! Parametric equalizer sections using the RBJ audio EQ cookbook formulas.

use std::f64::consts::{LN_2, PI};

use crate::audio::format::AudioFormat;

use super::{biquad::BiquadFilter, Filter, FilterError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqKind {
    /// Band pass with a constant 0dB peak.
    BandPass,
    /// Band pass with a constant skirt gain; the peak gain is Q.
    BandPassWithGain,
    LowPass,
    HighPass,
    Notch,
    AllPass,
    Peaking,
    LowShelf,
    HighShelf,
}

impl EqKind {
    fn is_shelf(self) -> bool {
        matches!(self, EqKind::LowShelf | EqKind::HighShelf)
    }

    fn uses_gain(self) -> bool {
        matches!(self, EqKind::Peaking | EqKind::LowShelf | EqKind::HighShelf)
    }
}

/// How the width parameter of an [`EqFilter`] is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqParameter {
    Q,
    /// Bandwidth in octaves.
    Bandwidth,
    /// Shelf slope; only valid for shelving filters.
    Slope,
}

/// A cookbook EQ section. Coefficients are recomputed lazily on the next process call
/// after any parameter or the sample rate changes, which also resets the history.
#[derive(Debug, Clone)]
pub struct EqFilter {
    kind: EqKind,
    frequency: f32,
    parameter: EqParameter,
    width: f32,
    gain_db: f32,
    biquad: BiquadFilter,
    sample_rate: u32,
    changed: bool,
}

fn positive(name: &'static str, value: f32) -> Result<f32, FilterError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(FilterError::InvalidArgument {
            name,
            reason: "must be positive",
        })
    }
}

impl EqFilter {
    pub fn new(
        kind: EqKind,
        frequency: f32,
        parameter: EqParameter,
        width: f32,
        gain_db: f32,
    ) -> Result<EqFilter, FilterError> {
        if parameter == EqParameter::Slope && !kind.is_shelf() {
            return Err(FilterError::SlopeRequiresShelf);
        }
        if !gain_db.is_finite() {
            return Err(FilterError::InvalidArgument {
                name: "gain",
                reason: "must be finite",
            });
        }
        Ok(EqFilter {
            kind,
            frequency: positive("frequency", frequency)?,
            parameter,
            width: positive("width", width)?,
            gain_db,
            biquad: BiquadFilter::default(),
            sample_rate: 0,
            changed: true,
        })
    }

    pub fn kind(&self) -> EqKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: EqKind) -> Result<(), FilterError> {
        if self.parameter == EqParameter::Slope && !kind.is_shelf() {
            return Err(FilterError::SlopeRequiresShelf);
        }
        self.kind = kind;
        self.changed = true;
        Ok(())
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: f32) -> Result<(), FilterError> {
        self.frequency = positive("frequency", frequency)?;
        self.changed = true;
        Ok(())
    }

    pub fn parameter(&self) -> (EqParameter, f32) {
        (self.parameter, self.width)
    }

    pub fn set_parameter(&mut self, parameter: EqParameter, width: f32) -> Result<(), FilterError> {
        if parameter == EqParameter::Slope && !self.kind.is_shelf() {
            return Err(FilterError::SlopeRequiresShelf);
        }
        self.width = positive("width", width)?;
        self.parameter = parameter;
        self.changed = true;
        Ok(())
    }

    pub fn gain(&self) -> f32 {
        self.gain_db
    }

    pub fn set_gain(&mut self, gain_db: f32) -> Result<(), FilterError> {
        if !gain_db.is_finite() {
            return Err(FilterError::InvalidArgument {
                name: "gain",
                reason: "must be finite",
            });
        }
        self.gain_db = gain_db;
        self.changed = true;
        Ok(())
    }

    /// The biquad coefficients for the given sample rate.
    pub fn coefficients(&mut self, sample_rate: u32) -> [f32; 5] {
        self.update(sample_rate);
        self.biquad.coefficients()
    }

    fn update(&mut self, sample_rate: u32) {
        if !self.changed && self.sample_rate == sample_rate {
            return;
        }
        self.sample_rate = sample_rate;
        self.changed = false;

        let a = 10f64.powf(f64::from(self.gain_db) / 40.0);
        let w0 = 2.0 * PI * f64::from(self.frequency) / f64::from(sample_rate.max(1));
        let (sin, cos) = w0.sin_cos();
        let width = f64::from(self.width);
        let alpha = match self.parameter {
            EqParameter::Q => sin / (2.0 * width),
            EqParameter::Bandwidth => sin * (LN_2 / 2.0 * width * w0 / sin).sinh(),
            EqParameter::Slope => sin / 2.0 * ((a + 1.0 / a) * (1.0 / width - 1.0) + 2.0).sqrt(),
        };
        let a = if self.kind.uses_gain() { a } else { 1.0 };

        let (b0, b1, b2, a0, a1, a2) = match self.kind {
            EqKind::LowPass => (
                (1.0 - cos) / 2.0,
                1.0 - cos,
                (1.0 - cos) / 2.0,
                1.0 + alpha,
                -2.0 * cos,
                1.0 - alpha,
            ),
            EqKind::HighPass => (
                (1.0 + cos) / 2.0,
                -(1.0 + cos),
                (1.0 + cos) / 2.0,
                1.0 + alpha,
                -2.0 * cos,
                1.0 - alpha,
            ),
            EqKind::BandPass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos, 1.0 - alpha),
            EqKind::BandPassWithGain => (
                sin / 2.0,
                0.0,
                -sin / 2.0,
                1.0 + alpha,
                -2.0 * cos,
                1.0 - alpha,
            ),
            EqKind::Notch => (1.0, -2.0 * cos, 1.0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha),
            EqKind::AllPass => (
                1.0 - alpha,
                -2.0 * cos,
                1.0 + alpha,
                1.0 + alpha,
                -2.0 * cos,
                1.0 - alpha,
            ),
            EqKind::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos,
                1.0 - alpha / a,
            ),
            EqKind::LowShelf => {
                let beta = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos + beta),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
                    a * ((a + 1.0) - (a - 1.0) * cos - beta),
                    (a + 1.0) + (a - 1.0) * cos + beta,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos),
                    (a + 1.0) + (a - 1.0) * cos - beta,
                )
            }
            EqKind::HighShelf => {
                let beta = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos + beta),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
                    a * ((a + 1.0) + (a - 1.0) * cos - beta),
                    (a + 1.0) - (a - 1.0) * cos + beta,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos),
                    (a + 1.0) - (a - 1.0) * cos - beta,
                )
            }
        };

        self.biquad.set([
            (b0 / a0) as f32,
            (b1 / a0) as f32,
            (b2 / a0) as f32,
            (a1 / a0) as f32,
            (a2 / a0) as f32,
        ]);
    }
}

impl Filter for EqFilter {
    fn process(&mut self, channel: usize, samples: &mut [f32], format: &AudioFormat) {
        self.update(format.frequency);
        self.biquad.process(channel, samples, format);
    }

    fn reset(&mut self) {
        self.biquad.reset();
    }
}

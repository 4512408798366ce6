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
use tracing::debug;

use super::{
    eq::{EqFilter, EqKind, EqParameter},
    Combination, FilterChain, FilterError, FilterNode,
};

/// Builds one of the standard graphic equalizers: 5, 10, 15 or 30 bands, starting at
/// 62.5Hz, 31.25Hz, 25Hz and 25Hz with 2, 1, 2/3 and 1/3 octave bands.
pub fn equalizer(bands: usize) -> Result<FilterChain, FilterError> {
    let (start, bandwidth) = match bands {
        5 => (62.5, 2.0),
        10 => (31.25, 1.0),
        15 => (25.0, 2.0 / 3.0),
        30 => (25.0, 1.0 / 3.0),
        _ => return Err(FilterError::UnsupportedBandCount(bands)),
    };
    equalizer_with(bands, start, bandwidth)
}

/// Builds a graphic equalizer of `bands` flat peaking filters in series. Band centers
/// start at `start` Hz and are `bandwidth` octaves apart.
pub fn equalizer_with(
    bands: usize,
    start: f32,
    bandwidth: f32,
) -> Result<FilterChain, FilterError> {
    if bands == 0 {
        return Err(FilterError::UnsupportedBandCount(bands));
    }

    let step = 2f32.powf(bandwidth);
    let mut chain = FilterChain::new(Combination::Series);
    let mut frequency = start;
    for _ in 0..bands {
        chain.push(EqFilter::new(
            EqKind::Peaking,
            frequency,
            EqParameter::Bandwidth,
            bandwidth,
            0.0,
        )?);
        frequency *= step;
    }
    debug!(bands, start, bandwidth, "Built graphic equalizer");
    Ok(chain)
}

impl FilterChain {
    /// The equalizer section at `index`, if that child is one.
    pub fn band_mut(&mut self, index: usize) -> Option<&mut EqFilter> {
        match self.children_mut().get_mut(index) {
            Some(FilterNode::Eq(eq)) => Some(eq),
            _ => None,
        }
    }
}

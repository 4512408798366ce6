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
//! The filter graph.
//!
//! Leaves are biquad or EQ sections. A [`FilterChain`] is a composite node that runs its
//! children in series or in parallel (summed or averaged). Filters work on one audio
//! channel of float samples at a time so that per-channel history stays separate; the
//! chain handles de-interlacing the mixer's accumulator.

use super::{convert, format::AudioFormat};

pub mod biquad;
pub mod eq;
pub mod graphic;

pub use biquad::BiquadFilter;
pub use eq::{EqFilter, EqKind, EqParameter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument {
        name: &'static str,
        reason: &'static str,
    },

    #[error("The slope parameter is only valid for shelving filters")]
    SlopeRequiresShelf,

    #[error("Unsupported number of equalizer bands: {0}")]
    UnsupportedBandCount(usize),
}

/// A DSP stage over a single audio channel.
pub trait Filter: Send {
    /// Filters `samples` of audio channel `channel` in place.
    fn process(&mut self, channel: usize, samples: &mut [f32], format: &AudioFormat);

    /// Filters `input` into `output`.
    fn process_into(
        &mut self,
        channel: usize,
        input: &[f32],
        output: &mut [f32],
        format: &AudioFormat,
    ) {
        let len = input.len().min(output.len());
        output[..len].copy_from_slice(&input[..len]);
        self.process(channel, &mut output[..len], format);
    }

    /// Clears any history.
    fn reset(&mut self);
}

/// How a chain combines the output of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combination {
    /// Each child filters the output of the previous one.
    #[default]
    Series,
    /// Every child filters the same input and the outputs are summed.
    ParallelSum,
    /// Every child filters the same input and the outputs are averaged.
    ParallelAverage,
}

/// A node of the filter graph.
#[derive(Debug, Clone)]
pub enum FilterNode {
    Biquad(BiquadFilter),
    Eq(EqFilter),
    Chain(FilterChain),
}

impl Filter for FilterNode {
    fn process(&mut self, channel: usize, samples: &mut [f32], format: &AudioFormat) {
        match self {
            FilterNode::Biquad(filter) => filter.process(channel, samples, format),
            FilterNode::Eq(filter) => filter.process(channel, samples, format),
            FilterNode::Chain(filter) => filter.process(channel, samples, format),
        }
    }

    fn reset(&mut self) {
        match self {
            FilterNode::Biquad(filter) => filter.reset(),
            FilterNode::Eq(filter) => filter.reset(),
            FilterNode::Chain(filter) => filter.reset(),
        }
    }
}

impl From<BiquadFilter> for FilterNode {
    fn from(filter: BiquadFilter) -> Self {
        FilterNode::Biquad(filter)
    }
}

impl From<EqFilter> for FilterNode {
    fn from(filter: EqFilter) -> Self {
        FilterNode::Eq(filter)
    }
}

impl From<FilterChain> for FilterNode {
    fn from(filter: FilterChain) -> Self {
        FilterNode::Chain(filter)
    }
}

/// A composite filter node.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    combination: Combination,
    children: Vec<FilterNode>,
    // One slot per child, only allocated while combining in parallel.
    parallel: Option<Vec<f32>>,
    planes: Vec<Vec<f32>>,
}

impl FilterChain {
    pub fn new(combination: Combination) -> FilterChain {
        FilterChain {
            combination,
            ..Default::default()
        }
    }

    pub fn combination(&self) -> Combination {
        self.combination
    }

    /// Changes how children are combined. Switching to series drops the parallel buffer.
    pub fn set_combination(&mut self, combination: Combination) {
        self.combination = combination;
        if combination == Combination::Series {
            self.parallel = None;
        }
    }

    pub fn has_parallel_buffer(&self) -> bool {
        self.parallel.is_some()
    }

    pub fn push<F: Into<FilterNode>>(&mut self, filter: F) {
        self.children.push(filter.into());
    }

    pub fn remove(&mut self, index: usize) -> Option<FilterNode> {
        (index < self.children.len()).then(|| self.children.remove(index))
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    pub fn children(&self) -> &[FilterNode] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [FilterNode] {
        &mut self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Filters an interleaved accumulator buffer in place.
    pub fn mix_filter(&mut self, buffer: &mut [i32], format: &AudioFormat) {
        if self.children.is_empty() {
            return;
        }
        let channels = usize::from(format.channels);
        let mut planes = std::mem::take(&mut self.planes);
        planes.resize_with(channels, Vec::new);

        convert::deinterlace(buffer, channels, &mut planes);
        for (channel, plane) in planes.iter_mut().enumerate() {
            self.process(channel, plane, format);
        }
        convert::interlace(&planes, buffer);

        self.planes = planes;
    }
}

impl Filter for FilterChain {
    fn process(&mut self, channel: usize, samples: &mut [f32], format: &AudioFormat) {
        if self.combination == Combination::Series || self.children.len() < 2 {
            for child in self.children.iter_mut() {
                child.process(channel, samples, format);
            }
            return;
        }

        let len = samples.len();
        let count = self.children.len();
        let parallel = self.parallel.get_or_insert_with(Vec::new);
        if parallel.len() < len * count {
            parallel.resize(len * count, 0.0);
        }

        for (child, slot) in self.children.iter_mut().zip(parallel.chunks_exact_mut(len)) {
            child.process_into(channel, samples, slot, format);
        }

        let scale = match self.combination {
            Combination::ParallelAverage => 1.0 / count as f32,
            _ => 1.0,
        };
        for (i, sample) in samples.iter_mut().enumerate() {
            let sum: f32 = (0..count).map(|j| parallel[j * len + i]).sum();
            *sample = sum * scale;
        }
    }

    fn reset(&mut self) {
        for child in self.children.iter_mut() {
            child.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::audio::format::SampleEncoding;

    use super::*;

    fn format() -> AudioFormat {
        AudioFormat::new(22050, SampleEncoding::S16, 2).unwrap()
    }

    fn gain(value: f32) -> BiquadFilter {
        BiquadFilter::new([value, 0.0, 0.0, 0.0, 0.0])
    }

    #[test]
    fn test_series() {
        let mut chain = FilterChain::new(Combination::Series);
        chain.push(gain(2.0));
        chain.push(gain(3.0));
        let mut samples = vec![0.5, -0.25];
        chain.process(0, &mut samples, &format());
        assert_eq!(samples, vec![3.0, -1.5]);
    }

    #[test]
    fn test_parallel_sum_and_average() {
        let mut chain = FilterChain::new(Combination::ParallelSum);
        chain.push(gain(1.0));
        chain.push(gain(3.0));
        let mut samples = vec![0.25, 0.5];
        chain.process(0, &mut samples, &format());
        assert_eq!(samples, vec![1.0, 2.0]);
        assert!(chain.has_parallel_buffer());

        chain.set_combination(Combination::ParallelAverage);
        let mut samples = vec![0.25, 0.5];
        chain.process(0, &mut samples, &format());
        assert_eq!(samples, vec![0.5, 1.0]);
        assert!(chain.has_parallel_buffer());

        chain.set_combination(Combination::Series);
        assert!(!chain.has_parallel_buffer());
    }

    #[test]
    fn test_single_child_parallel_is_series() {
        let mut chain = FilterChain::new(Combination::ParallelAverage);
        chain.push(gain(2.0));
        let mut samples = vec![1.0];
        chain.process(0, &mut samples, &format());
        assert_eq!(samples, vec![2.0]);
        assert!(!chain.has_parallel_buffer());
    }

    #[test]
    fn test_nested_chains() {
        let mut inner = FilterChain::new(Combination::ParallelSum);
        inner.push(gain(1.0));
        inner.push(gain(1.0));
        let mut outer = FilterChain::new(Combination::Series);
        outer.push(inner);
        outer.push(gain(0.5));
        let mut samples = vec![0.75];
        outer.process(0, &mut samples, &format());
        assert_eq!(samples, vec![0.75]);
    }

    #[test]
    fn test_mix_filter_channels() {
        let mut chain = FilterChain::default();
        assert!(chain.is_empty());
        let mut acc = vec![1000, -2000, 3000, -4000];
        chain.mix_filter(&mut acc, &format());
        assert_eq!(acc, vec![1000, -2000, 3000, -4000]);

        chain.push(gain(0.5));
        chain.mix_filter(&mut acc, &format());
        assert_eq!(acc, vec![500, -1000, 1500, -2000]);

        assert!(chain.remove(3).is_none());
        assert!(chain.remove(0).is_some());
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn test_process_into() {
        let mut filter = FilterNode::from(gain(2.0));
        let input = vec![0.25, 0.5];
        let mut output = vec![0.0; 2];
        filter.process_into(0, &input, &mut output, &format());
        assert_eq!(output, vec![0.5, 1.0]);
        assert_eq!(input, vec![0.25, 0.5]);
    }
}

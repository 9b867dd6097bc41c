//! Native Rust effects
//!
//! Every effect kind is implemented directly in Rust. [`DspUnit`] is the
//! closed set of processors, dispatched by `match` so the audio thread never
//! goes through a vtable or a heap box per effect.

mod bitcrusher;
mod chorus;
mod compressor;
mod delay;
mod distortion;
mod eq;
mod filter;
mod gate;
mod limiter;

pub use bitcrusher::Bitcrusher;
pub use chorus::ModulatedDelay;
pub use compressor::Compressor;
pub use delay::Delay;
pub use distortion::{Distortion, ShaperMode};
pub use eq::ParametricEq;
pub use filter::{Biquad, BiquadCoeffs, BiquadFilter, FilterShape};
pub use gate::Gate;
pub use limiter::Limiter;

use super::{EffectKind, Processor};
use crate::types::AudioBuffer;

/// One built DSP processor
pub enum DspUnit {
    Filter(BiquadFilter),
    Eq(ParametricEq),
    Compressor(Compressor),
    Limiter(Limiter),
    Delay(Delay),
    Modulation(ModulatedDelay),
    Distortion(Distortion),
    Bitcrusher(Bitcrusher),
    Gate(Gate),
}

impl DspUnit {
    /// Build the processor for a kind with initial values in parameter order
    ///
    /// Allocates delay lines; call from the control thread only.
    pub fn build(kind: EffectKind, sample_rate: f32, values: &[f32]) -> Self {
        match kind {
            EffectKind::Lowpass => {
                DspUnit::Filter(BiquadFilter::new(FilterShape::Lowpass, sample_rate, values))
            }
            EffectKind::Highpass => {
                DspUnit::Filter(BiquadFilter::new(FilterShape::Highpass, sample_rate, values))
            }
            EffectKind::Bandpass => {
                DspUnit::Filter(BiquadFilter::new(FilterShape::Bandpass, sample_rate, values))
            }
            EffectKind::Peaking => {
                DspUnit::Filter(BiquadFilter::new(FilterShape::Peaking, sample_rate, values))
            }
            EffectKind::ParametricEq => DspUnit::Eq(ParametricEq::new(sample_rate, values)),
            EffectKind::Compressor => DspUnit::Compressor(Compressor::new(sample_rate, values)),
            EffectKind::Limiter => DspUnit::Limiter(Limiter::new(sample_rate, values)),
            EffectKind::Delay => DspUnit::Delay(Delay::new(sample_rate, values)),
            EffectKind::Chorus => DspUnit::Modulation(ModulatedDelay::chorus(sample_rate, values)),
            EffectKind::Flanger => DspUnit::Modulation(ModulatedDelay::flanger(sample_rate, values)),
            EffectKind::Distortion => DspUnit::Distortion(Distortion::new(values)),
            EffectKind::Bitcrusher => DspUnit::Bitcrusher(Bitcrusher::new(values)),
            EffectKind::Gate => DspUnit::Gate(Gate::new(sample_rate, values)),
        }
    }

    #[inline]
    fn processor(&mut self) -> &mut dyn Processor {
        match self {
            DspUnit::Filter(p) => p,
            DspUnit::Eq(p) => p,
            DspUnit::Compressor(p) => p,
            DspUnit::Limiter(p) => p,
            DspUnit::Delay(p) => p,
            DspUnit::Modulation(p) => p,
            DspUnit::Distortion(p) => p,
            DspUnit::Bitcrusher(p) => p,
            DspUnit::Gate(p) => p,
        }
    }

    #[inline]
    pub fn set_parameter(&mut self, index: usize, value: f32) {
        self.processor().set_parameter(index, value);
    }

    #[inline]
    pub fn process(&mut self, block: &mut AudioBuffer) {
        self.processor().process(block);
    }

    pub fn reset(&mut self) {
        self.processor().reset();
    }

    pub fn latency_samples(&self) -> usize {
        match self {
            DspUnit::Limiter(p) => p.latency_samples(),
            _ => 0,
        }
    }
}

//! Effect system - kinds, parameter tables and the processor interface
//!
//! This module provides the closed set of effect kinds the engine can
//! instantiate, their parameter layouts, and the realtime-resident
//! [`EffectUnit`] that pairs a DSP processor with its smoothed parameters.
//!
//! Effects are selected by string key (`"compressor"`, `"parametric_eq"`, ...)
//! through [`EffectKind::from_key`] and built by [`native::DspUnit::build`].

pub mod native;
pub mod smoothing;

use serde::{Deserialize, Serialize};

use crate::types::AudioBuffer;

pub use native::DspUnit;
pub use smoothing::{smoothing_rate, SmoothedParam};

/// Maximum parameters any effect kind exposes
pub const MAX_PARAMS: usize = 10;

/// Static description of one effect parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    /// Parameter key used by the control API
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    /// Unit label (e.g., "Hz", "dB", "s")
    pub unit: &'static str,
    /// Enumerated or integer parameters apply immediately, never smoothed
    pub discrete: bool,
}

impl ParamSpec {
    const fn new(name: &'static str, min: f32, max: f32, default: f32) -> Self {
        Self {
            name,
            min,
            max,
            default,
            unit: "",
            discrete: false,
        }
    }

    const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    const fn discrete(mut self) -> Self {
        self.discrete = true;
        self
    }

    /// Whether a value lies inside the parameter range
    pub fn accepts(&self, value: f32) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

const FILTER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("frequency", 20.0, 20_000.0, 1_000.0).unit("Hz"),
    ParamSpec::new("q", 0.1, 18.0, 0.707),
];

const PEAKING_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("frequency", 20.0, 20_000.0, 1_000.0).unit("Hz"),
    ParamSpec::new("q", 0.1, 18.0, 1.0),
    ParamSpec::new("gain", -24.0, 24.0, 0.0).unit("dB"),
];

const EQ_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("band1_freq", 20.0, 20_000.0, 120.0).unit("Hz"),
    ParamSpec::new("band1_gain", -24.0, 24.0, 0.0).unit("dB"),
    ParamSpec::new("band1_q", 0.1, 18.0, 1.0),
    ParamSpec::new("band2_freq", 20.0, 20_000.0, 1_000.0).unit("Hz"),
    ParamSpec::new("band2_gain", -24.0, 24.0, 0.0).unit("dB"),
    ParamSpec::new("band2_q", 0.1, 18.0, 1.0),
    ParamSpec::new("band3_freq", 20.0, 20_000.0, 6_000.0).unit("Hz"),
    ParamSpec::new("band3_gain", -24.0, 24.0, 0.0).unit("dB"),
    ParamSpec::new("band3_q", 0.1, 18.0, 1.0),
];

const COMPRESSOR_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("threshold", -60.0, 0.0, -24.0).unit("dB"),
    ParamSpec::new("ratio", 1.0, 20.0, 4.0),
    ParamSpec::new("attack", 0.0001, 1.0, 0.003).unit("s"),
    ParamSpec::new("release", 0.001, 3.0, 0.25).unit("s"),
    ParamSpec::new("makeup", 0.0, 24.0, 0.0).unit("dB"),
];

const LIMITER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("threshold", -24.0, 0.0, -1.0).unit("dB"),
    ParamSpec::new("release", 0.001, 2.0, 0.05).unit("s"),
    ParamSpec::new("lookahead", 0.0005, 0.02, 0.005).unit("s").discrete(),
];

const DELAY_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("time", 0.001, 2.0, 0.25).unit("s"),
    ParamSpec::new("feedback", 0.0, 0.95, 0.35),
    ParamSpec::new("mix", 0.0, 1.0, 0.3),
];

const CHORUS_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("rate", 0.05, 10.0, 1.5).unit("Hz"),
    ParamSpec::new("depth", 0.0, 1.0, 0.5),
    ParamSpec::new("delay", 0.001, 0.03, 0.015).unit("s"),
    ParamSpec::new("feedback", 0.0, 0.9, 0.0),
    ParamSpec::new("mix", 0.0, 1.0, 0.5),
];

const FLANGER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("rate", 0.05, 10.0, 0.25).unit("Hz"),
    ParamSpec::new("depth", 0.0, 1.0, 0.7),
    ParamSpec::new("delay", 0.001, 0.03, 0.003).unit("s"),
    ParamSpec::new("feedback", 0.0, 0.9, 0.5),
    ParamSpec::new("mix", 0.0, 1.0, 0.5),
];

const DISTORTION_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("drive", 1.0, 100.0, 4.0),
    ParamSpec::new("mode", 0.0, 2.0, 0.0).discrete(),
    ParamSpec::new("level", 0.0, 1.0, 0.5),
];

const BITCRUSHER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("bits", 1.0, 16.0, 8.0).discrete(),
    ParamSpec::new("downsample", 1.0, 64.0, 1.0).discrete(),
    ParamSpec::new("mix", 0.0, 1.0, 1.0),
];

const GATE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("threshold", -100.0, 0.0, -50.0).unit("dB"),
    ParamSpec::new("ratio", 0.05, 20.0, 0.25),
    ParamSpec::new("attack", 0.0001, 1.0, 0.001).unit("s"),
    ParamSpec::new("release", 0.001, 3.0, 0.1).unit("s"),
];

/// Every effect the engine can instantiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Lowpass,
    Highpass,
    Bandpass,
    Peaking,
    ParametricEq,
    Compressor,
    Limiter,
    Delay,
    Chorus,
    Flanger,
    Distortion,
    Bitcrusher,
    Gate,
}

impl EffectKind {
    /// All kinds in registry order
    pub const ALL: [EffectKind; 13] = [
        EffectKind::Lowpass,
        EffectKind::Highpass,
        EffectKind::Bandpass,
        EffectKind::Peaking,
        EffectKind::ParametricEq,
        EffectKind::Compressor,
        EffectKind::Limiter,
        EffectKind::Delay,
        EffectKind::Chorus,
        EffectKind::Flanger,
        EffectKind::Distortion,
        EffectKind::Bitcrusher,
        EffectKind::Gate,
    ];

    /// Registry key for this kind
    pub fn key(&self) -> &'static str {
        match self {
            EffectKind::Lowpass => "lowpass",
            EffectKind::Highpass => "highpass",
            EffectKind::Bandpass => "bandpass",
            EffectKind::Peaking => "peaking",
            EffectKind::ParametricEq => "parametric_eq",
            EffectKind::Compressor => "compressor",
            EffectKind::Limiter => "limiter",
            EffectKind::Delay => "delay",
            EffectKind::Chorus => "chorus",
            EffectKind::Flanger => "flanger",
            EffectKind::Distortion => "distortion",
            EffectKind::Bitcrusher => "bitcrusher",
            EffectKind::Gate => "gate",
        }
    }

    /// Look a kind up by registry key
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.key() == key)
    }

    /// Display category (e.g., "Filter", "Dynamics")
    pub fn category(&self) -> &'static str {
        match self {
            EffectKind::Lowpass
            | EffectKind::Highpass
            | EffectKind::Bandpass
            | EffectKind::Peaking
            | EffectKind::ParametricEq => "Filter",
            EffectKind::Compressor | EffectKind::Limiter | EffectKind::Gate => "Dynamics",
            EffectKind::Delay | EffectKind::Chorus | EffectKind::Flanger => "Modulation",
            EffectKind::Distortion | EffectKind::Bitcrusher => "Distortion",
        }
    }

    /// Parameter layout; the index of a spec is its realtime parameter index
    pub fn params(&self) -> &'static [ParamSpec] {
        match self {
            EffectKind::Lowpass | EffectKind::Highpass | EffectKind::Bandpass => FILTER_PARAMS,
            EffectKind::Peaking => PEAKING_PARAMS,
            EffectKind::ParametricEq => EQ_PARAMS,
            EffectKind::Compressor => COMPRESSOR_PARAMS,
            EffectKind::Limiter => LIMITER_PARAMS,
            EffectKind::Delay => DELAY_PARAMS,
            EffectKind::Chorus => CHORUS_PARAMS,
            EffectKind::Flanger => FLANGER_PARAMS,
            EffectKind::Distortion => DISTORTION_PARAMS,
            EffectKind::Bitcrusher => BITCRUSHER_PARAMS,
            EffectKind::Gate => GATE_PARAMS,
        }
    }

    /// Index of a named parameter
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params().iter().position(|p| p.name == name)
    }

    /// Default values for every parameter, in index order
    pub fn default_values(&self) -> Vec<f32> {
        self.params().iter().map(|p| p.default).collect()
    }
}

/// Control-side view of one effect parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDescriptor {
    pub name: &'static str,
    /// Last value known to have been applied
    pub current: f32,
    /// Value the realtime side is converging toward
    pub target: f32,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    /// Fraction of the remaining distance covered per block (1.0 = immediate)
    pub smoothing_rate: f32,
    pub discrete: bool,
}

impl ParameterDescriptor {
    pub fn from_spec(spec: &ParamSpec, value: f32) -> Self {
        Self {
            name: spec.name,
            current: value,
            target: value,
            min: spec.min,
            max: spec.max,
            default: spec.default,
            smoothing_rate: 1.0,
            discrete: spec.discrete,
        }
    }
}

/// Interface every DSP primitive implements
///
/// `set_parameter` is O(1) and recomputes dependent coefficients before
/// returning. `process` runs in place on one block and must not allocate.
pub trait Processor: Send {
    /// Apply a parameter value by index (already range-checked)
    fn set_parameter(&mut self, index: usize, value: f32);

    /// Process one block in place
    fn process(&mut self, block: &mut AudioBuffer);

    /// Clear internal history (filter memory, envelopes, delay lines)
    fn reset(&mut self);

    /// Latency introduced by this processor in samples
    fn latency_samples(&self) -> usize {
        0
    }
}

/// A realtime-resident effect instance: DSP state plus smoothed parameters
///
/// Built on the control thread, handed to the audio thread inside a
/// deferred-drop box, and only ever touched by the audio thread afterwards.
pub struct EffectUnit {
    kind: EffectKind,
    dsp: DspUnit,
    params: [SmoothedParam; MAX_PARAMS],
    param_count: usize,
}

impl EffectUnit {
    /// Build an effect with the given values (one per parameter, index order)
    pub fn new(kind: EffectKind, sample_rate: f32, values: &[f32]) -> Self {
        let specs = kind.params();
        let mut params = [SmoothedParam::new(0.0); MAX_PARAMS];
        for (i, spec) in specs.iter().enumerate() {
            let value = values.get(i).copied().unwrap_or(spec.default);
            params[i] = SmoothedParam::new(value.clamp(spec.min, spec.max));
        }
        let initial: Vec<f32> = params[..specs.len()].iter().map(|p| p.current()).collect();
        Self {
            kind,
            dsp: DspUnit::build(kind, sample_rate, &initial),
            params,
            param_count: specs.len(),
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    /// Post a new target for a parameter (rate 1.0 applies immediately)
    pub fn set_target(&mut self, index: usize, value: f32, rate: f32) {
        if index >= self.param_count {
            return;
        }
        let spec = &self.kind.params()[index];
        let value = value.clamp(spec.min, spec.max);
        if spec.discrete || rate >= 1.0 {
            self.params[index].set_immediate(value);
            self.dsp.set_parameter(index, value);
        } else {
            self.params[index].set_target(value, rate);
        }
    }

    /// Current smoothed value of a parameter
    pub fn param(&self, index: usize) -> Option<f32> {
        (index < self.param_count).then(|| self.params[index].current())
    }

    /// Advance every smoothed parameter by one tick, pushing changes to the DSP
    #[inline]
    pub fn tick_parameters(&mut self) {
        for index in 0..self.param_count {
            if self.params[index].tick() {
                self.dsp.set_parameter(index, self.params[index].current());
            }
        }
    }

    /// Process one block (parameters must have been ticked by the caller)
    #[inline]
    pub fn process(&mut self, block: &mut AudioBuffer) {
        self.dsp.process(block);
    }

    pub fn reset(&mut self) {
        self.dsp.reset();
    }

    pub fn latency_samples(&self) -> usize {
        self.dsp.latency_samples()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_keys_round_trip() {
        for kind in EffectKind::ALL {
            assert_eq!(EffectKind::from_key(kind.key()), Some(kind));
        }
        assert_eq!(EffectKind::from_key("reverb"), None);
    }

    #[test]
    fn test_param_tables_fit() {
        for kind in EffectKind::ALL {
            let params = kind.params();
            assert!(!params.is_empty());
            assert!(params.len() <= MAX_PARAMS, "{} has too many params", kind.key());
            for p in params {
                assert!(p.min < p.max);
                assert!(p.accepts(p.default), "{}.{} default out of range", kind.key(), p.name);
            }
        }
    }

    #[test]
    fn test_param_lookup() {
        assert_eq!(EffectKind::ParametricEq.param_index("band1_gain"), Some(1));
        assert_eq!(EffectKind::Compressor.param_index("nope"), None);
        assert!(EffectKind::Bitcrusher.params()[0].discrete);
    }

    #[test]
    fn test_unit_discrete_params_apply_immediately() {
        let mut unit = EffectUnit::new(EffectKind::Distortion, 44_100.0, &[]);
        unit.set_target(1, 2.0, 0.1);
        assert_eq!(unit.param(1), Some(2.0));

        unit.set_target(0, 50.0, 0.5);
        assert_eq!(unit.param(0), Some(4.0));
        unit.tick_parameters();
        assert_eq!(unit.param(0), Some(27.0));
    }

    #[test]
    fn test_unit_clamps_initial_values() {
        let unit = EffectUnit::new(EffectKind::Delay, 44_100.0, &[10.0, -1.0]);
        assert_eq!(unit.param(0), Some(2.0));
        assert_eq!(unit.param(1), Some(0.0));
        assert_eq!(unit.param(2), Some(0.3));
        assert_eq!(unit.param(3), None);
    }
}

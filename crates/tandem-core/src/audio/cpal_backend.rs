//! CPAL audio backend
//!
//! ```text
//! ┌──────────────────┐   commands    ┌─────────────────────────┐
//! │  Control thread  │──────────────►│   CPAL output stream    │
//! │     (Engine)     │◄──────────────│  (owns BlockProcessor)  │
//! └──────────────────┘   reports     └────────────▲────────────┘
//!                                                 │ interleaved input
//!                                    ┌────────────┴────────────┐
//!                                    │    CPAL input stream    │  <── lock-free ring,
//!                                    │  (pushes device input)  │      never blocks
//!                                    └─────────────────────────┘
//! ```
//!
//! The output callback owns the processor outright, so nothing is shared
//! between the two streams except the SPSC input ring. When the input ring
//! runs dry the processor sees silence for the missing frames.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig};

use super::backend::{AudioBackend, AudioHandle, ReadySender};
use super::config::AudioConfig;
use super::device::{find_device, Direction};
use super::error::{DeviceError, DeviceResult};
use crate::engine::BlockProcessor;
use crate::types::MAX_BLOCK_SIZE;

/// Blocks of device input the ring can hold before input is dropped
const INPUT_RING_BLOCKS: usize = 8;

/// System audio devices through CPAL
pub struct CpalBackend {
    config: AudioConfig,
    block_size: u32,
}

impl CpalBackend {
    pub fn new(config: AudioConfig, block_size: usize) -> Self {
        Self {
            config,
            block_size: block_size.clamp(16, MAX_BLOCK_SIZE) as u32,
        }
    }
}

/// CPAL-specific audio handle
///
/// Keeps the audio streams alive. Drop this to stop audio.
pub struct CpalAudioHandle {
    _output_stream: Stream,
    input_stream: Option<Stream>,
    sample_rate: u32,
    buffer_size: u32,
}

impl CpalAudioHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn has_input(&self) -> bool {
        self.input_stream.is_some()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn start(self: Box<Self>, processor: BlockProcessor, ready: ReadySender) -> DeviceResult<AudioHandle> {
        let sample_rate = processor.sample_rate();

        let output_device = find_device(self.config.output_device.as_ref(), Direction::Output)?;
        let output_name = output_device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("CpalBackend: output device {}", output_name);

        let output_config = stream_config(&output_device, Direction::Output, sample_rate, self.block_size)?;

        // Input is optional: a missing or broken input device only disables
        // recording from the device
        let mut input = None;
        if self.config.enable_input {
            match open_input(&self.config, sample_rate, self.block_size) {
                Ok(opened) => input = Some(opened),
                Err(e) => log::warn!("CpalBackend: no input stream ({}), recording will capture silence", e),
            }
        }

        let (input_stream, input_consumer, input_channels) = match input {
            Some((stream, consumer, channels)) => (Some(stream), Some(consumer), channels),
            None => (None, None, 0),
        };

        let output_stream = build_output_stream(
            &output_device,
            &output_config,
            processor,
            input_consumer,
            input_channels,
            ready,
        )?;
        output_stream
            .play()
            .map_err(|e| DeviceError::StreamPlayError(e.to_string()))?;
        if let Some(stream) = &input_stream {
            stream
                .play()
                .map_err(|e| DeviceError::StreamPlayError(format!("Input: {}", e)))?;
        }

        log::info!(
            "CpalBackend: streams started ({} out channels, {} in channels, {}Hz)",
            output_config.channels,
            input_channels,
            sample_rate
        );

        Ok(AudioHandle::Cpal(CpalAudioHandle {
            _output_stream: output_stream,
            input_stream,
            sample_rate,
            buffer_size: self.block_size,
        }))
    }
}

/// Pick an f32 configuration that supports the engine's sample rate
fn stream_config(
    device: &cpal::Device,
    direction: Direction,
    sample_rate: u32,
    block_size: u32,
) -> DeviceResult<StreamConfig> {
    let supported: Vec<_> = match direction {
        Direction::Output => device
            .supported_output_configs()
            .map_err(|e| DeviceError::ConfigError(e.to_string()))?
            .collect(),
        Direction::Input => device
            .supported_input_configs()
            .map_err(|e| DeviceError::ConfigError(e.to_string()))?
            .collect(),
    };

    let in_range = |c: &&cpal::SupportedStreamConfigRange| {
        c.sample_format() == SampleFormat::F32
            && sample_rate >= c.min_sample_rate().0
            && sample_rate <= c.max_sample_rate().0
    };

    // Prefer stereo, then anything in range
    let best = supported
        .iter()
        .filter(in_range)
        .find(|c| c.channels() >= 2)
        .or_else(|| supported.iter().find(in_range))
        .ok_or_else(|| {
            DeviceError::ConfigError(format!("no f32 {:?} configuration at {}Hz", direction, sample_rate))
        })?;

    Ok(StreamConfig {
        channels: best.channels(),
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Fixed(block_size),
    })
}

fn open_input(
    config: &AudioConfig,
    sample_rate: u32,
    block_size: u32,
) -> DeviceResult<(Stream, rtrb::Consumer<f32>, usize)> {
    let device = find_device(config.input_device.as_ref(), Direction::Input)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("CpalBackend: input device {}", name);

    let stream_config = stream_config(&device, Direction::Input, sample_rate, block_size)?;
    let channels = stream_config.channels as usize;
    let capacity = block_size as usize * channels * INPUT_RING_BLOCKS;
    let (mut producer, consumer) = rtrb::RingBuffer::<f32>::new(capacity);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                // Whole frames only, dropping what does not fit
                let room = producer.slots() / channels * channels;
                let n = data.len().min(room);
                if n == 0 {
                    return;
                }
                if let Ok(chunk) = producer.write_chunk_uninit(n) {
                    chunk.fill_from_iter(data[..n].iter().copied());
                }
            },
            move |err| {
                log::error!("Input audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| DeviceError::StreamBuildError(e.to_string()))?;

    Ok((stream, consumer, channels))
}

/// Build the output stream; the callback owns the processor
fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut processor: BlockProcessor,
    mut input: Option<rtrb::Consumer<f32>>,
    input_channels: usize,
    ready: ReadySender,
) -> DeviceResult<Stream> {
    let channels = config.channels as usize;
    // Pre-allocated interleaved input for one callback
    let mut input_buf = vec![0.0_f32; MAX_BLOCK_SIZE * input_channels.max(1) * 4];
    let mut ready = Some(ready);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }

                let frames = data.len() / channels;
                let wanted = (frames * input_channels).min(input_buf.len());
                let mut got = 0;
                if let Some(consumer) = input.as_mut() {
                    let available = consumer.slots().min(wanted);
                    if let Ok(chunk) = consumer.read_chunk(available) {
                        let (first, second) = chunk.as_slices();
                        input_buf[..first.len()].copy_from_slice(first);
                        input_buf[first.len()..first.len() + second.len()].copy_from_slice(second);
                        got = available;
                        chunk.commit_all();
                    }
                }
                input_buf[got..wanted].fill(0.0);

                processor.render_interleaved(&input_buf[..wanted], input_channels, data, channels);
            },
            move |err| {
                log::error!("Output audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| DeviceError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}

//! Captured audio conversion for the recording sink
//!
//! Frames arrive from the capture callback in whatever format the device
//! delivers. [`AudioFrameProcessor`] mixes them to the sink's channel count,
//! resamples with rubato and hands 16-bit little-endian PCM to the sink.
//! The converter is only rebuilt when the incoming format changes.

use crate::{Error, Result};
use rubato::{FftFixedIn, Resampler};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Interleaved 16-bit PCM frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Receiver of converted PCM bytes, e.g. the external muxer's input pipe
pub trait AudioSink: Send + Sync {
    /// `data` holds exactly the converted bytes of one call
    fn write(&self, data: &[u8]);
}

/// Resampler state built for one input format
struct Converter {
    source_rate: u32,
    source_channels: u16,
    resampler: FftFixedIn<f32>,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
}

impl Converter {
    fn new(source_rate: u32, source_channels: u16, target_rate: u32, target_channels: u16) -> Result<Self> {
        if source_rate == 0 || source_channels == 0 {
            return Err(Error::Audio(format!(
                "Unsupported input format: {} Hz, {} channels",
                source_rate, source_channels
            )));
        }

        // 10 ms chunks
        let chunk_size = (source_rate as usize / 100).max(1);
        let channels = target_channels as usize;

        let resampler = FftFixedIn::<f32>::new(
            source_rate as usize,
            target_rate as usize,
            chunk_size,
            1,
            channels,
        )
        .map_err(|e| Error::Audio(format!("Failed to create resampler: {}", e)))?;

        let output_buffer = resampler.output_buffer_allocate(true);

        info!(
            "Created audio converter: {} Hz/{}ch -> {} Hz/{}ch, chunk_size: {}",
            source_rate, source_channels, target_rate, target_channels, chunk_size
        );

        Ok(Self {
            source_rate,
            source_channels,
            resampler,
            input_buffer: vec![Vec::with_capacity(chunk_size * 4); channels],
            output_buffer,
        })
    }

    fn matches(&self, frame: &AudioFrame) -> bool {
        self.source_rate == frame.sample_rate && self.source_channels == frame.channels
    }
}

/// Converts captured frames to the recording sink format
pub struct AudioFrameProcessor {
    target_rate: u32,
    target_channels: u16,
    sink: Arc<dyn AudioSink>,
    converter: Option<Converter>,
    output: Vec<u8>,
    builds: usize,
}

impl AudioFrameProcessor {
    pub fn new(target_rate: u32, target_channels: u16, sink: Arc<dyn AudioSink>) -> Result<Self> {
        if target_rate == 0 || target_channels == 0 {
            return Err(Error::InvalidConfig(format!(
                "Invalid recording format: {} Hz, {} channels",
                target_rate, target_channels
            )));
        }

        Ok(Self {
            target_rate,
            target_channels,
            sink,
            converter: None,
            output: Vec::new(),
            builds: 0,
        })
    }

    /// Number of converters built so far
    pub fn converter_builds(&self) -> usize {
        self.builds
    }

    /// Input format the current converter was built for
    pub fn source_format(&self) -> Option<(u32, u16)> {
        self.converter
            .as_ref()
            .map(|c| (c.source_rate, c.source_channels))
    }

    /// Convert one captured frame. Failures are logged and the frame dropped.
    pub fn on_frame(&mut self, frame: &AudioFrame) {
        match self.process(frame) {
            Ok(0) => {}
            Ok(bytes) => self.sink.write(&self.output[..bytes]),
            Err(e) => warn!("Audio frame conversion failed: {}", e),
        }
    }

    fn process(&mut self, frame: &AudioFrame) -> Result<usize> {
        let rebuild = match &self.converter {
            Some(converter) => !converter.matches(frame),
            None => true,
        };

        if rebuild {
            // The previous converter stays in place if the new one cannot be built.
            let converter = Converter::new(
                frame.sample_rate,
                frame.channels,
                self.target_rate,
                self.target_channels,
            )?;
            self.converter = Some(converter);
            self.builds += 1;
        }

        let target_channels = self.target_channels as usize;
        let Some(converter) = self.converter.as_mut() else {
            return Ok(0);
        };

        mix_into(frame, &mut converter.input_buffer);

        self.output.clear();
        loop {
            let frames_needed = converter.resampler.input_frames_next();
            if converter.input_buffer[0].len() < frames_needed {
                break;
            }

            let (consumed, produced) = converter
                .resampler
                .process_into_buffer(&converter.input_buffer, &mut converter.output_buffer, None)
                .map_err(|e| Error::Audio(format!("Resampling failed: {}", e)))?;

            for channel in converter.input_buffer.iter_mut() {
                channel.drain(..consumed);
            }

            for frame_idx in 0..produced {
                for channel_idx in 0..target_channels {
                    let sample = converter.output_buffer[channel_idx][frame_idx];
                    let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    self.output.extend_from_slice(&value.to_le_bytes());
                }
            }
        }

        debug!(
            "Converted {} input frames into {} bytes ({} frames buffered)",
            frame.frames(),
            self.output.len(),
            converter.input_buffer[0].len()
        );

        Ok(self.output.len())
    }
}

/// Deinterleave `frame` into `channels`, mixing to their count
fn mix_into(frame: &AudioFrame, channels: &mut [Vec<f32>]) {
    let source_channels = frame.channels as usize;
    let target_channels = channels.len();

    for samples in frame.samples.chunks_exact(source_channels) {
        if target_channels == 1 && source_channels > 1 {
            let sum: f32 = samples.iter().map(|&s| s as f32).sum();
            channels[0].push(sum / source_channels as f32 / i16::MAX as f32);
            continue;
        }

        for (idx, channel) in channels.iter_mut().enumerate() {
            let sample = samples[idx % source_channels];
            channel.push(sample as f32 / i16::MAX as f32);
        }
    }
}

//! # Audio Capture Module
//!
//! Capture sources push fixed-size chunks of mono samples into a bounded
//! channel; the analyzer drains that channel on each poll.
//!
//! ## Features
//! - [`CaptureSource`] contract shared by every source
//! - [`ChunkSink`]: re-blocks device buffers into chunks and publishes them
//!   without ever blocking the producer
//! - [`CpalCapture`]: the default input device through CPAL (feature `cpal`)
//! - [`ManualCapture`]: feeds recorded or synthetic samples

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One capture chunk of mono `f32` samples.
pub type AudioChunk = Vec<f32>;

/// A source of audio chunks owned by the analyzer.
///
/// Sources deliver through the [`ChunkSink`] they were constructed with.
/// `stop()` must close that sink before releasing the device so no chunk
/// is published afterwards.
pub trait CaptureSource {
    /// Sample rate of the delivered chunks in Hz.
    fn sample_rate(&self) -> u32;

    /// Starts (or resumes) delivery.
    fn start(&mut self) -> anyhow::Result<()>;

    /// Stops delivery and releases the device. Calling it twice is a no-op.
    fn stop(&mut self) -> anyhow::Result<()>;

    /// `false` once stopped or after a stream fault.
    fn is_alive(&self) -> bool;

    /// Chunks discarded because the consumer fell behind.
    fn dropped_chunks(&self) -> u64;
}

/// Creates a connected sink/receiver pair.
///
/// # Arguments
/// * `chunk_size` - Samples per published chunk
/// * `capacity` - Chunks that may wait in the channel before new ones are
///   dropped
pub fn chunk_channel(chunk_size: usize, capacity: usize) -> (ChunkSink, Receiver<AudioChunk>) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    (ChunkSink::new(sender, chunk_size), receiver)
}

/// Producer side of the chunk channel.
///
/// Incoming buffers of any length are accumulated and cut into
/// `chunk_size` chunks. Each chunk is copied into its own `Vec` before it
/// is published, and publishing is a `try_send`: when the channel is full
/// the chunk is counted as dropped instead of waiting.
pub struct ChunkSink {
    sender: Sender<AudioChunk>,
    chunk_size: usize,
    pending: Vec<f32>,
    open: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl ChunkSink {
    fn new(sender: Sender<AudioChunk>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            sender,
            chunk_size,
            pending: Vec::with_capacity(chunk_size * 2),
            open: Arc::new(AtomicBool::new(true)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle that can close the sink and read its drop counter from
    /// another thread.
    pub fn handle(&self) -> SinkHandle {
        SinkHandle {
            open: Arc::clone(&self.open),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Appends `samples` and publishes every complete chunk.
    ///
    /// Does nothing once the sink is closed.
    pub fn deliver(&mut self, samples: &[f32]) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        self.pending.extend_from_slice(samples);

        let mut start = 0;
        while self.pending.len() - start >= self.chunk_size {
            let chunk = self.pending[start..start + self.chunk_size].to_vec();
            start += self.chunk_size;
            match self.sender.try_send(chunk) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped.is_power_of_two() {
                        warn!("[AUDIO] Analyzer is falling behind, {} chunks dropped so far", dropped);
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    // Receiver is gone; nothing will ever read again.
                    self.open.store(false, Ordering::Release);
                    self.pending.clear();
                    return;
                }
            }
        }
        self.pending.drain(..start);
    }

    /// Closes the sink; later deliveries are discarded.
    pub fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        self.pending.clear();
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Shared view of a [`ChunkSink`]'s state.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    open: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl SinkHandle {
    /// Closes the sink. Chunks already in the channel stay readable.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A capture source fed by hand, for recorded audio and tests.
///
/// Clones share the same sink, so one clone can be handed to the analyzer
/// while another keeps pushing samples.
#[derive(Clone)]
pub struct ManualCapture {
    sample_rate: u32,
    sink: Arc<Mutex<ChunkSink>>,
    handle: SinkHandle,
    running: Arc<AtomicBool>,
}

impl ManualCapture {
    pub fn new(sample_rate: u32, sink: ChunkSink) -> Self {
        let handle = sink.handle();
        Self {
            sample_rate,
            sink: Arc::new(Mutex::new(sink)),
            handle,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delivers `samples` as if the device had produced them. Ignored
    /// unless the source is running.
    pub fn push(&self, samples: &[f32]) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let mut sink = self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        sink.deliver(samples);
    }
}

impl CaptureSource for ManualCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self) -> anyhow::Result<()> {
        if !self.handle.is_open() {
            anyhow::bail!("manual capture was already stopped");
        }
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::Release);
        let mut sink = self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        sink.close();
        debug!("[AUDIO] Manual capture stopped");
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.handle.is_open()
    }

    fn dropped_chunks(&self) -> u64 {
        self.handle.dropped_chunks()
    }
}

#[cfg(feature = "cpal")]
pub use self::device::CpalCapture;

#[cfg(feature = "cpal")]
mod device {
    use super::{CaptureSource, ChunkSink, SinkHandle};
    use crate::config::AnalyzerConfig;
    use crate::error::AnalyzerError;
    use anyhow::{Context, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SupportedStreamConfigRange};
    use log::{error, info, warn};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Capture from the host's default input device.
    ///
    /// Mono `f32` is preferred. Multi-channel streams are reduced to their
    /// first channel and `i16` streams are converted to `f32`.
    pub struct CpalCapture {
        stream: Option<cpal::Stream>,
        sample_rate: u32,
        sink: SinkHandle,
        faulted: Arc<AtomicBool>,
    }

    impl CpalCapture {
        /// Opens the default input device at the configured sample rate
        /// (or the nearest rate the device supports). The stream is built
        /// but not started.
        pub fn open(config: &AnalyzerConfig, sink: ChunkSink) -> Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or(AnalyzerError::NoInputDevice)?;

            info!(
                "[AUDIO] Using input device: {}",
                device.name().unwrap_or_else(|_| "<unnamed>".to_string())
            );

            let configs = device
                .supported_input_configs()
                .context("failed to query input configurations")?
                .collect::<Vec<_>>();
            let supported_range = find_supported_config(configs, config.sample_rate).ok_or_else(|| {
                AnalyzerError::UnsupportedFormat("no f32 or i16 input configuration".to_string())
            })?;

            let target = config
                .sample_rate
                .clamp(supported_range.min_sample_rate().0, supported_range.max_sample_rate().0);
            if target != config.sample_rate {
                warn!(
                    "[AUDIO] {} Hz is not supported, capturing at {} Hz",
                    config.sample_rate, target
                );
            }
            let supported = supported_range.with_sample_rate(cpal::SampleRate(target));
            let sample_format = supported.sample_format();
            let stream_config: cpal::StreamConfig = supported.into();
            let channels = stream_config.channels.max(1) as usize;

            info!(
                "[AUDIO] Selected {} Hz, {} channel(s), {:?}",
                target, channels, sample_format
            );

            let faulted = Arc::new(AtomicBool::new(false));
            let err_faulted = Arc::clone(&faulted);
            let err_fn = move |err: cpal::StreamError| {
                error!("[AUDIO] Stream error: {}", err);
                err_faulted.store(true, Ordering::Release);
            };

            let handle = sink.handle();
            let stream = match sample_format {
                SampleFormat::F32 => {
                    let mut sink = sink;
                    let mut mono = Vec::new();
                    device.build_input_stream(
                        &stream_config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if channels == 1 {
                                sink.deliver(data);
                            } else {
                                mono.clear();
                                mono.extend(data.iter().step_by(channels).copied());
                                sink.deliver(&mono);
                            }
                        },
                        err_fn,
                        None,
                    )
                }
                SampleFormat::I16 => {
                    let mut sink = sink;
                    let mut mono = Vec::new();
                    device.build_input_stream(
                        &stream_config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            mono.clear();
                            mono.extend(
                                data.iter()
                                    .step_by(channels)
                                    .map(|&s| s as f32 / i16::MAX as f32),
                            );
                            sink.deliver(&mono);
                        },
                        err_fn,
                        None,
                    )
                }
                other => {
                    return Err(AnalyzerError::UnsupportedFormat(format!("{:?}", other)).into());
                }
            }
            .context("failed to build input stream")?;

            Ok(Self {
                stream: Some(stream),
                sample_rate: target,
                sink: handle,
                faulted,
            })
        }
    }

    impl CaptureSource for CpalCapture {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn start(&mut self) -> Result<()> {
            let stream = self
                .stream
                .as_ref()
                .ok_or_else(|| AnalyzerError::Stream("capture was already stopped".to_string()))?;
            stream.play().context("failed to start input stream")?;
            info!("[AUDIO] Capture started");
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.sink.close();
            let Some(stream) = self.stream.take() else {
                return Ok(());
            };
            let paused = stream.pause().context("failed to pause input stream");
            // Dropping the stream joins the device callback thread.
            drop(stream);
            info!("[AUDIO] Capture stopped");
            paused
        }

        fn is_alive(&self) -> bool {
            self.stream.is_some() && !self.faulted.load(Ordering::Acquire)
        }

        fn dropped_chunks(&self) -> u64 {
            self.sink.dropped_chunks()
        }
    }

    /// Finds the best supported input configuration for the target rate.
    ///
    /// Mono beats multi-channel, `f32` beats `i16`, and among equals the
    /// range closest to `target_rate` wins (zero when it contains it).
    fn find_supported_config(
        configs: Vec<SupportedStreamConfigRange>,
        target_rate: u32,
    ) -> Option<SupportedStreamConfigRange> {
        configs
            .into_iter()
            .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
            .min_by_key(|c| {
                let min = c.min_sample_rate().0;
                let max = c.max_sample_rate().0;
                let rate_distance = if target_rate < min {
                    min - target_rate
                } else {
                    target_rate.saturating_sub(max)
                };
                (
                    c.channels() != 1,
                    c.sample_format() != SampleFormat::F32,
                    rate_distance,
                )
            })
    }
}

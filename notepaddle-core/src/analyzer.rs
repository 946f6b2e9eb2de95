//! # Note Analyzer
//!
//! The [`Analyzer`] owns the capture source, the ring buffer and the
//! analysis engines. The owning thread polls it once per frame:
//!
//! 1. pending chunks are drained from the capture channel (never waiting);
//! 2. the buffered waveform goes through the spectrum engine and the
//!    configured pitch strategy;
//! 3. a detected pitch only counts as the strongest note when its
//!    A-weighted level clears the sensitivity threshold.

use crate::audio::{AudioChunk, CaptureSource, ManualCapture, chunk_channel};
use crate::config::AnalyzerConfig;
use crate::pitch::{PitchDetector, PitchStrategy};
use crate::range::NoteRange;
use crate::ring_buffer::RingBuffer;
use crate::spectrum::{SpectrumBin, SpectrumEngine};
use crate::tuning::Note;
use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use log::{debug, info, trace, warn};
use std::fmt;

/// Whether the ring buffer holds a full history yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPhase {
    Filling,
    Ready,
}

/// Lifecycle of an [`Analyzer`].
///
/// `Filling` to `Ready` happens once, when the ring buffer first fills.
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    Capturing(BufferPhase),
    Stopped,
}

/// Outcome of the sensitivity-gated note decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StrongestNote {
    Note {
        note: Note,
        /// Detected fundamental in Hz.
        frequency: f32,
        /// Detector confidence in `0.0..=1.0`.
        confidence: f32,
        /// A-weighted level of the spectrum bin nearest `frequency`.
        magnitude_db: f32,
    },
    None,
}

impl StrongestNote {
    pub fn note(&self) -> Option<Note> {
        match self {
            StrongestNote::Note { note, .. } => Some(*note),
            StrongestNote::None => None,
        }
    }

    pub fn confidence(&self) -> Option<f32> {
        match self {
            StrongestNote::Note { confidence, .. } => Some(*confidence),
            StrongestNote::None => None,
        }
    }

    pub fn is_some(&self) -> bool {
        matches!(self, StrongestNote::Note { .. })
    }
}

impl fmt::Display for StrongestNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrongestNote::Note { note, confidence, .. } => {
                write!(f, "{} (Prob: {:.2})", note, confidence)
            }
            StrongestNote::None => write!(f, "No strong note"),
        }
    }
}

/// Spectrum and strongest note computed from the same buffer view.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSnapshot {
    pub spectrum: Vec<SpectrumBin>,
    pub strongest: StrongestNote,
}

/// Live note analyzer over a capture source.
pub struct Analyzer {
    source: Box<dyn CaptureSource>,
    chunks: Receiver<AudioChunk>,
    buffer: RingBuffer,
    range: NoteRange,
    spectrum: SpectrumEngine,
    pitch: PitchDetector,
    sensitivity_db: f32,
    config: AnalyzerConfig,
    stopped: bool,
}

impl Analyzer {
    /// Builds an analyzer over `source` and starts it.
    ///
    /// `chunks` must be the receiving end of the channel whose sink the
    /// source delivers into. The range is derived at the source's sample
    /// rate, which may differ from the configured one.
    pub fn new(
        config: AnalyzerConfig,
        mut source: Box<dyn CaptureSource>,
        chunks: Receiver<AudioChunk>,
    ) -> Result<Self> {
        config.validate()?;

        let sample_rate = source.sample_rate();
        let range = NoteRange::with_margin(
            config.min_note,
            config.max_note,
            sample_rate,
            config.nyquist_margin,
        );
        let sensitivity_db = config
            .sensitivity_db
            .clamp(config.sensitivity_min_db, config.sensitivity_max_db);

        source.start().context("failed to start capture source")?;
        info!(
            "[ANALYZER] Started: {} Hz, {} x {} samples ({:.0} ms), range {}..{}, sensitivity {:.1} dB, {:?}",
            sample_rate,
            config.num_chunks,
            config.chunk_size,
            config.buffer_duration_secs() * 1000.0,
            range.min_note(),
            range.max_note(),
            sensitivity_db,
            config.pitch_strategy
        );

        Ok(Self {
            source,
            chunks,
            buffer: RingBuffer::new(config.chunk_size, config.num_chunks),
            range,
            spectrum: SpectrumEngine::new(),
            pitch: PitchDetector::new(config.pitch_strategy),
            sensitivity_db,
            config,
            stopped: false,
        })
    }

    /// Builds an analyzer over a [`ManualCapture`] at the configured sample
    /// rate and returns a feeder sharing its sink.
    pub fn manual(config: AnalyzerConfig) -> Result<(Self, ManualCapture)> {
        let (sink, chunks) = chunk_channel(config.chunk_size, config.channel_capacity);
        let feeder = ManualCapture::new(config.sample_rate, sink);
        let analyzer = Self::new(config, Box::new(feeder.clone()), chunks)?;
        Ok((analyzer, feeder))
    }

    /// Builds an analyzer over the host's default input device.
    #[cfg(feature = "cpal")]
    pub fn open_default(config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;
        let (sink, chunks) = chunk_channel(config.chunk_size, config.channel_capacity);
        let source = crate::audio::CpalCapture::open(&config, sink)
            .context("failed to open the default input device")?;
        Self::new(config, Box::new(source), chunks)
    }

    /// Moves every pending chunk into the ring buffer without waiting.
    fn drain(&mut self) {
        let was_full = self.buffer.is_full();
        let mut received = 0usize;
        while let Ok(chunk) = self.chunks.try_recv() {
            self.buffer.add_chunk(&chunk);
            received += 1;
        }
        if received > 0 {
            trace!("[ANALYZER] Drained {} chunk(s)", received);
        }
        if !was_full && self.buffer.is_full() {
            debug!(
                "[ANALYZER] Buffer ready after {} chunks",
                self.buffer.chunks_written()
            );
        }
    }

    /// Computes the spectrum and the gated strongest note from one view of
    /// the buffered audio.
    pub fn snapshot(&mut self) -> AnalysisSnapshot {
        self.drain();
        let waveform = self.buffer.flatten();
        let spectrum = self.spectrum.compute_spectrum(&waveform, &self.range);
        let strongest = self.gate(&waveform, &spectrum);
        AnalysisSnapshot { spectrum, strongest }
    }

    /// The dominant note, or [`StrongestNote::None`] when nothing in range
    /// is loud enough.
    pub fn strongest_note(&mut self) -> StrongestNote {
        self.snapshot().strongest
    }

    /// A-weighted dB level per note bin, ascending in frequency.
    pub fn spectrum(&mut self) -> Vec<SpectrumBin> {
        self.drain();
        let waveform = self.buffer.flatten();
        self.spectrum.compute_spectrum(&waveform, &self.range)
    }

    /// Strongest spectral peak of the latest chunk within the range, as
    /// `(frequency, magnitude)`, whatever the configured strategy.
    pub fn strongest_bin_pitch(&mut self) -> Option<(f32, f32)> {
        self.drain();
        self.pitch
            .strongest_bin_pitch(self.buffer.latest_chunk(), &self.range)
    }

    fn gate(&mut self, waveform: &[f32], spectrum: &[SpectrumBin]) -> StrongestNote {
        let Some(estimate) = self
            .pitch
            .detect(waveform, self.buffer.latest_chunk(), &self.range)
        else {
            return StrongestNote::None;
        };
        if !self.range.contains_frequency(estimate.frequency) {
            trace!("[ANALYZER] {:.1} Hz is outside the range", estimate.frequency);
            return StrongestNote::None;
        }
        let Some(note) = estimate.note() else {
            return StrongestNote::None;
        };
        let Some(bin) = self
            .range
            .nearest_bin(estimate.frequency)
            .and_then(|index| spectrum.get(index))
        else {
            return StrongestNote::None;
        };
        if bin.magnitude_db < self.sensitivity_db {
            trace!(
                "[ANALYZER] {} at {:.1} dB is below sensitivity {:.1} dB",
                note, bin.magnitude_db, self.sensitivity_db
            );
            return StrongestNote::None;
        }
        StrongestNote::Note {
            note,
            frequency: estimate.frequency,
            confidence: estimate.confidence,
            magnitude_db: bin.magnitude_db,
        }
    }

    /// Raises or lowers the sensitivity threshold by one step, clamped to
    /// the configured bounds.
    pub fn adjust_sensitivity(&mut self, increase: bool) {
        let step = if increase {
            self.config.sensitivity_step_db
        } else {
            -self.config.sensitivity_step_db
        };
        self.sensitivity_db = (self.sensitivity_db + step)
            .clamp(self.config.sensitivity_min_db, self.config.sensitivity_max_db);
        info!("[ANALYZER] Sensitivity: {:.1} dB", self.sensitivity_db);
    }

    /// Replaces the analyzed range. See [`NoteRange::set_range`] for the
    /// clamping rules.
    pub fn adjust_range(&mut self, min_note: Note, max_note: Note) {
        self.range.set_range(min_note, max_note);
    }

    /// Transposes the range by `note_shift` semitones and widens (or
    /// narrows) it by `range_shift`.
    pub fn adjust_spectrum(&mut self, note_shift: i32, range_shift: i32) {
        if note_shift == 0 && range_shift == 0 {
            return;
        }
        self.range.shift(note_shift, range_shift);
    }

    pub fn set_pitch_strategy(&mut self, strategy: PitchStrategy) {
        self.pitch.set_strategy(strategy);
        info!("[ANALYZER] Pitch strategy: {:?}", strategy);
    }

    pub fn pitch_strategy(&self) -> PitchStrategy {
        self.pitch.strategy()
    }

    pub fn sample_rate(&self) -> u32 {
        self.range.sample_rate()
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity_db
    }

    pub fn num_octaves(&self) -> usize {
        self.range.num_octaves()
    }

    pub fn note_names(&self) -> &[String] {
        self.range.note_names()
    }

    pub fn note_frequencies(&self) -> &[f32] {
        self.range.frequencies()
    }

    pub fn range(&self) -> &NoteRange {
        &self.range
    }

    /// Current lifecycle state. Drains pending chunks first so the buffer
    /// phase is up to date.
    pub fn state(&mut self) -> AnalyzerState {
        if self.stopped {
            return AnalyzerState::Stopped;
        }
        self.drain();
        if self.buffer.is_full() {
            AnalyzerState::Capturing(BufferPhase::Ready)
        } else {
            AnalyzerState::Capturing(BufferPhase::Filling)
        }
    }

    /// `false` once shut down or when the capture stream has faulted.
    pub fn is_alive(&self) -> bool {
        !self.stopped && self.source.is_alive()
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.source.dropped_chunks()
    }

    /// Stops the capture source and releases the device. Later calls do
    /// nothing. Already buffered audio can still be analyzed.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Err(e) = self.source.stop() {
            warn!("[ANALYZER] Error while stopping capture: {:#}", e);
        }
        info!(
            "[ANALYZER] Stopped after {} chunks ({} dropped)",
            self.buffer.chunks_written(),
            self.source.dropped_chunks()
        );
    }
}

impl Drop for Analyzer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Per-frame detection loop.
//!
//! One iteration walks `Capturing -> Detecting -> Filtering -> (Alerting) ->
//! Annotating -> Encoding -> Emitting` and yields one multipart chunk. The
//! loop owns its frame source; once capture fails the loop is `Stopped` for
//! good. Detect and encode failures follow the configured
//! `FrameErrorPolicy`; under `Skip` a run of more than
//! `max_consecutive_skips` failed frames stops the loop as well.

use std::time::{Duration, Instant};

use crate::alert::{AlertEvent, AlertGate, AlertPolicy, AlertSink};
use crate::annotate::{annotate, AnnotationStyle};
use crate::detect::{Detection, DetectorBackend};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::stream::{encode_jpeg, multipart_chunk, DEFAULT_JPEG_QUALITY};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONSECUTIVE_SKIPS: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Capturing,
    Detecting,
    Filtering,
    Alerting,
    Annotating,
    Encoding,
    Emitting,
    Stopped,
}

/// What to do when detection or encoding fails on a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameErrorPolicy {
    /// End the stream.
    #[default]
    Abort,
    /// Drop the frame and capture the next one.
    Skip,
}

impl std::str::FromStr for FrameErrorPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FrameErrorPolicy::Abort),
            "skip" => Ok(FrameErrorPolicy::Skip),
            other => Err(anyhow::anyhow!(
                "unknown frame error policy '{}'; expected abort or skip",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    pub jpeg_quality: u8,
    pub on_frame_error: FrameErrorPolicy,
    /// Failed frames in a row tolerated under `Skip` before the loop stops.
    pub max_consecutive_skips: u32,
    pub style: AnnotationStyle,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            on_frame_error: FrameErrorPolicy::default(),
            max_consecutive_skips: DEFAULT_MAX_CONSECUTIVE_SKIPS,
            style: AnnotationStyle::default(),
        }
    }
}

/// Result of detect, filter, alert and annotate on one frame.
#[derive(Debug)]
pub struct ProcessedFrame {
    /// The frame with overlays drawn for `matched` detections.
    pub frame: Frame,
    /// Everything the detector returned.
    pub detections: Vec<Detection>,
    /// Detections that passed the alert filter.
    pub matched: Vec<Detection>,
    /// Event handed to the sink, if one was dispatched.
    pub alert: Option<AlertEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_emitted: u64,
    pub alerts_dispatched: u64,
    pub alerts_suppressed: u64,
    pub frames_skipped: u64,
}

pub struct DetectionLoop {
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    policy: AlertPolicy,
    gate: AlertGate,
    sink: Box<dyn AlertSink>,
    settings: StreamSettings,
    state: LoopState,
    stats: LoopStats,
    consecutive_skips: u32,
    last_health_log: Instant,
}

impl DetectionLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        policy: AlertPolicy,
        sink: Box<dyn AlertSink>,
    ) -> Self {
        Self {
            source,
            detector,
            policy,
            gate: AlertGate::default(),
            sink,
            settings: StreamSettings::default(),
            state: LoopState::Capturing,
            stats: LoopStats::default(),
            consecutive_skips: 0,
            last_health_log: Instant::now(),
        }
    }

    pub fn with_gate(mut self, gate: AlertGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_settings(mut self, settings: StreamSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn is_stopped(&self) -> bool {
        self.state == LoopState::Stopped
    }

    /// Stop for good and close the alert sink, delivering queued alerts.
    pub fn stop(&mut self) {
        if self.state != LoopState::Stopped {
            log::info!(
                "detection loop stopped after {} frames, {} alerts",
                self.stats.frames_emitted,
                self.stats.alerts_dispatched
            );
        }
        self.state = LoopState::Stopped;
        self.sink.close();
    }

    /// Detect, filter, alert and annotate one frame.
    pub fn process_frame(&mut self, mut frame: Frame) -> Result<ProcessedFrame, PipelineError> {
        self.state = LoopState::Detecting;
        let detections = self
            .detector
            .detect(&frame)
            .map_err(PipelineError::Detect)?;

        self.state = LoopState::Filtering;
        let matched = self.policy.filter(&detections);
        log::debug!(
            "frame: {} detections, {} matched '{}'",
            detections.len(),
            matched.len(),
            self.policy.target_label
        );

        let mut alert = None;
        if let Some(event) = AlertEvent::from_detections(matched.clone()) {
            self.state = LoopState::Alerting;
            if self.gate.admit(Instant::now()) {
                self.sink.dispatch(&event);
                self.stats.alerts_dispatched += 1;
                log::info!(
                    "{} alert: count={} at {}",
                    self.policy.target_label,
                    event.count,
                    event.timestamp
                );
                alert = Some(event);
            } else {
                self.stats.alerts_suppressed += 1;
                log::debug!(
                    "alert suppressed by {}s cooldown",
                    self.gate.cooldown().as_secs()
                );
            }
        }

        self.state = LoopState::Annotating;
        annotate(&mut frame, &matched, &self.settings.style);

        Ok(ProcessedFrame {
            frame,
            detections,
            matched,
            alert,
        })
    }

    /// Run one full iteration and return the multipart chunk to emit.
    pub fn step(&mut self) -> Result<Vec<u8>, PipelineError> {
        if self.state == LoopState::Stopped {
            return Err(PipelineError::Capture(anyhow::anyhow!(
                "detection loop already stopped"
            )));
        }

        self.state = LoopState::Capturing;
        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                self.state = LoopState::Stopped;
                return Err(PipelineError::Capture(err));
            }
        };

        let processed = self.process_frame(frame)?;

        self.state = LoopState::Encoding;
        let jpeg = encode_jpeg(&processed.frame, self.settings.jpeg_quality)
            .map_err(PipelineError::Encode)?;

        self.state = LoopState::Emitting;
        self.stats.frames_emitted += 1;
        Ok(multipart_chunk(&jpeg))
    }

    /// Next chunk, applying the frame error policy. `None` once the loop has stopped.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.state == LoopState::Stopped {
                return None;
            }
            self.log_health();
            match self.step() {
                Ok(chunk) => {
                    self.consecutive_skips = 0;
                    return Some(chunk);
                }
                Err(err) if err.is_fatal() => {
                    log::error!("failed to grab frame, stream ending: {}", err);
                    return None;
                }
                Err(err) => match self.settings.on_frame_error {
                    FrameErrorPolicy::Skip
                        if self.consecutive_skips < self.settings.max_consecutive_skips =>
                    {
                        self.consecutive_skips += 1;
                        self.stats.frames_skipped += 1;
                        log::warn!("{} step failed, frame skipped: {}", err.step(), err);
                    }
                    FrameErrorPolicy::Skip => {
                        self.state = LoopState::Stopped;
                        log::error!(
                            "{} step failed {} frames in a row, stream ending: {}",
                            err.step(),
                            self.consecutive_skips + 1,
                            err
                        );
                        return None;
                    }
                    FrameErrorPolicy::Abort => {
                        self.state = LoopState::Stopped;
                        log::error!("{} step failed, stream ending: {}", err.step(), err);
                        return None;
                    }
                },
            }
        }
    }

    /// Lazy stream of multipart chunks; ends when the loop stops.
    pub fn chunks(&mut self) -> Chunks<'_> {
        Chunks { pipeline: self }
    }

    fn log_health(&mut self) {
        if self.last_health_log.elapsed() < HEALTH_LOG_INTERVAL {
            return;
        }
        let source = self.source.stats();
        log::info!(
            "camera health={} frames={} emitted={} alerts={} source={}",
            self.source.is_healthy(),
            source.frames_captured,
            self.stats.frames_emitted,
            self.stats.alerts_dispatched,
            source.source
        );
        self.last_health_log = Instant::now();
    }
}

pub struct Chunks<'a> {
    pipeline: &'a mut DetectionLoop,
}

impl Iterator for Chunks<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pipeline.next_chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedBackend;
    use crate::ingest::{CameraConfig, SyntheticSource};
    use anyhow::{anyhow, Result};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CountingSink(Arc<Mutex<u64>>, Arc<Mutex<bool>>);

    impl AlertSink for CountingSink {
        fn dispatch(&self, _event: &AlertEvent) {
            *self.0.lock().unwrap() += 1;
        }

        fn close(&mut self) {
            *self.1.lock().unwrap() = true;
        }
    }

    struct BrokenDetector;

    impl DetectorBackend for BrokenDetector {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Err(anyhow!("model output missing"))
        }
    }

    struct FailingDetector {
        remaining_failures: u32,
    }

    impl DetectorBackend for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            if self.remaining_failures > 0 {
                self.remaining_failures -= 1;
                Err(anyhow!("tensor shape mismatch"))
            } else {
                Ok(vec![])
            }
        }
    }

    fn stub_source(frames: u64) -> Box<dyn FrameSource> {
        let mut source = SyntheticSource::new(CameraConfig {
            source: format!("stub://test?frames={}", frames),
            target_fps: 0,
            width: 32,
            height: 32,
        })
        .unwrap();
        source.connect().unwrap();
        Box::new(source)
    }

    fn insect() -> Detection {
        Detection::new(
            "insect",
            0.9,
            crate::detect::BoundingBox::new(4.0, 4.0, 20.0, 20.0).unwrap(),
        )
    }

    #[test]
    fn stream_ends_after_capture_failure() {
        let sink = CountingSink::default();
        let mut pipeline = DetectionLoop::new(
            stub_source(3),
            Box::new(ScriptedBackend::empty()),
            AlertPolicy::default(),
            Box::new(sink),
        );
        let chunks: Vec<Vec<u8>> = pipeline.chunks().collect();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.starts_with(b"--frame\r\n")));
        assert_eq!(pipeline.state(), LoopState::Stopped);
        assert!(pipeline.next_chunk().is_none());
        assert!(pipeline.step().is_err());
    }

    #[test]
    fn every_qualifying_frame_alerts_without_cooldown() {
        let sink = CountingSink::default();
        let mut pipeline = DetectionLoop::new(
            stub_source(4),
            Box::new(ScriptedBackend::new(vec![insect()])),
            AlertPolicy::default(),
            Box::new(sink.clone()),
        );
        assert_eq!(pipeline.chunks().count(), 4);
        assert_eq!(*sink.0.lock().unwrap(), 4);
        assert_eq!(pipeline.stats().alerts_dispatched, 4);
    }

    #[test]
    fn cooldown_suppresses_repeat_alerts() {
        let sink = CountingSink::default();
        let mut pipeline = DetectionLoop::new(
            stub_source(4),
            Box::new(ScriptedBackend::new(vec![insect()])),
            AlertPolicy::default(),
            Box::new(sink.clone()),
        )
        .with_gate(AlertGate::new(Duration::from_secs(3600)));
        assert_eq!(pipeline.chunks().count(), 4);
        assert_eq!(*sink.0.lock().unwrap(), 1);
        assert_eq!(pipeline.stats().alerts_suppressed, 3);
    }

    #[test]
    fn detect_errors_abort_by_default() {
        let mut pipeline = DetectionLoop::new(
            stub_source(5),
            Box::new(FailingDetector {
                remaining_failures: 1,
            }),
            AlertPolicy::default(),
            Box::new(CountingSink::default()),
        );
        assert_eq!(pipeline.chunks().count(), 0);
        assert!(pipeline.is_stopped());
    }

    #[test]
    fn skip_policy_drops_failed_frames_and_continues() {
        let settings = StreamSettings {
            on_frame_error: FrameErrorPolicy::Skip,
            ..StreamSettings::default()
        };
        let mut pipeline = DetectionLoop::new(
            stub_source(5),
            Box::new(FailingDetector {
                remaining_failures: 2,
            }),
            AlertPolicy::default(),
            Box::new(CountingSink::default()),
        )
        .with_settings(settings);
        assert_eq!(pipeline.chunks().count(), 3);
        assert_eq!(pipeline.stats().frames_skipped, 2);
    }

    #[test]
    fn skip_policy_stops_after_too_many_failures_in_a_row() {
        let mut source = SyntheticSource::new(CameraConfig {
            source: "stub://live".to_string(),
            target_fps: 0,
            width: 16,
            height: 16,
        })
        .unwrap();
        source.connect().unwrap();
        let settings = StreamSettings {
            on_frame_error: FrameErrorPolicy::Skip,
            max_consecutive_skips: 5,
            ..StreamSettings::default()
        };
        let mut pipeline = DetectionLoop::new(
            Box::new(source),
            Box::new(BrokenDetector),
            AlertPolicy::default(),
            Box::new(CountingSink::default()),
        )
        .with_settings(settings);

        assert!(pipeline.next_chunk().is_none());
        assert!(pipeline.is_stopped());
        assert_eq!(pipeline.stats().frames_skipped, 5);
    }

    #[test]
    fn skip_run_resets_after_a_good_frame() {
        let settings = StreamSettings {
            on_frame_error: FrameErrorPolicy::Skip,
            max_consecutive_skips: 2,
            ..StreamSettings::default()
        };
        let mut pipeline = DetectionLoop::new(
            stub_source(10),
            Box::new(FailingDetector {
                remaining_failures: 2,
            }),
            AlertPolicy::default(),
            Box::new(CountingSink::default()),
        )
        .with_settings(settings);
        assert!(pipeline.next_chunk().is_some());
        assert_eq!(pipeline.stats().frames_skipped, 2);
        assert!(!pipeline.is_stopped());
    }

    #[test]
    fn stop_closes_the_sink_and_ends_the_stream() {
        let sink = CountingSink::default();
        let mut pipeline = DetectionLoop::new(
            stub_source(10),
            Box::new(ScriptedBackend::empty()),
            AlertPolicy::default(),
            Box::new(sink.clone()),
        );
        assert!(pipeline.next_chunk().is_some());
        pipeline.stop();
        assert!(*sink.1.lock().unwrap());
        assert!(pipeline.is_stopped());
        assert!(pipeline.next_chunk().is_none());
    }

    #[test]
    fn frame_error_policy_parses() {
        assert_eq!("skip".parse::<FrameErrorPolicy>().unwrap(), FrameErrorPolicy::Skip);
        assert_eq!(" Abort ".parse::<FrameErrorPolicy>().unwrap(), FrameErrorPolicy::Abort);
        assert!("retry".parse::<FrameErrorPolicy>().is_err());
    }
}

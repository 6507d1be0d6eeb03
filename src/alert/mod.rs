//! Alert filtering and dispatch.
//!
//! The filter is a pure predicate over one frame's detections. When it keeps
//! anything, the pipeline builds an `AlertEvent` and hands it to an
//! `AlertSink`. Delivery is best-effort: sinks never report failure back to
//! the pipeline and nothing is retried.

mod notifier;
mod worker;

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{Local, SecondsFormat};
use serde::Serialize;

use crate::detect::Detection;

pub use notifier::{LineNotifier, Notifier, LINE_NOTIFY_URL};
pub use worker::{NotificationWorker, WorkerStats};

pub const DEFAULT_TARGET_LABEL: &str = "insect";
pub const DEFAULT_THRESHOLD: f32 = 0.6;
pub const DEFAULT_MESSAGE: &str = "Insect detected";

/// Label and confidence predicate selecting alert-worthy detections.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertPolicy {
    pub target_label: String,
    /// Detections must score strictly above this.
    pub threshold: f32,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            target_label: DEFAULT_TARGET_LABEL.to_string(),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl AlertPolicy {
    pub fn new(target_label: impl Into<String>, threshold: f32) -> Result<Self> {
        let target_label = target_label.into();
        if target_label.trim().is_empty() {
            return Err(anyhow!("alert target label must not be empty"));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("alert threshold must be within [0, 1], got {}", threshold));
        }
        Ok(Self {
            target_label,
            threshold,
        })
    }

    pub fn matches(&self, detection: &Detection) -> bool {
        detection.label == self.target_label && detection.confidence > self.threshold
    }

    /// Keep matching detections, preserving their order.
    pub fn filter(&self, detections: &[Detection]) -> Vec<Detection> {
        detections
            .iter()
            .filter(|d| self.matches(d))
            .cloned()
            .collect()
    }
}

/// One qualifying frame's worth of detections.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertEvent {
    /// ISO-8601 local wall-clock time of the frame.
    pub timestamp: String,
    pub count: usize,
    pub details: Vec<Detection>,
}

impl AlertEvent {
    /// Build an event stamped with the current time. `None` for an empty list.
    pub fn from_detections(details: Vec<Detection>) -> Option<Self> {
        if details.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            count: details.len(),
            details,
        })
    }
}

/// Receiver of alert events. Implementations must not block the caller for
/// long and must swallow their own failures.
pub trait AlertSink: Send {
    fn dispatch(&self, event: &AlertEvent);

    /// Stop accepting events and finish delivering queued ones.
    fn close(&mut self) {}
}

/// Sink that only logs; used when no notification endpoint is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnlySink;

impl AlertSink for LogOnlySink {
    fn dispatch(&self, event: &AlertEvent) {
        log::info!(
            "alert (no notifier configured): count={} at {}",
            event.count,
            event.timestamp
        );
    }
}

/// Cooldown between alerts.
///
/// A zero cooldown admits every qualifying frame, so an insect visible for N
/// frames produces N alerts.
#[derive(Clone, Debug)]
pub struct AlertGate {
    cooldown: Duration,
    last_alert: Option<Instant>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_alert: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Returns true when an alert may fire at `now`, and records it if so.
    pub fn admit(&mut self, now: Instant) -> bool {
        let open = match self.last_alert {
            Some(last) if !self.cooldown.is_zero() => now.duration_since(last) >= self.cooldown,
            _ => true,
        };
        if open {
            self.last_alert = Some(now);
        }
        open
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

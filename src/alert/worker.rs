use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use super::{AlertEvent, AlertSink, Notifier};

/// Counters shared between the worker thread and its handle.
#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Sends notifications off the frame loop.
///
/// Events go through a bounded queue to a single worker thread. `dispatch`
/// never blocks: when the queue is full the event is dropped and logged.
/// Notifier failures are logged by the worker and never retried.
pub struct NotificationWorker {
    sender: Mutex<Option<SyncSender<AlertEvent>>>,
    counters: Arc<Counters>,
    join: Option<JoinHandle<()>>,
}

impl NotificationWorker {
    pub fn spawn<N: Notifier + 'static>(
        notifier: N,
        message: impl Into<String>,
        capacity: usize,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("notification queue capacity must be greater than zero"));
        }
        let message = message.into();
        let (tx, rx) = mpsc::sync_channel::<AlertEvent>(capacity);
        let counters = Arc::new(Counters::default());
        let thread_counters = counters.clone();
        let join = std::thread::Builder::new()
            .name("alert-notifier".to_string())
            .spawn(move || {
                for event in rx {
                    match notifier.notify(&message) {
                        Ok(()) => {
                            thread_counters.sent.fetch_add(1, Ordering::Relaxed);
                            log::info!(
                                "notification sent for alert at {} (count={})",
                                event.timestamp,
                                event.count
                            );
                        }
                        Err(err) => {
                            thread_counters.failed.fetch_add(1, Ordering::Relaxed);
                            log::warn!("error sending notification: {:#}", err);
                        }
                    }
                }
            })?;
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            counters,
            join: Some(join),
        })
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting events, deliver what is queued and join the worker.
    pub fn shutdown(mut self) -> Result<WorkerStats> {
        self.finish()
    }

    fn finish(&mut self) -> Result<WorkerStats> {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("notification worker thread panicked"))?;
        }
        Ok(self.stats())
    }
}

impl AlertSink for NotificationWorker {
    fn dispatch(&self, event: &AlertEvent) {
        let Ok(guard) = self.sender.lock() else {
            log::warn!("notification queue lock poisoned; alert dropped");
            return;
        };
        let Some(sender) = guard.as_ref() else {
            log::warn!("notification worker stopped; alert dropped");
            return;
        };
        match sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("notification queue full; alert at {} dropped", event.timestamp);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("notification worker gone; alert at {} dropped", event.timestamp);
            }
        }
    }

    fn close(&mut self) {
        let already_closed = self.join.is_none();
        match self.finish() {
            Ok(stats) if !already_closed => log::info!(
                "notification worker stopped: sent={} failed={} dropped={}",
                stats.sent,
                stats.failed,
                stats.dropped
            ),
            Ok(_) => {}
            Err(err) => log::warn!("{}", err),
        }
    }
}

impl Drop for NotificationWorker {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use std::sync::mpsc::Receiver;
    use std::time::Duration;

    struct RecordingNotifier {
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) -> Result<()> {
            self.calls.lock().unwrap().push(message.to_string());
            if self.fail {
                Err(anyhow!("status 401"))
            } else {
                Ok(())
            }
        }
    }

    /// Blocks every call until the test releases it.
    struct GatedNotifier {
        release: Mutex<Receiver<()>>,
    }

    impl Notifier for GatedNotifier {
        fn notify(&self, _message: &str) -> Result<()> {
            let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(5));
            Ok(())
        }
    }

    fn event() -> AlertEvent {
        let bbox = BoundingBox::new(0.0, 0.0, 4.0, 4.0).unwrap();
        AlertEvent::from_detections(vec![Detection::new("insect", 0.9, bbox)]).unwrap()
    }

    #[test]
    fn worker_delivers_queued_events_before_shutdown() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let notifier = RecordingNotifier {
            calls: calls.clone(),
            fail: false,
        };
        let worker = NotificationWorker::spawn(notifier, "Insect detected", 8).unwrap();
        worker.dispatch(&event());
        worker.dispatch(&event());
        let stats = worker.shutdown().unwrap();

        assert_eq!(stats.sent, 2);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["Insect detected".to_string(), "Insect detected".to_string()]
        );
    }

    #[test]
    fn notifier_failures_are_counted_not_retried() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let notifier = RecordingNotifier {
            calls: calls.clone(),
            fail: true,
        };
        let worker = NotificationWorker::spawn(notifier, "Insect detected", 4).unwrap();
        worker.dispatch(&event());
        let stats = worker.shutdown().unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.sent, 0);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (release_tx, release_rx) = mpsc::channel();
        let notifier = GatedNotifier {
            release: Mutex::new(release_rx),
        };
        let worker = NotificationWorker::spawn(notifier, "Insect detected", 1).unwrap();
        // One in flight (blocked in notify) plus one queued; the rest must drop.
        for _ in 0..10 {
            worker.dispatch(&event());
        }
        assert!(worker.stats().dropped >= 8);
        for _ in 0..10 {
            let _ = release_tx.send(());
        }
        let stats = worker.shutdown().unwrap();
        assert_eq!(stats.sent + stats.dropped, 10);
    }

    #[test]
    fn closing_as_a_sink_drains_the_queue() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let notifier = RecordingNotifier {
            calls: calls.clone(),
            fail: false,
        };
        let mut sink: Box<dyn AlertSink> =
            Box::new(NotificationWorker::spawn(notifier, "Insect detected", 4).unwrap());
        sink.dispatch(&event());
        sink.close();
        assert_eq!(calls.lock().unwrap().len(), 1);

        // later events are dropped, not queued
        sink.dispatch(&event());
        sink.close();
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let notifier = RecordingNotifier {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        };
        assert!(NotificationWorker::spawn(notifier, "x", 0).is_err());
    }
}

//! Insect Watch
//!
//! Camera-driven insect detection with push alerts and a sensor history view.
//!
//! # Architecture
//!
//! Two independent flows share one HTTP surface:
//!
//! 1. **Detection loop**: capture a frame, run the YOLO detector, keep
//!    detections labelled `insect` above the alert threshold, send a
//!    best-effort notification, draw overlays, and emit the frame as one part
//!    of a `multipart/x-mixed-replace` JPEG stream.
//! 2. **Sensor history**: read the `Client` and `Server` sensor logs from the
//!    realtime database and serve the latest record or the newest ten records
//!    for each device.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames
//! - `ingest`: frame sources (synthetic, MJPEG over HTTP, V4L2)
//! - `detect`: detector backends and YOLO output decoding
//! - `alert`: alert filter, cooldown gate, notification worker
//! - `annotate`: box and caption overlays
//! - `stream`: JPEG encoding and multipart framing
//! - `pipeline`: the per-frame detection loop
//! - `store` / `history`: realtime database reads and sensor views
//! - `api`: HTTP routes
//! - `config`: daemon configuration

pub mod alert;
pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod history;
pub mod ingest;
pub mod pipeline;
pub mod store;
pub mod stream;

pub use alert::{
    AlertEvent, AlertGate, AlertPolicy, AlertSink, LineNotifier, LogOnlySink, NotificationWorker,
    Notifier, WorkerStats,
};
pub use annotate::{annotate, AnnotationStyle};
pub use api::{ApiConfig, ApiHandle, ApiServer, AppState};
pub use config::WatchdConfig;
pub use detect::{BoundingBox, Detection, DetectorBackend, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use error::{PipelineError, StoreError};
pub use frame::Frame;
pub use history::{DeviceViews, SensorHistory, SensorRecord};
pub use ingest::{open_source, CameraConfig, FrameSource, MjpegSource, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::V4l2Source;
pub use pipeline::{DetectionLoop, FrameErrorPolicy, LoopState, LoopStats, StreamSettings};
pub use store::{InMemorySnapshotStore, RestSnapshotStore, SnapshotStore, StoreCredentials};
pub use stream::{encode_jpeg, multipart_chunk, MULTIPART_CONTENT_TYPE};

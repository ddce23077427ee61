pub mod capture;
pub mod lifecycle;

pub use capture::{
    CaptureSettings, CaptureState, CaptureSupervisor, CaptureWorker, DetectorProcessWorker,
};
pub use lifecycle::ThreatLifecycle;

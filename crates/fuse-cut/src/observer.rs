//! Stage reporting for reconstruction runs.
//!
//! The algorithmic code never prints. It reports stage boundaries, per-stage
//! counts and recoverable anomalies to a [`ReconstructionObserver`] owned by the
//! [`DelaunayGraphCut`](crate::DelaunayGraphCut). The default observer forwards
//! everything to `tracing`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use fuse_cut::observer::{CallbackObserver, ObserverEvent, Stage};
//!
//! let observer = CallbackObserver::new(|event| {
//!     if let ObserverEvent::Completed(Stage::MinCut, summary) = event {
//!         println!("cut done: {:?}", summary.get("full_cells"));
//!     }
//! });
//! let _shared: Arc<dyn fuse_cut::ReconstructionObserver> = Arc::new(observer);
//! ```

use std::fmt;
use std::sync::Mutex;

use tracing::{info, warn};

/// Reconstruction stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    PointCloud,
    Tetrahedralization,
    Voting,
    MinCut,
    PostProcessing,
    Extraction,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::PointCloud,
        Stage::Tetrahedralization,
        Stage::Voting,
        Stage::MinCut,
        Stage::PostProcessing,
        Stage::Extraction,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::PointCloud => "point_cloud",
            Stage::Tetrahedralization => "tetrahedralization",
            Stage::Voting => "voting",
            Stage::MinCut => "min_cut",
            Stage::PostProcessing => "post_processing",
            Stage::Extraction => "extraction",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named counts produced by a stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageSummary {
    pub counts: Vec<(&'static str, usize)>,
    pub elapsed_ms: f64,
}

impl StageSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: usize) -> Self {
        self.counts.push((name, value));
        self
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.counts.iter().find(|(n, _)| *n == name).map(|&(_, v)| v)
    }
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.counts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, " ({:.1} ms)", self.elapsed_ms)
    }
}

/// Receives stage events. All methods have no-op defaults.
pub trait ReconstructionObserver: Send + Sync {
    fn stage_started(&self, _stage: Stage) {}

    fn stage_completed(&self, _stage: Stage, _summary: &StageSummary) {}

    /// A recoverable anomaly, e.g. observations skipped during voting.
    fn warning(&self, _stage: Stage, _message: &str) {}

    /// Position of `stage` among the stages of the run. Informational only.
    fn progress(&self, _stage: Stage, _current: u64, _total: u64) {}
}

/// Ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl ReconstructionObserver for NoOpObserver {}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ReconstructionObserver for TracingObserver {
    fn stage_completed(&self, stage: Stage, summary: &StageSummary) {
        info!(target: "fuse_cut::stages", stage = stage.name(), "{}", summary);
    }

    fn warning(&self, stage: Stage, message: &str) {
        warn!(target: "fuse_cut::stages", stage = stage.name(), "{}", message);
    }
}

/// An owned copy of one observer call.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Started(Stage),
    Completed(Stage, StageSummary),
    Warning(Stage, String),
    Progress(Stage, u64, u64),
}

/// Passes every event to a closure.
pub struct CallbackObserver {
    callback: Box<dyn Fn(&ObserverEvent) + Send + Sync>,
}

impl CallbackObserver {
    pub fn new(callback: impl Fn(&ObserverEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl ReconstructionObserver for CallbackObserver {
    fn stage_started(&self, stage: Stage) {
        (self.callback)(&ObserverEvent::Started(stage));
    }

    fn stage_completed(&self, stage: Stage, summary: &StageSummary) {
        (self.callback)(&ObserverEvent::Completed(stage, summary.clone()));
    }

    fn warning(&self, stage: Stage, message: &str) {
        (self.callback)(&ObserverEvent::Warning(stage, message.to_string()));
    }

    fn progress(&self, stage: Stage, current: u64, total: u64) {
        (self.callback)(&ObserverEvent::Progress(stage, current, total));
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Summary of the last completion of `stage`.
    pub fn summary(&self, stage: Stage) -> Option<StageSummary> {
        self.events().into_iter().rev().find_map(|e| match e {
            ObserverEvent::Completed(s, summary) if s == stage => Some(summary),
            _ => None,
        })
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ObserverEvent::Warning(_, m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ObserverEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ReconstructionObserver for RecordingObserver {
    fn stage_started(&self, stage: Stage) {
        self.push(ObserverEvent::Started(stage));
    }

    fn stage_completed(&self, stage: Stage, summary: &StageSummary) {
        self.push(ObserverEvent::Completed(stage, summary.clone()));
    }

    fn warning(&self, stage: Stage, message: &str) {
        self.push(ObserverEvent::Warning(stage, message.to_string()));
    }

    fn progress(&self, stage: Stage, current: u64, total: u64) {
        self.push(ObserverEvent::Progress(stage, current, total));
    }
}

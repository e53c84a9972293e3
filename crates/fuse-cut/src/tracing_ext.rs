//! Tracing helpers for reconstruction stages.
//!
//! Initialize a subscriber in the application to see the output:
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // RUST_LOG=fuse_cut=debug for per-stage details,
//! // RUST_LOG=fuse_cut::timing=info for timings only
//! ```

use std::time::Instant;
use tracing::{Span, debug, info};

use crate::graph::DelaunayGraphCut;
use crate::observer::Stage;

/// Logs the duration of a stage when dropped.
pub struct StageTimer {
    stage: Stage,
    start: Instant,
    span: Span,
}

impl StageTimer {
    pub fn new(stage: Stage) -> Self {
        let span = tracing::info_span!("fuse_cut_stage", stage = stage.name());
        debug!(target: "fuse_cut::timing", stage = stage.name(), "Starting stage");
        Self {
            stage,
            start: Instant::now(),
            span,
        }
    }

    /// Timer with the graph size attached to its span.
    pub fn with_context(stage: Stage, vertex_count: usize, cell_count: usize) -> Self {
        let span = tracing::info_span!(
            "fuse_cut_stage",
            stage = stage.name(),
            vertices = vertex_count,
            cells = cell_count
        );
        debug!(
            target: "fuse_cut::timing",
            stage = stage.name(),
            vertices = vertex_count,
            cells = cell_count,
            "Starting stage"
        );
        Self {
            stage,
            start: Instant::now(),
            span,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        info!(
            target: "fuse_cut::timing",
            stage = self.stage.name(),
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "Stage completed"
        );
    }
}

/// Log graph sizes and label counts at debug level.
pub fn log_graph_state(gc: &DelaunayGraphCut, context: &str) {
    let full = gc.cell_is_full.iter().filter(|&&f| f).count();
    debug!(
        target: "fuse_cut::graph_state",
        context = context,
        vertices = gc.nb_vertices(),
        cells = gc.nb_cells(),
        full_cells = full,
        "Graph state"
    );
}

//! Intake Common - deterministic core of the ingestion health monitor.
//!
//! CV profiles, detectors, consolidation and report synthesis. Nothing in
//! this crate talks to the network; the daemon composes it with the
//! reasoning oracle.

pub mod calendar;
pub mod config;
pub mod consolidator;
pub mod context;
pub mod cv;
pub mod detectors;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod trace;

pub use calendar::{HolidayCalendar, StaticCalendar};
pub use config::IntakeConfig;
pub use context::RunContext;
pub use cv::{CvRepository, SourceProfile};
pub use detectors::{Detector, DetectorSet};
pub use error::{DetectorError, IntakeError, Result};
pub use model::{
    DayOfWeek, DetectorId, FileStatus, Incident, NoteKind, ObservedFile, RunStatus, Severity,
    SourceStatus, SourceVerdict, VerdictNote,
};
pub use pipeline::SourceEvaluator;
pub use report::{AnalysisMode, Report};
pub use store::{DaySnapshot, InMemoryStore, JsonDirStore, MetadataStore};
pub use trace::{ControllerState, Observation, ReasoningTrace, ToolAction};

/// Crate version, shared by the daemon and the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default daemon address used by intakectl
pub const DEFAULT_DAEMON_URL: &str = "http://127.0.0.1:7870";

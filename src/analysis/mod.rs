//! Heap leak analysis: classification, GC-root paths and the report.

pub mod classifier;
pub mod matchers;
pub mod paths;
pub mod report;
pub mod service;

pub use classifier::{BigObject, ClassTally, Classification, LeakCandidate, classify};
pub use matchers::{MatcherKind, ReferenceMatcher, ReferencePattern};
pub use paths::{LeakGroup, LeakTrace, PathFindings, find_paths};
pub use report::{HeapReport, RunningInfo};
pub use service::{AnalysisError, AnalysisService, write_report};

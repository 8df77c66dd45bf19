//! Staff/client relationship maintenance
//!
//! - **Reconciler**: offline union-only backfill of `Client.staffs`
//! - **Resolver**: read path with index-first fallback to the staff scan
//! - **Assignments**: dual writes keeping both sides in step
//! - **Audit**: read-only invariant check

pub mod assign;
pub mod audit;
pub mod reconciler;
pub mod resolver;

pub use assign::{AssignmentResult, Assignments};
pub use audit::{audit, AuditFinding, AuditReport, FindingKind};
pub use reconciler::{IssueReason, ReconcileIssue, ReconcileOptions, ReconcileSummary, Reconciler};
pub use resolver::{Resolution, ResolutionPath, ResolutionStats, ResolverConfig, StaffResolver};

//! Installation plans and the runners that carry them out.
//!
//! A host plan holds one [`ExecutionSolution`] per [`SolutionKind`]. Shell
//! solutions run as one compound command over an interactive session;
//! batch solutions run one administrative command per content.

pub mod cache;
pub mod executor;
pub mod model;
mod runner;

pub use cache::{DependencyCache, Fetcher, HttpFetcher};
pub use executor::{AdminCommand, AdminExecutor, ProcessExecutor};
pub use model::{Content, ExecutionSolution, HostSolutions, SolutionKind, Step, StepKind};
pub use runner::{DEFAULT_MIRROR_PORT, RunnerConfig, SolutionRunner, wrap_compound};

//! Build orchestrator: the dependency-traced, parallel module loader
//! (§4.E) plus the ambient config/diagnostics/archival layers around
//! it (§9 "Global mutable state" redesign note).
//!
//! `skein-core` fixes the module/header data shapes this crate walks;
//! `skein-parse` supplies the engine a command is evaluated against.
//! This crate owns everything process-wide the original kept as
//! mutable globals: the dependency graph, the content-addressed
//! archive, and the `Runtime` context that replaces them.

pub mod archive;
pub mod command;
pub mod config;
pub mod diagnostics;
pub mod graph;
pub mod load;
pub mod runtime;
pub mod trace;
pub mod unload;

pub use archive::{Archive, ArchivedCompilation, ArchivedHeader, ArchivedImport};
pub use command::{evaluate_command, CommandError, EntryPointEvaluator};
pub use config::RuntimeConfig;
pub use diagnostics::{CollectingProblemHandler, Problem, ProblemHandler, ProblemKind};
pub use graph::{GraphError, ModuleGraph};
pub use load::{FunctionReplayer, GlobalProgress, LoadError, LoadedState, ModuleCompiler, ModuleProgress};
pub use runtime::{now, BuildError, BuildReport, Runtime};
pub use trace::{HeaderParser, SourceProvider, TraceError, TraceResult};
pub use unload::{UnloadHook, unload_dirty};

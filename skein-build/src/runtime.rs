//! `Runtime`: the explicit build-orchestrator context (§9 "Global
//! mutable state" redesign note). Where the original kept a process-
//! wide module table and active-versions set, this wires the same
//! state into one object passed to every entry point: `Runtime::new`
//! → (repeated) `Runtime::build_target` → `Runtime::shutdown`.
//!
//! A build compares the graph and digests left by the previous build
//! (empty on the first one) against a fresh trace, unloads whatever
//! that comparison marks dirty, then loads the new graph forward. The
//! resulting graph and `LoadedState` become "previous" for next time.

use crate::archive::Archive;
use crate::config::RuntimeConfig;
use crate::graph::{GraphError, ModuleGraph};
use crate::load::{self, FunctionReplayer, GlobalProgress, LoadedState, ModuleCompiler, ModuleProgress};
use crate::trace::{self, HeaderParser, SourceProvider, TraceError};
use crate::unload::{self, UnloadHook};
use log::debug;
use skein_core::Atom;
use skein_rt::Scheduler;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Wall-clock seconds, for callers that don't already track their own
/// compilation clock. `load_forward` only needs monotonically
/// sensible timestamps to order `CompilationKey` predecessors, not any
/// particular epoch.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("module '{0}' could not be re-read for loading: {1}")]
    SourceUnavailable(String, String),
}

/// One `Runtime::build_target` outcome: what got unloaded, what got
/// (re)loaded, and the state carried into the next build.
pub struct BuildReport {
    pub unloaded: Vec<Atom>,
    pub loaded: LoadedState,
}

struct PreviousBuild {
    graph: ModuleGraph,
    digests: HashMap<Atom, skein_core::SourceDigest>,
    loaded: LoadedState,
}

pub struct Runtime {
    config: RuntimeConfig,
    archive: Arc<Archive>,
    scheduler: Scheduler,
    previous: Mutex<Option<PreviousBuild>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let scheduler = Scheduler::new(config.worker_threads);
        Self {
            config,
            archive: Arc::new(Archive::new()),
            scheduler,
            previous: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn archive(&self) -> Arc<Archive> {
        self.archive.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Traces `targets`, unloads whatever source changes made dirty
    /// since the last build, and loads the resulting graph forward.
    #[allow(clippy::too_many_arguments)]
    pub fn build_target(
        &self,
        targets: &[String],
        source_provider: &dyn SourceProvider,
        header_parser: &dyn HeaderParser,
        unload_hook: Arc<dyn UnloadHook>,
        compiler: Arc<dyn ModuleCompiler>,
        replayer: Arc<dyn FunctionReplayer>,
        module_progress: Arc<dyn ModuleProgress>,
        global_progress: Arc<dyn GlobalProgress>,
        now: i64,
    ) -> Result<BuildReport, BuildError> {
        debug!("build target(s) {targets:?}: tracing");
        let traced = trace::trace_targets(targets, source_provider, header_parser, &self.archive)?;
        debug!("build: traced {} module(s)", traced.headers.len());

        let mut previous_guard = self.previous.lock().expect("runtime state poisoned");
        let empty_digests = HashMap::new();
        let empty_loaded = LoadedState::default();
        let (previous_digests, previous_loaded) = match previous_guard.as_ref() {
            Some(previous) => (&previous.digests, &previous.loaded),
            None => (&empty_digests, &empty_loaded),
        };

        let dirty = unload::unload_dirty(
            &traced.graph,
            previous_digests,
            &traced.digests,
            &self.scheduler,
            unload_hook,
        )?;
        debug!("build: {} module(s) marked dirty and unloaded", dirty.len());

        let mut carried_forward = previous_loaded.clone();
        for module in &dirty {
            carried_forward.digests.remove(module);
            carried_forward.compiled_at.remove(module);
        }

        let mut sources = HashMap::with_capacity(traced.headers.len());
        for (atom, _) in traced.headers.iter() {
            let source = source_provider
                .source_for(atom.name())
                .map_err(|e| BuildError::SourceUnavailable(atom.name().to_string(), e))?;
            sources.insert(atom.clone(), source);
        }

        let loaded = load::load_forward(
            &traced.graph,
            &traced.headers,
            &traced.digests,
            &traced.atoms_by_name,
            &sources,
            &carried_forward,
            compiler,
            replayer,
            module_progress,
            global_progress,
            &self.scheduler,
            self.archive.clone(),
            now,
        )?;

        *previous_guard = Some(PreviousBuild {
            graph: traced.graph,
            digests: traced.digests,
            loaded: loaded.clone(),
        });

        Ok(BuildReport {
            unloaded: dirty.into_iter().collect(),
            loaded,
        })
    }

    /// Stops the scheduler from accepting further work. Already-queued
    /// and in-flight tasks still drain; this does not block.
    pub fn shutdown(&self) {
        self.scheduler.request_stop();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.scheduler.is_stopping()
    }
}

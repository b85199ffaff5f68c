//! Loading phase (§4.E "Loading"): walk the module graph forward,
//! skip anything already loaded, and for everything else either replay
//! a cached compilation or compile fresh.
//!
//! Actually compiling a module body (running the parser over it,
//! producing executable top-level functions) and actually replaying a
//! previously-compiled one both require the runtime object model this
//! core doesn't own (§1); `ModuleCompiler` and `FunctionReplayer` are
//! the seam, same role as `skein_parse::restriction`'s runner traits.

use crate::archive::{Archive, ArchivedCompilation};
use crate::graph::{GraphError, ModuleGraph};
use log::debug;
use skein_core::{Atom, CompilationKey, ModuleHeader, SourceDigest, VersionKey};
use skein_rt::Scheduler;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub trait ModuleCompiler: Send + Sync {
    /// Compiles a module's body, returning its top-level functions
    /// serialized for the archive. Imports are already loaded by the
    /// time this is called (forward graph order).
    fn compile_body(&self, header: &ModuleHeader, source: &[u8]) -> Result<Vec<Vec<u8>>, String>;
}

pub trait FunctionReplayer: Send + Sync {
    /// Runs one serialized top-level function on a fresh fiber, in the
    /// order they were compiled.
    fn replay(&self, module: &Atom, serialized_function: &[u8]) -> Result<(), String>;
}

pub trait ModuleProgress: Send + Sync {
    fn on_module_progress(&self, module: &Atom, local_bytes: u64, module_bytes: u64);
}

pub trait GlobalProgress: Send + Sync {
    fn on_global_progress(&self, module: &Atom, bytes_compiled: u64, bytes_total: u64);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("module '{0}' source is unavailable")]
    SourceUnavailable(String),
    #[error("module '{0}' failed to compile: {1}")]
    CompileFailed(String, String),
    #[error("module '{0}' failed to replay from the archive: {1}")]
    ReplayFailed(String, String),
    #[error("module '{0}' imports '{1}', which was not loaded first")]
    ImportNotLoaded(String, String),
}

/// What survives a load across builds: each loaded module's source
/// digest (to detect dirtiness next time) and its own compilation
/// timestamp (fed into dependents' `CompilationKey`s next time).
#[derive(Default, Clone)]
pub struct LoadedState {
    pub digests: HashMap<Atom, SourceDigest>,
    pub compiled_at: HashMap<Atom, i64>,
}

#[allow(clippy::too_many_arguments)]
pub fn load_forward(
    graph: &ModuleGraph,
    headers: &HashMap<Atom, ModuleHeader>,
    digests: &HashMap<Atom, SourceDigest>,
    atoms_by_name: &HashMap<String, Atom>,
    sources: &HashMap<Atom, Vec<u8>>,
    previously_loaded: &LoadedState,
    compiler: Arc<dyn ModuleCompiler>,
    replayer: Arc<dyn FunctionReplayer>,
    module_progress: Arc<dyn ModuleProgress>,
    global_progress: Arc<dyn GlobalProgress>,
    scheduler: &Scheduler,
    archive: Arc<Archive>,
    now: i64,
) -> Result<LoadedState, GraphError> {
    let state = Arc::new(Mutex::new(previously_loaded.clone()));
    let still_loaded: HashSet<Atom> = previously_loaded.digests.keys().cloned().collect();
    let total_bytes: u64 = sources.values().map(|s| s.len() as u64).sum();
    let compiled_bytes = Arc::new(Mutex::new(0u64));

    let headers = headers.clone();
    let digests = digests.clone();
    let atoms_by_name = atoms_by_name.clone();
    let sources = sources.clone();

    let visit = {
        let state = state.clone();
        let compiled_bytes = compiled_bytes.clone();
        Arc::new(move |module: &Atom| -> Result<(), String> {
            if still_loaded.contains(module) {
                return Ok(());
            }
            load_one(
                module,
                &headers,
                &digests,
                &atoms_by_name,
                &sources,
                &state,
                &compiler,
                &replayer,
                &module_progress,
                &global_progress,
                &compiled_bytes,
                total_bytes,
                &archive,
                now,
            )
            .map_err(|e| e.to_string())
        })
    };

    graph.parallel_visit(scheduler, visit)?;

    Ok(state.lock().expect("load state poisoned").clone())
}

#[allow(clippy::too_many_arguments)]
fn load_one(
    module: &Atom,
    headers: &HashMap<Atom, ModuleHeader>,
    digests: &HashMap<Atom, SourceDigest>,
    atoms_by_name: &HashMap<String, Atom>,
    sources: &HashMap<Atom, Vec<u8>>,
    state: &Arc<Mutex<LoadedState>>,
    compiler: &Arc<dyn ModuleCompiler>,
    replayer: &Arc<dyn FunctionReplayer>,
    module_progress: &Arc<dyn ModuleProgress>,
    global_progress: &Arc<dyn GlobalProgress>,
    compiled_bytes: &Arc<Mutex<u64>>,
    total_bytes: u64,
    archive: &Archive,
    now: i64,
) -> Result<(), LoadError> {
    let header = headers
        .get(module)
        .ok_or_else(|| LoadError::SourceUnavailable(module.name().to_string()))?;
    let source = sources
        .get(module)
        .ok_or_else(|| LoadError::SourceUnavailable(module.name().to_string()))?;
    let digest = match digests.get(module) {
        Some(d) => *d,
        None => SourceDigest::of(source),
    };
    let module_bytes = source.len() as u64;

    module_progress.on_module_progress(module, 0, module_bytes);

    let mut predecessor_timestamps = Vec::with_capacity(header.imports.len());
    for import in &header.imports {
        let imported_atom = atoms_by_name
            .get(import.module_name.name())
            .cloned()
            .unwrap_or_else(|| import.module_name.clone());
        let timestamp = state
            .lock()
            .expect("load state poisoned")
            .compiled_at
            .get(&imported_atom)
            .copied()
            .ok_or_else(|| {
                LoadError::ImportNotLoaded(module.name().to_string(), imported_atom.name().to_string())
            })?;
        predecessor_timestamps.push(timestamp);
    }
    let compilation_key = CompilationKey::new(predecessor_timestamps);
    let version_key = VersionKey::new(module.clone(), digest);

    let compiled_at = if let Some(cached) = archive.lookup_compilation(&version_key, &compilation_key) {
        debug!("module '{}' replayed from archive ({} functions)", module.name(), cached.serialized_functions.len());
        for function in &cached.serialized_functions {
            replayer
                .replay(module, function)
                .map_err(|e| LoadError::ReplayFailed(module.name().to_string(), e))?;
        }
        cached.compiled_at
    } else {
        debug!("module '{}' missed the archive, compiling fresh", module.name());
        let functions = compiler
            .compile_body(header, source)
            .map_err(|e| LoadError::CompileFailed(module.name().to_string(), e))?;
        archive.store_compilation(
            version_key,
            compilation_key,
            &ArchivedCompilation {
                serialized_functions: functions,
                compiled_at: now,
            },
        );
        now
    };

    module_progress.on_module_progress(module, module_bytes, module_bytes);
    let compiled_so_far = {
        let mut guard = compiled_bytes.lock().expect("progress counter poisoned");
        *guard += module_bytes;
        *guard
    };
    global_progress.on_global_progress(module, compiled_so_far, total_bytes);

    let mut state = state.lock().expect("load state poisoned");
    state.digests.insert(module.clone(), digest);
    state.compiled_at.insert(module.clone(), compiled_at);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    struct CountingCompiler(Mutex<usize>);
    impl ModuleCompiler for CountingCompiler {
        fn compile_body(&self, _header: &ModuleHeader, _source: &[u8]) -> Result<Vec<Vec<u8>>, String> {
            *self.0.lock().unwrap() += 1;
            Ok(vec![vec![1, 2, 3]])
        }
    }

    struct NoopReplayer(Mutex<usize>);
    impl FunctionReplayer for NoopReplayer {
        fn replay(&self, _module: &Atom, _function: &[u8]) -> Result<(), String> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct NoopModuleProgress;
    impl ModuleProgress for NoopModuleProgress {
        fn on_module_progress(&self, _module: &Atom, _local_bytes: u64, _module_bytes: u64) {}
    }

    struct NoopGlobalProgress;
    impl GlobalProgress for NoopGlobalProgress {
        fn on_global_progress(&self, _module: &Atom, _bytes_compiled: u64, _bytes_total: u64) {}
    }

    fn header(name: &str, imports: Vec<&str>) -> ModuleHeader {
        ModuleHeader {
            name: Atom::new(name.to_string()),
            is_system_module: false,
            versions: vec![],
            imports: imports
                .into_iter()
                .map(|n| {
                    skein_core::ModuleImport::new(
                        Atom::new(n.to_string()),
                        vec![],
                        true,
                        BTreeSet::new(),
                        vec![],
                        BTreeSet::new(),
                        true,
                    )
                    .unwrap()
                })
                .collect(),
            exported_names: BTreeSet::new(),
            entry_points: BTreeSet::new(),
            pragmas: vec![],
        }
    }

    #[test]
    fn a_fresh_load_compiles_every_module_exactly_once() {
        let a = Atom::new("A");
        let b = Atom::new("B");
        let graph = ModuleGraph::new();
        graph.add_edge(b.clone(), a.clone());

        let mut headers = HashMap::new();
        headers.insert(a.clone(), header("A", vec![]));
        headers.insert(b.clone(), header("B", vec!["A"]));

        let mut digests = HashMap::new();
        digests.insert(a.clone(), SourceDigest::of(b"module A"));
        digests.insert(b.clone(), SourceDigest::of(b"module B"));

        let mut atoms_by_name = HashMap::new();
        atoms_by_name.insert("A".to_string(), a.clone());
        atoms_by_name.insert("B".to_string(), b.clone());

        let mut sources = HashMap::new();
        sources.insert(a.clone(), b"module A".to_vec());
        sources.insert(b.clone(), b"module B".to_vec());

        let compiler = Arc::new(CountingCompiler(Mutex::new(0)));
        let archive = Arc::new(Archive::new());
        let scheduler = Scheduler::new(4);

        let result = load_forward(
            &graph,
            &headers,
            &digests,
            &atoms_by_name,
            &sources,
            &LoadedState::default(),
            compiler.clone(),
            Arc::new(NoopReplayer(Mutex::new(0))),
            Arc::new(NoopModuleProgress),
            Arc::new(NoopGlobalProgress),
            &scheduler,
            archive.clone(),
            1000,
        )
        .unwrap();

        assert_eq!(*compiler.0.lock().unwrap(), 2);
        assert_eq!(result.compiled_at.len(), 2);
    }

    #[test]
    fn touching_only_a_leaf_dependency_replays_the_dependent_without_recompiling() {
        let a = Atom::new("A");
        let b = Atom::new("B");
        let graph = ModuleGraph::new();
        graph.add_edge(b.clone(), a.clone());

        let mut headers = HashMap::new();
        headers.insert(a.clone(), header("A", vec![]));
        headers.insert(b.clone(), header("B", vec!["A"]));

        let mut atoms_by_name = HashMap::new();
        atoms_by_name.insert("A".to_string(), a.clone());
        atoms_by_name.insert("B".to_string(), b.clone());

        let mut sources = HashMap::new();
        sources.insert(a.clone(), b"module A v1".to_vec());
        sources.insert(b.clone(), b"module B".to_vec());

        let mut digests = HashMap::new();
        digests.insert(a.clone(), SourceDigest::of(&sources[&a]));
        digests.insert(b.clone(), SourceDigest::of(&sources[&b]));

        let compiler = Arc::new(CountingCompiler(Mutex::new(0)));
        let archive = Arc::new(Archive::new());
        let scheduler = Scheduler::new(4);

        let first = load_forward(
            &graph,
            &headers,
            &digests,
            &atoms_by_name,
            &sources,
            &LoadedState::default(),
            compiler.clone(),
            Arc::new(NoopReplayer(Mutex::new(0))),
            Arc::new(NoopModuleProgress),
            Arc::new(NoopGlobalProgress),
            &scheduler,
            archive.clone(),
            1000,
        )
        .unwrap();
        assert_eq!(*compiler.0.lock().unwrap(), 2);

        // Simulate: A was unloaded (touched mtime, identical bytes) but
        // B was not. A's digest is unchanged so its own compilation
        // replays; since A's compiled_at timestamp is therefore
        // unchanged, B's CompilationKey is unchanged too and B never
        // needed to unload in the first place, but exercise the replay
        // path for A directly here.
        let mut previously_loaded = first.clone();
        previously_loaded.digests.remove(&a);
        previously_loaded.compiled_at.remove(&a);

        let replayer = Arc::new(NoopReplayer(Mutex::new(0)));
        let second = load_forward(
            &graph,
            &headers,
            &digests,
            &atoms_by_name,
            &sources,
            &previously_loaded,
            compiler.clone(),
            replayer.clone(),
            Arc::new(NoopModuleProgress),
            Arc::new(NoopGlobalProgress),
            &scheduler,
            archive.clone(),
            2000,
        )
        .unwrap();

        assert_eq!(*compiler.0.lock().unwrap(), 2, "A must replay, not recompile");
        assert_eq!(*replayer.0.lock().unwrap(), 1);
        assert_eq!(second.compiled_at[&a], first.compiled_at[&a]);
    }
}

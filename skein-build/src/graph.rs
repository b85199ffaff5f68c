//! `ModuleGraph`: the import dependency graph the build orchestrator
//! walks during unloading and loading (§4.E). Vertices are module
//! identities; an edge runs from an importer to what it imports.
//!
//! `parallel_visit` fans callbacks out across a `Scheduler` wave by
//! wave: a vertex's callback only starts once every vertex it depends
//! on (its imports) has finished. `parallel_visit_reverse` walks the
//! same graph the other way, for unloading dependents before their
//! dependencies.

use skein_core::Atom;
use skein_rt::{FiberNursery, Scheduler, TaskPriority};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("visit of '{0}' failed: {1}")]
    VisitFailed(String, String),
}

#[derive(Default)]
struct GraphState {
    vertices: HashSet<Atom>,
    /// importer -> set of modules it imports.
    imports: HashMap<Atom, HashSet<Atom>>,
    /// importee -> set of modules that import it.
    importers: HashMap<Atom, HashSet<Atom>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

pub struct ModuleGraph {
    state: Mutex<GraphState>,
}

impl Default for ModuleGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
        }
    }

    pub fn add_vertex(&self, module: Atom) {
        let mut state = self.state.lock().expect("module graph poisoned");
        state.imports.entry(module.clone()).or_default();
        state.importers.entry(module.clone()).or_default();
        state.vertices.insert(module);
    }

    /// Records that `importer` imports `importee`. Both ends are
    /// implicitly added as vertices if not already present.
    pub fn add_edge(&self, importer: Atom, importee: Atom) {
        let mut state = self.state.lock().expect("module graph poisoned");
        state.vertices.insert(importer.clone());
        state.vertices.insert(importee.clone());
        state
            .imports
            .entry(importer.clone())
            .or_default()
            .insert(importee.clone());
        state.importers.entry(importee).or_default().insert(importer);
    }

    pub fn vertices(&self) -> Vec<Atom> {
        self.state
            .lock()
            .expect("module graph poisoned")
            .vertices
            .iter()
            .cloned()
            .collect()
    }

    /// Modules this one imports directly.
    pub fn imports_of(&self, module: &Atom) -> Vec<Atom> {
        self.state
            .lock()
            .expect("module graph poisoned")
            .imports
            .get(module)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Modules that import this one directly.
    pub fn importers_of(&self, module: &Atom) -> Vec<Atom> {
        self.state
            .lock()
            .expect("module graph poisoned")
            .importers
            .get(module)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forward order: a module's callback runs only after everything it
    /// imports has completed (§4.E loading phase).
    pub fn parallel_visit(
        &self,
        scheduler: &Scheduler,
        visit: Arc<dyn Fn(&Atom) -> Result<(), String> + Send + Sync>,
    ) -> Result<(), GraphError> {
        self.visit_waves(scheduler, visit, Direction::Forward)
    }

    /// Reverse order: a module's callback runs only after every module
    /// that imports it has completed (§4.E unloading phase).
    pub fn parallel_visit_reverse(
        &self,
        scheduler: &Scheduler,
        visit: Arc<dyn Fn(&Atom) -> Result<(), String> + Send + Sync>,
    ) -> Result<(), GraphError> {
        self.visit_waves(scheduler, visit, Direction::Reverse)
    }

    fn visit_waves(
        &self,
        scheduler: &Scheduler,
        visit: Arc<dyn Fn(&Atom) -> Result<(), String> + Send + Sync>,
        direction: Direction,
    ) -> Result<(), GraphError> {
        let state = self.state.lock().expect("module graph poisoned");
        let (waiting_on, wakes) = match direction {
            Direction::Forward => (state.imports.clone(), state.importers.clone()),
            Direction::Reverse => (state.importers.clone(), state.imports.clone()),
        };
        let vertices: Vec<Atom> = state.vertices.iter().cloned().collect();
        drop(state);

        let remaining: HashMap<Atom, usize> = vertices
            .iter()
            .map(|v| (v.clone(), waiting_on.get(v).map(HashSet::len).unwrap_or(0)))
            .collect();
        let remaining = Arc::new(Mutex::new(remaining));
        let wakes = Arc::new(wakes);

        let mut ready: Vec<Atom> = {
            let guard = remaining.lock().expect("visit counters poisoned");
            vertices
                .iter()
                .filter(|v| guard.get(*v).copied().unwrap_or(0) == 0)
                .cloned()
                .collect()
        };

        let mut visited = 0usize;
        let total = vertices.len();
        while !ready.is_empty() {
            let nursery = FiberNursery::new(scheduler);
            for module in ready.drain(..) {
                let visit = visit.clone();
                nursery.spawn(TaskPriority::plain(0), move |_cancel| {
                    visit(&module).map(|_| module.name().to_string())
                });
            }
            let completed_names = nursery
                .wait_all()
                .map_err(|e| GraphError::VisitFailed("<wave>".to_string(), e.to_string()))?;
            visited += completed_names.len();

            let mut newly_ready = Vec::new();
            for name in &completed_names {
                let completed = vertices
                    .iter()
                    .find(|v| v.name() == name)
                    .cloned()
                    .unwrap_or_else(|| Atom::new(name.clone()));
                for dependent in wakes.get(&completed).cloned().unwrap_or_default() {
                    let mut guard = remaining.lock().expect("visit counters poisoned");
                    if let Some(count) = guard.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            newly_ready.push(dependent.clone());
                        }
                    }
                }
            }
            ready = newly_ready;
        }

        if visited != total {
            return Err(GraphError::VisitFailed(
                "<graph>".to_string(),
                format!("{} of {} vertices never became ready; graph is not a DAG", total - visited, total),
            ));
        }
        Ok(())
    }
}

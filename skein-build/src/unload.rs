//! Unloading phase (§4.E "Unloading"): mark every module whose source
//! changed (or whose predecessor is already dirty) as dirty, then
//! unload dirty modules in reverse dependency order so a dependent is
//! always gone before the thing it depends on.
//!
//! The original runtime unloads at a scheduler-level "all fibers
//! parked" safe point; this core has no fiber scheduler integration
//! for that beyond the cooperative `InterruptFlags` already on
//! `Fiber` (§1, §5), so `Unloader::unload` takes an `UnloadHook` that
//! the embedder uses to actually tear down whatever held a reference
//! to the module (loaded functions, caches, …) at its own safe point.

use crate::graph::{GraphError, ModuleGraph};
use log::debug;
use skein_core::{Atom, SourceDigest};
use skein_rt::Scheduler;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub trait UnloadHook: Send + Sync {
    fn unload(&self, module: &Atom) -> Result<(), String>;
}

/// Walks `graph` forward marking dirty modules, then reverse-unloads
/// them. `previous_digests` is what was loaded last time; a module
/// absent from it is treated as new (not dirty by itself, but nothing
/// upstream can mark it dirty either).
pub fn unload_dirty(
    graph: &ModuleGraph,
    previous_digests: &HashMap<Atom, SourceDigest>,
    current_digests: &HashMap<Atom, SourceDigest>,
    scheduler: &Scheduler,
    hook: Arc<dyn UnloadHook>,
) -> Result<HashSet<Atom>, GraphError> {
    let dirty = Arc::new(Mutex::new(HashSet::new()));
    {
        let mut dirty = dirty.lock().expect("dirty set poisoned");
        for module in current_digests.keys() {
            let changed = previous_digests.get(module) != current_digests.get(module);
            if changed && previous_digests.contains_key(module) {
                dirty.insert(module.clone());
            }
        }
    }

    // Forward pass: a predecessor already dirty also marks its
    // dependents dirty, even if their own source didn't change.
    let dirty_for_forward = dirty.clone();
    let graph_imports: HashMap<Atom, Vec<Atom>> = graph
        .vertices()
        .iter()
        .map(|v| (v.clone(), graph.imports_of(v)))
        .collect();
    let visit_mark = Arc::new(move |module: &Atom| {
        let imports = graph_imports.get(module).cloned().unwrap_or_default();
        let predecessor_dirty = imports.iter().any(|dep| dirty_for_forward.lock().expect("dirty set poisoned").contains(dep));
        if predecessor_dirty {
            dirty_for_forward.lock().expect("dirty set poisoned").insert(module.clone());
        }
        Ok(())
    });
    graph.parallel_visit(scheduler, visit_mark)?;

    let dirty_snapshot: HashSet<Atom> = dirty.lock().expect("dirty set poisoned").clone();

    // Reverse pass: unload dirty modules only, dependents first.
    let dirty_for_unload = dirty_snapshot.clone();
    let visit_unload = Arc::new(move |module: &Atom| {
        if dirty_for_unload.contains(module) {
            debug!("unloading dirty module '{}'", module.name());
            hook.unload(module)?;
        }
        Ok(())
    });
    graph.parallel_visit_reverse(scheduler, visit_unload)?;

    Ok(dirty_snapshot)
}

//! Maps a bundle's method identity to the shared `Method` several
//! bundles (possibly across modules, under different local names) can
//! point at (§3 "many bundles can share one underlying method").

use skein_core::{Atom, Method};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MethodTable {
    methods: Arc<Mutex<HashMap<Atom, Arc<Mutex<Method>>>>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the method for `identity`, creating an empty one if
    /// this is the first bundle to reference it.
    pub fn get_or_create(&self, identity: &Atom) -> Arc<Mutex<Method>> {
        let mut methods = self.methods.lock().expect("method table poisoned");
        methods
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Method::new())))
            .clone()
    }

    pub fn get(&self, identity: &Atom) -> Option<Arc<Mutex<Method>>> {
        self.methods.lock().expect("method table poisoned").get(identity).cloned()
    }
}

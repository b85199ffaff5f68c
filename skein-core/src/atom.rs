//! Interned name identity.
//!
//! A bare name like `foo` is just text; an `Atom` is the distinct
//! identity a module binds that text to. Two atoms with the same
//! printed name are different atoms unless one was explicitly derived
//! from the other (import, rename). Identity, not spelling, is what
//! `Module::imported_names` and `ModuleImport::renames` actually track.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// A globally unique name identity.
///
/// Cloning an `Atom` is cheap (it shares the backing string and
/// serial); equality and hashing are by serial, not by printed name.
#[derive(Clone)]
pub struct Atom {
    name: Arc<str>,
    serial: u64,
}

impl Atom {
    /// Mints a fresh atom with the given printed name. Two calls with
    /// the same `name` produce two distinct atoms.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        Self {
            name: name.into(),
            serial,
        }
    }

    /// Derives a renamed view of an existing atom's identity for use
    /// as the key on the importing side of `ModuleImport::renames`.
    /// The underlying identity (serial) is preserved: a lookup by
    /// either name resolves to the same binding.
    pub fn rename(&self, new_name: impl Into<Arc<str>>) -> Self {
        Self {
            name: new_name.into(),
            serial: self.serial,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({:?}#{})", self.name, self.serial)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for Atom {}

impl std::hash::Hash for Atom {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
    }
}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.serial.cmp(&other.serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_atoms_with_same_name_are_unequal() {
        let a = Atom::new("foo");
        let b = Atom::new("foo");
        assert_ne!(a, b);
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn rename_preserves_identity() {
        let foo = Atom::new("foo");
        let baz = foo.rename("baz");
        assert_eq!(foo, baz);
        assert_eq!(baz.name(), "baz");
        assert_ne!(foo.name(), baz.name());
    }

    #[test]
    fn clone_preserves_identity() {
        let a = Atom::new("x");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.serial(), b.serial());
    }

    #[test]
    fn display_shows_current_name() {
        let a = Atom::new("bar");
        assert_eq!(format!("{}", a), "bar");
    }
}

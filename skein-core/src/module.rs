//! `Module`, `ModuleHeader`, `ModuleImport`, and `ModuleStatus` (§3, §6).
//!
//! The dependency graph these compose into (`ModuleGraph`) lives in
//! `skein-build` alongside the parallel-visit algorithm that walks it
//! (§4.E); this module only fixes the per-module data shapes.

use crate::{Atom, SourceDigest};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Loading,
    Loaded,
    Unloading,
}

/// An acceptable version range as declared in a module header's
/// `Versions` section or an import's version list. Kept as an opaque
/// string set rather than a parsed range, since concrete version
/// grammar is outside this core's scope (§1).
pub type VersionList = Vec<String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModuleImportError {
    #[error("wildcard import of '{0}' cannot also declare explicit names")]
    WildcardWithExplicitNames(String),
    #[error("excludes on '{0}' require a wildcard import")]
    ExcludesWithoutWildcard(String),
    #[error("rename target '{new}' already bound by another rename of '{module}'")]
    DuplicateRenameTarget { module: String, new: String },
}

/// One import declaration from a module header's `Extends`/`Uses`
/// section (§3, §6).
#[derive(Debug, Clone)]
pub struct ModuleImport {
    pub module_name: Atom,
    pub acceptable_versions: VersionList,
    /// `Extends` (true) makes the imported names visible to modules
    /// that in turn import this one; `Uses` (false) does not.
    pub is_extension: bool,
    pub explicit_names: BTreeSet<String>,
    /// new name → old name.
    pub renames: BTreeMap<String, String>,
    pub excludes: BTreeSet<String>,
    pub wildcard: bool,
}

impl ModuleImport {
    /// Validates the combination of explicit names, excludes, and
    /// wildcard per §3's "Validity ... is checked at construction."
    pub fn new(
        module_name: Atom,
        acceptable_versions: VersionList,
        is_extension: bool,
        explicit_names: BTreeSet<String>,
        renames: Vec<(String, String)>,
        excludes: BTreeSet<String>,
        wildcard: bool,
    ) -> Result<Self, ModuleImportError> {
        if wildcard && !explicit_names.is_empty() {
            return Err(ModuleImportError::WildcardWithExplicitNames(
                module_name.name().to_string(),
            ));
        }
        if !excludes.is_empty() && !wildcard {
            return Err(ModuleImportError::ExcludesWithoutWildcard(
                module_name.name().to_string(),
            ));
        }
        let mut rename_map = BTreeMap::new();
        for (new_name, old_name) in renames {
            if rename_map.insert(new_name.clone(), old_name).is_some() {
                return Err(ModuleImportError::DuplicateRenameTarget {
                    module: module_name.name().to_string(),
                    new: new_name,
                });
            }
        }
        Ok(Self {
            module_name,
            acceptable_versions,
            is_extension,
            explicit_names,
            renames: rename_map,
            excludes,
            wildcard,
        })
    }

    /// Whether `old_name` (as exported by the imported module) is
    /// brought into scope by this import, accounting for wildcard,
    /// explicit-name lists, and excludes.
    pub fn imports_name(&self, old_name: &str) -> bool {
        if self.excludes.contains(old_name) {
            return false;
        }
        if self.wildcard {
            return true;
        }
        if self.explicit_names.contains(old_name) {
            return true;
        }
        self.renames.values().any(|old| old == old_name)
    }

    /// The local name a module sees for `old_name`: the rename target
    /// if one exists, otherwise `old_name` itself.
    pub fn local_name_for<'a>(&'a self, old_name: &'a str) -> &'a str {
        self.renames
            .iter()
            .find(|(_, old)| old.as_str() == old_name)
            .map(|(new, _)| new.as_str())
            .unwrap_or(old_name)
    }
}

/// The header section of a module's source (§6): everything needed to
/// resolve dependencies before the body is parsed.
#[derive(Debug, Clone)]
pub struct ModuleHeader {
    pub name: Atom,
    pub is_system_module: bool,
    pub versions: VersionList,
    pub imports: Vec<ModuleImport>,
    pub exported_names: BTreeSet<String>,
    pub entry_points: BTreeSet<String>,
    pub pragmas: Vec<(String, String)>,
}

/// A module as tracked by the build orchestrator (§3). `LoadedModule`
/// augments this with the source digest and compiled record once
/// loading succeeds.
#[derive(Debug, Clone)]
pub struct Module {
    pub qualified_name: Atom,
    pub versions: VersionList,
    /// old/local name → set of atoms it resolves to (a wildcard import
    /// plus an explicit alias can both bind the same plain name).
    pub imported_names: BTreeMap<String, BTreeSet<Atom>>,
    pub private_names: BTreeMap<String, Atom>,
    pub new_names: BTreeMap<String, Atom>,
    pub entry_points: BTreeSet<String>,
    pub pragmas: Vec<(String, String)>,
    pub ancestors: BTreeSet<Atom>,
    pub state: ModuleStatus,
}

impl Module {
    pub fn new(header: &ModuleHeader) -> Self {
        Self {
            qualified_name: header.name.clone(),
            versions: header.versions.clone(),
            imported_names: BTreeMap::new(),
            private_names: BTreeMap::new(),
            new_names: BTreeMap::new(),
            entry_points: header.entry_points.clone(),
            pragmas: header.pragmas.clone(),
            ancestors: BTreeSet::new(),
            state: ModuleStatus::Loading,
        }
    }

    /// Binds `local_name` to `atom` under the imported-names map,
    /// merging with any existing binding (a name can be reachable via
    /// more than one import).
    pub fn bind_imported(&mut self, local_name: impl Into<String>, atom: Atom) {
        self.imported_names
            .entry(local_name.into())
            .or_default()
            .insert(atom);
    }
}

/// A module augmented with what the archive needs once it is fully
/// loaded (§3 "A LoadedModule additionally holds...").
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub module: Module,
    pub source_digest: SourceDigest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_with_explicit_names_is_rejected() {
        let mut names = BTreeSet::new();
        names.insert("foo".to_string());
        let err = ModuleImport::new(
            Atom::new("A"),
            vec![],
            true,
            names,
            vec![],
            BTreeSet::new(),
            true,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ModuleImportError::WildcardWithExplicitNames("A".to_string())
        );
    }

    #[test]
    fn excludes_without_wildcard_is_rejected() {
        let mut excludes = BTreeSet::new();
        excludes.insert("foo".to_string());
        let err = ModuleImport::new(
            Atom::new("A"),
            vec![],
            true,
            BTreeSet::new(),
            vec![],
            excludes,
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ModuleImportError::ExcludesWithoutWildcard("A".to_string())
        );
    }

    #[test]
    fn wildcard_plus_rename_exposes_new_name_not_old() {
        // Module A exports {foo, bar}; B does
        // `Extends A = ("baz" -> "foo", ...)`.
        let import = ModuleImport::new(
            Atom::new("A"),
            vec![],
            true,
            BTreeSet::new(),
            vec![("baz".to_string(), "foo".to_string())],
            BTreeSet::new(),
            true,
        )
        .unwrap();

        assert!(import.imports_name("bar"));
        assert!(import.imports_name("foo"));
        assert_eq!(import.local_name_for("foo"), "baz");
        assert_eq!(import.local_name_for("bar"), "bar");
    }

    #[test]
    fn duplicate_rename_target_is_rejected() {
        let renames = vec![
            ("baz".to_string(), "foo".to_string()),
            ("baz".to_string(), "qux".to_string()),
        ];
        let err = ModuleImport::new(
            Atom::new("A"),
            vec![],
            true,
            BTreeSet::new(),
            renames,
            BTreeSet::new(),
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ModuleImportError::DuplicateRenameTarget {
                module: "A".to_string(),
                new: "baz".to_string(),
            }
        );
    }
}

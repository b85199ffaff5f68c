//! Tracing phase (§4.E "Tracing"): recursively resolve a target
//! module's header and every header it transitively imports, building
//! the `ModuleGraph` the unloading and loading phases walk.
//!
//! Actually reading module source bytes, and actually parsing a
//! header out of them, both require machinery outside this core's
//! scope (a file system or source map, and a header grammar); the two
//! traits below are the seam, in the same spirit as
//! `skein_parse::restriction`'s `RestrictionRunner`/`MacroRunner`.
//!
//! Each recursive path carries its own visited-name list, so a cycle
//! is caught as soon as the path revisits a name, independent of any
//! other path through the same graph. The walk itself stays a plain
//! recursive descent rather than scheduler-fanned-out work: cycle
//! detection needs the call path, and headers are small enough that
//! wall-clock parallelism here buys little (contrast the loading
//! phase's `ModuleGraph::parallel_visit`, which is the one genuinely
//! parallel stage).

use crate::archive::{Archive, ArchivedHeader, ArchivedImport};
use crate::graph::ModuleGraph;
use log::trace;
use skein_core::{Atom, ModuleHeader, ModuleImport, SourceDigest, VersionKey};
use std::collections::HashMap;
use thiserror::Error;

pub trait SourceProvider: Send + Sync {
    fn source_for(&self, module_name: &str) -> Result<Vec<u8>, String>;
}

pub trait HeaderParser: Send + Sync {
    fn parse_header(&self, module_name: &str, source: &[u8]) -> Result<ModuleHeader, String>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("module '{0}' could not be read: {1}")]
    SourceUnavailable(String, String),
    #[error("module '{0}' header failed to parse: {1}")]
    HeaderParseFailed(String, String),
    #[error("recursive module dependency: {0}")]
    RecursiveDependency(String),
    #[error("archived header for '{0}' is corrupt: {1}")]
    ArchivedHeaderInvalid(String, String),
}

pub struct TraceResult {
    pub graph: ModuleGraph,
    pub headers: HashMap<Atom, ModuleHeader>,
    pub digests: HashMap<Atom, SourceDigest>,
    /// The canonical atom minted for each module name encountered,
    /// kept around so the loading phase can resolve a header's import
    /// list (plain strings) back to the same atoms the graph uses.
    pub atoms_by_name: HashMap<String, Atom>,
}

pub fn trace_targets(
    target_names: &[String],
    source_provider: &dyn SourceProvider,
    header_parser: &dyn HeaderParser,
    archive: &Archive,
) -> Result<TraceResult, TraceError> {
    let graph = ModuleGraph::new();
    let mut headers = HashMap::new();
    let mut digests = HashMap::new();
    let mut atoms_by_name: HashMap<String, Atom> = HashMap::new();

    for target in target_names {
        resolve(
            target,
            &[],
            source_provider,
            header_parser,
            archive,
            &graph,
            &mut headers,
            &mut digests,
            &mut atoms_by_name,
        )?;
    }

    Ok(TraceResult {
        graph,
        headers,
        digests,
        atoms_by_name,
    })
}

#[allow(clippy::too_many_arguments)]
fn resolve(
    name: &str,
    path: &[String],
    source_provider: &dyn SourceProvider,
    header_parser: &dyn HeaderParser,
    archive: &Archive,
    graph: &ModuleGraph,
    headers: &mut HashMap<Atom, ModuleHeader>,
    digests: &mut HashMap<Atom, SourceDigest>,
    atoms_by_name: &mut HashMap<String, Atom>,
) -> Result<Atom, TraceError> {
    if let Some(atom) = atoms_by_name.get(name) {
        return Ok(atom.clone());
    }
    if path.iter().any(|seen| seen == name) {
        let mut cycle: Vec<String> = path.to_vec();
        cycle.push(name.to_string());
        return Err(TraceError::RecursiveDependency(cycle.join(" -> ")));
    }
    let mut path = path.to_vec();
    path.push(name.to_string());

    let source = source_provider
        .source_for(name)
        .map_err(|e| TraceError::SourceUnavailable(name.to_string(), e))?;
    let digest = SourceDigest::of(&source);
    let atom = Atom::new(name.to_string());
    atoms_by_name.insert(name.to_string(), atom.clone());
    graph.add_vertex(atom.clone());
    digests.insert(atom.clone(), digest);

    let version_key = VersionKey::new(atom.clone(), digest);
    let header = match archive.lookup_header(&version_key) {
        Some(archived) => {
            trace!("header for '{name}' replayed from archive");
            archived_to_header(&atom, &archived)
                .map_err(|e| TraceError::ArchivedHeaderInvalid(name.to_string(), e))?
        }
        None => {
            trace!("header for '{name}' missed the archive, parsing");
            let header = header_parser
                .parse_header(name, &source)
                .map_err(|e| TraceError::HeaderParseFailed(name.to_string(), e))?;
            archive.store_header(version_key, &header_to_archived(&header));
            header
        }
    };

    for import in &header.imports {
        let imported = resolve(
            import.module_name.name(),
            &path,
            source_provider,
            header_parser,
            archive,
            graph,
            headers,
            digests,
            atoms_by_name,
        )?;
        graph.add_edge(atom.clone(), imported);
    }

    headers.insert(atom.clone(), header);
    Ok(atom)
}

fn header_to_archived(header: &ModuleHeader) -> ArchivedHeader {
    ArchivedHeader {
        is_system_module: header.is_system_module,
        versions: header.versions.clone(),
        imports: header
            .imports
            .iter()
            .map(|import| ArchivedImport {
                module_name: import.module_name.name().to_string(),
                acceptable_versions: import.acceptable_versions.clone(),
                is_extension: import.is_extension,
                explicit_names: import.explicit_names.iter().cloned().collect(),
                renames: import.renames.iter().map(|(n, o)| (n.clone(), o.clone())).collect(),
                excludes: import.excludes.iter().cloned().collect(),
                wildcard: import.wildcard,
            })
            .collect(),
        exported_names: header.exported_names.iter().cloned().collect(),
        entry_points: header.entry_points.iter().cloned().collect(),
        pragmas: header.pragmas.clone(),
    }
}

fn archived_to_header(module_atom: &Atom, archived: &ArchivedHeader) -> Result<ModuleHeader, String> {
    let imports = archived
        .imports
        .iter()
        .map(|import| {
            ModuleImport::new(
                Atom::new(import.module_name.clone()),
                import.acceptable_versions.clone(),
                import.is_extension,
                import.explicit_names.iter().cloned().collect(),
                import.renames.clone(),
                import.excludes.iter().cloned().collect(),
                import.wildcard,
            )
            .map_err(|e| e.to_string())
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ModuleHeader {
        name: module_atom.clone(),
        is_system_module: archived.is_system_module,
        versions: archived.versions.clone(),
        imports,
        exported_names: archived.exported_names.iter().cloned().collect(),
        entry_points: archived.entry_points.iter().cloned().collect(),
        pragmas: archived.pragmas.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    struct FakeSources(Mutex<HashMap<String, Vec<u8>>>);

    impl SourceProvider for FakeSources {
        fn source_for(&self, module_name: &str) -> Result<Vec<u8>, String> {
            self.0
                .lock()
                .unwrap()
                .get(module_name)
                .cloned()
                .ok_or_else(|| format!("no source for {module_name}"))
        }
    }

    struct FakeHeaders(HashMap<String, Vec<String>>);

    impl HeaderParser for FakeHeaders {
        fn parse_header(&self, module_name: &str, _source: &[u8]) -> Result<ModuleHeader, String> {
            let imports = self.0.get(module_name).cloned().unwrap_or_default();
            Ok(ModuleHeader {
                name: Atom::new(module_name.to_string()),
                is_system_module: false,
                versions: vec![],
                imports: imports
                    .into_iter()
                    .map(|name| {
                        ModuleImport::new(
                            Atom::new(name),
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
            })
        }
    }

    fn sources(pairs: &[(&str, &str)]) -> FakeSources {
        FakeSources(Mutex::new(
            pairs.iter().map(|(k, v)| (k.to_string(), v.as_bytes().to_vec())).collect(),
        ))
    }

    #[test]
    fn traces_a_diamond_without_resolving_the_shared_dependency_twice() {
        let src = sources(&[("Root", "root"), ("Left", "left"), ("Right", "right"), ("Shared", "shared")]);
        let mut imports = HashMap::new();
        imports.insert("Root".to_string(), vec!["Left".to_string(), "Right".to_string()]);
        imports.insert("Left".to_string(), vec!["Shared".to_string()]);
        imports.insert("Right".to_string(), vec!["Shared".to_string()]);
        let parser = FakeHeaders(imports);
        let archive = Archive::new();

        let result = trace_targets(&["Root".to_string()], &src, &parser, &archive).unwrap();
        assert_eq!(result.headers.len(), 4);
        let shared_atoms: Vec<&Atom> = result.headers.keys().filter(|a| a.name() == "Shared").collect();
        assert_eq!(shared_atoms.len(), 1);
    }

    #[test]
    fn a_cycle_is_reported_with_its_path() {
        let src = sources(&[("A", "a"), ("B", "b")]);
        let mut imports = HashMap::new();
        imports.insert("A".to_string(), vec!["B".to_string()]);
        imports.insert("B".to_string(), vec!["A".to_string()]);
        let parser = FakeHeaders(imports);
        let archive = Archive::new();

        let err = trace_targets(&["A".to_string()], &src, &parser, &archive).unwrap_err();
        match err {
            TraceError::RecursiveDependency(path) => assert!(path.contains("A -> B -> A")),
            other => panic!("expected RecursiveDependency, got {other:?}"),
        }
    }

    #[test]
    fn missing_source_is_reported_by_name() {
        let src = sources(&[]);
        let parser = FakeHeaders(HashMap::new());
        let archive = Archive::new();
        let err = trace_targets(&["Missing".to_string()], &src, &parser, &archive).unwrap_err();
        assert_eq!(
            err,
            TraceError::SourceUnavailable("Missing".to_string(), "no source for Missing".to_string())
        );
    }

    #[test]
    fn a_second_trace_of_the_same_source_replays_the_header_from_the_archive() {
        let src = sources(&[("A", "a")]);
        let parser = FakeHeaders(HashMap::new());
        let archive = Archive::new();

        trace_targets(&["A".to_string()], &src, &parser, &archive).unwrap();
        // A second trace must not need the parser again; swap in a
        // parser that always fails to prove the archive was used.
        struct AlwaysFails;
        impl HeaderParser for AlwaysFails {
            fn parse_header(&self, _: &str, _: &[u8]) -> Result<ModuleHeader, String> {
                Err("should not be called".to_string())
            }
        }
        let result = trace_targets(&["A".to_string()], &src, &AlwaysFails, &archive).unwrap();
        assert_eq!(result.headers.len(), 1);
    }
}

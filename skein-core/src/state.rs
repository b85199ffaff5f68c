//! `ParserState`: an immutable (token index, client data map) pair.
//!
//! States are the unit the fragment cache memoizes on (§4.C), so
//! equality and hashing must be cheap and must cover both fields
//! exactly as written in §3.

use crate::PhraseId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The reserved client-data key under which the lexically scoped
/// binding map (declaration name → declaring phrase) lives. Macros see
/// the rest of the client data map too, but this binding map is what
/// `withDeclaration` and variable-use resolution read and write.
pub const SCOPE_BINDINGS_KEY: &str = "scope-bindings";

/// The macro-visible scope/client-data map carried by a `ParserState`.
/// Cloning is O(1) (persistent, `Arc`-shared); mutation always
/// produces a new map rather than touching a shared one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClientDataMap {
    entries: Arc<BTreeMap<String, ClientDataValue>>,
}

/// A value stored in the client data map. Kept as a small closed enum
/// rather than an arbitrary dynamic type, consistent with replacing
/// duck-typed reflection with a closed sum type (§9).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientDataValue {
    Bindings(Arc<BTreeMap<String, PhraseId>>),
    Flag(bool),
    Text(String),
}

impl ClientDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ClientDataValue> {
        self.entries.get(key)
    }

    /// Returns a new map with `key` bound to `value`; does not mutate
    /// `self`.
    pub fn with(&self, key: impl Into<String>, value: ClientDataValue) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(key.into(), value);
        Self {
            entries: Arc::new(entries),
        }
    }

    fn bindings(&self) -> Arc<BTreeMap<String, PhraseId>> {
        match self.entries.get(SCOPE_BINDINGS_KEY) {
            Some(ClientDataValue::Bindings(map)) => map.clone(),
            _ => Arc::new(BTreeMap::new()),
        }
    }

    pub fn lookup_declaration(&self, name: &str) -> Option<PhraseId> {
        self.bindings().get(name).copied()
    }

    /// Adds a declaration to scope, returning the updated map. Returns
    /// `None` if `name` is already bound — re-declaration in the same
    /// scope must be detected before insertion (§4.D "Declaration
    /// scope").
    pub fn with_declaration(&self, name: impl Into<String>, declaration: PhraseId) -> Option<Self> {
        let name = name.into();
        let mut bindings = (*self.bindings()).clone();
        if bindings.contains_key(&name) {
            return None;
        }
        bindings.insert(name, declaration);
        Some(self.with(SCOPE_BINDINGS_KEY, ClientDataValue::Bindings(Arc::new(bindings))))
    }

    /// Used by `parse-argument-in-module-scope`: a map with an empty
    /// binding table but otherwise identical to `self`.
    pub fn with_scope_reset(&self) -> Self {
        self.with(
            SCOPE_BINDINGS_KEY,
            ClientDataValue::Bindings(Arc::new(BTreeMap::new())),
        )
    }
}

/// An immutable parser position: a token index plus the macro-visible
/// scope at that point. Two states equal in both fields are
/// interchangeable for memoization purposes (§8 property 2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParserState {
    pub token_index: usize,
    pub client_data: ClientDataMap,
}

impl ParserState {
    pub fn new(token_index: usize) -> Self {
        Self {
            token_index,
            client_data: ClientDataMap::new(),
        }
    }

    pub fn with_token_index(&self, token_index: usize) -> Self {
        Self {
            token_index,
            client_data: self.client_data.clone(),
        }
    }

    pub fn with_client_data(&self, client_data: ClientDataMap) -> Self {
        Self {
            token_index: self.token_index,
            client_data,
        }
    }

    /// Resolves a name against the currently scoped declarations, used
    /// when constructing a `VariableUse` phrase.
    pub fn lookup_declaration(&self, name: &str) -> Option<PhraseId> {
        self.client_data.lookup_declaration(name)
    }

    pub fn with_declaration(&self, name: impl Into<String>, declaration: PhraseId) -> Option<Self> {
        self.client_data
            .with_declaration(name, declaration)
            .map(|client_data| self.with_client_data(client_data))
    }
}

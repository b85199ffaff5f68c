//! `Method`, `Definition`, and `SemanticRestriction` (§3).
//!
//! A method is the thing a bundle names; many bundles (one per
//! importing module's chosen local name) can point at the same
//! method. The method owns its definitions and semantic restrictions;
//! bundle-tree participation is tracked by `skein-parse`, which is the
//! only thing that needs to walk from a method back to its bundles.

use crate::{Atom, PhraseId, YieldType};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Method,
    Macro,
    Forward,
    Abstract,
}

/// One piece of code attached to a method.
#[derive(Debug, Clone)]
pub struct Definition {
    pub kind: DefinitionKind,
    pub argument_types: Vec<YieldType>,
    pub return_type: YieldType,
    /// The module that contributed this definition, used for
    /// ancestor-set visibility filtering (§4.D step 2).
    pub defining_module: Atom,
    /// Body phrase for a macro definition; `None` for forward/abstract
    /// definitions that have no runnable body yet.
    pub body: Option<PhraseId>,
    /// Prefix functions for a macro, indexed by the section number
    /// they run after (§4.C `run-prefix(k)`).
    pub prefix_functions: Vec<PhraseId>,
}

impl Definition {
    pub fn accepts(&self, argument_types: &[YieldType]) -> bool {
        argument_types.len() == self.argument_types.len()
            && argument_types
                .iter()
                .zip(&self.argument_types)
                .all(|(actual, declared)| actual.is_subtype_of(declared))
    }
}

/// A function on argument *types* that narrows a send's return type or
/// rejects the parse (§4.D).
#[derive(Debug, Clone)]
pub struct SemanticRestriction {
    pub argument_types: Vec<YieldType>,
    pub body: PhraseId,
    pub defining_module: Atom,
}

impl SemanticRestriction {
    /// Whether this restriction's declared signature matches the
    /// actual argument types closely enough to apply (§4.D step 4:
    /// "applicable" restrictions).
    pub fn applies_to(&self, argument_types: &[YieldType]) -> bool {
        argument_types.len() == self.argument_types.len()
            && argument_types
                .iter()
                .zip(&self.argument_types)
                .all(|(actual, declared)| actual.is_subtype_of(declared))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MethodError {
    #[error("prefix functions are not allowed on a macro definition sharing a bundle with another macro definition")]
    PrefixFunctionOnPolymorphicMacro,
}

/// Holds every definition and semantic restriction for one method
/// identity (§3). Multiple bundles across modules can name the same
/// `Method`.
#[derive(Debug, Clone, Default)]
pub struct Method {
    definitions: Vec<Definition>,
    restrictions: Vec<SemanticRestriction>,
}

impl Method {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn restrictions(&self) -> &[SemanticRestriction] {
        &self.restrictions
    }

    /// Adds a definition, resolving Open Question 1 (§9) by rejecting
    /// a macro definition with prefix functions when another macro
    /// definition already shares this method.
    pub fn add_definition(&mut self, definition: Definition) -> Result<(), MethodError> {
        if definition.kind == DefinitionKind::Macro && !definition.prefix_functions.is_empty() {
            let already_has_macro = self
                .definitions
                .iter()
                .any(|d| d.kind == DefinitionKind::Macro);
            if already_has_macro {
                return Err(MethodError::PrefixFunctionOnPolymorphicMacro);
            }
        }
        self.definitions.push(definition);
        Ok(())
    }

    pub fn add_restriction(&mut self, restriction: SemanticRestriction) {
        self.restrictions.push(restriction);
    }

    /// Definitions visible from `ancestor_modules` (§4.D step 2) whose
    /// declared argument types accept `argument_types`.
    pub fn applicable_definitions<'a>(
        &'a self,
        argument_types: &[YieldType],
        ancestor_modules: &[Atom],
    ) -> Vec<&'a Definition> {
        self.definitions
            .iter()
            .filter(|d| ancestor_modules.contains(&d.defining_module))
            .filter(|d| d.accepts(argument_types))
            .collect()
    }

    pub fn applicable_restrictions<'a>(
        &'a self,
        argument_types: &[YieldType],
        ancestor_modules: &[Atom],
    ) -> Vec<&'a SemanticRestriction> {
        self.restrictions
            .iter()
            .filter(|r| ancestor_modules.contains(&r.defining_module))
            .filter(|r| r.applies_to(argument_types))
            .collect()
    }

    /// Whether any definition on this method is a macro (used by the
    /// top-level send validation, §4.D, to decide whether to run
    /// macro-invocation instead of regular return-type validation).
    pub fn has_macro_definition(&self) -> bool {
        self.definitions
            .iter()
            .any(|d| d.kind == DefinitionKind::Macro)
    }
}

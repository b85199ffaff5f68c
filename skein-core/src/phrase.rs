//! The phrase arena.
//!
//! Phrases form a graph, not a tree: a declaration's initialization
//! expression and its later variable-uses both need to refer back to
//! it, and macro substitution keeps both the original and replacement
//! phrase alive. Rather than give every `Phrase` variant pointers
//! (§9 "cyclic references in phrase graphs"), phrases live in one
//! arena and refer to each other by index.

use crate::{Atom, YieldType};
use serde::{Deserialize, Serialize};

/// An index into a `PhraseArena`. Cheap to copy, cheap to hash, stable
/// for the arena's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhraseId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclarationKind {
    Argument,
    LocalVar,
    LocalConst,
    ModuleVar,
    ModuleConst,
    Label,
    PrimitiveFailure,
}

/// One node of the phrase graph. Variants mirror §3 exactly; children
/// are `PhraseId`s rather than owned sub-phrases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PhraseKind {
    Literal {
        value_type: YieldType,
    },
    VariableUse {
        declaration: PhraseId,
    },
    Declaration {
        kind: DeclarationKind,
        name: Atom,
        declared_type: YieldType,
        initializer: Option<PhraseId>,
    },
    Assignment {
        target: PhraseId,
        value: PhraseId,
    },
    Block {
        args: Vec<PhraseId>,
        statements: Vec<PhraseId>,
        result_type: YieldType,
        declared_exceptions: Vec<YieldType>,
        primitive: Option<u32>,
        /// Populated only after a child-walk determines which outer
        /// (non-block-local) variables this block captures. `None`
        /// until that walk has run, per §3's invariant.
        needed_outer_vars: Option<Vec<PhraseId>>,
    },
    Send {
        bundle_name: Atom,
        args_list: PhraseId,
        return_type: YieldType,
    },
    SuperCast {
        operand: PhraseId,
        target_type: YieldType,
    },
    List {
        elements: Vec<PhraseId>,
    },
    PermutedList {
        elements: Vec<PhraseId>,
        permutation: Vec<u32>,
    },
    Sequence {
        statements: Vec<PhraseId>,
    },
    FirstOfSequence {
        statements: Vec<PhraseId>,
    },
    Reference {
        declaration: PhraseId,
    },
    ExpressionAsStatement {
        expression: PhraseId,
    },
    MacroSubstitution {
        original: PhraseId,
        replacement: PhraseId,
    },
    Marker {
        label: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phrase {
    pub kind: PhraseKind,
    pub yield_type: YieldType,
}

impl Phrase {
    pub fn new(kind: PhraseKind, yield_type: YieldType) -> Self {
        Self { kind, yield_type }
    }

    /// The first statement of a `Block`'s body, if this phrase is a
    /// block; used to enforce the invariant that a `Label` may only
    /// appear in that position (enforced by callers that insert
    /// statements, not by the arena itself).
    pub fn as_block_statements(&self) -> Option<&[PhraseId]> {
        match &self.kind {
            PhraseKind::Block { statements, .. } => Some(statements),
            _ => None,
        }
    }
}

/// Owns every phrase produced while parsing one module. Phrases never
/// move once inserted, so `PhraseId`s remain valid for the arena's
/// whole lifetime, including across macro substitution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhraseArena {
    phrases: Vec<Phrase>,
}

impl PhraseArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, phrase: Phrase) -> PhraseId {
        let id = PhraseId(self.phrases.len() as u32);
        self.phrases.push(phrase);
        id
    }

    pub fn get(&self, id: PhraseId) -> &Phrase {
        &self.phrases[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: PhraseId) -> &mut Phrase {
        &mut self.phrases[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Inserts a macro substitution phrase recording both the
    /// original send and its replacement, per §9's
    /// `(originalIndex, replacementIndex)` model.
    pub fn substitute_macro(&mut self, original: PhraseId, replacement: PhraseId) -> PhraseId {
        let yield_type = self.get(replacement).yield_type.clone();
        self.insert(Phrase::new(
            PhraseKind::MacroSubstitution {
                original,
                replacement,
            },
            yield_type,
        ))
    }

    /// Strips a `MacroSubstitution` wrapper down to the phrase it
    /// ultimately denotes (the replacement, recursively), matching the
    /// `stripMacro` visitor operation from §9.
    pub fn strip_macro(&self, mut id: PhraseId) -> PhraseId {
        while let PhraseKind::MacroSubstitution { replacement, .. } = &self.get(id).kind {
            id = *replacement;
        }
        id
    }

    /// Visits the direct children of a phrase (the `childrenDo`
    /// visitor operation from §9).
    pub fn children(&self, id: PhraseId) -> Vec<PhraseId> {
        match &self.get(id).kind {
            PhraseKind::Literal { .. } | PhraseKind::Marker { .. } => vec![],
            PhraseKind::VariableUse { declaration } | PhraseKind::Reference { declaration } => {
                vec![*declaration]
            }
            PhraseKind::Declaration { initializer, .. } => initializer.into_iter().collect(),
            PhraseKind::Assignment { target, value } => vec![*target, *value],
            PhraseKind::Block {
                args, statements, ..
            } => args.iter().chain(statements.iter()).copied().collect(),
            PhraseKind::Send { args_list, .. } => vec![*args_list],
            PhraseKind::SuperCast { operand, .. } => vec![*operand],
            PhraseKind::List { elements } | PhraseKind::PermutedList { elements, .. } => {
                elements.clone()
            }
            PhraseKind::Sequence { statements } | PhraseKind::FirstOfSequence { statements } => {
                statements.clone()
            }
            PhraseKind::ExpressionAsStatement { expression } => vec![*expression],
            PhraseKind::MacroSubstitution {
                original,
                replacement,
            } => vec![*original, *replacement],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(arena: &mut PhraseArena, ty: YieldType) -> PhraseId {
        arena.insert(Phrase::new(PhraseKind::Literal { value_type: ty.clone() }, ty))
    }

    #[test]
    fn insert_returns_stable_increasing_ids() {
        let mut arena = PhraseArena::new();
        let a = literal(&mut arena, YieldType::Integer);
        let b = literal(&mut arena, YieldType::Bool);
        assert_eq!(a, PhraseId(0));
        assert_eq!(b, PhraseId(1));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn strip_macro_follows_chain_of_substitutions() {
        let mut arena = PhraseArena::new();
        let original = literal(&mut arena, YieldType::Integer);
        let replacement = literal(&mut arena, YieldType::Bool);
        let sub = arena.substitute_macro(original, replacement);
        assert_eq!(arena.strip_macro(sub), replacement);
        assert_eq!(arena.strip_macro(replacement), replacement);
    }

    #[test]
    fn children_of_send_is_its_args_list() {
        let mut arena = PhraseArena::new();
        let args = arena.insert(Phrase::new(
            PhraseKind::List { elements: vec![] },
            YieldType::Top,
        ));
        let send = arena.insert(Phrase::new(
            PhraseKind::Send {
                bundle_name: Atom::new("_+_"),
                args_list: args,
                return_type: YieldType::Integer,
            },
            YieldType::Integer,
        ));
        assert_eq!(arena.children(send), vec![args]);
    }

    #[test]
    fn block_needed_outer_vars_starts_unpopulated() {
        let mut arena = PhraseArena::new();
        let block = arena.insert(Phrase::new(
            PhraseKind::Block {
                args: vec![],
                statements: vec![],
                result_type: YieldType::Top,
                declared_exceptions: vec![],
                primitive: None,
                needed_outer_vars: None,
            },
            YieldType::Top,
        ));
        match &arena.get(block).kind {
            PhraseKind::Block {
                needed_outer_vars, ..
            } => assert!(needed_outer_vars.is_none()),
            _ => panic!("expected block"),
        }
    }
}

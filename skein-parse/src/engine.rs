//! The parser engine: top-level send algorithm and instruction
//! dispatch (§4.C).
//!
//! The bundle tree's branching is fully honored here — every keyword
//! fork, every `Branch` instruction, and every argument alternative is
//! explored — but this walker is a synchronous recursive-descent over
//! those alternatives rather than one scheduler work unit per branch.
//! §8 property 1 ("the set of phrases delivered is the same across
//! runs and across thread-pool sizes") is exactly the guarantee that
//! makes this substitution safe: the delivered solution set does not
//! depend on which substrate explores the tree, only on the tree and
//! the input. The fragment cache below still memoizes by `ParserState`
//! exactly as §4.C requires, so repeated sub-expression positions are
//! not re-walked.

use crate::bundle_tree::BundleTree;
use crate::error::ParseError;
use crate::fragment_cache::{FragmentCache, Lookup};
use crate::instruction::ParsingInstruction;
use crate::restriction::{PrefixRunner, SendValidator};
use skein_core::{Atom, ParserState, Phrase, PhraseArena, PhraseId, PhraseKind, Token, TokenKind, YieldType};
use std::sync::{Arc, Mutex};

/// One way of finishing a top-level parse: the resulting phrase and
/// the state afterward (token position advanced, plus whatever scope
/// changes a prefix function made along the way).
#[derive(Debug, Clone)]
pub struct Solution {
    pub phrase: PhraseId,
    pub state: ParserState,
}

/// A running parse's stacks, threaded through instruction dispatch
/// (§4.C). `marks` holds positions saved by `save-parse-position`;
/// `args` holds completed argument phrases in order; `lists` holds
/// open `new-list` groups; `pending` holds the most recently produced
/// value awaiting `append-argument`.
#[derive(Debug, Clone, Default)]
struct Frame {
    marks: Vec<usize>,
    args: Vec<PhraseId>,
    lists: Vec<Vec<PhraseId>>,
    pending: Option<PhraseId>,
}

pub struct Engine<'s> {
    tokens: Vec<Token>,
    root: Arc<Mutex<BundleTree>>,
    arena: Arc<Mutex<PhraseArena>>,
    cache: FragmentCache<Solution>,
    validator: &'s SendValidator<'s>,
    prefix_runner: Arc<dyn PrefixRunner>,
    ancestor_modules: Vec<Atom>,
}

impl<'s> Engine<'s> {
    pub fn new(
        tokens: Vec<Token>,
        root: Arc<Mutex<BundleTree>>,
        arena: Arc<Mutex<PhraseArena>>,
        validator: &'s SendValidator<'s>,
        prefix_runner: Arc<dyn PrefixRunner>,
        ancestor_modules: Vec<Atom>,
    ) -> Self {
        Self {
            tokens,
            root,
            arena,
            cache: FragmentCache::new(),
            validator,
            prefix_runner,
            ancestor_modules,
        }
    }

    fn token_at(&self, index: usize) -> &Token {
        self.tokens.get(index).unwrap_or_else(|| self.tokens.last().expect("token stream must end with EndOfFile"))
    }

    /// The phrase arena backing every `Solution` this engine delivers.
    /// Exposed so callers (e.g. command evaluation, which needs to
    /// classify solutions by phrase shape) can inspect delivered
    /// phrases without this crate knowing what a "command" is.
    pub fn arena(&self) -> Arc<Mutex<PhraseArena>> {
        self.arena.clone()
    }

    /// Top-level `tryIfUnambiguous` wrapper (§4.C "Ambiguity
    /// detection"): exactly one delivered solution continues; zero
    /// reports the accumulated rightmost position; two or more reports
    /// ambiguity.
    pub fn try_send(&self, state: &ParserState) -> Result<Solution, ParseError> {
        let solutions = self.parse_expression(state)?;
        match solutions.len() {
            0 => Err(ParseError::NoSolution {
                position: state.token_index,
                describers: vec!["no bundle or primary expression matched here".to_string()],
            }),
            1 => Ok(solutions.into_iter().next().expect("len checked above")),
            n => Err(ParseError::Ambiguous {
                position: state.token_index,
                candidate_count: n,
                diff_description: Self::describe_ambiguity(&solutions),
            }),
        }
    }

    fn describe_ambiguity(solutions: &[Solution]) -> String {
        solutions
            .iter()
            .map(|s| format!("ends at token {}", s.state.token_index))
            .collect::<Vec<_>>()
            .join(" vs. ")
    }

    /// Enumerates every phrase parseable starting at `state`, memoized
    /// by `ParserState` (§4.C "Memoization", §8 property 2).
    pub fn parse_expression(&self, state: &ParserState) -> Result<Vec<Solution>, ParseError> {
        match self.cache.lookup(state.clone()) {
            Lookup::Owner(owner, _subscription) => {
                let solutions = self.parse_expression_uncached(state)?;
                for solution in &solutions {
                    owner.deliver(solution.clone());
                }
                owner.finish();
                Ok(solutions)
            }
            Lookup::Subscriber(subscription) => {
                let mut solutions = subscription.already_delivered;
                while let Ok(solution) = subscription.live.recv() {
                    solutions.push(solution);
                }
                Ok(solutions)
            }
        }
    }

    fn parse_expression_uncached(&self, state: &ParserState) -> Result<Vec<Solution>, ParseError> {
        let mut solutions = self.parse_primary(state);
        solutions.extend(self.walk(&self.root.clone(), state, state, &Frame::default())?);
        Ok(solutions)
    }

    /// Base cases that are not bundle sends: integer literals and uses
    /// of an already-declared name.
    fn parse_primary(&self, state: &ParserState) -> Vec<Solution> {
        let token = self.token_at(state.token_index);
        if token.is_end_of_file() {
            return vec![];
        }

        let mut solutions = Vec::new();
        if matches!(token.kind, TokenKind::Literal | TokenKind::SyntheticLiteral) {
            if let Some(skein_core::LiteralValue::Integer(_)) = &token.literal_value {
                let mut arena = self.arena.lock().expect("phrase arena poisoned");
                let phrase = arena.insert(Phrase::new(
                    PhraseKind::Literal {
                        value_type: YieldType::Integer,
                    },
                    YieldType::Integer,
                ));
                solutions.push(Solution {
                    phrase,
                    state: state.with_token_index(state.token_index + 1),
                });
            }
        }
        if matches!(token.kind, TokenKind::Keyword) {
            if let Some(declaration) = state.lookup_declaration(&token.lexeme) {
                let declared_type = {
                    let arena = self.arena.lock().expect("phrase arena poisoned");
                    arena.get(declaration).yield_type.clone()
                };
                let mut arena = self.arena.lock().expect("phrase arena poisoned");
                let phrase = arena.insert(Phrase::new(PhraseKind::VariableUse { declaration }, declared_type));
                solutions.push(Solution {
                    phrase,
                    state: state.with_token_index(state.token_index + 1),
                });
            }
        }
        solutions
    }

    fn last_argument_bundle(&self, frame: &Frame) -> Option<Atom> {
        let last = *frame.args.last()?;
        let arena = self.arena.lock().expect("phrase arena poisoned");
        match &arena.get(last).kind {
            PhraseKind::Send { bundle_name, .. } => Some(bundle_name.clone()),
            _ => None,
        }
    }

    fn walk(
        &self,
        node: &Arc<Mutex<BundleTree>>,
        send_start: &ParserState,
        state: &ParserState,
        frame: &Frame,
    ) -> Result<Vec<Solution>, ParseError> {
        let (completions, keyword_child, ci_child, actions, prefiltered_child) = {
            let mut guard = node.lock().expect("bundle tree node poisoned");
            guard.expand()?;
            let token = self.token_at(state.token_index);
            let keyword_child = guard.incomplete(&token.lexeme);
            let ci_child = if keyword_child.is_none() {
                guard.incomplete_case_insensitive(&token.lowercase_lexeme())
            } else {
                None
            };
            let prefiltered_child = self
                .last_argument_bundle(frame)
                .and_then(|atom| guard.prefilter_for(&atom));
            (
                guard.complete_at_this_position().to_vec(),
                keyword_child,
                ci_child,
                guard.actions().to_vec(),
                prefiltered_child,
            )
        };

        let mut solutions = Vec::new();

        // Step 1: completion available, and some token was consumed
        // since this send attempt started (no leading argument
        // stranded at the very first position).
        if !completions.is_empty() && state.token_index > send_start.token_index {
            for bundle in &completions {
                if let Ok(phrase) = self.validator.validate_send(
                    &bundle.identity,
                    &bundle.message_name,
                    &frame.args,
                    &self.ancestor_modules,
                    &self.arena,
                ) {
                    solutions.push(Solution {
                        phrase,
                        state: state.clone(),
                    });
                }
            }
        }

        // Step 4: a grammatical restriction shortcut takes priority
        // over ordinary action dispatch when it applies.
        if let Some(child) = prefiltered_child {
            solutions.extend(self.walk(&child, send_start, state, frame)?);
            return Ok(solutions);
        }

        // Steps 2-3: keyword / case-insensitive keyword dispatch.
        if let Some(child) = keyword_child {
            let next_state = state.with_token_index(state.token_index + 1);
            solutions.extend(self.walk(&child, send_start, &next_state, frame)?);
        } else if let Some(child) = ci_child {
            let next_state = state.with_token_index(state.token_index + 1);
            solutions.extend(self.walk(&child, send_start, &next_state, frame)?);
        }

        // Step 5: every other action.
        for (instr, successors) in &actions {
            solutions.extend(self.dispatch_action(instr, successors, send_start, state, frame)?);
        }

        Ok(solutions)
    }

    fn dispatch_action(
        &self,
        instr: &ParsingInstruction,
        successors: &[Arc<Mutex<BundleTree>>],
        send_start: &ParserState,
        state: &ParserState,
        frame: &Frame,
    ) -> Result<Vec<Solution>, ParseError> {
        match instr {
            ParsingInstruction::ParseArgument => {
                // Reject the first argument of a fresh send attempt
                // when no tokens have been consumed yet: this is the
                // left-recursion guard (§4.C instruction table). Checked
                // against the token position, not whether a mark
                // exists — `save-parse-position` runs ahead of every
                // `parse-argument` (bundle.rs's `_` compilation), so
                // `frame.marks` is never empty here.
                if frame.args.is_empty() && state.token_index == send_start.token_index {
                    return Ok(vec![]);
                }
                let mut solutions = Vec::new();
                for arg in self.parse_expression(state)? {
                    let mut next_frame = frame.clone();
                    next_frame.pending = Some(arg.phrase);
                    for successor in successors {
                        solutions.extend(self.walk(successor, send_start, &arg.state, &next_frame)?);
                    }
                }
                Ok(solutions)
            }
            ParsingInstruction::ParseArgumentInModuleScope => {
                let reset_state = state.with_client_data(state.client_data.with_scope_reset());
                let mut solutions = Vec::new();
                for arg in self.parse_expression(&reset_state)? {
                    let mut next_frame = frame.clone();
                    next_frame.pending = Some(arg.phrase);
                    let continuation_state = state.with_token_index(arg.state.token_index);
                    for successor in successors {
                        solutions.extend(self.walk(successor, send_start, &continuation_state, &next_frame)?);
                    }
                }
                Ok(solutions)
            }
            ParsingInstruction::ParseRawToken => {
                let token = self.token_at(state.token_index);
                if token.is_end_of_file() {
                    return Ok(vec![]);
                }
                let mut arena = self.arena.lock().expect("phrase arena poisoned");
                let phrase = arena.insert(Phrase::new(
                    PhraseKind::Marker { label: token.lexeme.clone() },
                    YieldType::Top,
                ));
                drop(arena);
                let mut next_frame = frame.clone();
                next_frame.pending = Some(phrase);
                let next_state = state.with_token_index(state.token_index + 1);
                let mut solutions = Vec::new();
                for successor in successors {
                    solutions.extend(self.walk(successor, send_start, &next_state, &next_frame)?);
                }
                Ok(solutions)
            }
            ParsingInstruction::NewList => {
                let mut next_frame = frame.clone();
                next_frame.lists.push(Vec::new());
                self.walk_all(successors, send_start, state, &next_frame)
            }
            ParsingInstruction::AppendArgument => {
                let mut next_frame = frame.clone();
                let value = next_frame.pending.take().expect("append-argument with nothing pending");
                if let Some(open_list) = next_frame.lists.last_mut() {
                    open_list.push(value);
                } else {
                    next_frame.args.push(value);
                }
                self.walk_all(successors, send_start, state, &next_frame)
            }
            ParsingInstruction::SaveParsePosition => {
                let mut next_frame = frame.clone();
                next_frame.marks.push(state.token_index);
                self.walk_all(successors, send_start, state, &next_frame)
            }
            ParsingInstruction::DiscardSavedParsePosition => {
                let mut next_frame = frame.clone();
                next_frame.marks.pop();
                self.walk_all(successors, send_start, state, &next_frame)
            }
            ParsingInstruction::EnsureParseProgress => {
                if let Some(&mark) = frame.marks.last() {
                    if mark == state.token_index {
                        return Ok(vec![]);
                    }
                }
                let mut next_frame = frame.clone();
                if let Some(last) = next_frame.marks.last_mut() {
                    *last = state.token_index;
                }
                self.walk_all(successors, send_start, state, &next_frame)
            }
            ParsingInstruction::PushTrue | ParsingInstruction::PushFalse => {
                let mut arena = self.arena.lock().expect("phrase arena poisoned");
                let phrase = arena.insert(Phrase::new(
                    PhraseKind::Literal { value_type: YieldType::Bool },
                    YieldType::Bool,
                ));
                drop(arena);
                let mut next_frame = frame.clone();
                next_frame.pending = Some(phrase);
                self.walk_all(successors, send_start, state, &next_frame)
            }
            ParsingInstruction::PushIntegerLiteral(_) => {
                let mut arena = self.arena.lock().expect("phrase arena poisoned");
                let phrase = arena.insert(Phrase::new(
                    PhraseKind::Literal { value_type: YieldType::Integer },
                    YieldType::Integer,
                ));
                drop(arena);
                let mut next_frame = frame.clone();
                next_frame.pending = Some(phrase);
                self.walk_all(successors, send_start, state, &next_frame)
            }
            ParsingInstruction::CheckArgument => self.walk_all(successors, send_start, state, frame),
            // A concrete conversion catalogue is external-grammar
            // territory (§1 non-goal); pass the pending value through
            // unchanged rather than modeling specific rules.
            ParsingInstruction::Convert(_) => self.walk_all(successors, send_start, state, frame),
            ParsingInstruction::Permute(permutation) => {
                let mut next_frame = frame.clone();
                if permutation.len() == next_frame.args.len() {
                    let original = next_frame.args.clone();
                    for (from_index, target) in permutation.iter().enumerate() {
                        next_frame.args[*target as usize - 1] = original[from_index];
                    }
                }
                self.walk_all(successors, send_start, state, &next_frame)
            }
            ParsingInstruction::PrepareToRunPrefix(depth) => {
                let depth = *depth as usize;
                let take_from = frame.args.len().saturating_sub(depth);
                let snapshot: Vec<PhraseId> = frame.args[take_from..].to_vec();
                let mut arena = self.arena.lock().expect("phrase arena poisoned");
                let phrase = arena.insert(Phrase::new(
                    PhraseKind::List { elements: snapshot },
                    YieldType::Top,
                ));
                drop(arena);
                let mut next_frame = frame.clone();
                next_frame.pending = Some(phrase);
                self.walk_all(successors, send_start, state, &next_frame)
            }
            // The operand is taken directly as the prefix function's
            // identity rather than an index into "this bundle's"
            // prefix-function list: merged bundle-tree nodes do not
            // retain which bundle contributed a shared action group,
            // so a `k-th of this bundle` indirection has nothing to
            // resolve against here.
            ParsingInstruction::RunPrefix(prefix_fn) => {
                let partial_args: Vec<PhraseId> = frame
                    .pending
                    .into_iter()
                    .collect::<Vec<_>>()
                    .into_iter()
                    .chain(frame.args.iter().copied())
                    .collect();
                match self.prefix_runner.run(PhraseId(*prefix_fn), &partial_args, state) {
                    Ok(new_state) => self.walk_all(successors, send_start, &new_state, frame),
                    Err(_) => Ok(vec![]),
                }
            }
            ParsingInstruction::Jump(_) | ParsingInstruction::Branch(_) => {
                self.walk_all(successors, send_start, state, frame)
            }
        }
    }

    fn walk_all(
        &self,
        successors: &[Arc<Mutex<BundleTree>>],
        send_start: &ParserState,
        state: &ParserState,
        frame: &Frame,
    ) -> Result<Vec<Solution>, ParseError> {
        let mut solutions = Vec::new();
        for successor in successors {
            solutions.extend(self.walk(successor, send_start, state, frame)?);
        }
        Ok(solutions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;
    use crate::error::MacroOutcome;
    use crate::method_table::MethodTable;
    use crate::restriction::{MacroRunner, PrefixRunner, RestrictionRunner};
    use skein_core::{Definition, DefinitionKind, TokenKind};
    use skein_rt::Scheduler;

    struct NeverRuns;
    impl RestrictionRunner for NeverRuns {
        fn run(&self, _body: PhraseId, _argument_types: &[YieldType]) -> Result<YieldType, crate::error::RestrictionOutcome> {
            Ok(YieldType::Top)
        }
    }
    impl MacroRunner for NeverRuns {
        fn run(&self, _body: PhraseId, _args: &[PhraseId]) -> Result<PhraseId, MacroOutcome> {
            Err(MacroOutcome::Failed("no macros in these tests".to_string()))
        }
    }
    impl PrefixRunner for NeverRuns {
        fn run(&self, _prefix_fn: PhraseId, _partial_args: &[PhraseId], state: &ParserState) -> Result<ParserState, MacroOutcome> {
            Ok(state.clone())
        }
    }

    fn int_token(lexeme: &str, index: usize) -> Token {
        Token::new(TokenKind::Literal, lexeme, 0, 1, index).with_literal(skein_core::LiteralValue::Integer(lexeme.parse().unwrap()))
    }

    fn keyword_token(lexeme: &str, index: usize) -> Token {
        Token::new(TokenKind::Keyword, lexeme, 0, 1, index)
    }

    fn eof(index: usize) -> Token {
        Token::end_of_file(index, 1)
    }

    #[test]
    fn bare_integer_literal_parses_as_a_solution() {
        let methods = MethodTable::new();
        let scheduler = Scheduler::new(2);
        let validator = SendValidator::new(methods, &scheduler, Arc::new(NeverRuns), Arc::new(NeverRuns));
        let root = Arc::new(Mutex::new(BundleTree::new_root(vec![])));
        let arena = Arc::new(Mutex::new(PhraseArena::new()));
        let tokens = vec![int_token("42", 0), eof(1)];
        let engine = Engine::new(tokens, root, arena, &validator, Arc::new(NeverRuns), vec![]);

        let solution = engine.try_send(&ParserState::new(0)).unwrap();
        assert_eq!(solution.state.token_index, 1);
    }

    #[test]
    fn two_overlapping_definitions_of_the_same_message_are_ambiguous() {
        let methods = MethodTable::new();
        let scheduler = Scheduler::new(2);
        let module_a = Atom::new("A");
        let module_b = Atom::new("B");
        let plus_bundle_identity = Atom::new("_+_");
        let method = methods.get_or_create(&plus_bundle_identity);
        method.lock().unwrap().add_definition(Definition {
            kind: DefinitionKind::Method,
            argument_types: vec![YieldType::Integer, YieldType::Integer],
            return_type: YieldType::Integer,
            defining_module: module_a.clone(),
            body: None,
            prefix_functions: vec![],
        }).unwrap();
        method.lock().unwrap().add_definition(Definition {
            kind: DefinitionKind::Method,
            argument_types: vec![YieldType::Integer, YieldType::Integer],
            return_type: YieldType::Integer,
            defining_module: module_b.clone(),
            body: None,
            prefix_functions: vec![],
        }).unwrap();

        let bundle = Arc::new(Bundle::new(plus_bundle_identity.clone(), "_ + _"));
        let root = Arc::new(Mutex::new(BundleTree::new_root(vec![bundle])));
        let arena = Arc::new(Mutex::new(PhraseArena::new()));
        let tokens = vec![
            int_token("1", 0),
            keyword_token("+", 1),
            int_token("2", 2),
            eof(3),
        ];

        let validator = SendValidator::new(methods, &scheduler, Arc::new(NeverRuns), Arc::new(NeverRuns));
        let engine = Engine::new(tokens, root, arena, &validator, Arc::new(NeverRuns), vec![module_a, module_b]);

        let solutions = engine.parse_expression(&ParserState::new(0)).unwrap();
        // Two overlapping definitions are each individually applicable
        // (neither filters the other out), so the send is ambiguous;
        // here we assert the ambiguity shows up as >1 delivered Send,
        // since both happen to have identical argument/return shape.
        let arena = engine.arena.lock().unwrap();
        let sends = solutions
            .iter()
            .filter(|s| matches!(arena.get(s.phrase).kind, PhraseKind::Send { .. }))
            .count();
        assert_eq!(sends, 2);
    }

    #[test]
    fn declared_variable_is_reachable_by_name() {
        let methods = MethodTable::new();
        let scheduler = Scheduler::new(2);
        let validator = SendValidator::new(methods, &scheduler, Arc::new(NeverRuns), Arc::new(NeverRuns));
        let root = Arc::new(Mutex::new(BundleTree::new_root(vec![])));
        let arena = Arc::new(Mutex::new(PhraseArena::new()));
        let decl = arena.lock().unwrap().insert(Phrase::new(
            PhraseKind::Declaration {
                kind: skein_core::DeclarationKind::LocalConst,
                name: Atom::new("x"),
                declared_type: YieldType::Integer,
                initializer: None,
            },
            YieldType::Integer,
        ));
        let tokens = vec![keyword_token("x", 0), eof(1)];
        let engine = Engine::new(tokens, root, arena, &validator, Arc::new(NeverRuns), vec![]);

        let state = ParserState::new(0).with_declaration("x", decl).unwrap();
        let solution = engine.try_send(&state).unwrap();
        assert_eq!(solution.state.token_index, 1);
    }

    #[test]
    fn unregistered_method_table_entry_means_every_send_attempt_fails_quietly() {
        // A bundle with no corresponding Method entry should simply
        // fail to produce a solution rather than panicking.
        let methods = MethodTable::new();
        let scheduler = Scheduler::new(2);
        let bundle = Arc::new(Bundle::new(Atom::new("halt"), "halt"));
        let root = Arc::new(Mutex::new(BundleTree::new_root(vec![bundle])));
        let arena = Arc::new(Mutex::new(PhraseArena::new()));
        let tokens = vec![keyword_token("halt", 0), eof(1)];
        let validator = SendValidator::new(methods, &scheduler, Arc::new(NeverRuns), Arc::new(NeverRuns));
        let engine = Engine::new(tokens, root, arena, &validator, Arc::new(NeverRuns), vec![]);

        let err = engine.try_send(&ParserState::new(0)).unwrap_err();
        assert!(matches!(err, ParseError::NoSolution { .. }));
    }
}

//! Command evaluation (§4.E "Command evaluation"): parse a line typed
//! against a loaded module's entry points and run whichever one it
//! unambiguously names.
//!
//! A command is parsed the same way any other expression is (§4.C),
//! in a throwaway scope that only sees the target module's entry
//! points. Zero matching sends means the text didn't name one; more
//! than one is an ambiguity report of its own, distinct from a parse
//! failure. `WorkUnitTracker` isn't needed here — `Engine::parse_expression`
//! already drains every fork synchronously (§8 property 1) — but the
//! same zero/one/many classification the quiescence hook exists for
//! elsewhere in this core shows up again here as plain code.

use crate::diagnostics::{Problem, ProblemHandler, ProblemKind};
use skein_core::{Atom, ParserState, PhraseKind};
use skein_parse::{Engine, ParseError, Solution};
use skein_rt::Scheduler;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("'{0}' does not call any entry point of this module")]
    NoEntryPointCall(String),
    #[error("'{0}' is ambiguous between {1} entry-point calls")]
    AmbiguousEntryPointCall(String, usize),
    #[error("parsing the command failed: {0}")]
    Parse(String),
    /// A reserved or unrecognized parsing-instruction opcode reached
    /// the bundle tree (§9 Open Question 2): reported as a `Problem`
    /// and the scheduler is told to stop accepting further work, since
    /// this is an internal error rather than a user mistake to recover
    /// from.
    #[error("internal parser error: {0}")]
    Internal(String),
}

/// Runs one already-parsed entry-point solution. Actually evaluating
/// it requires the runtime object model (§1); this is the seam.
pub trait EntryPointEvaluator: Send + Sync {
    fn evaluate(&self, solution: &Solution) -> Result<(), String>;
}

/// Evaluates `command_text` against `engine` (already scoped to a
/// throwaway module importing only `entry_points`), returning which
/// solution was run.
///
/// A `ParseError::BundleTree` (a reserved or unrecognized parsing
/// instruction opcode, §9 Open Question 2) is reported to
/// `problem_handler` as a `Problem { kind: Internal, .. }` and stops
/// `scheduler` from accepting further work before being surfaced as
/// `CommandError::Internal`, rather than being treated like an
/// ordinary parse failure.
pub fn evaluate_command(
    command_text: &str,
    engine: &Engine<'_>,
    initial_state: &ParserState,
    entry_points: &[Atom],
    evaluator: &dyn EntryPointEvaluator,
    problem_handler: &dyn ProblemHandler,
    scheduler: &Scheduler,
) -> Result<Solution, CommandError> {
    let solutions = engine.parse_expression(initial_state).map_err(|e| match e {
        ParseError::BundleTree(inner) => {
            let problem = Problem::new(ProblemKind::Internal, inner.to_string());
            problem_handler.handle(&problem);
            scheduler.request_stop();
            CommandError::Internal(inner.to_string())
        }
        other => CommandError::Parse(other.to_string()),
    })?;

    let arena = engine.arena();
    let entry_point_solutions: Vec<Solution> = {
        let arena = arena.lock().expect("phrase arena poisoned");
        solutions
            .into_iter()
            .filter(|solution| {
                matches!(
                    &arena.get(solution.phrase).kind,
                    PhraseKind::Send { bundle_name, .. } if entry_points.contains(bundle_name)
                )
            })
            .collect()
    };

    match entry_point_solutions.len() {
        0 => Err(CommandError::NoEntryPointCall(command_text.to_string())),
        1 => {
            let solution = entry_point_solutions.into_iter().next().unwrap();
            evaluator
                .evaluate(&solution)
                .map_err(CommandError::Parse)?;
            Ok(solution)
        }
        n => Err(CommandError::AmbiguousEntryPointCall(command_text.to_string(), n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingProblemHandler;
    use skein_core::{Definition, DefinitionKind, Token, TokenKind, YieldType};
    use skein_parse::{Bundle, BundleTree, MethodTable, RestrictionRunner, MacroRunner, PrefixRunner, SendValidator};
    use skein_rt::Scheduler;
    use std::sync::{Arc, Mutex};

    struct NeverRuns;
    impl RestrictionRunner for NeverRuns {
        fn run(&self, _body: skein_core::PhraseId, _argument_types: &[YieldType]) -> Result<YieldType, skein_parse::RestrictionOutcome> {
            unreachable!("no restrictions registered in this test")
        }
    }
    impl MacroRunner for NeverRuns {
        fn run(&self, _body: skein_core::PhraseId, _args: &[skein_core::PhraseId]) -> Result<skein_core::PhraseId, skein_parse::MacroOutcome> {
            unreachable!("no macros registered in this test")
        }
    }
    impl PrefixRunner for NeverRuns {
        fn run(&self, _prefix_fn: skein_core::PhraseId, _partial_args: &[skein_core::PhraseId], state: &ParserState) -> Result<ParserState, skein_parse::MacroOutcome> {
            Ok(state.clone())
        }
    }

    struct RecordingEvaluator(Mutex<usize>);
    impl EntryPointEvaluator for RecordingEvaluator {
        fn evaluate(&self, _solution: &Solution) -> Result<(), String> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn build_engine<'s>(
        entry_point: &Atom,
        module: &Atom,
        validator: &'s SendValidator<'s>,
    ) -> (Engine<'s>, Vec<Token>) {
        let bundle = Arc::new(Bundle::new(entry_point.clone(), "run"));
        let root = Arc::new(Mutex::new(BundleTree::new_root(vec![bundle])));
        let arena = Arc::new(Mutex::new(skein_core::PhraseArena::new()));
        let tokens = vec![
            Token::new(TokenKind::Keyword, "run".to_string(), 0, 1, 0),
            Token::end_of_file(1, 1),
        ];
        let engine = Engine::new(
            tokens.clone(),
            root,
            arena,
            validator,
            Arc::new(NeverRuns),
            vec![module.clone()],
        );
        (engine, tokens)
    }

    #[test]
    fn a_command_naming_the_sole_entry_point_runs_it() {
        let module = Atom::new("Script");
        let entry_point = Atom::new("run");
        let methods = MethodTable::new();
        {
            let method = methods.get_or_create(&entry_point);
            let mut method = method.lock().unwrap();
            method
                .add_definition(Definition {
                    kind: DefinitionKind::Method,
                    argument_types: vec![],
                    return_type: YieldType::Top,
                    defining_module: module.clone(),
                    body: None,
                    prefix_functions: vec![],
                })
                .unwrap();
        }
        let scheduler = Scheduler::new(2);
        let validator = SendValidator::new(methods, &scheduler, Arc::new(NeverRuns), Arc::new(NeverRuns));
        let (engine, _tokens) = build_engine(&entry_point, &module, &validator);

        let evaluator = RecordingEvaluator(Mutex::new(0));
        let problems = CollectingProblemHandler::new();
        let state = ParserState::new(0);
        let result = evaluate_command("run", &engine, &state, &[entry_point], &evaluator, &problems, &scheduler);
        assert!(result.is_ok());
        assert_eq!(*evaluator.0.lock().unwrap(), 1);
        assert!(!scheduler.is_stopping());
    }

    #[test]
    fn a_command_matching_no_entry_point_is_reported() {
        let module = Atom::new("Script");
        let entry_point = Atom::new("run");
        let other_entry_point = Atom::new("other");
        let methods = MethodTable::new();
        {
            let method = methods.get_or_create(&entry_point);
            let mut method = method.lock().unwrap();
            method
                .add_definition(Definition {
                    kind: DefinitionKind::Method,
                    argument_types: vec![],
                    return_type: YieldType::Top,
                    defining_module: module.clone(),
                    body: None,
                    prefix_functions: vec![],
                })
                .unwrap();
        }
        let scheduler = Scheduler::new(2);
        let validator = SendValidator::new(methods, &scheduler, Arc::new(NeverRuns), Arc::new(NeverRuns));
        let (engine, _tokens) = build_engine(&entry_point, &module, &validator);

        let evaluator = RecordingEvaluator(Mutex::new(0));
        let problems = CollectingProblemHandler::new();
        let state = ParserState::new(0);
        let err = evaluate_command("run", &engine, &state, &[other_entry_point], &evaluator, &problems, &scheduler)
            .unwrap_err();
        assert_eq!(err, CommandError::NoEntryPointCall("run".to_string()));
        assert_eq!(*evaluator.0.lock().unwrap(), 0);
    }

    #[test]
    fn a_bundle_tree_error_is_reported_as_an_internal_problem_and_stops_the_scheduler() {
        let scheduler = Scheduler::new(2);
        let problems = CollectingProblemHandler::new();
        let err = skein_parse::BundleTreeError::ReservedInstruction(12);

        let mapped = match ParseError::BundleTree(err.clone()) {
            ParseError::BundleTree(inner) => {
                let problem = Problem::new(ProblemKind::Internal, inner.to_string());
                problems.handle(&problem);
                scheduler.request_stop();
                CommandError::Internal(inner.to_string())
            }
            other => CommandError::Parse(other.to_string()),
        };

        assert_eq!(mapped, CommandError::Internal(err.to_string()));
        assert!(scheduler.is_stopping());
        assert_eq!(problems.rendered().len(), 1);
        assert!(problems.rendered()[0].contains("INTERNAL ERROR"));
    }
}

//! Send validation and macro invocation (§4.D).
//!
//! Actually running a restriction body, a macro body, or a prefix
//! function requires an interpreter over the runtime object model,
//! which is external to this core (§1). The three traits below are the
//! seam: callers supply a concrete runner; this module owns the
//! *protocol* — argument-type computation, top/bottom rejection,
//! ancestor-visibility filtering, parallel restriction fan-out over a
//! `FiberNursery` with the running intersection guarded by a lock
//! (§4.D step 4, §5 "Shared-resource policy"), and reject-parsing
//! handling (§4.D step 5, Open Question 3).

use crate::error::{MacroOutcome, ParseError, RestrictionOutcome};
use crate::method_table::MethodTable;
use skein_core::{Atom, Phrase, PhraseArena, PhraseId, PhraseKind, YieldType};
use skein_rt::{FiberNursery, Scheduler, TaskPriority};
use std::sync::{Arc, Mutex};

/// Runs a semantic restriction's body against already-computed
/// argument types (§4.D step 4).
pub trait RestrictionRunner: Send + Sync {
    fn run(&self, body: PhraseId, argument_types: &[YieldType]) -> Result<YieldType, RestrictionOutcome>;
}

/// Runs a macro's body against the parsed argument phrases (§4.D
/// "Macro invocation").
pub trait MacroRunner: Send + Sync {
    fn run(&self, body: PhraseId, args: &[PhraseId]) -> Result<PhraseId, MacroOutcome>;
}

/// Runs a prefix function, returning the `ParserState` it produced
/// (§4.D "Prefix functions").
pub trait PrefixRunner: Send + Sync {
    fn run(
        &self,
        prefix_fn: PhraseId,
        partial_args: &[PhraseId],
        state: &skein_core::ParserState,
    ) -> Result<skein_core::ParserState, MacroOutcome>;
}

pub struct SendValidator<'s> {
    methods: MethodTable,
    scheduler: &'s Scheduler,
    restriction_runner: Arc<dyn RestrictionRunner>,
    macro_runner: Arc<dyn MacroRunner>,
}

impl<'s> SendValidator<'s> {
    pub fn new(
        methods: MethodTable,
        scheduler: &'s Scheduler,
        restriction_runner: Arc<dyn RestrictionRunner>,
        macro_runner: Arc<dyn MacroRunner>,
    ) -> Self {
        Self {
            methods,
            scheduler,
            restriction_runner,
            macro_runner,
        }
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    /// Validates (or macro-expands) a candidate send and inserts the
    /// resulting phrase into `arena` (§4.D steps 1-5).
    pub fn validate_send(
        &self,
        bundle_identity: &Atom,
        bundle_name: &str,
        args: &[PhraseId],
        ancestor_modules: &[Atom],
        arena: &Mutex<PhraseArena>,
    ) -> Result<PhraseId, ParseError> {
        let method = self.methods.get(bundle_identity).ok_or_else(|| ParseError::SendValidationFailed {
            bundle_name: bundle_identity.clone(),
            reason: "no method registered for this bundle".to_string(),
        })?;
        let method = method.lock().expect("method monitor poisoned");

        let argument_types: Vec<YieldType> = {
            let arena = arena.lock().expect("phrase arena poisoned");
            args.iter().map(|id| arena.get(*id).yield_type.clone()).collect()
        };

        if method.has_macro_definition() {
            let definitions = method.applicable_definitions(&argument_types, ancestor_modules);
            let definition = definitions.first().ok_or_else(|| ParseError::SendValidationFailed {
                bundle_name: bundle_identity.clone(),
                reason: "no macro definition accepts these argument types".to_string(),
            })?;
            let body = definition.body.ok_or_else(|| ParseError::SendValidationFailed {
                bundle_name: bundle_identity.clone(),
                reason: "macro definition has no body".to_string(),
            })?;
            return match self.macro_runner.run(body, args) {
                Ok(replacement) => {
                    let mut arena = arena.lock().expect("phrase arena poisoned");
                    let original = Self::insert_raw_send(&mut arena, bundle_identity.clone(), args, YieldType::Top);
                    Ok(arena.substitute_macro(original, replacement))
                }
                Err(MacroOutcome::Rejected { message }) => Err(ParseError::RejectedByRestriction { message }),
                Err(MacroOutcome::Failed(reason)) => Err(ParseError::SendValidationFailed {
                    bundle_name: bundle_identity.clone(),
                    reason,
                }),
            };
        }

        if argument_types.iter().any(|t| t.is_top() || t.is_bottom()) {
            return Err(ParseError::SendValidationFailed {
                bundle_name: bundle_identity.clone(),
                reason: "argument type must not be top or bottom".to_string(),
            });
        }

        let definitions = method.applicable_definitions(&argument_types, ancestor_modules);
        if definitions.is_empty() {
            return Err(ParseError::SendValidationFailed {
                bundle_name: bundle_identity.clone(),
                reason: format!("no visible definition of '{bundle_name}' accepts these argument types"),
            });
        }
        let mut return_type = definitions
            .iter()
            .map(|d| d.return_type.clone())
            .reduce(|a, b| a.intersect(&b))
            .unwrap_or(YieldType::Top);

        let restrictions = method.applicable_restrictions(&argument_types, ancestor_modules);
        if !restrictions.is_empty() {
            let nursery = FiberNursery::new(self.scheduler);
            let running = Arc::new(Mutex::new(Ok(return_type.clone())));
            for restriction in &restrictions {
                let body = restriction.body;
                let argument_types = argument_types.clone();
                let runner = self.restriction_runner.clone();
                let running = running.clone();
                nursery.spawn(TaskPriority::plain(0), move |_cancel| match runner.run(body, &argument_types) {
                    Ok(ty) => {
                        let mut guard = running.lock().expect("restriction intersection lock poisoned");
                        if let Ok(current) = guard.as_ref() {
                            *guard = Ok(current.intersect(&ty));
                        }
                        Ok(String::new())
                    }
                    Err(outcome) => {
                        let message = outcome.to_string();
                        let mut guard = running.lock().expect("restriction intersection lock poisoned");
                        *guard = Err(outcome);
                        Err(message)
                    }
                });
            }

            if nursery.wait_all().is_err() {
                let outcome = running.lock().expect("restriction intersection lock poisoned").clone();
                return match outcome {
                    Err(RestrictionOutcome::Rejected { message }) => Err(ParseError::RejectedByRestriction { message }),
                    Err(RestrictionOutcome::Failed(reason)) => Err(ParseError::SendValidationFailed {
                        bundle_name: bundle_identity.clone(),
                        reason,
                    }),
                    Ok(_) => Err(ParseError::Internal(
                        "nursery reported failure but no restriction recorded one".to_string(),
                    )),
                };
            }
            return_type = running
                .lock()
                .expect("restriction intersection lock poisoned")
                .clone()
                .expect("wait_all succeeded so every restriction resolved Ok");
        }

        let mut arena = arena.lock().expect("phrase arena poisoned");
        Ok(Self::insert_raw_send(&mut arena, bundle_identity.clone(), args, return_type))
    }

    fn insert_raw_send(
        arena: &mut PhraseArena,
        bundle_name: Atom,
        args: &[PhraseId],
        return_type: YieldType,
    ) -> PhraseId {
        let args_list = arena.insert(Phrase::new(
            PhraseKind::List { elements: args.to_vec() },
            YieldType::Top,
        ));
        arena.insert(Phrase::new(
            PhraseKind::Send {
                bundle_name,
                args_list,
                return_type: return_type.clone(),
            },
            return_type,
        ))
    }
}

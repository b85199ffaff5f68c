//! `BundleTree`: the shared, lazily expanded trie of parsing
//! instructions (§4.B).

use crate::bundle::{Bundle, MessagePart};
use crate::error::BundleTreeError;
use crate::instruction::ParsingInstruction;
use skein_core::Atom;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A bundle paired with its position (index into `compiled`) within
/// the trie. Two bundles at the same node but different positions
/// (e.g. one further along after a `Jump`) are tracked separately.
#[derive(Clone)]
struct Frontier {
    bundle: Arc<Bundle>,
    position: usize,
}

impl Frontier {
    fn next_part(&self) -> &MessagePart {
        &self.bundle.compiled[self.position]
    }
}

#[derive(Default)]
struct Expanded {
    complete_at_this_position: Vec<Arc<Bundle>>,
    incomplete: HashMap<String, Arc<Mutex<BundleTree>>>,
    incomplete_case_insensitive: HashMap<String, Arc<Mutex<BundleTree>>>,
    actions: Vec<(ParsingInstruction, Vec<Arc<Mutex<BundleTree>>>)>,
    /// Keyed by the identity of a previously parsed argument's bundle;
    /// present only when a grammatical restriction narrows the
    /// acceptable next branch for that argument shape (§4.B step 5).
    prefilter: HashMap<Atom, Arc<Mutex<BundleTree>>>,
}

/// A node of the bundle tree. Expansion is lazy and idempotent: the
/// first `expand()` call partitions the frontier into the five
/// dispatch maps; later calls are no-ops as long as the frontier is
/// unchanged.
pub struct BundleTree {
    frontier: Vec<Frontier>,
    expanded: Option<Expanded>,
    /// Grammatical restrictions visible at this node: argument
    /// position (0-based) → set of argument-bundle identities that are
    /// disallowed there. Consulted only when expanding a node whose
    /// next instruction is `check-argument`.
    restricted_argument_bundles: HashMap<usize, std::collections::HashSet<Atom>>,
}

impl BundleTree {
    pub fn new_root(bundles: Vec<Arc<Bundle>>) -> Self {
        Self {
            frontier: bundles
                .into_iter()
                .map(|bundle| Frontier { bundle, position: 0 })
                .collect(),
            expanded: None,
            restricted_argument_bundles: HashMap::new(),
        }
    }

    fn child(frontier: Vec<Frontier>) -> Arc<Mutex<BundleTree>> {
        Arc::new(Mutex::new(BundleTree {
            frontier,
            expanded: None,
            restricted_argument_bundles: HashMap::new(),
        }))
    }

    /// Registers a grammatical restriction that, at the given argument
    /// position, forbids the listed argument-bundle identities.
    pub fn restrict_argument(&mut self, position: usize, forbidden: std::collections::HashSet<Atom>) {
        self.restricted_argument_bundles.insert(position, forbidden);
        self.expanded = None;
    }

    /// Lazily expands this node if it has not already been expanded
    /// for the current frontier (§4.B "Expansion algorithm"). A
    /// `RESERVED_10..15` or otherwise unrecognized opcode reaching an
    /// instruction here is an internal error (§9 Open Question 2): it
    /// aborts expansion rather than producing a bundle tree with a
    /// corrupted action group.
    pub fn expand(&mut self) -> Result<(), BundleTreeError> {
        if self.expanded.is_some() {
            return Ok(());
        }

        let mut result = Expanded::default();
        let mut by_keyword: HashMap<String, Vec<Frontier>> = HashMap::new();
        let mut by_action: Vec<(ParsingInstruction, Vec<Frontier>)> = Vec::new();

        for f in &self.frontier {
            match f.next_part() {
                MessagePart::EndOfMessage => {
                    result.complete_at_this_position.push(f.bundle.clone());
                }
                MessagePart::Keyword(k) => {
                    by_keyword.entry(k.clone()).or_default().push(f.clone());
                }
                MessagePart::Instruction(instr) => {
                    instr.validate()?;
                    if let Some((_, group)) = by_action
                        .iter_mut()
                        .find(|(existing, _)| existing.shares_action_group_with(instr))
                    {
                        group.push(f.clone());
                    } else {
                        by_action.push((instr.clone(), vec![f.clone()]));
                    }
                }
            }
        }

        for (keyword, group) in by_keyword {
            let advanced = group
                .into_iter()
                .map(|f| Frontier {
                    bundle: f.bundle,
                    position: f.position + 1,
                })
                .collect();
            let child = Self::child(advanced);
            result.incomplete_case_insensitive.insert(keyword.to_lowercase(), child.clone());
            result.incomplete.insert(keyword, child);
        }

        for (instr, group) in by_action {
            let successors = Self::action_successors(&instr, &group);
            if instr == ParsingInstruction::CheckArgument {
                if let Some(prefilter) = self.build_prefilter(&group) {
                    result.prefilter = prefilter;
                }
            }
            result.actions.push((instr, successors));
        }

        self.expanded = Some(result);
        Ok(())
    }

    /// Computes successor subtrees for one action group. `Jump`/`Branch`
    /// advance to explicit target indices (possibly several, one per
    /// target, forking); every other instruction simply advances by
    /// one position.
    fn action_successors(instr: &ParsingInstruction, group: &[Frontier]) -> Vec<Arc<Mutex<BundleTree>>> {
        match instr {
            ParsingInstruction::Jump(target) => {
                let advanced = group
                    .iter()
                    .map(|f| Frontier {
                        bundle: f.bundle.clone(),
                        position: *target as usize,
                    })
                    .collect();
                vec![Self::child(advanced)]
            }
            ParsingInstruction::Branch(targets) => targets
                .iter()
                .map(|target| {
                    let advanced = group
                        .iter()
                        .map(|f| Frontier {
                            bundle: f.bundle.clone(),
                            position: *target as usize,
                        })
                        .collect();
                    Self::child(advanced)
                })
                .collect(),
            _ => {
                let advanced = group
                    .iter()
                    .map(|f| Frontier {
                        bundle: f.bundle.clone(),
                        position: f.position + 1,
                    })
                    .collect();
                vec![Self::child(advanced)]
            }
        }
    }

    /// Builds the prefilter map for a `check-argument` action group, if
    /// any contributing bundle carries a grammatical restriction at
    /// this argument position (§4.B step 5). Bundles whose argument
    /// shape is forbidden are routed to a successor that excludes
    /// them; this simplified model uses one shared "allowed" successor
    /// reached by any non-forbidden argument bundle, since the parser
    /// only needs to know whether to bypass normal dispatch, not a
    /// full per-argument-bundle subtree fan-out.
    fn build_prefilter(&self, group: &[Frontier]) -> Option<HashMap<Atom, Arc<Mutex<BundleTree>>>> {
        let position = self.restricted_argument_bundles.keys().next().copied()?;
        let forbidden = self.restricted_argument_bundles.get(&position)?;
        if forbidden.is_empty() {
            return None;
        }
        let advanced: Vec<Frontier> = group
            .iter()
            .map(|f| Frontier {
                bundle: f.bundle.clone(),
                position: f.position + 1,
            })
            .collect();
        let allowed_child = Self::child(advanced);
        let mut map = HashMap::new();
        for atom in forbidden {
            map.insert(atom.clone(), allowed_child.clone());
        }
        Some(map)
    }

    pub fn complete_at_this_position(&self) -> &[Arc<Bundle>] {
        self.expanded
            .as_ref()
            .map(|e| e.complete_at_this_position.as_slice())
            .unwrap_or(&[])
    }

    pub fn incomplete(&self, keyword: &str) -> Option<Arc<Mutex<BundleTree>>> {
        self.expanded.as_ref()?.incomplete.get(keyword).cloned()
    }

    pub fn incomplete_case_insensitive(&self, keyword_lower: &str) -> Option<Arc<Mutex<BundleTree>>> {
        self.expanded
            .as_ref()?
            .incomplete_case_insensitive
            .get(keyword_lower)
            .cloned()
    }

    pub fn actions(&self) -> &[(ParsingInstruction, Vec<Arc<Mutex<BundleTree>>>)] {
        self.expanded
            .as_ref()
            .map(|e| e.actions.as_slice())
            .unwrap_or(&[])
    }

    pub fn prefilter_for(&self, argument_bundle: &Atom) -> Option<Arc<Mutex<BundleTree>>> {
        self.expanded.as_ref()?.prefilter.get(argument_bundle).cloned()
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded.is_some()
    }
}

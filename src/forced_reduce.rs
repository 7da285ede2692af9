//! Picking a reduction for every state that the parser can force during error recovery

use crate::grammar::{Grammar, RuleIdx, TermIdx};
use crate::item::{PosArena, PosIdx};
use crate::lr_common::{Action, LrState};

use fxhash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForcedReduce {
    pub rule: RuleIdx,
    /// Number of stack entries to pop. Smaller than the rule length when reducing a
    /// partial rule.
    pub depth: usize,
}

struct GotoEdge {
    parents: Vec<usize>,
    target: usize,
}

struct CycleCheck<'a> {
    goto_edges: FxHashMap<TermIdx, Vec<GotoEdge>>,
    /// States with a length-1 forced reduction, mapped to the term it produces
    length1: FxHashMap<usize, TermIdx>,
    grammar: &'a Grammar,
}

impl<'a> CycleCheck<'a> {
    /// Whether reducing to `term` (after popping one entry) can lead back to `start` by
    /// only doing length-1 forced reductions
    fn creates_cycle(&self, term: TermIdx, start: usize, parents: Option<&[usize]>) -> bool {
        let edges = match self.goto_edges.get(&term) {
            Some(edges) => edges,
            None => return false,
        };
        edges.iter().any(|edge| {
            let shared: Vec<usize> = match parents {
                Some(parents) => parents
                    .iter()
                    .copied()
                    .filter(|p| edge.parents.contains(p))
                    .collect(),
                None => edge.parents.clone(),
            };
            if shared.is_empty() {
                return false;
            }
            if edge.target == start {
                return true;
            }
            match self.length1.get(&edge.target) {
                Some(next) => self.creates_cycle(*next, start, Some(&shared)),
                None => false,
            }
        })
    }

    fn candidates(&self, state: &LrState, arena: &PosArena) -> Vec<PosIdx> {
        let grammar = self.grammar;
        let mut set: Vec<PosIdx> = state
            .set
            .iter()
            .copied()
            .filter(|p| {
                let pos = arena.get(*p);
                pos.pos > 0 && !grammar.terms.get(grammar.rule(pos.rule).name).top()
            })
            .collect();
        set.sort_by(|a, b| {
            let (a, b) = (arena.get(*a), arena.get(*b));
            let (rule_a, rule_b) = (grammar.rule(a.rule), grammar.rule(b.rule));
            b.pos
                .cmp(&a.pos)
                .then(rule_a.parts.len().cmp(&rule_b.parts.len()))
                .then(rule_a.id.cmp(&rule_b.id))
        });
        set
    }
}

pub fn compute_forced_reductions(
    states: &[LrState],
    arena: &PosArena,
    grammar: &Grammar,
) -> Vec<Option<ForcedReduce>> {
    let mut check = CycleCheck {
        goto_edges: Default::default(),
        length1: Default::default(),
        grammar,
    };
    for state in states {
        for goto in &state.goto {
            if let Action::Shift { term, target } = goto {
                let edges = check.goto_edges.entry(*term).or_default();
                match edges.iter_mut().find(|e| e.target == target.0) {
                    Some(edge) => edge.parents.push(state.id.0),
                    None => edges.push(GotoEdge {
                        parents: vec![state.id.0],
                        target: target.0,
                    }),
                }
            }
        }
    }

    let mut reductions: Vec<Option<ForcedReduce>> = vec![None; states.len()];
    let candidates: Vec<Vec<PosIdx>> = states.iter().map(|s| check.candidates(s, arena)).collect();

    for state in states {
        if let Some(rule_idx) = state.default_reduce {
            let rule = grammar.rule(rule_idx);
            if !rule.parts.is_empty() {
                reductions[state.id.0] = Some(ForcedReduce {
                    rule: rule_idx,
                    depth: rule.parts.len(),
                });
                if rule.parts.len() == 1 {
                    check.length1.insert(state.id.0, rule.name);
                }
            }
        }
    }

    // States with fewer candidates are handled first, so that they get the best chance of
    // finding a reduction that doesn't cycle
    let mut set_size = 1;
    loop {
        let mut done = true;
        for state in states {
            if state.default_reduce.is_some() {
                continue;
            }
            let set = &candidates[state.id.0];
            if set.len() != set_size {
                if set.len() > set_size {
                    done = false;
                }
                continue;
            }
            for pos_idx in set {
                let pos = arena.get(*pos_idx);
                let name = grammar.rule(pos.rule).name;
                if pos.pos != 1 || !check.creates_cycle(name, state.id.0, None) {
                    reductions[state.id.0] = Some(ForcedReduce {
                        rule: pos.rule,
                        depth: pos.pos,
                    });
                    if pos.pos == 1 {
                        check.length1.insert(state.id.0, name);
                    }
                    break;
                }
            }
        }
        if done {
            break;
        }
        set_size += 1;
    }

    reductions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lalr1::collapse_automaton;
    use crate::test_grammars::{automaton, ARITH};

    #[test]
    fn every_partial_state_can_reduce() {
        let auto = automaton(ARITH);
        let states = collapse_automaton(&auto.full, &auto.arena, &auto.grammar);
        let forced = compute_forced_reductions(&states, &auto.arena, &auto.grammar);
        assert_eq!(forced.len(), states.len());

        let mut partial = 0;
        for state in &states {
            let reduce = forced[state.id.0];
            if let Some(rule) = state.default_reduce {
                let len = auto.grammar.rule(rule).parts.len();
                if len > 0 {
                    assert_eq!(reduce, Some(ForcedReduce { rule, depth: len }));
                }
                continue;
            }
            let has_candidate = state.set.iter().any(|p| {
                let pos = auto.arena.get(*p);
                pos.pos > 0 && !auto.grammar.terms.get(auto.grammar.rule(pos.rule).name).top()
            });
            if !has_candidate {
                assert_eq!(reduce, None, "state {}", state.id.0);
            }
            if let Some(reduce) = reduce {
                assert!(reduce.depth <= auto.grammar.rule(reduce.rule).parts.len());
                if reduce.depth < auto.grammar.rule(reduce.rule).parts.len() {
                    partial += 1;
                }
            }
        }
        // States in the middle of a binary expression reduce it partially
        assert!(partial > 0);
    }
}

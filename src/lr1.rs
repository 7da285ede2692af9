//! Construction of the canonical LR(1) automaton

use crate::error::{ConflictLog, GenError, Result};
use crate::first::FirstTable;
use crate::grammar::{Conflicts, Grammar, RuleDisplay, RuleIdx, TermIdx};
use crate::item::{hash_positions, Pos, PosArena, PosDisplay, PosIdx};
use crate::lr_common::{Action, LrState, StateIdx};

use fxhash::FxHashMap;

use std::cmp::Ordering;

fn union_sorted(a: &[String], b: &[String]) -> Vec<String> {
    let mut result = a.to_vec();
    for s in b {
        if !result.contains(s) {
            result.push(s.clone());
        }
    }
    result.sort();
    result
}

struct Closure<'a> {
    grammar: &'a Grammar,
    arena: &'a mut PosArena,
    core: &'a [PosIdx],
    /// Fresh items at position 0, one per rule
    added: Vec<PosIdx>,
    /// Items whose lookahead grew, so that the rules they start with need updating
    redo: Vec<PosIdx>,
}

impl<'a> Closure<'a> {
    fn add_for(
        &mut self,
        name: TermIdx,
        ahead: &[TermIdx],
        ambig_ahead: &[String],
        skip_ahead: TermIdx,
        via: PosIdx,
    ) -> Result<()> {
        let grammar = self.grammar;
        for rule in grammar.term_rules(name) {
            let found = self
                .added
                .iter()
                .copied()
                .find(|a| self.arena.get(*a).rule == *rule);
            let add = match found {
                Some(add) => add,
                None => {
                    let existing = self
                        .core
                        .iter()
                        .map(|p| self.arena.get(*p))
                        .find(|p| p.pos == 0 && p.rule == *rule);
                    let pos = match existing {
                        Some(e) => Pos::new(
                            *rule,
                            0,
                            e.ahead.clone(),
                            e.ambig_ahead.clone(),
                            e.skip_ahead,
                            e.via,
                        ),
                        None => Pos::new(*rule, 0, vec![], vec![], skip_ahead, Some(via)),
                    };
                    let add = self.arena.add(pos);
                    self.added.push(add);
                    add
                }
            };
            if self.arena.get(add).skip_ahead != skip_ahead {
                return Err(GenError::Grammar(format!(
                    "Inconsistent skip sets after {}",
                    self.arena.trail(via, grammar, 60)
                )));
            }
            let starts_with_non_terminal = match grammar.rule(*rule).parts.first() {
                Some(first) => !grammar.is_terminal(*first),
                None => false,
            };
            let pos = self.arena.get_mut(add);
            pos.ambig_ahead = union_sorted(&pos.ambig_ahead, ambig_ahead);
            for term in ahead {
                if !pos.ahead.contains(term) {
                    pos.ahead.push(*term);
                    if starts_with_non_terminal && !self.redo.contains(&add) {
                        self.redo.push(add);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Adds the items predicted by `core` until the set stops growing
pub fn closure(
    grammar: &Grammar,
    first: &FirstTable,
    arena: &mut PosArena,
    core: &[PosIdx],
) -> Result<Vec<PosIdx>> {
    let mut cx = Closure {
        grammar,
        arena,
        core,
        added: vec![],
        redo: vec![],
    };

    for pos_idx in core {
        let pos = cx.arena.get(*pos_idx);
        let rule = grammar.rule(pos.rule);
        let next = match pos.next(grammar) {
            Some(next) if !grammar.is_terminal(next) => next,
            _ => continue,
        };
        let ahead = first.terms_ahead(grammar, rule, pos.pos, &pos.ahead);
        let ambig = pos.conflicts_at(grammar, pos.pos + 1).ambig_groups;
        let skip = if pos.pos == rule.parts.len() - 1 {
            pos.skip_ahead
        } else {
            rule.skip
        };
        cx.add_for(next, &ahead, &ambig, skip, *pos_idx)?;
    }

    while let Some(add_idx) = cx.redo.pop() {
        let add = cx.arena.get(add_idx);
        let rule = grammar.rule(add.rule);
        let ahead = first.terms_ahead(grammar, rule, 0, &add.ahead);
        let ambig = if rule.parts.len() == 1 {
            union_sorted(&rule.conflicts[1].ambig_groups, &add.ambig_ahead)
        } else {
            rule.conflicts[1].ambig_groups.clone()
        };
        let skip = if rule.parts.len() == 1 {
            add.skip_ahead
        } else {
            rule.skip
        };
        cx.add_for(rule.parts[0], &ahead, &ambig, skip, add_idx)?;
    }

    let Closure { added, arena, .. } = cx;
    let mut result = core.to_vec();
    for add in added {
        let pos = arena.get_mut(add);
        pos.ahead.sort();
        pos.finish(grammar);
        let orig = core.iter().position(|p| {
            let p = arena.get(*p);
            p.pos == 0 && p.rule == arena.get(add).rule
        });
        match orig {
            Some(i) => result[i] = add,
            None => result.push(add),
        }
    }
    arena.sort(&mut result, grammar);
    Ok(result)
}

/// Keeps only the items with the highest cut level, if any item has a cut level
fn apply_cut(set: Vec<PosIdx>, arena: &PosArena, grammar: &Grammar) -> Vec<PosIdx> {
    let mut found: Option<Vec<PosIdx>> = None;
    let mut cut = 1;
    for pos_idx in &set {
        let pos = arena.get(*pos_idx);
        let value = grammar.rule(pos.rule).conflicts[pos.pos - 1].cut;
        if value < cut {
            continue;
        }
        if found.is_none() || value > cut {
            cut = value;
            found = Some(vec![]);
        }
        if let Some(found) = &mut found {
            found.push(*pos_idx);
        }
    }
    found.unwrap_or(set)
}

fn conflicts_of(group: &[PosIdx], arena: &PosArena, grammar: &Grammar) -> Conflicts {
    group.iter().fold(Conflicts::none(), |acc, p| {
        acc.join(&arena.get(*p).conflicts(grammar))
    })
}

/// Repeat rules are left-associative: reducing `R -> R R` wins over continuing an inner `R`
fn compare_repeat_prec(a: &[PosIdx], b: &[PosIdx], arena: &PosArena, grammar: &Grammar) -> Ordering {
    for pos_idx in a {
        let pos = arena.get(*pos_idx);
        let rule = grammar.rule(pos.rule);
        if !grammar.terms.get(rule.name).repeated() {
            continue;
        }
        for pos_b_idx in b {
            let pos_b = arena.get(*pos_b_idx);
            let rule_b = grammar.rule(pos_b.rule);
            if rule_b.name != rule.name {
                continue;
            }
            if rule.is_repeat_wrap(&grammar.terms) && pos.pos == 2 {
                return Ordering::Greater;
            }
            if rule_b.is_repeat_wrap(&grammar.terms) && pos_b.pos == 2 {
                return Ordering::Less;
            }
        }
    }
    Ordering::Equal
}

/// Adds an action, resolving conflicts with existing actions for the same term. Returns
/// the index of an existing action that conflicts with the new one.
fn add_action_inner(
    state: &mut LrState,
    value: Action,
    positions: &[PosIdx],
    arena: &PosArena,
    grammar: &Grammar,
) -> Option<usize> {
    let mut i = 0;
    while i < state.actions.len() {
        let action = state.actions[i];
        if action.term() == value.term() {
            if action.same(&value, grammar) {
                return None;
            }
            let full_pos = arena.add_origins(positions, &state.set, grammar);
            let full_action = arena.add_origins(&state.action_positions[i], &state.set, grammar);
            let conflicts = conflicts_of(&full_pos, arena, grammar);
            let action_conflicts = conflicts_of(&full_action, arena, grammar);
            let diff = compare_repeat_prec(&full_pos, &full_action, arena, grammar)
                .then(conflicts.precedence.cmp(&action_conflicts.precedence));
            match diff {
                Ordering::Greater => {
                    // Drop the existing action
                    state.actions.remove(i);
                    state.action_positions.remove(i);
                    continue;
                }
                Ordering::Less => return None,
                Ordering::Equal => {
                    if conflicts
                        .ambig_groups
                        .iter()
                        .any(|g| action_conflicts.ambig_groups.contains(g))
                    {
                        // Explicitly allowed ambiguity
                        i += 1;
                        continue;
                    }
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    state.actions.push(value);
    state.action_positions.push(positions.to_vec());
    None
}

fn add_action(
    state: &mut LrState,
    value: Action,
    positions: &[PosIdx],
    arena: &PosArena,
    grammar: &Grammar,
    log: &mut ConflictLog,
) {
    let conflict = match add_action_inner(state, value, positions, arena, grammar) {
        None => return,
        Some(i) => i,
    };
    let conflict_pos = state.action_positions[conflict][0];
    let new_pos = positions[0];
    let terms = &grammar.terms;
    let new_rule = grammar.rule(arena.get(new_pos).rule);
    let conflict_rule = grammar.rule(arena.get(conflict_pos).rule);
    let rules = vec![
        terms.name(new_rule.name).to_owned(),
        terms.name(conflict_rule.name).to_owned(),
    ];
    if log.involves_any(&rules) {
        return;
    }
    let mut error = match state.actions[conflict] {
        Action::Shift { .. } => format!(
            "shift/reduce conflict between\n  {}\nand\n  {}",
            PosDisplay::new(arena.get(conflict_pos), grammar),
            RuleDisplay::new(new_rule, terms)
        ),
        Action::Reduce { .. } => format!(
            "reduce/reduce conflict between\n  {}\nand\n  {}",
            RuleDisplay::new(conflict_rule, terms),
            RuleDisplay::new(new_rule, terms)
        ),
    };
    error.push_str(&format!(
        "\nWith input:\n  {} · {} …",
        arena.trail(new_pos, grammar, 70),
        terms.name(value.term())
    ));
    error.push_str(&arena.conflict_origin(conflict_pos, new_pos, grammar));
    log.push(error, rules);
}

struct Builder<'a> {
    grammar: &'a Grammar,
    first: &'a FirstTable,
    arena: &'a mut PosArena,
    states: Vec<LrState>,
    /// Known kernels, by hash
    cores: FxHashMap<u32, Vec<(Vec<PosIdx>, StateIdx)>>,
    /// Non-start states, by the hash of their closed set
    by_set: FxHashMap<u32, Vec<StateIdx>>,
}

impl<'a> Builder<'a> {
    fn get_state(&mut self, mut core: Vec<PosIdx>, top: Option<TermIdx>) -> Result<Option<StateIdx>> {
        if core.is_empty() {
            return Ok(None);
        }
        self.arena.sort(&mut core, self.grammar);
        let core_hash = hash_positions(self.arena, &core);

        let mut skip: Option<TermIdx> = None;
        for pos_idx in &core {
            let pos_skip = self.arena.get(*pos_idx).skip(self.grammar);
            match skip {
                None => skip = Some(pos_skip),
                Some(s) if s != pos_skip => {
                    return Err(GenError::Grammar(format!(
                        "Inconsistent skip sets after {}",
                        self.arena.trail(*pos_idx, self.grammar, 60)
                    )))
                }
                Some(_) => {}
            }
        }
        let skip = skip.unwrap_or(self.grammar.terms.eof);

        if top.is_none() {
            if let Some(known) = self.cores.get(&core_hash) {
                for (set, state) in known {
                    if self.arena.same_set(&core, set) {
                        if self.states[state.0].skip != skip {
                            return Err(GenError::Grammar(format!(
                                "Inconsistent skip sets after {}",
                                self.arena.trail(set[0], self.grammar, 60)
                            )));
                        }
                        return Ok(Some(*state));
                    }
                }
            }
        }

        let set = closure(self.grammar, self.first, self.arena, &core)?;
        let hash = hash_positions(self.arena, &set);

        if top.is_none() {
            let existing = self.by_set.get(&hash).and_then(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .find(|s| self.arena.same_set(&self.states[s.0].set, &set))
            });
            if let Some(state) = existing {
                self.cores.entry(core_hash).or_default().push((core, state));
                return Ok(Some(state));
            }
        }

        let id = StateIdx(self.states.len());
        self.states.push(LrState::new(id, set, skip, hash, top));
        if top.is_none() {
            self.by_set.entry(hash).or_default().push(id);
            self.cores.entry(core_hash).or_default().push((core, id));
        }
        Ok(Some(id))
    }
}

/// Builds the full LR(1) automaton. `start_terms` get one entry state each, in order.
/// Rules for terms without rules of their own start in `no_skip`.
pub fn build_full_automaton(
    grammar: &Grammar,
    first: &FirstTable,
    arena: &mut PosArena,
    start_terms: &[TermIdx],
    no_skip: TermIdx,
) -> Result<Vec<LrState>> {
    let mut builder = Builder {
        grammar,
        first,
        arena,
        states: vec![],
        cores: Default::default(),
        by_set: Default::default(),
    };

    for start in start_terms {
        let rules: &[RuleIdx] = grammar.term_rules(*start);
        let start_skip = rules
            .first()
            .map(|r| grammar.rule(*r).skip)
            .unwrap_or(no_skip);
        let mut core = vec![];
        for rule in rules {
            let mut pos = Pos::new(*rule, 0, vec![grammar.terms.eof], vec![], start_skip, None);
            pos.finish(grammar);
            core.push(builder.arena.add(pos));
        }
        builder.get_state(core, Some(*start))?;
    }

    let mut log = ConflictLog::new();
    let mut filled = 0;
    while filled < builder.states.len() {
        let set = builder.states[filled].set.clone();

        let mut by_term: Vec<TermIdx> = vec![];
        let mut by_term_pos: Vec<Vec<PosIdx>> = vec![];
        let mut at_end: Vec<PosIdx> = vec![];
        for pos_idx in &set {
            let pos = builder.arena.get(*pos_idx);
            match pos.next(grammar) {
                None => {
                    let name = grammar.rule(pos.rule).name;
                    if !grammar.terms.get(name).top() {
                        at_end.push(*pos_idx);
                    }
                }
                Some(next) => match by_term.iter().position(|t| *t == next) {
                    Some(i) => by_term_pos[i].push(*pos_idx),
                    None => {
                        by_term.push(next);
                        by_term_pos.push(vec![*pos_idx]);
                    }
                },
            }
        }

        for (term, positions) in by_term.iter().zip(&by_term_pos) {
            let advanced: Vec<PosIdx> = positions
                .iter()
                .map(|p| builder.arena.advance(*p, grammar))
                .collect();
            if grammar.is_terminal(*term) {
                let cut = apply_cut(advanced, builder.arena, grammar);
                if let Some(target) = builder.get_state(cut, None)? {
                    add_action(
                        &mut builder.states[filled],
                        Action::Shift {
                            term: *term,
                            target,
                        },
                        positions,
                        builder.arena,
                        grammar,
                        &mut log,
                    );
                }
            } else if let Some(target) = builder.get_state(advanced, None)? {
                builder.states[filled].goto.push(Action::Shift {
                    term: *term,
                    target,
                });
            }
        }

        let mut replaced = false;
        for pos_idx in &at_end {
            let pos = builder.arena.get(*pos_idx);
            let rule = pos.rule;
            for ahead in pos.ahead.clone() {
                let state = &mut builder.states[filled];
                let count = state.actions.len();
                add_action(
                    state,
                    Action::Reduce { term: ahead, rule },
                    &[*pos_idx],
                    builder.arena,
                    grammar,
                    &mut log,
                );
                if state.actions.len() == count {
                    replaced = true;
                }
            }
        }

        // When actions were dropped by precedence, gotos for rules that can no longer be
        // entered are superfluous
        if replaced {
            let state = &mut builder.states[filled];
            let actions = state.actions.clone();
            state.goto.retain(|goto| {
                let start = first.get_first(goto.term());
                actions
                    .iter()
                    .any(|a| matches!(a, Action::Shift { term, .. } if start.contains(*term)))
            });
        }

        filled += 1;
    }

    log.into_automaton_result()?;

    let mut states = builder.states;
    for state in &mut states {
        state.finish(grammar);
    }
    log::debug!("Full LR(1) automaton has {} states", states.len());
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::first::generate_first_table;
    use crate::grammar::{Props, TermSet};

    // @top T { E }  E { E "+" E | "x" }, with an optional precedence on the `+` rule
    fn expr_grammar(prec: Option<(i32, i32)>) -> (Grammar, TermIdx, TermIdx) {
        let mut terms = TermSet::new();
        let top = terms.make_top(Some("T".to_owned()), Props::new());
        let e = terms.make_non_terminal("E", Some("E".to_owned()), Props::new());
        let plus = terms.make_terminal("\"+\"", None, Props::new());
        let x = terms.make_terminal("x", None, Props::new());
        let skip = terms.make_non_terminal("%noskip", None, Props::new());
        let mut plus_conflicts = vec![Conflicts::none(); 4];
        if let Some((here, end)) = prec {
            plus_conflicts[1] = Conflicts::with_precedence(here);
            plus_conflicts[3] = Conflicts::with_precedence(end);
        }
        let rules = vec![
            terms.new_rule(top, vec![e], vec![Conflicts::none(); 2], skip),
            terms.new_rule(e, vec![e, plus, e], plus_conflicts, skip),
            terms.new_rule(e, vec![x], vec![Conflicts::none(); 2], skip),
        ];
        terms.finish(&rules).unwrap();
        (Grammar::new(terms, rules), top, skip)
    }

    #[test]
    fn reports_shift_reduce_conflict() {
        let (grammar, top, skip) = expr_grammar(None);
        let first = generate_first_table(&grammar);
        let mut arena = PosArena::new();
        match build_full_automaton(&grammar, &first, &mut arena, &[top], skip) {
            Err(GenError::Conflicts(conflicts)) => {
                assert_eq!(conflicts.len(), 1);
                assert!(conflicts[0].starts_with("shift/reduce conflict between"));
                assert!(conflicts[0].contains("E -> E \"+\" E"));
                assert!(conflicts[0].contains("With input:\n  E \"+\" E · \"+\" …"), "{}", conflicts[0]);
            }
            other => panic!("expected a conflict, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn precedence_resolves_conflict() {
        // Left associative: the rule end has a higher precedence than the operator gap
        let (grammar, top, skip) = expr_grammar(Some((4, 5)));
        let first = generate_first_table(&grammar);
        let mut arena = PosArena::new();
        let states = build_full_automaton(&grammar, &first, &mut arena, &[top], skip).unwrap();
        assert_eq!(states[0].start_rule, Some(top));
        assert!(states.iter().any(|s| s.accepting(&arena, &grammar)));
        // No state may have two actions for the same term
        for state in &states {
            for (i, a) in state.actions.iter().enumerate() {
                assert!(state.actions[i + 1..].iter().all(|b| b.term() != a.term()));
            }
        }
    }

    #[test]
    fn states_render_items_and_actions() {
        let (grammar, top, skip) = expr_grammar(Some((4, 5)));
        let first = generate_first_table(&grammar);
        let mut arena = PosArena::new();
        let states = build_full_automaton(&grammar, &first, &mut arena, &[top], skip).unwrap();
        let text = crate::lr_common::StateDisplay {
            state: &states[0],
            grammar: &grammar,
            arena: &arena,
        }
        .to_string();
        assert!(text.starts_with("0: {\n"), "{}", text);
        assert!(text.contains("  E -> · x\n"), "{}", text);
        assert!(text.contains("  x => "), "{}", text);
        assert!(text.ends_with("}\n"));
    }
}

//! Collapsing the LR(1) automaton to (roughly) LALR size

use crate::grammar::Grammar;
use crate::item::{hash_positions, PosArena, PosIdx};
use crate::lr_common::{Action, LrState, StateIdx};

/// States whose item cores are equal (ignoring lookahead)
fn same_pos_set(a: &[PosIdx], b: &[PosIdx], arena: &PosArena) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(a, b)| arena.get(*a).eq_simple(arena.get(*b)))
}

fn actions_for_term(state: &LrState, action: &Action) -> Vec<Action> {
    state
        .actions
        .iter()
        .filter(|a| a.term() == action.term())
        .copied()
        .collect()
}

fn can_merge_inner(a: &LrState, b: &LrState, mapping: &[usize], grammar: &Grammar) -> bool {
    // A goto for the same term that leads to different groups makes the states
    // incompatible
    for goto in &a.goto {
        for other in &b.goto {
            if let (Action::Shift { term, target }, Action::Shift { term: t2, target: target2 }) =
                (goto, other)
            {
                if term == t2 && mapping[target.0] != mapping[target2.0] {
                    return false;
                }
            }
        }
    }
    // When the other state has an action for the same term that doesn't match, the merge
    // is only allowed if both states have the exact same set of actions for the term.
    for action in &a.actions {
        let set_b = actions_for_term(b, action);
        if set_b.is_empty() || set_b.iter().any(|o| o.matches(action, mapping, grammar)) {
            continue;
        }
        if set_b.len() == 1 {
            return false;
        }
        let set_a = actions_for_term(a, action);
        if set_a.len() != set_b.len()
            || set_a
                .iter()
                .any(|a1| !set_b.iter().any(|a2| a1.matches(a2, mapping, grammar)))
        {
            return false;
        }
    }
    true
}

fn can_merge(a: &LrState, b: &LrState, mapping: &[usize], grammar: &Grammar) -> bool {
    can_merge_inner(a, b, mapping, grammar) && can_merge_inner(b, a, mapping, grammar)
}

struct Group {
    /// The group this one was split off from
    origin: usize,
    members: Vec<usize>,
}

/// Builds a new state from a group of compatible states
fn merge_states(
    id: usize,
    group: &[&LrState],
    mapping: &[usize],
    arena: &PosArena,
    grammar: &Grammar,
) -> LrState {
    let mut set: Vec<PosIdx> = vec![];
    for state in group {
        for pos in &state.set {
            if !set.iter().any(|p| arena.get(*p).eq_simple(arena.get(*pos))) {
                set.push(*pos);
            }
        }
    }
    arena.sort(&mut set, grammar);
    let first = group[0];
    let hash = hash_positions(arena, &set);
    let mut state = LrState::new(StateIdx(id), set, first.skip, hash, first.start_rule);
    state.token_group = first.token_group;
    for member in group {
        for (action, positions) in member.actions.iter().zip(&member.action_positions) {
            let mapped = action.map(mapping);
            if !state.actions.iter().any(|a| a.same(&mapped, grammar)) {
                state.actions.push(mapped);
                state.action_positions.push(positions.clone());
            }
        }
        for goto in &member.goto {
            let mapped = goto.map(mapping);
            if !state.goto.iter().any(|g| g.same(&mapped, grammar)) {
                state.goto.push(mapped);
            }
        }
    }
    state.finish(grammar);
    state
}

/// Moves a member out of its group, into a later group split off from the same origin
/// that it is compatible with, or a new group
fn spill(
    groups: &mut Vec<Group>,
    mapping: &mut [usize],
    group_index: usize,
    index: usize,
    compatible: &dyn Fn(usize, usize, &[usize]) -> bool,
) {
    let origin = groups[group_index].origin;
    let state = groups[group_index].members.remove(index);
    for i in group_index + 1..groups.len() {
        mapping[state] = i;
        if groups[i].origin == origin && groups[i].members.iter().all(|id| compatible(state, *id, mapping)) {
            groups[i].members.push(state);
            return;
        }
    }
    mapping[state] = groups.len();
    groups.push(Group {
        origin,
        members: vec![state],
    });
}

/// Merges states with the same item cores, as long as that doesn't introduce conflicts.
/// Start states are kept apart.
pub fn collapse_automaton(states: &[LrState], arena: &PosArena, grammar: &Grammar) -> Vec<LrState> {
    let mut mapping: Vec<usize> = Vec::with_capacity(states.len());
    let mut groups: Vec<Group> = vec![];

    'assign: for (i, state) in states.iter().enumerate() {
        if state.start_rule.is_none() {
            for (j, group) in groups.iter_mut().enumerate() {
                let other = &states[group.members[0]];
                if state.token_group == other.token_group
                    && state.skip == other.skip
                    && other.start_rule.is_none()
                    && same_pos_set(&state.set, &other.set, arena)
                {
                    group.members.push(i);
                    mapping.push(j);
                    continue 'assign;
                }
            }
        }
        mapping.push(groups.len());
        groups.push(Group {
            origin: groups.len(),
            members: vec![i],
        });
    }

    let mut pass = 1;
    loop {
        let mut conflicts = false;
        let start_len = groups.len();
        for g in 0..start_len {
            let mut i = 0;
            while i + 1 < groups[g].members.len() {
                let mut j = i + 1;
                while j < groups[g].members.len() {
                    let (id_a, id_b) = (groups[g].members[i], groups[g].members[j]);
                    if can_merge(&states[id_a], &states[id_b], &mapping, grammar) {
                        j += 1;
                    } else {
                        conflicts = true;
                        spill(&mut groups, &mut mapping, g, j, &|state, other, mapping| {
                            can_merge(&states[state], &states[other], mapping, grammar)
                        });
                    }
                }
                i += 1;
            }
        }
        log::debug!("Collapse pass {}: {} groups", pass, groups.len());
        if !conflicts {
            break;
        }
        pass += 1;
    }

    groups
        .iter()
        .enumerate()
        .map(|(id, group)| {
            let members: Vec<&LrState> = group.members.iter().map(|i| &states[*i]).collect();
            merge_states(id, &members, &mapping, arena, grammar)
        })
        .collect()
}

/// Merges states that have the same default reduction, or the same actions and gotos,
/// until no more merges happen.
pub fn merge_identical(mut states: Vec<LrState>, arena: &PosArena, grammar: &Grammar) -> Vec<LrState> {
    loop {
        let mut mapping: Vec<usize> = Vec::with_capacity(states.len());
        let mut new_states: Vec<LrState> = vec![];
        let mut did_merge = false;
        for state in states {
            match new_states.iter().position(|s| state.same_as(s, grammar)) {
                None => {
                    mapping.push(new_states.len());
                    new_states.push(state);
                }
                Some(found) => {
                    mapping.push(found);
                    did_merge = true;
                    let other = &mut new_states[found];
                    let add: Vec<PosIdx> = state
                        .set
                        .iter()
                        .copied()
                        .filter(|pos| !other.set.iter().any(|p| arena.get(*p).eq_simple(arena.get(*pos))))
                        .collect();
                    if !add.is_empty() {
                        let mut set = add;
                        set.extend_from_slice(&other.set);
                        arena.sort(&mut set, grammar);
                        other.hash = hash_positions(arena, &set);
                        other.set = set;
                    }
                }
            }
        }
        if !did_merge {
            return new_states;
        }
        for (i, state) in new_states.iter_mut().enumerate() {
            state.id = StateIdx(i);
            for action in &mut state.actions {
                *action = action.map(&mapping);
            }
            for goto in &mut state.goto {
                *goto = goto.map(&mapping);
            }
            state.finish(grammar);
        }
        states = new_states;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::TermIdx;
    use crate::test_grammars::{automaton, parse, tables, Automaton, LEFT_SUM, LIST, LR1_ONLY};

    #[test]
    fn spilled_members_rejoin_their_siblings() {
        // Groups 1 and 2 were both split off from group 0
        let mut groups = vec![
            Group { origin: 0, members: vec![0] },
            Group { origin: 0, members: vec![1, 2] },
            Group { origin: 0, members: vec![3] },
        ];
        let mut mapping = vec![0, 1, 1, 2];
        spill(&mut groups, &mut mapping, 1, 1, &|_, _, _| true);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[1].members, vec![1]);
        assert_eq!(groups[2].members, vec![3, 2]);
        assert_eq!(mapping, vec![0, 1, 2, 2]);

        // Nothing compatible: a new group with the shared origin
        spill(&mut groups, &mut mapping, 0, 0, &|_, _, _| false);
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[3].origin, 0);
        assert_eq!(groups[3].members, vec![0]);
        assert_eq!(mapping[0], 3);
    }

    fn single_action_per_term(states: &[LrState]) -> bool {
        states.iter().all(|state| {
            state
                .actions
                .iter()
                .enumerate()
                .all(|(i, a)| state.actions[i + 1..].iter().all(|b| b.term() != a.term()))
        })
    }

    /// Runs an automaton over a sequence of terminals
    fn accepts(states: &[LrState], auto: &Automaton, input: &[TermIdx]) -> bool {
        let grammar = &auto.grammar;
        let mut stack = vec![0usize];
        let mut pos = 0;
        for _ in 0..1000 {
            let state = &states[*stack.last().unwrap()];
            let term = input.get(pos).copied().unwrap_or(grammar.terms.eof);
            match state.actions.iter().find(|a| a.term() == term) {
                Some(Action::Shift { target, .. }) => {
                    stack.push(target.0);
                    pos += 1;
                }
                Some(Action::Reduce { rule, .. }) => {
                    let rule = grammar.rule(*rule);
                    stack.truncate(stack.len() - rule.parts.len());
                    match states[*stack.last().unwrap()].goto_target(rule.name) {
                        Some(target) => stack.push(target.0),
                        None => return false,
                    }
                }
                None => return pos == input.len() && state.accepting(&auto.arena, grammar),
            }
        }
        false
    }

    fn all_inputs(alphabet: &[TermIdx], max_len: usize) -> Vec<Vec<TermIdx>> {
        let mut result = vec![vec![]];
        let mut last = vec![vec![]];
        for _ in 0..max_len {
            let mut next = vec![];
            for prefix in &last {
                for term in alphabet {
                    let mut input: Vec<TermIdx> = prefix.clone();
                    input.push(*term);
                    next.push(input);
                }
            }
            result.extend(next.iter().cloned());
            last = next;
        }
        result
    }

    fn same_language(text: &str, max_len: usize) {
        let auto = automaton(text);
        let collapsed = merge_identical(
            collapse_automaton(&auto.full, &auto.arena, &auto.grammar),
            &auto.arena,
            &auto.grammar,
        );
        let alphabet: Vec<TermIdx> = auto
            .grammar
            .terms
            .indices()
            .filter(|t| {
                let term = auto.grammar.terms.get(*t);
                term.terminal() && !term.eof() && auto.grammar.rules.iter().any(|r| r.parts.contains(t))
            })
            .collect();
        let mut accepted = 0;
        for input in all_inputs(&alphabet, max_len) {
            let full = accepts(&auto.full, &auto, &input);
            assert_eq!(full, accepts(&collapsed, &auto, &input), "input {:?}", input);
            if full {
                accepted += 1;
            }
        }
        assert!(accepted > 0);
    }

    #[test]
    fn collapsing_keeps_the_language() {
        same_language(LR1_ONLY, 4);
        same_language(LEFT_SUM, 5);
        same_language(LIST, 5);
    }

    #[test]
    fn collapse_shrinks_the_automaton() {
        let auto = automaton(LIST);
        let collapsed = collapse_automaton(&auto.full, &auto.arena, &auto.grammar);
        assert!(collapsed.len() < auto.full.len());
        assert!(single_action_per_term(&collapsed));
        for (i, state) in collapsed.iter().enumerate() {
            assert_eq!(state.id.0, i);
        }
        assert_eq!(collapsed[0].start_rule, auto.full[0].start_rule);

        let merged = merge_identical(collapsed.clone(), &auto.arena, &auto.grammar);
        assert!(merged.len() <= collapsed.len());
        assert!(single_action_per_term(&merged));
        assert!(merged.iter().all(|s| s.actions.iter().chain(&s.goto).all(|a| match a {
            Action::Shift { target, .. } => target.0 < merged.len(),
            Action::Reduce { .. } => true,
        })));
    }

    #[test]
    fn conflicting_cores_stay_apart() {
        let auto = automaton(LR1_ONLY);
        let collapsed = collapse_automaton(&auto.full, &auto.arena, &auto.grammar);
        assert!(single_action_per_term(&collapsed));

        let tables = tables(LR1_ONLY);
        assert_eq!(parse(&tables, "aec").as_deref(), Some("S(E)"));
        assert_eq!(parse(&tables, "aed").as_deref(), Some("S(F)"));
        assert_eq!(parse(&tables, "bec").as_deref(), Some("S(F)"));
        assert_eq!(parse(&tables, "bed").as_deref(), Some("S(E)"));
        assert_eq!(parse(&tables, "ae"), None);
    }
}

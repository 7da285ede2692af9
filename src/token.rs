//! Tokenizer automata: an NFA over UTF-16 code unit ranges, its determinization and
//! minimization, and the overlap analysis used to assign token groups.

use crate::error::{GenError, Result};
use crate::grammar::{TermIdx, TermSet};

use fxhash::FxHashMap;

use std::collections::BTreeMap;

pub const MAX_CHAR: u32 = 0xffff;
const GAP_START: u32 = 0xd800;
const GAP_END: u32 = 0xe000;
const ASTRAL: u32 = 0x10000;
const MIN_LOW_SURROGATE: u32 = 0xdc00;
const MAX_LOW_SURROGATE: u32 = 0xdfff;
pub const MAX_CODE_POINT: u32 = 0x10ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NfaStateIdx(pub u32);

impl NfaStateIdx {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A transition on the code units `from..to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge<S> {
    pub from: u32,
    pub to: u32,
    pub target: S,
}

#[derive(Debug, Clone, Default)]
pub struct NfaState {
    pub accepting: Vec<TermIdx>,
    pub edges: Vec<Edge<NfaStateIdx>>,
    /// Epsilon transitions
    pub null_edges: Vec<NfaStateIdx>,
}

#[derive(Debug, Clone, Default)]
pub struct Nfa {
    states: Vec<NfaState>,
}

impl Nfa {
    pub fn new() -> Nfa {
        Default::default()
    }

    pub fn new_state(&mut self) -> NfaStateIdx {
        let idx = NfaStateIdx(self.states.len() as u32);
        self.states.push(NfaState::default());
        idx
    }

    pub fn accepting_state(&mut self, term: TermIdx) -> NfaStateIdx {
        let idx = self.new_state();
        self.states[idx.as_usize()].accepting.push(term);
        idx
    }

    pub fn get(&self, idx: NfaStateIdx) -> &NfaState {
        &self.states[idx.as_usize()]
    }

    pub fn edge(&mut self, from_state: NfaStateIdx, from: u32, to: u32, target: NfaStateIdx) {
        self.states[from_state.as_usize()]
            .edges
            .push(Edge { from, to, target });
    }

    pub fn null_edge(&mut self, from_state: NfaStateIdx, target: NfaStateIdx) {
        self.states[from_state.as_usize()].null_edges.push(target);
    }

    /// Adds edges for the code points `low..hi`, splitting astral code points into
    /// surrogate pairs
    pub fn range_edges(&mut self, from: NfaStateIdx, to: NfaStateIdx, low: u32, hi: u32) {
        let mut low = low;
        if low < ASTRAL {
            if low < GAP_START {
                self.edge(from, low, hi.min(GAP_START), to);
            }
            if hi > GAP_END {
                self.edge(from, low.max(GAP_END), hi.min(MAX_CHAR + 1), to);
            }
            low = ASTRAL;
        }
        if hi <= ASTRAL {
            return;
        }

        let (low_a, low_b) = surrogates(low);
        let (hi_a, hi_b) = surrogates(hi - 1);
        if low_a == hi_a {
            let hop = self.new_state();
            self.edge(from, low_a, low_a + 1, hop);
            self.edge(hop, low_b, hi_b + 1, to);
        } else {
            let mut mid_start = low_a;
            let mut mid_end = hi_a;
            if low_b > MIN_LOW_SURROGATE {
                mid_start += 1;
                let hop = self.new_state();
                self.edge(from, low_a, low_a + 1, hop);
                self.edge(hop, low_b, MAX_LOW_SURROGATE + 1, to);
            }
            if hi_b < MAX_LOW_SURROGATE {
                mid_end -= 1;
                let hop = self.new_state();
                self.edge(from, hi_a, hi_a + 1, hop);
                self.edge(hop, MIN_LOW_SURROGATE, hi_b + 1, to);
            }
            if mid_start <= mid_end {
                let hop = self.new_state();
                self.edge(from, mid_start, mid_end + 1, hop);
                self.edge(hop, MIN_LOW_SURROGATE, MAX_LOW_SURROGATE + 1, to);
            }
        }
    }

    /// Matches any single character, including surrogate pairs
    pub fn any_edges(&mut self, from: NfaStateIdx, to: NfaStateIdx) {
        let mid = self.new_state();
        self.edge(from, 0, MIN_LOW_SURROGATE, to);
        self.edge(from, MIN_LOW_SURROGATE, MAX_CHAR + 1, to);
        self.edge(from, GAP_START, MIN_LOW_SURROGATE, mid);
        self.edge(mid, MIN_LOW_SURROGATE, GAP_END, to);
    }

    /// Epsilon-closure of a state, limited to the states that matter for determinization
    /// (ones that consume input or accept). Sorted.
    fn closure(&self, start: NfaStateIdx) -> Vec<NfaStateIdx> {
        let mut seen = vec![false; self.states.len()];
        let mut result = vec![];
        let mut work = vec![start];
        while let Some(state) = work.pop() {
            if seen[state.as_usize()] {
                continue;
            }
            seen[state.as_usize()] = true;
            let s = self.get(state);
            if !s.edges.is_empty() || !s.accepting.is_empty() {
                result.push(state);
            }
            work.extend(s.null_edges.iter().rev().copied());
        }
        result.sort();
        result
    }

    /// Subset construction. Fails when a token can match the empty string.
    pub fn compile(&self, start: NfaStateIdx, terms: &TermSet) -> Result<Dfa> {
        let mut builder = SubsetBuilder {
            nfa: self,
            labeled: Default::default(),
            dfa: Dfa { states: vec![] },
            closures: Default::default(),
        };
        let start_set = self.closure(start);
        let start_state = builder.explore(start_set);
        let dfa = builder.dfa;
        if let Some(term) = dfa.states[start_state].accepting.first() {
            return Err(GenError::Grammar(format!(
                "Grammar contains zero-length tokens (in '{}')",
                terms.name(*term)
            )));
        }
        Ok(dfa)
    }
}

fn surrogates(code: u32) -> (u32, u32) {
    let offset = code - ASTRAL;
    (0xd800 + (offset >> 10), 0xdc00 + (offset & 0x3ff))
}

struct SubsetBuilder<'a> {
    nfa: &'a Nfa,
    labeled: FxHashMap<Vec<NfaStateIdx>, usize>,
    dfa: Dfa,
    closures: FxHashMap<NfaStateIdx, Vec<NfaStateIdx>>,
}

impl<'a> SubsetBuilder<'a> {
    fn closure(&mut self, state: NfaStateIdx) -> Vec<NfaStateIdx> {
        if let Some(found) = self.closures.get(&state) {
            return found.clone();
        }
        let result = self.nfa.closure(state);
        self.closures.insert(state, result.clone());
        result
    }

    /// Creates DFA states for `set` and everything reachable from it. Work list based, so
    /// deep automata don't recurse.
    fn explore(&mut self, set: Vec<NfaStateIdx>) -> usize {
        let start = self.add_state(set.clone());
        let mut work = vec![(start, set)];
        while let Some((dfa_state, set)) = work.pop() {
            let mut out: Vec<Edge<NfaStateIdx>> = vec![];
            for state in &set {
                out.extend(self.nfa.get(*state).edges.iter().copied());
            }
            for (from, to, targets) in self.merge_edges(&out) {
                let target = match self.labeled.get(&targets) {
                    Some(target) => *target,
                    None => {
                        let target = self.add_state(targets.clone());
                        work.push((target, targets));
                        target
                    }
                };
                self.dfa.states[dfa_state].edges.push(Edge { from, to, target });
            }
        }
        start
    }

    fn add_state(&mut self, set: Vec<NfaStateIdx>) -> usize {
        let mut accepting: Vec<TermIdx> = vec![];
        for state in &set {
            for term in &self.nfa.get(*state).accepting {
                if !accepting.contains(term) {
                    accepting.push(*term);
                }
            }
        }
        accepting.sort();
        let idx = self.dfa.states.len();
        self.dfa.states.push(DfaState {
            accepting,
            edges: vec![],
        });
        self.labeled.insert(set, idx);
        idx
    }

    /// Splits overlapping edges into disjoint ranges, each with the union of the targets'
    /// closures
    fn merge_edges(&mut self, edges: &[Edge<NfaStateIdx>]) -> Vec<(u32, u32, Vec<NfaStateIdx>)> {
        let mut separate: Vec<u32> = vec![];
        for edge in edges {
            separate.push(edge.from);
            separate.push(edge.to);
        }
        separate.sort_unstable();
        separate.dedup();

        let mut result: Vec<(u32, u32, Vec<NfaStateIdx>)> = vec![];
        for pair in separate.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let mut found: Vec<NfaStateIdx> = vec![];
            for edge in edges {
                if edge.to > from && edge.from < to {
                    for target in self.closure(edge.target) {
                        if !found.contains(&target) {
                            found.push(target);
                        }
                    }
                }
            }
            if found.is_empty() {
                continue;
            }
            found.sort();
            match result.last_mut() {
                Some(last) if last.1 == from && last.2 == found => last.1 = to,
                _ => result.push((from, to, found)),
            }
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfaState {
    /// Sorted by `TermIdx`
    pub accepting: Vec<TermIdx>,
    pub edges: Vec<Edge<usize>>,
}

/// A deterministic tokenizer automaton. State 0 is the start state.
#[derive(Debug, Clone)]
pub struct Dfa {
    pub states: Vec<DfaState>,
}

/// Two tokens that can match overlapping input
#[derive(Debug, Clone)]
pub struct TokenConflict {
    pub a: TermIdx,
    pub b: TermIdx,
    /// 0 for a hard conflict. Otherwise positive when `a` is the longer match, negative
    /// when `b` is.
    pub soft: i32,
    pub example_a: String,
    pub example_b: Option<String>,
}

impl TokenConflict {
    pub fn involves(&self, a: TermIdx, b: TermIdx) -> bool {
        (self.a == a && self.b == b) || (self.a == b && self.b == a)
    }
}

fn example_from_path(path: &[u32]) -> String {
    char::decode_utf16(path.iter().map(|c| *c as u16))
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

impl Dfa {
    /// Runs the automaton on `input`, returning the longest match and the terms accepted
    /// at its end
    #[cfg(test)]
    pub fn longest_match(&self, input: &[u16]) -> Option<(usize, &[TermIdx])> {
        let mut state = 0;
        let mut result = None;
        for (i, unit) in input.iter().enumerate() {
            let unit = u32::from(*unit);
            match self.states[state]
                .edges
                .iter()
                .find(|e| e.from <= unit && unit < e.to)
            {
                Some(edge) => state = edge.target,
                None => break,
            }
            if !self.states[state].accepting.is_empty() {
                result = Some((i + 1, &self.states[state].accepting[..]));
            }
        }
        result
    }

    /// States reachable from `start` in depth-first preorder, with the input that reaches
    /// each of them
    fn reachable_from(&self, start: usize) -> Vec<(usize, Vec<u32>)> {
        let mut seen = vec![false; self.states.len()];
        let mut result = vec![];
        let mut stack: Vec<(usize, Vec<u32>)> = vec![(start, vec![])];
        while let Some((state, path)) = stack.pop() {
            if seen[state] {
                continue;
            }
            seen[state] = true;
            for edge in self.states[state].edges.iter().rev() {
                if !seen[edge.target] {
                    let mut next = path.clone();
                    next.push(edge.from);
                    stack.push((edge.target, next));
                }
            }
            result.push((state, path));
        }
        result
    }

    /// Partition refinement, starting from groups of states with the same accepting set.
    /// The result only contains states reachable from the start, renumbered in preorder.
    pub fn minimize(&self) -> Dfa {
        let mut partition: Vec<usize> = vec![0; self.states.len()];
        {
            let mut by_accepting: BTreeMap<&[TermIdx], usize> = BTreeMap::new();
            for (i, state) in self.states.iter().enumerate() {
                let next = by_accepting.len();
                partition[i] = *by_accepting.entry(&state.accepting[..]).or_insert(next);
            }
        }

        loop {
            // A state's signature is its group plus its edges under the current partition
            let mut signatures: FxHashMap<(usize, Vec<(u32, u32, usize)>), usize> = Default::default();
            let mut new_partition = vec![0; self.states.len()];
            for (i, state) in self.states.iter().enumerate() {
                let edges: Vec<(u32, u32, usize)> = state
                    .edges
                    .iter()
                    .map(|e| (e.from, e.to, partition[e.target]))
                    .collect();
                let next = signatures.len();
                new_partition[i] = *signatures.entry((partition[i], edges)).or_insert(next);
            }
            let old_count = partition.iter().max().map(|m| m + 1).unwrap_or(0);
            let new_count = signatures.len();
            partition = new_partition;
            if new_count == old_count {
                break;
            }
        }

        // Pick the first state of each group as its representative
        let mut representative: FxHashMap<usize, usize> = Default::default();
        for (i, group) in partition.iter().enumerate() {
            representative.entry(*group).or_insert(i);
        }
        let canonical = |state: usize| representative[&partition[state]];

        let mut numbering: FxHashMap<usize, usize> = Default::default();
        let mut order: Vec<usize> = vec![];
        let mut stack = vec![canonical(0)];
        while let Some(state) = stack.pop() {
            if numbering.contains_key(&state) {
                continue;
            }
            numbering.insert(state, order.len());
            order.push(state);
            for edge in self.states[state].edges.iter().rev() {
                let target = canonical(edge.target);
                if !numbering.contains_key(&target) {
                    stack.push(target);
                }
            }
        }

        let states = order
            .iter()
            .map(|state| {
                let old = &self.states[*state];
                let mut edges: Vec<Edge<usize>> = vec![];
                for edge in &old.edges {
                    let target = numbering[&canonical(edge.target)];
                    match edges.last_mut() {
                        Some(last) if last.to == edge.from && last.target == target => {
                            last.to = edge.to
                        }
                        _ => edges.push(Edge {
                            from: edge.from,
                            to: edge.to,
                            target,
                        }),
                    }
                }
                DfaState {
                    accepting: old.accepting.clone(),
                    edges,
                }
            })
            .collect();
        Dfa { states }
    }

    /// Terms accepted by states that are part of a cycle (they can match arbitrarily long
    /// input)
    fn cycle_terms(&self) -> Vec<TermIdx> {
        let mut result = vec![];
        for (i, state) in self.states.iter().enumerate() {
            if state.accepting.is_empty() {
                continue;
            }
            let on_cycle = state.edges.iter().any(|e| {
                e.target == i || self.reachable_from(e.target).iter().any(|(s, _)| *s == i)
            });
            if on_cycle {
                for term in &state.accepting {
                    if !result.contains(term) {
                        result.push(*term);
                    }
                }
            }
        }
        result
    }

    /// Finds pairs of tokens that match overlapping input. `occur_together` tells whether
    /// two tokens can be valid in the same parse state.
    pub fn find_conflicts(
        &self,
        terms: &TermSet,
        occur_together: impl Fn(TermIdx, TermIdx) -> bool,
    ) -> Vec<TokenConflict> {
        let mut conflicts: Vec<TokenConflict> = vec![];
        let cycle_terms = self.cycle_terms();

        let mut add = |a: TermIdx, b: TermIdx, soft: i32, path_a: &[u32], path_b: Option<&[u32]>| {
            let (a, b, soft) = if terms.id(a) < terms.id(b) {
                (b, a, -soft)
            } else {
                (a, b, soft)
            };
            match conflicts.iter_mut().find(|c| c.a == a && c.b == b) {
                Some(found) => {
                    if found.soft != soft {
                        found.soft = 0;
                    }
                }
                None => conflicts.push(TokenConflict {
                    a,
                    b,
                    soft,
                    example_a: example_from_path(path_a),
                    example_b: path_b.map(example_from_path),
                }),
            }
        };

        for (state_idx, path) in self.reachable_from(0) {
            let state = &self.states[state_idx];
            if state.accepting.is_empty() {
                continue;
            }
            for (i, a) in state.accepting.iter().enumerate() {
                for b in &state.accepting[i + 1..] {
                    add(*a, *b, 0, &path, None);
                }
            }
            for (next_idx, rest) in self.reachable_from(state_idx) {
                if next_idx == state_idx {
                    continue;
                }
                for term in &self.states[next_idx].accepting {
                    let has_term = state.accepting.contains(term);
                    for orig in &state.accepting {
                        if term == orig {
                            continue;
                        }
                        let soft = if has_term
                            || cycle_terms.contains(term)
                            || !occur_together(*term, *orig)
                        {
                            0
                        } else {
                            1
                        };
                        let mut full = path.clone();
                        full.extend_from_slice(&rest);
                        add(*term, *orig, soft, &path, Some(&full));
                    }
                }
            }
        }
        conflicts
    }

    /// Flattens the automaton into the tokenizer table format. Per state:
    /// `[group_mask, accept_end, edge_count, (term, term_mask)*, (from, to, target)*]`,
    /// where `target` is the offset of the target state's record.
    pub fn to_array(
        &self,
        terms: &TermSet,
        group_masks: &FxHashMap<u32, u32>,
        precedence: &[u32],
    ) -> Result<Vec<u16>> {
        let mask_of = |term: TermIdx| -> u32 {
            group_masks
                .get(&terms.id(term))
                .copied()
                .filter(|mask| *mask != 0)
                .unwrap_or(0xffff)
        };
        let order = self.reachable_from(0);
        let mut offsets = vec![0usize; self.states.len()];
        let mut data: Vec<u32> = vec![];
        // Edge targets, patched once all offsets are known
        let mut patches: Vec<(usize, usize)> = vec![];

        for (state_idx, _) in &order {
            let state = &self.states[*state_idx];
            let start = data.len();
            offsets[*state_idx] = start;
            let accept_end = start + 3 + state.accepting.len() * 2;

            let mut state_mask = 0;
            for (reached, _) in self.reachable_from(*state_idx) {
                for term in &self.states[reached].accepting {
                    state_mask |= mask_of(*term);
                }
            }

            data.push(state_mask);
            data.push(accept_end as u32);
            data.push(state.edges.len() as u32);

            let mut accepting = state.accepting.clone();
            let prec_index = |term: TermIdx| {
                precedence
                    .iter()
                    .position(|id| *id == terms.id(term))
                    .unwrap_or(precedence.len())
            };
            accepting.sort_by(|a, b| {
                prec_index(*a)
                    .cmp(&prec_index(*b))
                    .then(terms.id(*a).cmp(&terms.id(*b)))
            });
            for term in accepting {
                data.push(terms.id(term));
                data.push(mask_of(term));
            }
            for edge in &state.edges {
                data.push(edge.from);
                // The runtime reads an upper bound of 0 as 0x10000
                data.push(if edge.to > MAX_CHAR { 0 } else { edge.to });
                patches.push((data.len(), edge.target));
                data.push(0);
            }
        }

        for (at, target) in patches {
            data[at] = offsets[target] as u32;
        }
        if data.len() > 0xffff {
            return Err(GenError::Capacity(
                "Tokenizer tables too big to represent with 16-bit offsets.".to_owned(),
            ));
        }
        Ok(data.into_iter().map(|v| v as u16).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Props;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn literal(nfa: &mut Nfa, start: NfaStateIdx, value: &str, term: TermIdx) {
        let end = nfa.accepting_state(term);
        let units = utf16(value);
        let mut from = start;
        for (i, unit) in units.iter().enumerate() {
            let next = if i == units.len() - 1 {
                end
            } else {
                nfa.new_state()
            };
            nfa.edge(from, u32::from(*unit), u32::from(*unit) + 1, next);
            from = next;
        }
    }

    #[test]
    fn determinize_and_minimize() {
        let mut terms = TermSet::new();
        let plus = terms.make_terminal("\"+\"", None, Props::new());
        let plus_plus = terms.make_terminal("\"++\"", None, Props::new());
        let word = terms.make_terminal("Word", None, Props::new());
        let mut nfa = Nfa::new();
        let start = nfa.new_state();
        let a = nfa.new_state();
        nfa.null_edge(start, a);
        literal(&mut nfa, a, "+", plus);
        literal(&mut nfa, start, "++", plus_plus);
        // Word { $[a-z]+ }
        let loop_state = nfa.accepting_state(word);
        nfa.range_edges(start, loop_state, 'a' as u32, 'z' as u32 + 1);
        nfa.range_edges(loop_state, loop_state, 'a' as u32, 'z' as u32 + 1);

        let dfa = nfa.compile(start, &terms).unwrap();
        let min = dfa.minimize();
        assert!(min.states.len() <= dfa.states.len());
        for input in ["+", "++", "abc", "a", "+a", "", "zz+"] {
            let units = utf16(input);
            assert_eq!(
                dfa.longest_match(&units).map(|(n, t)| (n, t.to_vec())),
                min.longest_match(&units).map(|(n, t)| (n, t.to_vec())),
                "input {:?}",
                input
            );
        }
        assert_eq!(min.longest_match(&utf16("++")), Some((2, &[plus_plus][..])));
        assert_eq!(min.longest_match(&utf16("abc+")), Some((3, &[word][..])));
    }

    // "+", "++", "-+", Word { $[a-z]+ }, Dash { "-"+ }
    fn fuzz_automaton() -> Dfa {
        let mut terms = TermSet::new();
        let plus = terms.make_terminal("\"+\"", None, Props::new());
        let plus_plus = terms.make_terminal("\"++\"", None, Props::new());
        let minus_plus = terms.make_terminal("\"-+\"", None, Props::new());
        let word = terms.make_terminal("Word", None, Props::new());
        let dash = terms.make_terminal("Dash", None, Props::new());
        let mut nfa = Nfa::new();
        let start = nfa.new_state();
        literal(&mut nfa, start, "+", plus);
        literal(&mut nfa, start, "++", plus_plus);
        literal(&mut nfa, start, "-+", minus_plus);
        let word_loop = nfa.accepting_state(word);
        nfa.range_edges(start, word_loop, 'a' as u32, 'z' as u32 + 1);
        nfa.range_edges(word_loop, word_loop, 'a' as u32, 'z' as u32 + 1);
        let dash_loop = nfa.accepting_state(dash);
        nfa.edge(start, '-' as u32, '-' as u32 + 1, dash_loop);
        nfa.edge(dash_loop, '-' as u32, '-' as u32 + 1, dash_loop);
        nfa.compile(start, &terms).unwrap()
    }

    proptest::proptest! {
        #[test]
        fn minimized_automaton_matches_the_same(input in "[-+ab]{0,8}") {
            let dfa = fuzz_automaton();
            let min = dfa.minimize();
            let units = utf16(&input);
            proptest::prop_assert_eq!(
                dfa.longest_match(&units).map(|(n, t)| (n, t.to_vec())),
                min.longest_match(&units).map(|(n, t)| (n, t.to_vec()))
            );
        }
    }

    #[test]
    fn zero_length_tokens_are_rejected() {
        let mut terms = TermSet::new();
        let t = terms.make_terminal("Empty", None, Props::new());
        let mut nfa = Nfa::new();
        let start = nfa.new_state();
        let end = nfa.accepting_state(t);
        nfa.null_edge(start, end);
        match nfa.compile(start, &terms) {
            Err(GenError::Grammar(msg)) => assert!(msg.contains("zero-length tokens (in 'Empty')")),
            other => panic!("unexpected {:?}", other.map(|d| d.states.len())),
        }
    }

    #[test]
    fn astral_ranges_use_surrogate_pairs() {
        let mut terms = TermSet::new();
        let t = terms.make_terminal("Emoji", None, Props::new());
        let mut nfa = Nfa::new();
        let start = nfa.new_state();
        let end = nfa.accepting_state(t);
        nfa.range_edges(start, end, 0x1f600, 0x1f650);
        let dfa = nfa.compile(start, &terms).unwrap().minimize();
        assert_eq!(dfa.longest_match(&utf16("\u{1F600}")), Some((2, &[t][..])));
        assert_eq!(dfa.longest_match(&utf16("\u{1F64F}")), Some((2, &[t][..])));
        assert_eq!(dfa.longest_match(&utf16("\u{1F650}")), None);
    }

    #[test]
    fn finds_prefix_conflicts() {
        let mut terms = TermSet::new();
        let plus = terms.make_terminal("\"+\"", None, Props::new());
        let plus_plus = terms.make_terminal("\"++\"", None, Props::new());
        let mut nfa = Nfa::new();
        let start = nfa.new_state();
        literal(&mut nfa, start, "+", plus);
        literal(&mut nfa, start, "++", plus_plus);
        let dfa = nfa.compile(start, &terms).unwrap().minimize();
        terms.finish(&[]).unwrap();

        let conflicts = dfa.find_conflicts(&terms, |_, _| true);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].involves(plus, plus_plus));
        assert_ne!(conflicts[0].soft, 0);

        let hard = dfa.find_conflicts(&terms, |_, _| false);
        assert_eq!(hard[0].soft, 0);
        assert_eq!(hard[0].example_a, "+");
        assert_eq!(hard[0].example_b.as_deref(), Some("++"));
    }

    #[test]
    fn table_layout() {
        let mut terms = TermSet::new();
        let x = terms.make_terminal("\"x\"", None, Props::new());
        let mut nfa = Nfa::new();
        let start = nfa.new_state();
        literal(&mut nfa, start, "x", x);
        let dfa = nfa.compile(start, &terms).unwrap().minimize();
        terms.finish(&[]).unwrap();
        let data = dfa.to_array(&terms, &Default::default(), &[]).unwrap();
        let x_id = terms.id(x) as u16;
        // start: mask, acceptEnd=3, one edge 'x' -> offset 6
        // end: mask, acceptEnd=11, no edges, accepts x with the default mask
        assert_eq!(
            data,
            vec![0xffff, 3, 1, 120, 121, 6, 0xffff, 11, 0, x_id, 0xffff]
        );
    }

    #[test]
    fn top_of_the_bmp_is_stored_as_zero() {
        let mut terms = TermSet::new();
        let any = terms.make_terminal("Any", None, Props::new());
        let mut nfa = Nfa::new();
        let start = nfa.new_state();
        let end = nfa.accepting_state(any);
        nfa.any_edges(start, end);
        let dfa = nfa.compile(start, &terms).unwrap().minimize();
        terms.finish(&[]).unwrap();
        let data = dfa.to_array(&terms, &Default::default(), &[]).unwrap();
        let accept_end = data[1] as usize;
        let edges: Vec<(u16, u16)> = (0..data[2] as usize)
            .map(|e| (data[accept_end + e * 3], data[accept_end + e * 3 + 1]))
            .collect();
        assert!(edges.iter().any(|(from, to)| *to == 0 && *from <= 0xffff));
        assert!(edges.iter().all(|(_, to)| *to != 0xffff));
    }
}

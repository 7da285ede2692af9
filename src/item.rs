//! LR(1) items ("positions" in a rule) and the arena they live in

use crate::grammar::{Conflicts, Grammar, RuleIdx, TermIdx};

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PosIdx(pub u32);

impl PosIdx {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Pos {
    pub rule: RuleIdx,
    /// Cursor position, `0..=rule.parts.len()`
    pub pos: usize,
    /// Lookahead terms, sorted by `TermIdx`
    pub ahead: Vec<TermIdx>,
    /// Ambiguity groups inherited from the position that added this item. Sorted.
    pub ambig_ahead: Vec<String>,
    /// The skip term in effect after the rule is reduced
    pub skip_ahead: TermIdx,
    /// The item that caused this one to be added, for diagnostics
    pub via: Option<PosIdx>,
    pub hash: u32,
}

fn hash(a: u32, b: u32) -> u32 {
    (a << 5).wrapping_add(a).wrapping_add(b)
}

pub fn hash_str(mut h: u32, s: &str) -> u32 {
    for unit in s.encode_utf16() {
        h = hash(h, u32::from(unit));
    }
    h
}

/// Hash of a sorted position set
pub fn hash_positions(arena: &PosArena, set: &[PosIdx]) -> u32 {
    set.iter().fold(0, |h, p| hash(h, arena.get(*p).hash))
}

impl Pos {
    pub fn new(
        rule: RuleIdx,
        pos: usize,
        ahead: Vec<TermIdx>,
        ambig_ahead: Vec<String>,
        skip_ahead: TermIdx,
        via: Option<PosIdx>,
    ) -> Pos {
        Pos {
            rule,
            pos,
            ahead,
            ambig_ahead,
            skip_ahead,
            via,
            hash: 0,
        }
    }

    pub fn finish(&mut self, grammar: &Grammar) {
        let mut h = hash(hash(grammar.rule(self.rule).id, self.pos as u32), self.skip_ahead.0);
        for term in &self.ahead {
            h = hash(h, term.0);
        }
        for group in &self.ambig_ahead {
            h = hash_str(h, group);
        }
        self.hash = h;
    }

    pub fn next(&self, grammar: &Grammar) -> Option<TermIdx> {
        grammar.rule(self.rule).parts.get(self.pos).copied()
    }

    pub fn at_end(&self, grammar: &Grammar) -> bool {
        self.pos == grammar.rule(self.rule).parts.len()
    }

    /// The skip term active at this position
    pub fn skip(&self, grammar: &Grammar) -> TermIdx {
        if self.at_end(grammar) {
            self.skip_ahead
        } else {
            grammar.rule(self.rule).skip
        }
    }

    /// Conflict info at gap `pos` of the rule. At the end of the rule, the inherited
    /// ambiguity groups are included.
    pub fn conflicts_at(&self, grammar: &Grammar, pos: usize) -> Conflicts {
        let rule = grammar.rule(self.rule);
        let result = rule.conflicts[pos].clone();
        if pos == rule.parts.len() && !self.ambig_ahead.is_empty() {
            return result.join(&Conflicts {
                ambig_groups: self.ambig_ahead.clone(),
                ..Default::default()
            });
        }
        result
    }

    pub fn conflicts(&self, grammar: &Grammar) -> Conflicts {
        self.conflicts_at(grammar, self.pos)
    }

    pub fn eq_simple(&self, other: &Pos) -> bool {
        self.rule == other.rule && self.pos == other.pos
    }

    pub fn same(&self, other: &Pos) -> bool {
        self.hash == other.hash
            && self.rule == other.rule
            && self.pos == other.pos
            && self.skip_ahead == other.skip_ahead
            && self.ahead == other.ahead
            && self.ambig_ahead == other.ambig_ahead
    }

    pub fn cmp(&self, other: &Pos, grammar: &Grammar) -> Ordering {
        grammar
            .rule(self.rule)
            .id
            .cmp(&grammar.rule(other.rule).id)
            .then_with(|| self.pos.cmp(&other.pos))
            .then_with(|| self.skip_ahead.cmp(&other.skip_ahead))
            .then_with(|| crate::grammar::cmp_seq(&self.ahead, &other.ahead, |a, b| a.cmp(b)))
            .then_with(|| {
                crate::grammar::cmp_seq(&self.ambig_ahead, &other.ambig_ahead, |a, b| a.cmp(b))
            })
    }
}

/// Owns every position created during a build. Positions refer to each other (`via`)
/// by index.
#[derive(Debug, Default)]
pub struct PosArena {
    positions: Vec<Pos>,
}

impl PosArena {
    pub fn new() -> PosArena {
        Default::default()
    }

    pub fn add(&mut self, pos: Pos) -> PosIdx {
        let idx = PosIdx(self.positions.len() as u32);
        self.positions.push(pos);
        idx
    }

    pub fn get(&self, idx: PosIdx) -> &Pos {
        &self.positions[idx.as_usize()]
    }

    pub fn get_mut(&mut self, idx: PosIdx) -> &mut Pos {
        &mut self.positions[idx.as_usize()]
    }

    pub fn advance(&mut self, idx: PosIdx, grammar: &Grammar) -> PosIdx {
        let old = self.get(idx);
        let mut pos = Pos::new(
            old.rule,
            old.pos + 1,
            old.ahead.clone(),
            old.ambig_ahead.clone(),
            old.skip_ahead,
            old.via,
        );
        pos.finish(grammar);
        self.add(pos)
    }

    pub fn sort(&self, set: &mut [PosIdx], grammar: &Grammar) {
        set.sort_by(|a, b| self.get(*a).cmp(self.get(*b), grammar));
    }

    pub fn same_set(&self, a: &[PosIdx], b: &[PosIdx]) -> bool {
        a.len() == b.len()
            && a
                .iter()
                .zip(b)
                .all(|(a, b)| a == b || self.get(*a).same(self.get(*b)))
    }

    /// The terms consumed on the way to this position, following `via` links
    pub fn trail(&self, idx: PosIdx, grammar: &Grammar, max_len: usize) -> String {
        let mut result: Vec<&str> = vec![];
        let mut cur = Some(idx);
        while let Some(p) = cur {
            let pos = self.get(p);
            let rule = grammar.rule(pos.rule);
            for part in rule.parts[..pos.pos].iter().rev() {
                result.push(grammar.terms.name(*part));
            }
            cur = pos.via;
        }
        result.reverse();
        let value = result.join(" ");
        let n_chars = value.chars().count();
        if n_chars <= max_len {
            return value;
        }
        let tail: String = value.chars().skip(n_chars - max_len).collect();
        match tail.find(' ') {
            Some(space) => format!("… {}", &tail[space + 1..]),
            None => tail,
        }
    }

    /// Extends a set of positions with the positions in `context` that caused the
    /// rules at offset 0 to be added.
    pub fn add_origins(&self, group: &[PosIdx], context: &[PosIdx], grammar: &Grammar) -> Vec<PosIdx> {
        let mut result = group.to_vec();
        let mut i = 0;
        while i < result.len() {
            let next = self.get(result[i]);
            if next.pos == 0 {
                let name = grammar.rule(next.rule).name;
                for pos in context {
                    if self.get(*pos).next(grammar) == Some(name) && !result.contains(pos) {
                        result.push(*pos);
                    }
                }
            }
            i += 1;
        }
        result
    }

    /// Describes the closest common ancestor of two positions, if any.
    pub fn conflict_origin(&self, a: PosIdx, b: PosIdx, grammar: &Grammar) -> String {
        if self.get(a).eq_simple(self.get(b)) {
            return String::new();
        }
        let mut p = Some(a);
        while let Some(pa) = p {
            let mut p2 = Some(b);
            while let Some(pb) = p2 {
                if self.get(pa).eq_simple(self.get(pb)) {
                    return format!(
                        "\nShared origin: {}{}{}",
                        PosDisplay::new(self.get(pa), grammar),
                        self.via_path(pa, a, grammar),
                        self.via_path(pa, b, grammar)
                    );
                }
                p2 = self.get(pb).via;
            }
            p = self.get(pa).via;
        }
        String::new()
    }

    fn via_path(&self, root: PosIdx, start: PosIdx, grammar: &Grammar) -> String {
        let mut hist = vec![];
        let mut p = self.get(start).via;
        while let Some(cur) = p {
            if self.get(cur).eq_simple(self.get(root)) {
                break;
            }
            hist.push(cur);
            p = self.get(cur).via;
        }
        if hist.is_empty() {
            return String::new();
        }
        hist.insert(0, start);
        hist.reverse();
        let mut out = String::new();
        for (i, p) in hist.iter().enumerate() {
            out.push('\n');
            out.push_str(&"  ".repeat(i + 1));
            if *p != start {
                out.push_str("via ");
            }
            out.push_str(&PosDisplay::new(self.get(*p), grammar).to_string());
        }
        out
    }
}

pub struct PosDisplay<'a, 'b> {
    pos: &'a Pos,
    grammar: &'b Grammar,
}

impl<'a, 'b> PosDisplay<'a, 'b> {
    pub fn new(pos: &'a Pos, grammar: &'b Grammar) -> Self {
        PosDisplay { pos, grammar }
    }
}

impl<'a, 'b> fmt::Display for PosDisplay<'a, 'b> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = self.grammar.rule(self.pos.rule);
        write!(f, "{} ->", self.grammar.terms.name(rule.name))?;
        for (i, part) in rule.parts.iter().enumerate() {
            if i == self.pos.pos {
                write!(f, " ·")?;
            }
            write!(f, " {}", self.grammar.terms.name(*part))?;
        }
        if self.pos.pos == rule.parts.len() {
            write!(f, " ·")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{Props, TermSet};

    fn small_grammar() -> Grammar {
        let mut terms = TermSet::new();
        let top = terms.make_top(None, Props::new());
        let e = terms.make_non_terminal("E", None, Props::new());
        let plus = terms.make_terminal("\"+\"", None, Props::new());
        let x = terms.make_terminal("x", None, Props::new());
        let skip = terms.eof;
        let rules = vec![
            terms.new_rule(top, vec![e], vec![Conflicts::none(); 2], skip),
            terms.new_rule(e, vec![e, plus, e], vec![Conflicts::none(); 4], skip),
            terms.new_rule(e, vec![x], vec![Conflicts::none(); 2], skip),
        ];
        Grammar::new(terms, rules)
    }

    #[test]
    fn display_and_trail() {
        let grammar = small_grammar();
        let mut arena = PosArena::new();
        let eof = grammar.terms.eof;
        let mut start = Pos::new(RuleIdx(1), 0, vec![eof], vec![], eof, None);
        start.finish(&grammar);
        let start = arena.add(start);
        let one = arena.advance(start, &grammar);
        let two = arena.advance(one, &grammar);
        assert_eq!(
            PosDisplay::new(arena.get(two), &grammar).to_string(),
            "E -> E \"+\" · E"
        );
        assert_eq!(arena.trail(two, &grammar, 60), "E \"+\"");
        assert_eq!(arena.trail(two, &grammar, 4), "… \"+\"");
        assert!(arena.get(two).eq_simple(arena.get(two)));
        assert!(!arena.get(one).same(arena.get(two)));
    }

    #[test]
    fn advancing_keeps_the_origin() {
        let grammar = small_grammar();
        let mut arena = PosArena::new();
        let eof = grammar.terms.eof;
        let mut start = Pos::new(RuleIdx(1), 0, vec![eof], vec![], eof, None);
        start.finish(&grammar);
        let start = arena.add(start);
        let one = arena.advance(start, &grammar);
        let two = arena.advance(one, &grammar);
        let mut inner = Pos::new(RuleIdx(2), 0, vec![eof], vec![], eof, Some(two));
        inner.finish(&grammar);
        let inner = arena.add(inner);
        let done = arena.advance(inner, &grammar);
        assert_eq!(arena.get(done).via, Some(two));
        assert_eq!(arena.trail(done, &grammar, 60), "E \"+\" x");
    }

    #[test]
    fn hashes_differ_by_lookahead() {
        let grammar = small_grammar();
        let eof = grammar.terms.eof;
        let mut a = Pos::new(RuleIdx(2), 0, vec![eof], vec![], eof, None);
        let mut b = Pos::new(RuleIdx(2), 0, vec![eof, TermIdx(4)], vec![], eof, None);
        a.finish(&grammar);
        b.finish(&grammar);
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.cmp(&b, &grammar), Ordering::Less);
    }
}

//! Implementation of "first" sets

use crate::bitset::BitSet;
use crate::grammar::{Grammar, Rule, TermIdx};

use std::fmt;

/// Maps non-terminals to their first sets
#[derive(Debug)]
pub struct FirstTable(Vec<FirstSet>);

#[derive(Debug, Clone, PartialEq)]
pub struct FirstSet {
    empty: bool,
    terminals: BitSet<TermIdx>,
}

impl FirstSet {
    pub fn new(n_terms: usize) -> Self {
        FirstSet {
            empty: false,
            terminals: BitSet::new(n_terms),
        }
    }

    pub fn has_empty(&self) -> bool {
        self.empty
    }

    pub fn terminals(&self) -> impl Iterator<Item = TermIdx> + '_ {
        self.terminals.elems()
    }

    pub fn contains(&self, term: TermIdx) -> bool {
        self.terminals.get(&term)
    }
}

impl FirstTable {
    pub fn get_first(&self, term: TermIdx) -> &FirstSet {
        &self.0[term.as_usize()]
    }

    /// Terminals that can come after position `pos` (the symbol at `pos` itself excluded)
    /// in `rule`, falling back to `after` when the rest of the rule can be empty.
    pub fn terms_ahead(
        &self,
        grammar: &Grammar,
        rule: &Rule,
        pos: usize,
        after: &[TermIdx],
    ) -> Vec<TermIdx> {
        let mut found: Vec<TermIdx> = vec![];
        for next in &rule.parts[(pos + 1).min(rule.parts.len())..] {
            if grammar.is_terminal(*next) {
                add_to(&mut found, *next);
                return found;
            }
            let first = self.get_first(*next);
            for term in first.terminals() {
                add_to(&mut found, term);
            }
            if !first.has_empty() {
                return found;
            }
        }
        for term in after {
            add_to(&mut found, *term);
        }
        found
    }
}

fn add_to(set: &mut Vec<TermIdx>, term: TermIdx) {
    if !set.contains(&term) {
        set.push(term);
    }
}

pub fn generate_first_table(grammar: &Grammar) -> FirstTable {
    let n_terms = grammar.terms.indices().count();
    let mut table = FirstTable(vec![FirstSet::new(n_terms); n_terms]);

    let mut updated = true;
    while updated {
        updated = false;
        for rule in &grammar.rules {
            let mut set = table.0[rule.name.as_usize()].clone();
            let mut nullable = true;
            for part in &rule.parts {
                if grammar.is_terminal(*part) {
                    set.terminals.set(part);
                    nullable = false;
                    break;
                }
                let part_first = &table.0[part.as_usize()];
                set.terminals.union_with(&part_first.terminals);
                if !part_first.empty {
                    nullable = false;
                    break;
                }
            }
            if nullable {
                set.empty = true;
            }
            let current = &mut table.0[rule.name.as_usize()];
            if *current != set {
                *current = set;
                updated = true;
            }
        }
    }

    if log::log_enabled!(log::Level::Trace) {
        for term in grammar.terms.indices() {
            if !grammar.term_rules(term).is_empty() {
                log::trace!(
                    "first({}) = {}",
                    grammar.terms.name(term),
                    FirstSetDisplay {
                        set: &table.0[term.as_usize()],
                        grammar
                    }
                );
            }
        }
    }

    table
}

pub struct FirstSetDisplay<'a, 'b> {
    pub set: &'a FirstSet,
    pub grammar: &'b Grammar,
}

impl<'a, 'b> fmt::Display for FirstSetDisplay<'a, 'b> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (t_idx, t) in self.set.terminals().enumerate() {
            if t_idx != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.grammar.terms.name(t))?;
        }
        write!(f, "}}")?;

        if self.set.empty {
            write!(f, " (+ empty)")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{Conflicts, Props, TermSet};

    #[test]
    fn first_sets_with_nullable() {
        let mut terms = TermSet::new();
        let top = terms.make_top(None, Props::new());
        let a = terms.make_non_terminal("a", None, Props::new());
        let b = terms.make_non_terminal("b", None, Props::new());
        let x = terms.make_terminal("x", None, Props::new());
        let y = terms.make_terminal("y", None, Props::new());
        let skip = terms.eof;
        let none = |n: usize| vec![Conflicts::none(); n + 1];
        let rules = vec![
            terms.new_rule(top, vec![a, b], none(2), skip),
            terms.new_rule(a, vec![], none(0), skip),
            terms.new_rule(a, vec![x], none(1), skip),
            terms.new_rule(b, vec![y], none(1), skip),
        ];
        let grammar = Grammar::new(terms, rules);
        let table = generate_first_table(&grammar);

        let first_a = table.get_first(a);
        assert!(first_a.has_empty());
        assert_eq!(first_a.terminals().collect::<Vec<_>>(), vec![x]);

        let first_top = table.get_first(top);
        assert!(!first_top.has_empty());
        assert_eq!(first_top.terminals().collect::<Vec<_>>(), vec![x, y]);
        assert_eq!(
            FirstSetDisplay {
                set: first_a,
                grammar: &grammar
            }
            .to_string(),
            "{x} (+ empty)"
        );

        let ahead = table.terms_ahead(&grammar, &grammar.rules[0], 0, &[grammar.terms.eof]);
        assert_eq!(ahead, vec![y]);
        let ahead = table.terms_ahead(&grammar, &grammar.rules[0], 1, &[grammar.terms.eof]);
        assert_eq!(ahead, vec![grammar.terms.eof]);
    }
}

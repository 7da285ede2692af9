//! Terms, rules and the conflict annotations attached to them

use crate::error::{GenError, Result};

use fxhash::FxHashMap;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Index of a term in its `TermSet`. Terms are numbered in creation order, which is also
/// the order used to break ties when sorting.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
pub struct TermIdx(pub u32);

impl TermIdx {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Index of a rule in the final rule list of a `Grammar`
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
pub struct RuleIdx(pub u32);

impl RuleIdx {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub fn from_usize(i: usize) -> Self {
        RuleIdx(i as u32)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct TermFlags(u8);

impl TermFlags {
    pub const TERMINAL: TermFlags = TermFlags(1);
    pub const TOP: TermFlags = TermFlags(2);
    pub const EOF: TermFlags = TermFlags(4);
    pub const PRESERVE: TermFlags = TermFlags(8);
    pub const REPEATED: TermFlags = TermFlags(16);
    pub const INLINE: TermFlags = TermFlags(32);

    pub fn empty() -> TermFlags {
        TermFlags(0)
    }

    pub fn contains(self, other: TermFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: TermFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for TermFlags {
    type Output = TermFlags;

    fn bitor(self, rhs: TermFlags) -> TermFlags {
        TermFlags(self.0 | rhs.0)
    }
}

/// Node props, by prop name. Values are already resolved to strings.
pub type Props = BTreeMap<String, String>;

/// The id of the error term, which is always the first node type
pub const ERROR_TERM_ID: u32 = 0;

#[derive(Debug, Clone)]
pub struct Term {
    pub name: String,
    pub flags: TermFlags,
    pub node_name: Option<String>,
    pub props: Props,
    /// Assigned by `TermSet::finish`
    pub id: Option<u32>,
}

impl Term {
    pub fn terminal(&self) -> bool {
        self.flags.contains(TermFlags::TERMINAL)
    }

    pub fn top(&self) -> bool {
        self.flags.contains(TermFlags::TOP)
    }

    #[cfg(test)]
    pub fn eof(&self) -> bool {
        self.flags.contains(TermFlags::EOF)
    }

    pub fn preserve(&self) -> bool {
        self.flags.contains(TermFlags::PRESERVE)
    }

    pub fn repeated(&self) -> bool {
        self.flags.contains(TermFlags::REPEATED)
    }

    pub fn inline(&self) -> bool {
        self.flags.contains(TermFlags::INLINE)
    }

    pub fn set_preserve(&mut self) {
        self.flags.insert(TermFlags::PRESERVE);
    }

    pub fn set_inline(&mut self) {
        self.flags.insert(TermFlags::INLINE);
    }

    /// Whether this term shows up in the output tree
    pub fn node_type(&self) -> bool {
        self.top() || self.node_name.is_some() || !self.props.is_empty() || self.repeated()
    }

    /// Terms that can't be inlined or merged away
    pub fn interesting(&self) -> bool {
        !self.flags.is_empty() || self.node_name.is_some()
    }
}

/// Precedence information attached to a position in a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Conflicts {
    pub precedence: i32,
    /// Sorted, without duplicates
    pub ambig_groups: Vec<String>,
    pub cut: i32,
}

impl Conflicts {
    pub fn none() -> Conflicts {
        Conflicts::default()
    }

    pub fn with_precedence(precedence: i32) -> Conflicts {
        Conflicts {
            precedence,
            ..Default::default()
        }
    }

    pub fn with_ambig_group(group: String) -> Conflicts {
        Conflicts {
            ambig_groups: vec![group],
            ..Default::default()
        }
    }

    pub fn with_cut(cut: i32) -> Conflicts {
        Conflicts {
            cut,
            ..Default::default()
        }
    }

    pub fn is_none(&self) -> bool {
        self.precedence == 0 && self.cut == 0 && self.ambig_groups.is_empty()
    }

    pub fn join(&self, other: &Conflicts) -> Conflicts {
        if self.is_none() || self == other {
            return other.clone();
        }
        if other.is_none() {
            return self.clone();
        }
        let mut ambig_groups = self.ambig_groups.clone();
        for group in &other.ambig_groups {
            if !ambig_groups.contains(group) {
                ambig_groups.push(group.clone());
            }
        }
        ambig_groups.sort();
        Conflicts {
            precedence: self.precedence.max(other.precedence),
            ambig_groups,
            cut: self.cut.max(other.cut),
        }
    }

    pub fn cmp(&self, other: &Conflicts) -> Ordering {
        self.precedence
            .cmp(&other.precedence)
            .then_with(|| cmp_seq(&self.ambig_groups, &other.ambig_groups, |a, b| a.cmp(b)))
            .then_with(|| self.cut.cmp(&other.cut))
    }
}

/// Compares by length first, then element-wise
pub fn cmp_seq<T, F: Fn(&T, &T) -> Ordering>(a: &[T], b: &[T], cmp: F) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| {
        a.iter()
            .zip(b)
            .map(|(a, b)| cmp(a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    })
}

/// A production `name -> parts`. `conflicts` has an entry per gap between parts, so
/// `parts.len() + 1` entries.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Creation order, used for stable sorting
    pub id: u32,
    pub name: TermIdx,
    pub parts: Vec<TermIdx>,
    pub conflicts: Vec<Conflicts>,
    /// The skip term active where this rule was defined
    pub skip: TermIdx,
}

impl Rule {
    pub fn cmp_no_name(&self, other: &Rule) -> Ordering {
        self.parts
            .len()
            .cmp(&other.parts.len())
            .then_with(|| self.skip.cmp(&other.skip))
            .then_with(|| {
                self.parts
                    .iter()
                    .zip(&other.parts)
                    .map(|(a, b)| a.cmp(b))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| cmp_seq(&self.conflicts, &other.conflicts, |a, b| a.cmp(b)))
    }

    pub fn is_repeat_wrap(&self, terms: &TermSet) -> bool {
        terms.get(self.name).repeated() && self.parts.len() == 2 && self.parts[0] == self.name
    }

    pub fn same_reduce(&self, other: &Rule, terms: &TermSet) -> bool {
        self.name == other.name
            && self.parts.len() == other.parts.len()
            && self.is_repeat_wrap(terms) == other.is_repeat_wrap(terms)
    }
}

/// Result of numbering the terms of a grammar
#[derive(Debug, Clone)]
pub struct TermInfo {
    /// Node types, in id order (the error term first)
    pub node_types: Vec<TermIdx>,
    /// Names of all live terms, by id
    pub names: BTreeMap<u32, String>,
    pub min_repeat_term: u32,
    pub max_term: u32,
}

/// All terms created during a build, plus the build-wide counters used to give terms
/// and rules their creation order.
#[derive(Debug, Clone)]
pub struct TermSet {
    terms: Vec<Term>,
    names: FxHashMap<String, TermIdx>,
    pub eof: TermIdx,
    pub error: TermIdx,
    pub tops: Vec<TermIdx>,
    /// Terms that survived `finish`, in creation order
    live: Vec<TermIdx>,
    next_rule_id: u32,
}

impl TermSet {
    pub fn new() -> TermSet {
        let mut set = TermSet {
            terms: vec![],
            names: Default::default(),
            eof: TermIdx(0),
            error: TermIdx(0),
            tops: vec![],
            live: vec![],
            next_rule_id: 0,
        };
        set.eof = set.term("␄", None, TermFlags::TERMINAL | TermFlags::EOF, Props::new());
        set.error = set.term("⚠", Some("⚠".to_owned()), TermFlags::PRESERVE, Props::new());
        set
    }

    fn term(
        &mut self,
        name: &str,
        node_name: Option<String>,
        flags: TermFlags,
        props: Props,
    ) -> TermIdx {
        let idx = TermIdx(self.terms.len() as u32);
        self.terms.push(Term {
            name: name.to_owned(),
            flags,
            node_name,
            props,
            id: None,
        });
        self.names.insert(name.to_owned(), idx);
        idx
    }

    pub fn make_top(&mut self, node_name: Option<String>, props: Props) -> TermIdx {
        let term = self.term("@top", node_name, TermFlags::TOP, props);
        self.tops.push(term);
        term
    }

    pub fn make_terminal(&mut self, name: &str, node_name: Option<String>, props: Props) -> TermIdx {
        self.term(name, node_name, TermFlags::TERMINAL, props)
    }

    pub fn make_non_terminal(
        &mut self,
        name: &str,
        node_name: Option<String>,
        props: Props,
    ) -> TermIdx {
        self.term(name, node_name, TermFlags::empty(), props)
    }

    pub fn make_repeat(&mut self, name: &str) -> TermIdx {
        self.term(name, None, TermFlags::REPEATED, Props::new())
    }

    pub fn unique_name(&self, name: &str) -> String {
        let mut i = 0;
        loop {
            let candidate = if i == 0 {
                name.to_owned()
            } else {
                format!("{}-{}", name, i)
            };
            if !self.names.contains_key(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }

    pub fn new_rule(
        &mut self,
        name: TermIdx,
        parts: Vec<TermIdx>,
        conflicts: Vec<Conflicts>,
        skip: TermIdx,
    ) -> Rule {
        debug_assert_eq!(parts.len() + 1, conflicts.len());
        let id = self.next_rule_id;
        self.next_rule_id += 1;
        Rule {
            id,
            name,
            parts,
            conflicts,
            skip,
        }
    }

    pub fn get(&self, idx: TermIdx) -> &Term {
        &self.terms[idx.as_usize()]
    }

    pub fn get_mut(&mut self, idx: TermIdx) -> &mut Term {
        &mut self.terms[idx.as_usize()]
    }

    #[cfg(test)]
    pub fn lookup(&self, name: &str) -> Option<TermIdx> {
        self.names.get(name).copied()
    }

    pub fn name(&self, idx: TermIdx) -> &str {
        &self.get(idx).name
    }

    /// The numeric id of a live term. Terms dropped by `finish` map to 0, the error term.
    pub fn id(&self, idx: TermIdx) -> u32 {
        self.get(idx).id.unwrap_or(ERROR_TERM_ID)
    }

    pub fn indices(&self) -> impl Iterator<Item = TermIdx> {
        (0..self.terms.len() as u32).map(TermIdx)
    }

    /// Drops terms that aren't used by `rules` and assigns ids to the rest: node types
    /// first, then repeat terms, then the end-of-input term, then everything else.
    pub fn finish(&mut self, rules: &[Rule]) -> Result<TermInfo> {
        let mut used = vec![false; self.terms.len()];
        for rule in rules {
            used[rule.name.as_usize()] = true;
            for part in &rule.parts {
                used[part.as_usize()] = true;
            }
        }
        self.live = self
            .indices()
            .filter(|t| {
                let term = self.get(*t);
                term.terminal() || term.preserve() || used[t.as_usize()]
            })
            .collect();
        for term in &mut self.terms {
            term.id = None;
        }

        let mut node_types = vec![self.error];
        self.get_mut(self.error).id = Some(ERROR_TERM_ID);
        let mut next_id = ERROR_TERM_ID + 1;

        for idx in self.live.clone() {
            let term = self.get_mut(idx);
            if term.id.is_none() && term.node_type() && !term.repeated() {
                term.id = Some(next_id);
                next_id += 1;
                node_types.push(idx);
            }
        }

        let min_repeat_term = next_id;
        for idx in self.live.clone() {
            let term = self.get_mut(idx);
            if term.repeated() {
                term.id = Some(next_id);
                next_id += 1;
                node_types.push(idx);
            }
        }

        let eof = self.eof;
        self.get_mut(eof).id = Some(next_id);
        next_id += 1;

        let mut names = BTreeMap::new();
        for idx in self.live.clone() {
            let term = self.get_mut(idx);
            let id = match term.id {
                Some(id) => id,
                None => {
                    term.id = Some(next_id);
                    next_id += 1;
                    next_id - 1
                }
            };
            names.insert(id, term.name.clone());
        }

        if next_id >= 0xfffe {
            return Err(GenError::Capacity("Too many terms".to_owned()));
        }

        Ok(TermInfo {
            node_types,
            names,
            min_repeat_term,
            max_term: next_id - 1,
        })
    }
}

impl Default for TermSet {
    fn default() -> Self {
        TermSet::new()
    }
}

/// The simplified grammar that automata are built from
#[derive(Debug, Clone)]
pub struct Grammar {
    pub terms: TermSet,
    pub rules: Vec<Rule>,
    // Indexed by `TermIdx`
    term_rules: Vec<Vec<RuleIdx>>,
}

impl Grammar {
    pub fn new(terms: TermSet, rules: Vec<Rule>) -> Grammar {
        let mut term_rules = vec![vec![]; terms.terms.len()];
        for (i, rule) in rules.iter().enumerate() {
            term_rules[rule.name.as_usize()].push(RuleIdx::from_usize(i));
        }
        Grammar {
            terms,
            rules,
            term_rules,
        }
    }

    pub fn rule(&self, idx: RuleIdx) -> &Rule {
        &self.rules[idx.as_usize()]
    }

    /// Rules defining a non-terminal, in definition order
    pub fn term_rules(&self, term: TermIdx) -> &[RuleIdx] {
        &self.term_rules[term.as_usize()]
    }

    pub fn is_terminal(&self, term: TermIdx) -> bool {
        self.terms.get(term).terminal()
    }
}

pub struct RuleDisplay<'a, 'b> {
    rule: &'a Rule,
    terms: &'b TermSet,
}

impl<'a, 'b> RuleDisplay<'a, 'b> {
    pub fn new(rule: &'a Rule, terms: &'b TermSet) -> Self {
        RuleDisplay { rule, terms }
    }
}

impl<'a, 'b> fmt::Display for RuleDisplay<'a, 'b> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ->", self.terms.name(self.rule.name))?;
        for part in &self.rule.parts {
            write!(f, " {}", self.terms.name(*part))?;
        }
        Ok(())
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in &self.rules {
            writeln!(f, "{}", RuleDisplay::new(rule, &self.terms))?;
        }
        Ok(())
    }
}

#[test]
fn conflicts_join() {
    let a = Conflicts::with_precedence(4);
    let b = Conflicts {
        precedence: 2,
        ambig_groups: vec!["x".to_owned()],
        cut: 1,
    };
    let joined = a.join(&b);
    assert_eq!(joined.precedence, 4);
    assert_eq!(joined.ambig_groups, vec!["x".to_owned()]);
    assert_eq!(joined.cut, 1);
    assert_eq!(Conflicts::none().join(&b), b);
    assert_eq!(b.join(&Conflicts::none()), b);
    assert_eq!(a.cmp(&b), Ordering::Greater);
    let c = Conflicts::with_ambig_group("b".to_owned()).join(&Conflicts::with_ambig_group("a".to_owned()));
    assert_eq!(c.ambig_groups, vec!["a".to_owned(), "b".to_owned()]);
}

#[test]
fn term_ids_in_bands() {
    let mut terms = TermSet::new();
    let top = terms.make_top(Some("Program".to_owned()), Props::new());
    let rep = terms.make_repeat("item+");
    let anon = terms.make_non_terminal("item", None, Props::new());
    let tok = terms.make_terminal("\"a\"", None, Props::new());
    let named_tok = terms.make_terminal("Word", Some("Word".to_owned()), Props::new());
    let unused = terms.make_non_terminal("unused", None, Props::new());
    let skip = terms.eof;
    let rules = vec![
        terms.new_rule(top, vec![rep], vec![Conflicts::none(); 2], skip),
        terms.new_rule(rep, vec![anon], vec![Conflicts::none(); 2], skip),
        terms.new_rule(rep, vec![rep, rep], vec![Conflicts::none(); 3], skip),
        terms.new_rule(anon, vec![tok], vec![Conflicts::none(); 2], skip),
        terms.new_rule(anon, vec![named_tok], vec![Conflicts::none(); 2], skip),
    ];
    let info = terms.finish(&rules).unwrap();
    assert_eq!(terms.get(terms.error).id, Some(0));
    assert_eq!(terms.get(top).id, Some(1));
    assert_eq!(terms.get(named_tok).id, Some(2));
    assert_eq!(info.min_repeat_term, 3);
    assert_eq!(terms.get(rep).id, Some(3));
    assert_eq!(terms.get(terms.eof).id, Some(4));
    assert!(terms.get(anon).id.unwrap() > 4);
    assert!(terms.get(tok).id.unwrap() > 4);
    assert_eq!(terms.get(unused).id, None);
    assert_eq!(info.max_term, 6);
    assert!(rules[2].is_repeat_wrap(&terms));
    assert!(!rules[1].is_repeat_wrap(&terms));
}

#[test]
fn unique_names() {
    let mut terms = TermSet::new();
    terms.make_non_terminal("a", None, Props::new());
    assert_eq!(terms.unique_name("a"), "a-1");
    assert_eq!(terms.unique_name("b"), "b");
}

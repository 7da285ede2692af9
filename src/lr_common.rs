use crate::grammar::{Grammar, RuleDisplay, RuleIdx, TermIdx};
use crate::item::{PosArena, PosIdx};

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateIdx(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Shift `term`, switch to the given state. Also used for goto entries.
    Shift { term: TermIdx, target: StateIdx },

    /// Reduce using the given rule when the next token is `term`
    Reduce { term: TermIdx, rule: RuleIdx },
}

impl Action {
    pub fn term(&self) -> TermIdx {
        match self {
            Action::Shift { term, .. } | Action::Reduce { term, .. } => *term,
        }
    }

    pub fn same(&self, other: &Action, grammar: &Grammar) -> bool {
        match (self, other) {
            (
                Action::Shift { term, target },
                Action::Shift {
                    term: term2,
                    target: target2,
                },
            ) => term == term2 && target == target2,
            (Action::Reduce { term, rule }, Action::Reduce { term: term2, rule: rule2 }) => {
                term == term2 && grammar.rule(*rule).same_reduce(grammar.rule(*rule2), &grammar.terms)
            }
            _ => false,
        }
    }

    /// Like `same`, but comparing shift targets under a state mapping
    pub fn matches(&self, other: &Action, mapping: &[usize], grammar: &Grammar) -> bool {
        match (self, other) {
            (Action::Shift { target, .. }, Action::Shift { target: target2, .. }) => {
                mapping[target.0] == mapping[target2.0]
            }
            (Action::Reduce { rule, .. }, Action::Reduce { rule: rule2, .. }) => {
                grammar.rule(*rule).same_reduce(grammar.rule(*rule2), &grammar.terms)
            }
            _ => false,
        }
    }

    pub fn map(&self, mapping: &[usize]) -> Action {
        match *self {
            Action::Shift { term, target } => Action::Shift {
                term,
                target: StateIdx(mapping[target.0]),
            },
            reduce => reduce,
        }
    }

    /// Shifts before reduces, then by term id
    pub fn cmp(&self, other: &Action, grammar: &Grammar) -> Ordering {
        let terms = &grammar.terms;
        match (self, other) {
            (Action::Shift { .. }, Action::Reduce { .. }) => Ordering::Less,
            (Action::Reduce { .. }, Action::Shift { .. }) => Ordering::Greater,
            (Action::Shift { term, target }, Action::Shift { term: term2, target: target2 }) => {
                terms.id(*term).cmp(&terms.id(*term2)).then(target.cmp(target2))
            }
            (Action::Reduce { term, rule }, Action::Reduce { term: term2, rule: rule2 }) => {
                let (rule, rule2) = (grammar.rule(*rule), grammar.rule(*rule2));
                terms
                    .id(*term)
                    .cmp(&terms.id(*term2))
                    .then_with(|| terms.id(rule.name).cmp(&terms.id(rule2.name)))
                    .then_with(|| rule.parts.len().cmp(&rule2.parts.len()))
            }
        }
    }
}

/// A state of the LR automaton
#[derive(Debug, Clone)]
pub struct LrState {
    pub id: StateIdx,
    /// Closed item set, sorted
    pub set: Vec<PosIdx>,
    pub actions: Vec<Action>,
    /// For each action, the items that produced it
    pub action_positions: Vec<Vec<PosIdx>>,
    pub goto: Vec<Action>,
    /// Assigned by token group computation, `None` when the state doesn't read tokens
    pub token_group: Option<usize>,
    pub default_reduce: Option<RuleIdx>,
    pub skip: TermIdx,
    pub hash: u32,
    /// Set for the entry states of top rules (and skip rules)
    pub start_rule: Option<TermIdx>,
}

impl LrState {
    pub fn new(
        id: StateIdx,
        set: Vec<PosIdx>,
        skip: TermIdx,
        hash: u32,
        start_rule: Option<TermIdx>,
    ) -> LrState {
        LrState {
            id,
            set,
            actions: vec![],
            action_positions: vec![],
            goto: vec![],
            token_group: None,
            default_reduce: None,
            skip,
            hash,
            start_rule,
        }
    }

    #[cfg(test)]
    pub fn goto_target(&self, term: TermIdx) -> Option<StateIdx> {
        self.goto.iter().find_map(|g| match g {
            Action::Shift { term: t, target } if *t == term => Some(*target),
            _ => None,
        })
    }

    /// Computes the default reduction and puts actions and gotos in canonical order
    pub fn finish(&mut self, grammar: &Grammar) {
        self.default_reduce = None;
        if let Some(Action::Reduce { rule, .. }) = self.actions.first() {
            let first = grammar.rule(*rule);
            if self.actions.iter().all(|a| match a {
                Action::Reduce { rule, .. } => grammar.rule(*rule).same_reduce(first, &grammar.terms),
                Action::Shift { .. } => false,
            }) {
                self.default_reduce = Some(*rule);
            }
        }
        let mut paired: Vec<(Action, Vec<PosIdx>)> = self
            .actions
            .drain(..)
            .zip(self.action_positions.drain(..))
            .collect();
        paired.sort_by(|a, b| a.0.cmp(&b.0, grammar));
        for (action, positions) in paired {
            self.actions.push(action);
            self.action_positions.push(positions);
        }
        self.goto.sort_by(|a, b| a.cmp(b, grammar));
    }

    /// State equality used when merging identical states
    pub fn same_as(&self, other: &LrState, grammar: &Grammar) -> bool {
        if self.start_rule != other.start_rule {
            return false;
        }
        match (self.default_reduce, other.default_reduce) {
            (Some(a), Some(b)) => return grammar.rule(a).same_reduce(grammar.rule(b), &grammar.terms),
            (None, None) => {}
            _ => return false,
        }
        self.skip == other.skip
            && self.token_group == other.token_group
            && same_actions(&self.actions, &other.actions, grammar)
            && same_actions(&self.goto, &other.goto, grammar)
    }

    /// Whether a top rule is complete in this state
    pub fn accepting(&self, arena: &PosArena, grammar: &Grammar) -> bool {
        self.set.iter().any(|p| {
            let pos = arena.get(*p);
            grammar.terms.get(grammar.rule(pos.rule).name).top() && pos.at_end(grammar)
        })
    }
}

fn same_actions(a: &[Action], b: &[Action], grammar: &Grammar) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same(b, grammar))
}

pub struct ActionDisplay<'a, 'b> {
    pub action: &'a Action,
    pub grammar: &'b Grammar,
}

impl<'a, 'b> fmt::Display for ActionDisplay<'a, 'b> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Action::Shift { term, target } => {
                write!(f, "{} => {}", self.grammar.terms.name(*term), target.0)
            }
            Action::Reduce { term, rule } => write!(
                f,
                "{} <= {}",
                self.grammar.terms.name(*term),
                RuleDisplay::new(self.grammar.rule(*rule), &self.grammar.terms)
            ),
        }
    }
}

pub struct StateDisplay<'a, 'b> {
    pub state: &'a LrState,
    pub grammar: &'b Grammar,
    pub arena: &'b PosArena,
}

impl<'a, 'b> fmt::Display for StateDisplay<'a, 'b> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {{", self.state.id.0)?;
        for pos in &self.state.set {
            writeln!(
                f,
                "  {}",
                crate::item::PosDisplay::new(self.arena.get(*pos), self.grammar)
            )?;
        }
        for action in self.state.actions.iter().chain(&self.state.goto) {
            writeln!(
                f,
                "  {}",
                ActionDisplay {
                    action,
                    grammar: self.grammar
                }
            )?;
        }
        writeln!(f, "}}")
    }
}

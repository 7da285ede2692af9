//! Packing the finished automaton, tokenizer, and node metadata into the flat integer
//! tables the runtime reads.

use crate::ast::SpecializeKind;
use crate::builder::{Builder, ExternalOrigin, TokenOrigin};
use crate::error::{GenError, Result};
use crate::first::generate_first_table;
use crate::forced_reduce::compute_forced_reductions;
use crate::grammar::{Grammar, RuleIdx, TermIdx};
use crate::item::PosArena;
use crate::lalr1::{collapse_automaton, merge_identical};
use crate::lr1::build_full_automaton;
use crate::lr_common::{Action, LrState, StateDisplay};
use crate::simplify::simplify_rules;

use fxhash::FxHashSet;

use std::collections::BTreeMap;

pub const REDUCE_FLAG: u32 = 1 << 16;
pub const REPEAT_FLAG: u32 = 1 << 17;
/// In skip tables: enter the skip rule's start state
pub const GOTO_FLAG: u32 = 1 << 17;
pub const STAY_FLAG: u32 = 1 << 18;
pub const REDUCE_DEPTH_SHIFT: u32 = 19;
pub const VALUE_MASK: u32 = 0xffff;

/// Terminates an action list
pub const SEQ_END: u32 = 0xffff;
pub const SEQ_DONE: u32 = 0;
pub const SEQ_NEXT: u32 = 1;
/// Followed by an action that applies to any other term
pub const SEQ_OTHER: u32 = 2;

pub const STATE_SKIPPED: u32 = 1;
pub const STATE_ACCEPTING: u32 = 2;

/// Fields of a state record in `ParserTables::states`
pub const STATE_FLAGS: usize = 0;
pub const STATE_ACTIONS: usize = 1;
pub const STATE_SKIP: usize = 2;
pub const STATE_TOKENIZER_MASK: usize = 3;
pub const STATE_DEFAULT_REDUCE: usize = 4;
pub const STATE_FORCED_REDUCE: usize = 5;
pub const STATE_SIZE: usize = 6;

/// A name imported from a module in the generated code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRef {
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tokenizer {
    /// The generated tokenizer, restricted to a token group
    Group(u32),
    External(ExternalRef),
}

/// A node prop. `source` is `None` for the props built into the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropRef {
    pub name: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePropTable {
    pub prop: PropRef,
    /// Each value with the node ids that carry it
    pub values: Vec<(String, Vec<u32>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Specializer {
    Table {
        term: u32,
        /// Name of the specialized token
        name: String,
        /// Value to `(term id << 1) | extend`
        values: Vec<(String, u32)>,
    },
    External {
        term: u32,
        external: ExternalRef,
        extend: bool,
    },
}

/// Everything the runtime needs to parse with a grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserTables {
    /// `STATE_SIZE` fields per state
    pub states: Vec<u32>,
    pub state_data: Vec<u16>,
    pub goto: Vec<u16>,
    /// Node names by id, for the ids below the repeat terms. Empty for anonymous nodes.
    pub node_names: Vec<String>,
    pub node_props: Vec<NodePropTable>,
    pub skipped_nodes: Vec<u32>,
    pub max_term: u32,
    pub repeat_node_count: u32,
    pub token_data: Vec<u16>,
    pub tokenizers: Vec<Tokenizer>,
    /// Node name, start state, term id
    pub top_rules: Vec<(String, u32, u32)>,
    /// Dialect name and the offset of its token list in `state_data`
    pub dialects: Vec<(String, u32)>,
    pub dynamic_precedences: Vec<(u32, i32)>,
    pub specialized: Vec<Specializer>,
    /// Offset of the token precedence list in `state_data`
    pub token_prec: u32,
    /// Only filled in when `BuildOptions::include_names` is set
    pub term_names: Option<BTreeMap<u32, String>>,
    /// Named terms, exported from the terms module
    pub terms: BTreeMap<String, u32>,
    pub context: Option<ExternalRef>,
    pub prop_sources: Vec<ExternalRef>,
}

impl ParserTables {
    pub fn state_count(&self) -> usize {
        self.states.len() / STATE_SIZE
    }

    pub fn state_slot(&self, state: usize, slot: usize) -> u32 {
        self.states[state * STATE_SIZE + slot]
    }

    /// The end-of-input term, numbered right after the node types
    pub fn eof_term(&self) -> u32 {
        self.node_names.len() as u32 + self.repeat_node_count
    }
}

/// Appends integer sequences to one array, reusing an existing occurrence of a sequence
/// when there is one
#[derive(Debug, Default)]
pub struct DataBuilder {
    data: Vec<u32>,
}

impl DataBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn store_array(&mut self, values: &[u32]) -> usize {
        if let Some(found) = self.find(values) {
            return found;
        }
        let pos = self.data.len();
        self.data.extend_from_slice(values);
        pos
    }

    fn find(&self, values: &[u32]) -> Option<usize> {
        if values.is_empty() || values.len() > self.data.len() {
            return None;
        }
        self.data.windows(values.len()).position(|w| w == values)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn finish(self) -> Result<Vec<u16>> {
        let mut result = Vec::with_capacity(self.data.len());
        for value in self.data {
            if value > 0xffff {
                return Err(GenError::Capacity(format!(
                    "Table value {} doesn't fit in 16 bits",
                    value
                )));
            }
            result.push(value as u16);
        }
        Ok(result)
    }
}

/// How the skip term of a scope is handled
#[derive(Debug, Default)]
pub(crate) struct SkipInfo {
    /// Tokens that are skipped directly
    pub(crate) skip: Vec<TermIdx>,
    /// Set when the skip expression needs its own parse states
    pub(crate) rule: Option<TermIdx>,
    /// Every token that can start skipped content
    pub(crate) start_tokens: Vec<TermIdx>,
}

fn reduce_action(grammar: &Grammar, skip_info: &[SkipInfo], idx: RuleIdx, depth: usize) -> u32 {
    let rule = grammar.rule(idx);
    let mut code = grammar.terms.id(rule.name) | REDUCE_FLAG | ((depth as u32) << REDUCE_DEPTH_SHIFT);
    if rule.is_repeat_wrap(&grammar.terms) && depth == rule.parts.len() {
        code |= REPEAT_FLAG;
    }
    if skip_info.iter().any(|i| i.rule == Some(rule.name)) {
        code |= STAY_FLAG;
    }
    code
}

fn full_reduce(grammar: &Grammar, skip_info: &[SkipInfo], idx: RuleIdx) -> u32 {
    reduce_action(grammar, skip_info, idx, grammar.rule(idx).parts.len())
}

/// States reachable from a top rule's start state without going through a skip rule
fn non_skip_states(table: &[LrState], tops: &[TermIdx]) -> Vec<bool> {
    let mut reached = vec![false; table.len()];
    let mut work: Vec<usize> = vec![];
    for state in table {
        if state.start_rule.map_or(false, |r| tops.contains(&r)) {
            reached[state.id.0] = true;
            work.push(state.id.0);
        }
    }
    while let Some(id) = work.pop() {
        for action in table[id].actions.iter().chain(&table[id].goto) {
            if let Action::Shift { target, .. } = action {
                if !reached[target.0] {
                    reached[target.0] = true;
                    work.push(target.0);
                }
            }
        }
    }
    reached
}

/// `[maxTerm + 1, index per term..., data...]`, where the data for a term lists, per
/// target state, `(last | count << 1), target, source states...`
pub(crate) fn compute_goto_table(table: &[LrState], grammar: &Grammar) -> Result<Vec<u16>> {
    let mut goto: BTreeMap<u32, BTreeMap<usize, Vec<usize>>> = BTreeMap::new();
    let mut max_term = 0;
    for state in table {
        for entry in &state.goto {
            if let Action::Shift { term, target } = entry {
                let id = grammar.terms.id(*term);
                max_term = max_term.max(id);
                goto.entry(id)
                    .or_default()
                    .entry(target.0)
                    .or_default()
                    .push(state.id.0);
            }
        }
    }

    let mut data = DataBuilder::new();
    let mut index: Vec<u32> = vec![];
    let offset = max_term + 2;
    for term in 0..=max_term {
        let entries = match goto.get(&term) {
            Some(entries) => entries,
            None => {
                index.push(1);
                continue;
            }
        };
        let mut term_table: Vec<u32> = vec![];
        for (i, (target, sources)) in entries.iter().enumerate() {
            let last = if i == entries.len() - 1 { 1 } else { 0 };
            term_table.push(last + ((sources.len() as u32) << 1));
            term_table.push(*target as u32);
            term_table.extend(sources.iter().map(|s| *s as u32));
        }
        index.push(data.store_array(&term_table) as u32 + offset);
    }
    if index.iter().any(|i| *i > 0xffff) {
        return Err(GenError::Capacity("Goto table too large".to_owned()));
    }

    let mut result: Vec<u16> = Vec::with_capacity(index.len() + 1 + data.len());
    result.push((max_term + 1) as u16);
    result.extend(index.iter().map(|i| *i as u16));
    result.extend(data.finish()?);
    Ok(result)
}

fn store_actions(
    data: &mut DataBuilder,
    grammar: &Grammar,
    skip_info: &[SkipInfo],
    actions: &[Action],
    skip_reduce: Option<u32>,
) -> u32 {
    let mut values: Vec<u32> = vec![];
    for action in actions {
        match action {
            Action::Shift { term, target } => {
                values.extend([grammar.terms.id(*term), target.0 as u32, 0]);
            }
            Action::Reduce { term, rule } => {
                let code = full_reduce(grammar, skip_info, *rule);
                if Some(code) != skip_reduce {
                    values.extend([grammar.terms.id(*term), code & VALUE_MASK, code >> 16]);
                }
            }
        }
    }
    values.push(SEQ_END);
    match skip_reduce {
        Some(code) => values.extend([SEQ_OTHER, code & VALUE_MASK, code >> 16]),
        None => values.push(SEQ_DONE),
    }
    data.store_array(&values) as u32
}

enum TokenizerSource {
    Group(usize),
    External(usize),
}

impl<'o> Builder<'o> {
    /// Runs the automaton construction and encodes the result
    pub(crate) fn build_tables(mut self) -> Result<ParserTables> {
        let mut terms = std::mem::take(&mut self.terms);
        let mut preserve = self.skip_rules.clone();
        preserve.extend(terms.tops.iter().copied());
        let rules = simplify_rules(self.rules.clone(), &preserve, &mut terms);
        let info = terms.finish(&rules)?;

        // Skip rules that consist of a single token are handled by the skip table, the
        // rest need parse states of their own
        let grammar = Grammar::new(terms, rules);
        let first = generate_first_table(&grammar);
        let mut skip_info: Vec<SkipInfo> = vec![];
        let mut dropped: FxHashSet<RuleIdx> = Default::default();
        for skip in &self.skip_rules {
            let mut skip_entry = SkipInfo::default();
            let rules = grammar.term_rules(*skip);
            let mut kept = 0;
            for idx in rules {
                let rule = grammar.rule(*idx);
                let start = match rule.parts.first() {
                    Some(start) => *start,
                    None => {
                        dropped.insert(*idx);
                        continue;
                    }
                };
                let terminal = grammar.is_terminal(start);
                let starts: Vec<TermIdx> = if terminal {
                    vec![start]
                } else {
                    first.get_first(start).terminals().collect()
                };
                for token in starts {
                    if !skip_entry.start_tokens.contains(&token) {
                        skip_entry.start_tokens.push(token);
                    }
                }
                let alone = !rules
                    .iter()
                    .any(|other| other != idx && grammar.rule(*other).parts.first() == Some(&start));
                if terminal && rule.parts.len() == 1 && alone {
                    skip_entry.skip.push(start);
                    dropped.insert(*idx);
                } else {
                    kept += 1;
                }
            }
            if kept > 0 {
                skip_entry.rule = Some(*skip);
            }
            skip_info.push(skip_entry);
        }
        let grammar = if dropped.is_empty() {
            grammar
        } else {
            let kept: Vec<_> = grammar
                .rules
                .iter()
                .enumerate()
                .filter(|(i, _)| !dropped.contains(&RuleIdx::from_usize(*i)))
                .map(|(_, r)| r.clone())
                .collect();
            Grammar::new(grammar.terms, kept)
        };
        let first = generate_first_table(&grammar);

        let mut start_terms = grammar.terms.tops.clone();
        start_terms.extend(skip_info.iter().filter_map(|i| i.rule));
        let mut arena = PosArena::new();
        let mut full = build_full_automaton(&grammar, &first, &mut arena, &start_terms, self.no_skip)?;
        log::debug!("Full automaton: {} states", full.len());

        let token_tables = self.tokens.build_token_groups(
            &grammar,
            &arena,
            &mut full,
            &skip_info,
            &self.skip_rules,
            &self.token_origins,
        )?;

        let table = merge_identical(collapse_automaton(&full, &arena, &grammar), &arena, &grammar);
        log::debug!("Collapsed automaton: {} states", table.len());
        if log::log_enabled!(log::Level::Trace) {
            for state in &table {
                log::trace!(
                    "{}",
                    StateDisplay {
                        state,
                        grammar: &grammar,
                        arena: &arena
                    }
                );
            }
        }
        if table.len() > 0xffff {
            return Err(GenError::Capacity(format!("Too many parse states ({})", table.len())));
        }
        let non_skip = non_skip_states(&table, &grammar.terms.tops);

        let ast = self.ast.clone();
        let mut specialized = vec![];
        for ext in &self.external_specializers {
            let decl = &ast.external_specializers[ext.decl];
            if let Some(term) = ext.term {
                specialized.push(Specializer::External {
                    term: grammar.terms.id(term),
                    external: ExternalRef {
                        name: decl.id.name.clone(),
                        source: decl.source.clone(),
                    },
                    extend: decl.kind == SpecializeKind::Extend,
                });
            }
        }
        for (base, values) in &self.specialized {
            specialized.push(Specializer::Table {
                term: grammar.terms.id(*base),
                name: grammar.terms.name(*base).to_owned(),
                values: values
                    .iter()
                    .map(|s| {
                        let extend = if s.kind == SpecializeKind::Extend { 1 } else { 0 };
                        (s.value.clone(), (grammar.terms.id(s.term) << 1) | extend)
                    })
                    .collect(),
            });
        }

        let group_start = self.tokens.start.map_or(-1, |s| s as i64);
        let mut sources: Vec<(i64, TokenizerSource)> = token_tables
            .groups
            .iter()
            .map(|g| (group_start, TokenizerSource::Group(g.group_id)))
            .collect();
        for (i, ext) in self.external_tokens.iter().enumerate() {
            sources.push((ast.external_tokens[ext.decl].start as i64, TokenizerSource::External(i)));
        }
        sources.sort_by_key(|(start, _)| *start);
        let tokenizers: Vec<Tokenizer> = sources
            .iter()
            .map(|(_, source)| match source {
                TokenizerSource::Group(id) => Tokenizer::Group(*id as u32),
                TokenizerSource::External(i) => {
                    let decl = &ast.external_tokens[self.external_tokens[*i].decl];
                    Tokenizer::External(ExternalRef {
                        name: decl.id.name.clone(),
                        source: decl.source.clone(),
                    })
                }
            })
            .collect();

        let mut data = DataBuilder::new();
        let mut skip_data: Vec<u32> = vec![];
        for entry in &skip_info {
            let mut actions: Vec<u32> = vec![];
            for term in &entry.skip {
                actions.extend([grammar.terms.id(*term), 0, STAY_FLAG >> 16]);
            }
            if let Some(rule) = entry.rule {
                if let Some(state) = table.iter().find(|s| s.start_rule == Some(rule)) {
                    for action in &state.actions {
                        actions.extend([grammar.terms.id(action.term()), state.id.0 as u32, GOTO_FLAG >> 16]);
                    }
                }
            }
            actions.extend([SEQ_END, SEQ_DONE]);
            skip_data.push(data.store_array(&actions) as u32);
        }

        let forced = compute_forced_reductions(&table, &arena, &grammar);
        let mut states: Vec<u32> = vec![0; table.len() * STATE_SIZE];
        for state in &table {
            let skip_id = self.skip_rules.iter().position(|s| *s == state.skip).unwrap_or(0);
            let is_skip = !non_skip[state.id.0];
            let default_reduce = state
                .default_reduce
                .map_or(0, |r| full_reduce(&grammar, &skip_info, r));
            let mut flags = if is_skip { STATE_SKIPPED } else { 0 };
            if state.accepting(&arena, &grammar) {
                flags |= STATE_ACCEPTING;
            }

            let mut skip_reduce = None;
            if default_reduce == 0 && is_skip {
                for action in &state.actions {
                    if let Action::Reduce { term, rule } = action {
                        if *term == grammar.terms.eof {
                            skip_reduce = Some(full_reduce(&grammar, &skip_info, *rule));
                        }
                    }
                }
            }

            let mut external: Vec<usize> = vec![];
            let skip_terms = &skip_info[skip_id].start_tokens;
            for term in state.actions.iter().map(|a| a.term()).chain(skip_terms.iter().copied()) {
                let mut term = term;
                loop {
                    match self.token_origins.get(&term) {
                        Some(TokenOrigin { spec: Some(spec), .. }) => term = *spec,
                        Some(TokenOrigin {
                            external: Some(ExternalOrigin::Tokens(i)),
                            ..
                        }) => {
                            if !external.contains(i) {
                                external.push(*i);
                            }
                            break;
                        }
                        _ => break,
                    }
                }
            }
            let mut tokenizer_mask = 0;
            for (i, (_, source)) in sources.iter().enumerate() {
                let used = match source {
                    TokenizerSource::Group(id) => state.token_group == Some(*id),
                    TokenizerSource::External(ext) => external.contains(ext),
                };
                if used {
                    tokenizer_mask |= 1 << i;
                }
            }

            let actions: &[Action] = if default_reduce != 0 { &[] } else { &state.actions };
            let base = state.id.0 * STATE_SIZE;
            states[base + STATE_FLAGS] = flags;
            states[base + STATE_ACTIONS] = store_actions(&mut data, &grammar, &skip_info, actions, skip_reduce);
            states[base + STATE_SKIP] = skip_data[skip_id];
            states[base + STATE_TOKENIZER_MASK] = tokenizer_mask;
            states[base + STATE_DEFAULT_REDUCE] = default_reduce;
            states[base + STATE_FORCED_REDUCE] = forced[state.id.0]
                .map_or(0, |f| reduce_action(&grammar, &skip_info, f.rule, f.depth));
        }

        let mut dialects = vec![];
        for (i, name) in self.dialects.iter().enumerate() {
            let mut ids: Vec<u32> = self
                .tokens
                .by_dialect
                .get(&i)
                .map(|terms| terms.iter().map(|t| grammar.terms.id(*t)).collect())
                .unwrap_or_default();
            ids.push(SEQ_END);
            dialects.push((name.clone(), data.store_array(&ids) as u32));
        }

        let dynamic_precedences = self
            .dynamic_precedences
            .iter()
            .map(|(term, prec)| (grammar.terms.id(*term), *prec))
            .collect();

        let mut top_rules = vec![];
        for top in &grammar.terms.tops {
            if let Some(state) = table.iter().find(|s| s.start_rule == Some(*top)) {
                let name = grammar.terms.get(*top).node_name.clone().unwrap_or_default();
                top_rules.push((name, state.id.0 as u32, grammar.terms.id(*top)));
            }
        }

        let mut prec = token_tables.prec_table.clone();
        prec.push(SEQ_END);
        let token_prec = data.store_array(&prec) as u32;

        let (node_props, skipped_nodes) = self.gather_node_props(&grammar, &info.node_types)?;

        let min_repeat = info.min_repeat_term as usize;
        let node_names = info.node_types[..min_repeat]
            .iter()
            .map(|t| grammar.terms.get(*t).node_name.clone().unwrap_or_default())
            .collect();

        let named: BTreeMap<String, u32> = self
            .named_terms
            .iter()
            .filter(|(_, t)| grammar.terms.get(**t).id.is_some())
            .map(|(name, t)| (name.clone(), grammar.terms.id(*t)))
            .collect();

        let goto = compute_goto_table(&table, &grammar)?;
        let tables = ParserTables {
            states,
            state_data: data.finish()?,
            goto,
            node_names,
            node_props,
            skipped_nodes,
            max_term: info.max_term,
            repeat_node_count: (info.node_types.len() - min_repeat) as u32,
            token_data: token_tables.token_data,
            tokenizers,
            top_rules,
            dialects,
            dynamic_precedences,
            specialized,
            token_prec,
            term_names: if self.options.include_names {
                Some(info.names)
            } else {
                None
            },
            terms: named,
            context: ast.context.as_ref().map(|c| ExternalRef {
                name: c.id.name.clone(),
                source: c.source.clone(),
            }),
            prop_sources: ast
                .external_prop_sources
                .iter()
                .map(|p| ExternalRef {
                    name: p.id.name.clone(),
                    source: p.source.clone(),
                })
                .collect(),
        };
        log::debug!(
            "Tables: {} states, {} state data, {} goto, {} token data",
            table.len(),
            tables.state_data.len(),
            tables.goto.len(),
            tables.token_data.len()
        );
        Ok(tables)
    }

    fn gather_node_props(&self, grammar: &Grammar, node_types: &[TermIdx]) -> Result<(Vec<NodePropTable>, Vec<u32>)> {
        let mut not_skipped: FxHashSet<TermIdx> = Default::default();
        for rule in &self.rules {
            if !self.skip_rules.contains(&rule.name) {
                not_skipped.extend(rule.parts.iter().copied());
            }
        }

        let mut skipped = vec![];
        let mut tables: Vec<NodePropTable> = vec![];
        for term in node_types {
            let id = grammar.terms.id(*term);
            let top = grammar.terms.get(*term).top();
            if !not_skipped.contains(term) && !top && *term != grammar.terms.error {
                skipped.push(id);
            }
            for (prop, value) in &grammar.terms.get(*term).props {
                let known = match self.known_props.get(prop) {
                    Some(known) => known,
                    None => return Err(GenError::Grammar(format!("No known prop type for {}", prop))),
                };
                let prop_ref = PropRef {
                    name: known.name.clone(),
                    source: known.from.clone(),
                };
                let table = match tables.iter().position(|t| t.prop == prop_ref) {
                    Some(i) => &mut tables[i],
                    None => {
                        tables.push(NodePropTable {
                            prop: prop_ref,
                            values: vec![],
                        });
                        let last = tables.len() - 1;
                        &mut tables[last]
                    }
                };
                match table.values.iter_mut().find(|(v, _)| v == value) {
                    Some((_, ids)) => ids.push(id),
                    None => table.values.push((value.clone(), vec![id])),
                }
            }
        }
        Ok((tables, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_array_reuses_sequences() {
        let mut data = DataBuilder::new();
        assert_eq!(data.store_array(&[1, 2, 3, 0xffff]), 0);
        assert_eq!(data.store_array(&[4, 5]), 4);
        assert_eq!(data.store_array(&[1, 2, 3, 0xffff]), 0);
        assert_eq!(data.store_array(&[3, 0xffff, 4]), 2);
        assert_eq!(data.store_array(&[5, 6]), 6);
        assert_eq!(data.finish().unwrap(), vec![1, 2, 3, 0xffff, 4, 5, 5, 6]);
    }

    #[test]
    fn oversized_values_are_rejected() {
        let mut data = DataBuilder::new();
        data.store_array(&[0x10000]);
        assert!(matches!(data.finish(), Err(GenError::Capacity(_))));
    }
}

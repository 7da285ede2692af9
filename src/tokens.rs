//! The `@tokens` block: compiling token rules and literals into the tokenizer NFA, token
//! precedence, and splitting parse states into token groups.

use crate::ast::*;
use crate::builder::{Builder, BuiltRule, TokenOrigin};
use crate::error::{ConflictLog, GenError, Result};
use crate::grammar::{Grammar, TermIdx};
use crate::item::PosArena;
use crate::lr_common::LrState;
use crate::parse_table::SkipInfo;
use crate::token::{Nfa, NfaStateIdx, TokenConflict, MAX_CODE_POINT};

use fxhash::FxHashMap;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// An argument bound to a token rule parameter, along with the arguments that were in
/// scope where it was written
#[derive(Debug, Clone)]
pub(crate) struct ExprArg {
    name: String,
    expr: Expression,
    scope: Rc<Vec<ExprArg>>,
}

/// A token rule instantiation currently being compiled, to detect recursion
#[derive(Debug)]
struct Building {
    name: String,
    args: Vec<Expression>,
    start: NfaStateIdx,
    to: NfaStateIdx,
}

/// `term` must come after all of `after` in the precedence table
#[derive(Debug, Clone)]
struct PrecRelation {
    term: TermIdx,
    after: Vec<TermIdx>,
}

fn add_relation(relations: &mut Vec<PrecRelation>, term: TermIdx, after: &[TermIdx]) {
    match relations.iter_mut().find(|r| r.term == term) {
        Some(found) => {
            for t in after {
                if !found.after.contains(t) {
                    found.after.push(*t);
                }
            }
        }
        None => relations.push(PrecRelation {
            term,
            after: after.to_vec(),
        }),
    }
}

#[derive(Debug)]
pub(crate) struct TokenGroup {
    pub(crate) tokens: Vec<TermIdx>,
    pub(crate) group_id: usize,
}

#[derive(Debug)]
pub(crate) struct TokenTables {
    pub(crate) groups: Vec<TokenGroup>,
    /// Term ids, highest precedence first
    pub(crate) prec_table: Vec<u32>,
    pub(crate) token_data: Vec<u16>,
}

pub(crate) struct TokenSet {
    /// Position of the `@tokens` block, if there is one
    pub(crate) start: Option<usize>,
    pub(crate) rules: Vec<Rc<RuleDeclaration>>,
    literals: Vec<LiteralDeclaration>,
    precedences: Vec<TokenPrecDeclaration>,
    conflicts: Vec<TokenConflictDeclaration>,
    nfa: Nfa,
    start_state: NfaStateIdx,
    built: Vec<BuiltRule>,
    building: Vec<Building>,
    /// Tokens restricted to a dialect, by dialect index
    pub(crate) by_dialect: BTreeMap<usize, Vec<TermIdx>>,
    precedence_relations: Vec<PrecRelation>,
    explicit_conflicts: Vec<(TermIdx, TermIdx)>,
}

fn invert_ranges(ranges: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let mut pos = 0;
    let mut result = vec![];
    for (from, to) in ranges {
        if *from > pos {
            result.push((pos, *from));
        }
        pos = *to;
    }
    if pos <= MAX_CODE_POINT {
        result.push((pos, MAX_CODE_POINT + 1));
    }
    result
}

impl TokenSet {
    pub(crate) fn new(decl: Option<&TokenDeclaration>) -> TokenSet {
        let mut nfa = Nfa::new();
        let start_state = nfa.new_state();
        TokenSet {
            start: decl.map(|d| d.start),
            rules: decl
                .map(|d| d.rules.iter().cloned().map(Rc::new).collect())
                .unwrap_or_default(),
            literals: decl.map(|d| d.literals.clone()).unwrap_or_default(),
            precedences: decl.map(|d| d.precedences.clone()).unwrap_or_default(),
            conflicts: decl.map(|d| d.conflicts.clone()).unwrap_or_default(),
            nfa,
            start_state,
            built: vec![],
            building: vec![],
            by_dialect: BTreeMap::new(),
            precedence_relations: vec![],
            explicit_conflicts: vec![],
        }
    }

    fn find_built(&self, expr: &Expression) -> Option<TermIdx> {
        match expr {
            Expression::Name(name) => self
                .built
                .iter()
                .find(|b| b.matches(&name.id.name, &name.args))
                .map(|b| b.term),
            Expression::Literal { value, .. } => {
                let id = quoted(value);
                self.built.iter().find(|b| b.id == id).map(|b| b.term)
            }
            _ => None,
        }
    }

    /// Whether `a` was declared to have lower precedence than `b`
    fn preceded_by(&self, a: TermIdx, b: TermIdx) -> bool {
        self.precedence_relations
            .iter()
            .any(|r| r.term == a && r.after.contains(&b))
    }

    /// Orders the tokens that take part in precedence relations (plus soft conflicts
    /// between them) so that tokens with higher precedence come first
    fn build_prec_table(&self, soft_conflicts: &[TokenConflict], grammar: &Grammar) -> Result<Vec<u32>> {
        let mut relations = self.precedence_relations.clone();
        for conflict in soft_conflicts {
            let (mut a, mut b) = (conflict.a, conflict.b);
            if !relations.iter().any(|r| r.term == a) || !relations.iter().any(|r| r.term == b) {
                continue;
            }
            // Make `a` the longer match, which takes precedence
            if conflict.soft < 0 {
                std::mem::swap(&mut a, &mut b);
            }
            add_relation(&mut relations, b, &[a]);
            add_relation(&mut relations, a, &[]);
        }

        let mut table: Vec<u32> = vec![];
        let mut placed: Vec<TermIdx> = vec![];
        while !relations.is_empty() {
            match relations
                .iter()
                .position(|r| r.after.iter().all(|t| placed.contains(t)))
            {
                Some(ready) => {
                    let relation = relations.swap_remove(ready);
                    if !placed.contains(&relation.term) {
                        placed.push(relation.term);
                        table.push(grammar.terms.id(relation.term));
                    }
                }
                None => {
                    let names: Vec<&str> = relations
                        .iter()
                        .map(|r| grammar.terms.name(r.term))
                        .collect();
                    return Err(GenError::Grammar(format!(
                        "Cyclic token precedence relation between {}",
                        names.join(", ")
                    )));
                }
            }
        }
        Ok(table)
    }

    /// Compiles the tokenizer and assigns every state that reads tokens to a token group,
    /// such that no group contains two tokens that conflict
    pub(crate) fn build_token_groups(
        &self,
        grammar: &Grammar,
        arena: &PosArena,
        states: &mut [LrState],
        skip_info: &[SkipInfo],
        skip_rules: &[TermIdx],
        origins: &FxHashMap<TermIdx, TokenOrigin>,
    ) -> Result<TokenTables> {
        let dfa = self.nfa.compile(self.start_state, &grammar.terms)?.minimize();
        log::debug!("Tokenizer has {} states", dfa.states.len());

        let skip_index = |skip: TermIdx| skip_rules.iter().position(|s| *s == skip).unwrap_or(0);

        let mut all_conflicts = {
            let states: &[LrState] = states;
            let cache: RefCell<FxHashMap<(TermIdx, TermIdx), bool>> = Default::default();
            let has_term = |state: &LrState, term: TermIdx| {
                state.actions.iter().any(|a| a.term() == term) || skip_info[skip_index(state.skip)].start_tokens.contains(&term)
            };
            let occur_together = |a: TermIdx, b: TermIdx| {
                let key = if a < b { (a, b) } else { (b, a) };
                if let Some(known) = cache.borrow().get(&key) {
                    return *known;
                }
                let found = states.iter().any(|s| has_term(s, a) && has_term(s, b));
                cache.borrow_mut().insert(key, found);
                found
            };
            dfa.find_conflicts(&grammar.terms, occur_together)
        };
        all_conflicts.retain(|c| !self.preceded_by(c.a, c.b) && !self.preceded_by(c.b, c.a));
        for (a, b) in &self.explicit_conflicts {
            if !all_conflicts.iter().any(|c| c.involves(*a, *b)) {
                all_conflicts.push(TokenConflict {
                    a: *a,
                    b: *b,
                    soft: 0,
                    example_a: String::new(),
                    example_b: None,
                });
            }
        }
        let (soft_conflicts, conflicts): (Vec<TokenConflict>, Vec<TokenConflict>) =
            all_conflicts.into_iter().partition(|c| c.soft != 0);

        let mut errors = ConflictLog::new();
        let mut reported: Vec<usize> = vec![];
        let mut groups: Vec<TokenGroup> = vec![];
        for state in states.iter_mut() {
            if state.default_reduce.is_some() || state.token_group.is_some() {
                continue;
            }
            let skip = &skip_info[skip_index(state.skip)].start_tokens;
            for term in skip {
                if state.actions.iter().any(|a| a.term() == *term) {
                    return Err(GenError::Grammar(format!(
                        "Use of token {} conflicts with skip rule",
                        grammar.terms.name(*term)
                    )));
                }
            }

            let mut state_terms: Vec<TermIdx> = vec![];
            for term in state.actions.iter().map(|a| a.term()).chain(skip.iter().copied()) {
                let term = match origins.get(&term) {
                    Some(TokenOrigin { spec: Some(spec), .. }) => *spec,
                    Some(TokenOrigin { external: Some(_), .. }) => continue,
                    _ => term,
                };
                if !state_terms.contains(&term) {
                    state_terms.push(term);
                }
            }
            if state_terms.is_empty() {
                continue;
            }

            let mut terms: Vec<TermIdx> = vec![];
            let mut incompatible: Vec<TermIdx> = vec![];
            for term in &state_terms {
                for (i, conflict) in conflicts.iter().enumerate() {
                    let conflicting = if conflict.a == *term {
                        conflict.b
                    } else if conflict.b == *term {
                        conflict.a
                    } else {
                        continue;
                    };
                    if state_terms.contains(&conflicting) && !reported.contains(&i) {
                        reported.push(i);
                        let example = if conflict.example_a.is_empty() {
                            String::new()
                        } else {
                            match &conflict.example_b {
                                Some(b) => format!(
                                    " (example: {} vs {})",
                                    quoted(&conflict.example_a),
                                    quoted(b)
                                ),
                                None => format!(" (example: {})", quoted(&conflict.example_a)),
                            }
                        };
                        let trail = state
                            .set
                            .first()
                            .map(|p| arena.trail(*p, grammar, 60))
                            .unwrap_or_default();
                        errors.push(
                            format!(
                                "Overlapping tokens {} and {} used in same context{}\nAfter: {}",
                                grammar.terms.name(*term),
                                grammar.terms.name(conflicting),
                                example,
                                trail
                            ),
                            vec![],
                        );
                    }
                    if !terms.contains(term) {
                        terms.push(*term);
                    }
                    if !incompatible.contains(&conflicting) {
                        incompatible.push(conflicting);
                    }
                }
            }

            let found = groups
                .iter()
                .position(|g| !incompatible.iter().any(|t| g.tokens.contains(t)));
            let group = match found {
                Some(found) => {
                    let group = &mut groups[found];
                    for term in terms {
                        if !group.tokens.contains(&term) {
                            group.tokens.push(term);
                        }
                    }
                    found
                }
                None => {
                    groups.push(TokenGroup {
                        tokens: terms,
                        group_id: groups.len(),
                    });
                    groups.len() - 1
                }
            };
            state.token_group = Some(groups[group].group_id);
        }

        errors.into_token_result()?;
        if groups.len() > 16 {
            return Err(GenError::Capacity(format!(
                "Too many different token groups ({}) to represent them as a 16-bit bitfield",
                groups.len()
            )));
        }
        log::debug!("{} token groups", groups.len());

        let prec_table = self.build_prec_table(&soft_conflicts, grammar)?;
        let mut masks: FxHashMap<u32, u32> = Default::default();
        for group in &groups {
            for term in &group.tokens {
                *masks.entry(grammar.terms.id(*term)).or_default() |= 1 << group.group_id;
            }
        }
        let token_data = dfa.to_array(&grammar.terms, &masks, &prec_table)?;
        Ok(TokenTables {
            groups,
            prec_table,
            token_data,
        })
    }
}

impl<'o> Builder<'o> {
    /// The terminal for a reference to a token rule, compiling it on first use. `None`
    /// when there is no token rule by that name.
    pub(crate) fn get_token(&mut self, expr: &NameExpression) -> Result<Option<TermIdx>> {
        if let Some(built) = self.tokens.find_built(&Expression::Name(expr.clone())) {
            return Ok(Some(built));
        }
        let rule = match self.tokens.rules.iter().find(|r| r.id.name == expr.id.name) {
            Some(rule) => rule.clone(),
            None => return Ok(None),
        };
        let params: &[Identifier] = if rule.params.len() == expr.args.len() {
            &rule.params
        } else {
            &[]
        };
        let info = self.node_info(&rule.props, "d", Some(&expr.id.name), &expr.args, params, None)?;
        let name = Expression::Name(expr.clone()).to_string();
        let term = self.make_terminal(&name, info.name.clone(), info.props);
        if let Some(dialect) = info.dialect {
            self.tokens.by_dialect.entry(dialect).or_default().push(term);
        }
        if (info.name.is_some() || info.exported.is_some()) && rule.params.is_empty() {
            if info.name.is_none() {
                self.terms.get_mut(term).set_preserve();
            }
            let key = info.exported.or(info.name).unwrap_or_default();
            self.named_terms.insert(key, term);
        }

        let end = self.tokens.nfa.accepting_state(term);
        let start = self.tokens.start_state;
        self.build_token_rule(&rule, expr, start, end, &[])?;
        self.tokens
            .built
            .push(BuiltRule::new(&expr.id.name, expr.args.clone(), term));
        Ok(Some(term))
    }

    /// The terminal for a string literal, compiling it on first use
    pub(crate) fn get_literal(&mut self, value: &str, start: usize) -> Result<TermIdx> {
        let id = quoted(value);
        if let Some(built) = self.tokens.built.iter().find(|b| b.id == id) {
            return Ok(built.term);
        }
        let decl = self.tokens.literals.iter().find(|l| l.literal == value).cloned();
        let info = match decl {
            Some(decl) => self.node_info(&decl.props, "da", Some(value), &[], &[], None)?,
            None => Default::default(),
        };
        let term = self.make_terminal(&id, info.name, info.props);
        if let Some(dialect) = info.dialect {
            self.tokens.by_dialect.entry(dialect).or_default().push(term);
        }
        if let Some(exported) = info.exported {
            self.named_terms.insert(exported, term);
        }

        let end = self.tokens.nfa.accepting_state(term);
        let from = self.tokens.start_state;
        let expr = Expression::Literal {
            start,
            value: value.to_owned(),
        };
        self.build_token_expr(&expr, from, end, &[])?;
        self.tokens.built.push(BuiltRule::new(&id, vec![], term));
        Ok(term)
    }

    fn build_token_rule(
        &mut self,
        rule: &RuleDeclaration,
        expr: &NameExpression,
        from: NfaStateIdx,
        to: NfaStateIdx,
        args: &[ExprArg],
    ) -> Result<()> {
        let name = &expr.id.name;
        if rule.params.len() != expr.args.len() {
            return Err(self.error(
                format!("Incorrect number of arguments for token '{}'", name),
                Some(expr.start),
            ));
        }
        let recursive = self
            .tokens
            .building
            .iter()
            .find(|b| b.name == *name && exprs_same(&b.args, &expr.args))
            .map(|b| (b.start, b.to));
        if let Some((start, building_to)) = recursive {
            // Tail recursion loops back to the start of the rule
            if building_to == to {
                self.tokens.nfa.null_edge(from, start);
                return Ok(());
            }
            let last = self
                .tokens
                .building
                .iter()
                .rposition(|b| b.name == *name)
                .unwrap_or(0);
            let chain: Vec<&str> = self.tokens.building[last..]
                .iter()
                .map(|b| b.name.as_str())
                .collect();
            return Err(self.error(
                format!("Invalid (non-tail) recursion in token rules: {}", chain.join(" -> ")),
                Some(expr.start),
            ));
        }

        self.used(name);
        let start = self.tokens.nfa.new_state();
        self.tokens.nfa.null_edge(from, start);
        self.tokens.building.push(Building {
            name: name.clone(),
            args: expr.args.clone(),
            start,
            to,
        });
        let scope = Rc::new(args.to_vec());
        let bound: Vec<ExprArg> = expr
            .args
            .iter()
            .zip(&rule.params)
            .map(|(arg, param)| ExprArg {
                name: param.name.clone(),
                expr: arg.clone(),
                scope: scope.clone(),
            })
            .collect();
        let result = self.build_token_expr(&rule.expr, start, to, &bound);
        self.tokens.building.pop();
        result
    }

    fn build_token_expr(
        &mut self,
        expr: &Expression,
        from: NfaStateIdx,
        to: NfaStateIdx,
        args: &[ExprArg],
    ) -> Result<()> {
        match expr {
            Expression::Name(name) => {
                if let Some(arg) = args.iter().find(|a| a.name == name.id.name) {
                    if !name.args.is_empty() {
                        return Err(self.error(
                            "Passing arguments to a parameter that already has arguments",
                            Some(name.start),
                        ));
                    }
                    let (arg_expr, scope) = (arg.expr.clone(), arg.scope.clone());
                    return self.build_token_expr(&arg_expr, from, to, &scope);
                }
                let rule = self
                    .tokens
                    .rules
                    .iter()
                    .find(|r| r.id.name == name.id.name)
                    .cloned();
                match rule {
                    Some(rule) => self.build_token_rule(&rule, name, from, to, args),
                    None => Err(self.error(
                        format!("Reference to token rule '{}', which isn't found", name.id.name),
                        Some(name.start),
                    )),
                }
            }
            Expression::CharClass {
                class: CharClass::Eof,
                start,
            } => Err(self.error("@eof can't be used in token rules", Some(*start))),
            Expression::CharClass { class, .. } => {
                for (low, hi) in class.ranges() {
                    self.tokens.nfa.range_edges(from, to, *low, *hi);
                }
                Ok(())
            }
            Expression::Choice { exprs, .. } => {
                for choice in exprs {
                    self.build_token_expr(choice, from, to, args)?;
                }
                Ok(())
            }
            e if e.is_empty() => {
                self.tokens.nfa.null_edge(from, to);
                Ok(())
            }
            Expression::Sequence { exprs, markers, .. } => {
                if let Some(marker) = markers.iter().flatten().next() {
                    return Err(self.error("Conflict marker in token expression", Some(marker.start)));
                }
                let mut cur = from;
                for (i, part) in exprs.iter().enumerate() {
                    let next = if i == exprs.len() - 1 {
                        to
                    } else {
                        self.tokens.nfa.new_state()
                    };
                    self.build_token_expr(part, cur, next, args)?;
                    cur = next;
                }
                Ok(())
            }
            Expression::Repeat {
                expr: inner,
                kind: RepeatKind::Star,
                ..
            } => {
                let looped = self.tokens.nfa.new_state();
                self.tokens.nfa.null_edge(from, looped);
                self.build_token_expr(inner, looped, looped, args)?;
                self.tokens.nfa.null_edge(looped, to);
                Ok(())
            }
            Expression::Repeat {
                expr: inner,
                kind: RepeatKind::Plus,
                ..
            } => {
                let looped = self.tokens.nfa.new_state();
                self.build_token_expr(inner, from, looped, args)?;
                self.build_token_expr(inner, looped, looped, args)?;
                self.tokens.nfa.null_edge(looped, to);
                Ok(())
            }
            Expression::Repeat {
                expr: inner,
                kind: RepeatKind::Optional,
                ..
            } => {
                self.tokens.nfa.null_edge(from, to);
                self.build_token_expr(inner, from, to, args)
            }
            Expression::Set {
                ranges, inverted, ..
            } => {
                let ranges = if *inverted {
                    invert_ranges(ranges)
                } else {
                    ranges.clone()
                };
                for (low, hi) in ranges {
                    self.tokens.nfa.range_edges(from, to, low, hi);
                }
                Ok(())
            }
            Expression::Literal { value, .. } => {
                let units: Vec<u16> = value.encode_utf16().collect();
                if units.is_empty() {
                    self.tokens.nfa.null_edge(from, to);
                    return Ok(());
                }
                let mut cur = from;
                for (i, unit) in units.iter().enumerate() {
                    let next = if i == units.len() - 1 {
                        to
                    } else {
                        self.tokens.nfa.new_state()
                    };
                    self.tokens
                        .nfa
                        .edge(cur, u32::from(*unit), u32::from(*unit) + 1, next);
                    cur = next;
                }
                Ok(())
            }
            Expression::Any { .. } => {
                self.tokens.nfa.any_edges(from, to);
                Ok(())
            }
            Expression::Specialize { .. } | Expression::InlineRule { .. } => Err(self.error(
                format!("This type of expression ('{}') may not occur in token rules", expr),
                Some(expr.start()),
            )),
        }
    }

    /// Reads the `@precedence` declarations of the `@tokens` block. Called once all rules
    /// are built, so that only referenced tokens take part.
    pub(crate) fn take_token_precedences(&mut self) {
        let mut relations: Vec<PrecRelation> = vec![];
        for decl in self.tokens.precedences.clone() {
            let mut prev: Vec<TermIdx> = vec![];
            for item in &decl.items {
                let level: Vec<TermIdx> = match item {
                    Expression::Name(name) if name.args.is_empty() => self
                        .tokens
                        .built
                        .iter()
                        .filter(|b| b.id == name.id.name)
                        .map(|b| b.term)
                        .collect(),
                    other => self.tokens.find_built(other).into_iter().collect(),
                };
                if level.is_empty() {
                    self.warn(&format!("Precedence specified for unknown token {}", item), Some(item.start()));
                }
                for term in &level {
                    add_relation(&mut relations, *term, &prev);
                }
                prev.extend(level);
            }
        }
        self.tokens.precedence_relations = relations;
    }

    pub(crate) fn take_token_conflicts(&mut self) {
        for decl in self.tokens.conflicts.clone() {
            let resolve = |expr: &Expression| {
                let found = self.tokens.find_built(expr);
                if found.is_none() {
                    self.warn(&format!("Conflict specified for unknown token {}", expr), Some(expr.start()));
                }
                found
            };
            let (a, b) = (resolve(&decl.a), resolve(&decl.b));
            if let (Some(a), Some(b)) = (a, b) {
                self.tokens.explicit_conflicts.push((a, b));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuildOptions;

    fn token_builder<'a>(text: &str, options: &'a BuildOptions) -> Builder<'a> {
        Builder::new(text, options).unwrap()
    }

    #[test]
    fn literals_are_shared() {
        let options = BuildOptions::default();
        let builder = token_builder("@top P { \"a\" \"a\" \"b\" }", &options);
        let literals: Vec<&str> = builder
            .tokens
            .built
            .iter()
            .map(|b| b.id.as_str())
            .collect();
        assert_eq!(literals, vec!["\"a\"", "\"b\""]);
    }

    #[test]
    fn declared_literals_get_node_names() {
        let options = BuildOptions::default();
        let builder = token_builder(
            "@top P { \"(\" \")\" \"x\" }
             @tokens { \"(\" \")\"[@name=Close] }",
            &options,
        );
        let name_of = |lit: &str| {
            let term = builder.terms.lookup(lit).unwrap();
            builder.terms.get(term).node_name.clone()
        };
        assert_eq!(name_of("\"(\"").as_deref(), Some("("));
        assert_eq!(name_of("\")\"").as_deref(), Some("Close"));
        assert_eq!(name_of("\"x\""), None);
    }

    #[test]
    fn token_rule_errors() {
        let options = BuildOptions::default();
        let err = |text: &str| match Builder::new(text, &options) {
            Err(GenError::Grammar(msg)) => msg,
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("expected an error"),
        };
        assert!(err("@top P { A } @tokens { A { B } }")
            .starts_with("Reference to token rule 'B', which isn't found"));
        assert!(err("@top P { A } @tokens { A { \"(\" A \")\" } }")
            .starts_with("Invalid (non-tail) recursion in token rules: A"));
        assert!(err("@top P { A } @tokens { A { \"a\" !x \"b\" } }")
            .starts_with("Conflict marker in token expression"));
        assert!(err("@top P { A<\"x\"> } @tokens { A { \"a\" } }")
            .starts_with("Incorrect number of arguments for token 'A'"));
    }

    #[test]
    fn tail_recursion_is_a_loop() {
        let options = BuildOptions::default();
        // Compiles without errors: the recursive reference is in tail position
        token_builder("@top P { A } @tokens { A { \"a\" A | \"b\" } }", &options);
    }

    #[test]
    fn parameterized_tokens() {
        let options = BuildOptions::default();
        let builder = token_builder(
            "@top P { q<\"a\"> q<\"b\"> }
             @tokens { q<mark> { mark \"x\" mark } }",
            &options,
        );
        assert_eq!(builder.tokens.built.len(), 2);
        assert!(builder.terms.lookup("q<\"a\">").is_some());
    }

    #[test]
    fn inverted_ranges() {
        assert_eq!(invert_ranges(&[(10, 20)]), vec![(0, 10), (20, MAX_CODE_POINT + 1)]);
        assert_eq!(invert_ranges(&[(0, MAX_CODE_POINT + 1)]), vec![]);
    }

    #[test]
    fn precedence_relations() {
        let options = BuildOptions::default();
        let builder = token_builder(
            "@top P { (Keyword | Identifier)* }
             @tokens {
               Keyword { \"if\" }
               Identifier { $[a-z]+ }
               @precedence { Keyword, Identifier }
             }",
            &options,
        );
        let keyword = builder.terms.lookup("Keyword").unwrap();
        let identifier = builder.terms.lookup("Identifier").unwrap();
        assert!(builder.tokens.preceded_by(identifier, keyword));
        assert!(!builder.tokens.preceded_by(keyword, identifier));
    }
}

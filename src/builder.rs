//! Turns a parsed grammar into terms and flat rules. Token rules are compiled into the
//! tokenizer NFA as they are referenced (see `tokens.rs`).

use crate::ast::*;
use crate::error::{GenError, Result};
use crate::grammar::{Conflicts, Props, Rule, TermIdx, TermSet};
use crate::parse::{parse_source, Source};
use crate::tokens::TokenSet;
use crate::BuildOptions;

use fxhash::FxHashMap;

use std::collections::BTreeMap;
use std::rc::Rc;

/// An instantiated rule, repeat or token, remembered so that identical instantiations
/// share a term
#[derive(Debug, Clone)]
pub(crate) struct BuiltRule {
    pub(crate) id: String,
    pub(crate) args: Vec<Expression>,
    pub(crate) term: TermIdx,
    /// Repeats are only shared within one skip context
    pub(crate) skip: Option<TermIdx>,
}

impl BuiltRule {
    pub(crate) fn new(id: &str, args: Vec<Expression>, term: TermIdx) -> BuiltRule {
        BuiltRule {
            id: id.to_owned(),
            args,
            term,
            skip: None,
        }
    }

    pub(crate) fn matches(&self, name: &str, args: &[Expression]) -> bool {
        self.id == name && exprs_same(&self.args, args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExternalOrigin {
    Tokens(usize),
    Specializer(usize),
}

/// Where a terminal that isn't read by the main tokenizer comes from
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TokenOrigin {
    /// The token this one specializes
    pub(crate) spec: Option<TermIdx>,
    pub(crate) external: Option<ExternalOrigin>,
}

#[derive(Debug, Clone)]
pub(crate) struct Specialization {
    pub(crate) value: String,
    pub(crate) term: TermIdx,
    pub(crate) kind: SpecializeKind,
    pub(crate) dialect: Option<usize>,
    pub(crate) name: Option<String>,
}

/// `@external tokens name from "source" { ... }`
#[derive(Debug, Clone)]
pub(crate) struct ExternalTokenSet {
    pub(crate) decl: usize,
    pub(crate) tokens: Vec<(String, TermIdx)>,
}

/// `@external specialize {token} name from "source" { ... }`
#[derive(Debug, Clone)]
pub(crate) struct ExternalSpecializer {
    pub(crate) decl: usize,
    /// The specialized token, resolved once all rules are known
    pub(crate) term: Option<TermIdx>,
    pub(crate) tokens: Vec<(String, TermIdx)>,
}

fn find_external(tokens: &[(String, TermIdx)], name: &str) -> Option<TermIdx> {
    tokens.iter().find(|(n, _)| n == name).map(|(_, t)| *t)
}

/// The runtime prop a grammar prop name refers to
#[derive(Debug, Clone)]
pub(crate) struct PropSource {
    pub(crate) name: String,
    /// `None` for the built-in props
    pub(crate) from: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct NodeInfo {
    pub(crate) name: Option<String>,
    pub(crate) props: Props,
    pub(crate) dialect: Option<usize>,
    pub(crate) dynamic_prec: i32,
    pub(crate) inline: bool,
    pub(crate) group: Option<String>,
    pub(crate) exported: Option<String>,
}

/// Names starting with `_` or a lowercase letter don't produce nodes
fn ignored(name: &str) -> bool {
    match name.chars().next() {
        Some(first) => first == '_' || first.is_lowercase(),
        None => true,
    }
}

fn is_exported(rule: &RuleDeclaration) -> bool {
    rule.props.iter().any(|p| p.at && p.name == "export")
}

/// A sequence of terms with the conflicts for each gap. `conflicts.len()` is always
/// `terms.len() + 1`.
#[derive(Debug, Clone)]
struct Parts {
    terms: Vec<TermIdx>,
    conflicts: Vec<Conflicts>,
}

impl Parts {
    fn none() -> Parts {
        Parts {
            terms: vec![],
            conflicts: vec![Conflicts::none()],
        }
    }

    fn single(term: TermIdx) -> Parts {
        Parts {
            terms: vec![term],
            conflicts: vec![Conflicts::none(), Conflicts::none()],
        }
    }

    fn concat(&self, other: &Parts) -> Parts {
        let mut terms = self.terms.clone();
        terms.extend_from_slice(&other.terms);
        let mut conflicts = self.conflicts[..self.conflicts.len() - 1].to_vec();
        conflicts.push(self.conflicts[self.conflicts.len() - 1].join(&other.conflicts[0]));
        conflicts.extend_from_slice(&other.conflicts[1..]);
        Parts { terms, conflicts }
    }

    fn with_conflicts(mut self, pos: usize, conflicts: &Conflicts) -> Parts {
        if !conflicts.is_none() {
            self.conflicts[pos] = self.conflicts[pos].join(conflicts);
        }
        self
    }
}

fn complete_sequence(
    choices: &[Vec<Parts>],
    gaps: &[(Conflicts, Conflicts)],
    start: Parts,
    from: usize,
    end_conflicts: Conflicts,
    out: &mut Vec<Parts>,
) {
    let (here, at_end) = &gaps[from];
    let len = start.terms.len();
    if from == choices.len() {
        out.push(start.with_conflicts(len, &here.join(&end_conflicts)));
        return;
    }
    for choice in &choices[from] {
        let next = start.concat(choice).with_conflicts(len, here);
        complete_sequence(choices, gaps, next, from + 1, end_conflicts.join(at_end), out);
    }
}

struct RuleName {
    name: String,
    /// Position of the declaration while the rule is unused
    unused_at: Option<usize>,
}

struct DefinedGroup {
    term: TermIdx,
    group: String,
    rule_name: String,
    start: usize,
}

pub(crate) struct Builder<'o> {
    pub(crate) source: Source,
    pub(crate) ast: Rc<GrammarDeclaration>,
    pub(crate) options: &'o BuildOptions,
    pub(crate) terms: TermSet,
    pub(crate) tokens: TokenSet,
    pub(crate) external_tokens: Vec<ExternalTokenSet>,
    pub(crate) external_specializers: Vec<ExternalSpecializer>,
    /// Specialization tables, by the token they specialize, in creation order
    pub(crate) specialized: Vec<(TermIdx, Vec<Specialization>)>,
    pub(crate) token_origins: FxHashMap<TermIdx, TokenOrigin>,
    pub(crate) rules: Vec<Rule>,
    built: Vec<BuiltRule>,
    rule_names: Vec<RuleName>,
    /// Terms that get a constant in the generated terms module
    pub(crate) named_terms: BTreeMap<String, TermIdx>,
    pub(crate) known_props: BTreeMap<String, PropSource>,
    pub(crate) dialects: Vec<String>,
    pub(crate) dynamic_precedences: Vec<(TermIdx, i32)>,
    defined_groups: Vec<DefinedGroup>,
    ast_rules: Vec<(TermIdx, Rc<RuleDeclaration>)>,
    current_skip: Vec<TermIdx>,
    pub(crate) no_skip: TermIdx,
    pub(crate) skip_rules: Vec<TermIdx>,
}

impl<'o> Builder<'o> {
    pub(crate) fn new(text: &str, options: &'o BuildOptions) -> Result<Builder<'o>> {
        let source = Source::new(text, &options.file_name);
        let ast = Rc::new(parse_source(&source)?);

        let mut known_props = BTreeMap::new();
        for name in ["closedBy", "openedBy", "group", "isolate"] {
            known_props.insert(
                name.to_owned(),
                PropSource {
                    name: name.to_owned(),
                    from: None,
                },
            );
        }
        for prop in &ast.external_props {
            known_props.insert(
                prop.id.name.clone(),
                PropSource {
                    name: prop.external_id.name.clone(),
                    from: Some(prop.source.clone()),
                },
            );
        }

        let terms = TermSet::new();
        let no_skip = terms.eof;
        let mut builder = Builder {
            source,
            tokens: TokenSet::new(ast.tokens.as_ref()),
            dialects: ast.dialects.iter().map(|d| d.name.clone()).collect(),
            ast,
            options,
            terms,
            external_tokens: vec![],
            external_specializers: vec![],
            specialized: vec![],
            token_origins: Default::default(),
            rules: vec![],
            built: vec![],
            rule_names: vec![],
            named_terms: BTreeMap::new(),
            known_props,
            dynamic_precedences: vec![],
            defined_groups: vec![],
            ast_rules: vec![],
            current_skip: vec![],
            no_skip,
            skip_rules: vec![],
        };

        let token_rules = builder.tokens.rules.clone();
        for rule in &token_rules {
            builder.unique(&rule.id)?;
        }
        builder.add_externals()?;
        builder.build_rules()?;

        for name in &builder.rule_names {
            if let Some(pos) = name.unused_at {
                builder.warn(&format!("Unused rule '{}'", name.name), Some(pos));
            }
        }

        builder.take_token_precedences();
        builder.take_token_conflicts();

        let groups = std::mem::take(&mut builder.defined_groups);
        for group in &groups {
            builder.define_group(group)?;
        }
        builder.check_groups();
        log::debug!(
            "Built {} rules over {} terms",
            builder.rules.len(),
            builder.terms.indices().count()
        );
        Ok(builder)
    }

    pub(crate) fn error(&self, message: impl AsRef<str>, pos: Option<usize>) -> GenError {
        GenError::Grammar(self.source.located(message.as_ref(), pos))
    }

    pub(crate) fn warn(&self, message: &str, pos: Option<usize>) {
        let message = self.source.located(message, pos);
        match &self.options.warn {
            Some(warn) => warn(&message),
            None => log::warn!("{}", message),
        }
    }

    fn unique(&mut self, id: &Identifier) -> Result<()> {
        if self.rule_names.iter().any(|n| n.name == id.name) {
            return Err(self.error(
                format!("Duplicate rule definition for '{}'", id.name),
                Some(id.start),
            ));
        }
        self.rule_names.push(RuleName {
            name: id.name.clone(),
            unused_at: Some(id.start),
        });
        Ok(())
    }

    pub(crate) fn used(&mut self, name: &str) {
        if let Some(entry) = self.rule_names.iter_mut().find(|n| n.name == name) {
            entry.unused_at = None;
        }
    }

    fn new_name(&mut self, base: &str, node_name: Option<String>, props: Props) -> TermIdx {
        let name = self.terms.unique_name(base);
        self.terms.make_non_terminal(&name, node_name, props)
    }

    pub(crate) fn make_terminal(&mut self, name: &str, node_name: Option<String>, props: Props) -> TermIdx {
        let name = self.terms.unique_name(name);
        self.terms.make_terminal(&name, node_name, props)
    }

    fn current_skip(&self) -> TermIdx {
        self.current_skip.last().copied().unwrap_or(self.no_skip)
    }

    fn define_rule(&mut self, name: TermIdx, choices: Vec<Parts>) {
        let skip = self.current_skip();
        for choice in choices {
            let rule = self.terms.new_rule(name, choice.terms, choice.conflicts, skip);
            self.rules.push(rule);
        }
    }

    fn add_externals(&mut self) -> Result<()> {
        let ast = self.ast.clone();
        for (i, decl) in ast.external_tokens.iter().enumerate() {
            let mut tokens = vec![];
            for token in &decl.tokens {
                let term = self.external_terminal(token)?;
                self.token_origins.insert(
                    term,
                    TokenOrigin {
                        spec: None,
                        external: Some(ExternalOrigin::Tokens(i)),
                    },
                );
                tokens.push((token.id.name.clone(), term));
            }
            self.external_tokens.push(ExternalTokenSet { decl: i, tokens });
        }
        for (i, decl) in ast.external_specializers.iter().enumerate() {
            let mut tokens = vec![];
            for token in &decl.tokens {
                let term = self.external_terminal(token)?;
                tokens.push((token.id.name.clone(), term));
            }
            self.external_specializers.push(ExternalSpecializer {
                decl: i,
                term: None,
                tokens,
            });
        }
        Ok(())
    }

    fn external_terminal(&mut self, token: &ExternalToken) -> Result<TermIdx> {
        self.unique(&token.id)?;
        let info = self.node_info(&token.props, "d", Some(&token.id.name), &[], &[], None)?;
        let term = self.make_terminal(&token.id.name, info.name, info.props);
        if let Some(dialect) = info.dialect {
            self.tokens.by_dialect.entry(dialect).or_default().push(term);
        }
        self.named_terms.insert(token.id.name.clone(), term);
        Ok(term)
    }

    fn finish_external_specializers(&mut self) -> Result<()> {
        let ast = self.ast.clone();
        for i in 0..self.external_specializers.len() {
            let decl = &ast.external_specializers[self.external_specializers[i].decl];
            let parts = self.normalize_expr(&decl.token)?;
            let term = match parts.as_slice() {
                [part] if part.terms.len() == 1 && self.terms.get(part.terms[0]).terminal() => {
                    part.terms[0]
                }
                _ => {
                    return Err(self.error(
                        format!(
                            "The token expression to '@external {}' must resolve to a token",
                            decl.kind.name()
                        ),
                        Some(decl.token.start()),
                    ))
                }
            };
            self.external_specializers[i].term = Some(term);
            for (_, token) in self.external_specializers[i].tokens.clone() {
                self.token_origins.insert(
                    token,
                    TokenOrigin {
                        spec: Some(term),
                        external: Some(ExternalOrigin::Specializer(i)),
                    },
                );
            }
        }
        Ok(())
    }

    fn build_rules(&mut self) -> Result<()> {
        let ast = self.ast.clone();
        let no_skip = self.new_name("%noskip", None, Props::new());
        self.no_skip = no_skip;

        let main_skip = match ast.main_skip {
            Some(_) => self.new_name("%mainskip", None, Props::new()),
            None => no_skip,
        };
        let mut scoped_skip: Vec<TermIdx> = vec![];
        let mut top_rules: Vec<(TermIdx, &RuleDeclaration)> = vec![];
        for rule in &ast.rules {
            self.ast_rules.push((main_skip, Rc::new(rule.clone())));
        }
        for rule in &ast.top_rules {
            top_rules.push((main_skip, rule));
        }
        for (i, scoped) in ast.scoped_skip.iter().enumerate() {
            let found = ast.scoped_skip[..i]
                .iter()
                .position(|other| other.expr.same(&scoped.expr));
            let skip = match found {
                Some(found) => scoped_skip[found],
                None => match &ast.main_skip {
                    Some(main) if main.same(&scoped.expr) => main_skip,
                    _ if scoped.expr.is_empty() => no_skip,
                    _ => self.new_name("%skip", None, Props::new()),
                },
            };
            scoped_skip.push(skip);
            for rule in &scoped.rules {
                self.ast_rules.push((skip, Rc::new(rule.clone())));
            }
            for rule in &scoped.top_rules {
                top_rules.push((skip, rule));
            }
        }

        for (_, rule) in self.ast_rules.clone() {
            self.unique(&rule.id)?;
        }

        self.current_skip.push(no_skip);
        self.skip_rules = if main_skip == no_skip {
            vec![main_skip]
        } else {
            vec![no_skip, main_skip]
        };
        if let Some(main) = &ast.main_skip {
            let parts = self.normalize_expr(main)?;
            self.define_rule(main_skip, parts);
        }
        for (i, scoped) in ast.scoped_skip.iter().enumerate() {
            let skip = scoped_skip[i];
            if !self.skip_rules.contains(&skip) {
                self.skip_rules.push(skip);
                if skip != no_skip {
                    let parts = self.normalize_expr(&scoped.expr)?;
                    self.define_rule(skip, parts);
                }
            }
        }
        self.current_skip.pop();

        if top_rules.is_empty() {
            return Err(self.error("Missing @top declaration", None));
        }
        top_rules.sort_by_key(|(_, rule)| rule.start);
        for (skip, rule) in top_rules {
            self.unique(&rule.id)?;
            self.used(&rule.id.name);
            self.current_skip.push(skip);
            let info = self.node_info(&rule.props, "a", Some(&rule.id.name), &[], &[], Some(&rule.expr))?;
            let term = self.terms.make_top(info.name.clone(), info.props);
            if let Some(name) = info.name {
                self.named_terms.insert(name, term);
            }
            let parts = self.normalize_expr(&rule.expr)?;
            self.define_rule(term, parts);
            self.current_skip.pop();
        }

        self.finish_external_specializers()?;

        for (skip, rule) in self.ast_rules.clone() {
            let unused = self
                .rule_names
                .iter()
                .any(|n| n.name == rule.id.name && n.unused_at.is_some());
            if unused && is_exported(&rule) && rule.params.is_empty() {
                self.build_rule(&rule, &[], skip, false)?;
                if matches!(&rule.expr, Expression::Sequence { exprs, .. } if exprs.is_empty()) {
                    self.used(&rule.id.name);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn node_info(
        &mut self,
        props: &[Prop],
        allow: &str,
        default_name: Option<&str>,
        args: &[Expression],
        params: &[Identifier],
        expr: Option<&Expression>,
    ) -> Result<NodeInfo> {
        let mut info = NodeInfo {
            name: default_name
                .filter(|n| (allow.contains('a') || !ignored(n)) && !n.contains(' '))
                .map(str::to_owned),
            ..Default::default()
        };
        for prop in props {
            if !prop.at {
                if !self.known_props.contains_key(&prop.name) {
                    let builtin = ["name", "dialect", "dynamicPrecedence", "export", "isGroup"];
                    let hint = if builtin.contains(&prop.name.as_str()) {
                        format!(" (did you mean '@{}'?)", prop.name)
                    } else {
                        String::new()
                    };
                    return Err(self.error(
                        format!("Unknown prop name '{}'{}", prop.name, hint),
                        Some(prop.start),
                    ));
                }
                let value = self.finish_prop(prop, args, params)?;
                info.props.insert(prop.name.clone(), value);
                continue;
            }
            match prop.name.as_str() {
                "name" => {
                    let name = self.finish_prop(prop, args, params)?;
                    if name.contains(' ') {
                        return Err(self.error(
                            format!("Node names cannot have spaces ('{}')", name),
                            Some(prop.start),
                        ));
                    }
                    info.name = Some(name);
                }
                "dialect" => {
                    if !allow.contains('d') {
                        return Err(self.error(
                            "Can't specify a dialect on non-token rules",
                            Some(prop.start),
                        ));
                    }
                    let value = match prop.value.as_slice() {
                        [PropPart {
                            value: Some(value), ..
                        }] => value.clone(),
                        _ => {
                            return Err(self.error(
                                "The '@dialect' rule prop must hold a plain string value",
                                Some(prop.start),
                            ))
                        }
                    };
                    match self.dialects.iter().position(|d| *d == value) {
                        Some(id) => info.dialect = Some(id),
                        None => {
                            return Err(self.error(
                                format!("Unknown dialect '{}'", value),
                                Some(prop.value[0].start),
                            ))
                        }
                    }
                }
                "dynamicPrecedence" => {
                    if !allow.contains('p') {
                        return Err(self.error(
                            "Dynamic precedence can only be specified on nonterminals",
                            Some(prop.start),
                        ));
                    }
                    let value = match prop.value.as_slice() {
                        [PropPart {
                            value: Some(value), ..
                        }] => value.parse::<i32>().ok().filter(|v| (-10..=10).contains(v)),
                        _ => None,
                    };
                    match value {
                        Some(value) => info.dynamic_prec = value,
                        None => {
                            return Err(self.error(
                                "The '@dynamicPrecedence' rule prop must hold an integer between -10 and 10",
                                Some(prop.start),
                            ))
                        }
                    }
                }
                "inline" => {
                    if !prop.value.is_empty() {
                        return Err(self.error("'@inline' doesn't take a value", Some(prop.start)));
                    }
                    if !allow.contains('i') {
                        return Err(self.error(
                            "Inline can only be specified on nonterminals",
                            Some(prop.start),
                        ));
                    }
                    info.inline = true;
                }
                "isGroup" => {
                    if !allow.contains('g') {
                        return Err(self.error(
                            "'@isGroup' can only be specified on nonterminals",
                            Some(prop.start),
                        ));
                    }
                    info.group = if prop.value.is_empty() {
                        default_name.map(str::to_owned)
                    } else {
                        Some(self.finish_prop(prop, args, params)?)
                    };
                }
                "export" => {
                    info.exported = if prop.value.is_empty() {
                        default_name.map(str::to_owned)
                    } else {
                        Some(self.finish_prop(prop, args, params)?)
                    };
                }
                _ => {
                    return Err(self.error(
                        format!("Unknown built-in prop name '@{}'", prop.name),
                        Some(prop.start),
                    ))
                }
            }
        }

        if let Some(expr) = expr {
            if self.ast.auto_delim && (info.name.is_some() || !info.props.is_empty()) {
                if let Some((open, close)) = self.find_delimiters(expr)? {
                    let open_name = self.terms.get(open).node_name.clone().unwrap_or_default();
                    let close_name = self.terms.get(close).node_name.clone().unwrap_or_default();
                    self.add_to_prop(open, "closedBy", &close_name);
                    self.add_to_prop(close, "openedBy", &open_name);
                }
            }
        }

        if !info.props.is_empty() && info.name.is_none() {
            let pos = props.first().map(|p| p.start).or(expr.map(|e| e.start()));
            return Err(self.error("Node has properties but no name", pos));
        }
        if info.inline && (!info.props.is_empty() || info.dialect.is_some() || info.dynamic_prec != 0) {
            return Err(self.error(
                "Inline nodes can't have props, dynamic precedence, or a dialect",
                props.first().map(|p| p.start),
            ));
        }
        if info.inline {
            info.name = None;
        }
        Ok(info)
    }

    fn finish_prop(&self, prop: &Prop, args: &[Expression], params: &[Identifier]) -> Result<String> {
        let mut result = String::new();
        for part in &prop.value {
            if let Some(value) = &part.value {
                result.push_str(value);
                continue;
            }
            let name = part.name.as_deref().unwrap_or_default();
            let pos = match params.iter().position(|p| p.name == name) {
                Some(pos) => pos,
                None => {
                    return Err(self.error(
                        format!(
                            "Property refers to '{}', but no parameter by that name is in scope",
                            name
                        ),
                        Some(part.start),
                    ))
                }
            };
            match args.get(pos) {
                Some(Expression::Name(arg)) if arg.args.is_empty() => result.push_str(&arg.id.name),
                Some(Expression::Literal { value, .. }) => result.push_str(value),
                Some(expr) => {
                    return Err(self.error(
                        format!("Expression '{}' can not be used as part of a property value", expr),
                        Some(part.start),
                    ))
                }
                None => {
                    return Err(self.error(
                        format!("Property refers to '{}', which has no argument", name),
                        Some(part.start),
                    ))
                }
            }
        }
        Ok(result)
    }

    fn add_to_prop(&mut self, term: TermIdx, prop: &str, value: &str) {
        let props = &mut self.terms.get_mut(term).props;
        match props.get_mut(prop) {
            Some(existing) => {
                if !existing.split(' ').any(|v| v == value) {
                    existing.push(' ');
                    existing.push_str(value);
                }
            }
            None => {
                props.insert(prop.to_owned(), value.to_owned());
            }
        }
    }

    fn find_delim_token(&mut self, expr: &Expression, depth: usize) -> Result<Option<(TermIdx, String)>> {
        match expr {
            Expression::Literal { value, start } => {
                Ok(Some((self.get_literal(value, *start)?, value.clone())))
            }
            Expression::Name(name) if name.args.is_empty() && depth < 8 => {
                let ast = self.ast.clone();
                if let Some(rule) = ast.rules.iter().find(|r| r.id.name == name.id.name) {
                    return self.find_delim_token(&rule.expr, depth + 1);
                }
                let token = self
                    .tokens
                    .rules
                    .iter()
                    .find(|r| r.id.name == name.id.name)
                    .cloned();
                if let Some(rule) = token {
                    if let Expression::Literal { value, .. } = &rule.expr {
                        if let Some(term) = self.get_token(name)? {
                            return Ok(Some((term, value.clone())));
                        }
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// For a sequence that starts and ends with matching bracket tokens, the opening and
    /// closing token
    fn find_delimiters(&mut self, expr: &Expression) -> Result<Option<(TermIdx, TermIdx)>> {
        const BRACKETS: [(char, char); 4] = [('(', ')'), ('[', ']'), ('{', '}'), ('<', '>')];
        let exprs = match expr {
            Expression::Sequence { exprs, .. } if exprs.len() >= 2 => exprs,
            _ => return Ok(None),
        };
        let last = match self.find_delim_token(&exprs[exprs.len() - 1], 0)? {
            Some(last) if self.terms.get(last.0).node_name.is_some() => last,
            _ => return Ok(None),
        };
        let (open, close) = match BRACKETS
            .iter()
            .find(|(open, close)| last.1.contains(*close) && !last.1.contains(*open))
        {
            Some(bracket) => *bracket,
            None => return Ok(None),
        };
        match self.find_delim_token(&exprs[0], 0)? {
            Some(first)
                if self.terms.get(first.0).node_name.is_some()
                    && first.1.contains(open)
                    && !first.1.contains(close) =>
            {
                Ok(Some((first.0, last.0)))
            }
            _ => Ok(None),
        }
    }

    fn normalize_expr(&mut self, expr: &Expression) -> Result<Vec<Parts>> {
        match expr {
            Expression::Repeat {
                expr: inner,
                kind: RepeatKind::Optional,
                ..
            } => {
                let mut result = vec![Parts::none()];
                result.extend(self.normalize_expr(inner)?);
                Ok(result)
            }
            Expression::Repeat {
                expr: inner, kind, ..
            } => {
                let repeated = self.normalize_repeat(inner)?;
                Ok(if *kind == RepeatKind::Plus {
                    vec![Parts::single(repeated)]
                } else {
                    vec![Parts::none(), Parts::single(repeated)]
                })
            }
            Expression::Choice { exprs, .. } => {
                let mut result = vec![];
                for expr in exprs {
                    result.extend(self.normalize_expr(expr)?);
                }
                Ok(result)
            }
            Expression::Sequence { exprs, markers, .. } => self.normalize_sequence(exprs, markers),
            Expression::Literal { value, start } => Ok(vec![Parts::single(self.get_literal(value, *start)?)]),
            Expression::Name(name) => Ok(vec![Parts::single(self.resolve(name)?)]),
            Expression::Specialize { .. } => Ok(vec![Parts::single(self.resolve_specialization(expr)?)]),
            Expression::InlineRule { rule, .. } => {
                let skip = self.current_skip();
                Ok(vec![Parts::single(self.build_rule(rule, &[], skip, true)?)])
            }
            Expression::CharClass {
                class: CharClass::Eof,
                ..
            } => Ok(vec![Parts::single(self.terms.eof)]),
            _ => Err(self.error(
                format!("This type of expression ('{}') may not occur in non-token rules", expr),
                Some(expr.start()),
            )),
        }
    }

    /// `X+` becomes a repeat term `R` with rules `R -> X | R R`
    fn normalize_repeat(&mut self, inner: &Expression) -> Result<TermIdx> {
        let skip = self.current_skip();
        if let Some(known) = self.built.iter().find(|b| {
            b.id == "+" && b.skip == Some(skip) && exprs_same(&b.args, std::slice::from_ref(inner))
        }) {
            return Ok(known.term);
        }
        let display = Expression::Repeat {
            start: inner.start(),
            expr: Box::new(inner.clone()),
            kind: RepeatKind::Plus,
        }
        .to_string();
        let name = self.terms.unique_name(&display);
        let term = self.terms.make_repeat(&name);
        self.built.push(BuiltRule {
            id: "+".to_owned(),
            args: vec![inner.clone()],
            term,
            skip: Some(skip),
        });
        let mut choices = self.normalize_expr(inner)?;
        choices.push(Parts {
            terms: vec![term, term],
            conflicts: vec![Conflicts::none(); 3],
        });
        self.define_rule(term, choices);
        Ok(term)
    }

    fn normalize_sequence(&mut self, exprs: &[Expression], markers: &[Vec<ConflictMarker>]) -> Result<Vec<Parts>> {
        let mut choices = Vec::with_capacity(exprs.len());
        for expr in exprs {
            choices.push(self.normalize_expr(expr)?);
        }
        let mut gaps = Vec::with_capacity(markers.len());
        for gap in markers {
            gaps.push(self.conflicts_for(gap)?);
        }
        let mut out = vec![];
        complete_sequence(&choices, &gaps, Parts::none(), 0, Conflicts::none(), &mut out);
        Ok(out)
    }

    /// The conflicts a gap's markers add at the gap itself, and at the end of the rule
    fn conflicts_for(&self, markers: &[ConflictMarker]) -> Result<(Conflicts, Conflicts)> {
        let mut here = Conflicts::none();
        let mut at_end = Conflicts::none();
        for marker in markers {
            match marker.kind {
                ConflictMarkerKind::Ambig => {
                    here = here.join(&Conflicts::with_ambig_group(marker.id.name.clone()));
                }
                ConflictMarkerKind::Prec => {
                    let precs = self.ast.precedences.as_ref();
                    let found = precs.and_then(|p| {
                        p.items
                            .iter()
                            .position(|item| item.id.name == marker.id.name)
                            .map(|i| (p, i))
                    });
                    let (precs, index) = match found {
                        Some(found) => found,
                        None => {
                            return Err(self.error(
                                format!("Reference to unknown precedence: '{}'", marker.id.name),
                                Some(marker.id.start),
                            ))
                        }
                    };
                    let item = &precs.items[index];
                    let value = (precs.items.len() - index) as i32;
                    match item.assoc {
                        Some(Associativity::Cut) => {
                            here = here.join(&Conflicts::with_cut(value));
                        }
                        assoc => {
                            let dir = match assoc {
                                Some(Associativity::Left) => 1,
                                Some(Associativity::Right) => -1,
                                _ => 0,
                            };
                            here = here.join(&Conflicts::with_precedence(value << 2));
                            at_end = at_end.join(&Conflicts::with_precedence((value << 2) + dir));
                        }
                    }
                }
            }
        }
        Ok((here, at_end))
    }

    fn resolve(&mut self, name: &NameExpression) -> Result<TermIdx> {
        if let Some(built) = self
            .built
            .iter()
            .find(|b| b.skip.is_none() && b.matches(&name.id.name, &name.args))
        {
            return Ok(built.term);
        }
        if let Some(term) = self.get_token(name)? {
            return Ok(term);
        }
        let external = self
            .external_tokens
            .iter()
            .find_map(|ext| find_external(&ext.tokens, &name.id.name))
            .or_else(|| {
                self.external_specializers
                    .iter()
                    .find_map(|ext| find_external(&ext.tokens, &name.id.name))
            });
        if let Some(term) = external {
            self.used(&name.id.name);
            return Ok(term);
        }

        let known = self
            .ast_rules
            .iter()
            .find(|(_, rule)| rule.id.name == name.id.name)
            .cloned();
        let (skip, rule) = match known {
            Some(known) => known,
            None => {
                return Err(self.error(
                    format!("Reference to undefined rule '{}'", name.id.name),
                    Some(name.start),
                ))
            }
        };
        if rule.params.len() != name.args.len() {
            return Err(self.error(
                format!("Wrong number of arguments for '{}'", name.id.name),
                Some(name.start),
            ));
        }
        self.used(&rule.id.name);
        self.build_rule(&rule, &name.args, skip, false)
    }

    fn build_rule(
        &mut self,
        rule: &RuleDeclaration,
        args: &[Expression],
        skip: TermIdx,
        inline: bool,
    ) -> Result<TermIdx> {
        let expr = self.substitute_args(&rule.expr, args, &rule.params)?;
        let allow = if inline { "pg" } else { "pgi" };
        let info = self.node_info(&rule.props, allow, Some(&rule.id.name), args, &rule.params, Some(&rule.expr))?;
        if info.exported.is_some() && !rule.params.is_empty() {
            self.warn("Can't export parameterized rules", Some(rule.start));
        }
        if info.exported.is_some() && inline {
            self.warn("Can't export inline rule", Some(rule.start));
        }

        let base = if args.is_empty() {
            rule.id.name.clone()
        } else {
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            format!("{}<{}>", rule.id.name, args.join(","))
        };
        let term = self.new_name(&base, info.name.clone(), info.props.clone());
        if info.inline {
            self.terms.get_mut(term).set_inline();
        }
        if info.dynamic_prec != 0 {
            self.register_dynamic_prec(term, info.dynamic_prec);
        }
        if (self.terms.get(term).node_type() || info.exported.is_some()) && rule.params.is_empty() {
            if info.name.is_none() {
                self.terms.get_mut(term).set_preserve();
            }
            if !inline {
                let key = info.exported.clone().unwrap_or_else(|| rule.id.name.clone());
                self.named_terms.insert(key, term);
            }
        }
        if !inline {
            self.built.push(BuiltRule::new(&rule.id.name, args.to_vec(), term));
        }

        self.current_skip.push(skip);
        let parts = match self.normalize_expr(&expr) {
            Ok(parts) => parts,
            Err(err) => {
                self.current_skip.pop();
                return Err(err);
            }
        };
        let limit = 100
            * match &expr {
                Expression::Choice { exprs, .. } => exprs.len(),
                _ => 1,
            };
        if parts.len() > limit {
            self.warn(
                &format!(
                    "Rule {} is generating a lot ({}) of choices.\n  Consider splitting it up or reducing the amount of ? or | operator uses.",
                    rule.id.name,
                    parts.len()
                ),
                Some(rule.start),
            );
        }
        self.define_rule(term, parts);
        self.current_skip.pop();

        if let Some(group) = info.group {
            self.defined_groups.push(DefinedGroup {
                term,
                group,
                rule_name: rule.id.name.clone(),
                start: rule.start,
            });
        }
        Ok(term)
    }

    fn register_dynamic_prec(&mut self, term: TermIdx, prec: i32) {
        self.dynamic_precedences.push((term, prec));
        self.terms.get_mut(term).set_preserve();
    }

    fn substitute_args(&self, expr: &Expression, args: &[Expression], params: &[Identifier]) -> Result<Expression> {
        if args.is_empty() {
            return Ok(expr.clone());
        }
        self.substitute(expr, args, params)
    }

    fn substitute(&self, expr: &Expression, args: &[Expression], params: &[Identifier]) -> Result<Expression> {
        let walk = |e: &Expression| self.substitute(e, args, params);
        Ok(match expr {
            Expression::Name(name) => {
                let new_args = name.args.iter().map(walk).collect::<Result<Vec<_>>>()?;
                match params.iter().position(|p| p.name == name.id.name) {
                    Some(found) => {
                        let arg = &args[found];
                        if new_args.is_empty() {
                            arg.clone()
                        } else {
                            match arg {
                                Expression::Name(arg) if arg.args.is_empty() => {
                                    Expression::Name(NameExpression {
                                        start: name.start,
                                        id: arg.id.clone(),
                                        args: new_args,
                                    })
                                }
                                _ => {
                                    return Err(self.error(
                                        "Passing arguments to a parameter that already has arguments",
                                        Some(name.start),
                                    ))
                                }
                            }
                        }
                    }
                    None => Expression::Name(NameExpression {
                        start: name.start,
                        id: name.id.clone(),
                        args: new_args,
                    }),
                }
            }
            Expression::Specialize {
                start,
                kind,
                props,
                token,
                content,
            } => Expression::Specialize {
                start: *start,
                kind: *kind,
                props: self.substitute_in_props(props, args, params)?,
                token: Box::new(walk(token)?),
                content: Box::new(walk(content)?),
            },
            Expression::InlineRule { start, rule } => Expression::InlineRule {
                start: *start,
                rule: Box::new(RuleDeclaration {
                    start: rule.start,
                    id: rule.id.clone(),
                    props: self.substitute_in_props(&rule.props, args, params)?,
                    params: vec![],
                    expr: walk(&rule.expr)?,
                }),
            },
            Expression::Choice { start, exprs } => Expression::Choice {
                start: *start,
                exprs: exprs.iter().map(walk).collect::<Result<Vec<_>>>()?,
            },
            Expression::Sequence {
                start,
                exprs,
                markers,
            } => Expression::Sequence {
                start: *start,
                exprs: exprs.iter().map(walk).collect::<Result<Vec<_>>>()?,
                markers: markers.clone(),
            },
            Expression::Repeat { start, expr, kind } => Expression::Repeat {
                start: *start,
                expr: Box::new(walk(expr)?),
                kind: *kind,
            },
            other => other.clone(),
        })
    }

    fn substitute_in_props(&self, props: &[Prop], args: &[Expression], params: &[Identifier]) -> Result<Vec<Prop>> {
        let mut result = Vec::with_capacity(props.len());
        for prop in props {
            let mut value = Vec::with_capacity(prop.value.len());
            for part in &prop.value {
                let found = part
                    .name
                    .as_ref()
                    .and_then(|name| params.iter().position(|p| p.name == *name));
                let found = match found {
                    Some(found) => found,
                    None => {
                        value.push(part.clone());
                        continue;
                    }
                };
                let text = match &args[found] {
                    Expression::Name(arg) if arg.args.is_empty() => arg.id.name.clone(),
                    Expression::Literal { value, .. } => value.clone(),
                    expr => {
                        return Err(self.error(
                            format!("Trying to interpolate expression '{}' into a prop", expr),
                            Some(part.start),
                        ))
                    }
                };
                value.push(PropPart {
                    start: part.start,
                    value: Some(text),
                    name: None,
                });
            }
            result.push(Prop {
                start: prop.start,
                at: prop.at,
                name: prop.name.clone(),
                value,
            });
        }
        Ok(result)
    }

    fn resolve_specialization(&mut self, expr: &Expression) -> Result<TermIdx> {
        let (start, kind, props, token, content) = match expr {
            Expression::Specialize {
                start,
                kind,
                props,
                token,
                content,
            } => (*start, *kind, props, token, content),
            _ => return Err(self.error("Expected a specialization", Some(expr.start()))),
        };
        let info = self.node_info(props, "d", None, &[], &[], None)?;
        let parts = self.normalize_expr(token)?;
        let base = match parts.as_slice() {
            [part] if part.terms.len() == 1 && self.terms.get(part.terms[0]).terminal() => part.terms[0],
            _ => {
                return Err(self.error(
                    format!("The first argument to '{}' must resolve to a token", kind.name()),
                    Some(token.start()),
                ))
            }
        };
        let values: Vec<String> = match content.as_ref() {
            Expression::Literal { value, .. } => vec![value.clone()],
            Expression::Choice { exprs, .. }
                if exprs.iter().all(|e| matches!(e, Expression::Literal { .. })) =>
            {
                exprs
                    .iter()
                    .filter_map(|e| match e {
                        Expression::Literal { value, .. } => Some(value.clone()),
                        _ => None,
                    })
                    .collect()
            }
            _ => {
                return Err(self.error(
                    format!(
                        "The second argument to '{}' must be a literal or choice of literals",
                        kind.name()
                    ),
                    Some(content.start()),
                ))
            }
        };

        let table = match self.specialized.iter().position(|(t, _)| *t == base) {
            Some(table) => table,
            None => {
                self.specialized.push((base, vec![]));
                self.specialized.len() - 1
            }
        };
        let mut token_term: Option<TermIdx> = None;
        for value in values {
            let known = self.specialized[table]
                .1
                .iter()
                .find(|s| s.value == value)
                .cloned();
            let base_name = self.terms.name(base).to_owned();
            match known {
                None => {
                    let term = match token_term {
                        Some(term) => term,
                        None => {
                            let term = self.make_terminal(
                                &format!("{}/{}", base_name, quoted(&value)),
                                info.name.clone(),
                                info.props.clone(),
                            );
                            if let Some(dialect) = info.dialect {
                                self.tokens.by_dialect.entry(dialect).or_default().push(term);
                            }
                            token_term = Some(term);
                            term
                        }
                    };
                    self.specialized[table].1.push(Specialization {
                        value,
                        term,
                        kind,
                        dialect: info.dialect,
                        name: info.name.clone(),
                    });
                    self.token_origins.insert(
                        term,
                        TokenOrigin {
                            spec: Some(base),
                            external: None,
                        },
                    );
                    if info.name.is_some() || info.exported.is_some() {
                        if info.name.is_none() {
                            self.terms.get_mut(term).set_preserve();
                        }
                        let key = info.exported.clone().or_else(|| info.name.clone()).unwrap_or_default();
                        self.named_terms.insert(key, term);
                    }
                }
                Some(known) => {
                    let conflict = if known.kind != kind {
                        Some(format!(
                            "Conflicting specialization types for {} of {} ({} vs {})",
                            quoted(&value),
                            base_name,
                            kind.name(),
                            known.kind.name()
                        ))
                    } else if known.dialect != info.dialect {
                        Some(format!(
                            "Conflicting dialects for specialization {} of {}",
                            quoted(&value),
                            base_name
                        ))
                    } else if known.name != info.name {
                        Some(format!(
                            "Conflicting names for specialization {} of {}",
                            quoted(&value),
                            base_name
                        ))
                    } else if token_term.map_or(false, |t| t != known.term) {
                        Some(format!(
                            "Conflicting specialization tokens for {} of {}",
                            quoted(&value),
                            base_name
                        ))
                    } else {
                        None
                    };
                    if let Some(message) = conflict {
                        return Err(self.error(message, Some(start)));
                    }
                    token_term = Some(known.term);
                }
            }
        }
        token_term.ok_or_else(|| {
            self.error(
                format!("The second argument to '{}' must not be empty", kind.name()),
                Some(content.start()),
            )
        })
    }

    /// Named nodes a term can produce directly, looking through anonymous rules
    fn named_in(&self, term: TermIdx, recur: &mut Vec<TermIdx>, group: &DefinedGroup) -> Result<Vec<TermIdx>> {
        if self.terms.get(term).node_name.is_some() {
            return Ok(vec![term]);
        }
        if recur.contains(&term) {
            return Err(self.error(
                format!(
                    "Rule '{}' cannot define a group because it contains a non-named recursive rule ('{}')",
                    group.rule_name,
                    self.terms.name(term)
                ),
                Some(group.start),
            ));
        }
        recur.push(term);
        let mut result = vec![];
        for rule in self.rules.iter().filter(|r| r.name == term) {
            let mut names = vec![];
            for part in &rule.parts {
                let found = self.named_in(*part, recur, group)?;
                if !found.is_empty() {
                    names.push(found);
                }
            }
            if names.len() > 1 {
                return Err(self.error(
                    format!(
                        "Rule '{}' cannot define a group because some choices produce multiple named nodes",
                        group.rule_name
                    ),
                    Some(group.start),
                ));
            }
            if let Some(found) = names.pop() {
                result.extend(found);
            }
        }
        recur.pop();
        Ok(result)
    }

    fn define_group(&mut self, group: &DefinedGroup) -> Result<()> {
        let named = self.named_in(group.term, &mut vec![], group)?;
        for term in named {
            let props = &mut self.terms.get_mut(term).props;
            let mut groups: Vec<String> = props
                .get("group")
                .map(|g| g.split(' ').map(str::to_owned).collect())
                .unwrap_or_default();
            if !groups.contains(&group.group) {
                groups.push(group.group.clone());
            }
            groups.sort();
            props.insert("group".to_owned(), groups.join(" "));
        }
        Ok(())
    }

    fn check_groups(&self) {
        let mut groups: Vec<(String, Vec<TermIdx>)> = vec![];
        let mut node_names: Vec<&str> = vec![];
        for idx in self.terms.indices() {
            let term = self.terms.get(idx);
            let name = match &term.node_name {
                Some(name) => name,
                None => continue,
            };
            node_names.push(name);
            if let Some(group_prop) = term.props.get("group") {
                for group in group_prop.split(' ') {
                    match groups.iter_mut().find(|(g, _)| g == group) {
                        Some((_, members)) => members.push(idx),
                        None => groups.push((group.to_owned(), vec![idx])),
                    }
                }
            }
        }
        for (i, (name, terms)) in groups.iter().enumerate() {
            if node_names.contains(&name.as_str()) {
                self.warn(
                    &format!("Group name '{}' conflicts with a node of the same name", name),
                    None,
                );
            }
            for (other_name, other) in &groups[i + 1..] {
                let overlap = terms.iter().any(|t| other.contains(t));
                let neither_superset = if terms.len() > other.len() {
                    other.iter().any(|t| !terms.contains(t))
                } else {
                    terms.iter().any(|t| !other.contains(t))
                };
                if overlap && neither_superset {
                    self.warn(
                        &format!(
                            "Groups '{}' and '{}' overlap without one being a superset of the other",
                            name, other_name
                        ),
                        None,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::RuleDisplay;

    fn build(text: &str) -> Result<Vec<String>> {
        let options = BuildOptions::default();
        let builder = Builder::new(text, &options)?;
        Ok(builder
            .rules
            .iter()
            .map(|r| RuleDisplay::new(r, &builder.terms).to_string())
            .collect())
    }

    #[test]
    fn repeats_and_optionals() {
        let rules = build("@top P { A* \"x\"? } A { \"a\" }").unwrap();
        assert_eq!(
            rules,
            vec![
                "A -> \"a\"",
                "A+ -> A",
                "A+ -> A+ A+",
                "@top ->",
                "@top -> \"x\"",
                "@top -> A+",
                "@top -> A+ \"x\"",
            ]
        );
    }

    #[test]
    fn markers_become_conflicts() {
        let options = BuildOptions::default();
        let builder = Builder::new(
            "@precedence { times @left, plus @left }
             @top P { E }
             E { E !plus \"+\" E | E !times \"*\" E | \"x\" }",
            &options,
        )
        .unwrap();
        let plus = builder
            .rules
            .iter()
            .find(|r| r.parts.len() == 3 && builder.terms.name(r.parts[1]) == "\"+\"")
            .unwrap();
        assert_eq!(plus.conflicts[1].precedence, 1 << 2);
        assert_eq!(plus.conflicts[3].precedence, (1 << 2) + 1);
        let times = builder
            .rules
            .iter()
            .find(|r| r.parts.len() == 3 && builder.terms.name(r.parts[1]) == "\"*\"")
            .unwrap();
        assert_eq!(times.conflicts[1].precedence, 2 << 2);
    }

    #[test]
    fn parameterized_rules_are_shared() {
        let options = BuildOptions::default();
        let builder = Builder::new(
            "@top P { list<\"a\"> list<\"a\"> list<\"b\"> }
             list<item> { item+ }",
            &options,
        )
        .unwrap();
        let names: Vec<&str> = builder
            .terms
            .indices()
            .map(|t| builder.terms.name(t))
            .filter(|n| n.starts_with("list"))
            .collect();
        assert_eq!(names, vec!["list<\"a\">", "list<\"b\">"]);
    }

    #[test]
    fn semantic_errors() {
        let err = |text: &str| match build(text) {
            Err(GenError::Grammar(msg)) => msg,
            other => panic!("expected an error, got {:?}", other),
        };
        assert!(err("@top P { x }").starts_with("Reference to undefined rule 'x'"));
        assert!(err("@top P { a } a { \"x\" } a { \"y\" }").starts_with("Duplicate rule definition for 'a'"));
        assert!(err("@top P { a<\"x\"> } a { \"y\" }").starts_with("Wrong number of arguments for 'a'"));
        assert!(err("@top P { a } a[foo=bar] { \"y\" }").starts_with("Unknown prop name 'foo'"));
        assert!(err("@top P { a } a[closedBy=x] { \"y\" }").starts_with("Node has properties but no name"));
        assert!(err("@top P { A } A[@name=\"a b\"] { \"y\" }").contains("cannot have spaces"));
        assert!(err("@top P { !nope \"x\" }").starts_with("Reference to unknown precedence: 'nope'"));
    }

    #[test]
    fn warns_about_unused_rules() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let warnings = Rc::new(RefCell::new(vec![]));
        let sink = warnings.clone();
        let options = BuildOptions {
            warn: Some(Box::new(move |msg: &str| sink.borrow_mut().push(msg.to_owned()))),
            ..Default::default()
        };
        Builder::new("@top P { \"x\" } Unused { \"y\" }", &options).unwrap();
        let warnings = warnings.borrow();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Unused rule 'Unused'"));
    }

    #[test]
    fn groups_and_delimiters() {
        let options = BuildOptions::default();
        let builder = Builder::new(
            "@detectDelim
             @top P { expr }
             expr[@isGroup=Expression] { Number | Paren }
             Paren { \"(\" expr \")\" }
             @tokens { Number { $[0-9]+ } \"(\" \")\" }",
            &options,
        )
        .unwrap();
        let paren = builder.terms.lookup("Paren").unwrap();
        let number = builder.terms.lookup("Number").unwrap();
        assert_eq!(builder.terms.get(paren).props.get("group").map(String::as_str), Some("Expression"));
        assert_eq!(builder.terms.get(number).props.get("group").map(String::as_str), Some("Expression"));
        let open = builder.terms.lookup("\"(\"").unwrap();
        assert_eq!(builder.terms.get(open).props.get("closedBy").map(String::as_str), Some(")"));
    }

    #[test]
    fn specializations_share_terms() {
        let options = BuildOptions::default();
        let builder = Builder::new(
            "@top P { (kw | Identifier)+ }
             kw { @specialize[@name=Keyword]<Identifier, \"if\" | \"else\"> }
             @tokens { Identifier { $[a-z]+ } }",
            &options,
        )
        .unwrap();
        assert_eq!(builder.specialized.len(), 1);
        let (base, table) = &builder.specialized[0];
        assert_eq!(builder.terms.name(*base), "Identifier");
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].term, table[1].term);
        assert_eq!(builder.terms.get(table[0].term).node_name.as_deref(), Some("Keyword"));
    }
}

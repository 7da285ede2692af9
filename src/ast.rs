//! Syntax tree of the grammar language
//!
//! Every node records the byte offset where it starts, so that the builder can report
//! semantic errors with a source position.

use std::fmt;

#[derive(Debug, Clone)]
pub struct Identifier {
    pub start: usize,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct GrammarDeclaration {
    pub rules: Vec<RuleDeclaration>,
    pub top_rules: Vec<RuleDeclaration>,
    pub tokens: Option<TokenDeclaration>,
    pub context: Option<ContextDeclaration>,
    pub external_tokens: Vec<ExternalTokenDeclaration>,
    pub external_specializers: Vec<ExternalSpecializeDeclaration>,
    pub external_prop_sources: Vec<ExternalPropSourceDeclaration>,
    pub precedences: Option<PrecDeclaration>,
    pub main_skip: Option<Expression>,
    pub scoped_skip: Vec<ScopedSkip>,
    pub dialects: Vec<Identifier>,
    pub external_props: Vec<ExternalPropDeclaration>,
    pub auto_delim: bool,
}

/// `@skip { expr } { rules... }`
#[derive(Debug, Clone)]
pub struct ScopedSkip {
    pub expr: Expression,
    pub top_rules: Vec<RuleDeclaration>,
    pub rules: Vec<RuleDeclaration>,
}

#[derive(Debug, Clone)]
pub struct RuleDeclaration {
    pub start: usize,
    pub id: Identifier,
    pub props: Vec<Prop>,
    pub params: Vec<Identifier>,
    pub expr: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
    Cut,
}

#[derive(Debug, Clone)]
pub struct PrecItem {
    pub id: Identifier,
    pub assoc: Option<Associativity>,
}

/// `@precedence { a @left, b, c @cut }`. Earlier items bind tighter.
#[derive(Debug, Clone)]
pub struct PrecDeclaration {
    pub start: usize,
    pub items: Vec<PrecItem>,
}

/// `@precedence { A, "lit" }` inside `@tokens`
#[derive(Debug, Clone)]
pub struct TokenPrecDeclaration {
    pub start: usize,
    pub items: Vec<Expression>,
}

/// `@conflict { A, B }` inside `@tokens`
#[derive(Debug, Clone)]
pub struct TokenConflictDeclaration {
    pub start: usize,
    pub a: Expression,
    pub b: Expression,
}

#[derive(Debug, Clone)]
pub struct LiteralDeclaration {
    pub start: usize,
    pub literal: String,
    pub props: Vec<Prop>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenDeclaration {
    pub start: usize,
    pub precedences: Vec<TokenPrecDeclaration>,
    pub conflicts: Vec<TokenConflictDeclaration>,
    pub rules: Vec<RuleDeclaration>,
    pub literals: Vec<LiteralDeclaration>,
}

#[derive(Debug, Clone)]
pub struct ContextDeclaration {
    pub start: usize,
    pub id: Identifier,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct ExternalToken {
    pub id: Identifier,
    pub props: Vec<Prop>,
}

#[derive(Debug, Clone)]
pub struct ExternalTokenDeclaration {
    pub start: usize,
    pub id: Identifier,
    pub source: String,
    pub tokens: Vec<ExternalToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecializeKind {
    Specialize,
    Extend,
}

impl SpecializeKind {
    pub fn name(self) -> &'static str {
        match self {
            SpecializeKind::Specialize => "specialize",
            SpecializeKind::Extend => "extend",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExternalSpecializeDeclaration {
    pub start: usize,
    pub kind: SpecializeKind,
    pub token: Expression,
    pub id: Identifier,
    pub source: String,
    pub tokens: Vec<ExternalToken>,
}

#[derive(Debug, Clone)]
pub struct ExternalPropSourceDeclaration {
    pub start: usize,
    pub id: Identifier,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct ExternalPropDeclaration {
    pub start: usize,
    pub id: Identifier,
    pub external_id: Identifier,
    pub source: String,
}

/// One piece of a prop value: either literal text or a `{param}` reference.
#[derive(Debug, Clone)]
pub struct PropPart {
    pub start: usize,
    pub value: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Prop {
    pub start: usize,
    pub at: bool,
    pub name: String,
    pub value: Vec<PropPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictMarkerKind {
    /// `~name`
    Ambig,
    /// `!name`
    Prec,
}

#[derive(Debug, Clone)]
pub struct ConflictMarker {
    pub start: usize,
    pub id: Identifier,
    pub kind: ConflictMarkerKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatKind {
    Optional,
    Star,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    AsciiLetter,
    AsciiUppercase,
    AsciiLowercase,
    Digit,
    Whitespace,
    Eof,
}

impl CharClass {
    pub fn from_name(name: &str) -> Option<CharClass> {
        Some(match name {
            "asciiLetter" => CharClass::AsciiLetter,
            "asciiUppercase" => CharClass::AsciiUppercase,
            "asciiLowercase" => CharClass::AsciiLowercase,
            "digit" => CharClass::Digit,
            "whitespace" => CharClass::Whitespace,
            "eof" => CharClass::Eof,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            CharClass::AsciiLetter => "asciiLetter",
            CharClass::AsciiUppercase => "asciiUppercase",
            CharClass::AsciiLowercase => "asciiLowercase",
            CharClass::Digit => "digit",
            CharClass::Whitespace => "whitespace",
            CharClass::Eof => "eof",
        }
    }

    /// Code point ranges, `to` exclusive
    pub fn ranges(self) -> &'static [(u32, u32)] {
        match self {
            CharClass::AsciiLetter => &[(65, 91), (97, 123)],
            CharClass::AsciiUppercase => &[(65, 91)],
            CharClass::AsciiLowercase => &[(97, 123)],
            CharClass::Digit => &[(48, 58)],
            CharClass::Whitespace => &[
                (9, 14),
                (32, 33),
                (133, 134),
                (160, 161),
                (5760, 5761),
                (8192, 8203),
                (8232, 8234),
                (8239, 8240),
                (8287, 8288),
                (12288, 12289),
            ],
            CharClass::Eof => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct NameExpression {
    pub start: usize,
    pub id: Identifier,
    pub args: Vec<Expression>,
}

#[derive(Debug, Clone)]
pub enum Expression {
    Name(NameExpression),
    Specialize {
        start: usize,
        kind: SpecializeKind,
        props: Vec<Prop>,
        token: Box<Expression>,
        content: Box<Expression>,
    },
    InlineRule {
        start: usize,
        rule: Box<RuleDeclaration>,
    },
    Choice {
        start: usize,
        exprs: Vec<Expression>,
    },
    /// `markers` has one entry per gap, so `exprs.len() + 1` entries.
    Sequence {
        start: usize,
        exprs: Vec<Expression>,
        markers: Vec<Vec<ConflictMarker>>,
    },
    Repeat {
        start: usize,
        expr: Box<Expression>,
        kind: RepeatKind,
    },
    Literal {
        start: usize,
        value: String,
    },
    /// Code point ranges, `to` exclusive
    Set {
        start: usize,
        ranges: Vec<(u32, u32)>,
        inverted: bool,
    },
    Any {
        start: usize,
    },
    CharClass {
        start: usize,
        class: CharClass,
    },
}

impl Expression {
    pub fn start(&self) -> usize {
        match self {
            Expression::Name(name) => name.start,
            Expression::Specialize { start, .. }
            | Expression::InlineRule { start, .. }
            | Expression::Choice { start, .. }
            | Expression::Sequence { start, .. }
            | Expression::Repeat { start, .. }
            | Expression::Literal { start, .. }
            | Expression::Set { start, .. }
            | Expression::Any { start }
            | Expression::CharClass { start, .. } => *start,
        }
    }

    pub fn empty(start: usize) -> Expression {
        Expression::Sequence {
            start,
            exprs: vec![],
            markers: vec![vec![]],
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Expression::Sequence { exprs, markers, .. } => {
                exprs.is_empty() && markers.iter().all(|m| m.is_empty())
            }
            _ => false,
        }
    }

    fn prec(&self) -> u8 {
        match self {
            Expression::Choice { .. } => 1,
            Expression::Sequence { .. } => 2,
            Expression::Repeat { .. } => 3,
            _ => 4,
        }
    }

    /// Structural equality, ignoring source positions
    pub fn same(&self, other: &Expression) -> bool {
        self.to_string() == other.to_string()
    }
}

pub fn exprs_same(a: &[Expression], b: &[Expression]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same(b))
}

struct MaybeParens<'a> {
    expr: &'a Expression,
    parent_prec: u8,
}

impl<'a> fmt::Display for MaybeParens<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expr.prec() < self.parent_prec {
            write!(f, "({})", self.expr)
        } else {
            write!(f, "{}", self.expr)
        }
    }
}

/// Writes a string the way a JSON serializer would
pub fn quote_str(f: &mut impl fmt::Write, value: &str) -> fmt::Result {
    f.write_char('"')?;
    for ch in value.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

pub fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    // Writing to a String can't fail
    let _ = quote_str(&mut out, value);
    out
}

fn write_props(f: &mut fmt::Formatter<'_>, props: &[Prop]) -> fmt::Result {
    if props.is_empty() {
        return Ok(());
    }
    write!(f, "[")?;
    for (i, prop) in props.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", prop)?;
    }
    write!(f, "]")
}

impl fmt::Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.at {
            write!(f, "@")?;
        }
        write!(f, "{}", self.name)?;
        if !self.value.is_empty() {
            write!(f, "=")?;
            for part in &self.value {
                match (&part.value, &part.name) {
                    (Some(value), _) => write!(f, "{}", value)?,
                    (None, Some(name)) => write!(f, "{{{}}}", name)?,
                    (None, None) => {}
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConflictMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConflictMarkerKind::Ambig => write!(f, "~{}", self.id.name),
            ConflictMarkerKind::Prec => write!(f, "!{}", self.id.name),
        }
    }
}

fn write_set_char(f: &mut fmt::Formatter<'_>, code: u32) -> fmt::Result {
    match char::from_u32(code) {
        Some(c @ ('\\' | ']' | '-')) => write!(f, "\\{}", c),
        Some(c) if code > 0x20 && code < 0x7f => write!(f, "{}", c),
        _ => write!(f, "\\u{{{:x}}}", code),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = self.prec();
        match self {
            Expression::Name(name) => {
                write!(f, "{}", name.id.name)?;
                if !name.args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in name.args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Expression::Specialize {
                kind,
                props,
                token,
                content,
                ..
            } => {
                write!(f, "@{}", kind.name())?;
                write_props(f, props)?;
                write!(f, "<{}, {}>", token, content)
            }
            Expression::InlineRule { rule, .. } => {
                write!(f, "{}", rule.id.name)?;
                write_props(f, &rule.props)?;
                write!(f, " {{ {} }}", rule.expr)
            }
            Expression::Choice { exprs, .. } => {
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", MaybeParens { expr, parent_prec: prec })?;
                }
                Ok(())
            }
            Expression::Sequence { exprs, markers, .. } => {
                if exprs.is_empty() && markers.iter().all(|m| m.is_empty()) {
                    return write!(f, "()");
                }
                let mut first = true;
                for (i, gap) in markers.iter().enumerate() {
                    for marker in gap {
                        if !first {
                            write!(f, " ")?;
                        }
                        first = false;
                        write!(f, "{}", marker)?;
                    }
                    if let Some(expr) = exprs.get(i) {
                        if !first {
                            write!(f, " ")?;
                        }
                        first = false;
                        write!(f, "{}", MaybeParens { expr, parent_prec: prec })?;
                    }
                }
                Ok(())
            }
            Expression::Repeat { expr, kind, .. } => {
                write!(f, "{}", MaybeParens { expr, parent_prec: prec + 1 })?;
                match kind {
                    RepeatKind::Optional => write!(f, "?"),
                    RepeatKind::Star => write!(f, "*"),
                    RepeatKind::Plus => write!(f, "+"),
                }
            }
            Expression::Literal { value, .. } => quote_str(f, value),
            Expression::Set {
                ranges, inverted, ..
            } => {
                write!(f, "{}[", if *inverted { "!" } else { "$" })?;
                for (from, to) in ranges {
                    write_set_char(f, *from)?;
                    if *to > from + 1 {
                        write!(f, "-")?;
                        write_set_char(f, to - 1)?;
                    }
                }
                write!(f, "]")
            }
            Expression::Any { .. } => write!(f, "_"),
            Expression::CharClass { class, .. } => write!(f, "@{}", class.name()),
        }
    }
}

#[test]
fn display_expressions() {
    let name = |n: &str| {
        Expression::Name(NameExpression {
            start: 0,
            id: Identifier {
                start: 0,
                name: n.to_owned(),
            },
            args: vec![],
        })
    };
    let choice = Expression::Choice {
        start: 0,
        exprs: vec![name("a"), name("b")],
    };
    let repeat = Expression::Repeat {
        start: 0,
        expr: Box::new(choice.clone()),
        kind: RepeatKind::Plus,
    };
    assert_eq!(repeat.to_string(), "(a | b)+");
    let seq = Expression::Sequence {
        start: 0,
        exprs: vec![name("x"), repeat],
        markers: vec![vec![], vec![], vec![]],
    };
    assert_eq!(seq.to_string(), "x (a | b)+");
    assert!(Expression::empty(3).is_empty());
    assert_eq!(Expression::empty(0).to_string(), "()");
}

#[test]
fn quoting() {
    assert_eq!(quoted("a\"b\\"), "\"a\\\"b\\\\\"");
    assert_eq!(quoted("\n"), "\"\\n\"");
}

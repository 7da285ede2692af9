//! Parser for the grammar language

use crate::ast::*;
use crate::error::{GenError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Id(String),
    /// `@name`
    At(String),
    Str(String),
    /// `$[...]` or `![...]`
    Set { ranges: Vec<(u32, u32)>, inverted: bool },
    Punct(char),
    Eof,
}

/// Maps byte offsets to line/column pairs for error messages.
#[derive(Debug, Clone)]
pub struct Source {
    pub file_name: String,
    pub text: String,
}

impl Source {
    pub fn new(text: &str, file_name: &str) -> Source {
        Source {
            file_name: file_name.to_owned(),
            text: text.to_owned(),
        }
    }

    /// 1-based line, 0-based column
    pub fn line_col(&self, pos: usize) -> (usize, usize) {
        let pos = pos.min(self.text.len());
        let before = &self.text.as_bytes()[..pos];
        let line = before.iter().filter(|b| **b == b'\n').count() + 1;
        let line_start = before
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        (line, self.text[line_start..pos].chars().count())
    }

    /// Appends the source position of `pos` to a message
    pub fn located(&self, message: &str, pos: Option<usize>) -> String {
        match pos {
            None => message.to_owned(),
            Some(pos) => {
                let (line, col) = self.line_col(pos);
                format!("{} ({} {}:{})", message, self.file_name, line, col)
            }
        }
    }

    pub fn syntax_error(&self, message: String, pos: usize) -> GenError {
        let (line, column) = self.line_col(pos);
        GenError::Syntax {
            message,
            file: self.file_name.clone(),
            line,
            column,
        }
    }
}

struct Input<'a> {
    source: &'a Source,
    chars: Vec<(usize, char)>,
    // Index into `chars` of the next unread character
    char_pos: usize,
    token: Token,
    // Byte offsets of the current token
    start: usize,
    end: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

impl<'a> Input<'a> {
    fn new(source: &'a Source) -> Result<Input<'a>> {
        let mut input = Input {
            source,
            chars: source.text.char_indices().collect(),
            char_pos: 0,
            token: Token::Eof,
            start: 0,
            end: 0,
        };
        input.next()?;
        Ok(input)
    }

    fn offset(&self, char_pos: usize) -> usize {
        self.chars
            .get(char_pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.source.text.len())
    }

    fn peek_char(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.char_pos + ahead).map(|(_, c)| *c)
    }

    fn raise<T>(&self, message: impl Into<String>, pos: usize) -> Result<T> {
        Err(self.source.syntax_error(message.into(), pos))
    }

    fn unexpected<T>(&self) -> Result<T> {
        let desc = match &self.token {
            Token::Eof => "end of file".to_owned(),
            Token::Id(id) => format!("'{}'", id),
            Token::At(id) => format!("'@{}'", id),
            Token::Str(s) => quoted(s),
            Token::Set { .. } => "character set".to_owned(),
            Token::Punct(c) => format!("'{}'", c),
        };
        self.raise(format!("Unexpected token {}", desc), self.start)
    }

    fn skip_space(&mut self) -> Result<()> {
        loop {
            match self.peek_char(0) {
                Some(c) if c.is_whitespace() => self.char_pos += 1,
                Some('/') if self.peek_char(1) == Some('/') => {
                    while let Some(c) = self.peek_char(0) {
                        if c == '\n' {
                            break;
                        }
                        self.char_pos += 1;
                    }
                }
                Some('/') if self.peek_char(1) == Some('*') => {
                    let start = self.offset(self.char_pos);
                    self.char_pos += 2;
                    loop {
                        match self.peek_char(0) {
                            None => return self.raise("Unterminated comment", start),
                            Some('*') if self.peek_char(1) == Some('/') => {
                                self.char_pos += 2;
                                break;
                            }
                            Some(_) => self.char_pos += 1,
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek_char(0) {
            if !is_word_char(c) {
                break;
            }
            word.push(c);
            self.char_pos += 1;
        }
        word
    }

    fn read_escape(&mut self) -> Result<u32> {
        let start = self.offset(self.char_pos);
        // Skip the backslash
        self.char_pos += 1;
        let c = match self.peek_char(0) {
            None => return self.raise("Unterminated escape", start),
            Some(c) => c,
        };
        self.char_pos += 1;
        let code = match c {
            'n' => '\n' as u32,
            'r' => '\r' as u32,
            't' => '\t' as u32,
            'b' => 8,
            'f' => 12,
            'v' => 11,
            '0' => 0,
            'x' => self.read_hex(2, start)?,
            'u' => {
                if self.peek_char(0) == Some('{') {
                    self.char_pos += 1;
                    let mut value: u32 = 0;
                    let mut digits = 0;
                    loop {
                        match self.peek_char(0) {
                            Some('}') if digits > 0 => {
                                self.char_pos += 1;
                                break;
                            }
                            Some(d) if d.is_ascii_hexdigit() && digits < 6 => {
                                value = value * 16 + d.to_digit(16).unwrap_or(0);
                                digits += 1;
                                self.char_pos += 1;
                            }
                            _ => return self.raise("Invalid unicode escape", start),
                        }
                    }
                    if value > 0x10ffff {
                        return self.raise("Invalid unicode escape", start);
                    }
                    value
                } else {
                    self.read_hex(4, start)?
                }
            }
            other => other as u32,
        };
        Ok(code)
    }

    fn read_hex(&mut self, len: usize, start: usize) -> Result<u32> {
        let mut value = 0;
        for _ in 0..len {
            match self.peek_char(0).and_then(|c| c.to_digit(16)) {
                Some(d) => value = value * 16 + d,
                None => return self.raise("Invalid escape", start),
            }
            self.char_pos += 1;
        }
        Ok(value)
    }

    fn read_string(&mut self, quote: char) -> Result<String> {
        let start = self.offset(self.char_pos);
        self.char_pos += 1;
        let mut value = String::new();
        loop {
            match self.peek_char(0) {
                None | Some('\n') => return self.raise("Unterminated string literal", start),
                Some(c) if c == quote => {
                    self.char_pos += 1;
                    return Ok(value);
                }
                Some('\\') => {
                    let code = self.read_escape()?;
                    match char::from_u32(code) {
                        Some(c) => value.push(c),
                        None => return self.raise("Invalid character in string", start),
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.char_pos += 1;
                }
            }
        }
    }

    fn read_set_char(&mut self, start: usize) -> Result<u32> {
        match self.peek_char(0) {
            None => self.raise("Unterminated character set", start),
            Some('\\') => self.read_escape(),
            Some(c) => {
                self.char_pos += 1;
                Ok(c as u32)
            }
        }
    }

    fn read_set(&mut self) -> Result<Vec<(u32, u32)>> {
        let start = self.offset(self.char_pos);
        // Skip `$[` or `![`
        self.char_pos += 2;
        let mut ranges: Vec<(u32, u32)> = vec![];
        loop {
            if self.peek_char(0) == Some(']') {
                self.char_pos += 1;
                break;
            }
            let from = self.read_set_char(start)?;
            let mut to = from + 1;
            if self.peek_char(0) == Some('-') && self.peek_char(1) != Some(']') {
                self.char_pos += 1;
                let end = self.read_set_char(start)?;
                if end < from {
                    return self.raise("Invalid character range", start);
                }
                to = end + 1;
            }
            ranges.push((from, to));
        }
        Ok(normalize_ranges(ranges))
    }

    fn next(&mut self) -> Result<()> {
        self.skip_space()?;
        self.start = self.offset(self.char_pos);
        let c = match self.peek_char(0) {
            None => {
                self.token = Token::Eof;
                self.end = self.start;
                return Ok(());
            }
            Some(c) => c,
        };
        self.token = if c == '@' {
            self.char_pos += 1;
            let word = self.read_word();
            if word.is_empty() {
                return self.raise("Expected an identifier after '@'", self.start);
            }
            Token::At(word)
        } else if (c == '$' || c == '!') && self.peek_char(1) == Some('[') {
            Token::Set {
                ranges: self.read_set()?,
                inverted: c == '!',
            }
        } else if c == '"' || c == '\'' {
            Token::Str(self.read_string(c)?)
        } else if is_word_char(c) {
            Token::Id(self.read_word())
        } else if "{}()[]<>|*+?!~,=.:".contains(c) {
            self.char_pos += 1;
            Token::Punct(c)
        } else {
            return self.raise(format!("Unexpected character '{}'", c), self.start);
        };
        self.end = self.offset(self.char_pos);
        Ok(())
    }

    fn is_punct(&self, c: char) -> bool {
        self.token == Token::Punct(c)
    }

    fn is_at(&self, name: &str) -> bool {
        matches!(&self.token, Token::At(n) if n == name)
    }

    fn is_id(&self, name: &str) -> bool {
        matches!(&self.token, Token::Id(n) if n == name)
    }

    fn eat_punct(&mut self, c: char) -> Result<bool> {
        if self.is_punct(c) {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        if !self.eat_punct(c)? {
            return self.unexpected();
        }
        Ok(())
    }

    fn expect_id(&mut self) -> Result<Identifier> {
        match &self.token {
            Token::Id(name) => {
                let id = Identifier {
                    start: self.start,
                    name: name.clone(),
                };
                self.next()?;
                Ok(id)
            }
            _ => self.unexpected(),
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<()> {
        if !self.is_id(word) {
            return self.unexpected();
        }
        self.next()
    }

    fn expect_string(&mut self) -> Result<String> {
        match &self.token {
            Token::Str(value) => {
                let value = value.clone();
                self.next()?;
                Ok(value)
            }
            _ => self.unexpected(),
        }
    }
}

/// Sorts ranges and joins overlapping or adjacent ones
pub fn normalize_ranges(mut ranges: Vec<(u32, u32)>) -> Vec<(u32, u32)> {
    ranges.sort();
    let mut result: Vec<(u32, u32)> = vec![];
    for (from, to) in ranges {
        match result.last_mut() {
            Some(last) if from <= last.1 => last.1 = last.1.max(to),
            _ => result.push((from, to)),
        }
    }
    result
}

pub fn parse_grammar(text: &str, file_name: &str) -> Result<GrammarDeclaration> {
    let source = Source::new(text, file_name);
    parse_source(&source)
}

pub(crate) fn parse_source(source: &Source) -> Result<GrammarDeclaration> {
    let mut input = Input::new(source)?;
    let mut grammar = GrammarDeclaration::default();
    let mut seen_dialects = false;

    while input.token != Token::Eof {
        let start = input.start;
        if input.is_at("top") {
            input.next()?;
            grammar.top_rules.push(parse_rule(&mut input, None)?);
        } else if input.is_at("tokens") {
            input.next()?;
            if grammar.tokens.is_some() {
                return input.raise("Multiple @tokens declarations", start);
            }
            grammar.tokens = Some(parse_tokens(&mut input, start)?);
        } else if input.is_at("context") {
            input.next()?;
            if grammar.context.is_some() {
                return input.raise("Multiple @context declarations", start);
            }
            let id = input.expect_id()?;
            input.expect_keyword("from")?;
            let source = input.expect_string()?;
            grammar.context = Some(ContextDeclaration { start, id, source });
        } else if input.is_at("external") {
            input.next()?;
            parse_external(&mut input, &mut grammar, start)?;
        } else if input.is_at("precedence") {
            input.next()?;
            if grammar.precedences.is_some() {
                return input.raise("Multiple precedence declarations", start);
            }
            grammar.precedences = Some(parse_precedence(&mut input, start)?);
        } else if input.is_at("dialects") {
            input.next()?;
            if seen_dialects {
                return input.raise("Multiple @dialects declarations", start);
            }
            seen_dialects = true;
            input.expect_punct('{')?;
            while !input.is_punct('}') {
                if !grammar.dialects.is_empty() {
                    input.expect_punct(',')?;
                }
                grammar.dialects.push(input.expect_id()?);
            }
            input.next()?;
        } else if input.is_at("detectDelim") {
            input.next()?;
            grammar.auto_delim = true;
        } else if input.is_at("skip") {
            input.next()?;
            input.expect_punct('{')?;
            let expr = parse_expr_choice(&mut input)?;
            input.expect_punct('}')?;
            if input.is_punct('{') {
                input.next()?;
                let mut rules = vec![];
                let mut top_rules = vec![];
                while !input.is_punct('}') {
                    if input.is_at("top") {
                        input.next()?;
                        top_rules.push(parse_rule(&mut input, None)?);
                    } else {
                        rules.push(parse_rule(&mut input, None)?);
                    }
                }
                input.next()?;
                grammar.scoped_skip.push(ScopedSkip {
                    expr,
                    top_rules,
                    rules,
                });
            } else {
                if grammar.main_skip.is_some() {
                    return input.raise("Multiple top-level skip declarations", start);
                }
                grammar.main_skip = Some(expr);
            }
        } else {
            grammar.rules.push(parse_rule(&mut input, None)?);
        }
    }

    Ok(grammar)
}

fn parse_rule(input: &mut Input, named: Option<Identifier>) -> Result<RuleDeclaration> {
    let start = named.as_ref().map(|id| id.start).unwrap_or(input.start);
    let id = match named {
        Some(id) => id,
        None => input.expect_id()?,
    };
    let props = parse_props(input)?;
    let mut params = vec![];
    if input.eat_punct('<')? {
        while !input.is_punct('>') {
            if !params.is_empty() {
                input.expect_punct(',')?;
            }
            params.push(input.expect_id()?);
        }
        input.next()?;
    }
    input.expect_punct('{')?;
    let expr = parse_expr_choice(input)?;
    input.expect_punct('}')?;
    Ok(RuleDeclaration {
        start,
        id,
        props,
        params,
        expr,
    })
}

fn parse_props(input: &mut Input) -> Result<Vec<Prop>> {
    let mut props = vec![];
    if !input.eat_punct('[')? {
        return Ok(props);
    }
    while !input.is_punct(']') {
        if !props.is_empty() {
            input.expect_punct(',')?;
        }
        props.push(parse_prop(input)?);
    }
    input.next()?;
    Ok(props)
}

fn parse_prop(input: &mut Input) -> Result<Prop> {
    let start = input.start;
    let (at, name) = match &input.token {
        Token::At(name) => (true, name.clone()),
        Token::Id(name) => (false, name.clone()),
        _ => return input.unexpected(),
    };
    input.next()?;
    let mut value = vec![];
    if input.eat_punct('=')? {
        loop {
            let part_start = input.start;
            match &input.token {
                Token::Id(text) | Token::Str(text) => {
                    value.push(PropPart {
                        start: part_start,
                        value: Some(text.clone()),
                        name: None,
                    });
                    input.next()?;
                }
                Token::Punct('.') => {
                    value.push(PropPart {
                        start: part_start,
                        value: Some(".".to_owned()),
                        name: None,
                    });
                    input.next()?;
                }
                Token::Punct('{') => {
                    input.next()?;
                    let id = input.expect_id()?;
                    input.expect_punct('}')?;
                    value.push(PropPart {
                        start: part_start,
                        value: None,
                        name: Some(id.name),
                    });
                }
                _ => break,
            }
        }
    }
    Ok(Prop {
        start,
        at,
        name,
        value,
    })
}

fn parse_expr_choice(input: &mut Input) -> Result<Expression> {
    let start = input.start;
    let mut exprs = vec![parse_expr_sequence(input)?];
    while input.eat_punct('|')? {
        exprs.push(parse_expr_sequence(input)?);
    }
    if exprs.len() == 1 {
        return Ok(exprs.pop().unwrap_or_else(|| Expression::empty(start)));
    }
    Ok(Expression::Choice { start, exprs })
}

fn ends_sequence(token: &Token) -> bool {
    matches!(
        token,
        Token::Eof
            | Token::Punct('}')
            | Token::Punct(')')
            | Token::Punct('|')
            | Token::Punct(']')
            | Token::Punct(',')
            | Token::Punct('>')
    )
}

fn parse_expr_sequence(input: &mut Input) -> Result<Expression> {
    let start = input.start;
    let mut exprs: Vec<Expression> = vec![];
    let mut markers: Vec<Vec<ConflictMarker>> = vec![vec![]];
    loop {
        while input.is_punct('~') || input.is_punct('!') {
            let marker_start = input.start;
            let kind = if input.is_punct('~') {
                ConflictMarkerKind::Ambig
            } else {
                ConflictMarkerKind::Prec
            };
            input.next()?;
            let id = input.expect_id()?;
            if let Some(gap) = markers.last_mut() {
                gap.push(ConflictMarker {
                    start: marker_start,
                    id,
                    kind,
                });
            }
        }
        if ends_sequence(&input.token) {
            break;
        }
        exprs.push(parse_expr_suffix(input)?);
        markers.push(vec![]);
    }
    if exprs.len() == 1 && markers.iter().all(|m| m.is_empty()) {
        return Ok(exprs.pop().unwrap_or_else(|| Expression::empty(start)));
    }
    Ok(Expression::Sequence {
        start,
        exprs,
        markers,
    })
}

fn parse_expr_suffix(input: &mut Input) -> Result<Expression> {
    let start = input.start;
    let mut expr = parse_expr_inner(input)?;
    loop {
        let kind = if input.is_punct('*') {
            RepeatKind::Star
        } else if input.is_punct('+') {
            RepeatKind::Plus
        } else if input.is_punct('?') {
            RepeatKind::Optional
        } else {
            return Ok(expr);
        };
        input.next()?;
        expr = Expression::Repeat {
            start,
            expr: Box::new(expr),
            kind,
        };
    }
}

fn parse_args(input: &mut Input) -> Result<Vec<Expression>> {
    let mut args = vec![];
    if !input.eat_punct('<')? {
        return Ok(args);
    }
    while !input.is_punct('>') {
        if !args.is_empty() {
            input.expect_punct(',')?;
        }
        args.push(parse_expr_choice(input)?);
    }
    input.next()?;
    Ok(args)
}

fn parse_expr_inner(input: &mut Input) -> Result<Expression> {
    let start = input.start;
    match input.token.clone() {
        Token::Punct('(') => {
            input.next()?;
            if input.eat_punct(')')? {
                return Ok(Expression::empty(start));
            }
            let expr = parse_expr_choice(input)?;
            input.expect_punct(')')?;
            Ok(expr)
        }
        Token::Str(value) => {
            input.next()?;
            Ok(Expression::Literal { start, value })
        }
        Token::Set { ranges, inverted } => {
            input.next()?;
            Ok(Expression::Set {
                start,
                ranges,
                inverted,
            })
        }
        Token::At(name) if name == "specialize" || name == "extend" => {
            let kind = if name == "specialize" {
                SpecializeKind::Specialize
            } else {
                SpecializeKind::Extend
            };
            input.next()?;
            let props = parse_props(input)?;
            input.expect_punct('<')?;
            let token = parse_expr_choice(input)?;
            let content = if input.eat_punct(',')? {
                parse_expr_choice(input)?
            } else {
                return input.raise(
                    format!("Expected a value for @{}", kind.name()),
                    input.start,
                );
            };
            input.expect_punct('>')?;
            Ok(Expression::Specialize {
                start,
                kind,
                props,
                token: Box::new(token),
                content: Box::new(content),
            })
        }
        Token::At(name) => match CharClass::from_name(&name) {
            Some(class) => {
                input.next()?;
                Ok(Expression::CharClass { start, class })
            }
            None => input.raise(format!("Unrecognized character class '@{}'", name), start),
        },
        Token::Id(name) if name == "_" => {
            input.next()?;
            Ok(Expression::Any { start })
        }
        Token::Id(_) => {
            let id = input.expect_id()?;
            if input.is_punct('[') || input.is_punct('{') {
                let rule = parse_rule(input, Some(id))?;
                if !rule.params.is_empty() {
                    return input.raise("Inline rules can't have parameters", rule.start);
                }
                return Ok(Expression::InlineRule {
                    start,
                    rule: Box::new(rule),
                });
            }
            let args = parse_args(input)?;
            Ok(Expression::Name(NameExpression { start, id, args }))
        }
        _ => input.unexpected(),
    }
}

fn parse_precedence(input: &mut Input, start: usize) -> Result<PrecDeclaration> {
    input.expect_punct('{')?;
    let mut items = vec![];
    while !input.is_punct('}') {
        if !items.is_empty() {
            input.expect_punct(',')?;
        }
        let id = input.expect_id()?;
        let assoc = if input.is_at("left") {
            Some(Associativity::Left)
        } else if input.is_at("right") {
            Some(Associativity::Right)
        } else if input.is_at("cut") {
            Some(Associativity::Cut)
        } else {
            None
        };
        if assoc.is_some() {
            input.next()?;
        }
        items.push(PrecItem { id, assoc });
    }
    input.next()?;
    Ok(PrecDeclaration { start, items })
}

fn parse_token_names(input: &mut Input) -> Result<Vec<Expression>> {
    input.expect_punct('{')?;
    let mut items = vec![];
    while !input.is_punct('}') {
        if !items.is_empty() {
            input.expect_punct(',')?;
        }
        let start = input.start;
        match input.token.clone() {
            Token::Str(value) => {
                input.next()?;
                items.push(Expression::Literal { start, value });
            }
            Token::Id(_) => {
                let id = input.expect_id()?;
                let args = parse_args(input)?;
                items.push(Expression::Name(NameExpression { start, id, args }));
            }
            _ => return input.unexpected(),
        }
    }
    input.next()?;
    Ok(items)
}

fn parse_tokens(input: &mut Input, start: usize) -> Result<TokenDeclaration> {
    input.expect_punct('{')?;
    let mut decl = TokenDeclaration {
        start,
        ..Default::default()
    };
    while !input.is_punct('}') {
        let item_start = input.start;
        if input.is_at("precedence") {
            input.next()?;
            let items = parse_token_names(input)?;
            decl.precedences.push(TokenPrecDeclaration {
                start: item_start,
                items,
            });
        } else if input.is_at("conflict") {
            input.next()?;
            let mut items = parse_token_names(input)?;
            if items.len() != 2 {
                return input.raise("@conflict takes exactly two tokens", item_start);
            }
            let b = items.pop();
            let a = items.pop();
            if let (Some(a), Some(b)) = (a, b) {
                decl.conflicts.push(TokenConflictDeclaration {
                    start: item_start,
                    a,
                    b,
                });
            }
        } else if let Token::Str(literal) = input.token.clone() {
            input.next()?;
            let props = parse_props(input)?;
            decl.literals.push(LiteralDeclaration {
                start: item_start,
                literal,
                props,
            });
        } else {
            decl.rules.push(parse_rule(input, None)?);
        }
    }
    input.next()?;
    Ok(decl)
}

fn parse_external_tokens(input: &mut Input) -> Result<Vec<ExternalToken>> {
    input.expect_punct('{')?;
    let mut tokens = vec![];
    while !input.is_punct('}') {
        if !tokens.is_empty() {
            input.expect_punct(',')?;
        }
        let id = input.expect_id()?;
        let props = parse_props(input)?;
        tokens.push(ExternalToken { id, props });
    }
    input.next()?;
    Ok(tokens)
}

fn parse_external(input: &mut Input, grammar: &mut GrammarDeclaration, start: usize) -> Result<()> {
    let kind = input.expect_id()?;
    match kind.name.as_str() {
        "tokens" => {
            let id = input.expect_id()?;
            input.expect_keyword("from")?;
            let source = input.expect_string()?;
            let tokens = parse_external_tokens(input)?;
            grammar.external_tokens.push(ExternalTokenDeclaration {
                start,
                id,
                source,
                tokens,
            });
        }
        "prop" => {
            let external_id = input.expect_id()?;
            let id = if input.is_id("as") {
                input.next()?;
                input.expect_id()?
            } else {
                external_id.clone()
            };
            input.expect_keyword("from")?;
            let source = input.expect_string()?;
            grammar.external_props.push(ExternalPropDeclaration {
                start,
                id,
                external_id,
                source,
            });
        }
        "propSource" => {
            let id = input.expect_id()?;
            input.expect_keyword("from")?;
            let source = input.expect_string()?;
            grammar
                .external_prop_sources
                .push(ExternalPropSourceDeclaration { start, id, source });
        }
        "extend" | "specialize" => {
            let spec_kind = if kind.name == "extend" {
                SpecializeKind::Extend
            } else {
                SpecializeKind::Specialize
            };
            input.expect_punct('{')?;
            let token = parse_expr_choice(input)?;
            input.expect_punct('}')?;
            let id = input.expect_id()?;
            input.expect_keyword("from")?;
            let source = input.expect_string()?;
            let tokens = parse_external_tokens(input)?;
            grammar
                .external_specializers
                .push(ExternalSpecializeDeclaration {
                    start,
                    kind: spec_kind,
                    token,
                    id,
                    source,
                    tokens,
                });
        }
        _ => {
            return input.raise(
                format!("Unrecognized external declaration '{}'", kind.name),
                kind.start,
            )
        }
    }
    Ok(())
}

#[test]
fn parse_rules_and_tops() {
    let grammar = parse_grammar(
        r#"
            @top Program { item* }
            item { Word | "(" item ")" }
            @tokens { Word { $[a-z]+ } "(" ")" }
        "#,
        "test",
    )
    .unwrap();
    assert_eq!(grammar.top_rules.len(), 1);
    assert_eq!(grammar.top_rules[0].id.name, "Program");
    assert_eq!(grammar.rules.len(), 1);
    let tokens = grammar.tokens.unwrap();
    assert_eq!(tokens.rules.len(), 1);
    assert_eq!(tokens.literals.len(), 2);
    assert_eq!(grammar.rules[0].expr.to_string(), "Word | \"(\" item \")\"");
}

#[test]
fn parse_markers_and_precedence() {
    let grammar = parse_grammar(
        r#"
            @precedence { times @left, plus @left, cutit @cut }
            @top T { e }
            e { e !plus "+" e | e ~amb "*" e | "x" }
        "#,
        "test",
    )
    .unwrap();
    let precs = grammar.precedences.unwrap();
    assert_eq!(precs.items.len(), 3);
    assert_eq!(precs.items[0].assoc, Some(Associativity::Left));
    assert_eq!(precs.items[2].assoc, Some(Associativity::Cut));
    match &grammar.rules[0].expr {
        Expression::Choice { exprs, .. } => match &exprs[0] {
            Expression::Sequence { markers, exprs, .. } => {
                assert_eq!(exprs.len(), 3);
                assert_eq!(markers[1].len(), 1);
                assert_eq!(markers[1][0].kind, ConflictMarkerKind::Prec);
            }
            other => panic!("unexpected {:?}", other),
        },
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn parse_props_params_and_specialize() {
    let grammar = parse_grammar(
        r#"
            kw<term> { @specialize[@name={term}]<identifier, term> }
            List[closedBy="]",group=Expr.Thing] { "[" "]" }
            @skip { space } { @top Inner { kw<"if"> } }
            @external tokens ext from "./tokens" { Foo, Bar[@name=B] }
            @external prop myProp as mine from "./props"
            @dialects { ts, jsx }
            @detectDelim
        "#,
        "test",
    )
    .unwrap();
    assert_eq!(grammar.rules[0].params.len(), 1);
    assert_eq!(grammar.rules[1].props.len(), 2);
    assert_eq!(grammar.rules[1].props[1].value.len(), 3);
    assert_eq!(grammar.scoped_skip.len(), 1);
    assert_eq!(grammar.scoped_skip[0].top_rules.len(), 1);
    assert_eq!(grammar.external_tokens[0].tokens.len(), 2);
    assert_eq!(grammar.external_props[0].id.name, "mine");
    assert_eq!(grammar.dialects.len(), 2);
    assert!(grammar.auto_delim);
}

#[test]
fn parse_sets_and_escapes() {
    let grammar = parse_grammar(r#"@top T { "a\n\u{1F600}" } x { $[a-c\]] ![x] }"#, "t").unwrap();
    match &grammar.top_rules[0].expr {
        Expression::Literal { value, .. } => assert_eq!(value, "a\n\u{1F600}"),
        other => panic!("unexpected {:?}", other),
    }
    match &grammar.rules[0].expr {
        Expression::Sequence { exprs, .. } => match &exprs[0] {
            Expression::Set { ranges, inverted, .. } => {
                assert!(!inverted);
                assert_eq!(ranges, &vec![(93, 94), (97, 100)]);
            }
            other => panic!("unexpected {:?}", other),
        },
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn syntax_errors_have_positions() {
    match parse_grammar("@top T {\n  \"abc\n}", "g.grammar") {
        Err(GenError::Syntax { line, file, .. }) => {
            assert_eq!(line, 2);
            assert_eq!(file, "g.grammar");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(parse_grammar("@top T { a | }}", "g").is_err());
}

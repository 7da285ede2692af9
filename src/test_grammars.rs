//! Grammar fixtures, and a recognizer that runs the encoded tables the way the runtime does
//! (without error recovery or GLR splitting), producing a bracketed tree.

use crate::builder::Builder;
use crate::first::generate_first_table;
use crate::grammar::Grammar;
use crate::item::PosArena;
use crate::lr1::build_full_automaton;
use crate::lr_common::LrState;
use crate::parse_table::*;
use crate::{build_parser, BuildOptions};

use fxhash::FxHashSet;

pub const REPEAT: &str = "@top P { S+ } S { \"a\" }";

pub const AMBIGUOUS_SUM: &str = "@top P { E } E { E \"+\" E | \"x\" }";

pub const LEFT_SUM: &str = "
@precedence { left @left }
@top P { E }
E { E !left \"+\" E | \"x\" }";

pub const ARITH: &str = "
@precedence { times @left, plus @left }
@top Program { expr }
expr { Number | BinaryExpression | \"(\" expr \")\" }
BinaryExpression { expr !times \"*\" expr | expr !plus \"+\" expr }
@tokens {
  Number { @digit+ }
  space { $[ \\t\\n]+ }
}
@skip { space }";

pub const LIST: &str = "
@top Document { List }
List { \"[\" (Item (\",\" Item)*)? \"]\" }
Item { Word | List }
@tokens {
  Word { @asciiLetter+ }
}";

pub const KEYWORDS: &str = "
@top Program { statement* }
statement { kw<\"if\"> Identifier | Identifier }
kw<word> { @specialize[@name={word}]<Identifier, word> }
@tokens {
  Identifier { @asciiLetter+ }
  space { \" \"+ }
}
@skip { space }";

pub const COMMENTS: &str = "
@top Program { Word* }
@skip { space | Comment }
@skip {} {
  Comment { \"/*\" commentContent* \"*/\" }
}
@tokens {
  Word { @asciiLetter+ }
  space { \" \"+ }
  commentContent { ![*/]+ }
}";

pub const DIALECTS: &str = "
@dialects { extra }
@top Program { (Word | Extra)* }
@tokens {
  Word { @asciiLowercase+ }
  Extra[@dialect=extra] { \"!\" }
  space { \" \"+ }
}
@skip { space }";

/// LR(1) but not LALR(1): merging the states after `"a" "e"` and `"b" "e"` would create a
/// reduce/reduce conflict
pub const LR1_ONLY: &str = "
@top S { \"a\" E \"c\" | \"a\" F \"d\" | \"b\" F \"c\" | \"b\" E \"d\" }
E { \"e\" }
F { \"e\" }";

pub struct Automaton {
    pub grammar: Grammar,
    pub arena: PosArena,
    pub full: Vec<LrState>,
}

/// The full LR(1) automaton for a grammar's top rules, without simplification
pub fn automaton(text: &str) -> Automaton {
    let options = BuildOptions::default();
    let builder = Builder::new(text, &options).unwrap();
    let no_skip = builder.no_skip;
    let mut terms = builder.terms;
    let rules = builder.rules;
    terms.finish(&rules).unwrap();
    let grammar = Grammar::new(terms, rules);
    let first = generate_first_table(&grammar);
    let mut arena = PosArena::new();
    let tops = grammar.terms.tops.clone();
    let full = build_full_automaton(&grammar, &first, &mut arena, &tops, no_skip).unwrap();
    Automaton { grammar, arena, full }
}

pub fn tables(text: &str) -> ParserTables {
    build_parser(text, &BuildOptions::default()).unwrap()
}

fn pair(data: &[u16], i: usize) -> u32 {
    u32::from(data[i]) | (u32::from(data[i + 1]) << 16)
}

struct Frame {
    state: usize,
    children: Vec<String>,
}

pub struct Recognizer<'a> {
    tables: &'a ParserTables,
    input: Vec<u16>,
    disallowed: FxHashSet<u32>,
}

impl<'a> Recognizer<'a> {
    pub fn new(tables: &'a ParserTables, input: &str) -> Recognizer<'a> {
        Recognizer::with_dialects(tables, input, &[])
    }

    pub fn with_dialects(tables: &'a ParserTables, input: &str, dialects: &[&str]) -> Recognizer<'a> {
        let mut disallowed: FxHashSet<u32> = Default::default();
        for (name, offset) in &tables.dialects {
            if dialects.contains(&name.as_str()) {
                continue;
            }
            let mut i = *offset as usize;
            while u32::from(tables.state_data[i]) != SEQ_END {
                disallowed.insert(u32::from(tables.state_data[i]));
                i += 1;
            }
        }
        Recognizer {
            tables,
            input: input.encode_utf16().collect(),
            disallowed,
        }
    }

    fn find_action(&self, state: usize, term: u32) -> Option<u32> {
        let data = &self.tables.state_data;
        for slot in [STATE_ACTIONS, STATE_SKIP] {
            let mut i = self.tables.state_slot(state, slot) as usize;
            loop {
                if u32::from(data[i]) == SEQ_END {
                    match u32::from(data[i + 1]) {
                        SEQ_NEXT => {
                            i = pair(data, i + 2) as usize;
                            continue;
                        }
                        SEQ_OTHER => return Some(pair(data, i + 2)),
                        _ => break,
                    }
                }
                if u32::from(data[i]) == term {
                    return Some(pair(data, i + 1));
                }
                i += 3;
            }
        }
        None
    }

    fn goto(&self, state: usize, term: u32) -> Option<usize> {
        let table = &self.tables.goto;
        if term >= u32::from(table[0]) {
            return None;
        }
        let mut pos = table[term as usize + 1] as usize;
        loop {
            let tag = table[pos];
            let target = table[pos + 1] as usize;
            let last = tag & 1 == 1;
            let count = (tag >> 1) as usize;
            if last {
                return Some(target);
            }
            if table[pos + 2..pos + 2 + count].contains(&(state as u16)) {
                return Some(target);
            }
            pos += 2 + count;
        }
    }

    fn prec_offset(&self, term: u32) -> Option<usize> {
        let data = &self.tables.state_data;
        let start = self.tables.token_prec as usize;
        (start..)
            .take_while(|i| u32::from(data[*i]) != SEQ_END)
            .position(|i| u32::from(data[i]) == term)
    }

    fn overrides(&self, token: u32, prev: u32) -> bool {
        match self.prec_offset(prev) {
            None => true,
            Some(prev) => self.prec_offset(token).map_or(true, |t| t < prev),
        }
    }

    fn read_token(&self, group: u32, pos: usize) -> Option<(u32, usize)> {
        let data = &self.tables.token_data;
        let mask = 1u32 << group;
        let mut state = 0;
        let mut at = pos;
        let mut result: Option<(u32, usize)> = None;
        loop {
            if u32::from(data[state]) & mask == 0 {
                break;
            }
            let accept_end = data[state + 1] as usize;
            let mut i = state + 3;
            while i < accept_end {
                let term = u32::from(data[i]);
                if u32::from(data[i + 1]) & mask != 0
                    && !self.disallowed.contains(&term)
                    && result.map_or(true, |(prev, _)| prev == term || self.overrides(term, prev))
                {
                    result = Some((term, at));
                    break;
                }
                i += 2;
            }
            if at >= self.input.len() {
                break;
            }
            let next = u32::from(self.input[at]);
            let edges = data[state + 2] as usize;
            let found = (0..edges).map(|e| accept_end + e * 3).find(|e| {
                let to = match data[*e + 1] {
                    0 => 0x10000,
                    to => u32::from(to),
                };
                u32::from(data[*e]) <= next && next < to
            });
            match found {
                Some(edge) => {
                    state = data[edge + 2] as usize;
                    at += 1;
                }
                None => break,
            }
        }
        result
    }

    fn specialize(&self, state: usize, term: u32, pos: usize, end: usize) -> u32 {
        let text = String::from_utf16_lossy(&self.input[pos..end]);
        for spec in &self.tables.specialized {
            if let Specializer::Table { term: base, values, .. } = spec {
                if *base != term {
                    continue;
                }
                if let Some((_, code)) = values.iter().find(|(v, _)| *v == text) {
                    let special = code >> 1;
                    if code & 1 == 0 || self.find_action(state, special).is_some() {
                        return special;
                    }
                }
            }
        }
        term
    }

    /// The next token and its end, `None` when nothing matches
    fn next_token(&self, state: usize, pos: usize) -> Option<(u32, usize)> {
        let mask = self.tables.state_slot(state, STATE_TOKENIZER_MASK);
        let mut main = None;
        for (i, tokenizer) in self.tables.tokenizers.iter().enumerate() {
            if mask & (1 << i) == 0 {
                continue;
            }
            if let Tokenizer::Group(group) = tokenizer {
                if let Some((term, end)) = self.read_token(*group, pos) {
                    let term = self.specialize(state, term, pos, end);
                    if self.find_action(state, term).is_some() {
                        return Some((term, end));
                    }
                    main.get_or_insert((term, end));
                }
            }
        }
        if main.is_none() && pos == self.input.len() {
            return Some((self.tables.eof_term(), pos));
        }
        main
    }

    fn node(&self, term: u32, children: Vec<String>) -> Vec<String> {
        match self.tables.node_names.get(term as usize) {
            Some(name) if !name.is_empty() => {
                if children.is_empty() {
                    vec![name.clone()]
                } else {
                    vec![format!("{}({})", name, children.join(","))]
                }
            }
            _ => children,
        }
    }

    /// The tree for the input, or `None` when it is rejected
    pub fn parse(&self) -> Option<String> {
        let start = self.tables.top_rules.first()?;
        let mut stack = vec![Frame {
            state: start.1 as usize,
            children: vec![],
        }];
        let mut pos = 0;
        // Guards against tables that loop
        for _ in 0..10_000 {
            let state = stack.last()?.state;
            let default_reduce = self.tables.state_slot(state, STATE_DEFAULT_REDUCE);
            let (action, term, end) = if default_reduce != 0 {
                (default_reduce, 0, pos)
            } else {
                let (term, end) = self.next_token(state, pos)?;
                match self.find_action(state, term) {
                    Some(action) => (action, term, end),
                    None => {
                        let accepting = self.tables.state_slot(state, STATE_FLAGS) & STATE_ACCEPTING != 0;
                        if term == self.tables.eof_term() && accepting {
                            let children: Vec<String> = stack.into_iter().flat_map(|f| f.children).collect();
                            return Some(format!("{}({})", start.0, children.join(",")));
                        }
                        return None;
                    }
                }
            };

            if action & REDUCE_FLAG != 0 {
                let reduced = action & VALUE_MASK;
                let depth = (action >> REDUCE_DEPTH_SHIFT) as usize;
                let mut children = vec![];
                for frame in stack.drain(stack.len() - depth..) {
                    children.extend(frame.children);
                }
                if action & STAY_FLAG != 0 {
                    // Leave the skip rule, dropping its content
                    stack.pop();
                    continue;
                }
                let base = stack.last()?.state;
                let target = self.goto(base, reduced)?;
                stack.push(Frame {
                    state: target,
                    children: self.node(reduced, children),
                });
            } else if action & GOTO_FLAG != 0 {
                stack.push(Frame {
                    state: (action & VALUE_MASK) as usize,
                    children: vec![],
                });
            } else if action & STAY_FLAG != 0 {
                pos = end;
            } else {
                stack.push(Frame {
                    state: (action & VALUE_MASK) as usize,
                    children: self.node(term, vec![]),
                });
                pos = end;
            }
        }
        None
    }

    pub fn accepts(&self) -> bool {
        self.parse().is_some()
    }
}

pub fn parse(tables: &ParserTables, input: &str) -> Option<String> {
    Recognizer::new(tables, input).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenError;

    #[test]
    fn repeat_grammar() {
        let tables = tables(REPEAT);
        assert_eq!(tables.state_count(), 5);
        assert_eq!(parse(&tables, "a").as_deref(), Some("P(S)"));
        assert_eq!(parse(&tables, "aa").as_deref(), Some("P(S,S)"));
        assert_eq!(parse(&tables, "aaaa").as_deref(), Some("P(S,S,S,S)"));
        assert_eq!(parse(&tables, ""), None);
        assert_eq!(parse(&tables, "b"), None);
        assert_eq!(parse(&tables, "ab"), None);
    }

    #[test]
    fn ambiguous_sum_is_a_conflict() {
        match build_parser(AMBIGUOUS_SUM, &BuildOptions::default()) {
            Err(GenError::Conflicts(conflicts)) => {
                assert!(!conflicts.is_empty());
                assert!(conflicts[0].contains("shift/reduce"), "{}", conflicts[0]);
                assert!(conflicts[0].contains("E"), "{}", conflicts[0]);
            }
            other => panic!("expected conflicts, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn left_associative_sum() {
        let tables = tables(LEFT_SUM);
        assert_eq!(parse(&tables, "x").as_deref(), Some("P(E)"));
        assert_eq!(parse(&tables, "x+x+x").as_deref(), Some("P(E(E(E,E),E))"));
        assert_eq!(parse(&tables, "x+"), None);
    }

    #[test]
    fn arithmetic_precedence() {
        let tables = tables(ARITH);
        assert_eq!(
            parse(&tables, "1 + 2 * 3").as_deref(),
            Some("Program(BinaryExpression(Number,BinaryExpression(Number,Number)))")
        );
        assert_eq!(
            parse(&tables, "1 * 2 + 3").as_deref(),
            Some("Program(BinaryExpression(BinaryExpression(Number,Number),Number))")
        );
        assert_eq!(
            parse(&tables, " (1 + 2) * 3 ").as_deref(),
            Some("Program(BinaryExpression(BinaryExpression(Number,Number),Number))")
        );
        assert_eq!(parse(&tables, "1 +"), None);
        assert_eq!(parse(&tables, "(1"), None);
    }

    #[test]
    fn nested_lists() {
        let tables = tables(LIST);
        assert_eq!(parse(&tables, "[]").as_deref(), Some("Document(List)"));
        assert_eq!(
            parse(&tables, "[a,[b,c],[]]").as_deref(),
            Some("Document(List(Item(Word),Item(List(Item(Word),Item(Word))),Item(List)))")
        );
        assert_eq!(parse(&tables, "[a,]"), None);
        assert_eq!(parse(&tables, "[a b]"), None);
    }

    #[test]
    fn specialized_keywords() {
        let tables = tables(KEYWORDS);
        assert_eq!(
            parse(&tables, "if x y").as_deref(),
            Some("Program(if,Identifier,Identifier)")
        );
        assert_eq!(parse(&tables, "iff").as_deref(), Some("Program(Identifier)"));
        assert_eq!(parse(&tables, "x if"), None);
    }

    #[test]
    fn skip_rules_with_states() {
        let tables = tables(COMMENTS);
        assert_eq!(parse(&tables, "a b").as_deref(), Some("Program(Word,Word)"));
        assert_eq!(parse(&tables, "a /* x y */ b").as_deref(), Some("Program(Word,Word)"));
        assert_eq!(parse(&tables, "/**/a").as_deref(), Some("Program(Word)"));
        assert_eq!(parse(&tables, "a /* b"), None);
        assert!(tables.skipped_nodes.contains(&tables.terms["Comment"]));
    }

    #[test]
    fn any_char_matches_the_last_bmp_unit() {
        let any = tables("@top Program { Char* } @tokens { Char { _ } }");
        assert_eq!(parse(&any, "a\u{ffff}").as_deref(), Some("Program(Char,Char)"));
        let not_a = tables("@top Program { Char* } @tokens { Char { ![a] } }");
        assert_eq!(parse(&not_a, "\u{ffff}").as_deref(), Some("Program(Char)"));
        assert_eq!(parse(&not_a, "a"), None);
    }

    #[test]
    fn dialect_tokens() {
        let tables = tables(DIALECTS);
        assert_eq!(tables.dialects.len(), 1);
        assert_eq!(parse(&tables, "a b").as_deref(), Some("Program(Word,Word)"));
        assert_eq!(parse(&tables, "a !"), None);
        assert_eq!(
            Recognizer::with_dialects(&tables, "a !", &["extra"]).parse().as_deref(),
            Some("Program(Word,Extra)")
        );
    }
}

use lrgen::encode::{decode_array, encode, encode_array};
use lrgen::parse_table::DataBuilder;
use lrgen::{build_parser, build_parser_file, BuildOptions, GenError, ModuleStyle, Tokenizer};

use proptest::prelude::*;

use std::cell::RefCell;
use std::rc::Rc;

const ARITH: &str = r#"
@precedence { times @left, plus @left }
@top Program { expr }
expr { Number | BinaryExpression | "(" expr ")" }
BinaryExpression { expr !times "*" expr | expr !plus "+" expr }
@tokens {
  Number { @digit+ }
  space { $[ \t\n]+ }
}
@skip { space }
"#;

#[test]
fn repeat_grammar_compiles() {
    let tables = build_parser(r#"@top P { S+ } S { "a" }"#, &BuildOptions::default()).unwrap();
    assert_eq!(tables.top_rules.len(), 1);
    assert_eq!(tables.top_rules[0].0, "P");
    assert_eq!(tables.node_names[0], "⚠");
    assert!(tables.node_names.iter().any(|n| n == "S"));
    assert_eq!(tables.repeat_node_count, 1);
    assert_eq!(tables.tokenizers, vec![Tokenizer::Group(0)]);
}

#[test]
fn unresolved_ambiguity() {
    match build_parser(r#"@top P { E } E { E "+" E | "x" }"#, &BuildOptions::default()) {
        Err(GenError::Conflicts(conflicts)) => {
            assert!(conflicts.iter().any(|c| c.contains("shift/reduce") && c.contains("E -> E \"+\" E")));
        }
        other => panic!("expected conflicts, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn precedence_resolves_ambiguity() {
    let grammar = r#"
      @precedence { left @left }
      @top P { E }
      E { E !left "+" E | "x" }"#;
    assert!(build_parser(grammar, &BuildOptions::default()).is_ok());
}

#[test]
fn zero_length_token() {
    match build_parser("@top P { T } @tokens { T { \"a\"* } }", &BuildOptions::default()) {
        Err(GenError::Grammar(msg)) => assert!(msg.contains("zero-length tokens (in 'T')"), "{}", msg),
        other => panic!("expected an error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn syntax_errors_have_positions() {
    let options = BuildOptions {
        file_name: "test.grammar".to_owned(),
        ..Default::default()
    };
    match build_parser("@top P { \"x\" }\n@top Q {", &options) {
        Err(GenError::Syntax { file, line, .. }) => {
            assert_eq!(file, "test.grammar");
            assert_eq!(line, 2);
        }
        other => panic!("expected a syntax error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn undefined_rule() {
    let err = build_parser("@top P { Missing }", &BuildOptions::default()).unwrap_err();
    assert!(matches!(err, GenError::Grammar(_)));
    assert!(err.to_string().contains("Missing"));
}

#[test]
fn warnings_go_to_the_sink() {
    let warnings = Rc::new(RefCell::new(vec![]));
    let sink = warnings.clone();
    let options = BuildOptions {
        warn: Some(Box::new(move |msg: &str| sink.borrow_mut().push(msg.to_owned()))),
        ..Default::default()
    };
    build_parser("@top P { \"x\" } Unused { \"y\" }", &options).unwrap();
    let warnings = warnings.borrow();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("Unused rule 'Unused'"));
}

#[test]
fn builds_are_deterministic() {
    let options = BuildOptions::default();
    let a = build_parser_file(ARITH, &options).unwrap();
    let b = build_parser_file(ARITH, &options).unwrap();
    assert_eq!(a, b);
}

#[test]
fn es_module_output() {
    let files = build_parser_file(ARITH, &BuildOptions::default()).unwrap();
    let parser = &files.parser;
    assert!(parser.starts_with("// This file was generated by lrgen."));
    assert!(parser.contains("import {LRParser} from \"@lezer/lr\"\n"));
    assert!(parser.contains("export const parser = LRParser.deserialize({\n"));
    assert!(parser.contains("  version: 14,\n"));
    assert!(parser.contains("  nodeNames: \"⚠ "));
    assert!(parser.contains("  topRules: {\"Program\":[0,"));
    assert!(!parser.contains("termNames"));

    assert!(files.terms.starts_with("// This file was generated by lrgen."));
    assert!(files.terms.contains("export const\n"));
    assert!(files.terms.contains("  Program = "));
    assert!(files.terms.contains("  BinaryExpression = "));
    assert!(files.terms.contains("  Number = "));
}

#[test]
fn commonjs_output() {
    let options = BuildOptions {
        module_style: ModuleStyle::Cjs,
        export_name: "arith".to_owned(),
        include_names: true,
        ..Default::default()
    };
    let files = build_parser_file(ARITH, &options).unwrap();
    assert!(files.parser.contains("const {LRParser} = require(\"@lezer/lr\")\n"));
    assert!(files.parser.contains("exports.arith = LRParser.deserialize({\n"));
    assert!(files.parser.contains("  termNames: {0:\"⚠\","));
    assert!(files.terms.contains("exports.Program = "));
}

#[test]
fn encoded_tables_decode_to_the_tables() {
    let tables = build_parser(ARITH, &BuildOptions::default()).unwrap();
    let files = build_parser_file(ARITH, &BuildOptions::default()).unwrap();
    let encoded = encode_array(&tables.state_data, 0xffff).unwrap();
    assert!(files.parser.contains(&format!("  stateData: {},\n", encoded)));
    let decoded = decode_array(&encoded[1..encoded.len() - 1]);
    let expected: Vec<u32> = tables.state_data.iter().map(|v| u32::from(*v)).collect();
    assert_eq!(decoded, expected);
}

#[test]
fn externals_are_imported() {
    let grammar = r#"
      @top P { Ext "x" }
      @external tokens ext from "./tokens" { Ext }
      @context tracker from "./context"
    "#;
    let files = build_parser_file(grammar, &BuildOptions::default()).unwrap();
    assert!(files.parser.contains("import {ext} from \"./tokens\"\n"));
    assert!(files.parser.contains("import {tracker} from \"./context\"\n"));
    assert!(files.parser.contains("  context: tracker,\n"));
    assert!(files.parser.contains("ext]"));

    let options = BuildOptions {
        external_tokenizer: Some(Box::new(|name, _| format!("tokenizers.{}", name))),
        ..Default::default()
    };
    let files = build_parser_file(grammar, &options).unwrap();
    assert!(!files.parser.contains("import {ext}"));
    assert!(files.parser.contains("tokenizers.ext]"));
}

#[test]
fn specialized_tokens_get_a_table() {
    let grammar = r#"
      @top P { (kw<"if"> | Identifier)* }
      kw<word> { @specialize[@name={word}]<Identifier, word> }
      @tokens { Identifier { @asciiLetter+ } }
    "#;
    let files = build_parser_file(grammar, &BuildOptions::default()).unwrap();
    assert!(files.parser.contains("const spec_Identifier = {__proto__:null,if:"));
    assert!(files.parser.contains("get: (value) => spec_Identifier[value] || -1}"));
}

#[test]
fn too_big_to_encode() {
    assert!(matches!(encode(0x10000, 0xffff), Err(GenError::Capacity(_))));
}

proptest! {
    #[test]
    fn encoding_round_trips(values in prop::collection::vec(0u32..=0xffff, 0..200)) {
        let encoded = encode_array(&values, 0xffff).unwrap();
        prop_assert!(!encoded[1..encoded.len() - 1].contains('"'));
        prop_assert!(!encoded.contains('\\'));
        prop_assert_eq!(decode_array(&encoded[1..encoded.len() - 1]), values);
    }

    #[test]
    fn stored_arrays_are_interned(arrays in prop::collection::vec(prop::collection::vec(0u32..20, 1..6), 1..20)) {
        let mut data = DataBuilder::new();
        let mut offsets: Vec<usize> = arrays.iter().map(|a| data.store_array(a)).collect();
        let size = data.len();
        // Storing again finds an occurrence (maybe an earlier, overlapping one) without growing
        for (array, offset) in arrays.iter().zip(offsets.iter_mut()) {
            let again = data.store_array(array);
            prop_assert!(again <= *offset);
            *offset = again;
        }
        prop_assert_eq!(data.len(), size);
        let table = data.finish().unwrap();
        for (array, offset) in arrays.iter().zip(&offsets) {
            let stored: Vec<u32> = table[*offset..*offset + array.len()].iter().map(|v| u32::from(*v)).collect();
            prop_assert_eq!(&stored, array);
        }
    }
}

//! Renders `ParserTables` as JavaScript modules: the parser itself, and a module with a
//! constant per named term.

use crate::encode::encode_array;
use crate::error::Result;
use crate::parse_table::{ExternalRef, ParserTables, Specializer, Tokenizer};
use crate::{BuildOptions, ExternalHook, ModuleStyle};

use std::fmt::Write;

const HEADER: &str = "// This file was generated by lrgen. You probably shouldn't edit it.\n";

const FILE_VERSION: u32 = 14;

/// Names imported from other modules, grouped by source
#[derive(Default)]
struct Imports {
    sources: Vec<(String, Vec<String>)>,
}

impl Imports {
    /// The expression used for `external` in the generated code. Without a hook the name
    /// is imported from its source.
    fn reference(&mut self, external: &ExternalRef, hook: &Option<ExternalHook>) -> String {
        if let Some(hook) = hook {
            return hook(&external.name, &external.source);
        }
        self.add(&external.name, &external.source);
        external.name.clone()
    }

    fn add(&mut self, name: &str, source: &str) {
        let names = match self.sources.iter().position(|(s, _)| s == source) {
            Some(i) => &mut self.sources[i].1,
            None => {
                self.sources.push((source.to_owned(), vec![]));
                let last = self.sources.len() - 1;
                &mut self.sources[last].1
            }
        };
        if !names.iter().any(|n| n == name) {
            names.push(name.to_owned());
        }
    }

    fn render(&self, style: ModuleStyle, out: &mut String) {
        for (source, names) in &self.sources {
            let names = names.join(", ");
            let source = js_string(source);
            let line = match style {
                ModuleStyle::Es => format!("import {{{}}} from {}", names, source),
                ModuleStyle::Cjs => format!("const {{{}}} = require({})", names, source),
            };
            out.push_str(&line);
            out.push('\n');
        }
    }
}

/// A double-quoted JavaScript string literal
pub(crate) fn js_string(value: &str) -> String {
    let mut result = String::with_capacity(value.len() + 2);
    result.push('"');
    for c in value.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\u{2028}' | '\u{2029}' => write!(result, "\\u{:04x}", c as u32).unwrap_or(()),
            c if (c as u32) < 0x20 => write!(result, "\\u{:04x}", c as u32).unwrap_or(()),
            c => result.push(c),
        }
    }
    result.push('"');
    result
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// An object key, quoted when it isn't a plain identifier
fn js_key(name: &str) -> String {
    if is_identifier(name) {
        name.to_owned()
    } else {
        js_string(name)
    }
}

fn spec_table_name(name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("spec_{}", clean)
}

pub(crate) fn parser_module(tables: &ParserTables, options: &BuildOptions) -> Result<String> {
    let mut imports = Imports::default();
    imports.add("LRParser", "@lezer/lr");

    let mut fields: Vec<(&str, String)> = vec![
        ("version", FILE_VERSION.to_string()),
        ("states", encode_array(&tables.states, u32::MAX)?),
        ("stateData", encode_array(&tables.state_data, 0xffff)?),
        ("goto", encode_array(&tables.goto, 0xffff)?),
        ("nodeNames", js_string(&tables.node_names.join(" "))),
        ("maxTerm", tables.max_term.to_string()),
    ];

    if let Some(context) = &tables.context {
        fields.push(("context", imports.reference(context, &options.context_tracker)));
    }

    if !tables.node_props.is_empty() {
        let mut props = vec![];
        for table in &tables.node_props {
            let prop = match &table.prop.source {
                None => js_string(&table.prop.name),
                Some(source) => imports.reference(
                    &ExternalRef {
                        name: table.prop.name.clone(),
                        source: source.clone(),
                    },
                    &options.external_prop,
                ),
            };
            let mut entry = vec![prop];
            for (value, ids) in &table.values {
                if ids.len() > 1 {
                    entry.push(format!("-{}", ids.len()));
                }
                entry.extend(ids.iter().map(|id| id.to_string()));
                entry.push(js_string(value));
            }
            props.push(format!("[{}]", entry.join(",")));
        }
        fields.push(("nodeProps", format!("[\n    {}\n  ]", props.join(",\n    "))));
    }

    if !tables.prop_sources.is_empty() {
        let sources: Vec<String> = tables
            .prop_sources
            .iter()
            .map(|s| imports.reference(s, &options.external_prop_source))
            .collect();
        fields.push(("propSources", format!("[{}]", sources.join(","))));
    }

    if !tables.skipped_nodes.is_empty() {
        let ids: Vec<String> = tables.skipped_nodes.iter().map(|id| id.to_string()).collect();
        fields.push(("skippedNodes", format!("[{}]", ids.join(","))));
    }

    fields.push(("repeatNodeCount", tables.repeat_node_count.to_string()));
    fields.push(("tokenData", encode_array(&tables.token_data, 0xffff)?));

    let tokenizers: Vec<String> = tables
        .tokenizers
        .iter()
        .map(|t| match t {
            Tokenizer::Group(id) => id.to_string(),
            Tokenizer::External(ext) => imports.reference(ext, &options.external_tokenizer),
        })
        .collect();
    fields.push(("tokenizers", format!("[{}]", tokenizers.join(", "))));

    let top_rules: Vec<String> = tables
        .top_rules
        .iter()
        .map(|(name, state, id)| format!("{}:[{},{}]", js_string(name), state, id))
        .collect();
    fields.push(("topRules", format!("{{{}}}", top_rules.join(","))));

    if !tables.dialects.is_empty() {
        let dialects: Vec<String> = tables
            .dialects
            .iter()
            .map(|(name, offset)| format!("{}:{}", js_key(name), offset))
            .collect();
        fields.push(("dialects", format!("{{{}}}", dialects.join(", "))));
    }

    if !tables.dynamic_precedences.is_empty() {
        let precs: Vec<String> = tables
            .dynamic_precedences
            .iter()
            .map(|(id, prec)| format!("\"{}\":{}", id, prec))
            .collect();
        fields.push(("dynamicPrecedences", format!("{{{}}}", precs.join(","))));
    }

    // Specialization tables are declared as constants before the parser
    let mut spec_tables = vec![];
    if !tables.specialized.is_empty() {
        let mut specs = vec![];
        for spec in &tables.specialized {
            match spec {
                Specializer::Table { term, name, values } => {
                    let table_name = spec_table_name(name);
                    let entries: Vec<String> = values
                        .iter()
                        .map(|(value, code)| format!("{}:{}", js_key(value), code))
                        .collect();
                    spec_tables.push(format!(
                        "const {} = {{__proto__:null,{}}}",
                        table_name,
                        entries.join(", ")
                    ));
                    specs.push(format!(
                        "{{term: {}, get: (value) => {}[value] || -1}}",
                        term, table_name
                    ));
                }
                Specializer::External { term, external, extend } => {
                    let ext = imports.reference(external, &options.external_specializer);
                    let flag = if *extend { 1 } else { 0 };
                    let extend_field = if *extend { ", extend: true" } else { "" };
                    specs.push(format!(
                        "{{term: {}, get: (value, stack) => ({}(value, stack) << 1) | {}, external: {}{}}}",
                        term, ext, flag, ext, extend_field
                    ));
                }
            }
        }
        fields.push(("specialized", format!("[{}]", specs.join(","))));
    }

    fields.push(("tokenPrec", tables.token_prec.to_string()));

    if let Some(names) = &tables.term_names {
        let entries: Vec<String> = names
            .iter()
            .map(|(id, name)| format!("{}:{}", id, js_string(name)))
            .collect();
        fields.push(("termNames", format!("{{{}}}", entries.join(","))));
    }

    let mut out = String::from(HEADER);
    imports.render(options.module_style, &mut out);
    for table in spec_tables {
        out.push_str(&table);
        out.push('\n');
    }
    let export = match options.module_style {
        ModuleStyle::Es => format!("export const {} = ", options.export_name),
        ModuleStyle::Cjs => format!("exports.{} = ", options.export_name),
    };
    out.push_str(&export);
    out.push_str("LRParser.deserialize({\n");
    let fields: Vec<String> = fields
        .into_iter()
        .map(|(name, value)| format!("  {}: {}", name, value))
        .collect();
    out.push_str(&fields.join(",\n"));
    out.push_str("\n})\n");
    Ok(out)
}

pub(crate) fn terms_module(tables: &ParserTables, options: &BuildOptions) -> String {
    let mut out = String::from(HEADER);
    let terms: Vec<(&String, &u32)> = tables.terms.iter().filter(|(name, _)| is_identifier(name)).collect();
    match options.module_style {
        ModuleStyle::Es => {
            if !terms.is_empty() {
                let entries: Vec<String> = terms.iter().map(|(name, id)| format!("  {} = {}", name, id)).collect();
                writeln!(out, "export const\n{}", entries.join(",\n")).ok();
            }
        }
        ModuleStyle::Cjs => {
            for (name, id) in terms {
                writeln!(out, "exports.{} = {}", name, id).ok();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_escapes() {
        assert_eq!(js_string("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
        assert_eq!(js_string("\u{1}"), "\"\\u0001\"");
        assert_eq!(js_string("⚠"), "\"⚠\"");
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("Expr"));
        assert!(is_identifier("_x$1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
        assert_eq!(js_key("if"), "if");
        assert_eq!(js_key("a b"), "\"a b\"");
        assert_eq!(spec_table_name("kw-name"), "spec_kw_name");
    }

    #[test]
    fn imports_are_grouped_by_source() {
        let mut imports = Imports::default();
        imports.add("LRParser", "@lezer/lr");
        let a = ExternalRef {
            name: "a".to_owned(),
            source: "./tokens".to_owned(),
        };
        let b = ExternalRef {
            name: "b".to_owned(),
            source: "./tokens".to_owned(),
        };
        assert_eq!(imports.reference(&a, &None), "a");
        assert_eq!(imports.reference(&b, &None), "b");
        assert_eq!(imports.reference(&a, &None), "a");
        let hook: Option<ExternalHook> = Some(Box::new(|name, _| format!("custom_{}", name)));
        assert_eq!(imports.reference(&b, &hook), "custom_b");

        let mut es = String::new();
        imports.render(ModuleStyle::Es, &mut es);
        assert_eq!(
            es,
            "import {LRParser} from \"@lezer/lr\"\nimport {a, b} from \"./tokens\"\n"
        );
        let mut cjs = String::new();
        imports.render(ModuleStyle::Cjs, &mut cjs);
        assert_eq!(
            cjs,
            "const {LRParser} = require(\"@lezer/lr\")\nconst {a, b} = require(\"./tokens\")\n"
        );
    }
}

//! Compiles declarative grammars into compact LR parse tables and tokenizer automata, and
//! renders them as JavaScript modules for an incremental LR parser runtime.
//!
//! ```ignore
//! let files = lrgen::build_parser_file(grammar_text, &lrgen::BuildOptions::default())?;
//! std::fs::write("parser.js", files.parser)?;
//! std::fs::write("parser.terms.js", files.terms)?;
//! ```

pub mod ast;
mod bitset;
mod builder;
mod codegen;
pub mod encode;
mod error;
mod first;
mod forced_reduce;
mod grammar;
mod item;
mod lalr1;
mod lr1;
mod lr_common;
pub mod parse;
pub mod parse_table;
mod simplify;
mod token;
mod tokens;

#[cfg(test)]
mod test_grammars;

pub use error::{GenError, Result};
pub use parse_table::{ExternalRef, NodePropTable, ParserTables, PropRef, Specializer, Tokenizer};

/// Maps a declared external name and its source to the expression used for it in
/// generated code
pub type ExternalHook = Box<dyn Fn(&str, &str) -> String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleStyle {
    #[default]
    Es,
    Cjs,
}

pub struct BuildOptions {
    /// Used in error messages
    pub file_name: String,
    pub module_style: ModuleStyle,
    /// Include term names in the output, for debugging
    pub include_names: bool,
    pub export_name: String,
    pub external_tokenizer: Option<ExternalHook>,
    pub external_prop_source: Option<ExternalHook>,
    pub external_specializer: Option<ExternalHook>,
    pub external_prop: Option<ExternalHook>,
    pub context_tracker: Option<ExternalHook>,
    /// Receives warnings. When not given warnings are logged.
    pub warn: Option<Box<dyn Fn(&str)>>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            file_name: "grammar".to_owned(),
            module_style: ModuleStyle::Es,
            include_names: false,
            export_name: "parser".to_owned(),
            external_tokenizer: None,
            external_prop_source: None,
            external_specializer: None,
            external_prop: None,
            context_tracker: None,
            warn: None,
        }
    }
}

impl std::fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOptions")
            .field("file_name", &self.file_name)
            .field("module_style", &self.module_style)
            .field("include_names", &self.include_names)
            .field("export_name", &self.export_name)
            .finish_non_exhaustive()
    }
}

/// Source text of the generated modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFiles {
    pub parser: String,
    pub terms: String,
}

pub fn build_parser(text: &str, options: &BuildOptions) -> Result<ParserTables> {
    builder::Builder::new(text, options)?.build_tables()
}

pub fn build_parser_file(text: &str, options: &BuildOptions) -> Result<GeneratedFiles> {
    let tables = build_parser(text, options)?;
    Ok(GeneratedFiles {
        parser: codegen::parser_module(&tables, options)?,
        terms: codegen::terms_module(&tables, options),
    })
}

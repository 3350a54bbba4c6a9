//! TypeScript to JavaScript transpilation.
//!
//! Snippets are parsed as TypeScript *scripts*, type syntax is stripped by the
//! TypeScript transform and the program is printed back as JavaScript. The
//! policy is lenient: only syntax (and transform) errors fail a compile, type
//! errors are never reported because no type checker runs.

use crate::config::types::{CompileResult, Diagnostic};
use log::debug;
use oxc_allocator::Allocator;
use oxc_codegen::CodeGenerator;
use oxc_diagnostics::OxcDiagnostic;
use oxc_parser::{ParseOptions, Parser, ParserReturn};
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{TransformOptions, Transformer};
use std::path::Path;

pub const DEFAULT_FILENAME: &str = "snippet.ts";

/// Front-end options shared by compile, check and format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Reported file name; also selects transform behaviour keyed on the path
    pub filename: String,
    /// Parse as TSX
    pub jsx: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            filename: DEFAULT_FILENAME.to_string(),
            jsx: false,
        }
    }
}

impl CompileOptions {
    fn source_type(&self) -> SourceType {
        let base = if self.jsx {
            SourceType::tsx()
        } else {
            SourceType::ts()
        };
        base.with_module(false)
    }
}

/// Transpile `source` to JavaScript.
pub fn compile(source: &str, options: &CompileOptions) -> CompileResult {
    let allocator = Allocator::default();
    let parsed = parse(&allocator, source, options);
    if !parsed.errors.is_empty() || parsed.panicked {
        let diagnostics = to_diagnostics(source, &parsed.errors, parsed.panicked);
        debug!(
            "{}: compile rejected with {} diagnostic(s)",
            options.filename,
            diagnostics.len()
        );
        return CompileResult::failed(diagnostics);
    }

    let mut program = parsed.program;
    let (symbols, scopes) = SemanticBuilder::new()
        .build(&program)
        .semantic
        .into_symbol_table_and_scope_tree();

    let transform_options = TransformOptions::default();
    let transformed = Transformer::new(
        &allocator,
        Path::new(&options.filename),
        &transform_options,
    )
    .build_with_symbols_and_scopes(symbols, scopes, &mut program);
    if !transformed.errors.is_empty() {
        return CompileResult::failed(to_diagnostics(source, &transformed.errors, false));
    }

    let code = CodeGenerator::new().build(&program).code;
    CompileResult::emitted(code)
}

/// Report syntax diagnostics without emitting code.
pub fn check_syntax(source: &str, options: &CompileOptions) -> CompileResult {
    let allocator = Allocator::default();
    let parsed = parse(&allocator, source, options);
    if parsed.errors.is_empty() && !parsed.panicked {
        CompileResult::clean()
    } else {
        CompileResult::failed(to_diagnostics(source, &parsed.errors, parsed.panicked))
    }
}

/// Reprint TypeScript with canonical layout, keeping type annotations.
/// Input that does not parse is returned unchanged.
pub fn format(source: &str, options: &CompileOptions) -> String {
    let allocator = Allocator::default();
    let parsed = parse(&allocator, source, options);
    if !parsed.errors.is_empty() || parsed.panicked {
        return source.to_string();
    }
    CodeGenerator::new().build(&parsed.program).code
}

/// Snippets run as function bodies, so a top-level `return` is accepted
fn parse<'a>(
    allocator: &'a Allocator,
    source: &'a str,
    options: &CompileOptions,
) -> ParserReturn<'a> {
    Parser::new(allocator, source, options.source_type())
        .with_options(ParseOptions {
            allow_return_outside_function: true,
            ..ParseOptions::default()
        })
        .parse()
}

pub fn compile_typescript(source: &str) -> CompileResult {
    compile(source, &CompileOptions::default())
}

pub fn check_typescript_syntax(source: &str) -> CompileResult {
    check_syntax(source, &CompileOptions::default())
}

pub fn format_typescript(source: &str) -> String {
    format(source, &CompileOptions::default())
}

fn to_diagnostics(source: &str, errors: &[OxcDiagnostic], panicked: bool) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = errors
        .iter()
        .map(|error| {
            let offset = error
                .labels
                .as_ref()
                .and_then(|labels| labels.first())
                .map(|label| label.offset());
            let position = offset.map(|offset| line_and_column(source, offset));
            Diagnostic {
                message: error.message.to_string(),
                line: position.map(|(line, _)| line),
                column: position.map(|(_, column)| column),
                offset: offset.map(|offset| offset as u32),
            }
        })
        .collect();

    if diagnostics.is_empty() && panicked {
        diagnostics.push(Diagnostic {
            message: "Unrecoverable syntax error".to_string(),
            line: None,
            column: None,
            offset: None,
        });
    }
    diagnostics
}

/// 1-based line and column of a byte offset; columns count characters.
fn line_and_column(source: &str, offset: usize) -> (u32, u32) {
    let mut end = offset.min(source.len());
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    let before = &source[..end];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    (line as u32, column as u32)
}

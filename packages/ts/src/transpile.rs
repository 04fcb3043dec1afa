// Transpile
//
// Stand-in single-file emit at the black-box boundary. Strips type-only
// constructs and produces deterministic JS-shaped output; the real compiler
// replaces this behind the `Program` trait without the orchestration layer
// noticing.

use crate::diagnostics::{Diagnostic, DiagnosticCategory};
use crate::options::CompilerOptions;
use crate::program::EmittedFile;

/// Transpile one module's text.
pub fn transpile_module(file_name: &str, text: &str, options: &CompilerOptions) -> EmittedFile {
    let mut output = String::with_capacity(text.len());
    let mut skip_block_depth = 0usize;

    for line in text.lines() {
        let trimmed = line.trim_start();

        if skip_block_depth > 0 {
            skip_block_depth = skip_block_depth
                .saturating_add(count_char(line, '{'))
                .saturating_sub(count_char(line, '}'));
            continue;
        }

        // Type-only constructs never reach the output.
        if trimmed.starts_with("import type ")
            || trimmed.starts_with("export type ")
            || trimmed.starts_with("type ")
            || trimmed.starts_with("declare ")
        {
            if trimmed.contains('{') && !trimmed.contains('}') {
                skip_block_depth = 1;
            }
            continue;
        }
        if trimmed.starts_with("interface ") || trimmed.starts_with("export interface ") {
            let opens = count_char(line, '{');
            let closes = count_char(line, '}');
            if opens > closes {
                skip_block_depth = opens - closes;
            }
            continue;
        }

        output.push_str(line);
        output.push('\n');
    }

    let source_map = if options.source_map {
        Some(format!(
            "{{\"version\":3,\"file\":\"{}\",\"sources\":[\"{}\"],\"mappings\":\"\"}}",
            js_name(file_name),
            file_name
        ))
    } else {
        None
    };

    EmittedFile {
        output_text: output,
        source_map,
    }
}

fn js_name(file_name: &str) -> String {
    match file_name.strip_suffix(".ts") {
        Some(stem) => format!("{}.js", stem),
        None => file_name.to_string(),
    }
}

fn count_char(line: &str, c: char) -> usize {
    line.chars().filter(|&ch| ch == c).count()
}

/// Syntactic sanity check: balanced braces, brackets and parentheses,
/// ignoring string literals and comments.
pub fn syntactic_diagnostics(file_name: &str, text: &str) -> Vec<Diagnostic> {
    let mut depth_brace = 0i64;
    let mut depth_paren = 0i64;
    let mut depth_bracket = 0i64;

    let mut chars = text.chars().peekable();
    let mut in_string: Option<char> = None;
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    let mut prev = '\0';

    while let Some(c) = chars.next() {
        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
        } else if in_block_comment {
            if prev == '*' && c == '/' {
                in_block_comment = false;
            }
        } else if let Some(quote) = in_string {
            if c == quote && prev != '\\' {
                in_string = None;
            }
        } else {
            match c {
                '"' | '\'' | '`' => in_string = Some(c),
                '/' if chars.peek() == Some(&'/') => in_line_comment = true,
                '/' if chars.peek() == Some(&'*') => in_block_comment = true,
                '{' => depth_brace += 1,
                '}' => depth_brace -= 1,
                '(' => depth_paren += 1,
                ')' => depth_paren -= 1,
                '[' => depth_bracket += 1,
                ']' => depth_bracket -= 1,
                _ => {}
            }
        }
        prev = c;
    }

    let mut diagnostics = Vec::new();
    if depth_brace != 0 || depth_paren != 0 || depth_bracket != 0 {
        diagnostics.push(Diagnostic {
            category: DiagnosticCategory::Error,
            code: 1005,
            message: "Unbalanced delimiters in source file.".to_string(),
            file: Some(file_name.to_string()),
            start: None,
            length: None,
        });
    }
    diagnostics
}

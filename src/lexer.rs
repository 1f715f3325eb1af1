//! Statement tokenizer for binding files using logos
//!
//! Splits one call-like statement, `NAME(arg0, arg1, ..., argN)`, into its
//! ordered, trimmed argument strings. Only parentheses nest; commas inside
//! nested parentheses or inside string and character literals belong to the
//! argument. Comments are replaced by a single space and whitespace runs
//! outside literals collapse to one space, the way a C preprocessor would
//! present macro arguments.

use logos::Logos;

use crate::error::{CompileError, CompileResult};

/// Lexemes of a statement body
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lexeme {
    #[token("(")]
    Open,

    #[token(")")]
    Close,

    #[token(",")]
    Comma,

    #[regex(r#""([^"\\\n]|\\.)*""#)]
    Str,

    #[regex(r"'([^'\\\n]|\\.)*'")]
    Char,

    #[regex(r"//[^\n]*")]
    LineComment,

    #[regex(r"/\*([^*]|\*+[^*/])*\*+/")]
    BlockComment,

    #[token("/")]
    Slash,

    // Everything else, whitespace included
    #[regex(r#"[^(),"'/]+"#)]
    Text,
}

/// Lexer wrapper that provides a stream of lexemes with their source text
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Lexeme>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Lexeme::lexer(source),
        }
    }

    /// Source text of the lexeme returned last
    pub fn slice(&self) -> &'source str {
        self.inner.slice()
    }

    /// Get current position in source
    pub fn span(&self) -> std::ops::Range<usize> {
        self.inner.span()
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Lexeme, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Accumulates the text of one argument
#[derive(Default)]
struct ArgText(String);

impl ArgText {
    fn push_verbatim(&mut self, s: &str) {
        self.0.push_str(s);
    }

    fn push_space(&mut self) {
        if !self.0.ends_with(' ') {
            self.0.push(' ');
        }
    }

    fn push_collapsed(&mut self, s: &str) {
        for c in s.chars() {
            if c.is_whitespace() {
                self.push_space();
            } else {
                self.0.push(c);
            }
        }
    }

    fn finish(&mut self) -> String {
        let text = std::mem::take(&mut self.0);
        text.trim().to_string()
    }
}

/// Tokenizer for `NAME(arg, ...)` statements
#[derive(Debug, Clone, Copy)]
pub struct StatementTokenizer {
    max_args: usize,
}

impl StatementTokenizer {
    pub fn new(max_args: usize) -> Self {
        Self { max_args }
    }

    /// Tokenize the statement `name(...)` in `text`, which may span several
    /// lines. `line` is the line the statement starts on and is used for
    /// error reporting.
    pub fn tokenize(&self, name: &str, text: &str, line: usize) -> CompileResult<Vec<String>> {
        let body = text
            .trim_start()
            .strip_prefix(name)
            .map(str::trim_start)
            .and_then(|rest| rest.strip_prefix('('))
            .ok_or_else(|| CompileError::tokenization(line, format!("expected `{}(`", name)))?;

        let mut lexer = Lexer::new(body);
        let mut depth = 1usize;
        let mut args = Vec::new();
        let mut current = ArgText::default();

        while let Some(lexeme) = lexer.next() {
            let slice = lexer.slice();

            if depth == 0 {
                match lexeme {
                    Ok(Lexeme::LineComment) | Ok(Lexeme::BlockComment) => continue,
                    Ok(Lexeme::Text) if slice.trim().is_empty() => continue,
                    _ => {
                        return Err(CompileError::tokenization(
                            line,
                            format!("extra tokens after `{}` statement: `{}`", name, body[lexer.span().start..].trim()),
                        ))
                    }
                }
            }

            let lexeme = lexeme.map_err(|_| {
                CompileError::tokenization(
                    line,
                    format!("unterminated literal in `{}` statement near `{}`", name, slice),
                )
            })?;

            match lexeme {
                Lexeme::Open => {
                    depth += 1;
                    current.push_verbatim(slice);
                }
                Lexeme::Close => {
                    depth -= 1;
                    if depth == 0 {
                        args.push(current.finish());
                    } else {
                        current.push_verbatim(slice);
                    }
                }
                Lexeme::Comma if depth == 1 => {
                    args.push(current.finish());
                    if args.len() >= self.max_args {
                        return Err(self.too_many(name, line));
                    }
                }
                Lexeme::LineComment | Lexeme::BlockComment => current.push_space(),
                Lexeme::Text => current.push_collapsed(slice),
                Lexeme::Comma | Lexeme::Str | Lexeme::Char | Lexeme::Slash => {
                    current.push_verbatim(slice)
                }
            }
        }

        if depth > 0 {
            return Err(CompileError::tokenization(
                line,
                format!("unbalanced parentheses: `{}` statement is never closed", name),
            ));
        }

        if args.len() == 1 && args[0].is_empty() {
            args.clear();
        }
        if args.len() > self.max_args {
            return Err(self.too_many(name, line));
        }

        Ok(args)
    }

    fn too_many(&self, name: &str, line: usize) -> CompileError {
        CompileError::tokenization(
            line,
            format!(
                "`{}` statement exceeds the maximum of {} arguments",
                name, self.max_args
            ),
        )
    }
}

/// Rejoin string literals that break across physical lines.
///
/// Each line break inside a `"..."` literal, together with the indentation
/// that follows it, becomes a single space, so the literal is valid on one
/// line again. A backslash directly before the break splices the lines with
/// nothing in between. Comments and character literals are copied through
/// untouched.
pub fn fold_literal_breaks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_str = false;

    while let Some(c) = chars.next() {
        if in_str {
            match c {
                '\\' if chars.peek() == Some(&'\n') => {
                    chars.next();
                }
                '\\' => {
                    out.push(c);
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => {
                    in_str = false;
                    out.push(c);
                }
                '\r' | '\n' => {
                    if c == '\r' && chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    while chars.next_if(|&next| next == ' ' || next == '\t').is_some() {}
                    out.push(' ');
                }
                _ => out.push(c),
            }
            continue;
        }

        out.push(c);
        match c {
            '"' => in_str = true,
            '\'' => {
                while let Some(next) = chars.next_if(|&next| next != '\n') {
                    out.push(next);
                    if next == '\\' {
                        if let Some(escaped) = chars.next_if(|&e| e != '\n') {
                            out.push(escaped);
                        }
                    } else if next == '\'' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(next) = chars.next_if(|&next| next != '\n') {
                    out.push(next);
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                if let Some(star) = chars.next() {
                    out.push(star);
                }
                let mut prev = '\0';
                for next in chars.by_ref() {
                    out.push(next);
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => {}
        }
    }

    out
}

/// Returns true while `text` has opened a parenthesis that is not yet closed.
///
/// Used to join the physical lines of a statement before tokenizing it.
/// Malformed literals count as closed so that the tokenizer reports them.
pub fn statement_is_open(text: &str) -> bool {
    let mut depth = 0usize;
    for lexeme in Lexer::new(text) {
        match lexeme {
            Ok(Lexeme::Open) => depth += 1,
            Ok(Lexeme::Close) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return false;
                }
            }
            Ok(_) => {}
            Err(()) => return false,
        }
    }
    depth > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokenize(name: &str, text: &str) -> CompileResult<Vec<String>> {
        StatementTokenizer::new(64).tokenize(name, text, 1)
    }

    #[test]
    fn test_simple_statement() {
        let tokens = tokenize("npe_arg", "npe_arg(a, dense_f32, dense_f64)").unwrap();
        assert_eq!(tokens, vec!["a", "dense_f32", "dense_f64"]);
    }

    #[test]
    fn test_nested_call_is_one_argument() {
        let tokens = tokenize("npe_arg", "npe_arg(b, npe_matches(a))").unwrap();
        assert_eq!(tokens, vec!["b", "npe_matches(a)"]);

        let tokens = tokenize("npe_default_arg", "npe_default_arg(k, int, std::max(1, 2))").unwrap();
        assert_eq!(tokens, vec!["k", "int", "std::max(1, 2)"]);
    }

    #[test]
    fn test_quoted_text_keeps_commas_and_parens() {
        let tokens = tokenize("npe_doc", r#"npe_doc("Add (a, b), then scale")"#).unwrap();
        assert_eq!(tokens, vec![r#""Add (a, b), then scale""#]);
    }

    #[test]
    fn test_multiline_statement() {
        let text = "npe_arg(x,\n        dense_f32,\n        dense_f64)\n";
        let tokens = tokenize("npe_arg", text).unwrap();
        assert_eq!(tokens, vec!["x", "dense_f32", "dense_f64"]);
    }

    #[test]
    fn test_whitespace_and_comments_collapse() {
        let text = "npe_default_arg(mode,  std::string , /* fallback */ std::string(\"a  b\")) // trailing";
        let tokens = tokenize("npe_default_arg", text).unwrap();
        assert_eq!(tokens, vec!["mode", "std::string", "std::string(\"a  b\")"]);
    }

    #[test]
    fn test_empty_call_has_no_arguments() {
        assert_eq!(tokenize("npe_begin_code", "npe_begin_code()").unwrap(), Vec::<String>::new());
        assert_eq!(tokenize("npe_begin_code", "npe_begin_code ( )").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_extra_tokens_after_statement() {
        let err = tokenize("npe_arg", "npe_arg(a, int) junk").unwrap_err();
        assert!(matches!(err, CompileError::Tokenization { line: 1, .. }));
        assert!(err.to_string().contains("extra tokens"));
    }

    #[test]
    fn test_unbalanced_parentheses() {
        let err = tokenize("npe_arg", "npe_arg(a, std::max(1, 2)").unwrap_err();
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("npe_doc", "npe_doc(\"missing quote)").unwrap_err();
        assert!(matches!(err, CompileError::Tokenization { .. }));
    }

    #[test]
    fn test_argument_bound() {
        let names: Vec<String> = (0..70).map(|i| format!("a{}", i)).collect();
        let text = format!("npe_arg({})", names.join(", "));
        let err = StatementTokenizer::new(64).tokenize("npe_arg", &text, 12).unwrap_err();
        assert!(matches!(err, CompileError::Tokenization { line: 12, .. }));

        let names: Vec<String> = (0..64).map(|i| format!("a{}", i)).collect();
        let text = format!("npe_arg({})", names.join(", "));
        assert_eq!(tokenize("npe_arg", &text).unwrap().len(), 64);
    }

    #[test]
    fn test_wrong_statement_name() {
        assert!(tokenize("npe_doc", "npe_arg(a, int)").is_err());
    }

    #[test]
    fn test_fold_literal_breaks() {
        let text = "npe_doc(\"Computes the thing.\n         More text.\")\n";
        assert_eq!(fold_literal_breaks(text), "npe_doc(\"Computes the thing. More text.\")\n");

        let text = "npe_doc(\"a\\\nb\") // don't \"fold\"\n";
        assert_eq!(fold_literal_breaks(text), "npe_doc(\"ab\") // don't \"fold\"\n");

        let text = "npe_doc(/* \" */ \"x\")\n";
        assert_eq!(fold_literal_breaks(text), text);
    }

    #[test]
    fn test_statement_is_open() {
        assert!(statement_is_open("npe_arg(a,\n"));
        assert!(statement_is_open("npe_arg(a, std::max(1,"));
        assert!(!statement_is_open("npe_arg(a, int)\n"));
        assert!(!statement_is_open("npe_doc(\")\")"));
    }
}

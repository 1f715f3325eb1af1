//! Structural parser for binding files
//!
//! Walks the input line by line through three phases:
//! - seeking: everything before `npe_function(name)` is preamble
//! - declaring: `npe_arg`, `npe_default_arg` and `npe_doc` statements up to
//!   `npe_begin_code()`
//! - body capture: verbatim lines up to `npe_end_code()`
//!
//! Type tokens are resolved into type groups as each argument statement is
//! read. `npe_matches(other)` may name an argument declared later, so groups
//! live in an arena and a forward reference allocates a placeholder group that
//! is filled when `other` is declared.
//!
//! ```text
//! #include <cmath>
//! npe_function(scale)
//! npe_arg(a, dense_f32, dense_f64)
//! npe_arg(b, npe_matches(a))
//! npe_default_arg(k, double, 1.0)
//! npe_doc("Scales a and b by k")
//! npe_begin_code()
//!     return std::make_tuple(npe::move(a * k), npe::move(b * k));
//! npe_end_code()
//! ```

use indexmap::IndexMap;
use log::{debug, trace};

use crate::ast::{Argument, ArgumentKind, Binding, GroupId, LayoutClass, TypeGroup};
use crate::catalog::ArrayType;
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};
use crate::lexer::{fold_literal_breaks, statement_is_open, StatementTokenizer};

pub const MATCHES_TOKEN: &str = "npe_matches";
pub const COMMENT_TOKEN: &str = "//";

/// Names the generated C++ declares in the scope of every argument
const GENERATED_NAMES: &[&str] = &["callit", "m"];

const CPP_KEYWORDS: &[&str] = &[
    "alignas", "alignof", "and", "and_eq", "asm", "auto", "bitand", "bitor", "bool", "break",
    "case", "catch", "char", "char8_t", "char16_t", "char32_t", "class", "compl", "concept",
    "const", "consteval", "constexpr", "constinit", "const_cast", "continue", "co_await",
    "co_return", "co_yield", "decltype", "default", "delete", "do", "double", "dynamic_cast",
    "else", "enum", "explicit", "export", "extern", "false", "float", "for", "friend", "goto",
    "if", "inline", "int", "long", "mutable", "namespace", "new", "noexcept", "not", "not_eq",
    "nullptr", "operator", "or", "or_eq", "private", "protected", "public", "register",
    "reinterpret_cast", "requires", "return", "short", "signed", "sizeof", "static",
    "static_assert", "static_cast", "struct", "switch", "template", "this", "thread_local",
    "throw", "true", "try", "typedef", "typeid", "typename", "union", "unsigned", "using",
    "virtual", "void", "volatile", "wchar_t", "while", "xor", "xor_eq",
];

/// Recognized statement kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement {
    Function,
    Arg,
    DefaultArg,
    Doc,
    BeginCode,
    EndCode,
    /// Reserved; never accepted
    Dtype,
}

impl Statement {
    const ALL: [Statement; 7] = [
        Statement::Function,
        Statement::Arg,
        Statement::DefaultArg,
        Statement::Doc,
        Statement::BeginCode,
        Statement::EndCode,
        Statement::Dtype,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Statement::Function => "npe_function",
            Statement::Arg => "npe_arg",
            Statement::DefaultArg => "npe_default_arg",
            Statement::Doc => "npe_doc",
            Statement::BeginCode => "npe_begin_code",
            Statement::EndCode => "npe_end_code",
            Statement::Dtype => "npe_dtype",
        }
    }

    /// Recognize the statement a line starts, if any
    pub fn recognize(line: &str) -> Option<Statement> {
        let trimmed = line.trim();
        Self::ALL.into_iter().find(|stmt| {
            trimmed
                .strip_prefix(stmt.token())
                .is_some_and(|rest| rest.trim_start().starts_with('('))
        })
    }
}

/// Check `name` against the identifier grammar accepted for bindings and
/// arguments: ASCII `[A-Za-z_][A-Za-z0-9_]*`, minus the names C++ reserves
/// (leading `__`, or `_` followed by an uppercase letter).
pub fn validate_identifier(name: &str, line: usize) -> CompileResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest {
        return Err(CompileError::structural(
            line,
            format!("`{}` is not a valid identifier", name),
        ));
    }

    let bytes = name.as_bytes();
    if bytes.len() > 1 && bytes[0] == b'_' && (bytes[1] == b'_' || bytes[1].is_ascii_uppercase()) {
        return Err(CompileError::structural(
            line,
            format!("`{}` is a reserved identifier", name),
        ));
    }

    if CPP_KEYWORDS.contains(&name) {
        return Err(CompileError::structural(
            line,
            format!("`{}` is a C++ keyword and cannot be used as a name", name),
        ));
    }

    Ok(())
}

/// Check an argument name: a valid identifier that does not collide with the
/// names the generated registration code declares itself
pub fn validate_argument_name(name: &str, line: usize) -> CompileResult<()> {
    validate_identifier(name, line)?;
    if GENERATED_NAMES.contains(&name) {
        return Err(CompileError::structural(
            line,
            format!("`{}` is used by the generated code and cannot name an argument", name),
        ));
    }
    Ok(())
}

/// Parser for a single binding
pub struct Parser<'source> {
    lines: Vec<&'source str>,
    /// Index of the next unread line
    pos: usize,
    tokenizer: StatementTokenizer,
    binding: Binding,
    /// Type group of every array argument and every name referenced by
    /// `npe_matches`, declared or not
    group_of: IndexMap<String, GroupId>,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str, config: &CompilerConfig) -> Self {
        Self {
            lines: source.split_inclusive('\n').collect(),
            pos: 0,
            tokenizer: StatementTokenizer::new(config.max_statement_args),
            binding: Binding::default(),
            group_of: IndexMap::new(),
        }
    }

    /// Parse the complete binding
    pub fn parse_binding(&mut self) -> CompileResult<Binding> {
        self.seek_declaration()?;
        self.parse_declarations()?;
        self.capture_body()?;
        Ok(self.finish())
    }

    /// Advance to the next line, returning its 1-based number and text
    fn next_line(&mut self) -> Option<(usize, &'source str)> {
        let line = self.lines.get(self.pos).copied()?;
        self.pos += 1;
        Some((self.pos, line))
    }

    fn last_line_number(&self) -> usize {
        self.lines.len().max(1)
    }

    /// Join the physical lines of a statement that starts on `first` and
    /// keeps its parentheses open across line breaks
    fn read_statement(&mut self, first: &str) -> String {
        let mut text = first.to_string();
        while statement_is_open(&text) {
            match self.next_line() {
                Some((_, line)) => text.push_str(line),
                None => break,
            }
        }
        text
    }

    fn seek_declaration(&mut self) -> CompileResult<()> {
        while let Some((line_no, line)) = self.next_line() {
            if line.trim().is_empty() {
                continue;
            }

            match Statement::recognize(line) {
                Some(Statement::Function) => {
                    let text = self.read_statement(line);
                    return self.parse_function_statement(&text, line_no);
                }
                Some(stmt) => {
                    return Err(CompileError::structural(
                        line_no,
                        format!(
                            "got `{}` statement before `{}`",
                            stmt.token(),
                            Statement::Function.token()
                        ),
                    ));
                }
                None => self.binding.preamble_text.push_str(line),
            }
        }

        Err(CompileError::structural(
            self.last_line_number(),
            format!(
                "invalid binding file: must declare a binding with {}(<function_name>)",
                Statement::Function.token()
            ),
        ))
    }

    fn parse_function_statement(&mut self, text: &str, line: usize) -> CompileResult<()> {
        let tokens = self.tokenizer.tokenize(Statement::Function.token(), text, line)?;
        let name = match tokens.as_slice() {
            [name] => name,
            [] => {
                return Err(CompileError::structural(
                    line,
                    "npe_function got no binding name",
                ))
            }
            [_, extra @ ..] => {
                return Err(CompileError::structural(
                    line,
                    format!(
                        "npe_function got extra tokens {:?}; expected only the name of the function",
                        extra
                    ),
                ))
            }
        };

        validate_identifier(name, line)?;
        debug!(binding = name.as_str(), line = line; "Binding declared");
        self.binding.name = name.clone();
        self.binding.line = line;
        Ok(())
    }

    fn parse_declarations(&mut self) -> CompileResult<()> {
        // A doc statement may run over several lines and cannot be split off
        // before the next recognized statement shows where it ends.
        let mut pending_doc: Option<(usize, String)> = None;

        while let Some((line_no, line)) = self.next_line() {
            let stmt = Statement::recognize(line);

            if stmt.is_some() {
                if let Some((doc_line, doc_text)) = pending_doc.take() {
                    self.parse_doc_statement(&doc_text, doc_line)?;
                }
            }

            match stmt {
                Some(kind @ (Statement::Arg | Statement::DefaultArg)) => {
                    let text = self.read_statement(line);
                    self.parse_arg_statement(kind, &text, line_no)?;
                }
                Some(Statement::Doc) => {
                    if self.binding.doc_text.is_some() {
                        return Err(CompileError::structural(
                            line_no,
                            format!(
                                "multiple `{}` statements for one function",
                                Statement::Doc.token()
                            ),
                        ));
                    }
                    pending_doc = Some((line_no, line.to_string()));
                }
                Some(Statement::BeginCode) => {
                    self.parse_marker(Statement::BeginCode, line, line_no)?;
                    return Ok(());
                }
                Some(Statement::Function) => {
                    return Err(CompileError::structural(
                        line_no,
                        format!(
                            "`{}` inside binding `{}`; only one binding per file is supported",
                            Statement::Function.token(),
                            self.binding.name
                        ),
                    ));
                }
                Some(Statement::EndCode) => {
                    return Err(CompileError::structural(
                        line_no,
                        format!(
                            "got `{}` statement before `{}`",
                            Statement::EndCode.token(),
                            Statement::BeginCode.token()
                        ),
                    ));
                }
                Some(Statement::Dtype) => {
                    return Err(CompileError::structural(
                        line_no,
                        format!("`{}` is reserved and not supported", Statement::Dtype.token()),
                    ));
                }
                None => {
                    if let Some((_, doc_text)) = pending_doc.as_mut() {
                        doc_text.push_str(line);
                    } else if line.trim().is_empty() || line.trim().starts_with(COMMENT_TOKEN) {
                        continue;
                    } else {
                        return Err(CompileError::structural(
                            line_no,
                            format!("unexpected tokens: {}", line.trim()),
                        ));
                    }
                }
            }
        }

        Err(CompileError::structural(
            self.last_line_number(),
            format!(
                "invalid binding file: `{}` has no {}() statement",
                self.binding.name,
                Statement::BeginCode.token()
            ),
        ))
    }

    fn capture_body(&mut self) -> CompileResult<()> {
        let mut reached_end = false;

        while let Some((line_no, line)) = self.next_line() {
            if reached_end {
                if !line.trim().is_empty() {
                    return Err(CompileError::structural(
                        line_no,
                        format!(
                            "expected end of input after {}(), got: {}",
                            Statement::EndCode.token(),
                            line.trim()
                        ),
                    ));
                }
            } else if Statement::recognize(line) == Some(Statement::EndCode) {
                self.parse_marker(Statement::EndCode, line, line_no)?;
                reached_end = true;
            } else {
                self.binding.body_text.push_str(line);
            }
        }

        if !reached_end {
            return Err(CompileError::structural(
                self.last_line_number(),
                format!(
                    "unexpected end of input: binding must end with a {}() statement",
                    Statement::EndCode.token()
                ),
            ));
        }

        trace!(lines = self.binding.body_text.lines().count(); "Captured body");
        Ok(())
    }

    /// `npe_begin_code()` and `npe_end_code()`: no arguments, alone on the line
    fn parse_marker(&self, stmt: Statement, line: &str, line_no: usize) -> CompileResult<()> {
        let tokens = self.tokenizer.tokenize(stmt.token(), line, line_no)?;
        if !tokens.is_empty() {
            return Err(CompileError::structural(
                line_no,
                format!("{}() takes no arguments, got {:?}", stmt.token(), tokens),
            ));
        }
        Ok(())
    }

    fn parse_doc_statement(&mut self, text: &str, line: usize) -> CompileResult<()> {
        let text = fold_literal_breaks(text);
        let mut tokens = self.tokenizer.tokenize(Statement::Doc.token(), &text, line)?;

        match tokens.len() {
            0 => Err(CompileError::structural(
                line,
                format!("got {} statement but no documentation string", Statement::Doc.token()),
            )),
            1 => {
                let doc = tokens.remove(0);
                debug!(doc = doc.as_str(); "Docstring");
                self.binding.doc_text = Some(doc);
                Ok(())
            }
            _ => Err(CompileError::structural(
                line,
                format!(
                    "got more than one documentation token in {} statement; did you forget quotes around the docstring?",
                    Statement::Doc.token()
                ),
            )),
        }
    }

    fn parse_arg_statement(&mut self, stmt: Statement, text: &str, line: usize) -> CompileResult<()> {
        let mut tokens = self.tokenizer.tokenize(stmt.token(), text, line)?;
        if tokens.is_empty() {
            return Err(CompileError::structural(
                line,
                format!("{}() got no arguments", stmt.token()),
            ));
        }

        let name = tokens.remove(0);
        validate_argument_name(&name, line)?;

        let default_value = if stmt == Statement::DefaultArg {
            match tokens.pop() {
                Some(value) if !value.is_empty() && !tokens.is_empty() => Some(value),
                Some(value) if !value.is_empty() => {
                    return Err(CompileError::structural(
                        line,
                        format!(
                            "{}(\"{}\") expects a type and a default value, got only `{}`",
                            stmt.token(),
                            name,
                            value
                        ),
                    ))
                }
                _ => {
                    return Err(CompileError::structural(
                        line,
                        format!("{}(\"{}\") is missing its default value", stmt.token(), name),
                    ))
                }
            }
        } else {
            None
        };

        if tokens.is_empty() {
            return Err(CompileError::structural(
                line,
                format!("{}(\"{}\") got no type arguments", stmt.token(), name),
            ));
        }
        if tokens.iter().any(String::is_empty) {
            return Err(CompileError::structural(
                line,
                format!("{}(\"{}\") has an empty type argument", stmt.token(), name),
            ));
        }

        if let Some(previous) = self.binding.argument(&name) {
            return Err(CompileError::semantic(
                line,
                format!(
                    "argument `{}` is already declared at line {}",
                    name, previous.line
                ),
            ));
        }

        let (kind, matches) = self.resolve_types(&name, &tokens, line)?;
        debug!(
            "{} `{}` - {:?}{}",
            stmt.token(),
            name,
            tokens,
            default_value
                .as_deref()
                .map(|v| format!(" = {}", v))
                .unwrap_or_default()
        );

        self.binding.arguments.insert(
            name.clone(),
            Argument {
                name,
                kind,
                matches,
                default_value,
                layout_class: LayoutClass::Unresolved,
                line,
            },
        );
        Ok(())
    }

    /// Resolve the type tokens of an argument statement
    fn resolve_types(
        &mut self,
        name: &str,
        tokens: &[String],
        line: usize,
    ) -> CompileResult<(ArgumentKind, Option<String>)> {
        if let [token] = tokens {
            if !ArrayType::is_array_type(token) {
                if let Some(other) = parse_matches_token(token, line)? {
                    validate_identifier(&other, line)?;
                    let group = self.join_matches(name, &other, line)?;
                    return Ok((ArgumentKind::Array { group }, Some(other)));
                }
                return Ok((
                    ArgumentKind::Scalar {
                        type_text: token.clone(),
                    },
                    None,
                ));
            }
        }

        let mut types = Vec::with_capacity(tokens.len());
        for token in tokens {
            let array_type = token.parse::<ArrayType>().map_err(|_| {
                CompileError::semantic(
                    line,
                    format!(
                        "got invalid type `{}` for argument `{}`; if multiple types are specified, \
                         they must all be array types such as dense_f64 or sparse_i32",
                        token, name
                    ),
                )
            })?;
            if types.contains(&array_type) {
                return Err(CompileError::semantic(
                    line,
                    format!("argument `{}` lists type `{}` more than once", name, array_type),
                ));
            }
            types.push(array_type);
        }

        let group = self.declare_types(name, types, line)?;
        Ok((ArgumentKind::Array { group }, None))
    }

    fn new_group(&mut self) -> GroupId {
        self.binding.groups.push(TypeGroup::default());
        self.binding.groups.len() - 1
    }

    /// Attach candidate types to `name`'s group, creating it unless an earlier
    /// `npe_matches` already allocated a placeholder
    fn declare_types(&mut self, name: &str, types: Vec<ArrayType>, line: usize) -> CompileResult<GroupId> {
        let group = match self.group_of.get(name) {
            Some(&group) => group,
            None => {
                let group = self.new_group();
                self.group_of.insert(name.to_string(), group);
                group
            }
        };

        let candidates = &mut self.binding.groups[group].candidate_types;
        if !candidates.is_empty() && *candidates != types {
            return Err(CompileError::semantic(
                line,
                format!(
                    "argument `{}` declares types that conflict with the arguments it is matched with",
                    name
                ),
            ));
        }
        *candidates = types;
        trace!(argument = name, group = group; "Group types declared");
        Ok(group)
    }

    /// Put `name` in the same group as `other`
    fn join_matches(&mut self, name: &str, other: &str, line: usize) -> CompileResult<GroupId> {
        let group = match (
            self.group_of.get(name).copied(),
            self.group_of.get(other).copied(),
        ) {
            (None, None) => {
                let group = self.new_group();
                self.group_of.insert(other.to_string(), group);
                group
            }
            (None, Some(group)) => group,
            (Some(group), None) => {
                self.group_of.insert(other.to_string(), group);
                group
            }
            (Some(a), Some(b)) if a == b => a,
            (Some(a), Some(b)) => self.merge_groups(a, b, name, other, line)?,
        };

        self.group_of.insert(name.to_string(), group);
        trace!(argument = name, matches = other, group = group; "Joined group");
        Ok(group)
    }

    /// Fold the later-created of two groups into the earlier one. The emptied
    /// arena slot is dropped by [`Parser::finish`].
    fn merge_groups(
        &mut self,
        a: GroupId,
        b: GroupId,
        name: &str,
        other: &str,
        line: usize,
    ) -> CompileResult<GroupId> {
        let (into, from) = if a < b { (a, b) } else { (b, a) };

        let from_types = std::mem::take(&mut self.binding.groups[from].candidate_types);
        let into_types = &mut self.binding.groups[into].candidate_types;
        if into_types.is_empty() {
            *into_types = from_types;
        } else if !from_types.is_empty() && *into_types != from_types {
            return Err(CompileError::semantic(
                line,
                format!(
                    "`{}` matches `{}` but they are already constrained to different array types",
                    name, other
                ),
            ));
        }

        for group in self.group_of.values_mut() {
            if *group == from {
                *group = into;
            }
        }
        for arg in self.binding.arguments.values_mut() {
            if let ArgumentKind::Array { group } = &mut arg.kind {
                if *group == from {
                    *group = into;
                }
            }
        }

        Ok(into)
    }

    /// Drop merged-away groups and record each group's declared members in
    /// declaration order
    fn finish(&mut self) -> Binding {
        let mut binding = std::mem::take(&mut self.binding);

        let mut remap = vec![None; binding.groups.len()];
        let mut groups = Vec::new();
        for (old, group) in std::mem::take(&mut binding.groups).into_iter().enumerate() {
            if binding.arguments().any(|arg| arg.group() == Some(old)) {
                remap[old] = Some(groups.len());
                groups.push(group);
            }
        }

        for arg in binding.arguments.values_mut() {
            if let ArgumentKind::Array { group } = &mut arg.kind {
                if let Some(new) = remap[*group] {
                    *group = new;
                }
            }
        }

        for (id, group) in groups.iter_mut().enumerate() {
            group.members = binding
                .arguments()
                .filter(|arg| arg.group() == Some(id))
                .map(|arg| arg.name.clone())
                .collect();
        }

        binding.groups = groups;
        debug!(
            binding = binding.name.as_str(),
            arguments = binding.num_args(),
            groups = binding.groups.len();
            "Parsed binding"
        );
        binding
    }
}

/// Parse `npe_matches(other)` (case-insensitive keyword), returning `other`.
/// Returns `None` when `token` is not a matches expression at all.
fn parse_matches_token(token: &str, line: usize) -> CompileResult<Option<String>> {
    let is_matches = token
        .get(..MATCHES_TOKEN.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(MATCHES_TOKEN));
    if !is_matches {
        return Ok(None);
    }

    let rest = token[MATCHES_TOKEN.len()..].trim_start();
    let Some(inner) = rest.strip_prefix('(') else {
        return Ok(None);
    };
    let inner = inner.trim_end().strip_suffix(')').ok_or_else(|| {
        CompileError::structural(line, format!("missing ')' for {}() token", MATCHES_TOKEN))
    })?;

    Ok(Some(inner.trim().to_string()))
}

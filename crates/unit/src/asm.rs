//! Text form of units and instruction snippets.
//!
//! ```text
//! unit demo.Greeter
//! ctor (str)
//!   load 0
//!   print
//!   return_void
//! end
//! method greet(str, int) -> str
//!   locals 3
//!   push "hello "
//!   load 0
//!   concat
//!   return
//! end
//! ```
//!
//! Statements are separated by newlines or `;`, and `#` starts a comment.
//! Guard blocks are written `guard [marker=<hex>]` … `catch` … `end_guard`.

use std::fmt::{self, Write as _};

use crate::types::{Instr, Method, MethodKind, Unit, Value, ValueType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct AsmError {
    pub line: usize,
    pub message: String,
}

impl AsmError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

type Result<T> = std::result::Result<T, AsmError>;

#[derive(Debug)]
struct Stmt {
    line: usize,
    text: String,
}

impl Stmt {
    fn split(&self) -> (&str, &str) {
        match self.text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (self.text.as_str(), ""),
        }
    }
}

/// Split source into statements on newlines and `;`, honouring string
/// literals and dropping `#` comments.
fn statements(src: &str) -> Vec<Stmt> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut line = 1;
    let mut stmt_line = 1;
    let mut in_string = false;
    let mut escaped = false;
    let mut in_comment = false;

    let mut flush = |current: &mut String, at: usize| {
        let text = current.trim();
        if !text.is_empty() {
            out.push(Stmt {
                line: at,
                text: text.to_string(),
            });
        }
        current.clear();
    };

    for c in src.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
                flush(&mut current, stmt_line);
                line += 1;
                stmt_line = line;
            }
            continue;
        }
        if in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            if c == '\n' {
                line += 1;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '#' => in_comment = true,
            ';' => {
                flush(&mut current, stmt_line);
                stmt_line = line;
            }
            '\n' => {
                flush(&mut current, stmt_line);
                line += 1;
                stmt_line = line;
            }
            _ => {
                if current.trim().is_empty() {
                    stmt_line = line;
                }
                current.push(c);
            }
        }
    }
    flush(&mut current, stmt_line);
    out
}

fn parse_string(s: &str, line: usize) -> Result<String> {
    let inner = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|_| s.len() >= 2)
        .ok_or_else(|| AsmError::new(line, format!("expected string literal, got `{}`", s)))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            other => {
                return Err(AsmError::new(line, format!("bad escape `\\{}`", other.unwrap_or(' '))))
            }
        }
    }
    Ok(out)
}

fn parse_literal(s: &str, line: usize) -> Result<Value> {
    match s {
        "null" => return Ok(Value::Null),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if s.starts_with('"') {
        return parse_string(s, line).map(Value::Str);
    }
    if s.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
        if let Ok(f) = s.parse::<f64>() {
            return Ok(Value::Float(f));
        }
    }
    s.parse::<i64>()
        .map(Value::Int)
        .map_err(|_| AsmError::new(line, format!("bad literal `{}`", s)))
}

fn parse_number<T: std::str::FromStr>(s: &str, what: &str, line: usize) -> Result<T> {
    s.parse()
        .map_err(|_| AsmError::new(line, format!("expected {}, got `{}`", what, s)))
}

fn no_operand(op: &str, operand: &str, line: usize, instr: Instr) -> Result<Instr> {
    if operand.is_empty() {
        Ok(instr)
    } else {
        Err(AsmError::new(line, format!("`{}` takes no operand", op)))
    }
}

fn parse_instr(stmt: &Stmt) -> Result<Instr> {
    let (op, operand) = stmt.split();
    let line = stmt.line;
    match op {
        "push" => parse_literal(operand, line).map(Instr::Push),
        "load" => parse_number(operand, "slot", line).map(Instr::Load),
        "store" => parse_number(operand, "slot", line).map(Instr::Store),
        "jump" => parse_number(operand, "target", line).map(Instr::Jump),
        "jump_unless" => parse_number(operand, "target", line).map(Instr::JumpUnless),
        "stack_trace" => parse_string(operand, line).map(Instr::StackTrace),
        "throw" => parse_string(operand, line).map(Instr::Throw),
        "invoke" => {
            let (target, argc) = operand
                .split_once(char::is_whitespace)
                .ok_or_else(|| AsmError::new(line, "expected `invoke <unit>::<method> <argc>`"))?;
            let (unit, method) = target
                .split_once("::")
                .filter(|(u, m)| !u.is_empty() && !m.is_empty())
                .ok_or_else(|| AsmError::new(line, format!("bad call target `{}`", target)))?;
            Ok(Instr::Invoke {
                unit: unit.to_string(),
                method: method.to_string(),
                argc: parse_number(argc.trim(), "argument count", line)?,
            })
        }
        "dup" => no_operand(op, operand, line, Instr::Dup),
        "pop" => no_operand(op, operand, line, Instr::Pop),
        "add" => no_operand(op, operand, line, Instr::Add),
        "sub" => no_operand(op, operand, line, Instr::Sub),
        "mul" => no_operand(op, operand, line, Instr::Mul),
        "div" => no_operand(op, operand, line, Instr::Div),
        "concat" => no_operand(op, operand, line, Instr::Concat),
        "lt" => no_operand(op, operand, line, Instr::Lt),
        "eq" => no_operand(op, operand, line, Instr::Eq),
        "is_null" => no_operand(op, operand, line, Instr::IsNull),
        "print" => no_operand(op, operand, line, Instr::Print),
        "clock" => no_operand(op, operand, line, Instr::Clock),
        "trace" => no_operand(op, operand, line, Instr::Trace),
        "heap_dump" => no_operand(op, operand, line, Instr::HeapDump),
        "report_error" => no_operand(op, operand, line, Instr::ReportError),
        "caught" => no_operand(op, operand, line, Instr::Caught),
        "return" => no_operand(op, operand, line, Instr::Return),
        "return_void" => no_operand(op, operand, line, Instr::ReturnVoid),
        other => Err(AsmError::new(line, format!("unknown instruction `{}`", other))),
    }
}

/// Parse statements into instructions until one of `terminators` (returned)
/// or the end of input (`None`).
fn parse_block<'s>(
    stmts: &'s [Stmt],
    pos: &mut usize,
    terminators: &[&str],
) -> Result<(Vec<Instr>, Option<&'s Stmt>)> {
    let mut block = Vec::new();
    while let Some(stmt) = stmts.get(*pos) {
        *pos += 1;
        let (op, operand) = stmt.split();
        if terminators.contains(&op) {
            return Ok((block, Some(stmt)));
        }
        if op != "guard" {
            block.push(parse_instr(stmt)?);
            continue;
        }

        let marker = match operand.strip_prefix("marker=") {
            Some(hex) => Some(
                u64::from_str_radix(hex, 16)
                    .map_err(|_| AsmError::new(stmt.line, format!("bad marker `{}`", hex)))?,
            ),
            None if operand.is_empty() => None,
            None => return Err(AsmError::new(stmt.line, format!("unexpected `{}`", operand))),
        };
        let (body, end) = parse_block(stmts, pos, &["catch", "end_guard"])?;
        let handler = match end.map(|s| s.split().0) {
            Some("catch") => match parse_block(stmts, pos, &["end_guard"])? {
                (handler, Some(_)) => handler,
                (_, None) => return Err(AsmError::new(stmt.line, "unterminated guard")),
            },
            Some(_) => Vec::new(),
            None => return Err(AsmError::new(stmt.line, "unterminated guard")),
        };
        block.push(Instr::Guard { marker, body, handler });
    }
    Ok((block, None))
}

/// Assemble injected code. Returns are rejected: injected code may not alter
/// the control flow of the method it lands in.
pub fn assemble_snippet(src: &str) -> Result<Vec<Instr>> {
    let stmts = statements(src);
    if stmts.is_empty() {
        return Err(AsmError::new(1, "empty snippet"));
    }
    let mut pos = 0;
    let (code, end) = parse_block(&stmts, &mut pos, &["catch", "end_guard"])?;
    if let Some(stmt) = end {
        return Err(AsmError::new(stmt.line, format!("unexpected `{}`", stmt.text)));
    }
    if contains_return(&code) {
        return Err(AsmError::new(1, "return is not allowed in injected code"));
    }
    Ok(code)
}

fn contains_return(code: &[Instr]) -> bool {
    code.iter().any(|i| match i {
        Instr::Return | Instr::ReturnVoid => true,
        Instr::Guard { body, handler, .. } => contains_return(body) || contains_return(handler),
        _ => false,
    })
}

fn parse_types(list: &str, line: usize) -> Result<Vec<ValueType>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|e: String| AsmError::new(line, e)))
        .collect()
}

/// Parse `name(int, str) -> int` (or `(int)` for constructors).
fn parse_header(stmt: &Stmt, rest: &str) -> Result<(String, Vec<ValueType>, Option<ValueType>)> {
    let line = stmt.line;
    let open = rest
        .find('(')
        .ok_or_else(|| AsmError::new(line, "expected `(` in method header"))?;
    let close = rest
        .rfind(')')
        .filter(|c| *c > open)
        .ok_or_else(|| AsmError::new(line, "expected `)` in method header"))?;
    let name = rest[..open].trim().to_string();
    let params = parse_types(&rest[open + 1..close], line)?;
    let tail = rest[close + 1..].trim();
    let returns = if tail.is_empty() {
        None
    } else {
        let ty = tail
            .strip_prefix("->")
            .ok_or_else(|| AsmError::new(line, format!("unexpected `{}`", tail)))?;
        Some(ty.trim().parse().map_err(|e: String| AsmError::new(line, e))?)
    };
    Ok((name, params, returns))
}

fn max_slot(code: &[Instr]) -> Option<u16> {
    code.iter()
        .filter_map(|i| match i {
            Instr::Load(s) | Instr::Store(s) => Some(*s),
            Instr::Guard { body, handler, .. } => max_slot(body).max(max_slot(handler)),
            _ => None,
        })
        .max()
}

/// Assemble a full unit. The result is not verified; encoding does that.
pub fn assemble_unit(src: &str) -> Result<Unit> {
    let stmts = statements(src);
    let first = stmts.first().ok_or_else(|| AsmError::new(1, "empty source"))?;
    let name = match first.split() {
        ("unit", name) if !name.is_empty() => name.to_string(),
        _ => return Err(AsmError::new(first.line, "expected `unit <name>`")),
    };

    let mut unit = Unit::new(&name);
    let mut pos = 1;
    while let Some(stmt) = stmts.get(pos) {
        pos += 1;
        let (kind, rest) = stmt.split();
        let (method_name, params, returns, kind) = match kind {
            "ctor" => {
                let (_, params, returns) = parse_header(stmt, rest)?;
                if returns.is_some() {
                    return Err(AsmError::new(stmt.line, "constructors return nothing"));
                }
                (crate::types::CONSTRUCTOR_NAME.to_string(), params, None, MethodKind::Constructor)
            }
            "method" => {
                let (name, params, returns) = parse_header(stmt, rest)?;
                if name.is_empty() {
                    return Err(AsmError::new(stmt.line, "method name missing"));
                }
                (name, params, returns, MethodKind::Method)
            }
            other => {
                return Err(AsmError::new(stmt.line, format!("expected `ctor` or `method`, got `{}`", other)))
            }
        };

        let mut declared_locals = None;
        if let Some(next) = stmts.get(pos) {
            if let ("locals", n) = next.split() {
                declared_locals = Some(parse_number::<u16>(n, "local count", next.line)?);
                pos += 1;
            }
        }

        let (body, end) = parse_block(&stmts, &mut pos, &["end", "catch", "end_guard"])?;
        match end {
            Some(s) if s.split().0 == "end" => {}
            Some(s) => return Err(AsmError::new(s.line, format!("unexpected `{}`", s.text))),
            None => return Err(AsmError::new(stmt.line, "method not terminated by `end`")),
        }

        let locals = declared_locals.unwrap_or_else(|| {
            let used = max_slot(&body).map(|s| s.saturating_add(1)).unwrap_or(0);
            used.max(params.len() as u16)
        });
        unit.methods.push(Method {
            name: method_name,
            kind,
            params,
            returns,
            locals,
            body,
        });
    }
    Ok(unit)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

struct Literal<'a>(&'a Value);

impl fmt::Display for Literal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Str(s) => f.write_str(&escape(s)),
            other => write!(f, "{}", other),
        }
    }
}

/// Single-line form; guards print only their header.
impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Push(v) => write!(f, "push {}", Literal(v)),
            Instr::Load(s) => write!(f, "load {}", s),
            Instr::Store(s) => write!(f, "store {}", s),
            Instr::Dup => f.write_str("dup"),
            Instr::Pop => f.write_str("pop"),
            Instr::Add => f.write_str("add"),
            Instr::Sub => f.write_str("sub"),
            Instr::Mul => f.write_str("mul"),
            Instr::Div => f.write_str("div"),
            Instr::Concat => f.write_str("concat"),
            Instr::Lt => f.write_str("lt"),
            Instr::Eq => f.write_str("eq"),
            Instr::IsNull => f.write_str("is_null"),
            Instr::Jump(t) => write!(f, "jump {}", t),
            Instr::JumpUnless(t) => write!(f, "jump_unless {}", t),
            Instr::Invoke { unit, method, argc } => write!(f, "invoke {}::{} {}", unit, method, argc),
            Instr::Print => f.write_str("print"),
            Instr::Clock => f.write_str("clock"),
            Instr::Trace => f.write_str("trace"),
            Instr::StackTrace(h) => write!(f, "stack_trace {}", escape(h)),
            Instr::HeapDump => f.write_str("heap_dump"),
            Instr::ReportError => f.write_str("report_error"),
            Instr::Caught => f.write_str("caught"),
            Instr::Throw(m) => write!(f, "throw {}", escape(m)),
            Instr::Guard { marker: Some(m), .. } => write!(f, "guard marker={:016x}", m),
            Instr::Guard { marker: None, .. } => f.write_str("guard"),
            Instr::Return => f.write_str("return"),
            Instr::ReturnVoid => f.write_str("return_void"),
        }
    }
}

fn write_block(out: &mut String, code: &[Instr], depth: usize) {
    let pad = "  ".repeat(depth);
    for instr in code {
        let _ = writeln!(out, "{}{}", pad, instr);
        if let Instr::Guard { body, handler, .. } = instr {
            write_block(out, body, depth + 1);
            if !handler.is_empty() {
                let _ = writeln!(out, "{}catch", pad);
                write_block(out, handler, depth + 1);
            }
            let _ = writeln!(out, "{}end_guard", pad);
        }
    }
}

/// Render a unit in the text form accepted by [`assemble_unit`].
pub fn disassemble(unit: &Unit) -> String {
    let mut out = format!("unit {}\n", unit.name);
    for method in &unit.methods {
        let params: Vec<String> = method.params.iter().map(|p| p.to_string()).collect();
        let header = match (method.kind, method.returns) {
            (MethodKind::Constructor, _) => format!("ctor ({})", params.join(", ")),
            (MethodKind::Method, Some(ret)) => {
                format!("method {}({}) -> {}", method.name, params.join(", "), ret)
            }
            (MethodKind::Method, None) => format!("method {}({})", method.name, params.join(", ")),
        };
        let _ = writeln!(out, "{}", header);
        let _ = writeln!(out, "  locals {}", method.locals);
        write_block(&mut out, &method.body, 1);
        out.push_str("end\n");
    }
    out
}

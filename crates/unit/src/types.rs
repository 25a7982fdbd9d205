use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Name under which constructors are stored.
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Static type of a parameter, local or return value.
///
/// `Str` is the only object type and the only one that may hold `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
}

impl ValueType {
    pub fn is_primitive(self) -> bool {
        !matches!(self, ValueType::Str)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Str => write!(f, "str"),
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(ValueType::Bool),
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "str" => Ok(ValueType::Str),
            other => Err(format!("unknown type: '{}'", other)),
        }
    }
}

/// Runtime value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int(_) => Some(ValueType::Int),
            Value::Float(_) => Some(ValueType::Float),
            Value::Str(_) => Some(ValueType::Str),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// Textual representation used by `concat`, `print` and emitted diagnostics.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Identifies the placement that produced a guard block.
pub type Marker = u64;

/// One instruction. Jump targets are absolute indices into the enclosing
/// instruction list (method body, guard body or guard handler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    Push(Value),
    Load(u16),
    Store(u16),
    Dup,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    /// Pops two values and pushes the concatenation of their text forms.
    Concat,
    Lt,
    Eq,
    IsNull,
    Jump(u32),
    /// Pops a bool and jumps when it is false.
    JumpUnless(u32),
    /// Pops `argc` arguments and calls `unit::method`, pushing its result if any.
    Invoke { unit: String, method: String, argc: u16 },
    /// Pops a value and writes it to the program's standard output.
    Print,
    /// Pushes a monotonic timestamp in nanoseconds.
    Clock,
    /// Pops a value and emits its text as a trace line.
    Trace,
    /// Emits the current call stack under the given header.
    StackTrace(String),
    /// Requests a heap snapshot.
    HeapDump,
    /// Pops a value and emits its text as an error line.
    ReportError,
    /// Inside a guard handler: pushes the message of the caught error.
    Caught,
    Throw(String),
    /// Runs `body`; any error it raises runs `handler` instead of propagating.
    Guard {
        marker: Option<Marker>,
        body: Vec<Instr>,
        handler: Vec<Instr>,
    },
    Return,
    ReturnVoid,
}

impl Instr {
    /// Whether control never falls through to the next instruction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Instr::Return | Instr::ReturnVoid | Instr::Throw(_) | Instr::Jump(_))
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Instr::Return | Instr::ReturnVoid)
    }

    pub fn jump_target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Instr::Jump(t) | Instr::JumpUnless(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    Method,
    Constructor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub kind: MethodKind,
    pub params: Vec<ValueType>,
    /// `None` for void methods and constructors.
    pub returns: Option<ValueType>,
    /// Total local slots; parameters occupy the first `params.len()`.
    pub locals: u16,
    pub body: Vec<Instr>,
}

impl Method {
    pub fn new(name: &str, params: Vec<ValueType>, returns: Option<ValueType>, body: Vec<Instr>) -> Self {
        let locals = params.len() as u16;
        Self {
            name: name.to_string(),
            kind: MethodKind::Method,
            params,
            returns,
            locals,
            body,
        }
    }

    pub fn constructor(params: Vec<ValueType>, body: Vec<Instr>) -> Self {
        let locals = params.len() as u16;
        Self {
            name: CONSTRUCTOR_NAME.to_string(),
            kind: MethodKind::Constructor,
            params,
            returns: None,
            locals,
            body,
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == MethodKind::Constructor
    }

    /// Reserve a fresh local slot, or `None` when the slot space is exhausted.
    pub fn allocate_local(&mut self) -> Option<u16> {
        let slot = self.locals;
        self.locals = self.locals.checked_add(1)?;
        Some(slot)
    }

    /// Whether a top-level guard in the body carries `marker`.
    pub fn has_marker(&self, marker: Marker) -> bool {
        self.body
            .iter()
            .any(|i| matches!(i, Instr::Guard { marker: Some(m), .. } if *m == marker))
    }

    /// `name(int, str) -> int` style signature for logs and disassembly.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        match self.returns {
            Some(ret) => format!("{}({}) -> {}", self.name, params.join(", "), ret),
            None => format!("{}({})", self.name, params.join(", ")),
        }
    }
}

/// One loaded unit: a fully-qualified dotted name and its methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,
    pub methods: Vec<Method>,
}

impl Unit {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    /// Last segment of the name, after any `.` or `$` separator.
    pub fn simple_name(&self) -> &str {
        simple_name(&self.name)
    }

    /// Resolve a call target by name and arity.
    pub fn find(&self, method: &str, argc: usize) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == method && m.params.len() == argc)
    }
}

/// Last segment of a dotted unit name, after any `.` or `$` separator.
pub fn simple_name(unit_name: &str) -> &str {
    unit_name
        .rsplit(|c: char| c == '.' || c == '$')
        .next()
        .unwrap_or(unit_name)
}

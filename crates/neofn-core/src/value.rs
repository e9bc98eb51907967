//! Guest runtime values
//!
//! Lists and dicts are shared, mutable containers (`Rc<RefCell<..>>`), so
//! aliases observe mutation. Values never cross threads and never outlive
//! one invocation; anything that leaves the interpreter goes through
//! [`Value::to_json`].
//!
//! Operator semantics follow the usual scripting conventions: `/` always
//! produces a float, `//` and `%` floor towards negative infinity, and
//! integer arithmetic is checked (overflow is an error, never a wrap).

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::capabilities::{CapabilityGroup, CapabilityOp};
use crate::parser::ast::{BinOp, FunctionDef};

/// Nesting limit for conversions, display and equality.
/// Self-referencing containers hit this instead of recursing forever.
pub const MAX_NESTING: usize = 128;

/// Upper bound on the length of any list or string built by repetition
pub const MAX_SEQUENCE_LEN: usize = 1 << 24;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<IndexMap<String, Value>>>;

/// A function defined by guest code, with defaults evaluated at `def` time
#[derive(Debug)]
pub struct GuestFunction {
    pub def: Rc<FunctionDef>,
    /// One slot per parameter; `Some` for parameters that declare a default
    pub defaults: Vec<Option<Value>>,
}

impl GuestFunction {
    pub fn name(&self) -> &str {
        &self.def.name
    }
}

/// Language built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Str,
    Int,
    Float,
    Bool,
    Abs,
    Min,
    Max,
    Sum,
    Range,
    Sorted,
    Round,
    List,
    Dict,
    Type,
}

impl Builtin {
    /// Built-ins resolvable by bare name. `print` is absent: it is reachable
    /// only through the namespace binding the engine installs.
    pub const GLOBAL: [Self; 15] = [
        Self::Len,
        Self::Str,
        Self::Int,
        Self::Float,
        Self::Bool,
        Self::Abs,
        Self::Min,
        Self::Max,
        Self::Sum,
        Self::Range,
        Self::Sorted,
        Self::Round,
        Self::List,
        Self::Dict,
        Self::Type,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Len => "len",
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Abs => "abs",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
            Self::Range => "range",
            Self::Sorted => "sorted",
            Self::Round => "round",
            Self::List => "list",
            Self::Dict => "dict",
            Self::Type => "type",
        }
    }

    pub fn lookup(name: &str) -> Option<Self> {
        Self::GLOBAL.iter().copied().find(|b| b.name() == name)
    }
}

/// A guest runtime value
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ListRef),
    Dict(DictRef),
    Function(Rc<GuestFunction>),
    Builtin(Builtin),
    /// A method looked up on a value, e.g. `xs.append`
    BoundMethod {
        receiver: Box<Value>,
        name: &'static str,
    },
    /// The `neo_service` root handle
    Service,
    /// `neo_service.<group>`
    Group(CapabilityGroup),
    /// `neo_service.<group>.<operation>`
    Capability(CapabilityOp),
}

/// Numeric view of a value; bools count as integers
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

impl Value {
    pub fn new_list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn new_dict(entries: IndexMap<String, Value>) -> Value {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    /// Check if value is "truthy" for conditions and `bool()`
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(entries) => !entries.borrow().is_empty(),
            _ => true,
        }
    }

    /// Get the type name for error messages and `type()`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function",
            Value::BoundMethod { .. } => "method",
            Value::Service => "service",
            Value::Group(_) => "capability_group",
            Value::Capability(_) => "capability",
        }
    }

    fn as_num(&self) -> Option<Num> {
        match self {
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    /// Integer view used for indices, counts and `range` bounds
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    // ── JSON conversion ────────────────────────────────────

    /// Convert from serde_json::Value. Objects keep their key order.
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::None,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    // u64 beyond i64::MAX degrades to float
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(arr) => Value::new_list(arr.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::new_dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to serde_json::Value.
    ///
    /// Fails for values with no JSON form: functions, capability handles,
    /// non-finite floats, and containers nested deeper than [`MAX_NESTING`].
    pub fn to_json(&self) -> Result<JsonValue, String> {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> Result<JsonValue, String> {
        if depth > MAX_NESTING {
            return Err(format!(
                "value nesting exceeds {} levels (self-referencing container?)",
                MAX_NESTING
            ));
        }
        match self {
            Value::None => Ok(JsonValue::Null),
            Value::Bool(b) => Ok(JsonValue::Bool(*b)),
            Value::Int(i) => Ok(JsonValue::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| format!("float value {} is not JSON serializable", format_float(*f))),
            Value::Str(s) => Ok(JsonValue::String(s.clone())),
            Value::List(items) => items
                .borrow()
                .iter()
                .map(|v| v.to_json_at(depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            Value::Dict(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries.borrow().iter() {
                    map.insert(k.clone(), v.to_json_at(depth + 1)?);
                }
                Ok(JsonValue::Object(map))
            }
            other => Err(format!(
                "object of type '{}' is not JSON serializable",
                other.type_name()
            )),
        }
    }

    // ── Text forms ─────────────────────────────────────────

    /// The `repr()` form: strings quoted, containers expanded
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    fn write_repr(&self, out: &mut String, depth: usize) {
        if depth > MAX_NESTING {
            out.push_str("...");
            return;
        }
        match self {
            Value::Str(s) => write_quoted(out, s),
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, depth + 1);
                }
                out.push(']');
            }
            Value::Dict(entries) => {
                out.push('{');
                for (i, (k, v)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_quoted(out, k);
                    out.push_str(": ");
                    v.write_repr(out, depth + 1);
                }
                out.push('}');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    // ── Equality & ordering ────────────────────────────────

    /// Value equality (`==`). Numbers compare across int/float/bool.
    pub fn equals(&self, other: &Value) -> bool {
        self.equals_at(other, 0)
    }

    fn equals_at(&self, other: &Value, depth: usize) -> bool {
        if depth > MAX_NESTING {
            return false;
        }
        if let (Some(a), Some(b)) = (self.as_num(), other.as_num()) {
            return match (a, b) {
                (Num::Int(x), Num::Int(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            };
        }
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.equals_at(y, depth + 1))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.get(k).is_some_and(|w| v.equals_at(w, depth + 1))
                    })
            }
            _ => self.identical(other),
        }
    }

    /// Identity (`is`). Containers and functions compare by reference.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Service, Value::Service) => true,
            (Value::Group(a), Value::Group(b)) => a == b,
            (Value::Capability(a), Value::Capability(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`, `min`, `max` and `sorted`.
    /// Returns `None` when the two types are not orderable against each other.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        self.compare_at(other, 0)
    }

    fn compare_at(&self, other: &Value, depth: usize) -> Option<Ordering> {
        if depth > MAX_NESTING {
            return None;
        }
        if let (Some(a), Some(b)) = (self.as_num(), other.as_num()) {
            return match (a, b) {
                (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
                _ => Some(
                    a.as_f64()
                        .partial_cmp(&b.as_f64())
                        .unwrap_or(Ordering::Equal),
                ),
            };
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.equals_at(y, depth + 1) {
                        return x.compare_at(y, depth + 1);
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    // ── Arithmetic ─────────────────────────────────────────

    /// Apply a binary arithmetic operator
    pub fn binary_op(op: BinOp, left: &Value, right: &Value) -> Result<Value, String> {
        if let (Some(a), Some(b)) = (left.as_num(), right.as_num()) {
            return numeric_op(op, a, b);
        }

        match (op, left, right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                check_len(a.len().saturating_add(b.len()))?;
                Ok(Value::Str(format!("{}{}", a, b)))
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                check_len(items.len())?;
                Ok(Value::new_list(items))
            }
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s))
                if n.as_index().is_some() =>
            {
                let count = repeat_count(n, s.len())?;
                Ok(Value::Str(s.repeat(count)))
            }
            (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
                if n.as_index().is_some() =>
            {
                let items = items.borrow();
                let count = repeat_count(n, items.len())?;
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::new_list(out))
            }
            _ => Err(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            )),
        }
    }

    /// Unary minus
    pub fn negate(&self) -> Result<Value, String> {
        match self.as_num() {
            Some(Num::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| "integer overflow in unary -".to_string()),
            Some(Num::Float(f)) => Ok(Value::Float(-f)),
            None => Err(format!("bad operand type for unary -: '{}'", self.type_name())),
        }
    }

    /// Unary plus
    pub fn positive(&self) -> Result<Value, String> {
        match self.as_num() {
            Some(Num::Int(i)) => Ok(Value::Int(i)),
            Some(Num::Float(f)) => Ok(Value::Float(f)),
            None => Err(format!("bad operand type for unary +: '{}'", self.type_name())),
        }
    }

    // ── Containers ─────────────────────────────────────────

    /// Membership test (`in`)
    pub fn contains(&self, item: &Value) -> Result<bool, String> {
        match self {
            Value::Str(s) => match item {
                Value::Str(sub) => Ok(s.contains(sub.as_str())),
                other => Err(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )),
            },
            Value::List(items) => Ok(items.borrow().iter().any(|v| v.equals(item))),
            Value::Dict(entries) => match item {
                Value::Str(key) => Ok(entries.borrow().contains_key(key)),
                _ => Ok(false),
            },
            other => Err(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )),
        }
    }

    /// Snapshot the items an iteration visits. Dicts yield their keys,
    /// strings their characters. The loop body may mutate the source freely.
    pub fn iterate(&self) -> Result<Vec<Value>, String> {
        match self {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Dict(entries) => Ok(entries.borrow().keys().cloned().map(Value::Str).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => Err(format!("'{}' object is not iterable", other.type_name())),
        }
    }

    /// Length for `len()`
    pub fn len(&self) -> Result<usize, String> {
        match self {
            Value::Str(s) => Ok(s.chars().count()),
            Value::List(items) => Ok(items.borrow().len()),
            Value::Dict(entries) => Ok(entries.borrow().len()),
            other => Err(format!("object of type '{}' has no len()", other.type_name())),
        }
    }

    /// Subscript read (`x[i]`, `d[k]`)
    pub fn get_item(&self, index: &Value) -> Result<Value, String> {
        match self {
            Value::List(items) => {
                let items = items.borrow();
                let i = sequence_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = sequence_index(index, chars.len(), "string")?;
                Ok(Value::Str(chars[i].to_string()))
            }
            Value::Dict(entries) => {
                let key = dict_key(index)?;
                entries
                    .borrow()
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| format!("KeyError: {}", index.repr()))
            }
            other => Err(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            )),
        }
    }

    /// Subscript write (`x[i] = v`, `d[k] = v`)
    pub fn set_item(&self, index: &Value, value: Value) -> Result<(), String> {
        match self {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = sequence_index(index, items.len(), "list assignment")?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(entries) => {
                let key = dict_key(index)?;
                entries.borrow_mut().insert(key, value);
                Ok(())
            }
            other => Err(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            )),
        }
    }

    /// Slice read (`x[a:b]`), with out-of-range bounds clamped
    pub fn slice(&self, lower: Option<&Value>, upper: Option<&Value>) -> Result<Value, String> {
        match self {
            Value::List(items) => {
                let items = items.borrow();
                let (start, end) = slice_bounds(lower, upper, items.len())?;
                Ok(Value::new_list(items[start..end].to_vec()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_bounds(lower, upper, chars.len())?;
                Ok(Value::Str(chars[start..end].iter().collect()))
            }
            other => Err(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            )),
        }
    }
}

impl fmt::Display for Value {
    /// The `str()` form
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => f.write_str(&format_float(*v)),
            Value::Str(s) => f.write_str(s),
            Value::List(_) | Value::Dict(_) => f.write_str(&self.repr()),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Value::BoundMethod { receiver, name } => {
                write!(f, "<method {}.{}>", receiver.type_name(), name)
            }
            Value::Service => write!(f, "<neo_service>"),
            Value::Group(group) => write!(f, "<neo_service.{}>", group.name()),
            Value::Capability(op) => write!(f, "<capability {}>", op.qualified_name()),
        }
    }
}

/// Format a float the way scripting languages print them: always with a
/// decimal point or exponent, `inf` and `nan` spelled out.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let formatted = format!("{:e}", f);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => formatted,
        };
    }
    if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn write_quoted(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

fn numeric_op(op: BinOp, a: Num, b: Num) -> Result<Value, String> {
    let overflow = || format!("integer overflow in {}", op.symbol());
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match op {
            BinOp::Add => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
            BinOp::Div => {
                if y == 0 {
                    return Err("division by zero".into());
                }
                Ok(Value::Float(x as f64 / y as f64))
            }
            BinOp::FloorDiv => {
                if y == 0 {
                    return Err("integer division or modulo by zero".into());
                }
                let q = x.checked_div(y).ok_or_else(overflow)?;
                let adjust = (x % y != 0) && ((x < 0) != (y < 0));
                Ok(Value::Int(if adjust { q - 1 } else { q }))
            }
            BinOp::Mod => {
                if y == 0 {
                    return Err("integer division or modulo by zero".into());
                }
                let r = x.checked_rem(y).ok_or_else(overflow)?;
                Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
            }
            BinOp::Pow => {
                if y < 0 {
                    return Ok(Value::Float((x as f64).powf(y as f64)));
                }
                let exp = u32::try_from(y).map_err(|_| overflow())?;
                x.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
            }
        },
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            match op {
                BinOp::Add => Ok(Value::Float(x + y)),
                BinOp::Sub => Ok(Value::Float(x - y)),
                BinOp::Mul => Ok(Value::Float(x * y)),
                BinOp::Div => {
                    if y == 0.0 {
                        return Err("float division by zero".into());
                    }
                    Ok(Value::Float(x / y))
                }
                BinOp::FloorDiv => {
                    if y == 0.0 {
                        return Err("float floor division by zero".into());
                    }
                    Ok(Value::Float((x / y).floor()))
                }
                BinOp::Mod => {
                    if y == 0.0 {
                        return Err("float modulo by zero".into());
                    }
                    Ok(Value::Float(x - y * (x / y).floor()))
                }
                BinOp::Pow => {
                    if x == 0.0 && y < 0.0 {
                        return Err("0.0 cannot be raised to a negative power".into());
                    }
                    Ok(Value::Float(x.powf(y)))
                }
            }
        }
    }
}

fn check_len(len: usize) -> Result<(), String> {
    if len > MAX_SEQUENCE_LEN {
        Err(format!("sequence length {} exceeds limit of {}", len, MAX_SEQUENCE_LEN))
    } else {
        Ok(())
    }
}

fn repeat_count(n: &Value, unit: usize) -> Result<usize, String> {
    let count = usize::try_from(n.as_index().unwrap_or(0).max(0)).unwrap_or(0);
    check_len(unit.saturating_mul(count))?;
    Ok(count)
}

fn sequence_index(index: &Value, len: usize, what: &str) -> Result<usize, String> {
    let i = index.as_index().ok_or_else(|| {
        format!("{} indices must be integers, not {}", what, index.type_name())
    })?;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(format!("{} index out of range", what));
    }
    Ok(resolved as usize)
}

fn slice_bounds(lower: Option<&Value>, upper: Option<&Value>, len: usize) -> Result<(usize, usize), String> {
    let clamp = |bound: Option<&Value>, default: usize| -> Result<usize, String> {
        let Some(value) = bound else {
            return Ok(default);
        };
        if matches!(value, Value::None) {
            return Ok(default);
        }
        let i = value.as_index().ok_or_else(|| {
            format!("slice indices must be integers or None, not {}", value.type_name())
        })?;
        let resolved = if i < 0 { i + len as i64 } else { i };
        Ok(resolved.clamp(0, len as i64) as usize)
    };
    let start = clamp(lower, 0)?;
    let end = clamp(upper, len)?;
    Ok((start, end.max(start)))
}

/// Dict keys are always strings
pub fn dict_key(key: &Value) -> Result<String, String> {
    match key {
        Value::Str(s) => Ok(s.clone()),
        other => Err(format!("dict keys must be str, not '{}'", other.type_name())),
    }
}

// ── Call arguments ───────────────────────────────────────

/// Evaluated arguments of a call
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn positional(values: Vec<Value>) -> Self {
        CallArgs {
            positional: values,
            keyword: Vec::new(),
        }
    }

    /// Bind arguments to named parameters. The first `required` parameters
    /// must be supplied; the rest come back as `None` when omitted.
    pub fn bind(self, callee: &str, params: &[&str], required: usize) -> Result<Vec<Option<Value>>, String> {
        if self.positional.len() > params.len() {
            return Err(format!(
                "{}() takes {} {} but {} were given",
                callee,
                if required == params.len() {
                    params.len().to_string()
                } else {
                    format!("from {} to {}", required, params.len())
                },
                if params.len() == 1 { "argument" } else { "arguments" },
                self.positional.len()
            ));
        }

        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in slots.iter_mut().zip(self.positional) {
            *slot = Some(value);
        }
        for (name, value) in self.keyword {
            let index = params
                .iter()
                .position(|p| *p == name)
                .ok_or_else(|| format!("{}() got an unexpected keyword argument '{}'", callee, name))?;
            if slots[index].is_some() {
                return Err(format!("{}() got multiple values for argument '{}'", callee, name));
            }
            slots[index] = Some(value);
        }
        if let Some(missing) = params[..required]
            .iter()
            .zip(&slots)
            .find(|(_, slot)| slot.is_none())
            .map(|(name, _)| name)
        {
            return Err(format!("{}() missing required argument '{}'", callee, missing));
        }
        Ok(slots)
    }

    /// Shorthand for callables without keyword parameters
    pub fn exact_positional(self, callee: &str, min: usize, max: usize) -> Result<Vec<Value>, String> {
        if let Some((name, _)) = self.keyword.first() {
            return Err(format!("{}() got an unexpected keyword argument '{}'", callee, name));
        }
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max {
                format!("exactly {}", min)
            } else if max == usize::MAX {
                format!("at least {}", min)
            } else {
                format!("from {} to {}", min, max)
            };
            return Err(format!(
                "{}() takes {} {} ({} given)",
                callee,
                expected,
                if max == 1 { "argument" } else { "arguments" },
                n
            ));
        }
        Ok(self.positional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list(items: Vec<Value>) -> Value {
        Value::new_list(items)
    }

    #[test]
    fn test_value_from_json_primitives() {
        assert!(matches!(Value::from_json(&json!(null)), Value::None));
        assert!(matches!(Value::from_json(&json!(true)), Value::Bool(true)));
        assert!(matches!(Value::from_json(&json!(41)), Value::Int(41)));
        assert!(matches!(Value::from_json(&json!(2.5)), Value::Float(f) if f == 2.5));
        assert!(matches!(Value::from_json(&json!("hi")), Value::Str(ref s) if s == "hi"));
    }

    #[test]
    fn test_value_json_preserves_key_order() {
        let source = json!({"zeta": 1, "alpha": [1, 2.5, "x", null], "mid": {"b": true}});
        let value = Value::from_json(&source);
        let back = value.to_json().unwrap();
        assert_eq!(back, source);
        let keys: Vec<_> = back.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    fn self_containing_list() -> Value {
        let list = Value::new_list(Vec::new());
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        list
    }

    #[test]
    fn test_compare_self_containing_lists_is_bounded() {
        let a = self_containing_list();
        let b = self_containing_list();
        assert!(!a.equals(&b));
        assert_eq!(a.compare(&b), None);
        assert!(a.equals(&a));
        assert_eq!(
            Value::new_list(vec![Value::Int(1), a.clone()]).compare(&Value::new_list(vec![Value::Int(2), b])),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_to_json_rejects_unserializable() {
        let err = Value::Builtin(Builtin::Len).to_json().unwrap_err();
        assert!(err.contains("builtin_function"));
        let err = Value::Float(f64::INFINITY).to_json().unwrap_err();
        assert!(err.contains("inf"));
        let nested = list(vec![Value::Capability(CapabilityOp::StorageGet)]);
        assert!(nested.to_json().is_err());
    }

    #[test]
    fn test_to_json_self_reference_is_error() {
        let items = Rc::new(RefCell::new(Vec::new()));
        let value = Value::List(items.clone());
        items.borrow_mut().push(value.clone());
        assert!(value.to_json().unwrap_err().contains("nesting"));
        // Breaking the cycle lets the Rc drop
        items.borrow_mut().clear();
    }

    #[test]
    fn test_value_is_truthy() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Float(0.1).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(!list(vec![]).is_truthy());
        assert!(list(vec![Value::None]).is_truthy());
        assert!(Value::Service.is_truthy());
    }

    #[test]
    fn test_value_display_and_repr() {
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
        assert_eq!(Value::Float(1e20).to_string(), "1e+20");
        assert_eq!(Value::Float(1.5e-5).to_string(), "1.5e-05");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        let value = Value::from_json(&json!({"a": [1, "b", null]}));
        assert_eq!(value.to_string(), "{'a': [1, 'b', None]}");
    }

    #[test]
    fn test_numeric_equality_across_types() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::str("1").equals(&Value::Int(1)));
        let a = Value::from_json(&json!({"k": [1, 2]}));
        let b = Value::from_json(&json!({"k": [1, 2]}));
        assert!(a.equals(&b));
        assert!(!a.identical(&b));
        assert!(a.identical(&a.clone()));
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::str("b").compare(&Value::str("a")), Some(Ordering::Greater));
        let a = list(vec![Value::Int(1), Value::Int(2)]);
        let b = list(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(Value::str("a").compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_integer_arithmetic() {
        let op = |op, a, b| Value::binary_op(op, &Value::Int(a), &Value::Int(b));
        assert!(matches!(op(BinOp::Add, 41, 1), Ok(Value::Int(42))));
        assert!(matches!(op(BinOp::FloorDiv, -7, 2), Ok(Value::Int(-4))));
        assert!(matches!(op(BinOp::Mod, -7, 3), Ok(Value::Int(2))));
        assert!(matches!(op(BinOp::Mod, 7, -3), Ok(Value::Int(-2))));
        assert!(matches!(op(BinOp::Div, 7, 2), Ok(Value::Float(f)) if f == 3.5));
        assert!(matches!(op(BinOp::Pow, 2, 10), Ok(Value::Int(1024))));
        assert!(matches!(op(BinOp::Pow, 2, -1), Ok(Value::Float(f)) if f == 0.5));
    }

    #[test]
    fn test_integer_overflow_is_error() {
        let err = Value::binary_op(BinOp::Add, &Value::Int(i64::MAX), &Value::Int(1)).unwrap_err();
        assert!(err.contains("overflow"));
        assert!(Value::Int(i64::MIN).negate().is_err());
    }

    #[test]
    fn test_division_by_zero() {
        let err = Value::binary_op(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err, "division by zero");
        assert!(Value::binary_op(BinOp::Mod, &Value::Float(1.0), &Value::Int(0)).is_err());
    }

    #[test]
    fn test_sequence_operators() {
        let joined = Value::binary_op(BinOp::Add, &Value::str("ab"), &Value::str("cd")).unwrap();
        assert_eq!(joined.to_string(), "abcd");
        let repeated = Value::binary_op(BinOp::Mul, &Value::Int(3), &Value::str("x")).unwrap();
        assert_eq!(repeated.to_string(), "xxx");
        let a = list(vec![Value::Int(1)]);
        let b = list(vec![Value::Int(2)]);
        let sum = Value::binary_op(BinOp::Add, &a, &b).unwrap();
        assert_eq!(sum.repr(), "[1, 2]");
        assert_eq!(a.repr(), "[1]");
        let err = Value::binary_op(BinOp::Add, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err, "unsupported operand type(s) for +: 'str' and 'int'");
    }

    #[test]
    fn test_repetition_is_bounded() {
        let err = Value::binary_op(BinOp::Mul, &Value::str("xx"), &Value::Int(i64::MAX)).unwrap_err();
        assert!(err.contains("exceeds limit"));
    }

    #[test]
    fn test_subscripts_and_slices() {
        let xs = Value::from_json(&json!([10, 20, 30]));
        assert!(matches!(xs.get_item(&Value::Int(-1)), Ok(Value::Int(30))));
        assert!(xs.get_item(&Value::Int(3)).unwrap_err().contains("out of range"));
        assert_eq!(xs.slice(Some(&Value::Int(1)), None).unwrap().repr(), "[20, 30]");
        assert_eq!(xs.slice(None, Some(&Value::Int(-1))).unwrap().repr(), "[10, 20]");
        assert_eq!(xs.slice(Some(&Value::Int(5)), None).unwrap().repr(), "[]");
        assert_eq!(Value::str("hello").slice(Some(&Value::Int(1)), Some(&Value::Int(3))).unwrap().to_string(), "el");

        let d = Value::from_json(&json!({"a": 1}));
        d.set_item(&Value::str("b"), Value::Int(2)).unwrap();
        assert!(matches!(d.get_item(&Value::str("b")), Ok(Value::Int(2))));
        assert_eq!(d.get_item(&Value::str("zz")).unwrap_err(), "KeyError: 'zz'");
        assert!(d.set_item(&Value::Int(1), Value::None).is_err());
    }

    #[test]
    fn test_aliases_observe_mutation() {
        let a = Value::from_json(&json!([1]));
        let b = a.clone();
        b.set_item(&Value::Int(0), Value::Int(99)).unwrap();
        assert!(matches!(a.get_item(&Value::Int(0)), Ok(Value::Int(99))));
    }

    #[test]
    fn test_contains_and_iterate() {
        let d = Value::from_json(&json!({"x": 1, "y": 2}));
        assert!(d.contains(&Value::str("x")).unwrap());
        assert!(!d.contains(&Value::Int(1)).unwrap());
        assert!(Value::str("neo").contains(&Value::str("e")).unwrap());
        assert!(Value::Int(1).contains(&Value::Int(1)).is_err());
        let keys: Vec<String> = d.iterate().unwrap().iter().map(|v| v.to_string()).collect();
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[test]
    fn test_call_args_bind() {
        let args = CallArgs {
            positional: vec![Value::str("NEO")],
            keyword: vec![("period".into(), Value::str("7d"))],
        };
        let slots = args
            .bind("get_price_history", &["symbol", "base_currency", "period"], 1)
            .unwrap();
        assert!(slots[0].is_some());
        assert!(slots[1].is_none());
        assert!(matches!(&slots[2], Some(Value::Str(s)) if s == "7d"));
    }

    #[test]
    fn test_call_args_bind_errors() {
        let err = CallArgs::positional(vec![]).bind("get", &["key"], 1).unwrap_err();
        assert_eq!(err, "get() missing required argument 'key'");
        let err = CallArgs::positional(vec![Value::None, Value::None])
            .bind("get", &["key"], 1)
            .unwrap_err();
        assert!(err.contains("takes 1 argument but 2 were given"));
        let err = CallArgs {
            positional: vec![Value::None],
            keyword: vec![("key".into(), Value::None)],
        }
        .bind("get", &["key"], 1)
        .unwrap_err();
        assert!(err.contains("multiple values"));
    }
}

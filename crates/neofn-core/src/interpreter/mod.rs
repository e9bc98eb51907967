//! Tree-walking interpreter for guest modules
//!
//! One [`Interpreter`] serves one invocation. It owns the guest namespace
//! and the capability bundle, and keeps a frame stack so every failure
//! can report where it happened:
//!
//! ```text
//! line 3, in handler
//! line 7, in helper
//! ```
//!
//! Name resolution is local frame, then module namespace, then built-ins.
//! Functions see module globals but not the locals of enclosing
//! functions.

pub mod builtins;
pub mod methods;

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::capabilities::{CapabilityBundle, CapabilityError, CapabilityGroup};
use crate::diagnostics::DiagnosticSink;
use crate::error::{Failure, FailureKind};
use crate::parser::ast::*;
use crate::value::{dict_key, Builtin, CallArgs, GuestFunction, Value};

type Exec<T> = std::result::Result<T, Failure>;

/// How a statement finished
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct Frame {
    function: String,
    line: usize,
    /// `None` for the module frame, which writes to the namespace
    locals: Option<HashMap<String, Value>>,
}

pub(crate) const MODULE_FRAME: &str = "<module>";

pub struct Interpreter<'a> {
    bundle: CapabilityBundle<'a>,
    sink: &'a dyn DiagnosticSink,
    globals: IndexMap<String, Value>,
    frames: Vec<Frame>,
    call_depth: usize,
    max_call_depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(bundle: CapabilityBundle<'a>, sink: &'a dyn DiagnosticSink, max_call_depth: usize) -> Self {
        Interpreter {
            bundle,
            sink,
            globals: IndexMap::new(),
            frames: Vec::new(),
            call_depth: 0,
            max_call_depth,
        }
    }

    /// Bind a name in the module namespace
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Look up a name in the module namespace
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Run the module body.
    ///
    /// Guest runtime errors during loading are reported as `LoadError`;
    /// capability errors keep their kind.
    pub fn load(&mut self, module: &Module) -> Exec<()> {
        self.frames.push(Frame {
            function: MODULE_FRAME.to_string(),
            line: 1,
            locals: None,
        });
        let result = self.exec_block(&module.body);
        self.frames.pop();

        result.map(|_| ()).map_err(|mut failure| {
            if failure.kind == FailureKind::GuestRuntimeError {
                failure.kind = FailureKind::LoadError;
            }
            failure
        })
    }

    /// Call a guest value from the host
    pub fn call(&mut self, callee: &Value, args: CallArgs) -> Exec<Value> {
        self.call_value(callee, args)
    }

    // ── Failures ───────────────────────────────────────────

    fn trace(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|f| format!("line {}, in {}", f.line, f.function))
            .collect()
    }

    fn fail(&self, kind: FailureKind, message: impl Into<String>) -> Failure {
        Failure::new(kind, message).with_trace(self.trace())
    }

    fn runtime_error(&self, message: impl Into<String>) -> Failure {
        self.fail(FailureKind::GuestRuntimeError, message)
    }

    fn capability_error(&self, error: CapabilityError) -> Failure {
        self.fail(FailureKind::CapabilityError, error.to_string())
    }

    fn set_line(&mut self, line: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
    }

    // ── Names ──────────────────────────────────────────────

    fn lookup(&self, name: &str) -> Exec<Value> {
        if let Some(locals) = self.frames.last().and_then(|f| f.locals.as_ref()) {
            if let Some(value) = locals.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(builtin) = Builtin::lookup(name) {
            return Ok(Value::Builtin(builtin));
        }
        Err(self.runtime_error(format!("name '{}' is not defined", name)))
    }

    fn store(&mut self, name: &str, value: Value) {
        match self.frames.last_mut().and_then(|f| f.locals.as_mut()) {
            Some(locals) => {
                locals.insert(name.to_string(), value);
            }
            None => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Exec<()> {
        match target {
            Target::Name(name) => {
                self.store(name, value);
                Ok(())
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.assign_item(&object, &index, value)
            }
            Target::Unpack(names) => {
                let items = value.iterate().map_err(|e| self.runtime_error(e))?;
                if items.len() != names.len() {
                    return Err(self.runtime_error(if items.len() < names.len() {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            names.len(),
                            items.len()
                        )
                    } else {
                        format!("too many values to unpack (expected {})", names.len())
                    }));
                }
                for (name, item) in names.iter().zip(items) {
                    self.store(name, item);
                }
                Ok(())
            }
        }
    }

    fn assign_item(&self, object: &Value, index: &Value, value: Value) -> Exec<()> {
        if matches!(object, Value::Service | Value::Group(_)) {
            return Err(self.capability_error(CapabilityError::InvalidArgument {
                op: "neo_service",
                message: "capability handles are read-only".into(),
            }));
        }
        object
            .set_item(index, value)
            .map_err(|e| self.runtime_error(e))
    }

    // ── Statements ─────────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt]) -> Exec<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Exec<Flow> {
        self.set_line(stmt.line);
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                let mut defaults = Vec::with_capacity(def.params.len());
                for param in &def.params {
                    defaults.push(match &param.default {
                        Some(expr) => Some(self.eval(expr)?),
                        None => None,
                    });
                }
                let function = GuestFunction {
                    def: Rc::clone(def),
                    defaults,
                };
                self.store(&def.name, Value::Function(Rc::new(function)));
                Ok(Flow::Normal)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test)?.is_truthy() {
                        return self.exec_block(body);
                    }
                }
                self.exec_block(orelse)
            }
            StmtKind::While { test, body } => {
                loop {
                    self.set_line(stmt.line);
                    if !self.eval(test)?.is_truthy() {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For { target, iter, body } => {
                let items = self
                    .eval(iter)?
                    .iterate()
                    .map_err(|e| self.runtime_error(e))?;
                for item in items {
                    self.set_line(stmt.line);
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Pass => Ok(Flow::Normal),
            StmtKind::Raise(expr) => {
                let value = self.eval(expr)?;
                Err(self.runtime_error(value.to_string()))
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)?;
                Ok(Flow::Normal)
            }
            StmtKind::AugAssign { target, op, value } => {
                self.exec_aug_assign(target, *op, value)?;
                Ok(Flow::Normal)
            }
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Exec<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = self.apply_in_place(op, current, &rhs)?;
                self.store(name, updated);
                Ok(())
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                let current = object.get_item(&index).map_err(|e| self.runtime_error(e))?;
                let rhs = self.eval(value)?;
                let updated = self.apply_in_place(op, current, &rhs)?;
                self.assign_item(&object, &index, updated)
            }
            Target::Unpack(_) => Err(self.runtime_error("illegal expression for augmented assignment")),
        }
    }

    /// `+=` on a list extends it in place; everything else rebinds
    fn apply_in_place(&self, op: BinOp, current: Value, rhs: &Value) -> Exec<Value> {
        if let (BinOp::Add, Value::List(items)) = (op, &current) {
            let extra = rhs.iterate().map_err(|e| self.runtime_error(e))?;
            items.borrow_mut().extend(extra);
            return Ok(current);
        }
        Value::binary_op(op, &current, rhs).map_err(|e| self.runtime_error(e))
    }

    // ── Expressions ────────────────────────────────────────

    fn eval(&mut self, expr: &Expr) -> Exec<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::new_list(values))
            }
            Expr::Dict(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    let key = dict_key(&key).map_err(|e| self.runtime_error(e))?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::new_dict(map))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => value.negate().map_err(|e| self.runtime_error(e)),
                    UnaryOp::Pos => value.positive().map_err(|e| self.runtime_error(e)),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Value::binary_op(*op, &left, &right).map_err(|e| self.runtime_error(e))
            }
            Expr::BoolOp { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    BoolOp::And => !left.is_truthy(),
                    BoolOp::Or => left.is_truthy(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Compare { left, comparisons } => {
                let mut lhs = self.eval(left)?;
                for (op, right) in comparisons {
                    let rhs = self.eval(right)?;
                    if !self.compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(func)?;
                let mut call_args = CallArgs::default();
                for arg in args {
                    call_args.positional.push(self.eval(arg)?);
                }
                for (name, arg) in kwargs {
                    let value = self.eval(arg)?;
                    call_args.keyword.push((name.clone(), value));
                }
                self.call_value(&callee, call_args)
            }
            Expr::Attribute { object, name } => {
                let object = self.eval(object)?;
                self.attribute(object, name)
            }
            Expr::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                match (&object, &index) {
                    // neo_service["storage"]["get"] resolves like attribute access
                    (Value::Service | Value::Group(_), Value::Str(name)) => self.attribute(object.clone(), name),
                    _ => object.get_item(&index).map_err(|e| self.runtime_error(e)),
                }
            }
            Expr::Slice { object, lower, upper } => {
                let object = self.eval(object)?;
                let lower = match lower {
                    Some(expr) => Some(self.eval(expr)?),
                    None => None,
                };
                let upper = match upper {
                    Some(expr) => Some(self.eval(expr)?),
                    None => None,
                };
                object
                    .slice(lower.as_ref(), upper.as_ref())
                    .map_err(|e| self.runtime_error(e))
            }
        }
    }

    fn compare(&self, op: CmpOp, lhs: &Value, rhs: &Value) -> Exec<bool> {
        let ordering = |want: fn(std::cmp::Ordering) -> bool| -> Exec<bool> {
            lhs.compare(rhs).map(want).ok_or_else(|| {
                self.runtime_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    lhs.type_name(),
                    rhs.type_name()
                ))
            })
        };
        match op {
            CmpOp::Eq => Ok(lhs.equals(rhs)),
            CmpOp::NotEq => Ok(!lhs.equals(rhs)),
            CmpOp::Lt => ordering(|o| o.is_lt()),
            CmpOp::LtEq => ordering(|o| o.is_le()),
            CmpOp::Gt => ordering(|o| o.is_gt()),
            CmpOp::GtEq => ordering(|o| o.is_ge()),
            CmpOp::In => rhs.contains(lhs).map_err(|e| self.runtime_error(e)),
            CmpOp::NotIn => rhs
                .contains(lhs)
                .map(|found| !found)
                .map_err(|e| self.runtime_error(e)),
            CmpOp::Is => Ok(lhs.identical(rhs)),
            CmpOp::IsNot => Ok(!lhs.identical(rhs)),
        }
    }

    fn attribute(&self, object: Value, name: &str) -> Exec<Value> {
        match &object {
            Value::Service => CapabilityGroup::from_name(name).map(Value::Group).ok_or_else(|| {
                self.capability_error(CapabilityError::InvalidArgument {
                    op: "neo_service",
                    message: format!("no capability group named '{}'", name),
                })
            }),
            Value::Group(group) => group.operation(name).map(Value::Capability).ok_or_else(|| {
                self.capability_error(CapabilityError::InvalidArgument {
                    op: group.name(),
                    message: format!("no operation named '{}'", name),
                })
            }),
            _ => match methods::lookup(&object, name) {
                Some(method) => Ok(Value::BoundMethod {
                    receiver: Box::new(object),
                    name: method,
                }),
                None => Err(self.runtime_error(format!(
                    "'{}' object has no attribute '{}'",
                    object.type_name(),
                    name
                ))),
            },
        }
    }

    // ── Calls ──────────────────────────────────────────────

    fn call_value(&mut self, callee: &Value, args: CallArgs) -> Exec<Value> {
        match callee {
            Value::Function(function) => self.call_function(function, args),
            Value::Builtin(builtin) => {
                builtins::call(*builtin, args, self.sink).map_err(|e| self.runtime_error(e))
            }
            Value::BoundMethod { receiver, name } => {
                methods::call(receiver, *name, args).map_err(|e| self.runtime_error(e))
            }
            Value::Capability(op) => self
                .bundle
                .invoke(*op, args)
                .map_err(|e| self.capability_error(e)),
            other => Err(self.runtime_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, function: &Rc<GuestFunction>, args: CallArgs) -> Exec<Value> {
        if self.call_depth >= self.max_call_depth {
            return Err(self.runtime_error(format!(
                "maximum call depth exceeded ({})",
                self.max_call_depth
            )));
        }

        let def = &function.def;
        let names: Vec<&str> = def.params.iter().map(|p| p.name.as_str()).collect();
        let slots = args
            .bind(&def.name, &names, def.required_params())
            .map_err(|e| self.runtime_error(e))?;

        let mut locals = HashMap::with_capacity(slots.len());
        for ((name, slot), default) in names.iter().zip(slots).zip(&function.defaults) {
            let value = match (slot, default) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) => Value::None,
            };
            locals.insert((*name).to_string(), value);
        }

        self.frames.push(Frame {
            function: def.name.clone(),
            line: def.line,
            locals: Some(locals),
        });
        self.call_depth += 1;
        let result = self.exec_block(&def.body);
        self.call_depth -= 1;
        self.frames.pop();

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ServiceClients;
    use crate::diagnostics::BufferedSink;
    use crate::parser::parse_module;
    use crate::Context;
    use serde_json::{json, Value as JsonValue};

    /// Load `source`, call `handler(params)`, return the JSON result
    fn run(source: &str, params: JsonValue) -> Result<JsonValue, Failure> {
        run_with(source, params, &mut Context::default(), &BufferedSink::new(), 64)
    }

    fn run_with(
        source: &str,
        params: JsonValue,
        context: &mut Context,
        sink: &BufferedSink,
        depth: usize,
    ) -> Result<JsonValue, Failure> {
        let services = ServiceClients::simulated();
        let bundle = CapabilityBundle::build(context, &services);
        let mut interp = Interpreter::new(bundle, sink, depth);
        let params = Value::from_json(&params);
        interp.define("neo_service", Value::Service);
        interp.define("params", params.clone());
        interp.define("print", Value::Builtin(Builtin::Print));
        let module = parse_module(source).map_err(|e| Failure::new(FailureKind::LoadError, e.to_string()))?;
        interp.load(&module)?;
        let handler = interp
            .global("handler")
            .cloned()
            .ok_or_else(|| Failure::new(FailureKind::EntryPointError, "no handler"))?;
        let value = interp.call(&handler, CallArgs::positional(vec![params]))?;
        value
            .to_json()
            .map_err(|e| Failure::new(FailureKind::SerializationError, e))
    }

    fn run_err(source: &str) -> Failure {
        run(source, json!({})).unwrap_err()
    }

    #[test]
    fn test_arithmetic_and_params() {
        let result = run("def handler(params): return params[\"x\"] + 1", json!({"x": 41})).unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn test_control_flow() {
        let source = r#"
def handler(params):
    total = 0
    evens = []
    for n in range(10):
        if n == 7:
            break
        if n % 2 == 1:
            continue
        evens.append(n)
        total += n
    i = 0
    while True:
        i += 1
        if i >= 3:
            break
    return {"total": total, "evens": evens, "i": i}
"#;
        assert_eq!(run(source, json!({})).unwrap(), json!({"total": 12, "evens": [0, 2, 4, 6], "i": 3}));
    }

    #[test]
    fn test_functions_defaults_and_keywords() {
        let source = r#"
RATE = 2

def scale(x, factor=RATE):
    return x * factor

def handler(params):
    return [scale(3), scale(3, 10), scale(x=1, factor=5)]
"#;
        assert_eq!(run(source, json!({})).unwrap(), json!([6, 30, 5]));
    }

    #[test]
    fn test_recursion() {
        let source = r#"
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)

def handler(params):
    return fib(params["n"])
"#;
        assert_eq!(run(source, json!({"n": 15})).unwrap(), json!(610));
    }

    #[test]
    fn test_call_depth_limit() {
        let source = "def down(n):\n    return down(n + 1)\n\ndef handler(params):\n    return down(0)\n";
        let failure = run_with(source, json!({}), &mut Context::default(), &BufferedSink::new(), 16).unwrap_err();
        assert_eq!(failure.kind, FailureKind::GuestRuntimeError);
        assert!(failure.message.contains("maximum call depth exceeded (16)"));
        assert_eq!(failure.trace.len(), 16);
        assert_eq!(failure.trace[0], "line 5, in handler");
        assert_eq!(failure.trace[15], "line 2, in down");
    }

    #[test]
    fn test_aliasing_and_unpacking() {
        let source = r#"
def handler(params):
    a = [1]
    b = a
    b.append(2)
    a += [3]
    d = {"k": 1}
    d["k"] += 1
    out = []
    for key, value in d.items():
        out.append(key + "=" + str(value))
    x, y = 1, 2
    return {"a": a, "out": out, "swap": [y, x], "same": a is b}
"#;
        assert_eq!(
            run(source, json!({})).unwrap(),
            json!({"a": [1, 2, 3], "out": ["k=2"], "swap": [2, 1], "same": true})
        );
    }

    #[test]
    fn test_expressions() {
        let source = r#"
def handler(params):
    xs = params["xs"]
    return {
        "chain": 0 < len(xs) <= 3,
        "ternary": "big" if len(xs) > 2 else "small",
        "or": None or "fallback",
        "and": 0 and 1,
        "in": 2 in xs,
        "not_in": "z" not in {"a": 1},
        "slice": xs[1:],
        "neg": -xs[-1],
        "pow": 2 ** 3 ** 2,
        "div": 7 / 2,
        "floor": -7 // 2,
        "str": "NEO".lower() + "-" + str(1.5),
        "is_none": params.get("missing") is None,
    }
"#;
        let result = run(source, json!({"xs": [1, 2, 3]})).unwrap();
        assert_eq!(
            result,
            json!({
                "chain": true,
                "ternary": "big",
                "or": "fallback",
                "and": 0,
                "in": true,
                "not_in": true,
                "slice": [2, 3],
                "neg": -3,
                "pow": 512,
                "div": 3.5,
                "floor": -4,
                "str": "neo-1.5",
                "is_none": true,
            })
        );
    }

    #[test]
    fn test_raise_is_runtime_error_with_trace() {
        let source = "def check(x):\n    if x < 0:\n        raise \"negative: \" + str(x)\n\ndef handler(params):\n    check(-1)\n";
        let failure = run_err(source);
        assert_eq!(failure.kind, FailureKind::GuestRuntimeError);
        assert_eq!(failure.message, "negative: -1");
        assert_eq!(failure.trace, vec!["line 6, in handler", "line 3, in check"]);
    }

    #[test]
    fn test_name_error() {
        let failure = run_err("def handler(params):\n    return undefined_name\n");
        assert_eq!(failure.kind, FailureKind::GuestRuntimeError);
        assert_eq!(failure.message, "name 'undefined_name' is not defined");
    }

    #[test]
    fn test_module_level_error_is_load_error() {
        let failure = run_err("x = 1 / 0\ndef handler(params): return x\n");
        assert_eq!(failure.kind, FailureKind::LoadError);
        assert_eq!(failure.trace, vec!["line 1, in <module>"]);
    }

    #[test]
    fn test_module_level_capability_error_keeps_kind() {
        let failure = run_err("neo_service.storage.set(1, 2)\ndef handler(params): return 1\n");
        assert_eq!(failure.kind, FailureKind::CapabilityError);
    }

    #[test]
    fn test_capabilities_through_attributes_and_subscripts() {
        let source = r#"
def handler(params):
    neo_service.storage.set("count", 1)
    neo_service["storage"]["set"]("other", [1, 2])
    secret = neo_service.secrets.get("api_key")
    return {
        "count": neo_service.storage.get("count"),
        "deleted": neo_service.storage.delete("other"),
        "secret": secret,
        "missing": neo_service.secrets.get("nope"),
    }
"#;
        let mut context = Context::default().with_secret("api_key", json!("s3cr3t"));
        let result = run_with(source, json!({}), &mut context, &BufferedSink::new(), 64).unwrap();
        assert_eq!(
            result,
            json!({"count": 1, "deleted": true, "secret": "s3cr3t", "missing": null})
        );
        assert_eq!(context.storage.get("count"), Some(&json!(1)));
        assert!(!context.storage.contains_key("other"));
    }

    #[test]
    fn test_unknown_capability_is_capability_error() {
        let failure = run_err("def handler(params):\n    return neo_service.secrets.set(\"k\", 1)\n");
        assert_eq!(failure.kind, FailureKind::CapabilityError);
        assert_eq!(failure.message, "secrets: no operation named 'set'");
        let failure = run_err("def handler(params):\n    return neo_service.filesystem\n");
        assert_eq!(failure.kind, FailureKind::CapabilityError);
    }

    #[test]
    fn test_print_goes_to_sink() {
        let sink = BufferedSink::new();
        let source = "print(\"loading\")\ndef handler(params):\n    print(\"x is\", params[\"x\"])\n    return None\n";
        let result = run_with(source, json!({"x": 5}), &mut Context::default(), &sink, 64).unwrap();
        assert_eq!(result, JsonValue::Null);
        assert_eq!(sink.lines(), vec!["loading", "x is 5"]);
    }

    #[test]
    fn test_events_callback_recorded_not_invoked() {
        let sink = BufferedSink::new();
        let source = r#"
def on_transfer(event):
    print("called")

def handler(params):
    sub = neo_service.events.register("0xabc", "Transfer", on_transfer)
    return neo_service.events.unregister(sub)
"#;
        let result = run_with(source, json!({}), &mut Context::default(), &sink, 64).unwrap();
        assert_eq!(result, json!(true));
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_params_identity() {
        let source = "def handler(p):\n    return p is params\n";
        assert_eq!(run(source, json!({"a": 1})).unwrap(), json!(true));
    }

    #[test]
    fn test_builtins_are_shadowable() {
        let source = "def handler(params):\n    len = 3\n    return len\n";
        assert_eq!(run(source, json!({})).unwrap(), json!(3));
    }

    #[test]
    fn test_not_callable() {
        let failure = run_err("def handler(params):\n    x = 1\n    return x()\n");
        assert_eq!(failure.message, "'int' object is not callable");
        assert_eq!(failure.trace, vec!["line 3, in handler"]);
    }
}

//! Methods on built-in value types (`s.upper()`, `xs.append(x)`, `d.get(k)`)

use crate::value::{dict_key, CallArgs, Value};

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "startswith", "endswith", "split", "join",
    "replace",
];
const LIST_METHODS: &[&str] = &["append", "pop", "extend", "index", "insert"];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "pop", "update"];

/// Resolve `receiver.name` to a method name, if the type has one
pub fn lookup(receiver: &Value, name: &str) -> Option<&'static str> {
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => return None,
    };
    table.iter().copied().find(|m| *m == name)
}

/// Invoke a method previously resolved by [`lookup`]
pub fn call(receiver: &Value, name: &'static str, args: CallArgs) -> Result<Value, String> {
    match receiver {
        Value::Str(s) => str_method(s, name, args),
        Value::List(_) => list_method(receiver, name, args),
        Value::Dict(_) => dict_method(receiver, name, args),
        other => Err(format!("'{}' object has no attribute '{}'", other.type_name(), name)),
    }
}

// ── str ───────────────────────────────────────────────────

fn str_method(s: &str, name: &'static str, args: CallArgs) -> Result<Value, String> {
    match name {
        "upper" => {
            args.exact_positional(name, 0, 0)?;
            Ok(Value::str(s.to_uppercase()))
        }
        "lower" => {
            args.exact_positional(name, 0, 0)?;
            Ok(Value::str(s.to_lowercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            let args = args.exact_positional(name, 0, 1)?;
            let chars: Option<Vec<char>> = match args.first() {
                None | Some(Value::None) => None,
                Some(Value::Str(set)) => Some(set.chars().collect()),
                Some(other) => {
                    return Err(format!("{} arg must be None or str, not {}", name, other.type_name()))
                }
            };
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "lstrip" => s.trim_start_matches(matches),
                "rstrip" => s.trim_end_matches(matches),
                _ => s.trim_matches(matches),
            };
            Ok(Value::str(stripped))
        }
        "startswith" | "endswith" => {
            let args = args.exact_positional(name, 1, 1)?;
            let affix = expect_str(&args[0], name)?;
            Ok(Value::Bool(if name == "startswith" {
                s.starts_with(affix)
            } else {
                s.ends_with(affix)
            }))
        }
        "split" => {
            let args = args.exact_positional(name, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(Value::Str(sep)) if sep.is_empty() => return Err("empty separator".into()),
                Some(Value::Str(sep)) => s.split(sep.as_str()).map(Value::str).collect(),
                Some(other) => {
                    return Err(format!("must be str or None, not {}", other.type_name()))
                }
            };
            Ok(Value::new_list(parts))
        }
        "join" => {
            let args = args.exact_positional(name, 1, 1)?;
            let mut pieces = Vec::new();
            for (i, item) in args[0].iterate()?.iter().enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece.clone()),
                    other => {
                        return Err(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        ))
                    }
                }
            }
            Ok(Value::str(pieces.join(s)))
        }
        "replace" => {
            let args = args.exact_positional(name, 2, 2)?;
            let old = expect_str(&args[0], name)?;
            let new = expect_str(&args[1], name)?;
            Ok(Value::str(s.replace(old, new)))
        }
        _ => Err(format!("'str' object has no attribute '{}'", name)),
    }
}

fn expect_str<'v>(value: &'v Value, method: &str) -> Result<&'v str, String> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(format!("{}() argument must be str, not {}", method, other.type_name())),
    }
}

// ── list ──────────────────────────────────────────────────

fn list_method(receiver: &Value, name: &'static str, args: CallArgs) -> Result<Value, String> {
    let Value::List(items) = receiver else {
        return Err(format!("'{}' object has no attribute '{}'", receiver.type_name(), name));
    };
    match name {
        "append" => {
            let mut args = args.exact_positional(name, 1, 1)?;
            let value = args.pop().unwrap_or(Value::None);
            items.borrow_mut().push(value);
            Ok(Value::None)
        }
        "pop" => {
            let args = args.exact_positional(name, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err("pop from empty list".into());
            }
            let len = items.len() as i64;
            let index = match args.first() {
                None => len - 1,
                Some(v) => {
                    let i = v.as_index().ok_or_else(|| {
                        format!("'{}' object cannot be interpreted as an integer", v.type_name())
                    })?;
                    if i < 0 { i + len } else { i }
                }
            };
            if index < 0 || index >= len {
                return Err("pop index out of range".into());
            }
            Ok(items.remove(index as usize))
        }
        "extend" => {
            let args = args.exact_positional(name, 1, 1)?;
            // Snapshot first: `xs.extend(xs)` must not alias the borrow
            let extra = args[0].iterate()?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "index" => {
            let args = args.exact_positional(name, 1, 1)?;
            items
                .borrow()
                .iter()
                .position(|v| v.equals(&args[0]))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| format!("{} is not in list", args[0].repr()))
        }
        "insert" => {
            let mut args = args.exact_positional(name, 2, 2)?;
            let value = args.pop().unwrap_or(Value::None);
            let i = args[0].as_index().ok_or_else(|| {
                format!("'{}' object cannot be interpreted as an integer", args[0].type_name())
            })?;
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let at = if i < 0 { (i + len).max(0) } else { i.min(len) };
            items.insert(at as usize, value);
            Ok(Value::None)
        }
        _ => Err(format!("'list' object has no attribute '{}'", name)),
    }
}

// ── dict ──────────────────────────────────────────────────

fn dict_method(receiver: &Value, name: &'static str, args: CallArgs) -> Result<Value, String> {
    let Value::Dict(entries) = receiver else {
        return Err(format!("'{}' object has no attribute '{}'", receiver.type_name(), name));
    };
    match name {
        "get" => {
            let args = args.exact_positional(name, 1, 2)?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            match &args[0] {
                Value::Str(key) => Ok(entries.borrow().get(key).cloned().unwrap_or(default)),
                _ => Ok(default),
            }
        }
        "keys" => {
            args.exact_positional(name, 0, 0)?;
            Ok(Value::new_list(entries.borrow().keys().cloned().map(Value::Str).collect()))
        }
        "values" => {
            args.exact_positional(name, 0, 0)?;
            Ok(Value::new_list(entries.borrow().values().cloned().collect()))
        }
        "items" => {
            args.exact_positional(name, 0, 0)?;
            let pairs = entries
                .borrow()
                .iter()
                .map(|(k, v)| Value::new_list(vec![Value::Str(k.clone()), v.clone()]))
                .collect();
            Ok(Value::new_list(pairs))
        }
        "pop" => {
            let mut args = args.exact_positional(name, 1, 2)?;
            let default = if args.len() == 2 { args.pop() } else { None };
            let key = dict_key(&args[0])?;
            // shift_remove keeps the remaining keys in insertion order
            let removed = entries.borrow_mut().shift_remove(&key);
            match (removed, default) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(format!("KeyError: {}", args[0].repr())),
            }
        }
        "update" => {
            let CallArgs { positional, keyword } = args;
            if positional.len() > 1 {
                return Err(format!("update expected at most 1 argument, got {}", positional.len()));
            }
            let mut updates: Vec<(String, Value)> = Vec::new();
            match positional.first() {
                None => {}
                Some(Value::Dict(other)) => updates.extend(
                    other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())),
                ),
                Some(other) => {
                    return Err(format!("'{}' object is not a mapping", other.type_name()))
                }
            }
            updates.extend(keyword);
            let mut entries = entries.borrow_mut();
            for (k, v) in updates {
                entries.insert(k, v);
            }
            Ok(Value::None)
        }
        _ => Err(format!("'dict' object has no attribute '{}'", name)),
    }
}

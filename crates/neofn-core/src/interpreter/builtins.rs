//! Built-in functions available to guest code by bare name

use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::diagnostics::DiagnosticSink;
use crate::parser::ast::BinOp;
use crate::value::{dict_key, format_float, CallArgs, Value, MAX_SEQUENCE_LEN};
use crate::value::Builtin;

/// Invoke a built-in. Errors are guest runtime errors.
pub fn call(builtin: Builtin, args: CallArgs, sink: &dyn DiagnosticSink) -> Result<Value, String> {
    let name = builtin.name();
    match builtin {
        Builtin::Print => print(args, sink),
        Builtin::Len => {
            let [value] = one(args, name)?;
            let len = value.len()?;
            Ok(Value::Int(len as i64))
        }
        Builtin::Str => {
            let args = args.exact_positional(name, 0, 1)?;
            Ok(Value::Str(args.first().map(|v| v.to_string()).unwrap_or_default()))
        }
        Builtin::Int => {
            let args = args.exact_positional(name, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(value) => to_int(value),
            }
        }
        Builtin::Float => {
            let args = args.exact_positional(name, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(value) => to_float(value),
            }
        }
        Builtin::Bool => {
            let args = args.exact_positional(name, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
        }
        Builtin::Abs => {
            let [value] = one(args, name)?;
            match value {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| "integer overflow in abs()".to_string()),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(format!("bad operand type for abs(): '{}'", other.type_name())),
            }
        }
        Builtin::Min => extreme(args, name, Ordering::Less),
        Builtin::Max => extreme(args, name, Ordering::Greater),
        Builtin::Sum => {
            let slots = args.bind(name, &["iterable", "start"], 1)?;
            let mut slots = slots.into_iter();
            let items = slots.next().flatten().unwrap_or(Value::None).iterate()?;
            let mut total = slots.next().flatten().unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err("sum() can't sum strings (use ''.join(seq) instead)".into());
            }
            for item in &items {
                total = Value::binary_op(BinOp::Add, &total, item)?;
            }
            Ok(total)
        }
        Builtin::Range => range(args),
        Builtin::Sorted => {
            let slots = args.bind(name, &["iterable", "reverse"], 1)?;
            let mut slots = slots.into_iter();
            let mut items = slots.next().flatten().unwrap_or(Value::None).iterate()?;
            let reverse = slots.next().flatten().is_some_and(|v| v.is_truthy());
            sort_values(&mut items)?;
            if reverse {
                items.reverse();
            }
            Ok(Value::new_list(items))
        }
        Builtin::Round => round(args),
        Builtin::List => {
            let args = args.exact_positional(name, 0, 1)?;
            match args.first() {
                None => Ok(Value::new_list(Vec::new())),
                Some(value) => Ok(Value::new_list(value.iterate()?)),
            }
        }
        Builtin::Dict => dict(args),
        Builtin::Type => {
            let [value] = one(args, name)?;
            Ok(Value::str(value.type_name()))
        }
    }
}

fn one(args: CallArgs, name: &str) -> Result<[Value; 1], String> {
    let mut args = args.exact_positional(name, 1, 1)?;
    match args.pop() {
        Some(value) => Ok([value]),
        None => Err(format!("{}() takes exactly one argument (0 given)", name)),
    }
}

/// `print(*args, sep=" ")` forwards one line to the sink
fn print(args: CallArgs, sink: &dyn DiagnosticSink) -> Result<Value, String> {
    let mut sep = " ".to_string();
    for (key, value) in &args.keyword {
        match (key.as_str(), value) {
            ("sep", Value::Str(s)) => sep = s.clone(),
            ("sep", Value::None) => {}
            ("sep", other) => {
                return Err(format!("sep must be None or a string, not {}", other.type_name()))
            }
            (other, _) => return Err(format!("print() got an unexpected keyword argument '{}'", other)),
        }
    }
    let line = args
        .positional
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(&sep);
    sink.emit(&line);
    Ok(Value::None)
}

fn to_int(value: &Value) -> Result<Value, String> {
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => {
            let truncated = f.trunc();
            if !truncated.is_finite() || truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
                return Err(format!("cannot convert float {} to integer", format_float(*f)));
            }
            Ok(Value::Int(truncated as i64))
        }
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("invalid literal for int() with base 10: {}", value.repr())),
        other => Err(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        )),
    }
}

fn to_float(value: &Value) -> Result<Value, String> {
    match value {
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("could not convert string to float: {}", value.repr())),
        other => Err(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        )),
    }
}

/// `min`/`max` over either the arguments or a single iterable
fn extreme(args: CallArgs, name: &str, want: Ordering) -> Result<Value, String> {
    let args = args.exact_positional(name, 1, usize::MAX)?;
    let items = if args.len() == 1 {
        args[0].iterate()?
    } else {
        args
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| format!("{}() arg is an empty sequence", name))?;
    for item in iter {
        if compare(&item, &best)? == want {
            best = item;
        }
    }
    Ok(best)
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, String> {
    a.compare(b).ok_or_else(|| {
        format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        )
    })
}

/// Stable sort; the first incomparable pair aborts with an error
pub fn sort_values(items: &mut [Value]) -> Result<(), String> {
    let mut failure = None;
    items.sort_by(|a, b| match compare(a, b) {
        Ok(ordering) => ordering,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn range(args: CallArgs) -> Result<Value, String> {
    let args = args.exact_positional("range", 1, 3)?;
    let mut bounds = Vec::with_capacity(3);
    for arg in &args {
        bounds.push(arg.as_index().ok_or_else(|| {
            format!("'{}' object cannot be interpreted as an integer", arg.type_name())
        })?);
    }
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err("range expected at most 3 arguments".into()),
    };
    if step == 0 {
        return Err("range() arg 3 must not be zero".into());
    }

    let span = if step > 0 {
        i128::from(stop) - i128::from(start)
    } else {
        i128::from(start) - i128::from(stop)
    };
    let step_abs = i128::from(step).abs();
    let len = if span <= 0 { 0 } else { (span + step_abs - 1) / step_abs };
    if len > MAX_SEQUENCE_LEN as i128 {
        return Err(format!("range of {} items exceeds limit of {}", len, MAX_SEQUENCE_LEN));
    }

    let mut items = Vec::with_capacity(len as usize);
    let mut current = i128::from(start);
    for _ in 0..len {
        items.push(Value::Int(current as i64));
        current += i128::from(step);
    }
    Ok(Value::new_list(items))
}

/// `round(x)` rounds half to even and returns an int; `round(x, n)` keeps the type
fn round(args: CallArgs) -> Result<Value, String> {
    let slots = args.bind("round", &["number", "ndigits"], 1)?;
    let mut slots = slots.into_iter();
    let number = slots.next().flatten().unwrap_or(Value::None);
    let ndigits = match slots.next().flatten() {
        None | Some(Value::None) => None,
        Some(v) => Some(v.as_index().ok_or_else(|| {
            format!("'{}' object cannot be interpreted as an integer", v.type_name())
        })?),
    };

    match (number, ndigits) {
        (Value::Int(i), _) => Ok(Value::Int(i)),
        (Value::Bool(b), _) => Ok(Value::Int(i64::from(b))),
        (Value::Float(f), None) => to_int(&Value::Float(f.round_ties_even())),
        (Value::Float(f), Some(n)) => {
            let n = n.clamp(-308, 308) as i32;
            let factor = 10f64.powi(n);
            let scaled = f * factor;
            if !scaled.is_finite() {
                return Ok(Value::Float(f));
            }
            Ok(Value::Float(scaled.round_ties_even() / factor))
        }
        (other, _) => Err(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        )),
    }
}

/// `dict()`, `dict(mapping)`, `dict([[k, v], ...])`, plus keyword entries
fn dict(args: CallArgs) -> Result<Value, String> {
    let CallArgs { positional, keyword } = args;
    if positional.len() > 1 {
        return Err(format!("dict expected at most 1 argument, got {}", positional.len()));
    }

    let mut entries: IndexMap<String, Value> = IndexMap::new();
    match positional.into_iter().next() {
        None => {}
        Some(Value::Dict(source)) => {
            let snapshot: Vec<(String, Value)> = source
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            entries.extend(snapshot);
        }
        Some(other) => {
            for (i, pair) in other.iterate()?.into_iter().enumerate() {
                let items = pair.iterate().map_err(|_| {
                    format!("cannot convert dictionary update sequence element #{} to a sequence", i)
                })?;
                let [key, value]: [Value; 2] = items.try_into().map_err(|items: Vec<Value>| {
                    format!(
                        "dictionary update sequence element #{} has length {}; 2 is required",
                        i,
                        items.len()
                    )
                })?;
                entries.insert(dict_key(&key)?, value);
            }
        }
    }
    for (key, value) in keyword {
        entries.insert(key, value);
    }
    Ok(Value::new_dict(entries))
}

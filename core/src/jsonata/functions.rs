//! Builtin function library: string operations, aggregation, array
//! operations, and the higher-order functions taking lambdas.

use serde_json::Value;

use super::{
    eval::{
        as_f64, number_value, stringify, value_eq, value_truthy, Arg, Evaluator, Seq,
    },
    JsonataError,
};

pub(crate) fn call(
    evaluator: &mut Evaluator,
    name: &str,
    mut args: Vec<Arg>,
    ctx: Option<&Value>,
) -> Result<Seq, JsonataError> {
    match name {
        "uppercase" => string_fn(args, name, |s| s.to_uppercase()),
        "lowercase" => string_fn(args, name, |s| s.to_lowercase()),
        "trim" => string_fn(args, name, |s| {
            s.split_whitespace().collect::<Vec<_>>().join(" ")
        }),
        "length" => match take_optional_string(&mut args, name)? {
            None => Ok(Seq::Empty),
            Some(s) => Ok(Seq::One(number_value(s.chars().count() as f64))),
        },
        "substring" => substring(args),
        "split" => split(args),
        "join" => join(args),
        "replace" => replace(args),
        "match" => match_fn(args),
        "string" => match args.into_iter().next() {
            None | Some(Arg::Undefined) => Ok(Seq::Empty),
            Some(Arg::Value(v)) => Ok(Seq::One(Value::String(stringify(&v)))),
            Some(_) => Err(type_error(name, "expects a value")),
        },
        "number" => match args.into_iter().next() {
            None | Some(Arg::Undefined) => Ok(Seq::Empty),
            Some(Arg::Value(v)) => match &v {
                Value::Number(_) => Ok(Seq::One(v)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(|n| Seq::One(number_value(n)))
                    .map_err(|_| type_error(name, "cannot cast string to number")),
                _ => Err(type_error(name, "expects a number or numeric string")),
            },
            Some(_) => Err(type_error(name, "expects a value")),
        },
        "sum" => aggregate(args, name, |nums| Some(nums.iter().sum())),
        "average" => aggregate(args, name, |nums| {
            if nums.is_empty() {
                None
            } else {
                Some(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }),
        "min" => aggregate(args, name, |nums| {
            nums.iter().copied().reduce(f64::min)
        }),
        "max" => aggregate(args, name, |nums| {
            nums.iter().copied().reduce(f64::max)
        }),
        "count" => match args.into_iter().next() {
            None | Some(Arg::Undefined) => Ok(Seq::One(number_value(0.0))),
            Some(Arg::Value(Value::Array(items))) => {
                Ok(Seq::One(number_value(items.len() as f64)))
            }
            Some(Arg::Value(_)) => Ok(Seq::One(number_value(1.0))),
            Some(_) => Err(type_error(name, "expects a value")),
        },
        "exists" => match args.into_iter().next() {
            None | Some(Arg::Undefined) => Ok(Seq::One(Value::Bool(false))),
            Some(_) => Ok(Seq::One(Value::Bool(true))),
        },
        "append" => append(args),
        "distinct" => distinct(args),
        "map" => map_fn(evaluator, args, ctx),
        "filter" => filter_fn(evaluator, args, ctx),
        "reduce" => reduce_fn(evaluator, args, ctx),
        "sort" => sort_fn(evaluator, args, ctx),
        other => Err(JsonataError::Type(format!("unknown function ${other}"))),
    }
}

fn type_error(function: &str, message: &str) -> JsonataError {
    JsonataError::Type(format!("${function} {message}"))
}

fn take_optional_string(
    args: &mut Vec<Arg>,
    function: &str,
) -> Result<Option<String>, JsonataError> {
    if args.is_empty() {
        return Ok(None);
    }
    match args.remove(0) {
        Arg::Undefined => Ok(None),
        Arg::Value(Value::String(s)) => Ok(Some(s)),
        _ => Err(type_error(function, "expects a string")),
    }
}

fn string_fn(
    mut args: Vec<Arg>,
    name: &str,
    f: impl Fn(&str) -> String,
) -> Result<Seq, JsonataError> {
    match take_optional_string(&mut args, name)? {
        None => Ok(Seq::Empty),
        Some(s) => Ok(Seq::One(Value::String(f(&s)))),
    }
}

fn arg_number(arg: Option<Arg>, function: &str) -> Result<Option<f64>, JsonataError> {
    match arg {
        None | Some(Arg::Undefined) => Ok(None),
        Some(Arg::Value(v)) => as_f64(&v)
            .map(Some)
            .ok_or_else(|| type_error(function, "expects a number")),
        Some(_) => Err(type_error(function, "expects a number")),
    }
}

fn substring(mut args: Vec<Arg>) -> Result<Seq, JsonataError> {
    let Some(text) = take_optional_string(&mut args, "substring")? else {
        return Ok(Seq::Empty);
    };
    let mut rest = args.into_iter();
    let Some(start) = arg_number(rest.next(), "substring")? else {
        return Err(type_error("substring", "expects a start position"));
    };
    let length = arg_number(rest.next(), "substring")?;

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as f64;
    let begin = if start < 0.0 {
        (len + start).max(0.0)
    } else {
        start.min(len)
    } as usize;
    let end = match length {
        Some(l) if l >= 0.0 => (begin + l as usize).min(chars.len()),
        Some(_) => begin,
        None => chars.len(),
    };
    Ok(Seq::One(Value::String(chars[begin..end].iter().collect())))
}

fn split(mut args: Vec<Arg>) -> Result<Seq, JsonataError> {
    let Some(text) = take_optional_string(&mut args, "split")? else {
        return Ok(Seq::Empty);
    };
    let mut rest = args.into_iter();
    let parts: Vec<String> = match rest.next() {
        Some(Arg::Value(Value::String(sep))) => {
            if sep.is_empty() {
                text.chars().map(String::from).collect()
            } else {
                text.split(sep.as_str()).map(String::from).collect()
            }
        }
        Some(Arg::Regex(re)) => re.split(&text).map(String::from).collect(),
        _ => return Err(type_error("split", "expects a separator string or regex")),
    };
    let parts = match arg_number(rest.next(), "split")? {
        Some(limit) if limit >= 0.0 => parts.into_iter().take(limit as usize).collect(),
        _ => parts,
    };
    Ok(Seq::One(Value::Array(
        parts.into_iter().map(Value::String).collect(),
    )))
}

fn join(args: Vec<Arg>) -> Result<Seq, JsonataError> {
    let mut rest = args.into_iter();
    let items = match rest.next() {
        None | Some(Arg::Undefined) => return Ok(Seq::Empty),
        Some(Arg::Value(Value::Array(items))) => items,
        Some(Arg::Value(v @ Value::String(_))) => vec![v],
        Some(_) => return Err(type_error("join", "expects an array of strings")),
    };
    let separator = match rest.next() {
        None | Some(Arg::Undefined) => String::new(),
        Some(Arg::Value(Value::String(s))) => s,
        Some(_) => return Err(type_error("join", "expects a string separator")),
    };
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) => parts.push(s),
            _ => return Err(type_error("join", "expects an array of strings")),
        }
    }
    Ok(Seq::One(Value::String(parts.join(&separator))))
}

fn replace(mut args: Vec<Arg>) -> Result<Seq, JsonataError> {
    let Some(text) = take_optional_string(&mut args, "replace")? else {
        return Ok(Seq::Empty);
    };
    let mut rest = args.into_iter();
    let pattern = rest
        .next()
        .ok_or_else(|| type_error("replace", "expects a pattern"))?;
    let replacement = match rest.next() {
        Some(Arg::Value(Value::String(s))) => s,
        _ => return Err(type_error("replace", "expects a string replacement")),
    };
    let limit = arg_number(rest.next(), "replace")?;

    let replaced = match pattern {
        Arg::Value(Value::String(p)) => {
            if p.is_empty() {
                return Err(type_error("replace", "pattern cannot be empty"));
            }
            match limit {
                Some(l) if l >= 0.0 => text.replacen(p.as_str(), &replacement, l as usize),
                _ => text.replace(p.as_str(), &replacement),
            }
        }
        Arg::Regex(re) => match limit {
            Some(l) if l >= 0.0 => re
                .replacen(&text, l as usize, replacement.as_str())
                .into_owned(),
            _ => re.replace_all(&text, replacement.as_str()).into_owned(),
        },
        _ => return Err(type_error("replace", "expects a string or regex pattern")),
    };
    Ok(Seq::One(Value::String(replaced)))
}

fn match_fn(mut args: Vec<Arg>) -> Result<Seq, JsonataError> {
    let Some(text) = take_optional_string(&mut args, "match")? else {
        return Ok(Seq::Empty);
    };
    let mut rest = args.into_iter();
    let Some(Arg::Regex(re)) = rest.next() else {
        return Err(type_error("match", "expects a regex pattern"));
    };
    let limit = arg_number(rest.next(), "match")?;

    let mut matches = Vec::new();
    for captures in re.captures_iter(&text) {
        if let Some(limit) = limit {
            if matches.len() as f64 >= limit {
                break;
            }
        }
        let whole = captures.get(0).expect("group 0 always present");
        let index = text[..whole.start()].chars().count();
        let groups: Vec<Value> = captures
            .iter()
            .skip(1)
            .map(|g| {
                g.map(|m| Value::String(m.as_str().to_string()))
                    .unwrap_or(Value::Null)
            })
            .collect();
        matches.push(serde_json::json!({
            "match": whole.as_str(),
            "index": index,
            "groups": groups,
        }));
    }
    Ok(Seq::One(Value::Array(matches)))
}

fn numbers_arg(args: Vec<Arg>, function: &str) -> Result<Option<Vec<f64>>, JsonataError> {
    match args.into_iter().next() {
        None | Some(Arg::Undefined) => Ok(None),
        Some(Arg::Value(Value::Array(items))) => {
            let mut nums = Vec::with_capacity(items.len());
            for item in items {
                match as_f64(&item) {
                    Some(n) => nums.push(n),
                    None => return Err(type_error(function, "expects an array of numbers")),
                }
            }
            Ok(Some(nums))
        }
        Some(Arg::Value(v)) => match as_f64(&v) {
            Some(n) => Ok(Some(vec![n])),
            None => Err(type_error(function, "expects numbers")),
        },
        Some(_) => Err(type_error(function, "expects numbers")),
    }
}

fn aggregate(
    args: Vec<Arg>,
    name: &str,
    f: impl Fn(&[f64]) -> Option<f64>,
) -> Result<Seq, JsonataError> {
    match numbers_arg(args, name)? {
        None => Ok(Seq::Empty),
        Some(nums) => Ok(f(&nums)
            .map(|n| Seq::One(number_value(n)))
            .unwrap_or(Seq::Empty)),
    }
}

fn sequence_items(arg: Arg) -> Option<Vec<Value>> {
    match arg {
        Arg::Undefined => None,
        Arg::Value(Value::Array(items)) => Some(items),
        Arg::Value(v) => Some(vec![v]),
        _ => None,
    }
}

fn append(args: Vec<Arg>) -> Result<Seq, JsonataError> {
    let mut rest = args.into_iter();
    let first = rest.next().unwrap_or(Arg::Undefined);
    let second = rest.next().unwrap_or(Arg::Undefined);
    match (sequence_items(first), sequence_items(second)) {
        (None, None) => Ok(Seq::Empty),
        (Some(items), None) | (None, Some(items)) => Ok(Seq::One(Value::Array(items))),
        (Some(mut a), Some(b)) => {
            a.extend(b);
            Ok(Seq::One(Value::Array(a)))
        }
    }
}

fn distinct(args: Vec<Arg>) -> Result<Seq, JsonataError> {
    let Some(items) = args.into_iter().next().and_then(sequence_items) else {
        return Ok(Seq::Empty);
    };
    let mut unique: Vec<Value> = Vec::new();
    for item in items {
        if !unique.iter().any(|existing| value_eq(existing, &item)) {
            unique.push(item);
        }
    }
    Ok(Seq::One(Value::Array(unique)))
}

fn lambda_arg(arg: Option<Arg>, function: &str) -> Result<std::rc::Rc<super::eval::Lambda>, JsonataError> {
    match arg {
        Some(Arg::Lambda(l)) => Ok(l),
        _ => Err(type_error(function, "expects a function argument")),
    }
}

fn map_fn(
    evaluator: &mut Evaluator,
    args: Vec<Arg>,
    ctx: Option<&Value>,
) -> Result<Seq, JsonataError> {
    let mut rest = args.into_iter();
    let Some(items) = rest.next().and_then(sequence_items) else {
        return Ok(Seq::Empty);
    };
    let lambda = lambda_arg(rest.next(), "map")?;

    let whole = Value::Array(items.clone());
    let mut out = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let call_args = vec![
            Arg::Value(item),
            Arg::Value(number_value(index as f64)),
            Arg::Value(whole.clone()),
        ];
        match evaluator.invoke(&lambda, call_args, ctx)? {
            Seq::Empty => {}
            Seq::One(v) => out.push(v),
            Seq::Many(vs) => out.extend(vs),
        }
    }
    Ok(Seq::One(Value::Array(out)))
}

fn filter_fn(
    evaluator: &mut Evaluator,
    args: Vec<Arg>,
    ctx: Option<&Value>,
) -> Result<Seq, JsonataError> {
    let mut rest = args.into_iter();
    let Some(items) = rest.next().and_then(sequence_items) else {
        return Ok(Seq::Empty);
    };
    let lambda = lambda_arg(rest.next(), "filter")?;

    let whole = Value::Array(items.clone());
    let mut out = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let call_args = vec![
            Arg::Value(item.clone()),
            Arg::Value(number_value(index as f64)),
            Arg::Value(whole.clone()),
        ];
        let verdict = evaluator.invoke(&lambda, call_args, ctx)?;
        let keep = match verdict.into_value() {
            Some(v) => value_truthy(&v),
            None => false,
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Seq::One(Value::Array(out)))
}

fn reduce_fn(
    evaluator: &mut Evaluator,
    args: Vec<Arg>,
    ctx: Option<&Value>,
) -> Result<Seq, JsonataError> {
    let mut rest = args.into_iter();
    let Some(items) = rest.next().and_then(sequence_items) else {
        return Ok(Seq::Empty);
    };
    let lambda = lambda_arg(rest.next(), "reduce")?;
    let init = rest.next();

    let mut iter = items.into_iter();
    let mut accumulator: Option<Value> = match init {
        Some(Arg::Value(v)) => Some(v),
        Some(Arg::Undefined) | None => iter.next(),
        Some(_) => return Err(type_error("reduce", "expects a value as initial accumulator")),
    };

    for item in iter {
        let acc_arg = accumulator
            .take()
            .map(Arg::Value)
            .unwrap_or(Arg::Undefined);
        let result = evaluator.invoke(&lambda, vec![acc_arg, Arg::Value(item)], ctx)?;
        accumulator = result.into_value();
    }

    Ok(accumulator.map(Seq::One).unwrap_or(Seq::Empty))
}

fn sort_fn(
    evaluator: &mut Evaluator,
    args: Vec<Arg>,
    ctx: Option<&Value>,
) -> Result<Seq, JsonataError> {
    let mut rest = args.into_iter();
    let Some(items) = rest.next().and_then(sequence_items) else {
        return Ok(Seq::Empty);
    };

    match rest.next() {
        None | Some(Arg::Undefined) => {
            let mut sorted = items;
            if sorted.iter().all(|v| v.is_number()) {
                sorted.sort_by(|a, b| {
                    as_f64(a)
                        .partial_cmp(&as_f64(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            } else if sorted.iter().all(|v| v.is_string()) {
                sorted.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            } else {
                return Err(type_error(
                    "sort",
                    "default comparator requires all numbers or all strings",
                ));
            }
            Ok(Seq::One(Value::Array(sorted)))
        }
        Some(Arg::Lambda(lambda)) => {
            // Stable insertion sort; the comparator returns true when the
            // left operand must come after the right one.
            let mut sorted: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                let mut insert_at = sorted.len();
                for (i, existing) in sorted.iter().enumerate() {
                    let swap = evaluator.invoke(
                        &lambda,
                        vec![Arg::Value(existing.clone()), Arg::Value(item.clone())],
                        ctx,
                    )?;
                    let after = match swap.into_value() {
                        Some(Value::Bool(b)) => b,
                        _ => {
                            return Err(type_error(
                                "sort",
                                "comparator must return a boolean",
                            ))
                        }
                    };
                    if after {
                        insert_at = i;
                        break;
                    }
                }
                sorted.insert(insert_at, item);
            }
            Ok(Seq::One(Value::Array(sorted)))
        }
        Some(_) => Err(type_error("sort", "expects a comparator function")),
    }
}

//! Tree-walking evaluator.
//!
//! Values are `serde_json::Value`; the absent value ("undefined" in JSONata
//! terms) is modeled by [`Seq::Empty`] and never raises an error on its own.
//! Path steps operate on sequences: arrays flatten one level per step, empty
//! results vanish, and singleton sequences collapse to their value.

use std::{collections::HashMap, rc::Rc};

use regex::Regex;
use serde_json::{Map, Number, Value};

use super::{
    functions,
    parser::{BinOp, Expr},
    JsonataError,
};

/// Evaluation result: nothing, one value, or a sequence of values.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Seq {
    Empty,
    One(Value),
    Many(Vec<Value>),
}

impl Seq {
    pub fn from_vec(mut items: Vec<Value>) -> Seq {
        match items.len() {
            0 => Seq::Empty,
            1 => Seq::One(items.pop().expect("len checked")),
            _ => Seq::Many(items),
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Seq::Empty => None,
            Seq::One(v) => Some(v),
            Seq::Many(v) => Some(Value::Array(v)),
        }
    }

    /// Items a path step maps over: arrays and sequences spread, scalars are
    /// singleton.
    pub fn elements(self) -> Vec<Value> {
        match self {
            Seq::Empty => Vec::new(),
            Seq::One(Value::Array(items)) => items,
            Seq::One(v) => vec![v],
            Seq::Many(items) => items,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Binding {
    Value(Value),
    Lambda(Rc<Lambda>),
}

#[derive(Debug)]
pub(crate) struct Lambda {
    pub params: Vec<String>,
    pub body: Rc<Expr>,
    pub captured: Vec<HashMap<String, Binding>>,
}

/// An evaluated function argument.
pub(crate) enum Arg {
    Undefined,
    Value(Value),
    Lambda(Rc<Lambda>),
    Regex(Regex),
}

pub(crate) struct Evaluator {
    scopes: Vec<HashMap<String, Binding>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn evaluate(&mut self, expr: &Expr, ctx: Option<&Value>) -> Result<Seq, JsonataError> {
        match expr {
            Expr::Number(n) => Ok(Seq::One(number_value(*n))),
            Expr::Str(s) => Ok(Seq::One(Value::String(s.clone()))),
            Expr::Bool(b) => Ok(Seq::One(Value::Bool(*b))),
            Expr::Null => Ok(Seq::One(Value::Null)),
            Expr::Context => Ok(ctx.cloned().map(Seq::One).unwrap_or(Seq::Empty)),
            Expr::Var(name) => match self.lookup(name) {
                Some(Binding::Value(v)) => Ok(Seq::One(v)),
                Some(Binding::Lambda(_)) => Err(JsonataError::Type(format!(
                    "function ${name} used as a value"
                ))),
                None => Ok(Seq::Empty),
            },
            Expr::Name(name) => Ok(field_access(ctx, name)),
            Expr::Wildcard => Ok(wildcard(ctx)),
            Expr::Descend => {
                let mut out = Vec::new();
                if let Some(v) = ctx {
                    recurse_descendants(v, &mut out);
                }
                Ok(Seq::from_vec(out))
            }
            Expr::Path(lhs, rhs) => {
                let base = self.evaluate(lhs, ctx)?;
                let mut out = Vec::new();
                for item in base.elements() {
                    match self.evaluate(rhs, Some(&item))? {
                        Seq::Empty => {}
                        Seq::One(Value::Array(vs)) => out.extend(vs),
                        Seq::One(v) => out.push(v),
                        Seq::Many(vs) => out.extend(vs),
                    }
                }
                Ok(Seq::from_vec(out))
            }
            Expr::Filter(base, predicate) => {
                let items = self.evaluate(base, ctx)?.elements();
                let len = items.len();
                let mut out = Vec::new();
                for (index, item) in items.into_iter().enumerate() {
                    let keep = match self.evaluate(predicate, Some(&item))? {
                        Seq::One(Value::Number(n)) => index_matches(&n, index, len),
                        Seq::Many(vs) if vs.iter().all(|v| v.is_number()) => vs.iter().any(|v| {
                            match v {
                                Value::Number(n) => index_matches(n, index, len),
                                _ => false,
                            }
                        }),
                        other => seq_truthy(&other),
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Seq::from_vec(out))
            }
            Expr::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, ctx),
            Expr::Neg(operand) => match self.evaluate(operand, ctx)?.into_value() {
                None => Ok(Seq::Empty),
                Some(v) => {
                    let n = as_f64(&v).ok_or_else(|| {
                        JsonataError::Type("unary '-' expects a number".into())
                    })?;
                    Ok(Seq::One(number_value(-n)))
                }
            },
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let c = self.evaluate(cond, ctx)?;
                if seq_truthy(&c) {
                    self.evaluate(then, ctx)
                } else {
                    match otherwise {
                        Some(e) => self.evaluate(e, ctx),
                        None => Ok(Seq::Empty),
                    }
                }
            }
            Expr::Object(entries) => {
                let mut map = Map::new();
                for (key_expr, value_expr) in entries {
                    let key = match self.evaluate(key_expr, ctx)?.into_value() {
                        Some(Value::String(s)) => s,
                        Some(other) => stringify(&other),
                        None => {
                            return Err(JsonataError::Type(
                                "object key evaluated to nothing".into(),
                            ))
                        }
                    };
                    // Entries whose value is absent are omitted, not nulled.
                    if let Some(value) = self.evaluate(value_expr, ctx)?.into_value() {
                        map.insert(key, value);
                    }
                }
                Ok(Seq::One(Value::Object(map)))
            }
            Expr::Array(items) => {
                let mut out = Vec::new();
                for item in items {
                    match self.evaluate(item, ctx)? {
                        Seq::Empty => {}
                        Seq::One(v) => out.push(v),
                        Seq::Many(vs) => out.extend(vs),
                    }
                }
                Ok(Seq::One(Value::Array(out)))
            }
            Expr::Call { name, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.argument(arg, ctx)?);
                }
                if let Some(Binding::Lambda(lambda)) = self.lookup(name) {
                    return self.invoke(&lambda, evaluated, ctx);
                }
                functions::call(self, name, evaluated, ctx)
            }
            Expr::Lambda { .. } => Err(JsonataError::Type(
                "functions are only supported as arguments or variable bindings".into(),
            )),
            Expr::Bind { name, value } => {
                if let Expr::Lambda { params, body } = value.as_ref() {
                    let lambda = Rc::new(Lambda {
                        params: params.clone(),
                        body: Rc::clone(body),
                        captured: self.scopes.clone(),
                    });
                    self.bind(name.clone(), Binding::Lambda(lambda));
                    return Ok(Seq::Empty);
                }
                let result = self.evaluate(value, ctx)?;
                if let Some(v) = result.clone().into_value() {
                    self.bind(name.clone(), Binding::Value(v));
                }
                Ok(result)
            }
            Expr::Block(exprs) => {
                self.scopes.push(HashMap::new());
                let mut last = Seq::Empty;
                for expr in exprs {
                    match self.evaluate(expr, ctx) {
                        Ok(seq) => last = seq,
                        Err(e) => {
                            self.scopes.pop();
                            return Err(e);
                        }
                    }
                }
                self.scopes.pop();
                Ok(last)
            }
            Expr::Regex { .. } => Err(JsonataError::Type(
                "regex literals are only valid as function arguments".into(),
            )),
        }
    }

    fn argument(&mut self, expr: &Expr, ctx: Option<&Value>) -> Result<Arg, JsonataError> {
        match expr {
            Expr::Lambda { params, body } => Ok(Arg::Lambda(Rc::new(Lambda {
                params: params.clone(),
                body: Rc::clone(body),
                captured: self.scopes.clone(),
            }))),
            Expr::Regex {
                pattern,
                insensitive,
            } => {
                let source = if *insensitive {
                    format!("(?i){pattern}")
                } else {
                    pattern.clone()
                };
                let regex = Regex::new(&source)
                    .map_err(|e| JsonataError::Type(format!("invalid regex: {e}")))?;
                Ok(Arg::Regex(regex))
            }
            Expr::Var(name) => match self.lookup(name) {
                Some(Binding::Lambda(lambda)) => Ok(Arg::Lambda(lambda)),
                Some(Binding::Value(v)) => Ok(Arg::Value(v)),
                None => Ok(Arg::Undefined),
            },
            other => match self.evaluate(other, ctx)?.into_value() {
                Some(v) => Ok(Arg::Value(v)),
                None => Ok(Arg::Undefined),
            },
        }
    }

    pub(crate) fn invoke(
        &mut self,
        lambda: &Lambda,
        args: Vec<Arg>,
        ctx: Option<&Value>,
    ) -> Result<Seq, JsonataError> {
        let mut frame = HashMap::new();
        for (param, arg) in lambda.params.iter().zip(args) {
            match arg {
                Arg::Value(v) => {
                    frame.insert(param.clone(), Binding::Value(v));
                }
                Arg::Lambda(l) => {
                    frame.insert(param.clone(), Binding::Lambda(l));
                }
                Arg::Undefined => {}
                Arg::Regex(_) => {
                    return Err(JsonataError::Type(
                        "regex cannot be passed to a user function".into(),
                    ))
                }
            }
        }
        let mut env = lambda.captured.clone();
        env.push(frame);
        let saved = std::mem::replace(&mut self.scopes, env);
        let result = self.evaluate(&lambda.body, ctx);
        self.scopes = saved;
        result
    }

    fn binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        ctx: Option<&Value>,
    ) -> Result<Seq, JsonataError> {
        if matches!(op, BinOp::And | BinOp::Or) {
            let left = self.evaluate(lhs, ctx)?;
            let left_truthy = seq_truthy(&left);
            return match (op, left_truthy) {
                (BinOp::And, false) => Ok(Seq::One(Value::Bool(false))),
                (BinOp::Or, true) => Ok(Seq::One(Value::Bool(true))),
                _ => {
                    let right = self.evaluate(rhs, ctx)?;
                    Ok(Seq::One(Value::Bool(seq_truthy(&right))))
                }
            };
        }

        let left = self.evaluate(lhs, ctx)?.into_value();
        let right = self.evaluate(rhs, ctx)?.into_value();

        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let (Some(l), Some(r)) = (left, right) else {
                    return Ok(Seq::Empty);
                };
                let (a, b) = (numeric(&l, op)?, numeric(&r, op)?);
                let result = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    // IEEE semantics: x/0 is infinite, 0/0 is NaN; both
                    // materialize as null, the JSON rendition of non-finite.
                    BinOp::Div => a / b,
                    BinOp::Mod => a % b,
                    _ => unreachable!(),
                };
                Ok(Seq::One(number_value(result)))
            }
            BinOp::Concat => {
                let l = left.map(|v| stringify(&v)).unwrap_or_default();
                let r = right.map(|v| stringify(&v)).unwrap_or_default();
                Ok(Seq::One(Value::String(format!("{l}{r}"))))
            }
            BinOp::Eq => Ok(Seq::One(Value::Bool(match (left, right) {
                (Some(l), Some(r)) => value_eq(&l, &r),
                _ => false,
            }))),
            BinOp::Ne => Ok(Seq::One(Value::Bool(match (left, right) {
                (Some(l), Some(r)) => !value_eq(&l, &r),
                _ => false,
            }))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let (Some(l), Some(r)) = (left, right) else {
                    return Ok(Seq::Empty);
                };
                let ordering = compare(&l, &r)?;
                let keep = match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Le => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    BinOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                };
                Ok(Seq::One(Value::Bool(keep)))
            }
            BinOp::In => {
                let (Some(l), Some(r)) = (left, right) else {
                    return Ok(Seq::One(Value::Bool(false)));
                };
                let found = match &r {
                    Value::Array(items) => items.iter().any(|item| value_eq(&l, item)),
                    other => value_eq(&l, other),
                };
                Ok(Seq::One(Value::Bool(found)))
            }
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).cloned())
    }

    fn bind(&mut self, name: String, binding: Binding) {
        self.scopes
            .last_mut()
            .expect("at least one scope")
            .insert(name, binding);
    }
}

fn numeric(value: &Value, op: BinOp) -> Result<f64, JsonataError> {
    as_f64(value).ok_or_else(|| {
        JsonataError::Type(format!(
            "{op:?} expects numbers, got {}",
            type_name(value)
        ))
    })
}

fn index_matches(n: &Number, index: usize, len: usize) -> bool {
    let Some(raw) = n.as_f64() else {
        return false;
    };
    let wanted = raw.floor();
    let resolved = if wanted < 0.0 {
        len as f64 + wanted
    } else {
        wanted
    };
    resolved == index as f64
}

fn field_access(ctx: Option<&Value>, name: &str) -> Seq {
    match ctx {
        Some(Value::Object(map)) => map.get(name).cloned().map(Seq::One).unwrap_or(Seq::Empty),
        Some(Value::Array(items)) => {
            let mut out = Vec::new();
            for item in items {
                match field_access(Some(item), name) {
                    Seq::Empty => {}
                    Seq::One(Value::Array(vs)) => out.extend(vs),
                    Seq::One(v) => out.push(v),
                    Seq::Many(vs) => out.extend(vs),
                }
            }
            Seq::from_vec(out)
        }
        _ => Seq::Empty,
    }
}

fn wildcard(ctx: Option<&Value>) -> Seq {
    let mut out = Vec::new();
    match ctx {
        Some(Value::Object(map)) => {
            for value in map.values() {
                match value {
                    Value::Array(vs) => out.extend(vs.iter().cloned()),
                    v => out.push(v.clone()),
                }
            }
        }
        Some(Value::Array(items)) => out.extend(items.iter().cloned()),
        _ => {}
    }
    Seq::from_vec(out)
}

fn recurse_descendants(value: &Value, out: &mut Vec<Value>) {
    if !value.is_array() {
        out.push(value.clone());
    }
    match value {
        Value::Array(items) => {
            for item in items {
                recurse_descendants(item, out);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                recurse_descendants(v, out);
            }
        }
        _ => {}
    }
}

/// Number -> Value, preferring integer representation and falling back to
/// null for non-finite results (the JSON rendition of infinity and NaN).
pub(crate) fn number_value(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub(crate) fn seq_truthy(seq: &Seq) -> bool {
    match seq {
        Seq::Empty => false,
        Seq::One(v) => value_truthy(v),
        Seq::Many(vs) => vs.iter().any(value_truthy),
    }
}

pub(crate) fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| value_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| value_eq(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

pub(crate) fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, JsonataError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y)
                .ok_or_else(|| JsonataError::Type("cannot compare NaN".into()))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(JsonataError::Type(format!(
            "cannot compare {} with {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

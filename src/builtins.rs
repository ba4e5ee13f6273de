use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::interpreter::value::Value;

/// The native callables pre-bound in the root environment.
///
/// Dispatch lives in the evaluator (several builtins print, read input, call
/// user functions or drive generators); the pure computational bodies live
/// here. Builtins are deliberately lax about arguments: a missing or
/// wrongly-typed argument degrades to null/zero/empty rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Declare,
    Inquire,
    Measure,
    Span,
    Text,
    Number,
    Decimal,
    Boolean,
    Classify,
    Inscribe,
    Decipher,
    Chronicle,
    Exists,
    Abs,
    Sqrt,
    Min,
    Max,
    Random,
    Uppercase,
    Lowercase,
    Split,
    Join,
    Contains,
    Push,
    Reverse,
    Clock,
    Timestamp,
    Sleep,
    Terminate,
    Transform,
    Select,
    Fold,
    EncodeJson,
    DecodeJson,
    Proceed,
    Transmit,
    Receive,
    Disrupt,
    Resolve,
    Defer,
}

impl Builtin {
    /// Name → builtin bindings seeded into the root environment.
    /// `announce` is an alias of `declare`.
    pub fn bindings() -> &'static [(&'static str, Builtin)] {
        &[
            ("declare", Builtin::Declare),
            ("announce", Builtin::Declare),
            ("inquire", Builtin::Inquire),
            ("measure", Builtin::Measure),
            ("span", Builtin::Span),
            ("text", Builtin::Text),
            ("number", Builtin::Number),
            ("decimal", Builtin::Decimal),
            ("boolean", Builtin::Boolean),
            ("classify", Builtin::Classify),
            ("inscribe", Builtin::Inscribe),
            ("decipher", Builtin::Decipher),
            ("chronicle", Builtin::Chronicle),
            ("exists", Builtin::Exists),
            ("abs", Builtin::Abs),
            ("sqrt", Builtin::Sqrt),
            ("min", Builtin::Min),
            ("max", Builtin::Max),
            ("random", Builtin::Random),
            ("uppercase", Builtin::Uppercase),
            ("lowercase", Builtin::Lowercase),
            ("split", Builtin::Split),
            ("join", Builtin::Join),
            ("contains", Builtin::Contains),
            ("push", Builtin::Push),
            ("reverse", Builtin::Reverse),
            ("clock", Builtin::Clock),
            ("timestamp", Builtin::Timestamp),
            ("sleep", Builtin::Sleep),
            ("terminate", Builtin::Terminate),
            ("transform", Builtin::Transform),
            ("select", Builtin::Select),
            ("fold", Builtin::Fold),
            ("encode_json", Builtin::EncodeJson),
            ("decode_json", Builtin::DecodeJson),
            ("proceed", Builtin::Proceed),
            ("transmit", Builtin::Transmit),
            ("receive", Builtin::Receive),
            ("disrupt", Builtin::Disrupt),
            ("resolve", Builtin::Resolve),
            ("defer", Builtin::Defer),
        ]
    }
}

pub fn measure(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Str(s)) => Value::Int(s.len() as i64),
        Some(Value::List(items)) => Value::Int(items.len() as i64),
        Some(Value::Dict(pairs)) => Value::Int(pairs.len() as i64),
        _ => Value::Int(0),
    }
}

/// `span(end)`, `span(start, end)` or `span(start, end, step)` — an integer
/// range as a list, exclusive upper bound.
pub fn span(args: &[Value]) -> Value {
    let (start, end, step) = match args {
        [Value::Int(end)] => (0, *end, 1),
        [Value::Int(start), Value::Int(end)] => (*start, *end, 1),
        [Value::Int(start), Value::Int(end), Value::Int(step)] => (*start, *end, *step),
        _ => (0, 0, 1),
    };
    let mut items = Vec::new();
    if step != 0 {
        let mut i = start;
        while if step > 0 { i < end } else { i > end } {
            items.push(Value::Int(i));
            i += step;
        }
    }
    Value::List(items)
}

pub fn text(args: &[Value]) -> Value {
    match args.first() {
        Some(v) => Value::Str(v.raw_text()),
        None => Value::Str(String::new()),
    }
}

pub fn number(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Int(i)) => Value::Int(*i),
        Some(Value::Float(f)) => Value::Int(*f as i64),
        Some(Value::Str(s)) => Value::Int(leading_i64(s)),
        Some(Value::Bool(b)) => Value::Int(i64::from(*b)),
        _ => Value::Int(0),
    }
}

pub fn decimal(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Int(i)) => Value::Float(*i as f64),
        Some(Value::Float(f)) => Value::Float(*f),
        Some(Value::Str(s)) => Value::Float(s.trim().parse().unwrap_or(0.0)),
        _ => Value::Float(0.0),
    }
}

pub fn boolean(args: &[Value]) -> Value {
    Value::Bool(args.first().is_some_and(Value::is_truthy))
}

pub fn classify(args: &[Value]) -> Value {
    match args.first() {
        Some(v) => Value::Str(v.type_name().to_string()),
        None => Value::Str("void".to_string()),
    }
}

pub fn abs(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Int(i)) => Value::Int(i.wrapping_abs()),
        Some(Value::Float(f)) => Value::Float(f.abs()),
        _ => Value::Int(0),
    }
}

pub fn sqrt(args: &[Value]) -> Value {
    let v = match args.first() {
        Some(Value::Int(i)) => *i as f64,
        Some(Value::Float(f)) => *f,
        _ => 0.0,
    };
    Value::Float(v.sqrt())
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

pub fn min(args: &[Value]) -> Value {
    numeric_pick(args, |a, b| a < b)
}

pub fn max(args: &[Value]) -> Value {
    numeric_pick(args, |a, b| a > b)
}

fn numeric_pick(args: &[Value], keep_first: fn(f64, f64) -> bool) -> Value {
    let (Some(a), Some(b)) = (
        args.first().and_then(as_number),
        args.get(1).and_then(as_number),
    ) else {
        return Value::Null;
    };
    let picked = if keep_first(a, b) { a } else { b };
    let float_args = matches!(args.first(), Some(Value::Float(_)))
        || matches!(args.get(1), Some(Value::Float(_)));
    if float_args {
        Value::Float(picked)
    } else {
        Value::Int(picked as i64)
    }
}

/// `random()` → float in [0, 1); `random(n)` → int in [0, n);
/// `random(min, max)` → int in [min, max].
pub fn random(args: &[Value]) -> Value {
    let mut rng = rand::thread_rng();
    match args {
        [Value::Int(min), Value::Int(max), ..] if min <= max => {
            Value::Int(rng.gen_range(*min..=*max))
        }
        [Value::Int(n), ..] if *n > 0 => Value::Int(rng.gen_range(0..*n)),
        _ => Value::Float(rng.gen_range(0.0..1.0)),
    }
}

pub fn uppercase(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Str(s)) => Value::Str(s.to_uppercase()),
        _ => Value::Str(String::new()),
    }
}

pub fn lowercase(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Str(s)) => Value::Str(s.to_lowercase()),
        _ => Value::Str(String::new()),
    }
}

/// Split on the delimiter, dropping empty pieces.
pub fn split(args: &[Value]) -> Value {
    let (Some(Value::Str(s)), Some(Value::Str(delim))) = (args.first(), args.get(1)) else {
        return Value::List(Vec::new());
    };
    if delim.is_empty() {
        return Value::List(vec![Value::Str(s.clone())]);
    }
    Value::List(
        s.split(delim.as_str())
            .filter(|piece| !piece.is_empty())
            .map(|piece| Value::Str(piece.to_string()))
            .collect(),
    )
}

pub fn join(args: &[Value]) -> Value {
    let (Some(Value::List(items)), Some(Value::Str(delim))) = (args.first(), args.get(1)) else {
        return Value::Str(String::new());
    };
    Value::Str(
        items
            .iter()
            .map(Value::raw_text)
            .collect::<Vec<_>>()
            .join(delim),
    )
}

pub fn contains(args: &[Value]) -> Value {
    let found = match (args.first(), args.get(1)) {
        (Some(Value::Str(haystack)), Some(Value::Str(needle))) => haystack.contains(needle),
        (Some(Value::List(items)), Some(needle)) => items.iter().any(|item| item == needle),
        _ => false,
    };
    Value::Bool(found)
}

/// Returns the list with the value appended; the original binding is left
/// untouched (lists copy by value).
pub fn push(args: &[Value]) -> Value {
    let (Some(Value::List(items)), Some(value)) = (args.first(), args.get(1)) else {
        return Value::Null;
    };
    let mut items = items.clone();
    items.push(value.clone());
    Value::List(items)
}

pub fn reverse(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::List(items)) => Value::List(items.iter().rev().cloned().collect()),
        _ => Value::List(Vec::new()),
    }
}

pub fn clock() -> Value {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Value::Int(secs)
}

pub fn encode_json(args: &[Value]) -> Value {
    match args.first() {
        Some(v) => Value::Str(to_json(v).to_string()),
        None => Value::Null,
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Dict(pairs) => serde_json::Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
        // Opaque runtime objects have no JSON form.
        _ => serde_json::Value::Null,
    }
}

pub fn decode_json(args: &[Value]) -> Value {
    let Some(Value::Str(s)) = args.first() else {
        return Value::Null;
    };
    match serde_json::from_str::<serde_json::Value>(s) {
        Ok(parsed) => from_json(parsed),
        Err(_) => Value::Null,
    }
}

fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            Value::Dict(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

fn leading_i64(s: &str) -> i64 {
    let t = s.trim();
    let (sign, rest) = match t.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, t.strip_prefix('+').unwrap_or(t)),
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<i64>().map(|v| sign * v).unwrap_or(0)
}

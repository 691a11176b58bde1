//! Call tree to the JSON request shapes.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

use super::parser::{Call, Item, Node};
use crate::error::SyntaxIssue;

static PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*$").unwrap());
static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+$").unwrap());
static FLOAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?$").unwrap());

const COMPARISONS: &[&str] = &["gt", "gte", "lt", "lte", "e", "ne", "like", "nlike"];
const DATE_SHORTHANDS: &[&str] = &[
    "currentweek",
    "currentmonth",
    "currentyear",
    "lastweek",
    "lastmonth",
    "lastyear",
];
const OPTIONS: &[&str] = &["limit", "skip", "orderby", "search"];

/// Turns items into objects, collecting every issue on the way.
#[derive(Debug, Default)]
pub struct Interpreter {
    pub issues: Vec<SyntaxIssue>,
}

impl Interpreter {
    fn issue(&mut self, offset: usize, message: impl Into<String>) {
        self.issues.push(SyntaxIssue::new(offset, message));
    }

    /// Merge a comma-separated list into one object.
    pub fn list(&mut self, items: &[Item<'_>]) -> Map<String, Value> {
        let mut out = Map::new();
        for item in items {
            if let Some((offset, entry)) = self.item(item) {
                for (key, value) in entry {
                    merge(&mut out, key, value, offset, &mut self.issues);
                }
            }
        }
        out
    }

    fn item(&mut self, item: &[Node<'_>]) -> Option<(usize, Map<String, Value>)> {
        let (first, rest) = item.split_first()?;
        let entry = match first {
            Node::Word { text, offset } => {
                self.expect_end(rest);
                self.include(text, *offset)?
            }
            Node::Str { offset, .. } => {
                self.issue(*offset, "unexpected string");
                return None;
            }
            Node::Call(head) if head.chained => {
                self.issue(head.offset, format!("unexpected '.{}('", head.method));
                return None;
            }
            Node::Call(head) => match head.path {
                None => {
                    self.expect_end(rest);
                    self.function(head)?
                }
                Some(path) => {
                    let mut spec = Map::new();
                    self.apply(&mut spec, head);
                    for node in rest {
                        match node {
                            Node::Call(call) if call.chained => self.apply(&mut spec, call),
                            other => self.issue(other.offset(), "expected ','"),
                        }
                    }
                    nest(path, Value::Object(spec))
                }
            },
        };
        Some((first.offset(), entry))
    }

    fn expect_end(&mut self, rest: &[Node<'_>]) {
        if let Some(node) = rest.first() {
            self.issue(node.offset(), "expected ','");
        }
    }

    /// `name` includes, `-name` excludes.
    fn include(&mut self, text: &str, offset: usize) -> Option<Map<String, Value>> {
        let (path, flag) = match text.strip_prefix('-') {
            Some(path) => (path, 0),
            None => (text, 1),
        };
        if !PATH.is_match(path) {
            self.issue(offset, format!("unexpected '{}'", text));
            return None;
        }
        Some(nest(path, Value::from(flag)))
    }

    /// Calls without a path: logical forms and top-level options.
    fn function(&mut self, call: &Call<'_>) -> Option<Map<String, Value>> {
        let mut out = Map::new();
        match call.method {
            "and" | "or" | "nor" => {
                if call.args.is_empty() {
                    self.issue(
                        call.offset,
                        format!("'{}' expects at least one argument", call.method),
                    );
                    return None;
                }
                let parts = call
                    .args
                    .iter()
                    .filter_map(|item| self.item(item))
                    .map(|(_, entry)| Value::Object(entry))
                    .collect();
                out.insert(format!("${}", call.method), Value::Array(parts));
            }
            "not" => {
                let inner = self.list(&call.args);
                out.insert("$not".into(), Value::Object(inner));
            }
            "raw" => {
                out.insert("$raw".into(), Value::String(call.body.trim().to_string()));
            }
            method if OPTIONS.contains(&method) => {
                let (key, value) = self.option(call)?;
                let mut options = Map::new();
                options.insert(key, value);
                out.insert("$options".into(), Value::Object(options));
            }
            "" => {
                self.issue(call.offset, "unexpected '('");
                return None;
            }
            other => {
                self.issue(call.offset, format!("unknown function '{}'", other));
                return None;
            }
        }
        Some(out)
    }

    /// Apply one method of a path chain onto the path's spec object.
    fn apply(&mut self, spec: &mut Map<String, Value>, call: &Call<'_>) {
        let key = format!("${}", call.method);
        let value = match call.method {
            method if COMPARISONS.contains(&method) => self.literal_arg(call),
            "in" | "nin" => Some(Value::Array(
                call.args
                    .iter()
                    .filter_map(|item| self.literal_item(item))
                    .collect(),
            )),
            "not" | "where" => {
                if starts_with_call(call) {
                    Some(Value::Object(self.methods(&call.args)))
                } else {
                    self.literal_arg(call)
                }
            }
            "raw" => Some(Value::String(call.body.trim().to_string())),
            method if DATE_SHORTHANDS.contains(&method) => {
                self.no_args(call);
                Some(Value::Bool(true))
            }
            "filter" | "fields" => Some(Value::Object(self.list(&call.args))),
            "count" => {
                self.no_args(call);
                Some(Value::from(1))
            }
            "sum" | "avg" | "as" => self.name_arg(call).map(Value::String),
            method if OPTIONS.contains(&method) => {
                if let Some((key, value)) = self.option(call) {
                    let mut options = Map::new();
                    options.insert(key, value);
                    merge(
                        spec,
                        "$options".into(),
                        Value::Object(options),
                        call.offset,
                        &mut self.issues,
                    );
                }
                return;
            }
            "" => {
                self.issue(call.offset, "unexpected '('");
                None
            }
            other => {
                self.issue(call.offset, format!("unknown method '{}'", other));
                None
            }
        };
        if let Some(value) = value {
            merge(spec, key, value, call.offset, &mut self.issues);
        }
    }

    /// A chain of path-less methods, as inside `not(...)` and `where(...)`.
    fn methods(&mut self, items: &[Item<'_>]) -> Map<String, Value> {
        let mut spec = Map::new();
        for node in items.iter().flatten() {
            match node {
                Node::Call(call) if call.path.is_none() => self.apply(&mut spec, call),
                other => self.issue(other.offset(), "expected a method call"),
            }
        }
        spec
    }

    fn option(&mut self, call: &Call<'_>) -> Option<(String, Value)> {
        let value = match call.method {
            "limit" | "skip" => {
                let value = self.literal_arg(call)?;
                if value.as_u64().is_none() {
                    self.issue(
                        call.offset,
                        format!("'{}' expects a non-negative integer", call.method),
                    );
                    return None;
                }
                value
            }
            "orderby" => {
                let terms: Vec<Value> = call
                    .args
                    .iter()
                    .filter_map(|item| self.name_item(item, "orderby"))
                    .map(Value::String)
                    .collect();
                if terms.is_empty() {
                    self.issue(call.offset, "'orderby' expects at least one field");
                    return None;
                }
                Value::Array(terms)
            }
            _ => match self.literal_arg(call)? {
                Value::String(s) => Value::String(s),
                other => Value::String(other.to_string()),
            },
        };
        Some((call.method.to_string(), value))
    }

    fn literal_arg(&mut self, call: &Call<'_>) -> Option<Value> {
        match call.args.as_slice() {
            [] => {
                self.issue(call.offset, format!("'{}' expects an argument", call.method));
                None
            }
            [item] => match item.as_slice() {
                [Node::Str { value, .. }] => Some(Value::String(value.clone())),
                _ => Some(literal(call.body.trim())),
            },
            _ => {
                self.issue(call.offset, format!("'{}' expects one argument", call.method));
                None
            }
        }
    }

    fn literal_item(&mut self, item: &[Node<'_>]) -> Option<Value> {
        match item {
            [Node::Word { text, .. }] => Some(literal(text)),
            [Node::Str { value, .. }] => Some(Value::String(value.clone())),
            other => {
                let offset = other.first().map_or(0, Node::offset);
                self.issue(offset, "expected a literal");
                None
            }
        }
    }

    fn name_arg(&mut self, call: &Call<'_>) -> Option<String> {
        match call.args.as_slice() {
            [item] => self.name_item(item, call.method),
            _ => {
                self.issue(call.offset, format!("'{}' expects one name", call.method));
                None
            }
        }
    }

    fn name_item(&mut self, item: &[Node<'_>], method: &str) -> Option<String> {
        match item {
            [Node::Word { text, .. }] => Some(text.to_string()),
            [Node::Str { value, .. }] => Some(value.clone()),
            other => {
                let offset = other.first().map_or(0, Node::offset);
                self.issue(offset, format!("'{}' expects a name", method));
                None
            }
        }
    }

    fn no_args(&mut self, call: &Call<'_>) {
        if !call.args.is_empty() {
            self.issue(call.offset, format!("'{}' takes no arguments", call.method));
        }
    }
}

fn starts_with_call(call: &Call<'_>) -> bool {
    matches!(
        call.args.first().and_then(|item| item.first()),
        Some(Node::Call(_))
    )
}

/// `{a: {b: value}}` for `a.b`.
fn nest(path: &str, value: Value) -> Map<String, Value> {
    let mut segments = path.rsplit('.');
    let mut map = Map::new();
    map.insert(segments.next().unwrap_or(path).to_string(), value);
    for segment in segments {
        let mut outer = Map::new();
        outer.insert(segment.to_string(), Value::Object(map));
        map = outer;
    }
    map
}

/// Insert `key`, merging objects; any other collision is an issue.
fn merge(
    target: &mut Map<String, Value>,
    key: String,
    value: Value,
    offset: usize,
    issues: &mut Vec<SyntaxIssue>,
) {
    if let Some(existing) = target.get_mut(&key) {
        match (existing, value) {
            (Value::Object(existing), Value::Object(incoming)) => {
                for (k, v) in incoming {
                    merge(existing, k, v, offset, issues);
                }
            }
            _ => issues.push(SyntaxIssue::new(offset, format!("duplicate '{}'", key))),
        }
        return;
    }
    target.insert(key, value);
}

/// Numbers, booleans and `null`; everything else stays a string.
pub fn literal(text: &str) -> Value {
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ if INTEGER.is_match(text) => text
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| text.parse::<u64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(text.to_string())),
        _ if FLOAT.is_match(text) => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        _ => Value::String(text.to_string()),
    }
}

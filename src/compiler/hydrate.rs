//! Flat rows back into nested objects.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::backend::Row;

/// One requested output: the SQL output column and where it lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputColumn {
    /// Output alias in the statement (`t1$name`).
    pub column: String,
    /// Relation path of the owning object; empty for the root.
    pub path: String,
    pub field: String,
}

/// How to rebuild nested objects from one flat row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowShape {
    pub columns: Vec<OutputColumn>,
    /// `(to-one path, primary key column)`: a null key means no related row.
    pub nullable: Vec<(String, String)>,
}

impl RowShape {
    pub fn new(columns: Vec<OutputColumn>, nullable: Vec<(String, String)>) -> Self {
        Self { columns, nullable }
    }

    pub fn hydrate(&self, row: &Row) -> Value {
        let mut root = Map::new();
        for output in &self.columns {
            let value = row.get(&output.column).cloned().unwrap_or(Value::Null);
            if let Some(target) = object_at(&mut root, &output.path) {
                target.insert(output.field.clone(), value);
            }
        }
        for (path, pk) in &self.nullable {
            if row.get(pk).map_or(true, Value::is_null) {
                set_null(&mut root, path);
            }
        }
        Value::Object(root)
    }

    pub fn hydrate_all(&self, rows: &[Row]) -> Vec<Value> {
        rows.iter().map(|row| self.hydrate(row)).collect()
    }
}

/// Object at a dotted path, created on demand. `None` when a segment
/// already holds a non-object.
fn object_at<'a>(root: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Map<String, Value>> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in path.split('.') {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = slot.as_object_mut()?;
    }
    Some(current)
}

fn set_null(root: &mut Map<String, Value>, path: &str) {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (parent, last),
        None => ("", path),
    };
    let mut current = root;
    if !parent.is_empty() {
        for segment in parent.split('.') {
            match current.get_mut(segment).and_then(Value::as_object_mut) {
                Some(next) => current = next,
                None => return,
            }
        }
    }
    current.insert(last.to_string(), Value::Null);
}

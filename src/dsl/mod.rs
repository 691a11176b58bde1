//! Compact string grammar for filters and projections.
//!
//! The DSL produces exactly the JSON trees [`crate::request`] parses, so a
//! client can send `and(name.like(Paul),age.gt(10))` instead of building
//! `{"$and": [...]}` by hand.
//!
//! # Grammar
//!
//! ```text
//! list     := item ("," item)*
//! item     := "-"? path                      projection include / exclude
//!           | ("and" | "or" | "nor") "(" list ")"
//!           | "not" "(" list ")"
//!           | "raw" "(" text ")"
//!           | ("limit" | "skip" | "orderby" | "search") "(" args ")"
//!           | path "." method "(" args ")" ("." method "(" args ")")*
//! method   := gt | gte | lt | lte | e | ne | like | nlike     one literal
//!           | in | nin                                        literal list
//!           | not | where                                     method chain or literal
//!           | raw                                             verbatim text
//!           | currentweek | currentmonth | currentyear
//!           | lastweek | lastmonth | lastyear                 no argument
//!           | filter | fields                                 nested list
//!           | count | sum | avg | as                          aggregates
//!           | limit | skip | orderby | search                 relation options
//! ```
//!
//! Literals: integers and floats become numbers, `true`/`false`/`null`
//! their JSON values, quoted strings are unescaped. Anything else,
//! ISO dates included, is a plain string.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//!
//! let tree = relquery::dsl::parse("and(name.like(Paul),age.gt(10))").unwrap();
//! assert_eq!(
//!     tree,
//!     json!({"$and": [{"name": {"$like": "Paul"}}, {"age": {"$gt": 10}}]})
//! );
//! ```

mod interpret;
pub mod lexer;
pub mod parser;

pub use interpret::literal;

use serde_json::Value;
use tracing::trace;

use crate::error::{CompileResult, QueryError};

use interpret::Interpreter;

/// Parse DSL `text` into a filter or projection tree.
///
/// Every syntax problem found is reported in one `InvalidQuerySyntax`,
/// ordered by position.
pub fn parse(text: &str) -> CompileResult<Value> {
    let (tokens, mut issues) = lexer::tokenize(text);
    let items = parser::build(text, &tokens, &mut issues);

    let mut interpreter = Interpreter::default();
    let tree = interpreter.list(&items);
    issues.extend(interpreter.issues);

    if !issues.is_empty() {
        issues.sort_by_key(|issue| issue.offset);
        return Err(QueryError::InvalidQuerySyntax(issues));
    }
    trace!(tokens = tokens.len(), "dsl.parse");
    Ok(Value::Object(tree))
}

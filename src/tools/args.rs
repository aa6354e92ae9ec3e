//! Positional-or-keyword argument binding for host functions

use serde_json::{Map, Value};

use super::ToolError;

/// Arguments of one call from sandboxed code, as `f(*args, **kwargs)`.
///
/// A parameter is looked up by keyword first, then by position. JSON `null`
/// counts as absent so `f(x, None)` falls back to the default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: Map<String, Value>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>, keyword: Map<String, Value>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    pub fn positional<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self {
            positional: values.into_iter().collect(),
            keyword: Map::new(),
        }
    }

    pub fn with_keyword(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keyword.insert(name.into(), value);
        self
    }

    /// Parameter at `index`, or passed under any of `names`.
    pub fn get(&self, index: usize, names: &[&str]) -> Option<&Value> {
        names
            .iter()
            .find_map(|name| self.keyword.get(*name))
            .or_else(|| self.positional.get(index))
            .filter(|v| !v.is_null())
    }

    /// A text parameter; numbers and booleans are accepted and stringified.
    pub fn string(&self, index: usize, names: &[&'static str]) -> Result<Option<String>, ToolError> {
        match self.get(index, names) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
            Some(other) => Err(ToolError::InvalidArgument {
                name: first(names),
                reason: format!("must be a string, got {}", type_name(other)),
            }),
        }
    }

    pub fn required_string(&self, index: usize, names: &[&'static str]) -> Result<String, ToolError> {
        self.string(index, names)?
            .ok_or_else(|| ToolError::MissingArgument(first(names)))
    }

    /// An integer parameter; floats are truncated and numeric strings parsed.
    pub fn integer(&self, index: usize, names: &[&'static str]) -> Result<Option<i64>, ToolError> {
        let invalid = |reason: String| ToolError::InvalidArgument {
            name: first(names),
            reason,
        };
        match self.get(index, names) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Some)
                .ok_or_else(|| invalid(format!("is out of range: {}", n))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| invalid(format!("must be an integer, got {:?}", s))),
            Some(other) => Err(invalid(format!("must be an integer, got {}", type_name(other)))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

fn first(names: &[&'static str]) -> &'static str {
    names.first().copied().unwrap_or("argument")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "None",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keyword_wins_over_position() {
        let args = CallArgs::positional([json!("pos")]).with_keyword("query", json!("kw"));
        assert_eq!(args.string(0, &["query"]).unwrap().as_deref(), Some("kw"));
    }

    #[test]
    fn test_alias_lookup() {
        let args = CallArgs::positional([json!("q")]).with_keyword("knowledge_base", json!("papers"));
        assert_eq!(
            args.string(1, &["scope", "knowledge_base"]).unwrap().as_deref(),
            Some("papers")
        );
    }

    #[test]
    fn test_null_is_absent() {
        let args = CallArgs::positional([json!("q"), Value::Null]);
        assert_eq!(args.string(1, &["scope"]).unwrap(), None);
    }

    #[test]
    fn test_missing_required() {
        let err = CallArgs::default().required_string(0, &["query"]).unwrap_err();
        assert_eq!(err.to_string(), "missing required argument `query`");
    }

    #[test]
    fn test_integer_coercions() {
        let args = CallArgs::positional([json!(3.9), json!("12"), json!([1])]);
        assert_eq!(args.integer(0, &["a"]).unwrap(), Some(3));
        assert_eq!(args.integer(1, &["b"]).unwrap(), Some(12));
        assert!(args.integer(2, &["c"]).is_err());
    }

    #[test]
    fn test_string_rejects_dict() {
        let args = CallArgs::positional([json!({"a": 1})]);
        let err = args.string(0, &["query"]).unwrap_err();
        assert!(err.to_string().contains("dict"));
    }
}

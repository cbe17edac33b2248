//! Parsed record model

use std::sync::Arc;

/// One field of a parsed record.
///
/// `List` is a field that held sub-value delimiters only; `Nested` is a
/// multi-value field whose parts may each hold sub-values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
    Nested(Vec<Vec<String>>),
}

impl Value {
    /// Apply `f` to every leaf, keeping the shape. Stops at the first error.
    pub fn try_map_leaves<E>(
        self,
        mut f: impl FnMut(String) -> Result<String, E>,
    ) -> Result<Value, E> {
        Ok(match self {
            Value::Scalar(s) => Value::Scalar(f(s)?),
            Value::List(items) => {
                Value::List(items.into_iter().map(&mut f).collect::<Result<_, _>>()?)
            },
            Value::Nested(groups) => Value::Nested(
                groups
                    .into_iter()
                    .map(|group| group.into_iter().map(&mut f).collect::<Result<_, _>>())
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Leaves in order, flattening any nesting
    pub fn leaves(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            Value::Scalar(s) => Box::new(std::iter::once(s.as_str())),
            Value::List(items) => Box::new(items.iter().map(String::as_str)),
            Value::Nested(groups) => Box::new(groups.iter().flatten().map(String::as_str)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.leaves().all(str::is_empty)
    }
}

/// An ordered header -> value mapping for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    headers: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Headers are shared across every row of a file.
    ///
    /// `values` may be shorter than `headers` when a record has fewer fields.
    pub fn new(headers: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { headers, values }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.headers.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn get(&self, header: &str) -> Option<&Value> {
        self.iter().find(|(h, _)| *h == header).map(|(_, v)| v)
    }

    /// The first field, treated as the record identifier
    pub fn id(&self) -> Option<(&str, &Value)> {
        self.iter().next()
    }

    pub fn len(&self) -> usize {
        self.values.len().min(self.headers.len())
    }

    /// True when there are no fields or every field is blank
    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, v)| v.is_empty())
    }
}

//! Named per-field value transforms
//!
//! Folder configs refer to transforms by name (`handler.<field>=upper`). The
//! registry is built once at start-up and shared by every parser.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransformError(pub String);

pub type TransformFn = Arc<dyn Fn(&str) -> Result<String, TransformError> + Send + Sync>;

/// Name -> function map, optionally namespaced by a source location
#[derive(Clone, Default)]
pub struct TransformRegistry {
    global: HashMap<String, TransformFn>,
    by_source: HashMap<(String, String), TransformFn>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.global.keys().collect();
        names.sort();
        f.debug_struct("TransformRegistry")
            .field("transforms", &names)
            .field("sourced", &self.by_source.len())
            .finish()
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in transforms
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("upper", |s| Ok(s.to_uppercase()));
        registry.register("lower", |s| Ok(s.to_lowercase()));
        registry.register("trim", |s| Ok(s.trim().to_string()));
        registry.register("translit", |s| Ok(transliterate(s)));
        registry.register("amount_range", |s| Ok(amount_in_range(s)));
        registry.register("required", |s| {
            if s.trim().is_empty() {
                Err(TransformError("value is required".to_string()))
            } else {
                Ok(s.to_string())
            }
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&str) -> Result<String, TransformError> + Send + Sync + 'static,
    {
        self.global.insert(name.into(), Arc::new(f));
    }

    /// Register a transform only visible to configs naming `source`
    pub fn register_from<F>(&mut self, source: impl Into<String>, name: impl Into<String>, f: F)
    where
        F: Fn(&str) -> Result<String, TransformError> + Send + Sync + 'static,
    {
        self.by_source
            .insert((source.into(), name.into()), Arc::new(f));
    }

    /// Look up a transform; a source with no such entry falls back to the global name
    pub fn resolve(&self, name: &str, source: Option<&str>) -> Option<TransformFn> {
        if let Some(source) = source.filter(|s| !s.trim().is_empty()) {
            if let Some(f) = self.by_source.get(&(source.to_string(), name.to_string())) {
                return Some(f.clone());
            }
            warn!(transform = name, source, "Transform source not registered, using global transform");
        }
        self.global.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.global.contains_key(name)
    }
}

/// Cyrillic to upper-case Latin
fn transliterate(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.to_lowercase().chars() {
        let mapped = match c {
            'а' => "a",
            'б' => "b",
            'в' => "v",
            'г' => "g",
            'д' => "d",
            'е' | 'ё' | 'э' => "e",
            'ж' => "zh",
            'з' => "z",
            'и' => "i",
            'й' | 'ы' => "y",
            'к' => "k",
            'л' => "l",
            'м' => "m",
            'н' => "n",
            'о' => "o",
            'п' => "p",
            'р' => "r",
            'с' => "s",
            'т' => "t",
            'у' => "u",
            'ф' => "f",
            'х' => "h",
            'ц' => "ts",
            'ч' => "ch",
            'ш' => "sh",
            'щ' => "shch",
            'ь' | 'ъ' => "",
            'ю' => "yu",
            'я' => "ya",
            other => {
                out.push(other);
                continue;
            },
        };
        out.push_str(mapped);
    }
    out.to_uppercase()
}

const AMOUNT_MAX: f64 = 1_000_000.0;

/// Amounts outside 0..=1 000 000, or not numbers at all, become "0"
fn amount_in_range(s: &str) -> String {
    match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && (0.0..=AMOUNT_MAX).contains(&v) => format!("{v:?}"),
        _ => "0".to_string(),
    }
}

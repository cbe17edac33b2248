//! Per-folder parsing rules

use encoding_rs::Encoding;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use super::properties::{self, Properties};
use crate::error::{IngestError, Result};

pub const KEY_RECORD_DELIMITER: &str = "recordDelimiter";
pub const KEY_FIELD_DELIMITER: &str = "fieldDelimiter";
pub const KEY_MULTI_VALUE_DELIMITER: &str = "multiValueDelimiter";
pub const KEY_SUB_VALUE_DELIMITER: &str = "subValueDelimiter";
pub const KEY_FIRST_LINE_HEADER: &str = "isFirstLineHeader";
pub const KEY_HEADERS: &str = "headers";
pub const KEY_ENCODING: &str = "encoding";
pub const KEY_TABLE_VERSION: &str = "tableVersion";
pub const KEY_CONTROL: &str = "gtsControl";
pub const KEY_LOG_FILE_NAME: &str = "logFileName";
pub const KEY_FALLBACK_LOG_FILE_NAME: &str = "fallbackLogFileName";
pub const HANDLER_PREFIX: &str = "handler.";
pub const HANDLER_SOURCE_PREFIX: &str = "handlerSource.";

pub const DEFAULT_RECORD_DELIMITER: &str = "\n";
pub const DEFAULT_FIELD_DELIMITER: &str = ",";
pub const DEFAULT_ENCODING: &str = "UTF-8";
pub const DEFAULT_FALLBACK_LOG_FILE_NAME: &str = "fallback.log";

/// Processing mode passed through to the downstream consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    #[default]
    One,
    Two,
    Three,
    Four,
}

impl ControlMode {
    pub fn as_u8(self) -> u8 {
        match self {
            ControlMode::One => 1,
            ControlMode::Two => 2,
            ControlMode::Three => 3,
            ControlMode::Four => 4,
        }
    }
}

impl TryFrom<u8> for ControlMode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(ControlMode::One),
            2 => Ok(ControlMode::Two),
            3 => Ok(ControlMode::Three),
            4 => Ok(ControlMode::Four),
            other => Err(format!("{KEY_CONTROL} must be one of 1, 2, 3, 4; found {other}")),
        }
    }
}

/// Transform configured for one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSpec {
    pub name: String,
    pub source: Option<String>,
}

/// Immutable parsing rules for one folder
#[derive(Clone, PartialEq)]
pub struct FolderConfig {
    pub record_delimiter: String,
    pub field_delimiter: String,
    pub multi_value_delimiter: Option<String>,
    pub sub_value_delimiter: Option<String>,
    pub first_line_header: bool,
    /// Required when `first_line_header` is false
    pub headers: Vec<String>,
    pub encoding: &'static Encoding,
    /// Field name -> transform
    pub transforms: BTreeMap<String, TransformSpec>,
    pub table_version: String,
    pub control: ControlMode,
    pub log_file_name: String,
    pub fallback_log_file_name: String,
}

impl fmt::Debug for FolderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolderConfig")
            .field("record_delimiter", &self.record_delimiter)
            .field("field_delimiter", &self.field_delimiter)
            .field("multi_value_delimiter", &self.multi_value_delimiter)
            .field("sub_value_delimiter", &self.sub_value_delimiter)
            .field("first_line_header", &self.first_line_header)
            .field("headers", &self.headers)
            .field("encoding", &self.encoding.name())
            .field("transforms", &self.transforms)
            .field("table_version", &self.table_version)
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl FolderConfig {
    /// Read and validate a folder configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let folder = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self::from_properties(&properties::parse(&text), &folder)
            .map_err(|message| IngestError::config(path, message))
    }

    /// Build from parsed properties; `folder` names the default journal file
    pub fn from_properties(props: &Properties, folder: &str) -> std::result::Result<Self, String> {
        let get = |key: &str| props.get(key).map(String::as_str);

        let record_delimiter =
            unescape_delimiter(get(KEY_RECORD_DELIMITER).unwrap_or(DEFAULT_RECORD_DELIMITER));
        let field_delimiter =
            unescape_delimiter(get(KEY_FIELD_DELIMITER).unwrap_or(DEFAULT_FIELD_DELIMITER));
        let multi_value_delimiter = optional_delimiter(get(KEY_MULTI_VALUE_DELIMITER));
        let sub_value_delimiter = optional_delimiter(get(KEY_SUB_VALUE_DELIMITER));

        let first_line_header = get(KEY_FIRST_LINE_HEADER)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

        let headers: Vec<String> = get(KEY_HEADERS)
            .map(|h| {
                h.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let label = get(KEY_ENCODING).unwrap_or(DEFAULT_ENCODING).trim();
        let encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| format!("unknown {KEY_ENCODING} '{label}'"))?;
        if !encoding.is_ascii_compatible() {
            return Err(format!(
                "{KEY_ENCODING} '{}' is not supported, use an ASCII-compatible encoding",
                encoding.name()
            ));
        }

        let table_version = required(get(KEY_TABLE_VERSION), KEY_TABLE_VERSION)?;

        let control = match get(KEY_CONTROL).map(str::trim) {
            None => ControlMode::default(),
            Some(raw) => raw
                .parse::<u8>()
                .map_err(|_| format!("{KEY_CONTROL} must be an integer, found '{raw}'"))
                .and_then(ControlMode::try_from)?,
        };

        let log_file_name = match get(KEY_LOG_FILE_NAME) {
            Some(name) => required(Some(name), KEY_LOG_FILE_NAME)?,
            None => format!("{folder}.log"),
        };
        let fallback_log_file_name = match get(KEY_FALLBACK_LOG_FILE_NAME) {
            Some(name) => required(Some(name), KEY_FALLBACK_LOG_FILE_NAME)?,
            None => DEFAULT_FALLBACK_LOG_FILE_NAME.to_string(),
        };

        let mut transforms = BTreeMap::new();
        for (key, name) in props {
            let Some(field) = key.strip_prefix(HANDLER_PREFIX) else {
                continue;
            };
            let name = name.trim();
            if field.is_empty() || name.is_empty() {
                continue;
            }
            let source = props
                .get(&format!("{HANDLER_SOURCE_PREFIX}{field}"))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            transforms.insert(
                field.to_string(),
                TransformSpec {
                    name: name.to_string(),
                    source,
                },
            );
        }

        let config = Self {
            record_delimiter,
            field_delimiter,
            multi_value_delimiter,
            sub_value_delimiter,
            first_line_header,
            headers,
            encoding,
            transforms,
            table_version,
            control,
            log_file_name,
            fallback_log_file_name,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !self.first_line_header && self.headers.is_empty() {
            return Err(format!(
                "'{KEY_HEADERS}' must be set when {KEY_FIRST_LINE_HEADER}=false"
            ));
        }

        if self.record_delimiter.is_empty() || self.field_delimiter.is_empty() {
            return Err(format!(
                "'{KEY_RECORD_DELIMITER}' and '{KEY_FIELD_DELIMITER}' cannot be empty"
            ));
        }

        let delimiters: Vec<(&str, &str)> = [
            (KEY_RECORD_DELIMITER, Some(self.record_delimiter.as_str())),
            (KEY_FIELD_DELIMITER, Some(self.field_delimiter.as_str())),
            (KEY_MULTI_VALUE_DELIMITER, self.multi_value_delimiter.as_deref()),
            (KEY_SUB_VALUE_DELIMITER, self.sub_value_delimiter.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, d)| d.map(|d| (key, d)))
        .collect();

        for (key, d) in &delimiters {
            let (_, _, unmappable) = self.encoding.encode(d);
            if unmappable {
                return Err(format!(
                    "'{key}' cannot be represented in {}",
                    self.encoding.name()
                ));
            }
        }

        for (i, (key_a, a)) in delimiters.iter().enumerate() {
            for (key_b, b) in &delimiters[i + 1..] {
                if a == b {
                    return Err(format!("'{key_a}' and '{key_b}' must be different"));
                }
            }
        }

        Ok(())
    }

    pub fn control(&self) -> ControlMode {
        self.control
    }
}

fn required(value: Option<&str>, key: &str) -> std::result::Result<String, String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(format!("'{key}' must be set and non-empty")),
    }
}

fn optional_delimiter(value: Option<&str>) -> Option<String> {
    value.map(unescape_delimiter).filter(|d| !d.is_empty())
}

/// Delimiters written as a literal `\n`, `\r` or `\t` after properties
/// unescaping (e.g. `recordDelimiter=\\r\\n`) still mean the control characters.
fn unescape_delimiter(value: &str) -> String {
    value
        .replace("\\r", "\r")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}

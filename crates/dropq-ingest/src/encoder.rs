//! Row to wire message encoding
//!
//! `TABLE,TABLE/I/PROCESS,USER/PASSWORD,ID,FIELD=V,FIELD:N=V,FIELD:M:S=V,...`

use std::fmt::Write;

use crate::config::Credentials;
use crate::value::{Row, Value};

/// Encodes rows of one folder into messages
#[derive(Debug, Clone)]
pub struct MessageEncoder {
    prefix: String,
}

impl MessageEncoder {
    pub fn new(table_version: &str, credentials: &Credentials) -> Self {
        Self {
            prefix: format!(
                "{table},{table}/I/PROCESS,{user}/{password}",
                table = sanitize(table_version),
                user = sanitize(&credentials.user),
                password = sanitize(&credentials.password),
            ),
        }
    }

    /// One message per row; `None` for an empty row.
    ///
    /// The first field is the record identifier; the rest follow in header order.
    pub fn encode(&self, row: &Row) -> Option<String> {
        if row.is_empty() {
            return None;
        }

        let mut fields = row.iter();
        let (_, id) = fields.next()?;

        let mut message = self.prefix.clone();
        message.push(',');
        message.push_str(&sanitize(&id.leaves().collect::<Vec<_>>().join(" ")));

        for (name, value) in fields {
            append_field(&mut message, name, value);
        }
        Some(message)
    }
}

fn append_field(message: &mut String, name: &str, value: &Value) {
    match value {
        Value::Scalar(s) => {
            if !s.is_empty() {
                let _ = write!(message, ",{name}={}", sanitize(s));
            }
        },
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                let _ = write!(message, ",{name}:{}={}", i + 1, sanitize(item));
            }
        },
        Value::Nested(groups) => {
            for (m, group) in groups.iter().enumerate() {
                for (s, item) in group.iter().enumerate() {
                    let _ = write!(message, ",{name}:{}:{}={}", m + 1, s + 1, sanitize(item));
                }
            }
        },
    }
}

/// Commas would break the message framing
fn sanitize(value: &str) -> String {
    value.replace(',', " ")
}

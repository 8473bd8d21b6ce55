//! Parameter binding and audit rendering
//!
//! Statements are built with named tokens (`@param0_`, `@param1_`, ...). The
//! trailing underscore keeps `@param1_` from matching inside `@param10_`.
//! Tokens are substituted in a single scan of the statement text, so a bound
//! value that looks like a token is never substituted again:
//! - `driver_text` swaps tokens for the dialect's positional placeholders
//! - `deparameterize` swaps tokens for escaped literals, for logging only

use crate::dialect::SqlDialect;
use crate::security::escape_string_literal;
use crate::types::Value;

/// Prefix of every bound parameter name
pub const PARAMETER_PREFIX: &str = "param";

/// A value bound to a statement
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// Parameter name without the `@` sigil, e.g. `param0_`
    pub name: String,
    /// Bound value
    pub value: Value,
}

impl BoundParameter {
    /// Token as it appears in the statement text
    pub fn token(&self) -> String {
        format!("@{}", self.name)
    }
}

/// Statement text plus its ordered parameters, owned by one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesizedStatement {
    text: String,
    parameters: Vec<BoundParameter>,
}

impl SynthesizedStatement {
    /// Create an empty statement
    pub fn new() -> Self {
        Self::default()
    }

    /// Append SQL text
    pub fn push_sql(&mut self, sql: &str) {
        self.text.push_str(sql);
    }

    /// Bind a value and return its token for inline substitution.
    ///
    /// Arrays are bound as their compact JSON string.
    pub fn bind(&mut self, value: Value) -> String {
        let value = match value {
            Value::Array(_) => Value::String(value.to_json().to_string()),
            other => other,
        };
        let parameter = BoundParameter {
            name: format!("{}{}_", PARAMETER_PREFIX, self.parameters.len()),
            value,
        };
        let token = parameter.token();
        self.parameters.push(parameter);
        token
    }

    /// Statement text with named tokens
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bound parameters in binding order
    pub fn parameters(&self) -> &[BoundParameter] {
        &self.parameters
    }

    /// Bound values in binding order, as passed to the driver
    pub fn values(&self) -> Vec<Value> {
        self.parameters.iter().map(|p| p.value.clone()).collect()
    }

    /// Text with tokens replaced by the dialect's positional placeholders
    pub fn driver_text(&self, dialect: &dyn SqlDialect) -> String {
        self.substitute(|idx, _| dialect.placeholder(idx + 1))
    }

    /// Fully literal one-line rendering for audit logs. Never executed.
    pub fn deparameterize(&self) -> String {
        self.substitute(|_, p| render_literal(&p.value))
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Replace every bound token in one left-to-right pass over the text.
    /// Replacements are never rescanned.
    fn substitute(&self, mut render: impl FnMut(usize, &BoundParameter) -> String) -> String {
        let marker = format!("@{}", PARAMETER_PREFIX);
        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text.as_str();

        while let Some(pos) = rest.find(&marker) {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + marker.len()..];
            let digits = after.bytes().take_while(u8::is_ascii_digit).count();
            let bound = after[digits..]
                .starts_with('_')
                .then(|| after[..digits].parse::<usize>().ok())
                .flatten()
                .and_then(|idx| self.parameters.get(idx).map(|p| (idx, p)));

            match bound {
                Some((idx, parameter)) => {
                    out.push_str(&render(idx, parameter));
                    rest = &after[digits + 1..];
                }
                None => {
                    out.push_str(&marker);
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn render_literal(value: &Value) -> String {
    match value.as_string() {
        None => "NULL".to_string(),
        Some(s) if value.is_textual() => format!("'{}'", escape_string_literal(&s)),
        Some(s) => escape_string_literal(&s),
    }
}

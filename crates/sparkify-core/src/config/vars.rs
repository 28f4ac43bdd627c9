//! Environment variable interpolation for config files.
//!
//! Supported syntax:
//! - `$VAR` or `${VAR}` - substitute, error if unset
//! - `${VAR:-default}` - default when VAR is unset or empty
//! - `${VAR-default}` - default only when VAR is unset
//! - `$$` - literal `$`

use regex::{Captures, Regex};
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?: (?P<op>:?-) (?P<default>[^}]*) )?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("static interpolation pattern is valid")
});

/// Output of an interpolation pass.
#[derive(Debug)]
pub struct Interpolated {
    /// Text with every resolvable reference substituted.
    pub text: String,
    /// One message per unresolved or rejected reference.
    pub errors: Vec<String>,
}

impl Interpolated {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate against the process environment.
pub fn interpolate(input: &str) -> Interpolated {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Interpolate using `lookup` to resolve variable names.
///
/// All failures are collected so a config with several missing
/// variables reports them together.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Interpolated
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let whole = &caps[0];
            if caps.name("escape").is_some() {
                return "$".to_string();
            }

            let name = caps
                .name("braced")
                .or_else(|| caps.name("bare"))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let op = caps.name("op").map(|m| m.as_str());
            let default = caps.name("default").map(|m| m.as_str());

            match lookup(name) {
                Some(value) if value.contains(['\n', '\r']) => {
                    errors.push(format!(
                        "environment variable '{name}' contains newlines, which is not allowed"
                    ));
                    whole.to_string()
                }
                Some(value) if value.is_empty() && op == Some(":-") => {
                    default.unwrap_or_default().to_string()
                }
                Some(value) => value,
                None => match default {
                    Some(default) => default.to_string(),
                    None => {
                        errors.push(format!("environment variable '{name}' is not set"));
                        whole.to_string()
                    }
                },
            }
        })
        .into_owned();

    Interpolated { text, errors }
}

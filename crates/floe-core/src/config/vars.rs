//! Environment variable interpolation for config files.
//!
//! Credentials such as database URLs are never written into config files;
//! they are pulled from the environment at load time.
//!
//! Supported syntax:
//! - `$VAR` or `${VAR}`: the variable's value, an error if unset
//! - `${VAR:-default}`: `default` if VAR is unset or empty
//! - `${VAR-default}`: `default` only if VAR is unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use snafu::prelude::*;
use std::sync::LazyLock;

use crate::error::{ConfigError, EnvInterpolationSnafu};

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{ (?P<braced>[A-Za-z_][A-Za-z0-9_]*) (?: (?P<op>:?-) (?P<default>[^}]*) )? \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("static interpolation pattern")
});

/// Interpolate environment variables using the process environment.
///
/// Every missing variable is reported in one error.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Interpolate with a custom lookup, used by tests to avoid touching the
/// process environment.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut problems = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        if &caps[0] == "$$" {
            return "$".to_string();
        }

        let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
            return caps[0].to_string();
        };
        let name = name.as_str();
        let default = caps.name("default").map(|m| m.as_str());
        let empty_uses_default = caps.name("op").is_some_and(|op| op.as_str() == ":-");

        match lookup(name) {
            Some(value) if value.contains(['\n', '\r']) => {
                problems.push(format!("environment variable '{name}' contains newlines"));
                caps[0].to_string()
            }
            Some(value) if value.is_empty() && empty_uses_default => {
                default.unwrap_or_default().to_string()
            }
            Some(value) => value,
            None => match default {
                Some(default) => default.to_string(),
                None => {
                    problems.push(format!("environment variable '{name}' is not set"));
                    caps[0].to_string()
                }
            },
        }
    });

    ensure!(
        problems.is_empty(),
        EnvInterpolationSnafu {
            message: problems.join("\n"),
        }
    );
    Ok(text.into_owned())
}

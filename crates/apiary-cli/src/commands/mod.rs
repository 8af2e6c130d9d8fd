//! CLI commands

pub mod apply;
pub mod delete;
pub mod list;
pub mod operator;
pub mod plan;

use apiary_core::{Placeholders, PlanRequest};
use clap::Args;
use std::path::PathBuf;

use crate::context::Context;
use crate::error::{CliError, Result};

/// Alveolus selection shared by `apply`, `delete` and `plan`
#[derive(Args, Debug, Clone)]
pub struct Selection {
    /// Root alveolus; every discovered alveolus when omitted
    #[arg(short, long)]
    pub alveolus: Option<String>,

    /// Exact version of the root alveolus
    #[arg(long)]
    pub version: Option<String>,

    /// Bundle directory, or a directory of bundles (repeatable, first match wins)
    #[arg(short, long = "bundle")]
    pub bundles: Vec<PathBuf>,

    /// Set a placeholder (key=value)
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Descriptors to leave out (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,
}

impl Selection {
    /// Placeholder overrides from `--set`
    pub fn overrides(&self) -> Result<Placeholders> {
        parse_set_values(&self.set)
    }

    pub fn request(&self, ctx: &Context) -> Result<PlanRequest> {
        Ok(PlanRequest {
            alveolus: self.alveolus.clone(),
            version: self.version.clone(),
            overrides: self.overrides()?,
            excludes: self.exclude.clone(),
            environment: ctx.environment(),
        })
    }
}

/// Parse `key=value` pairs
pub fn parse_set_values(values: &[String]) -> Result<Placeholders> {
    values
        .iter()
        .map(|item| {
            item.split_once('=')
                .filter(|(key, _)| !key.trim().is_empty())
                .map(|(key, value)| (key.trim().to_string(), value.to_string()))
                .ok_or_else(|| CliError::usage(format!("--set expects key=value, got '{}'", item)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_values() {
        let parsed = parse_set_values(&["a=1".to_string(), "b=x=y".to_string()]).unwrap();
        assert_eq!(parsed["a"], "1");
        assert_eq!(parsed["b"], "x=y");
        assert!(parse_set_values(&["novalue".to_string()]).is_err());
        assert!(parse_set_values(&["=v".to_string()]).is_err());
    }
}

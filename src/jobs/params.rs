// Typed access to the opaque job config
//
// Missing keys and JSON null fall back to the default. Present values of the
// wrong type are an error rather than silently ignored.

use anyhow::{bail, Result};
use serde_json::Value;

use super::record::JobConfig;

pub trait ConfigExt {
    fn f64_or(&self, key: &str, default: f64) -> Result<f64>;
    fn usize_or(&self, key: &str, default: usize) -> Result<usize>;
    fn u64_or(&self, key: &str, default: u64) -> Result<u64>;
    fn bool_or(&self, key: &str, default: bool) -> Result<bool>;
    fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str>;
    fn string_list(&self, key: &str) -> Result<Option<Vec<String>>>;
}

fn present<'a>(config: &'a JobConfig, key: &str) -> Option<&'a Value> {
    config.get(key).filter(|v| !v.is_null())
}

impl ConfigExt for JobConfig {
    fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match present(self, key) {
            None => Ok(default),
            Some(v) => match v.as_f64() {
                Some(f) => Ok(f),
                None => bail!("config '{}' must be a number, got {}", key, v),
            },
        }
    }

    fn usize_or(&self, key: &str, default: usize) -> Result<usize> {
        Ok(self.u64_or(key, default as u64)? as usize)
    }

    fn u64_or(&self, key: &str, default: u64) -> Result<u64> {
        match present(self, key) {
            None => Ok(default),
            Some(v) => match v.as_u64() {
                Some(n) => Ok(n),
                None => bail!("config '{}' must be a non-negative integer, got {}", key, v),
            },
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match present(self, key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(v) => bail!("config '{}' must be a boolean, got {}", key, v),
        }
    }

    fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        match present(self, key) {
            None => Ok(default),
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(v) => bail!("config '{}' must be a string, got {}", key, v),
        }
    }

    fn string_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        match present(self, key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => bail!("config '{}' must contain only strings, got {}", key, other),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(v) => bail!("config '{}' must be a list of strings, got {}", key, v),
        }
    }
}

//! Cross-crate scenarios. Every scenario runs the real pipelines against the
//! in-memory control API and small shell scripts standing in for the daemon,
//! the report filter program and the API scan script.

pub mod support;

#[cfg(test)]
mod scenarios;

//! Pipeline configuration persistence.
//!
//! One directive per line, each consumed back through the `add` command:
//!
//! ```text
//! filter Deduplicate 0
//! transformer Deduplicate 0
//! storage Memory
//! sketch Matrix Memory
//! reporter JsonLines /var/log/provenance.jsonl
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use crate::error::{KernelError, Result};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Filter { name: String, index: usize },
    Transformer { name: String, index: usize },
    Storage { name: String, args: String },
    Sketch { name: String, storage: String },
    Reporter { name: String, args: String },
}

impl Directive {
    /// The control command that recreates this directive.
    pub fn to_command(&self) -> String {
        format!("add {}", self)
    }

    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (kind, rest) = split_word(line);
        let (name, rest) = split_word(rest);
        if name.is_empty() {
            return Err(KernelError::Config(format!("Missing class name in '{}'", line)));
        }
        let name = name.to_string();

        match kind.to_ascii_lowercase().as_str() {
            "filter" | "transformer" => {
                let index = rest.trim().parse::<usize>().map_err(|_| {
                    KernelError::Config(format!("Bad index in '{}'", line))
                })?;
                Ok(if kind.eq_ignore_ascii_case("filter") {
                    Directive::Filter { name, index }
                } else {
                    Directive::Transformer { name, index }
                })
            }
            "storage" => Ok(Directive::Storage {
                name,
                args: rest.trim().to_string(),
            }),
            "reporter" => Ok(Directive::Reporter {
                name,
                args: rest.trim().to_string(),
            }),
            "sketch" => Ok(Directive::Sketch {
                name,
                storage: rest.trim().to_string(),
            }),
            other => Err(KernelError::Config(format!("Unknown directive '{}'", other))),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = match self {
            Directive::Filter { name, index } => format!("filter {} {}", name, index),
            Directive::Transformer { name, index } => format!("transformer {} {}", name, index),
            Directive::Storage { name, args } => format!("storage {} {}", name, args),
            Directive::Sketch { name, storage } => format!("sketch {} {}", name, storage),
            Directive::Reporter { name, args } => format!("reporter {} {}", name, args),
        };
        f.write_str(line.trim_end())
    }
}

/// Split off the first whitespace-delimited word.
pub(crate) fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    }
}

/// An ordered list of pipeline directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    pub directives: Vec<Directive>,
}

impl PipelineConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let directives = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(Directive::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { directives })
    }

    pub fn to_text(&self) -> String {
        let mut text = format!("# saved {}\n", chrono::Local::now().to_rfc3339());
        for directive in &self.directives {
            text.push_str(&directive.to_string());
            text.push('\n');
        }
        text
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            KernelError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_text()).map_err(|e| {
            KernelError::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}

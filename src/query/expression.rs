//! Vertex expressions: `key:value AND key:value ...`
//!
//! Keys and values may be double-quoted to include spaces, colons or the word
//! `AND`; inside quotes `\"` and `\\` escape. An unquoted `*` in a value
//! matches any run of characters.

use crate::error::{KernelError, Result};
use crate::types::Vertex;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    key: String,
    pattern: Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    /// Literal segments separated by wildcards.
    Glob(Vec<String>),
}

impl Pattern {
    fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Exact(expected) => expected == value,
            Pattern::Glob(parts) => glob_match(parts, value),
        }
    }
}

fn glob_match(parts: &[String], value: &str) -> bool {
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return value.is_empty(),
    };
    let Some(mut remaining) = value.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part.as_str()) {
            Some(i) => remaining = &remaining[i + part.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last.as_str())
}

/// A conjunction of annotation constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexPredicate {
    clauses: Vec<Clause>,
}

impl VertexPredicate {
    pub fn parse(expression: &str) -> Result<Self> {
        let mut lexer = Lexer::new(expression);
        let mut clauses = Vec::new();
        loop {
            let key = lexer
                .word(true)?
                .ok_or_else(|| bad(expression, "expected key"))?;
            if !lexer.eat(':') {
                return Err(bad(expression, "expected ':' after key"));
            }
            let value = lexer
                .word(false)?
                .ok_or_else(|| bad(expression, "expected value"))?;
            clauses.push(Clause {
                key: key.text,
                pattern: value.into_pattern(),
            });

            lexer.skip_whitespace();
            if lexer.at_end() {
                break;
            }
            match lexer.word(true)? {
                Some(w) if !w.quoted && w.text.eq_ignore_ascii_case("AND") => {}
                _ => return Err(bad(expression, "expected AND")),
            }
        }
        Ok(Self { clauses })
    }

    /// Parse a terminating expression, where `null` or empty means none.
    pub fn parse_optional(expression: Option<&str>) -> Result<Option<Self>> {
        match expression.map(str::trim) {
            None | Some("") => Ok(None),
            Some(e) if e.eq_ignore_ascii_case("null") => Ok(None),
            Some(e) => Self::parse(e).map(Some),
        }
    }

    /// An expression matching exactly the annotations of `vertex`.
    pub fn expression_for(vertex: &Vertex) -> String {
        vertex
            .annotations()
            .iter()
            .map(|(k, v)| format!("{}:{}", quote(k), quote(v)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    pub fn matches(&self, vertex: &Vertex) -> bool {
        self.clauses.iter().all(|clause| {
            vertex
                .get(&clause.key)
                .is_some_and(|value| clause.pattern.matches(value))
        })
    }

    /// Match against a raw annotation map, as carried by edges.
    pub fn matches_annotations(&self, annotations: &std::collections::BTreeMap<String, String>) -> bool {
        self.clauses.iter().all(|clause| {
            annotations
                .get(&clause.key)
                .is_some_and(|value| clause.pattern.matches(value))
        })
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn bad(expression: &str, reason: &str) -> KernelError {
    KernelError::Query(format!("Bad expression '{}': {}", expression, reason))
}

struct Word {
    text: String,
    quoted: bool,
    /// Unquoted text split at wildcards.
    parts: Vec<String>,
}

impl Word {
    fn into_pattern(self) -> Pattern {
        if self.parts.len() > 1 {
            Pattern::Glob(self.parts)
        } else {
            Pattern::Exact(self.text)
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    /// Read a quoted string or a bare word. Keys stop at `:`.
    fn word(&mut self, is_key: bool) -> Result<Option<Word>> {
        self.skip_whitespace();
        if self.eat('"') {
            let mut text = String::new();
            loop {
                match self.chars.next() {
                    Some('\\') => match self.chars.next() {
                        Some(c) => text.push(c),
                        None => return Err(KernelError::Query("Unterminated escape".into())),
                    },
                    Some('"') => break,
                    Some(c) => text.push(c),
                    None => return Err(KernelError::Query("Unterminated quote".into())),
                }
            }
            let parts = vec![text.clone()];
            return Ok(Some(Word {
                text,
                quoted: true,
                parts,
            }));
        }

        let mut text = String::new();
        let mut parts = vec![String::new()];
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || (is_key && c == ':') {
                break;
            }
            self.chars.next();
            text.push(c);
            if c == '*' && !is_key {
                parts.push(String::new());
            } else if let Some(last) = parts.last_mut() {
                last.push(c);
            }
        }
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Word {
                text,
                quoted: false,
                parts,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process() -> Vertex {
        Vertex::new()
            .with("type", "Process")
            .with("pid", "10")
            .with("name", "bash shell")
    }

    #[test]
    fn test_single_clause() {
        let p = VertexPredicate::parse("type:Process").unwrap();
        assert!(p.matches(&process()));
        assert!(!p.matches(&Vertex::new().with("type", "Artifact")));
    }

    #[test]
    fn test_conjunction_and_quotes() {
        let p = VertexPredicate::parse(r#"type:Process and name:"bash shell""#).unwrap();
        assert!(p.matches(&process()));
        let p = VertexPredicate::parse(r#"type:Process AND pid:"11""#).unwrap();
        assert!(!p.matches(&process()));
    }

    #[test]
    fn test_wildcards() {
        assert!(VertexPredicate::parse("name:bash*").unwrap().matches(&process()));
        assert!(VertexPredicate::parse("name:*shell").unwrap().matches(&process()));
        assert!(VertexPredicate::parse("name:b*s*l").unwrap().matches(&process()));
        assert!(VertexPredicate::parse("pid:*").unwrap().matches(&process()));
        assert!(!VertexPredicate::parse("name:zsh*").unwrap().matches(&process()));
        assert!(!VertexPredicate::parse("name:bash*l*shell").unwrap().matches(&process()));
    }

    #[test]
    fn test_missing_key_never_matches() {
        let p = VertexPredicate::parse("uid:*").unwrap();
        assert!(!p.matches(&process()));
    }

    #[test]
    fn test_malformed() {
        assert!(VertexPredicate::parse("").is_err());
        assert!(VertexPredicate::parse("type").is_err());
        assert!(VertexPredicate::parse("type:Process pid:1").is_err());
        assert!(VertexPredicate::parse(r#"type:"open"#).is_err());
    }

    #[test]
    fn test_optional() {
        assert!(VertexPredicate::parse_optional(Some("null")).unwrap().is_none());
        assert!(VertexPredicate::parse_optional(None).unwrap().is_none());
        assert!(VertexPredicate::parse_optional(Some("type:File")).unwrap().is_some());
    }

    #[test]
    fn test_expression_for_round_trips() {
        let v = Vertex::new()
            .with("remote host", "b")
            .with("path", "C:\\\"quoted\"")
            .with("type", "Network");
        let p = VertexPredicate::parse(&VertexPredicate::expression_for(&v)).unwrap();
        assert!(p.matches(&v));
        assert!(!p.matches(&v.clone().with("type", "Process")));
    }
}

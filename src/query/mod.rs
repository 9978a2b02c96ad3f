//! Query grammar and evaluation.
//!
//! A query line names a storage and one query kind:
//!
//! ```text
//! query <storage> vertices <expression>
//! query <storage> remotevertices <host> <expression>
//! query <storage> lineage <id> <depth> <a|d|b> <terminating expression> [output]
//! query <storage> paths <src id> <dst id> <max length> [output]
//! query <storage> remotepaths <host:id> <host:id> <max length> [output]
//! query <storage> pathinsketch <host:id> <host:id> [output]
//! query <storage> pathexists <host:id> <host:id>
//! query <storage> rebuildsketches <level> <max level>
//! ```
//!
//! The trailing output file is only present on the interactive surfaces;
//! lines sent over the wire never carry one.

pub mod engine;
pub mod expression;

pub use engine::{QueryEngine, QueryResult};
pub use expression::VertexPredicate;

use crate::backend::Direction;
use crate::config::pipeline::split_word;
use crate::error::{KernelError, Result};
use std::fmt;

/// A vertex addressed on a specific host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostVertex {
    pub host: String,
    pub id: String,
}

impl HostVertex {
    pub fn new(host: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            id: id.into(),
        }
    }

    pub fn parse(token: &str) -> Result<Self> {
        match token.rsplit_once(':') {
            Some((host, id)) if !host.is_empty() && !id.is_empty() => Ok(Self::new(host, id)),
            _ => Err(KernelError::Usage(format!(
                "Expected <host>:<vertex id>, got '{}'",
                token
            ))),
        }
    }
}

impl fmt::Display for HostVertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Vertices {
        expression: String,
    },
    RemoteVertices {
        host: String,
        expression: String,
    },
    Lineage {
        vertex_id: String,
        depth: u32,
        direction: Direction,
        terminating: Option<String>,
    },
    Paths {
        src: String,
        dst: String,
        max_length: u32,
    },
    RemotePaths {
        src: HostVertex,
        dst: HostVertex,
        max_length: u32,
    },
    PathInSketch {
        src: HostVertex,
        dst: HostVertex,
    },
    PathExists {
        src: HostVertex,
        dst: HostVertex,
    },
    RebuildSketches {
        level: u32,
        max_level: u32,
    },
}

impl QueryKind {
    /// Keyword as written in a query line.
    pub fn keyword(&self) -> &'static str {
        match self {
            QueryKind::Vertices { .. } => "vertices",
            QueryKind::RemoteVertices { .. } => "remotevertices",
            QueryKind::Lineage { .. } => "lineage",
            QueryKind::Paths { .. } => "paths",
            QueryKind::RemotePaths { .. } => "remotepaths",
            QueryKind::PathInSketch { .. } => "pathinsketch",
            QueryKind::PathExists { .. } => "pathexists",
            QueryKind::RebuildSketches { .. } => "rebuildsketches",
        }
    }

    /// Whether the interactive surfaces expect an output file after the arguments.
    fn takes_output(keyword: &str) -> bool {
        matches!(keyword, "lineage" | "paths" | "remotepaths" | "pathinsketch")
    }
}

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Name of the addressed storage
    pub storage: String,
    pub kind: QueryKind,
    /// Export target for graph results
    pub output: Option<String>,
}

impl Query {
    /// Parse a query line. The leading `query` keyword is optional.
    ///
    /// With `with_output`, kinds that produce an exported graph take their
    /// last token as the output file.
    pub fn parse(line: &str, with_output: bool) -> Result<Self> {
        let (first, rest) = split_word(line);
        let (storage, rest) = if first.eq_ignore_ascii_case("query") {
            split_word(rest)
        } else {
            (first, rest)
        };
        let (keyword, rest) = split_word(rest);
        if storage.is_empty() || keyword.is_empty() {
            return Err(usage(line));
        }
        let keyword = keyword.to_ascii_lowercase();

        // Expressions keep their original spacing; only the output file is split off.
        let mut raw = rest.trim();
        let mut output = None;
        if with_output && QueryKind::takes_output(&keyword) {
            let (before, last) = raw.rsplit_once(char::is_whitespace).unwrap_or(("", raw));
            if last.is_empty() {
                return Err(usage(line));
            }
            output = Some(last.to_string());
            raw = before.trim_end();
        }
        let args: Vec<&str> = raw.split_whitespace().collect();

        let kind = match keyword.as_str() {
            "vertices" => QueryKind::Vertices {
                expression: raw.to_string(),
            },
            "remotevertices" => {
                let (host, expression) = split_word(raw);
                if host.is_empty() {
                    return Err(usage(line));
                }
                QueryKind::RemoteVertices {
                    host: host.to_string(),
                    expression: expression.trim().to_string(),
                }
            }
            "lineage" => {
                let (vertex_id, rest) = split_word(raw);
                let (depth, rest) = split_word(rest);
                let (direction, rest) = split_word(rest);
                let terminating = rest.trim();
                if terminating.is_empty() {
                    return Err(usage(line));
                }
                QueryKind::Lineage {
                    vertex_id: vertex_id.to_string(),
                    depth: number(depth, line)?,
                    direction: direction.parse().map_err(|_| usage(line))?,
                    terminating: VertexPredicate::parse_optional(Some(terminating))?
                        .map(|_| terminating.to_string()),
                }
            }
            "paths" => {
                if args.len() != 3 {
                    return Err(usage(line));
                }
                QueryKind::Paths {
                    src: args[0].to_string(),
                    dst: args[1].to_string(),
                    max_length: number(args[2], line)?,
                }
            }
            "remotepaths" => {
                if args.len() != 3 {
                    return Err(usage(line));
                }
                QueryKind::RemotePaths {
                    src: HostVertex::parse(args[0])?,
                    dst: HostVertex::parse(args[1])?,
                    max_length: number(args[2], line)?,
                }
            }
            "pathinsketch" | "pathexists" => {
                if args.len() != 2 {
                    return Err(usage(line));
                }
                let src = HostVertex::parse(args[0])?;
                let dst = HostVertex::parse(args[1])?;
                if keyword == "pathinsketch" {
                    QueryKind::PathInSketch { src, dst }
                } else {
                    QueryKind::PathExists { src, dst }
                }
            }
            "rebuildsketches" => {
                if args.len() != 2 {
                    return Err(usage(line));
                }
                QueryKind::RebuildSketches {
                    level: number(args[0], line)?,
                    max_level: number(args[1], line)?,
                }
            }
            _ => return Err(usage(line)),
        };

        Ok(Self {
            storage: storage.to_string(),
            kind,
            output,
        })
    }

    pub fn new(storage: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            storage: storage.into(),
            kind,
            output: None,
        }
    }

    /// The line sent to a remote query service. Never carries the output file.
    pub fn to_line(&self) -> String {
        let args = match &self.kind {
            QueryKind::Vertices { expression } => expression.clone(),
            QueryKind::RemoteVertices { host, expression } => format!("{} {}", host, expression),
            QueryKind::Lineage {
                vertex_id,
                depth,
                direction,
                terminating,
            } => format!(
                "{} {} {} {}",
                vertex_id,
                depth,
                direction,
                terminating.as_deref().unwrap_or("null")
            ),
            QueryKind::Paths {
                src,
                dst,
                max_length,
            } => format!("{} {} {}", src, dst, max_length),
            QueryKind::RemotePaths {
                src,
                dst,
                max_length,
            } => format!("{} {} {}", src, dst, max_length),
            QueryKind::PathInSketch { src, dst } | QueryKind::PathExists { src, dst } => {
                format!("{} {}", src, dst)
            }
            QueryKind::RebuildSketches { level, max_level } => format!("{} {}", level, max_level),
        };
        format!("query {} {} {}", self.storage, self.kind.keyword(), args)
            .trim_end()
            .to_string()
    }
}

fn number(token: &str, line: &str) -> Result<u32> {
    token.parse().map_err(|_| usage(line))
}

fn usage(line: &str) -> KernelError {
    KernelError::Usage(format!("Malformed query '{}'", line.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertices_expression_keeps_spaces() {
        let q = Query::parse("query Memory vertices type:Process AND pid:1", true).unwrap();
        assert_eq!(q.storage, "Memory");
        assert_eq!(
            q.kind,
            QueryKind::Vertices {
                expression: "type:Process AND pid:1".into()
            }
        );
        assert_eq!(q.output, None);
    }

    #[test]
    fn test_quoted_spacing_survives() {
        let q = Query::parse(r#"query Memory vertices "name":"a  b""#, false).unwrap();
        assert_eq!(
            q.kind,
            QueryKind::Vertices {
                expression: r#""name":"a  b""#.into()
            }
        );
    }

    #[test]
    fn test_lineage_with_output() {
        let q = Query::parse("query Memory lineage 12 3 a null /tmp/out.json", true).unwrap();
        assert_eq!(q.output.as_deref(), Some("/tmp/out.json"));
        assert_eq!(
            q.kind,
            QueryKind::Lineage {
                vertex_id: "12".into(),
                depth: 3,
                direction: Direction::Ancestors,
                terminating: None,
            }
        );
    }

    #[test]
    fn test_lineage_multi_word_terminating() {
        let q = Query::parse("Memory lineage 1 2 d type:Process AND pid:7", false).unwrap();
        match q.kind {
            QueryKind::Lineage { terminating, .. } => {
                assert_eq!(terminating.as_deref(), Some("type:Process AND pid:7"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_remote_endpoints() {
        let q = Query::parse("query Memory remotepaths hostA:4 10.0.0.2:7 20", false).unwrap();
        assert_eq!(
            q.kind,
            QueryKind::RemotePaths {
                src: HostVertex::new("hostA", "4"),
                dst: HostVertex::new("10.0.0.2", "7"),
                max_length: 20,
            }
        );
    }

    #[test]
    fn test_wire_line_roundtrips() {
        let lines = [
            "query Memory vertices type:Network",
            "query Memory lineage 5 2 b null",
            "query Memory paths 1 2 10",
            "query Memory remotevertices hostB pid:1",
            "query Memory rebuildsketches 0 2",
        ];
        for line in lines {
            let q = Query::parse(line, false).unwrap();
            assert_eq!(q.to_line(), line);
        }
    }

    #[test]
    fn test_malformed_queries_are_usage_errors() {
        for line in [
            "",
            "query",
            "query Memory",
            "query Memory frobnicate",
            "query Memory lineage 1 x a null",
            "query Memory lineage 1 2 sideways null",
            "query Memory paths 1 2",
            "query Memory remotepaths hostA 2 3",
            "query Memory rebuildsketches 1",
        ] {
            let err = Query::parse(line, false).unwrap_err();
            assert!(err.is_usage(), "{} -> {:?}", line, err);
        }
    }

    #[test]
    fn test_missing_output_is_usage_error() {
        assert!(Query::parse("query Memory paths 1 2 3", true)
            .unwrap_err()
            .is_usage());
    }
}

//! Control surface.
//!
//! Text commands that reconfigure the running pipeline and issue queries:
//!
//! ```text
//! add reporter|storage <name> <arguments>
//! add filter|transformer <name> <index>
//! add sketch <name> <storage name>
//! remove reporter|storage|sketch <name>
//! remove filter|transformer <index>
//! list reporters|storages|filters|transformers|sketches|all
//! config load|save <file>
//! query ...
//! exit
//! shutdown
//! ```
//!
//! Command words are case-insensitive. Each command writes its outcome to the
//! given output; nothing here ever takes the daemon down except `shutdown`.

use crate::config::pipeline::split_word;
use crate::error::{Result, ResultExt};
use crate::kernel::Kernel;
use crate::query::{Query, QueryEngine, QueryKind, QueryResult};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const PIPE_POLL: Duration = Duration::from_millis(50);

pub struct ControlSurface {
    kernel: Arc<Kernel>,
    engine: QueryEngine,
}

impl ControlSurface {
    pub fn new(kernel: Arc<Kernel>) -> Self {
        let engine = QueryEngine::new(kernel.clone());
        Self { kernel, engine }
    }

    /// Execute one command. Returns false when the issuing loop should stop.
    pub fn execute(&self, line: &str, out: &mut dyn Write) -> bool {
        match self.dispatch(line, out) {
            Ok(keep_going) => keep_going,
            Err(e) => {
                tracing::warn!("Writing output of '{}' failed: {}", line.trim(), e);
                true
            }
        }
    }

    /// Read commands until `exit`, `shutdown` or end of input.
    pub fn run(&self, input: impl BufRead, mut output: impl Write) {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("Control input failed: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let keep_going = self.execute(&line, &mut output);
            let _ = writeln!(output).and_then(|_| output.flush());
            if !keep_going {
                break;
            }
        }
    }

    /// Serve `<output file> query ...` lines from a file or FIFO until shutdown.
    ///
    /// Each line's result is written to its output file, followed by an
    /// empty line.
    pub fn serve_query_pipe(&self, path: &Path) -> Result<()> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open query pipe {}", path.display()))?;
        let mut reader = BufReader::new(file);
        tracing::info!("Serving queries from {}", path.display());

        let mut line = String::new();
        while !self.kernel.is_shutting_down() {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                std::thread::sleep(PIPE_POLL);
                continue;
            }
            let (target, command) = split_word(line.trim());
            if target.is_empty() {
                continue;
            }
            if let Err(e) = self.answer_pipe_query(target, command) {
                tracing::warn!("Query pipe request for {} failed: {}", target, e);
            }
        }
        Ok(())
    }

    fn answer_pipe_query(&self, target: &str, command: &str) -> io::Result<()> {
        let mut out = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(target)?;
        let (verb, _) = split_word(command);
        if verb.eq_ignore_ascii_case("query") {
            self.query_command(command, &mut out)?;
        } else {
            write_query_help(&mut out)?;
        }
        writeln!(out)
    }

    fn dispatch(&self, line: &str, out: &mut dyn Write) -> io::Result<bool> {
        let line = line.trim();
        let (verb, _) = split_word(line);
        match verb.to_ascii_lowercase().as_str() {
            "exit" => return Ok(false),
            "shutdown" => {
                self.kernel.shutdown();
                return Ok(false);
            }
            "add" => self.add_command(line, out)?,
            "remove" => self.remove_command(line, out)?,
            "list" => self.list_command(line, out)?,
            "config" => self.config_command(line, out)?,
            "query" => self.query_command(line, out)?,
            _ => write_help(out)?,
        }
        Ok(true)
    }

    // ==================== add ====================

    fn add_command(&self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        let (_, rest) = split_word(line);
        let (kind, rest) = split_word(rest);
        let (name, args) = split_word(rest);
        let args = args.trim();
        let kind = kind.to_ascii_lowercase();

        if name.is_empty() {
            return write_add_usage(out);
        }

        match kind.as_str() {
            "reporter" => {
                if !self.kernel.registry().reporter_names().any(|n| n == name) {
                    return writeln!(
                        out,
                        "Error: Unable to add reporter {} - please check class name and arguments",
                        name
                    );
                }
                write!(out, "Adding reporter {}... ", name)?;
                out.flush()?;
                match self.kernel.add_reporter(name, args) {
                    Ok(()) => writeln!(out, "done"),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        writeln!(out, "failed")
                    }
                }
            }
            "storage" => {
                if !self.kernel.registry().storage_names().any(|n| n == name) {
                    return writeln!(
                        out,
                        "Error: Unable to add storage {} - please check class name and arguments",
                        name
                    );
                }
                write!(out, "Adding storage {}... ", name)?;
                out.flush()?;
                match self.kernel.add_storage(name, args) {
                    Ok(()) => writeln!(out, "done"),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        writeln!(out, "failed")
                    }
                }
            }
            "filter" | "transformer" => {
                let added = args.parse::<usize>().ok().map(|index| {
                    if kind == "filter" {
                        self.kernel.add_filter(name, index)
                    } else {
                        self.kernel.add_transformer(name, index)
                    }
                });
                match added {
                    Some(Ok(())) => writeln!(out, "Adding {} {}... done", kind, name),
                    Some(Err(e)) => {
                        tracing::warn!("{}", e);
                        writeln!(
                            out,
                            "Error: Unable to add {} {} - please check class name and index",
                            kind, name
                        )
                    }
                    None => writeln!(
                        out,
                        "Error: Unable to add {} {} - please check class name and index",
                        kind, name
                    ),
                }
            }
            "sketch" => match self.kernel.add_sketch(name, args) {
                Ok(()) => writeln!(out, "Adding sketch {}... done", name),
                Err(e) => {
                    tracing::warn!("{}", e);
                    writeln!(
                        out,
                        "Error: Unable to add sketch {} - please check class name and storage name",
                        name
                    )
                }
            },
            _ => write_add_usage(out),
        }
    }

    // ==================== remove ====================

    fn remove_command(&self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        let (_, rest) = split_word(line);
        let (kind, rest) = split_word(rest);
        let (target, _) = split_word(rest);
        if target.is_empty() {
            return write_remove_usage(out);
        }

        match kind.to_ascii_lowercase().as_str() {
            "reporter" => {
                if !self.kernel.reporters().iter().any(|(n, _)| n == target) {
                    return writeln!(out, "Reporter {} not found", target);
                }
                write!(out, "Shutting down reporter {}... ", target)?;
                out.flush()?;
                match self.kernel.remove_reporter(target) {
                    Ok(true) => writeln!(out, "done"),
                    Ok(false) => writeln!(out, "not found"),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        writeln!(out, "failed")
                    }
                }
            }
            "storage" => {
                if self.kernel.find_storage(target).is_none() {
                    return writeln!(out, "Storage {} not found", target);
                }
                write!(out, "Shutting down storage {}... ", target)?;
                out.flush()?;
                match self.kernel.remove_storage(target) {
                    Ok(Some((vertices, edges))) => writeln!(
                        out,
                        "done ({} vertices and {} edges added)",
                        vertices, edges
                    ),
                    Ok(None) => writeln!(out, "not found"),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        writeln!(out, "failed")
                    }
                }
            }
            kind @ ("filter" | "transformer") => {
                let removed = target.parse::<usize>().ok().and_then(|position| {
                    let result = if kind == "filter" {
                        self.kernel.remove_filter(position)
                    } else {
                        self.kernel.remove_transformer(position)
                    };
                    result.ok()
                });
                match removed {
                    Some(name) => writeln!(out, "Removing {} {}... done", kind, name),
                    None => writeln!(out, "Error: Unable to remove {} - bad index", kind),
                }
            }
            "sketch" => {
                if self.kernel.remove_sketch(target) {
                    writeln!(out, "Removing sketch {}... done", target)
                } else {
                    writeln!(out, "Sketch {} not found", target)
                }
            }
            _ => write_remove_usage(out),
        }
    }

    // ==================== list ====================

    fn list_command(&self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        let (_, rest) = split_word(line);
        let (what, _) = split_word(rest);
        match what.to_ascii_lowercase().as_str() {
            "reporters" => {
                let entries: Vec<String> = self
                    .kernel
                    .reporters()
                    .into_iter()
                    .map(|(name, args)| format!("{} ({})", name, args))
                    .collect();
                write_list(out, "reporter(s)", "reporters", &entries)
            }
            "storages" => {
                let entries: Vec<String> = self
                    .kernel
                    .storages()
                    .into_iter()
                    .map(|info| format!("{} ({})", info.name, info.args))
                    .collect();
                write_list(out, "storage(s)", "storages", &entries)
            }
            "filters" => write_list(out, "filter(s)", "filters", &self.kernel.filters()),
            "transformers" => write_list(
                out,
                "transformer(s)",
                "transformers",
                &self.kernel.transformers(),
            ),
            "sketches" => {
                let entries: Vec<String> = self
                    .kernel
                    .sketches()
                    .into_iter()
                    .map(|(name, storage)| format!("{} ({})", name, storage))
                    .collect();
                write_list(out, "sketch(es)", "sketches", &entries)
            }
            "all" => {
                for what in ["reporters", "storages", "filters", "transformers", "sketches"] {
                    self.list_command(&format!("list {}", what), out)?;
                }
                Ok(())
            }
            _ => writeln!(
                out,
                "Usage: list reporters|storages|filters|transformers|sketches|all"
            ),
        }
    }

    // ==================== config ====================

    fn config_command(&self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        let (_, rest) = split_word(line);
        let (action, rest) = split_word(rest);
        let path = rest.trim();
        if path.is_empty() {
            return writeln!(out, "Usage: config load|save <filename>");
        }

        match action.to_ascii_lowercase().as_str() {
            "load" => match std::fs::read_to_string(path) {
                Ok(content) => {
                    for directive in content.lines().map(str::trim) {
                        if directive.is_empty() || directive.starts_with('#') {
                            continue;
                        }
                        self.add_command(&format!("add {}", directive), out)?;
                    }
                    writeln!(out, "Finished loading configuration file")
                }
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path, e);
                    writeln!(out, "Usage: config load|save <filename>")
                }
            },
            "save" => {
                write!(out, "Saving configuration... ")?;
                match self.kernel.save_pipeline(path) {
                    Ok(()) => writeln!(out, "done"),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        writeln!(out, "failed")
                    }
                }
            }
            _ => writeln!(out, "Usage: config load|save <filename>"),
        }
    }

    // ==================== query ====================

    fn query_command(&self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        let query = match Query::parse(line, true) {
            Ok(query) => query,
            Err(e) => {
                tracing::debug!("{}", e);
                return write_query_help(out);
            }
        };

        let resolve = self.kernel.config().resolve_remote_lineage;
        let result = match self.engine.execute(&query, resolve) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Query '{}' failed: {}", line.trim(), e);
                return writeln!(out, "Error: Please check query expression");
            }
        };

        match result {
            QueryResult::Graph(graph) => match (&query.kind, &query.output) {
                (QueryKind::Vertices { .. } | QueryKind::RemoteVertices { .. }, _) => {
                    for vertex in graph.sorted_vertices() {
                        writeln!(out, "[{}]", vertex)?;
                    }
                    Ok(())
                }
                (_, Some(output)) => match graph.export_json(output) {
                    Ok(()) => writeln!(out, "Exported graph to {}", output),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        writeln!(out, "Error: Unable to export graph to {}", output)
                    }
                },
                (_, None) => writeln!(
                    out,
                    "{} vertices and {} edges",
                    graph.vertex_count(),
                    graph.edge_count()
                ),
            },
            QueryResult::PathExists(true) => writeln!(out, "Path exists"),
            QueryResult::PathExists(false) => writeln!(out, "No path exists"),
            QueryResult::SketchesRebuilt => writeln!(out, "Sketch rebuild started"),
        }
    }
}

fn write_list(out: &mut dyn Write, noun: &str, plural: &str, entries: &[String]) -> io::Result<()> {
    if entries.is_empty() {
        return writeln!(out, "No {} added", plural);
    }
    writeln!(out, "{} {} added:", entries.len(), noun)?;
    for (i, entry) in entries.iter().enumerate() {
        writeln!(out, "\t{}. {}", i + 1, entry)?;
    }
    Ok(())
}

fn write_add_usage(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Usage: add reporter|storage <class name> <initialization arguments>")?;
    writeln!(out, "       add filter|transformer <class name> <index>")?;
    writeln!(out, "       add sketch <class name> <storage class name>")
}

fn write_remove_usage(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Usage: remove reporter|storage|sketch <class name>")?;
    writeln!(out, "       remove filter|transformer <index>")
}

fn write_help(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Available commands:")?;
    writeln!(out, "       add reporter|storage <class name> <initialization arguments>")?;
    writeln!(out, "       add filter|transformer <class name> <index>")?;
    writeln!(out, "       add sketch <class name> <storage class name>")?;
    writeln!(out, "       remove reporter|storage|sketch <class name>")?;
    writeln!(out, "       remove filter|transformer <index>")?;
    writeln!(out, "       list reporters|storages|filters|transformers|sketches|all")?;
    writeln!(out, "       config load|save <filename>")?;
    writeln!(out, "       query <class name> <query>")?;
    writeln!(out, "       exit")?;
    writeln!(out, "       shutdown")
}

fn write_query_help(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Available commands:")?;
    writeln!(out, "       query <class name> vertices <expression>")?;
    writeln!(out, "       query <class name> remotevertices <host> <expression>")?;
    writeln!(
        out,
        "       query <class name> lineage <vertex id> <depth> <direction> <terminating expression> <output file>"
    )?;
    writeln!(
        out,
        "       query <class name> paths <source vertex id> <destination vertex id> <max length> <output file>"
    )?;
    writeln!(
        out,
        "       query <class name> remotepaths <host:id> <host:id> <max length> <output file>"
    )?;
    writeln!(out, "       query <class name> pathinsketch <host:id> <host:id> <output file>")?;
    writeln!(out, "       query <class name> pathexists <host:id> <host:id>")?;
    writeln!(out, "       query <class name> rebuildsketches <level> <max level>")?;
    writeln!(out, "       exit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Registry;
    use crate::config::KernelConfig;

    fn surface() -> ControlSurface {
        let kernel = Arc::new(Kernel::new(KernelConfig::default(), Registry::with_builtins()));
        ControlSurface::new(kernel)
    }

    fn run(surface: &ControlSurface, line: &str) -> String {
        let mut out = Vec::new();
        surface.execute(line, &mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_unknown_command_shows_help() {
        let s = surface();
        assert!(run(&s, "frobnicate").starts_with("Available commands:"));
    }

    #[test]
    fn test_add_unknown_reporter() {
        let s = surface();
        assert_eq!(
            run(&s, "add reporter Nope x"),
            "Error: Unable to add reporter Nope - please check class name and arguments\n"
        );
    }

    #[test]
    fn test_add_and_list_storage_case_insensitive() {
        let s = surface();
        assert_eq!(run(&s, "ADD storage Memory"), "Adding storage Memory... done\n");
        assert_eq!(run(&s, "list storages"), "1 storage(s) added:\n\t1. Memory ()\n");
    }

    #[test]
    fn test_filter_bad_index() {
        let s = surface();
        assert_eq!(
            run(&s, "add filter Deduplicate 4"),
            "Error: Unable to add filter Deduplicate - please check class name and index\n"
        );
        assert_eq!(run(&s, "list filters"), "No filters added\n");
        assert_eq!(
            run(&s, "remove filter 1"),
            "Error: Unable to remove filter - bad index\n"
        );
    }

    #[test]
    fn test_filter_add_remove() {
        let s = surface();
        assert_eq!(run(&s, "add filter Deduplicate 0"), "Adding filter Deduplicate... done\n");
        assert_eq!(run(&s, "list filters"), "1 filter(s) added:\n\t1. Deduplicate\n");
        assert_eq!(run(&s, "remove filter 1"), "Removing filter Deduplicate... done\n");
    }

    #[test]
    fn test_sketch_needs_storage() {
        let s = surface();
        assert!(run(&s, "add sketch Matrix Memory").starts_with("Error: Unable to add sketch Matrix"));
        run(&s, "add storage Memory");
        assert_eq!(run(&s, "add sketch Matrix Memory"), "Adding sketch Matrix... done\n");
        assert_eq!(run(&s, "remove sketch Matrix"), "Removing sketch Matrix... done\n");
        assert_eq!(run(&s, "remove sketch Matrix"), "Sketch Matrix not found\n");
    }

    #[test]
    fn test_remove_missing() {
        let s = surface();
        assert_eq!(run(&s, "remove storage Memory"), "Storage Memory not found\n");
        assert_eq!(run(&s, "remove reporter JsonLines"), "Reporter JsonLines not found\n");
    }

    #[test]
    fn test_config_usage() {
        let s = surface();
        assert_eq!(run(&s, "config load"), "Usage: config load|save <filename>\n");
        assert_eq!(run(&s, "config frob x"), "Usage: config load|save <filename>\n");
    }

    #[test]
    fn test_malformed_query_shows_query_help() {
        let s = surface();
        assert!(run(&s, "query Memory lineage").starts_with("Available commands:"));
    }

    #[test]
    fn test_exit_stops_loop() {
        let s = surface();
        let mut out = Vec::new();
        assert!(!s.execute("exit", &mut out));
        assert!(s.execute("list all", &mut out));
    }
}

//! Explicit query-command registry. Commands register at startup with their
//! name, aliases, and help text; the daemon shell resolves `@command` lines
//! through it. No hidden static-initialization order.

use super::modifiers::{ParsedCommand, parse_command};
use crate::core::error::{Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// The ranking family: `@rank`, `@bm25`.
    Ranked,
    /// Plain GCL term lookup (the default for unprefixed input).
    Gcl,
    /// `@help [command]`.
    Help,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: CommandKind,
    pub summary: &'static str,
    pub help: &'static str,
}

pub struct QueryRegistry {
    by_name: HashMap<&'static str, CommandSpec>,
}

impl QueryRegistry {
    pub fn new() -> QueryRegistry {
        QueryRegistry { by_name: HashMap::new() }
    }

    pub fn register(&mut self, spec: CommandSpec) {
        self.by_name.insert(spec.name, spec.clone());
        for &alias in spec.aliases {
            self.by_name.insert(alias, spec.clone());
        }
    }

    /// The built-in command set.
    pub fn standard() -> QueryRegistry {
        let mut registry = QueryRegistry::new();
        registry.register(CommandSpec {
            name: "rank",
            aliases: &["bm25"],
            kind: CommandKind::Ranked,
            summary: "Runs a ranked query on the current index.",
            help: "@rank[FUNCTION] W_1 Q_1, ..., W_n Q_n\n\
                   Ranking modifiers: [k1=..][b=..][count=..][start=..][end=..]\n\
                   Strategy: [conjunctive][term_at_a_time][use_max_score]\n\
                   [accumulator_limit=..][ntoulas]\n\
                   Feedback: [feedback=off|okapi|kld][fbterms=..][fbdocs=..]\n\
                   [fbweight=..][fbreweight][fbstemming][fbqrels=..]\n\
                   Output: [id=..][trec][runid=..][verbose]",
        });
        registry.register(CommandSpec {
            name: "gcl",
            aliases: &[],
            kind: CommandKind::Gcl,
            summary: "Evaluates a plain term lookup against the index.",
            help: "Any input line without an @command prefix is treated as a\n\
                   term lookup; wildcard terms (europ*) and stem lookups\n\
                   ($effective) are permitted.",
        });
        registry.register(CommandSpec {
            name: "help",
            aliases: &[],
            kind: CommandKind::Help,
            summary: "Shows the help text for a command.",
            help: "@help [command]",
        });
        registry
    }

    pub fn resolve(&self, name: &str) -> Option<&CommandSpec> {
        self.by_name.get(name)
    }

    /// Parse a command line and resolve its command.
    pub fn dispatch(&self, line: &str) -> Result<(CommandSpec, ParsedCommand)> {
        let parsed = parse_command(line)?;
        match self.resolve(&parsed.command) {
            Some(spec) => Ok((spec.clone(), parsed)),
            None => Err(Error::invalid_query(format!("unknown command @{}", parsed.command))),
        }
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        QueryRegistry::standard()
    }
}

/// Terminal status line, e.g. `@0-Ok. (2 ms)`.
pub fn format_status(code: i32, message: &str) -> String {
    format!("@{}-{}", code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_the_same_command() {
        let registry = QueryRegistry::standard();
        assert_eq!(registry.resolve("rank").unwrap().kind, CommandKind::Ranked);
        assert_eq!(registry.resolve("bm25").unwrap().name, "rank");
        assert!(registry.resolve("frobnicate").is_none());
    }

    #[test]
    fn dispatch_parses_and_resolves() {
        let registry = QueryRegistry::standard();
        let (spec, parsed) = registry.dispatch("@rank[count=3] \"cat\"").unwrap();
        assert_eq!(spec.kind, CommandKind::Ranked);
        assert_eq!(parsed.body, "\"cat\"");

        let (spec, parsed) = registry.dispatch("plain words").unwrap();
        assert_eq!(spec.kind, CommandKind::Gcl);
        assert_eq!(parsed.body, "plain words");

        let err = registry.dispatch("@nonsense body").unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::InvalidQuery);
    }

    #[test]
    fn status_line_format() {
        assert_eq!(format_status(0, "Ok. (1 ms)"), "@0-Ok. (1 ms)");
    }
}

//! The `@command[mod1][mod2=value] body` query surface. The bracketed
//! modifiers select ranking parameters, output columns, and execution
//! strategy; each command recognizes its own subset and ignores the rest.

use crate::core::error::{Error, Result};
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::char;
use nom::combinator::opt;
use nom::multi::many0;
use nom::sequence::delimited;
use nom::{IResult, Parser};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub command: String,
    pub modifiers: Vec<(String, Option<String>)>,
    pub body: String,
}

fn command_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)
}

fn modifier(input: &str) -> IResult<&str, (String, Option<String>)> {
    let (rest, raw) =
        delimited(char('['), take_while(|c: char| c != ']'), char(']')).parse(input)?;
    let (name, value) = match raw.split_once('=') {
        Some((name, value)) => (name.to_string(), Some(value.to_string())),
        None => (raw.to_string(), None),
    };
    Ok((rest, (name, value)))
}

/// Parse one command line. Plain text without a leading `@` becomes the
/// default command with the whole line as body.
pub fn parse_command(line: &str) -> Result<ParsedCommand> {
    let line = line.trim();
    if !line.starts_with('@') {
        return Ok(ParsedCommand {
            command: "gcl".to_string(),
            modifiers: Vec::new(),
            body: line.to_string(),
        });
    }
    let parsed: IResult<&str, (&str, Vec<(String, Option<String>)>, Option<&str>)> =
        (tag("@"), command_name, many0(modifier), opt(tag(" ")))
            .parse(line)
            .map(|(rest, (_, command, modifiers, _))| (rest, (command, modifiers, None)));
    match parsed {
        Ok((rest, (command, modifiers, _))) => Ok(ParsedCommand {
            command: command.to_string(),
            modifiers,
            body: rest.trim().to_string(),
        }),
        Err(_) => Err(Error::invalid_query(format!("cannot parse command line {:?}", line))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackMode {
    Off,
    Okapi,
    Kld,
}

/// Typed view of the modifiers the ranking family understands.
#[derive(Debug, Clone)]
pub struct RankedModifiers {
    pub k1: f32,
    pub b: f32,
    pub count: usize,
    pub start: usize,
    pub end: Option<usize>,
    pub query_id: String,
    pub run_id: String,
    pub trec_format: bool,
    pub feedback: FeedbackMode,
    pub feedback_terms: usize,
    pub feedback_docs: usize,
    pub feedback_weight: f64,
    pub feedback_reweight: bool,
    pub feedback_stemming: bool,
    pub feedback_qrels: Option<String>,
    pub conjunctive: bool,
    pub term_at_a_time: bool,
    pub use_max_score: bool,
    pub accumulator_limit: usize,
    pub ntoulas: bool,
    pub verbose: bool,
    pub tokenizer: Option<String>,
}

impl Default for RankedModifiers {
    fn default() -> Self {
        RankedModifiers {
            k1: 1.2,
            b: 0.75,
            count: 20,
            start: 0,
            end: None,
            query_id: "0".to_string(),
            run_id: "quarry".to_string(),
            trec_format: false,
            feedback: FeedbackMode::Off,
            feedback_terms: 15,
            feedback_docs: 15,
            feedback_weight: 0.3,
            feedback_reweight: false,
            feedback_stemming: false,
            feedback_qrels: None,
            conjunctive: false,
            term_at_a_time: false,
            use_max_score: false,
            accumulator_limit: 200_000,
            ntoulas: false,
            verbose: false,
            tokenizer: None,
        }
    }
}

fn parse_bool(value: &Option<String>) -> bool {
    match value.as_deref() {
        None => true,
        Some("true") | Some("1") | Some("yes") => true,
        _ => false,
    }
}

impl RankedModifiers {
    pub fn from_modifiers(modifiers: &[(String, Option<String>)]) -> Result<RankedModifiers> {
        let mut m = RankedModifiers::default();
        for (name, value) in modifiers {
            let parse_err =
                || Error::invalid_query(format!("bad value for modifier [{}]", name));
            match name.as_str() {
                "bm25" | "qap" => {} // ranking-function selectors, BM25 is what we run
                "k1" => m.k1 = value.as_deref().and_then(|v| v.parse().ok()).ok_or_else(parse_err)?,
                "b" => m.b = value.as_deref().and_then(|v| v.parse().ok()).ok_or_else(parse_err)?,
                "count" => {
                    m.count =
                        value.as_deref().and_then(|v| v.parse().ok()).ok_or_else(parse_err)?
                }
                "start" => {
                    m.start =
                        value.as_deref().and_then(|v| v.parse().ok()).ok_or_else(parse_err)?
                }
                "end" => {
                    m.end = Some(
                        value.as_deref().and_then(|v| v.parse().ok()).ok_or_else(parse_err)?,
                    )
                }
                "id" => m.query_id = value.clone().ok_or_else(parse_err)?,
                "runid" => m.run_id = value.clone().ok_or_else(parse_err)?,
                "trec" => m.trec_format = parse_bool(value),
                "feedback" => {
                    m.feedback = match value.as_deref() {
                        Some("off") | None => FeedbackMode::Off,
                        Some("okapi") => FeedbackMode::Okapi,
                        Some("kld") => FeedbackMode::Kld,
                        _ => return Err(parse_err()),
                    }
                }
                "fbterms" => {
                    m.feedback_terms =
                        value.as_deref().and_then(|v| v.parse().ok()).ok_or_else(parse_err)?
                }
                "fbdocs" => {
                    m.feedback_docs =
                        value.as_deref().and_then(|v| v.parse().ok()).ok_or_else(parse_err)?
                }
                "fbweight" => {
                    m.feedback_weight =
                        value.as_deref().and_then(|v| v.parse().ok()).ok_or_else(parse_err)?
                }
                "fbreweight" => m.feedback_reweight = parse_bool(value),
                "fbstemming" => m.feedback_stemming = parse_bool(value),
                "fbqrels" => m.feedback_qrels = value.clone(),
                "conjunctive" => m.conjunctive = parse_bool(value),
                "term_at_a_time" => m.term_at_a_time = parse_bool(value),
                "use_max_score" => m.use_max_score = parse_bool(value),
                "accumulator_limit" => {
                    m.accumulator_limit =
                        value.as_deref().and_then(|v| v.parse().ok()).ok_or_else(parse_err)?
                }
                "ntoulas" => m.ntoulas = parse_bool(value),
                "verbose" => m.verbose = parse_bool(value),
                "tokenizer" => m.tokenizer = value.clone(),
                // cache and placement switches are accepted and recorded
                "disk_only" | "mem_only" | "nocache" | "usecache" | "docid" | "filename"
                | "page" | "pageno" => {}
                other => {
                    return Err(Error::invalid_query(format!("unsupported modifier [{}]", other)));
                }
            }
        }
        Ok(m)
    }
}

/// One scorer in a ranked query body: an optional `#w.ww` weight and a
/// quoted term.
#[derive(Debug, Clone, PartialEq)]
pub struct Scorer {
    pub term: String,
    pub weight: f64,
}

/// Query term weights beyond this are rejected as nonsense.
pub const MAX_QUERY_TERM_WEIGHT: f64 = 10000.0;

fn quoted_term(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c: char| c != '"'), char('"')).parse(input)
}

fn scorer(input: &str) -> IResult<&str, Scorer> {
    let input = input.trim_start();
    let (input, weight) = opt((char('#'), take_while1(|c: char| c.is_ascii_digit() || c == '.')))
        .parse(input)?;
    let input = input.trim_start();
    let (input, term) = quoted_term(input)?;
    let weight = weight.and_then(|(_, w)| w.parse::<f64>().ok()).unwrap_or(1.0);
    Ok((input, Scorer { term: term.to_string(), weight }))
}

/// Parse the body of a ranked query: comma-separated scorers.
pub fn parse_scorers(body: &str) -> Result<Vec<Scorer>> {
    let mut scorers = Vec::new();
    for part in body.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match scorer(part) {
            Ok((rest, s)) if rest.trim().is_empty() => {
                if s.weight > MAX_QUERY_TERM_WEIGHT {
                    return Err(Error::invalid_query(format!(
                        "query term weight {} exceeds the maximum",
                        s.weight
                    )));
                }
                scorers.push(s);
            }
            _ => return Err(Error::invalid_query(format!("cannot parse scorer {:?}", part))),
        }
    }
    if scorers.is_empty() {
        return Err(Error::invalid_query("ranked query without scorers".to_string()));
    }
    Ok(scorers)
}

/// Lex a free-text query body into terms, for the plain-text query surface.
pub fn tokenize_query_body(body: &str) -> Vec<String> {
    use unicode_segmentation::UnicodeSegmentation;
    body.unicode_words().map(|w| w.to_lowercase()).collect()
}

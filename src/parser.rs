//! Turns single lines of oracle output into `MatchRecord`s.
//!
//! The oracle's text differs between invocation modes and versions, so the
//! parser holds an ordered list of dialect recognizers and the first one that
//! produces a complete record wins. Lines nobody recognizes (headers,
//! comments, truncated output) yield `None` and never abort a run.

use tracing::trace;

/// Word separating the reference identity from the candidate identity.
pub const MATCH_MARKER: &str = "matches";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub score: u8,
    pub reference_path: String,
    pub candidate_path: String,
}

pub trait MatchDialect: Send + Sync {
    fn name(&self) -> &'static str;
    fn recognize(&self, line: &str) -> Option<MatchRecord>;
}

/// `<reference> matches <candidate> (87)`
pub struct ParenthesizedScore;

/// `87,<reference> matches <candidate>`
pub struct LeadingScore;

/// `"<reference>","<candidate>",87` as printed in CSV output mode.
pub struct QuotedCsv;

impl MatchDialect for ParenthesizedScore {
    fn name(&self) -> &'static str {
        "parenthesized-score"
    }

    fn recognize(&self, line: &str) -> Option<MatchRecord> {
        let (_, after) = split_marker(line)?;
        let (score, _) = trailing_paren_score(after)?;
        let (reference_path, candidate_path) = marker_paths(line)?;
        Some(MatchRecord {
            score,
            reference_path,
            candidate_path,
        })
    }
}

impl MatchDialect for LeadingScore {
    fn name(&self) -> &'static str {
        "leading-score"
    }

    fn recognize(&self, line: &str) -> Option<MatchRecord> {
        let (first, _) = line.split_once(',')?;
        let score = parse_score(first)?;
        let (reference_path, candidate_path) = marker_paths(line)?;
        Some(MatchRecord {
            score,
            reference_path,
            candidate_path,
        })
    }
}

impl MatchDialect for QuotedCsv {
    fn name(&self) -> &'static str {
        "quoted-csv"
    }

    fn recognize(&self, line: &str) -> Option<MatchRecord> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(line.as_bytes());
        let row = reader.records().next()?.ok()?;
        if row.len() != 3 {
            return None;
        }
        let reference_path = non_blank(row.get(0)?)?;
        let candidate_path = non_blank(row.get(1)?)?;
        let score = parse_score(row.get(2)?)?;
        Some(MatchRecord {
            score,
            reference_path,
            candidate_path,
        })
    }
}

pub struct MatchParser {
    dialects: Vec<Box<dyn MatchDialect>>,
}

impl Default for MatchParser {
    fn default() -> Self {
        Self {
            dialects: vec![
                Box::new(ParenthesizedScore),
                Box::new(LeadingScore),
                Box::new(QuotedCsv),
            ],
        }
    }
}

impl MatchParser {
    pub fn empty() -> Self {
        Self {
            dialects: Vec::new(),
        }
    }

    /// Append a recognizer; it is tried after the existing ones.
    pub fn with_dialect(mut self, dialect: Box<dyn MatchDialect>) -> Self {
        self.dialects.push(dialect);
        self
    }

    pub fn parse(&self, line: &str) -> Option<MatchRecord> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        for dialect in &self.dialects {
            if let Some(record) = dialect.recognize(line) {
                trace!("{} recognized: {:?}", dialect.name(), record);
                return Some(record);
            }
        }
        trace!("Unrecognized match line: {}", line);
        None
    }
}

fn split_marker(line: &str) -> Option<(&str, &str)> {
    let marker = format!(" {} ", MATCH_MARKER);
    line.split_once(marker.as_str())
}

/// Reference is the last comma token before the marker; candidate is the last
/// comma token after it, once any trailing `(score)` is removed.
fn marker_paths(line: &str) -> Option<(String, String)> {
    let (before, after) = split_marker(line)?;
    let after = match trailing_paren_score(after) {
        Some((_, start)) => &after[..start],
        None => after,
    };
    let reference = non_blank(last_comma_token(before))?;
    let candidate = non_blank(last_comma_token(after))?;
    Some((reference, candidate))
}

/// Score inside a `(digits)` group that ends the line, plus the byte offset
/// of `(`. Parentheses inside a path never count as a score.
fn trailing_paren_score(text: &str) -> Option<(u8, usize)> {
    let inner = text.trim_end().strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let score = parse_score(&inner[open + 1..])?;
    Some((score, open))
}

fn last_comma_token(text: &str) -> &str {
    text.rsplit(',').next().unwrap_or(text)
}

fn non_blank(token: &str) -> Option<String> {
    let token = token.trim().trim_matches('"').trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Valid scores are plain integers in 0..=100.
fn parse_score(text: &str) -> Option<u8> {
    let text = text.trim().trim_matches('"');
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<u8>().ok().filter(|score| *score <= 100)
}

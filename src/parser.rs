use std::fs;
use std::path::Path;

use crate::error::{Result, RuleError};
use crate::types::RuleType;

/// Classification of a source line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Empty,
    Comment,
    Rule,
}

/// One line of rule text.
///
/// Fields that the line does not provide are `None`; the parser never rejects
/// a line, the validator reports what is wrong with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub kind: LineKind,
    /// 1-based line number
    pub line_number: usize,
    pub original: String,
    pub trimmed: String,
    /// Fields split on top-level commas, each trimmed
    pub parts: Vec<String>,
    pub rule_type: Option<String>,
    pub content: Option<String>,
    pub policy: Option<String>,
    /// Trailing fields beyond `TYPE,content,POLICY`
    pub extra: Vec<String>,
    pub is_logical: bool,
}

/// Content / policy / extra of a rule line after port-list folding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFields {
    pub content: Option<String>,
    pub policy: Option<String>,
    pub extra: Vec<String>,
}

impl ParsedLine {
    fn blank(kind: LineKind, line_number: usize, original: &str, trimmed: &str) -> Self {
        Self {
            kind,
            line_number,
            original: original.to_string(),
            trimmed: trimmed.to_string(),
            parts: Vec::new(),
            rule_type: None,
            content: None,
            policy: None,
            extra: Vec::new(),
            is_logical: false,
        }
    }

    /// The rule type, if it is one of the recognised tokens.
    pub fn known_rule_type(&self) -> Option<RuleType> {
        self.rule_type.as_deref().and_then(|t| t.parse().ok())
    }

    /// Content, policy and extra fields as evaluated.
    ///
    /// Port rules written as a comma list (`DST-PORT,80,443,PROXY`) fold every
    /// port field into the content, leaving the last field as the policy.
    /// All other lines return their parsed fields unchanged.
    pub fn rule_fields(&self) -> RuleFields {
        let folds = self.known_rule_type().is_some_and(|t| t.is_port())
            && self.parts.len() > 3
            && self.parts[1..self.parts.len() - 1]
                .iter()
                .all(|p| is_port_token(p))
            && !is_port_token(&self.parts[self.parts.len() - 1]);

        if folds {
            let last = self.parts.len() - 1;
            return RuleFields {
                content: Some(self.parts[1..last].join(",")),
                policy: non_empty(&self.parts[last]),
                extra: Vec::new(),
            };
        }

        RuleFields {
            content: self.content.clone(),
            policy: self.policy.clone(),
            extra: self.extra.clone(),
        }
    }
}

/// `443` or `8000-9000`
fn is_port_token(s: &str) -> bool {
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    match s.split_once('-') {
        Some((start, end)) => digits(start) && digits(end),
        None => digits(s),
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Split on commas that are not inside parentheses.
///
/// `AND,(DOMAIN,google.com),(DST-PORT,443),PROXY` yields four fields.
/// Unbalanced `)` never drives the depth below zero. Fields are not trimmed.
pub fn split_by_comma_outside_parens(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth: usize = 0;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(s[start..i].to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].to_string());

    parts
}

/// Parse rule text into one `ParsedLine` per source line.
pub fn parse_rules_text(text: &str) -> Vec<ParsedLine> {
    text.split('\n')
        .enumerate()
        .map(|(idx, line)| parse_line(line.strip_suffix('\r').unwrap_or(line), idx + 1))
        .collect()
}

/// Read a rules file and parse it.
pub fn parse_rules_file(path: impl AsRef<Path>) -> Result<Vec<ParsedLine>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| RuleError::ReadRules {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(parse_rules_text(&text))
}

/// Parse a single line
fn parse_line(original: &str, line_number: usize) -> ParsedLine {
    let trimmed = original.trim();

    if trimmed.is_empty() {
        return ParsedLine::blank(LineKind::Empty, line_number, original, trimmed);
    }
    if trimmed.starts_with('#') {
        return ParsedLine::blank(LineKind::Comment, line_number, original, trimmed);
    }

    let parts: Vec<String> = split_by_comma_outside_parens(trimmed)
        .into_iter()
        .map(|p| p.trim().to_string())
        .collect();

    let mut line = ParsedLine::blank(LineKind::Rule, line_number, original, trimmed);
    let rule_type = parts[0].as_str();
    line.rule_type = non_empty(rule_type);

    match rule_type {
        "MATCH" => {
            line.content = None;
            line.policy = parts.get(1).and_then(|p| non_empty(p));
            line.extra = parts.iter().skip(2).cloned().collect();
        }
        "AND" | "OR" | "NOT" => {
            line.is_logical = true;
            if parts.len() >= 2 {
                let last = parts.len() - 1;
                line.policy = non_empty(&parts[last]);
                line.content = non_empty(&parts[1..last].join(","));
            }
        }
        _ => {
            line.content = parts.get(1).and_then(|p| non_empty(p));
            line.policy = parts.get(2).and_then(|p| non_empty(p));
            line.extra = parts.iter().skip(3).cloned().collect();
        }
    }

    line.parts = parts;
    line
}

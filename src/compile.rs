use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::parser::{split_by_comma_outside_parens, LineKind, ParsedLine};
use crate::types::RuleType;

/// Default nesting cap for AND / OR / NOT conditions
pub const DEFAULT_MAX_LOGICAL_DEPTH: usize = 32;

/// Policy used when a rule does not name one
pub const DEFAULT_POLICY: &str = "DIRECT";

/// A regex operand compiled once. A pattern that fails to compile keeps the
/// error and never matches.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    case_insensitive: bool,
    compiled: std::result::Result<Regex, String>,
}

impl Pattern {
    pub fn new(source: &str, case_insensitive: bool) -> Self {
        let compiled = RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| e.to_string());
        Self {
            source: source.to_string(),
            case_insensitive,
            compiled,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The compiled regex, or the compilation error.
    pub fn regex(&self) -> std::result::Result<&Regex, &str> {
        self.compiled.as_ref().map_err(String::as_str)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

/// Leaf predicate of a rule, one variant per evaluable rule type.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Domain(String),
    DomainSuffix(String),
    DomainKeyword(String),
    DomainRegex(Pattern),
    IpCidr(String),
    IpCidr6(String),
    IpAsn(String),
    GeoIp(String),
    GeoSite(String),
    ProcessName(String),
    ProcessPath(String),
    ProcessPathRegex(Pattern),
    DstPort(String),
    SrcPort(String),
    InPort(String),
    SrcIpCidr(String),
    DstIpCidr(String),
    RuleSet(String),
    Network(String),
    Uid(String),
    Match,
    /// Unknown token, or a recognised type with no predicate (SUB-RULE, IN-TYPE)
    Unsupported(String),
}

impl Predicate {
    fn new(rule_type: RuleType, content: &str) -> Self {
        let c = content.to_string();
        match rule_type {
            RuleType::Domain => Predicate::Domain(c),
            RuleType::DomainSuffix => Predicate::DomainSuffix(c),
            RuleType::DomainKeyword => Predicate::DomainKeyword(c),
            RuleType::DomainRegex => Predicate::DomainRegex(Pattern::new(content, true)),
            RuleType::IpCidr => Predicate::IpCidr(c),
            RuleType::IpCidr6 => Predicate::IpCidr6(c),
            RuleType::IpAsn => Predicate::IpAsn(c),
            RuleType::GeoIp => Predicate::GeoIp(c),
            RuleType::GeoSite => Predicate::GeoSite(c),
            RuleType::ProcessName => Predicate::ProcessName(c),
            RuleType::ProcessPath => Predicate::ProcessPath(c),
            RuleType::ProcessPathRegex => {
                Predicate::ProcessPathRegex(Pattern::new(content, false))
            }
            RuleType::DstPort => Predicate::DstPort(c),
            RuleType::SrcPort => Predicate::SrcPort(c),
            RuleType::InPort => Predicate::InPort(c),
            RuleType::SrcIpCidr => Predicate::SrcIpCidr(c),
            RuleType::DstIpCidr => Predicate::DstIpCidr(c),
            RuleType::RuleSet => Predicate::RuleSet(c),
            RuleType::Network => Predicate::Network(c),
            RuleType::Uid => Predicate::Uid(c),
            RuleType::Match => Predicate::Match,
            RuleType::SubRule
            | RuleType::InType
            | RuleType::And
            | RuleType::Or
            | RuleType::Not => Predicate::Unsupported(rule_type.as_str().to_string()),
        }
    }

    /// The literal value operand, if the predicate has one.
    pub fn operand(&self) -> Option<&str> {
        match self {
            Predicate::Domain(v)
            | Predicate::DomainSuffix(v)
            | Predicate::DomainKeyword(v)
            | Predicate::IpCidr(v)
            | Predicate::IpCidr6(v)
            | Predicate::IpAsn(v)
            | Predicate::GeoIp(v)
            | Predicate::GeoSite(v)
            | Predicate::ProcessName(v)
            | Predicate::ProcessPath(v)
            | Predicate::DstPort(v)
            | Predicate::SrcPort(v)
            | Predicate::InPort(v)
            | Predicate::SrcIpCidr(v)
            | Predicate::DstIpCidr(v)
            | Predicate::RuleSet(v)
            | Predicate::Network(v)
            | Predicate::Uid(v) => Some(v),
            Predicate::DomainRegex(p) | Predicate::ProcessPathRegex(p) => Some(p.source()),
            Predicate::Match | Predicate::Unsupported(_) => None,
        }
    }
}

/// One parenthesised sub-condition of a logical rule
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Clause as written, e.g. `(DOMAIN,google.com)`
    pub text: String,
    pub condition: Condition,
}

/// Pre-built condition tree
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Leaf(Predicate),
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Not(Box<Clause>),
    /// Never matches; carries the reason
    Invalid(String),
}

/// A rule ready for matching
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    /// Rule text as written (trimmed)
    pub original: String,
    pub line_number: usize,
    pub rule_type: String,
    pub content: String,
    pub policy: String,
    pub is_logical: bool,
    pub condition: Condition,
}

impl CompiledRule {
    /// Build a rule directly, without going through rule text.
    pub fn new(
        original: impl Into<String>,
        line_number: usize,
        rule_type: impl Into<String>,
        content: impl Into<String>,
        policy: impl Into<String>,
    ) -> Self {
        Self::with_max_depth(
            original,
            line_number,
            rule_type,
            content,
            policy,
            DEFAULT_MAX_LOGICAL_DEPTH,
        )
    }

    /// Like [`CompiledRule::new`] with an explicit logical nesting cap.
    pub fn with_max_depth(
        original: impl Into<String>,
        line_number: usize,
        rule_type: impl Into<String>,
        content: impl Into<String>,
        policy: impl Into<String>,
        max_depth: usize,
    ) -> Self {
        let rule_type = rule_type.into();
        let content = content.into();
        let is_logical = matches!(rule_type.as_str(), "AND" | "OR" | "NOT");
        let condition = compile_condition(&rule_type, &content, 1, max_depth);
        Self {
            original: original.into(),
            line_number,
            rule_type,
            content,
            policy: policy.into(),
            is_logical,
            condition,
        }
    }
}

/// Compile parsed lines into executable rules.
///
/// Keeps rule lines with a rule type; drops non-MATCH rules without content;
/// rules without a policy get `default_policy`.
pub fn compile_rules(
    lines: &[ParsedLine],
    default_policy: &str,
    max_depth: usize,
) -> Vec<CompiledRule> {
    let mut rules = Vec::with_capacity(lines.len());
    let mut skipped = 0usize;

    for line in lines.iter().filter(|l| l.kind == LineKind::Rule) {
        match compile_line(line, default_policy, max_depth) {
            Some(rule) => rules.push(rule),
            None => skipped += 1,
        }
    }

    debug!(
        rules = rules.len(),
        skipped, "compiled rule list"
    );
    rules
}

/// Compile a single rule line, `None` when the line cannot become a rule.
pub fn compile_line(
    line: &ParsedLine,
    default_policy: &str,
    max_depth: usize,
) -> Option<CompiledRule> {
    let rule_type = line.rule_type.as_deref()?;
    let fields = line.rule_fields();

    let content = match (rule_type, fields.content) {
        ("MATCH", _) => String::new(),
        (_, Some(content)) => content,
        (_, None) => return None,
    };
    let policy = fields.policy.unwrap_or_else(|| default_policy.to_string());

    Some(CompiledRule::with_max_depth(
        line.trimmed.clone(),
        line.line_number,
        rule_type,
        content,
        policy,
        max_depth,
    ))
}

/// Trim a condition group and strip its outer parentheses.
/// Returns `None` when the group is not parenthesised.
pub(crate) fn strip_group(group: &str) -> Option<&str> {
    let group = group.trim();
    group
        .strip_prefix('(')
        .and_then(|g| g.strip_suffix(')'))
        .map(str::trim)
}

fn compile_condition(rule_type: &str, content: &str, depth: usize, max_depth: usize) -> Condition {
    let parsed = match rule_type.parse::<RuleType>() {
        Ok(t) => t,
        Err(_) => return Condition::Leaf(Predicate::Unsupported(rule_type.to_string())),
    };

    if !parsed.is_logical() {
        return Condition::Leaf(Predicate::new(parsed, content));
    }

    if depth > max_depth {
        warn!(
            rule_type,
            max_depth, "logical rule nested too deeply, it will never match"
        );
        return Condition::Invalid(format!(
            "conditions are nested deeper than {} levels",
            max_depth
        ));
    }

    let mut clauses = compile_clauses(content, depth, max_depth);
    if clauses.is_empty() {
        return Condition::Invalid(format!(
            "{} has no parenthesised sub-conditions",
            rule_type
        ));
    }

    match parsed {
        RuleType::And => Condition::And(clauses),
        RuleType::Or => Condition::Or(clauses),
        _ => Condition::Not(Box::new(clauses.swap_remove(0))),
    }
}

fn compile_clauses(content: &str, depth: usize, max_depth: usize) -> Vec<Clause> {
    split_by_comma_outside_parens(content)
        .iter()
        .filter_map(|group| {
            let inner = strip_group(group)?;
            let fields: Vec<String> = split_by_comma_outside_parens(inner)
                .into_iter()
                .map(|f| f.trim().to_string())
                .collect();
            let sub_content = fields[1..].join(",");
            Some(Clause {
                text: group.trim().to_string(),
                condition: compile_condition(&fields[0], &sub_content, depth + 1, max_depth),
            })
        })
        .collect()
}

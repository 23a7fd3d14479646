//! Rule validation.
//!
//! Reports structural errors (the rule cannot be evaluated meaningfully) and
//! warnings (the rule is usable but suspicious). Reference lists in
//! [`ValidationContext`] only ever produce warnings: real Clash deployments use
//! policies, countries and sites this tool may not know about.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::compile::{strip_group, DEFAULT_MAX_LOGICAL_DEPTH};
use crate::matcher::{parse_ipv4, parse_prefix};
use crate::parser::{parse_rules_text, split_by_comma_outside_parens, LineKind, ParsedLine};
use crate::types::RuleType;

/// One hostname label
static HOSTNAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("HOSTNAME_PATTERN: hardcoded regex is invalid")
});

/// Grouped-hex IPv6 shape. Accepts full form and the common `::` placements;
/// it does not count groups across a `::`.
static IPV6_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}$",
        r"|^(?:[0-9a-fA-F]{1,4}:){1,7}:$",
        r"|^::(?:[0-9a-fA-F]{1,4}:){0,6}[0-9a-fA-F]{1,4}$",
        r"|^::$",
        r"|^(?:[0-9a-fA-F]{1,4}:){1,6}(?::[0-9a-fA-F]{1,4}){1,6}$",
    ))
    .expect("IPV6_PATTERN: hardcoded regex is invalid")
});

/// Policies every Clash configuration understands.
pub const BUILTIN_POLICIES: [&str; 4] = ["DIRECT", "PROXY", "REJECT", "PASS"];

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The rule cannot be evaluated meaningfully.
    Error,
    /// The rule is evaluable but probably not what was intended.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Column span within the original line, 1-based, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRange {
    pub start: usize,
    pub end: usize,
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub line_number: usize,
    /// Original rule text
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<ColumnRange>,
}

/// Reference vocabularies used to warn about unknown values, plus the
/// logical nesting cap the rules will be compiled with.
///
/// An empty list disables the corresponding check.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub policies: Vec<String>,
    pub countries: Vec<String>,
    pub network_types: Vec<String>,
    pub geosites: Vec<String>,
    pub asns: Vec<String>,
    pub max_logical_depth: usize,
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self {
            policies: Vec::new(),
            countries: Vec::new(),
            network_types: Vec::new(),
            geosites: Vec::new(),
            asns: Vec::new(),
            max_logical_depth: DEFAULT_MAX_LOGICAL_DEPTH,
        }
    }
}

fn to_strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy names beyond the built-in ones
    pub fn with_policies<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.policies = to_strings(items);
        self
    }

    pub fn with_countries<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.countries = to_strings(items);
        self
    }

    pub fn with_network_types<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        items: I,
    ) -> Self {
        self.network_types = to_strings(items);
        self
    }

    pub fn with_geosites<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.geosites = to_strings(items);
        self
    }

    pub fn with_asns<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.asns = to_strings(items);
        self
    }

    pub fn with_max_logical_depth(mut self, depth: usize) -> Self {
        self.max_logical_depth = depth;
        self
    }

    fn knows_policy(&self, policy: &str) -> bool {
        self.policies.is_empty()
            || BUILTIN_POLICIES.contains(&policy)
            || self.policies.iter().any(|p| p == policy)
    }
}

/// `true` when `list` is empty or contains `value` ignoring ASCII case.
fn known_in(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|v| v.eq_ignore_ascii_case(value))
}

/// Validate rule text.
pub fn validate_rules_text(text: &str, context: &ValidationContext) -> Vec<ValidationIssue> {
    parse_rules_text(text)
        .iter()
        .flat_map(|line| validate_line(line, context))
        .collect()
}

/// Validate a single parsed line. Empty and comment lines never produce issues.
pub fn validate_line(line: &ParsedLine, context: &ValidationContext) -> Vec<ValidationIssue> {
    let mut report = Report {
        line,
        issues: Vec::new(),
    };
    if line.kind != LineKind::Rule {
        return report.issues;
    }

    let type_token = line.rule_type.as_deref().unwrap_or("");
    let rule_type = match type_token.parse::<RuleType>() {
        Ok(t) => t,
        Err(_) => {
            let message = if type_token.is_empty() {
                "Missing rule type".to_string()
            } else {
                format!("Unknown rule type \"{}\"", type_token)
            };
            // Columns count characters, not bytes.
            let lead = line.original.chars().take_while(|c| c.is_whitespace()).count();
            let start = lead + 1;
            report.push_at(
                Severity::Error,
                message,
                ColumnRange {
                    start,
                    end: start + type_token.chars().count().max(1),
                },
            );
            return report.issues;
        }
    };

    let fields = line.rule_fields();

    match rule_type {
        RuleType::Match => {
            if line.parts.len() < 2 || fields.policy.is_none() {
                report.error("MATCH rule requires a policy".to_string());
            }
        }
        RuleType::And | RuleType::Or | RuleType::Not => {
            if line.parts.len() < 3 {
                report.error(format!(
                    "{} rule requires at least one condition and a policy",
                    rule_type
                ));
            } else {
                check_logical(
                    &mut report,
                    rule_type,
                    fields.content.as_deref().unwrap_or(""),
                    context.max_logical_depth,
                );
            }
        }
        _ => {
            match fields.content.as_deref() {
                Some(content) if line.parts.len() >= 2 => {
                    check_value(&mut report, rule_type, content, context)
                }
                _ => report.error(format!("{} rule requires a value", rule_type)),
            }
            if fields.policy.is_none() {
                report.warning("Missing policy, DIRECT will be used".to_string());
            }
        }
    }

    if let Some(policy) = fields.policy.as_deref() {
        if !context.knows_policy(policy) {
            report.warning(format!("Unknown policy \"{}\"", policy));
        }
    }

    if !fields.extra.is_empty() {
        report.warning(format!(
            "Extra fields are ignored: {}",
            fields.extra.join(",")
        ));
    }

    report.issues
}

struct Report<'a> {
    line: &'a ParsedLine,
    issues: Vec<ValidationIssue>,
}

impl Report<'_> {
    fn issue(&mut self, severity: Severity, message: String, column: Option<ColumnRange>) {
        self.issues.push(ValidationIssue {
            line_number: self.line.line_number,
            rule: self.line.original.clone(),
            severity,
            message,
            column,
        });
    }

    fn push_at(&mut self, severity: Severity, message: String, column: ColumnRange) {
        self.issue(severity, message, Some(column));
    }

    fn error(&mut self, message: String) {
        self.issue(Severity::Error, message, None);
    }

    fn warning(&mut self, message: String) {
        self.issue(Severity::Warning, message, None);
    }
}

fn check_logical(report: &mut Report<'_>, rule_type: RuleType, content: &str, max_depth: usize) {
    if !parens_balanced(&report.line.trimmed) {
        report.error("Unbalanced parentheses".to_string());
        return;
    }

    let groups = condition_groups(content);
    if groups.is_empty() {
        report.error(format!(
            "{} rule conditions must be wrapped in parentheses, e.g. (DOMAIN,example.com)",
            rule_type
        ));
        return;
    }
    if rule_type == RuleType::Not && groups.len() > 1 {
        report.warning("NOT only evaluates its first condition".to_string());
    }

    check_conditions(report, &groups, 1, max_depth);
}

/// Check the rule type of every nested condition.
fn check_conditions(report: &mut Report<'_>, groups: &[&str], depth: usize, max_depth: usize) {
    if depth > max_depth {
        report.warning(format!(
            "Conditions nested deeper than {} levels never match",
            max_depth
        ));
        return;
    }

    for group in groups {
        let fields = split_by_comma_outside_parens(group);
        let type_token = fields[0].trim();
        match type_token.parse::<RuleType>() {
            Ok(t) if t.is_logical() => {
                let inner = fields[1..].join(",");
                let nested = condition_groups(&inner);
                if nested.is_empty() {
                    report.error(format!("Condition ({}) has no sub-conditions", group));
                } else {
                    check_conditions(report, &nested, depth + 1, max_depth);
                }
            }
            Ok(RuleType::Match) => {
                report.error("MATCH cannot be used as a condition".to_string());
            }
            Ok(_) => {
                if fields.len() < 2 || fields[1].trim().is_empty() {
                    report.error(format!("Condition ({}) requires a value", group));
                }
            }
            Err(_) => {
                report.error(format!(
                    "Unknown rule type \"{}\" in condition ({})",
                    type_token, group
                ));
            }
        }
    }
}

/// Parenthesised groups of a logical rule's content, with the outer parens removed.
fn condition_groups(content: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth: usize = 0;
    let mut start = 0;
    // Borrowing variant of `split_by_comma_outside_parens`.
    for (i, c) in content.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                groups.extend(strip_group(&content[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.extend(strip_group(&content[start..]));
    groups
}

fn parens_balanced(s: &str) -> bool {
    let mut depth: i64 = 0;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn check_value(
    report: &mut Report<'_>,
    rule_type: RuleType,
    content: &str,
    context: &ValidationContext,
) {
    match rule_type {
        RuleType::Domain | RuleType::DomainSuffix => {
            if !is_valid_domain(content) {
                report.error(format!("Invalid domain \"{}\"", content));
            }
        }
        RuleType::DomainRegex | RuleType::ProcessPathRegex => {
            if let Err(e) = Regex::new(content) {
                report.error(format!("Invalid regular expression: {}", e));
            }
        }
        RuleType::IpCidr => {
            if let Err(message) = check_ipv4_cidr(content) {
                report.error(message);
            }
        }
        RuleType::IpCidr6 => {
            if let Err(message) = check_ipv6_cidr(content) {
                report.error(message);
            }
        }
        RuleType::SrcIpCidr | RuleType::DstIpCidr => {
            let result = if content.contains(':') {
                check_ipv6_cidr(content)
            } else {
                check_ipv4_cidr(content)
            };
            if let Err(message) = result {
                report.error(message);
            }
        }
        RuleType::GeoIp => {
            if content.len() != 2 || !content.bytes().all(|b| b.is_ascii_alphabetic()) {
                report.error(format!(
                    "GEOIP expects a two-letter country code, got \"{}\"",
                    content
                ));
            } else if !known_in(&context.countries, content) {
                report.warning(format!("Unknown country code \"{}\"", content));
            }
        }
        RuleType::DstPort | RuleType::SrcPort | RuleType::InPort => {
            for spec in content.split(',') {
                if let Err(message) = check_port_spec(spec.trim()) {
                    report.error(message);
                }
            }
        }
        RuleType::GeoSite => {
            if !known_in(&context.geosites, content) {
                report.warning(format!("Unknown GeoSite category \"{}\"", content));
            }
        }
        RuleType::Network => {
            if !known_in(&context.network_types, content) {
                report.warning(format!("Unknown network type \"{}\"", content));
            }
        }
        RuleType::IpAsn => {
            if !known_in(&context.asns, content) {
                report.warning(format!("Unknown ASN \"{}\"", content));
            }
        }
        _ => {}
    }
}

/// Hostname, or `*.label.tld`.
fn is_valid_domain(domain: &str) -> bool {
    if domain.len() > 253 {
        return false;
    }
    match domain.strip_prefix("*.") {
        Some(rest) => rest.contains('.') && HOSTNAME_PATTERN.is_match(rest),
        None => HOSTNAME_PATTERN.is_match(domain),
    }
}

fn check_ipv4_cidr(cidr: &str) -> Result<(), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("CIDR \"{}\" must be written as address/prefix", cidr))?;

    if parse_ipv4(addr).is_none() {
        return Err(format!("Invalid IPv4 address \"{}\"", addr));
    }

    parse_prefix(prefix, 32)
        .map(|_| ())
        .ok_or_else(|| format!("Invalid IPv4 prefix length \"{}\", expected 0-32", prefix))
}

fn check_ipv6_cidr(cidr: &str) -> Result<(), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("CIDR \"{}\" must be written as address/prefix", cidr))?;

    if !IPV6_PATTERN.is_match(addr) {
        return Err(format!("Invalid IPv6 address \"{}\"", addr));
    }

    parse_prefix(prefix, 128)
        .map(|_| ())
        .ok_or_else(|| format!("Invalid IPv6 prefix length \"{}\", expected 0-128", prefix))
}

fn parse_port(port: &str) -> Option<u32> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    port.parse::<u32>().ok().filter(|p| (1..=65535).contains(p))
}

fn check_port_spec(spec: &str) -> Result<(), String> {
    match spec.split_once('-') {
        Some((start, end)) => match (parse_port(start), parse_port(end)) {
            (Some(s), Some(e)) if s <= e => Ok(()),
            (Some(_), Some(_)) => Err(format!(
                "Invalid port range \"{}\": start is greater than end",
                spec
            )),
            _ => Err(format!(
                "Invalid port range \"{}\", ports must be 1-65535",
                spec
            )),
        },
        None => parse_port(spec)
            .map(|_| ())
            .ok_or_else(|| format!("Invalid port \"{}\", expected 1-65535", spec)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issues(text: &str) -> Vec<ValidationIssue> {
        validate_rules_text(text, &ValidationContext::default())
    }

    fn errors(text: &str) -> Vec<ValidationIssue> {
        issues(text)
            .into_iter()
            .filter(|i| i.severity == Severity::Error)
            .collect()
    }

    #[test]
    fn test_valid_rules_produce_no_issues() {
        let text = r#"
# comment
DOMAIN,google.com,PROXY
DOMAIN-SUFFIX,*.github.com,DIRECT
DOMAIN-KEYWORD,ads,REJECT
DOMAIN-REGEX,^ad[0-9]+\.,REJECT
IP-CIDR,192.168.0.0/16,DIRECT
IP-CIDR6,2001:db8::/32,DIRECT
GEOIP,CN,DIRECT
DST-PORT,443,PROXY
SRC-PORT,1000-2000,DIRECT
AND,(DOMAIN,google.com),(DST-PORT,443),PROXY
MATCH,PROXY
"#;
        let found = issues(text);
        assert!(found.is_empty(), "unexpected issues: {:?}", found);
    }

    #[test]
    fn test_unknown_rule_type_has_column() {
        let found = errors("  DOMAIN-WILD,google.com,PROXY");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line_number, 1);
        assert!(found[0].message.contains("DOMAIN-WILD"));
        assert_eq!(found[0].column, Some(ColumnRange { start: 3, end: 14 }));
    }

    #[test]
    fn test_unknown_rule_type_column_counts_characters() {
        let found = errors("\u{3000}DOMÄIN,google.com,PROXY");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].column, Some(ColumnRange { start: 2, end: 8 }));
    }

    #[test]
    fn test_match_requires_policy() {
        assert_eq!(errors("MATCH").len(), 1);
        assert_eq!(errors("MATCH,").len(), 1);
        assert!(errors("MATCH,DIRECT").is_empty());
    }

    #[test]
    fn test_logical_structure() {
        assert_eq!(errors("AND,PROXY").len(), 1);
        let found = errors("AND,DOMAIN,PROXY");
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("parentheses"));
        assert!(!errors("OR,(DOMAIN,a.com,PROXY").is_empty());
    }

    #[test]
    fn test_logical_unknown_condition_type() {
        let found = errors("OR,(DOMAIN,a.com),(FOO,bar),PROXY");
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("FOO"));
    }

    #[test]
    fn test_nesting_cap_follows_context() {
        let rule = "AND,(AND,(DOMAIN,a.com)),PROXY";
        assert!(issues(rule).is_empty());

        let ctx = ValidationContext::new().with_max_logical_depth(1);
        let found = validate_rules_text(rule, &ctx);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Warning);
        assert!(found[0].message.contains("deeper than 1"));
        assert!(validate_rules_text("AND,(DOMAIN,a.com),PROXY", &ctx).is_empty());
    }

    #[test]
    fn test_not_with_several_conditions_warns() {
        let found = issues("NOT,(GEOIP,CN),(DOMAIN,a.com),DIRECT");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Warning);
    }

    #[test]
    fn test_value_rule_requires_content() {
        assert_eq!(errors("DOMAIN").len(), 1);
        assert_eq!(errors("DOMAIN,,PROXY").len(), 1);
    }

    #[test]
    fn test_missing_policy_is_warning() {
        let found = issues("DOMAIN,google.com");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Warning);
    }

    #[test]
    fn test_extra_fields_warn() {
        let found = issues("IP-CIDR,10.0.0.0/8,DIRECT,no-resolve");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Warning);
        assert!(found[0].message.contains("no-resolve"));
    }

    #[test]
    fn test_domain_grammar() {
        assert!(is_valid_domain("google.com"));
        assert!(is_valid_domain("a-b.example.co.uk"));
        assert!(is_valid_domain("*.google.com"));
        assert!(!is_valid_domain("*.com"));
        assert!(!is_valid_domain("*.*.google.com"));
        assert!(!is_valid_domain("-bad.com"));
        assert!(!is_valid_domain("bad..com"));
        assert!(!is_valid_domain("goo gle.com"));
    }

    #[test]
    fn test_invalid_regex() {
        let found = errors("DOMAIN-REGEX,(unclosed,REJECT");
        assert_eq!(found.len(), 1);
        assert!(found[0].message.starts_with("Invalid regular expression"));
    }

    #[test]
    fn test_ipv4_cidr() {
        assert!(check_ipv4_cidr("10.0.0.0/8").is_ok());
        assert!(check_ipv4_cidr("0.0.0.0/0").is_ok());
        assert!(check_ipv4_cidr("1.2.3.4/32").is_ok());
        assert!(check_ipv4_cidr("256.0.0.0/8").is_err());
        assert!(check_ipv4_cidr("1.2.3/8").is_err());
        assert!(check_ipv4_cidr("1.2.3.4/33").is_err());
        assert!(check_ipv4_cidr("1.2.3.4").is_err());
        assert!(check_ipv4_cidr("1.2.3.4/-1").is_err());
        assert!(check_ipv4_cidr("010.0.0.0/8").is_ok());
        assert!(check_ipv4_cidr("1.2.3.4/+8").is_err());
    }

    #[test]
    fn test_ipv6_cidr() {
        assert!(check_ipv6_cidr("2001:db8::/32").is_ok());
        assert!(check_ipv6_cidr("::1/128").is_ok());
        assert!(check_ipv6_cidr("fe80:0:0:0:0:0:0:1/64").is_ok());
        assert!(check_ipv6_cidr("2001:db8::1/129").is_err());
        assert!(check_ipv6_cidr("2001:zz8::/32").is_err());
    }

    #[test]
    fn test_geoip_shape_and_known_countries() {
        assert_eq!(errors("GEOIP,CHN,DIRECT").len(), 1);
        assert_eq!(errors("GEOIP,C1,DIRECT").len(), 1);

        let ctx = ValidationContext::new().with_countries(["CN", "US"]);
        assert!(validate_rules_text("GEOIP,cn,DIRECT", &ctx).is_empty());
        let found = validate_rules_text("GEOIP,ZZ,DIRECT", &ctx);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Warning);
    }

    #[test]
    fn test_port_specs() {
        assert!(check_port_spec("1").is_ok());
        assert!(check_port_spec("65535").is_ok());
        assert!(check_port_spec("80-443").is_ok());
        assert!(check_port_spec("0").is_err());
        assert!(check_port_spec("65536").is_err());
        assert!(check_port_spec("443-80").is_err());
        assert!(check_port_spec("http").is_err());
        assert!(errors("DST-PORT,80,443,PROXY").is_empty());
        assert_eq!(errors("DST-PORT,80-70,PROXY").len(), 1);
    }

    #[test]
    fn test_open_vocabularies_only_warn() {
        let ctx = ValidationContext::new()
            .with_geosites(["google"])
            .with_network_types(["tcp", "udp"])
            .with_asns(["13335"])
            .with_policies(["HK"]);
        let found = validate_rules_text(
            "GEOSITE,netflix,PROXY\nNETWORK,icmp,DIRECT\nIP-ASN,15169,PROXY\nMATCH,US",
            &ctx,
        );
        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|i| i.severity == Severity::Warning));

        let found = validate_rules_text("GEOSITE,Google,HK\nMATCH,DIRECT", &ctx);
        assert!(found.is_empty(), "unexpected issues: {:?}", found);
    }

    #[test]
    fn test_issue_serializes_with_ui_field_names() {
        let found = errors("FOO,bar,PROXY");
        let json = serde_json::to_value(&found[0]).unwrap();
        assert_eq!(json["lineNumber"], 1);
        assert_eq!(json["severity"], "error");
        assert_eq!(json["column"]["start"], 1);
    }
}

//! Explanation rendering.
//!
//! The matcher records *why* a rule did or did not match as a [`Reason`];
//! this module turns that into the short `explanation` and the narrative
//! `detailedExplanation` carried by every [`MatchResult`](crate::MatchResult).

use crate::compile::CompiledRule;

/// Request field a predicate reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Domain,
    Process,
    ProcessPath,
    Network,
    Uid,
    Ipv4,
    Ipv6,
    SrcIp,
    DstIp,
    DstPort,
    SrcPort,
    InPort,
    Country,
}

impl Field {
    fn label(&self) -> &'static str {
        match self {
            Field::Domain => "Domain",
            Field::Process => "Process",
            Field::ProcessPath => "Process path",
            Field::Network => "Network",
            Field::Uid => "UID",
            Field::Ipv4 => "IP",
            Field::Ipv6 => "IPv6 address",
            Field::SrcIp => "Source IP",
            Field::DstIp => "Destination IP",
            Field::DstPort => "Destination port",
            Field::SrcPort => "Source port",
            Field::InPort => "Inbound port",
            Field::Country => "Country",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Field::Domain => "a domain",
            Field::Process => "a process name",
            Field::ProcessPath => "a process path",
            Field::Network => "a network type",
            Field::Uid => "a UID",
            Field::Ipv4 => "an IPv4 address",
            Field::Ipv6 => "an IPv6 address",
            Field::SrcIp => "a source IP",
            Field::DstIp => "a destination IP",
            Field::DstPort => "a destination port",
            Field::SrcPort => "a source port",
            Field::InPort => "a port",
            Field::Country => "a country",
        }
    }
}

/// How the request value was compared with the rule operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    EqualsIgnoreCase,
    SuffixOrEquals,
    Contains,
    Regex,
    InCidr,
    InRange,
    InList,
}

impl Comparison {
    fn verb(&self, matched: bool) -> &'static str {
        match (self, matched) {
            (Comparison::Equals, true) => "equals",
            (Comparison::Equals, false) => "does not equal",
            (Comparison::EqualsIgnoreCase, true) => "equals (ignoring case)",
            (Comparison::EqualsIgnoreCase, false) => "does not equal (ignoring case)",
            (Comparison::SuffixOrEquals, true) => "ends with",
            (Comparison::SuffixOrEquals, false) => "does not end with",
            (Comparison::Contains, true) => "contains",
            (Comparison::Contains, false) => "does not contain",
            (Comparison::Regex, true) => "matches pattern",
            (Comparison::Regex, false) => "does not match pattern",
            (Comparison::InCidr, true) => "is within",
            (Comparison::InCidr, false) => "is outside",
            (Comparison::InRange, true) => "is within port range",
            (Comparison::InRange, false) => "is outside port range",
            (Comparison::InList, true) => "is in port list",
            (Comparison::InList, false) => "is not in port list",
        }
    }
}

/// Injected lookup table consulted by a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    GeoIp,
    Asn,
}

impl Table {
    fn label(&self) -> &'static str {
        match self {
            Table::GeoIp => "GeoIP country",
            Table::Asn => "ASN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// Outcome of one evaluated sub-condition
#[derive(Debug, Clone, PartialEq)]
pub struct ClauseReport {
    pub text: String,
    pub matched: bool,
    pub reason: Reason,
}

/// Why a rule matched or not
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    /// MATCH
    Always,
    Missing {
        field: Field,
    },
    Compare {
        field: Field,
        actual: String,
        op: Comparison,
        expected: String,
    },
    InvalidPattern {
        pattern: String,
        error: String,
    },
    /// A malformed rule operand or request value
    InvalidOperand {
        what: &'static str,
        value: String,
    },
    Lookup {
        table: Table,
        key: String,
        found: Option<String>,
        expected: String,
    },
    GeoSite {
        category: String,
        domain: String,
        hit: Option<String>,
        known: bool,
    },
    RuleSet {
        name: String,
        known: bool,
    },
    Logical {
        op: LogicalOp,
        clauses: Vec<ClauseReport>,
    },
    Invalid(String),
    Unsupported(String),
}

/// One-line summary of a reason.
pub fn terse(matched: bool, reason: &Reason) -> String {
    match reason {
        Reason::Always => "MATCH rule always matches".to_string(),
        Reason::Missing { field } => format!("Request has no {}", strip_article(field.noun())),
        Reason::Compare {
            field,
            actual,
            op,
            expected,
        } => format!(
            "{} \"{}\" {} \"{}\"",
            field.label(),
            actual,
            op.verb(matched),
            expected
        ),
        Reason::InvalidPattern { pattern, .. } => {
            format!("Invalid regular expression \"{}\"", pattern)
        }
        Reason::InvalidOperand { what, value } => format!("Invalid {} \"{}\"", what, value),
        Reason::Lookup {
            table,
            key,
            found: Some(found),
            expected,
        } => {
            if matched {
                format!("{} of {} is \"{}\"", table.label(), key, found)
            } else {
                format!(
                    "{} of {} is \"{}\", not \"{}\"",
                    table.label(),
                    key,
                    found,
                    expected
                )
            }
        }
        Reason::Lookup {
            table,
            key,
            found: None,
            ..
        } => format!("No {} known for {}", table.label(), key),
        Reason::GeoSite {
            category,
            domain,
            hit,
            known,
        } => match (known, hit) {
            (false, _) => format!("GeoSite category \"{}\" is not loaded", category),
            (true, Some(hit)) => format!(
                "Domain \"{}\" belongs to GeoSite {} via \"{}\"",
                domain, category, hit
            ),
            (true, None) => format!("Domain \"{}\" is not in GeoSite {}", domain, category),
        },
        Reason::RuleSet { name, known: false } => {
            format!("Rule set \"{}\" is not loaded", name)
        }
        Reason::RuleSet { name, known: true } => {
            if matched {
                format!("Rule set \"{}\" accepted the request", name)
            } else {
                format!("Rule set \"{}\" rejected the request", name)
            }
        }
        Reason::Logical { op, clauses } => terse_logical(*op, matched, clauses),
        Reason::Invalid(message) => format!("Rule is invalid: {}", message),
        Reason::Unsupported(rule_type) => {
            format!("Rule type {} is not supported by the matcher", rule_type)
        }
    }
}

fn strip_article(noun: &str) -> &str {
    noun.strip_prefix("an ")
        .or_else(|| noun.strip_prefix("a "))
        .unwrap_or(noun)
}

fn terse_logical(op: LogicalOp, matched: bool, clauses: &[ClauseReport]) -> String {
    let last = clauses.last().map(|c| c.text.as_str()).unwrap_or("");
    match (op, matched) {
        (LogicalOp::And, true) => format!("All {} conditions matched", clauses.len()),
        (LogicalOp::And, false) => format!("Condition {} did not match", last),
        (LogicalOp::Or, true) => format!("Condition {} matched", last),
        (LogicalOp::Or, false) => format!("None of the {} conditions matched", clauses.len()),
        (LogicalOp::Not, true) => format!("Condition {} did not match, so NOT applies", last),
        (LogicalOp::Not, false) => format!("Condition {} matched, so NOT does not apply", last),
    }
}

/// Narrative explanation citing the line, the rule and the reasoning.
pub fn detailed(rule: &CompiledRule, matched: bool, reason: &Reason) -> String {
    let verdict = if matched { "matched" } else { "did not match" };
    let mut text = format!(
        "Line {}: rule \"{}\" {}. {}.",
        rule.line_number,
        rule.original,
        verdict,
        sentence(matched, reason)
    );

    if let Reason::Logical { clauses, .. } = reason {
        let parts: Vec<String> = clauses
            .iter()
            .map(|c| {
                format!(
                    "{} {} ({})",
                    c.text,
                    if c.matched { "matched" } else { "did not match" },
                    terse(c.matched, &c.reason)
                )
            })
            .collect();
        text.push_str(&format!(" Evaluated conditions: {}.", parts.join("; ")));
    }

    if matched {
        text.push_str(&format!(
            " The connection is routed to policy {}.",
            rule.policy
        ));
    } else {
        text.push_str(" Evaluation continues with the next rule.");
    }
    text
}

/// Reason phrased as a full sentence (without the trailing period).
fn sentence(matched: bool, reason: &Reason) -> String {
    match reason {
        Reason::Always => {
            "MATCH is the final rule and applies to every request that reached it".to_string()
        }
        Reason::Missing { field } => format!(
            "The request does not provide {}, so the rule cannot apply",
            field.noun()
        ),
        Reason::InvalidPattern { pattern, error } => format!(
            "The pattern \"{}\" is not a valid regular expression ({}), so the rule is treated as not matching",
            pattern,
            error.lines().last().unwrap_or(error.as_str()).trim()
        ),
        Reason::InvalidOperand { what, value } => format!(
            "\"{}\" is not a valid {}, so the rule is treated as not matching",
            value, what
        ),
        Reason::Lookup {
            table,
            key,
            found: None,
            ..
        } => format!(
            "The {} lookup has no entry for {}, so the rule cannot apply",
            table.label(),
            key
        ),
        Reason::Invalid(message) => format!(
            "The rule is invalid ({}), so it never matches",
            message
        ),
        Reason::Unsupported(rule_type) => format!(
            "Rule type {} is not evaluated by this engine, so the rule never matches",
            rule_type
        ),
        _ => terse(matched, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> CompiledRule {
        CompiledRule::new("DOMAIN-SUFFIX,github.com,DIRECT", 3, "DOMAIN-SUFFIX", "github.com", "DIRECT")
    }

    #[test]
    fn test_terse_compare() {
        let reason = Reason::Compare {
            field: Field::Domain,
            actual: "api.github.com".into(),
            op: Comparison::SuffixOrEquals,
            expected: "github.com".into(),
        };
        assert_eq!(
            terse(true, &reason),
            "Domain \"api.github.com\" ends with \"github.com\""
        );
        assert_eq!(
            terse(false, &reason),
            "Domain \"api.github.com\" does not end with \"github.com\""
        );
    }

    #[test]
    fn test_terse_missing() {
        assert_eq!(
            terse(false, &Reason::Missing { field: Field::Ipv4 }),
            "Request has no IPv4 address"
        );
        assert_eq!(
            terse(false, &Reason::Missing { field: Field::Domain }),
            "Request has no domain"
        );
    }

    #[test]
    fn test_detailed_match() {
        let reason = Reason::Compare {
            field: Field::Domain,
            actual: "api.github.com".into(),
            op: Comparison::SuffixOrEquals,
            expected: "github.com".into(),
        };
        assert_eq!(
            detailed(&rule(), true, &reason),
            "Line 3: rule \"DOMAIN-SUFFIX,github.com,DIRECT\" matched. \
             Domain \"api.github.com\" ends with \"github.com\". \
             The connection is routed to policy DIRECT."
        );
    }

    #[test]
    fn test_detailed_missing() {
        let text = detailed(&rule(), false, &Reason::Missing { field: Field::Domain });
        assert_eq!(
            text,
            "Line 3: rule \"DOMAIN-SUFFIX,github.com,DIRECT\" did not match. \
             The request does not provide a domain, so the rule cannot apply. \
             Evaluation continues with the next rule."
        );
    }

    #[test]
    fn test_detailed_logical_lists_clauses() {
        let reason = Reason::Logical {
            op: LogicalOp::And,
            clauses: vec![
                ClauseReport {
                    text: "(DOMAIN,google.com)".into(),
                    matched: true,
                    reason: Reason::Compare {
                        field: Field::Domain,
                        actual: "google.com".into(),
                        op: Comparison::Equals,
                        expected: "google.com".into(),
                    },
                },
                ClauseReport {
                    text: "(DST-PORT,443)".into(),
                    matched: false,
                    reason: Reason::Compare {
                        field: Field::DstPort,
                        actual: "80".into(),
                        op: Comparison::Equals,
                        expected: "443".into(),
                    },
                },
            ],
        };
        assert_eq!(terse(false, &reason), "Condition (DST-PORT,443) did not match");
        let text = detailed(&rule(), false, &reason);
        assert!(text.contains("(DOMAIN,google.com) matched (Domain \"google.com\" equals \"google.com\")"));
        assert!(text.contains("(DST-PORT,443) did not match (Destination port \"80\" does not equal \"443\")"));
        assert!(text.ends_with("Evaluation continues with the next rule."));
    }

    #[test]
    fn test_terse_lookup() {
        let reason = Reason::Lookup {
            table: Table::GeoIp,
            key: "1.2.3.4".into(),
            found: Some("US".into()),
            expected: "CN".into(),
        };
        assert_eq!(
            terse(false, &reason),
            "GeoIP country of 1.2.3.4 is \"US\", not \"CN\""
        );
    }
}

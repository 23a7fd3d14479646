//! Rule matching.
//!
//! [`match_request`] walks the rule list in order and returns the first rule
//! that matches, falling back to a MATCH rule. Evaluation never fails: broken
//! rules, absent request fields and missing lookup data all become non-matches
//! with an explanation.

mod domain;
mod geoip;
mod geosite;
mod ip;
mod port;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::compile::{Clause, CompiledRule, Condition, Predicate};
use crate::explain::{self, ClauseReport, Comparison, Field, LogicalOp, Reason};
use crate::types::{MatchResult, TestRequest};

pub(crate) use ip::{parse_ipv4, parse_prefix};

/// Injected RULE-SET membership test
pub type RuleSetPredicate = Arc<dyn Fn(&TestRequest) -> bool + Send + Sync>;

/// Read-only lookup tables consulted while matching.
///
/// GeoSite and RULE-SET keys are looked up in lower case.
#[derive(Clone, Default)]
pub struct MatchContext {
    /// IP -> country code
    pub geoip_database: HashMap<String, String>,
    /// category -> domain suffixes
    pub geosite_data: HashMap<String, Vec<String>>,
    /// IP -> ASN
    pub asn_data: HashMap<String, String>,
    /// rule set name -> predicate
    pub rule_set_data: HashMap<String, RuleSetPredicate>,
}

impl fmt::Debug for MatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rule_sets: Vec<&String> = self.rule_set_data.keys().collect();
        rule_sets.sort();
        f.debug_struct("MatchContext")
            .field("geoip_database", &self.geoip_database)
            .field("geosite_data", &self.geosite_data)
            .field("asn_data", &self.asn_data)
            .field("rule_set_data", &rule_sets)
            .finish()
    }
}

impl MatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geoip_database(mut self, data: HashMap<String, String>) -> Self {
        self.geoip_database = data;
        self
    }

    /// Category names are stored in lower case.
    pub fn with_geosite_data(mut self, data: HashMap<String, Vec<String>>) -> Self {
        self.geosite_data = lowercase_keys(data);
        self
    }

    pub fn with_asn_data(mut self, data: HashMap<String, String>) -> Self {
        self.asn_data = data;
        self
    }

    /// Rule set names are stored in lower case.
    pub fn with_rule_set_data(mut self, data: HashMap<String, RuleSetPredicate>) -> Self {
        self.rule_set_data = lowercase_keys(data);
        self
    }

    /// Register one rule set predicate
    pub fn with_rule_set<F>(mut self, name: &str, predicate: F) -> Self
    where
        F: Fn(&TestRequest) -> bool + Send + Sync + 'static,
    {
        self.rule_set_data
            .insert(name.to_lowercase(), Arc::new(predicate));
        self
    }
}

pub(crate) fn lowercase_keys<V>(data: HashMap<String, V>) -> HashMap<String, V> {
    data.into_iter()
        .map(|(name, value)| (name.to_lowercase(), value))
        .collect()
}

/// What evaluating one condition produced
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outcome {
    pub matched: bool,
    pub reason: Reason,
    /// The request value that was compared
    pub matched_content: String,
    pub match_range: Option<String>,
}

impl Outcome {
    pub(crate) fn new(matched: bool, reason: Reason) -> Self {
        Self {
            matched,
            reason,
            matched_content: String::new(),
            match_range: None,
        }
    }

    pub(crate) fn missing(field: Field) -> Self {
        Self::new(false, Reason::Missing { field })
    }

    pub(crate) fn invalid_operand(what: &'static str, value: &str) -> Self {
        Self::new(
            false,
            Reason::InvalidOperand {
                what,
                value: value.to_string(),
            },
        )
    }

    pub(crate) fn with_content(mut self, content: impl Into<String>) -> Self {
        self.matched_content = content.into();
        self
    }

    pub(crate) fn with_range(mut self, range: Option<String>) -> Self {
        self.match_range = range;
        self
    }
}

/// Compare a request field with the rule operand.
pub(crate) fn compare(
    field: Field,
    actual: Option<&str>,
    op: Comparison,
    expected: &str,
    test: impl FnOnce(&str) -> bool,
) -> Outcome {
    match actual {
        None => Outcome::missing(field),
        Some(actual) => Outcome::new(
            test(actual),
            Reason::Compare {
                field,
                actual: actual.to_string(),
                op,
                expected: expected.to_string(),
            },
        )
        .with_content(actual),
    }
}

/// Evaluate rules in order and return the first match.
///
/// When nothing matches, the first MATCH rule in the list is evaluated as the
/// fallback. `None` means no rule applies and no MATCH rule exists.
pub fn match_request(
    rules: &[CompiledRule],
    request: &TestRequest,
    context: &MatchContext,
) -> Option<MatchResult> {
    for rule in rules {
        let result = match_rule(rule, request, context);
        if result.matched {
            trace!(
                line = result.line_number,
                policy = %result.policy,
                "request matched"
            );
            return Some(result);
        }
    }

    let fallback = rules
        .iter()
        .find(|r| r.rule_type == "MATCH")
        .map(|r| match_rule(r, request, context));
    if fallback.is_none() {
        trace!("no rule matched and no MATCH rule exists");
    }
    fallback
}

/// Evaluate a single rule. Never fails.
pub fn match_rule(rule: &CompiledRule, request: &TestRequest, context: &MatchContext) -> MatchResult {
    let outcome = evaluate(&rule.condition, request, context);

    let match_position = match &rule.condition {
        Condition::Leaf(p) => p.operand().map(str::to_string),
        _ if rule.content.is_empty() => None,
        _ => Some(rule.content.clone()),
    };

    MatchResult {
        matched: outcome.matched,
        rule: rule.original.clone(),
        line_number: rule.line_number,
        rule_type: rule.rule_type.clone(),
        policy: rule.policy.clone(),
        explanation: explain::terse(outcome.matched, &outcome.reason),
        detailed_explanation: explain::detailed(rule, outcome.matched, &outcome.reason),
        matched_content: outcome.matched_content,
        match_range: outcome.match_range,
        match_position,
    }
}

pub(crate) fn evaluate(condition: &Condition, request: &TestRequest, context: &MatchContext) -> Outcome {
    match condition {
        Condition::Leaf(predicate) => evaluate_predicate(predicate, request, context),
        Condition::And(clauses) => {
            let mut reports = Vec::with_capacity(clauses.len());
            let mut matched = true;
            for clause in clauses {
                let report = evaluate_clause(clause, request, context);
                matched = report.matched;
                reports.push(report);
                if !matched {
                    break;
                }
            }
            Outcome::new(
                matched,
                Reason::Logical {
                    op: LogicalOp::And,
                    clauses: reports,
                },
            )
        }
        Condition::Or(clauses) => {
            let mut reports = Vec::with_capacity(clauses.len());
            let mut matched = false;
            for clause in clauses {
                let report = evaluate_clause(clause, request, context);
                matched = report.matched;
                reports.push(report);
                if matched {
                    break;
                }
            }
            Outcome::new(
                matched,
                Reason::Logical {
                    op: LogicalOp::Or,
                    clauses: reports,
                },
            )
        }
        Condition::Not(clause) => {
            let report = evaluate_clause(clause, request, context);
            Outcome::new(
                !report.matched,
                Reason::Logical {
                    op: LogicalOp::Not,
                    clauses: vec![report],
                },
            )
        }
        Condition::Invalid(message) => Outcome::new(false, Reason::Invalid(message.clone())),
    }
}

fn evaluate_clause(
    clause: &Clause,
    request: &TestRequest,
    context: &MatchContext,
) -> ClauseReport {
    let outcome = evaluate(&clause.condition, request, context);
    ClauseReport {
        text: clause.text.clone(),
        matched: outcome.matched,
        reason: outcome.reason,
    }
}

fn evaluate_predicate(predicate: &Predicate, request: &TestRequest, context: &MatchContext) -> Outcome {
    match predicate {
        Predicate::Domain(v) => domain::exact(request, v),
        Predicate::DomainSuffix(v) => domain::suffix(request, v),
        Predicate::DomainKeyword(v) => domain::keyword(request, v),
        Predicate::DomainRegex(p) => domain::regex(Field::Domain, request.domain.as_deref(), p),
        Predicate::IpCidr(v) => ip::ipv4_cidr(Field::Ipv4, request.ipv4(), v),
        Predicate::IpCidr6(v) => ip::ipv6_cidr(Field::Ipv6, request.ipv6(), v),
        Predicate::SrcIpCidr(v) => ip::family_cidr(
            Field::SrcIp,
            request.src_ipv4.as_deref(),
            request.src_ipv6.as_deref(),
            v,
        ),
        Predicate::DstIpCidr(v) => ip::family_cidr(
            Field::DstIp,
            request.dst_ipv4.as_deref(),
            request.dst_ipv6.as_deref(),
            v,
        ),
        Predicate::GeoIp(v) => geoip::country(request, context, v),
        Predicate::IpAsn(v) => geoip::asn(request, context, v),
        Predicate::GeoSite(v) => geosite::category(request, context, v),
        Predicate::ProcessName(v) => compare(
            Field::Process,
            request.process.as_deref(),
            Comparison::Equals,
            v,
            |p| p == v,
        ),
        Predicate::ProcessPath(v) => compare(
            Field::ProcessPath,
            request.process_path.as_deref(),
            Comparison::Contains,
            v,
            |p| p.contains(v.as_str()),
        ),
        Predicate::ProcessPathRegex(p) => {
            domain::regex(Field::ProcessPath, request.process_path.as_deref(), p)
        }
        Predicate::DstPort(v) => port::port(Field::DstPort, request.dst_port.as_deref(), v),
        Predicate::SrcPort(v) => port::port(Field::SrcPort, request.src_port.as_deref(), v),
        Predicate::InPort(v) => port::port(
            Field::InPort,
            request.dst_port.as_deref().or(request.src_port.as_deref()),
            v,
        ),
        Predicate::RuleSet(name) => match context.rule_set_data.get(&name.to_lowercase()) {
            Some(test) => Outcome::new(
                test(request),
                Reason::RuleSet {
                    name: name.clone(),
                    known: true,
                },
            ),
            None => Outcome::new(
                false,
                Reason::RuleSet {
                    name: name.clone(),
                    known: false,
                },
            ),
        },
        Predicate::Network(v) => compare(
            Field::Network,
            request.network.as_deref(),
            Comparison::Equals,
            v,
            |n| n == v,
        ),
        Predicate::Uid(v) => compare(
            Field::Uid,
            request.uid.as_deref(),
            Comparison::Equals,
            v,
            |u| u == v,
        ),
        Predicate::Match => Outcome::new(true, Reason::Always),
        Predicate::Unsupported(rule_type) => {
            Outcome::new(false, Reason::Unsupported(rule_type.clone()))
        }
    }
}

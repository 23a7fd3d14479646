use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuleError};

/// Clash rule type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleType {
    Domain,
    DomainSuffix,
    DomainKeyword,
    DomainRegex,
    IpCidr,
    IpCidr6,
    IpAsn,
    GeoIp,
    GeoSite,
    ProcessName,
    ProcessPath,
    ProcessPathRegex,
    DstPort,
    SrcPort,
    InPort,
    SrcIpCidr,
    DstIpCidr,
    RuleSet,
    And,
    Or,
    Not,
    SubRule,
    Network,
    Uid,
    InType,
    Match,
}

impl RuleType {
    /// Every recognised rule type, in documentation order.
    pub const ALL: [RuleType; 26] = [
        RuleType::Domain,
        RuleType::DomainSuffix,
        RuleType::DomainKeyword,
        RuleType::DomainRegex,
        RuleType::IpCidr,
        RuleType::IpCidr6,
        RuleType::IpAsn,
        RuleType::GeoIp,
        RuleType::GeoSite,
        RuleType::ProcessName,
        RuleType::ProcessPath,
        RuleType::ProcessPathRegex,
        RuleType::DstPort,
        RuleType::SrcPort,
        RuleType::InPort,
        RuleType::SrcIpCidr,
        RuleType::DstIpCidr,
        RuleType::RuleSet,
        RuleType::And,
        RuleType::Or,
        RuleType::Not,
        RuleType::SubRule,
        RuleType::Network,
        RuleType::Uid,
        RuleType::InType,
        RuleType::Match,
    ];

    /// The token as written in rule text.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Domain => "DOMAIN",
            RuleType::DomainSuffix => "DOMAIN-SUFFIX",
            RuleType::DomainKeyword => "DOMAIN-KEYWORD",
            RuleType::DomainRegex => "DOMAIN-REGEX",
            RuleType::IpCidr => "IP-CIDR",
            RuleType::IpCidr6 => "IP-CIDR6",
            RuleType::IpAsn => "IP-ASN",
            RuleType::GeoIp => "GEOIP",
            RuleType::GeoSite => "GEOSITE",
            RuleType::ProcessName => "PROCESS-NAME",
            RuleType::ProcessPath => "PROCESS-PATH",
            RuleType::ProcessPathRegex => "PROCESS-PATH-REGEX",
            RuleType::DstPort => "DST-PORT",
            RuleType::SrcPort => "SRC-PORT",
            RuleType::InPort => "IN-PORT",
            RuleType::SrcIpCidr => "SRC-IP-CIDR",
            RuleType::DstIpCidr => "DST-IP-CIDR",
            RuleType::RuleSet => "RULE-SET",
            RuleType::And => "AND",
            RuleType::Or => "OR",
            RuleType::Not => "NOT",
            RuleType::SubRule => "SUB-RULE",
            RuleType::Network => "NETWORK",
            RuleType::Uid => "UID",
            RuleType::InType => "IN-TYPE",
            RuleType::Match => "MATCH",
        }
    }

    /// AND / OR / NOT
    pub fn is_logical(&self) -> bool {
        matches!(self, RuleType::And | RuleType::Or | RuleType::Not)
    }

    /// DST-PORT / SRC-PORT / IN-PORT
    pub fn is_port(&self) -> bool {
        matches!(self, RuleType::DstPort | RuleType::SrcPort | RuleType::InPort)
    }
}

impl FromStr for RuleType {
    type Err = RuleError;

    /// Rule type tokens are case-sensitive.
    fn from_str(s: &str) -> Result<Self> {
        RuleType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RuleError::UnknownRuleType(s.to_string()))
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection descriptor to be matched against the rule list.
///
/// Every field is optional. A rule whose type needs an absent field does not match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(rename = "srcIPv4", default, skip_serializing_if = "Option::is_none")]
    pub src_ipv4: Option<String>,
    #[serde(rename = "srcIPv6", default, skip_serializing_if = "Option::is_none")]
    pub src_ipv6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<String>,
    #[serde(rename = "dstIPv4", default, skip_serializing_if = "Option::is_none")]
    pub dst_ipv4: Option<String>,
    #[serde(rename = "dstIPv6", default, skip_serializing_if = "Option::is_none")]
    pub dst_ipv6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<String>,
    #[serde(rename = "geoIP", default, skip_serializing_if = "Option::is_none")]
    pub geo_ip: Option<String>,
}

impl TestRequest {
    /// Create an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a request from its JSON form (`{"domain": "...", "dstPort": "443"}`)
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_process(mut self, process: impl Into<String>) -> Self {
        self.process = Some(process.into());
        self
    }

    pub fn with_process_path(mut self, path: impl Into<String>) -> Self {
        self.process_path = Some(path.into());
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_src_ipv4(mut self, ip: impl Into<String>) -> Self {
        self.src_ipv4 = Some(ip.into());
        self
    }

    pub fn with_src_ipv6(mut self, ip: impl Into<String>) -> Self {
        self.src_ipv6 = Some(ip.into());
        self
    }

    pub fn with_src_port(mut self, port: impl Into<String>) -> Self {
        self.src_port = Some(port.into());
        self
    }

    pub fn with_dst_ipv4(mut self, ip: impl Into<String>) -> Self {
        self.dst_ipv4 = Some(ip.into());
        self
    }

    pub fn with_dst_ipv6(mut self, ip: impl Into<String>) -> Self {
        self.dst_ipv6 = Some(ip.into());
        self
    }

    pub fn with_dst_port(mut self, port: impl Into<String>) -> Self {
        self.dst_port = Some(port.into());
        self
    }

    pub fn with_geo_ip(mut self, country: impl Into<String>) -> Self {
        self.geo_ip = Some(country.into());
        self
    }

    /// IPv4 used by IP-CIDR, GEOIP and IP-ASN: destination first, then source.
    pub(crate) fn ipv4(&self) -> Option<&str> {
        self.dst_ipv4.as_deref().or(self.src_ipv4.as_deref())
    }

    /// IPv6 used by IP-CIDR6: destination first, then source.
    pub(crate) fn ipv6(&self) -> Option<&str> {
        self.dst_ipv6.as_deref().or(self.src_ipv6.as_deref())
    }
}

/// Result of evaluating one rule against a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub matched: bool,
    /// Original rule text
    pub rule: String,
    pub line_number: usize,
    pub rule_type: String,
    pub policy: String,
    /// Short English summary
    pub explanation: String,
    /// Narrative citing the line number, the rule and the reasoning
    pub detailed_explanation: String,
    /// The request value the rule was compared against
    pub matched_content: String,
    /// For CIDR rules, the concrete address range the rule covers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_range: Option<String>,
    /// The rule's literal value operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_position: Option<String>,
}

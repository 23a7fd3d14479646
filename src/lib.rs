//! Clash Rule Engine - parsing, validation and matching of Clash routing rules
//!
//! This library turns Clash rule text into an executable rule list and tests
//! connection descriptors against it:
//! - Domain matching (exact, suffix, keyword, regex)
//! - IPv4 and IPv6 CIDR matching
//! - GeoIP, IP-ASN and GeoSite matching against injected lookup tables
//! - Port, process, network and UID filtering
//! - AND / OR / NOT logical rules compiled once into a condition tree
//! - Human readable explanations for every decision
//! - LRU caching of test results
//!
//! # Example
//!
//! ```rust
//! use clash_rule_engine::{RuleEngine, TestRequest};
//!
//! let mut engine = RuleEngine::new();
//! engine.update_rules("
//! IP-CIDR,192.168.0.0/16,DIRECT
//! DOMAIN-SUFFIX,google.com,PROXY
//! AND,(NETWORK,udp),(DST-PORT,443),REJECT
//! MATCH,PROXY
//! ");
//!
//! let request = TestRequest::new().with_domain("www.google.com");
//! if let Some(result) = engine.test_request(&request) {
//!     println!("{} -> {}", result.rule, result.policy);
//!     println!("{}", result.detailed_explanation);
//! }
//! ```
//!
//! # Rule Syntax
//!
//! One rule per line:
//! ```text
//! TYPE,value,POLICY[,extra]
//! MATCH,POLICY
//! AND,(TYPE,value),(TYPE,value),POLICY
//! ```
//!
//! Lines starting with `#` are comments. Fields are split on commas outside
//! parentheses, so logical conditions keep their inner commas.
//!
//! | Type | Example | Matches |
//! |------|---------|---------|
//! | `DOMAIN` | `DOMAIN,example.com,DIRECT` | Exact domain |
//! | `DOMAIN-SUFFIX` | `DOMAIN-SUFFIX,google.com,PROXY` | Domain ending with value |
//! | `DOMAIN-KEYWORD` | `DOMAIN-KEYWORD,ads,REJECT` | Domain containing value |
//! | `DOMAIN-REGEX` | `DOMAIN-REGEX,^ad\d+\.,REJECT` | Domain regex, case-insensitive |
//! | `IP-CIDR` | `IP-CIDR,10.0.0.0/8,DIRECT` | IPv4 in network |
//! | `IP-CIDR6` | `IP-CIDR6,2001:db8::/32,DIRECT` | IPv6 in network |
//! | `GEOIP` | `GEOIP,CN,DIRECT` | Country code |
//! | `GEOSITE` | `GEOSITE,google,PROXY` | GeoSite category |
//! | `DST-PORT` | `DST-PORT,80-443,PROXY` | Port, range or list |
//! | `MATCH` | `MATCH,PROXY` | Everything |

pub mod compile;
pub mod engine;
pub mod error;
pub mod explain;
pub mod matcher;
pub mod parser;
pub mod types;
pub mod validator;

// Re-export commonly used items
pub use compile::{
    compile_rules, CompiledRule, Condition, Predicate, DEFAULT_MAX_LOGICAL_DEPTH, DEFAULT_POLICY,
};
pub use engine::{EngineOptions, RuleEngine, RuleValidationResult, DEFAULT_CACHE_SIZE};
pub use error::{Result, RuleError};
pub use matcher::{match_request, match_rule, MatchContext, RuleSetPredicate};
pub use parser::{
    parse_rules_file, parse_rules_text, split_by_comma_outside_parens, LineKind, ParsedLine,
};
pub use types::{MatchResult, RuleType, TestRequest};
pub use validator::{
    validate_rules_text, ColumnRange, Severity, ValidationContext, ValidationIssue,
};

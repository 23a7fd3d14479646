//! Engine module.
//!
//! Holds the current rule text, the compiled rules and the lookup tables, and
//! answers test requests against them.

use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compile::{compile_rules, CompiledRule, DEFAULT_MAX_LOGICAL_DEPTH, DEFAULT_POLICY};
use crate::error::{Result, RuleError};
use crate::matcher::{lowercase_keys, match_request, MatchContext, RuleSetPredicate};
use crate::parser::parse_rules_text;
use crate::types::{MatchResult, TestRequest};
use crate::validator::{validate_rules_text, Severity, ValidationContext};

/// Default LRU cache size
pub const DEFAULT_CACHE_SIZE: usize = 1024;

/// Engine options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineOptions {
    /// LRU cache size for test results, 0 disables the cache
    pub cache_size: usize,
    /// Nesting cap for AND/OR/NOT rules
    pub max_logical_depth: usize,
    /// Policy for rules written without one
    pub default_policy: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            max_logical_depth: DEFAULT_MAX_LOGICAL_DEPTH,
            default_policy: DEFAULT_POLICY.to_string(),
        }
    }
}

impl EngineOptions {
    /// Create new engine options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cache size.
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Set the logical rule nesting cap.
    pub fn with_max_logical_depth(mut self, depth: usize) -> Self {
        self.max_logical_depth = depth;
        self
    }

    /// Set the policy used when a rule has none.
    pub fn with_default_policy(mut self, policy: impl Into<String>) -> Self {
        self.default_policy = policy.into();
        self
    }

    /// Parse options from JSON; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_logical_depth == 0 {
            return Err(RuleError::InvalidOptions(
                "max_logical_depth must be at least 1".to_string(),
            ));
        }
        if self.default_policy.trim().is_empty() {
            return Err(RuleError::InvalidOptions(
                "default_policy must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validation finding in the flat shape shown next to the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleValidationResult {
    pub line_number: usize,
    pub rule: String,
    pub error: String,
    pub severity: Severity,
}

type ResultCache = Mutex<LruCache<TestRequest, Option<MatchResult>>>;

/// Stateful rule engine.
///
/// Rules are rebuilt wholesale on every [`RuleEngine::update_rules`]. Lookup
/// tables are swapped copy-on-write, so a [`MatchContext`] obtained from
/// [`RuleEngine::context`] stays a consistent snapshot.
pub struct RuleEngine {
    rules_text: String,
    rules: Vec<CompiledRule>,
    context: Arc<MatchContext>,
    options: EngineOptions,
    cache: Option<ResultCache>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::build(EngineOptions::default())
    }
}

impl RuleEngine {
    /// Create an empty engine with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty engine with the given options.
    pub fn with_options(options: EngineOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::build(options))
    }

    fn build(options: EngineOptions) -> Self {
        let cache = NonZeroUsize::new(options.cache_size).map(|size| Mutex::new(LruCache::new(size)));
        Self {
            rules_text: String::new(),
            rules: Vec::new(),
            context: Arc::new(MatchContext::default()),
            options,
            cache,
        }
    }

    /// Replace the rule text and recompile every rule.
    pub fn update_rules(&mut self, text: &str) {
        let lines = parse_rules_text(text);
        self.rules = compile_rules(
            &lines,
            &self.options.default_policy,
            self.options.max_logical_depth,
        );
        self.rules_text = text.to_string();
        debug!(rules = self.rules.len(), "rules updated");
        self.clear_cache();
    }

    /// Read rule text from a file and apply it.
    pub fn load_rules_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| RuleError::ReadRules {
            path: path.display().to_string(),
            source,
        })?;
        self.update_rules(&text);
        Ok(())
    }

    /// Test a request against the current rules and lookup tables.
    ///
    /// Results are cached until the rules or any table change.
    pub fn test_request(&self, request: &TestRequest) -> Option<MatchResult> {
        let Some(cache) = &self.cache else {
            return match_request(&self.rules, request, &self.context);
        };

        let mut cache = cache.lock();
        if let Some(cached) = cache.get(request) {
            return cached.clone();
        }

        // Computed under the lock so concurrent callers do not repeat the work.
        let result = match_request(&self.rules, request, &self.context);
        cache.put(request.clone(), result.clone());
        result
    }

    /// Test a request against the current rules with an explicit context. Not cached.
    pub fn test_request_with(
        &self,
        request: &TestRequest,
        context: &MatchContext,
    ) -> Option<MatchResult> {
        match_request(&self.rules, request, context)
    }

    pub fn set_geoip_database(&mut self, data: HashMap<String, String>) {
        Arc::make_mut(&mut self.context).geoip_database = data;
        self.clear_cache();
    }

    pub fn set_geosite_data(&mut self, data: HashMap<String, Vec<String>>) {
        Arc::make_mut(&mut self.context).geosite_data = lowercase_keys(data);
        self.clear_cache();
    }

    pub fn set_asn_data(&mut self, data: HashMap<String, String>) {
        Arc::make_mut(&mut self.context).asn_data = data;
        self.clear_cache();
    }

    pub fn set_rule_set_data(&mut self, data: HashMap<String, RuleSetPredicate>) {
        Arc::make_mut(&mut self.context).rule_set_data = lowercase_keys(data);
        self.clear_cache();
    }

    /// Number of compiled rules
    pub fn get_rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn rules_text(&self) -> &str {
        &self.rules_text
    }

    pub fn context(&self) -> Arc<MatchContext> {
        Arc::clone(&self.context)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Clear the result cache
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
            debug!("result cache cleared");
        }
    }

    /// Validate the current rule text against the built-in vocabularies.
    pub fn validate_rules(&self) -> Vec<RuleValidationResult> {
        self.validate_rules_with(&ValidationContext::default())
    }

    /// Validate the current rule text against caller-supplied vocabularies.
    ///
    /// The nesting cap always comes from the engine options, so the
    /// validator flags exactly the logical rules the engine cannot match.
    pub fn validate_rules_with(&self, context: &ValidationContext) -> Vec<RuleValidationResult> {
        let context = context
            .clone()
            .with_max_logical_depth(self.options.max_logical_depth);
        validate_rules_text(&self.rules_text, &context)
            .into_iter()
            .map(|issue| RuleValidationResult {
                line_number: issue.line_number,
                rule: issue.rule,
                error: issue.message,
                severity: issue.severity,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.cache_size, DEFAULT_CACHE_SIZE);
        assert_eq!(options.max_logical_depth, DEFAULT_MAX_LOGICAL_DEPTH);
        assert_eq!(options.default_policy, "DIRECT");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_from_json() {
        let options = EngineOptions::from_json(r#"{"cacheSize": 0, "defaultPolicy": "PROXY"}"#).unwrap();
        assert_eq!(options.cache_size, 0);
        assert_eq!(options.default_policy, "PROXY");
        assert_eq!(options.max_logical_depth, DEFAULT_MAX_LOGICAL_DEPTH);

        assert!(matches!(
            EngineOptions::from_json(r#"{"maxLogicalDepth": 0}"#),
            Err(RuleError::InvalidOptions(_))
        ));
        assert!(matches!(
            EngineOptions::from_json("{not json"),
            Err(RuleError::Json(_))
        ));
    }

    #[test]
    fn test_with_options_rejects_invalid() {
        let options = EngineOptions::new().with_max_logical_depth(0);
        assert!(RuleEngine::with_options(options).is_err());
        let options = EngineOptions::new().with_default_policy("  ");
        assert!(RuleEngine::with_options(options).is_err());
    }

    #[test]
    fn test_update_rules() {
        let mut engine = RuleEngine::new();
        engine.update_rules("# comment\n\nDOMAIN,a.com,PROXY\nDOMAIN-SUFFIX,b.com\nGEOIP\nMATCH,DIRECT");
        assert_eq!(engine.get_rule_count(), 3);
        assert_eq!(engine.rules()[1].policy, "DIRECT");
        assert_eq!(engine.rules()[2].rule_type, "MATCH");
        assert!(engine.rules_text().starts_with("# comment"));
    }

    #[test]
    fn test_default_policy_option() {
        let options = EngineOptions::new().with_default_policy("REJECT");
        let mut engine = RuleEngine::with_options(options).unwrap();
        engine.update_rules("DOMAIN,a.com");
        assert_eq!(engine.rules()[0].policy, "REJECT");
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let mut engine = RuleEngine::new();
        engine.update_rules("DOMAIN,a.com,PROXY");
        let req = TestRequest::new().with_domain("a.com");

        let first = engine.test_request(&req).unwrap();
        let second = engine.test_request(&req).unwrap();
        assert_eq!(first, second);

        engine.update_rules("DOMAIN,a.com,REJECT");
        assert_eq!(engine.test_request(&req).unwrap().policy, "REJECT");
    }

    #[test]
    fn test_cache_none_result() {
        let mut engine = RuleEngine::new();
        engine.update_rules("DOMAIN,a.com,PROXY");
        let req = TestRequest::new().with_domain("b.com");
        assert!(engine.test_request(&req).is_none());
        assert!(engine.test_request(&req).is_none());
    }

    #[test]
    fn test_setter_clears_cache() {
        let mut engine = RuleEngine::new();
        engine.update_rules("GEOIP,CN,DIRECT\nMATCH,PROXY");
        let req = TestRequest::new().with_dst_ipv4("114.114.114.114");
        assert_eq!(engine.test_request(&req).unwrap().policy, "PROXY");

        let mut db = HashMap::new();
        db.insert("114.114.114.114".to_string(), "CN".to_string());
        engine.set_geoip_database(db);
        assert_eq!(engine.test_request(&req).unwrap().policy, "DIRECT");
    }

    #[test]
    fn test_context_snapshot_survives_update() {
        let mut engine = RuleEngine::new();
        let snapshot = engine.context();
        let mut asn = HashMap::new();
        asn.insert("1.1.1.1".to_string(), "13335".to_string());
        engine.set_asn_data(asn);
        assert!(snapshot.asn_data.is_empty());
        assert_eq!(engine.context().asn_data.len(), 1);
    }

    #[test]
    fn test_uncached_engine() {
        let options = EngineOptions::new().with_cache_size(0);
        let mut engine = RuleEngine::with_options(options).unwrap();
        engine.update_rules("MATCH,PROXY");
        let req = TestRequest::new();
        assert_eq!(engine.test_request(&req).unwrap().policy, "PROXY");
        engine.clear_cache();
    }

    #[test]
    fn test_validate_rules_shape() {
        let mut engine = RuleEngine::new();
        engine.update_rules("DOMAIN,a.com,PROXY\nFOO,bar,DIRECT");
        let results = engine.validate_rules();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].line_number, 2);
        assert_eq!(results[0].severity, Severity::Error);
        assert_eq!(results[0].rule, "FOO,bar,DIRECT");

        let json = serde_json::to_value(&results[0]).unwrap();
        assert_eq!(json["lineNumber"], 2);
        assert_eq!(json["severity"], "error");
    }

    #[test]
    fn test_validate_rules_uses_engine_depth() {
        let options = EngineOptions::new().with_max_logical_depth(1);
        let mut engine = RuleEngine::with_options(options).unwrap();
        engine.update_rules("AND,(AND,(DOMAIN,a.com)),PROXY");
        assert!(engine.test_request(&TestRequest::new().with_domain("a.com")).is_none());

        let results = engine.validate_rules();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, Severity::Warning);

        let context = ValidationContext::new().with_max_logical_depth(DEFAULT_MAX_LOGICAL_DEPTH);
        assert_eq!(engine.validate_rules_with(&context).len(), 1);

        let mut engine = RuleEngine::new();
        engine.update_rules("AND,(AND,(DOMAIN,a.com)),PROXY");
        assert!(engine.validate_rules().is_empty());
    }

    #[test]
    fn test_load_rules_file() {
        let path = std::env::temp_dir().join("clash_rule_engine_engine_test.txt");
        fs::write(&path, "DOMAIN,a.com,PROXY\nMATCH,DIRECT\n").unwrap();
        let mut engine = RuleEngine::new();
        engine.load_rules_file(&path).unwrap();
        assert_eq!(engine.get_rule_count(), 2);
        fs::remove_file(&path).unwrap();

        assert!(matches!(
            engine.load_rules_file("/nonexistent/rules.txt"),
            Err(RuleError::ReadRules { .. })
        ));
        assert_eq!(engine.get_rule_count(), 2);
    }
}

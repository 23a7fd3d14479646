use super::{compare, Outcome};
use crate::compile::Pattern;
use crate::explain::{Comparison, Field, Reason};
use crate::types::TestRequest;

/// DOMAIN: exact string equality
pub(super) fn exact(request: &TestRequest, expected: &str) -> Outcome {
    compare(
        Field::Domain,
        request.domain.as_deref(),
        Comparison::Equals,
        expected,
        |d| d == expected,
    )
}

/// DOMAIN-SUFFIX: plain string suffix, no label boundary
pub(super) fn suffix(request: &TestRequest, expected: &str) -> Outcome {
    compare(
        Field::Domain,
        request.domain.as_deref(),
        Comparison::SuffixOrEquals,
        expected,
        |d| d == expected || d.ends_with(expected),
    )
}

/// DOMAIN-KEYWORD: substring containment
pub(super) fn keyword(request: &TestRequest, expected: &str) -> Outcome {
    compare(
        Field::Domain,
        request.domain.as_deref(),
        Comparison::Contains,
        expected,
        |d| d.contains(expected),
    )
}

/// DOMAIN-REGEX / PROCESS-PATH-REGEX. A pattern that failed to compile never matches.
pub(super) fn regex(field: Field, actual: Option<&str>, pattern: &Pattern) -> Outcome {
    let Some(actual) = actual else {
        return Outcome::missing(field);
    };
    match pattern.regex() {
        Ok(re) => compare(
            field,
            Some(actual),
            Comparison::Regex,
            pattern.source(),
            |v| re.is_match(v),
        ),
        Err(error) => Outcome::new(
            false,
            Reason::InvalidPattern {
                pattern: pattern.source().to_string(),
                error: error.to_string(),
            },
        )
        .with_content(actual),
    }
}

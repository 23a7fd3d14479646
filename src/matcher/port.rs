use super::Outcome;
use crate::explain::{Comparison, Field, Reason};

/// `start-end`, inclusive. `None` when either bound is not a number.
fn parse_range(spec: &str) -> Option<(u32, u32)> {
    let (start, end) = spec.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

/// One list element: an exact port or a range.
fn element_matches(element: &str, port: &str) -> bool {
    let element = element.trim();
    if element == port {
        return true;
    }
    match (parse_range(element), port.parse::<u32>()) {
        (Some((start, end)), Ok(p)) => start <= p && p <= end,
        _ => false,
    }
}

/// DST-PORT / SRC-PORT / IN-PORT.
///
/// The rule value is tried as an exact string, then as a comma list of ports
/// and ranges, then as a single `start-end` range.
pub(super) fn port(field: Field, port: Option<&str>, spec: &str) -> Outcome {
    let Some(port) = port else {
        return Outcome::missing(field);
    };
    let port = port.trim();
    let spec = spec.trim();

    let (matched, op) = if spec == port {
        (true, Comparison::Equals)
    } else if spec.contains(',') {
        (
            spec.split(',').any(|e| element_matches(e, port)),
            Comparison::InList,
        )
    } else if spec.contains('-') {
        match (parse_range(spec), port.parse::<u32>()) {
            (Some((start, end)), Ok(p)) => (start <= p && p <= end, Comparison::InRange),
            (None, _) => return Outcome::invalid_operand("port range", spec).with_content(port),
            (_, Err(_)) => return Outcome::invalid_operand("port", port).with_content(port),
        }
    } else {
        (false, Comparison::Equals)
    };

    Outcome::new(
        matched,
        Reason::Compare {
            field,
            actual: port.to_string(),
            op,
            expected: spec.to_string(),
        },
    )
    .with_content(port)
}

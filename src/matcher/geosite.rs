use super::{MatchContext, Outcome};
use crate::explain::{Field, Reason};
use crate::types::TestRequest;

/// GEOSITE: the request domain equals, or ends with, any domain listed for
/// the category. Categories are looked up in lower case.
pub(super) fn category(request: &TestRequest, context: &MatchContext, name: &str) -> Outcome {
    let Some(domain) = request.domain.as_deref() else {
        return Outcome::missing(Field::Domain);
    };

    let entries = context.geosite_data.get(&name.to_lowercase());
    let hit = entries.and_then(|list| {
        list.iter()
            .find(|entry| domain == entry.as_str() || domain.ends_with(entry.as_str()))
            .cloned()
    });

    Outcome::new(
        hit.is_some(),
        Reason::GeoSite {
            category: name.to_string(),
            domain: domain.to_string(),
            hit,
            known: entries.is_some(),
        },
    )
    .with_content(domain)
}

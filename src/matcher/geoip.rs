use std::collections::HashMap;

use super::{compare, MatchContext, Outcome};
use crate::explain::{Comparison, Field, Reason, Table};
use crate::types::TestRequest;

/// GEOIP: the request's own country when given, otherwise a lookup of its
/// IPv4 address in the injected GeoIP table. Country codes compare ignoring case.
pub(super) fn country(request: &TestRequest, context: &MatchContext, expected: &str) -> Outcome {
    if let Some(country) = request.geo_ip.as_deref() {
        return compare(
            Field::Country,
            Some(country),
            Comparison::EqualsIgnoreCase,
            expected,
            |c| c.eq_ignore_ascii_case(expected),
        );
    }

    lookup(Table::GeoIp, request, &context.geoip_database, expected, |found| {
        found.eq_ignore_ascii_case(expected)
    })
}

/// IP-ASN: lookup of the request's IPv4 address in the injected ASN table.
pub(super) fn asn(request: &TestRequest, context: &MatchContext, expected: &str) -> Outcome {
    lookup(Table::Asn, request, &context.asn_data, expected, |found| {
        found == expected
    })
}

fn lookup(
    table: Table,
    request: &TestRequest,
    data: &HashMap<String, String>,
    expected: &str,
    test: impl FnOnce(&str) -> bool,
) -> Outcome {
    let Some(ip) = request.ipv4() else {
        return Outcome::missing(Field::Ipv4);
    };
    let found = data.get(ip.trim());
    let matched = found.is_some_and(|f| test(f.as_str()));

    Outcome::new(
        matched,
        Reason::Lookup {
            table,
            key: ip.to_string(),
            found: found.cloned(),
            expected: expected.to_string(),
        },
    )
    .with_content(found.map(String::as_str).unwrap_or(ip))
}

//! Lexical domain-name helpers used by the policy engine and the cache.

/// Canonicalize a domain name: lowercase, without the trailing dot.
///
/// Canonicalization is idempotent: `canonical_name(canonical_name(d))`
/// equals `canonical_name(d)` for any input.
pub fn canonical_name(domain: &str) -> String {
    domain.trim_end_matches('.').to_lowercase()
}

/// Match a wildcard pattern against a canonical domain name.
///
/// `*` stands for one or more DNS labels. Matching is anchored at both
/// ends: `*.example.com` does not match the apex `example.com`, and
/// `suffix.*` does not match the bare `suffix`. Both arguments are
/// compared case-insensitively.
pub fn wildcard_matches(wildcard: &str, domain: &str) -> bool {
    let wildcard = canonical_name(wildcard);
    let domain = canonical_name(domain);
    match_labels(
        &wildcard.split('.').collect::<Vec<_>>(),
        &domain.split('.').collect::<Vec<_>>(),
    )
}

fn match_labels(pattern: &[&str], labels: &[&str]) -> bool {
    match pattern.split_first() {
        None => labels.is_empty(),
        Some((&"*", rest)) => {
            // One or more labels.
            (1..=labels.len()).any(|n| match_labels(rest, &labels[n..]))
        }
        Some((first, rest)) => match labels.split_first() {
            Some((label, tail)) => first == label && match_labels(rest, tail),
            None => false,
        },
    }
}

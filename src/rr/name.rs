//! Helpers for domain names held as presentation strings.
//!
//! Names ending in an unescaped `.` are absolute. Anything else is relative to some origin, with
//! `@` (or the empty string) standing for the origin itself.

use std::cmp::Ordering;

/// True when `name` ends with an unescaped dot.
#[must_use]
pub fn is_fqdn(name: &str) -> bool {
    if !name.ends_with('.') {
        return false;
    }
    let backslashes = name[..name.len() - 1]
        .bytes()
        .rev()
        .take_while(|b| *b == b'\\')
        .count();
    backslashes % 2 == 0
}

/// Append the root label if `name` isn't already absolute.
#[must_use]
pub fn fqdn(name: &str) -> String {
    if is_fqdn(name) {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Strip exactly one trailing `origin` from `name`. The origin itself becomes `@`; names outside
/// the origin and relative names are returned unchanged.
#[must_use]
pub fn relative_name(name: &str, origin: &str) -> String {
    if !is_fqdn(name) {
        return name.to_string();
    }
    let origin = fqdn(origin);
    if name.eq_ignore_ascii_case(&origin) {
        return "@".to_string();
    }
    if origin == "." {
        return name[..name.len() - 1].to_string();
    }
    match name.len().checked_sub(origin.len() + 1) {
        // The separator before the origin must be an unescaped dot.
        Some(idx)
            if name.as_bytes()[idx] == b'.'
                && name[idx + 1..].eq_ignore_ascii_case(&origin)
                && is_fqdn(&name[..=idx]) =>
        {
            name[..idx].to_string()
        }
        _ => name.to_string(),
    }
}

/// Inverse of [`relative_name`]: qualify a relative name with `origin`.
#[must_use]
pub fn absolute_name(name: &str, origin: &str) -> String {
    if is_fqdn(name) {
        return name.to_string();
    }
    let origin = fqdn(origin);
    if name.is_empty() || name == "@" {
        return origin;
    }
    if origin == "." {
        return format!("{name}.");
    }
    format!("{name}.{origin}")
}

/// Normalize a subdomain key of the service map: no trailing dot, no origin, `""` for the apex.
#[must_use]
pub fn normalize_subdomain(subdomain: &str, origin: &str) -> String {
    let rel = relative_name(subdomain, origin);
    if rel == "@" {
        return String::new();
    }
    rel.trim_end_matches('.').to_string()
}

/// Join a label prefix with a subdomain, both relative. The apex is rendered as `@`.
#[must_use]
pub fn join(prefix: &str, subdomain: &str) -> String {
    let subdomain = if subdomain == "@" { "" } else { subdomain };
    match (prefix.is_empty(), subdomain.is_empty()) {
        (true, true) => "@".to_string(),
        (true, false) => subdomain.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}.{subdomain}"),
    }
}

/// The subdomain key owning a relative record name: `@` maps to `""`.
#[must_use]
pub fn subdomain_of(name: &str) -> String {
    if name == "@" {
        String::new()
    } else {
        name.to_string()
    }
}

/// If relative `name` is `<label>.<rest>` (or just `<label>` at the apex) where `label` starts
/// with `prefix`, return `(label, subdomain)`.
#[must_use]
pub fn split_prefixed<'a>(name: &'a str, prefix: &str) -> Option<(&'a str, String)> {
    if name == "@" {
        return None;
    }
    let (label, rest) = match name.split_once('.') {
        Some((label, rest)) => (label, rest.to_string()),
        None => (name, String::new()),
    };
    if label.to_ascii_lowercase().starts_with(prefix) {
        Some((label, rest))
    } else {
        None
    }
}

/// Strip a multi-label relative prefix such as `_smtp._tls` from `name`, returning the subdomain
/// it is attached to.
#[must_use]
pub fn strip_prefix_labels(name: &str, prefix: &str) -> Option<String> {
    let lower = name.to_ascii_lowercase();
    if lower == prefix {
        return Some(String::new());
    }
    lower
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .map(|_| name[prefix.len() + 1..].to_string())
}

/// Split relative `name` around its first label equal to `label`, case-insensitively:
/// `_domainkey` splits `s1._domainkey.sub` into `("s1", "sub")`.
#[must_use]
pub fn split_around_label(name: &str, label: &str) -> Option<(String, String)> {
    if name == "@" {
        return None;
    }
    let labels: Vec<&str> = name.split('.').collect();
    let idx = labels.iter().position(|l| l.eq_ignore_ascii_case(label))?;
    Some((labels[..idx].join("."), labels[idx + 1..].join(".")))
}

fn labels(name: &str) -> Vec<String> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "@" {
        return Vec::new();
    }
    trimmed
        .split('.')
        .rev()
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Order names the way DNSSEC canonical ordering does: label by label from the right,
/// case-insensitively, so the apex sorts first and children follow their parent.
#[must_use]
pub fn canonical_cmp(a: &str, b: &str) -> Ordering {
    labels(a).cmp(&labels(b))
}

/// True if `name` is strictly below `parent` (both relative, `""` is the apex).
#[must_use]
pub fn is_strict_subdomain(name: &str, parent: &str) -> bool {
    let name = labels(name);
    let parent = labels(parent);
    name.len() > parent.len() && name.starts_with(&parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "example.com.";

    #[test]
    fn relative_strips_one_origin() {
        assert_eq!(relative_name("www.example.com.", ORIGIN), "www");
        assert_eq!(relative_name("example.com.", ORIGIN), "@");
        assert_eq!(relative_name("EXAMPLE.com.", ORIGIN), "@");
        assert_eq!(relative_name("wwwexample.com.", ORIGIN), "wwwexample.com.");
        assert_eq!(relative_name("www", ORIGIN), "www");
        assert_eq!(
            relative_name("example.com.example.com.", ORIGIN),
            "example.com"
        );
    }

    #[test]
    fn absolute_is_the_inverse() {
        for n in ["www.example.com.", "example.com.", "a.ns.example.", "x.y.example.com."] {
            assert_eq!(absolute_name(&relative_name(n, ORIGIN), ORIGIN), n);
        }
        assert_eq!(absolute_name("", ORIGIN), ORIGIN);
        assert_eq!(absolute_name("a.b.", ORIGIN), "a.b.");
    }

    #[test]
    fn escaped_trailing_dot_is_not_absolute() {
        assert!(is_fqdn("a."));
        assert!(!is_fqdn("a\\."));
        assert!(is_fqdn("a\\\\."));
    }

    #[test]
    fn subdomain_helpers() {
        assert_eq!(normalize_subdomain("@", ORIGIN), "");
        assert_eq!(normalize_subdomain("www.example.com.", ORIGIN), "www");
        assert_eq!(normalize_subdomain("www.", ORIGIN), "www");
        assert_eq!(join("_dmarc", ""), "_dmarc");
        assert_eq!(join("_dmarc", "sub"), "_dmarc.sub");
        assert_eq!(join("", "@"), "@");
        assert_eq!(strip_prefix_labels("_smtp._tls.sub", "_smtp._tls"), Some("sub".into()));
        assert_eq!(strip_prefix_labels("_smtp._tls", "_smtp._tls"), Some(String::new()));
        assert_eq!(strip_prefix_labels("_smtp._tlsx", "_smtp._tls"), None);
        assert_eq!(
            split_prefixed("_acme-challenge.www", "_acme-challenge"),
            Some(("_acme-challenge", "www".to_string()))
        );
        assert_eq!(
            split_around_label("s1._domainkey", "_domainkey"),
            Some(("s1".to_string(), String::new()))
        );
        assert_eq!(
            split_around_label("a.b._domainkey.sub", "_DOMAINKEY"),
            Some(("a.b".to_string(), "sub".to_string()))
        );
        assert_eq!(split_around_label("www", "_domainkey"), None);
    }

    #[test]
    fn canonical_order_puts_parents_first() {
        let mut names = vec!["z", "a.b", "", "b", "a"];
        names.sort_by(|a, b| canonical_cmp(a, b));
        assert_eq!(names, vec!["", "a", "b", "a.b", "z"]);
        assert!(is_strict_subdomain("www.sub", "sub"));
        assert!(is_strict_subdomain("sub", ""));
        assert!(!is_strict_subdomain("sub", "sub"));
    }
}

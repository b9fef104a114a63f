//! Injection-signature detection
//!
//! Pattern-based and intentionally conservative: legitimate text containing
//! SQL-like keywords can trip it. This is a perimeter heuristic, not a
//! guarantee; parameterized queries and output encoding remain the real
//! defense.

use std::sync::LazyLock;

use regex::Regex;

/// What a request was rejected for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// `Origin` not in the allow-list
    ForbiddenOrigin,
    /// HTTP method not in the allow-list
    MethodNotAllowed,
    /// Proxy-spoofing header present
    SpoofedHeader,
    /// SQL-injection signature in params or body
    SqlInjection,
    /// XSS signature in params or body
    Xss,
    /// Body exceeded the configured size limit
    OversizedBody,
}

impl ViolationKind {
    /// Stable identifier used in error bodies, metrics labels, and counter
    /// store keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ForbiddenOrigin => "forbidden_origin",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::SpoofedHeader => "spoofed_header",
            Self::SqlInjection => "sql_injection",
            Self::Xss => "xss",
            Self::OversizedBody => "oversized_body",
        }
    }
}

static SQL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Classic tautologies: 1 OR 1=1, ' OR 'a'='a
        r"(?i)\b(or|and)\s+\d+\s*=\s*\d+",
        r#"(?i)['"]\s*(or|and)\s*['"]?\w*['"]?\s*="#,
        // UNION-based extraction
        r"(?i)\bunion\s+(all\s+)?select\b",
        // Stacked queries: '; DROP TABLE users;
        r"(?i);\s*(drop|delete|insert|update|alter|truncate|create)\b",
        // Time-based probes
        r"(?i)\b(sleep|benchmark|pg_sleep|waitfor)\s*\(",
        // Comment-terminated injections
        r"(?i)(--|#|/\*)\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static SQL pattern must compile"))
    .collect()
});

static XSS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)<\s*script\b",
        r"(?i)<\s*/\s*script\s*>",
        r"(?i)\bjavascript\s*:",
        r"(?i)\bon(load|error|click|mouseover|focus|submit|input)\s*=",
        r"(?i)<\s*(iframe|object|embed)\b",
        r"(?i)\bdata\s*:\s*text/html",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static XSS pattern must compile"))
    .collect()
});

/// True when `input` carries a SQL-injection signature.
#[must_use]
pub fn detect_sql_injection(input: &str) -> bool {
    SQL_PATTERNS.iter().any(|re| re.is_match(input))
}

/// True when `input` carries an XSS signature.
#[must_use]
pub fn detect_xss_attempt(input: &str) -> bool {
    XSS_PATTERNS.iter().any(|re| re.is_match(input))
}

/// Scan one text value, worst violation first.
#[must_use]
pub fn scan_value(input: &str) -> Option<ViolationKind> {
    if detect_sql_injection(input) {
        Some(ViolationKind::SqlInjection)
    } else if detect_xss_attempt(input) {
        Some(ViolationKind::Xss)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_tautologies_detected() {
        assert!(detect_sql_injection("1 OR 1=1"));
        assert!(detect_sql_injection("x' OR '1'='1"));
        assert!(detect_sql_injection("admin' or 'a'='a"));
    }

    #[test]
    fn stacked_queries_detected() {
        assert!(detect_sql_injection("'; DROP TABLE users;"));
        assert!(detect_sql_injection("1; delete from sessions"));
    }

    #[test]
    fn union_select_detected() {
        assert!(detect_sql_injection("id UNION SELECT password FROM users"));
        assert!(detect_sql_injection("union all select 1,2,3"));
    }

    #[test]
    fn legitimate_text_passes() {
        assert!(!detect_sql_injection("John O'Brien"));
        assert!(!detect_sql_injection("42"));
        assert!(!detect_sql_injection("a sensible appointment note"));
        assert!(!detect_sql_injection("union station, platform 2"));
    }

    #[test]
    fn script_tags_detected() {
        assert!(detect_xss_attempt("<script>alert(1)</script>"));
        assert!(detect_xss_attempt("< SCRIPT src=evil.js>"));
        assert!(detect_xss_attempt("javascript:alert(document.cookie)"));
        assert!(detect_xss_attempt("<img onerror=steal()>"));
    }

    #[test]
    fn harmless_markup_passes() {
        assert!(!detect_xss_attempt("<3 this app"));
        assert!(!detect_xss_attempt("price < 100 and quality > 9"));
        assert!(!detect_xss_attempt("a description of scripting languages"));
    }

    #[test]
    fn scan_prefers_sql_over_xss() {
        assert_eq!(
            scan_value("1 OR 1=1 <script>"),
            Some(ViolationKind::SqlInjection)
        );
        assert_eq!(scan_value("<script>x</script>"), Some(ViolationKind::Xss));
        assert_eq!(scan_value("hello"), None);
    }
}

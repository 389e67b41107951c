//! Class-name scope classification.
//!
//! A class is profiled when its fully-qualified name matches one of the
//! search prefixes and none of the ignore prefixes. Signatures arrive in the
//! `Lpkg/Name;` form, so prefix matching skips the one-character type marker.

/// Normalizes a configured scope to the internal path-separator convention.
pub fn normalize_scope(scope: &str) -> String {
    scope.replace('.', "/")
}

/// Prefix-based in-scope/ignored classifier. Both lists are loaded once at
/// configuration time and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ScopeFilter {
    search: Vec<String>,
    ignore: Vec<String>,
}

impl ScopeFilter {
    pub fn new(search: Vec<String>, ignore: Vec<String>) -> Self {
        Self { search, ignore }
    }

    /// True when `signature` matches a search prefix and no ignore prefix.
    pub fn is_in_scope(&self, signature: &str) -> bool {
        Self::matches_any(&self.search, signature) && !Self::matches_any(&self.ignore, signature)
    }

    fn matches_any(prefixes: &[String], signature: &str) -> bool {
        // The signature's first character is a type marker, not part of the
        // class name.
        let name = signature.get(1..).unwrap_or("");
        prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Strips a class signature down to a dotted class name: drops the leading
/// type marker and trailing `;`, converts `/` to `.`, and truncates at a
/// nested-class marker. Signatures too short to carry the markers are
/// returned unchanged.
pub fn clean_signature(signature: &str) -> String {
    // Char-based trimming: class names may contain non-ASCII characters.
    let mut chars = signature.chars();
    if chars.next().is_none() || chars.next_back().is_none() || chars.as_str().is_empty() {
        return signature.to_string();
    }
    let body = chars.as_str();
    let mut cleaned = String::with_capacity(body.len());
    for ch in body.chars() {
        match ch {
            '/' => cleaned.push('.'),
            '$' => break,
            other => cleaned.push(other),
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Naive reference: scan both lists, char-by-char prefix compare.
    fn reference_in_scope(search: &[String], ignore: &[String], signature: &str) -> bool {
        fn prefix_at_one(prefix: &str, signature: &str) -> bool {
            let chars: Vec<char> = signature.chars().collect();
            let want: Vec<char> = prefix.chars().collect();
            if chars.len() < want.len() + 1 {
                return false;
            }
            (0..want.len()).all(|i| chars[i + 1] == want[i])
        }
        search.iter().any(|p| prefix_at_one(p, signature))
            && !ignore.iter().any(|p| prefix_at_one(p, signature))
    }

    #[test]
    fn matches_reference_implementation() {
        let search = vec!["com/acme/".to_string(), "org/demo/App".to_string()];
        let ignore = vec!["com/acme/vendor/".to_string()];
        let filter = ScopeFilter::new(search.clone(), ignore.clone());

        let cases = [
            "Lcom/acme/Widget;",
            "Lcom/acme/vendor/Blob;",
            "Lorg/demo/App;",
            "Lorg/demo/AppServer;",
            "Lorg/other/Thing;",
            "Lcom/acm;",
            "L;",
            "",
        ];
        for signature in cases {
            assert_eq!(
                filter.is_in_scope(signature),
                reference_in_scope(&search, &ignore, signature),
                "mismatch for {signature:?}"
            );
        }
    }

    #[test]
    fn empty_search_matches_nothing() {
        let filter = ScopeFilter::new(Vec::new(), Vec::new());
        assert!(!filter.is_in_scope("Lcom/acme/Widget;"));
    }

    #[test]
    fn normalizes_dotted_scopes() {
        assert_eq!(normalize_scope("com.acme.widgets"), "com/acme/widgets");
        assert_eq!(normalize_scope("already/slashed"), "already/slashed");
    }

    #[test]
    fn cleans_signatures() {
        assert_eq!(clean_signature("Lcom/acme/Widget;"), "com.acme.Widget");
        assert_eq!(clean_signature("Lcom/acme/Widget$Inner;"), "com.acme.Widget");
        assert_eq!(clean_signature("LA;"), "A");
        assert_eq!(clean_signature("L;"), "L;");
        assert_eq!(clean_signature(""), "");
    }

    #[test]
    fn cleans_non_ascii_signatures() {
        assert_eq!(clean_signature("Lcom/acmé/Gädget;"), "com.acmé.Gädget");
        assert_eq!(clean_signature("Lcom/acme/Caché$Inner;"), "com.acme.Caché");
        assert_eq!(clean_signature("Lπ;"), "π");
        // Trailing multi-byte character must not panic mid-boundary.
        assert_eq!(clean_signature("Lxé"), "x");
        assert_eq!(clean_signature("Lé"), "Lé");
    }
}

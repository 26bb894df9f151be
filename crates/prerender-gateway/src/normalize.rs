//! Request normalizer: canonicalizes the raw target URL
//!
//! The target arrives as the raw remainder of the request path plus query,
//! optionally percent-encoded, possibly carrying the legacy
//! `_escaped_fragment_` AJAX-crawling parameter. Normalization is applied in
//! a fixed order; anything that fails to parse as an absolute URL is an
//! input error.

use percent_encoding::percent_decode_str;
use prerender_core::{PrerenderError, Result};
use url::Url;

const ESCAPED_FRAGMENT: &str = "_escaped_fragment_=";

/// Canonicalize a raw target into an absolute URL.
///
/// Rules, in order:
/// 1. Collapse every `?` after the first into `&` (hashbang encoding
///    artifact).
/// 2. Percent-decode once; on failure keep the raw string.
/// 3. Parse; anything non-absolute is rejected.
/// 4. Rewrite `_escaped_fragment_=X` into a `#!X` hashbang and drop the
///    parameter.
pub fn normalize_target(raw: &str) -> Result<Url> {
    let collapsed = collapse_query_markers(raw);
    let decoded = match percent_decode_str(&collapsed).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => collapsed,
    };

    let mut url =
        Url::parse(&decoded).map_err(|_| PrerenderError::InvalidUrl(decoded.clone()))?;
    apply_escaped_fragment(&mut url);
    Ok(url)
}

/// A decoded escaped fragment leaves a second `?` in the raw target; only
/// the first one starts the query.
fn collapse_query_markers(raw: &str) -> String {
    match raw.find('?') {
        Some(first) => {
            let (head, tail) = raw.split_at(first + 1);
            format!("{}{}", head, tail.replace('?', "&"))
        }
        None => raw.to_string(),
    }
}

/// Google's legacy AJAX-crawling scheme:
/// `?_escaped_fragment_=key1=value1` maps back to `#!key1=value1`. The
/// parameter is specified to be the final one, so its value is the raw
/// remainder of the query.
fn apply_escaped_fragment(url: &mut Url) {
    let Some(query) = url.query().map(str::to_string) else {
        return;
    };
    let Some(position) = query.find(ESCAPED_FRAGMENT) else {
        return;
    };
    // Only a whole parameter counts, not a suffix of another name.
    if position > 0 && !query[..position].ends_with('&') {
        return;
    }

    let value = query[position + ESCAPED_FRAGMENT.len()..].to_string();
    let remainder = query[..position].trim_end_matches('&').to_string();

    if remainder.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&remainder));
    }
    if !value.is_empty() {
        url.set_fragment(Some(&format!("!{}", value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_absolute_url_passes_through() {
        let url = normalize_target("http://example.com/page?x=1").expect("normalize");
        assert_eq!(url.as_str(), "http://example.com/page?x=1");
    }

    #[test]
    fn test_percent_encoded_target_is_decoded_once() {
        let url = normalize_target("http%3A%2F%2Fexample.com%2Fpage").expect("normalize");
        assert_eq!(url.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_escaped_fragment_becomes_hashbang() {
        let url =
            normalize_target("http://x.test/?_escaped_fragment_=a=1%26b=2").expect("normalize");
        assert_eq!(url.as_str(), "http://x.test/#!a=1&b=2");
    }

    #[test]
    fn test_escaped_fragment_preserves_leading_parameters() {
        let url =
            normalize_target("http://x.test/?q=1&_escaped_fragment_=section").expect("normalize");
        assert_eq!(url.as_str(), "http://x.test/?q=1#!section");
    }

    #[test]
    fn test_empty_escaped_fragment_is_dropped() {
        let url = normalize_target("http://x.test/?_escaped_fragment_=").expect("normalize");
        assert_eq!(url.as_str(), "http://x.test/");
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_lookalike_parameter_is_untouched() {
        let url =
            normalize_target("http://x.test/?not_escaped_fragment_=x").expect("normalize");
        assert_eq!(url.query(), Some("not_escaped_fragment_=x"));
    }

    #[test]
    fn test_extra_question_marks_collapse_into_query() {
        let url = normalize_target("http://x.test/?a=1?b=2").expect("normalize");
        assert_eq!(url.query(), Some("a=1&b=2"));
    }

    #[test]
    fn test_relative_url_is_rejected() {
        assert!(matches!(
            normalize_target("not-a-url"),
            Err(PrerenderError::InvalidUrl(_))
        ));
        assert!(matches!(
            normalize_target("/path/only"),
            Err(PrerenderError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_undecodable_target_falls_back_to_raw() {
        // %FF decodes to invalid UTF-8, so the raw string is used as-is.
        let url = normalize_target("http://example.com/%FF").expect("normalize");
        assert_eq!(url.as_str(), "http://example.com/%FF");
    }
}

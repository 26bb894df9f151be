//! Response post-processor: in-band meta directives and script stripping
//!
//! A rendered page can steer its own HTTP response through two meta tags in
//! its head: `prerender-status-code` overrides the status, and each
//! `prerender-header` injects one response header. Both passes work on the
//! HTML as text — a separable `(html, flags) -> (html', headers, status')`
//! function, so the scan never touches the extraction path.

use prerender_core::RenderOptions;
use regex::Regex;
use std::sync::OnceLock;

/// Outcome of post-processing one rendered document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PostProcessOutput {
    /// HTML with consumed directive tags (and optionally scripts) removed
    pub html: String,
    /// Status override from a `prerender-status-code` tag
    pub status_override: Option<u16>,
    /// Headers injected by `prerender-header` tags
    pub headers: Vec<(String, String)>,
}

fn status_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?i)<meta[^<>]*(?:name=['"]prerender-status-code['"][^<>]*content=['"]([0-9]{3})['"]|content=['"]([0-9]{3})['"][^<>]*name=['"]prerender-status-code['"])[^<>]*>"#,
        )
        .unwrap()
    })
}

fn header_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?i)<meta[^<>]*(?:name=['"]prerender-header['"][^<>]*content=['"]([^'"]*?): ?([^'"]*?)['"]|content=['"]([^'"]*?): ?([^'"]*?)['"][^<>]*name=['"]prerender-header['"])[^<>]*>"#,
        )
        .unwrap()
    })
}

fn script_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)<script(.*?)>[\s\S]*?</script>").unwrap())
}

/// Run the enabled passes over rendered HTML.
pub fn apply(html: &str, options: &RenderOptions) -> PostProcessOutput {
    let mut output = PostProcessOutput {
        html: html.to_string(),
        status_override: None,
        headers: Vec::new(),
    };
    if options.honor_meta_directives {
        extract_meta_directives(&mut output);
    }
    if options.strip_scripts {
        strip_script_tags(&mut output);
    }
    output
}

/// Scan the substring before the first `</head>` for directive tags. Each
/// consumed tag is removed from the document by literal replacement.
fn extract_meta_directives(output: &mut PostProcessOutput) {
    let head_end = output.html.find("</head>").unwrap_or(output.html.len());
    let head = output.html[..head_end].to_string();

    for captures in header_regex().captures_iter(&head) {
        let name = captures.get(1).or_else(|| captures.get(3));
        let value = captures.get(2).or_else(|| captures.get(4));
        if let (Some(name), Some(value)) = (name, value) {
            output
                .headers
                .push((name.as_str().to_string(), value.as_str().to_string()));
        }
        if let Some(tag) = captures.get(0) {
            output.html = output.html.replace(tag.as_str(), "");
        }
    }

    if let Some(captures) = status_regex().captures(&head) {
        let code = captures
            .get(1)
            .or_else(|| captures.get(2))
            .and_then(|m| m.as_str().parse::<u16>().ok());
        if let Some(code) = code {
            if code != 0 && code != 200 {
                output.status_override = Some(code);
            }
        }
        if let Some(tag) = captures.get(0) {
            output.html = output.html.replace(tag.as_str(), "");
        }
    }
}

/// Drop every script block except structured-data ones.
fn strip_script_tags(output: &mut PostProcessOutput) {
    let blocks: Vec<(String, String)> = script_regex()
        .captures_iter(&output.html)
        .filter_map(|captures| {
            let full = captures.get(0)?.as_str().to_string();
            let open_attrs = captures.get(1).map(|m| m.as_str()).unwrap_or("").to_string();
            Some((full, open_attrs))
        })
        .collect();

    for (full, open_attrs) in blocks {
        if open_attrs.contains("application/ld+json") {
            continue;
        }
        output.html = output.html.replace(&full, "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RenderOptions {
        RenderOptions::default()
    }

    #[test]
    fn test_status_directive_overrides() {
        let html = r#"<html><head><meta name="prerender-status-code" content="301"></head><body></body></html>"#;
        let output = apply(html, &options());
        assert_eq!(output.status_override, Some(301));
        assert_eq!(output.html, "<html><head></head><body></body></html>");
    }

    #[test]
    fn test_status_directive_attribute_order_reversed() {
        let html = r#"<html><head><meta content="404" name="prerender-status-code"></head><body></body></html>"#;
        let output = apply(html, &options());
        assert_eq!(output.status_override, Some(404));
        assert!(!output.html.contains("prerender-status-code"));
    }

    #[test]
    fn test_status_200_never_overrides_but_tag_is_consumed() {
        let html = r#"<html><head><meta name="prerender-status-code" content="200"></head><body></body></html>"#;
        let output = apply(html, &options());
        assert_eq!(output.status_override, None);
        assert!(!output.html.contains("prerender-status-code"));
    }

    #[test]
    fn test_header_directives_emit_and_vanish() {
        let html = concat!(
            r#"<html><head>"#,
            r#"<meta name="prerender-header" content="Location: /x">"#,
            r#"<meta name="prerender-status-code" content="301">"#,
            r#"</head><body>ok</body></html>"#,
        );
        let output = apply(html, &options());
        assert_eq!(output.status_override, Some(301));
        assert_eq!(
            output.headers,
            vec![("Location".to_string(), "/x".to_string())]
        );
        assert_eq!(output.html, "<html><head></head><body>ok</body></html>");
    }

    #[test]
    fn test_header_directive_reversed_attribute_order() {
        let html = r#"<html><head><meta content="X-Robots-Tag: noindex" name="prerender-header"></head><body></body></html>"#;
        let output = apply(html, &options());
        assert_eq!(
            output.headers,
            vec![("X-Robots-Tag".to_string(), "noindex".to_string())]
        );
    }

    #[test]
    fn test_directives_after_head_are_ignored() {
        let html = r#"<html><head></head><body><meta name="prerender-status-code" content="301"></body></html>"#;
        let output = apply(html, &options());
        assert_eq!(output.status_override, None);
        assert!(output.html.contains("prerender-status-code"));
    }

    #[test]
    fn test_scripts_are_stripped() {
        let html = "<html><head><script src=\"app.js\"></script></head><body><script>var x = 1;</script>data</body></html>";
        let output = apply(html, &options());
        assert_eq!(output.html, "<html><head></head><body>data</body></html>");
    }

    #[test]
    fn test_ld_json_scripts_survive() {
        let html = r#"<html><head><script type="application/ld+json">{"@type":"Thing"}</script><script>tracking();</script></head><body></body></html>"#;
        let output = apply(html, &options());
        assert!(output.html.contains("application/ld+json"));
        assert!(output.html.contains(r#"{"@type":"Thing"}"#));
        assert!(!output.html.contains("tracking();"));
    }

    #[test]
    fn test_disabled_passes_leave_html_alone() {
        let html = r#"<html><head><meta name="prerender-status-code" content="301"><script>x()</script></head></html>"#;
        let disabled = RenderOptions {
            honor_meta_directives: false,
            strip_scripts: false,
            ..RenderOptions::default()
        };
        let output = apply(html, &disabled);
        assert_eq!(output.html, html);
        assert_eq!(output.status_override, None);
        assert!(output.headers.is_empty());
    }

    #[test]
    fn test_post_processing_is_idempotent() {
        let html = concat!(
            r#"<html><head>"#,
            r#"<meta name="prerender-header" content="Location: /x">"#,
            r#"<meta name="prerender-status-code" content="301">"#,
            r#"<script type="application/ld+json">{}</script>"#,
            r#"<script>app()</script>"#,
            r#"</head><body></body></html>"#,
        );
        let first = apply(html, &options());
        let second = apply(&first.html, &options());
        assert_eq!(second.html, first.html);
        assert_eq!(second.status_override, None);
        assert!(second.headers.is_empty());
    }

    #[test]
    fn test_case_insensitive_tag_matching() {
        let html = r#"<html><head><META NAME="prerender-status-code" CONTENT="503"></head></html>"#;
        let output = apply(html, &options());
        assert_eq!(output.status_override, Some(503));
    }
}

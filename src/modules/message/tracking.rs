// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::Url;

static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*\bsrc\s*=\s*["']([^"']+)["'][^>]*>"#)
        .expect("valid img pattern")
});
static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(["'])([^"']+)(["'])"#).expect("valid href pattern")
});

/// Removes open-tracking pixels served from `tracking_base` and points
/// tracked links back at their original destination.
pub fn strip_tracking(body: &str, tracking_base: &str) -> String {
    let base = tracking_base.trim_end_matches('/');
    if base.is_empty() {
        return body.to_string();
    }
    let is_tracked = |url: &str| url.starts_with(base) && url[base.len()..].starts_with('/');

    let without_pixels = IMG_TAG.replace_all(body, |caps: &Captures| {
        if is_tracked(&caps[1]) {
            String::new()
        } else {
            caps[0].to_string()
        }
    });

    HREF.replace_all(&without_pixels, |caps: &Captures| {
        let href = html_escape::decode_html_entities(&caps[2]);
        let original = is_tracked(href.as_ref())
            .then(|| redirect_target(&href))
            .flatten();
        match original {
            Some(original) => format!(
                "href={}{}{}",
                &caps[1],
                html_escape::encode_double_quoted_attribute(&original),
                &caps[3]
            ),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

fn redirect_target(tracked: &str) -> Option<String> {
    let url = Url::parse(tracked).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "redirect")
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://track.mailsync.test";

    #[test]
    fn test_strips_pixels_and_links() {
        let target = urlencoding::encode("https://example.com/a?b=1&c=2");
        let body = format!(
            r#"<p>Hi <a href="{BASE}/link/abc?redirect={target}">here</a></p><img src="{BASE}/open/abc" width="1"><img src="https://cdn.example.com/logo.png">"#
        );
        let stripped = strip_tracking(&body, BASE);
        assert_eq!(
            stripped,
            r#"<p>Hi <a href="https://example.com/a?b=1&amp;c=2">here</a></p><img src="https://cdn.example.com/logo.png">"#
        );
    }

    #[test]
    fn test_untracked_body_is_unchanged() {
        let body = r#"<a href="https://track.mailsync.testing/x?redirect=y">x</a>"#;
        assert_eq!(strip_tracking(body, BASE), body);
        assert_eq!(strip_tracking(body, ""), body);
    }
}

//! Escaping for HTML fragments and XML feed documents.

/// HTML-escape a string for safe output in text and attribute positions.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// XML-escape a string for feed documents.
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escape_special_chars() {
        assert_eq!(
            html_escape("<script>alert('xss')</script>"),
            "&lt;script&gt;alert(&#x27;xss&#x27;)&lt;/script&gt;"
        );
        assert_eq!(html_escape("a & b"), "a &amp; b");
    }

    #[test]
    fn xml_escape_uses_named_apostrophe() {
        assert_eq!(xml_escape("Tom's <feed> & \"more\""), "Tom&apos;s &lt;feed&gt; &amp; &quot;more&quot;");
    }
}

/// Small helpers shared by the feed, image and publishing stages

/// URL utilities for feed lists and links
pub mod url {
    use url::Url;

    /// Extract domain from URL
    pub fn extract_domain(url_str: &str) -> Option<String> {
        Url::parse(url_str)
            .ok()
            .and_then(|url| url.domain().map(|d| d.to_string()))
    }

    /// Only http(s) URLs are fetched.
    pub fn is_valid_feed_url(url_str: &str) -> bool {
        if let Ok(url) = Url::parse(url_str) {
            url.scheme() == "http" || url.scheme() == "https"
        } else {
            false
        }
    }

    /// Last path segment of a URL, without query or fragment.
    pub fn file_name(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        url.path_segments()?
            .filter(|segment| !segment.is_empty())
            .last()
            .map(|segment| segment.to_string())
    }
}

/// Text utilities for feed content
pub mod text {
    /// Extract clean text content from HTML
    pub fn extract_text_from_html(html: &str) -> String {
        html.chars()
            .fold((String::new(), false), |(mut text, in_tag), c| match c {
                '<' => (text, true),
                '>' => {
                    text.push(' ');
                    (text, false)
                }
                _ if !in_tag => {
                    text.push(c);
                    (text, in_tag)
                }
                _ => (text, in_tag),
            })
            .0
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Expand German umlauts, strip other accents and turn remaining symbols into spaces.
    pub fn fold_to_ascii(input: &str) -> String {
        let mut folded = String::with_capacity(input.len());
        for c in input.chars() {
            match c {
                'ä' => folded.push_str("ae"),
                'ö' => folded.push_str("oe"),
                'ü' => folded.push_str("ue"),
                'Ä' => folded.push_str("Ae"),
                'Ö' => folded.push_str("Oe"),
                'Ü' => folded.push_str("Ue"),
                'ß' => folded.push_str("ss"),
                c if c.is_ascii_graphic() => folded.push(c),
                c if c.is_whitespace() => folded.push(' '),
                // Other letters lose their accents; symbols become separators.
                c => match deunicode::deunicode_char(c) {
                    Some(ascii) if ascii.chars().any(|a| a.is_ascii_alphanumeric()) => folded.push_str(ascii),
                    _ => folded.push(' '),
                },
            }
        }
        collapse_whitespace(&folded)
    }

    pub fn collapse_whitespace(input: &str) -> String {
        input.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Cut to at most `max_len` bytes, preferring the last word boundary.
    /// Expects ASCII input.
    pub fn truncate_on_word(input: &str, max_len: usize) -> String {
        if input.len() <= max_len {
            return input.to_string();
        }
        let head = &input[..max_len];
        match head.rfind(' ') {
            Some(idx) if idx > 0 => head[..idx].trim_end().to_string(),
            _ => head.to_string(),
        }
    }

    /// Lowercase ASCII slug with single dashes, at most `max_len` bytes.
    pub fn slugify(input: &str, max_len: usize) -> String {
        let folded = fold_to_ascii(input).to_lowercase();
        let mut slug = String::with_capacity(folded.len());
        for c in folded.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c);
            } else if !slug.ends_with('-') && !slug.is_empty() {
                slug.push('-');
            }
        }
        let slug = slug.trim_end_matches('-');
        truncate_on_word(&slug.replace('-', " "), max_len).replace(' ', "-")
    }
}

//! Link auto-detection for body text.
//!
//! Splits plain text into text and link segments. Explicit `http(s)://`
//! URLs are always linked; bare `www.` hosts and naked `domain.tld` tokens
//! are linked only when the candidate's top-level domain is present in the
//! validation list, which keeps ordinary sentences with dots from sprouting
//! anchors.

use super::tld::TldList;

/// One run of body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// Detected link: the href (scheme added when missing) and the literal
    /// text as it appeared.
    Link { href: String, label: String },
}

/// Splits `text` into text/link segments.
pub fn segments(text: &str, tlds: &TldList) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut plain = String::new();

    for word in split_keeping_delimiters(text) {
        match classify(&word, tlds) {
            Some(href) => {
                if !plain.is_empty() {
                    out.push(Segment::Text(std::mem::take(&mut plain)));
                }
                out.push(Segment::Link { href, label: word });
            }
            None => plain.push_str(&word),
        }
    }
    if !plain.is_empty() {
        out.push(Segment::Text(plain));
    }
    out
}

/// Splits on whitespace but keeps the whitespace runs as their own tokens so
/// the original spacing survives re-assembly.
fn split_keeping_delimiters(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_is_space: Option<bool> = None;

    for ch in text.chars() {
        let is_space = ch.is_whitespace();
        if current_is_space != Some(is_space) && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        current_is_space = Some(is_space);
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn classify(word: &str, tlds: &TldList) -> Option<String> {
    if word.chars().all(char::is_whitespace) {
        return None;
    }
    // Trailing punctuation is common around links; don't let it defeat
    // detection for the scheme-ful case, but keep the token as the label.
    if word.starts_with("http://") || word.starts_with("https://") {
        return url::Url::parse(word).ok().map(|u| u.to_string());
    }
    let candidate = if let Some(rest) = word.strip_prefix("www.") {
        if rest.is_empty() {
            return None;
        }
        word
    } else {
        word
    };

    let host = candidate.split(['/', '?', '#']).next()?;
    if !host.contains('.') || host.ends_with('.') {
        return None;
    }
    let tld = host.rsplit('.').next()?;
    if !tlds.contains(tld) {
        return None;
    }
    // Every label must look like a hostname label.
    let valid = host.split('.').all(|label| {
        !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    });
    if !valid {
        return None;
    }
    Some(format!("https://{candidate}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlds() -> TldList {
        TldList::baseline()
    }

    #[test]
    fn explicit_urls_are_linked() {
        let segs = segments("see https://example.com/page for details", &tlds());
        assert!(segs.iter().any(|s| matches!(
            s,
            Segment::Link { href, .. } if href == "https://example.com/page"
        )));
    }

    #[test]
    fn bare_domains_require_known_tld() {
        let segs = segments("visit example.com or example.zzinvalid", &tlds());
        let links: Vec<_> = segs
            .iter()
            .filter(|s| matches!(s, Segment::Link { .. }))
            .collect();
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn ordinary_sentences_stay_text() {
        let segs = segments("that was fun...right", &tlds());
        assert_eq!(segs.len(), 1);
        assert!(matches!(&segs[0], Segment::Text(t) if t == "that was fun...right"));
    }

    #[test]
    fn www_hosts_are_linked() {
        let segs = segments("www.example.org", &tlds());
        assert_eq!(
            segs,
            vec![Segment::Link {
                href: "https://www.example.org".to_string(),
                label: "www.example.org".to_string()
            }]
        );
    }

    #[test]
    fn spacing_is_preserved_across_segments() {
        let segs = segments("a  example.com  b", &tlds());
        let rebuilt: String = segs
            .iter()
            .map(|s| match s {
                Segment::Text(t) => t.as_str(),
                Segment::Link { label, .. } => label.as_str(),
            })
            .collect();
        assert_eq!(rebuilt, "a  example.com  b");
    }
}

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

/// A set of literal URL fragments matched as substrings.
#[derive(Debug, Clone)]
pub struct UrlPatterns {
    regex: Option<Regex>,
}

impl UrlPatterns {
    pub fn new(fragments: &[String]) -> Self {
        Self {
            regex: build_fragment_regex(fragments),
        }
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.regex.as_ref().is_some_and(|regex| regex.is_match(url))
    }

    /// The fragment that matched first, for logging.
    pub fn find<'u>(&self, url: &'u str) -> Option<&'u str> {
        self.regex
            .as_ref()
            .and_then(|regex| regex.find(url))
            .map(|m| m.as_str())
    }
}

fn build_fragment_regex(fragments: &[String]) -> Option<Regex> {
    let mut unique = Vec::new();
    let mut seen = HashSet::new();
    for fragment in fragments {
        if fragment.is_empty() {
            continue;
        }
        if seen.insert(fragment.as_str()) {
            unique.push(fragment.as_str());
        }
    }
    if unique.is_empty() {
        return None;
    }
    unique.sort_by(|a, b| b.len().cmp(&a.len()));
    let pattern = unique
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    match RegexBuilder::new(&pattern).build() {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::warn!(%err, "could not compile url patterns, matching nothing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(items: &[&str]) -> UrlPatterns {
        UrlPatterns::new(&items.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn matches_dev_server_fragments_anywhere() {
        let dev = patterns(&["@vite", "@react-refresh", "src/", "node_modules/"]);
        assert!(dev.is_match("http://localhost:5173/@vite/client"));
        assert!(dev.is_match("http://localhost:5173/src/main.tsx"));
        assert!(dev.is_match("/node_modules/.vite/deps/react.js"));
        assert!(!dev.is_match("http://localhost:5173/index.html"));
    }

    #[test]
    fn fragments_are_literal_and_case_sensitive() {
        let hosts = patterns(&["fonts.gstatic.com"]);
        assert!(hosts.is_match("https://fonts.gstatic.com/s/inter.woff2"));
        assert!(!hosts.is_match("https://fontsXgstatic.com/"));
        assert!(!hosts.is_match("https://FONTS.GSTATIC.COM/"));
    }

    #[test]
    fn prefers_longer_fragments_and_ignores_empty_ones() {
        let set = patterns(&["src", "src/", ""]);
        assert_eq!(set.find("/src/app.js"), Some("src/"));
        assert!(!patterns(&[""]).is_match("anything"));
    }
}

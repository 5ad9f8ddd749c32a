use lazy_static::lazy_static;
use regex::Regex;

/// Tags longer than this many characters are cut.
pub const MAX_TAG_LEN: usize = 20;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"#([^ \t\r\n]*)").expect("valid regex");
}

/// Extract hashtags in order of appearance: the run after each `#` up to the
/// next space, tab or line break. Duplicates are kept. A bare `#` carries no
/// tag and is skipped.
pub fn extract_tags(text: &str) -> Vec<String> {
    TAG_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|tag| !tag.is_empty())
        .map(|tag| tag.chars().take(MAX_TAG_LEN).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_extract() {
        assert_eq!(extract_tags("Hello #World #T1"), vec!["World", "T1"]);
        assert_eq!(extract_tags("#Hello World #T2"), vec!["Hello", "T2"]);
    }

    #[test]
    fn no_hash_no_tags() {
        assert!(extract_tags("plain text, nothing here").is_empty());
        assert!(extract_tags("").is_empty());
    }
}

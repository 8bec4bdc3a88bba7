//! Ref glob matching shared by trigger filters and grant rules.
//!
//! `*` matches any run of characters except `/`; `**` also crosses `/`.
//! Everything else matches literally.

pub fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    match_from(pattern.as_bytes(), text.as_bytes())
}

/// True if any pattern matches. An empty pattern list matches nothing.
pub fn any_match(patterns: &[String], text: &str) -> bool {
    patterns.iter().any(|p| glob_match(p, text))
}

fn match_from(pattern: &[u8], text: &[u8]) -> bool {
    match pattern {
        [] => text.is_empty(),
        [b'*', b'*', rest @ ..] => {
            let rest = rest.strip_prefix(b"/").filter(|_| !rest.is_empty()).unwrap_or(rest);
            (0..=text.len()).any(|i| match_from(rest, &text[i..]))
                || (pattern.len() > 2 && match_from(&pattern[2..], text))
        }
        [b'*', rest @ ..] => {
            let mut i = 0;
            loop {
                if match_from(rest, &text[i..]) {
                    return true;
                }
                if i == text.len() || text[i] == b'/' {
                    return false;
                }
                i += 1;
            }
        }
        [c, rest @ ..] => text.first() == Some(c) && match_from(rest, &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        assert!(glob_match("main", "main"));
        assert!(!glob_match("main", "develop"));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        assert!(glob_match("feature/*", "feature/foo"));
        assert!(!glob_match("feature/*", "feature/foo/bar"));
        assert!(glob_match("v*", "v1.2.3"));
        assert!(glob_match("release-*-rc", "release-2.0-rc"));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        assert!(glob_match("release/**", "release/v1/hotfix"));
        assert!(glob_match("release/**", "release/v1"));
        assert!(glob_match("**/main", "team/a/main"));
        assert!(glob_match("*", "anything/at/all"));
    }

    #[test]
    fn test_any_match_empty_is_false() {
        assert!(!any_match(&[], "main"));
        assert!(any_match(&["dev".to_string(), "main".to_string()], "main"));
    }
}

//! Shell-style `*`/`?` glob matching, case-insensitive, for `listFiles`.

use regex::Regex;

/// Translate a shell glob (`*`, `?`, literal chars) into an anchored,
/// case-insensitive regex and test `name` against it.
pub fn matches(name: &str, pattern: &str) -> bool {
    let regex = to_regex(pattern);
    regex.is_match(name)
}

fn to_regex(pattern: &str) -> Regex {
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c if regex_syntax::is_meta_character(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    // Pattern is always well-formed (escaped), so this cannot fail.
    Regex::new(&out).expect("glob-derived regex is always valid")
}

mod regex_syntax {
    pub fn is_meta_character(c: char) -> bool {
        matches!(
            c,
            '.' | '+' | '('
                | ')'
                | '|'
                | '^'
                | '$'
                | '['
                | ']'
                | '{'
                | '}'
                | '\\'
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_suffix() {
        assert!(matches("up-1.0.0.sh", "up-*.sh"));
        assert!(matches("docker-compose.arm64.yml", "docker-compose*.yml"));
    }

    #[test]
    fn question_matches_one_char() {
        assert!(matches("up-1.sh", "up-?.sh"));
        assert!(!matches("up-12.sh", "up-?.sh"));
    }

    #[test]
    fn is_case_insensitive() {
        assert!(matches("UP-1.0.0.SH", "up-*.sh"));
    }

    #[test]
    fn literal_dots_are_escaped() {
        assert!(!matches("upX1X0X0Xsh", "up-*.sh"));
    }

    #[test]
    fn non_matching_pattern_fails() {
        assert!(!matches("readme.md", "docker-compose*.yml"));
    }
}

//! Ordered path rewriting
//!
//! Rewrites run in stored order. Each matching rewrite replaces every match
//! in the current path using its `$`-template, and the next rewrite sees the
//! already rewritten path. A matching terminal rewrite ends the chain.

use tracing::trace;

use super::rule::Rewrite;

/// Apply `rewrites` to `path`
///
/// Returns the rewritten path, or `None` if no rewrite matched.
pub fn evaluate(rewrites: &[Rewrite], path: &str) -> Option<String> {
    let mut current = path.to_string();
    let mut matched = false;

    for (index, rewrite) in rewrites.iter().enumerate() {
        let Some(regex) = rewrite.pattern.regex() else {
            continue;
        };
        if !regex.is_match(&current) {
            continue;
        }

        current = regex
            .replace_all(&current, rewrite.replacement.as_str())
            .into_owned();
        matched = true;
        trace!(index = index, path = %current, "Rewrite matched");

        if rewrite.terminal {
            break;
        }
    }

    matched.then_some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::rule::RewritePattern;

    #[test]
    fn test_no_rewrites() {
        assert_eq!(evaluate(&[], "/foo"), None);
    }

    #[test]
    fn test_chain_continues_past_non_terminal() {
        let rewrites = [
            Rewrite::new("^/(.*)$", "/pfx/$1", false),
            Rewrite::new("bar", "baz", true),
        ];
        assert_eq!(evaluate(&rewrites, "/foo/bar").as_deref(), Some("/pfx/foo/baz"));
    }

    #[test]
    fn test_terminal_stops_chain() {
        let rewrites = [
            Rewrite::new("^/(.*)$", "/pfx/$1", true),
            Rewrite::new("bar", "baz", true),
        ];
        assert_eq!(evaluate(&rewrites, "/foo/bar").as_deref(), Some("/pfx/foo/bar"));
    }

    #[test]
    fn test_non_matching_terminal_does_not_stop_chain() {
        let rewrites = [
            Rewrite::new("^/nothing$", "/x", true),
            Rewrite::new("foo", "qux", true),
        ];
        assert_eq!(evaluate(&rewrites, "/foo").as_deref(), Some("/qux"));
    }

    #[test]
    fn test_replaces_every_match() {
        let rewrites = [Rewrite::new("o", "0", true)];
        assert_eq!(evaluate(&rewrites, "/foo/boo").as_deref(), Some("/f00/b00"));
    }

    #[test]
    fn test_named_and_numbered_groups() {
        let rewrites = [Rewrite::new(
            r"^/(?P<year>\d{4})/(\d+)$",
            "/archive/${year}/$2",
            true,
        )];
        assert_eq!(
            evaluate(&rewrites, "/2024/17").as_deref(),
            Some("/archive/2024/17")
        );
    }

    #[test]
    fn test_inert_rewrites_are_skipped() {
        let rewrites = [
            Rewrite {
                pattern: RewritePattern::inert(),
                replacement: "$1".to_string(),
                terminal: true,
            },
            Rewrite::new("(unclosed", "x", true),
        ];
        assert_eq!(evaluate(&rewrites, "/foo"), None);
    }

    #[test]
    fn test_identity_match_still_counts() {
        let rewrites = [Rewrite::new("^(.*)$", "$1", true)];
        assert_eq!(evaluate(&rewrites, "/foo/bar").as_deref(), Some("/foo/bar"));
    }
}

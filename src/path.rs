//! Path parsing: `alias»/component/component` split and tokenization.

/// Separator between a mount alias and the absolute path that follows it.
pub const ALIAS_SEPARATOR: &str = "»";

/// ASCII-safe spelling of [`ALIAS_SEPARATOR`] accepted by the parser for
/// callers that cannot type the guillemet.
pub const ALIAS_SEPARATOR_ASCII: &str = "::";

/// A parsed path string. Borrowed views only; no allocation happens here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsPath<'a> {
    alias: Option<&'a str>,
    rest: &'a str,
}

impl<'a> VfsPath<'a> {
    /// Split `raw` into an optional mount alias and the remainder.
    ///
    /// The guillemet form wins when both separators appear, so a component
    /// containing `::` after an alias does not re-split.
    pub fn parse(raw: &'a str) -> Self {
        if let Some(idx) = raw.find(ALIAS_SEPARATOR) {
            return Self {
                alias: Some(&raw[..idx]),
                rest: &raw[idx + ALIAS_SEPARATOR.len()..],
            };
        }
        if let Some(idx) = raw.find(ALIAS_SEPARATOR_ASCII) {
            return Self {
                alias: Some(&raw[..idx]),
                rest: &raw[idx + ALIAS_SEPARATOR_ASCII.len()..],
            };
        }
        Self { alias: None, rest: raw }
    }

    pub fn alias(&self) -> Option<&'a str> {
        self.alias
    }

    /// Path components with empty segments discarded, so `//a//b` walks the
    /// same as `/a/b`.
    pub fn components(&self) -> impl Iterator<Item = &'a str> {
        self.rest.split('/').filter(|s| !s.is_empty())
    }

    /// True when the remainder names the alias root (`alias»/`, `alias»`).
    pub fn is_root(&self) -> bool {
        self.components().next().is_none()
    }

    /// A trailing slash after the last component asserts that the final
    /// resolution target is a directory.
    pub fn has_trailing_slash(&self) -> bool {
        !self.is_root() && self.rest.ends_with('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_alias_and_components() {
        let p = VfsPath::parse("ramfs»/foo/bar");
        assert_eq!(p.alias(), Some("ramfs"));
        assert_eq!(p.components().collect::<Vec<_>>(), vec!["foo", "bar"]);
        assert!(!p.has_trailing_slash());
    }

    #[test]
    fn test_parse_ascii_separator() {
        let p = VfsPath::parse("root::/etc/passwd");
        assert_eq!(p.alias(), Some("root"));
        assert_eq!(p.components().collect::<Vec<_>>(), vec!["etc", "passwd"]);
    }

    #[test]
    fn test_empty_segments_collapse() {
        let p = VfsPath::parse("ramfs»//a///b//");
        assert_eq!(p.components().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(p.has_trailing_slash());
    }

    #[test]
    fn test_alias_root() {
        let p = VfsPath::parse("ramfs»/");
        assert!(p.is_root());
        assert!(!p.has_trailing_slash());

        let p = VfsPath::parse("ramfs»");
        assert!(p.is_root());
    }

    #[test]
    fn test_no_alias() {
        let p = VfsPath::parse("/a/b");
        assert_eq!(p.alias(), None);
        assert_eq!(p.components().count(), 2);
    }

    #[test]
    fn test_dot_components_survive_tokenization() {
        // `.` and `..` are resolver concerns, not parser concerns.
        let p = VfsPath::parse("ramfs»/foo/../foo/bar");
        assert_eq!(
            p.components().collect::<Vec<_>>(),
            vec!["foo", "..", "foo", "bar"]
        );
    }
}

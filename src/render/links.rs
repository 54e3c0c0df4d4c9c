use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

/// Where file paths in rendered messages point to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkContext {
    /// Project checkout that relative paths are resolved against.
    pub source_dir: Option<String>,
    /// URI scheme of the editor, e.g. `vscode` or `cursor`.
    pub scheme: String,
}

impl Default for LinkContext {
    fn default() -> Self {
        Self {
            source_dir: None,
            scheme: "vscode".to_string(),
        }
    }
}

fn path_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:[A-Za-z]:[\\/]|\.{1,2}[\\/]|/)?(?:[A-Za-z0-9_\-.+\[\]]+[\\/])+[A-Za-z0-9_\-.+\[\]]+\.[A-Za-z0-9_\-]+\b",
        )
        .ok()
    })
    .as_ref()
}

/// Byte ranges of things that look like file paths (at least one directory
/// and an extension). Parts of URLs are skipped.
pub fn find_paths(text: &str) -> Vec<Range<usize>> {
    let Some(re) = path_regex() else {
        return Vec::new();
    };
    re.find_iter(text)
        .filter(|m| {
            let before = text[..m.start()].chars().next_back();
            !matches!(before, Some(':' | '/' | '\\' | '.'))
                && !text[m.end()..].starts_with("://")
        })
        .map(|m| m.range())
        .collect()
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || (bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/')
}

/// Escapes that `encodeURIComponent` leaves as literal characters but
/// form encoding does not.
const KEPT_LITERAL: [(&str, &str); 5] = [
    ("%7E", "~"),
    ("%21", "!"),
    ("%27", "'"),
    ("%28", "("),
    ("%29", ")"),
];

/// Percent-encode a path the way `encodeURIComponent` does: everything
/// except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub fn encode_component(value: &str) -> String {
    let mut encoded = url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    // A literal `%` is already `%25` here, so these sequences are real escapes.
    for (escape, literal) in KEPT_LITERAL {
        encoded = encoded.replace(escape, literal);
    }
    encoded
}

/// The absolute form of `path`: relative paths are joined onto the source
/// directory, absolute ones only get their separators normalized.
pub fn resolve_path(path: &str, ctx: &LinkContext) -> String {
    let normalized = path.replace('\\', "/");
    if is_absolute(&normalized) {
        return normalized;
    }
    match ctx.source_dir.as_deref() {
        Some(dir) if !dir.is_empty() => {
            let dir = dir.replace('\\', "/");
            let relative = normalized.strip_prefix("./").unwrap_or(&normalized);
            format!("{}/{}", dir.trim_end_matches('/'), relative)
        }
        _ => normalized,
    }
}

/// `scheme://file/<encoded absolute path>`.
pub fn editor_uri(path: &str, ctx: &LinkContext) -> String {
    format!(
        "{}://file/{}",
        ctx.scheme,
        encode_component(&resolve_path(path, ctx))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: Option<&str>) -> LinkContext {
        LinkContext {
            source_dir: dir.map(String::from),
            scheme: "vscode".into(),
        }
    }

    #[test]
    fn test_relative_path_joined_and_encoded() {
        assert_eq!(
            editor_uri("src/lib/foo.rs", &ctx(Some("/home/u/proj"))),
            "vscode://file/%2Fhome%2Fu%2Fproj%2Fsrc%2Flib%2Ffoo.rs"
        );
        assert_eq!(
            editor_uri("./src/main.rs", &ctx(Some("/home/u/proj/"))),
            "vscode://file/%2Fhome%2Fu%2Fproj%2Fsrc%2Fmain.rs"
        );
    }

    #[test]
    fn test_absolute_path_not_joined() {
        assert_eq!(
            resolve_path("/etc/app/conf.toml", &ctx(Some("/home/u/proj"))),
            "/etc/app/conf.toml"
        );
        assert_eq!(
            resolve_path(r"C:\work\proj\main.py", &ctx(Some("/home/u/proj"))),
            "C:/work/proj/main.py"
        );
    }

    #[test]
    fn test_spaces_encode_as_percent_20() {
        assert_eq!(encode_component("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_uri_component_marks_stay_literal() {
        assert_eq!(
            encode_component("~/notes (old)/it's!*.md"),
            "~%2Fnotes%20(old)%2Fit's!*.md"
        );
        assert_eq!(encode_component("100%7E.rs"), "100%257E.rs");
        assert_eq!(encode_component("a&b=c#d"), "a%26b%3Dc%23d");
    }

    #[test]
    fn test_find_paths() {
        let text = "See src/chat/store.rs and ./docs/guide.md, not https://example.com/a.html";
        let found: Vec<&str> = find_paths(text).into_iter().map(|r| &text[r]).collect();
        assert_eq!(found, vec!["src/chat/store.rs", "./docs/guide.md"]);
    }

    #[test]
    fn test_find_paths_needs_a_directory() {
        assert!(find_paths("just main.rs here").is_empty());
    }
}

//! Mapping of archived URLs onto filesystem-safe relative paths.
//!
//! Escaping follows wget's `--restrict-file-names` behavior: restricted
//! characters become `%XX`, and on Windows the query separator `?` becomes `@`.

use crate::types::PathStyle;
use sha1::{Digest, Sha1};

/// File name used for URLs that denote a directory.
pub const INDEX_FILE: &str = "index.html";

/// Extension given to fallback files whose URL path has none.
pub const DEFAULT_EXTENSION: &str = ".html";

/// Characters Windows refuses in file names (besides `/` and `?`, handled separately).
const WINDOWS_RESERVED: &[char] = &['\\', '|', ':', '"', '*', '<', '>'];

/// Splits a URL into its path and query without normalizing either.
///
/// Scheme and authority are dropped, as is any fragment. Malformed URLs never
/// fail; whatever cannot be recognized as scheme or authority is path.
pub(crate) fn split_url(url: &str) -> (&str, &str) {
    let mut rest = url;

    if let Some(idx) = rest.find(':') {
        if is_scheme(&rest[..idx]) {
            rest = &rest[idx + 1..];
        }
    }

    if let Some(after) = rest.strip_prefix("//") {
        let end = after.find(['/', '?', '#']).unwrap_or(after.len());
        rest = &after[end..];
    }

    let rest = match rest.find('#') {
        Some(idx) => &rest[..idx],
        None => rest,
    };

    rest.split_once('?').unwrap_or((rest, ""))
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn is_restricted(c: char, style: PathStyle) -> bool {
    let code = c as u32;
    let control = code <= 0x1F || (0x80..=0x9F).contains(&code);
    match style {
        PathStyle::Posix => control,
        PathStyle::Windows => control || WINDOWS_RESERVED.contains(&c),
    }
}

fn escape_segment(segment: &str, style: PathStyle) -> String {
    // `.` and `..` would walk the tree instead of naming a file.
    if segment == "." || segment == ".." {
        return segment.replace('.', "%2E");
    }

    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        if is_restricted(c, style) {
            escaped.push_str(&format!("%{:02X}", c as u32));
        } else if c == '?' && style == PathStyle::Windows {
            escaped.push('@');
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Derives the path, relative to the capture's timestamp directory, at which
/// `original_url` is stored.
///
/// # Arguments
///
/// * `original_url` - URL as listed in the snapshot index
/// * `style` - Naming rules of the target filesystem
///
/// # Returns
///
/// A relative path using `style`'s separator. Directory-like URLs (empty path
/// or trailing `/`) resolve to `index.html` inside that directory.
///
/// # Example
///
/// ```
/// use waybacksync::{derive_path, PathStyle};
///
/// assert_eq!(derive_path("http://example.com/", PathStyle::Posix), "index.html");
/// assert_eq!(derive_path("http://example.com/a/b?x=1", PathStyle::Posix), "a/b?x=1");
/// assert_eq!(derive_path("http://example.com/a/b?x=1", PathStyle::Windows), "a\\b@x=1");
/// ```
pub fn derive_path(original_url: &str, style: PathStyle) -> String {
    let (path, query) = split_url(original_url);
    // Every leading `/` goes, otherwise `//a` would derive an absolute path.
    let path = path.trim_start_matches('/');

    let mut raw = path.to_string();
    if !query.is_empty() {
        raw.push('?');
        raw.push_str(query);
    }

    let separator = style.separator();
    let mut derived = raw
        .split('/')
        .map(|segment| escape_segment(segment, style))
        .collect::<Vec<_>>()
        .join(&separator.to_string());

    if derived.is_empty() || derived.ends_with(separator) {
        derived.push_str(INDEX_FILE);
    }
    derived
}

/// Extension of the last path segment, including the dot.
///
/// Leading dots do not start an extension, so `.htaccess` has none. An
/// extension holding characters restricted on any supported filesystem is
/// ignored.
pub(crate) fn url_extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let name = name.trim_start_matches('.');
    let extension = &name[name.rfind('.')?..];
    if extension
        .chars()
        .any(|c| c == '?' || is_restricted(c, PathStyle::Windows))
    {
        return None;
    }
    Some(extension)
}

/// Name used when the derived path cannot be created: the lowercase hex
/// SHA-1 of the URL followed by the URL's extension (`.html` if it has none).
///
/// # Example
///
/// ```
/// use waybacksync::fallback_file_name;
///
/// assert_eq!(
///     fallback_file_name("abc"),
///     "a9993e364706816aba3e25717850c26c9cd0d89d.html"
/// );
/// ```
pub fn fallback_file_name(original_url: &str) -> String {
    let digest = Sha1::digest(original_url.as_bytes());
    let (path, _) = split_url(original_url);
    let extension = url_extension(path).unwrap_or(DEFAULT_EXTENSION);
    format!("{:x}{}", digest, extension)
}

//! File-name and extension derivation.
//!
//! Precedence everywhere: origin-declared file name, then the URL path
//! tail, then an extension guessed from the MIME type.

use url::Url;

/// Extract `filename=` from a `Content-Disposition` header value.
///
/// Handles the quoted (`filename="a b.mp4"`) and bare (`filename=a.mp4`)
/// forms without unescaping.
#[must_use]
pub fn parse_content_disposition(value: &str) -> Option<String> {
    let rest = value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?;

    let name = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next().unwrap_or("")
    } else {
        rest
    };

    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Map a MIME type to a file extension. Falls back to `mp4`.
#[must_use]
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/x-flv" => "flv",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "application/zip" => "zip",
        "application/x-rar-compressed" => "rar",
        "application/pdf" => "pdf",
        _ => "mp4",
    }
}

fn url_tail(origin_url: &str) -> Option<String> {
    let url = Url::parse(origin_url).ok()?;
    let tail = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    if tail.is_empty() {
        None
    } else {
        Some(tail.to_string())
    }
}

fn extension_of(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 8 {
        None
    } else {
        Some(ext)
    }
}

/// Suggested on-disk name for a resource: declared file name, URL tail,
/// or nothing when neither carries a usable name.
#[must_use]
pub fn derive_file_name(file_name: Option<&str>, origin_url: &str) -> Option<String> {
    file_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| url_tail(origin_url))
        .map(|n| sanitize_file_name(&n))
}

/// Extension for a resource, with the same precedence as
/// [`derive_file_name`] and a MIME-based fallback.
#[must_use]
pub fn derive_extension(
    file_name: Option<&str>,
    origin_url: &str,
    mime_type: Option<&str>,
) -> String {
    if let Some(ext) = file_name.and_then(extension_of) {
        return ext.to_ascii_lowercase();
    }
    if let Some(ext) = url_tail(origin_url).as_deref().and_then(extension_of) {
        return ext.to_ascii_lowercase();
    }
    extension_for_mime(mime_type.unwrap_or_default()).to_string()
}

/// Strip path separators and control characters so a derived name is safe
/// to join onto a directory.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') || c.is_control() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::bare("attachment; filename=movie.mp4", Some("movie.mp4"))]
    #[case::quoted("attachment; filename=\"a clip.webm\"", Some("a clip.webm"))]
    #[case::inline_form("inline; filename=\"x.bin\"; size=12", Some("x.bin"))]
    #[case::no_filename("attachment", None)]
    #[case::empty_filename("attachment; filename=\"\"", None)]
    fn content_disposition(#[case] header: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_content_disposition(header).as_deref(), expected);
    }

    #[test]
    fn declared_name_wins_over_url() {
        let name = derive_file_name(Some("given.webm"), "http://e.test/path/real.mp4");
        assert_eq!(name.as_deref(), Some("given.webm"));
    }

    #[test]
    fn url_tail_used_when_no_declared_name() {
        let name = derive_file_name(None, "http://e.test/videos/clip.mp4?sig=abc");
        assert_eq!(name.as_deref(), Some("clip.mp4"));
    }

    #[test]
    fn no_name_when_url_has_no_tail() {
        assert_eq!(derive_file_name(None, "http://e.test/"), None);
    }

    #[rstest]
    #[case(Some("movie.MKV"), "http://e.test/x.mp4", None, "mkv")]
    #[case(None, "http://e.test/x.webm", None, "webm")]
    #[case(None, "http://e.test/stream", Some("video/x-flv"), "flv")]
    #[case(None, "http://e.test/stream", None, "mp4")]
    fn extension_precedence(
        #[case] file_name: Option<&str>,
        #[case] url: &str,
        #[case] mime: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(derive_extension(file_name, url, mime), expected);
    }

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize_file_name("a/b\\c\u{0}d.mp4"), "a_b_c_d.mp4");
    }
}

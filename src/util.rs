use url::{form_urlencoded, Url};

/// Keep only `[A-Za-z0-9_-]` so the id is safe as a file name and store key.
pub fn sanitize_video_id(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// `(authority, path, query)` of `scheme://authority/path?query#fragment`, exactly as written.
fn raw_parts(url: &str) -> Option<(&str, &str, &str)> {
    let (_, rest) = url.split_once("://")?;
    let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
    let (before_query, query) = rest.split_once('?').unwrap_or((rest, ""));
    let path_start = before_query.find('/').unwrap_or(before_query.len());
    let (authority, path) = before_query.split_at(path_start);
    Some((authority, path, query))
}

/// Host part of a raw authority: no userinfo, no port, lowercased.
fn raw_host(authority: &str) -> String {
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = match host.rsplit_once(':') {
        Some((h, port)) if !h.starts_with('[') && port.bytes().all(|b| b.is_ascii_digit()) => h,
        _ => host,
    };
    host.to_ascii_lowercase()
}

/// Extract the video id from `youtu.be/<id>` and `youtube.com/watch?v=<id>` URLs.
///
/// Host and path are matched against the URL as written, not the `Url`-normalized form.
pub fn video_id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let (authority, path, query) = raw_parts(url)?;
    let host = parsed.host_str()?;
    if raw_host(authority) != host {
        return None;
    }

    let id = match host {
        "youtu.be" => path.strip_prefix('/').unwrap_or(path).to_string(),
        "www.youtube.com" | "youtube.com" if path == "/watch" => {
            form_urlencoded::parse(query.as_bytes())
                .find(|(k, v)| k == "v" && !v.is_empty())
                .map(|(_, v)| v.into_owned())?
        }
        _ => return None,
    };

    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://www.youtube.com/watch?v=abc123", "abc123")]
    #[case("https://youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ")]
    #[case("https://www.youtube.com/watch?feature=share&v=abc123&t=10", "abc123")]
    #[case("https://www.youtube.com/watch?v=first&v=second", "first")]
    #[case("http://www.youtube.com/watch?v=abc-_123", "abc-_123")]
    #[case("https://youtu.be/abc123", "abc123")]
    #[case("https://youtu.be/abc123?t=42", "abc123")]
    #[case("https://youtu.be/abc/def", "abc/def")]
    fn extracts_id(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(video_id_from_url(url).as_deref(), Some(expected));
    }

    #[rstest]
    #[case("not a url")]
    #[case("")]
    #[case("youtu.be/abc123")]
    #[case("https://vimeo.com/watch?v=abc123")]
    #[case("https://m.youtube.com/watch?v=abc123")]
    #[case("https://www.youtube.com/watch")]
    #[case("https://www.youtube.com/watch?list=PL123")]
    #[case("https://www.youtube.com/watch?v=")]
    #[case("https://www.youtube.com/watch/?v=abc123")]
    #[case("https://www.youtube.com/embed/abc123")]
    #[case("https://www.youtube.com/shorts/abc123")]
    #[case("https://youtu.be/")]
    #[case("https://youtu.be")]
    #[case("https://www.youtube.com/x/../watch?v=abc")]
    #[case("https://www.youtube.com/./watch?v=abc")]
    #[case("https://www.youtube.com\\watch?v=abc")]
    #[case("https://youtu.be\\abc")]
    fn rejects_unknown_shapes(#[case] url: &str) {
        assert_eq!(video_id_from_url(url), None);
    }

    #[rstest]
    #[case("https://youtu.be/abcé", "abc")]
    #[case("https://youtu.be/abc def", "abcdef")]
    #[case("https://youtu.be/abc%20def", "abc20def")]
    #[case("https://youtu.be/abc123#t=5", "abc123")]
    #[case("https://user@youtu.be:443/abc123", "abc123")]
    #[case("https://www.youtube.com/watch?v=&v=abc123", "abc123")]
    #[case("https://www.youtube.com/watch?v=ab%2Dc", "ab-c")]
    fn sanitized_id_uses_path_as_written(#[case] url: &str, #[case] expected: &str) {
        let id = video_id_from_url(url).map(|id| sanitize_video_id(&id));
        assert_eq!(id.as_deref(), Some(expected));
    }

    #[test]
    fn host_match_ignores_case() {
        // URL parsing lowercases the host.
        assert_eq!(
            video_id_from_url("https://WWW.YouTube.com/watch?v=AbC").as_deref(),
            Some("AbC")
        );
    }

    #[rstest]
    #[case("abc123", "abc123")]
    #[case("abc-_XYZ", "abc-_XYZ")]
    #[case("abc/def", "abcdef")]
    #[case("../../etc/passwd", "etcpasswd")]
    #[case("a b.c%20", "abc20")]
    #[case("видео", "")]
    #[case("", "")]
    fn sanitizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_video_id(input), expected);
    }

    #[rstest]
    #[case("abc123")]
    #[case("a/b\\c:d*e?f\"g<h>i|j")]
    #[case("  spaces\tand\nnewlines  ")]
    #[case("ünïcödé-_ok")]
    #[case("....mp4")]
    fn sanitize_is_idempotent_and_restricted(#[case] input: &str) {
        let once = sanitize_video_id(input);
        assert_eq!(sanitize_video_id(&once), once);
        assert!(once
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}

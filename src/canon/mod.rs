//! URL canonicalisation and canonical-URL → local-path mapping.
//!
//! The canonical form is the single key used for the visited set, the index,
//! and path mapping. Rules, applied in order: scheme and host lowercased,
//! default ports stripped, fragment removed, path segments percent-decoded
//! and re-encoded against one canonical alphabet, `.`/`..` resolved, trailing
//! slash preserved, query kept verbatim.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

/// Characters that stay percent-encoded inside a canonical path segment.
const SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'%');

/// Hex digits of the xxh3 digest kept in mapped filenames (48 bits).
const PATH_HASH_LEN: usize = 12;

/// Maximum length of the human-readable slug component.
const SLUG_MAX_LEN: usize = 80;

/// Canonicalise an absolute URL string.
///
/// Only `http` and `https` URLs are accepted; everything else is rejected so
/// `javascript:`/`mailto:`/`data:` candidates die here.
pub fn canonicalize(input: &str) -> Result<Url> {
    let url = Url::parse(input.trim()).map_err(|e| anyhow!("invalid URL {input:?}: {e}"))?;
    canonicalize_url(url)
}

/// Resolve a possibly-relative candidate against a base, then canonicalise.
pub fn canonicalize_relative(base: &Url, candidate: &str) -> Result<Url> {
    let url = base
        .join(candidate.trim())
        .map_err(|e| anyhow!("cannot resolve {candidate:?}: {e}"))?;
    canonicalize_url(url)
}

fn canonicalize_url(mut url: Url) -> Result<Url> {
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("unsupported scheme {other:?}")),
    }
    if url.host_str().is_none() {
        return Err(anyhow!("URL has no host: {url}"));
    }

    // `Url::parse` already lowercases scheme/host, strips default ports and
    // resolves dot segments; what remains is fragment removal and a stable
    // re-encoding of the path.
    url.set_fragment(None);

    let canonical_path = reencode_path(url.path());
    url.set_path(&canonical_path);

    Ok(url)
}

/// Percent-decode each path segment, then re-encode with one alphabet so
/// spelling variants (`%7E` vs `~`, stray uppercase escapes) collapse to a
/// single key. Segments that are not valid UTF-8 once decoded are kept as-is.
fn reencode_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let trailing_slash = path.len() > 1 && path.ends_with('/');
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        match percent_decode_str(segment).decode_utf8() {
            Ok(decoded) => {
                out.extend(utf8_percent_encode(&decoded, SEGMENT_ENCODE_SET));
            }
            Err(_) => out.push_str(segment),
        }
    }
    if out.is_empty() {
        out.push('/');
    } else if trailing_slash {
        out.push('/');
    }
    out
}

/// The `host[:port]` component of a canonical URL. The port only appears
/// when it is not the scheme default (the parser strips defaults).
pub fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// File extension for a saved body, chosen from the Content-Type.
pub fn extension_for(content_type: Option<&str>) -> &'static str {
    let essence = content_type
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "text/html" | "application/xhtml+xml" => "html",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

/// Maps canonical URLs to deterministic paths under a job's content root.
///
/// Output shape: `<content_root>/<authority>/<slug>-<hash>.<ext>`. The hash
/// component is the collision key; the slug exists for human browsing only.
#[derive(Debug, Clone)]
pub struct PathMapper {
    content_root: PathBuf,
}

impl PathMapper {
    pub fn new(content_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
        }
    }

    pub fn content_root(&self) -> &std::path::Path {
        &self.content_root
    }

    /// Target path for a canonical URL and a Content-Type.
    pub fn map(&self, url: &Url, content_type: Option<&str>) -> PathBuf {
        self.mapped(url, extension_for(content_type))
    }

    /// Look for a previously saved body for this URL, regardless of which
    /// extension the earlier fetch chose. Used by the `force = false` skip
    /// path before any network work happens.
    pub fn find_existing(&self, url: &Url) -> Option<PathBuf> {
        ["html", "pdf", "bin"]
            .iter()
            .map(|ext| self.mapped(url, ext))
            .find(|path| path.is_file())
    }

    fn mapped(&self, url: &Url, ext: &str) -> PathBuf {
        let digest = xxh3_64(url.as_str().as_bytes());
        let hash = &format!("{digest:016x}")[..PATH_HASH_LEN];
        let file = format!("{}-{}.{}", slug_for(url), hash, ext);
        self.content_root.join(authority(url)).join(file)
    }
}

/// Flatten a URL path into a filesystem-safe slug: segments joined by `-`,
/// sanitised, truncated, `"index"` when the path is empty.
fn slug_for(url: &Url) -> String {
    let joined = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("-");

    let mut slug = sanitize_filename::sanitize(joined);
    if slug.is_empty() {
        return "index".to_string();
    }
    if slug.len() > SLUG_MAX_LEN {
        let mut end = SLUG_MAX_LEN;
        while end > 0 && !slug.is_char_boundary(end) {
            end -= 1;
        }
        slug.truncate(end);
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_and_host_lowercased_default_port_stripped() {
        let url = canonicalize("HTTP://Example.COM:80/Docs/").unwrap();
        assert_eq!(url.as_str(), "http://example.com/Docs/");
    }

    #[test]
    fn non_default_port_preserved_in_authority() {
        let url = canonicalize("http://example.com:8080/a").unwrap();
        assert_eq!(authority(&url), "example.com:8080");

        let url = canonicalize("https://example.com:443/a").unwrap();
        assert_eq!(authority(&url), "example.com");
    }

    #[test]
    fn fragment_removed_query_verbatim() {
        let url = canonicalize("http://example.com/a?b=2&a=1#frag").unwrap();
        assert_eq!(url.as_str(), "http://example.com/a?b=2&a=1");
    }

    #[test]
    fn dot_segments_resolved() {
        let url = canonicalize("http://example.com/a/b/../c/./d").unwrap();
        assert_eq!(url.path(), "/a/c/d");
    }

    #[test]
    fn percent_encoding_is_normalised() {
        let a = canonicalize("http://example.com/%7Euser/page").unwrap();
        let b = canonicalize("http://example.com/~user/page").unwrap();
        assert_eq!(a.as_str(), b.as_str());

        let spaced = canonicalize("http://example.com/a b").unwrap();
        assert_eq!(spaced.path(), "/a%20b");
    }

    #[test]
    fn trailing_slash_is_significant() {
        let with = canonicalize("http://example.com/docs/").unwrap();
        let without = canonicalize("http://example.com/docs").unwrap();
        assert_ne!(with.as_str(), without.as_str());
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(canonicalize("ftp://example.com/a").is_err());
        assert!(canonicalize("javascript:void(0)").is_err());
        assert!(canonicalize("mailto:a@example.com").is_err());
    }

    #[test]
    fn relative_resolution_uses_base() {
        let base = canonicalize("http://example.com/docs/guide/").unwrap();
        let url = canonicalize_relative(&base, "../api#section").unwrap();
        assert_eq!(url.as_str(), "http://example.com/docs/api");
    }

    #[test]
    fn extension_follows_content_type() {
        assert_eq!(extension_for(Some("text/html; charset=utf-8")), "html");
        assert_eq!(extension_for(Some("application/pdf")), "pdf");
        assert_eq!(extension_for(Some("image/png")), "bin");
        assert_eq!(extension_for(None), "bin");
    }

    #[test]
    fn mapped_paths_distinguish_urls_with_same_slug() {
        let mapper = PathMapper::new("/data/content/job");
        let a = canonicalize("http://example.com/docs?page=1").unwrap();
        let b = canonicalize("http://example.com/docs?page=2").unwrap();
        let pa = mapper.map(&a, Some("text/html"));
        let pb = mapper.map(&b, Some("text/html"));
        assert_ne!(pa, pb);
        assert!(pa.starts_with("/data/content/job/example.com"));
    }

    #[test]
    fn empty_path_maps_to_index_slug() {
        let mapper = PathMapper::new("/data/content/job");
        let url = canonicalize("http://example.com/").unwrap();
        let path = mapper.map(&url, Some("text/html"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("index-"), "got {name}");
        assert!(name.ends_with(".html"));
    }

    #[test]
    fn mapping_is_deterministic() {
        let mapper = PathMapper::new("/data");
        let url = canonicalize("http://example.com/guide/intro").unwrap();
        assert_eq!(
            mapper.map(&url, Some("text/html")),
            mapper.map(&url, Some("text/html"))
        );
    }
}

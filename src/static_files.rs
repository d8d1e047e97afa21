//! Static-file fallback serving.
//!
//! URIs that miss the route table are resolved against a configured root
//! directory. The sandbox defense is deliberately the literal `..` substring
//! check: the path is used verbatim, with no decoding or canonicalization,
//! so an encoded traversal sequence simply misses on the filesystem instead
//! of escaping the root. The MIME type comes from a fixed extension table
//! keyed on the request URI, not on the resolved filesystem path.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::dispatcher::HandlerResponse;

/// Extension → content type table. Unknown or missing extensions map to
/// `application/octet-stream`.
const MIME_TABLE: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("c", "text/plain"),
    ("h", "text/plain"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("gif", "image/gif"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("pdf", "application/pdf"),
    ("ps", "application/postscript"),
    ("json", "application/json"),
    ("xml", "text/xml"),
];

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Root directory for fallback file responses.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Content type for a URI, inferred from the extension of its path
/// component.
#[must_use]
pub fn content_type_for(uri: &str) -> &'static str {
    let path = strip_query(uri);
    let name = path.rsplit('/').next().unwrap_or(path);
    let ext = match name.rfind('.') {
        Some(idx) => &name[idx + 1..],
        None => return FALLBACK_CONTENT_TYPE,
    };
    let ext = ext.to_ascii_lowercase();
    MIME_TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, ct)| *ct)
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}

/// Serve `uri` from the configured root.
///
/// The contract, in order:
/// 1. no root configured → `404` with a descriptive body;
/// 2. URI containing the literal substring `..` → `400`, and no filesystem
///    access happens;
/// 3. the query/fragment suffix is stripped to obtain the path component;
/// 4. the content type is inferred from the original URI's extension;
/// 5. the filesystem path is `root + "/" + path`, nothing more;
/// 6. a failed stat → `404`;
/// 7. a failed open/read → `404` (directories have no listing and count as
///    missing);
/// 8. otherwise `200` with the file bytes and the inferred `Content-Type`.
#[must_use]
pub fn serve(uri: &str, files: Option<&StaticFiles>) -> HandlerResponse {
    let Some(files) = files else {
        return HandlerResponse::text(404, "static file serving is disabled\n");
    };

    if uri.contains("..") {
        debug!(uri, "rejecting request path with traversal sequence");
        return HandlerResponse::text(400, "illegal request path\n");
    }

    let path = strip_query(uri);
    let content_type = content_type_for(uri);
    let full = files.root.join(path.trim_start_matches('/'));

    match fs::metadata(&full) {
        Ok(meta) if meta.is_file() => {}
        _ => {
            debug!(path = %full.display(), "static file not found");
            return HandlerResponse::text(404, "file not found\n");
        }
    }

    let bytes = match fs::read(&full) {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(path = %full.display(), error = %err, "static file open failed");
            return HandlerResponse::text(404, "file not found\n");
        }
    };

    let mut res = HandlerResponse::with_status(200);
    res.set_header("Content-Type", content_type);
    res.write_body(&bytes);
    res
}

/// Path component of a URI: everything before the first `?` or `#`.
fn strip_query(uri: &str) -> &str {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    &uri[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_lookup_covers_the_table() {
        assert_eq!(content_type_for("/a.txt"), "text/plain");
        assert_eq!(content_type_for("/a.html"), "text/html");
        assert_eq!(content_type_for("/a.JSON"), "application/json");
        assert_eq!(content_type_for("/a.xml"), "text/xml");
        assert_eq!(content_type_for("/a.png?v=1"), "image/png");
    }

    #[test]
    fn unknown_or_missing_extension_is_octet_stream() {
        assert_eq!(content_type_for("/a.wasm"), FALLBACK_CONTENT_TYPE);
        assert_eq!(content_type_for("/no-extension"), FALLBACK_CONTENT_TYPE);
        assert_eq!(content_type_for("/dir.d/file"), FALLBACK_CONTENT_TYPE);
    }

    #[test]
    fn query_does_not_leak_into_extension() {
        assert_eq!(content_type_for("/style.css?cachebust=2"), "text/css");
        assert_eq!(content_type_for("/page#a.png"), FALLBACK_CONTENT_TYPE);
    }
}

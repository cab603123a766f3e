//! `file:` transport: local files and HTML directory listings.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use futures_util::stream;
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue, LAST_MODIFIED};
use tokio::io::AsyncReadExt;
use tracing::debug;
use url::Url;

use super::{BodyStream, Transport, TransportError, TransportRequest, TransportResponse};

/// Bytes read from disk per body chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Serves `file:` URIs from the local filesystem.
///
/// Missing files produce a 404 response rather than an error, so the agent
/// applies its usual status handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

#[async_trait]
impl Transport for FileTransport {
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let uri = request.uri;
        let path = uri.to_file_path().map_err(|()| {
            TransportError::io(
                &uri,
                io::Error::new(io::ErrorKind::InvalidInput, "not a local file URI"),
            )
        })?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "file not found");
                return Ok(response(
                    404,
                    "text/html",
                    b"<html><body><h1>404 File Not Found</h1></body></html>".to_vec(),
                    None,
                    request.method == Method::HEAD,
                ));
            }
            Err(e) => return Err(TransportError::io(&uri, e)),
        };
        let modified = metadata.modified().ok().map(httpdate::fmt_http_date);

        if metadata.is_dir() {
            let listing = directory_listing(&uri, &path)
                .await
                .map_err(|e| TransportError::io(&uri, e))?;
            return Ok(response(
                200,
                "text/html",
                listing.into_bytes(),
                modified,
                request.method == Method::HEAD,
            ));
        }

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| TransportError::io(&uri, e))?;
        let body: BodyStream = if request.method == Method::HEAD {
            Box::pin(stream::empty())
        } else {
            file_chunks(file, uri)
        };
        Ok(TransportResponse {
            status: 200,
            headers: headers(content_type_for(&path), metadata.len(), modified),
            body,
        })
    }
}

/// Response for a body generated in memory.
fn response(
    status: u16,
    content_type: &str,
    data: Vec<u8>,
    modified: Option<String>,
    head: bool,
) -> TransportResponse {
    let headers = headers(content_type, data.len() as u64, modified);
    let chunks = if head || data.is_empty() {
        Vec::new()
    } else {
        vec![Ok(data)]
    };
    TransportResponse {
        status,
        headers,
        body: Box::pin(stream::iter(chunks)),
    }
}

fn headers(content_type: &str, length: u64, modified: Option<String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    if let Some(value) = modified.and_then(|m| HeaderValue::from_str(&m).ok()) {
        headers.insert(LAST_MODIFIED, value);
    }
    headers
}

/// Streams `file` in chunks of at most [`CHUNK_SIZE`] bytes.
fn file_chunks(file: tokio::fs::File, uri: Url) -> BodyStream {
    Box::pin(stream::try_unfold((file, uri), |(mut file, uri)| async move {
        let mut chunk = vec![0; CHUNK_SIZE];
        let read = file
            .read(&mut chunk)
            .await
            .map_err(|e| TransportError::io(&uri, e))?;
        if read == 0 {
            return Ok(None);
        }
        chunk.truncate(read);
        Ok(Some((chunk, (file, uri))))
    }))
}

/// Content type guessed from the file extension.
fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" | "xhtml" => "text/html",
        "xml" => "text/xml",
        "txt" | "text" => "text/plain",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "application/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "gz" => "application/gzip",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

async fn directory_listing(uri: &Url, path: &Path) -> io::Result<String> {
    let mut base = uri.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let mut html = format!(
        "<html><head><title>Index of {0}</title></head><body><h1>Index of {0}</h1><ul>\n",
        escape_html(&path.display().to_string())
    );
    for name in &names {
        let (stem, slash) = name
            .strip_suffix('/')
            .map_or((name.as_str(), ""), |stem| (stem, "/"));
        let href = format!("{base}{}{slash}", urlencoding::encode(stem));
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            escape_html(&href),
            escape_html(name)
        ));
    }
    html.push_str("</ul></body></html>\n");
    Ok(html)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    async fn get(uri: &Url, method: Method) -> (u16, HeaderMap, Vec<u8>) {
        let response = FileTransport
            .request(TransportRequest {
                method,
                uri: uri.clone(),
                headers: HeaderMap::new(),
                body: None,
            })
            .await
            .unwrap();
        let chunks: Vec<Vec<u8>> = response.body.try_collect().await.unwrap();
        (response.status, response.headers, chunks.concat())
    }

    #[tokio::test]
    async fn test_reads_file_with_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("page.html");
        std::fs::write(&file, "<title>Local</title>").unwrap();

        let uri = Url::from_file_path(&file).unwrap();
        let (status, headers, body) = get(&uri, Method::GET).await;
        assert_eq!(status, 200);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "text/html");
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "20");
        assert!(headers.contains_key(LAST_MODIFIED));
        assert_eq!(body, b"<title>Local</title>");

        let (_, _, head_body) = get(&uri, Method::HEAD).await;
        assert!(head_body.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let uri = Url::from_file_path(dir.path().join("missing.txt")).unwrap();
        let (status, _, _) = get(&uri, Method::GET).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_directory_listing_links_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a b.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let uri = Url::from_file_path(dir.path()).unwrap();
        let (status, headers, body) = get(&uri, Method::GET).await;
        assert_eq!(status, 200);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "text/html");
        let html = String::from_utf8(body).unwrap();
        assert!(html.contains("a%20b.txt\">a b.txt</a>"), "listing: {html}");
        assert!(html.contains("sub/\">sub/</a>"), "listing: {html}");
    }

    #[tokio::test]
    async fn test_large_file_is_streamed_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&file, &data).unwrap();

        let response = FileTransport
            .request(TransportRequest {
                method: Method::GET,
                uri: Url::from_file_path(&file).unwrap(),
                headers: HeaderMap::new(),
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(response.headers.get(CONTENT_LENGTH).unwrap(), "200000");
        let chunks: Vec<Vec<u8>> = response.body.try_collect().await.unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= CHUNK_SIZE));
        assert_eq!(chunks.concat(), data);
    }

    #[test]
    fn test_content_type_guess() {
        assert_eq!(content_type_for(Path::new("x.PDF")), "application/pdf");
        assert_eq!(content_type_for(Path::new("x")), "application/octet-stream");
    }
}

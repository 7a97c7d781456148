//! Requests, responses, and the network seam the offline worker fetches
//! through.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Destination {
    #[default]
    Empty,
    Document,
    Style,
    Script,
    Font,
    Image,
    Manifest,
}

impl Destination {
    /// Stylesheets, scripts, and fonts are served cache-first.
    pub fn is_static_subresource(self) -> bool {
        matches!(self, Destination::Style | Destination::Script | Destination::Font)
    }

    /// Best guess from a URL path, for callers that only have a URL.
    pub fn guess(url: &str) -> Self {
        let (_, path) = split_url(url);
        let path = path.split(['?', '#']).next().unwrap_or_default();
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("css") => Destination::Style,
            Some("js" | "mjs") => Destination::Script,
            Some("woff" | "woff2" | "ttf" | "otf") => Destination::Font,
            Some("png" | "jpg" | "jpeg" | "gif" | "svg" | "ico" | "webp") => Destination::Image,
            Some("json" | "webmanifest") => Destination::Manifest,
            Some("html") => Destination::Document,
            _ => Destination::Empty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    #[default]
    NoCors,
    Cors,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub destination: Destination,
    pub mode: RequestMode,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: Destination::Empty,
            mode: RequestMode::NoCors,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: Destination::Document,
            mode: RequestMode::Navigate,
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// `Basic` responses come from the application's own origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ResponseKind {
    Basic,
    Cors,
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub kind: ResponseKind,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(body: impl Into<Vec<u8>>, content_type: Option<String>) -> Self {
        Self {
            status: 200,
            kind: ResponseKind::Basic,
            content_type,
            body: body.into(),
        }
    }

    /// Blank stand-in handed back for fonts that cannot be fetched.
    pub fn empty_ok() -> Self {
        Self::ok(Vec::new(), None)
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            kind: ResponseKind::Basic,
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable for {url}")]
    Unreachable { url: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub trait Fetcher {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Serves the application's own origin from a directory of built assets.
/// Other origins are treated as unreachable.
#[derive(Debug, Clone)]
pub struct AssetDirFetcher {
    root: PathBuf,
    origin: String,
}

impl AssetDirFetcher {
    pub fn new(root: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            origin: origin.into(),
        }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let decoded = percent_decode_str(path).decode_utf8_lossy();
        let relative = decoded.trim_start_matches('/');
        let relative = if relative.is_empty() { "index.html" } else { relative };
        let candidate = Path::new(relative);
        if candidate
            .components()
            .any(|part| !matches!(part, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(candidate))
    }
}

impl Fetcher for AssetDirFetcher {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let (origin, path) = split_url(&request.url);
        if origin.is_some_and(|origin| origin != self.origin) {
            return Err(FetchError::Unreachable {
                url: request.url.clone(),
            });
        }
        let Some(file) = self.resolve(path) else {
            return Ok(Response::status(404));
        };
        if !file.is_file() {
            return Ok(Response::status(404));
        }
        let body = fs::read(&file).map_err(|source| FetchError::Io {
            path: file.clone(),
            source,
        })?;
        let mime = mime_guess::from_path(&file).first_or_octet_stream();
        Ok(Response::ok(body, Some(mime.to_string())))
    }
}

/// Fails every request, as a host with no connectivity would.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        Err(FetchError::Unreachable {
            url: request.url.clone(),
        })
    }
}

/// Splits `scheme://host[:port]/path` into origin and path. Relative URLs
/// have no origin.
pub fn split_url(url: &str) -> (Option<&str>, &str) {
    let Some(scheme_end) = url.find("://") else {
        return (None, url);
    };
    let authority_start = scheme_end + 3;
    match url[authority_start..].find(['/', '?', '#']) {
        Some(offset) => {
            let split = authority_start + offset;
            (Some(&url[..split]), &url[split..])
        }
        None => (Some(url), "/"),
    }
}

//! Static files compiled into the binary and helpers shared by generators.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::sink::{FileClass, Sink, SinkFileInfo};

/// A file served from memory.
#[derive(Debug, PartialEq, Eq)]
pub struct SupportFile {
    pub path: &'static str,
    pub content_type: &'static str,
    pub data: &'static [u8],
}

/// Browser page of a resource.
pub static INDEX_HTML: SupportFile = SupportFile {
    path: "index.html",
    content_type: "text/html; charset=utf-8",
    data: include_bytes!("files/index.html"),
};

/// Style used for geodata layers without a configured style.
pub static DEFAULT_STYLE: SupportFile = SupportFile {
    path: "style.json",
    content_type: "application/json; charset=utf-8",
    data: include_bytes!("files/style.json"),
};

static SUPPORT_FILES: [&SupportFile; 1] = [&INDEX_HTML];

/// Looks up a support file by its path.
pub fn find(path: &str) -> Option<&'static SupportFile> {
    SUPPORT_FILES.iter().copied().find(|f| f.path == path)
}

/// Sends a support file.
pub fn serve(file: &SupportFile, sink: &mut dyn Sink) -> Result<()> {
    sink.content(
        file.data,
        &SinkFileInfo::new(file.content_type, FileClass::Support),
    )
}

/// Streams a file from disk; a missing file is `NotFound`.
pub fn serve_path(
    path: &Path,
    content_type: &str,
    class: FileClass,
    sink: &mut dyn Sink,
) -> Result<()> {
    let mut file = File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            Error::not_found(format!("{} not found.", path.display()))
        } else {
            Error::from(e)
        }
    })?;
    sink.content_stream(&mut file, &SinkFileInfo::new(content_type, class))
}

/// Content type guessed from a file extension.
pub fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("json") => "application/json; charset=utf-8",
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Where a geodata layer's style comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSource {
    /// Built-in default, served as `style.json`.
    Internal,
    /// Local file (`file:` URL), served as `style.json`.
    File(PathBuf),
    /// External URL, referenced verbatim.
    External(String),
}

impl StyleSource {
    /// Resolves a configured style URL; `file:` paths are relative to `data_root`.
    pub fn resolve(style_url: &str, data_root: &Path) -> Self {
        if style_url.is_empty() {
            return StyleSource::Internal;
        }
        match style_url.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("file:") => {
                StyleSource::File(data_root.join(&style_url[5..]))
            }
            _ => StyleSource::External(style_url.to_string()),
        }
    }

    /// URL written into the layer definition.
    pub fn url(&self) -> &str {
        match self {
            StyleSource::Internal | StyleSource::File(_) => "style.json",
            StyleSource::External(url) => url,
        }
    }

    /// Serves `style.json`. External styles are not ours to serve.
    pub fn serve(&self, sink: &mut dyn Sink) -> Result<()> {
        match self {
            StyleSource::Internal => sink.content(
                DEFAULT_STYLE.data,
                &SinkFileInfo::new(DEFAULT_STYLE.content_type, FileClass::Config),
            ),
            StyleSource::File(path) => {
                serve_path(path, DEFAULT_STYLE.content_type, FileClass::Config, sink)
            }
            StyleSource::External(_) => Err(Error::not_found("Style is served elsewhere.")),
        }
    }
}

/// Appends the revision to a URL for cache busting; revision 0 adds nothing.
pub fn with_revision(url: &str, revision: u32, separator: char) -> String {
    if revision == 0 {
        url.to_string()
    } else {
        format!("{}{}{}", url, separator, revision)
    }
}

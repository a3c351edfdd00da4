use crate::error::IngestError;
use crate::models::{Document, Metadata, SOURCE_KEY, SOURCE_URL_KEY, TITLE_KEY};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;
use walkdir::WalkDir;

const MARKDOWN_EXTENSIONS: [&str; 2] = ["md", "markdown"];

pub trait DocumentLoader {
    fn load(&self) -> Result<Vec<Document>, IngestError>;
}

/// Finds markdown files under `root`, sorted by path so repeated loads agree.
pub fn discover_markdown_files(root: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !root.exists() {
        return Err(IngestError::Load {
            path: root.display().to_string(),
            reason: "path does not exist".to_string(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let is_markdown = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                MARKDOWN_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if is_markdown {
            files.push(entry.into_path());
        }
    }

    files.sort_unstable();
    Ok(files)
}

/// Path of `file` relative to `root` with `/` separators.
///
/// When `root` is the file itself the file name is used.
pub fn relative_source(root: &Path, file: &Path) -> Result<String, IngestError> {
    let relative = if root == file {
        file.file_name().map(PathBuf::from)
    } else {
        file.strip_prefix(root).ok().map(Path::to_path_buf)
    };

    let relative = relative.ok_or_else(|| IngestError::Load {
        path: file.display().to_string(),
        reason: format!("unable to get path relative to {}", root.display()),
    })?;

    let parts = relative
        .components()
        .map(|component| {
            component.as_os_str().to_str().map(str::to_string).ok_or_else(|| {
                IngestError::Load {
                    path: file.display().to_string(),
                    reason: "path is not valid unicode".to_string(),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(parts.join("/"))
}

/// Joins a forward-slash source path onto a base URL, treating the base as a directory.
pub fn join_source_url(base: &Url, source: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(source)
}

fn read_document(root: &Path, path: &Path) -> Result<(String, String), IngestError> {
    let bytes = fs::read(path).map_err(|error| IngestError::Load {
        path: path.display().to_string(),
        reason: error.to_string(),
    })?;
    let content = String::from_utf8(bytes).map_err(|error| IngestError::Load {
        path: path.display().to_string(),
        reason: format!("file is not valid utf-8: {error}"),
    })?;
    let source = relative_source(root, path)?;
    Ok((source, content))
}

/// Loads every markdown file below a directory.
#[derive(Debug, Clone)]
pub struct MarkdownDirectoryLoader {
    root: PathBuf,
    base_source_url: Option<Url>,
}

impl MarkdownDirectoryLoader {
    pub fn new(root: impl Into<PathBuf>, base_source_url: Option<Url>) -> Self {
        Self {
            root: root.into(),
            base_source_url,
        }
    }
}

impl DocumentLoader for MarkdownDirectoryLoader {
    fn load(&self) -> Result<Vec<Document>, IngestError> {
        let files = discover_markdown_files(&self.root)?;
        let mut documents = Vec::with_capacity(files.len());

        for path in files {
            let (source, content) = read_document(&self.root, &path)?;

            let mut metadata = Metadata::new();
            if let Some(base) = &self.base_source_url {
                let url = join_source_url(base, &source).map_err(|error| IngestError::Load {
                    path: path.display().to_string(),
                    reason: format!("unable to build source url: {error}"),
                })?;
                metadata.insert(SOURCE_URL_KEY.to_string(), url.to_string());
            }
            metadata.insert(SOURCE_KEY.to_string(), source);

            debug!(path = %path.display(), bytes = content.len(), "loaded document");
            documents.push(Document::new(content, metadata));
        }

        Ok(documents)
    }
}

/// Loads a Notion markdown export. Adds a `title` taken from the file name
/// without the page id Notion appends to every exported file.
#[derive(Debug, Clone)]
pub struct NotionExportLoader {
    root: PathBuf,
    page_id: Regex,
}

impl NotionExportLoader {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let page_id = Regex::new(r"\s+[0-9a-fA-F]{32}$").map_err(|error| IngestError::Load {
            path: String::new(),
            reason: error.to_string(),
        })?;
        Ok(Self {
            root: root.into(),
            page_id,
        })
    }

    fn title(&self, path: &Path) -> Option<String> {
        let stem = path.file_stem()?.to_str()?;
        let title = self.page_id.replace(stem, "");
        Some(title.trim().to_string())
    }
}

impl DocumentLoader for NotionExportLoader {
    fn load(&self) -> Result<Vec<Document>, IngestError> {
        let files = discover_markdown_files(&self.root)?;
        let mut documents = Vec::with_capacity(files.len());

        for path in files {
            let (source, content) = read_document(&self.root, &path)?;

            let mut metadata = Metadata::new();
            if let Some(title) = self.title(&path).filter(|title| !title.is_empty()) {
                metadata.insert(TITLE_KEY.to_string(), title);
            }
            metadata.insert(SOURCE_KEY.to_string(), source);
            documents.push(Document::new(content, metadata));
        }

        Ok(documents)
    }
}

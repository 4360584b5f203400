use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::IndexError;

const PAGE_BREAK: char = '\x0c';
const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];
const PDF_EXTENSION: &str = "pdf";

/// One guideline file split into pages.
#[derive(Debug, Clone)]
pub struct GuidelineDocument {
    pub source: String,
    pub pages: Vec<String>,
}

/// Read every `.pdf`, `.txt` and `.md` file in `dir`, ordered by file name.
///
/// PDFs yield one page per PDF page; text files are split on form feeds.
/// Pages are numbered from zero. Subdirectories and other extensions are
/// ignored.
pub fn load_corpus(dir: &Path) -> Result<Vec<GuidelineDocument>, IndexError> {
    if !dir.is_dir() {
        return Err(IndexError::CorpusNotFound(dir.to_path_buf()));
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && kind_of(p).is_some())
        .collect();
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let pages = match kind_of(&path) {
            Some(DocumentKind::Pdf) => pdf_pages(&path)?,
            _ => text_pages(&path)?,
        };
        debug!(source = %path.display(), pages = pages.len(), "Loaded guideline document");
        documents.push(GuidelineDocument {
            source: path.display().to_string(),
            pages,
        });
    }

    if documents.is_empty() {
        return Err(IndexError::EmptyCorpus(dir.to_path_buf()));
    }
    Ok(documents)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentKind {
    Text,
    Pdf,
}

fn kind_of(path: &Path) -> Option<DocumentKind> {
    let ext = path.extension()?.to_str()?;
    if ext.eq_ignore_ascii_case(PDF_EXTENSION) {
        Some(DocumentKind::Pdf)
    } else if TEXT_EXTENSIONS.iter().any(|x| ext.eq_ignore_ascii_case(x)) {
        Some(DocumentKind::Text)
    } else {
        None
    }
}

fn text_pages(path: &Path) -> Result<Vec<String>, IndexError> {
    let text = std::fs::read_to_string(path)?;
    Ok(text.split(PAGE_BREAK).map(str::to_string).collect())
}

fn pdf_pages(path: &Path) -> Result<Vec<String>, IndexError> {
    let bytes = std::fs::read(path)?;
    pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|e| IndexError::Pdf {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

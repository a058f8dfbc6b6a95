use std::path::PathBuf;

use thiserror::Error;

/// Fatal document-level failures.
#[derive(Error, Debug)]
pub enum SvgError {
    #[error("failed to read {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decompress gzip stream: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("document is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("malformed document: {0}")]
    Parse(String),

    #[error("no path with id {0:?}")]
    NotFound(String),

    #[error("raster backend error: {0}")]
    Raster(String),
}

pub type Result<T> = std::result::Result<T, SvgError>;

/// Failure to produce geometry for one element. The element and its subtree
/// are skipped; the rest of the document still loads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("<{element}> is missing required attribute `{attribute}`")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    #[error("invalid path data: {0}")]
    InvalidPathData(String),

    #[error("<{element}> needs at least two coordinate pairs, found {found}")]
    InvalidPoints { element: String, found: usize },
}

/// Stencil budget problems. Never surfaced to callers; the compositor logs
/// them and draws the affected shape unmasked.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilError {
    #[error("{requested} simultaneous stencil masks requested, only {available} ids exist")]
    DepthExceeded { requested: u32, available: u32 },

    #[error("stencil ids exhausted while {live} masks are still live")]
    WouldClobber { live: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Paint,
    ClipPath,
    Use,
}

/// Recoverable problems collected while loading or recording a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    UnsupportedElement {
        element: String,
    },
    UnresolvedReference {
        kind: ReferenceKind,
        id: String,
    },
    ElementSkipped {
        element: String,
        id: Option<String>,
        error: ParseError,
    },
    Stencil(StencilError),
    StencilUnavailable,
    PatternsUnavailable,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::UnsupportedElement { element } => {
                write!(f, "<{element}> is not supported and was ignored")
            }
            Warning::UnresolvedReference { kind, id } => {
                write!(f, "unresolved {kind:?} reference #{id}")
            }
            Warning::ElementSkipped { element, id, error } => match id {
                Some(id) => write!(f, "skipped <{element} id={id:?}>: {error}"),
                None => write!(f, "skipped <{element}>: {error}"),
            },
            Warning::Stencil(err) => write!(f, "stencil: {err}"),
            Warning::StencilUnavailable => {
                write!(f, "stencil buffer unavailable, clip paths drawn unmasked")
            }
            Warning::PatternsUnavailable => {
                write!(f, "offscreen targets unavailable, pattern fills skipped")
            }
        }
    }
}

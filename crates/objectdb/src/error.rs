//! Crate-wide error taxonomy.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Object,
    AttributeClass,
    Attribute,
    Table,
    View,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotFoundKind::Object => "object",
            NotFoundKind::AttributeClass => "attribute_class",
            NotFoundKind::Attribute => "attribute",
            NotFoundKind::Table => "table",
            NotFoundKind::View => "view",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: NotFoundKind, id: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("schema violation: {detail}")]
    SchemaViolation { detail: String },

    #[error("unsupported operator {op:?} for attribute class {class}")]
    Unsupported { class: String, op: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(kind: NotFoundKind, id: impl fmt::Display) -> Error {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Combines the failures of every hook that ran for one operation. The first
/// hook to fail is the principal error; later failures are chained rather
/// than discarded, so a caller debugging a cascading failure can see the
/// whole picture instead of just the first symptom.
#[derive(Debug)]
pub struct HookError {
    pub principal: Box<Error>,
    pub chained: Vec<Error>,
}

impl HookError {
    pub fn new(principal: Error) -> HookError {
        HookError {
            principal: Box::new(principal),
            chained: Vec::new(),
        }
    }

    pub fn push(&mut self, err: Error) {
        self.chained.push(err);
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.principal)?;
        for err in &self.chained {
            write!(f, "\nalso: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for HookError {}

/// Runs every hook in `hooks`, collecting failures into a single
/// [`HookError`] instead of aborting on the first one. Returns `Ok(())` iff
/// every hook succeeded.
pub fn collect_hook_errors<I, F>(hooks: I, mut run: F) -> Result<()>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Result<()>,
{
    let mut combined: Option<HookError> = None;
    for hook in hooks {
        if let Err(err) = run(hook) {
            match &mut combined {
                Some(existing) => existing.push(err),
                None => combined = Some(HookError::new(err)),
            }
        }
    }
    match combined {
        Some(err) => Err(Error::Hook(err)),
        None => Ok(()),
    }
}

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ArchiveError {
    #[error("malformed key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("no {what} stored for year {year}")]
    NotFound { year: i32, what: String },

    #[error("shape mismatch in {year}: {detail}")]
    ShapeMismatch { year: i32, detail: String },

    #[error("rows span several years: {years:?}")]
    MixedYear { years: Vec<i32> },

    #[error("duplicate {series} key {key} in {year}")]
    #[diagnostic(help("a product that is already archived must not be imported again"))]
    DuplicateKey {
        year: i32,
        series: &'static str,
        key: i64,
    },

    #[error("key mismatch in {year}: profile {profile_key} does not own row {row_key}")]
    KeyMismatch {
        year: i32,
        profile_key: i64,
        row_key: i64,
    },

    #[error("{series} keys in {year} are not sorted: {previous} precedes {next}")]
    #[diagnostic(help("re-run `mcs-archive sort` for this year"))]
    NotSorted {
        year: i32,
        series: &'static str,
        previous: i64,
        next: i64,
    },

    #[error("schema mismatch in {year}: {detail}")]
    SchemaMismatch { year: i32, detail: String },

    #[error("cannot combine {what} of {left} and {right} values")]
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },

    #[error("unsupported container format in {path}: {detail}")]
    UnsupportedFormat { path: Utf8PathBuf, detail: String },

    #[error("year {year} is locked by another writer ({path})")]
    Locked { year: i32, path: Utf8PathBuf },

    #[error("failed to parse {path} line {line}: {detail}")]
    Parse {
        path: Utf8PathBuf,
        line: usize,
        detail: String,
    },

    #[error("fetch failed for {product}: {detail}")]
    Fetch { product: String, detail: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl ArchiveError {
    pub fn malformed(key: &str, reason: impl Into<String>) -> Self {
        ArchiveError::MalformedKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::NotFound { .. })
    }

    /// True for the invariant violations the consistency checker reports.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            ArchiveError::ShapeMismatch { .. }
                | ArchiveError::KeyMismatch { .. }
                | ArchiveError::NotSorted { .. }
                | ArchiveError::DuplicateKey { .. }
        )
    }
}

pub(crate) fn fs_err(err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Filesystem(err.to_string())
}

use crate::AnyError;

/// Status codes surfaced alongside errors, mirroring the HTTP codes the view
/// API has historically reported.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Status {
    /// The operation succeeded.
    Ok,
    /// The index was already up to date; nothing was written.
    NotModified,
    /// The request was malformed or combined incompatible options.
    BadRequest,
    /// The named view or document does not exist.
    NotFound,
    /// A revision conflict prevented the write.
    Conflict,
    /// The storage layer reported an error.
    DbError,
    /// An invariant of the engine itself was violated.
    InternalServerError,
}

impl Status {
    /// The numeric code for this status.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::NotModified => 304,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::DbError | Self::InternalServerError => 500,
        }
    }

    /// Returns true if this status reports success.
    #[must_use]
    pub const fn is_successful(self) -> bool {
        self.code() < 400
    }
}

/// An enumeration of the errors this crate and the index engine can produce.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The owning database has been closed; the handle is no longer usable.
    #[error("database is not open")]
    NotOpen,

    /// A view, document, or revision was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was malformed or combined incompatible query options.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A write conflicted with the current winning revision.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An error from the storage layer. The transaction it occurred in has
    /// been rolled back.
    #[error("error from storage: {0}")]
    Database(Box<dyn AnyError>),

    /// An error serializing or deserializing JSON keys, values, or document
    /// bodies.
    #[error("error serializing: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation was cancelled before it completed. No state was changed.
    #[error("operation was cancelled")]
    Cancelled,

    /// A user-supplied map or reduce function failed. For map functions this
    /// is logged and swallowed per document; reduce failures surface to the
    /// query caller.
    #[error("view function failed: {0}")]
    ViewFunction(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wraps an arbitrary storage-layer error.
    pub fn database<E: AnyError>(error: E) -> Self {
        Self::Database(Box::new(error))
    }

    /// The status code this error reports.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::NotOpen | Self::BadRequest(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
            Self::Conflict(_) => Status::Conflict,
            Self::Database(_) | Self::Serialization(_) => Status::DbError,
            Self::Cancelled | Self::ViewFunction(_) | Self::Internal(_) => {
                Status::InternalServerError
            }
        }
    }
}

#[test]
fn status_codes() {
    assert_eq!(Status::Ok.code(), 200);
    assert_eq!(Status::NotModified.code(), 304);
    assert!(Status::NotModified.is_successful());
    assert_eq!(
        Error::BadRequest(String::from("nope")).status().code(),
        400
    );
    assert_eq!(Error::NotFound(String::from("view")).status().code(), 404);
    assert_eq!(
        Error::database(std::io::Error::new(std::io::ErrorKind::Other, "disk"))
            .status()
            .code(),
        500
    );
}

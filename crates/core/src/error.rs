use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error calling {provider}: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },

    #[error("invalid response from {provider}: {details}")]
    InvalidResponse {
        provider: &'static str,
        details: String,
    },

    #[error("input text is empty after normalization")]
    EmptyInput,

    #[error("provider misconfigured: {0}")]
    Config(String),

    #[error("provider request failed: {0}")]
    Request(String),
}

impl ProviderError {
    pub(crate) fn from_reqwest(provider: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { provider }
        } else {
            Self::Http { provider, source }
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request failed: {0}")]
    Request(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object {bucket}/{key} not found")]
    ObjectNotFound { bucket: String, key: String },
}

#[derive(Debug, Error)]
pub enum ParsingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    Pdf(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),
}

/// One batch item that could not be embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("embedding or generation provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("collection {collection} has dimension {expected} but received vectors of dimension {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("collection {0} does not exist")]
    CollectionNotFound(String),

    #[error("collection {0} has not been connected")]
    NotConnected(String),

    #[error("parsing failed: {0}")]
    Parsing(#[from] ParsingError),

    #[error(
        "embedding failed for {count} of {total} batch items: {items}",
        count = .failed.len(),
        items = describe_failures(.failed)
    )]
    PartialFailure {
        total: usize,
        failed: Vec<ItemFailure>,
    },

    #[error("{operation} on collection {collection} failed: {source}")]
    Store {
        operation: &'static str,
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("indexing cancelled after {documents_committed} documents ({chunks_committed} chunks)")]
    Cancelled {
        documents_committed: usize,
        chunks_committed: usize,
    },

    #[error(
        "indexing failed after {documents_committed} documents ({chunks_committed} chunks) \
         were written and could not be removed: {source}"
    )]
    PartialCommit {
        documents_committed: usize,
        chunks_committed: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),
}

impl PipelineError {
    pub(crate) fn store(operation: &'static str, collection: &str, source: StoreError) -> Self {
        Self::Store {
            operation,
            collection: collection.to_string(),
            source,
        }
    }
}

fn describe_failures(failed: &[ItemFailure]) -> String {
    failed
        .iter()
        .map(|failure| format!("#{} ({})", failure.index, failure.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

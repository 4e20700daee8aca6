use thiserror::Error;

/// Error taxonomy for the retrieval pipeline
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Network error: {message}")]
    Network { message: String, is_timeout: bool },

    #[error("HTTP error: {status_code} - {message}")]
    Http { status_code: u16, message: String },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("Vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Data corruption detected: {details}")]
    Corruption { details: String },

    #[error("Storage quota exceeded while writing '{key}'")]
    CapacityExceeded { key: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("No usable storage backend: {attempted}")]
    StorageUnavailable { attempted: String },

    #[error("Compression error: {message}")]
    Compression { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },
}

impl SearchError {
    /// Create a user-friendly error message for the host notification surface
    pub fn user_message(&self) -> String {
        match self {
            SearchError::Configuration { message } => {
                format!("AI search is not configured correctly: {}. Please check the plugin settings.", message)
            }
            SearchError::Network { is_timeout: true, .. } => {
                "The AI service did not answer in time. Please try again.".to_string()
            }
            SearchError::Network { message, .. } => {
                format!("Could not reach the AI service: {}", message)
            }
            SearchError::Http { status_code, .. } => {
                format!("The AI service returned an error (HTTP {}).", status_code)
            }
            SearchError::InvalidResponse { service, .. } => {
                format!("The {} service returned an unexpected answer.", service)
            }
            SearchError::DimensionMismatch { expected, found } => {
                format!(
                    "The search index was built with {}-dimensional embeddings but the current model produces {}. Please rebuild the index.",
                    expected, found
                )
            }
            SearchError::Corruption { .. } => {
                "The search index looks damaged and will be rebuilt.".to_string()
            }
            SearchError::CapacityExceeded { .. } => {
                "Local storage is full. Free some space, then continue indexing.".to_string()
            }
            SearchError::Storage { message } => {
                format!("Saving search data failed: {}", message)
            }
            SearchError::StorageUnavailable { .. } => {
                "No local storage is available for the search index.".to_string()
            }
            SearchError::Compression { .. } | SearchError::Serialization { .. } => {
                "Search data could not be encoded or decoded.".to_string()
            }
            SearchError::InvalidInput { reason } => format!("Invalid request: {}", reason),
        }
    }

    /// Transient failures that are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Network { .. } | SearchError::InvalidResponse { .. } => true,
            SearchError::Http { status_code, .. } => *status_code == 429 || *status_code >= 500,
            _ => false,
        }
    }

    /// Errors that may cross the orchestrator boundary
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SearchError::Configuration { .. } | SearchError::StorageUnavailable { .. }
        )
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, SearchError::CapacityExceeded { .. })
    }

    pub fn config(message: impl Into<String>) -> Self {
        SearchError::Configuration { message: message.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        SearchError::Storage { message: message.into() }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return SearchError::Http {
                status_code: status.as_u16(),
                message: error.to_string(),
            };
        }
        SearchError::Network {
            message: error.to_string(),
            is_timeout: error.is_timeout(),
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(error: serde_json::Error) -> Self {
        SearchError::Serialization { message: error.to_string() }
    }
}

impl From<std::io::Error> for SearchError {
    fn from(error: std::io::Error) -> Self {
        SearchError::Storage { message: error.to_string() }
    }
}

/// Result type alias for pipeline operations
pub type SearchResult<T> = Result<T, SearchError>;

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[source] anyhow::Error),

    #[error("Publish error: {0}")]
    PublishError(#[source] anyhow::Error),

    #[error("Receipt extraction error: {0}")]
    ExtractionError(#[source] anyhow::Error),
}

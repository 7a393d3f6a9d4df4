use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("content error: {0}")]
    Content(#[from] cask_content::ContentError),

    #[error("ref error: {0}")]
    Ref(#[from] cask_refs::RefError),

    #[error("document error: {0}")]
    Document(#[from] cask_versioned::VersionedError),
}

impl SdkError {
    /// Returns `true` if an update lost an optimistic concurrency race.
    pub fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            SdkError::Document(cask_versioned::VersionedError::VersionConflict { .. })
        )
    }
}

pub type SdkResult<T> = Result<T, SdkError>;

//! Error taxonomy surfaced by the filesystem core.

use parsec_core::{BlockError, CryptoError, VlobError};

use crate::manifest::ManifestError;

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("no such file or folder: {0}")]
    NotFound(String),
    #[error("path already exists: {0}")]
    AlreadyExists(String),
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("not a folder: {0}")]
    NotAFolder(String),
    #[error("invalid path: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("bad parameters: {0}")]
    BadParams(String),
    #[error("bad version: {0}")]
    BadVersion(String),
    #[error(transparent)]
    Vlob(VlobError),
    #[error(transparent)]
    Block(BlockError),
    #[error(transparent)]
    Manifest(ManifestError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("backend offline: {0}")]
    Offline(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type FSResult<T> = Result<T, FsError>;

impl FsError {
    /// Machine-readable status string for the command surface.
    pub fn status(&self) -> &'static str {
        match self {
            FsError::Path(PathError::NotFound(_)) => "path_not_found",
            FsError::Path(PathError::AlreadyExists(_)) => "path_already_exists",
            FsError::Path(PathError::NotAFile(_)) => "path_not_a_file",
            FsError::Path(PathError::NotAFolder(_)) => "path_not_a_folder",
            FsError::Path(PathError::Invalid(_)) => "invalid_path",
            FsError::BadParams(_) => "bad_params",
            FsError::BadVersion(_) => "bad_version",
            FsError::Vlob(VlobError::NotFound(_)) => "vlob_not_found",
            FsError::Vlob(VlobError::TrustSeed(_)) => "trust_seed_error",
            FsError::Vlob(VlobError::BadVersion { .. }) => "bad_version",
            FsError::Vlob(VlobError::BadParams(_)) => "bad_params",
            FsError::Vlob(_) => "vlob_error",
            FsError::Block(BlockError::NotFound(_)) => "block_not_found",
            FsError::Block(_) => "block_error",
            FsError::Manifest(_) => "manifest_error",
            FsError::Crypto(_) => "crypto_error",
            FsError::Offline(_) => "backend_offline",
            FsError::Internal(_) => "crashed",
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, FsError::Offline(_))
    }

    pub fn is_path_not_found(&self) -> bool {
        matches!(self, FsError::Path(PathError::NotFound(_)))
    }
}

impl From<VlobError> for FsError {
    fn from(err: VlobError) -> Self {
        match err {
            VlobError::Offline(msg) => FsError::Offline(msg),
            other => FsError::Vlob(other),
        }
    }
}

impl From<BlockError> for FsError {
    fn from(err: BlockError) -> Self {
        match err {
            BlockError::Offline(msg) => FsError::Offline(msg),
            other => FsError::Block(other),
        }
    }
}

impl From<ManifestError> for FsError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Crypto(err) => FsError::Crypto(err),
            other => FsError::Manifest(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_core::{BlockId, VlobId};

    #[test]
    fn offline_failures_collapse_into_one_kind() {
        let from_vlob: FsError = VlobError::Offline("down".into()).into();
        let from_block: FsError = BlockError::Offline("down".into()).into();
        assert!(from_vlob.is_offline());
        assert_eq!(from_block.status(), "backend_offline");
    }

    #[test]
    fn statuses_are_distinct_per_kind() {
        let cases: Vec<(FsError, &str)> = vec![
            (PathError::NotFound("/a".into()).into(), "path_not_found"),
            (VlobError::TrustSeed(VlobId::new("v")).into(), "trust_seed_error"),
            (BlockError::NotFound(BlockId::new("b")).into(), "block_not_found"),
            (
                ManifestError::Schema("bad".into()).into(),
                "manifest_error",
            ),
            (
                ManifestError::Crypto(CryptoError::DecryptionFailed).into(),
                "crypto_error",
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }
}

pub mod index;
pub mod ssdeep;

use std::path::Path;

use crate::error::Error;

pub use index::{build_index, HashIndex, IndexBuild, IndexEntry};
pub use ssdeep::SsdeepOracle;

/// The external fuzzy-hashing capability.
///
/// Implementations return the oracle's raw text; interpreting it is the
/// parser's job. Scores need not be symmetric or transitive.
pub trait SimilarityOracle {
    /// Content fingerprint for a single file.
    fn fingerprint(&self, file: &Path) -> Result<String, Error>;

    /// One batch comparison of every candidate entry against every reference
    /// entry. Must return `Error::OracleUnavailable` when the batch form cannot
    /// run, so callers can tell it apart from an empty report.
    fn compare_indexes(&self, reference_index: &Path, candidate_index: &Path)
        -> Result<String, Error>;

    /// Compare one file against a reference index. Ordering of the returned
    /// matches is oracle-defined.
    fn compare_single(&self, reference_index: &Path, file: &Path) -> Result<String, Error>;
}

impl<T: SimilarityOracle + ?Sized> SimilarityOracle for &T {
    fn fingerprint(&self, file: &Path) -> Result<String, Error> {
        (**self).fingerprint(file)
    }

    fn compare_indexes(
        &self,
        reference_index: &Path,
        candidate_index: &Path,
    ) -> Result<String, Error> {
        (**self).compare_indexes(reference_index, candidate_index)
    }

    fn compare_single(&self, reference_index: &Path, file: &Path) -> Result<String, Error> {
        (**self).compare_single(reference_index, file)
    }
}

impl<T: SimilarityOracle + ?Sized> SimilarityOracle for Box<T> {
    fn fingerprint(&self, file: &Path) -> Result<String, Error> {
        (**self).fingerprint(file)
    }

    fn compare_indexes(
        &self,
        reference_index: &Path,
        candidate_index: &Path,
    ) -> Result<String, Error> {
        (**self).compare_indexes(reference_index, candidate_index)
    }

    fn compare_single(&self, reference_index: &Path, file: &Path) -> Result<String, Error> {
        (**self).compare_single(reference_index, file)
    }
}

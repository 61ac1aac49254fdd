//! Near-duplicate detection for chunks.
//!
//! A [`Fingerprint`] pairs an exact hash of the normalized text with a MinHash
//! signature over word shingles. [`DedupIndex`] answers "is this a duplicate of
//! something already stored?" by exact lookup first, then by estimated Jaccard
//! similarity against candidates from LSH banding.

pub mod fingerprint;
pub mod index;

pub use fingerprint::{estimate_similarity, normalize, Fingerprinter};
pub use index::{DedupIndex, DuplicateMatch};

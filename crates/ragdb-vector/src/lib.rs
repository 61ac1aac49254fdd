//! Vector Index: exact and IVF-partitioned similarity search over chunk embeddings.

pub mod index;
pub mod ivf;
pub mod metric;

pub use index::{PartitionPlan, VectorIndex, VectorSnapshot};
pub use ivf::{compute_ivf_params, IvfParams, MIN_TRAIN_SIZE};

//! Bundled task kinds and the distributed operands they carry.

pub mod dvec;
pub mod square;

pub use dvec::DistributedVector;
pub use square::{SquareInput, SquareOutput, SquareTask};

//! Grade matrix engine: the structure/row model, the per-cell edit protocol,
//! retake locking, progress, the filter/sort pipeline and column statistics.

pub mod cell;
pub mod column;
pub mod column_order;
pub mod error;
pub mod grid;
pub mod locking;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod stats;

pub use error::MatrixError;
pub use grid::{GradeMatrix, MatrixQuery};

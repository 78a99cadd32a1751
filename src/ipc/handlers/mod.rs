pub mod backup;
pub mod cells;
pub mod columns;
pub mod core;
pub mod matrix;
pub mod setup;
pub mod stats;
pub mod structure;
pub mod students;

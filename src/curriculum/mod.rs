pub mod analyzer;
pub mod difficulty;
pub mod graph;
pub mod needs;
pub mod reshuffler;
pub mod types;

pub use analyzer::DependencyAnalyzer;
pub use difficulty::DifficultyAdjuster;
pub use graph::{IntegrityViolation, PathGraph};
pub use reshuffler::ConceptReshuffler;
#[allow(unused_imports)]
pub use types::*;

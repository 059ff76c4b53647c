pub mod adaptation;
pub mod curriculum_state;

pub use adaptation::{AdaptError, AdaptationOutcome, CurriculumAdapter};
pub use curriculum_state::CurriculumStateManager;

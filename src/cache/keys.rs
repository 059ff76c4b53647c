use std::time::Duration;

pub const CURRICULUM_STATE_TTL: Duration = Duration::from_secs(60 * 60);

pub fn curriculum_state_key(student_id: &str, learning_path_id: &str) -> String {
    format!("curriculum:{}:{}", student_id, learning_path_id)
}

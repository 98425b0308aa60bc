mod session_repository;
mod stage_output_repository;

pub use session_repository::SessionRepository;
pub use stage_output_repository::StageOutputRepository;

//! Zero-sized repositories, one per table. Each takes a `&PgPool` (or an
//! executor) and returns `sqlx::Error` on failure.

mod blob_repo;
mod map_frame_repo;
mod task_repo;
mod uuid_map_repo;

pub use blob_repo::BlobRepo;
pub use map_frame_repo::MapFrameRepo;
pub use task_repo::TaskRepo;
pub use uuid_map_repo::UuidMapRepo;

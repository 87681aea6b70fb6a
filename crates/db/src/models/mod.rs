pub mod blob;
pub mod map_frame;
pub mod status;
pub mod task;
pub mod uuid_map;

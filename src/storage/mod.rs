pub mod layout;
pub mod mmap_file;
pub mod shard_db;

pub mod image;
pub mod partition;
pub mod state;
pub mod temp;
pub mod volume;

pub use image::{DiskConverter, QemuImgConverter, detect_format};
pub use partition::{Mbr, MbrPartition, extract_first_partition, read_mbr, wrap_in_partition_table};
pub use state::JsonStore;
pub use temp::{TempArtifact, move_file};
pub use volume::{remove_volume_file, write_volume_file};

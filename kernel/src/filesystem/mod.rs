pub mod ata;
pub mod disk;
pub mod fat16;
pub mod path;
pub mod streamer;
pub mod vfs;

//! Building optical-disc file system images.
//!
//! This crate lays out directory trees, volume metadata and file data into a
//! single sequential stream of 2048-byte sectors conforming to ISO9660
//! (ECMA-119), the Joliet supplementary-descriptor extension, UDF 1.02
//! (ECMA-167) and the El Torito boot specification, with optional padding for
//! DVD-Video compatible layouts.
//!
//! The entry point is [`FileSystem`] (the image configuration plus the set of
//! files to include) and [`FileSystemWriter`], which produces the image in two
//! passes: a sizing/allocation pass that fixes the sector position of every
//! structure and every file extent, and an emission pass that writes the
//! descriptors, tables and file data in strictly increasing sector order. The
//! output sink is never seeked.

pub mod dvdvideo;
pub mod eltorito;
pub mod encoding;
mod error;
pub mod fileset;
pub mod iso9660;
pub mod iso_reader;
mod iso_writer;
pub mod joliet;
pub mod preview;
mod progress;
pub mod sector;
pub mod tree;
pub mod udf;
mod udf_writer;
mod writer;


pub use crate::error::{ErrorKind, ImageError};
pub use crate::fileset::{FileDescriptor, FileFlags, FileSet, ImportedSessionData};
pub use crate::iso_reader::Iso9660Reader;
pub use crate::preview::NamePreview;
pub use crate::progress::{NullProgress, Progress, Status};
pub use crate::writer::{FileSystem, FileSystemType, FileSystemWriter};


/// The number of bytes in one logical sector.
///
/// ISO9660 § 6.1.2 allows any power of two of at least 2048 bytes; in practice
/// every CD-ROM and DVD file system uses 2048 and this crate hardcodes it.
pub const SECTOR_SIZE: u64 = 2048;

/// Returns the number of sectors needed to store the given number of bytes.
pub(crate) fn bytes_to_sectors(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE)
}

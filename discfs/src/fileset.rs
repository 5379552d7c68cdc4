//! The sorted set of files going into an image.
//!
//! The ISO9660 path-table and directory-record builders assume that ancestors
//! are seen before descendants and that siblings appear contiguously. Keeping
//! the input in a map ordered by byte-wise comparison of the internal path
//! provides exactly that order (it is the ECMA-119 sort for the character
//! sets this library produces) and rejects duplicate paths on insertion.


use std::collections::btree_map;
use std::collections::BTreeMap;
use std::path::PathBuf;

use bitflags::bitflags;

use crate::error::ImageError;


bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct FileFlags : u8 {
        const DIRECTORY = 0x01;
        const IMPORTED = 0x02;
    }
}

/// Directory-record values of a file imported from a previous session.
///
/// The bytes are carried into the new image verbatim; in particular the
/// 7-byte record timestamp is never reinterpreted. No file data is emitted
/// for imported entries since their extents live in the earlier session.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ImportedSessionData {
    pub file_flags: u8,
    pub file_unit_size: u8,
    pub interleave_gap_size: u8,
    pub volseq_num: u16,
    pub extent_loc: u32,
    pub extent_len: u32,
    pub rec_timestamp: [u8; 7],
}

/// Describes one file or directory that should be included in the image.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FileDescriptor {
    /// Path within the disc image, forward-slash separated (`/dir/name`).
    pub internal_path: String,
    /// Path of the source file on the host.
    pub external_path: PathBuf,
    /// Size of the source file in bytes; zero for directories.
    pub size: u64,
    pub flags: FileFlags,
    /// Present when `flags` contains [`FileFlags::IMPORTED`].
    pub import: Option<ImportedSessionData>,
}

/// The set of all files of an image, ordered by internal path.
#[derive(Clone, Debug, Default)]
pub struct FileSet {
    files: BTreeMap<String, FileDescriptor>,
}
impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a descriptor, keyed on its internal path.
    ///
    /// Returns an error if an entry with the same internal path exists.
    pub fn insert(&mut self, descriptor: FileDescriptor) -> Result<(), ImageError> {
        match self.files.entry(descriptor.internal_path.clone()) {
            btree_map::Entry::Occupied(_) => Err(ImageError::DuplicatePath {
                internal_path: descriptor.internal_path,
            }),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(descriptor);
                Ok(())
            },
        }
    }

    /// Adds a directory entry.
    pub fn add_directory(&mut self, internal_path: &str, external_path: PathBuf) -> Result<(), ImageError> {
        self.insert(FileDescriptor {
            internal_path: internal_path.to_owned(),
            external_path,
            size: 0,
            flags: FileFlags::DIRECTORY,
            import: None,
        })
    }

    /// Adds a regular file entry.
    pub fn add_file(&mut self, internal_path: &str, external_path: PathBuf, size: u64) -> Result<(), ImageError> {
        self.insert(FileDescriptor {
            internal_path: internal_path.to_owned(),
            external_path,
            size,
            flags: FileFlags::empty(),
            import: None,
        })
    }

    /// Iterates the descriptors in byte-wise internal-path order.
    pub fn iter(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_wise_order() {
        let mut files = FileSet::new();
        files.add_file("/b.txt", PathBuf::from("b"), 1).unwrap();
        files.add_directory("/A", PathBuf::from("A")).unwrap();
        files.add_file("/A/x.txt", PathBuf::from("x"), 2).unwrap();

        let paths: Vec<&str> = files.iter().map(|f| f.internal_path.as_str()).collect();
        assert_eq!(paths, ["/A", "/A/x.txt", "/b.txt"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut files = FileSet::new();
        files.add_file("/same", PathBuf::from("one"), 1).unwrap();
        let error = files.add_file("/same", PathBuf::from("two"), 2).unwrap_err();
        assert!(matches!(error, ImageError::DuplicatePath { .. }));
    }
}

//! Reading the directory tree out of an existing ISO9660 image.
//!
//! Multi-session discs append a new session whose file system also lists the
//! files of the earlier sessions. This reader walks an existing image's
//! directory records (preferring the Joliet namespace when present) and
//! turns them into imported file-set entries: the extent locations and the
//! verbatim record bytes are carried into the new image, and no file data is
//! written for them.


use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, error};

use crate::encoding::{read_u16_both, read_u32_both};
use crate::error::ImageError;
use crate::fileset::{FileDescriptor, FileFlags, FileSet, ImportedSessionData};
use crate::iso9660::{DescriptorType, DirRecordFlags, ISO_IDENT_CD};
use crate::SECTOR_SIZE;


/// Index of a node within an [`Iso9660Reader`] arena.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct IsoNodeId(usize);

/// One directory record read from an existing image.
///
/// Carries everything needed to write the record into a new session
/// unchanged.
#[derive(Clone, Debug)]
pub struct IsoTreeNode {
    parent: Option<IsoNodeId>,
    pub children: Vec<IsoNodeId>,

    /// The record name with any version suffix removed.
    pub name: String,
    pub file_flags: u8,
    pub file_unit_size: u8,
    pub interleave_gap_size: u8,
    pub volseq_num: u16,
    pub extent_loc: u32,
    pub extent_len: u32,
    /// The 7-byte record timestamp, never reinterpreted.
    pub rec_timestamp: [u8; 7],
}
impl IsoTreeNode {
    pub fn parent(&self) -> Option<IsoNodeId> {
        self.parent
    }

    pub fn is_directory(&self) -> bool {
        self.file_flags & DirRecordFlags::DIRECTORY.bits() != 0
    }
}

/// The directory tree of an existing ISO9660 image.
#[derive(Debug)]
pub struct Iso9660Reader {
    nodes: Vec<IsoTreeNode>,
}
impl Iso9660Reader {
    fn invalid(detail: &str) -> ImageError {
        error!("{}", detail);
        ImageError::InvalidSourceImage {
            detail: detail.to_owned(),
        }
    }

    fn read_sector<R: Read + Seek>(source: &mut R, sector: u64) -> Result<[u8; SECTOR_SIZE as usize], ImageError> {
        let mut buffer = [0u8; SECTOR_SIZE as usize];
        source
            .seek(SeekFrom::Start(sector * SECTOR_SIZE))
            .and_then(|_| source.read_exact(&mut buffer))
            .map_err(|_| Self::invalid("unable to read a volume descriptor sector"))?;
        Ok(buffer)
    }

    /// Decodes a record identifier, stripping the version suffix.
    fn decode_identifier(bytes: &[u8], joliet: bool) -> String {
        let mut name = if joliet {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| (u16::from(pair[0]) << 8) | u16::from(pair[1]))
                .collect();
            String::from_utf16_lossy(&units)
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        };

        if let Some(pos) = name.len().checked_sub(2) {
            if name.as_bytes()[pos] == b';' {
                name.truncate(pos);
            }
        }
        name
    }

    /// Parses one directory extent and appends the child nodes; returns the
    /// ids of the subdirectories found.
    fn read_dir_extent<R: Read + Seek>(
        &mut self,
        source: &mut R,
        parent_id: IsoNodeId,
        joliet: bool,
    ) -> Result<Vec<IsoNodeId>, ImageError> {
        let parent = &self.nodes[parent_id.0];
        let extent_loc = u64::from(parent.extent_loc);
        let extent_len = parent.extent_len as usize;

        let mut extent = vec![0u8; extent_len];
        source
            .seek(SeekFrom::Start(extent_loc * SECTOR_SIZE))
            .and_then(|_| source.read_exact(&mut extent))
            .map_err(|_| Self::invalid("unable to read a directory extent"))?;

        let mut subdirectories = Vec::new();
        let mut offset = 0usize;
        let mut skipped_sys_records = 0;

        while offset + 33 <= extent_len {
            let rec_len = usize::from(extent[offset]);
            if rec_len == 0 {
                // Records never span sectors; a zero length byte means the
                // rest of the sector is padding.
                offset = (offset / SECTOR_SIZE as usize + 1) * SECTOR_SIZE as usize;
                continue;
            }
            if offset + rec_len > extent_len {
                return Err(Self::invalid("directory record exceeds its extent"));
            }

            // The first two records are '.' and '..'.
            if skipped_sys_records < 2 {
                skipped_sys_records += 1;
                offset += rec_len;
                continue;
            }

            let record = &extent[offset..offset + rec_len];
            let ident_len = usize::from(record[32]);
            if 33 + ident_len > rec_len {
                return Err(Self::invalid("directory record file identifier is too large"));
            }

            let mut rec_timestamp = [0u8; 7];
            rec_timestamp.copy_from_slice(&record[18..25]);

            let node = IsoTreeNode {
                parent: Some(parent_id),
                children: Vec::new(),
                name: Self::decode_identifier(&record[33..33 + ident_len], joliet),
                file_flags: record[25],
                file_unit_size: record[26],
                interleave_gap_size: record[27],
                volseq_num: read_u16_both(&record[28..32]),
                extent_loc: read_u32_both(&record[2..10]),
                extent_len: read_u32_both(&record[10..18]),
                rec_timestamp,
            };

            let id = IsoNodeId(self.nodes.len());
            if node.is_directory() {
                subdirectories.push(id);
            }
            self.nodes.push(node);
            self.nodes[parent_id.0].children.push(id);

            offset += rec_len;
        }

        Ok(subdirectories)
    }

    /// Reads the directory tree of the session starting at `start_sector`.
    ///
    /// The primary volume descriptor is expected at sector
    /// `16 + start_sector`; when a Joliet supplementary descriptor exists
    /// its namespace is read instead of the ISO9660 one.
    pub fn read<R: Read + Seek>(source: &mut R, start_sector: u32) -> Result<Self, ImageError> {
        let primary = Self::read_sector(source, 16 + u64::from(start_sector))?;
        if primary[0] != DescriptorType::Primary.to_base_type() {
            return Err(Self::invalid("no primary volume descriptor at sector 16"));
        }
        if &primary[1..6] != ISO_IDENT_CD {
            return Err(Self::invalid("bad primary volume descriptor identifier"));
        }
        if primary[6] != 1 || primary[881] != 1 {
            return Err(Self::invalid("bad primary volume descriptor version"));
        }

        // Search the following descriptors for a Joliet supplementary one;
        // give up at the set terminator (or after 99 sectors on a
        // malformed image).
        let mut joliet_root: Option<[u8; 34]> = None;
        for descriptor_index in 1..100u64 {
            let descriptor = Self::read_sector(source, 16 + u64::from(start_sector) + descriptor_index)?;
            if descriptor[0] == DescriptorType::SetTerminator.to_base_type() {
                break;
            }
            if descriptor[0] != DescriptorType::Supplementary.to_base_type() {
                continue;
            }
            // UCS-2 level 1, 2 or 3 escape sequences mark Joliet.
            if descriptor[88] == 0x25
                && descriptor[89] == 0x2F
                && matches!(descriptor[90], 0x40 | 0x43 | 0x45)
            {
                debug!("found a Joliet file system extension");
                joliet_root = Some(descriptor[156..190].try_into().unwrap());
                break;
            }
        }

        let joliet = joliet_root.is_some();
        let root_record: [u8; 34] = match joliet_root {
            Some(record) => record,
            None => primary[156..190].try_into().unwrap(),
        };

        let mut rec_timestamp = [0u8; 7];
        rec_timestamp.copy_from_slice(&root_record[18..25]);
        let root = IsoTreeNode {
            parent: None,
            children: Vec::new(),
            name: String::new(),
            file_flags: root_record[25],
            file_unit_size: root_record[26],
            interleave_gap_size: root_record[27],
            volseq_num: read_u16_both(&root_record[28..32]),
            extent_loc: read_u32_both(&root_record[2..10]),
            extent_len: read_u32_both(&root_record[10..18]),
            rec_timestamp,
        };
        debug!(
            "root directory extent at sector {}, {} bytes",
            root.extent_loc, root.extent_len,
        );

        let mut reader = Self { nodes: vec![root] };
        let mut dir_stack = reader.read_dir_extent(source, IsoNodeId(0), joliet)?;
        while let Some(dir_id) = dir_stack.pop() {
            dir_stack.extend(reader.read_dir_extent(source, dir_id, joliet)?);
        }
        Ok(reader)
    }

    pub fn root(&self) -> IsoNodeId {
        IsoNodeId(0)
    }

    pub fn node(&self, id: IsoNodeId) -> &IsoTreeNode {
        &self.nodes[id.0]
    }

    /// All node ids in creation order; parents precede their children.
    pub fn node_ids(&self) -> impl DoubleEndedIterator<Item = IsoNodeId> + use<> {
        (0..self.nodes.len()).map(IsoNodeId)
    }

    fn node_path(&self, id: IsoNodeId) -> String {
        let mut components = Vec::new();
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            components.push(self.nodes[current.0].name.clone());
            current = parent;
        }
        components.reverse();
        format!("/{}", components.join("/"))
    }

    /// Turns the read tree into file-set entries for the next session.
    ///
    /// Directories become plain entries (their extents are regenerated when
    /// the merged tree is written); files are flagged imported and carry
    /// their record bytes verbatim, so no data is copied for them.
    pub fn import_file_set(&self, files: &mut FileSet) -> Result<(), ImageError> {
        for id in self.node_ids() {
            if id == self.root() {
                continue;
            }
            let node = self.node(id);
            let internal_path = self.node_path(id);

            let descriptor = if node.is_directory() {
                FileDescriptor {
                    internal_path,
                    external_path: Default::default(),
                    size: 0,
                    flags: FileFlags::DIRECTORY,
                    import: None,
                }
            } else {
                FileDescriptor {
                    internal_path,
                    external_path: Default::default(),
                    size: u64::from(node.extent_len),
                    flags: FileFlags::IMPORTED,
                    import: Some(ImportedSessionData {
                        file_flags: node.file_flags,
                        file_unit_size: node.file_unit_size,
                        interleave_gap_size: node.interleave_gap_size,
                        volseq_num: node.volseq_num,
                        extent_loc: node.extent_loc,
                        extent_len: node.extent_len,
                        rec_timestamp: node.rec_timestamp,
                    }),
                }
            };
            files.insert(descriptor)?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;

    use crate::progress::NullProgress;
    use crate::writer::{FileSystem, FileSystemType, FileSystemWriter};

    fn build_image(fs_type: FileSystemType) -> (tempfile::TempDir, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/readme.txt"), b"twelve bytes").unwrap();
        std::fs::write(dir.path().join("data.bin"), vec![7u8; 5000]).unwrap();

        let mut files = FileSet::new();
        files.add_directory("/docs", dir.path().join("docs")).unwrap();
        files
            .add_file("/docs/readme.txt", dir.path().join("docs/readme.txt"), 12)
            .unwrap();
        files.add_file("/data.bin", dir.path().join("data.bin"), 5000).unwrap();

        let file_sys = FileSystem::new(fs_type, files);
        let mut writer = FileSystemWriter::new(&file_sys);
        writer.set_use_file_times(false);
        let mut image = Vec::new();
        writer.write(&mut image, &mut NullProgress, 0).unwrap();
        (dir, image)
    }

    #[test]
    fn test_roundtrip_iso_names() {
        let (_dir, image) = build_image(FileSystemType::Iso9660);
        let reader = Iso9660Reader::read(&mut Cursor::new(&image), 0).unwrap();

        let paths: Vec<String> = reader
            .node_ids()
            .skip(1)
            .map(|id| reader.node_path(id))
            .collect();
        assert_eq!(paths, ["/DATA.BIN", "/DOCS", "/DOCS/README.TXT"]);

        // The file extents point at the written data.
        let data_bin = reader
            .node_ids()
            .find(|&id| reader.node(id).name == "DATA.BIN")
            .unwrap();
        let node = reader.node(data_bin);
        assert_eq!(node.extent_len, 5000);
        let start = node.extent_loc as usize * SECTOR_SIZE as usize;
        assert_eq!(&image[start..start + 4], &[7, 7, 7, 7]);
    }

    #[test]
    fn test_roundtrip_joliet_names() {
        let (_dir, image) = build_image(FileSystemType::Iso9660Joliet);
        let reader = Iso9660Reader::read(&mut Cursor::new(&image), 0).unwrap();

        let mut names: Vec<&str> = reader
            .node_ids()
            .skip(1)
            .map(|id| reader.node(id).name.as_str())
            .collect();
        names.sort_unstable();
        assert_eq!(names, ["data.bin", "docs", "readme.txt"]);
    }

    #[test]
    fn test_import_into_next_session() {
        let (_dir, image) = build_image(FileSystemType::Iso9660);
        let reader = Iso9660Reader::read(&mut Cursor::new(&image), 0).unwrap();

        let mut files = FileSet::new();
        reader.import_file_set(&mut files).unwrap();

        let imported = files
            .iter()
            .find(|d| d.internal_path == "/DATA.BIN")
            .unwrap();
        assert!(imported.flags.contains(FileFlags::IMPORTED));
        let import = imported.import.unwrap();
        assert_eq!(import.extent_len, 5000);

        // The next session keeps the imported extent location verbatim and
        // writes no data for it.
        let file_sys = FileSystem::new(FileSystemType::Iso9660, files);
        let mut writer = FileSystemWriter::new(&file_sys);
        writer.set_use_file_times(false);
        let mut next_session = Vec::new();
        writer.write(&mut next_session, &mut NullProgress, 0).unwrap();

        let next_reader = Iso9660Reader::read(&mut Cursor::new(&next_session), 0).unwrap();
        let data_bin = next_reader
            .node_ids()
            .find(|&id| next_reader.node(id).name == "DATA.BIN")
            .unwrap();
        assert_eq!(next_reader.node(data_bin).extent_loc, import.extent_loc);
        assert!(!next_session.windows(4).any(|w| w == [7, 7, 7, 7]));
    }

    #[test]
    fn test_rejects_non_iso_data() {
        let garbage = vec![0x5Au8; 40 * SECTOR_SIZE as usize];
        let error = Iso9660Reader::read(&mut Cursor::new(&garbage), 0).unwrap_err();
        assert!(matches!(error, ImageError::InvalidSourceImage { .. }));
    }

    #[test]
    fn test_import_preserves_timestamp_bytes() {
        let (_dir, image) = build_image(FileSystemType::Iso9660);
        let reader = Iso9660Reader::read(&mut Cursor::new(&image), 0).unwrap();
        let readme = reader
            .node_ids()
            .find(|&id| reader.node(id).name == "README.TXT")
            .unwrap();
        // The month byte of a freshly written record is 1 to 12.
        let timestamp = reader.node(readme).rec_timestamp;
        assert!((1..=12).contains(&timestamp[1]));

        let mut files = FileSet::new();
        reader.import_file_set(&mut files).unwrap();
        let imported = files
            .iter()
            .find(|d| d.internal_path == "/DOCS/README.TXT")
            .unwrap();
        assert_eq!(imported.import.unwrap().rec_timestamp, timestamp);

        let unused = PathBuf::new();
        assert_eq!(imported.external_path, unused);
    }
}

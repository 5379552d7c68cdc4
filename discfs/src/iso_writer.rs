//! The ISO9660 / Joliet structure writer.
//!
//! Both namespaces share every table algorithm and differ only in the name
//! transform, the string encoding and the descriptor fields, so a single
//! writer implements them with a `joliet` flag threaded through the passes.
//!
//! The sizing pass (`alloc_*`) fixes the sector position and extent size of
//! every directory, freezes the per-namespace file names (including the
//! sibling-uniqueness rewrite), and reserves the descriptor, path-table and
//! directory-record regions. The emission pass then writes bytes using only
//! frozen state.


use std::collections::BTreeMap;
use std::io::Write;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::bytes_to_sectors;
use crate::eltorito::ElTorito;
use crate::encoding::{record_datetime, write_u16, write_u16_both, write_u32, write_u32_both};
use crate::error::ImageError;
use crate::fileset::FileSet;
use crate::iso9660::{
    DirRecordFlags, Iso9660, DIR_RECORD_FIXED_LEN, MAX_EXTENT_SIZE, PATHTABLE_RECORD_FIXED_LEN,
    SYS_DIR_RECORD_LEN,
};
use crate::joliet::{units_to_bytes, Joliet};
use crate::progress::{Progress, Status};
use crate::sector::{Region, SectorAllocator, SectorOutput};
use crate::tree::{FileTree, NodeId};
use crate::{FileFlags, SECTOR_SIZE};


/// The number of path components of an internal path; the root is depth 0.
fn path_depth(internal_path: &str) -> u32 {
    internal_path.split('/').filter(|c| !c.is_empty()).count() as u32
}

/// The number of directory records an extent chain needs.
fn extent_record_count(file_size: u64) -> u64 {
    if file_size == 0 {
        1
    } else {
        1 + (file_size - 1) / MAX_EXTENT_SIZE
    }
}

/// Sector-packing state shared by the sizing and the emission pass.
///
/// A record never crosses a sector boundary: one that would is pushed to the
/// next sector and the tail of the previous one is zero padded. Both passes
/// run this same arithmetic so the sized and the written sector counts agree.
struct RecordPacker {
    /// Bytes used in the current sector.
    sec_data: u64,
    sectors: u64,
    /// Whether the last push had to skip to a fresh sector.
    skipped: bool,
}
impl RecordPacker {
    /// Every directory starts with its '.' and '..' records.
    fn new_directory() -> Self {
        Self {
            sec_data: 2 * SYS_DIR_RECORD_LEN as u64,
            sectors: 0,
            skipped: false,
        }
    }

    fn push(&mut self, record_len: u64) {
        if self.sec_data + record_len > SECTOR_SIZE {
            self.sectors += 1;
            self.sec_data = record_len;
            self.skipped = true;
        } else {
            self.sec_data += record_len;
            self.skipped = false;
        }
    }

    fn finish(&self) -> u64 {
        if self.sec_data != 0 {
            self.sectors + 1
        } else {
            self.sectors
        }
    }
}


pub(crate) struct Iso9660Writer<'fs> {
    iso9660: &'fs Iso9660,
    joliet: &'fs Joliet,
    eltorito: &'fs ElTorito,
    use_joliet: bool,
    use_file_times: bool,
    create_time: DateTime<Local>,
    pathtable_size_normal: u64,
    pathtable_size_joliet: u64,
    /// Whether the too-deep warning has been printed already.
    warned_deep: bool,
}
impl<'fs> Iso9660Writer<'fs> {
    pub fn new(
        iso9660: &'fs Iso9660,
        joliet: &'fs Joliet,
        eltorito: &'fs ElTorito,
        use_joliet: bool,
        use_file_times: bool,
        create_time: DateTime<Local>,
    ) -> Self {
        Self {
            iso9660,
            joliet,
            eltorito,
            use_joliet,
            use_file_times,
            create_time,
            pathtable_size_normal: 0,
            pathtable_size_joliet: 0,
            warned_deep: false,
        }
    }

    /// The directory-record timestamp of a node.
    fn node_timestamp(&self, tree: &FileTree, node: NodeId) -> [u8; 7] {
        if self.use_file_times {
            if let Ok(modified) = std::fs::metadata(&tree.node(node).external_path).and_then(|m| m.modified()) {
                return record_datetime(&DateTime::<Local>::from(modified));
            }
        }
        record_datetime(&self.create_time)
    }

    /// Rewrites the tail of the stem with an ASCII counter until the name
    /// differs from every already frozen sibling.
    ///
    /// `stem_end` is the index one past the stem (before the extension and
    /// version suffix). Returns false after 255 failed attempts, in which
    /// case duplicates will exist.
    fn disambiguate<T: Copy + PartialEq + From<u8>>(
        name: &mut [T],
        stem_end: usize,
        frozen_siblings: &[Vec<T>],
    ) -> bool {
        let mut next_number = 1u16;
        let mut index = 0;
        while index < frozen_siblings.len() {
            let sibling = &frozen_siblings[index];
            if sibling.len() >= stem_end && sibling[..stem_end] == name[..stem_end] {
                let digits = next_number.to_string();
                for (offset, digit) in digits.bytes().enumerate() {
                    name[stem_end - digits.len() + offset] = T::from(digit);
                }
                if next_number == 255 {
                    return false;
                }
                next_number += 1;
                index = 0;
                continue;
            }
            index += 1;
        }
        true
    }

    /// Freezes the ISO9660 name of a node, making it unique among the
    /// already frozen names of its siblings.
    fn make_unique_iso9660<P: Progress>(
        &self,
        tree: &mut FileTree,
        node: NodeId,
        name: &mut Vec<u8>,
        progress: &mut P,
    ) {
        let Some(parent) = tree.node(node).parent() else {
            return;
        };
        if !tree.node(node).iso9660_name.is_empty() {
            *name = tree.node(node).iso9660_name.clone();
            return;
        }

        // Only the stem, before the extension and version suffix, is
        // rewritten.
        let stem_end = match name.iter().rposition(|&b| b == b'.') {
            Some(delim) => delim,
            None => {
                if !tree.node(node).is_directory() && self.iso9660.includes_file_ver_info() {
                    name.len().saturating_sub(2)
                } else {
                    name.len()
                }
            },
        };

        // Stems of up to three bytes leave no room for the counter.
        if stem_end > 3 {
            let siblings: Vec<Vec<u8>> = tree
                .node(parent)
                .children
                .iter()
                .map(|&sibling| tree.node(sibling).iso9660_name.clone())
                .filter(|frozen| !frozen.is_empty())
                .collect();
            if !Self::disambiguate(name, stem_end, &siblings) {
                let message = format!(
                    "unable to calculate a unique ISO9660 name for {:?}; duplicate names will exist",
                    tree.node(node).external_path,
                );
                warn!("{}", message);
                progress.warning(&message);
            }
        }

        tree.node_mut(node).iso9660_name = name.clone();
    }

    /// Freezes the Joliet name of a node, analogous to
    /// [`make_unique_iso9660`].
    fn make_unique_joliet<P: Progress>(
        &self,
        tree: &mut FileTree,
        node: NodeId,
        name: &mut Vec<u16>,
        progress: &mut P,
    ) {
        let Some(parent) = tree.node(node).parent() else {
            return;
        };
        if !tree.node(node).joliet_name.is_empty() {
            *name = tree.node(node).joliet_name.clone();
            return;
        }

        let stem_end = match name.iter().rposition(|&u| u == u16::from(b'.')) {
            Some(delim) => delim,
            None => {
                if !tree.node(node).is_directory() && self.joliet.includes_file_ver_info() {
                    name.len().saturating_sub(2)
                } else {
                    name.len()
                }
            },
        };

        if stem_end > 3 {
            let siblings: Vec<Vec<u16>> = tree
                .node(parent)
                .children
                .iter()
                .map(|&sibling| tree.node(sibling).joliet_name.clone())
                .filter(|frozen| !frozen.is_empty())
                .collect();
            if !Self::disambiguate(name, stem_end, &siblings) {
                let message = format!(
                    "unable to calculate a unique Joliet name for {:?}; duplicate names will exist",
                    tree.node(node).external_path,
                );
                warn!("{}", message);
                progress.warning(&message);
            }
        }

        tree.node_mut(node).joliet_name = name.clone();
    }

    /// Reserves the volume descriptor sectors and, when boot images exist,
    /// the El Torito catalog and data regions.
    pub fn alloc_header(&self, alloc: &mut SectorAllocator) {
        let mut descriptor_count = 2; // primary and set terminator
        if self.eltorito.image_count() > 0 {
            descriptor_count += 1;
        }
        if self.use_joliet {
            descriptor_count += 1;
        }
        if self.iso9660.has_vol_desc_suppl() {
            descriptor_count += 1;
        }
        alloc.alloc_sectors(Region::IsoDescriptors, descriptor_count);

        if self.eltorito.image_count() > 0 {
            alloc.alloc_bytes(Region::BootCatalog, self.eltorito.boot_cat_size());
            alloc.alloc_bytes(Region::BootData, self.eltorito.boot_data_size());
        }
    }

    /// Sums the path table size of one namespace: one record per directory
    /// within the depth cap, padded to even length, after the root record.
    fn calc_path_table_size<P: Progress>(
        &mut self,
        files: &FileSet,
        joliet_table: bool,
        progress: &mut P,
    ) -> u64 {
        // The root record is nine bytes and always padded by one.
        let mut pathtable_size = (PATHTABLE_RECORD_FIXED_LEN + 1 + 1) as u64;

        let max_level = u32::from(self.iso9660.max_dir_level());
        for descriptor in files.iter() {
            let level = path_depth(&descriptor.internal_path);
            if level > max_level {
                // Warn on the first namespace pass only; the second would
                // repeat every message.
                if !joliet_table {
                    if !self.warned_deep {
                        let message = format!(
                            "the directory structure is deeper than {} levels; deep files and directories will be ignored",
                            max_level,
                        );
                        warn!("{}", message);
                        progress.warning(&message);
                        self.warned_deep = true;
                    }
                    warn!("skipping {:?}", descriptor.internal_path);
                }
                continue;
            }
            if !descriptor.flags.contains(FileFlags::DIRECTORY) {
                continue;
            }

            let dir_name = descriptor.internal_path.rsplit('/').next().unwrap_or("");
            let name_len: u64 = if joliet_table {
                u64::from(self.joliet.calc_file_name_len(dir_name, true)) * 2
            } else {
                u64::from(self.iso9660.calc_file_name_len(dir_name, true))
            };
            let mut record_len = PATHTABLE_RECORD_FIXED_LEN as u64 + name_len;
            if record_len % 2 == 1 {
                record_len += 1;
            }
            pathtable_size += record_len;
        }

        pathtable_size
    }

    /// Sizes and reserves the four path table regions.
    pub fn alloc_path_tables<P: Progress>(
        &mut self,
        alloc: &mut SectorAllocator,
        files: &FileSet,
        progress: &mut P,
    ) -> Result<(), ImageError> {
        self.pathtable_size_normal = self.calc_path_table_size(files, false, progress);
        self.pathtable_size_joliet = if self.use_joliet {
            self.calc_path_table_size(files, true, progress)
        } else {
            0
        };

        if self.pathtable_size_normal > u64::from(u32::MAX)
            || self.pathtable_size_joliet > u64::from(u32::MAX)
        {
            return Err(ImageError::PathTableTooLarge {
                normal: self.pathtable_size_normal,
                joliet: self.pathtable_size_joliet,
            });
        }

        alloc.alloc_bytes(Region::PathTableNormalL, self.pathtable_size_normal);
        alloc.alloc_bytes(Region::PathTableNormalM, self.pathtable_size_normal);
        alloc.alloc_bytes(Region::PathTableJolietL, self.pathtable_size_joliet);
        alloc.alloc_bytes(Region::PathTableJolietM, self.pathtable_size_joliet);
        Ok(())
    }

    /// Whether a child is listed in the ISO9660 namespaces at all.
    fn child_is_listed(&self, tree: &FileTree, child: NodeId, level: u32) -> bool {
        let node = tree.node(child);
        if node.is_directory() {
            level < u32::from(self.iso9660.max_dir_level())
        } else {
            node.size <= MAX_EXTENT_SIZE || self.iso9660.allows_fragmentation()
        }
    }

    /// Sizes one directory's record extent in one namespace and freezes the
    /// names of its children.
    fn calc_local_dir_entry_len<P: Progress>(
        &self,
        tree: &mut FileTree,
        local_node: NodeId,
        joliet: bool,
        level: u32,
        progress: &mut P,
    ) -> u64 {
        let mut packer = RecordPacker::new_directory();

        let children = tree.node(local_node).children.clone();
        for child in children {
            if !self.child_is_listed(tree, child, level) {
                continue;
            }
            let node = tree.node(child);
            let is_dir = node.is_directory();
            let factor = extent_record_count(node.size);
            let requested = node.name.clone();

            let name_len = if joliet {
                let mut name = self.joliet.write_file_name(&requested, is_dir);
                self.make_unique_joliet(tree, child, &mut name, progress);
                name.len() as u64 * 2
            } else {
                let mut name = self.iso9660.write_file_name(&requested, is_dir);
                self.make_unique_iso9660(tree, child, &mut name, progress);
                name.len() as u64
            };

            let mut record_len = DIR_RECORD_FIXED_LEN as u64 + name_len;
            if record_len % 2 == 1 {
                record_len += 1;
            }
            for _ in 0..factor {
                packer.push(record_len);
            }
        }

        packer.finish()
    }

    /// Sizes and positions every directory extent, interleaving the ISO9660
    /// and Joliet copies per directory, and reserves the region.
    pub fn alloc_dir_entries<P: Progress>(
        &self,
        tree: &mut FileTree,
        alloc: &mut SectorAllocator,
        progress: &mut P,
    ) -> Result<(), ImageError> {
        let start_sec = alloc.next_free();
        let mut sec_offset = start_sec;

        let mut dir_node_stack = vec![(tree.root(), 0u32)];
        while let Some((local_node, level)) = dir_node_stack.pop() {
            let dir_len_normal = self.calc_local_dir_entry_len(tree, local_node, false, level, progress);
            let dir_len_joliet = if self.use_joliet {
                self.calc_local_dir_entry_len(tree, local_node, true, level, progress)
            } else {
                0
            };

            for &child in tree.node(local_node).children.iter().rev() {
                if tree.node(child).is_directory() && level < u32::from(self.iso9660.max_dir_level()) {
                    dir_node_stack.push((child, level + 1));
                }
            }

            let node = tree.node_mut(local_node);
            node.data_size_normal = dir_len_normal * SECTOR_SIZE;
            node.data_size_joliet = dir_len_joliet * SECTOR_SIZE;
            node.data_pos_normal = sec_offset;
            sec_offset += dir_len_normal;
            node.data_pos_joliet = sec_offset;
            sec_offset += dir_len_joliet;
        }

        let dir_entries_len = sec_offset - start_sec;
        alloc.alloc_sectors(Region::DirEntries, dir_entries_len);
        debug!("allocated {} sectors of directory entries", dir_entries_len);
        Ok(())
    }

    /// Writes one L- or M-type path table of one namespace.
    fn write_path_table<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        files: &FileSet,
        tree: &FileTree,
        joliet_table: bool,
        msbf: bool,
    ) -> Result<(), ImageError> {
        let root_pos = if joliet_table {
            tree.node(tree.root()).data_pos_joliet
        } else {
            tree.node(tree.root()).data_pos_normal
        };

        // The root record carries a single zero name byte and, since its
        // nine bytes are odd, one pad byte.
        let mut root_record = [0u8; PATHTABLE_RECORD_FIXED_LEN + 2];
        root_record[0] = 1;
        write_u32(&mut root_record[2..6], root_pos as u32, msbf);
        write_u16(&mut root_record[6..8], 1, msbf);
        out.write(&root_record).map_err(ImageError::SinkWrite)?;

        // Directory numbers are assigned in input-set order; the sorted set
        // guarantees a parent is numbered before its children.
        let mut dir_numbers: BTreeMap<&str, u16> = BTreeMap::new();
        dir_numbers.insert("", 1);
        let mut next_number = 2u16;

        let max_level = u32::from(self.iso9660.max_dir_level());
        for descriptor in files.iter() {
            if !descriptor.flags.contains(FileFlags::DIRECTORY) {
                continue;
            }
            if path_depth(&descriptor.internal_path) > max_level {
                continue;
            }
            let Some(node_id) = tree.node_from_path(&descriptor.internal_path) else {
                continue;
            };
            let node = tree.node(node_id);

            let parent_path = match descriptor.internal_path.rfind('/') {
                Some(0) | None => "",
                Some(pos) => &descriptor.internal_path[..pos],
            };
            let parent_number = dir_numbers.get(parent_path).copied().unwrap_or(1);
            dir_numbers.insert(&descriptor.internal_path, next_number);
            next_number = next_number.wrapping_add(1);

            let name_bytes = if joliet_table {
                units_to_bytes(&node.joliet_name)
            } else {
                node.iso9660_name.clone()
            };
            let extent_loc = if joliet_table {
                node.data_pos_joliet
            } else {
                node.data_pos_normal
            };

            let mut record = [0u8; PATHTABLE_RECORD_FIXED_LEN];
            record[0] = name_bytes.len() as u8;
            write_u32(&mut record[2..6], extent_loc as u32, msbf);
            write_u16(&mut record[6..8], parent_number, msbf);
            out.write(&record).map_err(ImageError::SinkWrite)?;
            out.write(&name_bytes).map_err(ImageError::SinkWrite)?;
            if name_bytes.len() % 2 == 1 {
                out.write(&[0u8]).map_err(ImageError::SinkWrite)?;
            }
        }

        if out.allocated() != 0 {
            out.pad_sector().map_err(ImageError::SinkWrite)?;
        }
        Ok(())
    }

    /// Writes the volume descriptors, the El Torito boot record, catalog
    /// and boot images.
    pub fn write_header<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        alloc: &SectorAllocator,
        tree: &FileTree,
    ) -> Result<(), ImageError> {
        let boot_images = self.eltorito.image_count() > 0;
        if boot_images {
            let boot_data_sec = alloc.start_of(Region::BootData);
            let boot_data_end = boot_data_sec + bytes_to_sectors(self.eltorito.boot_data_size());
            if boot_data_end > u64::from(u32::MAX) {
                return Err(ImageError::SectorRangeTooLarge {
                    start: boot_data_sec,
                    end: boot_data_end,
                });
            }
        }

        let dir_entries_sec = alloc.start_of(Region::DirEntries);
        let file_data_end_sec = alloc.data_start() + alloc.data_len();
        if dir_entries_sec > u64::from(u32::MAX) || file_data_end_sec > u64::from(u32::MAX) {
            return Err(ImageError::SectorRangeTooLarge {
                start: dir_entries_sec,
                end: file_data_end_sec,
            });
        }

        let root = tree.node(tree.root());
        if root.data_size_normal > u64::from(u32::MAX) || root.data_size_joliet > u64::from(u32::MAX) {
            return Err(ImageError::RootDirectoryTooLarge {
                bytes: root.data_size_normal.max(root.data_size_joliet),
            });
        }

        self.iso9660
            .write_vol_desc_primary(
                out,
                &self.create_time,
                file_data_end_sec as u32,
                self.pathtable_size_normal as u32,
                alloc.start_of(Region::PathTableNormalL) as u32,
                alloc.start_of(Region::PathTableNormalM) as u32,
                root.data_pos_normal as u32,
                root.data_size_normal as u32,
            )
            .map_err(ImageError::SinkWrite)?;

        if boot_images {
            let boot_cat_sec = alloc.start_of(Region::BootCatalog);
            self.eltorito
                .write_boot_record(out, boot_cat_sec as u32)
                .map_err(ImageError::SinkWrite)?;
            debug!("wrote El Torito boot record pointing at sector {}", boot_cat_sec);
        }

        if self.use_joliet {
            self.joliet
                .write_vol_desc(
                    out,
                    &self.create_time,
                    file_data_end_sec as u32,
                    self.pathtable_size_joliet as u32,
                    alloc.start_of(Region::PathTableJolietL) as u32,
                    alloc.start_of(Region::PathTableJolietM) as u32,
                    root.data_pos_joliet as u32,
                    root.data_size_joliet as u32,
                )
                .map_err(ImageError::SinkWrite)?;
        }

        if self.iso9660.has_vol_desc_suppl() {
            self.iso9660
                .write_vol_desc_suppl(
                    out,
                    &self.create_time,
                    file_data_end_sec as u32,
                    self.pathtable_size_normal as u32,
                    alloc.start_of(Region::PathTableNormalL) as u32,
                    alloc.start_of(Region::PathTableNormalM) as u32,
                    root.data_pos_normal as u32,
                    root.data_size_normal as u32,
                )
                .map_err(ImageError::SinkWrite)?;
        }

        self.iso9660
            .write_vol_desc_setterm(out)
            .map_err(ImageError::SinkWrite)?;

        if boot_images {
            self.eltorito.write_boot_catalog(out, alloc.start_of(Region::BootData))?;
            self.eltorito.write_boot_images(out)?;
        }

        Ok(())
    }

    /// Writes the four path tables in region order: normal L, normal M,
    /// then the Joliet pair.
    pub fn write_path_tables<W: Write, P: Progress>(
        &self,
        out: &mut SectorOutput<W>,
        files: &FileSet,
        tree: &FileTree,
        progress: &mut P,
    ) -> Result<(), ImageError> {
        progress.status(Status::WritingIsoTables);
        self.write_path_table(out, files, tree, false, false)?;
        self.write_path_table(out, files, tree, false, true)?;

        if self.use_joliet {
            progress.status(Status::WritingJolietTables);
            self.write_path_table(out, files, tree, true, false)?;
            self.write_path_table(out, files, tree, true, true)?;
        }
        Ok(())
    }

    /// Writes a '.' or '..' record.
    fn write_sys_dir<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        parent_record: bool,
        data_pos: u32,
        data_size: u32,
    ) -> Result<(), ImageError> {
        let mut record = [0u8; SYS_DIR_RECORD_LEN];
        record[0] = SYS_DIR_RECORD_LEN as u8;
        write_u32_both(&mut record[2..10], data_pos);
        write_u32_both(&mut record[10..18], data_size);
        record[18..25].copy_from_slice(&record_datetime(&self.create_time));
        record[25] = DirRecordFlags::DIRECTORY.bits();
        write_u16_both(&mut record[28..32], 1);
        record[32] = 1;
        record[33] = if parent_record { 1 } else { 0 };
        out.write(&record).map_err(ImageError::SinkWrite)
    }

    /// Writes one directory's record extent in one namespace.
    fn write_local_dir_entry<W: Write, P: Progress>(
        &self,
        out: &mut SectorOutput<W>,
        tree: &FileTree,
        local_node: NodeId,
        joliet: bool,
        level: u32,
        progress: &mut P,
    ) -> Result<(), ImageError> {
        let node = tree.node(local_node);
        let parent = tree.node(node.parent().unwrap_or(tree.root()));

        if joliet {
            self.write_sys_dir(out, false, node.data_pos_joliet as u32, node.data_size_joliet as u32)?;
            self.write_sys_dir(out, true, parent.data_pos_joliet as u32, parent.data_size_joliet as u32)?;
        } else {
            self.write_sys_dir(out, false, node.data_pos_normal as u32, node.data_size_normal as u32)?;
            self.write_sys_dir(out, true, parent.data_pos_normal as u32, parent.data_size_normal as u32)?;
        }

        let mut packer = RecordPacker::new_directory();

        for &child in &node.children {
            if progress.cancelled() {
                return Err(ImageError::Cancelled);
            }
            if !self.child_is_listed(tree, child, level) {
                continue;
            }
            let child_node = tree.node(child);
            let is_dir = child_node.is_directory();

            let name_bytes = if joliet {
                units_to_bytes(&child_node.joliet_name)
            } else {
                child_node.iso9660_name.clone()
            };

            let mut record_len = DIR_RECORD_FIXED_LEN + name_bytes.len();
            let pad_byte = record_len % 2 == 1;
            if pad_byte {
                record_len += 1;
            }

            // Multi-extent chains repeat the record once per extent.
            let mut file_remain = if joliet {
                child_node.data_size_joliet
            } else {
                child_node.data_size_normal
            };
            let mut extent_loc = if joliet {
                child_node.data_pos_joliet
            } else {
                child_node.data_pos_normal
            };

            loop {
                let extent_size = file_remain.min(MAX_EXTENT_SIZE);
                file_remain -= extent_size;

                let mut record = [0u8; DIR_RECORD_FIXED_LEN];
                record[0] = record_len as u8;
                write_u32_both(&mut record[2..10], extent_loc as u32);
                write_u32_both(&mut record[10..18], extent_size as u32);

                if let Some(import) = &child_node.import {
                    record[18..25].copy_from_slice(&import.rec_timestamp);
                    record[25] = import.file_flags;
                    record[26] = import.file_unit_size;
                    record[27] = import.interleave_gap_size;
                    write_u16_both(&mut record[28..32], import.volseq_num);
                } else {
                    record[18..25].copy_from_slice(&self.node_timestamp(tree, child));
                    let mut flags = DirRecordFlags::empty();
                    if is_dir {
                        flags |= DirRecordFlags::DIRECTORY;
                    }
                    if child_node.size > MAX_EXTENT_SIZE && file_remain > 0 {
                        flags |= DirRecordFlags::MULTI_EXTENT;
                    }
                    record[25] = flags.bits();
                    write_u16_both(&mut record[28..32], 1);
                }
                record[32] = name_bytes.len() as u8;

                packer.push(record_len as u64);
                if packer.skipped {
                    out.pad_sector().map_err(ImageError::SinkWrite)?;
                }

                out.write(&record).map_err(ImageError::SinkWrite)?;
                out.write(&name_bytes).map_err(ImageError::SinkWrite)?;
                if pad_byte {
                    out.write(&[0u8]).map_err(ImageError::SinkWrite)?;
                }

                extent_loc += bytes_to_sectors(extent_size);
                if file_remain == 0 {
                    break;
                }
            }
        }

        if out.allocated() != 0 {
            out.pad_sector().map_err(ImageError::SinkWrite)?;
        }
        Ok(())
    }

    /// Writes every directory extent, depth first in input order, the
    /// ISO9660 copy of each directory directly followed by its Joliet copy.
    pub fn write_dir_entries<W: Write, P: Progress>(
        &self,
        out: &mut SectorOutput<W>,
        tree: &FileTree,
        progress: &mut P,
    ) -> Result<(), ImageError> {
        progress.status(Status::WritingDirEntries);

        let mut dir_node_stack = vec![(tree.root(), 0u32)];
        while let Some((local_node, level)) = dir_node_stack.pop() {
            for &child in tree.node(local_node).children.iter().rev() {
                if tree.node(child).is_directory() && level < u32::from(self.iso9660.max_dir_level()) {
                    dir_node_stack.push((child, level + 1));
                }
            }

            self.write_local_dir_entry(out, tree, local_node, false, level, progress)?;
            if self.use_joliet {
                self.write_local_dir_entry(out, tree, local_node, true, level, progress)?;
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_record_count() {
        assert_eq!(extent_record_count(0), 1);
        assert_eq!(extent_record_count(100), 1);
        assert_eq!(extent_record_count(MAX_EXTENT_SIZE), 1);
        assert_eq!(extent_record_count(MAX_EXTENT_SIZE + 1), 2);
        assert_eq!(extent_record_count(3 * MAX_EXTENT_SIZE), 3);
    }

    #[test]
    fn test_record_packer_never_splits() {
        let mut packer = RecordPacker::new_directory();
        // 68 bytes used; 33 records of 60 bytes fill the first sector
        // exactly (68 + 33 * 60 = 2048).
        for _ in 0..33 {
            packer.push(60);
        }
        assert_eq!(packer.finish(), 1);

        // One more record spills into a second sector.
        packer.push(60);
        assert!(packer.skipped);
        assert_eq!(packer.finish(), 2);
    }

    #[test]
    fn test_disambiguate_counter() {
        // The new name shares its stem with a frozen sibling and gets a
        // counter in its last stem byte.
        let frozen = vec![b"NAMEAAAA.TXT;1".to_vec()];
        let mut name = b"NAMEAAAA.TXT;1".to_vec();
        assert!(Iso9660Writer::disambiguate(&mut name, 8, &frozen));
        assert_eq!(&name, b"NAMEAAA1.TXT;1");

        // A second collision on the rewritten name advances the counter.
        let frozen = vec![b"NAMEAAAA.TXT;1".to_vec(), b"NAMEAAA1.TXT;1".to_vec()];
        let mut name = b"NAMEAAAA.TXT;1".to_vec();
        assert!(Iso9660Writer::disambiguate(&mut name, 8, &frozen));
        assert_eq!(&name, b"NAMEAAA2.TXT;1");
    }

    #[test]
    fn test_path_depth() {
        assert_eq!(path_depth("/A"), 1);
        assert_eq!(path_depth("/A/B/c.txt"), 3);
    }
}

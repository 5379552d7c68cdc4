//! The UDF structure writer.
//!
//! Lays out the volume recognition sequence, the main and reserve volume
//! descriptor sequences with the integrity descriptor in front, the anchors
//! at their fixed positions and the partition contents (one file entry per
//! node plus the file identifier sequences of every directory) around the
//! shared file data region.


use std::collections::VecDeque;
use std::io::Write;

use chrono::{DateTime, Local};
use tracing::debug;

use crate::bytes_to_sectors;
use crate::error::ImageError;
use crate::sector::{Region, SectorAllocator, SectorOutput};
use crate::tree::{FileTree, NodeId};
use crate::udf::{Udf, UNIQUEIDENT_MIN};
use crate::SECTOR_SIZE;


/// Sectors of one volume descriptor sequence extent; six descriptors padded
/// to the 16-sector minimum the standard demands.
const VOLDESC_SEQUENCE_SECTORS: u32 = 16;

pub(crate) struct UdfWriter<'fs> {
    udf: &'fs Udf,
    use_file_times: bool,
    create_time: DateTime<Local>,
    /// The caller-supplied multi-session shift; every fixed absolute
    /// position moves by this much.
    session_offset: u32,
    part_len: u64,
    voldesc_seqextent_main: (u32, u32),
    voldesc_seqextent_rsrv: (u32, u32),
}
impl<'fs> UdfWriter<'fs> {
    pub fn new(udf: &'fs Udf, use_file_times: bool, create_time: DateTime<Local>, session_offset: u32) -> Self {
        Self {
            udf,
            use_file_times,
            create_time,
            session_offset,
            part_len: 0,
            voldesc_seqextent_main: (0, 0),
            voldesc_seqextent_rsrv: (0, 0),
        }
    }

    /// The first anchor's absolute sector.
    fn anchor_sector(&self) -> u64 {
        256 + u64::from(self.session_offset)
    }

    /// The absolute sector the partition starts at (the file set
    /// descriptor, partition-local block 0).
    fn partition_start(&self) -> u64 {
        257 + u64::from(self.session_offset)
    }

    /// The UDF timestamps of a node: the source modification time when file
    /// times are enabled, the image creation time otherwise.
    fn node_time(&self, tree: &FileTree, node: NodeId) -> DateTime<Local> {
        if self.use_file_times {
            if let Ok(modified) = std::fs::metadata(&tree.node(node).external_path).and_then(|m| m.modified()) {
                return DateTime::<Local>::from(modified);
            }
        }
        self.create_time
    }

    /// Total byte size of a directory's file identifiers, the '..' record
    /// included.
    fn calc_ident_size(&self, tree: &FileTree, local_node: NodeId) -> u64 {
        let mut total = self.udf.calc_file_ident_parent_size();
        for &child in &tree.node(local_node).children {
            total += self.udf.calc_file_ident_size(&tree.node(child).name);
        }
        total
    }

    /// Fills `udf_size`, `udf_size_total` and `udf_link_total` of every
    /// node.
    fn calc_node_lengths(&self, tree: &mut FileTree) {
        // Per-node sizes and direct directory-child counts.
        for id in tree.node_ids() {
            let node = tree.node(id);
            let udf_size = if node.is_directory() {
                bytes_to_sectors(self.udf.calc_file_entry_size())
                    + bytes_to_sectors(self.calc_ident_size(tree, id))
            } else {
                bytes_to_sectors(self.udf.calc_file_entry_size())
            };
            let dir_children = tree
                .node(id)
                .children
                .iter()
                .filter(|&&child| tree.node(child).is_directory())
                .count() as u64;

            let node = tree.node_mut(id);
            node.udf_size = udf_size;
            node.udf_size_total = udf_size;
            node.udf_link_total = dir_children;
        }

        // Subtree totals: children always carry a higher arena index than
        // their parent, so one reverse sweep accumulates bottom-up.
        for id in tree.node_ids().rev() {
            if let Some(parent) = tree.node(id).parent() {
                let subtree = tree.node(id).udf_size_total;
                tree.node_mut(parent).udf_size_total += subtree;
            }
        }
    }

    /// Reserves the volume recognition sequence.
    pub fn alloc_header(&self, alloc: &mut SectorAllocator) {
        alloc.alloc_bytes(Region::UdfInitialDescriptors, self.udf.vol_desc_initial_size());
    }

    /// Sizes the partition and reserves the descriptor region up to the
    /// first partition sector and the file set contents behind it.
    pub fn alloc_partition(&mut self, tree: &mut FileTree, alloc: &mut SectorAllocator) -> Result<(), ImageError> {
        // The descriptor region must hold the integrity descriptor and both
        // sequences before the fill to the anchor.
        let needed = 1 + 2 * u64::from(VOLDESC_SEQUENCE_SECTORS);
        if alloc.next_free() + needed > self.anchor_sector() {
            return Err(ImageError::StructuresOverlapAnchor {
                next_free: alloc.next_free(),
                anchor: self.anchor_sector(),
            });
        }

        // Everything up to the first file set content sector, which sits one
        // past the partition start.
        let main_descriptors = self.partition_start() + 1 - alloc.next_free();
        alloc.alloc_sectors(Region::UdfMainDescriptors, main_descriptors);

        self.calc_node_lengths(tree);
        self.part_len = tree.node(tree.root()).udf_size_total;
        alloc.alloc_sectors(Region::UdfFileSetContents, self.part_len);

        debug!("allocated {} sectors of UDF partition metadata", self.part_len);
        Ok(())
    }

    /// Writes the volume recognition sequence (BEA01, NSR02, TEA01).
    pub fn write_header<W: Write>(&self, out: &mut SectorOutput<W>) -> Result<(), ImageError> {
        self.udf.write_vol_desc_initial(out).map_err(ImageError::SinkWrite)
    }

    /// Writes one directory's file entry and identifier block and queues
    /// its children in layout order.
    fn write_local_partition_dir<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        tree: &mut FileTree,
        dir_node_queue: &mut VecDeque<NodeId>,
        local_node: NodeId,
        cur_part_sec: &mut u32,
        unique_ident: &mut u64,
    ) -> Result<(), ImageError> {
        let entry_sec = *cur_part_sec;
        *cur_part_sec += 1;
        // A directory's identifiers follow its entry immediately.
        let ident_sec = *cur_part_sec;

        let tot_ident_size = self.calc_ident_size(tree, local_node);
        let mut next_entry_sec = ident_sec + bytes_to_sectors(tot_ident_size) as u32;

        let node_time = self.node_time(tree, local_node);
        let link_count = (tree.node(local_node).udf_link_total + 1) as u16;
        self.udf
            .write_file_entry(
                out,
                entry_sec,
                true,
                link_count,
                *unique_ident,
                ident_sec,
                tot_ident_size,
                &node_time,
                &node_time,
                &node_time,
            )
            .map_err(ImageError::SinkWrite)?;

        // Identifiers 0 to 15 are reserved; 0 itself marks the root.
        *unique_ident = if *unique_ident == 0 {
            UNIQUEIDENT_MIN
        } else {
            *unique_ident + 1
        };

        let parent_entry_sec = match tree.node(local_node).parent() {
            Some(parent) => tree.node(parent).udf_part_loc,
            None => entry_sec,
        };
        self.udf
            .write_file_ident_parent(out, *cur_part_sec, parent_entry_sec)
            .map_err(ImageError::SinkWrite)?;

        let mut sec_bytes = self.udf.calc_file_ident_parent_size();

        let children = tree.node(local_node).children.clone();
        for &child in &children {
            let child_node = tree.node(child);
            let is_dir = child_node.is_directory();
            let name = child_node.name.clone();

            self.udf
                .write_file_ident(out, *cur_part_sec, next_entry_sec, is_dir, &name)
                .map_err(ImageError::SinkWrite)?;

            tree.node_mut(child).udf_part_loc = next_entry_sec;
            next_entry_sec += tree.node(child).udf_size_total as u32;

            sec_bytes += self.udf.calc_file_ident_size(&name);
            if sec_bytes >= SECTOR_SIZE {
                *cur_part_sec += 1;
                sec_bytes -= SECTOR_SIZE;
            }
        }

        // Children enter the queue front in order, producing a depth-first
        // pre-order walk.
        for &child in children.iter().rev() {
            dir_node_queue.push_front(child);
        }

        out.pad_sector().map_err(ImageError::SinkWrite)?;
        if sec_bytes > 0 {
            *cur_part_sec += 1;
        }
        Ok(())
    }

    /// Writes the file entries and identifier sequences of the whole tree.
    fn write_partition_entries<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        tree: &mut FileTree,
    ) -> Result<(), ImageError> {
        // Partition sector 0 is the file set descriptor; the root entry
        // follows at sector 1.
        let mut cur_part_sec = 1u32;
        let mut unique_ident = 0u64;

        let root = tree.root();
        tree.node_mut(root).udf_part_loc = cur_part_sec;

        let mut dir_node_queue = VecDeque::new();
        self.write_local_partition_dir(out, tree, &mut dir_node_queue, root, &mut cur_part_sec, &mut unique_ident)?;

        while let Some(cur_node) = dir_node_queue.pop_front() {
            debug_assert_eq!(tree.node(cur_node).udf_part_loc, cur_part_sec);

            if tree.node(cur_node).is_directory() {
                self.write_local_partition_dir(
                    out,
                    tree,
                    &mut dir_node_queue,
                    cur_node,
                    &mut cur_part_sec,
                    &mut unique_ident,
                )?;
            } else {
                let node_time = self.node_time(tree, cur_node);
                let node = tree.node(cur_node);
                let info_loc = (node.data_pos_normal.saturating_sub(self.partition_start())) as u32;
                self.udf
                    .write_file_entry(
                        out,
                        cur_part_sec,
                        false,
                        1,
                        unique_ident,
                        info_loc,
                        node.size,
                        &node_time,
                        &node_time,
                        &node_time,
                    )
                    .map_err(ImageError::SinkWrite)?;
                cur_part_sec += 1;

                unique_ident = if unique_ident == 0 {
                    UNIQUEIDENT_MIN
                } else {
                    unique_ident + 1
                };
            }
        }

        Ok(())
    }

    /// Writes the integrity descriptor, both volume descriptor sequences,
    /// the first anchor, the file set descriptor and the partition
    /// entries.
    pub fn write_partition<W: Write>(
        &mut self,
        out: &mut SectorOutput<W>,
        alloc: &SectorAllocator,
        tree: &mut FileTree,
    ) -> Result<(), ImageError> {
        if self.part_len > u64::from(u32::MAX) {
            return Err(ImageError::UdfPartitionTooLarge { sectors: self.part_len });
        }
        let main_desc_start = alloc.start_of(Region::UdfMainDescriptors);
        if main_desc_start > u64::from(u32::MAX) || alloc.data_len() > u64::from(u32::MAX) {
            return Err(ImageError::SectorRangeTooLarge {
                start: main_desc_start,
                end: alloc.data_start() + alloc.data_len(),
            });
        }

        let mut udf_cur_sec = main_desc_start as u32;
        // The partition spans the file set descriptor, the metadata and the
        // shared data region.
        let part_sectors = self.part_len + 1 + alloc.data_len();
        if part_sectors > u64::from(u32::MAX) {
            return Err(ImageError::UdfPartitionTooLarge { sectors: part_sectors });
        }
        let udf_part_len = part_sectors as u32;

        // Larger than the unique identifier of any entry, reserved range
        // included.
        let next_unique_ident =
            u64::from(tree.dir_count()) + u64::from(tree.file_count()) + 1 + UNIQUEIDENT_MIN;

        // The integrity sequence occupies the single sector in front of the
        // main descriptor sequence.
        let integrity_extent = (SECTOR_SIZE as u32, udf_cur_sec);
        self.udf
            .write_vol_desc_log_integrity(
                out,
                udf_cur_sec,
                tree.file_count(),
                tree.dir_count() + 1,
                udf_part_len,
                next_unique_ident,
                &self.create_time,
            )
            .map_err(ImageError::SinkWrite)?;
        udf_cur_sec += 1;

        let seq_len = VOLDESC_SEQUENCE_SECTORS * SECTOR_SIZE as u32;
        for sequence in 0..2 {
            if sequence == 0 {
                self.voldesc_seqextent_main = (seq_len, udf_cur_sec);
            } else {
                self.voldesc_seqextent_rsrv = (seq_len, udf_cur_sec);
            }

            let mut voldesc_seqnum = 0;
            self.udf
                .write_vol_desc_primary(out, voldesc_seqnum, udf_cur_sec, &self.create_time)
                .map_err(ImageError::SinkWrite)?;
            voldesc_seqnum += 1;
            udf_cur_sec += 1;

            self.udf
                .write_vol_desc_impl_use(out, voldesc_seqnum, udf_cur_sec)
                .map_err(ImageError::SinkWrite)?;
            voldesc_seqnum += 1;
            udf_cur_sec += 1;

            self.udf
                .write_vol_desc_partition(
                    out,
                    voldesc_seqnum,
                    udf_cur_sec,
                    self.partition_start() as u32,
                    udf_part_len,
                )
                .map_err(ImageError::SinkWrite)?;
            voldesc_seqnum += 1;
            udf_cur_sec += 1;

            self.udf
                .write_vol_desc_logical(out, voldesc_seqnum, udf_cur_sec, integrity_extent.0, integrity_extent.1)
                .map_err(ImageError::SinkWrite)?;
            voldesc_seqnum += 1;
            udf_cur_sec += 1;

            self.udf
                .write_vol_desc_unalloc(out, voldesc_seqnum, udf_cur_sec)
                .map_err(ImageError::SinkWrite)?;
            udf_cur_sec += 1;

            self.udf
                .write_vol_desc_term(out, udf_cur_sec)
                .map_err(ImageError::SinkWrite)?;
            udf_cur_sec += 1;

            // Each sequence extent must span at least sixteen sectors; pad
            // the six descriptors with ten empty ones.
            out.write_zero_sectors(10).map_err(ImageError::SinkWrite)?;
            udf_cur_sec += 10;
        }

        // Zero fill up to the first anchor.
        let anchor = self.anchor_sector() as u32;
        if udf_cur_sec < anchor {
            out.write_zero_sectors(u64::from(anchor - udf_cur_sec))
                .map_err(ImageError::SinkWrite)?;
            udf_cur_sec = anchor;
        }

        self.udf
            .write_anchor_vol_desc_ptr(out, udf_cur_sec, self.voldesc_seqextent_main, self.voldesc_seqextent_rsrv)
            .map_err(ImageError::SinkWrite)?;

        // The file set descriptor is the first partition block, so its tag
        // location is 0 and the root ICB follows at block 1.
        self.udf
            .write_file_set_desc(out, 0, 1, &self.create_time)
            .map_err(ImageError::SinkWrite)?;

        self.write_partition_entries(out, tree)
    }

    /// Writes the trailing anchor one sector past the data region.
    pub fn write_tail<W: Write>(&self, out: &mut SectorOutput<W>, alloc: &SectorAllocator) -> Result<(), ImageError> {
        let last_data_sec = alloc.data_start() + alloc.data_len();
        if last_data_sec > u64::from(u32::MAX) {
            return Err(ImageError::SectorRangeTooLarge {
                start: alloc.data_start(),
                end: last_data_sec,
            });
        }

        self.udf
            .write_anchor_vol_desc_ptr(
                out,
                last_data_sec as u32,
                self.voldesc_seqextent_main,
                self.voldesc_seqextent_rsrv,
            )
            .map_err(ImageError::SinkWrite)?;
        out.pad_sector().map_err(ImageError::SinkWrite)
    }
}

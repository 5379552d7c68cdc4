//! The top-level image director: configuration plus the two-pass driver
//! that binds the allocator, the per-format writers and the data copy.


use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use chrono::Local;
use tracing::{debug, warn};

use crate::bytes_to_sectors;
use crate::dvdvideo;
use crate::eltorito::ElTorito;
use crate::error::ImageError;
use crate::fileset::FileSet;
use crate::iso9660::{InterchangeLevel, Iso9660, MAX_EXTENT_SIZE};
use crate::iso_writer::Iso9660Writer;
use crate::joliet::Joliet;
use crate::progress::{Progress, Status};
use crate::sector::{SectorAllocator, SectorOutput};
use crate::tree::{FileTree, NodeId};
use crate::udf::{PartAccessType, Udf};
use crate::udf_writer::UdfWriter;
use crate::SECTOR_SIZE;


const FILE_COPY_BUFFER_SIZE: usize = 0x10000;

/// Which names [`FileSystemWriter::file_path_map`] assembles a path from.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
enum PathNaming {
    Requested,
    Iso9660,
    Joliet,
}


/// Which file systems the image carries.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FileSystemType {
    Iso9660,
    Iso9660Joliet,
    Iso9660Udf,
    Iso9660UdfJoliet,
    Udf,
    /// ISO9660 + UDF with DVD-Video compatible padding.
    DvdVideo,
}

/// The image configuration: the file set, the target file system
/// combination and the per-format settings.
pub struct FileSystem {
    fs_type: FileSystemType,
    files: FileSet,
    pub(crate) iso9660: Iso9660,
    pub(crate) joliet: Joliet,
    pub(crate) udf: Udf,
    pub(crate) eltorito: ElTorito,
}
impl FileSystem {
    pub fn new(fs_type: FileSystemType, files: FileSet) -> Self {
        Self {
            fs_type,
            files,
            iso9660: Iso9660::default(),
            joliet: Joliet::default(),
            udf: Udf::new(fs_type == FileSystemType::DvdVideo),
            eltorito: ElTorito::default(),
        }
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    pub fn set_volume_label(&mut self, label: &str) {
        self.iso9660.set_volume_label(label);
        self.joliet.set_volume_label(label);
        self.udf.set_volume_label(label);
    }

    pub fn set_text_fields(&mut self, sys_ident: &str, volset_ident: &str, publ_ident: &str, prep_ident: &str) {
        self.iso9660.set_text_fields(sys_ident, volset_ident, publ_ident, prep_ident);
        self.joliet.set_text_fields(sys_ident, volset_ident, publ_ident, prep_ident);
    }

    pub fn set_file_fields(&mut self, copy_file_ident: &str, abst_file_ident: &str, bibl_file_ident: &str) {
        self.iso9660.set_file_fields(copy_file_ident, abst_file_ident, bibl_file_ident);
        self.joliet.set_file_fields(copy_file_ident, abst_file_ident, bibl_file_ident);
    }

    pub fn set_application_identifier(&mut self, app_ident: &str) {
        self.iso9660.set_application_identifier(app_ident);
        self.joliet.set_application_identifier(app_ident);
    }

    pub fn set_interchange_level(&mut self, inter_level: InterchangeLevel) {
        self.iso9660.set_interchange_level(inter_level);
    }

    pub fn set_include_file_ver_info(&mut self, include: bool) {
        self.iso9660.set_include_file_ver_info(include);
        self.joliet.set_include_file_ver_info(include);
    }

    pub fn set_part_access_type(&mut self, access_type: PartAccessType) {
        self.udf.set_part_access_type(access_type);
    }

    pub fn set_relax_max_dir_level(&mut self, relax: bool) {
        self.iso9660.set_relax_max_dir_level(relax);
    }

    pub fn set_long_joliet_names(&mut self, enable: bool) {
        self.joliet.set_long_names(enable);
    }

    pub fn add_boot_image_no_emulation(
        &mut self,
        path: &Path,
        bootable: bool,
        load_segment: u16,
        sec_count: u16,
    ) -> Result<(), ImageError> {
        self.eltorito.add_image_no_emulation(path, bootable, load_segment, sec_count)
    }

    pub fn add_boot_image_floppy(&mut self, path: &Path, bootable: bool) -> Result<(), ImageError> {
        self.eltorito.add_image_floppy(path, bootable)
    }

    pub fn add_boot_image_hard_disk(&mut self, path: &Path, bootable: bool) -> Result<(), ImageError> {
        self.eltorito.add_image_hard_disk(path, bootable)
    }

    pub fn is_iso9660(&self) -> bool {
        self.fs_type != FileSystemType::Udf
    }

    pub fn is_joliet(&self) -> bool {
        matches!(
            self.fs_type,
            FileSystemType::Iso9660Joliet | FileSystemType::Iso9660UdfJoliet,
        )
    }

    pub fn is_udf(&self) -> bool {
        matches!(
            self.fs_type,
            FileSystemType::Iso9660Udf
                | FileSystemType::Iso9660UdfJoliet
                | FileSystemType::Udf
                | FileSystemType::DvdVideo,
        )
    }

    pub fn is_dvdvideo(&self) -> bool {
        self.fs_type == FileSystemType::DvdVideo
    }

    pub fn allows_fragmentation(&self) -> bool {
        self.iso9660.allows_fragmentation()
    }

    pub fn max_dir_level(&self) -> u8 {
        self.iso9660.max_dir_level()
    }
}


/// Writes one image from an immutable [`FileSystem`] configuration.
///
/// The writer owns the file tree between the passes; after a successful
/// [`write`](Self::write) it can still answer
/// [`file_path_map`](Self::file_path_map) queries from the frozen names.
pub struct FileSystemWriter<'fs> {
    file_sys: &'fs FileSystem,
    file_tree: Option<FileTree>,
    use_file_times: bool,
}
impl<'fs> FileSystemWriter<'fs> {
    pub fn new(file_sys: &'fs FileSystem) -> Self {
        Self {
            file_sys,
            file_tree: None,
            use_file_times: true,
        }
    }

    /// When disabled, every directory record and UDF entry carries the
    /// image creation time instead of the source modification time.
    pub fn set_use_file_times(&mut self, use_file_times: bool) {
        self.use_file_times = use_file_times;
    }

    /// Produces the image into `out`.
    ///
    /// `sec_offset` shifts every absolute sector reference; it names the
    /// sector the written stream will start at on the medium, for appending
    /// to a multi-session disc. The sink is flushed on every exit path, but
    /// a partially written image is not removed.
    pub fn write<W: Write, P: Progress>(
        &mut self,
        out: W,
        progress: &mut P,
        sec_offset: u32,
    ) -> Result<(), ImageError> {
        let mut out = SectorOutput::new(out);
        let result = self.write_inner(&mut out, progress, sec_offset);
        let flushed = out.flush();
        result?;
        flushed.map_err(ImageError::SinkWrite)
    }

    fn write_inner<W: Write, P: Progress>(
        &mut self,
        out: &mut SectorOutput<W>,
        progress: &mut P,
        sec_offset: u32,
    ) -> Result<(), ImageError> {
        debug!("writing image with sector offset {}", sec_offset);
        let file_sys = self.file_sys;
        let create_time = Local::now();

        // The first sixteen sectors are the system area, all zeros.
        out.write_zero_sectors(16).map_err(ImageError::SinkWrite)?;

        progress.status(Status::BuildingTree);
        let mut file_tree = FileTree::build(file_sys.files())?;

        if file_sys.is_dvdvideo() {
            dvdvideo::calc_file_padding(&mut file_tree)?;
            dvdvideo::print_file_padding(&file_tree);
        }

        let is_iso = file_sys.is_iso9660();
        let is_udf = file_sys.is_udf();
        let is_joliet = file_sys.is_joliet();

        let mut alloc = SectorAllocator::new(16 + u64::from(sec_offset));
        let mut iso_writer = Iso9660Writer::new(
            &file_sys.iso9660,
            &file_sys.joliet,
            &file_sys.eltorito,
            is_joliet,
            self.use_file_times,
            create_time,
        );
        let mut udf_writer = UdfWriter::new(&file_sys.udf, self.use_file_times, create_time, sec_offset);

        // First pass: fix the position of every structure and every extent.
        if is_iso {
            iso_writer.alloc_header(&mut alloc);
        }
        if is_udf {
            udf_writer.alloc_header(&mut alloc);
        }
        if is_iso {
            iso_writer.alloc_path_tables(&mut alloc, file_sys.files(), progress)?;
            iso_writer.alloc_dir_entries(&mut file_tree, &mut alloc, progress)?;
        }
        if is_udf {
            udf_writer.alloc_partition(&mut file_tree, &mut alloc)?;
        }

        let first_data_sec = alloc.next_free();
        let last_data_sec = self.calc_filesys_data(&mut file_tree, progress, first_data_sec)?;
        alloc.alloc_data_sectors(last_data_sec - first_data_sec);

        // Second pass: emit everything in allocation order.
        if is_iso {
            iso_writer.write_header(out, &alloc, &file_tree)?;
        }
        if is_udf {
            udf_writer.write_header(out)?;
        }
        if is_iso {
            iso_writer.write_path_tables(out, file_sys.files(), &file_tree, progress)?;
            iso_writer.write_dir_entries(out, &file_tree, progress)?;
        }
        if is_udf {
            progress.status(Status::WritingUdfStructures);
            udf_writer.write_partition(out, &alloc, &mut file_tree)?;
        }

        progress.status(Status::WritingData);
        self.write_file_data(out, &file_tree, progress, alloc.data_len() * SECTOR_SIZE)?;

        if is_udf {
            udf_writer.write_tail(out, &alloc)?;
        }

        self.file_tree = Some(file_tree);
        Ok(())
    }

    /// Whether a file is carried by any namespace of this configuration.
    ///
    /// Files beyond the single-extent limit are representable through
    /// multi-extent chains (level 3) or through UDF; without either they
    /// are skipped entirely.
    fn file_is_carried(&self, size: u64) -> bool {
        size <= MAX_EXTENT_SIZE || self.file_sys.allows_fragmentation() || self.file_sys.is_udf()
    }

    /// Whether the children of a directory at `level` are part of the
    /// image.
    ///
    /// The ISO9660 depth cap prunes subtrees only when no UDF file system
    /// is present; with UDF in the image, deep nodes still carry data and
    /// UDF metadata, they are merely invisible to the ISO9660 namespaces.
    fn descends_into(&self, level: u32) -> bool {
        self.file_sys.is_udf() || level < u32::from(self.file_sys.max_dir_level())
    }

    /// Third step of the first pass: assigns every file its data extent.
    fn calc_filesys_data<P: Progress>(
        &self,
        tree: &mut FileTree,
        progress: &mut P,
        start_sec: u64,
    ) -> Result<u64, ImageError> {
        let mut sec_offset = start_sec;

        let mut dir_node_stack: Vec<(NodeId, u32)> = vec![(tree.root(), 0)];
        while let Some((local_node, level)) = dir_node_stack.pop() {
            // Subdirectories are pushed in reverse so they pop in input
            // order; the emission pass walks the same way.
            for &child in tree.node(local_node).children.iter().rev() {
                if tree.node(child).is_directory() && self.descends_into(level) {
                    dir_node_stack.push((child, level + 1));
                }
            }

            let children = tree.node(local_node).children.clone();
            for child in children {
                if tree.node(child).is_directory() {
                    continue;
                }

                let size = tree.node(child).size;
                if size > MAX_EXTENT_SIZE && !self.file_sys.allows_fragmentation() {
                    let name = tree.node(child).name.clone();
                    if !self.file_sys.is_udf() {
                        let message = format!("skipping {:?}, the file is larger than 4 GiB", name);
                        warn!("{}", message);
                        progress.warning(&message);
                        continue;
                    }
                    let message = format!(
                        "the file {:?} is larger than 4 GiB; it will not be visible in the ISO9660 or Joliet file systems",
                        name,
                    );
                    warn!("{}", message);
                    progress.warning(&message);
                }

                let node = tree.node_mut(child);
                if let Some(import) = &node.import {
                    // Imported extents live in an earlier session.
                    node.data_size_normal = u64::from(import.extent_len);
                    node.data_size_joliet = u64::from(import.extent_len);
                    node.data_pos_normal = u64::from(import.extent_loc);
                    node.data_pos_joliet = u64::from(import.extent_loc);
                } else {
                    node.data_size_normal = size;
                    node.data_size_joliet = size;
                    node.data_pos_normal = sec_offset;
                    node.data_pos_joliet = sec_offset;
                    sec_offset += bytes_to_sectors(size) + u64::from(node.data_pad_sectors);
                }
            }
        }

        Ok(sec_offset)
    }

    /// Copies one source file into the image, sector padded.
    fn write_file_node<W: Write, P: Progress>(
        &self,
        out: &mut SectorOutput<W>,
        tree: &FileTree,
        node: NodeId,
        progress: &mut P,
        written_bytes: &mut u64,
        total_bytes: u64,
    ) -> Result<(), ImageError> {
        let path = &tree.node(node).external_path;
        let mut source =
            File::open(path).map_err(|error| ImageError::SourceRead { path: path.clone(), error })?;

        let mut buffer = vec![0u8; FILE_COPY_BUFFER_SIZE];
        loop {
            let read = source
                .read(&mut buffer)
                .map_err(|error| ImageError::SourceRead { path: path.clone(), error })?;
            if read == 0 {
                break;
            }
            out.write(&buffer[..read]).map_err(ImageError::SinkWrite)?;
            *written_bytes += read as u64;
            progress.data_progress(*written_bytes, total_bytes);
        }

        if out.allocated() != 0 {
            out.pad_sector().map_err(ImageError::SinkWrite)?;
        }
        Ok(())
    }

    /// Emits the file data region in layout order.
    fn write_file_data<W: Write, P: Progress>(
        &self,
        out: &mut SectorOutput<W>,
        tree: &FileTree,
        progress: &mut P,
        total_bytes: u64,
    ) -> Result<(), ImageError> {
        let mut written_bytes = 0u64;

        let mut dir_node_stack: Vec<(NodeId, u32)> = vec![(tree.root(), 0)];
        while let Some((local_node, level)) = dir_node_stack.pop() {
            for &child in tree.node(local_node).children.iter().rev() {
                if tree.node(child).is_directory() && self.descends_into(level) {
                    dir_node_stack.push((child, level + 1));
                }
            }

            for &child in &tree.node(local_node).children {
                if progress.cancelled() {
                    return Err(ImageError::Cancelled);
                }
                let node = tree.node(child);
                if node.is_directory() || node.is_imported() {
                    continue;
                }
                if !self.file_is_carried(node.size) {
                    continue;
                }

                self.write_file_node(out, tree, child, progress, &mut written_bytes, total_bytes)?;
                out.write_zero_sectors(u64::from(node.data_pad_sectors))
                    .map_err(ImageError::SinkWrite)?;
            }
        }

        Ok(())
    }

    /// One path component of a node: the requested name, or the frozen
    /// namespace name with the version suffix stripped.
    fn node_path_component(tree: &FileTree, node: NodeId, naming: PathNaming) -> String {
        let name = match naming {
            PathNaming::Requested => return tree.node(node).name.clone(),
            PathNaming::Iso9660 => String::from_utf8_lossy(&tree.node(node).iso9660_name).into_owned(),
            PathNaming::Joliet => String::from_utf16_lossy(&tree.node(node).joliet_name),
        };
        match name.len().checked_sub(2) {
            Some(pos) if name.as_bytes()[pos] == b';' => name[..pos].to_owned(),
            _ => name,
        }
    }

    /// Assembles a node's full path from per-component names.
    fn node_path(tree: &FileTree, node: NodeId, naming: PathNaming) -> String {
        let mut components = Vec::new();
        let mut current = node;
        while tree.node(current).parent().is_some() {
            components.push(Self::node_path_component(tree, current, naming));
            current = tree.node(current).parent().unwrap();
        }
        components.reverse();
        format!("/{}", components.join("/"))
    }

    /// Maps every file's requested internal path to the path a reader of
    /// the image will see (Joliet when enabled, ISO9660 otherwise).
    ///
    /// Only meaningful after a successful [`write`](Self::write); returns
    /// an empty map before that.
    pub fn file_path_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let Some(tree) = &self.file_tree else {
            return map;
        };
        let naming = if self.file_sys.is_joliet() {
            PathNaming::Joliet
        } else {
            PathNaming::Iso9660
        };

        for id in tree.node_ids() {
            let node = tree.node(id);
            if node.is_directory() {
                continue;
            }
            // Nodes dropped from the namespace never froze a name.
            if node.iso9660_name.is_empty() && node.joliet_name.is_empty() {
                continue;
            }
            map.insert(
                Self::node_path(tree, id, PathNaming::Requested),
                Self::node_path(tree, id, naming),
            );
        }
        map
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::progress::NullProgress;
    use crate::SECTOR_SIZE;

    const SEC: usize = SECTOR_SIZE as usize;

    /// Creates the given files in a temp directory and the matching sorted
    /// file set; directories are paths ending in '/'.
    fn fixture(entries: &[(&str, &[u8])]) -> (tempfile::TempDir, FileSet) {
        let dir = tempfile::tempdir().unwrap();
        let mut files = FileSet::new();
        for (internal_path, content) in entries {
            if let Some(stripped) = internal_path.strip_suffix('/') {
                let host = dir.path().join(stripped.trim_start_matches('/'));
                std::fs::create_dir_all(&host).unwrap();
                files.add_directory(stripped, host).unwrap();
            } else {
                let host = dir.path().join(internal_path.trim_start_matches('/'));
                std::fs::write(&host, content).unwrap();
                files.add_file(internal_path, host, content.len() as u64).unwrap();
            }
        }
        (dir, files)
    }

    fn write_image(file_sys: &FileSystem) -> Vec<u8> {
        let mut writer = FileSystemWriter::new(file_sys);
        writer.set_use_file_times(false);
        let mut image = Vec::new();
        writer.write(&mut image, &mut NullProgress, 0).unwrap();
        image
    }

    fn sector(image: &[u8], index: usize) -> &[u8] {
        &image[index * SEC..(index + 1) * SEC]
    }

    #[test]
    fn test_empty_image_layout() {
        let file_sys = FileSystem::new(FileSystemType::Iso9660, FileSet::new());
        let image = write_image(&file_sys);

        assert_eq!(image.len() % SEC, 0);
        // System area: sixteen zero sectors.
        assert!(image[..16 * SEC].iter().all(|&b| b == 0));
        // Primary descriptor at 16, set terminator at 17.
        assert_eq!(sector(&image, 16)[0], 0x01);
        assert_eq!(&sector(&image, 16)[1..6], b"CD001");
        assert_eq!(sector(&image, 16)[6], 0x01);
        assert_eq!(sector(&image, 17)[0], 0xFF);
        // Path tables at 18 and 19: the root record points at the root
        // directory extent at sector 20.
        let pt_l = sector(&image, 18);
        assert_eq!(pt_l[0], 1);
        assert_eq!(&pt_l[2..6], &20u32.to_le_bytes());
        assert_eq!(&pt_l[6..8], &1u16.to_le_bytes());
        let pt_m = sector(&image, 19);
        assert_eq!(&pt_m[2..6], &20u32.to_be_bytes());
        // Root directory: '.' and '..' records only.
        let root = sector(&image, 20);
        assert_eq!(root[0], 34);
        assert_eq!(root[33], 0x00);
        assert_eq!(root[34], 34);
        assert_eq!(root[34 + 33], 0x01);
        assert_eq!(root[68], 0);
        // No data region; the image size is deterministic.
        assert_eq!(image.len(), 21 * SEC);
    }

    #[test]
    fn test_minimal_level1_image() {
        let (_dir, files) = fixture(&[("/A/", b""), ("/A/HELLO.TXT", b"hello")]);
        let mut file_sys = FileSystem::new(FileSystemType::Iso9660, files);
        file_sys.set_volume_label("TEST");
        let image = write_image(&file_sys);

        // Volume space covers everything up to the data end.
        let total_sectors = (image.len() / SEC) as u32;
        assert_eq!(&sector(&image, 16)[80..84], &total_sectors.to_le_bytes());

        // Root directory at 20 lists 'A'; the subdirectory at 21 lists the
        // file.
        let root = sector(&image, 20);
        let a_record = &root[68..];
        assert_eq!(a_record[0], 34);
        assert_eq!(a_record[25] & 0x02, 0x02);
        assert_eq!(&a_record[2..6], &21u32.to_le_bytes());
        assert_eq!(a_record[32], 1);
        assert_eq!(a_record[33], b'A');

        let a_dir = sector(&image, 21);
        let file_record = &a_dir[68..];
        assert_eq!(file_record[0], 33 + 11 + 1);
        assert_eq!(&file_record[2..6], &22u32.to_le_bytes());
        assert_eq!(&file_record[10..14], &5u32.to_le_bytes());
        assert_eq!(&file_record[33..44], b"HELLO.TXT;1");

        // File data: the content followed by zero fill.
        let data = sector(&image, 22);
        assert_eq!(&data[..5], b"hello");
        assert!(data[5..].iter().all(|&b| b == 0));
        assert_eq!(image.len(), 23 * SEC);
    }

    #[test]
    fn test_joliet_image() {
        let (_dir, files) = fixture(&[("/readme.txt", b"hello, world")]);
        let file_sys = FileSystem::new(FileSystemType::Iso9660Joliet, files);
        let image = write_image(&file_sys);

        // Primary at 16, Joliet supplementary at 17, terminator at 18.
        assert_eq!(sector(&image, 16)[0], 0x01);
        let suppl = sector(&image, 17);
        assert_eq!(suppl[0], 0x02);
        assert_eq!(&suppl[88..91], &[0x25, 0x2F, 0x45]);
        assert_eq!(sector(&image, 18)[0], 0xFF);

        // Four path tables at 19..23, then the interleaved root extents.
        let iso_root = sector(&image, 23);
        assert_eq!(&iso_root[68 + 33..68 + 33 + 12], b"README.TXT;1");

        let joliet_root = sector(&image, 24);
        let expected: Vec<u8> = "readme.txt;1"
            .encode_utf16()
            .flat_map(|u| u.to_be_bytes())
            .collect();
        assert_eq!(&joliet_root[68 + 33..68 + 33 + 24], expected.as_slice());

        // Both namespaces reference the same data extent.
        assert_eq!(&iso_root[68 + 2..68 + 6], &25u32.to_le_bytes());
        assert_eq!(&joliet_root[68 + 2..68 + 6], &25u32.to_le_bytes());
        assert_eq!(&sector(&image, 25)[..12], b"hello, world");
    }

    #[test]
    fn test_udf_image() {
        let (_dir, files) = fixture(&[("/video.dat", &[0xAB; 4096])]);
        let mut file_sys = FileSystem::new(FileSystemType::Udf, files);
        file_sys.set_volume_label("UDFDISC");
        let image = write_image(&file_sys);

        // Volume recognition sequence right after the system area.
        assert_eq!(&sector(&image, 16)[1..6], b"BEA01");
        assert_eq!(&sector(&image, 17)[1..6], b"NSR02");
        assert_eq!(&sector(&image, 18)[1..6], b"TEA01");

        // Anchor at 256, file set descriptor at 257 naming the root ICB at
        // partition block 1.
        let anchor = sector(&image, 256);
        assert_eq!(&anchor[0..2], &2u16.to_le_bytes());
        let fsd = sector(&image, 257);
        assert_eq!(&fsd[0..2], &256u16.to_le_bytes());
        assert_eq!(&fsd[400..404], &(SECTOR_SIZE as u32).to_le_bytes());
        assert_eq!(&fsd[404..408], &1u32.to_le_bytes());

        // Root file entry at 258, its identifier block at 259, the file
        // entry of video.dat at 260.
        assert_eq!(&sector(&image, 258)[0..2], &261u16.to_le_bytes());
        let idents = sector(&image, 259);
        assert_eq!(&idents[0..2], &257u16.to_le_bytes());
        let file_entry = sector(&image, 260);
        assert_eq!(&file_entry[0..2], &261u16.to_le_bytes());
        // The allocation descriptor points at partition-local block 4
        // (absolute 261) with 4096 bytes.
        assert_eq!(&file_entry[176..180], &4096u32.to_le_bytes());
        assert_eq!(&file_entry[180..184], &4u32.to_le_bytes());

        // Two data sectors, then the trailing anchor on the last sector.
        assert_eq!(sector(&image, 261)[0], 0xAB);
        assert_eq!(sector(&image, 262)[2047], 0xAB);
        let tail = sector(&image, 263);
        assert_eq!(&tail[0..2], &2u16.to_le_bytes());
        assert_eq!(image.len(), 264 * SEC);
    }

    #[test]
    fn test_eltorito_image() {
        let dir = tempfile::tempdir().unwrap();
        let boot_path = dir.path().join("boot.img");
        std::fs::write(&boot_path, [0xEBu8; 4096]).unwrap();

        let mut file_sys = FileSystem::new(FileSystemType::Iso9660, FileSet::new());
        file_sys.add_boot_image_no_emulation(&boot_path, true, 0x07C0, 4).unwrap();
        let image = write_image(&file_sys);

        // Boot record descriptor immediately after the primary.
        let boot_record = sector(&image, 17);
        assert_eq!(boot_record[0], 0x00);
        assert_eq!(&boot_record[1..6], b"CD001");
        assert_eq!(&boot_record[7..30], b"EL TORITO SPECIFICATION");
        assert_eq!(&boot_record[71..75], &19u32.to_le_bytes());
        assert_eq!(sector(&image, 18)[0], 0xFF);

        // Catalog at 19: validation entry summing to zero, then the default
        // entry pointing at the boot data at sector 20.
        let catalog = sector(&image, 19);
        let mut word_sum = 0u16;
        for pair in catalog[0..32].chunks_exact(2) {
            word_sum = word_sum.wrapping_add(u16::from_le_bytes(pair.try_into().unwrap()));
        }
        assert_eq!(word_sum, 0);
        assert_eq!(catalog[32], 0x88);
        assert_eq!(catalog[33], 0);
        assert_eq!(&catalog[34..36], &0x07C0u16.to_le_bytes());
        assert_eq!(&catalog[38..40], &4u16.to_le_bytes());
        assert_eq!(&catalog[40..44], &20u32.to_le_bytes());

        // Boot image data, sector padded.
        assert_eq!(sector(&image, 20)[0], 0xEB);
        assert_eq!(sector(&image, 21)[2047], 0xEB);
    }

    #[test]
    fn test_sibling_collisions() {
        let (_dir, files) = fixture(&[
            ("/verylongname1.txt", b"1"),
            ("/verylongname2.txt", b"2"),
            ("/verylongname3.txt", b"3"),
        ]);
        let file_sys = FileSystem::new(FileSystemType::Iso9660Joliet, files);
        let mut writer = FileSystemWriter::new(&file_sys);
        writer.set_use_file_times(false);
        let mut image = Vec::new();
        writer.write(&mut image, &mut NullProgress, 0).unwrap();

        // All three names shorten to the same level-1 stem; the collisions
        // pick up stem counters while Joliet keeps them apart naturally.
        let map = writer.file_path_map();
        assert_eq!(map["/verylongname1.txt"], "/verylongname1.txt");
        assert_eq!(map["/verylongname2.txt"], "/verylongname2.txt");
        assert_eq!(map["/verylongname3.txt"], "/verylongname3.txt");

        let iso_names: Vec<Vec<u8>> = [
            b"VERYLONG.TXT;1".as_slice(),
            b"VERYLON1.TXT;1".as_slice(),
            b"VERYLON2.TXT;1".as_slice(),
        ]
        .iter()
        .map(|n| n.to_vec())
        .collect();
        let image_str = image.windows(iso_names[0].len());
        for name in &iso_names {
            assert!(
                image_str.clone().any(|window| window == name.as_slice()),
                "missing ISO name {:?}", String::from_utf8_lossy(name),
            );
        }
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_deep_directories_are_skipped() {
        // Nine nested directories exceed the level-1 depth cap of eight;
        // the subtree below the cap is dropped with a warning.
        let dir = tempfile::tempdir().unwrap();
        let mut files = FileSet::new();
        let mut internal = String::new();
        for depth in 1..=9 {
            internal.push_str(&format!("/D{}", depth));
            let host = dir.path().join(internal.trim_start_matches('/'));
            std::fs::create_dir_all(&host).unwrap();
            files.add_directory(&internal, host).unwrap();
        }
        let file_path = dir.path().join("D1/D2/D3/D4/D5/D6/D7/D8/D9/deep.txt");
        std::fs::write(&file_path, b"deep").unwrap();
        files
            .add_file(&format!("{}/deep.txt", internal), file_path, 4)
            .unwrap();

        let file_sys = FileSystem::new(FileSystemType::Iso9660, files);
        let image = write_image(&file_sys);

        assert!(logs_contain("deeper than 8 levels"));
        // The dropped subtree contributes no data region.
        assert!(!image
            .windows(4)
            .any(|window| window == b"deep"));
    }

    #[test]
    fn test_cancellation() {
        struct CancelImmediately;
        impl Progress for CancelImmediately {
            fn cancelled(&mut self) -> bool {
                true
            }
        }

        let (_dir, files) = fixture(&[("/file.bin", &[1u8; 100])]);
        let file_sys = FileSystem::new(FileSystemType::Iso9660, files);
        let mut writer = FileSystemWriter::new(&file_sys);
        let mut image = Vec::new();
        let error = writer.write(&mut image, &mut CancelImmediately, 0).unwrap_err();
        assert!(matches!(error, ImageError::Cancelled));
    }

    #[test]
    fn test_session_offset_shifts_references() {
        let (_dir, files) = fixture(&[("/A/", b""), ("/A/HELLO.TXT", b"hello")]);
        let file_sys = FileSystem::new(FileSystemType::Iso9660, files);
        let mut writer = FileSystemWriter::new(&file_sys);
        writer.set_use_file_times(false);
        let mut image = Vec::new();
        writer.write(&mut image, &mut NullProgress, 1000).unwrap();

        // The stream still begins with the 16-sector system area, but every
        // recorded sector reference moves by the offset.
        let pt_l = sector(&image, 18);
        assert_eq!(&pt_l[2..6], &1020u32.to_le_bytes());
        let root = sector(&image, 20);
        assert_eq!(&root[68 + 2..68 + 6], &1021u32.to_le_bytes());
    }
}

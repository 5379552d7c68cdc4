//! DVD-Video layout support.
//!
//! A DVD-Video player navigates by the sector layout announced inside the
//! IFO control files, not by the file system. When the source files were
//! authored for a different layout (or trimmed), the gap between the
//! announced and the actual extents has to be made up with zero padding
//! after each file. This module parses the VMG and VTS headers and derives
//! the per-file pad counts; any inconsistency between the IFO data and the
//! file sizes is fatal.


use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::error::ImageError;
use crate::tree::{FileTree, NodeId};


/// Sector size of DVD-Video blocks; identical to the file system sector.
const DVDVIDEO_BLOCK_SIZE: u64 = 2048;

const IFO_IDENT_VMG: &[u8; 12] = b"DVDVIDEO-VMG";
const IFO_IDENT_VTS: &[u8; 12] = b"DVDVIDEO-VTS";


/// Header data of the video manager (VIDEO_TS.IFO).
#[derive(Clone, Debug, Default)]
pub struct IfoVmgData {
    pub last_vmg_sector: u32,
    pub last_vmg_ifo_sector: u32,
    pub num_vmg_title_sets: u16,
    pub vmg_menu_vob_sector: u32,
    pub srpt_sector: u32,
    /// Start sectors of the title sets listed in the title search pointer
    /// table.
    pub titles: Vec<u32>,
}

/// Header data of one video title set (VTS_nn_0.IFO).
#[derive(Clone, Copy, Debug, Default)]
pub struct IfoVtsData {
    pub last_vts_sector: u32,
    pub last_vts_ifo_sector: u32,
    pub vts_menu_vob_sector: u32,
    pub vts_vob_sector: u32,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum IfoType {
    Vmg,
    Vts,
}

/// Reads the fields this library needs out of an IFO control file.
#[derive(Debug)]
pub struct IfoReader {
    file: File,
    path: PathBuf,
    ifo_type: IfoType,
}
impl IfoReader {
    /// Opens the IFO file and identifies it as VMG or VTS.
    pub fn open(path: &Path) -> Result<Self, ImageError> {
        let mut file = File::open(path)
            .map_err(|error| ImageError::SourceRead { path: path.to_owned(), error })?;

        let mut identifier = [0u8; 12];
        file.read_exact(&mut identifier)
            .map_err(|error| ImageError::SourceRead { path: path.to_owned(), error })?;

        let ifo_type = if &identifier == IFO_IDENT_VMG {
            IfoType::Vmg
        } else if &identifier == IFO_IDENT_VTS {
            IfoType::Vts
        } else {
            return Err(ImageError::InvalidIfoData {
                path: path.to_owned(),
                detail: "not a VMG or VTS control file".to_owned(),
            });
        };

        Ok(Self {
            file,
            path: path.to_owned(),
            ifo_type,
        })
    }

    pub fn ifo_type(&self) -> IfoType {
        self.ifo_type
    }

    fn read_u16_be_at(&mut self, offset: u64) -> Result<u16, ImageError> {
        let mut buffer = [0u8; 2];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut buffer))
            .map_err(|error| ImageError::SourceRead { path: self.path.clone(), error })?;
        Ok(u16::from_be_bytes(buffer))
    }

    fn read_u32_be_at(&mut self, offset: u64) -> Result<u32, ImageError> {
        let mut buffer = [0u8; 4];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut buffer))
            .map_err(|error| ImageError::SourceRead { path: self.path.clone(), error })?;
        Ok(u32::from_be_bytes(buffer))
    }

    /// Reads the video manager header and the title search pointer table.
    pub fn read_vmg(&mut self) -> Result<IfoVmgData, ImageError> {
        let mut vmg = IfoVmgData {
            last_vmg_sector: self.read_u32_be_at(12)?,
            last_vmg_ifo_sector: self.read_u32_be_at(28)?,
            num_vmg_title_sets: self.read_u16_be_at(62)?,
            vmg_menu_vob_sector: self.read_u32_be_at(192)?,
            srpt_sector: self.read_u32_be_at(196)?,
            titles: Vec::new(),
        };

        // The TT_SRPT table: a 16-bit title count, an 8-byte header, then
        // 12-byte title entries whose last four bytes are the title set
        // start sector.
        let srpt_base = DVDVIDEO_BLOCK_SIZE * u64::from(vmg.srpt_sector);
        let title_count = self.read_u16_be_at(srpt_base)?;
        for i in 0..u64::from(title_count) {
            let sector = self.read_u32_be_at(srpt_base + 8 + i * 12 + 8)?;
            vmg.titles.push(sector);
        }

        Ok(vmg)
    }

    /// Reads a video title set header.
    pub fn read_vts(&mut self) -> Result<IfoVtsData, ImageError> {
        Ok(IfoVtsData {
            last_vts_sector: self.read_u32_be_at(12)?,
            last_vts_ifo_sector: self.read_u32_be_at(28)?,
            vts_menu_vob_sector: self.read_u32_be_at(192)?,
            vts_vob_sector: self.read_u32_be_at(196)?,
        })
    }
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
enum FileSetKind {
    Info,
    Backup,
    Menu,
    Title,
}

/// The number of whole DVD blocks a file occupies in the announced layout.
fn size_to_dvd_len(file_size: u64) -> u64 {
    file_size / DVDVIDEO_BLOCK_SIZE
}

fn ifo_error(tree: &FileTree, node: NodeId, detail: impl Into<String>) -> ImageError {
    ImageError::InvalidIfoData {
        path: tree.node(node).external_path.clone(),
        detail: detail.into(),
    }
}

/// Looks up one of the well-known `/VIDEO_TS` members.
///
/// `number` 0 names the VMG set (`VIDEO_TS.*`), larger numbers a title set
/// (`VTS_nn_*`). For [`FileSetKind::Title`] the *last* existing
/// `VTS_nn_1..9.VOB` is returned since a title spans multiple files.
fn find_video_node(tree: &FileTree, kind: FileSetKind, number: u32) -> Option<NodeId> {
    let path = match kind {
        FileSetKind::Info => {
            if number == 0 {
                "/VIDEO_TS/VIDEO_TS.IFO".to_owned()
            } else {
                format!("/VIDEO_TS/VTS_{:02}_0.IFO", number)
            }
        },
        FileSetKind::Backup => {
            if number == 0 {
                "/VIDEO_TS/VIDEO_TS.BUP".to_owned()
            } else {
                format!("/VIDEO_TS/VTS_{:02}_0.BUP", number)
            }
        },
        FileSetKind::Menu => {
            if number == 0 {
                "/VIDEO_TS/VIDEO_TS.VOB".to_owned()
            } else {
                format!("/VIDEO_TS/VTS_{:02}_0.VOB", number)
            }
        },
        FileSetKind::Title => {
            if number == 0 {
                return None;
            }
            let mut last_node = None;
            for part in 1..=9 {
                let path = format!("/VIDEO_TS/VTS_{:02}_{}.VOB", number, part);
                match tree.node_from_path(&path) {
                    Some(node) => last_node = Some(node),
                    None => break,
                }
            }
            return last_node;
        },
    };
    tree.node_from_path(&path)
}

/// Total size in bytes of the `VTS_nn_1..9.VOB` title files of a set.
fn total_titles_size(tree: &FileTree, number: u32) -> u64 {
    let mut total = 0;
    for part in 1..=9 {
        let path = format!("/VIDEO_TS/VTS_{:02}_{}.VOB", number, part);
        match tree.node_from_path(&path) {
            Some(node) => total += tree.node(node).size,
            None => break,
        }
    }
    total
}

/// Derives the pads of the VMG files (`VIDEO_TS.IFO`, `.VOB`, `.BUP`).
fn pad_vmg_files(
    tree: &mut FileTree,
    vmg: &IfoVmgData,
    title_set_sectors: &[u32],
) -> Result<(), ImageError> {
    let info_node = find_video_node(tree, FileSetKind::Info, 0);
    let menu_node = find_video_node(tree, FileSetKind::Menu, 0);
    let backup_node = find_video_node(tree, FileSetKind::Backup, 0);

    let info_size = info_node.map(|n| tree.node(n).size).unwrap_or(0);
    let menu_size = menu_node.map(|n| tree.node(n).size).unwrap_or(0);

    let last = u64::from(vmg.last_vmg_sector);
    let last_ifo = u64::from(vmg.last_vmg_ifo_sector);
    let info_len = size_to_dvd_len(info_size);

    // The IFO and its BUP copy must both fit before the announced end.
    if last + 1 < info_len * 2 {
        error!("invalid VIDEO_TS.IFO file size");
        return Err(ifo_error(tree, info_node.unwrap_or(tree.root()), "invalid VIDEO_TS.IFO size"));
    }

    let info_length = if menu_node.is_none() {
        if last + 1 > info_len * 2 {
            last - info_len + 1
        } else {
            last_ifo + 1
        }
    } else if last_ifo + 1 < u64::from(vmg.vmg_menu_vob_sector) {
        u64::from(vmg.vmg_menu_vob_sector)
    } else {
        last_ifo + 1
    };

    if let Some(node) = info_node {
        let pad = checked_pad(tree, node, info_length, info_len)?;
        tree.node_mut(node).data_pad_sectors = pad;
    }

    let mut menu_length = 0;
    if let Some(node) = menu_node {
        menu_length = (last + 1)
            .checked_sub(info_length + info_len)
            .ok_or_else(|| ifo_error(tree, node, "menu VOB region underflow"))?;
        let pad = checked_pad(tree, node, menu_length, size_to_dvd_len(menu_size))?;
        tree.node_mut(node).data_pad_sectors = pad;
    }

    let backup_region_end = match title_set_sectors.first() {
        Some(&first_title_set) => u64::from(first_title_set),
        None => last + 1,
    };
    let backup_length = backup_region_end
        .checked_sub(menu_length + info_length)
        .ok_or_else(|| ifo_error(tree, backup_node.unwrap_or(tree.root()), "BUP region underflow"))?;

    if let Some(node) = backup_node {
        // A valid disc stores the BUP as a byte copy of the IFO, so the
        // backup pad is derived from the IFO length.
        let pad = checked_pad(tree, node, backup_length, info_len)?;
        tree.node_mut(node).data_pad_sectors = pad;
    }

    Ok(())
}

/// Derives the pads of one title set (`VTS_nn_*`).
fn pad_title_set(tree: &mut FileTree, counter: u32, title_set_sectors: &[u32]) -> Result<(), ImageError> {
    let info_node = find_video_node(tree, FileSetKind::Info, counter).ok_or_else(|| {
        error!("unable to find IFO file of title set {} in the file tree", counter);
        ImageError::InvalidIfoData {
            path: PathBuf::from(format!("VTS_{:02}_0.IFO", counter)),
            detail: "missing from the file tree".to_owned(),
        }
    })?;

    let ifo_path = tree.node(info_node).external_path.clone();
    let mut reader = IfoReader::open(&ifo_path)?;
    if reader.ifo_type() != IfoType::Vts {
        return Err(ifo_error(tree, info_node, "not of VTS format"));
    }
    let vts = reader.read_vts()?;

    let menu_node = find_video_node(tree, FileSetKind::Menu, counter);
    let menu_size = menu_node.map(|n| tree.node(n).size).unwrap_or(0);

    let title_size = total_titles_size(tree, counter);
    let title_node = find_video_node(tree, FileSetKind::Title, counter);
    let has_title = title_node.is_some();

    let info_size = tree.node(info_node).size;
    let info_len = size_to_dvd_len(info_size);
    let menu_len = size_to_dvd_len(menu_size);
    let title_len = size_to_dvd_len(title_size);

    let last = u64::from(vts.last_vts_sector);
    let last_ifo = u64::from(vts.last_vts_ifo_sector);

    // The title set must be large enough to carry everything it announces.
    if last + 1 < info_len * 2 {
        return Err(ifo_error(tree, info_node, "announced size smaller than the IFO and its backup"));
    }
    let expected = info_len * 2
        + if has_title { title_len } else { 0 }
        + if menu_node.is_some() { menu_len } else { 0 };
    if last + 1 < expected {
        return Err(ifo_error(tree, info_node, "IFO or menu VOB has an inconsistent size"));
    }

    let info_length = if !has_title && menu_node.is_none() {
        last - info_len + 1
    } else if !has_title {
        u64::from(vts.vts_vob_sector)
    } else if last_ifo + 1 < u64::from(vts.vts_menu_vob_sector) {
        u64::from(vts.vts_menu_vob_sector)
    } else {
        last_ifo + 1
    };
    let pad = checked_pad(tree, info_node, info_length, info_len)?;
    tree.node_mut(info_node).data_pad_sectors = pad;

    let mut menu_length = 0;
    if let Some(node) = menu_node {
        let menu_vob = u64::from(vts.vts_menu_vob_sector);
        let title_vob = u64::from(vts.vts_vob_sector);
        menu_length = if has_title && title_vob.saturating_sub(menu_vob) > menu_len {
            title_vob - menu_vob
        } else if !has_title && title_vob + menu_len + info_len < last + 1 {
            (last + 1)
                .checked_sub(info_len + menu_vob)
                .ok_or_else(|| ifo_error(tree, node, "menu VOB region underflow"))?
        } else {
            title_vob
                .checked_sub(menu_vob)
                .ok_or_else(|| ifo_error(tree, node, "menu VOB region underflow"))?
        };
        let pad = checked_pad(tree, node, menu_length, menu_len)?;
        tree.node_mut(node).data_pad_sectors = pad;
    }

    let mut title_length = 0;
    if has_title {
        title_length = (last + 1)
            .checked_sub(info_length + menu_length + info_len)
            .ok_or_else(|| ifo_error(tree, info_node, "title VOB region underflow"))?;
        // Only the last title file carries the pad.
        let node = title_node.unwrap();
        let pad = checked_pad(tree, node, title_length, title_len)?;
        tree.node_mut(node).data_pad_sectors = pad;
    }

    let index = counter as usize;
    let backup_length = if title_set_sectors.len() > index {
        u64::from(title_set_sectors[index])
            .checked_sub(u64::from(title_set_sectors[index - 1]) + title_length + menu_length + info_length)
    } else {
        (last + 1).checked_sub(title_length + menu_length + info_length)
    }
    .ok_or_else(|| ifo_error(tree, info_node, "BUP region underflow"))?;

    if let Some(node) = find_video_node(tree, FileSetKind::Backup, counter) {
        let pad = checked_pad(tree, node, backup_length, info_len)?;
        tree.node_mut(node).data_pad_sectors = pad;
    }

    Ok(())
}

/// Computes `region_length - occupied` as a 32-bit pad count.
fn checked_pad(tree: &FileTree, node: NodeId, region_length: u64, occupied: u64) -> Result<u32, ImageError> {
    let pad = region_length
        .checked_sub(occupied)
        .ok_or_else(|| ifo_error(tree, node, "announced region smaller than the file"))?;
    u32::try_from(pad).map_err(|_| ifo_error(tree, node, "region larger than 4 million blocks"))
}

/// Derives `data_pad_sectors` for every DVD-Video file in the tree.
///
/// Parses `/VIDEO_TS/VIDEO_TS.IFO` (which must identify as a VMG), then
/// every title set it announces.
pub fn calc_file_padding(tree: &mut FileTree) -> Result<(), ImageError> {
    let vmg_node = tree.node_from_path("/VIDEO_TS/VIDEO_TS.IFO").ok_or_else(|| {
        error!("unable to locate VIDEO_TS.IFO in the file tree");
        ImageError::InvalidIfoData {
            path: PathBuf::from("VIDEO_TS.IFO"),
            detail: "missing from the file tree".to_owned(),
        }
    })?;

    let ifo_path = tree.node(vmg_node).external_path.clone();
    let mut reader = IfoReader::open(&ifo_path)?;
    if reader.ifo_type() != IfoType::Vmg {
        return Err(ifo_error(tree, vmg_node, "not of VMG format"));
    }
    let vmg = reader.read_vmg()?;

    // The title pointer table lists one entry per title; several titles can
    // share a title set, so reduce to the unique start sectors in order.
    let mut title_set_sectors = vmg.titles.clone();
    title_set_sectors.sort_unstable();
    title_set_sectors.dedup();

    pad_vmg_files(tree, &vmg, &title_set_sectors)?;
    for counter in 1..=title_set_sectors.len() as u32 {
        pad_title_set(tree, counter, &title_set_sectors)?;
    }
    Ok(())
}

/// Logs the pad count of every `/VIDEO_TS` member.
pub fn print_file_padding(tree: &FileTree) {
    let Some(video_ts) = tree.node_from_path("/VIDEO_TS") else {
        return;
    };
    for &child in &tree.node(video_ts).children {
        let node = tree.node(child);
        debug!("{}: pad {} sector(s)", node.name, node.data_pad_sectors);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::path::PathBuf;

    use crate::fileset::FileSet;

    /// Builds a minimal VMG IFO: no titles, a menu VOB at sector 2.
    fn write_vmg(dir: &std::path::Path, last_sector: u32, last_ifo: u32, menu_vob: u32) -> PathBuf {
        let mut data = vec![0u8; 3 * 2048];
        data[0..12].copy_from_slice(IFO_IDENT_VMG);
        data[12..16].copy_from_slice(&last_sector.to_be_bytes());
        data[28..32].copy_from_slice(&last_ifo.to_be_bytes());
        data[192..196].copy_from_slice(&menu_vob.to_be_bytes());
        // TT_SRPT at sector 2 with zero titles.
        data[196..200].copy_from_slice(&2u32.to_be_bytes());

        let path = dir.join("VIDEO_TS.IFO");
        std::fs::File::create(&path).unwrap().write_all(&data).unwrap();
        path
    }

    #[test]
    fn test_vmg_padding() {
        let dir = tempfile::tempdir().unwrap();
        let ifo_path = write_vmg(dir.path(), 1023, 1, 2);
        let vob_path = dir.path().join("VIDEO_TS.VOB");
        let bup_path = dir.path().join("VIDEO_TS.BUP");
        std::fs::write(&vob_path, vec![0u8; 2048]).unwrap();
        std::fs::write(&bup_path, vec![0u8; 4096]).unwrap();

        let mut files = FileSet::new();
        files.add_directory("/VIDEO_TS", dir.path().to_owned()).unwrap();
        files.add_file("/VIDEO_TS/VIDEO_TS.IFO", ifo_path, 4096).unwrap();
        files.add_file("/VIDEO_TS/VIDEO_TS.VOB", vob_path, 2048).unwrap();
        files.add_file("/VIDEO_TS/VIDEO_TS.BUP", bup_path, 4096).unwrap();

        let mut tree = FileTree::build(&files).unwrap();
        calc_file_padding(&mut tree).unwrap();

        let info = tree.node_from_path("/VIDEO_TS/VIDEO_TS.IFO").unwrap();
        let menu = tree.node_from_path("/VIDEO_TS/VIDEO_TS.VOB").unwrap();
        let backup = tree.node_from_path("/VIDEO_TS/VIDEO_TS.BUP").unwrap();

        // The IFO ends where the menu VOB begins; the menu fills the space
        // up to the announced last sector minus the trailing BUP.
        assert_eq!(tree.node(info).data_pad_sectors, 0);
        assert_eq!(tree.node(menu).data_pad_sectors, 1019);
        assert_eq!(tree.node(backup).data_pad_sectors, 0);
    }

    #[test]
    fn test_rejects_wrong_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("VIDEO_TS.IFO");
        std::fs::write(&path, b"NOT-AN-IFO--").unwrap();
        let error = IfoReader::open(&path).unwrap_err();
        assert!(matches!(error, ImageError::InvalidIfoData { .. }));
    }

    #[test]
    fn test_inconsistent_vmg_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // Announces fewer sectors than the IFO and its backup occupy.
        let ifo_path = write_vmg(dir.path(), 2, 1, 0);

        let mut files = FileSet::new();
        files.add_directory("/VIDEO_TS", dir.path().to_owned()).unwrap();
        files.add_file("/VIDEO_TS/VIDEO_TS.IFO", ifo_path, 4096).unwrap();

        let mut tree = FileTree::build(&files).unwrap();
        let error = calc_file_padding(&mut tree).unwrap_err();
        assert!(matches!(error, ImageError::InvalidIfoData { .. }));
    }
}

//! ISO9660 (ECMA-119) structures: volume descriptors, directory-record
//! constants and the compatible-file-name transforms of interchange levels
//! 1, 2, 3 and the ISO9660:1999 flavor.


use std::io::{self, Write};

use bitflags::bitflags;
use chrono::{DateTime, Local};
use from_to_repr::from_to_other;

use crate::encoding::{
    record_datetime, voldesc_datetime, write_u16_both, write_u32_be, write_u32_both, write_u32_le,
    zero_voldesc_datetime,
};
use crate::sector::SectorOutput;
use crate::SECTOR_SIZE;


/// The volume descriptor standard identifier, "CD001" (ISO9660 § 8.1.2).
pub const ISO_IDENT_CD: &[u8; 5] = b"CD001";

/// Maximum name length of the ISO9660:1999 flavor.
pub const MAX_NAMELEN_1999: usize = 207;

/// Maximum directory nesting depth for ISO9660:1988 (§ 6.8.2.1).
pub const MAX_DIRLEVEL_NORMAL: u8 = 8;

/// Maximum directory nesting depth for ISO9660:1999.
pub const MAX_DIRLEVEL_1999: u8 = 255;

/// The largest byte count a single extent can carry.
///
/// 0xFFFFFFFF does not fit a whole number of sectors; files beyond this need
/// a multi-extent chain (level 3) or are skipped.
pub const MAX_EXTENT_SIZE: u64 = 0xFFFF_F800;

/// Fixed size of a directory record before its file identifier.
pub(crate) const DIR_RECORD_FIXED_LEN: usize = 33;

/// Size of a '.' or '..' directory record (33 bytes plus one name byte).
pub(crate) const SYS_DIR_RECORD_LEN: usize = 34;

/// Fixed size of a path table record before its directory identifier.
pub(crate) const PATHTABLE_RECORD_FIXED_LEN: usize = 8;


/// The type byte of an ISO9660 volume descriptor (§ 8.1.1).
#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum DescriptorType {
    BootRecord = 0x00,
    Primary = 0x01,
    Supplementary = 0x02,
    Partition = 0x03,
    SetTerminator = 0xFF,
    Other(u8),
}

bitflags! {
    /// File flags of a directory record (§ 9.1.6).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct DirRecordFlags : u8 {
        const HIDDEN = 0x01;
        const DIRECTORY = 0x02;
        const ASSOCIATED_FILE = 0x04;
        const RECORD = 0x08;
        const PROTECTION = 0x10;
        const MULTI_EXTENT = 0x80;
    }
}

/// The ISO9660 compliance tier governing name lengths and fragmentation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum InterchangeLevel {
    Level1,
    Level2,
    Level3,
    Iso1999,
}


/// Converts a character to an a-character (§ 7.4.1, appendix A).
///
/// Anything outside the allowed set becomes `_`.
fn make_char_a(c: char) -> u8 {
    let up = c.to_ascii_uppercase();
    match up {
        ' '..='"' | '%'..='9' | 'A'..='Z' | '_' => up as u8,
        _ => b'_',
    }
}

/// Converts a character to a d-character (§ 7.4.1, appendix A).
fn make_char_d(c: char) -> u8 {
    let up = c.to_ascii_uppercase();
    match up {
        '0'..='9' | 'A'..='Z' | '_' => up as u8,
        _ => b'_',
    }
}

/// Overwrites the start of `target` with `source` mapped to a-characters.
fn copy_str_a(target: &mut [u8], source: &str) {
    for (slot, c) in target.iter_mut().zip(source.chars()) {
        *slot = make_char_a(c);
    }
}

/// Overwrites the start of `target` with `source` mapped to d-characters.
fn copy_str_d(target: &mut [u8], source: &str) {
    for (slot, c) in target.iter_mut().zip(source.chars()) {
        *slot = make_char_d(c);
    }
}


/// ISO9660 naming rules and volume-descriptor state for one image.
pub struct Iso9660 {
    inter_level: InterchangeLevel,
    relax_max_dir_level: bool,
    inc_file_ver_info: bool,

    sys_ident: [u8; 32],
    vol_ident: [u8; 32],
    volset_ident: [u8; 128],
    publ_ident: [u8; 128],
    prep_ident: [u8; 128],
    app_ident: [u8; 128],
    copy_file_ident: [u8; 37],
    abst_file_ident: [u8; 37],
    bibl_file_ident: [u8; 37],
}
impl Default for Iso9660 {
    fn default() -> Self {
        Self {
            inter_level: InterchangeLevel::Level1,
            relax_max_dir_level: false,
            inc_file_ver_info: true,
            sys_ident: [0x20; 32],
            vol_ident: [0x20; 32],
            volset_ident: [0x20; 128],
            publ_ident: [0x20; 128],
            prep_ident: [0x20; 128],
            app_ident: [0x20; 128],
            copy_file_ident: [0x20; 37],
            abst_file_ident: [0x20; 37],
            bibl_file_ident: [0x20; 37],
        }
    }
}
impl Iso9660 {
    pub fn set_volume_label(&mut self, label: &str) {
        self.vol_ident = [0x20; 32];
        copy_str_d(&mut self.vol_ident, label);
    }

    pub fn set_text_fields(&mut self, sys_ident: &str, volset_ident: &str, publ_ident: &str, prep_ident: &str) {
        self.sys_ident = [0x20; 32];
        self.volset_ident = [0x20; 128];
        self.publ_ident = [0x20; 128];
        self.prep_ident = [0x20; 128];
        copy_str_a(&mut self.sys_ident, sys_ident);
        copy_str_d(&mut self.volset_ident, volset_ident);
        copy_str_a(&mut self.publ_ident, publ_ident);
        copy_str_a(&mut self.prep_ident, prep_ident);
    }

    pub fn set_file_fields(&mut self, copy_file_ident: &str, abst_file_ident: &str, bibl_file_ident: &str) {
        self.copy_file_ident = [0x20; 37];
        self.abst_file_ident = [0x20; 37];
        self.bibl_file_ident = [0x20; 37];
        copy_str_d(&mut self.copy_file_ident, copy_file_ident);
        copy_str_d(&mut self.abst_file_ident, abst_file_ident);
        copy_str_d(&mut self.bibl_file_ident, bibl_file_ident);
    }

    pub fn set_application_identifier(&mut self, app_ident: &str) {
        self.app_ident = [0x20; 128];
        copy_str_a(&mut self.app_ident, app_ident);
    }

    pub fn set_interchange_level(&mut self, inter_level: InterchangeLevel) {
        self.inter_level = inter_level;
    }

    pub fn set_relax_max_dir_level(&mut self, relax: bool) {
        self.relax_max_dir_level = relax;
    }

    pub fn set_include_file_ver_info(&mut self, include: bool) {
        self.inc_file_ver_info = include;
    }

    /// Converts a file name to an interchange-level-1 name: at most 8
    /// d-characters, an optional `.` and at most 3 extension characters.
    fn file_name_l1(file_name: &str) -> Vec<u8> {
        match file_name.rfind('.') {
            None => file_name.chars().take(8).map(make_char_d).collect(),
            Some(delim) => {
                let stem: Vec<u8> = file_name[..delim].chars().take(8).map(make_char_d).collect();
                let ext: Vec<u8> = file_name[delim + 1..].chars().take(3).map(make_char_d).collect();

                let mut name = stem;
                name.push(b'.');
                name.extend_from_slice(&ext);
                name
            },
        }
    }

    /// Converts a file name to a name of at most `max_len` d-characters,
    /// keeping as much of the extension as fits after the stem.
    fn file_name_generic(file_name: &str, max_len: usize) -> Vec<u8> {
        match file_name.rfind('.') {
            None => file_name.chars().take(max_len).map(make_char_d).collect(),
            Some(delim) => {
                let stem_len = file_name[..delim].chars().count();
                let ext_len = file_name[delim + 1..].chars().count().min(max_len - 1);
                let stem_max = if stem_len < max_len - ext_len {
                    stem_len
                } else {
                    max_len - 1 - ext_len
                };

                let mut name: Vec<u8> =
                    file_name[..delim].chars().take(stem_max).map(make_char_d).collect();
                name.push(b'.');
                name.extend(file_name[delim + 1..].chars().take(ext_len).map(make_char_d));
                name
            },
        }
    }

    /// Converts a directory name; directory identifiers never split on `.`.
    fn dir_name(dir_name: &str, max_len: usize) -> Vec<u8> {
        dir_name.chars().take(max_len).map(make_char_d).collect()
    }

    /// Produces the compatible file name for the configured interchange
    /// level, including the `;1` version suffix where applicable.
    pub fn write_file_name(&self, file_name: &str, is_dir: bool) -> Vec<u8> {
        let mut name = match (self.inter_level, is_dir) {
            (InterchangeLevel::Level1, true) => Self::dir_name(file_name, 8),
            (InterchangeLevel::Level1, false) => Self::file_name_l1(file_name),
            (InterchangeLevel::Level2 | InterchangeLevel::Level3, true) => Self::dir_name(file_name, 31),
            (InterchangeLevel::Level2 | InterchangeLevel::Level3, false) => Self::file_name_generic(file_name, 31),
            (InterchangeLevel::Iso1999, true) => Self::dir_name(file_name, MAX_NAMELEN_1999),
            (InterchangeLevel::Iso1999, false) => Self::file_name_generic(file_name, MAX_NAMELEN_1999),
        };
        // ISO9660:1999 names carry no version information.
        if !is_dir && self.inc_file_ver_info && self.inter_level != InterchangeLevel::Iso1999 {
            name.extend_from_slice(b";1");
        }
        name
    }

    /// Length of the compatible file name without producing it.
    pub fn calc_file_name_len(&self, file_name: &str, is_dir: bool) -> u8 {
        let len = match (self.inter_level, is_dir) {
            (InterchangeLevel::Level1, true) => file_name.chars().count().min(8),
            // The level 1 length depends on where the extension splits, so
            // it comes from the transform itself.
            (InterchangeLevel::Level1, false) => Self::file_name_l1(file_name).len(),
            (InterchangeLevel::Level2 | InterchangeLevel::Level3, _) => file_name.chars().count().min(31),
            (InterchangeLevel::Iso1999, _) => file_name.chars().count().min(MAX_NAMELEN_1999),
        };
        let version_len = if !is_dir && self.inc_file_ver_info && self.inter_level != InterchangeLevel::Iso1999 {
            2
        } else {
            0
        };
        (len + version_len) as u8
    }

    /// The maximum directory nesting depth of the active configuration.
    pub fn max_dir_level(&self) -> u8 {
        if self.relax_max_dir_level {
            MAX_DIRLEVEL_1999
        } else {
            match self.inter_level {
                InterchangeLevel::Iso1999 => MAX_DIRLEVEL_1999,
                _ => MAX_DIRLEVEL_NORMAL,
            }
        }
    }

    /// Whether an ISO9660:1999 supplementary volume descriptor is emitted.
    pub fn has_vol_desc_suppl(&self) -> bool {
        self.inter_level == InterchangeLevel::Iso1999
    }

    /// Whether files may span multiple extents (level 3 only).
    pub fn allows_fragmentation(&self) -> bool {
        self.inter_level == InterchangeLevel::Level3
    }

    pub fn includes_file_ver_info(&self) -> bool {
        self.inc_file_ver_info
    }

    /// Fills in the 34-byte root directory record embedded in a volume
    /// descriptor.
    fn fill_root_dir_record(
        record: &mut [u8],
        create_time: &DateTime<Local>,
        root_extent_loc: u32,
        root_data_len: u32,
    ) {
        record[0] = SYS_DIR_RECORD_LEN as u8;
        write_u32_both(&mut record[2..10], root_extent_loc);
        write_u32_both(&mut record[10..18], root_data_len);
        record[18..25].copy_from_slice(&record_datetime(create_time));
        record[25] = DirRecordFlags::DIRECTORY.bits();
        write_u16_both(&mut record[28..32], 1);
        record[32] = 1;
        record[33] = 0x00;
    }

    /// Fills the fields shared by the primary and the 1999 supplementary
    /// descriptor into a zeroed sector buffer.
    fn fill_vol_desc_body(
        &self,
        sector: &mut [u8],
        create_time: &DateTime<Local>,
        vol_space_size: u32,
        pathtable_size: u32,
        pos_pathtable_l: u32,
        pos_pathtable_m: u32,
        root_extent_loc: u32,
        root_data_len: u32,
    ) {
        sector[1..6].copy_from_slice(ISO_IDENT_CD);
        sector[8..40].copy_from_slice(&self.sys_ident);
        sector[40..72].copy_from_slice(&self.vol_ident);
        write_u32_both(&mut sector[80..88], vol_space_size);
        write_u16_both(&mut sector[120..124], 1); // one disc in the set
        write_u16_both(&mut sector[124..128], 1); // the first disc
        write_u16_both(&mut sector[128..132], SECTOR_SIZE as u16);
        write_u32_both(&mut sector[132..140], pathtable_size);
        write_u32_le(&mut sector[140..144], pos_pathtable_l);
        write_u32_be(&mut sector[148..152], pos_pathtable_m);
        Self::fill_root_dir_record(&mut sector[156..190], create_time, root_extent_loc, root_data_len);
        sector[190..318].copy_from_slice(&self.volset_ident);
        sector[318..446].copy_from_slice(&self.publ_ident);
        sector[446..574].copy_from_slice(&self.prep_ident);
        sector[574..702].copy_from_slice(&self.app_ident);
        sector[702..739].copy_from_slice(&self.copy_file_ident);
        sector[739..776].copy_from_slice(&self.abst_file_ident);
        sector[776..813].copy_from_slice(&self.bibl_file_ident);

        let created = voldesc_datetime(create_time);
        sector[813..830].copy_from_slice(&created);
        sector[830..847].copy_from_slice(&created);
        sector[847..864].copy_from_slice(&zero_voldesc_datetime());
        sector[864..881].copy_from_slice(&zero_voldesc_datetime());

        sector[883..1395].fill(0x20); // application use
    }

    /// Writes the primary volume descriptor (§ 8.4).
    pub fn write_vol_desc_primary<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        create_time: &DateTime<Local>,
        vol_space_size: u32,
        pathtable_size: u32,
        pos_pathtable_l: u32,
        pos_pathtable_m: u32,
        root_extent_loc: u32,
        root_data_len: u32,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        sector[0] = DescriptorType::Primary.to_base_type();
        sector[6] = 1;
        sector[881] = 1; // file structure version
        self.fill_vol_desc_body(
            &mut sector,
            create_time,
            vol_space_size,
            pathtable_size,
            pos_pathtable_l,
            pos_pathtable_m,
            root_extent_loc,
            root_data_len,
        );
        out.write(&sector)
    }

    /// Writes the ISO9660:1999 supplementary volume descriptor: the primary
    /// template with type 2, version 2 and file structure version 2 (§ 8.5).
    pub fn write_vol_desc_suppl<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        create_time: &DateTime<Local>,
        vol_space_size: u32,
        pathtable_size: u32,
        pos_pathtable_l: u32,
        pos_pathtable_m: u32,
        root_extent_loc: u32,
        root_data_len: u32,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        sector[0] = DescriptorType::Supplementary.to_base_type();
        sector[6] = 2;
        sector[881] = 2;
        self.fill_vol_desc_body(
            &mut sector,
            create_time,
            vol_space_size,
            pathtable_size,
            pos_pathtable_l,
            pos_pathtable_m,
            root_extent_loc,
            root_data_len,
        );
        out.write(&sector)
    }

    /// Writes the volume descriptor set terminator (§ 8.3).
    pub fn write_vol_desc_setterm<W: Write>(&self, out: &mut SectorOutput<W>) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        sector[0] = DescriptorType::SetTerminator.to_base_type();
        sector[1..6].copy_from_slice(ISO_IDENT_CD);
        sector[6] = 1;
        out.write(&sector)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn level(level: InterchangeLevel) -> Iso9660 {
        let mut iso = Iso9660::default();
        iso.set_interchange_level(level);
        iso
    }

    #[test]
    fn test_level1_names() {
        let iso = level(InterchangeLevel::Level1);
        assert_eq!(iso.write_file_name("hello.txt", false), b"HELLO.TXT;1");
        assert_eq!(iso.write_file_name("verylongname.text", false), b"VERYLONG.TEX;1");
        assert_eq!(iso.write_file_name("no-extension", false), b"NO_EXTEN;1");
        assert_eq!(iso.write_file_name("archive.tar.gz", false), b"ARCHIVE_.GZ;1");
        assert_eq!(iso.write_file_name("Sub Dir", true), b"SUB_DIR");
        assert_eq!(iso.write_file_name("directory-name", true), b"DIRECTOR");
    }

    #[test]
    fn test_level1_lengths_match_names() {
        let iso = level(InterchangeLevel::Level1);
        for name in ["hello.txt", "verylongname.text", "no-extension", "a.b", "x"] {
            assert_eq!(
                usize::from(iso.calc_file_name_len(name, false)),
                iso.write_file_name(name, false).len(),
                "length mismatch for {:?}", name,
            );
        }
    }

    #[test]
    fn test_level2_names() {
        let iso = level(InterchangeLevel::Level2);
        assert_eq!(
            iso.write_file_name("a-rather-long-file-name-here.txt", false),
            b"A_RATHER_LONG_FILE_NAME_HER.TXT;1",
        );
        assert_eq!(iso.write_file_name("short.txt", false), b"SHORT.TXT;1");
        let long_dir = iso.write_file_name("a-directory-name-way-beyond-31-characters", true);
        assert_eq!(long_dir.len(), 31);
    }

    #[test]
    fn test_1999_names_have_no_version() {
        let iso = level(InterchangeLevel::Iso1999);
        assert_eq!(iso.write_file_name("hello.txt", false), b"HELLO.TXT");
        let long: String = "X".repeat(300);
        assert_eq!(iso.write_file_name(&long, false).len(), MAX_NAMELEN_1999);
        assert_eq!(usize::from(iso.calc_file_name_len(&long, false)), MAX_NAMELEN_1999);
    }

    #[test]
    fn test_level_rules() {
        assert_eq!(level(InterchangeLevel::Level1).max_dir_level(), 8);
        assert_eq!(level(InterchangeLevel::Iso1999).max_dir_level(), 255);
        assert!(!level(InterchangeLevel::Level2).allows_fragmentation());
        assert!(level(InterchangeLevel::Level3).allows_fragmentation());
        assert!(level(InterchangeLevel::Iso1999).has_vol_desc_suppl());

        let mut relaxed = level(InterchangeLevel::Level1);
        relaxed.set_relax_max_dir_level(true);
        assert_eq!(relaxed.max_dir_level(), 255);
    }

    #[test]
    fn test_primary_descriptor_header() {
        let mut iso = level(InterchangeLevel::Level1);
        iso.set_volume_label("my disc");

        let mut buffer = Vec::new();
        let mut out = SectorOutput::new(&mut buffer);
        let time = Local::now();
        iso.write_vol_desc_primary(&mut out, &time, 1234, 10, 19, 20, 21, 2048).unwrap();
        drop(out);

        assert_eq!(buffer.len(), 2048);
        assert_eq!(buffer[0], 0x01);
        assert_eq!(&buffer[1..6], b"CD001");
        assert_eq!(buffer[6], 0x01);
        assert_eq!(&buffer[40..47], b"MY_DISC");
        // Both-byte-order volume space size.
        assert_eq!(&buffer[80..88], &[0xD2, 0x04, 0, 0, 0, 0, 0x04, 0xD2]);
        // Root record length and directory flag.
        assert_eq!(buffer[156], 34);
        assert_eq!(buffer[156 + 25], 0x02);
    }
}

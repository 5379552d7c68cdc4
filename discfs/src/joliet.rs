//! The Joliet extension: a supplementary volume descriptor announcing UCS-2
//! names and its big-endian UCS-2 file-name transform.
//!
//! Joliet reuses the ISO9660 supplementary descriptor layout (type 2,
//! version 1) with the UCS-2 level-3 escape sequence `25 2F 45` and encodes
//! all identifier fields as big-endian UCS-2.


use std::io::{self, Write};

use chrono::{DateTime, Local};

use crate::encoding::{
    record_datetime, voldesc_datetime, write_u16_both, write_u32_be, write_u32_both, write_u32_le,
    zero_voldesc_datetime,
};
use crate::iso9660::{DescriptorType, DirRecordFlags, ISO_IDENT_CD, SYS_DIR_RECORD_LEN};
use crate::sector::SectorOutput;
use crate::SECTOR_SIZE;


/// Maximum file name length in UCS-2 code units per the Joliet
/// specification.
pub const MAX_NAMELEN_NORMAL: usize = 64;

/// Relaxed maximum: 207 bytes of identifier = 101 code units plus the
/// version suffix.
pub const MAX_NAMELEN_RELAXED: usize = 101;


/// Replaces the characters Joliet forbids with `_`.
fn make_unit(unit: u16) -> u16 {
    match unit {
        0x2A | 0x2F | 0x3A | 0x3B | 0x3F | 0x5C => u16::from(b'_'), // * / : ; ? \
        other => other,
    }
}

/// Fills a descriptor text field with big-endian UCS-2 spaces.
fn ucs2_space_fill(buffer: &mut [u8]) {
    for pair in buffer.chunks_exact_mut(2) {
        pair[0] = 0x00;
        pair[1] = 0x20;
    }
}

/// Overwrites the start of `target` with `source` as big-endian UCS-2.
fn copy_str_ucs2(target: &mut [u8], source: &str) {
    for (pair, unit) in target.chunks_exact_mut(2).zip(source.encode_utf16()) {
        let safe = make_unit(unit);
        pair[0] = (safe >> 8) as u8;
        pair[1] = (safe & 0xFF) as u8;
    }
}

/// Encodes UCS-2 code units as big-endian byte pairs.
pub fn units_to_bytes(units: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(units.len() * 2);
    for &unit in units {
        bytes.push((unit >> 8) as u8);
        bytes.push((unit & 0xFF) as u8);
    }
    bytes
}


/// Joliet naming rules and supplementary-descriptor state for one image.
pub struct Joliet {
    inc_file_ver_info: bool,
    max_name_len: usize,

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
impl Default for Joliet {
    fn default() -> Self {
        let mut joliet = Self {
            inc_file_ver_info: true,
            max_name_len: MAX_NAMELEN_NORMAL,
            sys_ident: [0x00; 32],
            vol_ident: [0x00; 32],
            volset_ident: [0x00; 128],
            publ_ident: [0x00; 128],
            prep_ident: [0x00; 128],
            app_ident: [0x00; 128],
            copy_file_ident: [0x00; 37],
            abst_file_ident: [0x00; 37],
            bibl_file_ident: [0x00; 37],
        };
        ucs2_space_fill(&mut joliet.sys_ident);
        ucs2_space_fill(&mut joliet.vol_ident);
        ucs2_space_fill(&mut joliet.volset_ident);
        ucs2_space_fill(&mut joliet.publ_ident);
        ucs2_space_fill(&mut joliet.prep_ident);
        ucs2_space_fill(&mut joliet.app_ident);
        ucs2_space_fill(&mut joliet.copy_file_ident);
        ucs2_space_fill(&mut joliet.abst_file_ident);
        ucs2_space_fill(&mut joliet.bibl_file_ident);
        joliet
    }
}
impl Joliet {
    /// Sets the volume label, truncated to 16 UCS-2 units.
    pub fn set_volume_label(&mut self, label: &str) {
        ucs2_space_fill(&mut self.vol_ident);
        copy_str_ucs2(&mut self.vol_ident, label);
    }

    pub fn set_text_fields(&mut self, sys_ident: &str, volset_ident: &str, publ_ident: &str, prep_ident: &str) {
        ucs2_space_fill(&mut self.sys_ident);
        ucs2_space_fill(&mut self.volset_ident);
        ucs2_space_fill(&mut self.publ_ident);
        ucs2_space_fill(&mut self.prep_ident);
        copy_str_ucs2(&mut self.sys_ident, sys_ident);
        copy_str_ucs2(&mut self.volset_ident, volset_ident);
        copy_str_ucs2(&mut self.publ_ident, publ_ident);
        copy_str_ucs2(&mut self.prep_ident, prep_ident);
    }

    pub fn set_file_fields(&mut self, copy_file_ident: &str, abst_file_ident: &str, bibl_file_ident: &str) {
        ucs2_space_fill(&mut self.copy_file_ident);
        ucs2_space_fill(&mut self.abst_file_ident);
        ucs2_space_fill(&mut self.bibl_file_ident);
        copy_str_ucs2(&mut self.copy_file_ident, copy_file_ident);
        copy_str_ucs2(&mut self.abst_file_ident, abst_file_ident);
        copy_str_ucs2(&mut self.bibl_file_ident, bibl_file_ident);
    }

    pub fn set_application_identifier(&mut self, app_ident: &str) {
        ucs2_space_fill(&mut self.app_ident);
        copy_str_ucs2(&mut self.app_ident, app_ident);
    }

    pub fn set_include_file_ver_info(&mut self, include: bool) {
        self.inc_file_ver_info = include;
    }

    /// Raises the name cap from 64 to 101 code units.
    pub fn set_long_names(&mut self, enable: bool) {
        self.max_name_len = if enable {
            MAX_NAMELEN_RELAXED
        } else {
            MAX_NAMELEN_NORMAL
        };
    }

    pub fn includes_file_ver_info(&self) -> bool {
        self.inc_file_ver_info
    }

    /// Produces the Joliet name as UCS-2 code units, including the `;1`
    /// version suffix for files when configured.
    pub fn write_file_name(&self, file_name: &str, is_dir: bool) -> Vec<u16> {
        let units: Vec<u16> = file_name.encode_utf16().map(make_unit).collect();

        let mut name = if units.len() > self.max_name_len {
            match units.iter().rposition(|&u| u == u16::from(b'.')) {
                Some(delim) => {
                    let ext_len = (units.len() - delim - 1).min(self.max_name_len - 1);
                    let stem_max = if delim < self.max_name_len - ext_len {
                        delim
                    } else {
                        self.max_name_len - 1 - ext_len
                    };

                    let mut truncated = units[..stem_max].to_vec();
                    truncated.push(u16::from(b'.'));
                    truncated.extend_from_slice(&units[delim + 1..delim + 1 + ext_len]);
                    truncated
                },
                None => units[..self.max_name_len].to_vec(),
            }
        } else {
            units
        };

        if !is_dir && self.inc_file_ver_info {
            name.push(u16::from(b';'));
            name.push(u16::from(b'1'));
        }
        name
    }

    /// Length of the Joliet name in code units without producing it.
    pub fn calc_file_name_len(&self, file_name: &str, is_dir: bool) -> u8 {
        let mut len = file_name.encode_utf16().count().min(self.max_name_len);
        if !is_dir && self.inc_file_ver_info {
            len += 2;
        }
        len as u8
    }

    /// Writes the Joliet supplementary volume descriptor.
    pub fn write_vol_desc<W: Write>(
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
        sector[1..6].copy_from_slice(ISO_IDENT_CD);
        sector[6] = 1;
        sector[8..40].copy_from_slice(&self.sys_ident);
        sector[40..72].copy_from_slice(&self.vol_ident);
        write_u32_both(&mut sector[80..88], vol_space_size);

        // UCS-2 level 3 escape sequence.
        sector[88] = 0x25;
        sector[89] = 0x2F;
        sector[90] = 0x45;

        write_u16_both(&mut sector[120..124], 1);
        write_u16_both(&mut sector[124..128], 1);
        write_u16_both(&mut sector[128..132], SECTOR_SIZE as u16);
        write_u32_both(&mut sector[132..140], pathtable_size);
        write_u32_le(&mut sector[140..144], pos_pathtable_l);
        write_u32_be(&mut sector[148..152], pos_pathtable_m);

        let root = &mut sector[156..190];
        root[0] = SYS_DIR_RECORD_LEN as u8;
        write_u32_both(&mut root[2..10], root_extent_loc);
        write_u32_both(&mut root[10..18], root_data_len);
        root[18..25].copy_from_slice(&record_datetime(create_time));
        root[25] = DirRecordFlags::DIRECTORY.bits();
        write_u16_both(&mut root[28..32], 1);
        root[32] = 1;
        root[33] = 0x00;

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

        sector[881] = 1;
        sector[883..1395].fill(0x20);

        out.write(&sector)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn units(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_names_keep_case() {
        let joliet = Joliet::default();
        assert_eq!(joliet.write_file_name("readme.txt", false), units("readme.txt;1"));
        assert_eq!(joliet.write_file_name("Mixed Case Dir", true), units("Mixed Case Dir"));
    }

    #[test]
    fn test_forbidden_characters() {
        let joliet = Joliet::default();
        assert_eq!(joliet.write_file_name("a:b?c", true), units("a_b_c"));
    }

    #[test]
    fn test_truncation_keeps_extension() {
        let joliet = Joliet::default();
        let long = format!("{}.txt", "x".repeat(100));
        let name = joliet.write_file_name(&long, false);
        // 64 units of name plus the two version units.
        assert_eq!(name.len(), 66);
        assert_eq!(&name[60..], units(".txt;1").as_slice());

        let mut relaxed = Joliet::default();
        relaxed.set_long_names(true);
        let name = relaxed.write_file_name(&long, false);
        assert_eq!(name.len(), 103);
    }

    #[test]
    fn test_descriptor_escape_sequence() {
        let mut joliet = Joliet::default();
        joliet.set_volume_label("disc");

        let mut buffer = Vec::new();
        let mut out = SectorOutput::new(&mut buffer);
        let time = Local::now();
        joliet.write_vol_desc(&mut out, &time, 100, 10, 19, 20, 21, 2048).unwrap();
        drop(out);

        assert_eq!(buffer.len(), 2048);
        assert_eq!(buffer[0], 0x02);
        assert_eq!(&buffer[88..91], &[0x25, 0x2F, 0x45]);
        // "disc" in big-endian UCS-2.
        assert_eq!(&buffer[40..48], &[0x00, b'd', 0x00, b'i', 0x00, b's', 0x00, b'c']);
    }
}

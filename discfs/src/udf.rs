//! UDF 1.02 (ECMA-167 / OSTA) structures: descriptor tags with their CRC and
//! checksum, compressed d-strings, entity identifiers, the volume descriptor
//! sequences, anchor pointers, the file set descriptor, file entries and
//! file identifier descriptors.
//!
//! Every full-sector descriptor writer emits exactly one 2048-byte sector
//! (the descriptor followed by zero fill); file identifier descriptors are
//! the exception, as they pack end to end within the directory's sectors.


use std::io::{self, Write};

use chrono::{DateTime, Local};
use crc::Crc;

use crate::bytes_to_sectors;
use crate::encoding::{udf_timestamp, write_u16_le, write_u32_le};
use crate::sector::SectorOutput;
use crate::SECTOR_SIZE;


// Tag identifiers (ECMA-167 3/7.2.1 and 4/7.2.1).
pub const TAGIDENT_PRIMVOLDESC: u16 = 1;
pub const TAGIDENT_ANCHORVOLDESCPTR: u16 = 2;
pub const TAGIDENT_IMPLUSEVOLDESC: u16 = 4;
pub const TAGIDENT_PARTDESC: u16 = 5;
pub const TAGIDENT_LOGICALVOLDESC: u16 = 6;
pub const TAGIDENT_UNALLOCATEDSPACEDESC: u16 = 7;
pub const TAGIDENT_TERMDESC: u16 = 8;
pub const TAGIDENT_LOGICALVOLINTEGRITYDESC: u16 = 9;
pub const TAGIDENT_FILESETDESC: u16 = 256;
pub const TAGIDENT_FILEIDENTDESC: u16 = 257;
pub const TAGIDENT_FILEENTRYDESC: u16 = 261;

/// Descriptor version for NSR02 structures.
const TAG_DESCRIPTOR_VERSION: u16 = 2;

// D-string compression identifiers (OSTA CS0).
const COMPRESSION_BYTE: u8 = 8;
const COMPRESSION_UNICODE: u8 = 16;

// ICB file types (ECMA-167 4/14.6.6).
const ICB_FILETYPE_DIRECTORY: u8 = 4;
const ICB_FILETYPE_RANDOM_BYTES: u8 = 5;

const ICB_STRATEGY_4: u16 = 4;

// ICB flags: bits 0-2 select the allocation descriptor form.
const ICB_FILEFLAG_SHORT_ALLOC_DESC: u16 = 0;
const ICB_FILEFLAG_ARCHIVE: u16 = 1 << 5;

// File characteristics (ECMA-167 4/14.4.3).
const FILECHARFLAG_DIRECTORY: u8 = 1 << 1;
const FILECHARFLAG_PARENT: u8 = 1 << 3;

// Entity identifier flags.
const ENTITYFLAG_DVDVIDEO: u8 = 1 << 1;

/// Unique identifiers 0-15 are reserved (0 belongs to the root).
pub const UNIQUEIDENT_MIN: u64 = 16;

const UDF_REVISION_102: u16 = 0x0102;

/// Read permission for owner, group and other; directories add execute.
const FILE_PERMISSIONS: u32 = (1 << 2) | (1 << 7) | (1 << 12);
const DIR_PERMISSIONS: u32 = FILE_PERMISSIONS | 1 | (1 << 5) | (1 << 10);

const FILE_ENTRY_SIZE: usize = 176;
const SHORT_ALLOC_DESC_SIZE: usize = 8;
const FILE_IDENT_FIXED_SIZE: usize = 38;

const CRC16: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_XMODEM);


/// How readers may treat the partition (ECMA-167 3/10.5.7).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PartAccessType {
    #[default]
    Unknown = 0,
    ReadOnly = 1,
    WriteOnce = 2,
    Rewritable = 3,
    Overwritable = 4,
}


/// Writes the fixed part of a descriptor tag; the CRC and checksum are
/// filled in by [`finish_tag`] once the body is complete.
fn make_tag(buffer: &mut [u8], tag_ident: u16, tag_loc: u32) {
    write_u16_le(&mut buffer[0..2], tag_ident);
    write_u16_le(&mut buffer[2..4], TAG_DESCRIPTOR_VERSION);
    // tag checksum and reserved byte stay zero for now
    write_u16_le(&mut buffer[6..8], 0); // tag serial number
    write_u32_le(&mut buffer[12..16], tag_loc);
}

/// Computes the body CRC and the tag checksum. Must run after every other
/// field of the descriptor has been written.
fn finish_tag(buffer: &mut [u8], crc_len: u16) {
    write_u16_le(&mut buffer[10..12], crc_len);
    let crc = CRC16.checksum(&buffer[16..16 + usize::from(crc_len)]);
    write_u16_le(&mut buffer[8..10], crc);

    // 8-bit sum of the first 16 tag bytes, excluding the checksum itself.
    let mut checksum = 0u8;
    for (i, &byte) in buffer[0..16].iter().enumerate() {
        if i != 4 {
            checksum = checksum.wrapping_add(byte);
        }
    }
    buffer[4] = checksum;
}

/// Writes an extent address: length then location (ECMA-167 3/7.1).
fn write_extent_ad(buffer: &mut [u8], extent_len: u32, extent_loc: u32) {
    write_u32_le(&mut buffer[0..4], extent_len);
    write_u32_le(&mut buffer[4..8], extent_loc);
}

/// Writes a long allocation descriptor (ECMA-167 4/14.14.2): length,
/// partition-local block number, partition reference 0.
fn write_long_ad(buffer: &mut [u8], extent_len: u32, logical_block: u32) {
    write_u32_le(&mut buffer[0..4], extent_len);
    write_u32_le(&mut buffer[4..8], logical_block);
    write_u16_le(&mut buffer[8..10], 0);
}

/// Fills a 64-byte character set specification with "OSTA Compressed
/// Unicode" (UDF 1.02 § 2.1.2).
fn write_charspec(buffer: &mut [u8]) {
    buffer[0] = 0x00;
    let info = b"OSTA Compressed Unicode";
    buffer[1..1 + info.len()].copy_from_slice(info);
    buffer[1 + info.len()..64].fill(0x00);
}

/// Compresses a name into an OSTA CS0 identifier: a compression id byte
/// followed by the code units, 8-bit when every unit fits a byte.
///
/// The result is capped at 255 bytes, the widest length field that refers
/// to it.
fn compress_ident(name: &str) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let wide = units.iter().any(|&u| u > 0xFF);

    let mut out = Vec::with_capacity(1 + units.len() * 2);
    if wide {
        out.push(COMPRESSION_UNICODE);
        for unit in units.iter().take(127) {
            out.push((unit >> 8) as u8);
            out.push((unit & 0xFF) as u8);
        }
    } else {
        out.push(COMPRESSION_BYTE);
        for unit in units.iter().take(254) {
            out.push(*unit as u8);
        }
    }
    out
}

/// Writes a fixed-length d-string field: the compressed identifier at the
/// start, the used byte count in the final byte (UDF 1.02 § 2.1.3).
fn write_dstring(target: &mut [u8], value: &str) {
    target.fill(0x00);
    if value.is_empty() {
        return;
    }
    let mut ident = compress_ident(value);
    ident.truncate(target.len() - 1);
    target[..ident.len()].copy_from_slice(&ident);
    *target.last_mut().unwrap() = ident.len() as u8;
}


/// Which entity an identifier field names.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
enum IdentType {
    /// This implementation.
    Developer,
    /// The logical-volume info block of the implementation-use descriptor.
    LvInfo,
    /// The OSTA domain the volume complies with.
    Domain,
}


/// UDF naming, identity and descriptor emission for one image.
pub struct Udf {
    dvd_video: bool,
    part_access_type: PartAccessType,
    volume_label: String,
}
impl Udf {
    pub fn new(dvd_video: bool) -> Self {
        Self {
            dvd_video,
            part_access_type: PartAccessType::default(),
            volume_label: String::new(),
        }
    }

    pub fn set_volume_label(&mut self, label: &str) {
        self.volume_label = label.to_owned();
    }

    pub fn set_part_access_type(&mut self, access_type: PartAccessType) {
        self.part_access_type = access_type;
    }

    /// Writes a 32-byte entity identifier (ECMA-167 1/7.4).
    fn write_ident(&self, buffer: &mut [u8], ident_type: IdentType) {
        buffer[0..32].fill(0x00);
        match ident_type {
            IdentType::Developer => {
                let name = b"*discfs";
                buffer[1..1 + name.len()].copy_from_slice(name);
                // identifier suffix: operating system class and identifier,
                // both "undefined"
            },
            IdentType::LvInfo => {
                let name = b"*UDF LV Info";
                buffer[1..1 + name.len()].copy_from_slice(name);
                write_u16_le(&mut buffer[24..26], UDF_REVISION_102);
            },
            IdentType::Domain => {
                let name = b"*OSTA UDF Compliant";
                buffer[1..1 + name.len()].copy_from_slice(name);
                write_u16_le(&mut buffer[24..26], UDF_REVISION_102);
                // domain flags: no write protection
            },
        }
    }

    /// Writes the partition content identifier, "+NSR02".
    fn write_partition_content_ident(&self, buffer: &mut [u8]) {
        buffer[0..32].fill(0x00);
        if self.dvd_video {
            buffer[0] = ENTITYFLAG_DVDVIDEO;
        }
        let name = b"+NSR02";
        buffer[1..1 + name.len()].copy_from_slice(name);
    }

    /// The volume set identifier: a unique hex prefix followed by the label
    /// (UDF 1.02 § 2.2.2.5).
    fn volset_ident(&self, create_time: &DateTime<Local>) -> String {
        format!("{:08X}{}", create_time.timestamp() as u32, self.volume_label)
    }

    /// Size in bytes of the three initial volume structure descriptors.
    pub fn vol_desc_initial_size(&self) -> u64 {
        3 * SECTOR_SIZE
    }

    /// Writes the volume recognition sequence: BEA01, NSR02, TEA01
    /// (ECMA-167 2/9.1, 3/9.1), one sector each.
    pub fn write_vol_desc_initial<W: Write>(&self, out: &mut SectorOutput<W>) -> Result<(), io::Error> {
        for ident in [b"BEA01", b"NSR02", b"TEA01"] {
            let mut sector = [0u8; SECTOR_SIZE as usize];
            sector[0] = 0x00;
            sector[1..6].copy_from_slice(ident);
            sector[6] = 0x01;
            out.write(&sector)?;
        }
        Ok(())
    }

    /// Writes the primary volume descriptor (ECMA-167 3/10.1).
    pub fn write_vol_desc_primary<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        voldesc_seqnum: u32,
        sec_loc: u32,
        create_time: &DateTime<Local>,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        make_tag(&mut sector, TAGIDENT_PRIMVOLDESC, sec_loc);
        write_u32_le(&mut sector[16..20], voldesc_seqnum);
        write_u32_le(&mut sector[20..24], 0); // primary volume descriptor number
        write_dstring(&mut sector[24..56], &self.volume_label);
        write_u16_le(&mut sector[56..58], 1); // volume sequence number
        write_u16_le(&mut sector[58..60], 1); // maximum volume sequence number
        write_u16_le(&mut sector[60..62], 2); // interchange level: single volume set
        write_u16_le(&mut sector[62..64], 2);
        write_u32_le(&mut sector[64..68], 1); // character set list
        write_u32_le(&mut sector[68..72], 1);
        write_dstring(&mut sector[72..200], &self.volset_ident(create_time));
        write_charspec(&mut sector[200..264]);
        write_charspec(&mut sector[264..328]);
        // volume abstract and copyright notice extents stay unrecorded
        self.write_ident(&mut sector[344..376], IdentType::Developer);
        sector[376..388].copy_from_slice(&udf_timestamp(create_time));
        self.write_ident(&mut sector[388..420], IdentType::Developer);
        finish_tag(&mut sector, 496);
        out.write(&sector)
    }

    /// Writes the implementation use volume descriptor (UDF 1.02 § 2.2.7).
    pub fn write_vol_desc_impl_use<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        voldesc_seqnum: u32,
        sec_loc: u32,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        make_tag(&mut sector, TAGIDENT_IMPLUSEVOLDESC, sec_loc);
        write_u32_le(&mut sector[16..20], voldesc_seqnum);
        self.write_ident(&mut sector[20..52], IdentType::LvInfo);
        // logical volume information block
        write_charspec(&mut sector[52..116]);
        write_dstring(&mut sector[116..244], &self.volume_label);
        self.write_ident(&mut sector[352..384], IdentType::Developer);
        finish_tag(&mut sector, 496);
        out.write(&sector)
    }

    /// Writes the partition descriptor (ECMA-167 3/10.5).
    pub fn write_vol_desc_partition<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        voldesc_seqnum: u32,
        sec_loc: u32,
        part_start_loc: u32,
        part_len: u32,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        make_tag(&mut sector, TAGIDENT_PARTDESC, sec_loc);
        write_u32_le(&mut sector[16..20], voldesc_seqnum);
        write_u16_le(&mut sector[20..22], 1); // partition flags: allocated
        write_u16_le(&mut sector[22..24], 0); // partition number
        self.write_partition_content_ident(&mut sector[24..56]);
        write_u32_le(&mut sector[184..188], self.part_access_type as u32);
        write_u32_le(&mut sector[188..192], part_start_loc);
        write_u32_le(&mut sector[192..196], part_len);
        self.write_ident(&mut sector[196..228], IdentType::Developer);
        finish_tag(&mut sector, 496);
        out.write(&sector)
    }

    /// Writes the logical volume descriptor with a single type-1 partition
    /// map (ECMA-167 3/10.6).
    pub fn write_vol_desc_logical<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        voldesc_seqnum: u32,
        sec_loc: u32,
        integrity_extent_len: u32,
        integrity_extent_loc: u32,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        make_tag(&mut sector, TAGIDENT_LOGICALVOLDESC, sec_loc);
        write_u32_le(&mut sector[16..20], voldesc_seqnum);
        write_charspec(&mut sector[20..84]);
        write_dstring(&mut sector[84..212], &self.volume_label);
        write_u32_le(&mut sector[212..216], SECTOR_SIZE as u32);
        self.write_ident(&mut sector[216..248], IdentType::Domain);
        // logical volume contents use: the file set descriptor extent, at
        // partition-local block 0
        write_long_ad(&mut sector[248..264], SECTOR_SIZE as u32, 0);
        write_u32_le(&mut sector[264..268], 6); // map table length
        write_u32_le(&mut sector[268..272], 1); // one partition map
        self.write_ident(&mut sector[272..304], IdentType::Developer);
        write_extent_ad(&mut sector[432..440], integrity_extent_len, integrity_extent_loc);
        // type 1 partition map
        sector[440] = 1;
        sector[441] = 6;
        write_u16_le(&mut sector[442..444], 1); // volume sequence number
        write_u16_le(&mut sector[444..446], 0); // partition number
        finish_tag(&mut sector, 430);
        out.write(&sector)
    }

    /// Writes the unallocated space descriptor with no extents
    /// (ECMA-167 3/10.8).
    pub fn write_vol_desc_unalloc<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        voldesc_seqnum: u32,
        sec_loc: u32,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        make_tag(&mut sector, TAGIDENT_UNALLOCATEDSPACEDESC, sec_loc);
        write_u32_le(&mut sector[16..20], voldesc_seqnum);
        write_u32_le(&mut sector[20..24], 0); // no allocation descriptors
        finish_tag(&mut sector, 8);
        out.write(&sector)
    }

    /// Writes the terminating descriptor of a sequence (ECMA-167 3/10.9).
    pub fn write_vol_desc_term<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        sec_loc: u32,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        make_tag(&mut sector, TAGIDENT_TERMDESC, sec_loc);
        finish_tag(&mut sector, 496);
        out.write(&sector)
    }

    /// Writes the logical volume integrity descriptor in the "close" state
    /// (ECMA-167 3/10.10, UDF 1.02 § 2.2.6).
    #[allow(clippy::too_many_arguments)]
    pub fn write_vol_desc_log_integrity<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        sec_loc: u32,
        file_count: u32,
        dir_count: u32,
        part_len: u32,
        next_unique_ident: u64,
        create_time: &DateTime<Local>,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        make_tag(&mut sector, TAGIDENT_LOGICALVOLINTEGRITYDESC, sec_loc);
        sector[16..28].copy_from_slice(&udf_timestamp(create_time));
        write_u32_le(&mut sector[28..32], 1); // integrity type: close
        // next integrity extent stays unrecorded
        sector[40..48].copy_from_slice(&next_unique_ident.to_le_bytes());
        write_u32_le(&mut sector[72..76], 1); // one partition
        write_u32_le(&mut sector[76..80], 46); // implementation use length
        write_u32_le(&mut sector[80..84], 0); // free space table
        write_u32_le(&mut sector[84..88], part_len); // size table
        self.write_ident(&mut sector[88..120], IdentType::Developer);
        write_u32_le(&mut sector[120..124], file_count);
        write_u32_le(&mut sector[124..128], dir_count);
        write_u16_le(&mut sector[128..130], UDF_REVISION_102);
        write_u16_le(&mut sector[130..132], UDF_REVISION_102);
        write_u16_le(&mut sector[132..134], UDF_REVISION_102);
        finish_tag(&mut sector, 118);
        out.write(&sector)
    }

    /// Writes an anchor volume descriptor pointer (ECMA-167 3/10.2).
    pub fn write_anchor_vol_desc_ptr<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        sec_loc: u32,
        main_extent: (u32, u32),
        rsrv_extent: (u32, u32),
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        make_tag(&mut sector, TAGIDENT_ANCHORVOLDESCPTR, sec_loc);
        write_extent_ad(&mut sector[16..24], main_extent.0, main_extent.1);
        write_extent_ad(&mut sector[24..32], rsrv_extent.0, rsrv_extent.1);
        finish_tag(&mut sector, 496);
        out.write(&sector)
    }

    /// Writes the file set descriptor (ECMA-167 4/14.1).
    ///
    /// `sec_loc` and `root_sec_loc` are partition-local; the file set
    /// descriptor occupies partition block 0, the root ICB follows at
    /// block 1.
    pub fn write_file_set_desc<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        sec_loc: u32,
        root_sec_loc: u32,
        create_time: &DateTime<Local>,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        make_tag(&mut sector, TAGIDENT_FILESETDESC, sec_loc);
        sector[16..28].copy_from_slice(&udf_timestamp(create_time));
        write_u16_le(&mut sector[28..30], 3); // interchange level
        write_u16_le(&mut sector[30..32], 3);
        write_u32_le(&mut sector[32..36], 1); // character set list
        write_u32_le(&mut sector[36..40], 1);
        write_u32_le(&mut sector[40..44], 0); // file set number
        write_u32_le(&mut sector[44..48], 0); // file set descriptor number
        write_charspec(&mut sector[48..112]);
        write_dstring(&mut sector[112..240], &self.volume_label);
        write_charspec(&mut sector[240..304]);
        write_dstring(&mut sector[304..336], &self.volume_label);
        // copyright and abstract file identifiers stay empty
        write_long_ad(&mut sector[400..416], SECTOR_SIZE as u32, root_sec_loc);
        self.write_ident(&mut sector[416..448], IdentType::Domain);
        finish_tag(&mut sector, 496);
        out.write(&sector)
    }

    /// Writes a file entry with one short allocation descriptor
    /// (ECMA-167 4/14.9).
    ///
    /// `sec_loc` is the partition-local block of the entry itself;
    /// `info_loc` is the partition-local start of the data it describes
    /// (the identifier block for directories, the file extent for files).
    #[allow(clippy::too_many_arguments)]
    pub fn write_file_entry<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        sec_loc: u32,
        is_dir: bool,
        file_link_count: u16,
        unique_ident: u64,
        info_loc: u32,
        info_len: u64,
        access_time: &DateTime<Local>,
        modify_time: &DateTime<Local>,
        create_time: &DateTime<Local>,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        make_tag(&mut sector, TAGIDENT_FILEENTRYDESC, sec_loc);

        // ICB tag (ECMA-167 4/14.6): strategy 4, one entry, short
        // allocation descriptors.
        write_u16_le(&mut sector[20..22], ICB_STRATEGY_4);
        write_u16_le(&mut sector[24..26], 1);
        sector[27] = if is_dir {
            ICB_FILETYPE_DIRECTORY
        } else {
            ICB_FILETYPE_RANDOM_BYTES
        };
        write_u16_le(&mut sector[34..36], ICB_FILEFLAG_SHORT_ALLOC_DESC | ICB_FILEFLAG_ARCHIVE);

        write_u32_le(&mut sector[36..40], 0xFFFF_FFFF); // uid: none
        write_u32_le(&mut sector[40..44], 0xFFFF_FFFF); // gid: none
        write_u32_le(
            &mut sector[44..48],
            if is_dir { DIR_PERMISSIONS } else { FILE_PERMISSIONS },
        );
        write_u16_le(&mut sector[48..50], file_link_count);
        sector[56..64].copy_from_slice(&info_len.to_le_bytes());
        sector[64..72].copy_from_slice(&bytes_to_sectors(info_len).to_le_bytes());
        sector[72..84].copy_from_slice(&udf_timestamp(access_time));
        sector[84..96].copy_from_slice(&udf_timestamp(modify_time));
        sector[96..108].copy_from_slice(&udf_timestamp(create_time));
        write_u32_le(&mut sector[108..112], 1); // checkpoint
        self.write_ident(&mut sector[128..160], IdentType::Developer);
        sector[160..168].copy_from_slice(&unique_ident.to_le_bytes());
        write_u32_le(&mut sector[172..176], SHORT_ALLOC_DESC_SIZE as u32);
        // the single short allocation descriptor (ECMA-167 4/14.14.1)
        write_u32_le(&mut sector[176..180], info_len as u32);
        write_u32_le(&mut sector[180..184], info_loc);

        finish_tag(&mut sector, (FILE_ENTRY_SIZE + SHORT_ALLOC_DESC_SIZE - 16) as u16);
        out.write(&sector)
    }

    /// Builds a file identifier descriptor, padded to a 4-byte multiple
    /// (ECMA-167 4/14.4).
    fn make_file_ident(
        &self,
        tag_loc: u32,
        file_entry_sec_loc: u32,
        characteristics: u8,
        ident: &[u8],
    ) -> Vec<u8> {
        let total_len = (FILE_IDENT_FIXED_SIZE + ident.len()).next_multiple_of(4);
        let mut buffer = vec![0u8; total_len];
        make_tag(&mut buffer, TAGIDENT_FILEIDENTDESC, tag_loc);
        write_u16_le(&mut buffer[16..18], 1); // file version number
        buffer[18] = characteristics;
        buffer[19] = ident.len() as u8;
        write_long_ad(&mut buffer[20..36], SECTOR_SIZE as u32, file_entry_sec_loc);
        write_u16_le(&mut buffer[36..38], 0); // implementation use length
        buffer[FILE_IDENT_FIXED_SIZE..FILE_IDENT_FIXED_SIZE + ident.len()].copy_from_slice(ident);
        finish_tag(&mut buffer, (total_len - 16) as u16);
        buffer
    }

    /// Writes the '..' identifier of a directory.
    pub fn write_file_ident_parent<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        tag_loc: u32,
        parent_entry_sec_loc: u32,
    ) -> Result<(), io::Error> {
        let ident = self.make_file_ident(
            tag_loc,
            parent_entry_sec_loc,
            FILECHARFLAG_DIRECTORY | FILECHARFLAG_PARENT,
            &[],
        );
        out.write(&ident)
    }

    /// Writes the identifier naming one child of a directory.
    pub fn write_file_ident<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        tag_loc: u32,
        file_entry_sec_loc: u32,
        is_dir: bool,
        file_name: &str,
    ) -> Result<(), io::Error> {
        let characteristics = if is_dir { FILECHARFLAG_DIRECTORY } else { 0x00 };
        let ident = self.make_file_ident(
            tag_loc,
            file_entry_sec_loc,
            characteristics,
            &compress_ident(file_name),
        );
        out.write(&ident)
    }

    /// On-disc size in bytes of a '..' identifier.
    pub fn calc_file_ident_parent_size(&self) -> u64 {
        FILE_IDENT_FIXED_SIZE.next_multiple_of(4) as u64
    }

    /// On-disc size in bytes of the identifier for `file_name`.
    pub fn calc_file_ident_size(&self, file_name: &str) -> u64 {
        (FILE_IDENT_FIXED_SIZE + compress_ident(file_name).len()).next_multiple_of(4) as u64
    }

    /// On-disc size in bytes of a file entry with its single allocation
    /// descriptor.
    pub fn calc_file_entry_size(&self) -> u64 {
        (FILE_ENTRY_SIZE + SHORT_ALLOC_DESC_SIZE) as u64
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        // The CRC-16/XMODEM check value from the catalogue of parametrised
        // CRC algorithms; ECMA-167 uses the same polynomial and seed.
        assert_eq!(CRC16.checksum(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_tag_checksum() {
        let mut buffer = [0u8; 64];
        make_tag(&mut buffer, TAGIDENT_ANCHORVOLDESCPTR, 256);
        finish_tag(&mut buffer, 48);

        let mut sum = 0u8;
        for (i, &byte) in buffer[0..16].iter().enumerate() {
            if i != 4 {
                sum = sum.wrapping_add(byte);
            }
        }
        assert_eq!(buffer[4], sum);
        assert_eq!(u16::from_le_bytes(buffer[0..2].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(buffer[12..16].try_into().unwrap()), 256);
    }

    #[test]
    fn test_compress_ident_widths() {
        assert_eq!(compress_ident("abc"), [8, b'a', b'b', b'c']);

        let wide = compress_ident("ab\u{0142}");
        assert_eq!(wide[0], 16);
        assert_eq!(wide.len(), 7);
        assert_eq!(&wide[1..5], &[0x00, b'a', 0x00, b'b']);
    }

    #[test]
    fn test_ident_sizes() {
        let udf = Udf::new(false);
        assert_eq!(udf.calc_file_ident_parent_size(), 40);
        // 38 + 1 + 9 = 48, already a multiple of four.
        assert_eq!(udf.calc_file_ident_size("video.dat"), 48);
        // 38 + 1 + 1 = 40.
        assert_eq!(udf.calc_file_ident_size("a"), 40);
        assert_eq!(udf.calc_file_entry_size(), 184);
    }

    #[test]
    fn test_dstring_length_byte() {
        let mut buffer = [0xFFu8; 32];
        write_dstring(&mut buffer, "DISC");
        assert_eq!(buffer[0], 8);
        assert_eq!(&buffer[1..5], b"DISC");
        assert_eq!(buffer[31], 5);

        write_dstring(&mut buffer, "");
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_file_entry_layout() {
        let udf = Udf::new(false);
        let mut buffer = Vec::new();
        let mut out = SectorOutput::new(&mut buffer);
        let time = Local::now();
        udf.write_file_entry(&mut out, 5, false, 1, 16, 1000, 4096, &time, &time, &time).unwrap();
        drop(out);

        assert_eq!(buffer.len(), 2048);
        assert_eq!(u16::from_le_bytes(buffer[0..2].try_into().unwrap()), TAGIDENT_FILEENTRYDESC);
        // ICB file type: random bytes (a regular file).
        assert_eq!(buffer[27], 5);
        // Information length and the allocation descriptor.
        assert_eq!(u64::from_le_bytes(buffer[56..64].try_into().unwrap()), 4096);
        assert_eq!(u32::from_le_bytes(buffer[176..180].try_into().unwrap()), 4096);
        assert_eq!(u32::from_le_bytes(buffer[180..184].try_into().unwrap()), 1000);
    }
}

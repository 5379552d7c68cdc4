//! El Torito bootable-CD support: the boot-record volume descriptor, the
//! boot catalog (validation entry, default entry, section headers/entries)
//! and the boot-image data region.


use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use from_to_repr::from_to_other;
use tracing::error;

use crate::bytes_to_sectors;
use crate::encoding::{write_u16_le, write_u32_le};
use crate::error::ImageError;
use crate::iso9660::{DescriptorType, ISO_IDENT_CD};
use crate::sector::SectorOutput;
use crate::SECTOR_SIZE;


/// The boot system identifier of the boot record descriptor.
pub const IDENT_ELTORITO: &[u8] = b"EL TORITO SPECIFICATION";

/// One default image plus at most 0xFFFF section entries.
pub const MAX_BOOT_IMAGE_COUNT: usize = 0xFFFF + 2;

const BOOT_INDICATOR_BOOTABLE: u8 = 0x88;
const BOOT_INDICATOR_NONBOOTABLE: u8 = 0x00;

const HEADER_NORMAL: u8 = 0x90;
const HEADER_FINAL: u8 = 0x91;

const PLATFORM_80X86: u8 = 0;

const MBR_PARTITION_COUNT: usize = 4;

const IO_BUFFER_SIZE: usize = 0x10000;


/// The emulation byte of a catalog entry.
#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum EmulationCode {
    NoEmulation = 0,
    Diskette12 = 1,
    Diskette144 = 2,
    Diskette288 = 3,
    HardDisk = 4,
    Other(u8),
}

/// How the BIOS should present a boot image.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum BootEmulation {
    None,
    Floppy,
    HardDisk,
}

/// One boot image of the catalog.
#[derive(Clone, Debug)]
pub struct BootImage {
    pub path: PathBuf,
    pub bootable: bool,
    pub emulation: BootEmulation,
    pub load_segment: u16,
    pub sec_count: u16,
    /// Source size in bytes, taken when the image was added.
    pub size: u64,
}

/// The El Torito boot catalog under construction.
#[derive(Clone, Debug, Default)]
pub struct ElTorito {
    images: Vec<BootImage>,
}
impl ElTorito {
    /// Reads the partition type byte out of a boot image's MBR.
    ///
    /// The image must end in the 0x55 0xAA signature and contain exactly one
    /// used partition entry.
    fn read_sys_type_mbr(path: &Path) -> Result<u8, ImageError> {
        let mut mbr = [0u8; 512];
        File::open(path)
            .and_then(|mut f| f.read_exact(&mut mbr))
            .map_err(|error| ImageError::SourceRead { path: path.to_owned(), error })?;

        if mbr[510] != 0x55 || mbr[511] != 0xAA {
            error!("unable to locate MBR in boot image {:?}", path);
            return Err(ImageError::InvalidMasterBootRecord { path: path.to_owned() });
        }

        let mut sys_type = None;
        for i in 0..MBR_PARTITION_COUNT {
            let part_type = mbr[446 + i * 16 + 4];
            if part_type != 0 {
                if sys_type.is_some() {
                    error!("boot image {:?} contains more than one partition", path);
                    return Err(ImageError::InvalidMasterBootRecord { path: path.to_owned() });
                }
                sys_type = Some(part_type);
            }
        }

        sys_type.ok_or_else(|| {
            error!("boot image {:?} contains no used partition", path);
            ImageError::InvalidMasterBootRecord { path: path.to_owned() }
        })
    }

    fn image_size(path: &Path) -> Result<u64, ImageError> {
        fs::metadata(path)
            .map(|m| m.len())
            .map_err(|error| ImageError::SourceRead { path: path.to_owned(), error })
    }

    fn push_image(&mut self, image: BootImage) -> Result<(), ImageError> {
        if self.images.len() >= MAX_BOOT_IMAGE_COUNT {
            return Err(ImageError::BootImageLimitReached);
        }
        self.images.push(image);
        Ok(())
    }

    /// Adds a no-emulation image with an explicit load segment and sector
    /// count.
    pub fn add_image_no_emulation(
        &mut self,
        path: &Path,
        bootable: bool,
        load_segment: u16,
        sec_count: u16,
    ) -> Result<(), ImageError> {
        let size = Self::image_size(path)?;
        self.push_image(BootImage {
            path: path.to_owned(),
            bootable,
            emulation: BootEmulation::None,
            load_segment,
            sec_count,
            size,
        })
    }

    /// Adds a floppy-emulation image; only 1200, 1440 and 2880 KiB images
    /// are representable. The BIOS loads one virtual sector.
    pub fn add_image_floppy(&mut self, path: &Path, bootable: bool) -> Result<(), ImageError> {
        let size = Self::image_size(path)?;
        Self::floppy_emulation_code(size)
            .ok_or_else(|| ImageError::InvalidFloppyImageSize { path: path.to_owned(), size })?;
        self.push_image(BootImage {
            path: path.to_owned(),
            bootable,
            emulation: BootEmulation::Floppy,
            load_segment: 0,
            sec_count: 1,
            size,
        })
    }

    /// Adds a hard-disk-emulation image; its MBR is validated immediately.
    /// The BIOS loads one virtual sector (the MBR).
    pub fn add_image_hard_disk(&mut self, path: &Path, bootable: bool) -> Result<(), ImageError> {
        let size = Self::image_size(path)?;
        Self::read_sys_type_mbr(path)?;
        self.push_image(BootImage {
            path: path.to_owned(),
            bootable,
            emulation: BootEmulation::HardDisk,
            load_segment: 0,
            sec_count: 1,
            size,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Size of the boot catalog in bytes: the validation and default entries
    /// for the first image, a section header and entry for each further one.
    pub fn boot_cat_size(&self) -> u64 {
        (self.images.len() as u64) << 6
    }

    /// Size of the boot data region in bytes; every image starts on a sector
    /// boundary.
    pub fn boot_data_size(&self) -> u64 {
        self.images
            .iter()
            .map(|image| bytes_to_sectors(image.size) * SECTOR_SIZE)
            .sum()
    }

    /// The start sector of every image when the data region begins at
    /// `data_start_sector`.
    fn image_start_sectors(&self, data_start_sector: u64) -> Vec<u64> {
        let mut starts = Vec::with_capacity(self.images.len());
        let mut sector = data_start_sector;
        for image in &self.images {
            starts.push(sector);
            sector += bytes_to_sectors(image.size);
        }
        starts
    }

    fn floppy_emulation_code(size: u64) -> Option<EmulationCode> {
        match size {
            s if s == 1200 * 1024 => Some(EmulationCode::Diskette12),
            s if s == 1440 * 1024 => Some(EmulationCode::Diskette144),
            s if s == 2880 * 1024 => Some(EmulationCode::Diskette288),
            _ => None,
        }
    }

    /// The emulation code and system type byte of a catalog entry.
    fn entry_emulation(image: &BootImage) -> Result<(EmulationCode, u8), ImageError> {
        match image.emulation {
            BootEmulation::None => Ok((EmulationCode::NoEmulation, 0)),
            BootEmulation::Floppy => {
                let code = Self::floppy_emulation_code(image.size)
                    .ok_or_else(|| ImageError::InvalidFloppyImageSize {
                        path: image.path.clone(),
                        size: image.size,
                    })?;
                Ok((code, 0))
            },
            BootEmulation::HardDisk => {
                let sys_type = Self::read_sys_type_mbr(&image.path)?;
                Ok((EmulationCode::HardDisk, sys_type))
            },
        }
    }

    /// Writes the boot record volume descriptor pointing at the catalog.
    pub fn write_boot_record<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        boot_cat_sector: u32,
    ) -> Result<(), io::Error> {
        let mut sector = [0u8; SECTOR_SIZE as usize];
        sector[0] = DescriptorType::BootRecord.to_base_type();
        sector[1..6].copy_from_slice(ISO_IDENT_CD);
        sector[6] = 1;
        sector[7..7 + IDENT_ELTORITO.len()].copy_from_slice(IDENT_ELTORITO);
        write_u32_le(&mut sector[71..75], boot_cat_sector);
        out.write(&sector)
    }

    /// Fills the shared part of a default or section entry.
    fn fill_boot_entry(entry: &mut [u8; 32], image: &BootImage, code: EmulationCode, sys_type: u8, start_sector: u32) {
        entry[0] = if image.bootable {
            BOOT_INDICATOR_BOOTABLE
        } else {
            BOOT_INDICATOR_NONBOOTABLE
        };
        entry[1] = code.to_base_type();
        write_u16_le(&mut entry[2..4], image.load_segment);
        entry[4] = sys_type;
        write_u16_le(&mut entry[6..8], image.sec_count);
        write_u32_le(&mut entry[8..12], start_sector);
    }

    /// Writes the boot catalog sector.
    ///
    /// `data_start_sector` is the first sector of the boot data region; the
    /// load addresses of all entries are derived from it.
    pub fn write_boot_catalog<W: Write>(
        &self,
        out: &mut SectorOutput<W>,
        data_start_sector: u64,
    ) -> Result<(), ImageError> {
        let starts = self.image_start_sectors(data_start_sector);
        if let Some(&end) = starts.last() {
            if end > u64::from(u32::MAX) {
                return Err(ImageError::SectorRangeTooLarge { start: data_start_sector, end });
            }
        }

        // Validation entry: the checksum makes the 16-bit word sum zero.
        let mut validation = [0u8; 32];
        validation[0] = 0x01;
        validation[1] = PLATFORM_80X86;
        validation[4..10].copy_from_slice(b"DISCFS");
        validation[30] = 0x55;
        validation[31] = 0xAA;

        let mut word_sum = 0u16;
        for pair in validation.chunks_exact(2) {
            word_sum = word_sum.wrapping_add(u16::from_le_bytes(pair.try_into().unwrap()));
        }
        write_u16_le(&mut validation[28..30], 0u16.wrapping_sub(word_sum));

        out.write(&validation).map_err(ImageError::SinkWrite)?;

        // The default boot entry.
        let default_image = &self.images[0];
        let (code, sys_type) = Self::entry_emulation(default_image)?;
        let mut entry = [0u8; 32];
        Self::fill_boot_entry(&mut entry, default_image, code, sys_type, starts[0] as u32);
        out.write(&entry).map_err(ImageError::SinkWrite)?;

        // One section per remaining image.
        for (index, image) in self.images.iter().enumerate().skip(1) {
            let mut header = [0u8; 32];
            header[0] = if index == self.images.len() - 1 {
                HEADER_FINAL
            } else {
                HEADER_NORMAL
            };
            header[1] = PLATFORM_80X86;
            write_u16_le(&mut header[2..4], 1);
            let ident = format!("IMAGE{}", index + 1);
            header[4..4 + ident.len()].copy_from_slice(ident.as_bytes());
            out.write(&header).map_err(ImageError::SinkWrite)?;

            let (code, sys_type) = Self::entry_emulation(image)?;
            let mut entry = [0u8; 32];
            Self::fill_boot_entry(&mut entry, image, code, sys_type, starts[index] as u32);
            out.write(&entry).map_err(ImageError::SinkWrite)?;
        }

        if out.allocated() != 0 {
            out.pad_sector().map_err(ImageError::SinkWrite)?;
        }
        Ok(())
    }

    /// Copies every boot image into the data region, sector padded.
    pub fn write_boot_images<W: Write>(&self, out: &mut SectorOutput<W>) -> Result<(), ImageError> {
        for image in &self.images {
            let mut source = File::open(&image.path)
                .map_err(|error| ImageError::SourceRead { path: image.path.clone(), error })?;

            let mut buffer = vec![0u8; IO_BUFFER_SIZE];
            loop {
                let read = source
                    .read(&mut buffer)
                    .map_err(|error| ImageError::SourceRead { path: image.path.clone(), error })?;
                if read == 0 {
                    break;
                }
                out.write(&buffer[..read]).map_err(ImageError::SinkWrite)?;
            }

            if out.allocated() != 0 {
                out.pad_sector().map_err(ImageError::SinkWrite)?;
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn temp_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_validation_entry_checksum_is_zero_sum() {
        let boot = temp_file(&[0xEBu8; 4096]);
        let mut eltorito = ElTorito::default();
        eltorito.add_image_no_emulation(boot.path(), true, 0x07C0, 4).unwrap();

        let mut buffer = Vec::new();
        let mut out = SectorOutput::new(&mut buffer);
        eltorito.write_boot_catalog(&mut out, 22).unwrap();
        drop(out);

        assert_eq!(buffer.len(), 2048);
        let mut word_sum = 0u16;
        for pair in buffer[0..32].chunks_exact(2) {
            word_sum = word_sum.wrapping_add(u16::from_le_bytes(pair.try_into().unwrap()));
        }
        assert_eq!(word_sum, 0);
        assert_eq!(buffer[30], 0x55);
        assert_eq!(buffer[31], 0xAA);

        // Default entry: bootable, no emulation, segment 0x07C0, 4 sectors,
        // load address 22.
        assert_eq!(buffer[32], 0x88);
        assert_eq!(buffer[33], 0);
        assert_eq!(&buffer[34..36], &[0xC0, 0x07]);
        assert_eq!(&buffer[38..40], &[4, 0]);
        assert_eq!(&buffer[40..44], &[22, 0, 0, 0]);
    }

    #[test]
    fn test_floppy_size_validation() {
        let bad = temp_file(&[0u8; 4096]);
        let mut eltorito = ElTorito::default();
        let error = eltorito.add_image_floppy(bad.path(), true).unwrap_err();
        assert!(matches!(error, ImageError::InvalidFloppyImageSize { .. }));
    }

    #[test]
    fn test_hard_disk_needs_single_partition() {
        let mut mbr = vec![0u8; 512];
        mbr[510] = 0x55;
        mbr[511] = 0xAA;
        mbr[446 + 4] = 0x0C;
        let image = temp_file(&mbr);

        let mut eltorito = ElTorito::default();
        eltorito.add_image_hard_disk(image.path(), true).unwrap();

        // A second used partition entry makes the image invalid.
        mbr[446 + 16 + 4] = 0x83;
        let two_parts = temp_file(&mbr);
        let error = eltorito.add_image_hard_disk(two_parts.path(), true).unwrap_err();
        assert!(matches!(error, ImageError::InvalidMasterBootRecord { .. }));
    }

    #[test]
    fn test_section_headers() {
        let a = temp_file(&[1u8; 512]);
        let b = temp_file(&[2u8; 512]);
        let c = temp_file(&[3u8; 512]);

        let mut eltorito = ElTorito::default();
        eltorito.add_image_no_emulation(a.path(), true, 0, 1).unwrap();
        eltorito.add_image_no_emulation(b.path(), false, 0, 1).unwrap();
        eltorito.add_image_no_emulation(c.path(), true, 0, 1).unwrap();
        assert_eq!(eltorito.boot_cat_size(), 3 * 64);
        assert_eq!(eltorito.boot_data_size(), 3 * 2048);

        let mut buffer = Vec::new();
        let mut out = SectorOutput::new(&mut buffer);
        eltorito.write_boot_catalog(&mut out, 100).unwrap();
        drop(out);

        // Second image: normal header, nonbootable entry at sector 101.
        assert_eq!(buffer[64], 0x90);
        assert_eq!(&buffer[68..74], b"IMAGE2");
        assert_eq!(buffer[96], 0x00);
        assert_eq!(&buffer[104..108], &[101, 0, 0, 0]);
        // Third image: final header, entry at sector 102.
        assert_eq!(buffer[128], 0x91);
        assert_eq!(buffer[160], 0x88);
        assert_eq!(&buffer[168..172], &[102, 0, 0, 0]);
    }
}

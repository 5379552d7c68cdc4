use std::fmt;
use std::io;
use std::path::PathBuf;


/// The broad category of an [`ImageError`].
///
/// Several concrete failures share a category; callers that only care about
/// the rough cause (e.g. "the input was bad" versus "the image does not fit
/// the on-disc integer widths") can match on this instead of the full enum.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    InvalidInput,
    SourceRead,
    SinkWrite,
    ImageTooLarge,
    ElToritoInvalid,
    Cancelled,
}

#[derive(Debug)]
pub enum ImageError {
    /// Two file-set entries share the same internal path.
    DuplicatePath { internal_path: String },
    /// A file-set entry references a parent directory that was never added.
    UnknownParent { internal_path: String },
    /// An input file could not be opened or read.
    SourceRead { path: PathBuf, error: io::Error },
    /// The output sink reported a write failure.
    SinkWrite(io::Error),
    /// A path table grew beyond the 32-bit size field.
    PathTableTooLarge { normal: u64, joliet: u64 },
    /// A sector reference does not fit in 32 bits.
    SectorRangeTooLarge { start: u64, end: u64 },
    /// The root directory extent does not fit in the 32-bit data length.
    RootDirectoryTooLarge { bytes: u64 },
    /// The UDF partition does not fit in 32 bits of sectors.
    UdfPartitionTooLarge { sectors: u64 },
    /// ISO9660 structures extend past the fixed UDF anchor position.
    StructuresOverlapAnchor { next_free: u64, anchor: u64 },
    /// More than 65537 El Torito boot images were added.
    BootImageLimitReached,
    /// A floppy-emulation boot image is not 1200, 1440 or 2880 KiB.
    InvalidFloppyImageSize { path: PathBuf, size: u64 },
    /// A hard-disk-emulation boot image has no valid single-partition MBR.
    InvalidMasterBootRecord { path: PathBuf },
    /// A previous-session image could not be parsed as ISO9660.
    InvalidSourceImage { detail: String },
    /// A DVD-Video IFO file is missing, unreadable or inconsistent.
    InvalidIfoData { path: PathBuf, detail: String },
    /// The progress sink requested cancellation.
    Cancelled,
}
impl ImageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicatePath { .. } => ErrorKind::InvalidInput,
            Self::UnknownParent { .. } => ErrorKind::InvalidInput,
            Self::SourceRead { .. } => ErrorKind::SourceRead,
            Self::SinkWrite(_) => ErrorKind::SinkWrite,
            Self::PathTableTooLarge { .. } => ErrorKind::ImageTooLarge,
            Self::SectorRangeTooLarge { .. } => ErrorKind::ImageTooLarge,
            Self::RootDirectoryTooLarge { .. } => ErrorKind::ImageTooLarge,
            Self::UdfPartitionTooLarge { .. } => ErrorKind::ImageTooLarge,
            Self::StructuresOverlapAnchor { .. } => ErrorKind::ImageTooLarge,
            Self::BootImageLimitReached => ErrorKind::ElToritoInvalid,
            Self::InvalidFloppyImageSize { .. } => ErrorKind::ElToritoInvalid,
            Self::InvalidMasterBootRecord { .. } => ErrorKind::ElToritoInvalid,
            Self::InvalidSourceImage { .. } => ErrorKind::InvalidInput,
            Self::InvalidIfoData { .. } => ErrorKind::InvalidInput,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}
impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicatePath { internal_path }
                => write!(f, "duplicate internal path {:?}", internal_path),
            Self::UnknownParent { internal_path }
                => write!(f, "missing parent directory for {:?}", internal_path),
            Self::SourceRead { path, error }
                => write!(f, "failed to read source file {:?}: {}", path, error),
            Self::SinkWrite(e)
                => write!(f, "failed to write to image sink: {}", e),
            Self::PathTableTooLarge { normal, joliet }
                => write!(f, "path table too large ({} and {} bytes)", normal, joliet),
            Self::SectorRangeTooLarge { start, end }
                => write!(f, "sector range {} to {} exceeds 32 bits", start, end),
            Self::RootDirectoryTooLarge { bytes }
                => write!(f, "root directory extent of {} bytes exceeds 32 bits", bytes),
            Self::UdfPartitionTooLarge { sectors }
                => write!(f, "UDF partition of {} sectors exceeds 32 bits", sectors),
            Self::StructuresOverlapAnchor { next_free, anchor }
                => write!(f, "file system structures reach sector {} past the UDF anchor at sector {}", next_free, anchor),
            Self::BootImageLimitReached
                => write!(f, "the maximum number of El Torito boot images has been reached"),
            Self::InvalidFloppyImageSize { path, size }
                => write!(f, "boot image {:?} has size {} which is not a supported floppy size", path, size),
            Self::InvalidMasterBootRecord { path }
                => write!(f, "boot image {:?} does not contain a valid single-partition MBR", path),
            Self::InvalidSourceImage { detail }
                => write!(f, "invalid ISO9660 source image: {}", detail),
            Self::InvalidIfoData { path, detail }
                => write!(f, "invalid DVD-Video IFO data in {:?}: {}", path, detail),
            Self::Cancelled
                => write!(f, "the operation was cancelled"),
        }
    }
}
impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SourceRead { error, .. } => Some(error),
            Self::SinkWrite(e) => Some(e),
            _ => None,
        }
    }
}

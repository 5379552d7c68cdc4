//! Predicting on-disc names without building an image.
//!
//! Front ends want to show what a requested name will look like on the
//! finished disc before anything is written. This mirrors the name
//! selection of the writers: when UDF is part of the image its namespace
//! preserves the requested name, otherwise the Joliet or ISO9660 transform
//! applies. Sibling uniqueness is not simulated here since it depends on
//! the whole directory's contents.


use crate::iso9660::{InterchangeLevel, Iso9660};
use crate::joliet::Joliet;
use crate::writer::FileSystemType;


/// Maximum preserved UDF name length in code units; one byte of the
/// on-disc identifier is the compression descriptor.
const UDF_PREVIEW_NAMELEN: usize = 254 / 2;

/// Predicts the names a [`FileSystem`](crate::FileSystem) configuration
/// will produce.
pub struct NamePreview {
    fs_type: FileSystemType,
    iso9660: Iso9660,
    joliet: Joliet,
}
impl NamePreview {
    pub fn new(
        fs_type: FileSystemType,
        include_file_ver_info: bool,
        long_joliet_names: bool,
        inter_level: InterchangeLevel,
    ) -> Self {
        let mut iso9660 = Iso9660::default();
        iso9660.set_include_file_ver_info(include_file_ver_info);
        iso9660.set_interchange_level(inter_level);

        let mut joliet = Joliet::default();
        joliet.set_include_file_ver_info(include_file_ver_info);
        joliet.set_long_names(long_joliet_names);

        Self {
            fs_type,
            iso9660,
            joliet,
        }
    }

    fn uses_udf(&self) -> bool {
        matches!(
            self.fs_type,
            FileSystemType::Iso9660Udf
                | FileSystemType::Iso9660UdfJoliet
                | FileSystemType::Udf
                | FileSystemType::DvdVideo,
        )
    }

    fn uses_joliet(&self) -> bool {
        matches!(
            self.fs_type,
            FileSystemType::Iso9660Joliet | FileSystemType::Iso9660UdfJoliet,
        )
    }

    /// The name a single file or directory will carry on the disc.
    ///
    /// The most capable namespace of the configuration wins: UDF keeps the
    /// requested name, Joliet keeps its case, plain ISO9660 cripples it.
    pub fn file_name(&self, requested: &str, is_dir: bool) -> String {
        if self.uses_udf() {
            requested.chars().take(UDF_PREVIEW_NAMELEN).collect()
        } else if self.uses_joliet() {
            String::from_utf16_lossy(&self.joliet.write_file_name(requested, is_dir))
        } else {
            String::from_utf8_lossy(&self.iso9660.write_file_name(requested, is_dir)).into_owned()
        }
    }

    /// The full on-disc path of a requested internal path.
    ///
    /// Every component but the last is transformed as a directory name; the
    /// file name loses its version suffix.
    pub fn file_path(&self, requested_path: &str) -> String {
        let mut components: Vec<&str> = requested_path
            .split(['/', '\\'])
            .filter(|c| !c.is_empty())
            .collect();
        let file = components.pop().unwrap_or("");

        let mut path = String::new();
        for component in components {
            path.push('/');
            path.push_str(&self.file_name(component, true));
        }

        let mut file_name = self.file_name(file, false);
        if let Some(pos) = file_name.len().checked_sub(2) {
            if file_name.as_bytes()[pos] == b';' {
                file_name.truncate(pos);
            }
        }
        path.push('/');
        path.push_str(&file_name);
        path
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_level1_preview() {
        let preview = NamePreview::new(FileSystemType::Iso9660, true, false, InterchangeLevel::Level1);
        assert_eq!(preview.file_name("hello.txt", false), "HELLO.TXT;1");
        assert_eq!(preview.file_name("Sub Dir", true), "SUB_DIR");
        assert_eq!(preview.file_path("/photos/Holiday Snap.jpeg"), "/PHOTOS/HOLIDAY_.JPE");
    }

    #[test]
    fn test_joliet_preview_keeps_case() {
        let preview =
            NamePreview::new(FileSystemType::Iso9660Joliet, true, false, InterchangeLevel::Level1);
        assert_eq!(preview.file_name("Holiday Snap.jpeg", false), "Holiday Snap.jpeg;1");
        assert_eq!(preview.file_path("/photos/Holiday Snap.jpeg"), "/photos/Holiday Snap.jpeg");
    }

    #[test]
    fn test_udf_preview_passes_through() {
        let preview =
            NamePreview::new(FileSystemType::Iso9660UdfJoliet, true, false, InterchangeLevel::Level1);
        assert_eq!(preview.file_name("mixed Case name.bin", false), "mixed Case name.bin");
        assert_eq!(preview.file_path("/a/b.c"), "/a/b.c");
    }

    #[test]
    fn test_version_suffix_only_stripped_when_present() {
        let preview =
            NamePreview::new(FileSystemType::Iso9660, false, false, InterchangeLevel::Level2);
        // Without version info there is no ';' to strip; the name must
        // survive untouched.
        assert_eq!(preview.file_path("/dir/file.txt"), "/DIR/FILE.TXT");
    }
}

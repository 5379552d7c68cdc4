use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::Parser;
use discfs::iso9660::InterchangeLevel;
use discfs::{
    FileSet, FileSystem, FileSystemType, FileSystemWriter, Iso9660Reader, Progress, Status,
};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;


#[derive(Parser)]
#[command(about = "Builds an optical-disc file system image from a directory tree.")]
struct Opts {
    /// The directory whose contents go into the image.
    pub source_dir: PathBuf,

    /// Where to write the image.
    pub output_file: PathBuf,

    /// Volume label of the image.
    #[arg(long, default_value = "DISC")]
    pub volume_label: String,

    /// Add a Joliet name extension.
    #[arg(long)]
    pub joliet: bool,

    /// Add a UDF file system (combined with ISO9660 unless --udf-only).
    #[arg(long)]
    pub udf: bool,

    /// Write a UDF-only image.
    #[arg(long)]
    pub udf_only: bool,

    /// Build a DVD-Video compatible image (implies UDF).
    #[arg(long)]
    pub dvd_video: bool,

    /// ISO9660 interchange level: 1, 2, 3 or 1999.
    #[arg(long, default_value = "1")]
    pub level: String,

    /// A no-emulation El Torito boot image.
    #[arg(long)]
    pub boot_image: Option<PathBuf>,

    /// A previous-session image whose files are carried into this session.
    #[arg(long)]
    pub import_session: Option<PathBuf>,

    /// The sector the written session will start at on the medium.
    #[arg(long, default_value_t = 0)]
    pub session_start: u32,

    /// Load segment of the boot image.
    #[arg(long, default_value_t = 0x07C0)]
    pub boot_load_segment: u16,

    /// Virtual sectors the BIOS loads from the boot image.
    #[arg(long, default_value_t = 4)]
    pub boot_sector_count: u16,
}

/// Prints phase changes and warnings to the terminal.
struct ConsoleProgress;
impl Progress for ConsoleProgress {
    fn status(&mut self, status: Status) {
        println!("{}...", status);
    }

    fn warning(&mut self, message: &str) {
        eprintln!("warning: {}", message);
    }
}

/// Walks `base_path` and inserts everything below it into the file set.
fn add_files(file_set: &mut FileSet, base_path: &Path) -> Result<(), std::io::Error> {
    let mut dir_stack = vec![base_path.to_path_buf()];
    while let Some(dir) = dir_stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let host_path = entry.path();
            let relative = host_path
                .strip_prefix(base_path)
                .expect("walked entry outside the base path");
            let internal_path = format!("/{}", relative.to_string_lossy().replace('\\', "/"));

            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                file_set
                    .add_directory(&internal_path, host_path.clone())
                    .expect("duplicate directory path");
                dir_stack.push(host_path);
            } else {
                file_set
                    .add_file(&internal_path, host_path, metadata.len())
                    .expect("duplicate file path");
            }
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let fs_type = if opts.dvd_video {
        FileSystemType::DvdVideo
    } else if opts.udf_only {
        FileSystemType::Udf
    } else {
        match (opts.udf, opts.joliet) {
            (true, true) => FileSystemType::Iso9660UdfJoliet,
            (true, false) => FileSystemType::Iso9660Udf,
            (false, true) => FileSystemType::Iso9660Joliet,
            (false, false) => FileSystemType::Iso9660,
        }
    };
    let level = match opts.level.as_str() {
        "1" => InterchangeLevel::Level1,
        "2" => InterchangeLevel::Level2,
        "3" => InterchangeLevel::Level3,
        "1999" => InterchangeLevel::Iso1999,
        other => panic!("unsupported interchange level {:?}", other),
    };

    let mut file_set = FileSet::new();
    if let Some(import_path) = &opts.import_session {
        let mut session = File::open(import_path)
            .expect("failed to open the imported session image");
        let reader = Iso9660Reader::read(&mut session, 0)
            .expect("failed to read the imported session image");
        reader
            .import_file_set(&mut file_set)
            .expect("imported session clashes with itself");
    }
    add_files(&mut file_set, &opts.source_dir)
        .expect("failed to list the source directory");
    info!("collected {} entries", file_set.len());

    let mut file_sys = FileSystem::new(fs_type, file_set);
    file_sys.set_volume_label(&opts.volume_label);
    file_sys.set_interchange_level(level);
    if let Some(boot_image) = &opts.boot_image {
        file_sys
            .add_boot_image_no_emulation(boot_image, true, opts.boot_load_segment, opts.boot_sector_count)
            .expect("failed to add boot image");
    }

    let output = File::create(&opts.output_file)
        .expect("failed to create output file");
    let mut writer = FileSystemWriter::new(&file_sys);
    writer
        .write(BufWriter::new(output), &mut ConsoleProgress, opts.session_start)
        .expect("failed to write disc image");

    println!("wrote {}", opts.output_file.display());
}

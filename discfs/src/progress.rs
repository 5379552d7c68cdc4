use std::fmt;


/// The phase the builder is currently in, for status display.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Status {
    BuildingTree,
    WritingIsoTables,
    WritingJolietTables,
    WritingDirEntries,
    WritingUdfStructures,
    WritingData,
}
impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildingTree => write!(f, "Building file tree"),
            Self::WritingIsoTables => write!(f, "Writing ISO9660 path tables"),
            Self::WritingJolietTables => write!(f, "Writing Joliet path tables"),
            Self::WritingDirEntries => write!(f, "Writing directory entries"),
            Self::WritingUdfStructures => write!(f, "Writing UDF structures"),
            Self::WritingData => write!(f, "Writing file data"),
        }
    }
}

/// Receives status updates from the builder and answers cancellation probes.
///
/// All methods have no-op defaults, so an implementation only overrides what
/// it cares about. The builder calls these synchronously on its own thread
/// and never reads any state back other than [`cancelled`](Self::cancelled),
/// which is probed between phases and before each file's data copy.
pub trait Progress {
    fn status(&mut self, _status: Status) {}

    /// A soft error: the image is still produced, but the named node is
    /// omitted from at least one namespace or carries a duplicated name.
    fn warning(&mut self, _message: &str) {}

    /// Reports file-data bytes written so far out of the expected total.
    fn data_progress(&mut self, _written_bytes: u64, _total_bytes: u64) {}

    fn cancelled(&mut self) -> bool {
        false
    }
}

/// A progress sink that ignores everything and never cancels.
pub struct NullProgress;
impl Progress for NullProgress {}

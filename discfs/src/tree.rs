//! The canonical in-memory tree of everything going into an image.
//!
//! One node exists per file or directory. Nodes live in a flat arena owned by
//! the tree and refer to each other through [`NodeId`] indices, so the sizing
//! passes can walk parents and children freely without back-pointer cycles.
//! The source attributes are fixed at construction; the derived layout fields
//! start at zero and are filled in by the ISO9660, UDF and data-layout passes.


use std::path::PathBuf;

use tracing::error;

use crate::error::ImageError;
use crate::fileset::{FileDescriptor, FileFlags, FileSet, ImportedSessionData};


/// Index of a node within its [`FileTree`] arena.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(usize);

#[derive(Clone, Debug)]
pub struct FileTreeNode {
    parent: Option<NodeId>,
    pub children: Vec<NodeId>,

    pub flags: FileFlags,
    /// Size of the source file in bytes; zero for directories.
    pub size: u64,
    /// Requested name within the image (the transformers may cripple it).
    pub name: String,
    /// Place on the host drive.
    pub external_path: PathBuf,
    pub import: Option<ImportedSessionData>,

    /// ISO9660 name frozen by the uniqueness pass; empty until then.
    pub iso9660_name: Vec<u8>,
    /// Joliet name (UCS-2 code units) frozen by the uniqueness pass.
    pub joliet_name: Vec<u16>,

    /// First sector of the extent as seen from the ISO9660 namespace.
    pub data_pos_normal: u64,
    pub data_pos_joliet: u64,
    /// Extent length in bytes.
    pub data_size_normal: u64,
    pub data_size_joliet: u64,

    /// Zero sectors appended after the file data (DVD-Video only).
    pub data_pad_sectors: u32,

    /// Sectors occupied by this node's own UDF metadata.
    pub udf_size: u64,
    /// Sectors occupied by the UDF metadata of this node and its subtree.
    pub udf_size_total: u64,
    /// Number of directories in the subtree (they link back through '..').
    pub udf_link_total: u64,
    /// Partition-local sector of this node's UDF file entry.
    pub udf_part_loc: u32,
}
impl FileTreeNode {
    fn new(parent: Option<NodeId>, name: &str, descriptor: Option<&FileDescriptor>) -> Self {
        let (size, external_path, flags, import) = match descriptor {
            Some(d) => (
                if d.flags.contains(FileFlags::DIRECTORY) { 0 } else { d.size },
                d.external_path.clone(),
                d.flags,
                d.import,
            ),
            None => (0, PathBuf::new(), FileFlags::DIRECTORY, None),
        };
        Self {
            parent,
            children: Vec::new(),
            flags,
            size,
            name: name.to_owned(),
            external_path,
            import,
            iso9660_name: Vec::new(),
            joliet_name: Vec::new(),
            data_pos_normal: 0,
            data_pos_joliet: 0,
            data_size_normal: 0,
            data_size_joliet: 0,
            data_pad_sectors: 0,
            udf_size: 0,
            udf_size_total: 0,
            udf_link_total: 0,
            udf_part_loc: 0,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_directory(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY)
    }

    pub fn is_imported(&self) -> bool {
        self.flags.contains(FileFlags::IMPORTED)
    }
}

#[derive(Debug)]
pub struct FileTree {
    nodes: Vec<FileTreeNode>,
    dir_count: u32,
    file_count: u32,
}
impl FileTree {
    /// Builds the tree by consuming the file set in its sorted order.
    ///
    /// Every prefix of a path must already exist as a directory, which the
    /// byte-wise set order guarantees for well-formed input.
    pub fn build(files: &FileSet) -> Result<Self, ImageError> {
        let mut tree = Self {
            nodes: vec![FileTreeNode::new(None, "", None)],
            dir_count: 0,
            file_count: 0,
        };
        for descriptor in files.iter() {
            tree.add_from_path(descriptor)?;
        }
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &FileTreeNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut FileTreeNode {
        &mut self.nodes[id.0]
    }

    /// All node ids in creation order; parents precede their children.
    pub fn node_ids(&self) -> impl DoubleEndedIterator<Item = NodeId> + use<> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Number of directories in the tree, the root not included.
    pub fn dir_count(&self) -> u32 {
        self.dir_count
    }

    /// Number of files in the tree; fragmented files count once.
    pub fn file_count(&self) -> u32 {
        self.file_count
    }

    fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&child| self.node(child).name == name)
    }

    fn add_from_path(&mut self, descriptor: &FileDescriptor) -> Result<NodeId, ImageError> {
        let mut components = descriptor
            .internal_path
            .split('/')
            .filter(|c| !c.is_empty())
            .peekable();

        let mut current = self.root();
        let mut leaf_name = "";
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                leaf_name = component;
                break;
            }
            current = match self.child_by_name(current, component) {
                Some(child) => child,
                None => {
                    error!(
                        "unable to find child node {:?} in path {:?}",
                        component, descriptor.internal_path,
                    );
                    return Err(ImageError::UnknownParent {
                        internal_path: descriptor.internal_path.clone(),
                    });
                },
            };
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(FileTreeNode::new(Some(current), leaf_name, Some(descriptor)));
        self.nodes[current.0].children.push(id);

        if descriptor.flags.contains(FileFlags::DIRECTORY) {
            self.dir_count += 1;
        } else {
            self.file_count += 1;
        }
        Ok(id)
    }

    /// Looks a node up by its internal path using a linear child scan per
    /// component.
    pub fn node_from_path(&self, internal_path: &str) -> Option<NodeId> {
        let mut current = self.root();
        for component in internal_path.split('/').filter(|c| !c.is_empty()) {
            current = self.child_by_name(current, component)?;
        }
        if current == self.root() {
            None
        } else {
            Some(current)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> FileSet {
        let mut files = FileSet::new();
        files.add_directory("/A", PathBuf::from("/src/A")).unwrap();
        files.add_file("/A/one.txt", PathBuf::from("/src/A/one.txt"), 10).unwrap();
        files.add_directory("/A/B", PathBuf::from("/src/A/B")).unwrap();
        files.add_file("/A/B/two.txt", PathBuf::from("/src/A/B/two.txt"), 20).unwrap();
        files.add_file("/top.txt", PathBuf::from("/src/top.txt"), 30).unwrap();
        files
    }

    #[test]
    fn test_build_and_counts() {
        let tree = FileTree::build(&sample_set()).unwrap();
        assert_eq!(tree.dir_count(), 2);
        assert_eq!(tree.file_count(), 3);

        let root = tree.node(tree.root());
        assert_eq!(root.children.len(), 2);

        let a = tree.node_from_path("/A").unwrap();
        assert!(tree.node(a).is_directory());
        assert_eq!(tree.node(a).children.len(), 2);

        let two = tree.node_from_path("/A/B/two.txt").unwrap();
        assert_eq!(tree.node(two).size, 20);
        assert_eq!(tree.node(tree.node(two).parent().unwrap()).name, "B");
    }

    #[test]
    fn test_missing_parent() {
        let mut files = FileSet::new();
        files.add_file("/no/such/dir.txt", PathBuf::from("x"), 1).unwrap();
        let error = FileTree::build(&files).unwrap_err();
        assert!(matches!(error, ImageError::UnknownParent { .. }));
    }

    #[test]
    fn test_lookup_miss() {
        let tree = FileTree::build(&sample_set()).unwrap();
        assert!(tree.node_from_path("/A/missing").is_none());
        assert!(tree.node_from_path("/").is_none());
    }
}

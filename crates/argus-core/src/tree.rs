use serde::{Deserialize, Serialize};

use argus_types::id::Id;

/// A serialized directory record: one node per child entry.
///
/// Trees are stored as tree blobs inside packs and addressed by the hash
/// of their encoding, so identical subtrees are shared across snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeType,
    pub mode: u32,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime: i64,
    /// For regular files: the content blobs in order.
    #[serde(default)]
    pub content: Vec<Id>,
    /// For directories: the subtree record.
    #[serde(default)]
    pub subtree: Option<Id>,
    /// For symlinks: the link target.
    #[serde(default)]
    pub link_target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Dir,
    Symlink,
}

impl Node {
    pub fn file(name: &str, content: Vec<Id>) -> Self {
        Node {
            name: name.to_string(),
            kind: NodeType::File,
            mode: 0o644,
            mtime: 0,
            content,
            subtree: None,
            link_target: None,
        }
    }

    pub fn dir(name: &str, subtree: Option<Id>) -> Self {
        Node {
            name: name.to_string(),
            kind: NodeType::Dir,
            mode: 0o755,
            mtime: 0,
            content: Vec::new(),
            subtree,
            link_target: None,
        }
    }

    pub fn symlink(name: &str, target: &str) -> Self {
        Node {
            name: name.to_string(),
            kind: NodeType::Symlink,
            mode: 0o777,
            mtime: 0,
            content: Vec::new(),
            subtree: None,
            link_target: Some(target.to_string()),
        }
    }
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Tree { nodes }
    }

    /// Subtree ids of all directory nodes, in node order.
    pub fn subtrees(&self) -> impl Iterator<Item = Id> + '_ {
        self.nodes.iter().filter_map(|n| match n.kind {
            NodeType::Dir => n.subtree,
            _ => None,
        })
    }
}

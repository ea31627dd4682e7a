//! Human readable dumps of a folder tree, for diagnostics.

use std::fmt::Write;

use crate::manifest::{Entry, FolderEntry};

/// Renders `root` as an indented tree:
///
/// ```text
/// /
/// ├── docs/
/// │   └── report [vlob 3f2a…]
/// └── notes [vlob 9c1b…]
/// ```
///
/// Only vlob ids are shown, never trust seeds or keys.
pub fn format_tree(root: &FolderEntry) -> String {
    let mut out = String::from("/\n");
    write_children(&mut out, root, "");
    out
}

fn write_children(out: &mut String, folder: &FolderEntry, prefix: &str) {
    let count = folder.children.len();
    for (index, (name, child)) in folder.children.iter().enumerate() {
        let last = index + 1 == count;
        let branch = if last { "└── " } else { "├── " };
        match child {
            Entry::File(access) => {
                let id = access.id.as_str();
                let short = id.get(..8).unwrap_or(id);
                let _ = writeln!(out, "{prefix}{branch}{name} [vlob {short}…]");
            }
            Entry::Folder(sub) => {
                let _ = writeln!(out, "{prefix}{branch}{name}/");
                let nested = format!("{prefix}{}", if last { "    " } else { "│   " });
                write_children(out, sub, &nested);
            }
        }
    }
}

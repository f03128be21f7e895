// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-request folder tree arena.
//!
//! Folder rows are linked by parent pointers in the store; walking a subtree
//! through repeated point lookups is O(depth) per node. Engines that
//! reconstruct paths or walk subtrees (rollback, cascade delete) build this
//! arena once per request scope and then work on integer indices.

use std::collections::HashMap;

use crate::db::Tables;
use crate::{Result, StoreError};

#[derive(Debug)]
pub struct FolderNode {
    pub id: String,
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub depth: usize,
}

/// Arena of one environment's folders, rooted at the environment root.
#[derive(Debug)]
pub struct FolderTree {
    nodes: Vec<FolderNode>,
    by_id: HashMap<String, usize>,
}

impl FolderTree {
    /// Build the arena for an environment from the folder table.
    pub fn build(tables: &Tables, env_id: &str) -> Result<Self> {
        let env = tables.environment(env_id)?;
        Self::build_rooted(tables, &env.root_folder_id)
    }

    /// Build the arena for the subtree rooted at `folder_id`.
    pub fn build_rooted(tables: &Tables, folder_id: &str) -> Result<Self> {
        let root = tables.folder(folder_id)?;

        let mut tree = Self {
            nodes: Vec::new(),
            by_id: HashMap::new(),
        };
        tree.push_node(root.id.clone(), root.name.clone(), None, 0);

        // Breadth-first so node order is ascending by depth.
        let mut cursor = 0;
        while cursor < tree.nodes.len() {
            let (parent_idx, parent_id, depth) = {
                let node = &tree.nodes[cursor];
                (cursor, node.id.clone(), node.depth)
            };
            for child in tables.child_folders(&parent_id) {
                let idx = tree.push_node(
                    child.id.clone(),
                    child.name.clone(),
                    Some(parent_idx),
                    depth + 1,
                );
                tree.nodes[parent_idx].children.push(idx);
            }
            cursor += 1;
        }

        Ok(tree)
    }

    fn push_node(
        &mut self,
        id: String,
        name: String,
        parent: Option<usize>,
        depth: usize,
    ) -> usize {
        let idx = self.nodes.len();
        self.by_id.insert(id.clone(), idx);
        self.nodes.push(FolderNode {
            id,
            name,
            parent,
            children: Vec::new(),
            depth,
        });
        idx
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> &FolderNode {
        &self.nodes[idx]
    }

    pub fn index_of(&self, folder_id: &str) -> Option<usize> {
        self.by_id.get(folder_id).copied()
    }

    /// Folder ids of the subtree rooted at `folder_id` (inclusive),
    /// ascending by depth.
    pub fn subtree_ids(&self, folder_id: &str) -> Result<Vec<String>> {
        let start = self
            .index_of(folder_id)
            .ok_or_else(|| StoreError::NotFound(format!("folder {folder_id}")))?;

        let mut out = Vec::new();
        let mut queue = vec![start];
        let mut cursor = 0;
        while cursor < queue.len() {
            let idx = queue[cursor];
            out.push(self.nodes[idx].id.clone());
            queue.extend(self.nodes[idx].children.iter().copied());
            cursor += 1;
        }
        Ok(out)
    }

    /// Descendant folder ids of `folder_id` (exclusive), ascending by depth.
    pub fn descendant_ids(&self, folder_id: &str) -> Result<Vec<String>> {
        let mut ids = self.subtree_ids(folder_id)?;
        ids.remove(0);
        Ok(ids)
    }

    /// Resolve a `/`-separated path (relative to the arena root) to a
    /// folder id. `/` resolves to the root itself.
    pub fn resolve_path(&self, path: &str) -> Option<&str> {
        let mut idx = 0;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            idx = *self.nodes[idx]
                .children
                .iter()
                .find(|&&c| self.nodes[c].name == segment)?;
        }
        Some(&self.nodes[idx].id)
    }

    /// Reconstruct the `/`-separated path of a folder from the arena root.
    pub fn path_of(&self, folder_id: &str) -> Option<String> {
        let mut idx = self.index_of(folder_id)?;
        let mut segments = Vec::new();
        while let Some(parent) = self.nodes[idx].parent {
            segments.push(self.nodes[idx].name.clone());
            idx = parent;
        }
        segments.reverse();
        Some(format!("/{}", segments.join("/")))
    }
}

//! The virtual filesystem: a directory tree derived from flat path-to-URL
//! mappings.
//!
//! Directories have no backing records. They materialize when the first
//! file below them is added and vanish when the last one is removed;
//! the whole tree is rebuilt from persisted entries at startup.
//!
//! One reader/writer lock guards the index. Mutations hold it
//! exclusively across the persisted-store round trip, so store and
//! memory change together from a caller's point of view; the lock is
//! synchronous and never held across an await point.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::warn;

use crate::error::{VfsError, VfsResult};
use crate::paths;
use crate::store::PersistentStore;
use crate::types::{FileEntry, VirtualItem};

/// In-memory index: materialized files/directories plus the directory
/// existence set (which also covers the root, which has no item).
struct Index {
    items: HashMap<String, VirtualItem>,
    dirs: HashSet<String>,
}

impl Index {
    fn is_dir(&self, path: &str) -> bool {
        match self.items.get(path) {
            Some(item) => item.is_dir,
            None => self.dirs.contains(path),
        }
    }

    fn occupied(&self, path: &str) -> bool {
        self.items.contains_key(path) || self.dirs.contains(path)
    }

    /// Materializes a file plus any missing ancestor directories.
    fn insert_file(&mut self, path: &str, url: String) {
        self.items.insert(
            path.to_string(),
            VirtualItem {
                name: paths::file_name(path).to_string(),
                path: path.to_string(),
                url,
                is_dir: false,
            },
        );

        let mut dir = paths::parent(path);
        while dir != "/" {
            if self.dirs.insert(dir.to_string()) {
                self.items.insert(
                    dir.to_string(),
                    VirtualItem {
                        name: paths::file_name(dir).to_string(),
                        path: dir.to_string(),
                        url: String::new(),
                        is_dir: true,
                    },
                );
            }
            dir = paths::parent(dir);
        }
    }

    fn has_children(&self, dir: &str) -> bool {
        self.items.keys().any(|path| paths::parent(path) == dir)
    }

    /// Removes now-empty ancestors of `path`, stopping at the first
    /// directory that still has children, or at the root.
    fn cleanup_upward(&mut self, path: &str) {
        let mut dir = paths::parent(path).to_string();
        while dir != "/" {
            if self.has_children(&dir) {
                break;
            }
            self.items.remove(&dir);
            self.dirs.remove(&dir);
            dir = paths::parent(&dir).to_string();
        }
    }
}

/// The derived filesystem shared by every request.
pub struct VirtualFs {
    index: RwLock<Index>,
    store: PersistentStore,
}

impl VirtualFs {
    /// Loads every persisted entry and rebuilds the directory tree.
    pub fn new(store: PersistentStore) -> VfsResult<Self> {
        let mut index = Index {
            items: HashMap::new(),
            dirs: HashSet::new(),
        };
        index.dirs.insert("/".to_string());

        for entry in store.all_file_entries()? {
            index.insert_file(&paths::normalize(&entry.path), entry.url);
        }

        Ok(Self {
            index: RwLock::new(index),
            store,
        })
    }

    /// True if `path` names a file or a directory (the root always
    /// exists).
    pub fn exists(&self, path: &str) -> bool {
        let path = paths::normalize(path);
        self.index.read().occupied(&path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let path = paths::normalize(path);
        self.index.read().is_dir(&path)
    }

    /// The materialized item at `path`. The root has no item; use
    /// [`VirtualFs::is_dir`] for it.
    pub fn get_item(&self, path: &str) -> Option<VirtualItem> {
        let path = paths::normalize(path);
        self.index.read().items.get(&path).cloned()
    }

    /// Direct children of `path`: directories first, then files, each
    /// group sorted case-insensitively by name. `None` when `path` is
    /// not a directory.
    pub fn list_dir(&self, path: &str) -> Option<Vec<VirtualItem>> {
        let path = paths::normalize(path);
        let index = self.index.read();
        if !index.is_dir(&path) {
            return None;
        }

        let mut children: Vec<VirtualItem> = index
            .items
            .values()
            .filter(|item| paths::parent(&item.path) == path)
            .cloned()
            .collect();
        children.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Some(children)
    }

    /// Snapshot of all file entries, sorted by path.
    pub fn all_files(&self) -> Vec<FileEntry> {
        let index = self.index.read();
        let mut files: Vec<FileEntry> = index
            .items
            .values()
            .filter(|item| !item.is_dir)
            .map(|item| FileEntry {
                path: item.path.clone(),
                url: item.url.clone(),
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// Registers a new file, creating any missing ancestor directories.
    pub fn add_file(&self, path: &str, url: &str) -> VfsResult<()> {
        let path = paths::normalize(path);
        if path == "/" {
            return Err(VfsError::invalid(path, "the root cannot be a file"));
        }

        let mut index = self.index.write();
        if index.occupied(&path) {
            return Err(VfsError::Conflict(path));
        }

        self.store.set_file_entry(&FileEntry {
            path: path.clone(),
            url: url.to_string(),
        })?;
        index.insert_file(&path, url.to_string());
        Ok(())
    }

    /// Repoints an existing file at a new URL.
    pub fn update_file(&self, path: &str, url: &str) -> VfsResult<()> {
        let path = paths::normalize(path);
        let mut index = self.index.write();
        match index.items.get(&path) {
            None => return Err(VfsError::NotFound(path)),
            Some(item) if item.is_dir => {
                return Err(VfsError::invalid(path, "cannot update a directory"));
            }
            Some(_) => {}
        }

        self.store.set_file_entry(&FileEntry {
            path: path.clone(),
            url: url.to_string(),
        })?;
        if let Some(item) = index.items.get_mut(&path) {
            item.url = url.to_string();
        }
        Ok(())
    }

    /// Removes a file and cascades away any directories it leaves empty.
    pub fn remove_file(&self, path: &str) -> VfsResult<()> {
        let path = paths::normalize(path);
        let mut index = self.index.write();
        self.remove_file_locked(&mut index, &path)
    }

    /// Moves a file. The destination must be unoccupied.
    pub fn move_file(&self, src: &str, dst: &str) -> VfsResult<()> {
        let src = paths::normalize(src);
        let dst = paths::normalize(dst);
        if src == dst {
            return Err(VfsError::invalid(dst, "source and destination are the same"));
        }

        let mut index = self.index.write();
        let url = match index.items.get(&src) {
            None => return Err(VfsError::NotFound(src)),
            Some(item) if item.is_dir => return Err(VfsError::invalid(src, "not a file")),
            Some(item) => item.url.clone(),
        };
        if index.occupied(&dst) {
            return Err(VfsError::Conflict(dst));
        }

        self.persist_move(&src, &dst, &url)?;
        index.items.remove(&src);
        index.insert_file(&dst, url);
        index.cleanup_upward(&src);
        Ok(())
    }

    /// Copies a file; the new entry shares the source URL.
    pub fn copy_file(&self, src: &str, dst: &str) -> VfsResult<()> {
        let src = paths::normalize(src);
        let dst = paths::normalize(dst);

        let mut index = self.index.write();
        let url = match index.items.get(&src) {
            None => return Err(VfsError::NotFound(src)),
            Some(item) if item.is_dir => return Err(VfsError::invalid(src, "not a file")),
            Some(item) => item.url.clone(),
        };
        if index.occupied(&dst) {
            return Err(VfsError::Conflict(dst));
        }

        self.store.set_file_entry(&FileEntry {
            path: dst.clone(),
            url: url.clone(),
        })?;
        index.insert_file(&dst, url);
        Ok(())
    }

    /// Recursively removes a directory and every file beneath it.
    pub fn remove_directory(&self, path: &str) -> VfsResult<()> {
        let path = paths::normalize(path);
        if path == "/" {
            return Err(VfsError::invalid(path, "the root cannot be removed"));
        }

        let mut index = self.index.write();
        if !index.is_dir(&path) {
            return Err(if index.items.contains_key(&path) {
                VfsError::invalid(path, "not a directory")
            } else {
                VfsError::NotFound(path)
            });
        }

        let prefix = format!("{path}/");
        let mut files: Vec<String> = index
            .items
            .values()
            .filter(|item| !item.is_dir && item.path.starts_with(&prefix))
            .map(|item| item.path.clone())
            .collect();
        files.sort();

        for file in &files {
            self.remove_file_locked(&mut index, file)?;
        }

        // The cascade normally erases the whole subtree; sweep whatever
        // marker state is left and clean upward from the removed root.
        index
            .items
            .retain(|p, _| p != &path && !p.starts_with(&prefix));
        index.dirs.retain(|p| p != &path && !p.starts_with(&prefix));
        index.cleanup_upward(&path);
        Ok(())
    }

    /// Moves every file under `src` to the same relative path under
    /// `dst`, then drops the old directory.
    pub fn move_directory(&self, src: &str, dst: &str) -> VfsResult<()> {
        let src = paths::normalize(src);
        let dst = paths::normalize(dst);

        let mut index = self.index.write();
        Self::check_directory_relocation(&index, &src, &dst)?;
        let entries = Self::subtree_files(&index, &src);

        for (old_path, url) in &entries {
            let new_path = format!("{dst}{}", &old_path[src.len()..]);
            self.persist_move(old_path, &new_path, url)?;
            index.items.remove(old_path);
            index.insert_file(&new_path, url.clone());
        }

        let prefix = format!("{src}/");
        index
            .items
            .retain(|p, _| p != &src && !p.starts_with(&prefix));
        index.dirs.retain(|p| p != &src && !p.starts_with(&prefix));
        index.cleanup_upward(&src);
        Ok(())
    }

    /// Copies every file under `src` to the same relative path under
    /// `dst`; the copies share the source URLs.
    pub fn copy_directory(&self, src: &str, dst: &str) -> VfsResult<()> {
        let src = paths::normalize(src);
        let dst = paths::normalize(dst);

        let mut index = self.index.write();
        Self::check_directory_relocation(&index, &src, &dst)?;
        let entries = Self::subtree_files(&index, &src);

        for (old_path, url) in &entries {
            let new_path = format!("{dst}{}", &old_path[src.len()..]);
            self.store.set_file_entry(&FileEntry {
                path: new_path.clone(),
                url: url.clone(),
            })?;
            index.insert_file(&new_path, url.clone());
        }
        Ok(())
    }

    /// Bulk add used by the startup import. Per-entry failures are
    /// logged and counted, never aborting the batch. Returns
    /// `(added, failed)`.
    pub fn import(&self, entries: &[FileEntry]) -> (usize, usize) {
        let mut added = 0;
        let mut failed = 0;
        for entry in entries {
            match self.add_file(&entry.path, &entry.url) {
                Ok(()) => added += 1,
                Err(err) => {
                    warn!(path = %entry.path, error = %err, "import entry rejected");
                    failed += 1;
                }
            }
        }
        (added, failed)
    }

    fn remove_file_locked(&self, index: &mut Index, path: &str) -> VfsResult<()> {
        let url = match index.items.get(path) {
            None => return Err(VfsError::NotFound(path.to_string())),
            Some(item) if item.is_dir => {
                return Err(VfsError::invalid(path, "cannot remove a directory as a file"));
            }
            Some(item) => item.url.clone(),
        };

        self.store.delete_file_entry(path)?;
        if let Err(err) = self.store.delete_file_metadata(&url) {
            warn!(url = %url, error = %err, "failed to drop metadata record");
        }

        index.items.remove(path);
        index.cleanup_upward(path);
        Ok(())
    }

    /// Writes the entry under its new path, then deletes the old record.
    /// If the delete fails, the fresh insert is rolled back best-effort;
    /// a failed rollback leaves both records persisted until the next
    /// startup rebuild.
    fn persist_move(&self, src: &str, dst: &str, url: &str) -> VfsResult<()> {
        self.store.set_file_entry(&FileEntry {
            path: dst.to_string(),
            url: url.to_string(),
        })?;
        if let Err(err) = self.store.delete_file_entry(src) {
            if let Err(rollback) = self.store.delete_file_entry(dst) {
                warn!(
                    src,
                    dst,
                    error = %rollback,
                    "rollback of move insert failed; duplicate entry persisted"
                );
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn check_directory_relocation(index: &Index, src: &str, dst: &str) -> VfsResult<()> {
        if src == "/" {
            return Err(VfsError::invalid(src, "the root cannot be moved or copied"));
        }
        if dst == src || dst.starts_with(&format!("{src}/")) {
            return Err(VfsError::invalid(
                dst,
                "destination lies inside the source directory",
            ));
        }
        if !index.is_dir(src) {
            return Err(if index.items.contains_key(src) {
                VfsError::invalid(src, "not a directory")
            } else {
                VfsError::NotFound(src.to_string())
            });
        }
        if index.occupied(dst) {
            return Err(VfsError::Conflict(dst.to_string()));
        }
        Ok(())
    }

    /// `(path, url)` of every file under `dir`, sorted by path.
    fn subtree_files(index: &Index, dir: &str) -> Vec<(String, String)> {
        let prefix = format!("{dir}/");
        let mut files: Vec<(String, String)> = index
            .items
            .values()
            .filter(|item| !item.is_dir && item.path.starts_with(&prefix))
            .map(|item| (item.path.clone(), item.url.clone()))
            .collect();
        files.sort();
        files
    }
}

//! 游标持久化。引擎本身不关心存储方式，只依赖 [`CursorStore`]。

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use super::cursor::ImportCursor;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("非法的游标 ID: {0}")]
    InvalidId(String),
}

pub trait CursorStore {
    fn put(
        &mut self,
        id: &str,
        cursor: &ImportCursor,
    ) -> Result<(), StoreError>;

    fn get(
        &self,
        id: &str,
    ) -> Result<Option<ImportCursor>, StoreError>;

    fn remove(
        &mut self,
        id: &str,
    ) -> Result<(), StoreError>;
}

/// 内存存储，保存序列化后的文本
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: HashMap<String, String>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn put(
        &mut self,
        id: &str,
        cursor: &ImportCursor,
    ) -> Result<(), StoreError> {
        self.cursors.insert(id.to_string(), serde_json::to_string(cursor)?);
        Ok(())
    }

    fn get(
        &self,
        id: &str,
    ) -> Result<Option<ImportCursor>, StoreError> {
        match self.cursors.get(id) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn remove(
        &mut self,
        id: &str,
    ) -> Result<(), StoreError> {
        self.cursors.remove(id);
        Ok(())
    }
}

/// 每个游标一个 JSON 文件，先写临时文件再改名
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(
        &self,
        id: &str,
    ) -> Result<PathBuf, StoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

impl CursorStore for FileCursorStore {
    fn put(
        &mut self,
        id: &str,
        cursor: &ImportCursor,
    ) -> Result<(), StoreError> {
        let path = self.path(id)?;
        fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_vec_pretty(cursor)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!("游标已保存: {:?}", path);
        Ok(())
    }

    fn get(
        &self,
        id: &str,
    ) -> Result<Option<ImportCursor>, StoreError> {
        let path = self.path(id)?;
        match fs::read(&path) {
            Ok(json) => Ok(Some(serde_json::from_slice(&json)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn remove(
        &mut self,
        id: &str,
    ) -> Result<(), StoreError> {
        let path = self.path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{cursor::FileIdentity, stream::Encoding};

    fn cursor() -> ImportCursor {
        let file = FileIdentity {
            path: "/data/dump.sql".into(),
            size: 1024,
            encoding: Encoding::None,
        };
        let mut cursor = ImportCursor::new(file, ";");
        cursor.byte_offset = 512;
        cursor.line_number = 12;
        cursor
    }

    fn roundtrip(store: &mut dyn CursorStore) {
        let cursor = cursor();
        assert!(store.get("task-1").unwrap().is_none());

        store.put("task-1", &cursor).unwrap();
        assert_eq!(store.get("task-1").unwrap(), Some(cursor.clone()));

        let mut next = cursor.clone();
        next.byte_offset = 1024;
        store.put("task-1", &next).unwrap();
        assert_eq!(store.get("task-1").unwrap().map(|c| c.byte_offset), Some(1024));

        store.remove("task-1").unwrap();
        store.remove("task-1").unwrap();
        assert!(store.get("task-1").unwrap().is_none());
    }

    #[test]
    fn memory_store_roundtrip() {
        roundtrip(&mut MemoryCursorStore::new());
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCursorStore::new(dir.path().join("cursors"));
        roundtrip(&mut store);
        assert!(!dir.path().join("cursors").join("task-1.json.tmp").exists());
    }

    #[test]
    fn file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCursorStore::new(dir.path());
        assert!(matches!(store.put("../escape", &cursor()), Err(StoreError::InvalidId(_))));
        assert!(matches!(store.get(""), Err(StoreError::InvalidId(_))));
    }
}

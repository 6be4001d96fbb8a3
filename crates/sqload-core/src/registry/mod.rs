use std::{
    fs, io,
    path::{Path, PathBuf},
};

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit},
};
use thiserror::Error;

use crate::{DataSource, sources_db};

const ENCRYPTION_KEY: [u8; 32] = [
    0x5d, 0x21, 0x8c, 0x4e, 0x93, 0x0a, 0x6f, 0xb7, 0x1e, 0x72, 0xc4, 0x39, 0xe8, 0x05, 0x5b, 0xa6, 0x2f, 0xd1, 0x47,
    0x8e, 0x63, 0x1c, 0xf0, 0x9b, 0x34, 0x7a, 0xc2, 0x58, 0x0d, 0xe9, 0x46, 0xb3,
];

const NONCE: [u8; 12] = [0x3c, 0x9e, 0x51, 0xa7, 0x0b, 0xd4, 0x68, 0xf2, 0x17, 0x8a, 0xc5, 0x2e];

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("数据源不存在: {0}")]
    NotFound(String),
}

/// 加密存储的数据源登记表（sources.db）
pub struct SourceRegistry {
    sources: Vec<DataSource>,
    path: PathBuf,
}

impl SourceRegistry {
    /// 从默认位置（~/.sqload/sources.db）加载
    pub fn init() -> Result<Self, RegistryError> {
        Self::load(sources_db())
    }

    /// 文件不存在时视为空登记表
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();

        let sources = if path.exists() {
            let encrypted = fs::read(&path)?;
            let decrypted = Self::decrypt(&encrypted)?;
            serde_json::from_slice(&decrypted)?
        } else {
            vec![]
        };
        tracing::debug!("已加载 {} 个数据源: {:?}", sources.len(), path);

        Ok(Self { sources, path })
    }

    pub fn sources(&self) -> &[DataSource] {
        &self.sources
    }

    pub fn find(
        &self,
        id: &str,
    ) -> Result<&DataSource, RegistryError> {
        self.sources
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// 按 id 新增或替换
    pub fn upsert(
        &mut self,
        source: DataSource,
    ) {
        match self.sources.iter_mut().find(|s| s.id == source.id) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }

    pub fn save(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec(&self.sources)?;
        let encrypted = Self::encrypt(&json)?;
        fs::write(&self.path, encrypted)?;
        Ok(())
    }

    fn encrypt(data: &[u8]) -> Result<Vec<u8>, RegistryError> {
        Aes256Gcm::new(&ENCRYPTION_KEY.into())
            .encrypt(&NONCE.into(), data)
            .map_err(|e| RegistryError::Encryption(e.to_string()))
    }

    fn decrypt(data: &[u8]) -> Result<Vec<u8>, RegistryError> {
        Aes256Gcm::new(&ENCRYPTION_KEY.into())
            .decrypt(&NONCE.into(), data)
            .map_err(|e| RegistryError::Decryption(e.to_string()))
    }
}

use serde::{Deserialize, Serialize};

use super::{error::StreamError, stream::ByteStream};

/// 采样字节数
const SAMPLE_BYTES: u64 = 256 * 1024;
/// 样本为空时假定的每行字节数
const DEFAULT_BYTES_PER_LINE: u64 = 128;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    Tiny,
    Small,
    Medium,
    Large,
    Huge,
}

impl SizeCategory {
    pub fn from_bytes(bytes: u64) -> Self {
        match bytes {
            b if b < MIB => SizeCategory::Tiny,
            b if b < 10 * MIB => SizeCategory::Small,
            b if b < 100 * MIB => SizeCategory::Medium,
            b if b < 1024 * MIB => SizeCategory::Large,
            _ => SizeCategory::Huge,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// 全新导入时采样得到的文件画像，导入过程中不再重新计算
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    /// 解压后的估算字节数
    pub estimated_bytes: u64,
    pub size_category: SizeCategory,
    pub bytes_per_line: u64,
    /// 是否包含多值 INSERT（如 mysqldump 的 extended insert）
    pub bulk_inserts: bool,
    pub sampled_lines: u64,
}

impl FileAnalysis {
    /// 从流开头采样，调用后流的位置不确定，需要重新 seek
    pub fn sample(stream: &mut ByteStream) -> Result<Self, StreamError> {
        stream.seek(0)?;

        let mut lines = 0u64;
        let mut bytes = 0u64;
        let mut bulk_inserts = false;
        while bytes < SAMPLE_BYTES {
            let Some(line) = stream.read_line()? else {
                break;
            };
            lines += 1;
            bytes += line.len() as u64;
            if !bulk_inserts && is_bulk_insert(&line) {
                bulk_inserts = true;
            }
        }

        let estimated_bytes = if stream.eof()? {
            // 整个文件都在样本里
            stream.tell()
        } else {
            (stream.disk_size() * stream.encoding().compression_ratio()).max(stream.tell())
        };
        let bytes_per_line = if lines == 0 {
            DEFAULT_BYTES_PER_LINE
        } else {
            (bytes / lines).max(1)
        };

        let analysis = Self {
            estimated_bytes,
            size_category: SizeCategory::from_bytes(estimated_bytes),
            bytes_per_line,
            bulk_inserts,
            sampled_lines: lines,
        };
        tracing::debug!("文件采样结果: {:?}", analysis);
        Ok(analysis)
    }

    /// 按字节进度估算的总行数
    pub fn estimated_lines(&self) -> u64 {
        self.estimated_bytes / self.bytes_per_line.max(1)
    }
}

fn is_bulk_insert(line: &[u8]) -> bool {
    let text = line.trim_ascii_start();
    let is_insert = text
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case(b"INSERT"));
    is_insert && (contains(text, b"),(") || contains(text, b"), ("))
}

fn contains(
    haystack: &[u8],
    needle: &[u8],
) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

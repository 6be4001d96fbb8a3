//! 统一的缓冲字节流：明文 / gzip / bzip2。
//!
//! 所有偏移都是解压后的逻辑偏移。`tell()` 返回下一个尚未交给调用方的字节位置，
//! 已读入内部缓冲但未消费的部分不计入，这是断点续传精确到字节的前提。

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

use super::error::StreamError;

pub const MIN_BUFFER_SIZE: usize = 64 * 1024;
pub const MAX_BUFFER_SIZE: usize = 256 * 1024;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    None,
    Gzip,
    Bzip2,
}

impl Encoding {
    /// 按扩展名识别编码，已知但不支持的压缩格式直接报错
    pub fn from_path(path: &Path) -> Result<Self, StreamError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match ext.as_deref() {
            Some("gz") | Some("gzip") => Ok(Encoding::Gzip),
            Some("bz2") | Some("bzip2") => Ok(Encoding::Bzip2),
            Some(other @ ("zip" | "xz" | "zst" | "7z" | "rar" | "lz4")) => {
                Err(StreamError::UnsupportedEncoding(other.to_string()))
            }
            _ => Ok(Encoding::None),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Encoding::None => "none",
            Encoding::Gzip => "gzip",
            Encoding::Bzip2 => "bzip2",
        }
    }

    /// 估算解压后体积用的经验压缩比
    pub fn compression_ratio(&self) -> u64 {
        match self {
            Encoding::None => 1,
            Encoding::Gzip => 5,
            Encoding::Bzip2 => 6,
        }
    }

    fn magic(&self) -> Option<&'static [u8]> {
        match self {
            Encoding::None => None,
            Encoding::Gzip => Some(&[0x1f, 0x8b]),
            Encoding::Bzip2 => Some(b"BZh"),
        }
    }
}

enum Source {
    Plain(File),
    Gzip(MultiGzDecoder<File>),
    Bzip2(MultiBzDecoder<File>),
}

impl Read for Source {
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        match self {
            Source::Plain(file) => file.read(buf),
            Source::Gzip(decoder) => decoder.read(buf),
            Source::Bzip2(decoder) => decoder.read(buf),
        }
    }
}

pub struct ByteStream {
    path: PathBuf,
    encoding: Encoding,
    disk_size: u64,
    source: Source,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
    /// buf[0] 对应的逻辑偏移
    buf_offset: u64,
    eof: bool,
}

impl ByteStream {
    /// 打开文件并剥离开头的 UTF-8 BOM
    pub fn open(
        path: impl AsRef<Path>,
        encoding: Encoding,
        buffer_size: usize,
    ) -> Result<Self, StreamError> {
        let path = path.as_ref().to_path_buf();
        let (source, disk_size) = open_source(&path, encoding)?;

        let mut stream = Self {
            path,
            encoding,
            disk_size,
            source,
            buf: vec![0u8; buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)].into_boxed_slice(),
            pos: 0,
            filled: 0,
            buf_offset: 0,
            eof: false,
        };
        stream.strip_leading_bom()?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// 磁盘上的文件大小（压缩文件为压缩后大小）
    pub fn disk_size(&self) -> u64 {
        self.disk_size
    }

    pub fn tell(&self) -> u64 {
        self.buf_offset + self.pos as u64
    }

    /// 定位到逻辑偏移，越过文件末尾不报错，停在实际末尾
    pub fn seek(
        &mut self,
        offset: u64,
    ) -> Result<u64, StreamError> {
        // 目标仍在当前缓冲内
        if offset >= self.buf_offset && offset <= self.buf_offset + self.filled as u64 && offset != 0 {
            self.pos = (offset - self.buf_offset) as usize;
            return Ok(offset);
        }

        match &mut self.source {
            Source::Plain(file) => {
                let target = offset.min(self.disk_size);
                file.seek(SeekFrom::Start(target))
                    .map_err(|source| StreamError::Seek { offset, source })?;
                self.reset_buffer(target);
            }
            _ => {
                // 压缩流只能顺序解码：向前时跳过，向后时重新打开
                if offset < self.buf_offset || offset == 0 {
                    let (source, disk_size) = open_source(&self.path, self.encoding)?;
                    self.source = source;
                    self.disk_size = disk_size;
                    self.reset_buffer(0);
                }
                // 解码器已越过缓冲内的字节
                let start = self.buf_offset + self.filled as u64;
                let remaining = offset.saturating_sub(start);
                self.buf_offset = start;
                self.pos = 0;
                self.filled = 0;
                let skipped = io::copy(&mut (&mut self.source).take(remaining), &mut io::sink())
                    .map_err(|source| StreamError::Seek { offset, source })?;
                self.buf_offset = start + skipped;
                if skipped < remaining {
                    tracing::debug!("定位越过流末尾: 目标 {}, 实际 {}", offset, self.buf_offset);
                    self.eof = true;
                }
            }
        }

        if self.tell() == 0 {
            self.strip_leading_bom()?;
        }
        Ok(self.tell())
    }

    /// 读取下一行（含换行符），跨缓冲区的行会被拼接完整；流结束返回 None
    pub fn read_line(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        let mut line = Vec::new();
        loop {
            if self.pos == self.filled && self.read_more()? == 0 {
                break;
            }
            let available = &self.buf[self.pos..self.filled];
            match available.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    line.extend_from_slice(&available[..=idx]);
                    self.pos += idx + 1;
                    return Ok(Some(line));
                }
                None => {
                    line.extend_from_slice(available);
                    self.pos = self.filled;
                }
            }
        }

        if line.is_empty() { Ok(None) } else { Ok(Some(line)) }
    }

    /// 是否已无可读字节；缓冲为空时会尝试读取一次
    pub fn eof(&mut self) -> Result<bool, StreamError> {
        if self.pos < self.filled {
            return Ok(false);
        }
        if self.eof {
            return Ok(true);
        }
        Ok(self.read_more()? == 0)
    }

    fn strip_leading_bom(&mut self) -> Result<(), StreamError> {
        while self.filled - self.pos < UTF8_BOM.len() && !self.eof {
            if self.read_more()? == 0 {
                break;
            }
        }
        if self.buf[self.pos..self.filled].starts_with(&UTF8_BOM) {
            tracing::debug!("剥离 UTF-8 BOM: {:?}", self.path);
            self.pos += UTF8_BOM.len();
        }
        Ok(())
    }

    fn reset_buffer(
        &mut self,
        offset: u64,
    ) {
        self.buf_offset = offset;
        self.pos = 0;
        self.filled = 0;
        self.eof = false;
    }

    /// 追加读取到缓冲尾部，返回本次读到的字节数（0 表示流结束）
    fn read_more(&mut self) -> Result<usize, StreamError> {
        if self.eof {
            return Ok(0);
        }
        if self.pos == self.filled {
            self.buf_offset += self.filled as u64;
            self.pos = 0;
            self.filled = 0;
        } else if self.filled == self.buf.len() {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.buf_offset += self.pos as u64;
            self.filled -= self.pos;
            self.pos = 0;
        }

        loop {
            match self.source.read(&mut self.buf[self.filled..]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(0);
                }
                Ok(n) => {
                    self.filled += n;
                    return Ok(n);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(StreamError::Read {
                        offset: self.buf_offset + self.filled as u64,
                        source,
                    });
                }
            }
        }
    }
}

fn open_source(
    path: &Path,
    encoding: Encoding,
) -> Result<(Source, u64), StreamError> {
    let mut file = File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => StreamError::NotFound(path.to_path_buf()),
        _ => StreamError::Unreadable {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let metadata = file.metadata().map_err(|source| StreamError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    if metadata.is_dir() {
        return Err(StreamError::Unreadable {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "是目录而不是文件"),
        });
    }

    if let Some(magic) = encoding.magic() {
        let mut header = vec![0u8; magic.len()];
        let matched = file.read_exact(&mut header).is_ok() && header == magic;
        if !matched {
            return Err(StreamError::UnsupportedEncoding(format!(
                "{:?} 不是有效的 {} 文件",
                path,
                encoding.label()
            )));
        }
        file.rewind().map_err(|source| StreamError::Seek { offset: 0, source })?;
    }

    let source = match encoding {
        Encoding::None => Source::Plain(file),
        Encoding::Gzip => Source::Gzip(MultiGzDecoder::new(file)),
        Encoding::Bzip2 => Source::Bzip2(MultiBzDecoder::new(file)),
    };
    Ok((source, metadata.len()))
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Write};

    use super::*;

    fn write_fixture(
        dir: &Path,
        name: &str,
        encoding: Encoding,
        content: &[u8],
    ) -> PathBuf {
        let path = dir.join(name);
        let bytes = match encoding {
            Encoding::None => content.to_vec(),
            Encoding::Gzip => {
                let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(content).unwrap();
                encoder.finish().unwrap()
            }
            Encoding::Bzip2 => {
                let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                encoder.write_all(content).unwrap();
                encoder.finish().unwrap()
            }
        };
        fs::write(&path, bytes).unwrap();
        path
    }

    fn sample_content() -> Vec<u8> {
        let mut content = Vec::new();
        for i in 0..2000 {
            content.extend_from_slice(format!("INSERT INTO t VALUES ({i}, '{}');\n", "x".repeat(i % 97)).as_bytes());
        }
        // 超过最大缓冲区的长行
        content.extend_from_slice(&vec![b'y'; MAX_BUFFER_SIZE * 2]);
        content.extend_from_slice(b"\nlast line without newline");
        content
    }

    fn read_all(stream: &mut ByteStream) -> Vec<Vec<u8>> {
        let mut lines = vec![];
        while let Some(line) = stream.read_line().unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn tell_tracks_consumed_bytes_for_every_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let content = sample_content();

        for (name, encoding) in [("a.sql", Encoding::None), ("a.sql.gz", Encoding::Gzip), ("a.sql.bz2", Encoding::Bzip2)] {
            let path = write_fixture(dir.path(), name, encoding, &content);
            let mut stream = ByteStream::open(&path, encoding, MIN_BUFFER_SIZE).unwrap();

            let mut consumed = 0u64;
            let lines = {
                let mut lines = vec![];
                while let Some(line) = stream.read_line().unwrap() {
                    consumed += line.len() as u64;
                    assert_eq!(stream.tell(), consumed, "{name}");
                    lines.push(line);
                }
                lines
            };
            assert_eq!(lines.concat(), content, "{name}");
            assert_eq!(lines.last().unwrap(), b"last line without newline");
            assert!(stream.eof().unwrap());
        }
    }

    #[test]
    fn seek_resumes_exactly_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let content = sample_content();

        for (name, encoding) in [("b.sql", Encoding::None), ("b.sql.gz", Encoding::Gzip), ("b.sql.bz2", Encoding::Bzip2)] {
            let path = write_fixture(dir.path(), name, encoding, &content);
            let mut first = ByteStream::open(&path, encoding, MIN_BUFFER_SIZE).unwrap();
            let mut head = vec![];
            for _ in 0..777 {
                head.push(first.read_line().unwrap().unwrap());
            }
            let offset = first.tell();

            let mut second = ByteStream::open(&path, encoding, MAX_BUFFER_SIZE).unwrap();
            assert_eq!(second.seek(offset).unwrap(), offset);
            assert_eq!(second.tell(), offset);
            let tail = read_all(&mut second);

            assert_eq!([head.concat(), tail.concat()].concat(), content, "{name}");
        }
    }

    #[test]
    fn seek_backwards_on_compressed_stream_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let content = sample_content();
        let path = write_fixture(dir.path(), "c.sql.gz", Encoding::Gzip, &content);

        let mut stream = ByteStream::open(&path, Encoding::Gzip, MIN_BUFFER_SIZE).unwrap();
        read_all(&mut stream);
        let first_line_len = content.iter().position(|&b| b == b'\n').unwrap() as u64 + 1;
        assert_eq!(stream.seek(first_line_len).unwrap(), first_line_len);
        assert_eq!(read_all(&mut stream).concat(), content[first_line_len as usize..]);
    }

    #[test]
    fn seek_past_end_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"SELECT 1;\nSELECT 2;\n";

        for (name, encoding) in [("d.sql", Encoding::None), ("d.sql.bz2", Encoding::Bzip2)] {
            let path = write_fixture(dir.path(), name, encoding, content);
            let mut stream = ByteStream::open(&path, encoding, MIN_BUFFER_SIZE).unwrap();
            assert_eq!(stream.seek(10_000).unwrap(), content.len() as u64);
            assert_eq!(stream.read_line().unwrap(), None);
            assert!(stream.eof().unwrap());
        }
    }

    #[test]
    fn bom_is_stripped_only_at_stream_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = UTF8_BOM.to_vec();
        content.extend_from_slice(b"SELECT 1;\n");
        let path = write_fixture(dir.path(), "bom.sql", Encoding::None, &content);

        let mut stream = ByteStream::open(&path, Encoding::None, MIN_BUFFER_SIZE).unwrap();
        assert_eq!(stream.tell(), 3);
        assert_eq!(stream.read_line().unwrap().unwrap(), b"SELECT 1;\n");
        assert_eq!(stream.tell(), content.len() as u64);

        stream.seek(0).unwrap();
        assert_eq!(stream.tell(), 3);

        stream.seek(1).unwrap();
        assert_eq!(stream.read_line().unwrap().unwrap(), &content[1..]);
    }

    #[test]
    fn open_reports_structured_failures() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            ByteStream::open(dir.path().join("missing.sql"), Encoding::None, MIN_BUFFER_SIZE),
            Err(StreamError::NotFound(_))
        ));
        assert!(matches!(
            ByteStream::open(dir.path(), Encoding::None, MIN_BUFFER_SIZE),
            Err(StreamError::Unreadable { .. })
        ));

        let plain = write_fixture(dir.path(), "plain.sql.gz", Encoding::None, b"SELECT 1;\n");
        assert!(matches!(
            ByteStream::open(&plain, Encoding::Gzip, MIN_BUFFER_SIZE),
            Err(StreamError::UnsupportedEncoding(_))
        ));

        assert!(matches!(
            Encoding::from_path(Path::new("dump.sql.xz")),
            Err(StreamError::UnsupportedEncoding(ext)) if ext == "xz"
        ));
        assert_eq!(Encoding::from_path(Path::new("dump.SQL.GZ")).unwrap(), Encoding::Gzip);
        assert_eq!(Encoding::from_path(Path::new("dump.sql")).unwrap(), Encoding::None);
    }

    #[test]
    fn multi_member_gzip_is_fully_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = vec![];
        for part in [&b"SELECT 1;\n"[..], &b"SELECT 2;\n"[..]] {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
            encoder.write_all(part).unwrap();
            bytes.extend(encoder.finish().unwrap());
        }
        let path = dir.path().join("multi.sql.gz");
        fs::write(&path, bytes).unwrap();

        let mut stream = ByteStream::open(&path, Encoding::Gzip, MIN_BUFFER_SIZE).unwrap();
        assert_eq!(read_all(&mut stream).concat(), b"SELECT 1;\nSELECT 2;\n");
    }
}

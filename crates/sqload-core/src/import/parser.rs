//! 有状态 SQL 语句切分器。
//!
//! 按行输入，输出完整语句。引号、未完成语句、当前分隔符都保存在 [`ParserState`] 中，
//! 可以随游标持久化，在另一个进程里接着切分。
//!
//! 扫描不逐字符进行：字符串外只查找最近的引号或分隔符，字符串内只查找当前引号。

use serde::{Deserialize, Serialize};

use super::{config::ImportConfig, error::ParseError};

/// 切分器的可持久化状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserState {
    pub inside_string: bool,
    pub active_quote: Option<char>,
    /// 尚未遇到分隔符的语句文本
    pub pending: String,
    pub delimiter: String,
    /// pending 跨越的行数
    pub pending_lines: u64,
}

impl ParserState {
    pub fn new(delimiter: &str) -> Self {
        Self {
            inside_string: false,
            active_quote: None,
            pending: String::new(),
            delimiter: delimiter.to_string(),
            pending_lines: 0,
        }
    }

    /// 是否有未完成的语句
    pub fn has_pending(&self) -> bool {
        self.inside_string || !self.pending.trim().is_empty()
    }
}

/// 一条完整语句，text 含结尾分隔符
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
    pub delimiter: String,
}

impl Statement {
    /// 发给数据库的文本：`;` 原样保留，自定义分隔符需要去掉
    pub fn sql(&self) -> &str {
        if self.delimiter == ";" {
            return &self.text;
        }
        self.text
            .strip_suffix(self.delimiter.as_str())
            .unwrap_or(&self.text)
            .trim_end()
    }
}

pub struct SqlParser {
    state: ParserState,
    quotes: Vec<char>,
    comment_markers: Vec<String>,
    max_lines: u64,
    max_bytes: u64,
    /// pending 中已扫描的字节数
    scanned: usize,
    /// pending 中已输出语句占用的前缀，行末统一移除
    start: usize,
}

impl SqlParser {
    pub fn new(config: &ImportConfig) -> Self {
        Self::with_state(config, ParserState::new(&config.delimiter))
    }

    /// 从游标恢复；恢复的 pending 在上一次调用中已扫描完毕
    pub fn with_state(
        config: &ImportConfig,
        state: ParserState,
    ) -> Self {
        let scanned = state.pending.len();
        Self {
            state,
            quotes: config.string_quote_chars.clone(),
            comment_markers: config.comment_markers.clone(),
            max_lines: config.max_statement_lines,
            max_bytes: config.max_statement_bytes,
            scanned,
            start: 0,
        }
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    pub fn into_state(mut self) -> ParserState {
        self.compact();
        self.state
    }

    pub fn delimiter(&self) -> &str {
        &self.state.delimiter
    }

    /// 丢弃未完成语句，保留当前分隔符
    pub fn reset(&mut self) {
        self.state.inside_string = false;
        self.state.active_quote = None;
        self.state.pending.clear();
        self.state.pending_lines = 0;
        self.scanned = 0;
        self.start = 0;
    }

    /// 输入一行，返回本行结束的语句（惰性求值）
    pub fn feed<'a>(
        &'a mut self,
        line: &str,
    ) -> Statements<'a> {
        self.compact();
        let idle = !self.state.has_pending();
        if idle && self.skip_line(line) {
            return Statements { parser: self, done: true };
        }

        if idle {
            self.state.pending.clear();
            self.state.pending_lines = 0;
            self.scanned = 0;
        }
        self.state.pending.push_str(line);
        self.state.pending_lines += 1;
        Statements { parser: self, done: false }
    }

    /// 流结束时调用，仍有未完成语句即为错误
    pub fn finish(&self) -> Result<(), ParseError> {
        if self.state.inside_string || !self.state.pending[self.start..].trim().is_empty() {
            return Err(ParseError::Unterminated {
                inside_string: self.state.inside_string,
            });
        }
        Ok(())
    }

    /// 注释行和 DELIMITER 指令只在语句之间识别
    fn skip_line(
        &mut self,
        line: &str,
    ) -> bool {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return false;
        }

        if let Some(delimiter) = parse_delimiter_directive(trimmed) {
            if delimiter.chars().any(|c| self.quotes.contains(&c)) {
                tracing::warn!("忽略包含引号的分隔符: {}", delimiter);
            } else {
                tracing::debug!("分隔符切换: {} -> {}", self.state.delimiter, delimiter);
                self.state.delimiter = delimiter.to_string();
            }
            return true;
        }

        self.is_comment(trimmed)
    }

    fn is_comment(
        &self,
        trimmed: &str,
    ) -> bool {
        self.comment_markers
            .iter()
            .any(|marker| trimmed.starts_with(marker.as_str()) || trimmed == marker.trim())
    }

    fn next_statement(&mut self) -> Option<Result<Statement, ParseError>> {
        loop {
            let pos = self.scanned;
            let pending = &self.state.pending;
            if pos >= pending.len() {
                return None;
            }
            let rest = &pending[pos..];

            if self.state.inside_string {
                let quote = self.state.active_quote.unwrap_or('\'');
                let Some(found) = rest.find(quote) else {
                    self.scanned = pending.len();
                    return None;
                };
                let idx = pos + found;
                let after = idx + quote.len_utf8();

                if is_escaped(pending, idx) {
                    self.scanned = after;
                } else if pending[after..].starts_with(quote) {
                    // 同种引号连写表示字面引号
                    self.scanned = after + quote.len_utf8();
                } else {
                    self.state.inside_string = false;
                    self.state.active_quote = None;
                    self.scanned = after;
                }
                continue;
            }

            // 字符串外一次向前查找最近的引号或分隔符首字符
            let delimiter = self.state.delimiter.as_str();
            let first = delimiter.chars().next().unwrap_or(';');
            let quotes = &self.quotes;
            let Some((found, c)) = rest
                .char_indices()
                .find(|&(_, c)| c == first || quotes.contains(&c))
            else {
                self.scanned = pending.len();
                return None;
            };
            let idx = pos + found;

            if quotes.contains(&c) {
                if !is_escaped(pending, idx) {
                    self.state.inside_string = true;
                    self.state.active_quote = Some(c);
                }
                self.scanned = idx + c.len_utf8();
                continue;
            }
            if !pending[idx..].starts_with(delimiter) {
                self.scanned = idx + c.len_utf8();
                continue;
            }

            let end = idx + delimiter.len();
            let text = pending[self.start..end].trim().to_string();
            let delimiter = delimiter.to_string();
            let lines = self.state.pending_lines;
            self.start = end;
            self.scanned = end;
            self.skip_trailing_comment();
            // 同一行剩余部分计为新语句的第一行
            let remainder = &self.state.pending[self.start..];
            self.state.pending_lines = if remainder.chars().all(char::is_whitespace) { 0 } else { 1 };

            // 只有分隔符的空语句直接丢弃
            if text.len() == delimiter.len() {
                continue;
            }
            if lines > self.max_lines {
                return Some(Err(ParseError::TooManyLines {
                    lines,
                    limit: self.max_lines,
                }));
            }
            if text.len() as u64 > self.max_bytes {
                return Some(Err(ParseError::TooLarge {
                    bytes: text.len() as u64,
                    limit: self.max_bytes,
                }));
            }
            return Some(Ok(Statement { text, delimiter }));
        }
    }

    /// 分隔符之后的行尾注释不属于下一条语句
    fn skip_trailing_comment(&mut self) {
        let rest = &self.state.pending[self.start..];
        let line_end = rest.find('\n').map_or(rest.len(), |idx| idx + 1);
        let trimmed = rest[..line_end].trim();
        if !trimmed.is_empty() && self.is_comment(trimmed) {
            self.start += line_end;
            self.scanned = self.start;
        }
    }

    /// 移除已输出的语句文本
    fn compact(&mut self) {
        if self.start > 0 {
            self.state.pending.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
    }

    /// 本行扫描完毕：清理空白残留并检查大小限制
    fn end_of_line(&mut self) -> Option<ParseError> {
        self.compact();
        if !self.state.has_pending() {
            self.state.pending.clear();
            self.state.pending_lines = 0;
            self.scanned = 0;
            return None;
        }
        if self.state.pending_lines > self.max_lines {
            return Some(ParseError::TooManyLines {
                lines: self.state.pending_lines,
                limit: self.max_lines,
            });
        }
        if self.state.pending.len() as u64 > self.max_bytes {
            return Some(ParseError::TooLarge {
                bytes: self.state.pending.len() as u64,
                limit: self.max_bytes,
            });
        }
        None
    }
}

/// [`SqlParser::feed`] 返回的语句序列
pub struct Statements<'a> {
    parser: &'a mut SqlParser,
    done: bool,
}

impl Iterator for Statements<'_> {
    type Item = Result<Statement, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.parser.next_statement() {
            Some(Ok(statement)) => Some(Ok(statement)),
            Some(Err(err)) => {
                self.done = true;
                Some(Err(err))
            }
            None => {
                self.done = true;
                self.parser.end_of_line().map(Err)
            }
        }
    }
}

fn parse_delimiter_directive(trimmed: &str) -> Option<&str> {
    let (keyword, rest) = trimmed.split_once(char::is_whitespace)?;
    if !keyword.eq_ignore_ascii_case("DELIMITER") {
        return None;
    }
    rest.split_whitespace().next()
}

/// 前面有奇数个反斜杠即为转义
fn is_escaped(
    text: &str,
    idx: usize,
) -> bool {
    let backslashes = text.as_bytes()[..idx]
        .iter()
        .rev()
        .take_while(|&&b| b == b'\\')
        .count();
    backslashes % 2 == 1
}

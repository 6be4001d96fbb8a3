//! 连续的单行 INSERT 合并为多值 INSERT。
//!
//! 分类只做前后缀匹配，不解析完整语法。可合并的语句必须满足：
//!
//! 1. 以 `;` 结尾（自定义分隔符下的语句一律不合并）；
//! 2. 以 `INSERT INTO` 或 `INSERT IGNORE INTO` 开头；
//! 3. 引号和括号之外出现 `VALUES` 关键字；
//! 4. `VALUES` 之后恰好是一个括号元组，元组之后没有任何内容；
//! 5. 元组内不含子查询。
//!
//! 其余一律视为 [`Classified::Other`]，包括已有的多行 VALUES、
//! `ON DUPLICATE KEY UPDATE`、`INSERT ... SELECT` 等。

use serde::{Deserialize, Serialize};

use super::{error::BatchInvariantError, parser::Statement};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// prefix 形如 `INSERT INTO t (a, b) VALUES`，tuple 含两侧括号
    SimpleInsert { prefix: String, tuple: String },
    Other,
}

pub fn classify(
    statement: &Statement,
    quotes: &[char],
) -> Classified {
    if statement.delimiter != ";" {
        return Classified::Other;
    }
    let Some(body) = statement.text.strip_suffix(';') else {
        return Classified::Other;
    };
    let body = body.trim();

    let mut words = body.split_whitespace();
    let head_ok = match (words.next(), words.next(), words.next()) {
        (Some(insert), Some(into), _) if is_kw(insert, "INSERT") && is_kw(into, "INTO") => true,
        (Some(insert), Some(ignore), Some(into))
            if is_kw(insert, "INSERT") && is_kw(ignore, "IGNORE") && is_kw(into, "INTO") =>
        {
            true
        }
        _ => false,
    };
    if !head_ok {
        return Classified::Other;
    }

    let Some(values_at) = find_values_keyword(body, quotes) else {
        return Classified::Other;
    };
    let head = body[..values_at].trim_end();
    let rest = body[values_at + "VALUES".len()..].trim_start();
    if !rest.starts_with('(') {
        return Classified::Other;
    }
    let Some(close) = matching_paren(rest, quotes) else {
        return Classified::Other;
    };
    if !rest[close + 1..].trim().is_empty() {
        return Classified::Other;
    }

    let tuple = &rest[..=close];
    if contains_subquery(tuple, quotes) {
        return Classified::Other;
    }

    Classified::SimpleInsert {
        prefix: format!("{} VALUES", head),
        tuple: tuple.to_string(),
    }
}

/// 待合并的批次，随游标持久化
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAccumulator {
    pub prefix: Option<String>,
    pub tuples: Vec<String>,
    /// 合并后语句的字节数
    pub bytes: usize,
}

impl BatchAccumulator {
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.tuples.len()
    }
}

pub struct InsertBatcher {
    acc: BatchAccumulator,
    row_limit: usize,
    byte_limit: usize,
    quotes: Vec<char>,
}

impl InsertBatcher {
    pub fn new(
        acc: BatchAccumulator,
        row_limit: usize,
        byte_limit: usize,
        quotes: &[char],
    ) -> Self {
        Self {
            acc,
            row_limit,
            byte_limit,
            quotes: quotes.to_vec(),
        }
    }

    pub fn state(&self) -> &BatchAccumulator {
        &self.acc
    }

    pub fn into_state(self) -> BatchAccumulator {
        self.acc
    }

    pub fn is_empty(&self) -> bool {
        self.acc.is_empty()
    }

    /// 处理一条语句，按原始顺序返回需要立即执行的 SQL
    pub fn accumulate(
        &mut self,
        statement: &Statement,
    ) -> Result<Vec<String>, BatchInvariantError> {
        let mut ready = vec![];

        if self.row_limit <= 1 {
            ready.extend(self.flush_pending()?);
            ready.push(statement.sql().to_string());
            return Ok(ready);
        }

        let (prefix, tuple) = match classify(statement, &self.quotes) {
            Classified::SimpleInsert { prefix, tuple } => (prefix, tuple),
            Classified::Other => {
                ready.extend(self.flush_pending()?);
                ready.push(statement.sql().to_string());
                return Ok(ready);
            }
        };

        let single = prefix.len() + 1 + tuple.len() + 1;
        if single > self.byte_limit {
            tracing::debug!("单行 INSERT 超过批次字节上限，不合并: {} 字节", single);
            ready.extend(self.flush_pending()?);
            ready.push(statement.sql().to_string());
            return Ok(ready);
        }

        let same_prefix = self.acc.prefix.as_deref() == Some(prefix.as_str());
        if !same_prefix || self.acc.bytes + 2 + tuple.len() > self.byte_limit {
            ready.extend(self.flush_pending()?);
        }

        if self.acc.is_empty() {
            self.acc.bytes = single;
            self.acc.prefix = Some(prefix);
        } else {
            self.acc.bytes += 2 + tuple.len();
        }
        self.acc.tuples.push(tuple);

        if self.acc.rows() >= self.row_limit {
            ready.push(self.flush()?);
        }
        Ok(ready)
    }

    /// 输出多值 INSERT 并清空批次
    pub fn flush(&mut self) -> Result<String, BatchInvariantError> {
        let Some(prefix) = self.acc.prefix.take() else {
            return Err(BatchInvariantError(format!(
                "批次没有 INSERT 前缀 (rows: {})",
                self.acc.rows()
            )));
        };
        if self.acc.is_empty() {
            return Err(BatchInvariantError(format!("批次为空: {}", prefix)));
        }
        let sql = format!("{} {};", prefix, self.acc.tuples.join(", "));
        self.acc = BatchAccumulator::default();
        Ok(sql)
    }

    /// 有待合并的行时才 flush
    pub fn flush_pending(&mut self) -> Result<Option<String>, BatchInvariantError> {
        if self.acc.is_empty() {
            return Ok(None);
        }
        self.flush().map(Some)
    }
}

/// 语句作用的表名，用于执行失败时的补救提示
pub fn target_object(sql: &str) -> Option<String> {
    let words: Vec<&str> = sql.split_whitespace().take(8).collect();
    let mut idx = 0;
    let next_is = |kw: &str, idx: &mut usize| -> bool {
        if words.get(*idx).is_some_and(|w| is_kw(w, kw)) {
            *idx += 1;
            true
        } else {
            false
        }
    };

    let found = if next_is("INSERT", &mut idx) || next_is("REPLACE", &mut idx) {
        next_is("IGNORE", &mut idx);
        next_is("INTO", &mut idx)
    } else if next_is("CREATE", &mut idx) {
        next_is("TEMPORARY", &mut idx);
        let table = next_is("TABLE", &mut idx);
        if table && next_is("IF", &mut idx) {
            next_is("NOT", &mut idx);
            next_is("EXISTS", &mut idx);
        }
        table
    } else if next_is("DROP", &mut idx) {
        let table = next_is("TABLE", &mut idx);
        if table && next_is("IF", &mut idx) {
            next_is("EXISTS", &mut idx);
        }
        table
    } else if next_is("ALTER", &mut idx) || next_is("TRUNCATE", &mut idx) {
        next_is("TABLE", &mut idx);
        true
    } else {
        false
    };

    if !found {
        return None;
    }
    let name = words.get(idx)?;
    let name = name
        .split('(')
        .next()
        .unwrap_or_default()
        .trim_end_matches([';', ',']);
    (!name.is_empty()).then(|| name.to_string())
}

fn is_kw(
    word: &str,
    keyword: &str,
) -> bool {
    word.eq_ignore_ascii_case(keyword)
}

/// 引号外、括号深度为 0 处的 VALUES 关键字
fn find_values_keyword(
    body: &str,
    quotes: &[char],
) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut found = None;
    scan_unquoted(body, quotes, |idx, c| {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            'V' | 'v' if depth == 0 => {
                let end = idx + "VALUES".len();
                let boundary_before = idx == 0 || !is_ident_byte(bytes[idx - 1]);
                let boundary_after = end >= bytes.len() || !is_ident_byte(bytes[end]);
                if boundary_before
                    && boundary_after
                    && body.get(idx..end).is_some_and(|w| w.eq_ignore_ascii_case("VALUES"))
                {
                    found = Some(idx);
                    return false;
                }
            }
            _ => {}
        }
        true
    });
    found
}

/// text 以 `(` 开头，返回与之配对的 `)` 位置
fn matching_paren(
    text: &str,
    quotes: &[char],
) -> Option<usize> {
    let mut depth = 0usize;
    let mut close = None;
    scan_unquoted(text, quotes, |idx, c| {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    close = Some(idx);
                    return false;
                }
            }
            _ => {}
        }
        true
    });
    close
}

fn contains_subquery(
    tuple: &str,
    quotes: &[char],
) -> bool {
    let mut found = false;
    scan_unquoted(tuple, quotes, |idx, c| {
        if c == '(' {
            let after = tuple[idx + 1..].trim_start();
            if after.get(..6).is_some_and(|w| w.eq_ignore_ascii_case("SELECT")) {
                found = true;
                return false;
            }
        }
        true
    });
    found
}

/// 对引号外的每个字符回调，回调返回 false 时停止
fn scan_unquoted(
    text: &str,
    quotes: &[char],
    mut visit: impl FnMut(usize, char) -> bool,
) {
    let mut active: Option<char> = None;
    let mut chars = text.char_indices();
    while let Some((idx, c)) = chars.next() {
        match active {
            Some(quote) => {
                if c == '\\' {
                    chars.next();
                } else if c == quote {
                    active = None;
                }
            }
            None if quotes.contains(&c) => active = Some(c),
            None => {
                if !visit(idx, c) {
                    return;
                }
            }
        }
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

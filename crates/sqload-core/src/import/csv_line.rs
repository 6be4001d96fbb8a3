//! CSV 导入：每行一条记录，转换为单行 INSERT 后交给批处理。

use super::{config::CsvOptions, error::ParseError};

pub struct CsvLineConverter {
    table: String,
    delimiter: u8,
    add_quotes: bool,
    add_slashes: bool,
    null_token: Option<String>,
}

impl CsvLineConverter {
    pub fn new(options: &CsvOptions) -> Self {
        Self {
            table: options.table.trim().to_string(),
            delimiter: options.delimiter as u8,
            add_quotes: options.add_quotes,
            add_slashes: options.add_slashes,
            null_token: options.null_token.clone(),
        }
    }

    /// 空行返回 None
    pub fn convert(
        &self,
        line: &str,
    ) -> Result<Option<String>, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(line.as_bytes());
        let mut record = csv::StringRecord::new();
        let found = reader
            .read_record(&mut record)
            .map_err(|err| ParseError::Csv(err.to_string()))?;
        if !found {
            return Ok(None);
        }

        let fields: Vec<String> = record.iter().map(|field| self.format_field(field)).collect();
        Ok(Some(format!("INSERT INTO {} VALUES ({});", self.table, fields.join(", "))))
    }

    fn format_field(
        &self,
        field: &str,
    ) -> String {
        if self.null_token.as_deref() == Some(field) {
            return "NULL".into();
        }
        let value = if self.add_slashes {
            field.replace('\\', "\\\\").replace('\'', "\\'")
        } else {
            field.to_string()
        };
        if self.add_quotes { format!("'{}'", value) } else { value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CsvOptions {
        CsvOptions {
            table: "users".into(),
            ..CsvOptions::default()
        }
    }

    #[test]
    fn converts_quoted_fields() {
        let converter = CsvLineConverter::new(&options());
        assert_eq!(
            converter.convert("1,\"Smith, John\",it's\n").unwrap().as_deref(),
            Some("INSERT INTO users VALUES ('1', 'Smith, John', 'it\\'s');")
        );
        assert_eq!(converter.convert("\r\n").unwrap(), None);
    }

    #[test]
    fn null_token_and_raw_fields() {
        let converter = CsvLineConverter::new(&CsvOptions {
            delimiter: ';',
            add_quotes: false,
            add_slashes: false,
            null_token: Some("\\N".into()),
            ..options()
        });
        assert_eq!(
            converter.convert("1;\\N;NOW()").unwrap().as_deref(),
            Some("INSERT INTO users VALUES (1, NULL, NOW());")
        );
    }
}

//! Streaming record parser
//!
//! Files are read one record at a time; nothing but the current record is held
//! in memory. [`validate_structure`] pre-scans a file for field-count errors,
//! [`RowReader`] turns records into [`Row`]s.

use encoding_rs::{Decoder, DecoderResult, Encoding};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::folder::FolderConfig;
use crate::transform::{TransformFn, TransformRegistry};
use crate::value::{Row, Value};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Decodes a byte stream incrementally and splits it on a (possibly
/// multi-character) record delimiter.
///
/// Splitting happens on decoded text, so delimiter characters inside a
/// multi-byte sequence of a legacy encoding never cut a record.
pub struct RecordReader<R> {
    inner: R,
    decoder: Decoder,
    encoding: &'static Encoding,
    delimiter: String,
    strip_cr: bool,
    /// Decoded text not yet handed out, starting at `start`
    pending: String,
    start: usize,
    /// Where the next delimiter search begins
    scan_from: usize,
    record: u64,
    eof: bool,
    malformed: bool,
    done: bool,
}

impl<R: BufRead> RecordReader<R> {
    /// An empty delimiter falls back to `\n`
    pub fn new(inner: R, encoding: &'static Encoding, delimiter: &str) -> Self {
        let delimiter = if delimiter.is_empty() { "\n" } else { delimiter };
        Self {
            inner,
            decoder: encoding.new_decoder_without_bom_handling(),
            encoding,
            strip_cr: delimiter == "\n",
            delimiter: delimiter.to_string(),
            pending: String::new(),
            start: 0,
            scan_from: 0,
            record: 0,
            eof: false,
            malformed: false,
            done: false,
        }
    }

    /// Next record and its 1-based number, without the delimiter; `None` at
    /// end of input. Undecodable bytes fail the record that contains them.
    pub fn next_record(&mut self) -> Result<Option<(u64, String)>> {
        if self.done {
            return Ok(None);
        }

        loop {
            if let Some(pos) = self.pending[self.scan_from..].find(&self.delimiter) {
                let end = self.scan_from + pos;
                let record = self.pending[self.start..end].to_string();
                self.start = end + self.delimiter.len();
                self.scan_from = self.start;
                return Ok(Some(self.finish(record)));
            }

            if self.malformed {
                self.done = true;
                return Err(IngestError::Decode {
                    record: self.record + 1,
                    encoding: self.encoding.name(),
                });
            }

            if self.eof {
                self.done = true;
                if self.start == self.pending.len() {
                    return Ok(None);
                }
                let record = self.pending[self.start..].to_string();
                return Ok(Some(self.finish(record)));
            }

            self.fill()?;
        }
    }

    /// Decode the next buffer of input onto `pending`
    fn fill(&mut self) -> Result<()> {
        self.pending.replace_range(..self.start, "");
        self.start = 0;

        // a delimiter may straddle the old tail and the new text
        let mut scan_from = self.pending.len().saturating_sub(self.delimiter.len());
        while !self.pending.is_char_boundary(scan_from) {
            scan_from -= 1;
        }
        self.scan_from = scan_from;

        let buf = self.inner.fill_buf()?;
        let last = buf.is_empty();
        let consumed = buf.len();
        let mut src = buf;

        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length_without_replacement(src.len())
                .unwrap_or(src.len() * 3 + 16);
            self.pending.reserve(needed);

            let (result, read) =
                self.decoder
                    .decode_to_string_without_replacement(src, &mut self.pending, last);
            src = &src[read..];
            match result {
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => continue,
                DecoderResult::Malformed(_, _) => {
                    self.malformed = true;
                    break;
                },
            }
        }

        self.inner.consume(consumed);
        if last {
            self.eof = true;
        }
        Ok(())
    }

    fn finish(&mut self, mut record: String) -> (u64, String) {
        self.record += 1;
        if self.strip_cr && record.ends_with('\r') {
            record.pop();
        }
        (self.record, record)
    }
}

/// Decoded, non-blank records with their 1-based record numbers
pub struct Records<R> {
    reader: RecordReader<R>,
    failed: bool,
}

impl<R: BufRead> Records<R> {
    pub fn new(reader: R, config: &FolderConfig) -> Self {
        Self {
            reader: RecordReader::new(reader, config.encoding, &config.record_delimiter),
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for Records<R> {
    type Item = Result<(u64, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let (record, text) = match self.reader.next_record() {
                Ok(Some(next)) => next,
                Ok(None) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                },
            };

            let text = if record == 1 && text.starts_with('\u{FEFF}') {
                text['\u{FEFF}'.len_utf8()..].to_string()
            } else {
                text
            };

            if text.trim().is_empty() {
                continue;
            }
            return Some(Ok((record, text)));
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::with_capacity(READ_BUFFER_SIZE, File::open(path)?))
}

fn split_header(line: &str, config: &FolderConfig) -> Vec<String> {
    line.split(config.field_delimiter.as_str())
        .map(|h| h.trim().to_string())
        .collect()
}

/// Pre-scan `path` and fail on the first record whose field count differs
/// from the header count. Returns the number of data records.
pub fn validate_structure(path: &Path, config: &FolderConfig) -> Result<u64> {
    validate_records(open(path)?, config)
}

pub fn validate_records<R: BufRead>(reader: R, config: &FolderConfig) -> Result<u64> {
    let mut records = Records::new(reader, config);

    let expected = if config.first_line_header {
        match records.next() {
            Some(header) => split_header(&header?.1, config).len(),
            None => return Ok(0),
        }
    } else {
        config.headers.len()
    };

    let mut count = 0;
    for record in records {
        let (record, text) = record?;
        let found = text.split(config.field_delimiter.as_str()).count();
        if found != expected {
            return Err(IngestError::Structure {
                record,
                expected,
                found,
            });
        }
        count += 1;
    }

    debug!(records = count, fields = expected, "Structure validated");
    Ok(count)
}

/// Transforms resolved for a folder config, keyed by field name
#[derive(Clone, Default)]
pub struct FieldTransforms {
    by_field: HashMap<String, (String, TransformFn)>,
}

impl FieldTransforms {
    /// Resolve every configured transform; an unknown name is a configuration error
    pub fn resolve(config: &FolderConfig, registry: &TransformRegistry) -> Result<Self> {
        let mut by_field = HashMap::new();
        for (field, spec) in &config.transforms {
            let f = registry
                .resolve(&spec.name, spec.source.as_deref())
                .ok_or_else(|| IngestError::UnknownTransform {
                    name: spec.name.clone(),
                    field: field.clone(),
                })?;
            by_field.insert(field.clone(), (spec.name.clone(), f));
        }
        Ok(Self { by_field })
    }

    fn for_headers(&self, headers: &[String]) -> Vec<Option<(String, TransformFn)>> {
        for field in self.by_field.keys() {
            if !headers.contains(field) {
                warn!(field = %field, "Transform configured for a field missing from the headers");
            }
        }
        headers.iter().map(|h| self.by_field.get(h).cloned()).collect()
    }
}

/// Lazy, finite sequence of rows from one file.
///
/// After the first error the iterator is exhausted.
pub struct RowReader<R> {
    records: Records<R>,
    config: Arc<FolderConfig>,
    transforms: FieldTransforms,
    headers: Option<Arc<[String]>>,
    per_column: Vec<Option<(String, TransformFn)>>,
    failed: bool,
}

impl RowReader<BufReader<File>> {
    pub fn open(path: &Path, config: Arc<FolderConfig>, transforms: FieldTransforms) -> Result<Self> {
        Ok(Self::new(open(path)?, config, transforms))
    }
}

impl<R: BufRead> RowReader<R> {
    pub fn new(reader: R, config: Arc<FolderConfig>, transforms: FieldTransforms) -> Self {
        Self {
            records: Records::new(reader, &config),
            config,
            transforms,
            headers: None,
            per_column: Vec::new(),
            failed: false,
        }
    }

    /// Headers in effect, read from the file on first use when configured so
    fn headers(&mut self) -> Option<Result<Arc<[String]>>> {
        if let Some(headers) = &self.headers {
            return Some(Ok(headers.clone()));
        }

        let headers: Vec<String> = if self.config.first_line_header {
            match self.records.next()? {
                Ok((_, line)) => split_header(&line, &self.config),
                Err(e) => return Some(Err(e)),
            }
        } else {
            self.config.headers.clone()
        };

        let headers: Arc<[String]> = headers.into();
        self.per_column = self.transforms.for_headers(&headers);
        self.headers = Some(headers.clone());
        Some(Ok(headers))
    }

    fn parse_record(&self, headers: &Arc<[String]>, record: u64, line: &str) -> Result<Row> {
        let multi = self.config.multi_value_delimiter.as_deref();
        let sub = self.config.sub_value_delimiter.as_deref();
        let mut fields = line.split(self.config.field_delimiter.as_str());

        let mut values = Vec::with_capacity(headers.len());
        for (column, header) in headers.iter().enumerate() {
            let raw = fields.next().map(str::trim).unwrap_or_default();
            let mut value = decompose(raw, multi, sub);

            if let Some((name, f)) = &self.per_column[column] {
                value = value
                    .try_map_leaves(|leaf| f(&leaf))
                    .map_err(|source| IngestError::Transform {
                        transform: name.clone(),
                        field: header.clone(),
                        record,
                        source,
                    })?;
            }
            values.push(value);
        }

        Ok(Row::new(headers.clone(), values))
    }
}

impl<R: BufRead> Iterator for RowReader<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let result = match self.headers()? {
            Ok(headers) => match self.records.next()? {
                Ok((record, line)) => self.parse_record(&headers, record, &line),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

/// Split a raw field into its multi-value / sub-value shape
pub fn decompose(raw: &str, multi: Option<&str>, sub: Option<&str>) -> Value {
    let split_sub = |part: &str| -> Option<Vec<String>> {
        sub.filter(|s| part.contains(*s))
            .map(|s| part.split(s).map(str::to_string).collect())
    };

    if let Some(m) = multi.filter(|m| raw.contains(*m)) {
        Value::Nested(
            raw.split(m)
                .map(|part| split_sub(part).unwrap_or_else(|| vec![part.to_string()]))
                .collect(),
        )
    } else if let Some(list) = split_sub(raw) {
        Value::List(list)
    } else {
        Value::Scalar(raw.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::folder::properties;
    use std::io::Cursor;

    fn config(text: &str) -> Arc<FolderConfig> {
        Arc::new(FolderConfig::from_properties(&properties::parse(text), "test").unwrap())
    }

    fn rows(config: Arc<FolderConfig>, input: &[u8]) -> Vec<Row> {
        rows_with(config, input, &TransformRegistry::with_builtins())
    }

    fn rows_with(config: Arc<FolderConfig>, input: &[u8], registry: &TransformRegistry) -> Vec<Row> {
        let transforms = FieldTransforms::resolve(&config, registry).unwrap();
        RowReader::new(Cursor::new(input.to_vec()), config, transforms)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    fn scalar(s: &str) -> Value {
        Value::Scalar(s.to_string())
    }

    fn utf8_records(input: &[u8], delimiter: &str, capacity: usize) -> Vec<(u64, String)> {
        let inner = BufReader::with_capacity(capacity, Cursor::new(input.to_vec()));
        let mut reader = RecordReader::new(inner, encoding_rs::UTF_8, delimiter);
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            records.push(record);
        }
        records
    }

    #[test]
    fn test_record_reader_multichar_delimiter() {
        let records = utf8_records(b"a||b|c||", "||", 64);
        assert_eq!(records, vec![(1, "a".to_string()), (2, "b|c".to_string())]);
    }

    #[test]
    fn test_record_reader_crlf_and_no_trailing_delimiter() {
        let records = utf8_records(b"a\r\nb", "\n", 64);
        assert_eq!(records, vec![(1, "a".to_string()), (2, "b".to_string())]);
    }

    #[test]
    fn test_record_reader_one_byte_reads() {
        // characters and delimiters split across buffer refills
        let records = utf8_records("Äb||ц||x".as_bytes(), "||", 1);
        assert_eq!(
            records,
            vec![(1, "Äb".to_string()), (2, "ц".to_string()), (3, "x".to_string())]
        );
    }

    #[test]
    fn test_shift_jis_trail_byte_is_not_a_delimiter() {
        let config = config("tableVersion=T\nheaders=ID,NAME\nencoding=Shift_JIS\nrecordDelimiter=|\n");
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode("1,ポ|2,x|");
        // second byte of ポ is the ASCII `|`
        assert_eq!(&bytes[2..4], &[0x83, 0x7c]);

        let rows = rows(config, &bytes);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("NAME"), Some(&scalar("ポ")));
        assert_eq!(rows[1].get("ID"), Some(&scalar("2")));
    }

    #[test]
    fn test_header_line_scenario() {
        let config = config("tableVersion=CUSTOMER\nisFirstLineHeader=true\n");
        let rows = rows(config, b"ID,NAME\n1,John\n2,Jane\n");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("ID"), Some(&scalar("1")));
        assert_eq!(rows[0].get("NAME"), Some(&scalar("John")));
        assert_eq!(rows[1].get("ID"), Some(&scalar("2")));
        assert_eq!(rows[1].get("NAME"), Some(&scalar("Jane")));
    }

    #[test]
    fn test_bom_blank_lines_and_trimming() {
        let config = config("tableVersion=T\nisFirstLineHeader=true\n");
        let rows = rows(config, "\u{FEFF} ID , NAME \r\n\r\n 7 , Ann \r\n   \n".as_bytes());

        assert_eq!(rows.len(), 1);
        let headers: Vec<_> = rows[0].iter().map(|(h, _)| h.to_string()).collect();
        assert_eq!(headers, vec!["ID", "NAME"]);
        assert_eq!(rows[0].get("NAME"), Some(&scalar("Ann")));
    }

    #[test]
    fn test_configured_headers_pad_missing_fields() {
        let config = config("tableVersion=T\nheaders=ID,NAME,CITY\nfieldDelimiter=;\n");
        let rows = rows(config, b"1;Bob\n");
        assert_eq!(rows[0].get("CITY"), Some(&scalar("")));
        assert_eq!(rows[0].len(), 3);
    }

    #[test]
    fn test_multi_and_sub_values() {
        let config = config(
            "tableVersion=T\nheaders=ID,ADDR,TAGS\nmultiValueDelimiter=]\nsubValueDelimiter=!\n",
        );
        let rows = rows(config, b"1,a!b]c,x!y!z\n");

        assert_eq!(
            rows[0].get("ADDR"),
            Some(&Value::Nested(vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string()],
            ]))
        );
        assert_eq!(
            rows[0].get("TAGS"),
            Some(&Value::List(vec!["x".into(), "y".into(), "z".into()]))
        );
    }

    #[test]
    fn test_decompose_shapes() {
        assert_eq!(decompose("plain", Some("]"), Some("!")), scalar("plain"));
        assert_eq!(
            decompose("a]b", Some("]"), None),
            Value::Nested(vec![vec!["a".into()], vec!["b".into()]])
        );
        assert_eq!(decompose("a!b", None, None), scalar("a!b"));
        assert_eq!(
            decompose("a!", None, Some("!")),
            Value::List(vec!["a".into(), "".into()])
        );
    }

    #[test]
    fn test_transform_applies_to_every_leaf() {
        let config = config(
            "tableVersion=T\nheaders=ID,NAME,ALIASES\nmultiValueDelimiter=]\nsubValueDelimiter=!\n\
             handler.NAME=upper\nhandler.ALIASES=upper\n",
        );
        let rows = rows(config, b"1,ann,bo!cy]dee\n");

        assert_eq!(rows[0].get("ID"), Some(&scalar("1")));
        assert_eq!(rows[0].get("NAME"), Some(&scalar("ANN")));
        assert_eq!(
            rows[0].get("ALIASES"),
            Some(&Value::Nested(vec![
                vec!["BO".into(), "CY".into()],
                vec!["DEE".into()],
            ]))
        );
    }

    #[test]
    fn test_transform_failure_stops_iteration() {
        let config = config("tableVersion=T\nheaders=ID,NAME\nhandler.NAME=required\n");
        let transforms = FieldTransforms::resolve(&config, &TransformRegistry::with_builtins()).unwrap();
        let mut reader = RowReader::new(Cursor::new(b"1,a\n2,\n3,c\n".to_vec()), config, transforms);

        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, IngestError::Transform { record: 2, ref field, .. } if field == "NAME"));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_unknown_transform_is_config_error() {
        let config = config("tableVersion=T\nheaders=ID\nhandler.ID=rot13\n");
        let err = FieldTransforms::resolve(&config, &TransformRegistry::with_builtins())
            .err()
            .unwrap();
        assert!(matches!(err, IngestError::UnknownTransform { .. }));
    }

    #[test]
    fn test_windows_1251() {
        let config = config("tableVersion=T\nheaders=ID,NAME\nencoding=windows-1251\nhandler.NAME=translit\n");
        let (bytes, _, _) = encoding_rs::WINDOWS_1251.encode("1,Иван\n");
        let rows = rows(config, &bytes);
        assert_eq!(rows[0].get("NAME"), Some(&scalar("IVAN")));
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let config = config("tableVersion=T\nheaders=ID\n");
        let transforms = FieldTransforms::default();
        let result: Result<Vec<Row>> =
            RowReader::new(Cursor::new(b"ok\n\xff\xfe\n".to_vec()), config, transforms).collect();
        assert!(matches!(result, Err(IngestError::Decode { record: 2, .. })));
    }

    #[test]
    fn test_custom_record_delimiter() {
        let config = config("tableVersion=T\nheaders=A,B\nrecordDelimiter=~\nfieldDelimiter=|\n");
        let rows = rows(config, b"1|2~3|4~");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("B"), Some(&scalar("4")));
    }

    #[test]
    fn test_validate_structure() {
        let config = config("tableVersion=T\nisFirstLineHeader=true\n");
        assert_eq!(
            validate_records(Cursor::new(b"A,B\n1,2\n\n3,\n".to_vec()), &config).unwrap(),
            2
        );

        let err = validate_records(Cursor::new(b"A,B\n1,2\n3\n4,5\n".to_vec()), &config).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Structure {
                record: 3,
                expected: 2,
                found: 1
            }
        ));

        let configured = config_headers();
        let err = validate_records(Cursor::new(b"1,2,3\n".to_vec()), &configured).unwrap_err();
        assert!(matches!(err, IngestError::Structure { expected: 2, found: 3, .. }));
    }

    fn config_headers() -> Arc<FolderConfig> {
        config("tableVersion=T\nheaders=A,B\n")
    }

    #[test]
    fn test_validate_empty_file() {
        let config = config("tableVersion=T\nisFirstLineHeader=true\n");
        assert_eq!(validate_records(Cursor::new(Vec::new()), &config).unwrap(), 0);
        assert!(rows(config, b"").is_empty());
    }
}

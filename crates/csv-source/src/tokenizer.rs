//! Tokenizer for the upstream CSV dialect.
//!
//! The exports this pipeline reads are not RFC 4180: besides `""` they
//! escape quotes as `\"`, and a quoted field may contain raw line breaks.
//! [`tokenize`] works on a whole (possibly multi-line) record buffer and
//! reports whether the record is complete; [`RecordAssembler`] feeds it
//! physical lines until it is.
//!
//! Rules inside a quoted field:
//!
//! - `""` is a literal quote.
//! - `"` followed by `,`, a line break or the end of the buffer closes the
//!   field; any other `"` is literal.
//! - `\"` followed by `,` (or by the end of input on the final flush) emits a
//!   literal backslash and closes the field without counting toward quote
//!   parity. Anywhere else `\"` is a literal quote.
//!
//! A record is complete when no quote is open and quote parity is even.

use thiserror::Error;

/// Default ceiling for a buffered multi-line record.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 100_000;

/// Fields of a record buffer and whether the record is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokenized {
    pub fields: Vec<String>,
    pub complete: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    /// A multi-line record grew past the buffer ceiling.
    #[error("record starting at line {start_line} exceeds {limit} bytes after {lines} lines")]
    RecordTooLarge {
        start_line: u64,
        lines: usize,
        limit: usize,
    },
}

/// Tokenize a record buffer.
pub fn tokenize(record: &str) -> Tokenized {
    tokenize_with(record, false)
}

/// Tokenize a buffer at end of input, where no more lines can follow.
pub fn tokenize_final(record: &str) -> Vec<String> {
    tokenize_with(record, true).fields
}

fn tokenize_with(record: &str, at_eof: bool) -> Tokenized {
    let chars: Vec<char> = record.chars().collect();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut parity = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if !in_quotes {
            match c {
                '"' => {
                    in_quotes = true;
                    parity += 1;
                }
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
            i += 1;
            continue;
        }

        match (c, next) {
            ('\\', Some('"')) => {
                let closes = match chars.get(i + 2) {
                    Some(',') => true,
                    None => at_eof,
                    Some(_) => false,
                };
                if closes {
                    field.push('\\');
                    in_quotes = false;
                } else {
                    field.push('"');
                }
                i += 2;
            }
            ('"', Some('"')) => {
                field.push('"');
                i += 2;
            }
            ('"', None | Some(',' | '\r' | '\n')) => {
                in_quotes = false;
                parity += 1;
                i += 1;
            }
            _ => {
                field.push(c);
                i += 1;
            }
        }
    }
    fields.push(field);

    Tokenized {
        fields,
        complete: !in_quotes && parity % 2 == 0,
    }
}

/// A complete logical record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub fields: Vec<String>,
    /// 1-based physical line the record started on
    pub start_line: u64,
    /// Number of physical lines the record spans
    pub lines: usize,
    /// Size of the joined record text in bytes
    pub bytes: usize,
}

/// Joins physical lines into logical records.
#[derive(Debug)]
pub struct RecordAssembler {
    buffer: String,
    buffered_lines: usize,
    start_line: u64,
    line_number: u64,
    max_record_bytes: usize,
}

impl Default for RecordAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_BYTES)
    }
}

impl RecordAssembler {
    pub fn new(max_record_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            buffered_lines: 0,
            start_line: 0,
            line_number: 0,
            max_record_bytes,
        }
    }

    /// Feed one physical line (without its terminator).
    ///
    /// Returns the record once it is complete, `Ok(None)` while more lines
    /// are needed, or an error when the buffered record is discarded for
    /// exceeding the size ceiling.
    pub fn push_line(&mut self, line: &str) -> Result<Option<Record>, TokenizeError> {
        self.line_number += 1;
        if self.buffered_lines == 0 {
            self.start_line = self.line_number;
        } else {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
        self.buffered_lines += 1;

        let tokenized = tokenize(&self.buffer);
        if tokenized.complete {
            return Ok(Some(self.take(tokenized.fields)));
        }

        if self.buffer.len() > self.max_record_bytes {
            let err = TokenizeError::RecordTooLarge {
                start_line: self.start_line,
                lines: self.buffered_lines,
                limit: self.max_record_bytes,
            };
            self.reset();
            return Err(err);
        }
        Ok(None)
    }

    /// Flush a record left open at end of input.
    pub fn finish(&mut self) -> Option<Record> {
        if self.buffered_lines == 0 {
            return None;
        }
        let fields = tokenize_final(&self.buffer);
        Some(self.take(fields))
    }

    /// Whether a partial record is buffered.
    pub fn is_pending(&self) -> bool {
        self.buffered_lines > 0
    }

    /// Count a physical line that is not part of any record.
    pub fn skip_line(&mut self) {
        self.line_number += 1;
    }

    fn take(&mut self, fields: Vec<String>) -> Record {
        let record = Record {
            fields,
            start_line: self.start_line,
            lines: self.buffered_lines,
            bytes: self.buffer.len(),
        };
        self.reset();
        record
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.buffered_lines = 0;
    }
}

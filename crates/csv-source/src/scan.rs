//! Source file inspection without touching the store.

use crate::lines::LineReader;
use crate::tokenizer::{Record, RecordAssembler, TokenizeError};
use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncBufRead, BufReader};

/// Multi-line records listed individually in a report.
const MAX_LISTED_RECORDS: usize = 20;

/// A record that spans more than one physical line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiLineRecord {
    pub start_line: u64,
    pub lines: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub physical_lines: u64,
    /// Logical records, header included
    pub records: u64,
    pub multi_line_records: u64,
    /// The first few multi-line records
    pub multi_line_samples: Vec<MultiLineRecord>,
    pub longest_span: usize,
    pub unparseable: u64,
    pub lossy_lines: u64,
    pub header_fields: usize,
    pub min_fields: usize,
    pub max_fields: usize,
    pub largest_record_bytes: usize,
    /// An open record was flushed at end of input
    pub unterminated: bool,
}

impl ScanReport {
    fn record(&mut self, record: &Record) {
        let width = record.fields.len();
        if self.records == 0 {
            self.header_fields = width;
            self.min_fields = width;
        }
        self.records += 1;
        self.min_fields = self.min_fields.min(width);
        self.max_fields = self.max_fields.max(width);
        self.largest_record_bytes = self.largest_record_bytes.max(record.bytes);

        if record.lines > 1 {
            self.multi_line_records += 1;
            self.longest_span = self.longest_span.max(record.lines);
            if self.multi_line_samples.len() < MAX_LISTED_RECORDS {
                self.multi_line_samples.push(MultiLineRecord {
                    start_line: record.start_line,
                    lines: record.lines,
                });
            }
        }
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "physical lines:      {}", self.physical_lines)?;
        writeln!(f, "logical records:     {}", self.records)?;
        writeln!(f, "header fields:       {}", self.header_fields)?;
        writeln!(
            f,
            "fields per record:   {}..{}",
            self.min_fields, self.max_fields
        )?;
        writeln!(f, "largest record:      {} bytes", self.largest_record_bytes)?;
        writeln!(f, "multi-line records:  {}", self.multi_line_records)?;
        for sample in &self.multi_line_samples {
            writeln!(
                f,
                "  lines {}-{} ({} lines)",
                sample.start_line,
                sample.start_line + sample.lines as u64 - 1,
                sample.lines
            )?;
        }
        writeln!(f, "unparseable records: {}", self.unparseable)?;
        writeln!(f, "lossy UTF-8 lines:   {}", self.lossy_lines)?;
        if self.unterminated {
            writeln!(f, "warning: file ends inside an open quoted field")?;
        }
        Ok(())
    }
}

/// Scan a CSV file.
pub async fn scan_file(path: &Path, max_record_bytes: usize) -> Result<ScanReport> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    scan_reader(BufReader::new(file), max_record_bytes)
        .await
        .with_context(|| format!("Failed to scan {}", path.display()))
}

pub async fn scan_reader<R: AsyncBufRead + Unpin>(
    reader: R,
    max_record_bytes: usize,
) -> Result<ScanReport> {
    let mut lines = LineReader::new(reader);
    let mut assembler = RecordAssembler::new(max_record_bytes);
    let mut report = ScanReport::default();

    while let Some(line) = lines.next_line().await? {
        report.physical_lines += 1;
        if line.lossy {
            report.lossy_lines += 1;
        }
        match assembler.push_line(&line.text) {
            Ok(Some(record)) => report.record(&record),
            Ok(None) => {}
            Err(TokenizeError::RecordTooLarge { start_line, lines, .. }) => {
                tracing::warn!(
                    "Unparseable record starting at line {} ({} lines buffered)",
                    start_line,
                    lines
                );
                report.unparseable += 1;
            }
        }
    }

    if let Some(record) = assembler.finish() {
        report.unterminated = true;
        report.record(&record);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_counts_multi_line_records() {
        let data: &[u8] = b"id,notes\n1,plain\n2,\"spans\ntwo lines\"\n3,\"and\nthree\nlines\"\n4,x\n";
        let report = scan_reader(data, 1000).await.unwrap();

        assert_eq!(report.physical_lines, 8);
        assert_eq!(report.records, 5);
        assert_eq!(report.multi_line_records, 2);
        assert_eq!(
            report.multi_line_samples,
            vec![
                MultiLineRecord {
                    start_line: 3,
                    lines: 2
                },
                MultiLineRecord {
                    start_line: 5,
                    lines: 3
                },
            ]
        );
        assert_eq!(report.longest_span, 3);
        assert_eq!(report.header_fields, 2);
        assert_eq!(report.max_fields, 2);
        assert!(!report.unterminated);
    }

    #[tokio::test]
    async fn test_scan_reports_unparseable_and_unterminated() {
        let data: &[u8] = b"a,b\n\"runaway,0123456789\n0123456789\n";
        let report = scan_reader(data, 20).await.unwrap();
        assert_eq!(report.unparseable, 1);
        assert_eq!(report.records, 1);

        let data: &[u8] = b"a,b\n1,\"open";
        let report = scan_reader(data, 1000).await.unwrap();
        assert!(report.unterminated);
        assert_eq!(report.records, 2);
    }

    #[tokio::test]
    async fn test_scan_file_missing() {
        let err = scan_file(Path::new("/nonexistent/phl.csv"), 1000)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to open"));
    }
}

//! Physical line reader with lossy UTF-8 decoding.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One physical line, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    /// Raw bytes read, terminator included
    pub bytes: usize,
    /// Invalid UTF-8 was replaced with U+FFFD
    pub lossy: bool,
}

pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(4096),
        }
    }

    /// Read the next line; `None` at end of input.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Line>> {
        self.buf.clear();
        let bytes = self.reader.read_until(b'\n', &mut self.buf).await?;
        if bytes == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }

        let (text, lossy) = match std::str::from_utf8(&self.buf) {
            Ok(s) => (s.to_string(), false),
            Err(_) => (String::from_utf8_lossy(&self.buf).into_owned(), true),
        };
        Ok(Some(Line { text, bytes, lossy }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_strips_terminators() {
        let data: &[u8] = b"a,b\r\nc,d\nlast";
        let mut reader = LineReader::new(data);

        let first = reader.next_line().await.unwrap().unwrap();
        assert_eq!(first.text, "a,b");
        assert_eq!(first.bytes, 5);
        assert_eq!(reader.next_line().await.unwrap().unwrap().text, "c,d");
        assert_eq!(reader.next_line().await.unwrap().unwrap().text, "last");
        assert!(reader.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let data: &[u8] = b"caf\xe9,1\n";
        let mut reader = LineReader::new(data);
        let line = reader.next_line().await.unwrap().unwrap();
        assert!(line.lossy);
        assert_eq!(line.text, "caf\u{FFFD},1");
    }
}

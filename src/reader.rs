// src/reader.rs
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// What one read from the source produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// Nothing available right now; the source may produce more later.
    Idle,
    /// The source has ended for good.
    Exhausted,
}

/// Source of raw lines.
///
/// `read_line` must be cancel-safe: the runner races it against batch
/// deadlines and shutdown, and a cancelled read must not lose a line.
#[async_trait]
pub trait Reader: Send {
    fn name(&self) -> &str;

    async fn read_line(&mut self) -> io::Result<ReadOutcome>;
}

/// Reads newline-delimited text from any async buffered reader
/// (a file, stdin).
pub struct LineReader<R> {
    name: String,
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> LineReader<R> {
    pub fn new(name: impl Into<String>, inner: R) -> Self {
        LineReader {
            name: name.into(),
            lines: inner.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Reader for LineReader<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_line(&mut self) -> io::Result<ReadOutcome> {
        // Lines::next_line is cancel-safe
        match self.lines.next_line().await? {
            Some(line) => Ok(ReadOutcome::Line(line)),
            None => Ok(ReadOutcome::Exhausted),
        }
    }
}

/// Replays a fixed script of outcomes, then reports `Exhausted`.
#[derive(Debug, Default)]
pub struct VecReader {
    outcomes: VecDeque<ReadOutcome>,
}

impl VecReader {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_outcomes(lines.into_iter().map(|l| ReadOutcome::Line(l.into())))
    }

    pub fn with_outcomes(outcomes: impl IntoIterator<Item = ReadOutcome>) -> Self {
        VecReader {
            outcomes: outcomes.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.outcomes.len()
    }
}

#[async_trait]
impl Reader for VecReader {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read_line(&mut self) -> io::Result<ReadOutcome> {
        Ok(self.outcomes.pop_front().unwrap_or(ReadOutcome::Exhausted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_line_reader_yields_lines_then_exhausted() {
        let input: &[u8] = b"first\nsecond\r\n\nlast";
        let mut reader = LineReader::new("bytes", BufReader::new(input));

        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Line("first".into()));
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Line("second".into()));
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Line("".into()));
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Line("last".into()));
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Exhausted);
        assert_eq!(reader.name(), "bytes");
    }

    #[tokio::test]
    async fn test_vec_reader_replays_script() {
        let mut reader = VecReader::with_outcomes(vec![
            ReadOutcome::Line("a".into()),
            ReadOutcome::Idle,
            ReadOutcome::Line("b".into()),
        ]);
        assert_eq!(reader.remaining(), 3);
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Line("a".into()));
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Idle);
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Line("b".into()));
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Exhausted);
        assert_eq!(reader.read_line().await.unwrap(), ReadOutcome::Exhausted);
    }
}

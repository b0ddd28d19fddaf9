//! Bounded line reading for HTTP header blocks.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Outcome of reading one header line.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    /// A complete line with its `\n` / `\r\n` terminator removed.
    Complete(Vec<u8>),
    /// The stream ended before any byte of a new line.
    Eof,
}

/// Read one line, consuming at most `budget` bytes.
///
/// `budget` is decremented by the bytes consumed. A line that does not end
/// within the budget fails with `InvalidData`; a stream that ends mid-line
/// fails with `UnexpectedEof`.
pub async fn read_line<R>(reader: &mut R, budget: &mut usize) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let limit = u64::try_from(*budget).unwrap_or(u64::MAX);
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;
    *budget -= n;

    if n == 0 {
        if *budget == 0 {
            return Err(header_too_large());
        }
        return Ok(Line::Eof);
    }
    if line.last() != Some(&b'\n') {
        if *budget == 0 {
            return Err(header_too_large());
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream ended inside a header line",
        ));
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Line::Complete(line))
}

fn header_too_large() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "header block exceeds size limit")
}

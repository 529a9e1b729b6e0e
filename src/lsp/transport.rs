//! Framed JSON transport: `Content-Length: N\r\n\r\n` followed by
//! exactly N bytes of UTF-8 JSON (`spec.md` §4.3). Tolerates partial
//! reads by buffering until a full frame is available; rejects messages
//! lacking `Content-Length`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::LsmcpError;

/// Reads one framed message body (without the header) from `reader`.
/// Returns `Ok(None)` on a clean EOF before any header bytes arrive.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>, LsmcpError> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await.map_err(LsmcpError::Io)?;
        if bytes_read == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(LsmcpError::Other("stream closed mid-frame".to_string()));
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            // Blank line ends the header section.
            let len = content_length.ok_or_else(|| {
                LsmcpError::Other("message lacks a Content-Length header".to_string())
            })?;
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await.map_err(LsmcpError::Io)?;
            return Ok(Some(String::from_utf8_lossy(&body).into_owned()));
        }

        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len: usize = value
                    .trim()
                    .parse()
                    .map_err(|_| LsmcpError::Other(format!("invalid Content-Length value: {value}")))?;
                content_length = Some(len);
            }
        }
    }
}

/// Writes one framed message: header followed by the raw JSON body.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &str) -> Result<(), LsmcpError> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await.map_err(LsmcpError::Io)?;
    writer.write_all(body.as_bytes()).await.map_err(LsmcpError::Io)?;
    writer.flush().await.map_err(LsmcpError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_a_well_formed_frame() {
        let raw = b"Content-Length: 13\r\n\r\n{\"id\":1,\"a\":1}";
        let mut reader = tokio::io::BufReader::new(Cursor::new(raw.to_vec()));
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame, "{\"id\":1,\"a\":1}");
    }

    #[tokio::test]
    async fn rejects_missing_content_length() {
        let raw = b"Content-Type: application/json\r\n\r\n";
        let mut reader = tokio::io::BufReader::new(Cursor::new(raw.to_vec()));
        let result = read_frame(&mut reader).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn clean_eof_before_any_frame_is_none() {
        let mut reader = tokio::io::BufReader::new(Cursor::new(Vec::<u8>::new()));
        let frame = read_frame(&mut reader).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn round_trips_through_write_and_read() {
        let mut buf = Vec::new();
        write_frame(&mut buf, "{\"hello\":true}").await.unwrap();
        let mut reader = tokio::io::BufReader::new(Cursor::new(buf));
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame, "{\"hello\":true}");
    }
}

//! Line-delimited JSON framing over a mutually-authenticated channel (§6
//! "All inter-component messages are framed as a single line of JSON-encoded
//! objects").

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed JSON line: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads the next line from `reader` and decodes it as `T`.
///
/// Returns `Ok(None)` on a clean EOF (the peer closed the channel without
/// sending a [`crate::framing`]-level close message).
pub async fn read_message<T: DeserializeOwned>(
    reader: &mut (impl AsyncBufRead + Unpin),
) -> Result<Option<T>, NetError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(trimmed)?))
}

/// Encodes `value` as one compact JSON line and flushes it to `writer`.
pub async fn write_message<T: Serialize>(
    writer: &mut (impl AsyncWrite + Unpin),
    value: &T,
) -> Result<(), NetError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn round_trips_one_line() {
        let mut buf: Vec<u8> = Vec::new();
        write_message(&mut buf, &json!({"hello": "world"})).await.unwrap();
        assert_eq!(buf, b"{\"hello\":\"world\"}\n");

        let mut reader = BufReader::new(buf.as_slice());
        let decoded: serde_json::Value = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let mut reader = BufReader::new(&b""[..]);
        let decoded: Option<serde_json::Value> = read_message(&mut reader).await.unwrap();
        assert!(decoded.is_none());
    }
}

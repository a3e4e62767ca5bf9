//! Server-sent events decoding
//!
//! Only the `data` field matters for the device stream. Events end at a blank
//! line; multiple `data:` lines within one event are joined with `\n`.
//! Comment lines (leading `:`) and every other field are ignored.

use futures_util::stream::{self, Stream, StreamExt};

use crate::error::{SyncError, SyncResult};

/// Incremental decoder fed with raw body chunks
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line
    line: Vec<u8>,
    /// `data` lines of the current event
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the payloads of every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                    events.push(event);
                }
            } else {
                self.line.push(byte);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.data).join("\n"));
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}

/// Turn a byte stream into a stream of event payloads
///
/// A transport error is yielded once and ends the stream.
pub fn events<S, B>(body: S) -> impl Stream<Item = SyncResult<String>> + Send + 'static
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    stream::unfold(
        (Box::pin(body), SseDecoder::new(), false),
        |(mut body, mut decoder, failed)| async move {
            if failed {
                return None;
            }
            loop {
                match body.next().await {
                    Some(Ok(chunk)) => {
                        let events = decoder.push(chunk.as_ref());
                        if !events.is_empty() {
                            let batch: Vec<SyncResult<String>> = events.into_iter().map(Ok).collect();
                            return Some((stream::iter(batch), (body, decoder, false)));
                        }
                    }
                    Some(Err(e)) => {
                        let batch = vec![Err(SyncError::from(e))];
                        return Some((stream::iter(batch), (body, decoder, true)));
                    }
                    None => return None,
                }
            }
        },
    )
    .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: [{\"op\":\"remove\",\"path\":\"/a\"}]\n\n");
        assert_eq!(events, vec!["[{\"op\":\"remove\",\"path\":\"/a\"}]".to_string()]);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: [1,").is_empty());
        assert!(decoder.push(b"2]\r\n").is_empty());
        assert_eq!(decoder.push(b"\r\n"), vec!["[1,2]".to_string()]);
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keepalive\nevent: patch\ndata: [\ndata: 1]\nid: 7\n\n");
        assert_eq!(events, vec!["[\n1]".to_string()]);
    }

    #[test]
    fn test_blank_lines_without_data() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"\n\n: ping\n\n").is_empty());
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data:[]\n\ndata: [2]\n\n");
        assert_eq!(events, vec!["[]".to_string(), "[2]".to_string()]);
    }

    #[tokio::test]
    async fn test_event_stream() {
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(b"data: [1]\n".to_vec()),
            Ok(b"\ndata: [2]\n\n".to_vec()),
        ];
        let collected: Vec<String> = events(stream::iter(chunks))
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec!["[1]".to_string(), "[2]".to_string()]);
    }
}

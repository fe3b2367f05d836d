//! Server-sent-events plumbing for streaming adapters.
//!
//! The adapter receives a `reqwest::Response`, buffers chunks, splits on
//! `\n\n`, extracts `data:` payloads, and feeds each payload to a
//! parser closure that returns zero or more stream events. The closure
//! is `FnMut` because tool-call assembly needs state across payloads.

use janus_domain::{BoxStream, Error, Result, StreamEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// The buffer is drained in place; a trailing partial event stays for
/// the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }

    payloads
}

/// Build a stream of events from an SSE response and a parser closure.
///
/// A `Done` event is synthesized if the parser never produced one, so
/// consumers can rely on the stream terminating cleanly.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in drain_data_lines(&mut buffer) {
                        for event in parse_data(&payload) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed; flush whatever remains.
                    if !buffer.trim().is_empty() {
                        let mut remainder = std::mem::take(&mut buffer);
                        remainder.push_str("\n\n");
                        for payload in drain_data_lines(&mut remainder) {
                            for event in parse_data(&payload) {
                                if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    if !done_emitted {
                        yield Ok(StreamEvent::Done { usage: None, finish_reason: None });
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Http(e.to_string()));
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_complete_events_only() {
        let mut buffer = "data: one\n\ndata: two\n\ndata: par".to_string();
        let payloads = drain_data_lines(&mut buffer);
        assert_eq!(payloads, vec!["one", "two"]);
        assert_eq!(buffer, "data: par");
    }

    #[test]
    fn ignores_non_data_lines() {
        let mut buffer = "event: ping\nid: 3\ndata: payload\n\n".to_string();
        assert_eq!(drain_data_lines(&mut buffer), vec!["payload"]);
    }

    #[test]
    fn multiple_data_lines_in_one_block() {
        let mut buffer = "data: a\ndata: b\n\n".to_string();
        assert_eq!(drain_data_lines(&mut buffer), vec!["a", "b"]);
    }

    #[test]
    fn empty_data_lines_are_skipped() {
        let mut buffer = "data:\n\ndata: real\n\n".to_string();
        assert_eq!(drain_data_lines(&mut buffer), vec!["real"]);
    }
}

//! Newline-delimited replies read as a stream of lines.

use std::future::ready;
use std::io;

use futures_util::{StreamExt, TryStreamExt};
use reqwest::Response;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_stream::wrappers::LinesStream;
use tokio_util::io::StreamReader;

use super::client::LineStream;
use super::BackendError;

/// Lines of `reader` as they arrive, without blank lines. A read error is
/// yielded as [`BackendError::Transport`] and ends the stream.
pub fn lines<R>(reader: R) -> LineStream
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    LinesStream::new(reader.lines())
        .scan(false, |failed, line| {
            if *failed {
                return ready(None);
            }
            *failed = line.is_err();
            ready(Some(line))
        })
        .filter_map(|line| {
            ready(match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(Ok(line)),
                Err(e) => Some(Err(BackendError::Transport(e.to_string()))),
            })
        })
        .boxed()
}

/// Lines of a response body, read incrementally.
pub fn response_lines(response: Response) -> LineStream {
    let body = response.bytes_stream().map_err(io::Error::other);
    lines(StreamReader::new(body))
}

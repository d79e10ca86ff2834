// src/frame.rs
//! Header-block framing used on both the signaling and the media engine
//! sockets: an optional command line, `Name: value` headers, a blank line,
//! then `Content-Length` bytes of body.

use bytes::{BufMut, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("line break in frame field: {0:?}")]
    LineBreak(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Leading line without a colon, e.g. `auth ClueCon` or `sendmsg <id>`.
    pub command: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Frame {
    pub fn command(line: impl Into<String>) -> Self {
        Self {
            command: Some(line.into()),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn reply_ok(&self) -> bool {
        self.header("Reply-Text")
            .map_or(false, |text| text.starts_with("+OK"))
    }
}

#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Returns the byte offset just past the blank line that terminates the
    /// header block starting at `buf[0]`.
    fn header_end(buf: &[u8]) -> Option<usize> {
        let mut start = 0;
        while let Some(pos) = buf[start..].iter().position(|b| *b == b'\n') {
            let line = &buf[start..start + pos];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                return Some(start + pos + 1);
            }
            start += pos + 1;
        }
        None
    }

    fn leading_blank_lines(buf: &[u8]) -> usize {
        let mut skip = 0;
        while skip < buf.len() && (buf[skip] == b'\n' || buf[skip] == b'\r') {
            skip += 1;
        }
        skip
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let skip = Self::leading_blank_lines(src);
        let _ = src.split_to(skip);

        let Some(head_len) = Self::header_end(src) else {
            if src.len() > MAX_FRAME_LEN {
                return Err(FrameError::TooLarge { max: MAX_FRAME_LEN });
            }
            return Ok(None);
        };

        let head = String::from_utf8_lossy(&src[..head_len]).into_owned();
        let mut frame = Frame::default();
        let mut content_length = 0usize;

        for (idx, raw) in head.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            match line.find(':') {
                Some(pos) if !(idx == 0 && line[..pos].contains(' ')) => {
                    let key = line[..pos].trim().to_string();
                    let value = line[pos + 1..].trim().to_string();
                    if key.eq_ignore_ascii_case("Content-Length") {
                        content_length = value
                            .parse()
                            .map_err(|_| FrameError::InvalidContentLength(value.clone()))?;
                    }
                    frame.headers.push((key, value));
                }
                _ if idx == 0 => frame.command = Some(line.to_string()),
                _ => {}
            }
        }

        if head_len > MAX_FRAME_LEN || content_length > MAX_FRAME_LEN - head_len {
            return Err(FrameError::TooLarge { max: MAX_FRAME_LEN });
        }
        if src.len() < head_len + content_length {
            src.reserve(head_len + content_length - src.len());
            return Ok(None);
        }

        let _ = src.split_to(head_len);
        if content_length > 0 {
            let body = src.split_to(content_length);
            frame.body = Some(String::from_utf8_lossy(&body).into_owned());
        }

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        // A CR or LF inside one line would start a forged header.
        let lines = frame
            .command
            .iter()
            .chain(frame.headers.iter().flat_map(|(k, v)| [k, v]));
        for field in lines {
            if field.contains(['\r', '\n']) {
                return Err(FrameError::LineBreak(field.clone()));
            }
        }

        if let Some(command) = &frame.command {
            dst.put_slice(command.as_bytes());
            dst.put_u8(b'\n');
        }
        for (name, value) in &frame.headers {
            if name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_u8(b'\n');
        }
        match &frame.body {
            Some(body) if !body.is_empty() => {
                dst.put_slice(format!("Content-Length: {}\n\n", body.len()).as_bytes());
                dst.put_slice(body.as_bytes());
            }
            _ => dst.put_u8(b'\n'),
        }
        Ok(())
    }
}

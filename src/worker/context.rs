//! Building and sending responses.
//!
//! Handlers return a [`Response`]; [`RequestContext`] turns it into a
//! frame for the request it answers:
//! - the header echoes the request's opcode and correlation id
//! - `RESPONSE` is always set, `ERROR` when the code is non-zero
//! - `HAS_INLINE_DATA` is set when bulk bytes follow the record
//!
//! Requests flagged `NO_REPLY` get nothing back.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWrite;

use crate::codec::{WireField, WireRecord};
use crate::error::Result;
use crate::protocol::{code_of, flags, Frame, HipError, HipResult, OutboundFrame, Reply, SmiResult, SUCCESS};
use crate::transport::write_frames;

/// A handler's answer: result code, body record and optional bulk bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: i32,
    /// Encoded `Reply<T>`, code included.
    pub record: Bytes,
    pub inline: Bytes,
}

impl Response {
    /// Successful response with `body`.
    pub fn ok<T: WireField + Default>(body: T) -> Self {
        Self::encode(Reply::ok(body))
    }

    /// Code-only response.
    pub fn code(code: i32) -> Self {
        Self::encode(Reply::<()>::failed(code))
    }

    /// Code-only response for a runtime result.
    pub fn status(result: HipResult<()>) -> Self {
        Self::code(code_of(&result))
    }

    /// Failed response of the right size for `T`.
    pub fn failed<T: WireField + Default>(err: HipError) -> Self {
        Self::encode(Reply::<T>::failed(err.code()))
    }

    /// Response carrying `body` or a zeroed body and the error code.
    pub fn from_result<T: WireField + Default>(result: HipResult<T>) -> Self {
        match result {
            Ok(body) => Self::ok(body),
            Err(err) => Self::failed::<T>(err),
        }
    }

    /// Same, for telemetry status codes.
    pub fn from_smi<T: WireField + Default>(result: SmiResult<T>) -> Self {
        match result {
            Ok(body) => Self::ok(body),
            Err(status) => Self::encode(Reply::<T>::failed(status.code())),
        }
    }

    /// Append bulk bytes after the record.
    pub fn with_inline(mut self, inline: Bytes) -> Self {
        self.inline = inline;
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS
    }

    fn encode<T: WireField>(reply: Reply<T>) -> Self {
        Self {
            code: reply.code,
            record: reply.encode(),
            inline: Bytes::new(),
        }
    }
}

/// Addressing of one request, used to send its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    op_code: u16,
    request_id: u32,
    no_reply: bool,
}

impl RequestContext {
    pub fn new(op_code: u16, request_id: u32, no_reply: bool) -> Self {
        Self {
            op_code,
            request_id,
            no_reply,
        }
    }

    pub fn for_frame(frame: &Frame) -> Self {
        Self::new(frame.op_code(), frame.request_id(), frame.is_no_reply())
    }

    #[inline]
    pub fn op_code(&self) -> u16 {
        self.op_code
    }

    #[inline]
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    #[inline]
    pub fn is_no_reply(&self) -> bool {
        self.no_reply
    }

    /// Frame `response` for this request.
    pub fn frame(&self, response: Response) -> OutboundFrame {
        let mut frame_flags = flags::RESPONSE;
        if !response.is_success() {
            frame_flags |= flags::ERROR;
        }
        OutboundFrame::new(
            self.op_code,
            self.request_id,
            frame_flags,
            response.record,
            response.inline,
        )
    }

    /// Send `response` unless the request was fire-and-forget. Returns
    /// whether anything was written.
    pub async fn respond<W>(&self, writer: &mut W, response: Response, timeout: Duration) -> Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        if self.no_reply {
            return Ok(false);
        }
        let frame = self.frame(response);
        write_frames(writer, std::slice::from_ref(&frame), Some(timeout)).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameReader, OpCode, SmiStatus};
    use std::io::Cursor;

    #[test]
    fn test_failed_body_keeps_record_size() {
        let ok = Response::ok(7u64);
        let failed = Response::from_result::<u64>(Err(HipError::OutOfMemory));
        assert_eq!(ok.record.len(), failed.record.len());
        assert_eq!(failed.code, HipError::OutOfMemory.code());
        assert!(!failed.is_success());
    }

    #[test]
    fn test_smi_status_code() {
        let r = Response::from_smi::<u32>(Err(SmiStatus::NotFound));
        assert_eq!(r.code, 3);
        assert_eq!(&r.record[..4], &3i32.to_le_bytes());
    }

    #[test]
    fn test_response_flags() {
        let ctx = RequestContext::new(OpCode::MemcpyDtoH.code(), 9, false);
        let frame = ctx.frame(Response::status(Ok(())).with_inline(Bytes::from_static(b"xy")));
        let header = crate::protocol::Header::decode(&frame.header).unwrap();
        assert!(header.is_response());
        assert!(header.has_inline_data());
        assert_eq!(header.flags & flags::ERROR, 0);
        assert_eq!(header.request_id, 9);

        let failed = ctx.frame(Response::code(1));
        let header = crate::protocol::Header::decode(&failed.header).unwrap();
        assert_ne!(header.flags & flags::ERROR, 0);
    }

    #[tokio::test]
    async fn test_no_reply_writes_nothing() {
        let mut out = Cursor::new(Vec::new());
        let ctx = RequestContext::new(OpCode::Free.code(), 1, true);
        let sent = ctx
            .respond(&mut out, Response::code(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!sent);
        assert!(out.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_respond_writes_one_frame() {
        let mut out = Cursor::new(Vec::new());
        let ctx = RequestContext::new(OpCode::GetDeviceCount.code(), 4, false);
        ctx.respond(&mut out, Response::ok(2i32), Duration::from_secs(1))
            .await
            .unwrap();

        let bytes = out.into_inner();
        let mut reader = FrameReader::new(&bytes[..]);
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.request_id(), 4);
        assert_eq!(frame.result_code(), Some(0));
        assert_eq!(Reply::<i32>::decode(frame.payload()).unwrap().body, 2);
    }
}

//! Background-job payloads exchanged with workers.

use bytes::{Buf, Bytes, BytesMut};

use super::{get_bytes, get_str, get_u64, put_bytes, put_str, put_u64};
use super::Message;
use crate::error::Result;

/// Request to run a named job inside a worker.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    /// Job name the worker dispatches on.
    pub name: String,
    /// Opaque job arguments.
    pub payload: Bytes,
    /// Time budget the worker should honor, in milliseconds.
    pub timeout_ms: u64,
}

impl Message for JobRequest {
    fn encode(&self, buf: &mut BytesMut) {
        put_str(buf, &self.name);
        put_bytes(buf, &self.payload);
        put_u64(buf, self.timeout_ms);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            name: get_str(buf)?,
            payload: get_bytes(buf)?,
            timeout_ms: get_u64(buf)?,
        })
    }
}

/// Reply to a [`JobRequest`].
#[derive(Debug, Clone, Default)]
pub struct JobResponse {
    pub payload: Bytes,
}

impl Message for JobResponse {
    fn encode(&self, buf: &mut BytesMut) {
        put_bytes(buf, &self.payload);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            payload: get_bytes(buf)?,
        })
    }
}

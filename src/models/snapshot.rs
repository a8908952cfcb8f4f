//! Request lifecycle snapshots and their transport encoding.
//!
//! A snapshot is encoded as a small versioned binary record and then
//! base64-encoded so it can be stored as a plain string value.
//!
//! # Layout (version 1, little-endian)
//!
//! | Field | Encoding |
//! |-------|----------|
//! | version | `u8` (currently `1`) |
//! | begin | timestamp |
//! | end | timestamp |
//! | status code | `i32` |
//! | body length | `u64` |
//! | body | raw bytes |
//!
//! A timestamp is a presence byte (`0` or `1`) followed, when present, by
//! `i64` Unix seconds and `u32` sub-second nanoseconds.

use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};

/// Current binary layout version.
const ENCODING_VERSION: u8 = 1;

/// Bytes used by everything except the body when both timestamps are set.
const MAX_HEADER_LEN: usize = 1 + 2 * (1 + 8 + 4) + 4 + 8;

/// Observable lifecycle of one request.
///
/// `None` timestamps and a zero status code are the unset state. An empty
/// body and "no body recorded" are the same state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSnapshot {
    /// When the request started.
    pub begin: Option<DateTime<Utc>>,
    /// When the request completed.
    pub end: Option<DateTime<Utc>>,
    /// Protocol status code, `0` until known.
    pub status_code: i32,
    /// Response or request body.
    pub body: Vec<u8>,
}

impl RequestSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a snapshot whose `begin` is the current time.
    #[must_use]
    pub fn begin_now() -> Self {
        Self::default().with_begin(Utc::now())
    }

    /// Sets the start time.
    #[must_use]
    pub const fn with_begin(mut self, begin: DateTime<Utc>) -> Self {
        self.begin = Some(begin);
        self
    }

    /// Sets the completion time.
    #[must_use]
    pub const fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Sets the status code.
    #[must_use]
    pub const fn with_status(mut self, status_code: i32) -> Self {
        self.status_code = status_code;
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Marks the request completed now with the given outcome.
    #[must_use]
    pub fn complete(self, status_code: i32, body: impl Into<Vec<u8>>) -> Self {
        self.with_end(Utc::now())
            .with_status(status_code)
            .with_body(body)
    }

    /// Returns true once a completion time has been recorded.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.end.is_some()
    }

    /// Encodes the snapshot into a base64 string.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut buf = Vec::with_capacity(MAX_HEADER_LEN + self.body.len());
        buf.push(ENCODING_VERSION);
        put_timestamp(&mut buf, self.begin);
        put_timestamp(&mut buf, self.end);
        buf.extend_from_slice(&self.status_code.to_le_bytes());
        buf.extend_from_slice(&(self.body.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.body);
        STANDARD.encode(buf)
    }

    /// Decodes a string produced by [`RequestSnapshot::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the input is not valid base64, has an
    /// unknown version, is truncated, carries trailing bytes, or holds an
    /// out-of-range timestamp.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Decode(format!("invalid base64: {e}")))?;

        let mut reader = Reader::new(&bytes);
        let version = reader.u8()?;
        if version != ENCODING_VERSION {
            return Err(Error::Decode(format!(
                "unsupported encoding version {version}"
            )));
        }

        let begin = reader.timestamp()?;
        let end = reader.timestamp()?;
        let status_code = i32::from_le_bytes(reader.array()?);
        let body_len = u64::from_le_bytes(reader.array()?);
        let body_len = usize::try_from(body_len)
            .map_err(|_| Error::Decode(format!("body length {body_len} exceeds address space")))?;
        let body = reader.take(body_len)?.to_vec();
        reader.finish()?;

        Ok(Self {
            begin,
            end,
            status_code,
            body,
        })
    }

    /// Decodes a snapshot, falling back to the empty snapshot on failure.
    ///
    /// The failure is logged at `warn` level. Prefer [`RequestSnapshot::decode`]
    /// whenever the caller needs to tell a corrupt value from a valid one.
    #[must_use]
    pub fn decode_or_default(encoded: &str) -> Self {
        Self::decode(encoded).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to decode request snapshot, using empty snapshot");
            Self::default()
        })
    }
}

fn put_timestamp(buf: &mut Vec<u8>, ts: Option<DateTime<Utc>>) {
    match ts {
        Some(ts) => {
            buf.push(1);
            buf.extend_from_slice(&ts.timestamp().to_le_bytes());
            buf.extend_from_slice(&ts.timestamp_subsec_nanos().to_le_bytes());
        },
        None => buf.push(0),
    }
}

/// Forward-only cursor over an encoded payload.
struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(Error::Decode(format!(
                "truncated payload: needed {n} bytes, {} left",
                self.bytes.len()
            )));
        }
        let (head, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        let [b] = self.array::<1>()?;
        Ok(b)
    }

    fn timestamp(&mut self) -> Result<Option<DateTime<Utc>>> {
        match self.u8()? {
            0 => Ok(None),
            1 => {
                let secs = i64::from_le_bytes(self.array()?);
                let nanos = u32::from_le_bytes(self.array()?);
                DateTime::from_timestamp(secs, nanos).map(Some).ok_or_else(|| {
                    Error::Decode(format!("timestamp out of range: {secs}s {nanos}ns"))
                })
            },
            flag => Err(Error::Decode(format!("invalid timestamp flag {flag}"))),
        }
    }

    fn finish(&self) -> Result<()> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(Error::Decode(format!(
                "{} trailing bytes after body",
                self.bytes.len()
            )))
        }
    }
}

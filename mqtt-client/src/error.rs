// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt;
use std::io;

/// Coarse classification of [`Error`], useful for callers that want to
/// branch on failure kind without matching the message string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Transport-level failure: connect refused, read/write error, reset.
    IoError,

    /// A packet could not be encoded onto the wire.
    EncodeError,

    /// A packet received from the broker could not be decoded.
    DecodeError,

    /// The broker rejected the CONNECT (malformed proto, bad id, auth ...).
    ConnectRejected,

    /// A packet arrived that is malformed for its context (e.g. a CONNACK
    /// outside the handshake). Always triggers a reconnect.
    ProtocolError,

    /// An ACK-bearing operation did not complete within `response_time`.
    Timeout,

    /// An operation was attempted while the client had no live session.
    NotConnected,

    /// A caller-supplied argument failed validation (e.g. QoS 2, empty topic).
    InvalidArgument,
}

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::new(ErrorKind::IoError, err.to_string())
    }
}

impl From<mqtt_codec::EncodeError> for Error {
    fn from(err: mqtt_codec::EncodeError) -> Self {
        Error::new(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<mqtt_codec::DecodeError> for Error {
    fn from(err: mqtt_codec::DecodeError) -> Self {
        Error::new(ErrorKind::DecodeError, format!("{err:?}"))
    }
}

use crate::transceiver::LinkError;

pub type Result<T> = std::result::Result<T, Error>;

/// Things that can go wrong during a live card session.
///
/// Policy-level obstacles (locked access bits, missing keys) are not errors;
/// they're reported through [`crate::problems::WriteProblem`] instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No card in the field.
    #[error("no card in the field")]
    NotPresent,

    /// The card answered in a way we don't understand.
    #[error("protocol error talking to the card")]
    Protocol,

    /// The card refused an authentication attempt. Mifare Classic cards
    /// signal a bad key by going silent, so this is usually surfaced as a
    /// missing reply to the reader response, not as an explicit NAK.
    #[error("the card refused authentication")]
    Auth,

    /// The card didn't answer within the frame-wait-time.
    #[error("timed out waiting for the card")]
    Timeout,

    /// A dump image couldn't be parsed.
    #[error("malformed dump image: {0}")]
    Dump(&'static str),
}

impl From<LinkError> for Error {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::NotPresent => Self::NotPresent,
            LinkError::Timeout => Self::Timeout,
            LinkError::Crc(_) | LinkError::Parity | LinkError::Framing => Self::Protocol,
        }
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(_: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        Self::Dump("truncated image")
    }
}

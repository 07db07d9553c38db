use std::path::PathBuf;

use thiserror::Error;

pub const EXIT_INVALID_ARGS: u8 = 1;
pub const EXIT_FETCH: u8 = 2;
pub const EXIT_PARSE: u8 = 3;
pub const EXIT_OUTPUT: u8 = 4;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL {0:?}")]
    InvalidUrl(String),

    #[error("unsupported host in {0:?} (expected one of the configured survey domains)")]
    UnsupportedHost(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed-markup: page is empty or has no traversable elements")]
    MalformedMarkup,

    #[error("unrecognized-page-structure: {0}")]
    UnrecognizedPageStructure(String),

    #[error("access-restricted: {0}")]
    AccessRestricted(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported-value: {0}")]
    UnsupportedValue(String),

    #[error("encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("too many existing files named {0:?}*")]
    NameCollision(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl Error {
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Fetch(FetchError::InvalidUrl(_) | FetchError::UnsupportedHost(_)) => {
                EXIT_INVALID_ARGS
            }
            Error::Fetch(_) => EXIT_FETCH,
            Error::Parse(_) => EXIT_PARSE,
            Error::Export(_) | Error::Write(_) => EXIT_OUTPUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(Error::from(FetchError::InvalidUrl("x".into())).exit_code(), 1);
        assert_eq!(
            Error::from(FetchError::Status { url: "u".into(), status: 503 }).exit_code(),
            2
        );
        assert_eq!(Error::from(ParseError::MalformedMarkup).exit_code(), 3);
        assert_eq!(Error::from(ParseError::AccessRestricted("login".into())).exit_code(), 3);
        assert_eq!(Error::from(ExportError::UnsupportedValue("x".into())).exit_code(), 4);
        assert_eq!(Error::from(WriteError::NameCollision("a".into())).exit_code(), 4);
    }

    #[test]
    fn parse_error_messages_carry_kind() {
        assert!(ParseError::MalformedMarkup.to_string().starts_with("malformed-markup"));
        assert!(ParseError::UnrecognizedPageStructure("no containers".into())
            .to_string()
            .starts_with("unrecognized-page-structure"));
    }
}

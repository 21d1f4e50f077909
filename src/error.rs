use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionStatus;


#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("no matching device found")]
    NoMatchingDevice,
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("service {service} / characteristic {characteristic} unavailable")]
    ServiceUnavailable {
        service: Uuid,
        characteristic: Uuid,
    },
    #[error("notification enrollment failed: {0}")]
    Subscription(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("payload of {len} bytes too short, need {needed}")]
pub struct DecodeFailure {
    pub len: usize,
    pub needed: usize,
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("can't open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("can't decode {path}: {source}")]
    Decode {
        path: String,
        source: rodio::decoder::DecoderError,
    },
    #[error("audio engine unavailable: {0}")]
    Engine(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("can't {action} while {from:?}")]
    InvalidTransition {
        action: &'static str,
        from: SessionStatus,
    },
}

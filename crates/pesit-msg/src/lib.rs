//! FPDU and parameter model, and wire codec, for the PeSIT Hors-SIT profile.
//!
//! This crate has no I/O: `codec::parse`/`codec::encode` operate on byte
//! slices the transport layer has already framed (see `pesit-transport`).

#![forbid(unsafe_code)]

pub mod article;
pub mod codec;
pub mod fpdu;
pub mod header;
pub mod parameter;
pub mod phase;

pub use article::{encode_articles, extract_articles, ArticleError};
pub use codec::{encode, parse, ParseError};
pub use fpdu::{Body, Fpdu};
pub use header::FrameHeader;
pub use parameter::{pgi, pi, ParamEntry, ParameterArea, ParameterGroup, Parameter};
pub use phase::{FpduType, Phase};

//! The structured `Fpdu` type codec callers build and match against.

use crate::parameter::ParameterArea;
use crate::phase::FpduType;

/// An FPDU's body. Most FPDUs carry a parameter area; the DTF family
/// carries raw article data instead (§3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Parameter area (possibly empty).
    Parameters(ParameterArea),
    /// One or more articles, each with its 2-byte length prefix — carried
    /// only by the plain `DTF` type, whose `id_src` is the article count.
    Articles(Vec<Vec<u8>>),
    /// A single raw, un-prefixed article fragment — carried by
    /// `DTFDA`/`DTFMA`/`DTFFA` when a single article is segmented across
    /// multiple FPDUs.
    RawFragment(Vec<u8>),
}

/// A fully parsed or to-be-encoded FPDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fpdu {
    pub fpdu_type: FpduType,
    pub id_dst: u8,
    pub id_src: u8,
    pub body: Body,
}

impl Fpdu {
    /// Builds an FPDU carrying a parameter area.
    pub fn with_params(fpdu_type: FpduType, id_dst: u8, id_src: u8, params: ParameterArea) -> Self {
        Fpdu { fpdu_type, id_dst, id_src, body: Body::Parameters(params) }
    }

    /// Builds an FPDU with an empty parameter area (many ACKs carry none).
    pub fn empty(fpdu_type: FpduType, id_dst: u8, id_src: u8) -> Self {
        Fpdu::with_params(fpdu_type, id_dst, id_src, ParameterArea::default())
    }

    pub fn params(&self) -> Option<&ParameterArea> {
        match &self.body {
            Body::Parameters(p) => Some(p),
            _ => None,
        }
    }

    pub fn articles(&self) -> Option<&[Vec<u8>]> {
        match &self.body {
            Body::Articles(a) => Some(a),
            _ => None,
        }
    }

    pub fn raw_fragment(&self) -> Option<&[u8]> {
        match &self.body {
            Body::RawFragment(d) => Some(d),
            _ => None,
        }
    }
}

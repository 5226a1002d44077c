//! Frame parsing and encoding (§4.1): `parse`/`encode` are pure functions on
//! byte buffers, with no I/O, so they stay fuzzable and reusable by
//! recording/replay test fixtures.

use binrw::prelude::*;
use std::io::Cursor;
use thiserror::Error;

use pesit_types::ebcdic::{ascii_to_ebcdic, ebcdic_to_ascii};

use crate::article::{self, ArticleError};
use crate::fpdu::{Body, Fpdu};
use crate::header::FrameHeader;
use crate::parameter::{self, is_string_pi, ParamEntry, ParamError, Parameter, ParameterArea};
use crate::phase::{FpduType, Phase};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("frame shorter than the {min} byte fixed header")]
    ShortBuffer { min: usize },
    #[error("unknown phase byte {phase:#04x}")]
    UnknownPhase { phase: u8 },
    #[error("unknown (phase, type) pair ({phase:?}, {type_code:#04x})")]
    UnknownType { phase: Phase, type_code: u8 },
    #[error("declared internal length {declared} does not match frame length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("malformed parameter area: {0}")]
    Parameter(#[from] ParamError),
    #[error("malformed article framing: {0}")]
    Article(#[from] ArticleError),
    #[error("header read failed: {0}")]
    Header(#[from] binrw::Error),
}

/// Parses a single frame (header + body), as delivered by the transport
/// layer after it has stripped the outer 2-byte length prefix.
///
/// `ebcdic` selects whether string-typed parameter values on the wire are
/// EBCDIC-encoded; they are normalized to ASCII in the returned [`Fpdu`]
/// regardless, so application code never has to think about the session's
/// wire encoding.
pub fn parse(frame: &[u8], ebcdic: bool) -> Result<Fpdu, ParseError> {
    if frame.len() < FrameHeader::SIZE {
        return Err(ParseError::ShortBuffer { min: FrameHeader::SIZE });
    }
    let header = FrameHeader::read(&mut Cursor::new(frame))?;
    if header.internal_len as usize != frame.len() {
        return Err(ParseError::LengthMismatch { declared: header.internal_len as usize, actual: frame.len() });
    }
    let phase = Phase::from_u8(header.phase).ok_or(ParseError::UnknownPhase { phase: header.phase })?;
    let fpdu_type = FpduType::from_phase_type(phase, header.type_code)
        .ok_or(ParseError::UnknownType { phase, type_code: header.type_code })?;

    let body_bytes = &frame[FrameHeader::SIZE..];

    let body = if fpdu_type == FpduType::DTF {
        let articles = article::extract_articles(body_bytes, header.id_src)?;
        Body::Articles(articles)
    } else if fpdu_type.is_dtf_variant() {
        Body::RawFragment(body_bytes.to_vec())
    } else {
        let mut area = parameter::parse_parameter_area(body_bytes)?;
        if ebcdic {
            normalize_strings(&mut area, ebcdic_to_ascii);
        }
        Body::Parameters(area)
    };

    Ok(Fpdu { fpdu_type, id_dst: header.id_dst, id_src: header.id_src, body })
}

/// Encodes an [`Fpdu`] to wire bytes (header + body), ready for the
/// transport layer to prepend the outer length prefix.
pub fn encode(fpdu: &Fpdu, ebcdic: bool) -> Vec<u8> {
    let body_bytes = match &fpdu.body {
        Body::Articles(articles) => article::encode_articles(articles),
        Body::RawFragment(data) => data.clone(),
        Body::Parameters(area) => {
            if ebcdic {
                let mut area = area.clone();
                normalize_strings(&mut area, ascii_to_ebcdic);
                parameter::encode_parameter_area(&area)
            } else {
                parameter::encode_parameter_area(area)
            }
        }
    };

    let header = FrameHeader::new(
        fpdu.fpdu_type.phase() as u8,
        fpdu.fpdu_type.type_code(),
        fpdu.id_dst,
        fpdu.id_src,
        body_bytes.len(),
    );

    let mut out = Vec::with_capacity(FrameHeader::SIZE + body_bytes.len());
    let mut cursor = Cursor::new(&mut out);
    header.write(&mut cursor).expect("writing to a Vec cannot fail");
    out.extend_from_slice(&body_bytes);
    out
}

/// Re-encodes every string-typed parameter value in `area` using `xlate`
/// (either EBCDIC->ASCII on parse, or ASCII->EBCDIC on encode), leaving
/// every other PI untouched so unknown ids round-trip byte-exact.
fn normalize_strings(area: &mut ParameterArea, xlate: fn(&[u8]) -> Vec<u8>) {
    for entry in area.0.iter_mut() {
        match entry {
            ParamEntry::Single(p) => translate_in_place(p, xlate),
            ParamEntry::Group(g) => {
                for p in g.params.iter_mut() {
                    translate_in_place(p, xlate);
                }
            }
        }
    }
}

fn translate_in_place(p: &mut Parameter, xlate: fn(&[u8]) -> Vec<u8>) {
    if is_string_pi(p.id) {
        p.value = xlate(&p.value);
    }
}

/// Inspects only the 6-byte fixed header to decide whether `frame` is a DTF
/// variant, without parsing the parameter area. Useful for a reader loop
/// that wants to route DTF frames to a streaming path before fully parsing.
pub fn is_dtf(frame: &[u8]) -> bool {
    article::is_dtf(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fpdu::Body;
    use crate::parameter::pi;

    fn connect_fpdu() -> Fpdu {
        let mut area = ParameterArea::default();
        area.push(Parameter::str(pi::REQUESTER_NAME, "LOOP"));
        area.push(Parameter::str(pi::SERVER_NAME, "SRV"));
        area.push(Parameter::u16(pi::PROTOCOL_VERSION, 2));
        Fpdu::with_params(FpduType::CONNECT, 0, 1, area)
    }

    #[test]
    fn round_trips_ascii() {
        let fpdu = connect_fpdu();
        let bytes = encode(&fpdu, false);
        let back = parse(&bytes, false).unwrap();
        assert_eq!(fpdu, back);
    }

    #[test]
    fn round_trips_ebcdic() {
        let fpdu = connect_fpdu();
        let bytes = encode(&fpdu, true);
        // The wire bytes really are EBCDIC, not ASCII.
        assert_ne!(bytes, encode(&fpdu, false));
        let back = parse(&bytes, true).unwrap();
        assert_eq!(fpdu, back);
    }

    #[test]
    fn round_trips_dtf_articles() {
        let fpdu = Fpdu {
            fpdu_type: FpduType::DTF,
            id_dst: 5,
            id_src: 2,
            body: Body::Articles(vec![b"first".to_vec(), b"second".to_vec()]),
        };
        let bytes = encode(&fpdu, false);
        let back = parse(&bytes, false).unwrap();
        assert_eq!(fpdu, back);
    }

    #[test]
    fn round_trips_dtf_fragment() {
        let fpdu = Fpdu {
            fpdu_type: FpduType::DTFMA,
            id_dst: 5,
            id_src: 1,
            body: Body::RawFragment(b"segment".to_vec()),
        };
        let bytes = encode(&fpdu, false);
        let back = parse(&bytes, false).unwrap();
        assert_eq!(fpdu, back);
    }

    #[test]
    fn rejects_unknown_phase() {
        let mut bytes = encode(&connect_fpdu(), false);
        bytes[2] = 0xEE;
        assert!(matches!(parse(&bytes, false), Err(ParseError::UnknownPhase { .. })));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(matches!(parse(&[0, 1, 2], false), Err(ParseError::ShortBuffer { .. })));
    }

    #[test]
    fn is_dtf_without_full_parse() {
        let fpdu = Fpdu { fpdu_type: FpduType::DTF, id_dst: 1, id_src: 1, body: Body::Articles(vec![b"x".to_vec()]) };
        let bytes = encode(&fpdu, false);
        assert!(is_dtf(&bytes));
        assert!(!is_dtf(&encode(&connect_fpdu(), false)));
    }
}

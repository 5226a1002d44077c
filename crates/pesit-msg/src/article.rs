//! Article framing for multi-article DTF entities (§3, §4.1, §8 invariant 6).

use crate::header::FrameHeader;
use crate::phase::{FpduType, Phase};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArticleError {
    #[error("article length prefix truncated at offset {offset}")]
    TruncatedLengthPrefix { offset: usize },
    #[error("article at offset {offset} claims length {claimed} but only {available} byte(s) remain")]
    TruncatedArticle { offset: usize, claimed: usize, available: usize },
    #[error("expected {expected} article(s), found {found} before payload end")]
    CountMismatch { expected: usize, found: usize },
}

/// Splits a multi-article DTF payload into its constituent articles.
///
/// Enforces the invariant `sum(article_lengths) + 2*count == payload_len`
/// by construction: parsing stops once `article_count` articles have been
/// read, and any leftover or missing bytes is an error.
pub fn extract_articles(payload: &[u8], article_count: u8) -> Result<Vec<Vec<u8>>, ArticleError> {
    let mut articles = Vec::with_capacity(article_count as usize);
    let mut offset = 0usize;
    for _ in 0..article_count {
        if offset + 2 > payload.len() {
            return Err(ArticleError::TruncatedLengthPrefix { offset });
        }
        let len = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
        offset += 2;
        if offset + len > payload.len() {
            return Err(ArticleError::TruncatedArticle {
                offset,
                claimed: len,
                available: payload.len() - offset,
            });
        }
        articles.push(payload[offset..offset + len].to_vec());
        offset += len;
    }
    if offset != payload.len() {
        return Err(ArticleError::CountMismatch { expected: article_count as usize, found: articles.len() });
    }
    Ok(articles)
}

/// Inserts the 2-byte length prefixes ahead of each article.
pub fn encode_articles(articles: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for article in articles {
        out.extend_from_slice(&(article.len() as u16).to_be_bytes());
        out.extend_from_slice(article);
    }
    out
}

/// Inspects a frame's header bytes only (no parameter-area parse) to decide
/// whether it is one of the DTF family. `frame` must contain at least
/// [`FrameHeader::SIZE`] bytes (the frame, without the outer length prefix).
pub fn is_dtf(frame: &[u8]) -> bool {
    if frame.len() < FrameHeader::SIZE {
        return false;
    }
    let phase = frame[2];
    let type_code = frame[3];
    let Some(phase) = Phase::from_u8(phase) else { return false };
    if phase != Phase::Data {
        return false;
    }
    matches!(
        FpduType::from_phase_type(phase, type_code),
        Some(FpduType::DTF) | Some(FpduType::DTFDA) | Some(FpduType::DTFMA) | Some(FpduType::DTFFA)
    )
}

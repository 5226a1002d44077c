//! Article/entity size validation and diagnostic-code mapping (§4.9).

use std::io;

use pesit_types::DiagnosticCode;

/// Maps a storage I/O error to the diagnostic family §4.9 and §6 specify:
/// not-found, access-denied, no-space, or a generic write error.
pub fn map_io_error(err: &io::Error) -> DiagnosticCode {
    match err.kind() {
        io::ErrorKind::NotFound => DiagnosticCode::FILE_NOT_FOUND,
        io::ErrorKind::PermissionDenied => DiagnosticCode::ACCESS_DENIED,
        io::ErrorKind::WriteZero | io::ErrorKind::UnexpectedEof => DiagnosticCode::WRITE_ERROR,
        _ => {
            #[cfg(unix)]
            if err.raw_os_error() == Some(ENOSPC) {
                return DiagnosticCode::NO_SPACE;
            }
            DiagnosticCode::WRITE_ERROR
        }
    }
}

#[cfg(unix)]
const ENOSPC: i32 = 28;

/// Validates a single article in a multi-article DTF (§4.5.1): must not
/// exceed the negotiated record length.
pub fn validate_article_length(article: &[u8], record_length: u32) -> Result<(), DiagnosticCode> {
    if article.len() as u64 > record_length as u64 {
        Err(DiagnosticCode::ARTICLE_LENGTH_VIOLATION)
    } else {
        Ok(())
    }
}

/// Validates that a whole DTF payload does not exceed the negotiated max
/// entity size (PI_25).
pub fn validate_entity_size(payload_len: usize, max_entity_size: u32) -> Result<(), DiagnosticCode> {
    if payload_len as u64 > max_entity_size as u64 {
        Err(DiagnosticCode::ACCESS_OR_ACL_MISMATCH)
    } else {
        Ok(())
    }
}

/// A restart point beyond the file's own size is never legitimate (§8
/// boundary: "restart point > file size -> ABORT D2-226").
pub fn validate_restart_point(restart_point: u64, file_size: u64) -> Result<(), DiagnosticCode> {
    if restart_point > file_size {
        Err(DiagnosticCode::ACCESS_OR_ACL_MISMATCH)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_length_violation_is_detected() {
        assert!(validate_article_length(&[0u8; 10], 5).is_err());
        assert!(validate_article_length(&[0u8; 5], 5).is_ok());
    }

    #[test]
    fn restart_point_beyond_file_size_is_rejected() {
        assert!(validate_restart_point(200, 100).is_err());
        assert!(validate_restart_point(100, 100).is_ok());
    }

    #[test]
    fn maps_not_found_and_permission_denied() {
        assert_eq!(map_io_error(&io::Error::from(io::ErrorKind::NotFound)), DiagnosticCode::FILE_NOT_FOUND);
        assert_eq!(map_io_error(&io::Error::from(io::ErrorKind::PermissionDenied)), DiagnosticCode::ACCESS_DENIED);
    }
}

//! Message sub-protocol (§4.8): MSG is a single-frame free-form message;
//! MSGDM/MSGMM/MSGFM segment a longer one across multiple FPDUs.

use pesit_msg::{pi, Fpdu, FpduType, Parameter, ParameterArea};
use pesit_types::DiagnosticCode;

use crate::error::PesitError;

fn protocol_error() -> PesitError {
    PesitError::DataPlaneViolation { diagnostic: DiagnosticCode::PROTOCOL_ERROR }
}

fn message_text(fpdu: &Fpdu) -> Result<&[u8], PesitError> {
    fpdu.params().and_then(|p| p.find(pi::FREE_MESSAGE_91)).map(Parameter::as_bytes).ok_or_else(protocol_error)
}

/// MSG: single-frame message. Acks immediately with no buffer involvement.
pub fn handle_msg(fpdu: &Fpdu, server_connection_id: u8) -> Result<(Vec<u8>, Fpdu), PesitError> {
    let body = message_text(fpdu)?.to_vec();
    Ok((body, Fpdu::empty(FpduType::ACK_MSG, fpdu.id_src, server_connection_id)))
}

/// MSGDM: starts reassembly. Transitions CN03 -> MSG_RECEIVING (in the
/// FSM); the buffer itself lives on `SessionContext::message_buffer`.
/// No response.
pub fn handle_msgdm(fpdu: &Fpdu, buffer: &mut Vec<u8>) -> Result<(), PesitError> {
    buffer.clear();
    buffer.extend_from_slice(message_text(fpdu)?);
    Ok(())
}

/// MSGMM: appends a middle segment. No response.
pub fn handle_msgmm(fpdu: &Fpdu, buffer: &mut Vec<u8>) -> Result<(), PesitError> {
    buffer.extend_from_slice(message_text(fpdu)?);
    Ok(())
}

/// MSGFM: appends the final segment, completes reassembly, and acks. The
/// caller is responsible for clearing `buffer` once the returned message
/// has been delivered.
pub fn handle_msgfm(fpdu: &Fpdu, buffer: &mut Vec<u8>, server_connection_id: u8) -> Result<(Vec<u8>, Fpdu), PesitError> {
    buffer.extend_from_slice(message_text(fpdu)?);
    let message = std::mem::take(buffer);
    Ok((message, Fpdu::empty(FpduType::ACK_MSG, fpdu.id_src, server_connection_id)))
}

/// Builds an outgoing MSG (or the first MSGDM segment, for callers that
/// chunk a long message) carrying `text` in PI_91.
pub fn build_msg(fpdu_type: FpduType, text: &[u8], id_dst: u8, id_src: u8) -> Fpdu {
    let mut params = ParameterArea::default();
    params.push(Parameter::new(pi::FREE_MESSAGE_91, text.to_vec()));
    Fpdu::with_params(fpdu_type, id_dst, id_src, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_fpdu(fpdu_type: FpduType, text: &str) -> Fpdu {
        build_msg(fpdu_type, text.as_bytes(), 9, 1)
    }

    #[test]
    fn single_frame_message_round_trips() {
        let fpdu = msg_fpdu(FpduType::MSG, "hello");
        let (body, ack) = handle_msg(&fpdu, 9).unwrap();
        assert_eq!(body, b"hello");
        assert_eq!(ack.fpdu_type, FpduType::ACK_MSG);
    }

    #[test]
    fn segmented_message_reassembles_in_order() {
        let mut buffer = Vec::new();
        handle_msgdm(&msg_fpdu(FpduType::MSGDM, "Hello, "), &mut buffer).unwrap();
        handle_msgmm(&msg_fpdu(FpduType::MSGMM, "PeSIT"), &mut buffer).unwrap();
        let (message, ack) = handle_msgfm(&msg_fpdu(FpduType::MSGFM, "!"), &mut buffer, 9).unwrap();
        assert_eq!(message, b"Hello, PeSIT!");
        assert_eq!(ack.fpdu_type, FpduType::ACK_MSG);
        assert!(buffer.is_empty());
    }

    #[test]
    fn msgdm_resets_a_stale_buffer() {
        let mut buffer = b"leftover".to_vec();
        handle_msgdm(&msg_fpdu(FpduType::MSGDM, "fresh"), &mut buffer).unwrap();
        assert_eq!(buffer, b"fresh");
    }
}

//! Connection-phase negotiation (§4.3): CONNECT/ACONNECT/RCONNECT.
//!
//! Pure functions over `Fpdu`s, consistent with Design Note §9 ("Codec as a
//! free function... state machine as a tagged variant"): no I/O, no
//! tracker/storage calls, so the negotiation rules are unit-testable
//! without a socket.

use pesit_msg::{pi, Fpdu, FpduType, Parameter, ParameterArea};
use pesit_types::{ConnectionId, DiagnosticCode};

use crate::registry::Registry;
use crate::session::AccessType;

pub struct NegotiationContext<'a> {
    pub server_id: &'a str,
    pub server_connection_id: ConnectionId,
    pub supported_version: u8,
    pub max_entity_size: u32,
    pub sync_points_enabled: bool,
    pub sync_interval_kb: u32,
    pub sync_window: u16,
    pub strict_partner_check: bool,
    pub registry: &'a Registry,
}

/// The subset of `SessionContext` fields negotiation determines; the caller
/// copies these onto the live `SessionContext` on acceptance.
pub struct NegotiatedSession {
    pub requester_name: String,
    pub server_name: String,
    pub peer_connection_id: ConnectionId,
    pub negotiated_version: u8,
    pub access_type: AccessType,
    pub sync_points_enabled: bool,
    pub sync_interval_bytes: u64,
    pub sync_window: u16,
    pub resync_enabled: bool,
    pub crc_enabled: bool,
    pub max_entity_size: u32,
}

pub enum ConnectOutcome {
    Accepted { response: Fpdu, session: NegotiatedSession },
    Rejected { response: Fpdu, diagnostic: DiagnosticCode },
}

fn rconnect(diagnostic: DiagnosticCode) -> Fpdu {
    let mut area = ParameterArea::default();
    area.push(Parameter::new(pi::DIAGNOSTIC, diagnostic.to_bytes().to_vec()));
    Fpdu::with_params(FpduType::RCONNECT, 0, 0, area)
}

/// Server side of CONNECT (§4.3). `fpdu` must be `FpduType::CONNECT`.
pub fn handle_connect(fpdu: &Fpdu, ctx: &NegotiationContext) -> ConnectOutcome {
    let peer_connection_id = ConnectionId::from(fpdu.id_src);
    let Some(params) = fpdu.params() else {
        return ConnectOutcome::Rejected { response: rconnect(DiagnosticCode::PROTOCOL_ERROR), diagnostic: DiagnosticCode::PROTOCOL_ERROR };
    };

    let requester_name = params.find(pi::REQUESTER_NAME).map(Parameter::as_str).unwrap_or_default();
    let server_name = params.find(pi::SERVER_NAME).map(Parameter::as_str).unwrap_or_default();
    let password = params.find(pi::PASSWORD).map(Parameter::as_str);
    let version = params.find(pi::PROTOCOL_VERSION).and_then(Parameter::as_u16).unwrap_or(0) as u8;
    let access = params.find(pi::ACCESS_TYPE).and_then(Parameter::as_u8).and_then(AccessType::from_pi22);
    let peer_wants_sync = params.find(pi::SYNC_POINT_CAPABILITY).is_some();
    let peer_wants_resync = params.find(pi::RESYNC_ENABLE).is_some();
    let crc_enabled = params.find(pi::CRC).is_some();

    macro_rules! reject {
        ($diag:expr) => {
            return ConnectOutcome::Rejected { response: rconnect($diag), diagnostic: $diag }
        };
    }

    if !server_name.eq_ignore_ascii_case(ctx.server_id) {
        reject!(DiagnosticCode::INVALID_SERVER_NAME);
    }
    if version == 0 || version > ctx.supported_version {
        reject!(DiagnosticCode::VERSION_MISMATCH_RCONNECT);
    }

    let partner = ctx.registry.partner(&requester_name);
    if ctx.strict_partner_check {
        match partner {
            None => reject!(DiagnosticCode::INVALID_PARTNER),
            Some(p) if !p.enabled => reject!(DiagnosticCode::ACCESS_REFUSED),
            _ => {}
        }
    }

    if let Some(p) = partner {
        if let Some(expected) = &p.password {
            if password.as_deref() != Some(expected.as_str()) {
                reject!(DiagnosticCode::ACCESS_REFUSED);
            }
        }
    }

    let Some(access) = access else { reject!(DiagnosticCode::ACCESS_REFUSED) };
    if let Some(p) = partner {
        if !p.allowed_access.permits(access) {
            reject!(DiagnosticCode::ACCESS_REFUSED);
        }
    }
    let negotiated_version = ctx.supported_version.min(version);
    let sync_points_enabled = ctx.sync_points_enabled && peer_wants_sync;
    let resync_enabled = sync_points_enabled && peer_wants_resync;

    let mut area = ParameterArea::default();
    area.push(Parameter::u16(pi::PROTOCOL_VERSION, negotiated_version as u16));
    if sync_points_enabled {
        area.push(Parameter::u32(pi::SYNC_POINT_CAPABILITY, ctx.sync_interval_kb));
    }
    if resync_enabled {
        area.push(Parameter::u8(pi::RESYNC_ENABLE, 1));
    }
    area.push(Parameter::u32(pi::MAX_ENTITY_SIZE, ctx.max_entity_size));

    let response = Fpdu::with_params(FpduType::ACONNECT, fpdu.id_src, u8::from(ctx.server_connection_id), area);

    ConnectOutcome::Accepted {
        response,
        session: NegotiatedSession {
            requester_name,
            server_name,
            peer_connection_id,
            negotiated_version,
            access_type: access,
            sync_points_enabled,
            sync_interval_bytes: ctx.sync_interval_kb as u64 * 1024,
            sync_window: ctx.sync_window,
            resync_enabled,
            crc_enabled,
            max_entity_size: ctx.max_entity_size,
        },
    }
}

/// Client side: builds the outgoing CONNECT FPDU.
pub fn build_connect(
    requester_name: &str,
    server_name: &str,
    password: Option<&str>,
    version: u8,
    access: AccessType,
    request_sync: bool,
    request_resync: bool,
    client_connection_id: ConnectionId,
) -> Fpdu {
    let mut area = ParameterArea::default();
    area.push(Parameter::str(pi::REQUESTER_NAME, requester_name));
    area.push(Parameter::str(pi::SERVER_NAME, server_name));
    if let Some(pw) = password {
        area.push(Parameter::str(pi::PASSWORD, pw));
    }
    area.push(Parameter::u16(pi::PROTOCOL_VERSION, version as u16));
    area.push(Parameter::u8(pi::ACCESS_TYPE, access.to_pi22()));
    if request_sync {
        area.push(Parameter::u8(pi::SYNC_POINT_CAPABILITY, 1));
    }
    if request_resync {
        area.push(Parameter::u8(pi::RESYNC_ENABLE, 1));
    }
    Fpdu::with_params(FpduType::CONNECT, 0, u8::from(client_connection_id), area)
}

/// Client side: interprets ACONNECT/RCONNECT. `Err` carries the diagnostic
/// from RCONNECT's PI_02.
pub fn handle_connect_reply(fpdu: &Fpdu) -> Result<ClientNegotiation, DiagnosticCode> {
    match fpdu.fpdu_type {
        FpduType::ACONNECT => {
            let params = fpdu.params().expect("ACONNECT carries a parameter area");
            Ok(ClientNegotiation {
                server_connection_id: ConnectionId::from(fpdu.id_src),
                negotiated_version: params.find(pi::PROTOCOL_VERSION).and_then(Parameter::as_u16).unwrap_or(0) as u8,
                sync_interval_bytes: params.find(pi::SYNC_POINT_CAPABILITY).and_then(Parameter::as_u32).map(|kb| kb as u64 * 1024),
                resync_enabled: params.find(pi::RESYNC_ENABLE).is_some(),
                max_entity_size: params.find(pi::MAX_ENTITY_SIZE).and_then(Parameter::as_u32).unwrap_or(4096),
            })
        }
        FpduType::RCONNECT => {
            let params = fpdu.params().expect("RCONNECT carries a parameter area");
            let diag_bytes = params.find(pi::DIAGNOSTIC).map(Parameter::as_bytes).unwrap_or(&[0u8, 0, 0]);
            let mut bytes = [0u8; 3];
            bytes.copy_from_slice(&diag_bytes[..3.min(diag_bytes.len())]);
            Err(DiagnosticCode::from_bytes(bytes))
        }
        other => {
            let _ = other;
            Err(DiagnosticCode::PROTOCOL_ERROR)
        }
    }
}

pub struct ClientNegotiation {
    pub server_connection_id: ConnectionId,
    pub negotiated_version: u8,
    pub sync_interval_bytes: Option<u64>,
    pub resync_enabled: bool,
    pub max_entity_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx(registry: &Registry) -> NegotiationContext<'_> {
        NegotiationContext {
            server_id: "SRV",
            server_connection_id: ConnectionId::from(7),
            supported_version: 2,
            max_entity_size: 8192,
            sync_points_enabled: true,
            sync_interval_kb: 100,
            sync_window: 1,
            strict_partner_check: false,
            registry,
        }
    }

    #[test]
    fn accepts_a_well_formed_connect() {
        let registry = Registry::default();
        let connect = build_connect("LOOP", "SRV", None, 2, AccessType::Write, true, false, ConnectionId::from(1));
        match handle_connect(&connect, &ctx(&registry)) {
            ConnectOutcome::Accepted { session, .. } => {
                assert_eq!(session.negotiated_version, 2);
                assert!(session.sync_points_enabled);
                assert_eq!(session.peer_connection_id, ConnectionId::from(1));
            }
            ConnectOutcome::Rejected { .. } => panic!("expected acceptance"),
        }
    }

    #[test]
    fn rejects_wrong_server_name() {
        let registry = Registry::default();
        let connect = build_connect("LOOP", "WRONG", None, 2, AccessType::Read, false, false, ConnectionId::from(1));
        match handle_connect(&connect, &ctx(&registry)) {
            ConnectOutcome::Rejected { diagnostic, .. } => assert_eq!(diagnostic, DiagnosticCode::INVALID_SERVER_NAME),
            ConnectOutcome::Accepted { .. } => panic!("expected rejection"),
        }
    }

    #[test]
    fn rejects_unsupported_version() {
        let registry = Registry::default();
        let connect = build_connect("LOOP", "SRV", None, 9, AccessType::Read, false, false, ConnectionId::from(1));
        match handle_connect(&connect, &ctx(&registry)) {
            ConnectOutcome::Rejected { diagnostic, .. } => assert_eq!(diagnostic, DiagnosticCode::VERSION_MISMATCH_RCONNECT),
            ConnectOutcome::Accepted { .. } => panic!("expected rejection"),
        }
    }

    #[test]
    fn strict_mode_rejects_unknown_partner() {
        let registry = Registry::default();
        let mut strict = ctx(&registry);
        strict.strict_partner_check = true;
        let connect = build_connect("NOBODY", "SRV", None, 2, AccessType::Read, false, false, ConnectionId::from(1));
        match handle_connect(&connect, &strict) {
            ConnectOutcome::Rejected { diagnostic, .. } => assert_eq!(diagnostic, DiagnosticCode::INVALID_PARTNER),
            ConnectOutcome::Accepted { .. } => panic!("expected rejection"),
        }
    }

    #[test]
    fn client_reply_round_trips_through_negotiation_context() {
        let registry = Registry::default();
        let connect = build_connect("LOOP", "SRV", None, 2, AccessType::Write, true, true, ConnectionId::from(1));
        let ConnectOutcome::Accepted { response, .. } = handle_connect(&connect, &ctx(&registry)) else {
            panic!("expected acceptance")
        };
        let negotiated = handle_connect_reply(&response).unwrap();
        assert_eq!(negotiated.negotiated_version, 2);
        assert_eq!(negotiated.sync_interval_bytes, Some(100 * 1024));
        assert!(negotiated.resync_enabled);
    }

    #[test]
    fn rejection_diagnostic_round_trips_to_client() {
        let rejected = rconnect(DiagnosticCode::ACCESS_REFUSED);
        let err = handle_connect_reply(&rejected).unwrap_err();
        assert_eq!(err, DiagnosticCode::ACCESS_REFUSED);
    }
}

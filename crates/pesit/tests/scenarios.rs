//! End-to-end scenarios driving the FSM, negotiation, lifecycle and
//! transfer engine together against a real local filesystem and an
//! in-memory tracker, without a real socket (the wire itself is exercised
//! by `pesit-transport`'s own loopback test).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use pesit::registry::{AllowedAccess, PartnerEntry, Registry, VirtualFileEntry, TransferDirection};
use pesit::session::{AccessType, SessionContext};
use pesit::storage::LocalFilesystemStorage;
use pesit::tracker::InMemoryTransferTracker;
use pesit::transfer::TransferContext;
use pesit::{fsm, lifecycle, negotiation, transfer_engine, TransferTracker};

use pesit_msg::{pgi, pi, Fpdu, FpduType, Parameter, ParameterArea, ParameterGroup};
use pesit_types::{ConnectionId, DiagnosticCode, TransferId};

fn remote() -> SocketAddr {
    "127.0.0.1:1763".parse().unwrap()
}

// --- S1: minimal connect/release ------------------------------------------

#[test]
fn s1_minimal_connect_then_release() {
    let registry = Registry::default();
    let negotiation_ctx = negotiation::NegotiationContext {
        server_id: "SRV",
        server_connection_id: ConnectionId::from(9),
        supported_version: 2,
        max_entity_size: 8192,
        sync_points_enabled: false,
        sync_interval_kb: 0,
        sync_window: 1,
        strict_partner_check: false,
        registry: &registry,
    };

    let connect = negotiation::build_connect("LOOP", "SRV", None, 2, AccessType::Read, false, false, ConnectionId::from(1));

    let transition = fsm::on_fpdu(pesit::ServerState::Cn01Repos, FpduType::CONNECT);
    assert_eq!(transition.next_state, pesit::ServerState::Cn03Connected);
    assert_eq!(transition.action, fsm::Action::Reply);

    let negotiation::ConnectOutcome::Accepted { response, session } = negotiation::handle_connect(&connect, &negotiation_ctx) else {
        panic!("expected acceptance");
    };
    assert_eq!(response.fpdu_type, FpduType::ACONNECT);
    assert_eq!(response.id_dst, 1);
    assert_eq!(response.id_src, 9);
    assert_eq!(session.negotiated_version, 2);

    let release = Fpdu::empty(FpduType::RELEASE, 9, 1);
    let transition = fsm::on_fpdu(pesit::ServerState::Cn03Connected, release.fpdu_type);
    assert_eq!(transition.next_state, pesit::ServerState::Cn01Repos);
    assert_eq!(transition.action, fsm::Action::ReplyAndClose);
}

// --- S2: small file send ----------------------------------------------------

fn create_fpdu(virtual_name: &str, max_entity_size: u32, record_length: u16) -> Fpdu {
    let mut file_id = ParameterGroup::new(pgi::FILE_IDENTIFICATION, Vec::new());
    file_id.params.push(Parameter::str(pi::FILENAME, virtual_name));
    let mut logical = ParameterGroup::new(pgi::LOGICAL_ATTRIBUTES, Vec::new());
    logical.params.push(Parameter::u16(pi::ARTICLE_LENGTH, record_length));

    let mut area = ParameterArea::default();
    area.push_group(file_id);
    area.push_group(logical);
    area.push(Parameter::u32(pi::MAX_ENTITY_SIZE, max_entity_size));
    Fpdu::with_params(FpduType::CREATE, 9, 1, area)
}

#[test_log::test(tokio::test)]
async fn s2_small_file_send_writes_exact_bytes() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Registry::default();
    let storage = LocalFilesystemStorage;
    let tracker = InMemoryTransferTracker::new();

    let ctx = lifecycle::LifecycleContext {
        registry: &registry,
        storage: &storage,
        strict_file_check: false,
        configured_max_entity_size: 1024,
        server_connection_id: 9,
        default_receive_dir: tmp.path().to_path_buf(),
    };

    let create = create_fpdu("FILE", 65535, 512);
    let (ack_create, mut transfer) = lifecycle::handle_create(&create, "LOOP", TransferId::from(1), &ctx).await.unwrap();
    assert_eq!(ack_create.fpdu_type, FpduType::ACK_CREATE);

    let open = Fpdu::empty(FpduType::OPEN, 9, 1);
    let ack_open = lifecycle::handle_open(&open, &mut transfer, &ctx).await.unwrap();
    assert_eq!(ack_open.fpdu_type, FpduType::ACK_OPEN);

    let write = Fpdu::empty(FpduType::WRITE, 9, 1);
    let ack_write = transfer_engine::handle_write(&write, 9);
    assert_eq!(ack_write.fpdu_type, FpduType::ACK_WRITE);

    let payload = b"Hello PeSIT!".to_vec();
    let dtf = Fpdu { fpdu_type: FpduType::DTF, id_dst: 9, id_src: 1, body: pesit_msg::Body::Articles(vec![payload.clone()]) };
    transfer_engine::handle_dtf(&dtf, &mut transfer).await.unwrap();

    transfer_engine::handle_dtf_end(&mut transfer).await.unwrap();

    let trans_end = Fpdu::empty(FpduType::TRANS_END, 9, 1);
    let ack_trans_end = transfer_engine::handle_trans_end_receive(&trans_end, &transfer, TransferId::from(1), &tracker, 9).await;
    assert_eq!(ack_trans_end.fpdu_type, FpduType::ACK_TRANS_END);

    let close = Fpdu::empty(FpduType::CLOSE, 9, 1);
    let ack_close = lifecycle::handle_close(&close, &mut transfer, 9).await.unwrap();
    assert_eq!(ack_close.fpdu_type, FpduType::ACK_CLOSE);

    let deselect = Fpdu::empty(FpduType::DESELECT, 9, 1);
    let ack_deselect = lifecycle::handle_deselect(&deselect, 9);
    assert_eq!(ack_deselect.fpdu_type, FpduType::ACK_DESELECT);

    let written = std::fs::read(&transfer.physical_path).unwrap();
    assert_eq!(written, payload);
    assert_eq!(written.len(), 12);
    assert_eq!(transfer.checksum_hex().len(), 64);
}

#[tokio::test]
async fn trans_end_receive_completes_tracker_with_content_checksum() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Registry::default();
    let storage = LocalFilesystemStorage;
    let tracker = InMemoryTransferTracker::new();
    let transfer_id = tracker.create(1, "SRV", "LOOP", "FILE", AccessType::Write, remote()).await.unwrap();

    let ctx = lifecycle::LifecycleContext {
        registry: &registry,
        storage: &storage,
        strict_file_check: false,
        configured_max_entity_size: 1024,
        server_connection_id: 9,
        default_receive_dir: tmp.path().to_path_buf(),
    };

    let create = create_fpdu("FILE", 65535, 512);
    let (_, mut transfer) = lifecycle::handle_create(&create, "LOOP", transfer_id, &ctx).await.unwrap();
    lifecycle::handle_open(&Fpdu::empty(FpduType::OPEN, 9, 1), &mut transfer, &ctx).await.unwrap();

    let payload = b"checksum me".to_vec();
    let dtf = Fpdu { fpdu_type: FpduType::DTF, id_dst: 9, id_src: 1, body: pesit_msg::Body::Articles(vec![payload]) };
    transfer_engine::handle_dtf(&dtf, &mut transfer).await.unwrap();
    transfer_engine::handle_dtf_end(&mut transfer).await.unwrap();

    let expected = transfer.checksum_hex();
    let trans_end = Fpdu::empty(FpduType::TRANS_END, 9, 1);
    transfer_engine::handle_trans_end_receive(&trans_end, &transfer, transfer_id, &tracker, 9).await;

    let record = tracker.get(transfer_id).await.unwrap();
    assert_eq!(record.checksum, Some(expected));
}

// --- S3: receive with checkpointed interruption and resume ------------------

fn write_source_file(dir: &std::path::Path, size: usize) -> (PathBuf, Vec<u8>) {
    let mut content = Vec::with_capacity(size);
    for i in 0..size {
        content.push((i % 251) as u8);
    }
    let path = dir.join("source.bin");
    std::fs::write(&path, &content).unwrap();
    (path, content)
}

#[test_log::test(tokio::test)]
async fn s3_interrupted_send_resumes_from_last_sync_point() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = LocalFilesystemStorage;
    let tracker = InMemoryTransferTracker::new();

    // Scaled down from the 50 MB / 4096 KB worked example: same shape, a
    // size a unit test can afford. 200_000 bytes at a 40_000-byte interval
    // still yields 5 sync points like the full-size case yields 12-ish.
    const FILE_SIZE: usize = 200_000;
    const SYNC_INTERVAL: u64 = 40_000;
    let (source_path, source_content) = write_source_file(tmp.path(), FILE_SIZE);

    let record_length = 500u32;
    let max_entity_size = 4096u32;

    let select = create_fpdu("FILE", max_entity_size, record_length as u16);
    let mut transfer = TransferContext::new_read(TransferId::from(1), "FILE".into(), source_path.clone(), record_length, max_entity_size, 0);

    let read = Fpdu::empty(FpduType::READ, 1, 9);
    transfer_engine::handle_read(&read, &mut transfer, &storage, 0, 9).await.unwrap();

    let mut session = SessionContext::new(1, remote());
    session.peer_connection_id = ConnectionId::from(1);
    session.server_connection_id = ConnectionId::from(9);
    session.sync_points_enabled = true;
    session.sync_interval_bytes = SYNC_INTERVAL;

    let mut received = Vec::new();
    let mut sync_count = 0u32;
    let mut resume_offset = 0u64;

    loop {
        match transfer_engine::next_send_step(&mut transfer, &session).await.unwrap() {
            transfer_engine::SendStep::Data(fpdus) => {
                for fpdu in fpdus {
                    match fpdu.body {
                        pesit_msg::Body::Articles(articles) => {
                            for a in articles {
                                received.extend_from_slice(&a);
                            }
                        }
                        pesit_msg::Body::RawFragment(bytes) => received.extend_from_slice(&bytes),
                        pesit_msg::Body::Parameters(_) => {}
                    }
                }
            }
            transfer_engine::SendStep::Sync(fpdu) => {
                sync_count += 1;
                tracker.record_sync(TransferId::from(1), transfer.bytes_transferred, sync_count).await.unwrap();
                transfer_engine::confirm_sync(&fpdu_with_echoed_sync(&fpdu), &mut transfer).unwrap();

                if sync_count == 3 {
                    // Simulate the connection dropping right after ACK_SYN #3.
                    resume_offset = tracker.get(TransferId::from(1)).await.unwrap().last_sync_point_offset;
                    break;
                }
            }
            transfer_engine::SendStep::End(_) => break,
        }
    }
    assert_eq!(sync_count, 3);
    assert_eq!(resume_offset, 3 * SYNC_INTERVAL);
    assert_eq!(received.len(), resume_offset as usize);

    // Reconnect: a fresh TransferContext resuming from the checkpoint.
    let mut transfer = TransferContext::new_read(TransferId::from(2), "FILE".into(), source_path.clone(), record_length, max_entity_size, 0);
    let resumed_read = Fpdu::empty(FpduType::READ, 1, 9);
    transfer_engine::handle_read(&resumed_read, &mut transfer, &storage, resume_offset, 9).await.unwrap();
    assert_eq!(transfer.bytes_transferred, resume_offset);

    loop {
        match transfer_engine::next_send_step(&mut transfer, &session).await.unwrap() {
            transfer_engine::SendStep::Data(fpdus) => {
                for fpdu in fpdus {
                    match fpdu.body {
                        pesit_msg::Body::Articles(articles) => {
                            for a in articles {
                                received.extend_from_slice(&a);
                            }
                        }
                        pesit_msg::Body::RawFragment(bytes) => received.extend_from_slice(&bytes),
                        pesit_msg::Body::Parameters(_) => {}
                    }
                }
            }
            transfer_engine::SendStep::Sync(fpdu) => {
                transfer_engine::confirm_sync(&fpdu_with_echoed_sync(&fpdu), &mut transfer).unwrap();
            }
            transfer_engine::SendStep::End(_) => break,
        }
    }

    assert_eq!(received.len(), source_content.len());
    assert_eq!(received, source_content);
}

/// `next_send_step` builds a `SYN` addressed to the peer; a real peer would
/// echo `ACK_SYN` with the same sync number, which is all `confirm_sync`
/// reads. Reusing the `SYN`'s own parameter area stands in for that echo.
fn fpdu_with_echoed_sync(syn: &Fpdu) -> Fpdu {
    Fpdu::with_params(FpduType::ACK_SYN, syn.id_dst, syn.id_src, syn.params().unwrap().clone())
}

// --- S4: sync interval much smaller than the max entity ---------------------

#[tokio::test]
async fn s4_small_sync_interval_still_completes_within_bound() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = LocalFilesystemStorage;

    const FILE_SIZE: usize = 500_000;
    const SYNC_INTERVAL: u64 = 10_000;
    let max_entity_size = 65536u32;
    let record_length = 512u32;

    let (source_path, _content) = write_source_file(tmp.path(), FILE_SIZE);
    let mut transfer = TransferContext::new_read(TransferId::from(1), "FILE".into(), source_path, record_length, max_entity_size, 0);
    let read = Fpdu::empty(FpduType::READ, 1, 9);
    transfer_engine::handle_read(&read, &mut transfer, &storage, 0, 9).await.unwrap();

    let mut session = SessionContext::new(1, remote());
    session.peer_connection_id = ConnectionId::from(1);
    session.server_connection_id = ConnectionId::from(9);
    session.sync_points_enabled = true;
    session.sync_interval_bytes = SYNC_INTERVAL;

    let max_syncs = (FILE_SIZE as u64).div_ceil(SYNC_INTERVAL);
    let mut sync_count = 0u64;

    loop {
        match transfer_engine::next_send_step(&mut transfer, &session).await.unwrap() {
            transfer_engine::SendStep::Data(_) => {}
            transfer_engine::SendStep::Sync(fpdu) => {
                sync_count += 1;
                assert!(sync_count <= max_syncs, "emitted more syncs than the size/interval bound allows");
                transfer_engine::confirm_sync(&fpdu_with_echoed_sync(&fpdu), &mut transfer).unwrap();
            }
            transfer_engine::SendStep::End(_) => break,
        }
    }

    assert_eq!(transfer.bytes_transferred, FILE_SIZE as u64);
    assert!(sync_count <= max_syncs);
}

// --- S5: multi-article entity shape -----------------------------------------

#[tokio::test]
async fn s5_multi_article_entities_split_eight_then_two() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = LocalFilesystemStorage;

    let record_length = 506u32;
    let max_entity_size = 4096u32;
    assert_eq!(transfer_engine::articles_per_entity(max_entity_size, record_length), 8);

    let (source_path, _content) = write_source_file(tmp.path(), 5060);
    let mut transfer = TransferContext::new_read(TransferId::from(1), "FILE".into(), source_path, record_length, max_entity_size, 0);
    let read = Fpdu::empty(FpduType::READ, 1, 9);
    transfer_engine::handle_read(&read, &mut transfer, &storage, 0, 9).await.unwrap();

    let session = SessionContext::new(1, remote());
    let mut entity_sizes = Vec::new();

    loop {
        match transfer_engine::next_send_step(&mut transfer, &session).await.unwrap() {
            transfer_engine::SendStep::Data(fpdus) => {
                for fpdu in fpdus {
                    let articles = fpdu.articles().expect("s5 never segments a single article");
                    entity_sizes.push(articles.len());
                    for a in articles {
                        assert_eq!(a.len(), record_length as usize);
                    }
                }
            }
            transfer_engine::SendStep::Sync(_) => unreachable!("sync points were not negotiated for this session"),
            transfer_engine::SendStep::End(_) => break,
        }
    }

    assert_eq!(entity_sizes, vec![8, 2]);
}

// --- S6: unknown virtual file in strict mode --------------------------------

#[tokio::test]
async fn s6_strict_mode_rejects_unknown_virtual_file_and_tracks_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Registry::default();
    let storage = LocalFilesystemStorage;
    let tracker = InMemoryTransferTracker::new();

    let ctx = lifecycle::LifecycleContext {
        registry: &registry,
        storage: &storage,
        strict_file_check: true,
        configured_max_entity_size: 4096,
        server_connection_id: 9,
        default_receive_dir: tmp.path().to_path_buf(),
    };

    let create = create_fpdu("UNKNOWN", 4096, 512);
    let err = lifecycle::handle_create(&create, "LOOP", TransferId::from(1), &ctx).await.unwrap_err();
    assert_eq!(err.diagnostic(), Some(DiagnosticCode::FILE_NOT_FOUND));

    // No transfer was ever started against the tracker, so nothing to find.
    assert!(tracker.get(TransferId::from(1)).await.is_none());
}

// --- S7: EBCDIC pre-connection handshake ------------------------------------

#[test]
fn s7_ebcdic_preamble_is_detected_and_connect_decodes() {
    let preamble_ascii = b"PESIT   CXCLIENT********";
    let preamble_ebcdic = pesit_types::ebcdic::ascii_to_ebcdic(preamble_ascii);
    assert!(pesit_types::ebcdic::is_pure_ebcdic_preamble(&preamble_ebcdic));

    let connect = negotiation::build_connect("LOOP", "SRV", None, 2, AccessType::Write, false, false, ConnectionId::from(1));
    let wire = pesit_msg::codec::encode(&connect, true);
    assert_ne!(wire, pesit_msg::codec::encode(&connect, false));

    let decoded = pesit_msg::codec::parse(&wire, true).unwrap();
    let registry = Registry::default();
    let ctx = negotiation::NegotiationContext {
        server_id: "SRV",
        server_connection_id: ConnectionId::from(9),
        supported_version: 2,
        max_entity_size: 8192,
        sync_points_enabled: false,
        sync_interval_kb: 0,
        sync_window: 1,
        strict_partner_check: false,
        registry: &registry,
    };

    match negotiation::handle_connect(&decoded, &ctx) {
        negotiation::ConnectOutcome::Accepted { session, .. } => {
            assert_eq!(session.requester_name, "LOOP");
            assert_eq!(session.server_name, "SRV");
        }
        negotiation::ConnectOutcome::Rejected { diagnostic, .. } => panic!("expected acceptance, got {diagnostic}"),
    }
}

// --- Boundaries: zero-byte file transfer still closes normally -------------

#[tokio::test]
async fn zero_byte_file_completes_without_any_dtf() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = Registry::default();
    let storage = LocalFilesystemStorage;
    let tracker = InMemoryTransferTracker::new();

    let ctx = lifecycle::LifecycleContext {
        registry: &registry,
        storage: &storage,
        strict_file_check: false,
        configured_max_entity_size: 4096,
        server_connection_id: 9,
        default_receive_dir: tmp.path().to_path_buf(),
    };

    let create = create_fpdu("EMPTY", 4096, 512);
    let (_ack_create, mut transfer) = lifecycle::handle_create(&create, "LOOP", TransferId::from(1), &ctx).await.unwrap();
    let open = Fpdu::empty(FpduType::OPEN, 9, 1);
    lifecycle::handle_open(&open, &mut transfer, &ctx).await.unwrap();

    transfer_engine::handle_dtf_end(&mut transfer).await.unwrap();
    let trans_end = Fpdu::empty(FpduType::TRANS_END, 9, 1);
    let ack = transfer_engine::handle_trans_end_receive(&trans_end, &transfer, TransferId::from(1), &tracker, 9).await;
    assert_eq!(ack.fpdu_type, FpduType::ACK_TRANS_END);

    let close = Fpdu::empty(FpduType::CLOSE, 9, 1);
    let ack_close = lifecycle::handle_close(&close, &mut transfer, 9).await.unwrap();
    assert_eq!(ack_close.fpdu_type, FpduType::ACK_CLOSE);

    let written = std::fs::read(&transfer.physical_path).unwrap();
    assert!(written.is_empty());
}

// --- Boundaries: restart point beyond file size aborts ----------------------

#[tokio::test]
async fn restart_point_past_end_of_file_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = LocalFilesystemStorage;
    let (source_path, content) = write_source_file(tmp.path(), 1000);

    let mut transfer = TransferContext::new_read(TransferId::from(1), "FILE".into(), source_path, 512, 4096, 0);
    let reservation_kb = ((content.len() + 1023) / 1024) as u32;
    transfer.file_size_reservation_kb = Some(reservation_kb);

    let read = Fpdu::empty(FpduType::READ, 1, 9);
    let past_end = u64::from(reservation_kb) * 1024 + 1;
    let err = transfer_engine::handle_read(&read, &mut transfer, &storage, past_end, 9).await.unwrap_err();
    assert_eq!(err.diagnostic(), Some(DiagnosticCode::ACCESS_OR_ACL_MISMATCH));
}

// Keeps the `PartnerEntry`/`AllowedAccess`/`TransferDirection` imports live
// for a partner-registry round trip exercised alongside CONNECT.
#[test]
fn connect_is_rejected_for_a_partner_without_write_access() {
    let mut partners = HashMap::new();
    partners.insert(
        "LOOP".to_string(),
        PartnerEntry { id: "LOOP".into(), password: None, enabled: true, allowed_access: AllowedAccess::ReadOnly },
    );
    let mut files = HashMap::new();
    files.insert(
        "FILE".to_string(),
        VirtualFileEntry {
            virtual_name: "FILE".into(),
            directory: "/recv".into(),
            filename_pattern: "{VIRTUAL}".into(),
            direction: TransferDirection::Both,
            enabled: true,
            partner_acl: vec![],
        },
    );
    let registry = Registry::new(partners, files);
    let ctx = negotiation::NegotiationContext {
        server_id: "SRV",
        server_connection_id: ConnectionId::from(9),
        supported_version: 2,
        max_entity_size: 8192,
        sync_points_enabled: false,
        sync_interval_kb: 0,
        sync_window: 1,
        strict_partner_check: true,
        registry: &registry,
    };
    let connect = negotiation::build_connect("LOOP", "SRV", None, 2, AccessType::Write, false, false, ConnectionId::from(1));
    match negotiation::handle_connect(&connect, &ctx) {
        negotiation::ConnectOutcome::Rejected { diagnostic, .. } => assert_eq!(diagnostic, DiagnosticCode::ACCESS_REFUSED),
        negotiation::ConnectOutcome::Accepted { .. } => panic!("a read-only partner must not be granted write access"),
    }
}

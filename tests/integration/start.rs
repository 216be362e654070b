use crate::*;

use ota_core::error::BackendError;
use ota_core::wire::{option, CoapCode, CoapMessage, CoapType, HASH_SIZE};
use ota_session::UpdateFlags;

#[test]
fn start_replies_with_window_size() {
    let mut h = Harness::new();
    let resp = h.start(1000, 512);

    assert_eq!(resp.ty, CoapType::Con);
    assert_eq!(resp.code, CoapCode::CREATED);
    assert_eq!(resp.token.as_ref(), START_TOKEN);
    assert_eq!(
        resp.uint_option(option::WINDOW_SIZE).unwrap(),
        Some((16 * 1024 / 512) as u32)
    );
    assert!(!resp.has_option(option::FILE_SIZE));
    assert!(!resp.has_payload());

    assert!(h.update.is_running());
    assert_eq!(h.update.state(), UpdateState::Active);
    let status = h.update.status().unwrap();
    assert_eq!(status.chunk_count, 2);
    assert_eq!(status.file_offset, 0);
}

#[test]
fn start_flags_follow_hash_and_discard() {
    let mut h = Harness::new();
    h.start(1000, 512);
    let hash = [0x5a; HASH_SIZE];
    h.start_with(1000, 512, |m| m.with_option(option::FILE_SHA256, hash.to_vec()));
    h.start_with(1000, 512, |m| {
        m.with_option(option::FILE_SHA256, hash.to_vec())
            .with_empty_option(option::DISCARD_DATA)
    });

    assert_eq!(
        h.backend.start_flags(),
        vec![
            UpdateFlags::NON_RESUMABLE,
            UpdateFlags::empty(),
            UpdateFlags::DISCARD_DATA,
        ]
    );
    match &h.backend.calls()[2] {
        BackendCall::Start { file_hash, .. } => assert_eq!(*file_hash, Some(hash)),
        other => panic!("unexpected call {other:?}"),
    }
}

#[test]
fn start_reports_resume_offset() {
    let mut h = Harness::new();
    h.backend.set_resume_offset(1024);
    let resp = h.start_with(2000, 512, |m| m.with_option(option::FILE_SHA256, vec![1u8; HASH_SIZE]));

    assert_eq!(resp.uint_option(option::FILE_SIZE).unwrap(), Some(1024));
    let status = h.update.status().unwrap();
    assert_eq!(status.file_offset, 1024);
    assert_eq!(status.transfer_size, 976);
    assert_eq!(status.chunk_count, 2);
}

#[test]
fn start_discards_update_in_progress() {
    let mut h = Harness::new();
    h.start(2048, 512);
    h.send_chunks([1, 2]);
    h.channel.drain();

    h.start(1024, 512);
    assert_eq!(h.backend.finish_flags(), vec![UpdateFlags::CANCEL]);
    let status = h.update.status().unwrap();
    assert_eq!(status.chunk_index, 0);
    assert_eq!(status.chunk_count, 2);
}

#[test]
fn backend_start_failure_sends_separate_error_response() {
    let mut h = Harness::new();
    h.backend.fail_start(BackendError::new(-260, "flash is busy"));

    let msg = start_msg(7, 1000, 512);
    h.deliver(&msg).unwrap();

    let ack = h.channel.take().unwrap();
    assert_eq!(ack.ty, CoapType::Ack);
    assert!(ack.code.is_empty());
    assert_eq!(ack.id, Some(7));

    let resp = h.channel.take().unwrap();
    assert_eq!(resp.ty, CoapType::Con);
    assert!(resp.code.is_response() && !resp.code.is_success());
    assert_eq!(resp.token.as_ref(), START_TOKEN);
    let diag = diagnostic(&resp);
    assert_eq!(diag["code"], -260);
    assert_eq!(diag["message"], "flash is busy");

    assert!(!h.update.is_running());
}

#[test]
fn resume_offset_past_end_is_rejected() {
    let mut h = Harness::new();
    h.backend.set_resume_offset(4096);
    h.deliver(&start_msg(3, 1000, 512)).unwrap();

    let msgs = h.channel.drain();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[1].ty, CoapType::Con);
    assert!(!msgs[1].code.is_success());
    assert_eq!(h.backend.finish_flags(), vec![UpdateFlags::CANCEL]);
    assert!(!h.update.is_running());
}

#[test]
fn non_confirmable_start_gets_non_error_response() {
    let mut h = Harness::new();
    let mut msg = start_msg(9, 1000, 512);
    msg.ty = CoapType::Non;
    h.deliver(&msg).unwrap();

    let resp = h.channel.take().unwrap();
    assert_eq!(resp.ty, CoapType::Non);
    assert!(resp.code.is_response() && !resp.code.is_success());
    assert_eq!(resp.token.as_ref(), START_TOKEN);
    assert!(h.channel.is_empty());
    assert!(h.backend.calls().is_empty());
    assert!(!h.update.is_running());
}

#[test]
fn start_without_token_gets_piggybacked_error() {
    let mut h = Harness::new();
    let msg = start_msg(11, 1000, 512).with_token(bytes::Bytes::new());
    h.deliver(&msg).unwrap();

    let resp = h.channel.take().unwrap();
    assert_eq!(resp.ty, CoapType::Ack);
    assert_eq!(resp.id, Some(11));
    assert!(!resp.has_token());
    assert!(!resp.code.is_success());
    assert!(h.channel.is_empty());
}

#[test]
fn start_with_invalid_options_gets_piggybacked_error() {
    let cases: Vec<(&str, CoapMessage)> = vec![
        (
            "missing File-Size",
            CoapMessage::new(CoapType::Con, CoapCode::POST)
                .with_id(20)
                .with_token(START_TOKEN)
                .with_uri_path("S")
                .with_uint_option(option::CHUNK_SIZE, 512),
        ),
        ("zero File-Size", start_msg(20, 0, 512)),
        (
            "missing Chunk-Size",
            CoapMessage::new(CoapType::Con, CoapCode::POST)
                .with_id(20)
                .with_token(START_TOKEN)
                .with_uri_path("S")
                .with_uint_option(option::FILE_SIZE, 1000),
        ),
        ("too small Chunk-Size", start_msg(20, 1000, 28)),
        ("too large Chunk-Size", start_msg(20, 1000, 1028)),
        (
            "short File-SHA-256",
            start_msg(20, 1000, 512).with_option(option::FILE_SHA256, vec![0u8; HASH_SIZE - 1]),
        ),
        (
            "non-empty Discard-Data",
            start_msg(20, 1000, 512).with_uint_option(option::DISCARD_DATA, 1),
        ),
    ];

    for (name, msg) in cases {
        let mut h = Harness::new();
        h.deliver(&msg).unwrap();
        let resp = h.channel.take().unwrap_or_else(|| panic!("{name}: no reply"));
        assert_eq!(resp.ty, CoapType::Ack, "{name}");
        assert_eq!(resp.id, Some(20), "{name}");
        assert_eq!(resp.code, CoapCode::BAD_REQUEST, "{name}");
        assert_eq!(resp.token.as_ref(), START_TOKEN, "{name}");
        assert!(diagnostic(&resp)["message"].is_string(), "{name}");
        assert!(h.backend.calls().is_empty(), "{name}");
        assert!(!h.update.is_running(), "{name}");
    }
}

use crate::*;

use ota_core::error::BackendError;
use ota_core::wire::{option, CoapCode, CoapMessage, CoapType};
use ota_session::UpdateFlags;

/// One-chunk update with the chunk delivered and its ack consumed.
fn transferred() -> Harness {
    let mut h = Harness::new();
    h.start(512, 512);
    h.send_chunk(1).unwrap();
    h.channel.drain();
    h.backend.clear_calls();
    h
}

fn expect_empty_ack(h: &Harness, id: u16) {
    let ack = h.channel.take().expect("empty ACK");
    assert_eq!(ack.ty, CoapType::Ack);
    assert_eq!(ack.code, CoapCode::EMPTY);
    assert_eq!(ack.id, Some(id));
}

#[test]
fn finish_validates_then_applies_on_ack() {
    let mut h = transferred();
    let id = h.finish();

    assert_eq!(h.backend.finish_flags(), vec![UpdateFlags::VALIDATE_ONLY]);
    assert!(h.update.is_running());
    assert_eq!(h.update.state(), UpdateState::Completing);

    expect_empty_ack(&h, id);
    let resp = h.channel.take().unwrap();
    assert_eq!(resp.ty, CoapType::Con);
    assert!(resp.code.is_response() && resp.code.is_success());
    assert_eq!(resp.token.as_ref(), FINISH_TOKEN);

    h.backend.clear_calls();
    h.ack_response(&resp).unwrap();
    assert_eq!(h.backend.finish_flags(), vec![UpdateFlags::empty()]);
    assert!(!h.update.is_running());
    assert_eq!(h.update.state(), UpdateState::Idle);
    assert_eq!(h.backend.image(), h.file.to_vec());
}

#[test]
fn unrelated_ack_does_not_apply() {
    let mut h = transferred();
    h.finish();
    h.channel.drain();

    h.deliver(&CoapMessage::empty_ack(0x7fff)).unwrap();
    assert_eq!(h.backend.finish_flags(), vec![UpdateFlags::VALIDATE_ONLY]);
    assert_eq!(h.update.state(), UpdateState::Completing);
}

#[test]
fn reset_of_finish_response_cancels() {
    let mut h = transferred();
    h.finish();
    h.channel.take();
    let resp = h.channel.take().unwrap();
    h.backend.clear_calls();

    h.deliver(&CoapMessage::reset(resp.id.unwrap())).unwrap();
    assert_eq!(h.backend.finish_flags(), vec![UpdateFlags::CANCEL]);
    assert!(!h.update.is_running());
}

#[test]
fn apply_failure_cancels_and_reports() {
    let mut h = transferred();
    h.backend.fail_apply(BackendError::new(-300, "bad signature"));
    h.finish();
    h.channel.take();
    let resp = h.channel.take().unwrap();
    h.backend.clear_calls();

    let err = h.ack_response(&resp).unwrap_err();
    assert!(matches!(err, ProtocolError::Backend(ref e) if e.code == -300));
    assert_eq!(
        h.backend.finish_flags(),
        vec![UpdateFlags::empty(), UpdateFlags::CANCEL]
    );
    assert!(!h.update.is_running());
}

#[test]
fn incomplete_update_is_cancelled() {
    let mut h = Harness::new();
    h.start(1024, 512);
    h.send_chunk(1).unwrap();
    h.channel.drain();
    h.backend.clear_calls();

    let id = h.finish();
    assert_eq!(h.backend.finish_flags(), vec![UpdateFlags::CANCEL]);
    assert!(!h.update.is_running());

    expect_empty_ack(&h, id);
    let resp = h.channel.take().unwrap();
    assert_eq!(resp.ty, CoapType::Con);
    assert!(resp.code.is_response() && !resp.code.is_success());
    assert_eq!(resp.token.as_ref(), FINISH_TOKEN);
    assert!(diagnostic(&resp)["message"].is_string());
}

#[test]
fn failed_validation_reports_backend_error() {
    let mut h = transferred();
    h.backend.fail_validate(BackendError::new(-130, "YOU SHALL NOT PASS!"));
    let id = h.finish();

    expect_empty_ack(&h, id);
    let resp = h.channel.take().unwrap();
    assert_eq!(resp.ty, CoapType::Con);
    assert!(!resp.code.is_success());
    assert_eq!(resp.token.as_ref(), FINISH_TOKEN);
    let text = std::str::from_utf8(&resp.payload).unwrap();
    assert!(text.contains("YOU SHALL NOT PASS!"));
    assert!(text.contains("-130"));
    assert!(!h.update.is_running());
}

#[test]
fn cancel_request_cancels() {
    let mut h = transferred();
    let id = h.finish_with(|m| m.with_empty_option(option::CANCEL_UPDATE));

    assert_eq!(h.backend.finish_flags(), vec![UpdateFlags::CANCEL]);
    assert!(!h.update.is_running());
    expect_empty_ack(&h, id);
    let resp = h.channel.take().unwrap();
    assert!(resp.code.is_success());
}

#[test]
fn cancel_request_can_discard_data() {
    let mut h = transferred();
    h.finish_with(|m| {
        m.with_empty_option(option::CANCEL_UPDATE)
            .with_empty_option(option::DISCARD_DATA)
    });
    assert_eq!(
        h.backend.finish_flags(),
        vec![UpdateFlags::CANCEL | UpdateFlags::DISCARD_DATA]
    );
    assert!(!h.update.is_running());
}

#[test]
fn non_confirmable_finish_gets_non_error_response() {
    let mut h = transferred();
    let mut msg = finish_msg(70);
    msg.ty = CoapType::Non;
    h.deliver(&msg).unwrap();

    let resp = h.channel.take().unwrap();
    assert_eq!(resp.ty, CoapType::Non);
    assert!(!resp.code.is_success());
    assert_eq!(resp.token.as_ref(), FINISH_TOKEN);
    assert!(resp.has_payload());
}

#[test]
fn finish_without_token_gets_piggybacked_error() {
    let mut h = transferred();
    let msg = finish_msg(71).with_token(bytes::Bytes::new());
    h.deliver(&msg).unwrap();

    let resp = h.channel.take().unwrap();
    assert_eq!(resp.ty, CoapType::Ack);
    assert_eq!(resp.id, Some(71));
    assert!(!resp.code.is_success());
    assert!(resp.has_payload());
}

#[test]
fn finish_with_valued_flags_gets_piggybacked_error() {
    for number in [option::CANCEL_UPDATE, option::DISCARD_DATA] {
        let mut h = transferred();
        let msg = finish_msg(72).with_uint_option(number, 1);
        h.deliver(&msg).unwrap();

        let resp = h.channel.take().unwrap();
        assert_eq!(resp.ty, CoapType::Ack, "option {number}");
        assert_eq!(resp.id, Some(72));
        assert_eq!(resp.code, CoapCode::BAD_REQUEST);
        assert_eq!(resp.token.as_ref(), FINISH_TOKEN);
        assert!(resp.has_payload());
    }
}

#[test]
fn finish_without_update_is_an_error() {
    let mut h = Harness::new();
    let id = h.finish();
    expect_empty_ack(&h, id);
    let resp = h.channel.take().unwrap();
    assert_eq!(resp.ty, CoapType::Con);
    assert_eq!(resp.code, CoapCode::BAD_REQUEST);
    assert!(h.backend.calls().is_empty());
}

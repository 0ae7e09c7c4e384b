//! Blocking, resumption and fragmentation behaviour of header blocks.

mod common;

use common::{header, Event, Harness};
use proptest::prelude::*;
use qpack_decoder::{DecoderConfig, DecodingErrorKind, EncoderStreamErrorKind};

/// Set Dynamic Table Capacity 1024.
const SET_CAPACITY: &[u8] = b"\x3f\xe1\x07";
/// Insert With Literal Name ("foo", "bar").
const INSERT_FOO: &[u8] = b"\x43foo\x03bar";
/// Insert With Literal Name ("baz", "qux").
const INSERT_BAZ: &[u8] = b"\x43baz\x03qux";

fn harness() -> Harness {
    Harness::new(DecoderConfig::default())
}

#[test]
fn test_insert_then_reference() {
    let mut h = harness();
    h.encoder_stream(SET_CAPACITY);
    h.encoder_stream(INSERT_FOO);
    h.block(1, &[0x02, 0x00, 0x80]);

    assert_eq!(h.events(), vec![header(1, "foo", "bar"), Event::Completed(1)]);
    assert_eq!(&h.decoder.flush_decoder_stream()[..], [0x81]);
}

#[test]
fn test_static_only_block_needs_no_insertions() {
    let mut h = harness();
    h.block(0, &[0x00, 0x00, 0xd1]);
    assert_eq!(
        h.events(),
        vec![header(0, ":method", "GET"), Event::Completed(0)]
    );
    assert!(h.decoder.flush_decoder_stream().is_empty());
}

#[test]
fn test_nothing_delivered_until_required_insert() {
    let mut h = harness();
    h.encoder_stream(SET_CAPACITY);

    // Required Insert Count 3, Base 3: static GET, then absolute 2, then 0.
    h.block(0, &[0x04, 0x00, 0xd1, 0x80, 0x82]);
    assert_eq!(h.decoder.blocked_stream_count(), 1);

    h.encoder_stream(INSERT_FOO);
    h.encoder_stream(INSERT_BAZ);
    assert!(h.events().is_empty());
    assert_eq!(h.decoder.blocked_stream_count(), 1);

    h.encoder_stream(b"\x43abc\x03xyz");
    assert_eq!(
        h.events(),
        vec![
            header(0, ":method", "GET"),
            header(0, "abc", "xyz"),
            header(0, "foo", "bar"),
            Event::Completed(0),
        ]
    );
    assert_eq!(h.decoder.blocked_stream_count(), 0);
    assert_eq!(&h.decoder.flush_decoder_stream()[..], [0x80]);
}

#[test]
fn test_unblocked_in_blocking_order() {
    let mut h = harness();
    h.encoder_stream(SET_CAPACITY);

    for stream_id in [8, 0, 4] {
        h.block(stream_id, &[0x02, 0x00, 0x80]);
    }
    assert_eq!(h.decoder.blocked_stream_count(), 3);

    h.encoder_stream(INSERT_FOO);
    assert_eq!(
        h.events(),
        vec![
            header(8, "foo", "bar"),
            Event::Completed(8),
            header(0, "foo", "bar"),
            Event::Completed(0),
            header(4, "foo", "bar"),
            Event::Completed(4),
        ]
    );
    assert_eq!(&h.decoder.flush_decoder_stream()[..], [0x88, 0x80, 0x84]);
}

#[test]
fn test_resumes_only_satisfied_thresholds() {
    let mut h = harness();
    h.encoder_stream(SET_CAPACITY);

    // Stream 0 waits for two insertions, stream 4 for one.
    h.block(0, &[0x03, 0x00, 0x80]);
    h.block(4, &[0x02, 0x00, 0x80]);

    h.encoder_stream(INSERT_FOO);
    assert_eq!(h.take_events(), vec![header(4, "foo", "bar"), Event::Completed(4)]);

    h.encoder_stream(INSERT_BAZ);
    assert_eq!(h.take_events(), vec![header(0, "baz", "qux"), Event::Completed(0)]);
}

#[test]
fn test_block_ended_while_blocked_completes_on_resume() {
    let mut h = harness();
    h.encoder_stream(SET_CAPACITY);

    h.begin(0);
    h.decoder.decode_header_block(0, &[0x02, 0x00, 0x80]);
    h.decoder.decode_header_block(0, &[0xc1]);
    h.encoder_stream(INSERT_FOO);
    // Still waiting for the end of the block.
    assert!(h.events().is_empty());

    h.decoder.end_header_block(0);
    assert_eq!(
        h.events(),
        vec![
            header(0, "foo", "bar"),
            header(0, ":path", "/"),
            Event::Completed(0)
        ]
    );
}

#[test]
fn test_too_many_blocked_streams_fails_newest() {
    let mut h = Harness::new(DecoderConfig::default().with_max_blocked_streams(2));
    h.encoder_stream(SET_CAPACITY);

    h.block(0, &[0x02, 0x00, 0x80]);
    h.block(4, &[0x02, 0x00, 0x80]);
    h.block(8, &[0x02, 0x00, 0x80]);
    assert_eq!(
        h.take_events(),
        vec![Event::Error(8, DecodingErrorKind::TooManyBlockedStreams)]
    );
    assert_eq!(h.decoder.blocked_stream_count(), 2);

    h.encoder_stream(INSERT_FOO);
    assert_eq!(
        h.events(),
        vec![
            header(0, "foo", "bar"),
            Event::Completed(0),
            header(4, "foo", "bar"),
            Event::Completed(4),
        ]
    );
}

#[test]
fn test_blocking_refused_when_limit_is_zero() {
    let mut h = Harness::new(DecoderConfig::default().with_max_blocked_streams(0));
    h.encoder_stream(SET_CAPACITY);
    h.block(0, &[0x02, 0x00, 0x80]);
    assert_eq!(
        h.events(),
        vec![Event::Error(0, DecodingErrorKind::TooManyBlockedStreams)]
    );
}

#[test]
fn test_reference_to_evicted_entry() {
    let mut h = harness();
    h.encoder_stream(SET_CAPACITY);
    h.encoder_stream(INSERT_FOO);
    // Lowering the capacity to zero evicts the entry but keeps the count.
    h.encoder_stream(b"\x20");
    assert_eq!(h.decoder.dynamic_table().insert_count(), 1);
    assert!(h.decoder.dynamic_table().is_empty());

    h.block(0, &[0x02, 0x00, 0x80]);
    assert_eq!(
        h.events(),
        vec![Event::Error(0, DecodingErrorKind::EntryEvicted)]
    );
}

#[test]
fn test_error_after_resumption() {
    let mut h = harness();
    h.encoder_stream(SET_CAPACITY);
    // Blocks on absolute 0, then a static index out of range.
    h.block(0, &[0x02, 0x00, 0x80, 0xff, 0x24]);
    h.encoder_stream(INSERT_FOO);
    assert_eq!(
        h.events(),
        vec![Event::Error(0, DecodingErrorKind::StaticEntryNotFound)]
    );
    assert_eq!(h.decoder.blocked_stream_count(), 0);
    // No acknowledgement for a failed block.
    assert_eq!(&h.decoder.flush_decoder_stream()[..], [0x01]);
}

#[test]
fn test_cancelled_block_gets_no_callbacks() {
    let mut h = harness();
    h.encoder_stream(SET_CAPACITY);
    h.block(0, &[0x02, 0x00, 0x80]);
    h.block(4, &[0x02, 0x00, 0x80]);

    h.decoder.cancel_stream(0);
    assert_eq!(h.decoder.blocked_stream_count(), 1);

    h.encoder_stream(INSERT_FOO);
    assert_eq!(h.events(), vec![header(4, "foo", "bar"), Event::Completed(4)]);
    assert_eq!(&h.decoder.flush_decoder_stream()[..], [0x40, 0x84]);
}

#[test]
fn test_huffman_errors_in_name_and_value() {
    let mut h = harness();
    // Literal name: Huffman string containing EOS.
    h.block(0, &[0x00, 0x00, 0x2c, 0xff, 0xff, 0xff, 0xff, 0x00]);
    // Static name reference: Huffman value whose padding is not all ones.
    h.block(4, &[0x00, 0x00, 0x51, 0x81, 0x18]);
    // Static name reference: Huffman value padded with a whole byte.
    h.block(8, &[0x00, 0x00, 0x51, 0x82, 0x1f, 0xff]);

    assert_eq!(
        h.events(),
        vec![
            Event::Error(0, DecodingErrorKind::HuffmanError),
            Event::Error(4, DecodingErrorKind::HuffmanError),
            Event::Error(8, DecodingErrorKind::HuffmanError),
        ]
    );
}

#[test]
fn test_encoder_stream_error_is_fatal() {
    let mut h = harness();
    h.encoder_stream(SET_CAPACITY);
    h.block(0, &[0x02, 0x00, 0x80]);

    // Duplicate of a missing entry.
    h.encoder_stream(b"\x00");
    h.encoder_stream(INSERT_FOO);

    assert_eq!(
        h.events(),
        vec![Event::EncoderStreamError(
            EncoderStreamErrorKind::InvalidRelativeIndex
        )]
    );
    assert!(h.decoder.encoder_stream_error_detected());
    assert_eq!(h.decoder.dynamic_table().insert_count(), 0);
    assert_eq!(h.decoder.blocked_stream_count(), 1);
}

#[test]
fn test_data_for_unknown_stream_is_ignored() {
    let mut h = harness();
    h.decoder.decode_header_block(12, &[0x00, 0x00, 0xd1]);
    h.decoder.end_header_block(12);
    h.decoder.cancel_stream(12);
    assert!(h.events().is_empty());
    assert!(h.decoder.flush_decoder_stream().is_empty());
}

/// Splits `data` at the given cut points.
fn fragments<'a>(data: &'a [u8], cuts: &[usize]) -> Vec<&'a [u8]> {
    let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (data.len() + 1)).collect();
    cuts.sort_unstable();
    let mut out = Vec::new();
    let mut start = 0;
    for cut in cuts {
        out.push(&data[start..cut]);
        start = cut;
    }
    out.push(&data[start..]);
    out
}

fn run(encoder_cuts: &[usize], block_cuts: &[usize]) -> (Vec<Event>, Vec<u8>) {
    let encoder_stream: Vec<u8> = [SET_CAPACITY, INSERT_FOO, &b"\xec\x03abc"[..], INSERT_BAZ]
        .concat();
    // Required Insert Count 3, Base 1: relative 0, post-base 0, static name
    // reference with a Huffman value, literal name, post-base name reference 1.
    let block: &[u8] = &[
        0x04, 0x81, 0x80, 0x10, 0x50, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0,
        0xab, 0x90, 0xf4, 0xff, 0x23, b'k', b'e', b'y', 0x05, b'v', b'a', b'l', b'u', b'e',
        0x01, 0x01, b'x',
    ];

    let mut h = harness();
    h.begin(0);
    for fragment in fragments(block, block_cuts) {
        h.decoder.decode_header_block(0, fragment);
    }
    h.decoder.end_header_block(0);
    for fragment in fragments(&encoder_stream, encoder_cuts) {
        h.encoder_stream(fragment);
    }
    (h.events(), h.decoder.flush_decoder_stream().to_vec())
}

proptest! {
    #[test]
    fn prop_fragmentation_does_not_change_result(
        encoder_cuts in prop::collection::vec(any::<usize>(), 0..8),
        block_cuts in prop::collection::vec(any::<usize>(), 0..8),
    ) {
        let expected = (
            vec![
                header(0, "foo", "bar"),
                header(0, "content-type", "abc"),
                header(0, ":authority", "www.example.com"),
                header(0, "key", "value"),
                header(0, "baz", "x"),
                Event::Completed(0),
            ],
            vec![0x80],
        );
        prop_assert_eq!(run(&[], &[]), expected.clone());
        prop_assert_eq!(run(&encoder_cuts, &block_cuts), expected);
    }
}

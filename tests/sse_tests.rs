//! Tests for the SSE framing layer — chunk-boundary reassembly, UTF-8
//! splits, malformed payloads, and the mapping into typed events.

use proptest::prelude::*;
use rstest::rstest;

use quizwire::events::StreamEvent;
use quizwire::sse::{RawRecord, SseDecoder};

fn typed(records: &[RawRecord]) -> Vec<StreamEvent> {
    records
        .iter()
        .filter_map(|r| StreamEvent::from_record(&r.event, &r.data))
        .collect()
}

// ---------------------------------------------------------------------------
// Chunking never changes the decoded record sequence
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_arbitrary_chunking_reassembles_identically(
        contents in proptest::collection::vec("[a-z0-9 ]{0,16}", 1..8),
        splits in proptest::collection::vec(any::<u16>(), 0..24),
    ) {
        let stream: String = contents
            .iter()
            .map(|c| format!("event: content\ndata: {{\"content\":\"{}\"}}\n\n", c))
            .collect();
        let bytes = stream.as_bytes();

        let mut one_shot = SseDecoder::new();
        let expected = one_shot.push(bytes);
        prop_assert_eq!(expected.len(), contents.len());

        let mut cuts: Vec<usize> = splits
            .iter()
            .map(|s| *s as usize % (bytes.len() + 1))
            .collect();
        cuts.sort_unstable();

        let mut dec = SseDecoder::new();
        let mut got = Vec::new();
        let mut prev = 0;
        for cut in cuts {
            got.extend(dec.push(&bytes[prev..cut]));
            prev = cut;
        }
        got.extend(dec.push(&bytes[prev..]));
        prop_assert_eq!(got, expected);
    }
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(5)]
#[case(7)]
#[case(64)]
fn test_fixed_chunk_sizes_reassemble_multibyte_payload(#[case] size: usize) {
    let stream = "event: thinking\ndata: {\"content\":\"思考中…\"}\n\n\
                  event: content\ndata: {\"content\":\"哈希表的平均查找是 O(1)\"}\n\n\
                  event: done\ndata: {}\n\n";
    let bytes = stream.as_bytes();

    let mut dec = SseDecoder::new();
    let mut records = Vec::new();
    for chunk in bytes.chunks(size) {
        records.extend(dec.push(chunk));
    }

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].data["content"], "思考中…");
    assert_eq!(records[1].data["content"], "哈希表的平均查找是 O(1)");
    assert_eq!(records[2].event, "done");
    assert!(dec.unterminated().is_empty());
}

// ---------------------------------------------------------------------------
// Full pipeline: framed bytes to typed events
// ---------------------------------------------------------------------------

#[test]
fn test_realistic_stream_maps_to_typed_sequence() {
    let stream = "event: thinking\ndata: {\"content\":\"evaluating\"}\n\n\
                  event: correction\ndata: {\"original\":\"teh heap\",\"corrected\":\"the heap\"}\n\n\
                  event: content\ndata: {\"content\":\"Your answer covers \"}\n\n\
                  event: content\ndata: {\"content\":\"the basics.\"}\n\n\
                  event: done\ndata: {}\n\n";
    let mut dec = SseDecoder::new();
    let events = typed(&dec.push(stream.as_bytes()));

    assert_eq!(events.len(), 5);
    assert!(matches!(events[0], StreamEvent::Thinking { .. }));
    assert!(matches!(
        events[1],
        StreamEvent::Correction { corrected: Some(_), .. }
    ));
    assert!(matches!(events[2], StreamEvent::Content { .. }));
    assert_eq!(events[4], StreamEvent::Done);
}

#[test]
fn test_unknown_events_skipped_known_ones_kept() {
    let stream = "event: heartbeat\ndata: {}\n\n\
                  event: content\ndata: {\"content\":\"kept\"}\n\n";
    let mut dec = SseDecoder::new();
    let records = dec.push(stream.as_bytes());
    // Framing passes both through; typing drops the unknown one.
    assert_eq!(records.len(), 2);
    let events = typed(&records);
    assert_eq!(events, vec![StreamEvent::Content { content: "kept".to_string() }]);
}

#[test]
fn test_malformed_payload_does_not_poison_later_records() {
    let stream = "event: result\ndata: {\"ai_score\": oops}\n\n\
                  event: error\ndata: {\"detail\":\"scoring failed\"}\n\n";
    let mut dec = SseDecoder::new();
    let events = typed(&dec.push(stream.as_bytes()));
    assert_eq!(
        events,
        vec![StreamEvent::Error { detail: "scoring failed".to_string() }]
    );
}

#[test]
fn test_trailing_partial_record_never_surfaces() {
    let stream = "event: content\ndata: {\"content\":\"full\"}\n\n\
                  event: content\ndata: {\"content\":\"cut off";
    let mut dec = SseDecoder::new();
    let records = dec.push(stream.as_bytes());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data["content"], "full");
    // The unterminated tail stays pending; end-of-stream would discard it.
    assert!(dec.unterminated().contains("cut off"));
}

#[test]
fn test_crlf_free_framing_only_blank_line_separates() {
    // A data payload containing the literal text "\n" (escaped in JSON) must
    // not split the record.
    let stream = "event: content\ndata: {\"content\":\"line one\\nline two\"}\n\n";
    let mut dec = SseDecoder::new();
    let records = dec.push(stream.as_bytes());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data["content"], "line one\nline two");
}

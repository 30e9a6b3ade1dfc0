//! Property tests: splitters must emit identical records for every
//! byte-wise partitioning of a stream, and matcher evaluation must be pure.

use proptest::prelude::*;
use sluice_core::matcher::Matcher;
use sluice_core::message::Record;
use sluice_core::splitter::{FramedSplitter, SplitterConfig, SplitterRunner, TokenSplitter};
use sluice_core::wire::frame_record;

proptest! {
    #[test]
    fn framed_stream_survives_any_chunking(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..8),
        chunk_size in 1usize..64,
    ) {
        let mut wire = Vec::new();
        for payload in &payloads {
            frame_record(payload, None, &mut wire).unwrap();
        }

        let mut runner = SplitterRunner::new(
            Box::new(FramedSplitter::default()),
            SplitterConfig::default(),
        );
        let mut got = Vec::new();
        for chunk in wire.chunks(chunk_size) {
            runner.push_bytes(chunk);
            while let Some(record) = runner.next_record().unwrap() {
                got.push(record.payload);
            }
        }
        prop_assert_eq!(got, payloads);
    }

    #[test]
    fn token_stream_survives_any_chunking(
        lines in prop::collection::vec("[a-z]{0,20}", 1..10),
        chunk_size in 1usize..16,
    ) {
        let mut wire = Vec::new();
        for line in &lines {
            wire.extend_from_slice(line.as_bytes());
            wire.push(b'\n');
        }

        let mut runner = SplitterRunner::new(
            Box::new(TokenSplitter::default()),
            SplitterConfig::default(),
        );
        let mut got = Vec::new();
        for chunk in wire.chunks(chunk_size) {
            runner.push_bytes(chunk);
            while let Some(record) = runner.next_record().unwrap() {
                got.push(String::from_utf8(record.payload).unwrap());
            }
        }
        prop_assert_eq!(got, lines);
    }

    #[test]
    fn matcher_is_pure_under_deep_copy(
        payload in "[ -~]{0,40}",
        severity in 0i32..8,
        status in 0i64..600,
    ) {
        let mut record = Record::new();
        record.msg_type = "http.access".to_string();
        record.payload = payload;
        record.severity = severity;
        record.add_int_field("status", status);

        let matcher = Matcher::new(
            "Severity < 4 OR (Fields[status] >= 200 AND Fields[status] < 300) OR Payload =~ /a+/",
        )
        .unwrap();
        let copy = record.clone();
        prop_assert_eq!(matcher.matches(&record), matcher.matches(&copy));
        // Evaluation twice over the same record is stable.
        prop_assert_eq!(matcher.matches(&record), matcher.matches(&record));
    }
}

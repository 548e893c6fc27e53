#![no_main]

use jobstream_core::{DecodeError, StreamingDecoder};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

// Arbitrary text must never panic the decoder, and whatever it accepts must
// come out in bounded, contiguous batches with only the last one finished.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let max = usize::from(data.first().copied().unwrap_or(1) % 16) + 1;
    let Ok(decoder) = StreamingDecoder::new(max) else {
        return;
    };

    let mut expected_offset = 0;
    let mut saw_finished = false;
    let result = decoder.decode_with::<Value, _>(text, |batch| {
        assert!(!saw_finished, "batch after the finished batch");
        assert!(batch.elements.len() <= max);
        assert_eq!(batch.offset, expected_offset);
        expected_offset += batch.elements.len();
        saw_finished = batch.finished;
    });

    match result {
        Ok(total) => {
            assert!(saw_finished);
            assert_eq!(total, expected_offset);
        }
        Err(DecodeError::Malformed { offset, .. }) => assert!(offset >= expected_offset),
        Err(other) => panic!("unexpected decode error: {other}"),
    }
});

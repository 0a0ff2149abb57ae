//! Unit tests for worker stream line framing.
//!
//! Covers:
//! - a JSON object split across two chunks is reassembled
//! - chunks without a delimiter only extend the pending fragment
//! - a chunk ending on a delimiter leaves no spurious empty line
//! - every partition of a stream into chunks yields the same lines
//! - multi-byte characters split across chunks survive framing
//! - over-long lines are reported once and the stream continues
//! - EOF flushes a non-empty pending fragment only

use worker_bridge::worker::framer::{frame_chunk, Framed, LineFramer, MAX_LINE_BYTES};
use worker_bridge::AppError;

fn feed_all(framer: &mut LineFramer, chunks: &[&[u8]]) -> Vec<String> {
    chunks
        .iter()
        .flat_map(|chunk| framer.feed(chunk).collect::<Vec<_>>())
        .map(|line| line.expect("no line exceeds the limit"))
        .collect()
}

// ── Pure framing function ────────────────────────────────────────────────────

/// The first piece of a chunk extends the pending fragment; the last piece
/// becomes the new pending fragment.
#[test]
fn frame_chunk_joins_pending_with_first_piece() {
    let framed = frame_chunk(b"{\"b".to_vec(), b"\":2}\n{\"c");

    assert_eq!(
        framed,
        Framed {
            completed: vec![b"{\"b\":2}".to_vec()],
            pending: b"{\"c".to_vec(),
        }
    );
}

/// An empty chunk changes nothing.
#[test]
fn frame_chunk_with_empty_chunk_keeps_pending() {
    let framed = frame_chunk(b"abc".to_vec(), b"");

    assert!(framed.completed.is_empty());
    assert_eq!(framed.pending, b"abc".to_vec());
}

// ── Chunk boundaries ─────────────────────────────────────────────────────────

/// A JSON object split across two chunks is yielded once, whole.
#[test]
fn object_split_across_chunks_is_reassembled() {
    let mut framer = LineFramer::new();

    let lines = feed_all(&mut framer, &[b"{\"a\":1}\n{\"b", b"\":2}\n"]);

    assert_eq!(lines, vec!["{\"a\":1}".to_owned(), "{\"b\":2}".to_owned()]);
    assert!(framer.pending().is_empty());
}

/// A chunk with no delimiter yields nothing and is held back.
#[test]
fn chunk_without_delimiter_yields_no_lines() {
    let mut framer = LineFramer::new();

    assert_eq!(framer.feed(b"partial").count(), 0);
    assert_eq!(framer.feed(b" still partial").count(), 0);
    assert_eq!(framer.pending(), b"partial still partial");
}

/// A chunk ending exactly on a delimiter leaves an empty pending fragment
/// and no empty-line item.
#[test]
fn chunk_ending_on_delimiter_has_no_trailing_empty_line() {
    let mut framer = LineFramer::new();

    let lines = feed_all(&mut framer, &[b"one\ntwo\n"]);

    assert_eq!(lines, vec!["one".to_owned(), "two".to_owned()]);
    assert!(framer.pending().is_empty());
    assert!(framer.finish().is_none(), "nothing is pending at EOF");
}

/// A delimiter arriving as the first byte of the next chunk completes the
/// previous fragment exactly once.
#[test]
fn delimiter_at_chunk_boundary_is_not_lost_or_duplicated() {
    let mut framer = LineFramer::new();

    let lines = feed_all(&mut framer, &[b"first", b"\nsecond", b"\n"]);

    assert_eq!(lines, vec!["first".to_owned(), "second".to_owned()]);
}

/// Consecutive delimiters produce genuine empty lines.
#[test]
fn consecutive_delimiters_yield_empty_lines() {
    let mut framer = LineFramer::new();

    let lines = feed_all(&mut framer, &[b"a\n\nb\n"]);

    assert_eq!(lines, vec!["a".to_owned(), String::new(), "b".to_owned()]);
}

/// Splitting a stream at any one or two points yields the same lines as
/// feeding it whole.
#[test]
fn any_partition_yields_same_lines_as_whole_stream() {
    let stream: &[u8] = b"{\"a\":1}\n\n{\"memory\":\" 0 1 2 \"}\nplain text\nlast";
    let expected = feed_all(&mut LineFramer::new(), &[stream]);
    assert_eq!(expected.len(), 4);

    for i in 0..=stream.len() {
        let lines = feed_all(&mut LineFramer::new(), &[&stream[..i], &stream[i..]]);
        assert_eq!(lines, expected, "two-way split at {i}");

        for j in i..=stream.len() {
            let lines = feed_all(
                &mut LineFramer::new(),
                &[&stream[..i], &stream[i..j], &stream[j..]],
            );
            assert_eq!(lines, expected, "three-way split at {i}, {j}");
        }
    }
}

/// Feeding one byte at a time yields the same lines in the same order.
#[test]
fn byte_at_a_time_preserves_order() {
    let stream = b"L1\nL2\nL3\n";
    let mut framer = LineFramer::new();

    let lines: Vec<String> = stream
        .iter()
        .flat_map(|byte| framer.feed(std::slice::from_ref(byte)).collect::<Vec<_>>())
        .map(|line| line.expect("short lines"))
        .collect();

    assert_eq!(lines, vec!["L1".to_owned(), "L2".to_owned(), "L3".to_owned()]);
}

/// A multi-byte UTF-8 character split between chunks is decoded intact.
#[test]
fn multibyte_character_split_across_chunks_is_preserved() {
    let text = "tape → 42\n".as_bytes();
    let split = text
        .iter()
        .position(|b| *b == 0xE2)
        .expect("arrow lead byte present")
        + 1;
    let mut framer = LineFramer::new();

    let lines = feed_all(&mut framer, &[&text[..split], &text[split..]]);

    assert_eq!(lines, vec!["tape → 42".to_owned()]);
}

// ── Line length limit ────────────────────────────────────────────────────────

/// The default limit is 1 MiB.
#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(MAX_LINE_BYTES, 1_048_576);
}

/// An over-long line inside one chunk is reported and the next line is intact.
#[test]
fn overlong_line_in_one_chunk_is_reported() {
    let mut framer = LineFramer::with_max_length(4);

    let items: Vec<_> = framer.feed(b"too long\nok\n").collect();

    assert_eq!(items.len(), 2);
    assert!(
        matches!(&items[0], Err(AppError::Protocol(msg)) if msg.contains("line too long")),
        "got: {:?}",
        items[0]
    );
    assert!(matches!(&items[1], Ok(line) if line == "ok"));
}

/// An over-long line spread across chunks is dropped while it streams in
/// and reported once when its delimiter arrives.
#[test]
fn overlong_line_across_chunks_is_reported_once() {
    let mut framer = LineFramer::with_max_length(4);

    assert_eq!(framer.feed(b"abcdef").count(), 0);
    assert!(framer.pending().is_empty(), "oversized fragment is not retained");
    assert_eq!(framer.feed(b"ghij").count(), 0);

    let items: Vec<_> = framer.feed(b"kl\nnext\n").collect();

    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Err(AppError::Protocol(_))));
    assert!(matches!(&items[1], Ok(line) if line == "next"));
}

// ── End of stream ────────────────────────────────────────────────────────────

/// A trailing fragment without a delimiter is flushed at EOF.
#[test]
fn finish_flushes_pending_fragment() {
    let mut framer = LineFramer::new();
    assert_eq!(framer.feed(b"done\ntail").count(), 1);

    let last = framer.finish().expect("pending fragment is flushed");

    assert_eq!(last.expect("short line"), "tail");
    assert!(framer.finish().is_none(), "flush happens once");
}

/// EOF while discarding an over-long line reports it.
#[test]
fn finish_while_discarding_reports_overflow() {
    let mut framer = LineFramer::with_max_length(2);
    assert_eq!(framer.feed(b"xyz").count(), 0);

    assert!(matches!(framer.finish(), Some(Err(AppError::Protocol(_)))));
}

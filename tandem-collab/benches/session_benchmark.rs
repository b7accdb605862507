use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use tandem_collab::protocol::{DocumentUpdated, ServerMessage};
use tandem_collab::{index_to_position, position_to_index, PendingChange, PendingQueue, Position};

/// Mixed ASCII and multi-byte text over 1,000 lines.
fn sample_document() -> String {
    (0..1_000)
        .map(|i| format!("line {i}: café naïve résumé 文字 {}\n", "x".repeat(i % 40)))
        .collect()
}

fn bench_index_to_position(c: &mut Criterion) {
    let doc = sample_document();
    let middle = doc.chars().count() / 2;

    c.bench_function("index_to_position_mid_document", |b| {
        b.iter(|| black_box(index_to_position(black_box(&doc), black_box(middle))))
    });
}

fn bench_position_to_index(c: &mut Criterion) {
    let doc = sample_document();

    c.bench_function("position_to_index_line_500", |b| {
        b.iter(|| black_box(position_to_index(black_box(&doc), black_box(Position::new(500, 12)))))
    });
}

fn bench_queue_flush(c: &mut Criterion) {
    let edits: Vec<String> = (0..1_000).map(|i| format!("draft revision {i}")).collect();

    c.bench_function("queue_flush_1000", |b| {
        b.iter(|| {
            let mut queue = PendingQueue::new();
            for edit in &edits {
                queue.enqueue(PendingChange::new(edit.as_str()));
            }
            let report = queue.flush("", |change, replaced| {
                black_box((change, replaced));
                Ok::<(), ()>(())
            });
            black_box(report)
        })
    });
}

fn bench_decode_update(c: &mut Criterion) {
    let encoded = ServerMessage::DocumentUpdated(DocumentUpdated {
        content: sample_document(),
        user_id: "u2".into(),
    })
    .encode()
    .unwrap();

    c.bench_function("decode_document_updated_1000_lines", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box(&encoded)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_index_to_position,
    bench_position_to_index,
    bench_queue_flush,
    bench_decode_update,
);
criterion_main!(benches);

//! Benchmarks for response rendering and stream decoding.
//!
//! Every chunk re-renders the whole accumulation, so long answers stress the
//! renderer far more than the line splitter.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parley_chat::markdown;
use parley_chat::stream::StreamDecoder;

/// A realistic markdown answer with headings, labels and emphasis.
fn generate_answer(paragraphs: usize) -> String {
    let mut answer = String::from("## Leave policy overview\n");
    for i in 0..paragraphs {
        answer.push_str("Key Points:\n");
        answer.push_str(&format!(
            "Employees accrue **{} days** of annual leave per year. Requests \
             should be submitted *at least two weeks* in advance through the \
             `leave-portal`. Unused days roll over up to a maximum of five.\n",
            20 + i % 5
        ));
    }
    answer
}

/// Frame an answer as `data:` lines of roughly `chunk_len` characters.
fn frame_answer(answer: &str, chunk_len: usize) -> Vec<u8> {
    let chars: Vec<char> = answer.chars().filter(|c| *c != '\n').collect();
    let mut framed = String::new();
    for piece in chars.chunks(chunk_len) {
        let text: String = piece.iter().collect();
        framed.push_str(&format!(
            "data: {}\n",
            serde_json::json!({ "content": text })
        ));
    }
    framed.push_str("data: [DONE]\n");
    framed.into_bytes()
}

fn bench_render(c: &mut Criterion) {
    let short = generate_answer(2);
    let long = generate_answer(40);

    let mut group = c.benchmark_group("render");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("short_answer", |b| {
        b.iter(|| markdown::render(black_box(Some(short.as_str()))))
    });

    group.bench_function("long_answer", |b| {
        b.iter(|| markdown::render(black_box(Some(long.as_str()))))
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let answer = generate_answer(10);
    let framed = frame_answer(&answer, 16);

    let mut group = c.benchmark_group("stream_decode");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("single_read", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::new();
            let events = decoder.feed(black_box(&framed)).unwrap_or_default();
            events.len()
        })
    });

    // Network-sized reads that split lines and UTF-8 sequences
    group.bench_function("reads_of_64_bytes", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::new();
            let mut count = 0;
            for read in framed.chunks(64) {
                count += decoder.feed(black_box(read)).map(|e| e.len()).unwrap_or(0);
            }
            count
        })
    });

    group.finish();
}

criterion_group!(benches, bench_render, bench_decode);
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use forkchat::core::chat_stream::FrameDecoder;

fn make_body(n_deltas: usize, word: &str) -> Vec<u8> {
    let mut body = String::from("f:{\"messageId\":\"msg-1\"}\n");
    for i in 0..n_deltas {
        body.push_str(&format!("0:\"{word} {i} \"\n"));
    }
    body.push_str("e:{\"finishReason\":\"stop\"}\nd:{\"finishReason\":\"stop\"}\n");
    body.into_bytes()
}

fn decode_in_chunks(body: &[u8], chunk_size: usize) -> usize {
    let mut decoder = FrameDecoder::new();
    let mut events = 0;
    for chunk in body.chunks(chunk_size) {
        events += decoder.decode(chunk).len();
    }
    events + decoder.finish().len()
}

fn bench_stream_decode(c: &mut Criterion) {
    let word = "lorem ipsum dolor sit amet \\u00e9";

    for &deltas in &[200usize, 2000usize] {
        let body = make_body(deltas, word);
        let mut group = c.benchmark_group(format!("stream_decode_deltas{deltas}"));
        group.throughput(Throughput::Bytes(body.len() as u64));

        // Network-sized reads down to pathological single-byte reads
        for &chunk_size in &[1usize, 64, 1024, 16 * 1024] {
            group.bench_function(BenchmarkId::new("chunk", chunk_size), |b| {
                b.iter(|| decode_in_chunks(&body, chunk_size))
            });
        }

        group.finish();
    }
}

criterion_group!(benches, bench_stream_decode);
criterion_main!(benches);

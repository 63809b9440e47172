//! Performance benchmarks for envelope framing and dispatch
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rtc_audio_channel::core::signaling::{
    DEFAULT_MAX_ENVELOPE_BYTES, FunctionRegistry, SignalEnvelope, encode_envelope,
};
use rtc_audio_channel::{Dispatcher, FunctionCallRequest, FunctionReply, LengthCheck, SignalTag};

fn frame(tag: &[u8; 4], payload: &str) -> Vec<u8> {
    let mut raw = tag.to_vec();
    raw.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    raw.extend_from_slice(payload.as_bytes());
    raw
}

fn subtitle_payload(lines: usize) -> String {
    let items: Vec<String> = (0..lines)
        .map(|i| {
            format!(
                r#"{{"definite":{},"language":"en","paragraph":false,"sequence":{},"text":"line number {} of the running transcript","userId":"voiceChat_agent"}}"#,
                i % 2 == 0,
                i,
                i
            )
        })
        .collect();
    format!(r#"{{"type":"subtitle","data":[{}]}}"#, items.join(","))
}

/// Benchmark header parsing alone
fn bench_envelope_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_decode");
    group.measurement_time(Duration::from_secs(5));

    let raw = frame(b"subv", &subtitle_payload(1));
    for check in [LengthCheck::Envelope, LengthCheck::Strict] {
        group.bench_with_input(
            BenchmarkId::new("header", format!("{:?}", check)),
            &raw,
            |b, raw| {
                b.iter(|| {
                    SignalEnvelope::decode(black_box(raw), true, check, DEFAULT_MAX_ENVELOPE_BYTES)
                });
            },
        );
    }

    group.finish();
}

/// Benchmark full dispatch into normalised events
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.measurement_time(Duration::from_secs(5));
    let dispatcher = Dispatcher::default();

    for lines in [1usize, 10, 100] {
        let raw = frame(b"subv", &subtitle_payload(lines));
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::new("subtitle", lines), &raw, |b, raw| {
            b.iter(|| dispatcher.decode(black_box(raw), true));
        });
    }

    let tool = frame(
        b"tool",
        r#"{"subscriber_user_id":"","tool_calls":[{"id":"call_0","type":"function","function":{"name":"get_current_weather","arguments":"{\"location\": \"Beijing\", \"unit\": \"celsius\"}"}}]}"#,
    );
    group.throughput(Throughput::Bytes(tool.len() as u64));
    group.bench_with_input(BenchmarkId::new("tool_call", tool.len()), &tool, |b, raw| {
        b.iter(|| dispatcher.decode(black_box(raw), true));
    });

    let unknown = frame(b"ctrl", r#"{"type":"noop"}"#);
    group.bench_with_input(BenchmarkId::new("unknown_tag", unknown.len()), &unknown, |b, raw| {
        b.iter(|| dispatcher.decode(black_box(raw), true));
    });

    group.finish();
}

/// Benchmark reply framing
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.measurement_time(Duration::from_secs(5));

    let reply = FunctionReply::new("call_0", "It is 23 degrees and sunny in Beijing.");
    group.bench_function("function_reply", |b| {
        b.iter(|| black_box(&reply).encode());
    });

    let payload = subtitle_payload(10);
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("raw_envelope", |b| {
        b.iter(|| encode_envelope(SignalTag::Subtitle, black_box(payload.as_bytes())));
    });

    group.finish();
}

/// Benchmark handler lookup and invocation
fn bench_function_registry(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = FunctionRegistry::new();
    for i in 0..32 {
        registry.register(
            format!("function_{i}"),
            Arc::new(|call| Box::pin(async move { call.arguments_json })),
        );
    }
    let request = FunctionCallRequest {
        call_id: "call_0".to_string(),
        function_name: "function_17".to_string(),
        arguments_json: "{}".to_string(),
    };

    c.bench_function("function_registry_invoke", |b| {
        b.to_async(&rt)
            .iter(|| async { registry.invoke(black_box(&request)).await });
    });
}

criterion_group!(
    benches,
    bench_envelope_decode,
    bench_dispatch,
    bench_encode,
    bench_function_registry
);
criterion_main!(benches);

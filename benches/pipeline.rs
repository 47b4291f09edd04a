//! Benchmarks for the Mijia processing pipeline.
//!
//! Covers the decoder on its own, the per-advertisement discovery step, and
//! the full application loop with a fake scanner feeding advertisements
//! through run_with_io.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mijia_listener::app::{Options, run_with_io};
use mijia_listener::output::Format;
use mijia_listener::scanner::{SERVICE_DATA_AD_TYPE, ScanFuture};
use mijia_listener::{
    Advertisement, AdvertisementResult, Backend, Discovery, MacAddress, ObserverError, Scanner,
    SensorTag, SystemClock, decode, decode_hex,
};
use std::future::pending;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Temperature 21.5 / humidity 61.2 record
fn climate_payload() -> Vec<u8> {
    vec![
        0x95, 0xFE, 0x50, 0x20, 0xAA, 0x01, 0x17, // signature, flags, frame, index
        0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA, // MAC, reversed
        0x0D, 0x10, 0x04, // reading type, length
        0xD7, 0x00, 0x64, 0x02, // 215, 612
    ]
}

/// Battery 77% record
fn battery_payload() -> Vec<u8> {
    vec![
        0x95, 0xFE, 0x50, 0x20, 0xAA, 0x01, 0x17, 0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA, 0x0A, 0x10,
        0x01, 0x4D,
    ]
}

fn advertisement(payload: Vec<u8>) -> Advertisement {
    Advertisement::new(TEST_MAC)
        .with_field(0x01, [0x06])
        .with_field(SERVICE_DATA_AD_TYPE, payload)
}

/// A fake scanner that replays advertisements and then closes the stream.
struct FakeScanner {
    results: Vec<AdvertisementResult>,
}

impl Scanner for FakeScanner {
    fn start(&mut self, _passive: bool) -> ScanFuture<'_, mpsc::Receiver<AdvertisementResult>> {
        let results = std::mem::take(&mut self.results);
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(results.len().max(1));
            for r in results {
                let _ = tx.send(r).await;
            }
            Ok(rx)
        })
    }

    fn stop(&mut self) -> ScanFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

fn default_options() -> Options {
    Options {
        backend: Backend::default(),
        format: Format::Influxdb,
        influxdb_measurement: "mijia_measurement".to_string(),
        aliases: vec![],
        verbose: false,
        active: false,
    }
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let climate = climate_payload();
    group.bench_function("climate", |b| {
        b.iter(|| decode(black_box(TEST_MAC), black_box(&climate)))
    });

    let battery = battery_payload();
    group.bench_function("battery", |b| {
        b.iter(|| decode(black_box(TEST_MAC), black_box(&battery)))
    });

    let hex: String = climate.iter().map(|b| format!("{b:02x}")).collect();
    group.bench_function("climate_hex", |b| {
        b.iter(|| decode_hex(black_box(TEST_MAC), black_box(&hex)))
    });

    group.finish();
}

fn bench_discovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("discovery");
    group.throughput(Throughput::Elements(1));

    let climate = advertisement(climate_payload());
    let observer = |tag: &SensorTag, is_new: bool| -> Result<(), ObserverError> {
        let _ = black_box((tag, is_new));
        Ok(())
    };
    let mut discovery = Discovery::new(observer, SystemClock);
    group.bench_function("known_tag_update", |b| {
        b.iter(|| discovery.on_advertisement(black_box(&climate)))
    });

    let foreign = Advertisement::new(TEST_MAC).with_field(SERVICE_DATA_AD_TYPE, [0x9F, 0xFE, 0x00]);
    group.bench_function("foreign_ignored", |b| {
        b.iter(|| discovery.on_advertisement(black_box(&foreign)))
    });

    group.finish();
}

/// Benchmark the full application pipeline: scanner -> filter -> decode -> merge -> format -> write
fn bench_batch_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_pipeline");
    let rt = Runtime::new().unwrap();

    for batch_size in [1, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &size| {
                b.iter(|| {
                    let results = (0..size)
                        .map(|i| {
                            let payload = if i % 2 == 0 {
                                climate_payload()
                            } else {
                                battery_payload()
                            };
                            Ok(advertisement(payload))
                        })
                        .collect();
                    let scanner = FakeScanner { results };
                    let mut out = Vec::<u8>::with_capacity(128 * size);

                    rt.block_on(async {
                        run_with_io(default_options(), scanner, &mut out, pending())
                            .await
                            .unwrap();
                    });

                    black_box(out)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_discovery, bench_batch_pipeline);
criterion_main!(benches);

use criterion::*;
use netmeter::{Endpoint, LatencyMeter, Options, ThroughputMeter, Transport};
use tokio::runtime::Runtime;

async fn latency_round(msg_size: usize) {
    let listener = Endpoint::new(Transport::Tcp, "127.0.0.1:0")
        .listen()
        .await
        .unwrap();
    let options = Options {
        msg_size,
        num_msg: 100,
        addr: listener.local_addr().unwrap(),
        ..Options::latency()
    };
    let meter = LatencyMeter::new(options).unwrap();
    let server = tokio::spawn({
        let meter = meter.clone();
        async move { meter.serve_on(listener).await }
    });
    black_box(meter.client().await.unwrap());
    server.await.unwrap().unwrap();
}

async fn throughput_round(msg_size: usize) {
    let listener = Endpoint::new(Transport::Tcp, "127.0.0.1:0")
        .listen()
        .await
        .unwrap();
    let options = Options {
        msg_size,
        num_msg: 64,
        addr: listener.local_addr().unwrap(),
        ..Options::throughput()
    };
    let meter = ThroughputMeter::new(options).unwrap();
    let server = tokio::spawn({
        let meter = meter.clone();
        async move { meter.serve_on(listener).await }
    });
    black_box(meter.client().await.unwrap());
    server.await.unwrap().unwrap();
}

fn latency(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("latency meter");
    for size in [16, 128, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&runtime).iter(|| latency_round(size));
        });
    }
    group.finish();
}

fn throughput(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("throughput meter");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));
    for size in [4096, 65536, 262144] {
        group.throughput(Throughput::Bytes(size as u64 * 64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&runtime).iter(|| throughput_round(size));
        });
    }
    group.finish();
}

criterion_group!(benches, latency, throughput);
criterion_main!(benches);

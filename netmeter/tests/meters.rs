use netmeter::{
    relay::relay_on, Endpoint, Error, LatencyMeter, Listener, Options, Phase, ThroughputMeter,
    Transport,
};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Binds an ephemeral loopback port and points `options` at it.
async fn bind_tcp(options: &mut Options) -> Listener {
    let listener = Endpoint::new(Transport::Tcp, "127.0.0.1:0")
        .listen()
        .await
        .unwrap();
    options.addr = listener.local_addr().unwrap();
    listener
}

fn unix_path() -> PathBuf {
    std::env::temp_dir().join(format!("netmeter-{:016x}.sock", rand::random::<u64>()))
}

fn latency_options(msg_size: usize, num_msg: usize, timeout: u64) -> Options {
    Options {
        msg_size,
        num_msg,
        timeout,
        ..Options::latency()
    }
}

fn throughput_options(msg_size: usize, num_msg: usize, timeout: u64) -> Options {
    Options {
        msg_size,
        num_msg,
        timeout,
        ..Options::throughput()
    }
}

#[tokio::test]
async fn latency_over_tcp() {
    let mut options = latency_options(128, 1000, 120_000);
    let listener = bind_tcp(&mut options).await;
    let meter = LatencyMeter::new(options).unwrap();

    let server = tokio::spawn({
        let meter = meter.clone();
        async move { meter.serve_on(listener).await }
    });
    let result = meter.client().await.unwrap();
    server.await.unwrap().unwrap();

    assert_eq!(result.num_pings, 2000);
    assert!(result.avg_latency > Duration::ZERO);
    assert_eq!(
        result.avg_latency.as_nanos(),
        result.elapsed_time.as_nanos() / 2000
    );
}

#[tokio::test]
async fn throughput_over_tcp() {
    let mut options = throughput_options(256 * 1024, 200, 120_000);
    let listener = bind_tcp(&mut options).await;
    let meter = ThroughputMeter::new(options).unwrap();

    let server = tokio::spawn({
        let meter = meter.clone();
        async move { meter.serve_on(listener).await }
    });
    let result = meter.client().await.unwrap();
    let received = server.await.unwrap().unwrap();

    assert_eq!(result.msg_size, 256 * 1024);
    assert_eq!(result.num_msg, 200);
    assert_eq!(result.total_data, 200 * 256 * 1024);
    assert_eq!(received, result.total_data);
    assert!(result.throughput_mb_per_sec > 0.0);
    assert!(result.throughput_msg_per_sec > 0.0);
}

#[tokio::test]
#[ignore = "moves 2.6 GB over loopback"]
async fn throughput_default_profile_scenario() {
    let mut options = Options::throughput();
    let listener = bind_tcp(&mut options).await;
    let meter = ThroughputMeter::new(options).unwrap();

    let server = tokio::spawn({
        let meter = meter.clone();
        async move { meter.serve_on(listener).await }
    });
    let result = meter.client().await.unwrap();
    server.await.unwrap().unwrap();

    assert_eq!(result.num_msg, 10_000);
    assert_eq!(result.total_data, 2_621_440_000);
    assert!(result.throughput_mb_per_sec > 0.0);
}

#[cfg(unix)]
#[tokio::test]
async fn both_meters_over_unix_sockets() {
    let path = unix_path();
    let mut options = latency_options(64, 100, 120_000);
    options.network = Transport::Unix;
    options.addr = path.display().to_string();

    let latency = LatencyMeter::new(options.clone()).unwrap();
    let listener = options.endpoint().listen().await.unwrap();
    let server = tokio::spawn({
        let meter = latency.clone();
        async move { meter.serve_on(listener).await }
    });
    let result = latency.client().await.unwrap();
    server.await.unwrap().unwrap();
    assert_eq!(result.num_pings, 200);

    options.msg_size = 64 * 1024;
    let throughput = ThroughputMeter::new(options.clone()).unwrap();
    let listener = options.endpoint().listen().await.unwrap();
    let server = tokio::spawn({
        let meter = throughput.clone();
        async move { meter.serve_on(listener).await }
    });
    let result = throughput.client().await.unwrap();
    assert_eq!(server.await.unwrap().unwrap(), 100 * 64 * 1024);
    assert_eq!(result.num_msg, 100);

    assert!(!path.exists());
}

#[tokio::test]
async fn repeated_runs_have_the_same_shape() {
    let mut results = vec![];
    for _ in 0..2 {
        let mut options = latency_options(32, 50, 120_000);
        let listener = bind_tcp(&mut options).await;
        let meter = LatencyMeter::new(options).unwrap();
        let server = tokio::spawn({
            let meter = meter.clone();
            async move { meter.serve_on(listener).await }
        });
        results.push(meter.client().await.unwrap());
        server.await.unwrap().unwrap();
    }
    for result in results {
        assert_eq!(result.num_pings, 100);
        let json = serde_json::to_value(result).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["avgLatency", "elapsedTime", "numPings"]);
    }
}

#[tokio::test]
async fn early_deadline_cuts_throughput_short() {
    let mut options = throughput_options(64 * 1024, 1_000_000, 1);
    let listener = bind_tcp(&mut options).await;
    let meter = ThroughputMeter::new(options).unwrap();

    let server = tokio::spawn({
        let meter = meter.clone();
        async move { meter.serve_on(listener).await }
    });
    let result = meter.client().await.unwrap();
    server.await.unwrap().unwrap();

    assert!(result.num_msg >= 1);
    assert!(result.num_msg < 1_000_000);
    assert_eq!(result.total_data, result.num_msg as u64 * 64 * 1024);
    // one millisecond of budget plus one in-flight write
    assert!(result.elapsed < Duration::from_secs(5), "{result}");
}

#[tokio::test]
async fn early_deadline_cuts_latency_short() {
    let mut options = latency_options(128, 1_000_000, 1);
    let listener = bind_tcp(&mut options).await;
    let meter = LatencyMeter::new(options).unwrap();

    let server = tokio::spawn({
        let meter = meter.clone();
        async move { meter.serve_on(listener).await }
    });
    let result = meter.client().await.unwrap();

    assert!(result.num_pings >= 2);
    assert!(result.num_pings < 2_000_000);
    // the server expected a million rounds
    let err = server.await.unwrap().unwrap_err();
    assert!(err.is_protocol_violation(), "{err}");
}

#[tokio::test]
async fn peer_closing_mid_message_is_a_protocol_violation() {
    let mut options = latency_options(128, 10, 120_000);
    let listener = bind_tcp(&mut options).await;

    // echoes half of the first message, then hangs up
    tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 128];
        conn.read_exact(&mut buf).await.unwrap();
        conn.write_all(&buf[..64]).await.unwrap();
    });

    let err = LatencyMeter::new(options).unwrap().client().await.unwrap_err();
    assert_eq!(err.phase(), Phase::Exchanging);
    assert!(
        matches!(err, Error::ShortRead { expected: 128, actual: 64 }),
        "{err}"
    );
}

#[tokio::test]
async fn dial_failure_is_a_connection_error() {
    let mut options = latency_options(128, 10, 120_000);
    // take a free port, then release it
    drop(bind_tcp(&mut options).await);

    let err = LatencyMeter::new(options).unwrap().client().await.unwrap_err();
    assert!(matches!(err, Error::Dial { .. }), "{err}");
    assert_eq!(err.phase(), Phase::Connecting);
}

#[tokio::test]
async fn client_originates_from_configured_port() {
    let mut options = latency_options(16, 5, 120_000);
    let listener = bind_tcp(&mut options).await;
    let client_port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    options.client_port = client_port;
    let meter = LatencyMeter::new(options).unwrap();

    let server = tokio::spawn({
        let meter = meter.clone();
        async move {
            let (conn, peer) = listener.accept().await.unwrap();
            meter.serve_conn(conn).await.unwrap();
            peer.parse::<SocketAddr>().unwrap()
        }
    });
    let result = meter.client().await.unwrap();
    assert_eq!(result.num_pings, 10);
    assert_eq!(server.await.unwrap().port(), client_port);
}

#[cfg(unix)]
#[tokio::test]
async fn latency_through_unix_to_tcp_relay() {
    let mut options = latency_options(128, 100, 120_000);
    let listener = bind_tcp(&mut options).await;
    let meter = LatencyMeter::new(options.clone()).unwrap();
    let server = tokio::spawn({
        let meter = meter.clone();
        async move { meter.serve_on(listener).await }
    });

    let path = unix_path();
    let front = Endpoint::new(Transport::Unix, path.display().to_string());
    let relay_listener = front.listen().await.unwrap();
    let upstream = options.endpoint().dial().await.unwrap();
    let relay = tokio::spawn(relay_on(relay_listener, upstream));

    let result = meter.client_conn(front.dial().await.unwrap()).await.unwrap();
    assert_eq!(result.num_pings, 200);
    server.await.unwrap().unwrap();

    let stats = relay.await.unwrap().unwrap();
    assert_eq!(stats.to_upstream, 100 * 128);
    assert_eq!(stats.to_inbound, 100 * 128);
}

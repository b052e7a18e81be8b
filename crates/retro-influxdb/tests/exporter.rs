//! Exporter task tests against an in-memory sink

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use retro_event_bus::EventBus;
use retro_influxdb::{
    Exporter, FieldValue, InfluxConfig, MeasurementPoint, SinkError, TimeSeriesSink,
};
use retro_state_store::{StateStore, StateWrite};

#[derive(Default)]
struct MemorySink {
    points: Mutex<Vec<MeasurementPoint>>,
    /// Pings that fail before the sink becomes reachable
    ping_failures: AtomicUsize,
    /// Writes that fail before the sink accepts data
    write_failures: AtomicUsize,
    reject: bool,
    pings: AtomicUsize,
    writes: AtomicUsize,
}

impl MemorySink {
    fn points(&self) -> Vec<MeasurementPoint> {
        self.points.lock().unwrap().clone()
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl TimeSeriesSink for MemorySink {
    async fn ping(&self) -> Result<(), SinkError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.ping_failures) {
            return Err(SinkError::Connection("connection refused".into()));
        }
        Ok(())
    }

    async fn write_points(&self, points: &[MeasurementPoint]) -> Result<(), SinkError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(SinkError::Rejected {
                status: 400,
                message: "database not found".into(),
            });
        }
        if take_failure(&self.write_failures) {
            return Err(SinkError::Connection("timeout".into()));
        }
        self.points.lock().unwrap().extend_from_slice(points);
        Ok(())
    }
}

fn test_config() -> InfluxConfig {
    InfluxConfig {
        retry_delay: Duration::from_millis(1),
        connect_retry_interval: Duration::from_millis(10),
        ..InfluxConfig::default()
    }
}

async fn wait_for_listeners(bus: &EventBus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while bus.listener_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("exporter should connect and listen");
}

async fn settle(exporter: &Exporter) {
    tokio::time::timeout(Duration::from_secs(10), exporter.block_till_done())
        .await
        .expect("exporter queue should drain");
}

fn start(config: InfluxConfig, sink: MemorySink) -> (Arc<EventBus>, StateStore, Exporter, Arc<MemorySink>) {
    let bus = Arc::new(EventBus::new());
    let store = StateStore::new(bus.clone());
    let sink = Arc::new(sink);
    let exporter = Exporter::start_with(config, &bus, sink.clone()).unwrap();
    (bus, store, exporter, sink)
}

#[tokio::test]
async fn test_exports_live_and_historic_points() {
    let (bus, store, exporter, sink) = start(test_config(), MemorySink::default());
    wait_for_listeners(&bus).await;

    let t0 = Utc::now();
    let earlier = t0 - chrono::Duration::hours(1);
    store
        .write(
            "sensor.temp",
            StateWrite::new(20.0)
                .attribute("unit_of_measurement", "°C")
                .last_updated(t0),
        )
        .unwrap();
    let historic = store
        .write(
            "sensor.temp",
            StateWrite::new(19.0)
                .attribute("unit_of_measurement", "°C")
                .last_updated(earlier),
        )
        .unwrap();

    settle(&exporter).await;
    let points = sink.points();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].measurement, "°C");
    assert_eq!(points[0].field("value"), Some(&FieldValue::Float(20.0)));
    assert_eq!(points[1].field("value"), Some(&FieldValue::Float(19.0)));
    assert_eq!(points[1].time, earlier);
    assert_ne!(points[1].time, historic.time_fired);
    assert_eq!(exporter.stats().written(), 2);

    exporter.shutdown().await.unwrap();
    assert_eq!(bus.listener_count(), 0);
}

#[tokio::test]
async fn test_excluded_domain_is_not_exported() {
    let mut config = test_config();
    config.filter.exclude.domains.insert("sensor".to_string());
    let (bus, store, exporter, sink) = start(config, MemorySink::default());
    wait_for_listeners(&bus).await;

    for n in 0..3 {
        store
            .write(&format!("sensor.probe_{n}"), StateWrite::new(n))
            .unwrap();
    }
    store.write("light.porch", StateWrite::new("on")).unwrap();

    settle(&exporter).await;
    let points = sink.points();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].tags["domain"], "light");
    exporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retries_connection_until_reachable() {
    let sink = MemorySink {
        ping_failures: AtomicUsize::new(2),
        ..MemorySink::default()
    };
    let (bus, store, exporter, sink) = start(test_config(), sink);
    wait_for_listeners(&bus).await;
    assert_eq!(sink.pings.load(Ordering::SeqCst), 3);

    store.write("sensor.temp", StateWrite::new("1")).unwrap();
    settle(&exporter).await;
    assert_eq!(sink.points().len(), 1);
    exporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_transient_write_failures_are_retried() {
    let sink = MemorySink {
        write_failures: AtomicUsize::new(2),
        ..MemorySink::default()
    };
    let (bus, store, exporter, sink) = start(test_config(), sink);
    wait_for_listeners(&bus).await;

    store.write("sensor.temp", StateWrite::new("1")).unwrap();
    settle(&exporter).await;

    assert_eq!(sink.writes.load(Ordering::SeqCst), 3);
    assert_eq!(sink.points().len(), 1);
    assert_eq!(exporter.stats().dropped(), 0);
    exporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_batch_dropped_after_max_retries() {
    let sink = MemorySink {
        write_failures: AtomicUsize::new(3),
        ..MemorySink::default()
    };
    let config = InfluxConfig {
        max_retries: 3,
        ..test_config()
    };
    let (bus, store, exporter, sink) = start(config, sink);
    wait_for_listeners(&bus).await;

    store.write("sensor.lost", StateWrite::new("1")).unwrap();
    settle(&exporter).await;
    assert_eq!(sink.writes.load(Ordering::SeqCst), 3);
    assert_eq!(exporter.stats().dropped(), 1);

    // The worker keeps going with the next batch
    store.write("sensor.kept", StateWrite::new("2")).unwrap();
    settle(&exporter).await;
    let points = sink.points();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].tags["entity_id"], "kept");
    exporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_batch_is_not_retried() {
    let sink = MemorySink {
        reject: true,
        ..MemorySink::default()
    };
    let (bus, store, exporter, sink) = start(test_config(), sink);
    wait_for_listeners(&bus).await;

    store.write("sensor.temp", StateWrite::new("1")).unwrap();
    settle(&exporter).await;
    assert_eq!(sink.writes.load(Ordering::SeqCst), 1);
    assert_eq!(exporter.stats().dropped(), 1);
    exporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_while_unreachable() {
    let sink = MemorySink {
        ping_failures: AtomicUsize::new(usize::MAX),
        ..MemorySink::default()
    };
    let config = InfluxConfig {
        connect_retry_interval: Duration::from_secs(60),
        ..test_config()
    };
    let (bus, _store, exporter, _sink) = start(config, sink);

    tokio::time::timeout(Duration::from_secs(2), exporter.shutdown())
        .await
        .expect("shutdown should not wait for the retry interval")
        .unwrap();
    assert_eq!(bus.listener_count(), 0);
}

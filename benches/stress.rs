use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use blocktime::engine::{AircraftSpec, FlightSpec};
use blocktime::model::{Ms, Window};
use blocktime::notify::NotifyHub;
use blocktime::{Engine, EngineError};

const HOUR: Ms = 3_600_000;

fn bench_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("blocktime_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    let _ = std::fs::remove_file(&path);
    path
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

async fn register(engine: &Engine, tail: &str, seats: u32) -> Ulid {
    engine
        .register_aircraft(AircraftSpec {
            tail_number: tail.into(),
            model: "A320".into(),
            seats,
            production_year: 2020,
        })
        .await
        .unwrap()
}

async fn schedule(engine: &Engine, number: &str, aircraft: Ulid, depart: Ms, arrive: Ms) -> Ulid {
    engine
        .create_flight(FlightSpec {
            number: number.into(),
            departure: "IST".into(),
            destination: "AMS".into(),
            window: Window::new(depart, arrive),
            aircraft_id: aircraft,
        })
        .await
        .unwrap()
}

/// Sequential flight scheduling against one aircraft — every commit runs the
/// conflict check over the growing schedule plus a WAL fsync.
async fn phase1_schedule_throughput() {
    let engine = Engine::new(bench_wal_path("phase1"), Arc::new(NotifyHub::new())).unwrap();
    let aircraft = register(&engine, "BN-P1", 200).await;

    let n = 2000;
    let base = now_ms() + 24 * HOUR;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        // 2-hour spacing keeps every window clear of the 1-hour buffer.
        let depart = base + (i as Ms) * 2 * HOUR;
        let t = Instant::now();
        schedule(&engine, &format!("BN{i}"), aircraft, depart, depart + HOUR).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} flights in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("schedule latency", &mut latencies);
}

/// Sequential bookings on one large flight.
async fn phase2_booking_throughput() {
    let engine = Engine::new(bench_wal_path("phase2"), Arc::new(NotifyHub::new())).unwrap();
    let aircraft = register(&engine, "BN-P2", 5000).await;
    let depart = now_ms() + 24 * HOUR;
    let flight = schedule(&engine, "BN1", aircraft, depart, depart + 2 * HOUR).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .create_reservation(flight, "Bench Passenger", &format!("p{i}@bench.io"))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} bookings in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("booking latency", &mut latencies);
}

/// Concurrent bookings spread over many flights — group commit batches the
/// WAL fsyncs across tasks.
async fn phase3_concurrent_bookings() {
    let engine = Arc::new(Engine::new(bench_wal_path("phase3"), Arc::new(NotifyHub::new())).unwrap());
    let n_tasks = 10;
    let n_per_task = 200;
    let depart = now_ms() + 24 * HOUR;

    let mut flights = Vec::new();
    for i in 0..n_tasks {
        let aircraft = register(&engine, &format!("BN-P3{i}"), (n_per_task + 1) as u32).await;
        let d = depart + (i as Ms) * 4 * HOUR;
        flights.push(schedule(&engine, &format!("BN3{i}"), aircraft, d, d + 2 * HOUR).await);
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for (i, flight) in flights.into_iter().enumerate() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine
                    .create_reservation(flight, "Bench Passenger", &format!("t{i}p{j}@bench.io"))
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Contended burst: every task fights for the same flight. Exactly the
/// capacity succeeds; everyone else gets a clean rejection.
async fn phase4_contended_flight() {
    let engine = Arc::new(Engine::new(bench_wal_path("phase4"), Arc::new(NotifyHub::new())).unwrap());
    let capacity = 50u32;
    let attempts = 200;
    let aircraft = register(&engine, "BN-P4", capacity).await;
    let depart = now_ms() + 24 * HOUR;
    let flight = schedule(&engine, "BN4", aircraft, depart, depart + 2 * HOUR).await;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..attempts {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let result = engine
                .create_reservation(flight, "Bench Passenger", &format!("c{i}@bench.io"))
                .await;
            (result, t.elapsed())
        }));
    }

    let mut booked = 0;
    let mut rejected = 0;
    let mut latencies = Vec::with_capacity(attempts);
    for h in handles {
        let (result, latency) = h.await.unwrap();
        latencies.push(latency);
        match result {
            Ok(_) => booked += 1,
            Err(EngineError::CapacityExceeded { .. }) => rejected += 1,
            Err(other) => panic!("unexpected rejection: {other}"),
        }
    }

    let elapsed = start.elapsed();
    assert_eq!(booked, capacity as usize);
    println!(
        "  {attempts} concurrent attempts on a {capacity}-seat flight in {:.2}s: \
         {booked} booked, {rejected} rejected",
        elapsed.as_secs_f64()
    );
    print_latency("contended booking latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== blocktime stress benchmark ===\n");

    println!("[phase 1] sequential schedule throughput");
    phase1_schedule_throughput().await;

    println!("\n[phase 2] sequential booking throughput");
    phase2_booking_throughput().await;

    println!("\n[phase 3] concurrent booking throughput");
    phase3_concurrent_bookings().await;

    println!("\n[phase 4] contended flight burst");
    phase4_contended_flight().await;

    println!("\n=== benchmark complete ===");
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

const SEATS: usize = 100;

/// Each connection gets a fresh library (database) unless one is named.
async fn connect(host: &str, port: u16, library: Option<&str>) -> tokio_postgres::Client {
    let dbname = library.map_or_else(|| format!("bench_{}", Ulid::new()), str::to_string);
    let mut config = Config::new();
    config.host(host).port(port).dbname(&dbname).user("carrel").password("carrel");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn seat_id(i: usize) -> String {
    format!("S{i:03}")
}

async fn create_seats(client: &tokio_postgres::Client) {
    let values: Vec<String> = (0..SEATS).map(|i| format!("('{}', 'empty')", seat_id(i))).collect();
    client
        .batch_execute(&format!("INSERT INTO seats (seat_id, physical_status) VALUES {}", values.join(", ")))
        .await
        .unwrap();
}

fn booking_sql(seat: &str, student: &str, start: usize, end: usize) -> String {
    format!("INSERT INTO bookings VALUES ('{seat}', '{student}', {start}, {end}, '1234')")
}

/// One client fills every seat's day with one-hour bookings.
async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, None).await;
    create_seats(&client).await;

    let mut latencies = Vec::with_capacity(SEATS * 24);
    let start = Instant::now();
    for i in 0..SEATS {
        for slot in (0..48).step_by(2) {
            let t = Instant::now();
            client
                .batch_execute(&booking_sql(&seat_id(i), "seq", slot, slot + 2))
                .await
                .unwrap();
            latencies.push(t.elapsed());
        }
    }

    let elapsed = start.elapsed();
    let n = latencies.len();
    println!(
        "  {n} bookings in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

/// Many clients race for the same slots. Exactly one booking per slot may win.
async fn phase2_contention(host: &str, port: u16) {
    let library = format!("bench_{}", Ulid::new());
    let setup = connect(host, port, Some(&library)).await;
    create_seats(&setup).await;
    drop(setup);

    let n_tasks = 20;
    let wins = Arc::new(AtomicUsize::new(0));
    let losses = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for t in 0..n_tasks {
        let host = host.to_string();
        let library = library.clone();
        let (wins, losses) = (wins.clone(), losses.clone());
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, Some(&library)).await;
            for i in 0..SEATS {
                for slot in (0..48).step_by(4) {
                    match client
                        .batch_execute(&booking_sql(&seat_id(i), &format!("racer{t}"), slot, slot + 4))
                        .await
                    {
                        Ok(()) => wins.fetch_add(1, Ordering::Relaxed),
                        Err(_) => losses.fetch_add(1, Ordering::Relaxed),
                    };
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let (won, lost) = (wins.load(Ordering::Relaxed), losses.load(Ordering::Relaxed));
    println!(
        "  {n_tasks} racers: {won} confirmed, {lost} rejected in {:.2}s (at least {} expected)",
        elapsed.as_secs_f64(),
        SEATS * 12
    );
    // The reaper may release ended slots mid-race, so a slot can be won twice
    // over time. At any instant the confirmed bookings must still be disjoint.
    assert!(won >= SEATS * 12, "a free slot was never won");
    assert_no_double_booking(host, port, &library, n_tasks).await;
}

async fn assert_no_double_booking(host: &str, port: u16, library: &str, n_tasks: usize) {
    let client = connect(host, port, Some(library)).await;
    let mut by_seat: HashMap<String, Vec<(i64, i64)>> = HashMap::new();
    for t in 0..n_tasks {
        let rows = client
            .simple_query(&format!("SELECT * FROM bookings WHERE student_id = 'racer{t}'"))
            .await
            .unwrap();
        for msg in rows {
            if let SimpleQueryMessage::Row(row) = msg {
                let slot = |col: &str| row.get(col).and_then(|v| v.parse::<i64>().ok()).unwrap();
                let seat = row.get("seat_id").unwrap().to_string();
                by_seat.entry(seat).or_default().push((slot("start_slot"), slot("end_slot")));
            }
        }
    }
    for (seat, mut slots) in by_seat {
        slots.sort();
        assert!(
            slots.windows(2).all(|w| w[0].1 <= w[1].0),
            "double booking detected on {seat}: {slots:?}"
        );
    }
}

/// Availability reads on one library while writers book and cancel beside them.
async fn phase3_read_under_load(host: &str, port: u16) {
    let library = format!("bench_{}", Ulid::new());
    let setup = connect(host, port, Some(&library)).await;
    create_seats(&setup).await;
    for i in 0..SEATS {
        setup.batch_execute(&booking_sql(&seat_id(i), "pre", 20, 24)).await.unwrap();
    }
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let library = library.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, Some(&library)).await;
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let slot = 24 + (i % 12) * 2;
                let seat = seat_id((w * 20 + i / 12) % SEATS);
                let _ = client.batch_execute(&booking_sql(&seat, &format!("w{w}"), slot, slot + 2)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let library = library.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, Some(&library)).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for r in 0..reads_per_reader {
                let start = r % 40;
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE start_slot >= {start} AND end_slot <= {}",
                        start + 4
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency(&format!("availability over {SEATS} seats"), &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let start = Instant::now();
    let success = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, None).await;
            client
                .batch_execute("INSERT INTO seats (seat_id) VALUES ('A1')")
                .await
                .unwrap();
            for slot in 0..10 {
                client.batch_execute(&booking_sql("A1", "storm", slot, slot + 1)).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, 10 bookings each: {ok}/{n_conns} succeeded in {:.2}s",
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CARREL_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CARREL_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid CARREL_PORT");

    println!("=== carrel stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended bookings");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== done ===");
}

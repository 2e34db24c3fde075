//! Performance benchmarks for the scoreboard hot paths

use server::ban::BanRegistry;
use server::config::ServerConfig;
use server::geo::{CidrTableResolver, GeoResolver};
use server::scoreboard::{Admission, Scoreboard};
use server::scores::CountryScore;
use server::session_manager::SessionManager;
use shared::{CountryCode, Packet, Scores};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

fn countries() -> Vec<CountryCode> {
    (b'A'..=b'Z')
        .flat_map(|a| (b'A'..=b'J').map(move |b| [a, b]))
        .map(|code| CountryCode::new(std::str::from_utf8(&code).unwrap()))
        .collect()
}

/// Benchmarks admitted updates spread over many countries
#[test]
fn benchmark_update_admission() {
    let countries = countries();
    let mut scoreboard = Scoreboard::new(&ServerConfig::default());
    scoreboard.load(Vec::<CountryScore>::new());

    let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let country = &countries[i % countries.len()];
        let admission = scoreboard.submit_update(addr, country, 1 + (i % 30) as i64);
        assert_eq!(admission, Admission::Applied);
    }

    let duration = start.elapsed();
    println!(
        "Update admission: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(scoreboard.scores().len(), countries.len());
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks ban checks across a large number of distinct addresses
#[test]
fn benchmark_ban_lookups() {
    let mut registry = BanRegistry::new(Duration::from_secs(60));
    let iterations: u32 = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let addr = IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i));
        if i % 10 == 0 {
            registry.ban(addr);
        }
        let _ = registry.is_banned(addr);
    }

    let duration = start.elapsed();
    println!(
        "Ban lookups: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(registry.len(), iterations as usize);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks endpoint lookups with the session table full
#[test]
fn benchmark_session_lookup() {
    let sessions: u32 = 10_000;
    let mut manager = SessionManager::new(sessions as usize);
    let addrs: Vec<SocketAddr> = (0..sessions)
        .map(|i| SocketAddr::new(IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i)), 4000))
        .collect();
    for addr in &addrs {
        manager.add_session(*addr, CountryCode::new("US")).unwrap();
    }

    let iterations = 200_000;
    let start = Instant::now();

    for i in 0..iterations {
        let addr = addrs[(i * 7919) % addrs.len()];
        assert!(manager.find_session_by_addr(addr).is_some());
    }

    let duration = start.elapsed();
    println!(
        "Session lookup: {} lookups over {} sessions in {:?} ({:.2} ns/iter)",
        iterations,
        sessions,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks geolocation against a table with mixed prefix lengths
#[test]
fn benchmark_geo_resolution() {
    let mut table = String::new();
    for a in 1..=200u32 {
        table.push_str(&format!("{}.0.0.0/8,US\n", a));
        table.push_str(&format!("{}.{}.0.0/16,FR\n", a, a % 250));
        table.push_str(&format!("{}.{}.{}.0/24,JP\n", a, a % 250, a % 250));
    }
    let resolver = CidrTableResolver::parse(&table).unwrap();

    let iterations: u32 = 100_000;
    let start = Instant::now();
    let mut unknown = 0;

    for i in 0..iterations {
        let addr = IpAddr::V4(Ipv4Addr::from(i.wrapping_mul(2_654_435_761)));
        if resolver.resolve(addr).is_unknown() {
            unknown += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Geo resolution: {} iterations in {:?} ({:.2} ns/iter), {} unknown",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64,
        unknown
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks encoding a full scoreboard broadcast
#[test]
fn benchmark_scoreboard_encoding() {
    let scores: Scores = countries()
        .into_iter()
        .enumerate()
        .map(|(i, country)| (country.to_string(), i as i64 * 1_000_003))
        .collect();
    let packet = Packet::Scoreboard { scores };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let data = bincode::serialize(&packet).unwrap();
        assert!(data.len() < shared::MAX_DATAGRAM_SIZE);
    }

    let duration = start.elapsed();
    println!(
        "Scoreboard encoding: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

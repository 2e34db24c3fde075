use bincode::{deserialize, serialize};
use clap::Parser;
use shared::{Packet, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, timeout};

/// Headless client that clicks against a running scoreboard server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:3000")]
    server: SocketAddr,
    /// Number of updates to send
    #[clap(short, long, default_value_t = 10)]
    updates: u32,
    /// Score carried by each update
    #[clap(long, default_value_t = 5)]
    score: i64,
    /// Milliseconds between updates
    #[clap(long, default_value_t = 1000)]
    interval_ms: u64,
}

async fn send(socket: &UdpSocket, packet: &Packet, server: SocketAddr) -> std::io::Result<()> {
    let data = serialize(packet).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    socket.send_to(&data, server).await?;
    Ok(())
}

fn print_packet(packet: Packet) {
    match packet {
        Packet::Country { country } => println!("Playing for {}", country),
        Packet::Scoreboard { scores } => {
            println!("Scoreboard:");
            for (country, score) in scores {
                println!("  {:>3} {}", country, score);
            }
        }
        Packet::Banned { seconds } => println!("Banned for {} seconds", seconds),
        other => println!("Unexpected packet: {:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    println!("Connecting to {}", args.server);
    send(&socket, &Packet::Connect, args.server).await?;

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut ticker = interval(Duration::from_millis(args.interval_ms));
    let mut sent = 0;

    while sent < args.updates {
        tokio::select! {
            _ = ticker.tick() => {
                send(&socket, &Packet::Update { score: args.score }, args.server).await?;
                send(&socket, &Packet::Heartbeat, args.server).await?;
                sent += 1;
                println!("Sent update {} of {}", sent, args.updates);
            }
            received = socket.recv_from(&mut buf) => {
                let (len, _) = received?;
                match deserialize::<Packet>(&buf[..len]) {
                    Ok(packet) => print_packet(packet),
                    Err(e) => println!("Failed to deserialize packet: {}", e),
                }
            }
        }
    }

    // Wait briefly for the next broadcast before leaving
    if let Ok(Ok((len, _))) = timeout(Duration::from_secs(6), socket.recv_from(&mut buf)).await {
        if let Ok(packet) = deserialize::<Packet>(&buf[..len]) {
            print_packet(packet);
        }
    }

    send(&socket, &Packet::Disconnect, args.server).await?;
    println!("Test client finished");

    Ok(())
}

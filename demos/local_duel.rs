//! Scripted local duel.
//!
//! Two connections log in, play a fixed-outcome roulette duel, and every
//! delivered message is printed as it would reach the clients.
//!
//! Run with: cargo run --example local_duel

use std::sync::Arc;

use duelnet::{ChannelBus, Engine, FixedDice, TracingConfig};
use tokio::sync::mpsc::UnboundedReceiver;

#[tokio::main]
async fn main() -> duelnet::Result<()> {
    duelnet::init_tracing(TracingConfig::default().with_level("info"));

    let bus = Arc::new(ChannelBus::new());
    let engine = Engine::builder()
        .dice(Arc::new(FixedDice(3)))
        .admin_account("admin", "admin")
        .build(bus.clone());

    let alice = engine.connect();
    let mut alice_rx = bus.register(alice);
    let bob = engine.connect();
    let mut bob_rx = bus.register(bob);

    engine.login(alice, "alice", "secret")?;
    engine.login(bob, "bob", "hunter2")?;

    engine.handle_line(alice, "hello lobby")?;
    engine.handle_line(alice, "@bob challenge roulette")?;
    engine.handle_line(bob, "/accept")?;

    // Bullet fixed in chamber three: click, click, bang.
    engine.handle_line(alice, "/pull")?;
    engine.handle_line(bob, "/pull")?;
    engine.handle_line(alice, "/pull")?;

    engine.handle_line(bob, "/rank")?;

    drain("alice", &mut alice_rx);
    drain("bob", &mut bob_rx);

    let wins = engine.wins_of("bob");
    println!("--\nbob's ladder: roulette={} killspree={}", wins.roulette, wins.killspree);
    Ok(())
}

fn drain(who: &str, rx: &mut UnboundedReceiver<String>) {
    while let Ok(message) = rx.try_recv() {
        println!("[{who}] {message}");
    }
}

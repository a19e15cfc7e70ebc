//! MTProto auth key exchange + encrypted ping demo.
//!
//! # What this does
//!
//! 1. TCP connect to the data centre in `MTLINK_ADDR` (production DC2 by default)
//! 2. Reuse the auth key in `MTLINK_SESSION` (`mtlink.session`), or run the
//!    full key exchange and save the new key there
//! 3. Send `ping` over the encrypted channel and print the round trip time
//!
//! # Run
//! ```text
//! RUST_LOG=debug cargo run -p mtlink-connect
//! ```

use mtlink_client::{Config, Connection};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("mtlink_client=info,mtlink_mtproto=info"),
    )
    .init();

    if let Err(e) = run().await {
        eprintln!("✗ {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    println!("🔌 Connecting to {} …", config.addr);

    let mut conn = Connection::connect(&config).await?;
    let key_id = i64::from_le_bytes(conn.session().auth_key().key_id());
    println!("🔑 Auth key {key_id:#018x}, time offset {}s", conn.session().time_offset());

    for _ in 0..3 {
        let rtt = conn.ping().await?;
        println!("🏓 pong in {} ms", rtt.as_millis());
    }
    Ok(())
}

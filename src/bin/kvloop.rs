/*!
 * kvloop Server Main Entry Point
 *
 * Initializes logging, loads configuration from the environment (the first
 * command-line argument, if any, overrides the listen address), binds the
 * listener and serves until the process is killed.
 */

use anyhow::Result;
use kvloop::{Config, Server};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    // Respects RUST_LOG, e.g. RUST_LOG=debug kvloop
    env_logger::init();

    let mut config = Config::from_env();
    if let Some(addr) = std::env::args().nth(1) {
        config.listen_addr = addr;
    }

    // A bind failure ends the process here with a non-zero exit code
    let server = Server::bind(config)?;
    server.run()
}

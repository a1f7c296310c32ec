use clap::Parser;

use fire_engine::api::{Cli, execute};

fn main() {
    env_logger::init();

    match execute(Cli::parse()) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

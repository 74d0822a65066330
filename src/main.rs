use clap::Parser;
use threatdesk::cli::{run, Cli};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("[cli] {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

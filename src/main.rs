// src/main.rs

use cmdq::cli;
use cmdq::logging::init_logging;

#[tokio::main]
async fn main() {
    let args = cli::parse();

    if let Err(err) = init_logging(args.log_level) {
        eprintln!("failed to initialise logging: {err}");
        std::process::exit(1);
    }

    match cli::run(args).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

mod cli;
mod fingerprint_cmd;
mod page_cmd;
mod paginate_cmd;
mod shared;

use clap::Parser;
use cli::Cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        cli::Commands::Paginate {
            ref input,
            ref layout,
            ref run,
            ref cache,
            pretty,
        } => paginate_cmd::run(input, layout, run, cache, pretty),
        cli::Commands::Page {
            ref input,
            index,
            ref layout,
            ref run,
            ref cache,
            json,
        } => page_cmd::run(input, index, layout, run, cache, json),
        cli::Commands::Fingerprint { ref layout } => fingerprint_cmd::run(layout),
    };

    if let Err(code) = result {
        std::process::exit(code);
    }
}

use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    spack_helpers::logging::init_logger(cli.verbose, cli.quiet);
    let code = commands::run(cli).await;
    if code != 0 {
        std::process::exit(code);
    }
}

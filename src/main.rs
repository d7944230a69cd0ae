use clap::Parser;
use dropsift::cli::{Cli, run};
use dropsift::logging;

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    std::process::exit(run(cli));
}

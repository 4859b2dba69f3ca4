mod bootstrap;
mod cli;
mod displays;
mod paths;
mod run;
mod session;
mod state;

use anyhow::Result;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();
    run::run(cli)
}

use clap::Parser;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    photohub_observability::init();

    let cli = photohub_cli::Cli::parse();
    let stdout = std::io::stdout();
    photohub_cli::run(cli, &mut stdout.lock())
}

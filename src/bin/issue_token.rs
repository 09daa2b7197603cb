use clap::Parser;
use dotenvy::dotenv;
use linked_import_backend::config::ImportConfig;
use linked_import_backend::utils::auth::create_jwt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mints a bearer token for calling the API locally
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// User id placed in the `sub` claim
    #[arg(short, long)]
    user: String,
}

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "issue_token=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ImportConfig::from_env()?;
    let token = create_jwt(&args.user, &config.jwt_secret)?;

    info!("🔐 Issued token for user {}", args.user);
    println!("{}", token);
    Ok(())
}

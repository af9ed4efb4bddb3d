use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use content::ContentStore;
use eyre::WrapErr;
use provider::{Provider, ProviderConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Cache OCI images locally and copy them between registries.
#[derive(Debug, Parser)]
#[command(name = "imagecache", version, about)]
struct Args {
    /// Configuration file (TOML).
    #[arg(short, long)]
    config: Option<Utf8PathBuf>,

    /// Directory holding the content store and metadata database.
    #[arg(long)]
    work_dir: Option<Utf8PathBuf>,

    /// Talk to registries over plain HTTP.
    #[arg(long)]
    plain_http: bool,

    /// Platforms to pull: `all`, or a comma separated list of os/arch[/variant].
    #[arg(long)]
    platform: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pull an image into the cache.
    Pull {
        /// Image reference.
        reference: String,
    },

    /// Pull an image and push it to another reference.
    Copy {
        /// Image to pull.
        source: String,
        /// Where to push it.
        destination: String,
    },

    /// List blobs in the cache.
    List,
}

impl Args {
    fn config(&self) -> eyre::Result<ProviderConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("reading {path}"))?;
                toml_edit::de::from_str(&text).wrap_err_with(|| format!("parsing {path}"))?
            }
            None => ProviderConfig::default(),
        };

        if let Some(work_dir) = &self.work_dir {
            config.work_dir = work_dir.clone();
        }
        if self.plain_http {
            config.plain_http = true;
        }
        if let Some(platform) = &self.platform {
            config.platform = Some(platform.clone());
        }
        Ok(config)
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_error::ErrorLayer::default())
        .init();
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing();
    let args = Args::parse();

    let (provider, db) = args.config()?.build()?;

    match &args.command {
        Command::Pull { reference } => {
            provider.pull(reference).await?;
            let image = provider.image(reference)?;
            println!("{} {}", image.digest, reference);
        }
        Command::Copy {
            source,
            destination,
        } => {
            provider.pull(source).await?;
            let image = provider.image(source)?;
            provider
                .push(&image, destination)
                .await
                .wrap_err_with(|| format!("copying {source} to {destination}"))?;
            println!("{} {}", image.digest, destination);
        }
        Command::List => {
            for info in provider.content_store().list().await? {
                println!("{}\t{}\t{}", info.digest, info.size, info.created_at.to_rfc3339());
            }
        }
    }

    db.compact()?;
    Ok(())
}

use std::path::{Path, PathBuf};

use clap::Parser;
use oppivelvollisuus_gateway::{
    auth::{
        IdpCertificates, SamlServiceProvider, TrustedCertificates, build_saml_config,
        create_session_store, metadata_http_client,
    },
    config::{GatewayConfig, SamlConfig},
    observability,
};

#[derive(Parser, Debug)]
#[command(version, about = "Oppivelvollisuus API gateway SAML tooling", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "gateway.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Validate configuration, resolve IdP certificates and connect to the session store
    Check,
    /// Print SP metadata for registering the gateway at the IdP
    SpMetadata {
        /// SP certificate (PEM) to advertise as the signing key
        #[arg(long)]
        sp_cert: Option<PathBuf>,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(path: &Path) -> GatewayConfig {
    let config = match GatewayConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("{e}");
        std::process::exit(1);
    }
    config
}

fn saml_section(config: &GatewayConfig) -> &SamlConfig {
    match &config.ad.saml {
        Some(saml) => saml,
        None => {
            eprintln!("Error: [ad.saml] is not configured");
            std::process::exit(1);
        }
    }
}

async fn run_check(config_path: &Path) {
    let config = load_config(config_path);
    let saml = saml_section(&config);

    let result = async {
        let http_client = metadata_http_client(saml.metadata_timeout_secs)?;
        let auth_config =
            build_saml_config(saml, &TrustedCertificates::from_config(saml), &http_client)?;

        let certificates = match &auth_config.idp_certificates {
            IdpCertificates::Static(certificates) => certificates.len(),
            IdpCertificates::Fetch(fetcher) => {
                let certificates = fetcher.fetch().await?;
                tracing::info!(url = %fetcher.url(), count = certificates.len(), "Fetched IdP metadata");
                certificates.len()
            }
        };

        create_session_store(&config.session).await?;
        Ok::<_, oppivelvollisuus_gateway::auth::SamlError>(certificates)
    }
    .await;

    match result {
        Ok(certificates) => {
            tracing::info!(
                config_file = %config_path.display(),
                issuer = %saml.issuer,
                idp_certificates = certificates,
                local = config.app_base_url.is_local(),
                "Configuration OK"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Configuration check failed");
            std::process::exit(1);
        }
    }
}

fn run_sp_metadata(config_path: &Path, sp_cert: Option<PathBuf>, output: Option<PathBuf>) {
    let config = load_config(config_path);
    let saml = saml_section(&config);

    let auth_config = match build_saml_config(
        saml,
        &TrustedCertificates::from_config(saml),
        &reqwest::Client::new(),
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let mut provider = SamlServiceProvider::new(auth_config);
    if let Some(path) = sp_cert {
        match std::fs::read_to_string(&path) {
            Ok(pem) => provider = provider.with_sp_certificate(pem),
            Err(e) => {
                eprintln!("Failed to read {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    }

    let metadata = provider.sp_metadata();
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, metadata) {
                eprintln!("Failed to write {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
        None => println!("{metadata}"),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Check => run_check(&args.config).await,
        Command::SpMetadata { sp_cert, output } => run_sp_metadata(&args.config, sp_cert, output),
    }
}

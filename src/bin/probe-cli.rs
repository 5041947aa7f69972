use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "probe-cli")]
#[command(about = "Command line client for a running probe-exporter", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:9115")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a probe and print the resulting metrics
    Probe {
        /// Target to probe, e.g. `example.com` or `1.1.1.1:53`
        target: String,
        #[arg(short, long, default_value = "http_2xx")]
        module: String,
        /// Print the probe summary and module configuration too
        #[arg(long)]
        debug: bool,
    },
    /// Ask the exporter to reload its configuration file
    Reload,
    /// Print the active configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let res = match cli.command {
        Commands::Probe {
            target,
            module,
            debug,
        } => {
            let mut query = vec![("target", target), ("module", module)];
            if debug {
                query.push(("debug", "true".to_string()));
            }
            client
                .get(format!("{}/probe", cli.url))
                .query(&query)
                .send()
                .await?
        }
        Commands::Reload => client.post(format!("{}/-/reload", cli.url)).send().await?,
        Commands::Config => client.get(format!("{}/config", cli.url)).send().await?,
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let body = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: exporter returned status {}", status);
        eprintln!("Response: {}", body.trim_end());
        std::process::exit(1);
    }
    print!("{}", body);
    Ok(())
}

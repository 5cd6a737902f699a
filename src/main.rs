use anyhow::{Context, Result, bail};
use clap::Parser;
use lbg::{Client, ClientConfig, RetryPolicy};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::io::Write;
use std::time::Duration;

/// lbg - command-line access to the Bohrium API
///
/// Credentials are read from flags or from LBG_EMAIL / LBG_PASSWORD.
///
/// Examples:
///   lbg login
///   lbg request GET /account/info
///   lbg request POST /jobs --data '{"name":"demo"}'
#[derive(Parser, Debug)]
#[command(author, version = env!("LBG_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Account email
    #[arg(long, env = "LBG_EMAIL", global = true, default_value = "")]
    email: String,

    /// Account password
    #[arg(
        long,
        env = "LBG_PASSWORD",
        global = true,
        default_value = "",
        hide_env_values = true
    )]
    password: String,

    /// API endpoint (defaults to https://bohrium.dp.tech)
    #[arg(long, env = "LBG_ENDPOINT", value_name = "URL", global = true)]
    endpoint: Option<String>,

    /// Maximum attempts per request
    #[arg(long, env = "LBG_RETRY", global = true, default_value_t = 1)]
    retry: usize,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Log in and check the credentials
    Login,

    /// Send a request and print the response data
    Request(RequestArgs),
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// HTTP method, e.g. GET or POST
    method: String,

    /// Path relative to the endpoint, e.g. /account/info
    path: String,

    /// Request body
    #[arg(long, short = 'd')]
    data: Option<String>,

    /// Query parameter as key=value (repeatable)
    #[arg(long = "query", short = 'q', value_name = "KEY=VALUE")]
    query: Vec<String>,

    /// Extra header as name:value (repeatable)
    #[arg(long = "header", short = 'H', value_name = "NAME:VALUE")]
    headers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut config = ClientConfig::new(&cli.email, &cli.password)
        .with_retry(RetryPolicy::attempts(cli.retry));
    if let Some(endpoint) = &cli.endpoint {
        config = config.with_endpoint(endpoint);
    }
    if let Some(secs) = cli.timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    let client = Client::new(config).context("Failed to create client")?;

    match cli.command {
        Commands::Login => {
            client.login().await.context("Login failed")?;
            println!("Logged in as {}", client.email());
        }
        Commands::Request(args) => run_request(&client, &cli.email, &cli.password, args).await?,
    }
    Ok(())
}

async fn run_request(client: &Client, email: &str, password: &str, args: RequestArgs) -> Result<()> {
    if !email.is_empty() && !password.is_empty() {
        client.login().await.context("Login failed")?;
    }

    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", args.method))?;
    let params = parse_pairs(&args.query, '=')?;
    let headers = parse_headers(&args.headers)?;
    let query: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let response = client
        .execute(
            method,
            &args.path,
            args.data.as_deref().map(str::as_bytes),
            Some(&headers),
            &query,
        )
        .await
        .with_context(|| format!("{} {} failed", args.method, args.path))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response.payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn parse_pairs(items: &[String], separator: char) -> Result<Vec<(String, String)>> {
    items
        .iter()
        .map(|item| match item.split_once(separator) {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => bail!("Expected '<key>{}<value>', got '{}'", separator, item),
        })
        .collect()
}

fn parse_headers(items: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in parse_pairs(items, ':')? {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name: {}", name))?;
        let value = HeaderValue::from_str(&value)
            .with_context(|| format!("Invalid value for header {}", name))?;
        headers.append(name, value);
    }
    Ok(headers)
}

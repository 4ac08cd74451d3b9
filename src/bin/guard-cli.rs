use clap::{Parser, Subcommand};
use reqwest::StatusCode;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Operator CLI for the portal request gate", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(long, default_value = "x-csrf-token")]
    header: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gate health
    Health,
    /// Fetch a CSRF token (and its cookie)
    Token,
    /// POST to a path with a freshly fetched token and print the result
    Probe { path: String },
    /// Fire N GET requests at a path and count admitted vs limited
    Burst {
        path: String,
        #[arg(short = 'n', long, default_value_t = 120)]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder().cookie_store(true).build()?;

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Token => {
            let res = client.get(format!("{}/api/csrf-token", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Probe { path } => {
            let token = fetch_token(&client, &cli.url).await?;
            let res = client
                .post(format!("{}{}", cli.url, path))
                .header(cli.header.as_str(), token)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Burst { path, count } => {
            let (mut admitted, mut limited, mut other) = (0u32, 0u32, 0u32);
            let mut retry_after = None;
            for _ in 0..count {
                let res = client.get(format!("{}{}", cli.url, path)).send().await?;
                match res.status() {
                    s if s.is_success() => admitted += 1,
                    StatusCode::TOO_MANY_REQUESTS => {
                        limited += 1;
                        retry_after = res
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                    }
                    _ => other += 1,
                }
            }
            println!("admitted: {admitted}");
            println!("limited:  {limited}");
            println!("other:    {other}");
            if let Some(secs) = retry_after {
                println!("retry after: {secs}s");
            }
        }
    }

    Ok(())
}

async fn fetch_token(
    client: &reqwest::Client,
    url: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let json: Value = client
        .get(format!("{}/api/csrf-token", url))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    json["token"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| "token endpoint returned no token".into())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    println!("HTTP {}", status);

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}

//! Send one prompt and print the reply.
//!
//! ```text
//! DEEPSEEK_API_KEY=sk-... cargo run --example prompt -- "What is 2+2?"
//! ```

use std::env;

use anyhow::{Context, Result};
use colored::*;
use deepseek_sdk::{DeepSeekClient, Error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let api_key = env::var("DEEPSEEK_API_KEY")
        .context("DEEPSEEK_API_KEY must be set in environment variables or .env file")?;

    let prompt = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("usage: prompt <text>");
    }

    let client = DeepSeekClient::new(api_key);

    print!("{}", "> ".blue().bold());
    println!("{}", prompt);
    println!();

    match client.send_prompt(&prompt).await {
        Ok(reply) => println!("{}", reply.cyan()),
        Err(Error::Api { message, .. }) => {
            println!("{}", format!("API error: {}", message).red());
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

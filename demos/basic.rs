use std::sync::Arc;

use api_pipeline::{ApiClient, Call, ClientOptions, MemoryTokenStore, Token};
use serde_json::Value;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let base_url = std::env::var("API_BASE_URL")?;
    let token = std::env::var("API_TOKEN")?;

    let api = ApiClient::builder(base_url)
        .options(ClientOptions::default().with_debug_logging(true))
        .token_store(Arc::new(MemoryTokenStore::with_token(Token::new(token))))
        .build()?;

    let users = api
        .get::<Vec<Value>>("/users", Call::new().query("page", 1))
        .await?;

    for user in users.data.unwrap_or_default() {
        println!("{user}");
    }

    match api.get::<Value>("/admin/metrics", Call::new()).await {
        Ok(response) => println!("{:?}", response.data),
        Err(err) if err.is_unauthorized() => println!("sign in again: {}", err.message()),
        Err(err) => println!("{} ({:?})", err.message(), err.code()),
    }

    Ok(())
}

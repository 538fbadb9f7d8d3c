mod config;
mod core;
mod keys;
mod run;
mod verifier_client;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run::run().await
}

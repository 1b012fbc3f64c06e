#[tokio::main]
async fn main() {
    if let Err(err) = hf_api::run().await {
        tracing::error!(error = %err, "hf-api exited with error");
        eprintln!("hf-api: {err}");
        std::process::exit(1);
    }
}

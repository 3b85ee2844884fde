use std::process;

#[tokio::main]
async fn main() {
    if let Err(error) = givehub_worker::run().await {
        eprintln!("Fatal error: {error:#}");
        process::exit(1);
    }
}

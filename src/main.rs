use rpmkeeper::cli;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(err) = cli::run().await {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

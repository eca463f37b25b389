#[tokio::main]
async fn main() {
    if let Err(e) = piperchat_lib::run().await {
        eprintln!("piperchat: {e}");
        std::process::exit(1);
    }
}

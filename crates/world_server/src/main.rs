#[tokio::main]
async fn main() {
    let code = lib_world_server::init().await;
    std::process::exit(code);
}

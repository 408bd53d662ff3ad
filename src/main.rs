use charai::cli::Chara;

#[tokio::main]
async fn main() {
    Chara::new().run().await;
}

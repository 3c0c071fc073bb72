use rask_stream_engine::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::main().await
}

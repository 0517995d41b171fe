use anyhow::Result;

use blob_daemon::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init("blob-daemon")?;
    blob_daemon::server::run().await
}

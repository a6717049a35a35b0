//! Discover three known thermometers and read each one in turn.

use std::collections::HashMap;
use std::time::Duration;

use mijia_sensor::{ble, discover, DiscoverConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let aliases = HashMap::from([
        ("a4:c1:38:9b:80:d6", "bedroom-blue"),
        ("a4:c1:38:48:69:4c", "bedroom-grey"),
        ("a4:c1:38:e3:71:3d", "balcony"),
    ]);
    let total = aliases.len();

    let adapter = ble::default_adapter().await?;
    let handle = discover(
        adapter,
        DiscoverConfig::default(),
        move |device, registry| {
            println!("discovered {} ({}/{})", device.info.key(), registry.len(), total);
            registry.len() < total
        },
        |registry| println!("timeout, collecting from {} device(s)", registry.len()),
    )
    .await?;

    // One device at a time; the adapter handles one connection attempt well.
    for (key, device) in &handle.wait().await {
        let name = aliases.get(key.as_str()).copied().unwrap_or(key);
        println!("-- {name}");
        match device.acquire(Some(Duration::from_secs(60))).await {
            Ok(result) => println!("{result:?}"),
            Err(err) => println!("failed: {err}"),
        }
    }
    Ok(())
}

use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rfid_bridge::{mqtt, Config, Poller, ReaderSession};

/// Buffered presence events waiting for the publisher
const EVENT_CAPACITY: usize = 16;

/// How long shutdown waits for the reader thread, which may be parked on
/// an edge wait with no timeout
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rfid_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run());
    if let Err(e) = &result {
        tracing::error!(error = ?e, "RFID bridge stopping");
    }
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    result
}

async fn run() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // MQTT client; the connection is made once the event loop is polled
    let (client, eventloop) = mqtt::connect(&config.mqtt);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

    // Open the reader; setup failures are fatal
    let session = ReaderSession::open(&config.reader).context("couldn't open RFID reader")?;

    tracing::info!(
        host = %config.mqtt.host,
        port = config.mqtt.port,
        "RFID bridge publishing"
    );

    // The reader is blocking I/O, keep it off the async workers
    let mut poller = Poller::new(session, event_tx);
    let mut reader_task = tokio::task::spawn_blocking(move || poller.run());
    let mut publish_task = tokio::spawn(mqtt::publish_events(client, config.mqtt, event_rx));
    let mut connection_task = tokio::spawn(mqtt::drive_connection(eventloop));

    // Reader first: its exit is what closes the event channel
    tokio::select! {
        biased;
        res = &mut reader_task => {
            res.context("reader task panicked")?.context("presence loop failed")?;
        }
        res = &mut publish_task => {
            res.context("publisher task panicked")?.context("publishing failed")?;
        }
        res = &mut connection_task => {
            res.context("MQTT task panicked")?.context("MQTT connection lost")?;
        }
    }

    Ok(())
}

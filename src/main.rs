use anyhow::Context;
use linak_bed_controller::domain::models::{BedEvent, MessageSeverity};
use linak_bed_controller::domain::settings::SettingsService;
use linak_bed_controller::infrastructure::bluetooth::scanner::{self, ConnectivityWatcher};
use linak_bed_controller::infrastructure::bluetooth::{
    connection, BedTransport, BtleplugTransport, ConnectionConfig, SimulatedTransport,
};
use linak_bed_controller::infrastructure::logging;
use linak_bed_controller::presentation::console;
use linak_bed_controller::session::BedSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

fn log_event(event: BedEvent) {
    match event {
        BedEvent::ConnectionStatus(state) => info!("Bed is {}", state),
        BedEvent::Position { actuator, position } => trace!("{} at {:.2}%", actuator, position),
        BedEvent::LogMessage(msg) => match msg.severity {
            MessageSeverity::Info | MessageSeverity::Success => debug!("{}", msg.message),
            MessageSeverity::Warning => warn!("{}", msg.message),
            MessageSeverity::Error => error!("{}", msg.message),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings_service = SettingsService::new()?;
    if let Some(address) = std::env::args().nth(1) {
        settings_service.set_address(&address)?;
        settings_service.save()?;
    }

    let _logging_guard = logging::init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Linak bed controller");
    let settings = settings_service.get().clone();
    let policy = settings.session_policy()?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(event);
        }
    });

    let (session, _watcher) = if settings.simulate {
        info!("Simulation mode, no Bluetooth hardware is used");
        let address = if settings.address.is_empty() {
            "00:00:00:00:00:00".to_string()
        } else {
            settings.address.clone()
        };
        let transport: Arc<dyn BedTransport> = Arc::new(SimulatedTransport::new());
        (BedSession::new(address, transport, policy, event_tx), None)
    } else {
        if settings.address.is_empty() {
            anyhow::bail!(
                "No bed address configured; pass it as the first argument or set \"address\" in {}",
                settings_service.path().display()
            );
        }
        let address = connection::parse_address(&settings.address)?;
        let adapter = scanner::default_adapter()
            .await
            .context("Bluetooth adapter unavailable")?;

        let mut config = ConnectionConfig::new(address);
        config.scan_window = Duration::from_millis(settings.scan_window_ms);
        let transport: Arc<dyn BedTransport> =
            Arc::new(BtleplugTransport::new(adapter.clone(), config));
        let session = BedSession::new(address.to_string(), transport, policy, event_tx);

        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let watcher = match ConnectivityWatcher::spawn(adapter, address, link_tx).await {
            Ok(watcher) => {
                session.spawn_link_watcher(link_rx);
                Some(watcher)
            }
            Err(e) => {
                warn!("Connectivity events unavailable, reconnecting on demand only: {}", e);
                None
            }
        };
        (session, watcher)
    };

    info!("Controlling {} ({})", settings.name, session.address());
    if let Err(e) = session.connect().await {
        warn!("Initial connection failed, will retry on first command: {}", e);
    }

    println!("{} ready, type 'help' for commands", settings.name);
    let result = console::run(session.clone(), BufReader::new(tokio::io::stdin())).await;

    session.shutdown().await;
    info!("Linak bed controller stopped");
    result
}

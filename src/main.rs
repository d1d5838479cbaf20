use color_eyre::{eyre::eyre, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use xbo_controller::driver::{probe, ChannelSink, DriverSettings, SessionStatus, XboDriver};
use xbo_controller::protocol::{ControllerState, HidReport};
use xbo_controller::transport::{NusbDevice, UsbDevice};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let device = find_controller()?;
    info!("Found controller {}", device.identity());

    let driver = XboDriver::create(Box::new(device), Some(DriverSettings::default()))
        .probe()
        .map_err(|e| eyre!("Failed to attach: {}", e))?;

    let (report_sender, report_receiver) = mpsc::channel(1000);
    let driver = driver
        .start(Box::new(ChannelSink::new(report_sender)))
        .await
        .map_err(|e| eyre!("Failed to start driver: {}", e))?;

    let _report_logger = tokio::spawn(log_reports(report_receiver));

    let mut status = driver.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, stopping driver");
            driver.stop().await;
        }
        stopped = status.wait_for(|s| matches!(s, SessionStatus::ReadLoopStopped(_))) => {
            match stopped {
                Ok(s) => warn!("Read loop ended: {:?}", *s),
                Err(e) => warn!("Status channel closed: {}", e),
            }
            driver.terminate().await.stop().await;
        }
    }

    info!("Driver stopped");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = match std::env::var("RUST_LOG").as_deref() {
        Ok("trace") => Level::TRACE,
        Ok("debug") => Level::DEBUG,
        Ok("warn") => Level::WARN,
        Ok("error") => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn find_controller() -> Result<NusbDevice> {
    NusbDevice::list()?
        .into_iter()
        .find(|device| probe(&device.identity()).is_some())
        .ok_or_else(|| eyre!("No supported controller connected"))
}

async fn log_reports(mut receiver: mpsc::Receiver<HidReport>) {
    while let Some(report) = receiver.recv().await {
        let state = ControllerState::from(&report);
        debug!("Raw report: {:02x?}", report.as_bytes());
        info!(
            "hat {:?} buttons {:?} triggers {}/{} left ({}, {}) right ({}, {})",
            state.hat(),
            state.pressed_buttons(),
            state.left_trigger,
            state.right_trigger,
            state.left_stick.x,
            state.left_stick.y,
            state.right_stick.x,
            state.right_stick.y
        );
    }
    debug!("Report channel closed");
}

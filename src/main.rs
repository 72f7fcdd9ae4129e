// src/main.rs - boots the printer object graph and drives it through the lifecycle
mod printer;
mod gcode;
mod motion;
mod hardware;
mod config;
mod file_manager;
mod checkpoint;
mod print_stats;
mod pause_resume;
mod virtual_sd;
mod timelapse;
mod lifecycle;
mod errors;
mod dispatcher;
mod command_router;
mod web;

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use lifecycle::{ExitOutcome, LifecycleError, LifecycleHandler, PrinterLifecycle, RestartHandle};
use printer::Printer;
use web::printer_channel::PrinterRequest;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting Krusty-RS 3D Printer OS");
    tracing::info!("Version: 0.1.0");

    let args: Vec<String> = env::args().collect();
    let config_path = if args.len() > 1 { args[1].clone() } else { "printer.toml".to_string() };

    // Read once up front purely to resolve the liveness token path; the
    // restart loop re-reads the file fresh on every iteration via
    // `build_lifecycle` so config edits take effect across a restart.
    let liveness_path = config::Config::load_config(&config_path)
        .map(|c| c.virtual_sd.liveness_path())
        .unwrap_or_else(|_| std::path::PathBuf::from("printer1_stat"));

    let restart = RestartHandle::new();
    let outcome = PrinterLifecycle::run(
        {
            let config_path = config_path.clone();
            let restart = restart.clone();
            move || build_lifecycle(config_path.clone(), restart.clone())
        },
        restart,
        liveness_path,
    )
    .await;

    match outcome {
        ExitOutcome::Exit | ExitOutcome::Restart => Ok(()),
        ExitOutcome::ErrorExit => Err("printer lifecycle exited with an error".into()),
    }
}

/// Builds a fresh `Printer` + web server + lifecycle handler set from
/// `config_path`. Called once per restart loop iteration so a requested
/// restart gets an entirely new object graph, matching the original
/// system's restart policy.
async fn build_lifecycle(config_path: String, _restart: RestartHandle) -> Result<PrinterLifecycle, LifecycleError> {
    let config = config::Config::load_config(&config_path)
        .map_err(|e| LifecycleError::ConnectFailed(format!("config load failed: {e}")))?;

    let printer_name = if config.printer.printer_name.is_empty() { "Unknown" } else { &config.printer.printer_name };
    tracing::info!("Printer: {} ({})", printer_name, config.printer.kinematics);
    tracing::info!("MCU: {} @ {} baud", config.mcu.serial, config.mcu.baud);

    let printer_index = config.virtual_sd.printer_index();
    let bind_address = if config.web.bind_address.is_empty() {
        "0.0.0.0".to_string()
    } else {
        config.web.bind_address.clone()
    };
    let bind_addr = format!("{bind_address}:{}", config.web.port);

    let printer = Arc::new(
        Printer::new(config)
            .await
            .map_err(|e| LifecycleError::ConnectFailed(format!("printer init failed: {e}")))?,
    );

    let (printer_tx, printer_rx) = mpsc::channel(32);

    let mut lifecycle = PrinterLifecycle::new(printer_index);
    lifecycle.register(Arc::new(PrinterHandler {
        printer,
        printer_rx: Mutex::new(Some(printer_rx)),
        request_task: Mutex::new(None),
    }));
    lifecycle.register(Arc::new(WebServerHandler {
        printer_tx,
        bind_addr,
        server_task: Mutex::new(None),
    }));
    Ok(lifecycle)
}

/// Drives the printer's own connect/shutdown and owns the task that drains
/// web-API requests into `Printer::process_gcode`/`status`.
struct PrinterHandler {
    printer: Arc<Printer>,
    printer_rx: Mutex<Option<mpsc::Receiver<PrinterRequest>>>,
    request_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[async_trait]
impl LifecycleHandler for PrinterHandler {
    async fn on_connect(&self) -> Result<(), LifecycleError> {
        self.printer
            .start()
            .await
            .map_err(|e| LifecycleError::ConnectFailed(e.to_string()))?;

        let printer = self.printer.clone();
        let mut rx = self
            .printer_rx
            .lock()
            .await
            .take()
            .expect("printer request channel taken twice");
        let task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                handle_printer_request(&printer, request).await;
            }
        });
        *self.request_task.lock().await = Some(task);
        Ok(())
    }

    async fn on_shutdown(&self, _reason: &str) -> Result<(), LifecycleError> {
        if let Some(task) = self.request_task.lock().await.take() {
            task.abort();
        }
        self.printer
            .shutdown()
            .await
            .map_err(|e| LifecycleError::ConnectFailed(e.to_string()))?;
        Ok(())
    }
}

async fn handle_printer_request(printer: &Printer, request: PrinterRequest) {
    match request {
        PrinterRequest::GetStatus { respond_to } => {
            let _ = respond_to.send(printer.status().await);
        }
        PrinterRequest::ExecuteGcode { command, respond_to } => {
            let result = printer.process_gcode(&command).await.map(|_| ()).map_err(|e| e.to_string());
            let _ = respond_to.send(result);
        }
        PrinterRequest::PauseJob { respond_to } => {
            let result = printer.process_gcode("PAUSE").await.map(|_| ()).map_err(|e| e.to_string());
            let _ = respond_to.send(result);
        }
        PrinterRequest::ResumeJob { respond_to } => {
            let result = printer.process_gcode("RESUME").await.map(|_| ()).map_err(|e| e.to_string());
            let _ = respond_to.send(result);
        }
        PrinterRequest::CancelJob { respond_to } => {
            let result = printer.process_gcode("CANCEL_PRINT").await.map(|_| ()).map_err(|e| e.to_string());
            let _ = respond_to.send(result);
        }
    }
}

/// Binds the axum listener on connect and aborts the serving task on
/// shutdown so a restart frees the port before the next iteration rebinds.
struct WebServerHandler {
    printer_tx: mpsc::Sender<PrinterRequest>,
    bind_addr: String,
    server_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[async_trait]
impl LifecycleHandler for WebServerHandler {
    async fn on_connect(&self) -> Result<(), LifecycleError> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .map_err(LifecycleError::Io)?;
        tracing::info!("web API listening on {}", self.bind_addr);
        let router = web::api::create_router(self.printer_tx.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("web server exited: {}", e);
            }
        });
        *self.server_task.lock().await = Some(task);
        Ok(())
    }

    async fn on_shutdown(&self, _reason: &str) -> Result<(), LifecycleError> {
        if let Some(task) = self.server_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }
}

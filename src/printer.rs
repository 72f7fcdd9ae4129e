// src/printer.rs (updated with proper hardware integration)
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use crate::checkpoint::CheckpointStore;
use crate::command_router::{CommandRouter, PrinterStatus};
use crate::config::Config;
use crate::dispatcher::GcodeDispatcher;
use crate::errors::CoreError;
use crate::gcode::GCodeProcessor;
use crate::motion::MotionController;
use crate::hardware::HardwareManager;
use crate::pause_resume::{self, PauseResumeController};
use crate::print_stats::PrintStats;
use crate::timelapse::{FrameCapture, NullFrameCapture, TimelapseCoordinator};
use crate::virtual_sd::VirtualSdExecutor;

/// Main printer orchestrator
///
/// This struct coordinates all printer subsystems:
/// - Hardware communication
/// - Motion control
/// - G-code processing
/// - State management
/// - Virtual-sdcard print-job execution (checkpointing, pause/resume,
///   print stats, time-lapse)
pub struct Printer {
    /// Printer configuration
    config: Config,

    /// Shared printer state (position, temperature, etc.)
    state: Arc<RwLock<PrinterState>>,

    /// Motion planning and control
    motion_controller: Arc<RwLock<MotionController>>,

    /// Hardware communication manager
    hardware_manager: Arc<Mutex<HardwareManager>>,

    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,

    /// The command surface (M20/M23/SDCARD_PRINT_FILE/PAUSE/... plus raw
    /// g-code) that every externally-sourced command passes through.
    command_router: CommandRouter,
}

/// Shared printer state accessible by all subsystems
#[derive(Debug, Clone)]
pub struct PrinterState {
    /// Whether printer is fully initialized and ready
    pub ready: bool,

    /// Current toolhead position [X, Y, Z] in mm
    pub position: [f64; 3],

    /// Current hotend temperature in Celsius
    pub temperature: f64,

    /// Current heated-bed temperature in Celsius
    pub bed_temperature: f64,

    /// Current extruder (E axis) position in mm, absolute
    pub extruder_position: f64,

    /// Current fan speed as last set by M106/M107 (0-255, None if unset)
    pub fan_speed: Option<u8>,

    /// Current print progress (0.0 to 1.0)
    pub print_progress: f64,
}

impl Default for PrinterState {
    fn default() -> Self {
        Self {
            ready: false,
            position: [0.0, 0.0, 0.0],
            temperature: 0.0,
            bed_temperature: 0.0,
            extruder_position: 0.0,
            fan_speed: None,
            print_progress: 0.0,
        }
    }
}

impl PrinterState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Printer {
    /// Create a new printer instance
    ///
    /// # Arguments
    /// * `config` - Loaded printer configuration
    pub async fn new(config: Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        // Initialize shared state with default values
        let state = Arc::new(RwLock::new(PrinterState::default()));

        // Create shutdown signal channel
        let (shutdown_tx, _) = broadcast::channel(16);

        // Initialize motion/hardware subsystems
        let hardware_manager = HardwareManager::new(config.clone());
        let motion_controller = Arc::new(RwLock::new(MotionController::new(
            state.clone(),
            hardware_manager.clone(),
            &config,
        )));
        let gcode_processor = GCodeProcessor::new(state.clone(), motion_controller.clone());
        let dispatcher = GcodeDispatcher::new(gcode_processor);

        // Initialize the print-job execution core: checkpointing, print
        // stats, time-lapse coordination and the virtual-sdcard work loop.
        let print_stats = Arc::new(Mutex::new(PrintStats::new()));
        let checkpoint = Arc::new(CheckpointStore::open(config.virtual_sd.checkpoint_path()));
        let capture: Arc<dyn FrameCapture> = Arc::new(NullFrameCapture);
        let timelapse = Arc::new(
            TimelapseCoordinator::load(
                &config.virtual_sd.resolved_timelapse_config(),
                &config.virtual_sd.printer_index(),
                None,
                capture,
            )
            .await,
        );
        let executor = VirtualSdExecutor::with_total_time_path(
            config.virtual_sd.sd_root.clone(),
            config.virtual_sd.total_time_path(),
            config.virtual_sd.print_file_name_path(),
            dispatcher.clone(),
            print_stats,
            checkpoint,
            timelapse,
        );
        let pause_resume = Arc::new(Mutex::new(PauseResumeController::new(
            pause_resume::DEFAULT_RECOVER_VELOCITY,
        )));
        let crash_recovery_enabled = read_print_switch(&config.virtual_sd.print_switch_path()).await;
        let command_router = CommandRouter::new(
            dispatcher,
            executor,
            pause_resume,
            config.virtual_sd.sd_root.clone(),
            crash_recovery_enabled,
        );

        Ok(Self {
            config,
            state,
            motion_controller,
            hardware_manager: Arc::new(Mutex::new(hardware_manager)),
            shutdown_tx,
            command_router,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Routes one externally-sourced command line (web API, webhook, CLI
    /// test harness) through the command surface: sdcard control commands
    /// and PAUSE/RESUME/CANCEL_PRINT/M600 are intercepted, everything else
    /// falls through to the raw g-code dispatcher.
    pub async fn process_gcode(&self, command: &str) -> Result<Option<String>, CoreError> {
        self.command_router.handle(command).await
    }

    /// The composed status view (virtual-sdcard progress, print stats,
    /// pause state) for status endpoints.
    pub async fn status(&self) -> PrinterStatus {
        self.command_router.status().await
    }

    /// Start all printer subsystems
    ///
    /// This method:
    /// 1. Initializes hardware
    /// 2. Starts background processing tasks
    /// 3. Marks printer as ready
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!("Starting printer OS");

        // Initialize hardware (connect to MCU, configure components)
        self.hardware_manager.lock().await.initialize().await?;

        // Start background processing tasks. G-code reaches the motion
        // controller through the dispatcher now, so the old polling
        // queue-drain loop is gone; only hardware I/O and motion planning
        // still need a dedicated tick.
        self.start_hardware_processing_loop();
        self.start_motion_control_loop();

        // Mark printer as ready for operations
        {
            let mut state = self.state.write().await;
            state.ready = true;
        }

        tracing::info!("Printer OS ready and operational");
        Ok(())
    }

    /// Start hardware response processing loop
    ///
    /// This background task continuously processes MCU responses
    /// to prevent blocking and ensure timely handling of messages
    fn start_hardware_processing_loop(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let hardware_manager = self.hardware_manager.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(10));

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Hardware processing loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = hardware_manager.lock().await.process_responses().await {
                            tracing::error!("Hardware processing error: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Start motion control loop
    ///
    /// This high-priority background task handles:
    /// - Motion planning and trajectory generation
    /// - Real-time step generation for motors
    /// - Position tracking and kinematics
    fn start_motion_control_loop(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let motion_controller = self.motion_controller.clone();

        tokio::spawn(async move {
            // 100μs intervals = 10kHz update rate
            let mut interval = tokio::time::interval(tokio::time::Duration::from_micros(100));

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Motion control loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = motion_controller.write().await.update().await {
                            tracing::error!("Motion control error: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Graceful shutdown of all printer systems
    pub async fn shutdown(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!("Initiating printer OS shutdown");

        // Broadcast shutdown signal to all background tasks
        let _ = self.shutdown_tx.send(());

        // Shutdown hardware systems
        self.hardware_manager.lock().await.shutdown().await?;

        tracing::info!("Printer OS shutdown complete");
        Ok(())
    }
}

/// Reads the `{"switch": bool}` crash-recovery gate. A missing file or
/// unparseable contents leaves recovery disarmed rather than failing
/// startup.
async fn read_print_switch(path: &std::path::Path) -> bool {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("switch").and_then(|s| s.as_bool()))
            .unwrap_or(false),
        Err(_) => false,
    }
}

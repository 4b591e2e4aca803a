//! ecfand - EC fan control daemon
//!
//! Replaces the vendor firmware's fan policy on laptops whose Embedded
//! Controller is reachable over the legacy two-port interface. One
//! privileged control thread samples temperatures, runs a self-tuning PID
//! loop and writes the fan duty back; a Unix-socket server lets local
//! clients watch and override it.
//!
//! Startup is phased: configuration, daemonization, logging, the
//! single-instance check, the privilege probe, an EC sanity read, and only
//! then the control thread and IPC server. Any failure before the server
//! starts is fatal with an explanation on stderr.

mod controller;
mod privilege;
mod server;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use ecfan_core::ec::Ec;
use ecfan_core::{Config, Sensors};
use ecfan_error::EcfanError;

use controller::{ControlState, Controller};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// CLI
// ============================================================================

/// EC fan control daemon
#[derive(Debug, Parser)]
#[command(name = "ecfand", version, about)]
struct Cli {
    /// Enable debug tracing of every controller/tuner decision
    /// (implies foreground)
    #[arg(short, long)]
    debug: bool,

    /// Fork into the background after startup checks
    #[arg(short = 'D', long)]
    daemonize: bool,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path (auto-detected per OS when omitted)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Tick period in seconds (0.1-60.0)
    #[arg(short, long)]
    interval: Option<f64>,

    /// Target temperature in °C (40-100)
    #[arg(short, long)]
    target_temp: Option<u8>,

    /// Enable PID control (false selects the proportional-step fallback)
    #[arg(long)]
    pid_enabled: Option<bool>,

    #[arg(long)]
    pid_kp: Option<f64>,
    #[arg(long)]
    pid_ki: Option<f64>,
    #[arg(long)]
    pid_kd: Option<f64>,
    #[arg(long)]
    pid_output_min: Option<f64>,
    #[arg(long)]
    pid_output_max: Option<f64>,

    /// Enable online gain tuning
    #[arg(long)]
    adaptive_enabled: Option<bool>,
    #[arg(long)]
    adaptive_tuning_interval: Option<u32>,
    #[arg(long)]
    adaptive_target_performance: Option<f64>,
    #[arg(long)]
    adaptive_rapid_cycles: Option<u32>,
    #[arg(long)]
    adaptive_rapid_multiplier: Option<f64>,
    #[arg(long)]
    adaptive_steady_threshold: Option<f64>,
    #[arg(long)]
    adaptive_steady_cycles: Option<u32>,

    /// Learning-inhibition thresholds
    #[arg(long)]
    activity_temp_threshold: Option<u8>,
    #[arg(long)]
    activity_fan_threshold: Option<u8>,
    #[arg(long)]
    activity_stable_period: Option<u64>,
    #[arg(long)]
    activity_max_idle_cycles: Option<u32>,
}

impl Cli {
    /// Overlay the command line onto the file/default configuration.
    fn apply_to(&self, mut config: Config) -> Config {
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })*
            };
        }
        overlay!(
            interval,
            target_temp,
            pid_enabled,
            pid_kp,
            pid_ki,
            pid_kd,
            pid_output_min,
            pid_output_max,
            adaptive_enabled,
            adaptive_tuning_interval,
            adaptive_target_performance,
            adaptive_rapid_cycles,
            adaptive_rapid_multiplier,
            adaptive_steady_threshold,
            adaptive_steady_cycles,
            activity_temp_threshold,
            activity_fan_threshold,
            activity_stable_period,
            activity_max_idle_cycles,
        );
        if self.debug {
            config.debug = true;
        }
        config
    }
}

// ============================================================================
// Platform Paths
// ============================================================================

fn get_default_socket_path() -> &'static str {
    if Path::new("/run").exists() {
        "/run/ecfand.sock"
    } else {
        "/var/run/ecfand.sock"
    }
}

fn get_pid_file_path() -> &'static str {
    if Path::new("/run").exists() {
        "/run/ecfand.pid"
    } else {
        "/var/run/ecfand.pid"
    }
}

// ============================================================================
// PID File Management
// ============================================================================

/// Write the PID file, refusing to start when another live instance owns
/// it. The EC ports are a process-exclusive resource, so this check is a
/// correctness requirement rather than a convenience.
fn write_pid_file(path: &str) -> Result<(), EcfanError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    if Path::new(path).exists() {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(old_pid) = content.trim().parse::<i32>() {
                // SAFETY: kill with signal 0 only checks for process
                // existence; it never delivers a signal.
                if unsafe { libc::kill(old_pid, 0) } == 0 {
                    return Err(EcfanError::AlreadyRunning { pid: old_pid });
                }
            }
        }
        // Stale PID file from a dead instance
        let _ = std::fs::remove_file(path);
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;

    debug!("PID file written: {path}");
    Ok(())
}

// ============================================================================
// Daemonization
// ============================================================================

/// Detach from the controlling terminal: fork, new session, root cwd,
/// stdio redirected to /dev/null. Must run before the tokio runtime or
/// the control thread exist.
fn daemonize() -> Result<(), EcfanError> {
    // SAFETY: single-threaded at this point (pre-runtime, pre-control
    // thread), so fork cannot strand any sibling threads.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(EcfanError::Io(std::io::Error::last_os_error()));
    }
    if pid > 0 {
        std::process::exit(0);
    }

    // SAFETY: setsid has no preconditions beyond not being a process
    // group leader, which the fork above guarantees.
    if unsafe { libc::setsid() } < 0 {
        return Err(EcfanError::Io(std::io::Error::last_os_error()));
    }
    std::env::set_current_dir("/")?;

    let devnull = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    // SAFETY: dup2 onto the standard descriptors with a valid fd; the
    // File stays open until the end of this scope, past the last dup2.
    unsafe {
        use std::os::unix::io::AsRawFd;
        libc::dup2(devnull.as_raw_fd(), libc::STDIN_FILENO);
        libc::dup2(devnull.as_raw_fd(), libc::STDOUT_FILENO);
        libc::dup2(devnull.as_raw_fd(), libc::STDERR_FILENO);
    }
    Ok(())
}

// ============================================================================
// Logging
// ============================================================================

fn init_logging(debug: bool) {
    let log_level = if debug {
        "debug".to_string()
    } else {
        std::env::var("ECFAND_LOG").unwrap_or_else(|_| "info".to_string())
    };

    // Prefer journald on systemd hosts, fall back to stdout.
    let use_journald = Path::new("/run/systemd/journal/socket").exists();
    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("journald unavailable ({e}), logging to stdout");
            }
        }
    }
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(&log_level)
        .init();
}

// ============================================================================
// Cleanup
// ============================================================================

fn cleanup(socket_path: &Path, pid_file: &str) {
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!("failed to remove socket: {e}");
        }
    }
    if Path::new(pid_file).exists() {
        if let Err(e) = std::fs::remove_file(pid_file) {
            warn!("failed to remove PID file: {e}");
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    let cli = Cli::parse();

    // PHASE 1: configuration (file first, CLI overrides, then range
    // checks). An explicit --config must exist; the default path may not.
    let file_config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_or_default(Path::new(ecfan_core::config::DEFAULT_CONFIG_PATH)),
    };
    let config = file_config
        .map(|file_config| cli.apply_to(file_config))
        .and_then(Config::sanitize);
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ecfand: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    // PHASE 2: daemonize before any runtime state exists. Debug mode stays
    // in the foreground so the traces land somewhere visible.
    if cli.daemonize && !config.debug {
        if let Err(e) = daemonize() {
            eprintln!("ecfand: daemonize failed: {e}");
            std::process::exit(1);
        }
    }

    // PHASE 3: logging
    init_logging(config.debug);
    info!("STARTUP: ecfand {VERSION} (target {}°C, tick {:.1}s)", config.target_temp, config.interval);

    // PHASE 4: single-instance check
    let pid_file = get_pid_file_path();
    if let Err(e) = write_pid_file(pid_file) {
        error!("{e}");
        std::process::exit(1);
    }

    // PHASE 5: privilege probe
    let bus = match privilege::acquire_ec_access() {
        Ok(bus) => bus,
        Err(e) => {
            error!("{e}");
            let _ = std::fs::remove_file(pid_file);
            std::process::exit(1);
        }
    };

    // PHASE 6: EC sanity read
    let mut sensors = Sensors::new(Ec::new(bus));
    match sensors.sample() {
        Ok(sample) => {
            info!(
                "STARTUP: EC probe ok (CPU {}°C, GPU {}°C, fan {}% / {} RPM)",
                sample.cpu_temp, sample.gpu_temp, sample.fan_duty, sample.fan_rpm
            );
        }
        Err(e) => {
            error!("unable to control EC: {e}");
            let _ = std::fs::remove_file(pid_file);
            std::process::exit(1);
        }
    }

    let socket_path = cli
        .socket
        .clone()
        .unwrap_or_else(|| PathBuf::from(get_default_socket_path()));

    // PHASE 7: shared state and control thread
    let state = Arc::new(ControlState::new(config.target_temp));
    let shutdown = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());

    let control_handle = {
        let controller = Controller::from_sensors(sensors, &config, state.clone());
        let shutdown = shutdown.clone();
        let period = config.tick_period();
        let spawned = std::thread::Builder::new()
            .name("ec-control".into())
            .spawn(move || controller::run_control_loop(controller, shutdown, period));
        match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("failed to spawn control thread: {e}");
                cleanup(&socket_path, pid_file);
                std::process::exit(1);
            }
        }
    };

    // PHASE 8: IPC server on a current-thread runtime, with signal-driven
    // shutdown
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start async runtime: {e}");
            shutdown.store(true, Ordering::SeqCst);
            let _ = control_handle.join();
            cleanup(&socket_path, pid_file);
            std::process::exit(1);
        }
    };

    let server_result = runtime.block_on(async {
        spawn_signal_task(shutdown.clone(), notify.clone());
        server::run_server(socket_path.clone(), state.clone(), shutdown.clone(), notify.clone())
            .await
    });

    // PHASE 9: orderly shutdown - the control loop exits after its current
    // tick, then the socket and PID file go away.
    shutdown.store(true, Ordering::SeqCst);
    if control_handle.join().is_err() {
        warn!("control thread panicked during shutdown");
    }
    cleanup(&socket_path, pid_file);

    match server_result {
        Ok(()) => info!("SHUTDOWN: ecfand terminated gracefully"),
        Err(e) => {
            error!("server error: {e}");
            std::process::exit(1);
        }
    }
}

/// Wake the accept loop and stop the control thread on
/// SIGTERM/SIGINT/SIGQUIT.
fn spawn_signal_task(shutdown: Arc<AtomicBool>, notify: Arc<Notify>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("cannot install SIGTERM handler: {e}");
                return;
            }
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                warn!("cannot install SIGINT handler: {e}");
                return;
            }
        };
        let mut quit = match signal(SignalKind::quit()) {
            Ok(s) => s,
            Err(e) => {
                warn!("cannot install SIGQUIT handler: {e}");
                return;
            }
        };

        let name = tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
            _ = quit.recv() => "SIGQUIT",
        };
        info!("SIGNAL: received {name}, shutting down");
        shutdown.store(true, Ordering::SeqCst);
        notify.notify_one();
    });
}

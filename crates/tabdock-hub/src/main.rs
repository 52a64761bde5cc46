use std::io;
use tabdock_hub::{
    command_queue,
    config::load_config,
    console::{spawn_line_reader, ConsolePanel},
    layout::LayoutMetrics,
    logging::init_logging,
    ui::{RunExit, UiBridge},
    HubError, NetworkThread,
};
use tracing::{error, info};

fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);

    let (queue, commands) = command_queue();
    let (snapshot_tx, inbox) = crossbeam_channel::unbounded();
    let network = match NetworkThread::spawn(config.clone(), commands, snapshot_tx) {
        Ok(value) => value,
        Err(err @ (HubError::InvalidAddr { .. } | HubError::NonLoopback(_))) => {
            error!(event = "invalid_addr", addr = %config.addr, error = %err);
            return;
        }
        Err(err) => {
            error!(event = "hub_error", addr = %config.addr, error = %err);
            return;
        }
    };
    info!(event = "network_ready", addr = %network.local_addr());

    let (input_tx, inputs) = crossbeam_channel::unbounded();
    if let Err(err) = spawn_line_reader(io::BufReader::new(io::stdin()), input_tx) {
        error!(event = "input_error", error = %err);
        let _ = network.stop();
        return;
    }

    let mut panel = ConsolePanel::new(io::stdout(), config.viewport_height);
    let mut bridge = UiBridge::new(queue, config.scheduler(), LayoutMetrics::default());
    if bridge.run(&mut panel, &inbox, &inputs) == RunExit::NetworkClosed {
        info!(event = "network_stopped");
    }
    if let Err(err) = network.stop() {
        error!(event = "hub_error", error = %err);
    }
}

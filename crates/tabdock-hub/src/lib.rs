pub mod broadcast;
pub mod config;
pub mod connection;
pub mod console;
pub mod layout;
pub mod logging;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod ui;

pub use queue::{command_queue, CommandQueue, CommandReceiver};
pub use server::{Hub, HubError, NetworkThread};
pub use ui::{Panel, PanelAction, UiBridge};

//! Panel-side driver. Runs on the UI thread, owns the update scheduler and
//! the group collapse state, and talks to the network thread only through the
//! command queue and the snapshot channel.

use crossbeam_channel::{select, Receiver};
use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    time::{Duration, Instant},
};
use tabdock_core::{wire::Command, GroupId, Snapshot, TabId};
use tracing::{debug, info};

use crate::{
    layout::{resolve_target, GroupState, LayoutMetrics, RenderFrame, ScrollPlacement},
    queue::CommandQueue,
    scheduler::{
        Fire, Ingest, Interaction, ScrollKind, ScrollTarget, SchedulerConfig, UpdateScheduler,
    },
};

/// User gestures on the panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanelAction {
    Activate(TabId),
    Close(TabId),
    Duplicate(TabId),
    TogglePin(TabId),
    CloseOthers(TabId),
    RemoveFromGroup(TabId),
    AddToGroup { tab: TabId, group: GroupId },
    AddToNewGroup(TabId),
    NewTab,
    /// Pointer entered the panel.
    PanelEntered,
    ToggleGroup(GroupId),
    RevealTab(TabId),
    RevealGroup(GroupId),
}

impl PanelAction {
    pub fn name(&self) -> &'static str {
        match self {
            PanelAction::Activate(_) => "activate",
            PanelAction::Close(_) => "close",
            PanelAction::Duplicate(_) => "duplicate",
            PanelAction::TogglePin(_) => "toggle_pin",
            PanelAction::CloseOthers(_) => "close_others",
            PanelAction::RemoveFromGroup(_) => "remove_from_group",
            PanelAction::AddToGroup { .. } => "add_to_group",
            PanelAction::AddToNewGroup(_) => "add_to_new_group",
            PanelAction::NewTab => "new_tab",
            PanelAction::PanelEntered => "panel_entered",
            PanelAction::ToggleGroup(_) => "toggle_group",
            PanelAction::RevealTab(_) => "reveal_tab",
            PanelAction::RevealGroup(_) => "reveal_group",
        }
    }

    pub fn command(&self) -> Option<Command> {
        Some(match *self {
            PanelAction::Activate(id) => Command::Activate { id },
            PanelAction::Close(id) => Command::Close { id },
            PanelAction::Duplicate(id) => Command::Duplicate { id },
            PanelAction::TogglePin(id) => Command::TogglePin { id },
            PanelAction::CloseOthers(id) => Command::CloseOthers { id },
            PanelAction::RemoveFromGroup(id) => Command::RemoveFromGroup { id },
            PanelAction::AddToGroup { tab, group } => Command::AddToGroup {
                id: tab,
                group_id: group,
            },
            PanelAction::AddToNewGroup(id) => Command::AddToNewGroup { id },
            PanelAction::NewTab => Command::NewTab,
            PanelAction::PanelEntered
            | PanelAction::ToggleGroup(_)
            | PanelAction::RevealTab(_)
            | PanelAction::RevealGroup(_) => return None,
        })
    }

    /// Delay before asking the agent for fresh state, giving the browser time
    /// to carry out the command.
    pub fn follow_up(&self) -> Option<Duration> {
        let ms = match self {
            PanelAction::PanelEntered => 20,
            PanelAction::Activate(_)
            | PanelAction::Close(_)
            | PanelAction::TogglePin(_)
            | PanelAction::RemoveFromGroup(_) => 30,
            PanelAction::CloseOthers(_) | PanelAction::AddToGroup { .. } => 50,
            PanelAction::Duplicate(_) => 80,
            PanelAction::AddToNewGroup(_) | PanelAction::NewTab => 100,
            PanelAction::ToggleGroup(_) | PanelAction::RevealTab(_) | PanelAction::RevealGroup(_) => {
                return None
            }
        };
        Some(Duration::from_millis(ms))
    }

    pub fn scroll(&self) -> Option<ScrollKind> {
        match *self {
            PanelAction::AddToGroup { group, .. } => Some(ScrollKind::Group(group)),
            PanelAction::NewTab | PanelAction::PanelEntered => Some(ScrollKind::ActiveTab),
            PanelAction::RevealTab(id) => Some(ScrollKind::Tab(id)),
            PanelAction::RevealGroup(id) => Some(ScrollKind::Group(id)),
            _ => None,
        }
    }
}

/// The render collaborator: whatever actually draws the panel.
pub trait Panel {
    type Input: Send;

    /// Maps a raw input event to a gesture. Inputs that only change local
    /// interaction state return `None`.
    fn on_input(&mut self, input: Self::Input) -> Option<PanelAction>;
    fn interaction(&self) -> Interaction;
    fn viewport_height(&self) -> u32;
    fn render(&mut self, frame: &RenderFrame);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunExit {
    NetworkClosed,
    InputClosed,
}

pub struct UiBridge {
    queue: CommandQueue,
    scheduler: UpdateScheduler,
    groups: GroupState,
    metrics: LayoutMetrics,
    follow_ups: BinaryHeap<Reverse<Instant>>,
    current: Option<RenderFrame>,
}

impl UiBridge {
    pub fn new(queue: CommandQueue, scheduler: SchedulerConfig, metrics: LayoutMetrics) -> Self {
        Self {
            queue,
            scheduler: UpdateScheduler::new(scheduler),
            groups: GroupState::default(),
            metrics,
            follow_ups: BinaryHeap::new(),
            current: None,
        }
    }

    pub fn current(&self) -> Option<&RenderFrame> {
        self.current.as_ref()
    }

    pub fn groups(&self) -> &GroupState {
        &self.groups
    }

    /// Handles a gesture. Local gestures (collapse, reveal) re-render the
    /// current snapshot at once and return the new frame.
    pub fn dispatch(
        &mut self,
        action: PanelAction,
        now: Instant,
        viewport_height: u32,
    ) -> Option<RenderFrame> {
        info!(event = "panel_action", action = action.name());
        match action {
            PanelAction::ToggleGroup(group) => {
                let collapsed = self.groups.toggle(group);
                debug!(event = "group_toggled", group_id = group, collapsed = collapsed);
                let frame = self.current.as_ref()?.relayout(&self.groups, self.metrics);
                self.current = Some(frame.clone());
                return Some(frame);
            }
            PanelAction::RevealTab(_) | PanelAction::RevealGroup(_) => {
                let kind = action.scroll()?;
                return self.reveal(kind, now, viewport_height);
            }
            _ => {}
        }

        if let Some(command) = action.command() {
            self.queue.enqueue(command);
        }
        self.scheduler.force_update();
        if let Some(kind) = action.scroll() {
            self.scheduler.request_scroll(kind, now);
        }
        if let Some(delay) = action.follow_up() {
            self.follow_ups.push(Reverse(now + delay));
        }
        None
    }

    fn reveal(&mut self, kind: ScrollKind, now: Instant, viewport_height: u32) -> Option<RenderFrame> {
        let Some(current) = self.current.as_ref() else {
            self.scheduler.request_scroll(kind, now);
            return None;
        };
        let target = ScrollTarget {
            kind,
            issued_at: now,
        };
        let resolved = resolve_target(Some(target), &current.snapshot, &mut self.groups)?;
        let mut frame = current.relayout(&self.groups, self.metrics);
        frame.scroll = ScrollPlacement::center(resolved, &frame.layout, viewport_height);
        self.current = Some(frame.clone());
        Some(frame)
    }

    pub fn ingest(&mut self, snapshot: Snapshot, now: Instant) -> Ingest {
        self.scheduler.ingest(snapshot, now)
    }

    /// Fires every timer that is due at `now`. Returns a frame when a pending
    /// snapshot was applied.
    pub fn tick(
        &mut self,
        now: Instant,
        interaction: Interaction,
        viewport_height: u32,
    ) -> Option<RenderFrame> {
        while let Some(Reverse(due)) = self.follow_ups.peek().copied() {
            if due > now {
                break;
            }
            self.follow_ups.pop();
            debug!(event = "follow_up_request");
            self.queue.enqueue(Command::RequestUpdate);
        }

        match self.scheduler.fire(now, interaction) {
            Fire::Apply(update) => {
                let frame =
                    RenderFrame::compose(update, &mut self.groups, self.metrics, viewport_height);
                info!(
                    event = "update_applied",
                    tabs = frame.tab_count,
                    forced = frame.forced,
                    scroll = ?frame.scroll
                );
                self.current = Some(frame.clone());
                Some(frame)
            }
            Fire::Idle | Fire::NotDue { .. } | Fire::Deferred { .. } => None,
        }
    }

    /// Earliest instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let follow_up = self.follow_ups.peek().map(|Reverse(due)| *due);
        match (self.scheduler.deadline(), follow_up) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Event loop for the UI thread. Returns when either side hangs up.
    pub fn run<P: Panel>(
        &mut self,
        panel: &mut P,
        inbox: &Receiver<Snapshot>,
        inputs: &Receiver<P::Input>,
    ) -> RunExit {
        info!(event = "ui_start");
        let exit = loop {
            let timer = match self.next_deadline() {
                Some(deadline) => crossbeam_channel::at(deadline),
                None => crossbeam_channel::never(),
            };
            select! {
                recv(inbox) -> msg => match msg {
                    Ok(snapshot) => {
                        self.ingest(snapshot, Instant::now());
                    }
                    Err(_) => break RunExit::NetworkClosed,
                },
                recv(inputs) -> msg => match msg {
                    Ok(input) => {
                        if let Some(action) = panel.on_input(input) {
                            let frame = self.dispatch(action, Instant::now(), panel.viewport_height());
                            if let Some(frame) = frame {
                                panel.render(&frame);
                            }
                        }
                    }
                    Err(_) => break RunExit::InputClosed,
                },
                recv(timer) -> _ => {}
            }
            if let Some(frame) = self.tick(Instant::now(), panel.interaction(), panel.viewport_height()) {
                panel.render(&frame);
            }
        };
        info!(event = "ui_stop", reason = ?exit);
        exit
    }
}

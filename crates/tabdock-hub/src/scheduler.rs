//! Debounced snapshot ingestion for the panel thread.
//!
//! The scheduler never reads the clock itself; every call takes `now`, and the
//! owner fires it at [`UpdateScheduler::deadline`]. There is a single deadline,
//! so re-arming the debounce timer or extending it for the interaction gate
//! simply replaces it.

use std::time::{Duration, Instant};
use tabdock_core::{GroupId, Snapshot, SnapshotDigest, TabId};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    pub gate_retry: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(150),
            gate_retry: Duration::from_millis(500),
        }
    }
}

/// What the panel is doing with the pointer right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Interaction {
    pub menu_open: bool,
    pub hovered: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateReason {
    MenuOpen,
    Hover,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateReason::MenuOpen => "menu_open",
            GateReason::Hover => "hover",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollKind {
    ActiveTab,
    Tab(TabId),
    Group(GroupId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScrollTarget {
    pub kind: ScrollKind,
    pub issued_at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ingest {
    /// Same content as the last accepted snapshot; dropped.
    Duplicate,
    /// Timer armed from idle.
    Scheduled { deadline: Instant },
    /// Replaced a pending snapshot and restarted the timer.
    Coalesced { deadline: Instant },
}

#[derive(Debug, PartialEq, Eq)]
pub struct Update {
    pub snapshot: Snapshot,
    pub scroll: Option<ScrollTarget>,
    pub forced: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Fire {
    Idle,
    NotDue { deadline: Instant },
    Deferred { until: Instant, reason: GateReason },
    Apply(Update),
}

#[derive(Debug)]
enum State {
    Idle,
    Debouncing { pending: Snapshot, deadline: Instant },
}

#[derive(Debug, Default)]
struct ScrollRequests {
    active: Option<Instant>,
    tab: Option<(TabId, Instant)>,
    group: Option<(GroupId, Instant)>,
}

impl ScrollRequests {
    /// Highest priority request wins. Lower priority requests issued no later
    /// than the winner are superseded and dropped with it.
    fn take(&mut self) -> Option<ScrollTarget> {
        let winner = if let Some(issued_at) = self.active.take() {
            ScrollTarget {
                kind: ScrollKind::ActiveTab,
                issued_at,
            }
        } else if let Some((id, issued_at)) = self.tab.take() {
            ScrollTarget {
                kind: ScrollKind::Tab(id),
                issued_at,
            }
        } else if let Some((id, issued_at)) = self.group.take() {
            ScrollTarget {
                kind: ScrollKind::Group(id),
                issued_at,
            }
        } else {
            return None;
        };
        if matches!(self.tab, Some((_, at)) if at <= winner.issued_at) {
            self.tab = None;
        }
        if matches!(self.group, Some((_, at)) if at <= winner.issued_at) {
            self.group = None;
        }
        Some(winner)
    }
}

#[derive(Debug)]
pub struct UpdateScheduler {
    config: SchedulerConfig,
    state: State,
    last_digest: Option<SnapshotDigest>,
    force: bool,
    scroll: ScrollRequests,
}

impl UpdateScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            state: State::Idle,
            last_digest: None,
            force: false,
            scroll: ScrollRequests::default(),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Compares against the most recently accepted snapshot, pending or
    /// applied, so a burst that returns to an earlier state still lands.
    pub fn ingest(&mut self, snapshot: Snapshot, now: Instant) -> Ingest {
        let digest = snapshot.digest();
        if self.last_digest == Some(digest) {
            debug!(event = "snapshot_duplicate", digest = %digest.short());
            return Ingest::Duplicate;
        }
        self.last_digest = Some(digest);
        let deadline = now + self.config.debounce;
        let coalesced = matches!(self.state, State::Debouncing { .. });
        self.state = State::Debouncing {
            pending: snapshot,
            deadline,
        };
        debug!(
            event = "snapshot_pending",
            digest = %digest.short(),
            coalesced = coalesced
        );
        if coalesced {
            Ingest::Coalesced { deadline }
        } else {
            Ingest::Scheduled { deadline }
        }
    }

    /// Set by direct user actions: the next apply goes through even while the
    /// pointer is over the panel.
    pub fn force_update(&mut self) {
        self.force = true;
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub fn request_scroll(&mut self, kind: ScrollKind, now: Instant) {
        match kind {
            ScrollKind::ActiveTab => self.scroll.active = Some(now),
            ScrollKind::Tab(id) => self.scroll.tab = Some((id, now)),
            ScrollKind::Group(id) => self.scroll.group = Some((id, now)),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            State::Idle => None,
            State::Debouncing { deadline, .. } => Some(*deadline),
        }
    }

    pub fn has_pending(&self) -> bool {
        matches!(self.state, State::Debouncing { .. })
    }

    pub fn fire(&mut self, now: Instant, interaction: Interaction) -> Fire {
        let (pending, deadline) = match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => return Fire::Idle,
            State::Debouncing { pending, deadline } => (pending, deadline),
        };
        if now < deadline {
            self.state = State::Debouncing { pending, deadline };
            return Fire::NotDue { deadline };
        }
        if let Some(reason) = self.gate(interaction) {
            let until = now + self.config.gate_retry;
            self.state = State::Debouncing {
                pending,
                deadline: until,
            };
            debug!(
                event = "update_deferred",
                reason = reason.as_str(),
                retry_ms = self.config.gate_retry.as_millis() as u64
            );
            return Fire::Deferred { until, reason };
        }
        let forced = std::mem::take(&mut self.force);
        let scroll = self.scroll.take();
        Fire::Apply(Update {
            snapshot: pending,
            scroll,
            forced,
        })
    }

    fn gate(&self, interaction: Interaction) -> Option<GateReason> {
        if interaction.menu_open {
            return Some(GateReason::MenuOpen);
        }
        if interaction.hovered && !self.force {
            return Some(GateReason::Hover);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabdock_core::Tab;

    const DEBOUNCE: Duration = Duration::from_millis(150);
    const RETRY: Duration = Duration::from_millis(500);

    fn scheduler() -> UpdateScheduler {
        UpdateScheduler::new(SchedulerConfig {
            debounce: DEBOUNCE,
            gate_retry: RETRY,
        })
    }

    fn snapshot(active: bool) -> Snapshot {
        Snapshot {
            tabs: vec![Tab {
                id: 1,
                title: "A".to_string(),
                fav_icon: None,
                active,
                group_id: None,
                pinned: false,
            }],
            groups: Vec::new(),
        }
    }

    fn titled(title: &str) -> Snapshot {
        let mut value = snapshot(true);
        value.tabs[0].title = title.to_string();
        value
    }

    fn ms(base: Instant, offset: u64) -> Instant {
        base + Duration::from_millis(offset)
    }

    fn applied(fire: Fire) -> Update {
        match fire {
            Fire::Apply(update) => update,
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn identical_snapshot_is_a_no_op() {
        let t0 = Instant::now();
        let mut scheduler = scheduler();
        let parsed_a: Snapshot = serde_json::from_str(
            r#"{"tabs":[{"id":1,"title":"A","active":true,"groupId":-1,"pinned":false}],"groups":[]}"#,
        )
        .expect("parse");
        let parsed_b: Snapshot = serde_json::from_str(
            r#"{"groups":[],"tabs":[{"pinned":false,"groupId":-1,"active":true,"title":"A","id":1}]}"#,
        )
        .expect("parse");

        assert!(matches!(
            scheduler.ingest(parsed_a, t0),
            Ingest::Scheduled { .. }
        ));
        let update = applied(scheduler.fire(ms(t0, 150), Interaction::default()));
        assert_eq!(update.snapshot, snapshot(true));

        assert_eq!(scheduler.ingest(parsed_b, ms(t0, 200)), Ingest::Duplicate);
        assert_eq!(scheduler.deadline(), None);
        assert_eq!(
            scheduler.fire(ms(t0, 1_000), Interaction::default()),
            Fire::Idle
        );

        assert!(matches!(
            scheduler.ingest(snapshot(false), ms(t0, 1_100)),
            Ingest::Scheduled { .. }
        ));
        let update = applied(scheduler.fire(ms(t0, 1_250), Interaction::default()));
        assert!(!update.snapshot.tabs[0].active);
    }

    #[test]
    fn burst_keeps_only_the_latest_snapshot() {
        let t0 = Instant::now();
        let mut scheduler = scheduler();
        scheduler.ingest(titled("one"), t0);
        scheduler.ingest(titled("two"), ms(t0, 50));
        let third = scheduler.ingest(titled("three"), ms(t0, 100));
        assert_eq!(
            third,
            Ingest::Coalesced {
                deadline: ms(t0, 250)
            }
        );

        assert_eq!(
            scheduler.fire(ms(t0, 150), Interaction::default()),
            Fire::NotDue {
                deadline: ms(t0, 250)
            }
        );
        let update = applied(scheduler.fire(ms(t0, 250), Interaction::default()));
        assert_eq!(update.snapshot.tabs[0].title, "three");
        assert_eq!(
            scheduler.fire(ms(t0, 900), Interaction::default()),
            Fire::Idle
        );
    }

    #[test]
    fn burst_returning_to_applied_state_still_applies() {
        let t0 = Instant::now();
        let mut scheduler = scheduler();
        scheduler.ingest(titled("one"), t0);
        applied(scheduler.fire(ms(t0, 150), Interaction::default()));

        scheduler.ingest(titled("two"), ms(t0, 200));
        scheduler.ingest(titled("one"), ms(t0, 220));
        let update = applied(scheduler.fire(ms(t0, 370), Interaction::default()));
        assert_eq!(update.snapshot.tabs[0].title, "one");
    }

    #[test]
    fn hover_defers_until_it_clears() {
        let t0 = Instant::now();
        let mut scheduler = scheduler();
        let hovered = Interaction {
            hovered: true,
            menu_open: false,
        };
        scheduler.ingest(snapshot(true), t0);

        let mut now = ms(t0, 150);
        for _ in 0..5 {
            match scheduler.fire(now, hovered) {
                Fire::Deferred { until, reason } => {
                    assert_eq!(reason, GateReason::Hover);
                    assert_eq!(until, now + RETRY);
                    assert_eq!(scheduler.deadline(), Some(until));
                    now = until;
                }
                other => panic!("expected deferral, got {other:?}"),
            }
        }
        let update = applied(scheduler.fire(now, Interaction::default()));
        assert!(!update.forced);
    }

    #[test]
    fn force_bypasses_hover_but_not_open_menu() {
        let t0 = Instant::now();
        let mut scheduler = scheduler();
        scheduler.ingest(snapshot(true), t0);
        scheduler.force_update();

        let menu = Interaction {
            menu_open: true,
            hovered: true,
        };
        assert_eq!(
            scheduler.fire(ms(t0, 150), menu),
            Fire::Deferred {
                until: ms(t0, 650),
                reason: GateReason::MenuOpen
            }
        );
        assert!(scheduler.is_forced());

        let hovered = Interaction {
            menu_open: false,
            hovered: true,
        };
        let update = applied(scheduler.fire(ms(t0, 650), hovered));
        assert!(update.forced);
        assert!(!scheduler.is_forced());
    }

    #[test]
    fn force_flag_set_during_deferral_lets_next_fire_apply() {
        let t0 = Instant::now();
        let mut scheduler = scheduler();
        let hovered = Interaction {
            menu_open: false,
            hovered: true,
        };
        scheduler.ingest(snapshot(true), t0);
        assert!(matches!(
            scheduler.fire(ms(t0, 150), hovered),
            Fire::Deferred { .. }
        ));
        scheduler.force_update();
        assert!(matches!(
            scheduler.fire(ms(t0, 650), hovered),
            Fire::Apply(_)
        ));
    }

    #[test]
    fn only_one_deadline_is_ever_pending() {
        let t0 = Instant::now();
        let mut scheduler = scheduler();
        assert_eq!(scheduler.deadline(), None);
        scheduler.ingest(titled("a"), t0);
        assert_eq!(scheduler.deadline(), Some(ms(t0, 150)));
        scheduler.ingest(titled("b"), ms(t0, 100));
        assert_eq!(scheduler.deadline(), Some(ms(t0, 250)));
        applied(scheduler.fire(ms(t0, 250), Interaction::default()));
        assert_eq!(scheduler.deadline(), None);
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn scroll_priority_prefers_active_tab() {
        let t0 = Instant::now();
        let mut scheduler = scheduler();
        scheduler.request_scroll(ScrollKind::Group(4), t0);
        scheduler.request_scroll(ScrollKind::Tab(9), ms(t0, 1));
        scheduler.request_scroll(ScrollKind::ActiveTab, ms(t0, 2));

        scheduler.ingest(titled("a"), ms(t0, 3));
        let update = applied(scheduler.fire(ms(t0, 200), Interaction::default()));
        assert_eq!(
            update.scroll,
            Some(ScrollTarget {
                kind: ScrollKind::ActiveTab,
                issued_at: ms(t0, 2)
            })
        );

        scheduler.ingest(titled("b"), ms(t0, 300));
        let update = applied(scheduler.fire(ms(t0, 500), Interaction::default()));
        assert_eq!(update.scroll, None);
    }

    #[test]
    fn later_lower_priority_request_survives_the_winner() {
        let t0 = Instant::now();
        let mut scheduler = scheduler();
        scheduler.request_scroll(ScrollKind::Tab(9), t0);
        scheduler.request_scroll(ScrollKind::Group(4), ms(t0, 5));

        scheduler.ingest(titled("a"), ms(t0, 10));
        let first = applied(scheduler.fire(ms(t0, 200), Interaction::default()));
        assert_eq!(first.scroll.map(|target| target.kind), Some(ScrollKind::Tab(9)));

        scheduler.ingest(titled("b"), ms(t0, 300));
        let second = applied(scheduler.fire(ms(t0, 500), Interaction::default()));
        assert_eq!(
            second.scroll.map(|target| target.kind),
            Some(ScrollKind::Group(4))
        );
    }

    #[test]
    fn deferral_keeps_scroll_request_for_the_eventual_apply() {
        let t0 = Instant::now();
        let mut scheduler = scheduler();
        scheduler.request_scroll(ScrollKind::Group(2), t0);
        scheduler.ingest(titled("a"), t0);
        let menu = Interaction {
            menu_open: true,
            hovered: false,
        };
        assert!(matches!(
            scheduler.fire(ms(t0, 150), menu),
            Fire::Deferred { .. }
        ));
        let update = applied(scheduler.fire(ms(t0, 650), Interaction::default()));
        assert_eq!(
            update.scroll.map(|target| target.kind),
            Some(ScrollKind::Group(2))
        );
    }
}

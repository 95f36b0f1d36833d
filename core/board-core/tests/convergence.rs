//! Two terminals converging through a shared authority.
//!
//! The authority here is in-process; transports are recording stand-ins whose
//! outbound updates are relayed by hand, so each sync cycle is explicit.

use vitalboard_core::testing::{at, LoopbackAuthority, ManualScheduler, RecordingTransport};
use vitalboard_core::{BoardConfig, Key, RemoteEvent, SessionEvent, SyncMode, TerminalSession};
use vitalboard_protocol::{ButtonUnit, StateSnapshot};

struct Terminal {
    session: TerminalSession,
    transport: RecordingTransport,
    scheduler: ManualScheduler,
}

impl Terminal {
    fn new(mode: SyncMode) -> Self {
        let transport = RecordingTransport::new(mode);
        let scheduler = ManualScheduler::new();
        let mut session = TerminalSession::new(
            &BoardConfig {
                mode,
                ..BoardConfig::default()
            },
            Box::new(transport.clone()),
            Box::new(scheduler.clone()),
        );
        session.start().unwrap();
        Self {
            session,
            transport,
            scheduler,
        }
    }

    fn type_line(&mut self, line: &str) {
        let now = at(2025, 9, 30, 17, 0);
        for ch in line.chars() {
            self.session.handle(SessionEvent::Key(Key::Char(ch)), now);
        }
        self.session.handle(SessionEvent::Key(Key::Enter), now);
    }

    fn receive(&mut self, event: RemoteEvent) {
        self.session
            .handle(SessionEvent::Remote(event), at(2025, 9, 30, 17, 0));
    }

    /// Relays everything this terminal sent to the authority.
    fn flush_to(&self, authority: &mut LoopbackAuthority) {
        authority.accept(self.transport.take_updates());
    }
}

fn seed() -> StateSnapshot {
    serde_json::from_value(serde_json::json!({
        "last_measure": "【前回の測定】 2025年9月30日 16時30分",
        "next_measure": "【次回測定予定】 4時間後",
        "pulse": "125",
        "oxygen": "98％",
        "condition": "良い",
        "sleep_yote": "12時30分",
        "sleep_fact": "12時30分",
        "wake_yote": "12時30分",
        "wake_fact": "12時30分",
        "button_state": {
            "text": "緊急開錠ボタン",
            "is_locked_open": false,
            "class": "",
            "en_color": "transparent"
        }
    }))
    .unwrap()
}

#[test]
fn oxygen_typed_on_one_terminal_shows_on_the_other_after_one_pull() {
    let mut authority = LoopbackAuthority::new(seed());
    let mut a = Terminal::new(SyncMode::Pull);
    let mut b = Terminal::new(SyncMode::Pull);
    a.receive(authority.fetch());
    b.receive(authority.fetch());
    assert_eq!(b.session.store().oxygen_display(), "98%");

    a.type_line("o91");
    assert_eq!(a.session.store().oxygen_display(), "91%");
    assert_eq!(b.session.store().oxygen_display(), "98%");

    a.flush_to(&mut authority);
    b.receive(authority.fetch());
    assert_eq!(b.session.store().oxygen_display(), "91%");
    assert_eq!(authority.state().oxygen, "91");
}

#[test]
fn pushed_field_applies_on_peer_and_echo_is_stable() {
    let mut authority = LoopbackAuthority::new(seed());
    let mut a = Terminal::new(SyncMode::Push);
    let mut b = Terminal::new(SyncMode::Push);
    a.receive(RemoteEvent::Snapshot(authority.state().clone()));
    b.receive(RemoteEvent::Snapshot(authority.state().clone()));

    a.type_line("sz22/5");
    // Each typed char is mirrored to B's echo line.
    for ch in a.transport.take_keystrokes() {
        b.receive(RemoteEvent::Keystroke(ch));
    }
    assert_eq!(b.session.input().echo_text(), "s, z, 2, 2, /, 5");

    let sent = a.transport.updates();
    a.flush_to(&mut authority);
    let before = a.session.store().snapshot();
    for update in sent {
        b.receive(RemoteEvent::Field(update.clone()));
        // The authority broadcasts to peers; applying our own again is harmless.
        a.receive(RemoteEvent::Field(update));
    }
    assert_eq!(a.session.store().snapshot(), before);
    assert_eq!(b.session.store().schedule().sleep_actual, "22時05分");
    assert_eq!(authority.state().sleep_fact, "22時05分");
}

#[test]
fn snapshot_round_trip_preserves_fields() {
    let mut a = Terminal::new(SyncMode::Pull);
    a.receive(RemoteEvent::Snapshot(seed()));

    let mirrored = a.session.store().snapshot();
    let mut expected = seed();
    expected.oxygen = "98".to_string();
    expected.next_measure = "【次回測定予定】 20時30分".to_string();
    assert_eq!(mirrored, expected);

    a.receive(RemoteEvent::Snapshot(mirrored.clone()));
    assert_eq!(a.session.store().snapshot(), mirrored);
}

#[test]
fn button_commit_reaches_peer_as_one_unit() {
    let mut authority = LoopbackAuthority::new(seed());
    let mut a = Terminal::new(SyncMode::Push);
    let mut b = Terminal::new(SyncMode::Push);
    a.receive(authority.fetch());
    b.receive(authority.fetch());

    let now = at(2025, 9, 30, 17, 0);
    a.session.handle(SessionEvent::ActivateButton, now);
    assert!(a.transport.updates().is_empty());
    let token = a.scheduler.fire_next().unwrap();
    a.session.handle(SessionEvent::Timer(token), now);

    let sent = a.transport.updates();
    assert_eq!(sent.len(), 1);
    a.flush_to(&mut authority);
    assert_eq!(authority.state().button_state, ButtonUnit::locked());

    b.receive(RemoteEvent::Button(authority.state().button_state.clone()));
    let on_b = b.session.store().button();
    assert!(on_b.locked);
    assert!(on_b.is_consistent());
    assert_eq!(b.session.store().feedback(), None);
}

#[test]
fn unparseable_last_measure_falls_back_to_sentinel() {
    let mut a = Terminal::new(SyncMode::Pull);
    let mut snapshot = seed();
    snapshot.last_measure = "not a time".to_string();
    a.receive(RemoteEvent::Snapshot(snapshot));

    let next = a.session.store().next_measurement();
    assert_eq!(next.label, "【次回測定予定】 4時間後");
    assert!(!next.overdue);
}

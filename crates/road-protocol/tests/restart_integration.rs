/// Integration tests: keep persistence across stack restarts.
///
/// A restarted stack keeps its identity and every `joined` relationship,
/// but sessions and liveness start over.
mod common;

use common::{addr, main_config, Sim};
use road_protocol::{AutoMode, MemoryKeep, SqliteKeep, StackConfig, StackEvent, Tristate};

#[test]
fn restart_preserves_joined_and_resets_session_flags() {
    let sim = Sim::new();
    let keep = MemoryKeep::new();
    let mut main = sim.stack(main_config("main", AutoMode::Always), 7530);
    let mut other = sim.stack_with_keep(StackConfig::new("other"), 7531, Box::new(keep.clone()));

    let uid = other.join_addr(addr(7530), true).unwrap();
    sim.service(&mut [&mut main, &mut other], 10);
    let local_uid = other.local().uid();
    let verify_key = other.local().verify_key();
    let far_uid = other.remote(uid).unwrap().far_uid();
    assert_ne!(local_uid, 0);
    drop(other);

    // Config differs from what the keep holds: the keep wins
    let other = sim.stack_with_keep(StackConfig::new("renamed"), 7531, Box::new(keep));
    assert_eq!(other.local().name(), "other");
    assert_eq!(other.local().uid(), local_uid);
    assert_eq!(other.local().verify_key(), verify_key);

    let remote = other.remote(uid).unwrap();
    assert_eq!(remote.name(), "main");
    assert_eq!(remote.far_uid(), far_uid);
    assert_eq!(remote.joined(), Tristate::True);
    assert_eq!(remote.allowed(), Tristate::Unknown);
    assert_eq!(remote.alived(), Tristate::Unknown);
    assert!(!remote.has_session());
    assert!(remote.verify_key().is_some());
}

/// After the main reboots it still knows the joiner but has no session;
/// the joiner's next probe is refused as unallowed and renews the allow.
#[test]
fn probe_after_main_restart_renews_allow() {
    let sim = Sim::new();
    let keep = MemoryKeep::new();
    let mut main = sim.stack_with_keep(main_config("main", AutoMode::Always), 7530, Box::new(keep.clone()));
    let mut other = sim.stack(StackConfig::new("other"), 7531);

    let uid = other.join_addr(addr(7530), true).unwrap();
    sim.service(&mut [&mut main, &mut other], 10);
    drop(main);

    let mut main = sim.stack_with_keep(main_config("main", AutoMode::Never), 7530, Box::new(keep));
    let back = main.remote_by_name("other").unwrap().uid();
    assert_eq!(main.remote(back).unwrap().joined(), Tristate::True);
    assert!(!main.remote(back).unwrap().has_session());

    other.alive(Some(uid), false).unwrap();
    let events = sim.service(&mut [&mut main, &mut other], 15);

    assert!(events[1].contains(&StackEvent::Allowed { uid }));
    assert!(!events[1].iter().any(|e| matches!(e, StackEvent::Rejected { .. })));
    for (stack, remote) in [(&main, back), (&other, uid)] {
        let remote = stack.remote(remote).unwrap();
        assert_eq!(
            (remote.joined(), remote.allowed(), remote.alived()),
            (Tristate::True, Tristate::True, Tristate::True)
        );
    }
    // No rejoin was needed
    assert!(!events[1].contains(&StackEvent::Joined { uid }));
}

/// A main that forgot the joiner answers unjoined; the joiner rejoins once
/// and picks up the new far uid.
#[test]
fn probe_to_forgetful_main_renews_join() {
    let sim = Sim::new();
    let mut main = sim.stack(main_config("main", AutoMode::Always), 7530);
    let mut other = sim.stack(StackConfig::new("other"), 7531);

    let uid = other.join_addr(addr(7530), true).unwrap();
    sim.service(&mut [&mut main, &mut other], 10);
    let old = main.remote_by_name("other").unwrap().uid();
    main.remove_remote(old).unwrap();

    other.alive(Some(uid), false).unwrap();
    let events = sim.service(&mut [&mut main, &mut other], 15);

    assert_eq!(
        events[1],
        vec![
            StackEvent::Joined { uid },
            StackEvent::Allowed { uid },
            StackEvent::Alived { uid },
        ]
    );
    let renewed = main.remote_by_name("other").unwrap();
    assert_ne!(renewed.uid(), old);
    assert_eq!(other.remote(uid).unwrap().far_uid(), renewed.uid());
    assert_eq!(other.remote(uid).unwrap().alived(), Tristate::True);
}

/// A renewed join that the main refuses ends the chain.
#[test]
fn refused_renewal_is_final() {
    let sim = Sim::new();
    let mut main = sim.stack(main_config("main", AutoMode::Always), 7530);
    let mut other = sim.stack(StackConfig::new("other"), 7531);

    let uid = other.join_addr(addr(7530), true).unwrap();
    sim.service(&mut [&mut main, &mut other], 10);

    // Main refuses every newcomer from now on
    main.set_auto(AutoMode::Never).unwrap();
    let old = main.remote_by_name("other").unwrap().uid();
    main.remove_remote(old).unwrap();

    other.alive(Some(uid), false).unwrap();
    let events = sim.service(&mut [&mut main, &mut other], 15);

    assert!(matches!(
        events[1].as_slice(),
        [StackEvent::Rejected { kind: road_protocol::Kind::Join, .. }]
    ));
    assert_eq!(other.remote(uid).unwrap().joined(), Tristate::Unknown);
    assert_eq!(other.transaction_count(), 0);
}

#[test]
fn sqlite_keep_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("other.sqlite");
    let sim = Sim::new();
    let mut main = sim.stack(main_config("main", AutoMode::Once), 7530);

    let other_keep = SqliteKeep::open(&path).unwrap();
    let mut other = sim.stack_with_keep(StackConfig::new("other"), 7531, Box::new(other_keep));
    let uid = other.join_addr(addr(7530), true).unwrap();
    sim.service(&mut [&mut main, &mut other], 10);
    let far_uid = other.remote(uid).unwrap().far_uid();
    drop(other);

    let mut other = sim.stack_with_keep(
        StackConfig::new("other"),
        7531,
        Box::new(SqliteKeep::open(&path).unwrap()),
    );
    let remote = other.remote_by_name("main").unwrap();
    assert_eq!(remote.uid(), uid);
    assert_eq!(remote.far_uid(), far_uid);
    assert_eq!(remote.joined(), Tristate::True);
    assert_eq!(remote.allowed(), Tristate::Unknown);

    // Main used up its one auto-accept; the restored join needs no new admission
    other.alive(Some(uid), false).unwrap();
    sim.service(&mut [&mut main, &mut other], 10);
    assert_eq!(other.remote(uid).unwrap().alived(), Tristate::True);
}

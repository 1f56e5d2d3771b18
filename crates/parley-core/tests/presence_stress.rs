use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use parley_core::outbox::Outbox;
use parley_core::presence::PresenceRegistry;
use parley_models::gateway::{PresenceStatus, ServerEvent};
use parley_models::ids::{ConnectionId, UserId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WORKERS: u64 = 8;
const OPS_PER_WORKER: usize = 400;
const USERS: [&str; 4] = ["u0", "u1", "u2", "u3"];

#[test]
fn concurrent_register_and_close_keep_presence_consistent() {
    let registry = Arc::new(PresenceRegistry::new(usize::MAX));
    let observer_id = UserId::from("observer");
    let (observer, mut observer_rx) = Outbox::channel(ConnectionId::new(), 1_000_000);
    registry.register(&observer_id, observer).unwrap();

    // Each worker returns the connections it left open.
    let leftovers: Vec<Vec<(UserId, ConnectionId)>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|seed| {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let mut open: Vec<(UserId, ConnectionId)> = Vec::new();
                    // Receivers must outlive their outboxes' registrations.
                    let mut receivers = Vec::new();
                    for _ in 0..OPS_PER_WORKER {
                        if open.is_empty() || rng.gen_bool(0.55) {
                            let user = UserId::from(USERS[rng.gen_range(0..USERS.len())]);
                            let (outbox, rx) = Outbox::channel(ConnectionId::new(), 4096);
                            let id = outbox.connection_id();
                            registry.register(&user, outbox).unwrap();
                            receivers.push(rx);
                            open.push((user, id));
                        } else {
                            let (user, id) = open.swap_remove(rng.gen_range(0..open.len()));
                            registry.unregister(&user, id);
                        }
                    }
                    open
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let expected: HashSet<UserId> = leftovers
        .iter()
        .flatten()
        .map(|(user, _)| user.clone())
        .chain([observer_id.clone()])
        .collect();
    let online: HashSet<UserId> = registry.snapshot().into_iter().collect();
    assert_eq!(online, expected);
    assert_eq!(
        registry.connection_count(),
        leftovers.iter().map(Vec::len).sum::<usize>() + 1
    );

    // The observer saw a strictly alternating online/offline stream per user.
    let mut last: HashMap<UserId, PresenceStatus> = HashMap::new();
    while let Ok(event) = observer_rx.try_recv() {
        let ServerEvent::UserStatus(status) = event else {
            continue;
        };
        let previous = last.insert(status.user_id.clone(), status.status);
        match status.status {
            PresenceStatus::Online => assert_ne!(previous, Some(PresenceStatus::Online)),
            PresenceStatus::Offline => assert_eq!(previous, Some(PresenceStatus::Online)),
        }
    }
    for user in USERS {
        let user = UserId::from(user);
        let seen_online = last.get(&user) == Some(&PresenceStatus::Online);
        assert_eq!(seen_online, expected.contains(&user), "{user}");
    }
}

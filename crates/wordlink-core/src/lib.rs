pub mod channel;
pub mod identity;
pub mod net;
pub mod participant;
pub mod room;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::identity::ConnectionId;
    use crate::participant::{Participant, Role};

    /// Create `n` participants with fresh identities. The first is the host.
    pub fn make_participants(n: usize) -> Vec<Participant> {
        (0..n)
            .map(|i| {
                let role = if i == 0 { Role::Host } else { Role::Guest };
                Participant::new(ConnectionId::new(), format!("Player{}", i + 1), role)
            })
            .collect()
    }

    /// Assert the room-list invariants: non-empty lists have exactly one host
    /// and it sits at index 0.
    pub fn assert_host_first(players: &[Participant]) {
        if players.is_empty() {
            return;
        }
        assert_eq!(players[0].role, Role::Host, "index 0 must be the host");
        let hosts = players.iter().filter(|p| p.role.is_host()).count();
        assert_eq!(hosts, 1, "exactly one host expected, found {hosts}");
    }
}

//! Client prediction and server reconciliation
//!
//! Client: every tick is simulated locally right away and remembered as a
//! [`SavedMove`]. Idle ticks are merged while they can be; the rest are sent
//! to the authority in order. An acknowledgement either confirms a move or
//! carries the authoritative end state, in which case the client rewinds and
//! replays every move the authority has not seen yet.
//!
//! Server: [`ServerMoveHandler`] applies moves strictly in sequence order and
//! answers each with a [`MoveAck`].

use bevy::prelude::*;
use std::collections::VecDeque;

use super::saved_move::{end_state_checksum, SavedMove};
use super::{CompressedFlags, ReplicationError};
use crate::abilities::MovementState;
use crate::config::PredictionConfig;
use crate::constants::MAX_SAVED_MOVES;
use crate::geometry::RayCaster;
use crate::movement::{CharacterMovement, MovementExtension, MovementMode, SnapshotScope, TickContext};

/// Role of a simulation instance for one character
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NetRole {
    None,
    SimulatedProxy,
    AutonomousProxy,
    Authority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetMode {
    Standalone,
    DedicatedServer,
    ListenServer,
    Client,
}

/// One move as it travels to the authority
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMove {
    pub sequence: u32,
    pub timestamp: f64,
    pub delta_time: f32,
    pub acceleration: Vec3,
    pub view_direction: Vec3,
    pub flags: CompressedFlags,
    /// Where the client's prediction ended, for the error check
    pub client_end_position: Vec3,
    pub client_end_mode: MovementMode,
    pub client_checksum: u64,
}

impl From<&SavedMove> for ServerMove {
    fn from(saved: &SavedMove) -> Self {
        Self {
            sequence: saved.sequence,
            timestamp: saved.timestamp,
            delta_time: saved.delta_time,
            acceleration: saved.acceleration,
            view_direction: saved.view_direction,
            flags: saved.compressed_flags(),
            client_end_position: saved.end_position,
            client_end_mode: saved.end_mode,
            client_checksum: saved.checksum(),
        }
    }
}

/// Authoritative end state sent back when the prediction was off
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveCorrection {
    pub position: Vec3,
    pub velocity: Vec3,
    pub mode: MovementMode,
    /// Ability state as the extension captures it into a snapshot
    pub state: MovementState,
}

impl MoveCorrection {
    fn from_authority<E: MovementExtension>(movement: &CharacterMovement<E>) -> Self {
        let mut snapshot = SavedMove::allocate();
        movement.extension.on_capture_snapshot(&mut snapshot);
        Self {
            position: movement.body.position,
            velocity: movement.body.velocity,
            mode: movement.body.mode(),
            state: snapshot.state,
        }
    }

    fn apply<E: MovementExtension>(&self, movement: &mut CharacterMovement<E>) {
        movement.body.set_movement_mode(self.mode);
        movement.body.position = self.position;
        movement.body.velocity = self.velocity;
        let snapshot = SavedMove {
            state: self.state,
            ..SavedMove::allocate()
        };
        movement.extension.on_restore_snapshot(&snapshot, SnapshotScope::Full);
    }
}

/// Serial-number order of move sequences, so the counter may wrap
pub fn is_newer_sequence(received: u32, last: u32) -> bool {
    (received.wrapping_sub(last) as i32) > 0
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveAck {
    pub sequence: u32,
    /// Checksum of the authority's end state
    pub checksum: u64,
    pub correction: Option<MoveCorrection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Prediction accepted; `bit_exact` tells whether the end states hashed equal
    Confirmed { bit_exact: bool },
    /// Rewound to the authority's state and replayed `replayed` moves
    Corrected { replayed: usize },
}

/// Unacknowledged moves of a predicting client
#[derive(Debug, Clone)]
pub struct ClientPredictionData {
    saved_moves: VecDeque<SavedMove>,
    pending_move: Option<SavedMove>,
    capacity: usize,
    next_sequence: u32,
    last_acked: Option<u32>,
}

impl Default for ClientPredictionData {
    fn default() -> Self {
        Self::new(MAX_SAVED_MOVES)
    }
}

impl ClientPredictionData {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            saved_moves: VecDeque::with_capacity(capacity),
            pending_move: None,
            capacity,
            next_sequence: 1,
            last_acked: None,
        }
    }

    pub fn next_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    /// Sent but not yet acknowledged, oldest first
    pub fn saved_moves(&self) -> impl Iterator<Item = &SavedMove> {
        self.saved_moves.iter()
    }

    /// Simulated but held back in case the next tick can merge into it
    pub fn pending_move(&self) -> Option<&SavedMove> {
        self.pending_move.as_ref()
    }

    pub fn len(&self) -> usize {
        self.saved_moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved_moves.is_empty()
    }

    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }

    fn push_saved_move(&mut self, saved: SavedMove) {
        if self.saved_moves.len() >= self.capacity {
            if let Some(dropped) = self.saved_moves.pop_front() {
                warn!(
                    sequence = dropped.sequence,
                    capacity = self.capacity,
                    "saved move ring full, dropping oldest unacknowledged move"
                );
            }
        }
        self.saved_moves.push_back(saved);
    }

    /// Drop every move up to and including `sequence`, returning that move
    fn acknowledge(&mut self, sequence: u32) -> Result<SavedMove, ReplicationError> {
        let index = self
            .saved_moves
            .iter()
            .position(|saved| saved.sequence == sequence)
            .ok_or(ReplicationError::UnknownAck { sequence })?;
        let acked = self
            .saved_moves
            .drain(..=index)
            .last()
            .ok_or(ReplicationError::UnknownAck { sequence })?;
        self.last_acked = Some(sequence);
        Ok(acked)
    }
}

impl<E: MovementExtension> CharacterMovement<E> {
    /// Simulate one locally controlled tick and queue it for the authority.
    ///
    /// Returns the move that is ready to go out, if any. A move merged into
    /// the pending one is re-simulated from the pending move's start over the
    /// combined delta, so the authority replays exactly what was predicted.
    pub fn replicate_move_to_server(
        &mut self,
        ctx: &TickContext<'_>,
        dt: f32,
        config: &PredictionConfig,
    ) -> Option<ServerMove> {
        let mut data = std::mem::take(self.prediction_data_client(config.max_saved_moves));

        let sequence = data.next_sequence();
        let mut new_move = SavedMove::capture(self, sequence, ctx.now, dt);
        let mut outgoing = None;

        if let Some(pending) = data.pending_move.take() {
            if pending.can_combine_with(&new_move, config.max_combine_delta) {
                pending.restore(self);
                new_move.combine_with(&pending);
                new_move.prepare_replay(self);
                trace!(
                    sequence = new_move.sequence,
                    delta_time = new_move.delta_time,
                    "combined with pending move"
                );
            } else {
                outgoing = Some(ServerMove::from(&pending));
                data.push_saved_move(pending);
            }
        }

        let tick = TickContext::new(new_move.timestamp, ctx.ray_caster);
        self.perform_movement(&tick, new_move.delta_time);
        new_move.post_update(self);
        data.pending_move = Some(new_move);

        *self.prediction_data_client(config.max_saved_moves) = data;
        outgoing
    }

    /// Send the held-back move now instead of waiting for the next tick
    pub fn flush_pending_move(&mut self, config: &PredictionConfig) -> Option<ServerMove> {
        let data = self.prediction_data_client(config.max_saved_moves);
        let pending = data.pending_move.take()?;
        let outgoing = ServerMove::from(&pending);
        data.push_saved_move(pending);
        Some(outgoing)
    }

    /// Handle the authority's answer to one of our moves
    pub fn client_handle_ack(
        &mut self,
        ack: &MoveAck,
        caster: &dyn RayCaster,
        config: &PredictionConfig,
    ) -> Result<AckOutcome, ReplicationError> {
        let mut data = std::mem::take(self.prediction_data_client(config.max_saved_moves));
        let outcome = match data.acknowledge(ack.sequence) {
            Ok(acked) => match ack.correction {
                None => {
                    let bit_exact = acked.checksum() == ack.checksum;
                    if !bit_exact {
                        debug!(sequence = ack.sequence, "move accepted within tolerance, checksum differs");
                    }
                    Ok(AckOutcome::Confirmed { bit_exact })
                }
                // Sent before an earlier correction; the replay already matches
                Some(_) if acked.checksum() == ack.checksum => {
                    trace!(sequence = ack.sequence, "correction already applied by replay");
                    Ok(AckOutcome::Confirmed { bit_exact: true })
                }
                Some(correction) => {
                    let replayed = self.replay_after_correction(&mut data, &correction, caster);
                    warn!(
                        sequence = ack.sequence,
                        error = acked.end_position.distance(correction.position),
                        replayed,
                        "client corrected by authority"
                    );
                    Ok(AckOutcome::Corrected { replayed })
                }
            },
            Err(err) => {
                warn!(sequence = ack.sequence, "acknowledgement for unknown move");
                Err(err)
            }
        };
        *self.prediction_data_client(config.max_saved_moves) = data;
        outcome
    }

    /// Snap to the corrected state and re-simulate every move the authority
    /// has not acknowledged yet, each one decoded the way the authority will
    /// decode it
    fn replay_after_correction(
        &mut self,
        data: &mut ClientPredictionData,
        correction: &MoveCorrection,
        caster: &dyn RayCaster,
    ) -> usize {
        correction.apply(self);
        let mut replayed = 0;
        for saved in data
            .saved_moves
            .iter_mut()
            .chain(data.pending_move.iter_mut())
        {
            let ctx = TickContext::replay(saved.timestamp, caster);
            saved.replay_as_authority(self, &ctx);
            saved.refresh_start(self);
            self.perform_movement(&ctx, saved.delta_time);
            saved.post_update(self);
            replayed += 1;
        }
        replayed
    }
}

/// Authority side: applies client moves in order
#[derive(Debug, Clone)]
pub struct ServerMoveHandler {
    last_sequence: Option<u32>,
    correction_tolerance: f32,
}

impl ServerMoveHandler {
    pub fn new(config: &PredictionConfig) -> Self {
        Self {
            last_sequence: None,
            correction_tolerance: config.correction_tolerance,
        }
    }

    pub fn last_sequence(&self) -> Option<u32> {
        self.last_sequence
    }

    /// Replay one client move. Moves must arrive in the order they were
    /// generated; anything not newer than the last applied move is dropped.
    ///
    /// Gameplay events raised by the move stay buffered on the extension;
    /// the host drains them (see `AbilityMovement::drain_events`).
    pub fn process<E: MovementExtension>(
        &mut self,
        movement: &mut CharacterMovement<E>,
        caster: &dyn RayCaster,
        server_move: &ServerMove,
    ) -> Result<MoveAck, ReplicationError> {
        if let Some(last) = self.last_sequence {
            if !is_newer_sequence(server_move.sequence, last) {
                warn!(received = server_move.sequence, last, "dropping stale move");
                return Err(ReplicationError::StaleMove {
                    received: server_move.sequence,
                    last,
                });
            }
        }

        movement.body.view_direction = server_move.view_direction;
        movement.input.acceleration = server_move.acceleration;
        let ctx = TickContext::new(server_move.timestamp, caster);
        movement.update_from_compressed_flags(&ctx, server_move.flags);
        movement.perform_movement(&ctx, server_move.delta_time);
        self.last_sequence = Some(server_move.sequence);

        let body = &movement.body;
        let checksum = end_state_checksum(body.position, body.velocity, body.mode());
        let within_tolerance = body.position.distance(server_move.client_end_position)
            <= self.correction_tolerance
            && body.mode() == server_move.client_end_mode;
        let correction = (checksum != server_move.client_checksum && !within_tolerance)
            .then(|| MoveCorrection::from_authority(&*movement));
        if correction.is_some() {
            debug!(sequence = server_move.sequence, "client prediction rejected");
        }

        Ok(MoveAck {
            sequence: server_move.sequence,
            checksum,
            correction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abilities::AbilityMovement;
    use crate::config::{BaseMovementConfig, MovementTuning};
    use crate::constants::MAX_PENDING_EVENTS;
    use crate::geometry::{ActorId, WallScene};
    use crate::movement::CharacterBody;

    fn character(role: NetRole, remote: NetRole, mode: NetMode) -> CharacterMovement<AbilityMovement> {
        let base = BaseMovementConfig::default();
        let body = CharacterBody::new(ActorId(1), Vec3::new(0.0, 5.0, 0.0), &base);
        CharacterMovement::new(body, AbilityMovement::new(MovementTuning::default()), base)
            .with_roles(role, remote, mode)
    }

    fn client() -> CharacterMovement<AbilityMovement> {
        character(NetRole::AutonomousProxy, NetRole::Authority, NetMode::Client)
    }

    fn server() -> CharacterMovement<AbilityMovement> {
        character(NetRole::Authority, NetRole::AutonomousProxy, NetMode::DedicatedServer)
    }

    #[test]
    fn test_ring_drops_oldest() {
        let mut data = ClientPredictionData::new(2);
        for sequence in 1..=3 {
            data.push_saved_move(SavedMove {
                sequence,
                ..SavedMove::allocate()
            });
        }
        assert_eq!(data.len(), 2);
        assert_eq!(data.saved_moves().next().map(|m| m.sequence), Some(2));
    }

    #[test]
    fn test_acknowledge_truncates() {
        let mut data = ClientPredictionData::new(8);
        for sequence in 1..=4 {
            data.push_saved_move(SavedMove {
                sequence,
                ..SavedMove::allocate()
            });
        }
        let acked = data.acknowledge(2).unwrap();
        assert_eq!(acked.sequence, 2);
        assert_eq!(data.len(), 2);
        assert_eq!(data.last_acked(), Some(2));
        assert_eq!(
            data.acknowledge(2),
            Err(ReplicationError::UnknownAck { sequence: 2 })
        );
    }

    #[test]
    fn test_idle_ticks_combine() {
        let scene = WallScene::new();
        let config = PredictionConfig::default();
        let mut client = client();
        client.input.acceleration = Vec3::X;

        let dt = 1.0 / 60.0;
        assert!(client
            .replicate_move_to_server(&TickContext::new(0.0, &scene), dt, &config)
            .is_none());
        assert!(client
            .replicate_move_to_server(&TickContext::new(f64::from(dt), &scene), dt, &config)
            .is_none());

        let data = client.prediction_data_client(config.max_saved_moves);
        let pending = data.pending_move().unwrap();
        assert_eq!(pending.sequence, 1);
        assert!((pending.delta_time - 2.0 * dt).abs() < 1e-6);
        assert!(data.is_empty());
    }

    #[test]
    fn test_request_forces_send() {
        let scene = WallScene::new();
        let config = PredictionConfig::default();
        let mut client = client();
        let dt = 1.0 / 60.0;

        client.extension.set_triggering_teleport(true);
        assert!(client
            .replicate_move_to_server(&TickContext::new(0.0, &scene), dt, &config)
            .is_none());
        let sent = client
            .replicate_move_to_server(&TickContext::new(f64::from(dt), &scene), dt, &config)
            .expect("teleport move must not be merged");
        assert_eq!(sent.sequence, 1);
        assert!(sent.flags.contains(CompressedFlags::TELEPORT));
    }

    #[test]
    fn test_server_rejects_stale_move() {
        let scene = WallScene::new();
        let config = PredictionConfig::default();
        let mut client = client();
        let mut server = server();
        let mut handler = ServerMoveHandler::new(&config);

        client.replicate_move_to_server(&TickContext::new(0.0, &scene), 0.1, &config);
        let sent = client.flush_pending_move(&config).unwrap();

        assert!(handler.process(&mut server, &scene, &sent).is_ok());
        assert_eq!(
            handler.process(&mut server, &scene, &sent),
            Err(ReplicationError::StaleMove {
                received: sent.sequence,
                last: sent.sequence
            })
        );
    }

    fn teleport_move(sequence: u32) -> ServerMove {
        ServerMove {
            sequence,
            timestamp: f64::from(sequence) * 0.05,
            delta_time: 0.05,
            acceleration: Vec3::ZERO,
            view_direction: Vec3::Z,
            flags: CompressedFlags(CompressedFlags::TELEPORT),
            client_end_position: Vec3::ZERO,
            client_end_mode: MovementMode::Falling,
            client_checksum: 0,
        }
    }

    #[test]
    fn test_sequence_order_survives_wrap() {
        assert!(is_newer_sequence(2, 1));
        assert!(!is_newer_sequence(1, 1));
        assert!(!is_newer_sequence(1, 2));
        assert!(is_newer_sequence(0, u32::MAX));
        assert!(is_newer_sequence(5, u32::MAX - 5));
        assert!(!is_newer_sequence(u32::MAX, 0));
    }

    #[test]
    fn test_server_accepts_wrapped_sequence() {
        let scene = WallScene::new();
        let mut server = server();
        let mut handler = ServerMoveHandler::new(&PredictionConfig::default());

        assert!(handler.process(&mut server, &scene, &teleport_move(u32::MAX)).is_ok());
        assert!(handler.process(&mut server, &scene, &teleport_move(0)).is_ok());
        assert!(handler.process(&mut server, &scene, &teleport_move(1)).is_ok());
        assert_eq!(handler.last_sequence(), Some(1));
        assert_eq!(
            handler.process(&mut server, &scene, &teleport_move(u32::MAX)),
            Err(ReplicationError::StaleMove {
                received: u32::MAX,
                last: 1
            })
        );
    }

    #[test]
    fn test_client_sequence_wraps() {
        let mut data = ClientPredictionData::new(4);
        data.next_sequence = u32::MAX;
        assert_eq!(data.next_sequence(), u32::MAX);
        assert_eq!(data.next_sequence(), 0);
        assert_eq!(data.next_sequence(), 1);
    }

    #[test]
    fn test_server_events_bounded_without_drain() {
        let scene = WallScene::new();
        let mut server = server();
        let mut handler = ServerMoveHandler::new(&PredictionConfig::default());
        for sequence in 1..=(MAX_PENDING_EVENTS as u32 + 8) {
            handler.process(&mut server, &scene, &teleport_move(sequence)).unwrap();
        }
        assert_eq!(server.extension.drain_events().len(), MAX_PENDING_EVENTS);
    }

    #[test]
    fn test_matching_prediction_confirmed_bit_exact() {
        let scene = WallScene::new();
        let config = PredictionConfig::default();
        let mut client = client();
        let mut server = server();
        let mut handler = ServerMoveHandler::new(&config);

        client.extension.set_triggering_teleport(true);
        client.replicate_move_to_server(&TickContext::new(0.0, &scene), 0.05, &config);
        let sent = client.flush_pending_move(&config).unwrap();

        let ack = handler.process(&mut server, &scene, &sent).unwrap();
        assert!(ack.correction.is_none());
        assert_eq!(ack.checksum, sent.client_checksum);
        assert_eq!(server.body.position, client.body.position);
        assert_eq!(
            client.client_handle_ack(&ack, &scene, &config),
            Ok(AckOutcome::Confirmed { bit_exact: true })
        );
    }

    #[test]
    fn test_correction_replays_unacked_moves() {
        let scene = WallScene::new();
        let config = PredictionConfig::default();
        let mut client = client();
        let mut server = server();
        let mut handler = ServerMoveHandler::new(&config);
        let dt = 0.05;

        // First move: the client teleports, the server's copy starts elsewhere
        server.body.position += Vec3::new(0.0, 0.0, 3.0);
        client.extension.set_triggering_teleport(true);
        client.replicate_move_to_server(&TickContext::new(0.0, &scene), dt, &config);
        let first = client.flush_pending_move(&config).unwrap();

        client.replicate_move_to_server(&TickContext::new(0.05, &scene), dt, &config);
        let second = client.flush_pending_move(&config).unwrap();

        let ack = handler.process(&mut server, &scene, &first).unwrap();
        assert!(ack.correction.is_some());
        let outcome = client.client_handle_ack(&ack, &scene, &config).unwrap();
        assert_eq!(outcome, AckOutcome::Corrected { replayed: 1 });

        let ack = handler.process(&mut server, &scene, &second).unwrap();
        assert_eq!(server.body.position, client.body.position);
        assert_eq!(
            client.client_handle_ack(&ack, &scene, &config),
            Ok(AckOutcome::Confirmed { bit_exact: true })
        );
    }

    #[test]
    fn test_unknown_ack() {
        let scene = WallScene::new();
        let config = PredictionConfig::default();
        let mut client = client();
        let ack = MoveAck {
            sequence: 99,
            checksum: 0,
            correction: None,
        };
        assert_eq!(
            client.client_handle_ack(&ack, &scene, &config),
            Err(ReplicationError::UnknownAck { sequence: 99 })
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "client prediction data requested")]
    fn test_prediction_data_on_dedicated_server_panics() {
        let mut server = server();
        server.prediction_data_client(MAX_SAVED_MOVES);
    }

    #[test]
    fn test_listen_server_may_predict() {
        let mut host = character(NetRole::Authority, NetRole::AutonomousProxy, NetMode::ListenServer);
        host.prediction_data_client(4);
        assert!(host.has_prediction_data());
    }
}

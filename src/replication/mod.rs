//! Network replication of ability requests
//!
//! Every tick a client sends one byte of flags alongside its movement input.
//! Layout (version [`FLAGS_PROTOCOL_VERSION`]):
//!
//! | bit  | meaning                                   |
//! |------|-------------------------------------------|
//! | 0x01 | base jump pressed                         |
//! | 0x02..=0x08 | reserved for the base controller   |
//! | 0x10 | teleport                                  |
//! | 0x20 | wall-jump                                 |
//! | 0x40 | jetpack sprint (alone)                    |
//! | 0x80 | wall-run toggle (alone)                   |
//! | 0x40 + 0x80 | wall-run jump                      |
//!
//! The last three share two bits. That only works because jetpack sprint,
//! wall-run and wall-run jump are never requested in the same tick; a fourth
//! ability in that group needs a wider field and a protocol version bump.

pub mod prediction;
pub mod saved_move;

use bevy::prelude::*;

use crate::abilities::{AbilityMovement, AbilityRequests};
use crate::constants::FLAGS_PROTOCOL_VERSION;
use crate::movement::{CharacterBody, TickContext};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("Stale move {received}: last applied move is {last}")]
    StaleMove { received: u32, last: u32 },
    #[error("Acknowledged move {sequence} is not pending")]
    UnknownAck { sequence: u32 },
}

/// One byte of per-tick request bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompressedFlags(pub u8);

impl CompressedFlags {
    pub const JUMP_PRESSED: u8 = 0x01;
    pub const RESERVED_BASE: u8 = 0x0E;
    pub const TELEPORT: u8 = 0x10;
    pub const WALL_JUMP: u8 = 0x20;
    pub const JETPACK_SPRINT: u8 = 0x40;
    pub const WALL_RUN: u8 = 0x80;
    pub const WALL_RUN_JUMP: u8 = Self::JETPACK_SPRINT | Self::WALL_RUN;

    pub const VERSION: u8 = FLAGS_PROTOCOL_VERSION;

    /// Pack requests into one byte.
    ///
    /// A wall-run toggle hidden by a wall-run jump is not sent on its own.
    pub fn encode(requests: &AbilityRequests, jump_pressed: bool) -> Self {
        let mut bits = 0u8;
        if jump_pressed {
            bits |= Self::JUMP_PRESSED;
        }
        if requests.teleport {
            bits |= Self::TELEPORT;
        }
        if requests.wall_jump {
            bits |= Self::WALL_JUMP;
        }
        if requests.jetpack_sprint {
            bits |= Self::JETPACK_SPRINT;
        }
        if requests.wall_run && !requests.wall_run_jump {
            bits |= Self::WALL_RUN;
        }
        if requests.wall_run_jump {
            bits |= Self::WALL_RUN_JUMP;
        }
        Self(bits)
    }

    /// Any byte decodes to some request set; nothing is rejected
    pub fn decode(self) -> AbilityRequests {
        let jetpack_bit = self.contains(Self::JETPACK_SPRINT);
        let wall_run_bit = self.contains(Self::WALL_RUN);
        AbilityRequests {
            teleport: self.contains(Self::TELEPORT),
            wall_jump: self.contains(Self::WALL_JUMP),
            jetpack_sprint: jetpack_bit && !wall_run_bit,
            wall_run: wall_run_bit && !jetpack_bit,
            wall_run_jump: jetpack_bit && wall_run_bit,
        }
    }

    #[inline]
    pub fn contains(self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    pub fn jump_pressed(self) -> bool {
        self.contains(Self::JUMP_PRESSED)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl AbilityMovement {
    /// Authority side of a received flag byte.
    ///
    /// Teleport and wall-jump fire right away; the other three become the
    /// requests of the move about to be simulated, through the same setters
    /// the client's input layer uses so availability side effects match.
    pub fn apply_compressed_flags(
        &mut self,
        body: &mut CharacterBody,
        ctx: &TickContext<'_>,
        flags: CompressedFlags,
    ) {
        let requests = flags.decode();
        trace!(flags = flags.bits(), ?requests, "decoded compressed flags");

        if requests.teleport {
            self.teleport(body, ctx);
        }
        if requests.wall_jump {
            self.wall_jump(body, ctx);
        }
        self.set_triggering_wall_run_jump(requests.wall_run_jump);
        if requests.wall_run {
            self.set_triggering_wall_run(body, true);
        }
        self.set_triggering_jetpack_sprint(requests.jetpack_sprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requests(f: impl FnOnce(&mut AbilityRequests)) -> AbilityRequests {
        let mut r = AbilityRequests::default();
        f(&mut r);
        r
    }

    #[test]
    fn test_bit_values() {
        let teleport = requests(|r| r.teleport = true);
        assert_eq!(CompressedFlags::encode(&teleport, false).bits(), 0x10);
        let wall_jump = requests(|r| r.wall_jump = true);
        assert_eq!(CompressedFlags::encode(&wall_jump, false).bits(), 0x20);
        let jetpack = requests(|r| r.jetpack_sprint = true);
        assert_eq!(CompressedFlags::encode(&jetpack, false).bits(), 0x40);
        let wall_run = requests(|r| r.wall_run = true);
        assert_eq!(CompressedFlags::encode(&wall_run, false).bits(), 0x80);
        let wall_run_jump = requests(|r| r.wall_run_jump = true);
        assert_eq!(CompressedFlags::encode(&wall_run_jump, false).bits(), 0xC0);
        assert_eq!(CompressedFlags::encode(&AbilityRequests::default(), true).bits(), 0x01);
    }

    #[test]
    fn test_shared_bits_decode() {
        let jetpack = CompressedFlags(0x40).decode();
        assert!(jetpack.jetpack_sprint && !jetpack.wall_run && !jetpack.wall_run_jump);

        let wall_run = CompressedFlags(0x80).decode();
        assert!(!wall_run.jetpack_sprint && wall_run.wall_run && !wall_run.wall_run_jump);

        let jump = CompressedFlags(0xC0).decode();
        assert!(!jump.jetpack_sprint && !jump.wall_run && jump.wall_run_jump);
    }

    #[test]
    fn test_wall_run_hidden_by_wall_run_jump() {
        let both = requests(|r| {
            r.wall_run = true;
            r.wall_run_jump = true;
        });
        let decoded = CompressedFlags::encode(&both, false).decode();
        assert!(decoded.wall_run_jump);
        assert!(!decoded.wall_run);
    }

    #[test]
    fn test_garbage_byte_decodes() {
        let decoded = CompressedFlags(0xFF).decode();
        assert!(decoded.teleport && decoded.wall_jump && decoded.wall_run_jump);
        assert!(CompressedFlags(0xFF).jump_pressed());
    }

    #[test]
    fn test_reserved_bits_ignored_by_abilities() {
        assert_eq!(CompressedFlags(CompressedFlags::RESERVED_BASE).decode(), AbilityRequests::default());
    }
}

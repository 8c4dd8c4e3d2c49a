// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

mod api;
mod assign_scoreboard;
pub mod ir;
pub mod reg_mask;


pub use api::{DebugFlags, GetDebugFlags, DEBUG};
pub use assign_scoreboard::{
    choose_slot, classify, AssignStats, HazardClass, GENERAL_SLOTS_MASK,
    NUM_GENERAL_SLOTS, SLOT_BARRIER, SLOT_SERIAL,
};
